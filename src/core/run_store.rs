//! Append-only run journal with file-based persistence.
//!
//! Each run gets a directory `<root>/<run_id>/` holding `events.jsonl`,
//! one JSON-encoded [`JournalEntry`] per line.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::adapters::Params;
use crate::domain::{JournalEntry, WorkflowRun};

/// Directory of run journals
#[derive(Debug, Clone)]
pub struct RunStore {
    root: PathBuf,
}

impl RunStore {
    /// Use a specific root directory
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Use the configured runs directory (~/.bizflow/runs or $BIZFLOW_HOME/runs)
    pub fn open_default() -> Result<Self> {
        Ok(Self::new(crate::config::runs_dir()?))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create or open the journal of a run
    pub async fn journal(&self, run_id: Uuid) -> Result<RunJournal> {
        let run_dir = self.root.join(run_id.to_string());

        fs::create_dir_all(&run_dir)
            .await
            .with_context(|| format!("Failed to create run directory: {}", run_dir.display()))?;

        Ok(RunJournal {
            events_path: run_dir.join("events.jsonl"),
            run_dir,
            write_lock: Mutex::new(()),
        })
    }

    /// Rebuild a run report from its journal
    pub async fn load_run(&self, run_id: Uuid) -> Result<Option<WorkflowRun>> {
        let run_dir = self.root.join(run_id.to_string());
        if !run_dir.exists() {
            return Ok(None);
        }

        let journal = self.journal(run_id).await?;
        let entries = journal.replay().await?;
        Ok(WorkflowRun::from_journal(&entries))
    }

    /// List all run IDs in the store
    pub async fn list_runs(&self) -> Result<Vec<Uuid>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let mut runs = Vec::new();
        let mut entries = fs::read_dir(&self.root)
            .await
            .with_context(|| format!("Failed to read runs directory: {}", self.root.display()))?;

        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    if let Ok(uuid) = Uuid::parse_str(name) {
                        runs.push(uuid);
                    }
                }
            }
        }

        Ok(runs)
    }
}

/// Journal of a single run
///
/// Appends are serialized, so concurrently executing steps can share one
/// journal.
#[derive(Debug)]
pub struct RunJournal {
    run_dir: PathBuf,
    events_path: PathBuf,
    write_lock: Mutex<()>,
}

impl RunJournal {
    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn events_path(&self) -> &Path {
        &self.events_path
    }

    /// Append an entry to the log
    pub async fn append(&self, entry: &JournalEntry) -> Result<()> {
        let json = serde_json::to_string(entry).context("Failed to serialize journal entry")?;

        let _guard = self.write_lock.lock().await;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.events_path)
            .await
            .with_context(|| format!("Failed to open journal: {}", self.events_path.display()))?;

        file.write_all(format!("{}\n", json).as_bytes())
            .await
            .context("Failed to write journal entry")?;
        file.flush().await.context("Failed to flush journal entry")?;

        Ok(())
    }

    /// Replay all entries in order
    pub async fn replay(&self) -> Result<Vec<JournalEntry>> {
        if !self.events_path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.events_path)
            .await
            .with_context(|| format!("Failed to open journal: {}", self.events_path.display()))?;

        let mut lines = BufReader::new(file).lines();
        let mut entries = Vec::new();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let entry: JournalEntry = serde_json::from_str(&line)
                .with_context(|| format!("Failed to parse journal entry: {}", line))?;
            entries.push(entry);
        }

        Ok(entries)
    }

}

/// Generate an idempotency key for a step invocation
pub fn generate_idempotency_key(run_id: Uuid, step_name: &str, params: &Params) -> String {
    format!("{}:{}:{}", run_id, step_name, hash_params(params))
}

/// Hash resolved parameters (first 16 hex chars of SHA256)
pub fn hash_params(params: &Params) -> String {
    // serde_json maps are key-ordered, so equal params hash equally
    let canonical = serde_json::to_string(params).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    let result = hasher.finalize();
    hex::encode(&result[..8])
}
