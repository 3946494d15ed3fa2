//! Inbox directory watcher.
//!
//! Watches a directory for dropped `*.json` event files and publishes them
//! on the event bus once they are stable (fully written). Handled files are
//! moved to `processed/`, unparsable ones to `failed/`. A JSONL ledger of
//! content hashes keeps a re-dropped file from publishing twice.

use std::collections::{HashMap, HashSet};
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use notify::RecursiveMode;
use notify_debouncer_mini::new_debouncer;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::core::{DeliveryReport, EventBus};
use crate::domain::Event;

const PROCESSED_DIR: &str = "processed";
const FAILED_DIR: &str = "failed";
const LEDGER_FILE: &str = ".ledger.jsonl";

/// Errors that can occur with the inbox watcher
#[derive(Debug, Error)]
pub enum InboxError {
    #[error("Inbox directory does not exist: {0}")]
    DirectoryNotFound(PathBuf),

    #[error("Notify error: {0}")]
    Notify(#[from] notify::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration for the inbox watcher
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboxConfig {
    /// Directory to watch
    pub dir: PathBuf,

    /// How long a file's size must stay unchanged before it is read
    #[serde(default = "default_stability_delay_ms")]
    pub stability_delay_ms: u64,

    /// Debounce window for filesystem notifications
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Source recorded on events whose file names none
    #[serde(default = "default_source")]
    pub default_source: String,
}

fn default_stability_delay_ms() -> u64 {
    1_000
}
fn default_debounce_ms() -> u64 {
    500
}
fn default_source() -> String {
    "inbox".to_string()
}

impl InboxConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            stability_delay_ms: default_stability_delay_ms(),
            debounce_ms: default_debounce_ms(),
            default_source: default_source(),
        }
    }

    pub fn processed_dir(&self) -> PathBuf {
        self.dir.join(PROCESSED_DIR)
    }

    pub fn failed_dir(&self) -> PathBuf {
        self.dir.join(FAILED_DIR)
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.dir.join(LEDGER_FILE)
    }

    /// Check that the inbox directory exists
    pub fn validate(&self) -> Result<(), InboxError> {
        if !self.dir.is_dir() {
            return Err(InboxError::DirectoryNotFound(self.dir.clone()));
        }
        Ok(())
    }
}

/// On-disk shape of an event file
#[derive(Debug, Deserialize)]
struct EventFile {
    #[serde(rename = "type")]
    event_type: String,

    #[serde(default)]
    source: Option<String>,

    #[serde(default)]
    data: Map<String, Value>,
}

/// What happened to one inbox file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    /// Published on the bus
    Published(DeliveryReport),

    /// Content already published earlier
    Duplicate,

    /// Not a valid event file; moved to `failed/`
    Rejected(String),
}

/// Result of a directory scan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanResult {
    pub published: usize,
    pub duplicates: usize,
    pub rejected: usize,
    pub errors: usize,
}

impl ScanResult {
    pub fn total_scanned(&self) -> usize {
        self.published + self.duplicates + self.rejected + self.errors
    }

    fn record(&mut self, outcome: &Result<FileOutcome>) {
        match outcome {
            Ok(FileOutcome::Published(_)) => self.published += 1,
            Ok(FileOutcome::Duplicate) => self.duplicates += 1,
            Ok(FileOutcome::Rejected(_)) => self.rejected += 1,
            Err(_) => self.errors += 1,
        }
    }
}

/// A published inbox file, as recorded in the ledger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub hash: String,
    pub file: String,
    pub event_id: Uuid,
    pub event_type: String,
    pub published_at: DateTime<Utc>,
}

/// Inbox watcher publishing event files onto a bus
pub struct InboxWatcher {
    config: InboxConfig,
    bus: Arc<EventBus>,
}

impl InboxWatcher {
    pub fn new(config: InboxConfig, bus: Arc<EventBus>) -> Self {
        Self { config, bus }
    }

    /// Get the current configuration
    pub fn config(&self) -> &InboxConfig {
        &self.config
    }

    /// Process every event file already in the inbox
    pub async fn scan_once(&self) -> Result<ScanResult> {
        self.config.validate()?;

        let mut paths = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.config.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if is_event_file(&path) && entry.file_type().await?.is_file() {
                paths.push(path);
            }
        }
        paths.sort();

        let mut result = ScanResult::default();
        for path in paths {
            let outcome = self.process_file(&path).await;
            if let Err(ref e) = outcome {
                warn!(path = %path.display(), error = %e, "Failed to process inbox file");
            }
            result.record(&outcome);
        }

        Ok(result)
    }

    /// Publish one event file and move it out of the inbox
    pub async fn process_file(&self, path: &Path) -> Result<FileOutcome> {
        let content = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read inbox file: {}", path.display()))?;
        let hash = content_hash(&content);
        let ledger_path = self.config.ledger_path();

        if ledger_contains(&ledger_path, &hash)? {
            debug!(path = %path.display(), %hash, "Inbox file already published");
            move_into(path, &self.config.processed_dir(), &hash).await?;
            return Ok(FileOutcome::Duplicate);
        }

        let file: EventFile = match serde_json::from_slice(&content) {
            Ok(file) => file,
            Err(e) => {
                let reason = format!("invalid event file: {}", e);
                warn!(path = %path.display(), %reason, "Rejected inbox file");
                move_into(path, &self.config.failed_dir(), &hash).await?;
                return Ok(FileOutcome::Rejected(reason));
            }
        };

        let source = file
            .source
            .unwrap_or_else(|| self.config.default_source.clone());
        let event = Event::new(file.event_type, source).with_data(file.data);

        let report = self.bus.publish(&event);
        info!(
            path = %path.display(),
            event_id = %event.id,
            event_type = %event.event_type,
            delivered = report.delivered,
            failed = report.failed,
            "Published inbox event"
        );

        append_ledger(
            &ledger_path,
            &LedgerEntry {
                hash: hash.clone(),
                file: file_name(path),
                event_id: event.id,
                event_type: event.event_type.clone(),
                published_at: Utc::now(),
            },
        )?;
        move_into(path, &self.config.processed_dir(), &hash).await?;

        Ok(FileOutcome::Published(report))
    }

    /// Watch the inbox until stopped
    pub fn watch(self: Arc<Self>) -> Result<WatchHandle> {
        self.config.validate()?;

        let (stop_tx, mut stop_rx) = mpsc::channel::<()>(1);

        let task = tokio::spawn(async move {
            if let Err(e) = self.run_watcher(&mut stop_rx).await {
                error!(error = %e, "Inbox watcher error");
            }
        });

        Ok(WatchHandle { stop_tx, task })
    }

    async fn run_watcher(&self, stop_rx: &mut mpsc::Receiver<()>) -> Result<()> {
        // path -> (size, last change)
        let mut pending: HashMap<PathBuf, (u64, Instant)> = HashMap::new();

        let (tx, rx) = std::sync::mpsc::channel();
        let mut debouncer = new_debouncer(Duration::from_millis(self.config.debounce_ms), tx)
            .map_err(InboxError::from)?;
        debouncer
            .watcher()
            .watch(&self.config.dir, RecursiveMode::NonRecursive)
            .map_err(InboxError::from)?;

        let stability_delay = Duration::from_millis(self.config.stability_delay_ms);

        info!(dir = %self.config.dir.display(), "Watching inbox for event files");

        loop {
            if stop_rx.try_recv().is_ok() {
                info!("Inbox watcher stopping");
                break;
            }

            loop {
                match rx.try_recv() {
                    Ok(Ok(events)) => {
                        for event in events {
                            if !is_event_file(&event.path) {
                                continue;
                            }
                            if let Ok(metadata) = std::fs::metadata(&event.path) {
                                if metadata.is_file() {
                                    pending.insert(event.path, (metadata.len(), Instant::now()));
                                }
                            }
                        }
                    }
                    Ok(Err(e)) => warn!(error = ?e, "Inbox notification error"),
                    Err(std::sync::mpsc::TryRecvError::Empty) => break,
                    Err(std::sync::mpsc::TryRecvError::Disconnected) => {
                        error!("Inbox watcher channel disconnected");
                        return Ok(());
                    }
                }
            }

            let now = Instant::now();
            let mut stable = Vec::new();

            pending.retain(|path, (last_size, last_seen)| {
                let Ok(metadata) = std::fs::metadata(path) else {
                    // Moved or deleted before it settled
                    return false;
                };
                let size = metadata.len();
                if size != *last_size {
                    *last_size = size;
                    *last_seen = now;
                    return true;
                }
                if size > 0 && now.duration_since(*last_seen) >= stability_delay {
                    stable.push(path.clone());
                    return false;
                }
                true
            });

            for path in stable {
                if let Err(e) = self.process_file(&path).await {
                    warn!(path = %path.display(), error = %e, "Failed to process inbox file");
                }
            }

            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        Ok(())
    }
}

/// Handle to control the watcher
pub struct WatchHandle {
    stop_tx: mpsc::Sender<()>,
    task: tokio::task::JoinHandle<()>,
}

impl WatchHandle {
    /// Stop the watcher
    pub async fn stop(self) -> Result<()> {
        let _ = self.stop_tx.send(()).await;
        self.task.await?;
        Ok(())
    }
}

fn is_event_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// SHA256 of file content (first 12 hex chars)
fn content_hash(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    let result = hasher.finalize();
    format!("{:x}", result)[..12].to_string()
}

async fn move_into(path: &Path, dir: &Path, hash: &str) -> Result<PathBuf> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Failed to create directory: {}", dir.display()))?;

    let target = archive_target(path, dir, hash).await?;
    tokio::fs::rename(path, &target)
        .await
        .with_context(|| format!("Failed to move {} to {}", path.display(), target.display()))?;
    Ok(target)
}

/// First free name in `dir`: the file's own name, then `<stem>-<hash>`,
/// then `<stem>-<hash>-<n>`. Archived files are never overwritten.
async fn archive_target(path: &Path, dir: &Path, hash: &str) -> Result<PathBuf> {
    let target = dir.join(file_name(path));
    if !tokio::fs::try_exists(&target).await? {
        return Ok(target);
    }

    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    let mut candidate = dir.join(format!("{}-{}{}", stem, hash, ext));
    let mut n = 1;
    while tokio::fs::try_exists(&candidate).await? {
        candidate = dir.join(format!("{}-{}-{}{}", stem, hash, n, ext));
        n += 1;
    }
    Ok(candidate)
}

fn read_ledger(path: &Path) -> Result<Vec<LedgerEntry>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open inbox ledger: {}", path.display()))?;

    let mut entries = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let entry: LedgerEntry = serde_json::from_str(&line)
            .with_context(|| format!("Failed to parse ledger line: {}", line))?;
        entries.push(entry);
    }
    Ok(entries)
}

fn ledger_contains(path: &Path, hash: &str) -> Result<bool> {
    let hashes: HashSet<String> = read_ledger(path)?.into_iter().map(|e| e.hash).collect();
    Ok(hashes.contains(hash))
}

/// Append to the ledger with file locking
fn append_ledger(path: &Path, entry: &LedgerEntry) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open inbox ledger: {}", path.display()))?;

    file.lock_exclusive()
        .context("Failed to acquire file lock on inbox ledger")?;

    let line = serde_json::to_string(entry)?;
    let written = writeln!(file, "{}", line).context("Failed to write ledger entry");

    file.unlock().context("Failed to release inbox ledger lock")?;
    written
}
