//! Configuration for bizflow.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (BIZFLOW_HOME, BIZFLOW_WORKFLOWS)
//! 2. Config file (.bizflow/config.yaml)
//! 3. Defaults (~/.bizflow)
//!
//! Config file discovery:
//! - Searches current directory and parents for .bizflow/config.yaml
//! - `paths.home` is relative to the .bizflow/ directory; other paths are
//!   relative to the project root (the parent of .bizflow/)

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::adapters::IntegrationConfig;
use crate::core::TriggerBinding;
use crate::ingest::{InboxConfig, ScheduleConfig};

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub defaults: DefaultsConfig,
    #[serde(default)]
    pub integrations: Vec<IntegrationConfig>,
    #[serde(default)]
    pub triggers: Vec<TriggerBinding>,
    #[serde(default)]
    pub inbox: Option<InboxConfig>,
    #[serde(default)]
    pub schedules: Vec<ScheduleConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// Engine state directory (relative to .bizflow/)
    pub home: Option<String>,
    /// Workflow definitions directory (relative to project root)
    pub workflows: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DefaultsConfig {
    pub health_timeout_secs: Option<u64>,
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Engine state (run journals)
    pub home: PathBuf,
    /// Workflow definitions
    pub workflows: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    pub health_timeout: Duration,
    pub integrations: Vec<IntegrationConfig>,
    pub triggers: Vec<TriggerBinding>,
    /// Inbox watcher settings, with `dir` resolved
    pub inbox: Option<InboxConfig>,
    pub schedules: Vec<ScheduleConfig>,
}

impl ResolvedConfig {
    pub fn runs_dir(&self) -> PathBuf {
        self.home.join("runs")
    }
}

const DEFAULT_HEALTH_TIMEOUT_SECS: u64 = 10;

/// Find config file by searching a directory and its parents
fn find_config_file(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();

    loop {
        let config_path = current.join(".bizflow").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to a base directory
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Environment overrides
#[derive(Debug, Clone, Default)]
struct EnvOverrides {
    home: Option<PathBuf>,
    workflows: Option<PathBuf>,
}

impl EnvOverrides {
    fn from_env() -> Self {
        Self {
            home: std::env::var("BIZFLOW_HOME").ok().map(PathBuf::from),
            workflows: std::env::var("BIZFLOW_WORKFLOWS").ok().map(PathBuf::from),
        }
    }
}

/// Resolve configuration from an optional config file
fn resolve(config_file: Option<PathBuf>, env: EnvOverrides, default_home: PathBuf) -> Result<ResolvedConfig> {
    let config = match config_file {
        Some(ref path) => load_config_file(path)?,
        None => ConfigFile::default(),
    };

    // .bizflow/ and the project root containing it
    let (bizflow_dir, base_dir) = match config_file {
        Some(ref path) => {
            let bizflow_dir = path.parent().unwrap_or(Path::new(".")).to_path_buf();
            let base_dir = bizflow_dir.parent().unwrap_or(Path::new(".")).to_path_buf();
            (bizflow_dir, base_dir)
        }
        None => (PathBuf::from("."), PathBuf::from(".")),
    };

    let home = if let Some(home) = env.home {
        home
    } else if let Some(ref home_path) = config.paths.home {
        resolve_path(&bizflow_dir, home_path)
    } else {
        default_home
    };

    let workflows = if let Some(workflows) = env.workflows {
        workflows
    } else if let Some(ref workflows_path) = config.paths.workflows {
        resolve_path(&base_dir, workflows_path)
    } else {
        home.join("workflows")
    };

    let inbox = config.inbox.map(|mut inbox| {
        inbox.dir = resolve_path(&base_dir, &inbox.dir.to_string_lossy());
        inbox
    });

    Ok(ResolvedConfig {
        home,
        workflows,
        config_file,
        health_timeout: Duration::from_secs(
            config
                .defaults
                .health_timeout_secs
                .unwrap_or(DEFAULT_HEALTH_TIMEOUT_SECS),
        ),
        integrations: config.integrations,
        triggers: config.triggers,
        inbox,
        schedules: config.schedules,
    })
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(".bizflow");

    let config_file = std::env::current_dir()
        .ok()
        .and_then(|cwd| find_config_file(&cwd));

    resolve(config_file, EnvOverrides::from_env(), default_home)
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| format!("{:#}", e)));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Force reload configuration (bypasses the cache)
pub fn reload_config() -> Result<ResolvedConfig> {
    load_config()
}

/// Get the bizflow home directory (engine state).
pub fn bizflow_home() -> Result<PathBuf> {
    Ok(config()?.home.clone())
}

/// Get the runs directory ($BIZFLOW_HOME/runs)
pub fn runs_dir() -> Result<PathBuf> {
    Ok(config()?.runs_dir())
}

/// Get the workflow definitions directory
pub fn workflows_dir() -> Result<PathBuf> {
    Ok(config()?.workflows.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const CONFIG_YAML: &str = r#"
version: "1.0"
paths:
  home: ./state
  workflows: flows
defaults:
  health_timeout_secs: 3
integrations:
  - name: loopback
    kind: echo
  - name: crm
    kind: crm
    options:
      token_env: CRM_TOKEN
triggers:
  - event: customer_signed_up
    workflow: onboarding
inbox:
  dir: inbox
  stability_delay_ms: 250
schedules:
  - event: nightly_sync
    every_secs: 86400
"#;

    fn write_config(root: &Path) -> PathBuf {
        let bizflow_dir = root.join(".bizflow");
        std::fs::create_dir_all(&bizflow_dir).unwrap();
        let path = bizflow_dir.join("config.yaml");
        std::fs::write(&path, CONFIG_YAML).unwrap();
        path
    }

    #[test]
    fn test_defaults_without_file() {
        let config = resolve(None, EnvOverrides::default(), PathBuf::from("/home/u/.bizflow")).unwrap();

        assert_eq!(config.home, PathBuf::from("/home/u/.bizflow"));
        assert_eq!(config.workflows, PathBuf::from("/home/u/.bizflow/workflows"));
        assert_eq!(config.runs_dir(), PathBuf::from("/home/u/.bizflow/runs"));
        assert_eq!(config.health_timeout, Duration::from_secs(10));
        assert!(config.config_file.is_none());
        assert!(config.integrations.is_empty());
        assert!(config.inbox.is_none());
    }

    #[test]
    fn test_config_file_parsing() {
        let temp = TempDir::new().unwrap();
        let path = write_config(temp.path());

        let config = load_config_file(&path).unwrap();
        assert_eq!(config.version.as_deref(), Some("1.0"));
        assert_eq!(config.integrations.len(), 2);
        assert_eq!(config.integrations[1].kind, "crm");
        assert_eq!(config.triggers[0].workflow, "onboarding");
        assert_eq!(config.schedules[0].every_secs, Some(86400));
    }

    #[test]
    fn test_discovery_and_relative_paths() {
        let temp = TempDir::new().unwrap();
        let path = write_config(temp.path());
        let nested = temp.path().join("a/b");
        std::fs::create_dir_all(&nested).unwrap();

        let found = find_config_file(&nested).unwrap();
        assert_eq!(found, path);

        let config = resolve(Some(found), EnvOverrides::default(), PathBuf::from("/unused")).unwrap();
        assert!(config.home.ends_with("state"));
        assert!(config.home.starts_with(temp.path().join(".bizflow")));
        assert!(config.workflows.ends_with("flows"));
        assert_eq!(config.health_timeout, Duration::from_secs(3));
        assert!(config.inbox.unwrap().dir.ends_with("inbox"));
    }

    #[test]
    fn test_env_overrides_win() {
        let temp = TempDir::new().unwrap();
        let path = write_config(temp.path());

        let env = EnvOverrides {
            home: Some(PathBuf::from("/srv/bizflow")),
            workflows: Some(PathBuf::from("/srv/flows")),
        };
        let config = resolve(Some(path), env, PathBuf::from("/unused")).unwrap();

        assert_eq!(config.home, PathBuf::from("/srv/bizflow"));
        assert_eq!(config.workflows, PathBuf::from("/srv/flows"));
    }

    #[test]
    fn test_resolve_relative_path() {
        let base = PathBuf::from("/home/user/project");

        assert_eq!(
            resolve_path(&base, "./subdir"),
            PathBuf::from("/home/user/project/subdir")
        );
        assert_eq!(
            resolve_path(&base, "/absolute/path"),
            PathBuf::from("/absolute/path")
        );
    }
}
