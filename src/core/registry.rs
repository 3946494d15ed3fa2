//! Integration registry.
//!
//! Holds the named connectors for one process. Integrations are registered
//! once at startup; afterwards the registry is shared read-only (behind an
//! `Arc`) by every workflow run.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::adapters::{build_integration, Integration, IntegrationConfig, IntegrationError, Params};
use crate::error::{Error, NameKind, Result};

/// Default bound on a single connectivity check
const DEFAULT_HEALTH_TIMEOUT: Duration = Duration::from_secs(10);

/// Last known connectivity of an integration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Connectivity {
    Unknown,
    Healthy,
    Unhealthy,
}

/// Named connectors available to workflows
pub struct IntegrationRegistry {
    integrations: BTreeMap<String, Arc<dyn Integration>>,
    connectivity: RwLock<HashMap<String, Connectivity>>,
    health_timeout: Duration,
}

impl Default for IntegrationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl IntegrationRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            integrations: BTreeMap::new(),
            connectivity: RwLock::new(HashMap::new()),
            health_timeout: DEFAULT_HEALTH_TIMEOUT,
        }
    }

    /// Override the per-integration health check timeout
    pub fn with_health_timeout(mut self, timeout: Duration) -> Self {
        self.health_timeout = timeout;
        self
    }

    /// Build and register every configured integration
    pub fn from_configs(configs: &[IntegrationConfig]) -> Result<Self> {
        let mut registry = Self::new();
        for config in configs {
            let integration = build_integration(config).map_err(|e| Error::Config(e.to_string()))?;
            registry.register(config.name.clone(), integration)?;
        }
        Ok(registry)
    }

    /// Bind a name to an integration
    pub fn register(&mut self, name: impl Into<String>, integration: Arc<dyn Integration>) -> Result<()> {
        let name = name.into();
        if self.integrations.contains_key(&name) {
            return Err(Error::duplicate(NameKind::Integration, name));
        }

        info!(integration = %name, kind = integration.kind(), "Registered integration");
        self.write_connectivity(&name, Connectivity::Unknown);
        self.integrations.insert(name, integration);
        Ok(())
    }

    /// Get the integration bound to a name
    pub fn get(&self, name: &str) -> Result<Arc<dyn Integration>> {
        self.integrations
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found(NameKind::Integration, name))
    }

    /// Registered names in sorted order
    pub fn names(&self) -> Vec<String> {
        self.integrations.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.integrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.integrations.is_empty()
    }

    /// Last known connectivity of an integration
    pub fn connectivity(&self, name: &str) -> Option<Connectivity> {
        self.connectivity
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .copied()
    }

    /// Check every integration's connectivity
    ///
    /// Never fails: errors, panics and timeouts of individual checks are
    /// reported as `false`.
    pub async fn health_check_all(&self) -> BTreeMap<String, bool> {
        let mut checks = JoinSet::new();

        for (name, integration) in &self.integrations {
            let name = name.clone();
            let integration = Arc::clone(integration);
            let timeout = self.health_timeout;

            checks.spawn(async move {
                let healthy = match tokio::time::timeout(timeout, integration.test_connection()).await {
                    Ok(Ok(())) => true,
                    Ok(Err(e)) => {
                        warn!(integration = %name, error = %e, "Health check failed");
                        false
                    }
                    Err(_) => {
                        warn!(
                            integration = %name,
                            timeout_ms = timeout.as_millis() as u64,
                            "Health check timed out"
                        );
                        false
                    }
                };
                (name, healthy)
            });
        }

        let mut results: BTreeMap<String, bool> =
            self.integrations.keys().map(|n| (n.clone(), false)).collect();

        while let Some(joined) = checks.join_next().await {
            match joined {
                Ok((name, healthy)) => {
                    results.insert(name, healthy);
                }
                Err(e) => warn!(error = %e, "Health check task panicked"),
            }
        }

        for (name, healthy) in &results {
            let state = if *healthy {
                Connectivity::Healthy
            } else {
                Connectivity::Unhealthy
            };
            self.write_connectivity(name, state);
        }

        results
    }

    /// Execute an action on a named integration
    pub async fn execute(&self, name: &str, action: &str, params: &Params) -> Result<Value> {
        let integration = self.get(name)?;

        debug!(integration = %name, action, "Executing integration action");

        integration
            .execute(action, params)
            .await
            .map_err(|e| match e {
                IntegrationError::ActionNotSupported(action) => Error::ActionNotSupported {
                    integration: name.to_string(),
                    action,
                },
                source => Error::Integration {
                    integration: name.to_string(),
                    source,
                },
            })
    }

    fn write_connectivity(&self, name: &str, state: Connectivity) {
        self.connectivity
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.to_string(), state);
    }
}
