//! Shared test fixtures.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bizflow::adapters::Params;
use bizflow::core::IntegrationRegistry;
use bizflow::{Integration, IntegrationError};
use serde_json::{json, Value};

/// One recorded call
#[derive(Debug, Clone)]
pub struct Call {
    pub action: String,
    pub params: Params,
    pub at: Instant,
}

#[derive(Debug, Clone, Default)]
struct Script {
    /// Calls that fail before the action starts succeeding
    failures_left: u32,
    always_fail: bool,
    delay: Duration,
    output: Option<Value>,
}

/// Integration whose behavior is scripted per action
#[derive(Default)]
pub struct ScriptedIntegration {
    scripts: Mutex<HashMap<String, Script>>,
    calls: Mutex<Vec<Call>>,
    healthy: bool,
    health_delay: Duration,
}

impl ScriptedIntegration {
    pub fn new() -> Self {
        Self {
            healthy: true,
            ..Default::default()
        }
    }

    pub fn unhealthy() -> Self {
        Self::default()
    }

    /// Delay every connectivity check
    pub fn slow_health(mut self, delay: Duration) -> Self {
        self.health_delay = delay;
        self
    }

    fn script(self, action: &str, f: impl FnOnce(&mut Script)) -> Self {
        f(self
            .scripts
            .lock()
            .unwrap()
            .entry(action.to_string())
            .or_default());
        self
    }

    /// Fail the first `n` calls of an action
    pub fn fail_times(self, action: &str, n: u32) -> Self {
        self.script(action, |s| s.failures_left = n)
    }

    pub fn fail_always(self, action: &str) -> Self {
        self.script(action, |s| s.always_fail = true)
    }

    pub fn delay(self, action: &str, delay: Duration) -> Self {
        self.script(action, |s| s.delay = delay)
    }

    /// Return a fixed output instead of echoing the params
    pub fn respond(self, action: &str, output: Value) -> Self {
        self.script(action, |s| s.output = Some(output))
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, action: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.action == action)
            .count()
    }
}

#[async_trait]
impl Integration for ScriptedIntegration {
    fn kind(&self) -> &str {
        "scripted"
    }

    async fn execute(&self, action: &str, params: &Params) -> Result<Value, IntegrationError> {
        self.calls.lock().unwrap().push(Call {
            action: action.to_string(),
            params: params.clone(),
            at: Instant::now(),
        });

        let (delay, fail, output) = {
            let mut scripts = self.scripts.lock().unwrap();
            let script = scripts.entry(action.to_string()).or_default();
            let fail = if script.always_fail {
                true
            } else if script.failures_left > 0 {
                script.failures_left -= 1;
                true
            } else {
                false
            };
            (script.delay, fail, script.output.clone())
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if fail {
            return Err(IntegrationError::Remote {
                status: 503,
                message: format!("{} unavailable", action),
            });
        }

        Ok(output.unwrap_or_else(|| json!({ "action": action, "params": params })))
    }

    async fn test_connection(&self) -> Result<(), IntegrationError> {
        tokio::time::sleep(self.health_delay).await;
        if self.healthy {
            Ok(())
        } else {
            Err(IntegrationError::Transport("connection refused".to_string()))
        }
    }
}

/// Registry holding one scripted integration under `name`
pub fn registry_with(name: &str, integration: Arc<ScriptedIntegration>) -> Arc<IntegrationRegistry> {
    let mut registry = IntegrationRegistry::new();
    registry.register(name, integration).unwrap();
    Arc::new(registry)
}
