//! Integration connectors for external systems.
//!
//! Every connector implements the one [`Integration`] contract: execute a
//! named action with JSON parameters and return a JSON result. The
//! orchestrator never special-cases a particular connector.

pub mod chat;
pub mod crm;
pub mod echo;
pub mod http;
pub mod rest;
pub mod warehouse;

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub use chat::{ChatIntegration, ChatPlatform};
pub use crm::CrmIntegration;
pub use echo::EchoIntegration;
pub use rest::RestIntegration;
pub use warehouse::WarehouseIntegration;

/// Parameters passed to an action
pub type Params = Map<String, Value>;

/// Failures reported by a connector
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IntegrationError {
    #[error("action '{0}' is not supported")]
    ActionNotSupported(String),

    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("remote error ({status}): {message}")]
    Remote { status: u16, message: String },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl From<reqwest::Error> for IntegrationError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

/// Uniform capability exposed by every external system connector
#[async_trait]
pub trait Integration: Send + Sync {
    /// Connector kind (e.g. "slack", "crm")
    fn kind(&self) -> &str;

    /// Execute a named action
    async fn execute(&self, action: &str, params: &Params) -> Result<Value, IntegrationError>;

    /// Check connectivity to the external system
    async fn test_connection(&self) -> Result<(), IntegrationError>;
}

/// Declaration of one integration in the configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrationConfig {
    /// Registry name (unique per process)
    pub name: String,

    /// Connector kind: slack, teams, crm, warehouse, rest, echo
    pub kind: String,

    /// Connector-specific options
    #[serde(default)]
    pub options: Map<String, Value>,
}

/// Construct a connector from its configuration, validating options
pub fn build_integration(config: &IntegrationConfig) -> Result<Arc<dyn Integration>, IntegrationError> {
    let integration: Arc<dyn Integration> = match config.kind.as_str() {
        "slack" => Arc::new(ChatIntegration::slack(parse_options(config)?)?),
        "teams" => Arc::new(ChatIntegration::teams(parse_options(config)?)?),
        "crm" => Arc::new(CrmIntegration::new(parse_options(config)?)?),
        "warehouse" => Arc::new(WarehouseIntegration::new(parse_options(config)?)?),
        "rest" => Arc::new(RestIntegration::new(parse_options(config)?)?),
        "echo" => Arc::new(EchoIntegration::new()),
        other => {
            return Err(IntegrationError::Config(format!(
                "integration '{}' has unknown kind '{}'",
                config.name, other
            )))
        }
    };
    Ok(integration)
}

fn parse_options<T: DeserializeOwned>(config: &IntegrationConfig) -> Result<T, IntegrationError> {
    serde_json::from_value(Value::Object(config.options.clone())).map_err(|e| {
        IntegrationError::Config(format!("integration '{}': {}", config.name, e))
    })
}

/// Read a secret from the environment variable named by an option
pub(crate) fn secret_from_env(var: &str) -> Result<String, IntegrationError> {
    std::env::var(var)
        .map_err(|_| IntegrationError::Config(format!("environment variable {} is not set", var)))
}

/// Fetch a required string parameter
pub(crate) fn required_str<'a>(params: &'a Params, key: &str) -> Result<&'a str, IntegrationError> {
    params
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| IntegrationError::InvalidParams(format!("missing string parameter '{}'", key)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config(kind: &str, options: Value) -> IntegrationConfig {
        IntegrationConfig {
            name: "test".to_string(),
            kind: kind.to_string(),
            options: options.as_object().cloned().unwrap_or_default(),
        }
    }

    #[test]
    fn test_build_echo() {
        let integration = build_integration(&config("echo", json!({}))).unwrap();
        assert_eq!(integration.kind(), "echo");
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let result = build_integration(&config("fax", json!({})));
        assert!(matches!(result, Err(IntegrationError::Config(_))));
    }

    #[test]
    fn test_missing_options_rejected() {
        // rest requires base_url
        let result = build_integration(&config("rest", json!({})));
        assert!(matches!(result, Err(IntegrationError::Config(_))));
    }

    #[test]
    fn test_required_str() {
        let params = json!({"channel": "#ops", "count": 3});
        let params = params.as_object().unwrap();

        assert_eq!(required_str(params, "channel").unwrap(), "#ops");
        assert!(required_str(params, "count").is_err());
        assert!(required_str(params, "missing").is_err());
    }
}
