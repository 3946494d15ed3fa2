//! Loopback connector for dry runs and local testing of workflows.

use async_trait::async_trait;
use serde_json::Value;

use super::{Integration, IntegrationError, Params};

/// Connector that answers locally without any external call
///
/// - `echo` returns its parameters unchanged
/// - `fail` fails with the `message` parameter
#[derive(Debug, Default)]
pub struct EchoIntegration;

impl EchoIntegration {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Integration for EchoIntegration {
    fn kind(&self) -> &str {
        "echo"
    }

    async fn execute(&self, action: &str, params: &Params) -> Result<Value, IntegrationError> {
        match action {
            "echo" => Ok(Value::Object(params.clone())),
            "fail" => {
                let message = params
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("requested failure");
                Err(IntegrationError::Remote {
                    status: 500,
                    message: message.to_string(),
                })
            }
            other => Err(IntegrationError::ActionNotSupported(other.to_string())),
        }
    }

    async fn test_connection(&self) -> Result<(), IntegrationError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_echo_returns_params() {
        let params = json!({"customer": "acme"});
        let output = EchoIntegration::new()
            .execute("echo", params.as_object().unwrap())
            .await
            .unwrap();
        assert_eq!(output, params);
    }

    #[tokio::test]
    async fn test_fail_action() {
        let result = EchoIntegration::new().execute("fail", &Params::new()).await;
        assert!(matches!(result, Err(IntegrationError::Remote { status: 500, .. })));
    }
}
