//! Chat platform connector (Slack Web API, Microsoft Teams webhooks).
//!
//! Message formatting is owned by the caller: `text` and Slack `blocks`
//! are passed through unchanged.

use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::http::HttpTransport;
use super::{required_str, secret_from_env, Integration, IntegrationError, Params};

const SLACK_API_BASE: &str = "https://slack.com/api";

/// Slack error codes that indicate a credential problem
const SLACK_AUTH_ERRORS: &[&str] = &[
    "invalid_auth",
    "not_authed",
    "token_revoked",
    "token_expired",
    "account_inactive",
];

/// Supported chat platforms
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatPlatform {
    Slack,
    Teams,
}

/// Options for a Slack connector
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SlackOptions {
    /// Environment variable holding the bot token (xoxb-...)
    pub token_env: String,

    /// Web API base URL
    #[serde(default = "default_slack_base")]
    pub base_url: String,

    /// Channel used when `send_message` omits one
    #[serde(default)]
    pub default_channel: Option<String>,
}

fn default_slack_base() -> String {
    SLACK_API_BASE.to_string()
}

/// Options for a Teams connector
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TeamsOptions {
    /// Incoming webhook URL
    #[serde(default)]
    pub webhook_url: Option<String>,

    /// Environment variable holding the webhook URL
    #[serde(default)]
    pub webhook_url_env: Option<String>,
}

/// Connector for a chat platform
pub struct ChatIntegration {
    platform: ChatPlatform,
    transport: HttpTransport,
    default_channel: Option<String>,
}

impl ChatIntegration {
    /// Create a Slack connector, reading the bot token from the environment
    pub fn slack(options: SlackOptions) -> Result<Self, IntegrationError> {
        let token = secret_from_env(&options.token_env)?;
        Self::slack_with_token(&options.base_url, token, options.default_channel)
    }

    /// Create a Slack connector with an explicit token
    pub fn slack_with_token(
        base_url: &str,
        token: impl Into<String>,
        default_channel: Option<String>,
    ) -> Result<Self, IntegrationError> {
        let transport = HttpTransport::new(base_url)?.with_bearer_token(token);
        Ok(Self {
            platform: ChatPlatform::Slack,
            transport,
            default_channel,
        })
    }

    /// Create a Teams connector from webhook options
    pub fn teams(options: TeamsOptions) -> Result<Self, IntegrationError> {
        let webhook_url = match (options.webhook_url, options.webhook_url_env) {
            (Some(url), _) => url,
            (None, Some(var)) => secret_from_env(&var)?,
            (None, None) => {
                return Err(IntegrationError::Config(
                    "teams connector requires webhook_url or webhook_url_env".to_string(),
                ))
            }
        };
        Self::teams_with_webhook(&webhook_url)
    }

    /// Create a Teams connector for a webhook URL
    pub fn teams_with_webhook(webhook_url: &str) -> Result<Self, IntegrationError> {
        Ok(Self {
            platform: ChatPlatform::Teams,
            transport: HttpTransport::new(webhook_url)?,
            default_channel: None,
        })
    }

    pub fn platform(&self) -> ChatPlatform {
        self.platform
    }

    /// Call a Slack Web API method and check the `ok` flag
    async fn slack_call(&self, method: &str, body: Value) -> Result<Value, IntegrationError> {
        let response = self
            .transport
            .send(Method::POST, method, None, Some(&body))
            .await?;

        if response.get("ok").and_then(Value::as_bool) == Some(true) {
            return Ok(response);
        }

        let error = response
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("unknown_error")
            .to_string();

        if SLACK_AUTH_ERRORS.contains(&error.as_str()) {
            Err(IntegrationError::Auth(error))
        } else {
            Err(IntegrationError::Remote {
                status: 200,
                message: format!("{} failed: {}", method, error),
            })
        }
    }

    async fn execute_slack(&self, action: &str, params: &Params) -> Result<Value, IntegrationError> {
        match action {
            "send_message" => {
                let channel = match params.get("channel").and_then(Value::as_str) {
                    Some(channel) => channel.to_string(),
                    None => self.default_channel.clone().ok_or_else(|| {
                        IntegrationError::InvalidParams(
                            "missing 'channel' and no default_channel configured".to_string(),
                        )
                    })?,
                };
                let mut body = Map::new();
                body.insert("channel".to_string(), json!(channel));
                body.insert("text".to_string(), json!(required_str(params, "text")?));
                for key in ["blocks", "thread_ts", "unfurl_links"] {
                    if let Some(value) = params.get(key) {
                        body.insert(key.to_string(), value.clone());
                    }
                }
                let response = self.slack_call("chat.postMessage", Value::Object(body)).await?;
                Ok(json!({
                    "channel": response.get("channel").cloned().unwrap_or(Value::Null),
                    "ts": response.get("ts").cloned().unwrap_or(Value::Null),
                }))
            }
            "update_message" => {
                let body = json!({
                    "channel": required_str(params, "channel")?,
                    "ts": required_str(params, "ts")?,
                    "text": required_str(params, "text")?,
                });
                let response = self.slack_call("chat.update", body).await?;
                Ok(json!({ "ts": response.get("ts").cloned().unwrap_or(Value::Null) }))
            }
            "add_reaction" => {
                let body = json!({
                    "channel": required_str(params, "channel")?,
                    "timestamp": required_str(params, "timestamp")?,
                    "name": required_str(params, "name")?,
                });
                self.slack_call("reactions.add", body).await?;
                Ok(json!({ "added": true }))
            }
            other => Err(IntegrationError::ActionNotSupported(other.to_string())),
        }
    }

    async fn execute_teams(&self, action: &str, params: &Params) -> Result<Value, IntegrationError> {
        match action {
            "send_message" => {
                let text = required_str(params, "text")?;
                let title = params.get("title").and_then(Value::as_str);
                let card = json!({
                    "@type": "MessageCard",
                    "@context": "https://schema.org/extensions",
                    "summary": title.unwrap_or(text),
                    "title": title,
                    "text": text,
                });
                self.transport
                    .send_to(Method::POST, self.transport.base_url().clone(), None, Some(&card))
                    .await?;
                Ok(json!({ "delivered": true }))
            }
            other => Err(IntegrationError::ActionNotSupported(other.to_string())),
        }
    }
}

#[async_trait]
impl Integration for ChatIntegration {
    fn kind(&self) -> &str {
        match self.platform {
            ChatPlatform::Slack => "slack",
            ChatPlatform::Teams => "teams",
        }
    }

    async fn execute(&self, action: &str, params: &Params) -> Result<Value, IntegrationError> {
        match self.platform {
            ChatPlatform::Slack => self.execute_slack(action, params).await,
            ChatPlatform::Teams => self.execute_teams(action, params).await,
        }
    }

    async fn test_connection(&self) -> Result<(), IntegrationError> {
        match self.platform {
            ChatPlatform::Slack => self.slack_call("auth.test", json!({})).await.map(|_| ()),
            // Incoming webhooks have no side-effect-free probe
            ChatPlatform::Teams => {
                if self.transport.base_url().scheme() == "https" {
                    Ok(())
                } else {
                    Err(IntegrationError::Config(
                        "teams webhook URL must use https".to_string(),
                    ))
                }
            }
        }
    }
}
