//! Shared HTTP transport for REST-style connectors.
//!
//! Maps HTTP outcomes onto [`IntegrationError`]: 401/403 become `Auth`,
//! other non-success statuses become `Remote`, and connection failures
//! become `Transport`.

use reqwest::{Client, Method, Url};
use serde_json::Value;

use super::{IntegrationError, Params};

/// Longest remote error body kept in an error message
const MAX_ERROR_BODY: usize = 512;

/// JSON-over-HTTP client bound to a base URL
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: Url,
    bearer_token: Option<String>,
    headers: Vec<(String, String)>,
}

impl HttpTransport {
    /// Create a transport for a base URL
    pub fn new(base_url: &str) -> Result<Self, IntegrationError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| IntegrationError::Config(format!("invalid base URL '{}': {}", base_url, e)))?;

        Ok(Self {
            client: Client::new(),
            base_url,
            bearer_token: None,
            headers: Vec::new(),
        })
    }

    /// Authenticate requests with a bearer token
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    /// Add a static header sent with every request
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Build the absolute URL for a path relative to the base URL
    pub fn url_for(&self, path: &str) -> Result<Url, IntegrationError> {
        let joined = format!(
            "{}/{}",
            self.base_url.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        Url::parse(&joined)
            .map_err(|e| IntegrationError::InvalidParams(format!("invalid path '{}': {}", path, e)))
    }

    /// Send a request and decode the response body
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        query: Option<&Params>,
        body: Option<&Value>,
    ) -> Result<Value, IntegrationError> {
        let url = self.url_for(path)?;
        self.send_to(method, url, query, body).await
    }

    /// Send a request to an absolute URL
    pub async fn send_to(
        &self,
        method: Method,
        url: Url,
        query: Option<&Params>,
        body: Option<&Value>,
    ) -> Result<Value, IntegrationError> {
        let mut request = self.client.request(method.clone(), url.clone());

        if let Some(ref token) = self.bearer_token {
            request = request.bearer_auth(token);
        }
        for (name, value) in &self.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(query) = query {
            let pairs: Vec<(String, String)> = query
                .iter()
                .map(|(k, v)| (k.clone(), query_value(v)))
                .collect();
            request = request.query(&pairs);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        tracing::debug!(%method, %url, "Sending integration request");

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(IntegrationError::Auth(format!("{} {}", status, truncate(&text))));
        }
        if !status.is_success() {
            return Err(IntegrationError::Remote {
                status: status.as_u16(),
                message: truncate(&text),
            });
        }

        Ok(decode_body(&text))
    }
}

/// Decode a response body as JSON, falling back to a string
pub(crate) fn decode_body(text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

fn query_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn truncate(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.len() <= MAX_ERROR_BODY {
        return trimmed.to_string();
    }
    let mut end = MAX_ERROR_BODY;
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &trimmed[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_url_joining() {
        let transport = HttpTransport::new("https://api.example.com/v1/").unwrap();
        assert_eq!(
            transport.url_for("/contacts").unwrap().as_str(),
            "https://api.example.com/v1/contacts"
        );

        let transport = HttpTransport::new("https://api.example.com").unwrap();
        assert_eq!(
            transport.url_for("health").unwrap().as_str(),
            "https://api.example.com/health"
        );
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(matches!(
            HttpTransport::new("not a url"),
            Err(IntegrationError::Config(_))
        ));
    }

    #[test]
    fn test_decode_body() {
        assert_eq!(decode_body(""), Value::Null);
        assert_eq!(decode_body(r#"{"id": 7}"#), json!({"id": 7}));
        assert_eq!(decode_body("ok"), json!("ok"));
    }

    #[test]
    fn test_truncate_long_body() {
        let body = "x".repeat(2000);
        let truncated = truncate(&body);
        assert!(truncated.ends_with("..."));
        assert_eq!(truncated.len(), MAX_ERROR_BODY + 3);
    }
}
