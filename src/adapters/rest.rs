//! Generic REST connector.
//!
//! Actions are declared in configuration as `{method, path}` routes. Path
//! segments of the form `{name}` are filled from the `path_params`
//! parameter; `query` and `body` are passed through.
//!
//! ```yaml
//! integrations:
//!   - name: shop
//!     kind: rest
//!     options:
//!       base_url: https://shop.example.com/admin/api
//!       token_env: SHOP_TOKEN
//!       actions:
//!         get_order: { method: GET, path: /orders/{id}.json }
//!         create_refund: { method: POST, path: /orders/{id}/refunds.json }
//! ```

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use reqwest::{Method, Url};
use serde::Deserialize;
use serde_json::Value;

use super::http::HttpTransport;
use super::{secret_from_env, Integration, IntegrationError, Params};

/// Options for a REST connector
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RestOptions {
    pub base_url: String,

    #[serde(default)]
    pub token_env: Option<String>,

    #[serde(default)]
    pub headers: HashMap<String, String>,

    #[serde(default)]
    pub actions: BTreeMap<String, RouteConfig>,

    #[serde(default = "default_health_path")]
    pub health_path: String,
}

fn default_health_path() -> String {
    "/".to_string()
}

/// One declared action
#[derive(Debug, Clone, Deserialize)]
pub struct RouteConfig {
    pub method: String,
    pub path: String,
}

#[derive(Debug, Clone)]
struct Route {
    method: Method,
    path: String,
}

/// Connector for an arbitrary JSON REST API
pub struct RestIntegration {
    transport: HttpTransport,
    routes: BTreeMap<String, Route>,
    health_path: String,
}

impl RestIntegration {
    pub fn new(options: RestOptions) -> Result<Self, IntegrationError> {
        let mut transport = HttpTransport::new(&options.base_url)?;
        if let Some(ref var) = options.token_env {
            transport = transport.with_bearer_token(secret_from_env(var)?);
        }
        for (name, value) in &options.headers {
            transport = transport.with_header(name.clone(), value.clone());
        }

        let mut routes = BTreeMap::new();
        for (action, route) in options.actions {
            let method = Method::from_bytes(route.method.to_uppercase().as_bytes()).map_err(|_| {
                IntegrationError::Config(format!(
                    "action '{}' has invalid method '{}'",
                    action, route.method
                ))
            })?;
            routes.insert(
                action,
                Route {
                    method,
                    path: route.path,
                },
            );
        }

        Ok(Self {
            transport,
            routes,
            health_path: options.health_path,
        })
    }

    /// Names of the declared actions
    pub fn actions(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(String::as_str)
    }

    /// Fill `{name}` path segments and build the request URL
    fn route_url(&self, path: &str, params: &Params) -> Result<Url, IntegrationError> {
        let path_params = params.get("path_params").and_then(Value::as_object);
        let mut url = self.transport.url_for("")?;

        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| IntegrationError::Config("base URL cannot carry a path".to_string()))?;
            segments.pop_if_empty();

            for segment in path.split('/').filter(|s| !s.is_empty()) {
                segments.push(&fill_segment(segment, path_params)?);
            }
        }

        Ok(url)
    }
}

/// Substitute `{name}` placeholders within one path segment
fn fill_segment(segment: &str, path_params: Option<&Params>) -> Result<String, IntegrationError> {
    let mut out = String::new();
    let mut rest = segment;

    while let Some(start) = rest.find('{') {
        let Some(len) = rest[start..].find('}') else {
            break;
        };
        let key = &rest[start + 1..start + len];
        let value = path_params
            .and_then(|p| p.get(key))
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .ok_or_else(|| IntegrationError::InvalidParams(format!("missing path parameter '{}'", key)))?;

        out.push_str(&rest[..start]);
        out.push_str(&value);
        rest = &rest[start + len + 1..];
    }

    out.push_str(rest);
    Ok(out)
}

#[async_trait]
impl Integration for RestIntegration {
    fn kind(&self) -> &str {
        "rest"
    }

    async fn execute(&self, action: &str, params: &Params) -> Result<Value, IntegrationError> {
        let route = self
            .routes
            .get(action)
            .ok_or_else(|| IntegrationError::ActionNotSupported(action.to_string()))?;

        let url = self.route_url(&route.path, params)?;
        let query = params.get("query").and_then(Value::as_object);
        let body = params.get("body");

        self.transport
            .send_to(route.method.clone(), url, query, body)
            .await
    }

    async fn test_connection(&self) -> Result<(), IntegrationError> {
        self.transport
            .send(Method::GET, &self.health_path, None, None)
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rest() -> RestIntegration {
        let options: RestOptions = serde_json::from_value(json!({
            "base_url": "https://shop.example.com/admin/api",
            "actions": {
                "get_order": { "method": "get", "path": "/orders/{id}.json" },
                "ping": { "method": "GET", "path": "/ping" },
            }
        }))
        .unwrap();
        RestIntegration::new(options).unwrap()
    }

    #[test]
    fn test_route_url_substitution() {
        let params = json!({ "path_params": { "id": 1042 } });
        let url = rest()
            .route_url("/orders/{id}.json", params.as_object().unwrap())
            .unwrap();
        assert_eq!(url.as_str(), "https://shop.example.com/admin/api/orders/1042.json");
    }

    #[test]
    fn test_missing_path_param() {
        let result = rest().route_url("/orders/{id}.json", &Params::new());
        assert!(matches!(result, Err(IntegrationError::InvalidParams(_))));
    }

    #[test]
    fn test_invalid_method_rejected() {
        let options: RestOptions = serde_json::from_value(json!({
            "base_url": "https://example.com",
            "actions": { "bad": { "method": "GE T", "path": "/" } }
        }))
        .unwrap();
        assert!(RestIntegration::new(options).is_err());
    }

    #[test]
    fn test_declared_actions() {
        let rest = rest();
        let actions: Vec<&str> = rest.actions().collect();
        assert_eq!(actions, vec!["get_order", "ping"]);
    }

    #[tokio::test]
    async fn test_undeclared_action() {
        let result = rest().execute("delete_everything", &Params::new()).await;
        assert!(matches!(result, Err(IntegrationError::ActionNotSupported(_))));
    }
}
