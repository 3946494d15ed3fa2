//! CRM connector speaking a HubSpot-style object API.

use async_trait::async_trait;
use reqwest::{Method, Url};
use serde::Deserialize;
use serde_json::{json, Value};

use super::http::HttpTransport;
use super::{required_str, secret_from_env, Integration, IntegrationError, Params};

const CONTACTS_PATH: &str = "/crm/v3/objects/contacts";
const DEALS_PATH: &str = "/crm/v3/objects/deals";

/// Options for a CRM connector
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CrmOptions {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Environment variable holding the private app token
    pub token_env: String,

    /// Path probed by the health check
    #[serde(default = "default_health_path")]
    pub health_path: String,
}

fn default_base_url() -> String {
    "https://api.hubapi.com".to_string()
}

fn default_health_path() -> String {
    format!("{}?limit=1", CONTACTS_PATH)
}

/// Connector for CRM contacts and deals
pub struct CrmIntegration {
    transport: HttpTransport,
    health_path: String,
}

impl CrmIntegration {
    pub fn new(options: CrmOptions) -> Result<Self, IntegrationError> {
        let token = secret_from_env(&options.token_env)?;
        Self::with_token(&options.base_url, token, options.health_path)
    }

    pub fn with_token(
        base_url: &str,
        token: impl Into<String>,
        health_path: impl Into<String>,
    ) -> Result<Self, IntegrationError> {
        Ok(Self {
            transport: HttpTransport::new(base_url)?.with_bearer_token(token),
            health_path: health_path.into(),
        })
    }

    /// URL of a single object, with the id percent-encoded as one segment
    fn object_url(&self, collection: &str, id: &str) -> Result<Url, IntegrationError> {
        if id.is_empty() {
            return Err(IntegrationError::InvalidParams("'id' must not be empty".to_string()));
        }
        let mut url = self.transport.url_for(collection)?;
        url.path_segments_mut()
            .map_err(|_| IntegrationError::Config("base URL cannot carry a path".to_string()))?
            .push(id);
        Ok(url)
    }

    fn properties(params: &Params) -> Result<Value, IntegrationError> {
        match params.get("properties") {
            Some(Value::Object(props)) => Ok(Value::Object(props.clone())),
            Some(_) => Err(IntegrationError::InvalidParams(
                "'properties' must be an object".to_string(),
            )),
            None => Err(IntegrationError::InvalidParams(
                "missing 'properties'".to_string(),
            )),
        }
    }
}

#[async_trait]
impl Integration for CrmIntegration {
    fn kind(&self) -> &str {
        "crm"
    }

    async fn execute(&self, action: &str, params: &Params) -> Result<Value, IntegrationError> {
        match action {
            "create_contact" => {
                let body = json!({ "properties": Self::properties(params)? });
                self.transport
                    .send(Method::POST, CONTACTS_PATH, None, Some(&body))
                    .await
            }
            "get_contact" => {
                let url = self.object_url(CONTACTS_PATH, required_str(params, "id")?)?;
                let query = params
                    .get("properties")
                    .and_then(Value::as_array)
                    .map(|props| {
                        let joined = props
                            .iter()
                            .filter_map(Value::as_str)
                            .collect::<Vec<_>>()
                            .join(",");
                        let mut query = Params::new();
                        query.insert("properties".to_string(), json!(joined));
                        query
                    });
                self.transport
                    .send_to(Method::GET, url, query.as_ref(), None)
                    .await
            }
            "update_contact" => {
                let url = self.object_url(CONTACTS_PATH, required_str(params, "id")?)?;
                let body = json!({ "properties": Self::properties(params)? });
                self.transport
                    .send_to(Method::PATCH, url, None, Some(&body))
                    .await
            }
            "create_deal" => {
                let mut body = json!({ "properties": Self::properties(params)? });
                if let Some(associations) = params.get("associations") {
                    body["associations"] = associations.clone();
                }
                self.transport
                    .send(Method::POST, DEALS_PATH, None, Some(&body))
                    .await
            }
            "search_contacts" => {
                let mut body = json!({
                    "limit": params.get("limit").cloned().unwrap_or(json!(10)),
                });
                if let Some(query) = params.get("query") {
                    body["query"] = query.clone();
                }
                if let Some(filters) = params.get("filter_groups") {
                    body["filterGroups"] = filters.clone();
                }
                let path = format!("{}/search", CONTACTS_PATH);
                self.transport
                    .send(Method::POST, &path, None, Some(&body))
                    .await
            }
            other => Err(IntegrationError::ActionNotSupported(other.to_string())),
        }
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

    fn crm() -> CrmIntegration {
        CrmIntegration::with_token("https://api.example.com", "pat-test", default_health_path()).unwrap()
    }

    #[test]
    fn test_object_url_encodes_id() {
        let url = crm().object_url(CONTACTS_PATH, "a b/c").unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.example.com/crm/v3/objects/contacts/a%20b%2Fc"
        );
    }

    #[test]
    fn test_empty_id_rejected() {
        assert!(crm().object_url(CONTACTS_PATH, "").is_err());
    }

    #[tokio::test]
    async fn test_properties_required() {
        let result = crm().execute("create_contact", &Params::new()).await;
        assert!(matches!(result, Err(IntegrationError::InvalidParams(_))));
    }
}
