//! Data warehouse connector for a Snowflake-style SQL REST API.
//!
//! Statements are caller-supplied; results come back as column-named rows.

use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::http::HttpTransport;
use super::{required_str, secret_from_env, Integration, IntegrationError, Params};

const STATEMENTS_PATH: &str = "/api/v2/statements";

/// Options for a warehouse connector
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WarehouseOptions {
    /// Account URL, e.g. https://<account>.snowflakecomputing.com
    pub account_url: String,

    /// Environment variable holding the OAuth or key-pair JWT token
    pub token_env: String,

    /// Token type header value
    #[serde(default = "default_token_type")]
    pub token_type: String,

    pub warehouse: String,
    pub database: String,

    #[serde(default = "default_schema")]
    pub schema: String,

    #[serde(default)]
    pub role: Option<String>,

    /// Server-side statement timeout
    #[serde(default = "default_statement_timeout")]
    pub statement_timeout_secs: u64,
}

fn default_token_type() -> String {
    "OAUTH".to_string()
}

fn default_schema() -> String {
    "PUBLIC".to_string()
}

fn default_statement_timeout() -> u64 {
    60
}

/// Connector for SQL statements against a data warehouse
pub struct WarehouseIntegration {
    transport: HttpTransport,
    options: WarehouseOptions,
}

impl WarehouseIntegration {
    pub fn new(options: WarehouseOptions) -> Result<Self, IntegrationError> {
        let token = secret_from_env(&options.token_env)?;
        Self::with_token(options, token)
    }

    pub fn with_token(options: WarehouseOptions, token: impl Into<String>) -> Result<Self, IntegrationError> {
        let transport = HttpTransport::new(&options.account_url)?
            .with_bearer_token(token)
            .with_header("X-Snowflake-Authorization-Token-Type", options.token_type.clone())
            .with_header("Accept", "application/json");
        Ok(Self { transport, options })
    }

    /// Build the statement request body
    fn statement_body(&self, statement: &str, params: &Params) -> Value {
        let mut body = json!({
            "statement": statement,
            "timeout": self.options.statement_timeout_secs,
            "warehouse": self.options.warehouse,
            "database": params.get("database").cloned().unwrap_or(json!(self.options.database)),
            "schema": params.get("schema").cloned().unwrap_or(json!(self.options.schema)),
        });
        if let Some(ref role) = self.options.role {
            body["role"] = json!(role);
        }
        if let Some(bindings) = params.get("bindings") {
            body["bindings"] = bindings.clone();
        }
        body
    }

    async fn run_statement(&self, statement: &str, params: &Params) -> Result<Value, IntegrationError> {
        let body = self.statement_body(statement, params);
        let response = self
            .transport
            .send(Method::POST, STATEMENTS_PATH, None, Some(&body))
            .await?;
        Ok(rows_from_response(&response))
    }
}

/// Convert a statement response into `{columns, rows, row_count}`
///
/// Responses without a `data` array (statement still running) are returned
/// as `{statement_handle, status: "running"}`.
pub(crate) fn rows_from_response(response: &Value) -> Value {
    let handle = response.get("statementHandle").cloned().unwrap_or(Value::Null);

    let Some(data) = response.get("data").and_then(Value::as_array) else {
        return json!({ "statement_handle": handle, "status": "running" });
    };

    let columns: Vec<String> = response
        .pointer("/resultSetMetaData/rowType")
        .and_then(Value::as_array)
        .map(|cols| {
            cols.iter()
                .filter_map(|c| c.get("name").and_then(Value::as_str))
                .map(|s| s.to_string())
                .collect()
        })
        .unwrap_or_default();

    let rows: Vec<Value> = data
        .iter()
        .filter_map(Value::as_array)
        .map(|cells| {
            let mut row = Map::new();
            for (idx, cell) in cells.iter().enumerate() {
                let key = columns
                    .get(idx)
                    .cloned()
                    .unwrap_or_else(|| format!("col{}", idx));
                row.insert(key, cell.clone());
            }
            Value::Object(row)
        })
        .collect();

    json!({
        "statement_handle": handle,
        "columns": columns,
        "row_count": rows.len(),
        "rows": rows,
    })
}

#[async_trait]
impl Integration for WarehouseIntegration {
    fn kind(&self) -> &str {
        "warehouse"
    }

    async fn execute(&self, action: &str, params: &Params) -> Result<Value, IntegrationError> {
        match action {
            "query" => {
                let statement = required_str(params, "statement")?;
                self.run_statement(statement, params).await
            }
            "list_tables" => {
                let statement = match params.get("schema").and_then(Value::as_str) {
                    Some(schema) => format!("SHOW TABLES IN SCHEMA {}", schema),
                    None => "SHOW TABLES".to_string(),
                };
                self.run_statement(&statement, params).await
            }
            other => Err(IntegrationError::ActionNotSupported(other.to_string())),
        }
    }

    async fn test_connection(&self) -> Result<(), IntegrationError> {
        self.run_statement("SELECT 1", &Params::new()).await.map(|_| ())
    }
}
