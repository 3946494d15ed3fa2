//! Registry Integration Tests
//!
//! Registration, dispatch and connectivity checks.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use bizflow::adapters::EchoIntegration;
use bizflow::core::Connectivity;
use bizflow::error::NameKind;
use bizflow::{Error, IntegrationConfig, IntegrationRegistry};
use common::ScriptedIntegration;
use serde_json::{json, Map};
use tokio_test::{assert_err, assert_ok};

#[test]
fn test_duplicate_registration_fails() {
    let mut registry = IntegrationRegistry::new();
    assert_ok!(registry.register("slack", Arc::new(EchoIntegration::new())));

    let err = assert_err!(registry.register("slack", Arc::new(EchoIntegration::new())));
    assert!(matches!(
        err,
        Error::DuplicateName { kind: NameKind::Integration, ref name } if name == "slack"
    ));
    assert_eq!(registry.len(), 1);
}

#[tokio::test]
async fn test_execute_unregistered_name_fails() {
    let registry = IntegrationRegistry::new();
    let result = registry.execute("warehouse", "query", &Map::new()).await;

    assert!(matches!(
        result,
        Err(Error::NotFound { kind: NameKind::Integration, .. })
    ));
}

#[tokio::test]
async fn test_execute_dispatches_by_name() {
    let crm = Arc::new(ScriptedIntegration::new().respond("create_contact", json!({"id": 9})));
    let registry = common::registry_with("crm", crm.clone());

    let params = json!({"email": "ada@example.com"});
    let output = registry
        .execute("crm", "create_contact", params.as_object().unwrap())
        .await
        .unwrap();

    assert_eq!(output, json!({"id": 9}));
    assert_eq!(crm.calls()[0].params["email"], json!("ada@example.com"));
}

#[tokio::test]
async fn test_unsupported_action_is_reported() {
    let mut registry = IntegrationRegistry::new();
    registry.register("loopback", Arc::new(EchoIntegration::new())).unwrap();

    let result = registry.execute("loopback", "launch_rocket", &Map::new()).await;
    assert!(matches!(result, Err(Error::ActionNotSupported { ref action, .. }) if action == "launch_rocket"));
}

#[tokio::test]
async fn test_health_check_all_reports_each_integration() {
    let mut registry = IntegrationRegistry::new().with_health_timeout(Duration::from_millis(100));
    registry.register("crm", Arc::new(ScriptedIntegration::new())).unwrap();
    registry.register("teams", Arc::new(ScriptedIntegration::unhealthy())).unwrap();
    registry
        .register(
            "warehouse",
            Arc::new(ScriptedIntegration::new().slow_health(Duration::from_secs(5))),
        )
        .unwrap();

    assert_eq!(registry.connectivity("crm"), Some(Connectivity::Unknown));

    let started = Instant::now();
    let results = registry.health_check_all().await;

    // Checks run concurrently, each bounded by the timeout
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(results.len(), 3);
    assert!(results["crm"]);
    assert!(!results["teams"]);
    assert!(!results["warehouse"]);

    assert_eq!(registry.connectivity("crm"), Some(Connectivity::Healthy));
    assert_eq!(registry.connectivity("warehouse"), Some(Connectivity::Unhealthy));
    assert_eq!(registry.connectivity("missing"), None);
}

#[test]
fn test_from_configs() {
    let configs: Vec<IntegrationConfig> = serde_yaml::from_str(
        r#"
- name: loopback
  kind: echo
- name: internal_api
  kind: rest
  options:
    base_url: https://api.example.com
    actions:
      ping:
        method: GET
        path: /ping
"#,
    )
    .unwrap();

    let registry = IntegrationRegistry::from_configs(&configs).unwrap();
    assert_eq!(registry.names(), vec!["internal_api".to_string(), "loopback".to_string()]);
    assert_eq!(registry.get("internal_api").unwrap().kind(), "rest");
}
