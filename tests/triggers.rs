//! Trigger Integration Tests
//!
//! Events published on the bus start the workflows bound to them.

mod common;

use std::sync::Arc;
use std::time::Duration;

use bizflow::core::{bind_triggers, TriggerBinding};
use bizflow::ingest::{InboxConfig, InboxWatcher};
use bizflow::{Error, Event, EventBus, Orchestrator, RunOutcome, WorkflowStep};
use common::ScriptedIntegration;
use serde_json::json;
use tempfile::TempDir;
use tokio::sync::mpsc;

fn onboarding_engine(crm: Arc<ScriptedIntegration>) -> Arc<Orchestrator> {
    let orchestrator = Orchestrator::new(common::registry_with("crm", crm));
    orchestrator
        .define_workflow_from(
            "onboarding",
            vec![WorkflowStep::new("create_account", "crm", "create_contact").with_params(json!({
                "email": "{{ context.email }}",
                "origin": "{{ context.event.source }}",
            }))],
        )
        .unwrap();
    Arc::new(orchestrator)
}

fn binding(event: &str, workflow: &str) -> TriggerBinding {
    TriggerBinding {
        event: event.to_string(),
        workflow: workflow.to_string(),
    }
}

#[tokio::test]
async fn test_published_event_runs_bound_workflow() {
    let crm = Arc::new(ScriptedIntegration::new());
    let orchestrator = onboarding_engine(crm.clone());
    let bus = EventBus::new();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let ids = bind_triggers(
        &bus,
        &orchestrator,
        &[binding("customer_signed_up", "onboarding")],
        Some(tx),
    )
    .unwrap();
    assert_eq!(ids.len(), 1);

    let event = Event::new("customer_signed_up", "webform").with_field("email", json!("ada@example.com"));
    let report = bus.publish(&event);
    assert_eq!(report.delivered, 1);

    let run = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(run.workflow, "onboarding");
    assert_eq!(run.outcome, RunOutcome::Completed);
    assert_eq!(run.context["event"]["id"], json!(event.id));

    let params = &crm.calls()[0].params;
    assert_eq!(params["email"], json!("ada@example.com"));
    assert_eq!(params["origin"], json!("webform"));
}

#[tokio::test]
async fn test_unrelated_events_do_not_trigger() {
    let crm = Arc::new(ScriptedIntegration::new());
    let orchestrator = onboarding_engine(crm.clone());
    let bus = EventBus::new();

    bind_triggers(&bus, &orchestrator, &[binding("customer_signed_up", "onboarding")], None).unwrap();

    let report = bus.publish(&Event::new("deal_won", "crm"));
    assert_eq!(report.delivered, 0);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(crm.calls().is_empty());
}

#[tokio::test]
async fn test_binding_unknown_workflow_fails() {
    let orchestrator = onboarding_engine(Arc::new(ScriptedIntegration::new()));
    let bus = EventBus::new();

    let result = bind_triggers(
        &bus,
        &orchestrator,
        &[
            binding("customer_signed_up", "onboarding"),
            binding("deal_won", "celebrate"),
        ],
        None,
    );

    assert!(matches!(result, Err(Error::NotFound { .. })));
    assert_eq!(bus.subscriber_count("customer_signed_up"), 0);
}

#[tokio::test]
async fn test_inbox_file_triggers_workflow() {
    let temp = TempDir::new().unwrap();
    let crm = Arc::new(ScriptedIntegration::new());
    let orchestrator = onboarding_engine(crm.clone());
    let bus = Arc::new(EventBus::new());

    let (tx, mut rx) = mpsc::unbounded_channel();
    bind_triggers(&bus, &orchestrator, &[binding("customer_signed_up", "onboarding")], Some(tx)).unwrap();

    std::fs::write(
        temp.path().join("signup.json"),
        r#"{"type": "customer_signed_up", "source": "import", "data": {"email": "grace@example.com"}}"#,
    )
    .unwrap();

    let watcher = InboxWatcher::new(InboxConfig::new(temp.path()), Arc::clone(&bus));
    let scanned = watcher.scan_once().await.unwrap();
    assert_eq!(scanned.published, 1);

    let run = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(run.outcome, RunOutcome::Completed);
    assert_eq!(crm.calls()[0].params["email"], json!("grace@example.com"));
    assert_eq!(crm.calls()[0].params["origin"], json!("import"));
}
