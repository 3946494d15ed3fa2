//! Event-to-workflow triggers.
//!
//! A [`WorkflowTrigger`] subscribed on the [`EventBus`] starts a workflow
//! run for every event it receives. Runs execute on the Tokio runtime, so
//! publishing never waits for a workflow to finish.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::domain::{Event, WorkflowRun};
use crate::error::Result;

use super::bus::{EventBus, EventHandler, SubscriptionId};
use super::orchestrator::Orchestrator;

/// Binds an event type to the workflow it starts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerBinding {
    pub event: String,
    pub workflow: String,
}

/// Event handler that runs a workflow
pub struct WorkflowTrigger {
    orchestrator: Arc<Orchestrator>,
    workflow: String,
    runs: Option<mpsc::UnboundedSender<WorkflowRun>>,
}

impl WorkflowTrigger {
    pub fn new(orchestrator: Arc<Orchestrator>, workflow: impl Into<String>) -> Self {
        Self {
            orchestrator,
            workflow: workflow.into(),
            runs: None,
        }
    }

    /// Forward every finished run to a channel
    pub fn with_run_sink(mut self, sink: mpsc::UnboundedSender<WorkflowRun>) -> Self {
        self.runs = Some(sink);
        self
    }

    pub fn workflow(&self) -> &str {
        &self.workflow
    }
}

/// Build the initial run context for an event
///
/// Event data fields are placed at the top level; `event` carries the
/// envelope and wins over a data field of the same name.
pub fn event_context(event: &Event) -> Map<String, Value> {
    let mut context = event.data.clone();
    context.insert(
        "event".to_string(),
        json!({
            "id": event.id,
            "type": event.event_type,
            "source": event.source,
            "timestamp": event.timestamp,
        }),
    );
    context
}

impl EventHandler for WorkflowTrigger {
    fn handle(&self, event: &Event) -> anyhow::Result<()> {
        let runtime = Handle::try_current()
            .map_err(|e| anyhow::anyhow!("No Tokio runtime to run workflow '{}': {}", self.workflow, e))?;

        let orchestrator = Arc::clone(&self.orchestrator);
        let workflow = self.workflow.clone();
        let runs = self.runs.clone();
        let context = event_context(event);
        let event_id = event.id;

        info!(%event_id, event_type = %event.event_type, workflow = %workflow, "Triggering workflow");

        runtime.spawn(async move {
            match orchestrator.execute_workflow(&workflow, context).await {
                Ok(run) => {
                    info!(%event_id, run_id = %run.id, outcome = %run.outcome, "Triggered run finished");
                    if let Some(runs) = runs {
                        // Receiver may be gone; the run is journaled either way
                        let _ = runs.send(run);
                    }
                }
                Err(e) => error!(%event_id, workflow = %workflow, error = %e, "Triggered run did not start"),
            }
        });

        Ok(())
    }
}

/// Subscribe a trigger for every binding
///
/// Every workflow must already be defined; nothing is subscribed if one
/// is missing.
pub fn bind_triggers(
    bus: &EventBus,
    orchestrator: &Arc<Orchestrator>,
    bindings: &[TriggerBinding],
    runs: Option<mpsc::UnboundedSender<WorkflowRun>>,
) -> Result<Vec<SubscriptionId>> {
    for binding in bindings {
        orchestrator.workflow(&binding.workflow)?;
    }

    let ids = bindings
        .iter()
        .map(|binding| {
            let mut trigger = WorkflowTrigger::new(Arc::clone(orchestrator), &binding.workflow);
            if let Some(ref sink) = runs {
                trigger = trigger.with_run_sink(sink.clone());
            }
            info!(event = %binding.event, workflow = %binding.workflow, "Bound trigger");
            bus.subscribe(binding.event.clone(), Arc::new(trigger))
        })
        .collect();

    Ok(ids)
}
