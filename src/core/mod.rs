//! Core orchestration logic.
//!
//! This module contains:
//! - IntegrationRegistry: Named connectors and their health
//! - EventBus: In-process publish/subscribe
//! - Workflow: Step graphs, validation and ordering
//! - Orchestrator: Main execution engine
//! - RunStore: Append-only run journals
//! - Triggers: Event-to-workflow bindings

pub mod bus;
pub mod orchestrator;
pub mod params;
pub mod registry;
pub mod run_store;
pub mod triggers;
pub mod workflow;

// Re-export commonly used types
pub use bus::{DeliveryReport, EventBus, EventHandler, SubscriptionId};
pub use orchestrator::Orchestrator;
pub use registry::{Connectivity, IntegrationRegistry};
pub use run_store::{generate_idempotency_key, hash_params, RunJournal, RunStore};
pub use triggers::{bind_triggers, TriggerBinding, WorkflowTrigger};
pub use workflow::{load_workflows_dir, Backoff, FailurePolicy, Workflow, WorkflowDefaults, WorkflowStep};
