//! bizflow - Event-driven workflow orchestrator
//!
//! Connects chat platforms, a CRM, a data warehouse and generic REST APIs
//! behind one integration contract, and runs workflows (DAGs of
//! integration actions) when events arrive.
//!
//! # Architecture
//!
//! - Integrations are registered by name and invoked uniformly
//! - Events published on the bus start the workflows bound to them
//! - Each run executes steps in dependency order with per-step timeouts,
//!   retries and failure policies
//! - Every run is journaled to an append-only log and can be rebuilt from it
//!
//! # Modules
//!
//! - `adapters`: Connectors (Slack, Teams, CRM, warehouse, REST, echo)
//! - `core`: Registry, event bus, workflows, orchestrator, run journal, triggers
//! - `domain`: Data structures (Event, WorkflowRun, JournalEntry)
//! - `ingest`: Trigger sources (inbox watcher, schedules)
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Run a workflow
//! bizflow run onboarding --context '{"email": "ada@example.com"}'
//!
//! # Publish an event and run the workflows bound to it
//! bizflow publish customer_signed_up --data '{"email": "ada@example.com"}'
//!
//! # Check a past run
//! bizflow status <run-id>
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod error;
pub mod ingest;

// Re-export main types at crate root for convenience
pub use adapters::{Integration, IntegrationConfig, IntegrationError};
pub use core::{EventBus, IntegrationRegistry, Orchestrator, Workflow, WorkflowStep};
pub use domain::{Event, RunOutcome, StepStatus, WorkflowRun};
pub use error::{Error, Result};
