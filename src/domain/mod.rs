//! Domain types for the orchestrator.
//!
//! This module contains the core data structures:
//! - Event: Notifications published on the bus
//! - WorkflowRun: Execution report of one workflow run
//! - JournalEntry: Immutable records of run state changes

pub mod events;
pub mod journal;
pub mod run;

// Re-export commonly used types
pub use events::Event;
pub use journal::{EntryType, JournalEntry};
pub use run::{RunOutcome, StepError, StepErrorKind, StepRecord, StepStatus, WorkflowRun};
