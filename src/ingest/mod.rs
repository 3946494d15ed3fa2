//! Trigger sources feeding the event bus.
//!
//! ```text
//! inbox/*.json ─→ InboxWatcher ─┐
//!                               ├─→ EventBus ─→ WorkflowTrigger ─→ Orchestrator
//! schedules ───→ start_schedule ┘
//! ```

pub mod inbox;
pub mod schedule;

// Re-export key types
pub use inbox::{FileOutcome, InboxConfig, InboxError, InboxWatcher, ScanResult, WatchHandle};
pub use schedule::{start_schedule, ScheduleConfig, ScheduleHandle};
