//! Workflow run state and reconstruction from the run journal.
//!
//! A [`WorkflowRun`] is the complete report of one workflow execution: the
//! status, output or error of every step.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::journal::{EntryType, JournalEntry};
use crate::error::Error;

/// One execution of a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRun {
    /// Unique identifier for this run
    pub id: Uuid,

    /// Name of the workflow executed
    pub workflow: String,

    /// Initial context supplied by the caller
    pub context: Map<String, Value>,

    /// Overall result
    pub outcome: RunOutcome,

    /// Step whose failure halted the run
    pub halted_by: Option<String>,

    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,

    /// Per-step records in declaration order
    pub steps: Vec<StepRecord>,
}

impl WorkflowRun {
    /// Create a run with every step pending
    pub fn new<I, S>(id: Uuid, workflow: impl Into<String>, context: Map<String, Value>, steps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id,
            workflow: workflow.into(),
            context,
            outcome: RunOutcome::Running,
            halted_by: None,
            started_at: Utc::now(),
            completed_at: None,
            steps: steps.into_iter().map(StepRecord::pending).collect(),
        }
    }

    /// Look up a step record by name
    pub fn step(&self, name: &str) -> Option<&StepRecord> {
        self.steps.iter().find(|s| s.name == name)
    }

    pub(crate) fn step_mut(&mut self, name: &str) -> Option<&mut StepRecord> {
        self.steps.iter_mut().find(|s| s.name == name)
    }

    /// Status of a step, if the step exists
    pub fn status(&self, name: &str) -> Option<StepStatus> {
        self.step(name).map(|s| s.status)
    }

    /// Output of a completed step
    pub fn output(&self, name: &str) -> Option<&Value> {
        self.step(name)
            .filter(|s| s.status == StepStatus::Completed)
            .and_then(|s| s.output.as_ref())
    }

    /// Number of steps in a given status
    pub fn count(&self, status: StepStatus) -> usize {
        self.steps.iter().filter(|s| s.status == status).count()
    }

    pub fn is_finished(&self) -> bool {
        self.outcome != RunOutcome::Running
    }

    /// Derive the outcome once every step is terminal
    pub(crate) fn finish(&mut self) {
        self.outcome = if self.halted_by.is_some() {
            RunOutcome::Failed
        } else if self.count(StepStatus::Completed) == self.steps.len() {
            RunOutcome::Completed
        } else {
            RunOutcome::PartialFailure
        };
        self.completed_at = Some(Utc::now());
    }

    /// Reconstruct a run from its journal entries
    pub fn from_journal(entries: &[JournalEntry]) -> Option<Self> {
        let first = entries.first()?;
        if first.entry_type != EntryType::RunStarted {
            return None;
        }

        let data = first.data.clone().unwrap_or(Value::Null);
        let context = data
            .get("context")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        let steps: Vec<String> = data
            .get("steps")
            .and_then(Value::as_array)
            .map(|names| {
                names
                    .iter()
                    .filter_map(Value::as_str)
                    .map(|s| s.to_string())
                    .collect()
            })
            .unwrap_or_default();

        let mut run = Self::new(first.run_id, first.workflow.clone(), context, steps);
        run.started_at = first.timestamp;

        for entry in &entries[1..] {
            run.apply_entry(entry);
        }

        Some(run)
    }

    /// Apply a single journal entry
    pub fn apply_entry(&mut self, entry: &JournalEntry) {
        match entry.entry_type {
            EntryType::RunStarted => {
                self.outcome = RunOutcome::Running;
                self.started_at = entry.timestamp;
            }
            EntryType::RunCompleted => {
                self.outcome = entry
                    .data
                    .as_ref()
                    .and_then(|d| d.get("outcome"))
                    .and_then(|o| serde_json::from_value(o.clone()).ok())
                    .unwrap_or(RunOutcome::Completed);
                self.completed_at = Some(entry.timestamp);
            }
            EntryType::RunFailed => {
                self.outcome = RunOutcome::Failed;
                self.halted_by = entry.step.clone();
                self.completed_at = Some(entry.timestamp);
            }
            _ => {
                let Some(ref name) = entry.step else {
                    return;
                };
                let Some(record) = self.step_mut(name) else {
                    return;
                };
                match entry.entry_type {
                    EntryType::StepStarted => {
                        record.status = StepStatus::Running;
                        record.started_at = Some(entry.timestamp);
                        record.attempts = entry.attempt.unwrap_or(1);
                    }
                    EntryType::StepRetrying => {
                        record.status = StepStatus::Running;
                        record.attempts = entry.attempt.unwrap_or(record.attempts);
                        record.error = entry.error.clone();
                    }
                    EntryType::StepCompleted => {
                        record.status = StepStatus::Completed;
                        record.output = entry.data.clone();
                        record.error = None;
                        record.finished_at = Some(entry.timestamp);
                        record.duration_ms = entry.duration_ms;
                        record.attempts = entry.attempt.unwrap_or(record.attempts);
                    }
                    EntryType::StepFailed => {
                        record.status = StepStatus::Failed;
                        record.error = entry.error.clone();
                        record.finished_at = Some(entry.timestamp);
                        record.duration_ms = entry.duration_ms;
                        record.attempts = entry.attempt.unwrap_or(record.attempts);
                    }
                    EntryType::StepSkipped => {
                        record.status = StepStatus::Skipped;
                        record.skip_reason = Some(entry.summary.clone());
                        record.finished_at = Some(entry.timestamp);
                    }
                    _ => {}
                }
            }
        }
    }
}

/// Overall result of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Still executing
    Running,

    /// Every step completed
    Completed,

    /// Not halted, but at least one step failed or was skipped
    PartialFailure,

    /// Halted by a step failing under stop semantics
    Failed,
}

impl Default for RunOutcome {
    fn default() -> Self {
        Self::Running
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::PartialFailure => "partial_failure",
            Self::Failed => "failed",
        };
        f.pad(s)
    }
}

/// Result record of one step within a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub name: String,
    pub status: StepStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<StepError>,

    /// Number of attempts made
    pub attempts: u32,

    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,

    /// Why the step was skipped
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
}

impl StepRecord {
    pub fn pending(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: StepStatus::Pending,
            output: None,
            error: None,
            attempts: 0,
            started_at: None,
            finished_at: None,
            duration_ms: None,
            skip_reason: None,
        }
    }
}

/// Status of a step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Not yet started
    Pending,

    /// Currently executing
    Running,

    /// Completed successfully
    Completed,

    /// Failed after exhausting its attempts
    Failed,

    /// Never executed (dependency not completed, or run halted)
    Skipped,
}

impl StepStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }
}

impl Default for StepStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        f.pad(s)
    }
}

/// Why a step failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepError {
    pub kind: StepErrorKind,
    pub message: String,
}

impl StepError {
    pub fn new(kind: StepErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for StepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl From<&Error> for StepError {
    fn from(err: &Error) -> Self {
        let kind = match err {
            Error::ActionNotSupported { .. } => StepErrorKind::ActionNotSupported,
            Error::NotFound { .. } => StepErrorKind::NotFound,
            Error::Timeout { .. } => StepErrorKind::Timeout,
            _ => StepErrorKind::Integration,
        };
        Self::new(kind, err.to_string())
    }
}

/// Category of a step failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepErrorKind {
    /// Transport, auth or remote failure
    Integration,

    /// The integration does not recognise the action
    ActionNotSupported,

    /// The target integration is not registered
    NotFound,

    /// The attempt exceeded the step timeout
    Timeout,

    /// A parameter reference could not be resolved
    Params,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NameKind;
    use serde_json::json;

    #[test]
    fn test_run_creation() {
        let run_id = Uuid::new_v4();
        let run = WorkflowRun::new(run_id, "onboarding", Map::new(), ["create_account", "send_email"]);

        assert_eq!(run.id, run_id);
        assert_eq!(run.steps.len(), 2);
        assert_eq!(run.status("send_email"), Some(StepStatus::Pending));
        assert!(!run.is_finished());
    }

    #[test]
    fn test_finish_outcomes() {
        let mut run = WorkflowRun::new(Uuid::new_v4(), "wf", Map::new(), ["a", "b"]);
        for step in run.steps.iter_mut() {
            step.status = StepStatus::Completed;
        }
        run.finish();
        assert_eq!(run.outcome, RunOutcome::Completed);

        run.step_mut("b").unwrap().status = StepStatus::Failed;
        run.finish();
        assert_eq!(run.outcome, RunOutcome::PartialFailure);

        run.halted_by = Some("b".to_string());
        run.finish();
        assert_eq!(run.outcome, RunOutcome::Failed);
    }

    #[test]
    fn test_output_only_for_completed_steps() {
        let mut run = WorkflowRun::new(Uuid::new_v4(), "wf", Map::new(), ["a"]);
        run.step_mut("a").unwrap().output = Some(json!({"id": 1}));
        assert!(run.output("a").is_none());

        run.step_mut("a").unwrap().status = StepStatus::Completed;
        assert_eq!(run.output("a"), Some(&json!({"id": 1})));
    }

    #[test]
    fn test_step_error_kinds() {
        let err = Error::Timeout {
            step: "a".to_string(),
            after: std::time::Duration::from_millis(10),
        };
        assert_eq!(StepError::from(&err).kind, StepErrorKind::Timeout);

        let err = Error::not_found(NameKind::Integration, "crm");
        assert_eq!(StepError::from(&err).kind, StepErrorKind::NotFound);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!StepStatus::Pending.is_terminal());
        assert!(!StepStatus::Running.is_terminal());
        assert!(StepStatus::Completed.is_terminal());
        assert!(StepStatus::Failed.is_terminal());
        assert!(StepStatus::Skipped.is_terminal());
    }
}
