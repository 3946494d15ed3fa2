//! Run journal entries.
//!
//! Every state change of a run is recorded as an immutable entry in an
//! append-only log. A run report can be rebuilt by replaying its entries
//! (see [`WorkflowRun::from_journal`](super::WorkflowRun::from_journal)).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::run::StepError;

/// A single entry in a run journal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Unique identifier for this entry
    pub id: Uuid,

    /// When this entry was recorded
    pub timestamp: DateTime<Utc>,

    /// The run this entry belongs to
    pub run_id: Uuid,

    /// Workflow being executed
    pub workflow: String,

    /// Step name (if applicable)
    pub step: Option<String>,

    /// Type of entry
    pub entry_type: EntryType,

    /// Format: "{run_id}:{step}:{params_hash}"
    pub idempotency_key: String,

    /// Human-readable summary (no secrets)
    pub summary: String,

    /// Attempt number (1-based) for step entries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,

    /// Step output, or run metadata for run entries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StepError>,
}

impl JournalEntry {
    /// Create an entry with the current timestamp
    pub fn new(
        run_id: Uuid,
        workflow: impl Into<String>,
        step: Option<String>,
        entry_type: EntryType,
        idempotency_key: String,
        summary: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            run_id,
            workflow: workflow.into(),
            step,
            entry_type,
            idempotency_key,
            summary,
            attempt: None,
            duration_ms: None,
            data: None,
            error: None,
        }
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_error(mut self, error: StepError) -> Self {
        self.error = Some(error);
        self
    }
}

/// Types of journal entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    RunStarted,
    RunCompleted,

    /// Run halted by a failing step
    RunFailed,

    StepStarted,

    /// An attempt failed and another will follow
    StepRetrying,

    StepCompleted,
    StepFailed,
    StepSkipped,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::run::StepErrorKind;

    #[test]
    fn test_entry_serialization() {
        let entry = JournalEntry::new(
            Uuid::new_v4(),
            "onboarding",
            Some("create_account".to_string()),
            EntryType::StepFailed,
            "key".to_string(),
            "Step 'create_account' failed".to_string(),
        )
        .with_attempt(2)
        .with_duration(150)
        .with_error(StepError::new(StepErrorKind::Timeout, "timed out"));

        let json = serde_json::to_string(&entry).unwrap();
        let parsed: JournalEntry = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.entry_type, EntryType::StepFailed);
        assert_eq!(parsed.attempt, Some(2));
        assert_eq!(parsed.duration_ms, Some(150));
        assert_eq!(parsed.error.unwrap().kind, StepErrorKind::Timeout);
    }

    #[test]
    fn test_optional_fields_omitted() {
        let entry = JournalEntry::new(
            Uuid::new_v4(),
            "onboarding",
            None,
            EntryType::RunStarted,
            "key".to_string(),
            "started".to_string(),
        );

        let value = serde_json::to_value(&entry).unwrap();
        assert!(value.get("error").is_none());
        assert!(value.get("attempt").is_none());
        assert_eq!(value["entry_type"], "run_started");
    }
}
