//! Main orchestrator for workflow execution.
//!
//! Schedules steps in dependency order, resolves parameters against prior
//! outputs, applies per-step timeouts, retries and failure policies, and
//! journals every transition.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::{json, Map, Value};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::adapters::Params;
use crate::domain::{
    EntryType, JournalEntry, RunOutcome, StepError, StepErrorKind, StepStatus, WorkflowRun,
};
use crate::error::{Error, NameKind, Result};

use super::params::resolve_params;
use super::registry::IntegrationRegistry;
use super::run_store::{generate_idempotency_key, RunJournal, RunStore};
use super::workflow::{Backoff, Workflow, WorkflowStep};

/// Main workflow orchestrator
pub struct Orchestrator {
    registry: Arc<IntegrationRegistry>,
    workflows: RwLock<HashMap<String, Arc<Workflow>>>,
    store: Option<RunStore>,
}

impl Orchestrator {
    /// Create an orchestrator over a registry
    pub fn new(registry: Arc<IntegrationRegistry>) -> Self {
        Self {
            registry,
            workflows: RwLock::new(HashMap::new()),
            store: None,
        }
    }

    /// Journal every run into a store
    pub fn with_store(mut self, store: RunStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn registry(&self) -> &Arc<IntegrationRegistry> {
        &self.registry
    }

    pub fn store(&self) -> Option<&RunStore> {
        self.store.as_ref()
    }

    /// Validate and store a workflow definition
    pub fn define_workflow(&self, workflow: Workflow) -> Result<()> {
        workflow.validate()?;

        let mut workflows = self.workflows.write().unwrap_or_else(|e| e.into_inner());
        if workflows.contains_key(&workflow.name) {
            return Err(Error::duplicate(NameKind::Workflow, workflow.name));
        }

        info!(workflow = %workflow.name, steps = workflow.steps.len(), "Defined workflow");
        workflows.insert(workflow.name.clone(), Arc::new(workflow));
        Ok(())
    }

    /// Define a workflow from a name and steps with default settings
    pub fn define_workflow_from(&self, name: impl Into<String>, steps: Vec<WorkflowStep>) -> Result<()> {
        self.define_workflow(Workflow::new(name, steps))
    }

    /// Get a defined workflow
    pub fn workflow(&self, name: &str) -> Result<Arc<Workflow>> {
        self.workflows
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found(NameKind::Workflow, name))
    }

    /// Names of all defined workflows, sorted
    pub fn workflow_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .workflows
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Execute a workflow and return its run report
    ///
    /// Only fails for an unknown workflow; step failures are recorded in
    /// the returned run.
    #[instrument(skip(self, context), fields(workflow = %name))]
    pub async fn execute_workflow(&self, name: &str, context: Map<String, Value>) -> Result<WorkflowRun> {
        let workflow = self.workflow(name)?;
        let order = workflow.execution_order()?;

        let run_id = Uuid::new_v4();
        info!(%run_id, "Starting workflow run");

        let journal = Journal::open(self.store.as_ref(), run_id, &workflow.name).await;
        let mut run = WorkflowRun::new(
            run_id,
            workflow.name.clone(),
            context,
            workflow.steps.iter().map(|s| s.name.clone()),
        );

        journal
            .record(
                journal
                    .entry(None, EntryType::RunStarted, format!("{}:start", run_id))
                    .with_summary(format!("Workflow '{}' started", workflow.name))
                    .with_data(json!({
                        "context": run.context,
                        "steps": workflow.steps.iter().map(|s| &s.name).collect::<Vec<_>>(),
                    })),
            )
            .await;

        let mut outputs: HashMap<String, Value> = HashMap::new();

        loop {
            self.skip_blocked(&workflow, &order, &mut run, &journal).await;

            if let Some(failed) = run.halted_by.clone() {
                let reason = format!("run halted after step '{}' failed", failed);
                for idx in 0..run.steps.len() {
                    if run.steps[idx].status == StepStatus::Pending {
                        self.skip_step(&mut run, idx, reason.clone(), &journal).await;
                    }
                }
                break;
            }

            let wave: Vec<usize> = (0..workflow.steps.len())
                .filter(|&idx| {
                    run.steps[idx].status == StepStatus::Pending
                        && workflow.steps[idx]
                            .depends_on
                            .iter()
                            .all(|dep| run.status(dep) == Some(StepStatus::Completed))
                })
                .collect();

            if wave.is_empty() {
                break;
            }

            debug!(
                steps = ?wave.iter().map(|&i| workflow.steps[i].name.as_str()).collect::<Vec<_>>(),
                "Scheduling wave"
            );

            if workflow.parallel {
                let mut handles = Vec::with_capacity(wave.len());
                for &idx in &wave {
                    let handle = self.spawn_step(&workflow, idx, &mut run, &outputs, &journal);
                    handles.push((idx, handle));
                }
                for (idx, handle) in handles {
                    let outcome = join_step(handle).await;
                    self.record_outcome(&workflow, idx, outcome, &mut run, &mut outputs);
                }
            } else {
                for idx in wave {
                    if run.halted_by.is_some() {
                        break;
                    }
                    let handle = self.spawn_step(&workflow, idx, &mut run, &outputs, &journal);
                    let outcome = join_step(handle).await;
                    self.record_outcome(&workflow, idx, outcome, &mut run, &mut outputs);
                }
            }
        }

        run.finish();
        self.complete_run(&run, &journal).await;

        Ok(run)
    }

    /// Skip pending steps with a dependency that failed or was skipped
    ///
    /// Walking in topological order carries skips down whole chains.
    async fn skip_blocked(&self, workflow: &Workflow, order: &[usize], run: &mut WorkflowRun, journal: &Journal) {
        for &idx in order {
            if run.steps[idx].status != StepStatus::Pending {
                continue;
            }
            let blocked_by = workflow.steps[idx].depends_on.iter().find(|dep| {
                matches!(
                    run.status(dep),
                    Some(StepStatus::Failed) | Some(StepStatus::Skipped)
                )
            });
            if let Some(dep) = blocked_by {
                let reason = format!("dependency '{}' did not complete", dep);
                self.skip_step(run, idx, reason, journal).await;
            }
        }
    }

    async fn skip_step(&self, run: &mut WorkflowRun, idx: usize, reason: String, journal: &Journal) {
        let record = &mut run.steps[idx];
        record.status = StepStatus::Skipped;
        record.skip_reason = Some(reason.clone());
        record.finished_at = Some(Utc::now());

        info!(step = %record.name, %reason, "Step skipped");

        journal
            .record(
                journal
                    .entry(
                        Some(record.name.clone()),
                        EntryType::StepSkipped,
                        format!("{}:{}:skip", run.id, record.name),
                    )
                    .with_summary(reason),
            )
            .await;
    }

    /// Mark a step running and start its attempts on the runtime
    fn spawn_step(
        &self,
        workflow: &Workflow,
        idx: usize,
        run: &mut WorkflowRun,
        outputs: &HashMap<String, Value>,
        journal: &Journal,
    ) -> tokio::task::JoinHandle<StepOutcome> {
        let step = workflow.steps[idx].clone();
        let params = resolve_params(&step.params, &run.context, outputs);

        let record = &mut run.steps[idx];
        record.status = StepStatus::Running;
        record.started_at = Some(Utc::now());

        let attempt = StepAttempt {
            registry: Arc::clone(&self.registry),
            journal: journal.clone(),
            run_id: run.id,
            timeout: workflow.timeout_for(&step),
            backoff: workflow.backoff_for(&step),
            step,
        };

        tokio::spawn(attempt.run(params))
    }

    /// Store a finished step's result and apply its failure policy
    fn record_outcome(
        &self,
        workflow: &Workflow,
        idx: usize,
        outcome: StepOutcome,
        run: &mut WorkflowRun,
        outputs: &mut HashMap<String, Value>,
    ) {
        let step = &workflow.steps[idx];
        let record = &mut run.steps[idx];

        record.attempts = outcome.attempts;
        record.duration_ms = Some(outcome.duration_ms);
        record.finished_at = Some(Utc::now());

        match outcome.result {
            Ok(output) => {
                record.status = StepStatus::Completed;
                record.output = Some(output.clone());
                outputs.insert(step.name.clone(), output);
            }
            Err(err) => {
                record.status = StepStatus::Failed;
                record.error = Some(err);

                if step.on_failure.halts_run() && run.halted_by.is_none() {
                    warn!(step = %step.name, policy = ?step.on_failure, "Step failure halts run");
                    run.halted_by = Some(step.name.clone());
                }
            }
        }
    }

    async fn complete_run(&self, run: &WorkflowRun, journal: &Journal) {
        let (entry_type, summary) = match run.outcome {
            RunOutcome::Failed => {
                error!(run_id = %run.id, halted_by = ?run.halted_by, "Run failed");
                (
                    EntryType::RunFailed,
                    format!("Workflow '{}' failed", run.workflow),
                )
            }
            outcome => {
                info!(run_id = %run.id, %outcome, "Run finished");
                (
                    EntryType::RunCompleted,
                    format!("Workflow '{}' finished: {}", run.workflow, outcome),
                )
            }
        };

        journal
            .record(
                journal
                    .entry(run.halted_by.clone(), entry_type, format!("{}:complete", run.id))
                    .with_summary(summary)
                    .with_data(json!({ "outcome": run.outcome })),
            )
            .await;
    }

    /// Rebuild a past run from the journal store
    pub async fn get_run(&self, run_id: Uuid) -> anyhow::Result<WorkflowRun> {
        let store = self
            .store
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("No run store configured"))?;

        store
            .load_run(run_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Run {} not found", run_id))
    }

    /// List recent runs, most recent first
    pub async fn list_runs(&self, limit: usize) -> anyhow::Result<Vec<WorkflowRun>> {
        let Some(store) = self.store.as_ref() else {
            return Ok(Vec::new());
        };

        let mut runs = Vec::new();
        for run_id in store.list_runs().await? {
            if let Ok(Some(run)) = store.load_run(run_id).await {
                runs.push(run);
            }
        }

        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        runs.truncate(limit);
        Ok(runs)
    }
}

/// Result of running all attempts of one step
#[derive(Debug)]
struct StepOutcome {
    result: std::result::Result<Value, StepError>,
    attempts: u32,
    duration_ms: u64,
}

async fn join_step(handle: tokio::task::JoinHandle<StepOutcome>) -> StepOutcome {
    handle.await.unwrap_or_else(|e| {
        error!(error = %e, "Step task aborted");
        StepOutcome {
            result: Err(StepError::new(
                StepErrorKind::Integration,
                format!("step task aborted: {}", e),
            )),
            attempts: 1,
            duration_ms: 0,
        }
    })
}

/// Everything one step needs to run detached from the coordinator
struct StepAttempt {
    registry: Arc<IntegrationRegistry>,
    journal: Journal,
    run_id: Uuid,
    step: WorkflowStep,
    timeout: Duration,
    backoff: Backoff,
}

impl StepAttempt {
    async fn run(self, params: std::result::Result<Params, String>) -> StepOutcome {
        let started = Instant::now();
        let step = &self.step;

        let params = match params {
            Ok(params) => params,
            Err(message) => {
                let err = StepError::new(StepErrorKind::Params, message);
                error!(step = %step.name, error = %err, "Step parameters did not resolve");
                self.record_failure(&format!("{}:{}:params", self.run_id, step.name), 0, 0, &err)
                    .await;
                return StepOutcome {
                    result: Err(err),
                    attempts: 0,
                    duration_ms: 0,
                };
            }
        };

        let idem_key = generate_idempotency_key(self.run_id, &step.name, &params);
        let max_attempts = step.max_attempts();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let attempt_start = Instant::now();

            self.journal
                .record(
                    self.journal
                        .entry(Some(step.name.clone()), EntryType::StepStarted, idem_key.clone())
                        .with_summary(format!("Step '{}' attempt {}", step.name, attempt))
                        .with_attempt(attempt),
                )
                .await;

            let result = match tokio::time::timeout(
                self.timeout,
                self.registry.execute(&step.integration, &step.action, &params),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout {
                    step: step.name.clone(),
                    after: self.timeout,
                }),
            };

            let attempt_ms = attempt_start.elapsed().as_millis() as u64;

            match result {
                Ok(output) => {
                    info!(step = %step.name, attempt, duration_ms = attempt_ms, "Step completed");

                    self.journal
                        .record(
                            self.journal
                                .entry(Some(step.name.clone()), EntryType::StepCompleted, idem_key)
                                .with_summary(format!(
                                    "Step '{}' completed in {}ms",
                                    step.name, attempt_ms
                                ))
                                .with_attempt(attempt)
                                .with_duration(attempt_ms)
                                .with_data(output.clone()),
                        )
                        .await;

                    return StepOutcome {
                        result: Ok(output),
                        attempts: attempt,
                        duration_ms: started.elapsed().as_millis() as u64,
                    };
                }
                Err(e) => {
                    let err = StepError::from(&e);

                    if attempt < max_attempts && is_retryable(&e) {
                        let delay = self.backoff.delay_for_attempt(attempt);

                        warn!(
                            step = %step.name,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "Step failed, retrying"
                        );

                        self.journal
                            .record(
                                self.journal
                                    .entry(
                                        Some(step.name.clone()),
                                        EntryType::StepRetrying,
                                        format!("{}:retry:{}", idem_key, attempt),
                                    )
                                    .with_summary(format!(
                                        "Step '{}' failed, retrying in {:?}: {}",
                                        step.name, delay, e
                                    ))
                                    .with_attempt(attempt)
                                    .with_error(err),
                            )
                            .await;

                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    error!(step = %step.name, attempt, error = %e, "Step failed permanently");
                    self.record_failure(&idem_key, attempt, attempt_ms, &err).await;

                    return StepOutcome {
                        result: Err(err),
                        attempts: attempt,
                        duration_ms: started.elapsed().as_millis() as u64,
                    };
                }
            }
        }
    }

    async fn record_failure(&self, idem_key: &str, attempt: u32, duration_ms: u64, err: &StepError) {
        self.journal
            .record(
                self.journal
                    .entry(
                        Some(self.step.name.clone()),
                        EntryType::StepFailed,
                        idem_key.to_string(),
                    )
                    .with_summary(format!(
                        "Step '{}' failed after {} attempts: {}",
                        self.step.name, attempt, err.message
                    ))
                    .with_attempt(attempt)
                    .with_duration(duration_ms)
                    .with_error(err.clone()),
            )
            .await;
    }
}

/// Structural step errors fail identically on every attempt
fn is_retryable(err: &Error) -> bool {
    !matches!(err, Error::NotFound { .. } | Error::ActionNotSupported { .. })
}

/// Best-effort writer for one run's journal
///
/// Journal failures are logged and never fail the run.
#[derive(Clone)]
struct Journal {
    inner: Option<Arc<RunJournal>>,
    run_id: Uuid,
    workflow: String,
}

impl Journal {
    async fn open(store: Option<&RunStore>, run_id: Uuid, workflow: &str) -> Self {
        let inner = match store {
            Some(store) => match store.journal(run_id).await {
                Ok(journal) => Some(Arc::new(journal)),
                Err(e) => {
                    warn!(%run_id, error = %e, "Run journal unavailable, continuing without it");
                    None
                }
            },
            None => None,
        };

        Self {
            inner,
            run_id,
            workflow: workflow.to_string(),
        }
    }

    fn entry(&self, step: Option<String>, entry_type: EntryType, idempotency_key: String) -> JournalEntry {
        JournalEntry::new(
            self.run_id,
            self.workflow.clone(),
            step,
            entry_type,
            idempotency_key,
            String::new(),
        )
    }

    async fn record(&self, entry: JournalEntry) {
        if let Some(ref journal) = self.inner {
            if let Err(e) = journal.append(&entry).await {
                warn!(run_id = %self.run_id, error = %e, "Failed to append journal entry");
            }
        }
    }
}
