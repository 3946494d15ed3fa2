//! Command-line interface for bizflow.
//!
//! Provides commands for running and validating workflows, checking
//! integration health, publishing events, listening on trigger sources,
//! and inspecting past runs.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::config::{self, ResolvedConfig};
use crate::core::{bind_triggers, load_workflows_dir, EventBus, IntegrationRegistry, Orchestrator, RunStore};
use crate::domain::{Event, RunOutcome, StepStatus, WorkflowRun};
use crate::ingest::{start_schedule, InboxWatcher};

/// bizflow - Event-driven workflow orchestrator
#[derive(Parser, Debug)]
#[command(name = "bizflow")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a workflow
    Run {
        /// Workflow name (as defined in the workflows directory)
        workflow: String,

        /// Initial context as a JSON object
        #[arg(short, long)]
        context: Option<String>,

        /// Read the initial context from a JSON file
        #[arg(long, conflicts_with = "context")]
        context_file: Option<PathBuf>,

        /// Print the run report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate every workflow definition
    Validate,

    /// Check connectivity of every configured integration
    Health,

    /// Publish an event and run the workflows it triggers
    Publish {
        /// Event type
        event_type: String,

        /// Event source
        #[arg(short, long, default_value = "cli")]
        source: String,

        /// Event payload as a JSON object
        #[arg(short, long)]
        data: Option<String>,

        /// How long to wait for triggered runs to finish
        #[arg(long, default_value = "60", env = "BIZFLOW_WAIT_SECS")]
        wait_secs: u64,
    },

    /// Watch the inbox and run schedules until interrupted
    Listen,

    /// Show the report of a past run
    Status {
        /// Run ID (UUID)
        run_id: String,
    },

    /// List recent runs
    Runs {
        /// Maximum number of runs to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Run {
                workflow,
                context,
                context_file,
                json,
            } => run_workflow(&workflow, context, context_file, json).await,
            Commands::Validate => validate_workflows().await,
            Commands::Health => check_health().await,
            Commands::Publish {
                event_type,
                source,
                data,
                wait_secs,
            } => publish_event(&event_type, &source, data, wait_secs).await,
            Commands::Listen => listen().await,
            Commands::Status { run_id } => show_status(&run_id).await,
            Commands::Runs { limit } => list_runs(limit).await,
            Commands::Config => show_config().await,
        }
    }
}

/// Build the registry and an orchestrator with every workflow defined
fn load_engine(cfg: &ResolvedConfig) -> Result<Arc<Orchestrator>> {
    let registry = IntegrationRegistry::from_configs(&cfg.integrations)
        .context("Failed to build integrations")?
        .with_health_timeout(cfg.health_timeout);

    let orchestrator = Orchestrator::new(Arc::new(registry)).with_store(RunStore::new(cfg.runs_dir()));

    for workflow in load_workflows_dir(&cfg.workflows)? {
        let name = workflow.name.clone();
        orchestrator
            .define_workflow(workflow)
            .with_context(|| format!("Failed to define workflow '{}'", name))?;
    }

    Ok(Arc::new(orchestrator))
}

/// Parse a JSON object argument
fn parse_object(raw: &str, what: &str) -> Result<Map<String, Value>> {
    let value: Value =
        serde_json::from_str(raw).with_context(|| format!("Invalid {} JSON", what))?;

    match value {
        Value::Object(map) => Ok(map),
        other => anyhow::bail!("{} must be a JSON object, got: {}", what, other),
    }
}

/// Run a workflow with the given context
async fn run_workflow(
    name: &str,
    context: Option<String>,
    context_file: Option<PathBuf>,
    as_json: bool,
) -> Result<()> {
    let context = if let Some(path) = context_file {
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read context file: {}", path.display()))?;
        parse_object(&raw, "context")?
    } else if let Some(raw) = context {
        parse_object(&raw, "context")?
    } else {
        Map::new()
    };

    let orchestrator = load_engine(config::config()?)?;
    let run = orchestrator.execute_workflow(name, context).await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&run)?);
    } else {
        print_run(&run);
    }

    exit_for(&run);
    Ok(())
}

/// Exit non-zero unless the run completed
fn exit_for(run: &WorkflowRun) {
    if run.outcome != RunOutcome::Completed {
        std::process::exit(1);
    }
}

fn print_run(run: &WorkflowRun) {
    println!("Run ID:   {}", run.id);
    println!("Workflow: {}", run.workflow);
    println!("Outcome:  {}", run.outcome);
    println!("Started:  {}", run.started_at);
    if let Some(completed) = run.completed_at {
        println!("Finished: {}", completed);
    }
    if let Some(ref step) = run.halted_by {
        println!("Halted by: {}", step);
    }
    println!("{}", step_summary(run));

    println!("\n{:<24} {:<10} {:>8} {:>10}  DETAIL", "STEP", "STATUS", "ATTEMPTS", "DURATION");
    println!("{}", "-".repeat(80));

    for step in &run.steps {
        let duration = step
            .duration_ms
            .map(|ms| format!("{}ms", ms))
            .unwrap_or_default();
        let detail = match step.status {
            StepStatus::Failed => step
                .error
                .as_ref()
                .map(|e| e.message.clone())
                .unwrap_or_default(),
            StepStatus::Skipped => step.skip_reason.clone().unwrap_or_default(),
            _ => String::new(),
        };
        println!(
            "{:<24} {:<10} {:>8} {:>10}  {}",
            step.name, step.status, step.attempts, duration, detail
        );
    }
}

/// One-line step tally, e.g. "Steps:    2 completed, 1 failed, 0 skipped (3/3 finished)"
fn step_summary(run: &WorkflowRun) -> String {
    let finished = run.steps.iter().filter(|s| s.status.is_terminal()).count();
    format!(
        "Steps:    {} completed, {} failed, {} skipped ({}/{} finished)",
        run.count(StepStatus::Completed),
        run.count(StepStatus::Failed),
        run.count(StepStatus::Skipped),
        finished,
        run.steps.len()
    )
}

/// Validate every workflow definition in the workflows directory
async fn validate_workflows() -> Result<()> {
    let cfg = config::config()?;
    let workflows = load_workflows_dir(&cfg.workflows)?;

    if workflows.is_empty() {
        println!("No workflows found in {}", cfg.workflows.display());
        return Ok(());
    }

    let registry = Arc::new(IntegrationRegistry::from_configs(&cfg.integrations)?);
    let orchestrator = Orchestrator::new(Arc::clone(&registry));
    let mut invalid = 0;

    for workflow in workflows {
        let name = workflow.name.clone();
        let unknown: Vec<String> = workflow
            .steps
            .iter()
            .filter(|s| registry.get(&s.integration).is_err())
            .map(|s| format!("{} -> {}", s.name, s.integration))
            .collect();

        match orchestrator.define_workflow(workflow) {
            Ok(()) if unknown.is_empty() => println!("ok       {}", name),
            Ok(()) => {
                println!("warning  {}: unknown integrations: {}", name, unknown.join(", "));
            }
            Err(e) => {
                invalid += 1;
                println!("invalid  {}", e);
            }
        }
    }

    if invalid > 0 {
        std::process::exit(1);
    }
    Ok(())
}

/// Check connectivity of every configured integration
async fn check_health() -> Result<()> {
    let cfg = config::config()?;
    let registry = IntegrationRegistry::from_configs(&cfg.integrations)?.with_health_timeout(cfg.health_timeout);

    if registry.is_empty() {
        println!("No integrations configured");
        return Ok(());
    }

    let results = registry.health_check_all().await;

    println!("{:<24} {:<10}", "INTEGRATION", "HEALTH");
    println!("{}", "-".repeat(36));
    for (name, healthy) in &results {
        println!("{:<24} {:<10}", name, if *healthy { "healthy" } else { "unhealthy" });
    }

    if results.values().any(|healthy| !healthy) {
        std::process::exit(1);
    }
    Ok(())
}

/// Publish one event and wait for the runs it triggers
async fn publish_event(event_type: &str, source: &str, data: Option<String>, wait_secs: u64) -> Result<()> {
    let cfg = config::config()?;
    let orchestrator = load_engine(cfg)?;
    let bus = EventBus::new();

    let (tx, mut rx) = mpsc::unbounded_channel();
    bind_triggers(&bus, &orchestrator, &cfg.triggers, Some(tx))?;

    let data = match data {
        Some(raw) => parse_object(&raw, "data")?,
        None => Map::new(),
    };
    let event = Event::new(event_type, source).with_data(data);

    let report = bus.publish(&event);
    eprintln!(
        "[Event {} delivered to {} trigger(s), {} failed]",
        event.id, report.delivered, report.failed
    );

    let deadline = tokio::time::Instant::now() + Duration::from_secs(wait_secs);
    let mut all_completed = true;

    for _ in 0..report.delivered {
        match tokio::time::timeout_at(deadline, rx.recv()).await {
            Ok(Some(run)) => {
                println!();
                print_run(&run);
                all_completed &= run.outcome == RunOutcome::Completed;
            }
            Ok(None) => break,
            Err(_) => {
                eprintln!("\n[Timed out waiting for triggered runs after {}s]", wait_secs);
                std::process::exit(1);
            }
        }
    }

    if !all_completed || report.failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}

/// Watch the inbox and run schedules until Ctrl-C
async fn listen() -> Result<()> {
    let cfg = config::config()?;
    let orchestrator = load_engine(cfg)?;
    let bus = Arc::new(EventBus::new());

    let (tx, mut rx) = mpsc::unbounded_channel();
    bind_triggers(&bus, &orchestrator, &cfg.triggers, Some(tx))?;

    let inbox = match cfg.inbox.clone() {
        Some(inbox) => {
            std::fs::create_dir_all(&inbox.dir)
                .with_context(|| format!("Failed to create inbox: {}", inbox.dir.display()))?;
            let watcher = Arc::new(InboxWatcher::new(inbox, Arc::clone(&bus)));
            let scanned = watcher.scan_once().await?;
            eprintln!("[Inbox: {} existing file(s) processed]", scanned.total_scanned());
            Some(watcher.watch()?)
        }
        None => None,
    };

    let mut schedules = Vec::new();
    for schedule in &cfg.schedules {
        schedules.push(start_schedule(Arc::clone(&bus), schedule.clone())?);
    }

    eprintln!(
        "[Listening: {} trigger(s), inbox {}, {} schedule(s). Ctrl-C to stop]",
        cfg.triggers.len(),
        if inbox.is_some() { "on" } else { "off" },
        schedules.len()
    );

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            Some(run) = rx.recv() => {
                eprintln!("[Run {} of '{}': {}]", run.id, run.workflow, run.outcome);
            }
        }
    }

    eprintln!("[Stopping]");
    if let Some(inbox) = inbox {
        inbox.stop().await?;
    }
    for schedule in schedules {
        schedule.stop().await?;
    }

    Ok(())
}

/// Show the report of a past run
async fn show_status(run_id_str: &str) -> Result<()> {
    let run_id = Uuid::parse_str(run_id_str)
        .with_context(|| format!("Invalid run ID: {}", run_id_str))?;

    let store = RunStore::open_default()?;
    let run = store
        .load_run(run_id)
        .await?
        .with_context(|| format!("Run {} not found", run_id))?;

    print_run(&run);
    Ok(())
}

/// List recent runs
async fn list_runs(limit: usize) -> Result<()> {
    let registry = Arc::new(IntegrationRegistry::new());
    let orchestrator = Orchestrator::new(registry).with_store(RunStore::open_default()?);
    let runs = orchestrator.list_runs(limit).await?;

    if runs.is_empty() {
        println!("No runs found");
        return Ok(());
    }

    println!("{:<38} {:<20} {:<16} {}", "RUN ID", "WORKFLOW", "OUTCOME", "STARTED");
    println!("{}", "-".repeat(100));

    for run in runs {
        println!(
            "{:<38} {:<20} {:<16} {}",
            run.id, run.workflow, run.outcome, run.started_at
        );
    }

    Ok(())
}

/// Show resolved configuration
async fn show_config() -> Result<()> {
    let cfg = config::config()?;

    println!("bizflow configuration");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Paths:");
    println!("  Home (engine state): {}", cfg.home.display());
    println!("  Runs:                {}", cfg.runs_dir().display());
    println!("  Workflows:           {}", cfg.workflows.display());
    println!();
    println!("Integrations:");
    if cfg.integrations.is_empty() {
        println!("  (none)");
    }
    for integration in &cfg.integrations {
        println!("  {} ({})", integration.name, integration.kind);
    }
    println!("  Health timeout: {}s", cfg.health_timeout.as_secs());
    println!();
    println!("Triggers:");
    if cfg.triggers.is_empty() {
        println!("  (none)");
    }
    for trigger in &cfg.triggers {
        println!("  {} -> {}", trigger.event, trigger.workflow);
    }
    println!();
    match cfg.inbox {
        Some(ref inbox) => println!("Inbox: {}", inbox.dir.display()),
        None => println!("Inbox: (disabled)"),
    }
    println!("Schedules:");
    if cfg.schedules.is_empty() {
        println!("  (none)");
    }
    for schedule in &cfg.schedules {
        let period = schedule
            .period()
            .map(|p| format!("{:?}", p))
            .unwrap_or_else(|e| e.to_string());
        println!("  {} every {}", schedule.event, period);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_summary_counts_statuses() {
        let mut run = WorkflowRun::new(Uuid::new_v4(), "onboarding", Map::new(), ["a", "b", "c", "d"]);
        run.steps[0].status = StepStatus::Completed;
        run.steps[1].status = StepStatus::Failed;
        run.steps[2].status = StepStatus::Running;

        assert_eq!(
            step_summary(&run),
            "Steps:    1 completed, 1 failed, 0 skipped (2/4 finished)"
        );
    }

    #[test]
    fn test_parse_object() {
        let map = parse_object(r#"{"email": "a@example.com"}"#, "context").unwrap();
        assert_eq!(map["email"], Value::from("a@example.com"));

        assert!(parse_object("[1, 2]", "context").is_err());
        assert!(parse_object("{broken", "context").is_err());
    }

    #[test]
    fn test_cli_parses_run() {
        let cli = Cli::try_parse_from([
            "bizflow",
            "run",
            "onboarding",
            "--context",
            r#"{"email": "a@example.com"}"#,
            "--json",
        ])
        .unwrap();

        match cli.command {
            Commands::Run { workflow, context, json, .. } => {
                assert_eq!(workflow, "onboarding");
                assert!(context.is_some());
                assert!(json);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_cli_context_flags_conflict() {
        let result = Cli::try_parse_from([
            "bizflow",
            "run",
            "onboarding",
            "--context",
            "{}",
            "--context-file",
            "ctx.json",
        ]);
        assert!(result.is_err());
    }
}
