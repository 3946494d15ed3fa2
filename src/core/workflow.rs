//! Workflow definitions and loading.
//!
//! Workflows are defined in YAML (or JSON) and consist of named steps, each
//! invoking one action on one integration. Execution order is derived from
//! `depends_on`, not from declaration order.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::params::{collect_references, Reference};
use crate::adapters::Params;
use crate::error::Error;

/// A complete workflow definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    /// Workflow name (unique per orchestrator)
    pub name: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Run steps that become eligible together concurrently
    #[serde(default)]
    pub parallel: bool,

    /// Defaults applied to steps that do not override them
    #[serde(default)]
    pub defaults: WorkflowDefaults,

    /// Steps in declaration order
    pub steps: Vec<WorkflowStep>,
}

impl Workflow {
    /// Create a workflow from steps with default settings
    pub fn new(name: impl Into<String>, steps: Vec<WorkflowStep>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            parallel: false,
            defaults: WorkflowDefaults::default(),
            steps,
        }
    }

    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn with_defaults(mut self, defaults: WorkflowDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    /// Load a workflow from a YAML or JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read workflow file: {}", path.display()))?;

        Self::from_yaml(&content)
            .with_context(|| format!("Failed to load workflow file: {}", path.display()))
    }

    /// Parse a workflow from YAML content (JSON is valid YAML)
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).context("Failed to parse workflow YAML")
    }

    /// Get a step by name
    pub fn step(&self, name: &str) -> Option<&WorkflowStep> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// Get the declaration index of a step by name
    pub fn step_index(&self, name: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.name == name)
    }

    /// Effective timeout for a step
    pub fn timeout_for(&self, step: &WorkflowStep) -> Duration {
        Duration::from_millis(step.timeout_ms.unwrap_or(self.defaults.step_timeout_ms))
    }

    /// Effective retry backoff for a step
    pub fn backoff_for(&self, step: &WorkflowStep) -> Backoff {
        step.backoff.clone().unwrap_or_else(|| self.defaults.backoff.clone())
    }

    /// Validate the definition, including that dependencies form a DAG
    pub fn validate(&self) -> Result<(), Error> {
        let invalid = |reason: String| Error::invalid_workflow(&self.name, reason);

        if self.name.trim().is_empty() {
            return Err(invalid("workflow name cannot be empty".to_string()));
        }
        if self.steps.is_empty() {
            return Err(invalid("workflow must have at least one step".to_string()));
        }
        if self.defaults.step_timeout_ms == 0 {
            return Err(invalid("default step timeout must be positive".to_string()));
        }

        let mut seen = HashSet::new();
        for (i, step) in self.steps.iter().enumerate() {
            if !is_valid_step_name(&step.name) {
                return Err(invalid(format!(
                    "step {} has an invalid name '{}' (use letters, digits, '_' or '-')",
                    i, step.name
                )));
            }
            if !seen.insert(step.name.as_str()) {
                return Err(invalid(format!("duplicate step name '{}'", step.name)));
            }
            if step.integration.trim().is_empty() || step.action.trim().is_empty() {
                return Err(invalid(format!(
                    "step '{}' must name an integration and an action",
                    step.name
                )));
            }
            if step.timeout_ms == Some(0) {
                return Err(invalid(format!("step '{}' has a zero timeout", step.name)));
            }
        }

        for step in &self.steps {
            for dep in &step.depends_on {
                if dep == &step.name {
                    return Err(invalid(format!("step '{}' depends on itself", step.name)));
                }
                if !seen.contains(dep.as_str()) {
                    return Err(invalid(format!(
                        "step '{}' depends on non-existent step '{}'",
                        step.name, dep
                    )));
                }
            }
        }

        let order = self.execution_order()?;

        // References may only point at steps guaranteed to have completed
        let ancestors = self.ancestors(&order);
        for (idx, step) in self.steps.iter().enumerate() {
            let refs = collect_references(&step.params)
                .map_err(|e| invalid(format!("step '{}': {}", step.name, e)))?;

            for reference in refs {
                if let Reference::Step { step: target, .. } = reference {
                    let Some(target_idx) = self.step_index(&target) else {
                        return Err(invalid(format!(
                            "step '{}' references non-existent step '{}'",
                            step.name, target
                        )));
                    };
                    if !ancestors[idx].contains(&target_idx) {
                        return Err(invalid(format!(
                            "step '{}' references output of '{}' without depending on it",
                            step.name, target
                        )));
                    }
                }
            }
        }

        Ok(())
    }

    /// Topological order of step indices, ties broken by declaration order
    pub fn execution_order(&self) -> Result<Vec<usize>, Error> {
        let n = self.steps.len();
        let index: HashMap<&str, usize> = self
            .steps
            .iter()
            .enumerate()
            .map(|(i, s)| (s.name.as_str(), i))
            .collect();

        // adj[i] = steps that depend on step i
        let mut adj: Vec<Vec<usize>> = vec![Vec::new(); n];
        let mut in_degree: Vec<usize> = vec![0; n];

        for (idx, step) in self.steps.iter().enumerate() {
            for dep in &step.depends_on {
                let &dep_idx = index.get(dep.as_str()).ok_or_else(|| {
                    Error::invalid_workflow(
                        &self.name,
                        format!("step '{}' depends on non-existent step '{}'", step.name, dep),
                    )
                })?;
                adj[dep_idx].push(idx);
                in_degree[idx] += 1;
            }
        }

        // Kahn's algorithm; the ordered set always yields the lowest index
        let mut ready: BTreeSet<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
        let mut order = Vec::with_capacity(n);

        while let Some(idx) = ready.pop_first() {
            order.push(idx);
            for &next in &adj[idx] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    ready.insert(next);
                }
            }
        }

        if order.len() != n {
            let cycle: Vec<&str> = (0..n)
                .filter(|i| in_degree[*i] > 0)
                .map(|i| self.steps[i].name.as_str())
                .collect();
            return Err(Error::invalid_workflow(
                &self.name,
                format!("dependency cycle among steps: {}", cycle.join(", ")),
            ));
        }

        Ok(order)
    }

    /// Transitive dependencies of every step, indexed by declaration index
    fn ancestors(&self, order: &[usize]) -> Vec<HashSet<usize>> {
        let mut ancestors: Vec<HashSet<usize>> = vec![HashSet::new(); self.steps.len()];

        for &idx in order {
            let mut set = HashSet::new();
            for dep in &self.steps[idx].depends_on {
                if let Some(dep_idx) = self.step_index(dep) {
                    set.insert(dep_idx);
                    set.extend(ancestors[dep_idx].iter().copied());
                }
            }
            ancestors[idx] = set;
        }
        ancestors
    }
}

fn is_valid_step_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Load every workflow file (`.yaml`, `.yml`, `.json`) in a directory
pub fn load_workflows_dir(dir: &Path) -> Result<Vec<Workflow>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut paths: Vec<_> = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read workflows directory: {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.extension()
                .and_then(|e| e.to_str())
                .map(|e| matches!(e, "yaml" | "yml" | "json"))
                .unwrap_or(false)
        })
        .collect();
    paths.sort();

    paths.iter().map(|path| Workflow::from_file(path)).collect()
}

/// A single step in a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    /// Step name (unique within the workflow)
    pub name: String,

    /// Registry name of the integration to call
    pub integration: String,

    /// Action to execute on the integration
    pub action: String,

    /// Action parameters; string values may contain references
    #[serde(default)]
    pub params: Params,

    /// Steps that must complete successfully first
    #[serde(default, alias = "dependsOn")]
    pub depends_on: Vec<String>,

    /// Additional attempts after the first failure
    #[serde(default)]
    pub retries: u32,

    /// Per-attempt timeout (uses the workflow default if not set)
    #[serde(default, alias = "timeoutMs")]
    pub timeout_ms: Option<u64>,

    /// What a failure does to the rest of the run
    #[serde(default, alias = "onFailure")]
    pub on_failure: FailurePolicy,

    /// Override of the workflow retry backoff
    #[serde(default)]
    pub backoff: Option<Backoff>,
}

impl WorkflowStep {
    pub fn new(name: impl Into<String>, integration: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            integration: integration.into(),
            action: action.into(),
            params: Params::new(),
            depends_on: Vec::new(),
            retries: 0,
            timeout_ms: None,
            on_failure: FailurePolicy::default(),
            backoff: None,
        }
    }

    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = deps.into_iter().map(Into::into).collect();
        self
    }

    /// Set parameters from a JSON object (non-objects are ignored)
    pub fn with_params(mut self, params: Value) -> Self {
        if let Value::Object(map) = params {
            self.params = map;
        }
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn on_failure(mut self, policy: FailurePolicy) -> Self {
        self.on_failure = policy;
        self
    }

    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = Some(backoff);
        self
    }

    /// Total attempts allowed (first try plus retries)
    pub fn max_attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }
}

/// How a step failure affects the rest of the run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Fail the step and halt the run
    Stop,

    /// Fail the step, skip its dependents, keep running other branches
    Continue,

    /// Exhaust the retry budget, then behave like `stop`
    Retry,
}

impl FailurePolicy {
    /// Whether a final failure under this policy halts the run
    pub fn halts_run(self) -> bool {
        matches!(self, Self::Stop | Self::Retry)
    }
}

impl Default for FailurePolicy {
    fn default() -> Self {
        Self::Stop
    }
}

/// Workflow-wide step defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefaults {
    /// Per-attempt timeout in milliseconds (default: 30s)
    #[serde(default = "default_step_timeout_ms")]
    pub step_timeout_ms: u64,

    #[serde(default)]
    pub backoff: Backoff,
}

fn default_step_timeout_ms() -> u64 {
    30_000
}

impl Default for WorkflowDefaults {
    fn default() -> Self {
        Self {
            step_timeout_ms: default_step_timeout_ms(),
            backoff: Backoff::default(),
        }
    }
}

/// Delay between retry attempts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Backoff {
    /// Delay before the second attempt in milliseconds
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    /// Maximum delay between attempts in milliseconds
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Backoff multiplier (delay *= multiplier after each retry)
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

fn default_initial_delay() -> u64 {
    500
}
fn default_max_delay() -> u64 {
    10_000
}
fn default_multiplier() -> f64 {
    2.0
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            multiplier: default_multiplier(),
        }
    }
}

impl Backoff {
    /// Retry immediately
    pub fn none() -> Self {
        Self {
            initial_delay_ms: 0,
            max_delay_ms: 0,
            multiplier: 1.0,
        }
    }

    /// Delay after a failed attempt (1-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::from_millis(self.initial_delay_ms.min(self.max_delay_ms));
        }

        let delay = self.initial_delay_ms as f64 * self.multiplier.powi((attempt - 1) as i32);

        let capped = delay.min(self.max_delay_ms as f64) as u64;
        Duration::from_millis(capped)
    }
}
