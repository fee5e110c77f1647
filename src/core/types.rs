//! PV-001: Step-list schema types.
//!
//! Defines the YAML schema for step lists, settings, policy, state locks,
//! and provenance events. All types derive Serialize/Deserialize for YAML roundtripping.

use super::check::IdempotenceCheck;
use super::error::ErrorKind;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

// ============================================================================
// Top-level provisio.yaml
// ============================================================================

/// Root document, an ordered list of provisioning steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepList {
    /// Schema version (must be "1.0")
    pub version: String,

    /// Human-readable name; also names the state directory
    pub name: String,

    /// Optional description
    #[serde(default)]
    pub description: Option<String>,

    /// Global parameters (templatable)
    #[serde(default)]
    pub params: IndexMap<String, serde_yaml_ng::Value>,

    /// Machine-wide settings shared by every step
    #[serde(default)]
    pub settings: Settings,

    /// Execution policy
    #[serde(default)]
    pub policy: Policy,

    /// Steps, applied strictly in declaration order
    #[serde(default)]
    pub steps: Vec<Step>,
}

// ============================================================================
// Steps
// ============================================================================

/// One unit of provisioning work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    /// Stable identifier (defaults to `<kind>:<target>`)
    #[serde(default)]
    pub id: Option<String>,

    /// What the step does
    pub kind: StepKind,

    /// Package name, library name, file path, or variable name
    pub target: String,

    /// Kind-specific parameters
    #[serde(default)]
    pub params: IndexMap<String, serde_yaml_ng::Value>,

    /// Condition that, when satisfied, means the step's effect is already present.
    /// Written as nested single-key maps (`all: [{command: ...}]`).
    #[serde(with = "serde_yaml_ng::with::singleton_map_recursive")]
    pub check: IdempotenceCheck,

    /// Earlier steps this one relies on (documentation + validation only)
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Optional human-readable description
    #[serde(default)]
    pub description: Option<String>,
}

impl Step {
    pub fn new(kind: StepKind, target: impl Into<String>, check: IdempotenceCheck) -> Self {
        Self {
            id: None,
            kind,
            target: target.into(),
            params: IndexMap::new(),
            check,
            depends_on: Vec::new(),
            description: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_param(mut self, key: &str, value: impl Into<String>) -> Self {
        self.params
            .insert(key.to_string(), serde_yaml_ng::Value::String(value.into()));
        self
    }

    /// The step's identifier: explicit `id`, or `<kind>:<target>`.
    pub fn id(&self) -> String {
        match self.id {
            Some(ref id) => id.clone(),
            None => format!("{}:{}", self.kind, self.target),
        }
    }

    /// A parameter value rendered as a string (numbers and bools included).
    pub fn param(&self, key: &str) -> Option<String> {
        self.params.get(key).map(yaml_value_to_string)
    }

    /// A required parameter, or a message naming the step and the missing key.
    pub fn require_param(&self, key: &str) -> Result<String, String> {
        self.param(key)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| format!("step '{}' ({}) requires param '{}'", self.id(), self.kind, key))
    }

    /// `true` when the parameter is present and spelled as an affirmative.
    pub fn param_flag(&self, key: &str) -> bool {
        matches!(
            self.param(key).as_deref(),
            Some("true") | Some("yes") | Some("1")
        )
    }
}

/// Step kind enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepKind {
    PackageInstall,
    SourceBuild,
    FilePatch,
    EnvExport,
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PackageInstall => write!(f, "package-install"),
            Self::SourceBuild => write!(f, "source-build"),
            Self::FilePatch => write!(f, "file-patch"),
            Self::EnvExport => write!(f, "env-export"),
        }
    }
}

// ============================================================================
// Settings
// ============================================================================

/// Machine-wide settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Install prefix for source builds
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Shell startup file for env-export steps
    #[serde(default = "default_profile")]
    pub profile: String,

    /// Default package manager for package-install steps
    #[serde(default)]
    pub package_manager: PackageManager,

    /// Install command template (`{package}` placeholder) overriding the manager's
    #[serde(default)]
    pub install_command: Option<String>,

    /// Query command template (`{package}` placeholder) overriding the manager's
    #[serde(default)]
    pub query_command: Option<String>,

    /// Parent directory for scoped build directories (default: system temp)
    #[serde(default)]
    pub work_dir: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            profile: default_profile(),
            package_manager: PackageManager::default(),
            install_command: None,
            query_command: None,
            work_dir: None,
        }
    }
}

fn default_prefix() -> String {
    "/usr/local".to_string()
}

fn default_profile() -> String {
    "~/.bashrc".to_string()
}

/// Supported package managers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageManager {
    #[default]
    Apt,
    Dnf,
    Pacman,
    Brew,
    Pip,
    Cargo,
}

impl PackageManager {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "apt" => Some(Self::Apt),
            "dnf" => Some(Self::Dnf),
            "pacman" => Some(Self::Pacman),
            "brew" => Some(Self::Brew),
            "pip" => Some(Self::Pip),
            "cargo" => Some(Self::Cargo),
            _ => None,
        }
    }
}

impl fmt::Display for PackageManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Apt => write!(f, "apt"),
            Self::Dnf => write!(f, "dnf"),
            Self::Pacman => write!(f, "pacman"),
            Self::Brew => write!(f, "brew"),
            Self::Pip => write!(f, "pip"),
            Self::Cargo => write!(f, "cargo"),
        }
    }
}

// ============================================================================
// Policy
// ============================================================================

/// Execution policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    /// Failure handling
    #[serde(default)]
    pub failure: FailurePolicy,

    /// Append provenance events to the JSONL log
    #[serde(default = "default_true")]
    pub event_log: bool,

    /// Persist the state lock after each run
    #[serde(default = "default_true")]
    pub state_file: bool,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            failure: FailurePolicy::default(),
            event_log: true,
            state_file: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Failure handling strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    #[default]
    StopOnFirstFailure,
    ContinueAndReport,
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StopOnFirstFailure => write!(f, "stop-on-first-failure"),
            Self::ContinueAndReport => write!(f, "continue-and-report"),
        }
    }
}

// ============================================================================
// Run results
// ============================================================================

/// Outcome of one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Succeeded,
    Failed,
    Skipped,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => write!(f, "SUCCEEDED"),
            Self::Failed => write!(f, "FAILED"),
            Self::Skipped => write!(f, "SKIPPED"),
        }
    }
}

/// Record of a single step execution. Immutable once built.
#[derive(Debug, Clone)]
pub struct RunResult {
    step_id: String,
    kind: StepKind,
    target: String,
    outcome: Outcome,
    error: Option<ErrorKind>,
    diagnostic: String,
    duration: Duration,
}

impl RunResult {
    pub(crate) fn new(
        step: &Step,
        outcome: Outcome,
        error: Option<ErrorKind>,
        diagnostic: String,
        duration: Duration,
    ) -> Self {
        Self {
            step_id: step.id(),
            kind: step.kind,
            target: step.target.clone(),
            outcome,
            error,
            diagnostic,
            duration,
        }
    }

    pub fn step_id(&self) -> &str {
        &self.step_id
    }

    pub fn kind(&self) -> StepKind {
        self.kind
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn outcome(&self) -> Outcome {
        self.outcome
    }

    pub fn error(&self) -> Option<ErrorKind> {
        self.error
    }

    /// Captured output (command stdout/stderr, or the error message).
    pub fn diagnostic(&self) -> &str {
        &self.diagnostic
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }
}

/// Counts per outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Summary {
    pub succeeded: u32,
    pub failed: u32,
    pub skipped: u32,
}

/// Everything a run produced.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub results: Vec<RunResult>,
    /// Set when the run stopped at a step boundary because of an interrupt
    pub cancelled: bool,
}

impl RunReport {
    pub fn summary(&self) -> Summary {
        let mut s = Summary::default();
        for r in &self.results {
            match r.outcome() {
                Outcome::Succeeded => s.succeeded += 1,
                Outcome::Failed => s.failed += 1,
                Outcome::Skipped => s.skipped += 1,
            }
        }
        s
    }

    pub fn failures(&self) -> impl Iterator<Item = &RunResult> {
        self.results
            .iter()
            .filter(|r| r.outcome() == Outcome::Failed)
    }

    /// No failures and not interrupted.
    pub fn is_success(&self) -> bool {
        !self.cancelled && self.summary().failed == 0
    }
}

// ============================================================================
// State / Lock file
// ============================================================================

/// Per-list state lock file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateLock {
    /// Schema version
    pub schema: String,

    /// Step list name
    pub name: String,

    /// When the lock was generated
    pub generated_at: String,

    /// Generator version
    pub generator: String,

    /// Run that produced this lock
    #[serde(default)]
    pub run_id: Option<String>,

    /// Per-step state, in execution order
    pub steps: IndexMap<String, StepLock>,
}

/// Per-step lock entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepLock {
    pub kind: StepKind,

    pub target: String,

    /// Outcome of the last execution
    pub outcome: Outcome,

    /// When the step last ran
    #[serde(default)]
    pub applied_at: Option<String>,

    /// Duration of the last execution in seconds
    #[serde(default)]
    pub duration_seconds: Option<f64>,

    /// BLAKE3 hash of the step definition
    pub hash: String,

    /// Failure kind, if the step failed
    #[serde(default)]
    pub error: Option<ErrorKind>,
}

// ============================================================================
// Plan
// ============================================================================

/// What `plan` expects to happen to a step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanAction {
    Run,
    Skip,
    /// The check itself could not be evaluated
    Unknown(String),
}

impl fmt::Display for PlanAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Run => write!(f, "RUN"),
            Self::Skip => write!(f, "SKIP"),
            Self::Unknown(_) => write!(f, "UNKNOWN"),
        }
    }
}

/// A single planned step.
#[derive(Debug, Clone)]
pub struct PlannedStep {
    pub step_id: String,
    pub kind: StepKind,
    pub action: PlanAction,
    pub description: String,
}

/// Full execution plan.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub name: String,
    pub steps: Vec<PlannedStep>,
    pub to_run: u32,
    pub satisfied: u32,
    pub unknown: u32,
}

// ============================================================================
// Provenance events
// ============================================================================

/// Provenance event for the JSONL event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProvenanceEvent {
    RunStarted {
        list: String,
        run_id: String,
        policy: String,
        provisio_version: String,
    },
    StepStarted {
        run_id: String,
        step: String,
        kind: StepKind,
    },
    StepSucceeded {
        run_id: String,
        step: String,
        duration_seconds: f64,
        hash: String,
    },
    StepSkipped {
        run_id: String,
        step: String,
    },
    StepFailed {
        run_id: String,
        step: String,
        error: ErrorKind,
        diagnostic: String,
    },
    RunCompleted {
        run_id: String,
        succeeded: u32,
        failed: u32,
        skipped: u32,
        total_seconds: f64,
    },
    RunCancelled {
        run_id: String,
        completed_steps: u32,
    },
}

/// Timestamped event wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimestampedEvent {
    pub ts: String,
    #[serde(flatten)]
    pub event: ProvenanceEvent,
}

// ============================================================================
// Template helper
// ============================================================================

/// Convert a serde_yaml_ng::Value to a string for parameters and templates.
pub fn yaml_value_to_string(val: &serde_yaml_ng::Value) -> String {
    match val {
        serde_yaml_ng::Value::String(s) => s.clone(),
        serde_yaml_ng::Value::Number(n) => n.to_string(),
        serde_yaml_ng::Value::Bool(b) => b.to_string(),
        serde_yaml_ng::Value::Null => String::new(),
        other => format!("{:?}", other),
    }
}

// ============================================================================
// Tests
// ============================================================================
