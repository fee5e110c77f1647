//! PV-016: Runner. Applies a step list in declaration order.
//!
//! Steps run strictly one after another. Under stop-on-first-failure no
//! step after a failure is attempted; under continue-and-report every step
//! is attempted and failures are collected. Cancellation is honored at step
//! boundaries only, so a step is never interrupted halfway.

use super::error::ErrorKind;
use super::executor::{self, ExecContext};
use super::state;
use super::types::*;
use crate::tripwire::eventlog;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Shared cancellation flag, set from a signal handler and polled by the runner.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Per-invocation options layered over the list's own policy.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Directory holding `<list name>/events.jsonl` and `state.lock.yaml`
    pub state_dir: PathBuf,
    /// Overrides `policy.failure` when set
    pub failure: Option<FailurePolicy>,
    /// Run only the step with this id
    pub only: Option<String>,
    pub cancel: CancelFlag,
}

impl RunOptions {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
            failure: None,
            only: None,
            cancel: CancelFlag::new(),
        }
    }
}

/// Event sink gated by `policy.event_log`. Write failures are logged, never fatal.
struct Provenance<'a> {
    opts: &'a RunOptions,
    name: &'a str,
    enabled: bool,
}

impl Provenance<'_> {
    fn emit(&self, event: ProvenanceEvent) {
        if !self.enabled {
            return;
        }
        if let Err(e) = eventlog::append_event(&self.opts.state_dir, self.name, event) {
            tracing::warn!(error = %e, "event log write failed");
        }
    }
}

/// Apply a resolved, validated list. `Err` only for problems that prevent
/// the run from starting (unknown `--step` id, unreadable state).
pub fn run(list: &StepList, opts: &RunOptions) -> Result<RunReport, String> {
    let steps: Vec<&Step> = match opts.only {
        Some(ref id) => {
            let step = list
                .steps
                .iter()
                .find(|s| &s.id() == id)
                .ok_or_else(|| format!("no step with id '{}' in '{}'", id, list.name))?;
            vec![step]
        }
        None => list.steps.iter().collect(),
    };

    let policy = opts.failure.unwrap_or(list.policy.failure);
    let ctx = ExecContext::from_settings(&list.settings);
    let run_id = eventlog::generate_run_id();
    let events = Provenance {
        opts,
        name: &list.name,
        enabled: list.policy.event_log,
    };

    let mut lock = if list.policy.state_file {
        let mut lock = match state::load_lock(&opts.state_dir, &list.name)? {
            Some(prev) => prev,
            None => state::new_lock(&list.name, &run_id),
        };
        lock.steps
            .retain(|id, _| list.steps.iter().any(|s| &s.id() == id));
        lock.run_id = Some(run_id.clone());
        lock.generated_at = eventlog::now_iso8601();
        Some(lock)
    } else {
        None
    };

    tracing::info!(list = %list.name, run_id = %run_id, policy = %policy, steps = steps.len(), "run started");
    events.emit(ProvenanceEvent::RunStarted {
        list: list.name.clone(),
        run_id: run_id.clone(),
        policy: policy.to_string(),
        provisio_version: env!("CARGO_PKG_VERSION").to_string(),
    });

    let start = Instant::now();
    let mut report = RunReport::default();

    for step in steps {
        if opts.cancel.is_cancelled() {
            tracing::warn!(completed = report.results.len(), "run cancelled");
            events.emit(ProvenanceEvent::RunCancelled {
                run_id: run_id.clone(),
                completed_steps: report.results.len() as u32,
            });
            report.cancelled = true;
            break;
        }

        let id = step.id();
        tracing::info!(step = %id, kind = %step.kind, target = %step.target, "step");
        events.emit(ProvenanceEvent::StepStarted {
            run_id: run_id.clone(),
            step: id.clone(),
            kind: step.kind,
        });

        let result = executor::execute_step(step, &ctx);
        match result.outcome() {
            Outcome::Succeeded => events.emit(ProvenanceEvent::StepSucceeded {
                run_id: run_id.clone(),
                step: id.clone(),
                duration_seconds: result.duration().as_secs_f64(),
                hash: super::planner::hash_step(step),
            }),
            Outcome::Skipped => events.emit(ProvenanceEvent::StepSkipped {
                run_id: run_id.clone(),
                step: id.clone(),
            }),
            Outcome::Failed => events.emit(ProvenanceEvent::StepFailed {
                run_id: run_id.clone(),
                step: id.clone(),
                error: result.error().unwrap_or(ErrorKind::IoError),
                diagnostic: result.diagnostic().to_string(),
            }),
        }

        if let Some(ref mut lock) = lock {
            state::record_result(lock, step, &result);
        }

        let failed = result.outcome() == Outcome::Failed;
        report.results.push(result);
        if failed && policy == FailurePolicy::StopOnFirstFailure {
            tracing::warn!(step = %id, "stopping after first failure");
            break;
        }
    }

    let summary = report.summary();
    if !report.cancelled {
        events.emit(ProvenanceEvent::RunCompleted {
            run_id: run_id.clone(),
            succeeded: summary.succeeded,
            failed: summary.failed,
            skipped: summary.skipped,
            total_seconds: start.elapsed().as_secs_f64(),
        });
    }
    if let Some(ref lock) = lock {
        if let Err(e) = state::save_lock(&opts.state_dir, lock) {
            tracing::warn!(error = %e, "state lock write failed");
        }
    }
    tracing::info!(
        succeeded = summary.succeeded,
        failed = summary.failed,
        skipped = summary.skipped,
        cancelled = report.cancelled,
        "run finished"
    );

    Ok(report)
}
