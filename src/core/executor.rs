//! PV-012: Executor for a single step.
//!
//! check → (satisfied? skip) → dispatch to handler → verify postcondition.
//! The executor never retries and never touches anything but the step's target.

use super::error::StepError;
use super::types::*;
use crate::resources::{build, env, package, patch};
use crate::transport;
use std::path::PathBuf;
use std::time::Instant;

/// Resolved, machine-local settings handed to every handler.
#[derive(Debug, Clone)]
pub struct ExecContext {
    pub prefix: PathBuf,
    pub profile: PathBuf,
    pub package_manager: PackageManager,
    pub install_command: Option<String>,
    pub query_command: Option<String>,
    pub work_dir: PathBuf,
}

impl ExecContext {
    pub fn from_settings(settings: &Settings) -> Self {
        let work_dir = match settings.work_dir {
            Some(ref w) if !w.is_empty() => PathBuf::from(transport::expand_home(w)),
            _ => std::env::temp_dir(),
        };
        Self {
            prefix: PathBuf::from(transport::expand_home(&settings.prefix)),
            profile: PathBuf::from(transport::expand_home(&settings.profile)),
            package_manager: settings.package_manager,
            install_command: settings.install_command.clone(),
            query_command: settings.query_command.clone(),
            work_dir,
        }
    }
}

/// What executing a step did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepEffect {
    /// Check was satisfied; nothing ran.
    Skipped(String),
    /// Handler ran; carries its output.
    Applied(String),
}

/// Evaluate the step's check and, if unmet, perform the step.
pub fn execute(step: &Step, ctx: &ExecContext) -> Result<StepEffect, StepError> {
    if step.check.is_satisfied(ctx, step)? {
        tracing::debug!(step = %step.id(), check = %step.check.describe(), "check satisfied");
        return Ok(StepEffect::Skipped(format!(
            "already satisfied: {}",
            step.check.describe()
        )));
    }

    let output = match step.kind {
        StepKind::PackageInstall => package::apply(step, ctx)?,
        StepKind::SourceBuild => build::apply(step, ctx)?,
        StepKind::FilePatch => patch::apply(step)?,
        StepKind::EnvExport => env::apply(step, ctx)?,
    };

    // Postcondition: a correct check holds once the step has run
    match step.check.is_satisfied(ctx, step) {
        Ok(true) => Ok(StepEffect::Applied(output)),
        Ok(false) => {
            tracing::warn!(
                step = %step.id(),
                check = %step.check.describe(),
                "step applied but its check is still unmet; re-runs will repeat it"
            );
            Ok(StepEffect::Applied(format!(
                "{}\nwarning: check still unmet after apply: {}",
                output,
                step.check.describe()
            )))
        }
        Err(e) => {
            tracing::warn!(step = %step.id(), error = %e, "postcondition check failed to evaluate");
            Ok(StepEffect::Applied(output))
        }
    }
}

/// Execute a step and package the outcome as an immutable [`RunResult`].
pub fn execute_step(step: &Step, ctx: &ExecContext) -> RunResult {
    let start = Instant::now();
    match execute(step, ctx) {
        Ok(StepEffect::Skipped(msg)) => {
            RunResult::new(step, Outcome::Skipped, None, msg, start.elapsed())
        }
        Ok(StepEffect::Applied(output)) => {
            RunResult::new(step, Outcome::Succeeded, None, output, start.elapsed())
        }
        Err(e) => {
            tracing::warn!(step = %step.id(), kind = %e.kind(), "{}", e);
            RunResult::new(
                step,
                Outcome::Failed,
                Some(e.kind()),
                e.to_string(),
                start.elapsed(),
            )
        }
    }
}
