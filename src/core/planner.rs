//! PV-005: Plan generation. Evaluates every check without applying anything.
//!
//! A plan answers "what would `run` do right now?". Checks are queries, so
//! evaluating them is side-effect free; handlers are never invoked. When a
//! previous state lock exists, steps whose definition changed since the last
//! run are flagged.

use super::executor::ExecContext;
use super::types::*;
use crate::tripwire::hasher;

/// Generate an execution plan for `list` against the current machine.
pub fn plan(list: &StepList, ctx: &ExecContext, lock: Option<&StateLock>) -> ExecutionPlan {
    let mut steps = Vec::new();
    let mut to_run = 0u32;
    let mut satisfied = 0u32;
    let mut unknown = 0u32;

    for step in &list.steps {
        let action = match step.check.is_satisfied(ctx, step) {
            Ok(true) => PlanAction::Skip,
            Ok(false) => PlanAction::Run,
            Err(e) => PlanAction::Unknown(e.to_string()),
        };
        match action {
            PlanAction::Run => to_run += 1,
            PlanAction::Skip => satisfied += 1,
            PlanAction::Unknown(_) => unknown += 1,
        }
        let description = describe_action(step, &action, lock);
        steps.push(PlannedStep {
            step_id: step.id(),
            kind: step.kind,
            action,
            description,
        });
    }

    ExecutionPlan {
        name: list.name.clone(),
        steps,
        to_run,
        satisfied,
        unknown,
    }
}

/// Hash of everything that defines a step's effect.
pub fn hash_step(step: &Step) -> String {
    let kind = step.kind.to_string();
    let check = serde_json::to_string(&step.check).unwrap_or_else(|_| step.check.describe());
    let mut components: Vec<String> = vec![kind, step.target.clone()];
    for (key, value) in &step.params {
        components.push(format!("{}={}", key, yaml_value_to_string(value)));
    }
    components.push(check);
    let refs: Vec<&str> = components.iter().map(String::as_str).collect();
    hasher::composite_hash(&refs)
}

fn describe_action(step: &Step, action: &PlanAction, lock: Option<&StateLock>) -> String {
    let what = match step.kind {
        StepKind::PackageInstall => format!("install package {}", step.target),
        StepKind::SourceBuild => format!("build {} from source", step.target),
        StepKind::FilePatch => format!("patch {}", step.target),
        StepKind::EnvExport => format!("export {}", step.target),
    };
    let changed = lock
        .and_then(|l| l.steps.get(&step.id()))
        .is_some_and(|prev| prev.hash != hash_step(step));

    match action {
        PlanAction::Run if changed => format!("{} (definition changed since last run)", what),
        PlanAction::Run => what,
        PlanAction::Skip => format!("{}: already satisfied", what),
        PlanAction::Unknown(e) => format!("{}: check failed: {}", what, e),
    }
}
