//! PV-017: CLI subcommands (run, plan, validate, status, init).

use crate::core::runner::{self, CancelFlag, RunOptions};
use crate::core::{executor, parser, planner, resolver, state, types};
use crate::tripwire::eventlog;
use clap::Subcommand;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create a starter provisio.yaml
    Init {
        /// Directory to initialize (default: current)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Validate provisio.yaml without running anything
    Validate {
        /// Path to provisio.yaml
        #[arg(short, long, default_value = "provisio.yaml")]
        file: PathBuf,
    },

    /// Evaluate every check and show which steps would run
    Plan {
        /// Path to provisio.yaml
        #[arg(short, long, default_value = "provisio.yaml")]
        file: PathBuf,

        /// State directory
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,
    },

    /// Apply the step list in order
    Run {
        /// Path to provisio.yaml
        #[arg(short, long, default_value = "provisio.yaml")]
        file: PathBuf,

        /// Halt at the first failed step (overrides policy)
        #[arg(long, conflicts_with = "continue_on_error")]
        stop_on_error: bool,

        /// Attempt every step and report all failures (overrides policy)
        #[arg(long)]
        continue_on_error: bool,

        /// Run a single step by id
        #[arg(long)]
        step: Option<String>,

        /// State directory
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,
    },

    /// Show the last recorded outcome of each step
    Status {
        /// State directory
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,

        /// Only this step list
        #[arg(short, long)]
        name: Option<String>,
    },
}

/// Install the stderr tracing subscriber. `PROVISIO_LOG` takes precedence
/// over `-v` flags; stdout stays reserved for command output.
pub fn init_logging(verbosity: u8) {
    let default = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_env("PROVISIO_LOG").unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Dispatch a CLI command.
pub fn dispatch(cmd: Commands, cancel: CancelFlag) -> Result<(), String> {
    match cmd {
        Commands::Init { path } => cmd_init(&path),
        Commands::Validate { file } => cmd_validate(&file),
        Commands::Plan { file, state_dir } => cmd_plan(&file, &state_dir),
        Commands::Run {
            file,
            stop_on_error,
            continue_on_error,
            step,
            state_dir,
        } => {
            let failure = if stop_on_error {
                Some(types::FailurePolicy::StopOnFirstFailure)
            } else if continue_on_error {
                Some(types::FailurePolicy::ContinueAndReport)
            } else {
                None
            };
            let opts = RunOptions {
                state_dir,
                failure,
                only: step,
                cancel,
            };
            cmd_run(&file, &opts)
        }
        Commands::Status { state_dir, name } => cmd_status(&state_dir, name.as_deref()),
    }
}

const STARTER: &str = r#"version: "1.0"
name: my-machine
description: "Managed by provisio"

params: {}

settings:
  prefix: /usr/local
  profile: ~/.bashrc
  package_manager: apt

policy:
  failure: stop_on_first_failure
  event_log: true
  state_file: true

steps:
  - kind: package-install
    target: curl
    check:
      package_installed: curl
"#;

fn cmd_init(path: &Path) -> Result<(), String> {
    let list_path = path.join("provisio.yaml");
    if list_path.exists() {
        return Err(format!("{} already exists", list_path.display()));
    }
    std::fs::create_dir_all(path)
        .map_err(|e| format!("cannot create {}: {}", path.display(), e))?;
    std::fs::write(&list_path, STARTER)
        .map_err(|e| format!("cannot write {}: {}", list_path.display(), e))?;

    println!("Initialized provisio at {}", path.display());
    println!("  Created: {}", list_path.display());
    Ok(())
}

fn cmd_validate(file: &Path) -> Result<(), String> {
    let list = parser::parse_list_file(file)?;
    let resolved = resolver::resolve_list(&list)?;
    let errors = parser::validate_list(&resolved);

    if errors.is_empty() {
        println!("OK: {} ({} steps)", resolved.name, resolved.steps.len());
        Ok(())
    } else {
        for e in &errors {
            eprintln!("  ERROR: {}", e);
        }
        Err(format!("{} validation error(s)", errors.len()))
    }
}

fn cmd_plan(file: &Path, state_dir: &Path) -> Result<(), String> {
    let list = parser::load_list_file(file)?;
    let ctx = executor::ExecContext::from_settings(&list.settings);
    let lock = state::load_lock(state_dir, &list.name)?;
    let plan = planner::plan(&list, &ctx, lock.as_ref());
    print!("{}", format_plan(&plan));
    Ok(())
}

/// Render a plan for the terminal.
fn format_plan(plan: &types::ExecutionPlan) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Planning: {} ({} steps)", plan.name, plan.steps.len());
    let _ = writeln!(out);
    for s in &plan.steps {
        let symbol = match s.action {
            types::PlanAction::Run => "+",
            types::PlanAction::Skip => " ",
            types::PlanAction::Unknown(_) => "?",
        };
        let _ = writeln!(out, "  {} {}: {}", symbol, s.step_id, s.description);
    }
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "Plan: {} to run, {} already satisfied, {} unknown.",
        plan.to_run, plan.satisfied, plan.unknown
    );
    out
}

fn cmd_run(file: &Path, opts: &RunOptions) -> Result<(), String> {
    let list = parser::load_list_file(file)?;
    let report = runner::run(&list, opts)?;
    print!("{}", format_report(&list, &report));

    if report.cancelled {
        return Err("run cancelled".to_string());
    }
    let failed = report.summary().failed;
    if failed > 0 {
        return Err(format!("{} step(s) failed", failed));
    }
    Ok(())
}

/// Render a run report: one line per attempted step, then every failure
/// with its diagnostic, then totals.
fn format_report(list: &types::StepList, report: &types::RunReport) -> String {
    let mut out = String::new();
    for r in &report.results {
        let _ = writeln!(
            out,
            "{:<9} {} [{}] ({:.1}s)",
            r.outcome().to_string(),
            r.step_id(),
            r.kind(),
            r.duration().as_secs_f64()
        );
    }

    let not_attempted = list.steps.len().saturating_sub(report.results.len());
    let failures: Vec<&types::RunResult> = report.failures().collect();
    if !failures.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "Failures:");
        for r in failures {
            let kind = r.error().map(|k| k.to_string()).unwrap_or_default();
            let _ = writeln!(out, "  {} ({}) {}: {}", r.step_id(), r.kind(), kind, r.target());
            for line in r.diagnostic().lines() {
                let _ = writeln!(out, "    | {}", line);
            }
        }
    }

    let s = report.summary();
    let _ = writeln!(out);
    if report.cancelled {
        let _ = writeln!(
            out,
            "Run cancelled: {} succeeded, {} skipped, {} failed, {} not attempted.",
            s.succeeded, s.skipped, s.failed, not_attempted
        );
    } else if s.failed > 0 {
        let _ = writeln!(
            out,
            "Run completed with errors: {} succeeded, {} skipped, {} FAILED, {} not attempted.",
            s.succeeded, s.skipped, s.failed, not_attempted
        );
    } else {
        let _ = writeln!(
            out,
            "Run complete: {} succeeded, {} skipped.",
            s.succeeded, s.skipped
        );
    }
    out
}

fn cmd_status(state_dir: &Path, name_filter: Option<&str>) -> Result<(), String> {
    let entries = match std::fs::read_dir(state_dir) {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            println!("No state found. Run `provisio run` first.");
            return Ok(());
        }
        Err(e) => return Err(format!("cannot read state dir {}: {}", state_dir.display(), e)),
    };

    let mut names: Vec<String> = entries
        .flatten()
        .filter(|e| e.path().is_dir())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .filter(|n| name_filter.is_none_or(|f| f == n))
        .collect();
    names.sort();

    let mut found = false;
    for name in names {
        if let Some(lock) = state::load_lock(state_dir, &name)? {
            found = true;
            print!("{}", format_status(&lock, last_run_line(state_dir, &name).as_deref()));
        }
    }

    if !found {
        println!("No state found. Run `provisio run` first.");
    }
    Ok(())
}

/// Summary of the most recent finished run in the event log, if any.
fn last_run_line(state_dir: &Path, name: &str) -> Option<String> {
    let events = match eventlog::read_events(state_dir, name) {
        Ok(ev) => ev,
        Err(e) => {
            tracing::warn!(list = %name, error = %e, "cannot read event log");
            return None;
        }
    };
    events.iter().rev().find_map(|te| match te.event {
        types::ProvenanceEvent::RunCompleted {
            succeeded,
            failed,
            skipped,
            total_seconds,
            ..
        } => Some(format!(
            "{}: {} succeeded, {} skipped, {} failed ({:.1}s)",
            te.ts, succeeded, skipped, failed, total_seconds
        )),
        types::ProvenanceEvent::RunCancelled { completed_steps, .. } => Some(format!(
            "{}: cancelled after {} step(s)",
            te.ts, completed_steps
        )),
        _ => None,
    })
}

fn format_status(lock: &types::StateLock, last_run: Option<&str>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "List: {}", lock.name);
    let _ = writeln!(out, "  Generated: {}", lock.generated_at);
    let _ = writeln!(out, "  Generator: {}", lock.generator);
    if let Some(line) = last_run {
        let _ = writeln!(out, "  Last run:  {}", line);
    }
    let _ = writeln!(out, "  Steps: {}", lock.steps.len());
    for (id, sl) in &lock.steps {
        let duration = sl
            .duration_seconds
            .map(|d| format!(" ({:.2}s)", d))
            .unwrap_or_default();
        let error = sl.error.map(|k| format!(" {}", k)).unwrap_or_default();
        let _ = writeln!(
            out,
            "    {}: {}{} [{}]{}",
            id, sl.outcome, error, sl.kind, duration
        );
    }
    let _ = writeln!(out);
    out
}
