//! PV-013: State lock management: load, atomic save, record, path derivation.
//!
//! One lock per step list: `<state_dir>/<list name>/state.lock.yaml`.

use super::planner::hash_step;
use super::types::{Outcome, RunResult, StateLock, Step, StepLock};
use crate::tripwire::eventlog::now_iso8601;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Derive the lock file path for a list within the state directory.
pub fn lock_file_path(state_dir: &Path, name: &str) -> PathBuf {
    state_dir.join(name).join("state.lock.yaml")
}

/// Load the lock for a list. Returns None if the file doesn't exist.
pub fn load_lock(state_dir: &Path, name: &str) -> Result<Option<StateLock>, String> {
    let path = lock_file_path(state_dir, name);
    let content = match std::fs::read_to_string(&path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(format!("cannot read {}: {}", path.display(), e)),
    };
    let lock: StateLock = serde_yaml_ng::from_str(&content)
        .map_err(|e| format!("invalid lock file {}: {}", path.display(), e))?;
    Ok(Some(lock))
}

/// Save a lock atomically (temp file in the same directory, then rename).
pub fn save_lock(state_dir: &Path, lock: &StateLock) -> Result<(), String> {
    let path = lock_file_path(state_dir, &lock.name);
    let parent = path
        .parent()
        .ok_or_else(|| format!("lock path {} has no parent", path.display()))?;
    std::fs::create_dir_all(parent)
        .map_err(|e| format!("cannot create dir {}: {}", parent.display(), e))?;

    let yaml = serde_yaml_ng::to_string(lock).map_err(|e| format!("serialize error: {}", e))?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent)
        .map_err(|e| format!("cannot create temp file in {}: {}", parent.display(), e))?;
    tmp.write_all(yaml.as_bytes())
        .map_err(|e| format!("cannot write {}: {}", tmp.path().display(), e))?;
    tmp.persist(&path)
        .map_err(|e| format!("cannot rename into {}: {}", path.display(), e.error))?;

    Ok(())
}

/// Create a new empty lock for a list.
pub fn new_lock(name: &str, run_id: &str) -> StateLock {
    StateLock {
        schema: "1.0".to_string(),
        name: name.to_string(),
        generated_at: now_iso8601(),
        generator: format!("provisio {}", env!("CARGO_PKG_VERSION")),
        run_id: Some(run_id.to_string()),
        steps: indexmap::IndexMap::new(),
    }
}

/// Record one step's result. A skipped step keeps its previous `applied_at`.
pub fn record_result(lock: &mut StateLock, step: &Step, result: &RunResult) {
    let previous_applied = lock
        .steps
        .get(result.step_id())
        .and_then(|s| s.applied_at.clone());
    let applied_at = match result.outcome() {
        Outcome::Succeeded => Some(now_iso8601()),
        Outcome::Skipped | Outcome::Failed => previous_applied,
    };
    lock.steps.insert(
        result.step_id().to_string(),
        StepLock {
            kind: result.kind(),
            target: result.target().to_string(),
            outcome: result.outcome(),
            applied_at,
            duration_seconds: Some(result.duration().as_secs_f64()),
            hash: hash_step(step),
            error: result.error(),
        },
    );
}
