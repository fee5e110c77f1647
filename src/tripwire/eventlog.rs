//! PV-015: Append-only JSONL provenance event log.
//!
//! One log per step list: `<state_dir>/<list name>/events.jsonl`.

use crate::core::types::{ProvenanceEvent, TimestampedEvent};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Current UTC time as ISO 8601 (`2026-02-16T14:00:00Z`).
pub fn now_iso8601() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    format_iso8601(secs)
}

/// Format seconds since the Unix epoch as ISO 8601 UTC.
pub fn format_iso8601(secs: u64) -> String {
    let (y, m, d) = civil_from_days((secs / 86400) as i64);
    let t = secs % 86400;
    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}Z",
        y,
        m,
        d,
        t / 3600,
        (t % 3600) / 60,
        t % 60
    )
}

/// Days since 1970-01-01 to a proleptic Gregorian (year, month, day).
fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    let y = yoe + era * 400 + i64::from(m <= 2);
    (y, m, d)
}

/// Generate a run ID.
pub fn generate_run_id() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    format!("r-{:012x}", nanos & 0xFFFF_FFFF_FFFF)
}

/// Derive the event log path for a list.
pub fn event_log_path(state_dir: &Path, name: &str) -> PathBuf {
    state_dir.join(name).join("events.jsonl")
}

/// Append an event to the list's event log.
pub fn append_event(state_dir: &Path, name: &str, event: ProvenanceEvent) -> Result<(), String> {
    let path = event_log_path(state_dir, name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| format!("cannot create state dir: {}", e))?;
    }

    let te = TimestampedEvent {
        ts: now_iso8601(),
        event,
    };
    let json = serde_json::to_string(&te).map_err(|e| format!("JSON serialize error: {}", e))?;

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|e| format!("cannot open event log {}: {}", path.display(), e))?;

    writeln!(file, "{}", json).map_err(|e| format!("write error: {}", e))?;

    Ok(())
}

/// Read every event in the list's log, oldest first. A missing log is empty.
/// Unparseable lines are skipped with a warning.
pub fn read_events(state_dir: &Path, name: &str) -> Result<Vec<TimestampedEvent>, String> {
    let path = event_log_path(state_dir, name);
    let file = match std::fs::File::open(&path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(format!("cannot open event log {}: {}", path.display(), e)),
    };

    let mut events = Vec::new();
    for (n, line) in std::io::BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| format!("read error {}: {}", path.display(), e))?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<TimestampedEvent>(&line) {
            Ok(ev) => events.push(ev),
            Err(e) => tracing::warn!(log = %path.display(), line = n + 1, error = %e, "skipping bad event"),
        }
    }
    Ok(events)
}
