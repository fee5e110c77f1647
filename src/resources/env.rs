//! PV-032: env-export handler, persisting one variable in a shell startup file.
//!
//! The effect is one file and one line: `export NAME='value'`. An identical
//! line means nothing is written; a stale assignment of the same variable is
//! replaced in place instead of appending a second one.

use crate::core::error::StepError;
use crate::core::executor::ExecContext;
use crate::core::types::Step;
use crate::transport::{self, quote};
use std::path::{Path, PathBuf};

/// `true` for a valid shell variable name.
pub fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c == '_' || c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}

/// The exact line written to the profile.
pub fn export_line(name: &str, value: &str) -> String {
    format!("export {}={}", name, quote(value))
}

/// New profile content with the assignment in place, or `None` if the exact
/// line is already present.
pub fn upsert_export(content: &str, name: &str, value: &str) -> Option<String> {
    let line = export_line(name, value);
    if content.lines().any(|l| l.trim() == line) {
        return None;
    }

    let prefix = format!("export {}=", name);
    let mut replaced = false;
    let mut out: Vec<&str> = Vec::new();
    for l in content.lines() {
        if l.trim_start().starts_with(&prefix) {
            if !replaced {
                out.push(&line);
                replaced = true;
            }
            continue;
        }
        out.push(l);
    }
    if !replaced {
        out.push(&line);
    }

    let mut joined = out.join("\n");
    joined.push('\n');
    Some(joined)
}

/// Profile path for a step: `profile` param, else the configured default.
pub fn profile_for(step: &Step, ctx: &ExecContext) -> PathBuf {
    match step.param("profile") {
        Some(p) if !p.is_empty() => PathBuf::from(transport::expand_home(&p)),
        _ => ctx.profile.clone(),
    }
}

/// Write the step's export into its profile if absent.
pub fn apply(step: &Step, ctx: &ExecContext) -> Result<String, StepError> {
    let name = &step.target;
    if !is_valid_name(name) {
        return Err(StepError::io(name, format!("'{}' is not a valid variable name", name)));
    }
    let value = step
        .param("value")
        .ok_or_else(|| StepError::io(name, "missing param 'value'"))?;
    let profile = profile_for(step, ctx);

    let content = read_profile(&profile).map_err(|e| StepError::io(name, e))?;
    match upsert_export(&content, name, &value) {
        None => Ok(format!("{} already exported in {}", name, profile.display())),
        Some(updated) => {
            super::write_atomic(&profile, &updated).map_err(|e| {
                StepError::io(name, format!("cannot write {}: {}", profile.display(), e))
            })?;
            tracing::info!(variable = %name, profile = %profile.display(), "exported");
            Ok(format!("exported {} in {}", name, profile.display()))
        }
    }
}

fn read_profile(path: &Path) -> Result<String, String> {
    match std::fs::read_to_string(path) {
        Ok(c) => Ok(c),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(format!("cannot read {}: {}", path.display(), e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::check::IdempotenceCheck;
    use crate::core::error::ErrorKind;
    use crate::core::types::{Settings, StepKind};
    use proptest::prelude::*;

    fn export_step(profile: &Path, name: &str, value: &str) -> Step {
        Step::new(
            StepKind::EnvExport,
            name,
            IdempotenceCheck::FileContains {
                path: profile.display().to_string(),
                text: export_line(name, value),
            },
        )
        .with_param("value", value)
        .with_param("profile", profile.display().to_string())
    }

    fn ctx() -> ExecContext {
        ExecContext::from_settings(&Settings::default())
    }

    #[test]
    fn test_pv032_valid_names() {
        assert!(is_valid_name("PYTHONPATH"));
        assert!(is_valid_name("_x1"));
        assert!(!is_valid_name("1X"));
        assert!(!is_valid_name("A-B"));
        assert!(!is_valid_name(""));
    }

    #[test]
    fn test_pv032_export_line_quotes() {
        assert_eq!(export_line("A", "b c"), "export A='b c'");
        assert_eq!(export_line("A", "it's"), r"export A='it'\''s'");
    }

    #[test]
    fn test_pv032_upsert_append() {
        let out = upsert_export("alias ll='ls -l'", "X", "1").unwrap();
        assert_eq!(out, "alias ll='ls -l'\nexport X='1'\n");
    }

    #[test]
    fn test_pv032_upsert_present() {
        assert!(upsert_export("export X='1'\n", "X", "1").is_none());
    }

    #[test]
    fn test_pv032_upsert_replaces_stale_value() {
        let out = upsert_export("export X='0'\necho hi\nexport X=2\n", "X", "1").unwrap();
        assert_eq!(out, "export X='1'\necho hi\n");
    }

    #[test]
    fn test_pv032_upsert_does_not_touch_prefix_names() {
        let out = upsert_export("export XY='0'\n", "X", "1").unwrap();
        assert_eq!(out, "export XY='0'\nexport X='1'\n");
    }

    #[test]
    fn test_pv032_apply_twice_single_line() {
        let dir = tempfile::tempdir().unwrap();
        let profile = dir.path().join(".bashrc");
        std::fs::write(&profile, "# existing\n").unwrap();
        let step = export_step(&profile, "PYTHONPATH", "/srv/openpilot");
        apply(&step, &ctx()).unwrap();
        let msg = apply(&step, &ctx()).unwrap();
        assert!(msg.contains("already exported"));
        let content = std::fs::read_to_string(&profile).unwrap();
        let line = export_line("PYTHONPATH", "/srv/openpilot");
        assert_eq!(content.lines().filter(|l| *l == line).count(), 1);
        assert!(content.starts_with("# existing\n"));
    }

    #[cfg(unix)]
    #[test]
    fn test_pv032_symlinked_profile_keeps_link() {
        let dir = tempfile::tempdir().unwrap();
        let real = dir.path().join("dotfiles-bashrc");
        std::fs::write(&real, "# dotfiles\n").unwrap();
        let profile = dir.path().join(".bashrc");
        std::os::unix::fs::symlink(&real, &profile).unwrap();

        let step = export_step(&profile, "X", "1");
        apply(&step, &ctx()).unwrap();
        assert!(std::fs::symlink_metadata(&profile).unwrap().file_type().is_symlink());
        assert_eq!(std::fs::read_to_string(&real).unwrap(), "# dotfiles\nexport X='1'\n");
        assert!(step.check.is_satisfied(&ctx(), &step).unwrap());
    }

    #[test]
    fn test_pv032_creates_missing_profile() {
        let dir = tempfile::tempdir().unwrap();
        let profile = dir.path().join(".profile");
        apply(&export_step(&profile, "X", "1"), &ctx()).unwrap();
        assert_eq!(std::fs::read_to_string(&profile).unwrap(), "export X='1'\n");
    }

    #[test]
    fn test_pv032_unwritable_profile_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let profile = dir.path().join("missing-dir").join(".bashrc");
        let err = apply(&export_step(&profile, "X", "1"), &ctx()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IoError);
        assert_eq!(err.target(), "X");
    }

    #[test]
    fn test_pv032_invalid_name() {
        let dir = tempfile::tempdir().unwrap();
        let err = apply(&export_step(&dir.path().join("p"), "BAD-NAME", "1"), &ctx()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IoError);
    }

    proptest! {
        #[test]
        fn prop_pv032_upsert_is_idempotent(
            name in "[A-Z_][A-Z0-9_]{0,12}",
            value in "[ -~]{0,24}",
            existing in "[a-z =#']{0,40}",
        ) {
            let once = upsert_export(&existing, &name, &value).unwrap_or_else(|| existing.clone());
            prop_assert!(upsert_export(&once, &name, &value).is_none());
            let line = export_line(&name, &value);
            prop_assert_eq!(once.lines().filter(|l| l.trim() == line).count(), 1);
        }
    }
}
