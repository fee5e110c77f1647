//! PV-003: Idempotence checks.
//!
//! A check answers one question before a step runs: is the step's effect
//! already present? A satisfied check means the step is skipped untouched.
//!
//! ```yaml
//! check:
//!   all:
//!     - path_exists: /usr/local/lib/libzmq.so*
//!     - file_contains: { path: ~/.bashrc, text: "export ZMQ_HOME" }
//! ```

use super::error::StepError;
use super::executor::ExecContext;
use super::types::{PackageManager, Step};
use crate::resources::package;
use crate::transport;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Condition evaluated before a step; `true` means "already done".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdempotenceCheck {
    /// Shell command; satisfied on exit 0.
    Command(String),
    /// Path or glob; satisfied when anything matches.
    PathExists(String),
    /// Satisfied when the file contains `text` verbatim.
    FileContains { path: String, text: String },
    /// Satisfied when the file matches the regex `pattern`.
    FileMatches { path: String, pattern: String },
    /// Satisfied when the package manager reports the package installed.
    PackageInstalled(String),
    All(Vec<IdempotenceCheck>),
    Any(Vec<IdempotenceCheck>),
    Not(Box<IdempotenceCheck>),
}

impl IdempotenceCheck {
    /// Evaluate the check for its owning step. The step's target names I/O
    /// errors and its `manager` param selects the package query.
    pub fn is_satisfied(&self, ctx: &ExecContext, step: &Step) -> Result<bool, StepError> {
        let target = step.target.as_str();
        match self {
            Self::Command(cmd) => {
                let out = transport::exec_script(cmd).map_err(|e| StepError::io(target, e))?;
                Ok(out.success())
            }
            Self::PathExists(pattern) => path_exists(pattern).map_err(|e| StepError::io(target, e)),
            Self::FileContains { path, text } => {
                Ok(read_if_exists(path, target)?.is_some_and(|c| c.contains(text.as_str())))
            }
            Self::FileMatches { path, pattern } => {
                let re = regex::Regex::new(pattern)
                    .map_err(|e| StepError::io(target, format!("invalid regex: {}", e)))?;
                Ok(read_if_exists(path, target)?.is_some_and(|c| re.is_match(&c)))
            }
            Self::PackageInstalled(name) => {
                let manager = step.param("manager").and_then(|m| PackageManager::parse(&m));
                let script = package::query_script(ctx, manager, name);
                let out = transport::exec_script(&script).map_err(|e| StepError::io(target, e))?;
                Ok(out.success())
            }
            Self::All(checks) => {
                for c in checks {
                    if !c.is_satisfied(ctx, step)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Self::Any(checks) => {
                for c in checks {
                    if c.is_satisfied(ctx, step)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Self::Not(inner) => Ok(!inner.is_satisfied(ctx, step)?),
        }
    }

    /// Structural problems (empty operands, bad regexes). Empty = valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        self.collect_errors(&mut errors);
        errors
    }

    fn collect_errors(&self, errors: &mut Vec<String>) {
        match self {
            Self::Command(s) | Self::PathExists(s) | Self::PackageInstalled(s) => {
                if s.trim().is_empty() {
                    errors.push(format!("{} check has an empty operand", self.name()));
                }
            }
            Self::FileContains { path, text } => {
                if path.is_empty() || text.is_empty() {
                    errors.push("file_contains check needs path and text".to_string());
                }
            }
            Self::FileMatches { path, pattern } => {
                if path.is_empty() {
                    errors.push("file_matches check needs a path".to_string());
                }
                if let Err(e) = regex::Regex::new(pattern) {
                    errors.push(format!("file_matches pattern is not a valid regex: {}", e));
                }
            }
            Self::All(checks) | Self::Any(checks) => {
                if checks.is_empty() {
                    errors.push(format!("{} check has no members", self.name()));
                }
                for c in checks {
                    c.collect_errors(errors);
                }
            }
            Self::Not(inner) => inner.collect_errors(errors),
        }
    }

    /// Rebuild the check with every string operand passed through `f`.
    pub fn map_operands<F>(&self, f: &mut F) -> Result<Self, String>
    where
        F: FnMut(&str) -> Result<String, String>,
    {
        Ok(match self {
            Self::Command(s) => Self::Command(f(s)?),
            Self::PathExists(s) => Self::PathExists(f(s)?),
            Self::PackageInstalled(s) => Self::PackageInstalled(f(s)?),
            Self::FileContains { path, text } => Self::FileContains {
                path: f(path)?,
                text: f(text)?,
            },
            Self::FileMatches { path, pattern } => Self::FileMatches {
                path: f(path)?,
                pattern: f(pattern)?,
            },
            Self::All(checks) => Self::All(
                checks
                    .iter()
                    .map(|c| c.map_operands(f))
                    .collect::<Result<_, _>>()?,
            ),
            Self::Any(checks) => Self::Any(
                checks
                    .iter()
                    .map(|c| c.map_operands(f))
                    .collect::<Result<_, _>>()?,
            ),
            Self::Not(inner) => Self::Not(Box::new(inner.map_operands(f)?)),
        })
    }

    /// One-line rendering for plans and logs.
    pub fn describe(&self) -> String {
        match self {
            Self::Command(s) => format!("command `{}`", s),
            Self::PathExists(s) => format!("path {} exists", s),
            Self::FileContains { path, text } => format!("{} contains {:?}", path, text),
            Self::FileMatches { path, pattern } => format!("{} matches /{}/", path, pattern),
            Self::PackageInstalled(s) => format!("package {} installed", s),
            Self::All(checks) => format!(
                "all({})",
                checks.iter().map(Self::describe).collect::<Vec<_>>().join(", ")
            ),
            Self::Any(checks) => format!(
                "any({})",
                checks.iter().map(Self::describe).collect::<Vec<_>>().join(", ")
            ),
            Self::Not(inner) => format!("not({})", inner.describe()),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Command(_) => "command",
            Self::PathExists(_) => "path_exists",
            Self::FileContains { .. } => "file_contains",
            Self::FileMatches { .. } => "file_matches",
            Self::PackageInstalled(_) => "package_installed",
            Self::All(_) => "all",
            Self::Any(_) => "any",
            Self::Not(_) => "not",
        }
    }
}

fn path_exists(pattern: &str) -> Result<bool, String> {
    let expanded = transport::expand_home(pattern);
    if !expanded.contains(['*', '?', '[']) {
        return Ok(Path::new(&expanded).exists());
    }
    let mut matches =
        glob::glob(&expanded).map_err(|e| format!("invalid glob '{}': {}", expanded, e))?;
    Ok(matches.any(|m| m.is_ok()))
}

/// File contents, or `None` when the file does not exist.
fn read_if_exists(path: &str, target: &str) -> Result<Option<String>, StepError> {
    let expanded = transport::expand_home(path);
    match std::fs::read(&expanded) {
        Ok(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StepError::io(target, format!("cannot read {}: {}", expanded, e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Settings, StepKind};

    fn ctx() -> ExecContext {
        ExecContext::from_settings(&Settings::default())
    }

    fn owner(target: &str) -> Step {
        Step::new(StepKind::PackageInstall, target, IdempotenceCheck::Command("true".into()))
    }

    #[test]
    fn test_pv003_parse_variants() {
        let yaml = r#"
all:
  - command: "true"
  - path_exists: /usr/local/lib/libzmq.so*
  - file_contains: { path: ~/.bashrc, text: "export X=1" }
  - not:
      package_installed: curl
"#;
        let check: IdempotenceCheck = serde_yaml_ng::with::singleton_map_recursive::deserialize(
            serde_yaml_ng::Deserializer::from_str(yaml),
        )
        .unwrap();
        match check {
            IdempotenceCheck::All(ref members) => assert_eq!(members.len(), 4),
            other => panic!("expected all, got {:?}", other),
        }
    }

    #[test]
    fn test_pv003_command() {
        let c = ctx();
        assert!(IdempotenceCheck::Command("true".into()).is_satisfied(&c, &owner("t")).unwrap());
        assert!(!IdempotenceCheck::Command("exit 3".into()).is_satisfied(&c, &owner("t")).unwrap());
    }

    #[test]
    fn test_pv003_path_exists_and_glob() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("libzmq.so.5.2.4"), "").unwrap();
        let c = ctx();
        let exact = dir.path().join("libzmq.so.5.2.4").display().to_string();
        let glob = format!("{}/libzmq.so*", dir.path().display());
        let missing = format!("{}/libcapnp*", dir.path().display());
        assert!(IdempotenceCheck::PathExists(exact).is_satisfied(&c, &owner("t")).unwrap());
        assert!(IdempotenceCheck::PathExists(glob).is_satisfied(&c, &owner("t")).unwrap());
        assert!(!IdempotenceCheck::PathExists(missing).is_satisfied(&c, &owner("t")).unwrap());
    }

    #[test]
    fn test_pv003_file_contains_missing_file_is_unsatisfied() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope").display().to_string();
        let check = IdempotenceCheck::FileContains { path, text: "x".into() };
        assert!(!check.is_satisfied(&ctx(), &owner("t")).unwrap());
    }

    #[test]
    fn test_pv003_file_contains_and_matches() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("requirements.txt");
        std::fs::write(&path, "numpy>=1.24\npyzmq==25.1.0\n").unwrap();
        let p = path.display().to_string();
        let c = ctx();
        let contains = IdempotenceCheck::FileContains { path: p.clone(), text: "pyzmq==25".into() };
        assert!(contains.is_satisfied(&c, &owner("t")).unwrap());
        let matches = IdempotenceCheck::FileMatches { path: p.clone(), pattern: r"^pyzmq==\d+".into() };
        assert!(!matches.is_satisfied(&c, &owner("t")).unwrap(), "regex is not multiline");
        let multi = IdempotenceCheck::FileMatches { path: p, pattern: r"(?m)^pyzmq==\d+".into() };
        assert!(multi.is_satisfied(&c, &owner("t")).unwrap());
    }

    #[test]
    fn test_pv003_read_directory_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let check = IdempotenceCheck::FileContains {
            path: dir.path().display().to_string(),
            text: "x".into(),
        };
        let err = check.is_satisfied(&ctx(), &owner("profile")).unwrap_err();
        assert_eq!(err.kind(), crate::core::error::ErrorKind::IoError);
        assert_eq!(err.target(), "profile");
    }

    #[test]
    fn test_pv003_combinators() {
        let c = ctx();
        let t = || IdempotenceCheck::Command("true".into());
        let f = || IdempotenceCheck::Command("false".into());
        assert!(IdempotenceCheck::All(vec![t(), t()]).is_satisfied(&c, &owner("x")).unwrap());
        assert!(!IdempotenceCheck::All(vec![t(), f()]).is_satisfied(&c, &owner("x")).unwrap());
        assert!(IdempotenceCheck::Any(vec![f(), t()]).is_satisfied(&c, &owner("x")).unwrap());
        assert!(!IdempotenceCheck::Any(vec![f(), f()]).is_satisfied(&c, &owner("x")).unwrap());
        assert!(IdempotenceCheck::Not(Box::new(f())).is_satisfied(&c, &owner("x")).unwrap());
    }

    #[test]
    fn test_pv003_package_installed_uses_query_override() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("curl"), "").unwrap();
        let mut c = ctx();
        c.query_command = Some(format!("test -e {}/{{package}}", dir.path().display()));
        assert!(IdempotenceCheck::PackageInstalled("curl".into()).is_satisfied(&c, &owner("curl")).unwrap());
        assert!(!IdempotenceCheck::PackageInstalled("wget".into()).is_satisfied(&c, &owner("wget")).unwrap());
    }

    #[test]
    fn test_pv003_package_installed_follows_step_manager() {
        let mut c = ctx();
        c.package_manager = PackageManager::Apt;
        // No distro package is named `true`, but cargo's query is `command -v`
        let check = IdempotenceCheck::PackageInstalled("true".into());
        assert!(!check.is_satisfied(&c, &owner("true")).unwrap());
        let pinned = owner("true").with_param("manager", "cargo");
        assert!(check.is_satisfied(&c, &pinned).unwrap());
    }

    #[test]
    fn test_pv003_validate() {
        assert!(IdempotenceCheck::Command("true".into()).validate().is_empty());
        assert_eq!(IdempotenceCheck::Command("  ".into()).validate().len(), 1);
        let bad = IdempotenceCheck::FileMatches { path: "/x".into(), pattern: "(".into() };
        assert!(bad.validate()[0].contains("regex"));
        let nested = IdempotenceCheck::Not(Box::new(IdempotenceCheck::All(vec![])));
        assert!(nested.validate()[0].contains("no members"));
    }

    #[test]
    fn test_pv003_map_operands() {
        let check = IdempotenceCheck::Any(vec![
            IdempotenceCheck::PathExists("{{p}}/lib".into()),
            IdempotenceCheck::FileContains { path: "{{p}}/x".into(), text: "t".into() },
        ]);
        let mapped = check
            .map_operands(&mut |s: &str| Ok(s.replace("{{p}}", "/opt")))
            .unwrap();
        assert_eq!(mapped.describe(), "any(path /opt/lib exists, /opt/x contains \"t\")");
    }
}
