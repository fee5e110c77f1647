//! PV-031: file-patch handler, textual substitution in a target file.
//!
//! Finding no match is a `PatchError`. Whether "no match" means "already
//! patched" is the idempotence check's call, not this handler's.

use crate::core::error::StepError;
use crate::core::types::Step;
use crate::transport;
use std::path::Path;

/// How `pattern` is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchMode {
    Literal,
    Regex,
}

impl PatchMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "literal" => Some(Self::Literal),
            "regex" => Some(Self::Regex),
            _ => None,
        }
    }
}

/// Substitute every occurrence. Returns the new content and the match count.
/// Regex replacements may reference capture groups (`$1`, `${name}`).
pub fn substitute(
    content: &str,
    pattern: &str,
    replacement: &str,
    mode: PatchMode,
) -> Result<(String, usize), String> {
    match mode {
        PatchMode::Literal => {
            let count = content.matches(pattern).count();
            Ok((content.replace(pattern, replacement), count))
        }
        PatchMode::Regex => {
            let re = regex::Regex::new(pattern).map_err(|e| format!("invalid regex: {}", e))?;
            let count = re.find_iter(content).count();
            Ok((re.replace_all(content, replacement).into_owned(), count))
        }
    }
}

/// Apply the step's substitution to its target file.
pub fn apply(step: &Step) -> Result<String, StepError> {
    let target = &step.target;
    let pattern = step
        .require_param("pattern")
        .map_err(|e| StepError::patch(target, e))?;
    let replacement = step
        .param("replacement")
        .ok_or_else(|| StepError::patch(target, "missing param 'replacement'"))?;
    let mode_name = step.param("mode").unwrap_or_else(|| "literal".to_string());
    let mode = PatchMode::parse(&mode_name)
        .ok_or_else(|| StepError::patch(target, format!("unknown patch mode '{}'", mode_name)))?;

    let path = transport::expand_home(target);
    let content = std::fs::read_to_string(&path)
        .map_err(|e| StepError::io(target, format!("cannot read {}: {}", path, e)))?;

    let (patched, count) =
        substitute(&content, &pattern, &replacement, mode).map_err(|e| StepError::patch(target, e))?;
    if count == 0 {
        return Err(StepError::patch(
            target,
            format!("pattern {:?} not found in {}", pattern, path),
        ));
    }

    super::write_atomic(Path::new(&path), &patched)
        .map_err(|e| StepError::io(target, format!("cannot write {}: {}", path, e)))?;

    tracing::info!(file = %path, replacements = count, "patched");
    Ok(format!("{} replacement(s) in {}", count, path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::check::IdempotenceCheck;
    use crate::core::error::ErrorKind;
    use crate::core::types::StepKind;

    fn patch_step(path: &Path, pattern: &str, replacement: &str) -> Step {
        Step::new(
            StepKind::FilePatch,
            path.display().to_string(),
            IdempotenceCheck::FileContains {
                path: path.display().to_string(),
                text: replacement.to_string(),
            },
        )
        .with_param("pattern", pattern)
        .with_param("replacement", replacement)
    }

    #[test]
    fn test_pv031_substitute_literal() {
        let (out, n) = substitute("a==1\nb==1\n", "==1", ">=1", PatchMode::Literal).unwrap();
        assert_eq!(out, "a>=1\nb>=1\n");
        assert_eq!(n, 2);
    }

    #[test]
    fn test_pv031_substitute_literal_metachars() {
        let (out, n) = substitute("x.*y", ".*", "-", PatchMode::Literal).unwrap();
        assert_eq!(out, "x-y");
        assert_eq!(n, 1);
    }

    #[test]
    fn test_pv031_substitute_regex_captures() {
        let (out, n) = substitute(
            "pyzmq==25.1.0\nnumpy==1.24.0\n",
            r"(?m)^(numpy)==[\d.]+$",
            "${1}>=1.24",
            PatchMode::Regex,
        )
        .unwrap();
        assert_eq!(out, "pyzmq==25.1.0\nnumpy>=1.24\n");
        assert_eq!(n, 1);
    }

    #[test]
    fn test_pv031_apply_rewrites_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("requirements.txt");
        std::fs::write(&path, "scipy==1.10.1\nnumpy==1.23.5\n").unwrap();
        let step = patch_step(&path, "numpy==1.23.5", "numpy>=1.23");
        let msg = apply(&step).unwrap();
        assert!(msg.contains("1 replacement"));
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "scipy==1.10.1\nnumpy>=1.23\n"
        );
    }

    #[test]
    fn test_pv031_pattern_not_found_is_patch_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("requirements.txt");
        std::fs::write(&path, "numpy>=1.23\n").unwrap();
        let step = patch_step(&path, "numpy==1.23.5", "numpy>=1.23");
        let err = apply(&step).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PatchError);
        assert!(err.diagnostic().contains("not found"));
        // File untouched
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "numpy>=1.23\n");
    }

    #[test]
    fn test_pv031_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let step = patch_step(&dir.path().join("ghost.txt"), "a", "b");
        assert_eq!(apply(&step).unwrap_err().kind(), ErrorKind::IoError);
    }

    #[test]
    fn test_pv031_empty_replacement_deletes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("setup.cfg");
        std::fs::write(&path, "install_requires = foo<2 # pinned\n").unwrap();
        let step = patch_step(&path, " # pinned", "");
        apply(&step).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "install_requires = foo<2\n");
    }

    #[test]
    fn test_pv031_unknown_mode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        std::fs::write(&path, "a").unwrap();
        let step = patch_step(&path, "a", "b").with_param("mode", "glob");
        assert_eq!(apply(&step).unwrap_err().kind(), ErrorKind::PatchError);
    }
}
