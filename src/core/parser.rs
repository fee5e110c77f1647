//! PV-002: YAML parsing and validation.
//!
//! Parses provisio.yaml and validates structural constraints:
//! - Version must be "1.0"
//! - Step ids must be unique
//! - depends_on must name an earlier step
//! - Required params per step kind
//! - Checks must be well-formed

use super::types::*;
use crate::resources::build::{archive_name, ArchiveFormat};
use crate::resources::env;
use crate::resources::patch::PatchMode;
use std::collections::HashSet;
use std::path::Path;

/// Validation error.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl ValidationError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Parse a provisio.yaml file from disk.
pub fn parse_list_file(path: &Path) -> Result<StepList, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    parse_list(&content)
}

/// Parse a provisio.yaml from a string.
pub fn parse_list(yaml: &str) -> Result<StepList, String> {
    serde_yaml_ng::from_str(yaml).map_err(|e| format!("YAML parse error: {}", e))
}

/// Parse, resolve templates, then validate. Any problem fails the whole
/// list before a single step runs; all validation errors are reported together.
pub fn load_list_file(path: &Path) -> Result<StepList, String> {
    let list = parse_list_file(path)?;
    let resolved = super::resolver::resolve_list(&list)?;
    let errors = validate_list(&resolved);
    if errors.is_empty() {
        return Ok(resolved);
    }
    let lines: Vec<String> = errors.iter().map(|e| format!("  {}", e)).collect();
    Err(format!(
        "{}: {} validation error(s)\n{}",
        path.display(),
        errors.len(),
        lines.join("\n")
    ))
}

/// Validate a parsed list. Returns a list of errors (empty = valid).
pub fn validate_list(list: &StepList) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if list.version != "1.0" {
        errors.push(ValidationError::new(format!(
            "version must be \"1.0\", got \"{}\"",
            list.version
        )));
    }

    if list.name.trim().is_empty() {
        errors.push(ValidationError::new("name must not be empty"));
    } else if list.name.contains(['/', '\\']) || list.name.starts_with('.') {
        errors.push(ValidationError::new(format!(
            "name '{}' must be usable as a directory name",
            list.name
        )));
    }

    let mut seen: HashSet<String> = HashSet::new();
    for step in &list.steps {
        let id = step.id();

        if step.target.trim().is_empty() {
            errors.push(ValidationError::new(format!(
                "step '{}' ({}) has an empty target",
                id, step.kind
            )));
        }

        for dep in &step.depends_on {
            if dep == &id {
                errors.push(ValidationError::new(format!("step '{}' depends on itself", id)));
            } else if !seen.contains(dep) {
                errors.push(ValidationError::new(format!(
                    "step '{}' depends on '{}', which is not an earlier step",
                    id, dep
                )));
            }
        }

        if !seen.insert(id.clone()) {
            errors.push(ValidationError::new(format!("duplicate step id '{}'", id)));
        }

        for problem in step.check.validate() {
            errors.push(ValidationError::new(format!("step '{}': {}", id, problem)));
        }

        validate_kind(step, &id, &mut errors);
    }

    errors
}

fn validate_kind(step: &Step, id: &str, errors: &mut Vec<ValidationError>) {
    let mut require = |key: &str| {
        if let Err(e) = step.require_param(key) {
            errors.push(ValidationError::new(e));
        }
    };
    match step.kind {
        StepKind::PackageInstall => {}
        StepKind::SourceBuild => {
            require("source");
            require("recipe");
        }
        StepKind::FilePatch => {
            require("pattern");
            if step.param("replacement").is_none() {
                errors.push(ValidationError::new(format!(
                    "step '{}' (file-patch) requires param 'replacement'",
                    id
                )));
            }
        }
        StepKind::EnvExport => {
            if step.param("value").is_none() {
                errors.push(ValidationError::new(format!(
                    "step '{}' (env-export) requires param 'value'",
                    id
                )));
            }
        }
    }

    match step.kind {
        StepKind::PackageInstall => {
            if let Some(m) = step.param("manager") {
                if PackageManager::parse(&m).is_none() {
                    errors.push(ValidationError::new(format!(
                        "step '{}' has unknown package manager '{}'",
                        id, m
                    )));
                }
            }
        }
        StepKind::SourceBuild => {
            if let Some(source) = step.param("source").filter(|s| !s.is_empty()) {
                if ArchiveFormat::detect(&archive_name(&source)).is_none() {
                    errors.push(ValidationError::new(format!(
                        "step '{}' source '{}' is not a supported archive (.tar, .tar.gz, .tgz, .tar.bz2, .tar.zst, .zip)",
                        id, source
                    )));
                }
            }
        }
        StepKind::FilePatch => {
            let mode_name = step.param("mode").unwrap_or_else(|| "literal".to_string());
            match PatchMode::parse(&mode_name) {
                None => errors.push(ValidationError::new(format!(
                    "step '{}' has unknown patch mode '{}' (literal, regex)",
                    id, mode_name
                ))),
                Some(PatchMode::Regex) => {
                    if let Some(pattern) = step.param("pattern") {
                        if let Err(e) = regex::Regex::new(&pattern) {
                            errors.push(ValidationError::new(format!(
                                "step '{}' pattern is not a valid regex: {}",
                                id, e
                            )));
                        }
                    }
                }
                Some(PatchMode::Literal) => {}
            }
        }
        StepKind::EnvExport => {
            if !env::is_valid_name(&step.target) {
                errors.push(ValidationError::new(format!(
                    "step '{}' target '{}' is not a valid variable name",
                    id, step.target
                )));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn messages(list: &StepList) -> Vec<String> {
        validate_list(list).into_iter().map(|e| e.message).collect()
    }

    #[test]
    fn test_pv002_parse_valid() {
        let yaml = r#"
version: "1.0"
name: openpilot-deps
steps:
  - kind: package-install
    target: libzmq3-dev
    check:
      package_installed: libzmq3-dev
  - id: capnp
    kind: source-build
    target: capnproto
    params:
      source: https://capnproto.org/capnproto-c++-1.0.2.tar.gz
      recipe: |
        ./configure --prefix=$PREFIX
        make -j$JOBS install
    check:
      path_exists: /usr/local/bin/capnp
  - kind: file-patch
    target: /srv/openpilot/requirements.txt
    depends_on: [capnp]
    params:
      pattern: "scipy==1.7.1"
      replacement: "scipy>=1.7.1"
    check:
      file_contains: { path: /srv/openpilot/requirements.txt, text: "scipy>=1.7.1" }
  - kind: env-export
    target: PYTHONPATH
    params:
      value: /srv/openpilot
    check:
      file_contains: { path: ~/.bashrc, text: "export PYTHONPATH='/srv/openpilot'" }
"#;
        let list = parse_list(yaml).unwrap();
        assert_eq!(list.name, "openpilot-deps");
        let errors = messages(&list);
        assert!(errors.is_empty(), "unexpected errors: {:?}", errors);
    }

    #[test]
    fn test_pv002_bad_version() {
        let list = parse_list("version: \"2.0\"\nname: t\nsteps: []\n").unwrap();
        assert!(messages(&list).iter().any(|e| e.contains("version")));
    }

    #[test]
    fn test_pv002_bad_name() {
        let list = parse_list("version: \"1.0\"\nname: ../etc\nsteps: []\n").unwrap();
        assert!(messages(&list).iter().any(|e| e.contains("directory name")));
    }

    #[test]
    fn test_pv002_duplicate_ids() {
        let yaml = r#"
version: "1.0"
name: t
steps:
  - kind: package-install
    target: curl
    check: { package_installed: curl }
  - kind: package-install
    target: curl
    check: { package_installed: curl }
"#;
        let list = parse_list(yaml).unwrap();
        assert!(messages(&list)
            .iter()
            .any(|e| e.contains("duplicate step id 'package-install:curl'")));
    }

    #[test]
    fn test_pv002_forward_dependency() {
        let yaml = r#"
version: "1.0"
name: t
steps:
  - id: a
    kind: package-install
    target: curl
    depends_on: [b]
    check: { package_installed: curl }
  - id: b
    kind: package-install
    target: wget
    check: { package_installed: wget }
"#;
        let list = parse_list(yaml).unwrap();
        assert!(messages(&list).iter().any(|e| e.contains("not an earlier step")));
    }

    #[test]
    fn test_pv002_self_dependency() {
        let yaml = r#"
version: "1.0"
name: t
steps:
  - id: a
    kind: package-install
    target: curl
    depends_on: [a]
    check: { package_installed: curl }
"#;
        let list = parse_list(yaml).unwrap();
        assert!(messages(&list).iter().any(|e| e.contains("depends on itself")));
    }

    #[test]
    fn test_pv002_missing_params() {
        let yaml = r#"
version: "1.0"
name: t
steps:
  - kind: source-build
    target: zeromq
    check: { path_exists: /usr/local/lib/libzmq.so }
  - kind: file-patch
    target: /etc/x
    params: { pattern: a }
    check: { command: "false" }
  - kind: env-export
    target: X
    check: { command: "false" }
"#;
        let list = parse_list(yaml).unwrap();
        let errors = messages(&list);
        assert!(errors.iter().any(|e| e.contains("'source'")));
        assert!(errors.iter().any(|e| e.contains("'recipe'")));
        assert!(errors.iter().any(|e| e.contains("'replacement'")));
        assert!(errors.iter().any(|e| e.contains("'value'")));
    }

    #[test]
    fn test_pv002_empty_replacement_allowed() {
        let yaml = r#"
version: "1.0"
name: t
steps:
  - kind: file-patch
    target: /etc/x
    params: { pattern: "debug=1\n", replacement: "" }
    check: { command: "false" }
"#;
        let list = parse_list(yaml).unwrap();
        assert!(messages(&list).is_empty());
    }

    #[test]
    fn test_pv002_kind_specific_values() {
        let yaml = r#"
version: "1.0"
name: t
steps:
  - kind: package-install
    target: left-pad
    params: { manager: npm }
    check: { command: "false" }
  - kind: source-build
    target: thing
    params: { source: https://example.invalid/thing.rar, recipe: make }
    check: { command: "false" }
  - kind: file-patch
    target: /etc/x
    params: { pattern: "(", replacement: "", mode: regex }
    check: { command: "false" }
  - kind: env-export
    target: BAD-NAME
    params: { value: "1" }
    check: { command: "false" }
"#;
        let list = parse_list(yaml).unwrap();
        let errors = messages(&list);
        assert!(errors.iter().any(|e| e.contains("unknown package manager 'npm'")));
        assert!(errors.iter().any(|e| e.contains("supported archive")));
        assert!(errors.iter().any(|e| e.contains("valid regex")));
        assert!(errors.iter().any(|e| e.contains("valid variable name")));
    }

    #[test]
    fn test_pv002_bad_check_reported() {
        let yaml = r#"
version: "1.0"
name: t
steps:
  - id: x
    kind: package-install
    target: curl
    check: { all: [] }
"#;
        let list = parse_list(yaml).unwrap();
        assert!(messages(&list).iter().any(|e| e.contains("step 'x': all check has no members")));
    }

    #[test]
    fn test_pv002_parse_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("provisio.yaml");
        std::fs::write(&path, "version: \"1.0\"\nname: file-test\nsteps: []\n").unwrap();
        let list = parse_list_file(&path).unwrap();
        assert_eq!(list.name, "file-test");
    }

    #[test]
    fn test_pv002_parse_missing_file() {
        let err = parse_list_file(Path::new("/nonexistent/provisio.yaml")).unwrap_err();
        assert!(err.contains("failed to read"));
    }

    #[test]
    fn test_pv002_load_resolves_then_validates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("provisio.yaml");
        std::fs::write(
            &path,
            r#"
version: "1.0"
name: t
params:
  ext: tar.gz
steps:
  - kind: source-build
    target: zeromq
    params:
      source: "https://example.invalid/zeromq.{{params.ext}}"
      recipe: make install
    check: { path_exists: /usr/local/lib/libzmq.so }
"#,
        )
        .unwrap();
        let list = load_list_file(&path).unwrap();
        assert_eq!(
            list.steps[0].param("source").as_deref(),
            Some("https://example.invalid/zeromq.tar.gz")
        );

        std::fs::write(&path, "version: \"1.0\"\nname: t\nsteps:\n  - kind: env-export\n    target: 9X\n    check: { command: \"false\" }\n").unwrap();
        let err = load_list_file(&path).unwrap_err();
        assert!(err.contains("2 validation error(s)"), "{}", err);
    }

    #[test]
    fn test_pv002_load_unknown_template_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("provisio.yaml");
        std::fs::write(
            &path,
            "version: \"1.0\"\nname: t\nsteps:\n  - kind: package-install\n    target: \"{{params.pkg}}\"\n    check: { command: \"false\" }\n",
        )
        .unwrap();
        assert!(load_list_file(&path).unwrap_err().contains("unknown param: pkg"));
    }

    #[test]
    fn test_pv002_parse_invalid_yaml() {
        assert!(parse_list("not: [valid: yaml: {{").is_err());
    }
}
