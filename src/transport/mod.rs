//! PV-010: Shell execution layer.
//!
//! Every command a step runs goes through here, so output capture, quoting,
//! and `~` expansion behave the same for checks, installs, and build recipes.

pub mod local;

use std::path::{Path, PathBuf};

/// Output from executing a script.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Stdout and stderr joined for diagnostics, trimmed.
    pub fn combined(&self) -> String {
        let out = self.stdout.trim();
        let err = self.stderr.trim();
        match (out.is_empty(), err.is_empty()) {
            (true, true) => format!("exit code {}", self.exit_code),
            (false, true) => out.to_string(),
            (true, false) => err.to_string(),
            (false, false) => format!("{}\n{}", out, err),
        }
    }
}

/// Working directory and extra environment for a script.
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    pub dir: Option<PathBuf>,
    pub env: Vec<(String, String)>,
}

impl ExecOptions {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            dir: Some(dir.to_path_buf()),
            env: Vec::new(),
        }
    }

    pub fn env(mut self, key: &str, value: impl Into<String>) -> Self {
        self.env.push((key.to_string(), value.into()));
        self
    }
}

/// Execute a shell script on this machine.
pub fn exec_script(script: &str) -> Result<ExecOutput, String> {
    local::exec_local(script, &ExecOptions::default())
}

/// Execute a shell script with a working directory and environment.
pub fn exec_with(script: &str, opts: &ExecOptions) -> Result<ExecOutput, String> {
    local::exec_local(script, opts)
}

/// Single-quote a string for bash, escaping embedded quotes.
pub fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Expand a leading `~/` to `$HOME` (avoids byte indexing).
pub fn expand_home(path: &str) -> String {
    if path == "~" {
        return std::env::var("HOME").unwrap_or_else(|_| path.to_string());
    }
    if let Some(rest) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return format!("{}/{}", home.trim_end_matches('/'), rest);
        }
    }
    path.to_string()
}
