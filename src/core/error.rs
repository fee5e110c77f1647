//! PV-007: Step failure kinds.
//!
//! Every step failure carries the step's target and the diagnostic output
//! that explains it, so the final report can be acted on without re-running.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Failure raised while executing a step.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StepError {
    /// The package manager exited non-zero.
    #[error("package install failed for {target}: {diagnostic}")]
    Package { target: String, diagnostic: String },

    /// A source-build sub-step failed.
    #[error("build of {target} failed at `{command}`: {diagnostic}")]
    Build {
        target: String,
        command: String,
        diagnostic: String,
    },

    /// The substitution pattern was not found in the file.
    #[error("patch of {target} failed: {diagnostic}")]
    Patch { target: String, diagnostic: String },

    /// Reading or writing a file, or spawning a process, failed.
    #[error("I/O error on {target}: {diagnostic}")]
    Io { target: String, diagnostic: String },
}

impl StepError {
    pub fn package(target: &str, diagnostic: impl Into<String>) -> Self {
        Self::Package {
            target: target.to_string(),
            diagnostic: diagnostic.into(),
        }
    }

    pub fn build(target: &str, command: impl Into<String>, diagnostic: impl Into<String>) -> Self {
        Self::Build {
            target: target.to_string(),
            command: command.into(),
            diagnostic: diagnostic.into(),
        }
    }

    pub fn patch(target: &str, diagnostic: impl Into<String>) -> Self {
        Self::Patch {
            target: target.to_string(),
            diagnostic: diagnostic.into(),
        }
    }

    pub fn io(target: &str, diagnostic: impl Into<String>) -> Self {
        Self::Io {
            target: target.to_string(),
            diagnostic: diagnostic.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Package { .. } => ErrorKind::PackageError,
            Self::Build { .. } => ErrorKind::BuildError,
            Self::Patch { .. } => ErrorKind::PatchError,
            Self::Io { .. } => ErrorKind::IoError,
        }
    }

    pub fn target(&self) -> &str {
        match self {
            Self::Package { target, .. }
            | Self::Build { target, .. }
            | Self::Patch { target, .. }
            | Self::Io { target, .. } => target,
        }
    }

    pub fn diagnostic(&self) -> &str {
        match self {
            Self::Package { diagnostic, .. }
            | Self::Build { diagnostic, .. }
            | Self::Patch { diagnostic, .. }
            | Self::Io { diagnostic, .. } => diagnostic,
        }
    }
}

/// Discriminant of [`StepError`], recorded in events and the state lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    PackageError,
    BuildError,
    PatchError,
    #[serde(rename = "IOError")]
    IoError,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PackageError => write!(f, "PackageError"),
            Self::BuildError => write!(f, "BuildError"),
            Self::PatchError => write!(f, "PatchError"),
            Self::IoError => write!(f, "IOError"),
        }
    }
}
