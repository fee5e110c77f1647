//! PV-020: package-install handler (apt, dnf, pacman, brew, pip, cargo).
//!
//! Package names are always single-quoted in generated shell (injection prevention).

use crate::core::error::StepError;
use crate::core::executor::ExecContext;
use crate::core::types::{PackageManager, Step};
use crate::transport::{self, quote};

/// Manager for a step: `manager` param, else the configured default.
pub fn manager_for(step: &Step, ctx: &ExecContext) -> Result<PackageManager, StepError> {
    match step.param("manager") {
        Some(m) => PackageManager::parse(&m)
            .ok_or_else(|| StepError::package(&step.target, format!("unknown package manager '{}'", m))),
        None => Ok(ctx.package_manager),
    }
}

/// Package spec with an optional version pin in the manager's syntax.
fn package_spec(manager: PackageManager, name: &str, version: Option<&str>) -> String {
    match (manager, version) {
        (_, None) => quote(name),
        (PackageManager::Apt, Some(v)) => quote(&format!("{}={}", name, v)),
        (PackageManager::Dnf, Some(v)) => quote(&format!("{}-{}", name, v)),
        (PackageManager::Pip, Some(v)) => quote(&format!("{}=={}", name, v)),
        (PackageManager::Brew, Some(v)) => quote(&format!("{}@{}", name, v)),
        (PackageManager::Cargo, Some(v)) => format!("{} --version {}", quote(name), quote(v)),
        // pacman has no version pinning on install
        (PackageManager::Pacman, Some(_)) => quote(name),
    }
}

/// Generate shell that exits 0 iff the package is installed.
pub fn query_script(ctx: &ExecContext, manager: Option<PackageManager>, name: &str) -> String {
    if let Some(ref template) = ctx.query_command {
        return template.replace("{package}", &quote(name));
    }
    let q = quote(name);
    match manager.unwrap_or(ctx.package_manager) {
        PackageManager::Apt => format!(
            "dpkg-query -W -f '${{Status}}' {} 2>/dev/null | grep -q 'install ok installed'",
            q
        ),
        PackageManager::Dnf => format!("rpm -q {} >/dev/null 2>&1", q),
        PackageManager::Pacman => format!("pacman -Q {} >/dev/null 2>&1", q),
        PackageManager::Brew => format!("brew list --versions {} >/dev/null 2>&1", q),
        PackageManager::Pip => format!("python3 -m pip show {} >/dev/null 2>&1", q),
        PackageManager::Cargo => format!("command -v {} >/dev/null 2>&1", q),
    }
}

/// Generate shell to install one package.
pub fn install_script(
    ctx: &ExecContext,
    manager: PackageManager,
    name: &str,
    version: Option<&str>,
    update: bool,
) -> String {
    let spec = package_spec(manager, name, version);
    if let Some(ref template) = ctx.install_command {
        return format!("set -euo pipefail\n{}", template.replace("{package}", &spec));
    }
    let mut lines = vec!["set -euo pipefail".to_string()];
    match manager {
        PackageManager::Apt => {
            if update {
                lines.push("apt-get update -qq".to_string());
            }
            lines.push(format!(
                "DEBIAN_FRONTEND=noninteractive apt-get install -y -qq {}",
                spec
            ));
        }
        PackageManager::Dnf => {
            if update {
                lines.push("dnf makecache -q".to_string());
            }
            lines.push(format!("dnf install -y -q {}", spec));
        }
        PackageManager::Pacman => {
            let flags = if update { "-Syu" } else { "-S" };
            lines.push(format!("pacman {} --noconfirm --needed {}", flags, spec));
        }
        PackageManager::Brew => {
            if update {
                lines.push("brew update".to_string());
            }
            lines.push(format!("brew install {}", spec));
        }
        PackageManager::Pip => {
            let upgrade = if update { " --upgrade" } else { "" };
            lines.push(format!("python3 -m pip install{} {}", upgrade, spec));
        }
        PackageManager::Cargo => {
            lines.push(format!("cargo install {}", spec));
        }
    }
    lines.join("\n")
}

/// Install the step's package. Returns the manager's output.
pub fn apply(step: &Step, ctx: &ExecContext) -> Result<String, StepError> {
    let manager = manager_for(step, ctx)?;
    let version = step.param("version");
    let script = install_script(
        ctx,
        manager,
        &step.target,
        version.as_deref(),
        step.param_flag("update"),
    );
    tracing::info!(package = %step.target, manager = %manager, "installing package");

    let out = transport::exec_script(&script).map_err(|e| StepError::io(&step.target, e))?;
    if !out.success() {
        return Err(StepError::package(&step.target, out.combined()));
    }
    Ok(out.combined())
}
