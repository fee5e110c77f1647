//! PV-010: Local execution via `bash`.

use super::{ExecOptions, ExecOutput};
use std::io::Write;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicU32, Ordering};

/// Process group of the script currently running, 0 when idle.
static ACTIVE_GROUP: AtomicU32 = AtomicU32::new(0);

/// Clears `ACTIVE_GROUP` on every exit path of `exec_local`.
struct ActiveGroup;

impl ActiveGroup {
    fn enter(pid: u32) -> Self {
        ACTIVE_GROUP.store(pid, Ordering::SeqCst);
        Self
    }
}

impl Drop for ActiveGroup {
    fn drop(&mut self) {
        ACTIVE_GROUP.store(0, Ordering::SeqCst);
    }
}

/// Execute a shell script locally via `bash`, piping it to stdin.
/// Uses bash (not sh/dash) because generated scripts use `set -o pipefail`.
///
/// The script leads its own process group, so a terminal interrupt reaches
/// provisio alone and the running step finishes undisturbed.
pub fn exec_local(script: &str, opts: &ExecOptions) -> Result<ExecOutput, String> {
    let mut cmd = Command::new("bash");
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }
    if let Some(ref dir) = opts.dir {
        cmd.current_dir(dir);
    }
    for (k, v) in &opts.env {
        cmd.env(k, v);
    }

    tracing::debug!(script = %script, dir = ?opts.dir, "exec");

    let mut child = cmd
        .spawn()
        .map_err(|e| format!("failed to spawn bash: {}", e))?;
    let _active = ActiveGroup::enter(child.id());

    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(script.as_bytes())
            .map_err(|e| format!("stdin write error: {}", e))?;
    }

    let output = child
        .wait_with_output()
        .map_err(|e| format!("wait error: {}", e))?;

    Ok(ExecOutput {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}

/// Send SIGINT to the running script's process group, if any.
/// Returns whether a script was running.
pub fn interrupt_active() -> bool {
    let pid = ACTIVE_GROUP.load(Ordering::SeqCst);
    if pid == 0 {
        return false;
    }
    tracing::warn!(pgid = pid, "interrupting running script");
    let group = format!("-{}", pid);
    if let Err(e) = Command::new("kill").args(["-INT", "--", &group]).status() {
        tracing::warn!(error = %e, "could not signal script");
    }
    true
}
