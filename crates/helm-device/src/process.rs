use std::process::Stdio;
use std::time::Duration;

use helm_core::{HelmError, Result, Surface};

/// Default limit for a single helper command.
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Run a helper command and return its stdout.
///
/// The child is killed if this future is dropped, so a cancelled operation
/// does not leave a half-finished primitive running.
pub async fn run_cmd(surface: Surface, program: &str, args: &[&str]) -> Result<String> {
    let output = tokio::time::timeout(
        COMMAND_TIMEOUT,
        tokio::process::Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output(),
    )
    .await
    .map_err(|_| HelmError::backend(surface, format!("{program} timed out")))?
    .map_err(|e| HelmError::backend(surface, format!("{program} failed: {e}")))?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(HelmError::backend(
            surface,
            format!("{program} error: {}", stderr.trim()),
        ))
    }
}

/// Whether `program` resolves on `PATH`.
pub fn which(program: &str) -> bool {
    std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(program).is_file()))
        .unwrap_or(false)
}
