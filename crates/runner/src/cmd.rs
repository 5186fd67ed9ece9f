//! Host utility invocations (`mount`, `ip`, `iptables`, `sysctl`).
//!
//! Always a structured argument list, never shell interpolation; exit
//! status interpreted explicitly.
use std::ffi::OsStr;
use std::process::{ExitStatus, Output};
use tokio::process::Command;

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("Io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("`{command}` failed with {status}: {stderr}")]
    Failed {
        command: String,
        status: ExitStatus,
        stderr: String,
    },
}

/// Run a host utility, capturing its output.
pub async fn run<S: AsRef<OsStr>>(
    program: &str,
    args: impl IntoIterator<Item = S>,
) -> std::io::Result<Output> {
    Command::new(program).args(args).output().await
}

/// Run a host utility and require a zero exit status.
pub async fn run_checked<S: AsRef<OsStr>>(
    program: &str,
    args: impl IntoIterator<Item = S>,
) -> Result<(), CommandError> {
    let output = run(program, args).await?;

    if !output.status.success() {
        return Err(CommandError::Failed {
            command: program.to_string(),
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(())
}
