//! Step execution seam
//!
//! Pipeline steps run their shell commands through the `StepExecutor`
//! trait so tests can inject a scripted fake and never touch real
//! system commands. The production `ShellExecutor` spawns `sh -c` with
//! piped output and races the cancellation token; a cancelled command
//! is killed rather than left running.

use std::process::Stdio;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::step::ShellCommand;

/// Captured outcome of one executed command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Executor-level failure, before step context is attached.
#[derive(Error, Debug)]
pub enum ExecError {
    #[error("failed to spawn command: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("failed waiting for command: {0}")]
    Wait(#[source] std::io::Error),

    #[error("command cancelled")]
    Cancelled,
}

/// Runs step commands. A non-zero exit is a normal `CommandOutput`,
/// not an `Err`; errors are reserved for spawn/wait failures and
/// cancellation.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    async fn run_command(
        &self,
        command: &ShellCommand,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, ExecError>;
}

/// Production executor: `sh -c` with captured output.
pub struct ShellExecutor;

#[async_trait]
impl StepExecutor for ShellExecutor {
    async fn run_command(
        &self,
        command: &ShellCommand,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, ExecError> {
        debug!(command = %command.line, cwd = ?command.cwd, "executing command");

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&command.line)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Dropping the child on the cancelled branch must kill it.
            .kill_on_drop(true);
        if let Some(cwd) = &command.cwd {
            cmd.current_dir(cwd);
        }

        let child = cmd.spawn().map_err(ExecError::Spawn)?;

        tokio::select! {
            result = child.wait_with_output() => {
                let output = result.map_err(ExecError::Wait)?;
                Ok(CommandOutput {
                    exit_code: output.status.code().unwrap_or(-1),
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                })
            }
            _ = cancel.cancelled() => Err(ExecError::Cancelled),
        }
    }
}
