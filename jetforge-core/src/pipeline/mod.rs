//! Installer pipeline
//!
//! Executes a component's ordered install steps against a fetched
//! artifact, tracking progress in a persisted [`InstallRun`]. Each
//! step's idempotency check is evaluated before its action, so a rerun
//! after a partial failure resumes at the failed step and skips work
//! that already took effect. Cancellation marks the run failed without
//! advancing the step index; a later run re-attempts the same step.

pub mod executor;
pub mod plans;
mod run;
mod step;

pub use executor::{CommandOutput, ExecError, ShellExecutor, StepExecutor};
pub use run::{InstallRun, RunStatus};
pub use step::{IdempotencyCheck, InstallStep, ShellCommand, StepAction};

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cache::Artifact;
use crate::error::InstallError;

/// Drives one component's install steps, persisting run state into the
/// component's cache directory after every step.
pub struct Pipeline {
    state_dir: PathBuf,
    executor: Arc<dyn StepExecutor>,
}

impl Pipeline {
    pub fn new(state_dir: impl Into<PathBuf>, executor: Arc<dyn StepExecutor>) -> Self {
        Self {
            state_dir: state_dir.into(),
            executor,
        }
    }

    /// Run the steps for an artifact to completion.
    ///
    /// A persisted failed (or interrupted) run for the same version is
    /// resumed from its `current_step_index`; prior steps are not
    /// re-executed. Returns the final run record on success; on failure
    /// the record is persisted as `Failed` before the error propagates.
    pub async fn run(
        &self,
        artifact: &Artifact,
        steps: &[InstallStep],
        cancel: &CancellationToken,
    ) -> Result<InstallRun, InstallError> {
        fs::create_dir_all(&self.state_dir).map_err(|source| InstallError::WriteFailure {
            path: self.state_dir.clone(),
            source,
        })?;

        let mut run = self.prepare_run(artifact, steps.len());
        run.mark_running();
        run.save(&self.state_dir)?;

        for step in steps.iter().skip(run.current_step_index) {
            if cancel.is_cancelled() {
                return Err(self.abort(
                    run,
                    step,
                    InstallError::Cancelled {
                        phase: step.name.clone(),
                    },
                ));
            }

            let satisfied = match self.check_satisfied(step, cancel).await {
                Ok(satisfied) => satisfied,
                Err(err) => return Err(self.abort(run, step, err)),
            };

            if satisfied {
                info!(step = %step.name, "step already satisfied, skipping");
                run.record_skip(&step.name);
            } else {
                info!(step = %step.name, ordinal = step.ordinal, "executing step");
                if let Err(err) = self.execute_action(step, artifact, cancel).await {
                    return Err(self.abort(run, step, err));
                }
                info!(step = %step.name, "step complete");
            }

            run.advance();
            run.save(&self.state_dir)?;
        }

        run.mark_succeeded();
        run.save(&self.state_dir)?;
        info!(
            component = %run.component,
            version = %run.version,
            skipped = run.steps_skipped.len(),
            "pipeline complete"
        );
        Ok(run)
    }

    /// Pick up a resumable run record or start a fresh one.
    fn prepare_run(&self, artifact: &Artifact, steps_total: usize) -> InstallRun {
        match InstallRun::load(&self.state_dir) {
            Some(previous)
                if previous.version == artifact.version
                    && matches!(previous.status, RunStatus::Failed | RunStatus::Running) =>
            {
                info!(
                    step_index = previous.current_step_index,
                    "resuming interrupted run"
                );
                previous
            }
            Some(previous) => {
                if previous.version != artifact.version {
                    warn!(
                        previous = %previous.version,
                        requested = %artifact.version,
                        "discarding run record for a different version"
                    );
                }
                InstallRun::new(artifact.component, &artifact.version, steps_total)
            }
            None => InstallRun::new(artifact.component, &artifact.version, steps_total),
        }
    }

    /// Persist the failed run record, then hand the error back.
    fn abort(&self, mut run: InstallRun, step: &InstallStep, err: InstallError) -> InstallError {
        let cause = match &err {
            InstallError::Cancelled { .. } => format!("{}: cancelled", step.name),
            other => other.to_string(),
        };
        run.mark_failed(cause);
        if let Err(save_err) = run.save(&self.state_dir) {
            warn!("failed to persist run record: {save_err}");
        }
        err
    }

    async fn check_satisfied(
        &self,
        step: &InstallStep,
        cancel: &CancellationToken,
    ) -> Result<bool, InstallError> {
        match &step.check {
            IdempotencyCheck::PathExists(path) => Ok(path.exists()),
            IdempotencyCheck::CommandSucceeds(command) => {
                match self.executor.run_command(command, cancel).await {
                    Ok(output) => Ok(output.success()),
                    Err(ExecError::Cancelled) => Err(InstallError::Cancelled {
                        phase: step.name.clone(),
                    }),
                    Err(err) => Err(InstallError::StepFailure {
                        step: step.name.clone(),
                        detail: format!(
                            "idempotency check '{}' could not run: {err}",
                            command.line
                        ),
                    }),
                }
            }
        }
    }

    async fn execute_action(
        &self,
        step: &InstallStep,
        artifact: &Artifact,
        cancel: &CancellationToken,
    ) -> Result<(), InstallError> {
        match &step.action {
            StepAction::Commands(commands) => {
                for command in commands {
                    let output = match self.executor.run_command(command, cancel).await {
                        Ok(output) => output,
                        Err(ExecError::Cancelled) => {
                            return Err(InstallError::Cancelled {
                                phase: step.name.clone(),
                            })
                        }
                        Err(err) => {
                            return Err(InstallError::StepFailure {
                                step: step.name.clone(),
                                detail: err.to_string(),
                            })
                        }
                    };
                    if !output.success() {
                        return Err(InstallError::StepFailure {
                            step: step.name.clone(),
                            detail: command_failure_detail(command, &output),
                        });
                    }
                }
                Ok(())
            }
            StepAction::ExtractArtifact { dest } => {
                extract_artifact(&step.name, artifact, dest, cancel)
            }
            StepAction::AppendProfile { path, lines } => append_profile(&step.name, path, lines),
        }
    }
}

fn command_failure_detail(command: &ShellCommand, output: &CommandOutput) -> String {
    let diagnostics = if output.stderr.trim().is_empty() {
        output.stdout.trim()
    } else {
        output.stderr.trim()
    };
    if diagnostics.is_empty() {
        format!(
            "command '{}' exited with status {}",
            command.line, output.exit_code
        )
    } else {
        format!(
            "command '{}' exited with status {}: {diagnostics}",
            command.line, output.exit_code
        )
    }
}

/// Unpack the artifact tarball entry by entry so cancellation takes
/// effect mid-archive instead of after the whole extraction.
fn extract_artifact(
    step_name: &str,
    artifact: &Artifact,
    dest: &Path,
    cancel: &CancellationToken,
) -> Result<(), InstallError> {
    let step_failure = |detail: String| InstallError::StepFailure {
        step: step_name.to_string(),
        detail,
    };

    fs::create_dir_all(dest)
        .map_err(|e| step_failure(format!("failed to create {}: {e}", dest.display())))?;

    let file = fs::File::open(&artifact.local_path).map_err(|e| {
        step_failure(format!(
            "failed to open artifact {}: {e}",
            artifact.local_path.display()
        ))
    })?;
    let decoder = flate2::read::GzDecoder::new(file);
    let mut archive = tar::Archive::new(decoder);

    let entries = archive
        .entries()
        .map_err(|e| step_failure(format!("failed to read artifact archive: {e}")))?;
    for entry in entries {
        if cancel.is_cancelled() {
            return Err(InstallError::Cancelled {
                phase: step_name.to_string(),
            });
        }
        let mut entry =
            entry.map_err(|e| step_failure(format!("failed to read archive entry: {e}")))?;
        entry
            .unpack_in(dest)
            .map_err(|e| step_failure(format!("failed to extract archive entry: {e}")))?;
    }

    Ok(())
}

/// Append export lines to a shell profile, leaving lines that are
/// already present alone so re-runs do not duplicate them.
fn append_profile(step_name: &str, path: &Path, lines: &[String]) -> Result<(), InstallError> {
    let step_failure = |detail: String| InstallError::StepFailure {
        step: step_name.to_string(),
        detail,
    };

    let existing = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(step_failure(format!("failed to read {}: {e}", path.display()))),
    };

    let missing: Vec<&String> = lines
        .iter()
        .filter(|line| !existing.lines().any(|present| present.trim() == line.as_str()))
        .collect();
    if missing.is_empty() {
        return Ok(());
    }

    let mut content = existing;
    if !content.is_empty() && !content.ends_with('\n') {
        content.push('\n');
    }
    for line in missing {
        content.push_str(line);
        content.push('\n');
    }

    fs::write(path, content)
        .map_err(|e| step_failure(format!("failed to write {}: {e}", path.display())))
}
