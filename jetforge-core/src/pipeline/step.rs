//! Data-driven install step descriptions
//!
//! A step pairs an action with a read-only idempotency check. The check
//! is evaluated before the action: when it already reports success the
//! action is skipped, which is what makes a pipeline safely re-runnable
//! after a partial failure or an interrupted resume.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// A single shell command with an optional working directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShellCommand {
    pub line: String,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
}

impl ShellCommand {
    pub fn new(line: impl Into<String>) -> Self {
        Self {
            line: line.into(),
            cwd: None,
        }
    }

    pub fn in_dir(line: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            line: line.into(),
            cwd: Some(cwd.into()),
        }
    }
}

/// What a step does when its idempotency check reports the work is
/// still outstanding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StepAction {
    /// Run shell commands in order, failing on the first non-zero exit.
    Commands(Vec<ShellCommand>),

    /// Unpack the fetched artifact tarball (gzip + tar) under `dest`.
    ExtractArtifact { dest: PathBuf },

    /// Append lines to a shell profile, skipping lines already present.
    AppendProfile { path: PathBuf, lines: Vec<String> },
}

/// Read-only probe deciding whether a step's effect is already in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum IdempotencyCheck {
    /// The step is done when this command exits zero.
    CommandSucceeds(ShellCommand),

    /// The step is done when this path exists.
    PathExists(PathBuf),
}

/// One ordered step of a component's install pipeline.
///
/// Steps depend only on the immediately preceding step's success; the
/// pipeline executes them strictly in ordinal order.
#[derive(Debug, Clone)]
pub struct InstallStep {
    pub name: String,
    pub ordinal: usize,
    pub action: StepAction,
    pub check: IdempotencyCheck,
}

impl InstallStep {
    pub fn new(
        name: impl Into<String>,
        ordinal: usize,
        action: StepAction,
        check: IdempotencyCheck,
    ) -> Self {
        Self {
            name: name.into(),
            ordinal,
            action,
            check,
        }
    }
}
