//! Persistent record of one installation attempt
//!
//! The run record is written after every step so a crashed or
//! interrupted run can be inspected and resumed from
//! `current_step_index` instead of restarting. It lives next to the
//! component's artifacts in the cache and is readable by the status
//! query while an install is executing.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::catalog::Component;
use crate::error::InstallError;

/// Lifecycle state of an install run.
///
/// `Succeeded` and `Failed` are terminal; a failed run may be resumed
/// by a new invocation for the same (component, version).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Succeeded | RunStatus::Failed)
    }
}

/// The persisted state of one installation attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallRun {
    pub id: Uuid,
    pub component: Component,
    pub version: String,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,

    /// Index of the next step to execute. Advanced only when a step
    /// succeeds or its check reports it already done.
    pub current_step_index: usize,

    pub status: RunStatus,

    /// `"<step>: <cause>"` for the step that ended a failed run.
    #[serde(default)]
    pub last_error: Option<String>,

    pub steps_total: usize,

    /// Names of steps whose idempotency check already held.
    #[serde(default)]
    pub steps_skipped: Vec<String>,
}

impl InstallRun {
    /// File name of the run record inside a component's cache directory.
    pub const FILE_NAME: &'static str = "install-run.json";

    pub fn new(component: Component, version: impl Into<String>, steps_total: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            component,
            version: version.into(),
            started_at: Utc::now(),
            finished_at: None,
            current_step_index: 0,
            status: RunStatus::Pending,
            last_error: None,
            steps_total,
            steps_skipped: Vec::new(),
        }
    }

    /// Load the run record from a component directory. Missing or
    /// unreadable records read as absent; a fresh run starts instead.
    pub fn load(dir: &Path) -> Option<InstallRun> {
        let path = dir.join(Self::FILE_NAME);
        let content = std::fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&content) {
            Ok(run) => Some(run),
            Err(err) => {
                warn!(path = %path.display(), "discarding unreadable run record: {err}");
                None
            }
        }
    }

    /// Persist the record into a component directory.
    pub fn save(&self, dir: &Path) -> Result<(), InstallError> {
        let path = dir.join(Self::FILE_NAME);
        let json = serde_json::to_string_pretty(self).map_err(|e| InstallError::WriteFailure {
            path: path.clone(),
            source: std::io::Error::other(e),
        })?;
        std::fs::write(&path, json).map_err(|source| InstallError::WriteFailure { path, source })?;
        Ok(())
    }

    pub(crate) fn mark_running(&mut self) {
        self.status = RunStatus::Running;
        self.last_error = None;
        self.finished_at = None;
    }

    pub(crate) fn record_skip(&mut self, step: &str) {
        self.steps_skipped.push(step.to_string());
    }

    pub(crate) fn advance(&mut self) {
        self.current_step_index += 1;
    }

    pub(crate) fn mark_succeeded(&mut self) {
        self.status = RunStatus::Succeeded;
        self.finished_at = Some(Utc::now());
    }

    pub(crate) fn mark_failed(&mut self, cause: String) {
        self.status = RunStatus::Failed;
        self.last_error = Some(cause);
        self.finished_at = Some(Utc::now());
    }
}
