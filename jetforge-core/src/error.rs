//! Install orchestration error taxonomy
//!
//! Every failure the orchestrator can surface is one of these variants,
//! carrying enough context (component, version, step, underlying cause)
//! to diagnose a failed run without re-running it. Transient network
//! errors are retried inside the fetcher and only reach this type once
//! retries are exhausted.

use std::path::PathBuf;
use thiserror::Error;

use crate::catalog::Component;

/// Errors surfaced by the installation orchestration core.
#[derive(Error, Debug)]
pub enum InstallError {
    /// The requested version is not in the catalog. The valid set is
    /// included so the caller can suggest alternatives.
    #[error("Unknown {component} version '{requested}'.\n\nSupported versions:\n{}", format_versions(.available))]
    UnknownVersion {
        component: Component,
        requested: String,
        available: Vec<String>,
    },

    /// The remote returned a 4xx-equivalent response. Not retryable.
    #[error("Artifact not found: HTTP {status} for {url}")]
    NotFound { url: String, status: u16 },

    /// Transient network failures exhausted the retry budget.
    #[error("Failed to fetch {url} after {attempts} attempts: {reason}")]
    FetchFailure {
        url: String,
        attempts: u32,
        reason: String,
    },

    /// Downloaded bytes did not match the expected digest. Never
    /// retried silently; the artifact is discarded.
    #[error("Checksum mismatch for {component} {version}\nExpected: {expected}\nActual:   {actual}")]
    ChecksumMismatch {
        component: Component,
        version: String,
        expected: String,
        actual: String,
    },

    /// Storage I/O failed while publishing an artifact or run record.
    #[error("Failed to write {path}")]
    WriteFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A pipeline step's command reported failure, or its idempotency
    /// check raised an unexpected-state error.
    #[error("Step '{step}' failed: {detail}")]
    StepFailure { step: String, detail: String },

    /// An install for this component is already executing.
    #[error("An install for {component} is already running")]
    AlreadyRunning { component: Component },

    /// Operator-initiated cancellation. The run record stays resumable.
    #[error("Installation cancelled during '{phase}'")]
    Cancelled { phase: String },
}

impl InstallError {
    /// Process exit code for the CLI boundary. Each failure class gets
    /// its own code so scripts can branch on the outcome.
    pub fn exit_code(&self) -> u8 {
        match self {
            InstallError::UnknownVersion { .. } => 2,
            InstallError::NotFound { .. } => 3,
            InstallError::FetchFailure { .. } => 4,
            InstallError::ChecksumMismatch { .. } => 5,
            InstallError::WriteFailure { .. } => 6,
            InstallError::StepFailure { .. } => 7,
            InstallError::AlreadyRunning { .. } => 8,
            InstallError::Cancelled { .. } => 9,
        }
    }

    /// Whether a subsequent install for the same component/version can
    /// pick up where this one stopped.
    pub fn is_resumable(&self) -> bool {
        matches!(
            self,
            InstallError::StepFailure { .. } | InstallError::Cancelled { .. }
        )
    }
}

fn format_versions(versions: &[String]) -> String {
    versions
        .iter()
        .map(|v| format!("  - {v}"))
        .collect::<Vec<_>>()
        .join("\n")
}
