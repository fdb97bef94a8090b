//! Shared fixtures for orchestrator integration tests: a scripted
//! fetcher and step executor so no test touches the network or real
//! system commands.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use jetforge_core::catalog::VersionSpec;
use jetforge_core::config::Config;
use jetforge_core::error::InstallError;
use jetforge_core::fetch::Fetch;
use jetforge_core::pipeline::{CommandOutput, ExecError, ShellCommand, StepExecutor};

/// Config rooted inside a test's temp directory.
pub fn test_config(base: &Path) -> Config {
    Config {
        cache_root: base.join("cache"),
        profile_path: Some(base.join("bashrc")),
    }
}

/// In-memory tar.gz whose root directory matches what the install
/// plans expect to find after unpacking.
pub fn tarball_with_root(root: &str) -> Vec<u8> {
    let staging = tempfile::TempDir::new().unwrap();
    let dir = staging.path().join(root);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("payload.txt"), "payload").unwrap();

    let mut bytes = Vec::new();
    {
        let encoder = flate2::write::GzEncoder::new(&mut bytes, flate2::Compression::default());
        let mut builder = tar::Builder::new(encoder);
        builder.append_dir_all(root, &dir).unwrap();
        builder.into_inner().unwrap().finish().unwrap();
    }
    bytes
}

/// Serves canned bytes, counting calls. An optional gate parks the
/// first `fetch` until notified (or cancelled), so a test can hold an
/// install inside the fetch phase to exercise the run-lock and
/// cancellation paths; later fetches pass straight through.
pub struct FakeFetcher {
    bytes: Vec<u8>,
    calls: AtomicUsize,
    gate: Mutex<Option<Arc<tokio::sync::Notify>>>,
}

impl FakeFetcher {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            calls: AtomicUsize::new(0),
            gate: Mutex::new(None),
        }
    }

    /// A fetcher whose first `fetch` blocks until the returned gate is
    /// notified (or the install is cancelled).
    pub fn gated(bytes: Vec<u8>) -> (Self, Arc<tokio::sync::Notify>) {
        let gate = Arc::new(tokio::sync::Notify::new());
        (
            Self {
                bytes,
                calls: AtomicUsize::new(0),
                gate: Mutex::new(Some(gate.clone())),
            },
            gate,
        )
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetch for FakeFetcher {
    async fn fetch(
        &self,
        _spec: &VersionSpec,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, InstallError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            tokio::select! {
                _ = gate.notified() => {}
                _ = cancel.cancelled() => {
                    return Err(InstallError::Cancelled {
                        phase: "fetch".to_string(),
                    });
                }
            }
        }
        Ok(self.bytes.clone())
    }
}

/// Scripted executor. Commands succeed unless an outcome queue says
/// otherwise; every executed line is recorded for assertions.
#[derive(Default)]
pub struct FakeExecutor {
    outcomes: Mutex<HashMap<String, VecDeque<bool>>>,
    executed: Mutex<Vec<String>>,
}

impl FakeExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the outcome for the next execution of a command line.
    pub fn push_outcome(&self, line: &str, success: bool) {
        self.outcomes
            .lock()
            .unwrap()
            .entry(line.to_string())
            .or_default()
            .push_back(success);
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }

    pub fn execution_count(&self, line: &str) -> usize {
        self.executed
            .lock()
            .unwrap()
            .iter()
            .filter(|l| l.as_str() == line)
            .count()
    }
}

#[async_trait]
impl StepExecutor for FakeExecutor {
    async fn run_command(
        &self,
        command: &ShellCommand,
        _cancel: &CancellationToken,
    ) -> Result<CommandOutput, ExecError> {
        self.executed.lock().unwrap().push(command.line.clone());
        let success = self
            .outcomes
            .lock()
            .unwrap()
            .get_mut(&command.line)
            .and_then(|queue| queue.pop_front())
            .unwrap_or(true);
        Ok(CommandOutput {
            exit_code: if success { 0 } else { 1 },
            stdout: String::new(),
            stderr: if success {
                String::new()
            } else {
                "scripted failure".to_string()
            },
        })
    }
}

/// The idempotency-check command lines of the CUDA plan, including the
/// profile grep rendered against this test's profile path.
pub fn cuda_check_lines(config: &Config) -> Vec<String> {
    let profile = config.profile();
    let quoted = shell_words::quote(&profile.to_string_lossy()).into_owned();
    vec![
        "dpkg -s cuda".to_string(),
        "dpkg -s libcudnn8".to_string(),
        "dpkg -s tensorrt".to_string(),
        "dpkg -s libnvvpi2".to_string(),
        format!("grep -q /usr/local/cuda/bin {quoted}"),
        "nvcc --version".to_string(),
    ]
}

/// Make every CUDA idempotency check report "not yet installed" once,
/// so a first run executes all of its actions.
pub fn fail_cuda_checks_once(executor: &FakeExecutor, config: &Config) {
    for line in cuda_check_lines(config) {
        executor.push_outcome(&line, false);
    }
}
