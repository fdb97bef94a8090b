//! Artifact fetching
//!
//! Retrieves artifact tarballs from their source URLs with retry,
//! backoff, and cancellation. Transient network failures (connect
//! errors, timeouts, interrupted bodies, 5xx responses) are retried
//! with exponential backoff; a 4xx response is a permanent `NotFound`.
//! Cancellation mid-transfer discards the partial bytes, so nothing
//! half-downloaded can ever reach the cache.
//!
//! The `Fetch` trait is the seam that lets the orchestrator run against
//! a fake fetcher in tests.

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::catalog::VersionSpec;
use crate::error::InstallError;

/// Maximum download attempts before giving up.
pub const FETCH_ATTEMPTS: u32 = 3;

/// Base delay for exponential backoff between attempts.
pub const BACKOFF_BASE: Duration = Duration::from_secs(2);

/// Retrieves artifact bytes for a resolved version spec.
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(
        &self,
        spec: &VersionSpec,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, InstallError>;
}

/// Production fetcher over HTTP(S).
pub struct HttpFetcher {
    client: reqwest::Client,
}

/// One attempt's failure, split by whether a retry can help.
enum AttemptError {
    Transient(String),
    Fatal(InstallError),
}

impl HttpFetcher {
    pub fn new() -> anyhow::Result<Self> {
        use anyhow::Context;

        let client = reqwest::Client::builder()
            .user_agent(concat!("jetforge/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client })
    }

    async fn attempt(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, AttemptError> {
        let response = tokio::select! {
            response = self.client.get(url).send() => {
                response.map_err(|e| AttemptError::Transient(e.to_string()))?
            }
            _ = cancel.cancelled() => {
                return Err(AttemptError::Fatal(InstallError::Cancelled {
                    phase: "fetch".to_string(),
                }));
            }
        };

        let status = response.status();
        if status.is_client_error() {
            return Err(AttemptError::Fatal(InstallError::NotFound {
                url: url.to_string(),
                status: status.as_u16(),
            }));
        }
        if !status.is_success() {
            return Err(AttemptError::Transient(format!("HTTP {status}")));
        }

        let expected = response.content_length();
        let mut response = response;
        let mut bytes = Vec::with_capacity(expected.unwrap_or(0) as usize);
        loop {
            tokio::select! {
                chunk = response.chunk() => match chunk {
                    Ok(Some(chunk)) => bytes.extend_from_slice(&chunk),
                    Ok(None) => break,
                    Err(e) => return Err(AttemptError::Transient(e.to_string())),
                },
                _ = cancel.cancelled() => {
                    // Partial bytes are dropped here, never stored.
                    debug!(%url, received = bytes.len(), "fetch cancelled mid-transfer");
                    return Err(AttemptError::Fatal(InstallError::Cancelled {
                        phase: "fetch".to_string(),
                    }));
                }
            }
        }

        if let Some(expected) = expected {
            if bytes.len() as u64 != expected {
                return Err(AttemptError::Transient(format!(
                    "body truncated: got {} of {} bytes",
                    bytes.len(),
                    expected
                )));
            }
        }

        Ok(bytes)
    }
}

#[async_trait]
impl Fetch for HttpFetcher {
    async fn fetch(
        &self,
        spec: &VersionSpec,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, InstallError> {
        let url = &spec.source_url;
        let mut last_error = String::new();

        for attempt in 0..FETCH_ATTEMPTS {
            if attempt > 0 {
                let delay = backoff_delay(attempt);
                warn!(
                    %url,
                    attempt = attempt + 1,
                    "retrying fetch in {:?} ({last_error})",
                    delay
                );
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => {
                        return Err(InstallError::Cancelled {
                            phase: "fetch".to_string(),
                        });
                    }
                }
            }

            match self.attempt(url, cancel).await {
                Ok(bytes) => {
                    info!(%url, bytes = bytes.len(), "fetch complete");
                    return Ok(bytes);
                }
                Err(AttemptError::Fatal(err)) => return Err(err),
                Err(AttemptError::Transient(reason)) => last_error = reason,
            }
        }

        Err(InstallError::FetchFailure {
            url: url.clone(),
            attempts: FETCH_ATTEMPTS,
            reason: last_error,
        })
    }
}

/// Delay before the given retry attempt (1-based): base * 2^(n-1).
fn backoff_delay(attempt: u32) -> Duration {
    BACKOFF_BASE * 2u32.pow(attempt.saturating_sub(1))
}
