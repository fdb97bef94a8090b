//! Content-addressed package cache
//!
//! Local store of downloaded artifact tarballs, laid out as one
//! directory per component holding versioned artifact files plus the
//! component's run-state record. Artifacts are verified on store and
//! published atomically: bytes land in a temporary file that is renamed
//! onto the final path only after the digest check passes, so no caller
//! ever observes a half-written artifact, even under concurrent access.
//!
//! The cache is unbounded. Keys never collide across distinct
//! (component, version) pairs, so atomic publish is the only
//! concurrency contract it needs.

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::warn;

use crate::catalog::Component;
use crate::error::InstallError;

/// A verified, cached artifact for one (component, version).
///
/// Created when a download completes and its checksum matches; immutable
/// once stored.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub component: Component,
    pub version: String,
    pub local_path: PathBuf,
    pub checksum: String,
    pub size: u64,
}

/// Local artifact store rooted at a configurable directory.
pub struct PackageCache {
    root: PathBuf,
}

impl PackageCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding one component's artifacts and run record.
    pub fn component_dir(&self, component: Component) -> PathBuf {
        self.root.join(component.dir_name())
    }

    fn artifact_path(&self, component: Component, version: &str) -> PathBuf {
        self.component_dir(component)
            .join(format!("{}-{}.tar.gz", component.dir_name(), version))
    }

    /// Pure read. The cached file is re-hashed so a corrupted or
    /// truncated entry reads as a miss rather than poisoning an install.
    pub fn lookup(
        &self,
        component: Component,
        version: &str,
        expected_checksum: Option<&str>,
    ) -> Option<Artifact> {
        let path = self.artifact_path(component, version);
        let metadata = fs::metadata(&path).ok()?;
        if !metadata.is_file() {
            return None;
        }

        let checksum = match hash_file(&path) {
            Ok(digest) => digest,
            Err(err) => {
                warn!(path = %path.display(), "failed to hash cached artifact: {err}");
                return None;
            }
        };

        if let Some(expected) = expected_checksum {
            if checksum != expected {
                warn!(
                    path = %path.display(),
                    "cached artifact digest mismatch, treating as miss"
                );
                return None;
            }
        }

        Some(Artifact {
            component,
            version: version.to_string(),
            local_path: path,
            checksum,
            size: metadata.len(),
        })
    }

    /// Verify and atomically publish downloaded bytes as an artifact.
    ///
    /// Fails with `ChecksumMismatch` if the computed digest does not
    /// equal `expected_checksum`, and with `WriteFailure` on storage
    /// I/O errors. In both cases no partial artifact is left visible.
    pub fn store(
        &self,
        component: Component,
        version: &str,
        bytes: &[u8],
        expected_checksum: Option<&str>,
    ) -> Result<Artifact, InstallError> {
        let actual = hash_bytes(bytes);
        if let Some(expected) = expected_checksum {
            if actual != expected {
                return Err(InstallError::ChecksumMismatch {
                    component,
                    version: version.to_string(),
                    expected: expected.to_string(),
                    actual,
                });
            }
        }

        let dir = self.component_dir(component);
        fs::create_dir_all(&dir).map_err(|source| InstallError::WriteFailure {
            path: dir.clone(),
            source,
        })?;

        let path = self.artifact_path(component, version);
        let mut staged =
            tempfile::NamedTempFile::new_in(&dir).map_err(|source| InstallError::WriteFailure {
                path: dir.clone(),
                source,
            })?;
        staged
            .write_all(bytes)
            .map_err(|source| InstallError::WriteFailure {
                path: staged.path().to_path_buf(),
                source,
            })?;
        staged
            .persist(&path)
            .map_err(|err| InstallError::WriteFailure {
                path: path.clone(),
                source: err.error,
            })?;

        Ok(Artifact {
            component,
            version: version.to_string(),
            local_path: path,
            checksum: actual,
            size: bytes.len() as u64,
        })
    }
}

/// SHA-256 digest of a byte slice, rendered `sha256:<hex>`.
pub fn hash_bytes(bytes: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(bytes)))
}

/// SHA-256 digest of a file's contents, streamed in 8KB blocks.
fn hash_file(path: &Path) -> std::io::Result<String> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(format!("sha256:{}", hex::encode(hasher.finalize())))
}
