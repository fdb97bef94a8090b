//! Component version catalog
//!
//! Fixed mapping of installable components to their supported versions,
//! one of which is the default. The catalog is read-only process-wide
//! configuration: resolution never touches the network or filesystem.
//!
//! The component set is deliberately a closed enum. Extending it to a
//! new component is a data change here plus a step plan, not an
//! architecture change.

use std::fmt;
use std::str::FromStr;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::error::InstallError;

/// An installable software package family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Component {
    Cuda,
    OpenCv,
}

impl Component {
    /// All supported components, in display order.
    pub const ALL: [Component; 2] = [Component::Cuda, Component::OpenCv];

    /// Directory name used under the cache root.
    pub fn dir_name(&self) -> &'static str {
        match self {
            Component::Cuda => "cuda",
            Component::OpenCv => "opencv",
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Component::Cuda => write!(f, "CUDA"),
            Component::OpenCv => write!(f, "OpenCV"),
        }
    }
}

impl FromStr for Component {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cuda" => Ok(Component::Cuda),
            "opencv" | "open-cv" => Ok(Component::OpenCv),
            other => Err(format!(
                "unknown component '{other}' (expected 'cuda' or 'opencv')"
            )),
        }
    }
}

/// A supported version of a component and where to obtain its artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionSpec {
    pub component: Component,

    /// Version string, unique within a component.
    pub version: String,

    /// Whether this entry is the component's default.
    pub is_default: bool,

    /// Download URL for the artifact tarball.
    pub source_url: String,

    /// `sha256:<hex>` digest of the tarball, when the mirror publishes
    /// one. Verified on store; absent means the computed digest is
    /// recorded without verification.
    pub expected_checksum: Option<String>,
}

/// The fixed catalog of supported component versions.
#[derive(Debug, Clone)]
pub struct VersionCatalog {
    entries: Vec<VersionSpec>,
}

impl VersionCatalog {
    /// The built-in catalog: the JetPack CUDA stacks and the OpenCV
    /// source releases this tool knows how to install.
    pub fn builtin() -> Self {
        Self::from_entries(vec![
            VersionSpec {
                component: Component::Cuda,
                version: "10.2.89".to_string(),
                is_default: true,
                source_url:
                    "https://repo.download.nvidia.com/jetson/cuda-repo-l4t-10-2-local-10.2.89.tar.gz"
                        .to_string(),
                expected_checksum: None,
            },
            VersionSpec {
                component: Component::Cuda,
                version: "11.4.298".to_string(),
                is_default: false,
                source_url:
                    "https://repo.download.nvidia.com/jetson/cuda-repo-l4t-11-4-local-11.4.298.tar.gz"
                        .to_string(),
                expected_checksum: None,
            },
            VersionSpec {
                component: Component::OpenCv,
                version: "4.4.0".to_string(),
                is_default: true,
                source_url: "https://github.com/opencv/opencv/archive/4.4.0.tar.gz".to_string(),
                expected_checksum: None,
            },
            VersionSpec {
                component: Component::OpenCv,
                version: "4.5.5".to_string(),
                is_default: false,
                source_url: "https://github.com/opencv/opencv/archive/4.5.5.tar.gz".to_string(),
                expected_checksum: None,
            },
            VersionSpec {
                component: Component::OpenCv,
                version: "4.8.0".to_string(),
                is_default: false,
                source_url: "https://github.com/opencv/opencv/archive/4.8.0.tar.gz".to_string(),
                expected_checksum: None,
            },
        ])
        .expect("built-in catalog violates its own invariants")
    }

    /// Build a catalog from entries, validating the invariants: exactly
    /// one default per component, version strings unique within a
    /// component. Entries are ordered by component then newest-first.
    pub fn from_entries(mut entries: Vec<VersionSpec>) -> Result<Self> {
        for component in Component::ALL {
            let of_component: Vec<&VersionSpec> = entries
                .iter()
                .filter(|e| e.component == component)
                .collect();
            if of_component.is_empty() {
                continue;
            }

            let defaults = of_component.iter().filter(|e| e.is_default).count();
            if defaults != 1 {
                bail!(
                    "catalog must have exactly one default {} version, found {}",
                    component,
                    defaults
                );
            }

            let mut versions: Vec<&str> =
                of_component.iter().map(|e| e.version.as_str()).collect();
            versions.sort_unstable();
            versions.dedup();
            if versions.len() != of_component.len() {
                bail!("catalog has duplicate {} version entries", component);
            }
        }

        entries.sort_by(|a, b| {
            let component_order = |c: &Component| Component::ALL.iter().position(|x| x == c);
            component_order(&a.component)
                .cmp(&component_order(&b.component))
                .then_with(|| compare_versions_desc(&a.version, &b.version))
        });

        Ok(Self { entries })
    }

    /// All catalog entries, ordered by component then newest-first.
    pub fn list_versions(&self) -> &[VersionSpec] {
        &self.entries
    }

    /// Version strings known for one component, newest-first.
    pub fn versions_for(&self, component: Component) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| e.component == component)
            .map(|e| e.version.clone())
            .collect()
    }

    /// Resolve a request to a concrete version spec.
    ///
    /// With no requested version the component's default is returned;
    /// otherwise the version must match exactly. Fails with
    /// `UnknownVersion` listing the valid set.
    pub fn resolve(
        &self,
        component: Component,
        requested: Option<&str>,
    ) -> Result<&VersionSpec, InstallError> {
        match requested {
            None => Ok(self
                .entries
                .iter()
                .find(|e| e.component == component && e.is_default)
                .expect("catalog invariant: one default per component")),
            Some(version) => self
                .entries
                .iter()
                .find(|e| e.component == component && e.version == version)
                .ok_or_else(|| InstallError::UnknownVersion {
                    component,
                    requested: version.to_string(),
                    available: self.versions_for(component),
                }),
        }
    }
}

/// Newest-first ordering, semver-aware with lexical fallback.
fn compare_versions_desc(a: &str, b: &str) -> std::cmp::Ordering {
    match (semver::Version::parse(a), semver::Version::parse(b)) {
        (Ok(va), Ok(vb)) => vb.cmp(&va),
        _ => b.cmp(a),
    }
}
