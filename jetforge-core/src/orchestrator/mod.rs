//! Install orchestration entry point
//!
//! Ties the catalog, cache, fetcher, and pipeline together: resolve the
//! requested version, look it up in the cache, download and store it on
//! a miss, then hand the artifact to the installer pipeline. One
//! install per component may execute at a time; a second request fails
//! fast with `AlreadyRunning` instead of queuing. Status queries read
//! persisted run state and never contend with a running install.
//!
//! Every major transition emits a structured, timestamped log event, so
//! a failed run can be diagnosed from the log alone.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::cache::PackageCache;
use crate::catalog::{Component, VersionCatalog, VersionSpec};
use crate::config::Config;
use crate::error::InstallError;
use crate::fetch::Fetch;
use crate::pipeline::{plans, InstallRun, Pipeline, StepExecutor};

/// Public entry point for install operations.
pub struct Orchestrator {
    catalog: VersionCatalog,
    cache: PackageCache,
    fetcher: Arc<dyn Fetch>,
    executor: Arc<dyn StepExecutor>,
    profile: PathBuf,
    active: Mutex<HashSet<Component>>,
}

impl Orchestrator {
    pub fn new(config: &Config, fetcher: Arc<dyn Fetch>, executor: Arc<dyn StepExecutor>) -> Self {
        Self {
            catalog: VersionCatalog::builtin(),
            cache: PackageCache::new(&config.cache_root),
            fetcher,
            executor,
            profile: config.profile(),
            active: Mutex::new(HashSet::new()),
        }
    }

    /// The catalog entries, ordered by component then newest-first.
    pub fn list_available(&self) -> &[VersionSpec] {
        self.catalog.list_versions()
    }

    /// The persisted state of the component's last install run, if any.
    pub fn status(&self, component: Component) -> Option<InstallRun> {
        InstallRun::load(&self.cache.component_dir(component))
    }

    /// Install a component at the requested (or default) version.
    pub async fn install(
        &self,
        component: Component,
        version: Option<&str>,
    ) -> Result<InstallRun, InstallError> {
        self.install_with_cancel(component, version, CancellationToken::new())
            .await
    }

    /// Install with an externally controlled cancellation signal. The
    /// token propagates into the fetcher and the executing pipeline
    /// step; a cancelled run is persisted as resumable.
    pub async fn install_with_cancel(
        &self,
        component: Component,
        version: Option<&str>,
        cancel: CancellationToken,
    ) -> Result<InstallRun, InstallError> {
        let spec = self.catalog.resolve(component, version)?.clone();
        info!(component = %component, version = %spec.version, "resolved install request");

        let _guard = RunGuard::acquire(&self.active, component)?;

        let artifact = match self.cache.lookup(
            component,
            &spec.version,
            spec.expected_checksum.as_deref(),
        ) {
            Some(artifact) => {
                info!(
                    component = %component,
                    version = %spec.version,
                    path = %artifact.local_path.display(),
                    "cache hit"
                );
                artifact
            }
            None => {
                info!(
                    component = %component,
                    version = %spec.version,
                    url = %spec.source_url,
                    "cache miss, fetching artifact"
                );
                let bytes = self.fetcher.fetch(&spec, &cancel).await?;
                let artifact = self.cache.store(
                    component,
                    &spec.version,
                    &bytes,
                    spec.expected_checksum.as_deref(),
                )?;
                info!(
                    component = %component,
                    version = %spec.version,
                    checksum = %artifact.checksum,
                    size = artifact.size,
                    "artifact stored"
                );
                artifact
            }
        };

        let paths = plans::PlanPaths {
            work_dir: self
                .cache
                .component_dir(component)
                .join(format!("work-{}", spec.version)),
            profile: self.profile.clone(),
        };
        let steps = plans::steps_for(&spec, &paths);

        let pipeline = Pipeline::new(self.cache.component_dir(component), self.executor.clone());
        let run = pipeline.run(&artifact, &steps, &cancel).await?;

        info!(
            component = %component,
            version = %spec.version,
            status = ?run.status,
            skipped = run.steps_skipped.len(),
            "install finished"
        );
        Ok(run)
    }
}

/// RAII run-lock scoped to one component. Dropping the guard releases
/// the slot on every exit path, including errors and cancellation.
#[derive(Debug)]
struct RunGuard<'a> {
    active: &'a Mutex<HashSet<Component>>,
    component: Component,
}

impl<'a> RunGuard<'a> {
    fn acquire(
        active: &'a Mutex<HashSet<Component>>,
        component: Component,
    ) -> Result<Self, InstallError> {
        let mut set = active.lock().expect("component run-lock poisoned");
        if !set.insert(component) {
            return Err(InstallError::AlreadyRunning { component });
        }
        Ok(Self { active, component })
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.active
            .lock()
            .expect("component run-lock poisoned")
            .remove(&self.component);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_guard_excludes_same_component_only() {
        let active = Mutex::new(HashSet::new());

        let guard = RunGuard::acquire(&active, Component::Cuda).unwrap();
        let err = RunGuard::acquire(&active, Component::Cuda).unwrap_err();
        assert!(matches!(
            err,
            InstallError::AlreadyRunning {
                component: Component::Cuda
            }
        ));

        // A different component is not blocked.
        let other = RunGuard::acquire(&active, Component::OpenCv).unwrap();
        drop(other);

        drop(guard);
        // Released on drop.
        RunGuard::acquire(&active, Component::Cuda).unwrap();
    }
}
