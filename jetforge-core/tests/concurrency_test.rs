//! Run-lock and cancellation behavior: one install per component at a
//! time, and a cancelled fetch leaves no partial state behind.

mod common;

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use common::{tarball_with_root, test_config, FakeExecutor, FakeFetcher};
use jetforge_core::cache::PackageCache;
use jetforge_core::catalog::Component;
use jetforge_core::error::InstallError;
use jetforge_core::orchestrator::Orchestrator;
use jetforge_core::pipeline::RunStatus;

/// Poll until the gated fetcher has been entered, so the test knows the
/// first install holds the run-lock.
async fn wait_for_fetch(fetcher: &FakeFetcher) {
    for _ in 0..100 {
        if fetcher.calls() > 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("fetcher was never entered");
}

#[tokio::test]
async fn second_install_for_same_component_fails_fast() {
    let temp_dir = TempDir::new().unwrap();
    let config = test_config(temp_dir.path());

    let (fetcher, gate) = FakeFetcher::gated(tarball_with_root("cuda-repo-10.2.89"));
    let fetcher = Arc::new(fetcher);
    let executor = Arc::new(FakeExecutor::new());
    let orchestrator = Arc::new(Orchestrator::new(&config, fetcher.clone(), executor));

    let background = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.install(Component::Cuda, None).await })
    };
    wait_for_fetch(&fetcher).await;

    // The first install is parked inside the fetch, holding the lock.
    let err = orchestrator
        .install(Component::Cuda, None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        InstallError::AlreadyRunning {
            component: Component::Cuda
        }
    ));

    // Release the first install and let it finish.
    gate.notify_one();
    let run = background.await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Succeeded);

    // The lock was released: a follow-up install proceeds (and is
    // served from the cache).
    let rerun = orchestrator.install(Component::Cuda, None).await.unwrap();
    assert_eq!(rerun.status, RunStatus::Succeeded);
}

#[tokio::test]
async fn installs_for_different_components_do_not_block_each_other() {
    let temp_dir = TempDir::new().unwrap();
    let config = test_config(temp_dir.path());

    let (fetcher, gate) = FakeFetcher::gated(tarball_with_root("opencv-4.4.0"));
    let fetcher = Arc::new(fetcher);
    let executor = Arc::new(FakeExecutor::new());
    let orchestrator = Arc::new(Orchestrator::new(&config, fetcher.clone(), executor));

    let background = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.install(Component::OpenCv, None).await })
    };
    wait_for_fetch(&fetcher).await;

    // CUDA is not blocked by the OpenCV install still parked in its
    // fetch. Only the first fetch is gated, so this one runs through.
    let cuda = orchestrator.install(Component::Cuda, None).await;
    assert!(!matches!(
        cuda,
        Err(InstallError::AlreadyRunning { .. })
    ));

    gate.notify_one();
    background.await.unwrap().unwrap();
}

#[tokio::test]
async fn cancelled_fetch_leaves_no_partial_state() {
    let temp_dir = TempDir::new().unwrap();
    let config = test_config(temp_dir.path());

    let (fetcher, _gate) = FakeFetcher::gated(tarball_with_root("cuda-repo-10.2.89"));
    let fetcher = Arc::new(fetcher);
    let executor = Arc::new(FakeExecutor::new());
    let orchestrator = Arc::new(Orchestrator::new(&config, fetcher.clone(), executor));

    let cancel = CancellationToken::new();
    let background = {
        let orchestrator = orchestrator.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            orchestrator
                .install_with_cancel(Component::Cuda, None, cancel)
                .await
        })
    };
    wait_for_fetch(&fetcher).await;

    cancel.cancel();
    let err = background.await.unwrap().unwrap_err();
    assert!(matches!(err, InstallError::Cancelled { .. }));

    // Partial bytes were discarded, never stored, and no run started.
    let cache = PackageCache::new(&config.cache_root);
    assert!(cache.lookup(Component::Cuda, "10.2.89", None).is_none());
    assert!(orchestrator.status(Component::Cuda).is_none());

    // The run-lock was released by the failed install.
    let err = orchestrator
        .install_with_cancel(Component::Cuda, None, CancellationToken::new())
        .await;
    assert!(!matches!(
        err,
        Err(InstallError::AlreadyRunning { .. })
    ));
}
