//! Apply, watch and roll back against a local repository, an in-memory
//! registry and a simulated controller.

mod support;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use selsync_core::cleanup::{CompensatingCleanup, StepOutcome};
use selsync_core::driver::ChangeDriver;
use selsync_core::error::Error;
use selsync_core::manifest::ParameterStore;
use selsync_core::probe::StatusProbe;
use selsync_core::records::marker;
use selsync_core::registry::ArtifactRegistry;
use selsync_core::types::{BumpKind, HealthState, SyncState};

use support::{FakeCluster, FakePackager, Fixture, MemoryRegistry, POINTER_KEY, ScriptedAccessor};

struct Harness {
    fixture: Fixture,
    registry: Arc<MemoryRegistry>,
    packager: Arc<FakePackager>,
    cluster: Arc<FakeCluster>,
}

impl Harness {
    fn new() -> Self {
        let fixture = Fixture::new();
        let cluster = Arc::new(FakeCluster::new(&fixture, 2, 1));
        Self {
            fixture,
            registry: Arc::new(MemoryRegistry::new()),
            packager: Arc::new(FakePackager::default()),
            cluster,
        }
    }

    fn driver(&self) -> ChangeDriver {
        let params: Arc<dyn ParameterStore> = Arc::new(self.fixture.params());
        ChangeDriver::new(
            self.fixture.store(),
            params,
            self.packager.clone(),
            self.registry.clone(),
            support::executor(),
        )
        .with_resources(self.fixture.resources())
    }

    fn cleanup(&self) -> CompensatingCleanup {
        CompensatingCleanup::new(
            self.fixture.store(),
            self.registry.clone(),
            support::detector(self.cluster.clone(), support::fast_detector()),
            support::executor(),
        )
    }

    fn probe(&self) -> StatusProbe {
        StatusProbe::new(self.cluster.clone())
    }
}

#[tokio::test(start_paused = true)]
async fn apply_then_watch_converges_on_new_replica_count() {
    let h = Harness::new();

    let record = h.driver().apply("svcA", 2, BumpKind::Patch).await.unwrap();

    assert_eq!(record.previous_value, 1);
    assert_eq!(record.new_value, 2);
    assert_eq!(record.published_artifact_id, "svcA");
    assert_eq!(record.published_artifact_version, "0.1.1");
    assert_eq!(record.previous_artifact_version, "0.1.0");
    let commit = record.change_commit.clone().unwrap();

    assert_eq!(h.fixture.read("charts/svcA/values.yaml", "replicaCount"), "2");
    assert_eq!(h.fixture.read("charts/svcA/Chart.yaml", "version"), "0.1.1");
    assert_eq!(h.fixture.read("apps/svcA.yaml", POINTER_KEY), "0.1.1");
    assert_eq!(h.fixture.read("apps/svcB.yaml", POINTER_KEY), "0.2.0");
    assert!(h.fixture.head_message().contains(marker::CHANGE_TRAILER));
    assert_eq!(h.fixture.remote_main(), Some(commit));
    assert!(h.registry.contains("svcA", "0.1.1"));
    assert!(h.fixture.package_dir().join("svcA-0.1.1.tgz").exists());

    let detector = support::detector(h.cluster.clone(), support::fast_detector());
    let outcome = detector.watch(&record.forward_target()).await;

    assert!(outcome.fully_converged);
    assert_eq!(outcome.last_status().observed_replica_count, Some(2));
    assert_eq!(
        outcome.last_status().observed_revision.as_deref(),
        Some("0.1.1")
    );
}

#[tokio::test(start_paused = true)]
async fn rollback_restores_previous_state_and_removes_artifact() {
    let h = Harness::new();
    let record = h.driver().apply("svcA", 2, BumpKind::Patch).await.unwrap();
    let change_commit = record.change_commit.clone().unwrap();

    let report = h.cleanup().rollback(&record).await;

    assert_eq!(report.local_revert, StepOutcome::Success);
    assert_eq!(report.reconvergence, StepOutcome::Success);
    assert_eq!(report.remote_cleanup, StepOutcome::Success);
    assert_eq!(report.local_packages, StepOutcome::Success);
    assert!(report.fully_clean());
    assert!(report.warnings.is_empty());

    let status = h.probe().fetch("svcA").await;
    assert_eq!(status.observed_replica_count, Some(record.previous_value));
    assert_eq!(status.observed_revision.as_deref(), Some("0.1.0"));
    assert_eq!(h.registry.search("svcA", "0.1.1").await.unwrap(), None);

    assert_eq!(h.fixture.read("charts/svcA/values.yaml", "replicaCount"), "1");
    assert_eq!(h.fixture.read("apps/svcA.yaml", POINTER_KEY), "0.1.0");
    assert_eq!(
        marker::parse_revert(&h.fixture.head_message()),
        Some(change_commit.as_str())
    );
    assert_eq!(h.fixture.remote_main(), report.revert_commit);
    assert!(!h.fixture.package_dir().join("svcA-0.1.1.tgz").exists());
}

#[tokio::test(start_paused = true)]
async fn second_rollback_is_already_clean() {
    let h = Harness::new();
    let record = h.driver().apply("svcA", 2, BumpKind::Patch).await.unwrap();
    let cleanup = h.cleanup();

    let first = cleanup.rollback(&record).await;
    assert!(first.succeeded());
    let head_after_first = h.fixture.store().head().unwrap();

    let second = cleanup.rollback(&record).await;

    assert!(second.succeeded());
    assert_eq!(second.local_revert, StepOutcome::AlreadyClean);
    assert_eq!(second.remote_cleanup, StepOutcome::AlreadyClean);
    assert_eq!(second.local_packages, StepOutcome::AlreadyClean);
    assert_eq!(second.revert_commit, None);
    assert_eq!(h.fixture.store().head().unwrap(), head_after_first);
    assert_eq!(h.registry.deletes.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn rollback_with_unreachable_registry_still_reverts() {
    let h = Harness::new();
    let record = h.driver().apply("svcA", 2, BumpKind::Patch).await.unwrap();
    h.registry.set_unreachable(true);

    let report = h.cleanup().rollback(&record).await;

    assert_eq!(report.local_revert, StepOutcome::Success);
    assert_eq!(report.remote_cleanup, StepOutcome::SkippedWarning);
    assert_eq!(report.remote_cleanup.to_string(), "skipped-warning");
    assert_eq!(report.local_packages, StepOutcome::Success);
    assert!(report.succeeded());
    assert!(!report.fully_clean());
    assert!(report.warnings.iter().any(|w| w.contains("registry")));

    h.registry.set_unreachable(false);
    assert!(h.registry.contains("svcA", "0.1.1"));
}

#[tokio::test(start_paused = true)]
async fn failed_revert_stops_the_rollback() {
    let h = Harness::new();
    let mut record = h.driver().apply("svcA", 2, BumpKind::Patch).await.unwrap();
    record.change_commit = Some("0123456789012345678901234567890123456789".to_string());

    let report = h.cleanup().rollback(&record).await;

    assert_eq!(report.local_revert, StepOutcome::Failed);
    assert_eq!(report.reconvergence, StepOutcome::NotRun);
    assert_eq!(report.remote_cleanup, StepOutcome::NotRun);
    assert_eq!(report.local_packages, StepOutcome::NotRun);
    assert!(!report.succeeded());
    assert!(report.watch.is_none());
    assert!(report.error.as_deref().unwrap().contains("Change commit not found"));
    assert!(h.registry.contains("svcA", "0.1.1"));
    assert_eq!(h.registry.deletes.load(Ordering::SeqCst), 0);
    assert!(h.fixture.package_dir().join("svcA-0.1.1.tgz").exists());
    assert_eq!(h.fixture.read("charts/svcA/values.yaml", "replicaCount"), "2");
}

#[tokio::test(start_paused = true)]
async fn reconvergence_timeout_still_removes_artifact() {
    let h = Harness::new();
    let record = h.driver().apply("svcA", 2, BumpKind::Patch).await.unwrap();
    let stuck = Arc::new(ScriptedAccessor::new(vec![support::sample(
        SyncState::Synced,
        HealthState::Healthy,
        "0.1.1",
        2,
    )]));
    let cleanup = CompensatingCleanup::new(
        h.fixture.store(),
        h.registry.clone(),
        support::detector(stuck, support::fast_detector()),
        support::executor(),
    );

    let report = cleanup.rollback(&record).await;

    assert_eq!(report.local_revert, StepOutcome::Success);
    assert_eq!(report.reconvergence, StepOutcome::SkippedWarning);
    assert_eq!(report.remote_cleanup, StepOutcome::Success);
    assert_eq!(report.local_packages, StepOutcome::Success);
    assert!(report.succeeded());
    assert!(!report.fully_clean());
    assert!(report.warnings.iter().any(|w| w.contains("did not re-converge")));
    assert!(!report.watch.as_ref().unwrap().fully_converged);
    assert!(!h.registry.contains("svcA", "0.1.1"));
    assert!(!h.fixture.package_dir().join("svcA-0.1.1.tgz").exists());
}

#[tokio::test(start_paused = true)]
async fn publish_failure_restores_edited_files() {
    let h = Harness::new();
    let head = h.fixture.store().head().unwrap();
    h.registry.set_unreachable(true);

    let err = h
        .driver()
        .apply("svcA", 2, BumpKind::Patch)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::TransientNetwork { attempts: 3, .. }));
    assert_eq!(h.fixture.read("charts/svcA/values.yaml", "replicaCount"), "1");
    assert_eq!(h.fixture.read("charts/svcA/Chart.yaml", "version"), "0.1.0");
    assert_eq!(h.fixture.read("apps/svcA.yaml", POINTER_KEY), "0.1.0");
    assert_eq!(h.fixture.store().head().unwrap(), head);
    assert_eq!(h.fixture.remote_main(), None);
}

#[tokio::test(start_paused = true)]
async fn packaging_failure_is_terminal_and_restores_files() {
    let h = Harness::new();
    h.packager.fail.store(true, Ordering::SeqCst);

    let err = h
        .driver()
        .apply("svcA", 3, BumpKind::Minor)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Terminal(_)));
    assert!(format!("{:#}", anyhow::Error::new(err)).contains("0.2.0"));
    assert_eq!(h.fixture.read("charts/svcA/values.yaml", "replicaCount"), "1");
    assert_eq!(h.fixture.read("charts/svcA/Chart.yaml", "version"), "0.1.0");
    assert_eq!(h.registry.publishes.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn unknown_resource_is_rejected() {
    let h = Harness::new();
    let err = h
        .driver()
        .apply("svcZ", 2, BumpKind::Patch)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Unknown resource: svcZ"));
}

#[tokio::test(start_paused = true)]
async fn commit_waits_for_a_released_index_lock() {
    let h = Harness::new();
    let lock = h.fixture.workdir.join(".git").join("index.lock");
    std::fs::write(&lock, "").unwrap();

    let release = lock.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(7)).await;
        std::fs::remove_file(release).unwrap();
    });

    let start = tokio::time::Instant::now();
    let record = h.driver().apply("svcA", 2, BumpKind::Patch).await.unwrap();

    // attempts at 0s and 5s hit the lock, the third at 15s succeeds
    assert_eq!(start.elapsed(), Duration::from_secs(15));
    assert!(record.change_commit.is_some());
    assert!(h.fixture.head_message().contains(marker::CHANGE_TRAILER));
}

#[tokio::test(start_paused = true)]
async fn held_index_lock_reports_remediation() {
    let h = Harness::new();
    std::fs::write(h.fixture.workdir.join(".git").join("index.lock"), "").unwrap();

    let err = h
        .driver()
        .apply("svcA", 2, BumpKind::Patch)
        .await
        .unwrap_err();

    assert!(err.is_lock());
    assert!(matches!(err, Error::TransientLock { attempts: 3, .. }));
    assert!(err.remediation().unwrap().contains("conflicting holder"));
}

#[tokio::test(start_paused = true)]
async fn failed_commit_restores_files_so_a_rerun_starts_clean() {
    let h = Harness::new();
    let head = h.fixture.store().head().unwrap();
    let lock = h.fixture.workdir.join(".git").join("index.lock");
    std::fs::write(&lock, "").unwrap();

    let err = h
        .driver()
        .apply("svcA", 2, BumpKind::Patch)
        .await
        .unwrap_err();

    assert!(err.is_lock());
    assert_eq!(h.fixture.read("charts/svcA/values.yaml", "replicaCount"), "1");
    assert_eq!(h.fixture.read("charts/svcA/Chart.yaml", "version"), "0.1.0");
    assert_eq!(h.fixture.read("apps/svcA.yaml", POINTER_KEY), "0.1.0");
    assert_eq!(h.fixture.store().head().unwrap(), head);
    // published before the commit failed
    assert!(h.registry.contains("svcA", "0.1.1"));

    std::fs::remove_file(&lock).unwrap();
    let record = h.driver().apply("svcA", 2, BumpKind::Patch).await.unwrap();

    assert_eq!(record.previous_value, 1);
    assert_eq!(record.previous_artifact_version, "0.1.0");
    assert_eq!(record.published_artifact_version, "0.1.1");
}

#[tokio::test(start_paused = true)]
async fn plan_has_no_side_effects() {
    let h = Harness::new();
    let head = h.fixture.store().head().unwrap();

    let plan = h.driver().plan("svcA", 4, BumpKind::Major).unwrap();

    assert_eq!(plan.previous_value, 1);
    assert_eq!(plan.next_version, "1.0.0");
    assert_eq!(plan.previous_pointer, "0.1.0");
    assert_eq!(plan.actions.len(), 5);
    assert_eq!(plan.preview_record().reverse_target().target_revision, "0.1.0");
    assert_eq!(h.fixture.read("charts/svcA/values.yaml", "replicaCount"), "1");
    assert_eq!(h.fixture.store().head().unwrap(), head);
    assert_eq!(h.registry.publishes.load(Ordering::SeqCst), 0);
}
