//! Snapshot & Clone Orchestrator
//!
//! Snapshots a bound claim and provisions new claims from either a snapshot
//! or an existing claim. Feature gating is the caller's concern.

use crate::domain::capacity::Capacity;
use crate::domain::model::{
    ClaimSpec, ConsumerWorkload, DataSource, PollPolicy, Snapshot, SnapshotSpec, VolumeClaim,
    WorkloadSpec,
};
use crate::error::{Error, Result};
use crate::platform::wait_for;
use crate::validation::lifecycle::LifecycleManager;
use tracing::info;

/// Creates snapshots and clones
#[derive(Clone)]
pub struct CloneOrchestrator {
    lifecycle: LifecycleManager,
    poll: PollPolicy,
}

impl CloneOrchestrator {
    pub fn new(lifecycle: LifecycleManager, poll: PollPolicy) -> Self {
        Self { lifecycle, poll }
    }

    /// Snapshot a claim and wait until the snapshot is ready to use
    pub async fn snapshot(&self, spec: &SnapshotSpec) -> Result<Snapshot> {
        info!("Creating snapshot {} of claim {}", spec.name, spec.source_claim);
        let gateway = self.lifecycle.gateway();
        gateway
            .create_snapshot(spec)
            .await
            .map_err(|e| snapshot_error(spec, e.to_string()))?;

        let ready = wait_for(self.poll, &format!("snapshot {} ready", spec.id()), || async move {
            let snapshot = gateway.get_snapshot(&spec.namespace, &spec.name).await?;
            if let Some(reason) = snapshot.error {
                return Err(snapshot_error(spec, reason));
            }
            Ok(snapshot.ready_to_use.then_some(snapshot))
        })
        .await
        .map_err(|e| match e {
            Error::SnapshotCreation { .. } => e,
            other => snapshot_error(spec, other.to_string()),
        })?;

        info!("Snapshot {} is ready", spec.id());
        Ok(ready)
    }

    /// Provision `claim` from `snapshot` and bind `workload` to it
    pub async fn clone_from_snapshot(
        &self,
        snapshot: &SnapshotSpec,
        claim: &ClaimSpec,
        workload: &WorkloadSpec,
        size: Capacity,
    ) -> Result<(VolumeClaim, ConsumerWorkload)> {
        let clone = ClaimSpec {
            size,
            data_source: Some(DataSource::Snapshot(snapshot.name.clone())),
            ..claim.clone()
        };
        info!("Restoring snapshot {} into claim {}", snapshot.name, clone.name);
        self.lifecycle.bind(&clone, workload).await
    }

    /// Provision `claim` as a copy of `source` and bind `workload` to it
    pub async fn clone_from_claim(
        &self,
        source: &ClaimSpec,
        claim: &ClaimSpec,
        workload: &WorkloadSpec,
        size: Capacity,
    ) -> Result<(VolumeClaim, ConsumerWorkload)> {
        let clone = ClaimSpec {
            size,
            data_source: Some(DataSource::Claim(source.name.clone())),
            ..claim.clone()
        };
        info!("Cloning claim {} into {}", source.name, clone.name);
        self.lifecycle.bind(&clone, workload).await
    }
}

fn snapshot_error(spec: &SnapshotSpec, reason: String) -> Error {
    Error::SnapshotCreation {
        name: spec.name.clone(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::Labels;
    use crate::domain::ports::{DeployTarget, PlatformGateway, PluginDeployer};
    use crate::platform::{FaultPlan, SimulatedConfig, SimulatedPlatform};
    use crate::validation::integrity::{assert_equal, IntegrityVerifier};
    use assert_matches::assert_matches;
    use std::sync::Arc;
    use std::time::Duration;

    const NS: &str = "upgrade";

    fn poll() -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(1),
            timeout: Duration::from_millis(100),
        }
    }

    fn claim(name: &str) -> ClaimSpec {
        ClaimSpec {
            name: name.into(),
            namespace: NS.into(),
            size: Capacity::from_gib(1),
            storage_class: Some("csi-rbd-sc".into()),
            access_modes: vec!["ReadWriteOnce".into()],
            volume_mode: None,
            data_source: None,
        }
    }

    fn workload(name: &str, app: &str) -> WorkloadSpec {
        WorkloadSpec {
            name: name.into(),
            namespace: NS.into(),
            labels: Labels::single("app", app),
            image: "nginx".into(),
            command: None,
            volume_name: "mypvc".into(),
            mount_path: "/var/lib/www/html".into(),
            claim_name: String::new(),
        }
    }

    fn snapshot_spec() -> SnapshotSpec {
        SnapshotSpec {
            name: "rbd-pvc-snapshot".into(),
            namespace: NS.into(),
            source_claim: "rbd-pvc".into(),
            snapshot_class: Some("csi-rbdplugin-snapclass".into()),
        }
    }

    async fn setup(config: SimulatedConfig) -> (Arc<SimulatedPlatform>, CloneOrchestrator) {
        let platform = Arc::new(SimulatedPlatform::new(config));
        platform.create_namespace(NS).await.unwrap();
        platform.deploy(&DeployTarget::WorkingTree).await.unwrap();
        let lifecycle = LifecycleManager::new(platform.clone(), poll());
        lifecycle
            .bind(&claim("rbd-pvc"), &workload("app", "upgrade-testing"))
            .await
            .unwrap();
        (platform.clone(), CloneOrchestrator::new(lifecycle, poll()))
    }

    #[tokio::test]
    async fn test_snapshot_clone_preserves_content() {
        let (platform, clones) = setup(SimulatedConfig::default()).await;
        let verifier = IntegrityVerifier::new(platform.clone());
        let source = workload("app", "upgrade-testing");
        let path = "/var/lib/www/html/testClone";
        verifier
            .write_marker(&source, path, &source.labels, "upgrade marker")
            .await
            .unwrap();
        let c0 = verifier
            .capture_checksum(&source, path, &source.labels)
            .await
            .unwrap();

        clones.snapshot(&snapshot_spec()).await.unwrap();
        let target = workload("app-clone-from-snap", "validate-snap-clone");
        let (restored, _) = clones
            .clone_from_snapshot(
                &snapshot_spec(),
                &claim("rbd-pvc-restore"),
                &target,
                Capacity::from_gib(2),
            )
            .await
            .unwrap();
        assert_eq!(restored.spec.size, Capacity::from_gib(2));

        let c2 = verifier
            .capture_checksum(&target, path, &target.labels)
            .await
            .unwrap();
        assert_equal(&c0, &c2).unwrap();
    }

    #[tokio::test]
    async fn test_snapshot_clone_ignores_later_writes() {
        let (platform, clones) = setup(SimulatedConfig::default()).await;
        let verifier = IntegrityVerifier::new(platform.clone());
        let source = workload("app", "upgrade-testing");
        let path = "/var/lib/www/html/testClone";
        verifier
            .write_marker(&source, path, &source.labels, "written before snapshot")
            .await
            .unwrap();
        let c0 = verifier
            .capture_checksum(&source, path, &source.labels)
            .await
            .unwrap();

        clones.snapshot(&snapshot_spec()).await.unwrap();
        verifier
            .write_marker(&source, path, &source.labels, "written after snapshot")
            .await
            .unwrap();
        let later = verifier
            .capture_checksum(&source, path, &source.labels)
            .await
            .unwrap();
        assert_ne!(c0.digest, later.digest);

        let target = workload("app-clone-from-snap", "validate-snap-clone");
        clones
            .clone_from_snapshot(
                &snapshot_spec(),
                &claim("rbd-pvc-restore"),
                &target,
                Capacity::from_gib(2),
            )
            .await
            .unwrap();
        let restored = verifier
            .capture_checksum(&target, path, &target.labels)
            .await
            .unwrap();
        assert_eq!(restored.digest, c0.digest);
        assert_ne!(restored.digest, later.digest);
    }

    #[tokio::test]
    async fn test_clone_from_claim_sets_data_source() {
        let (_, clones) = setup(SimulatedConfig::default()).await;
        let (clone, running) = clones
            .clone_from_claim(
                &claim("rbd-pvc"),
                &claim("rbd-pvc-clone"),
                &workload("appclone", "validate-clone"),
                Capacity::from_gib(2),
            )
            .await
            .unwrap();
        assert_eq!(clone.spec.data_source, Some(DataSource::Claim("rbd-pvc".into())));
        assert_eq!(running.spec.claim_name, "rbd-pvc-clone");
    }

    #[tokio::test]
    async fn test_snapshot_error_is_reported() {
        let config = SimulatedConfig {
            faults: FaultPlan {
                snapshot_error: Some("Failed to create snapshot: pool full".into()),
                ..Default::default()
            },
            ..Default::default()
        };
        let (_, clones) = setup(config).await;
        let result = clones.snapshot(&snapshot_spec()).await;
        assert_matches!(result, Err(Error::SnapshotCreation { reason, .. }) if reason.contains("pool full"));
    }

    #[tokio::test]
    async fn test_snapshot_of_missing_claim_times_out_as_creation_error() {
        let (_, clones) = setup(SimulatedConfig::default()).await;
        let spec = SnapshotSpec {
            source_claim: "ghost".into(),
            ..snapshot_spec()
        };
        let result = clones.snapshot(&spec).await;
        assert_matches!(result, Err(Error::SnapshotCreation { .. }));
    }
}
