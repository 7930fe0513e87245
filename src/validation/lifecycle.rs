//! Resource Lifecycle Manager
//!
//! Creates claim/workload pairs, waits until the workload is Running with its
//! claim Bound, and removes them again. Removal tolerates resources that are
//! already gone and waits until the platform no longer reports them.

use crate::domain::model::{
    ClaimSpec, ConsumerWorkload, PollPolicy, ResourceId, VolumeClaim, WorkloadSpec,
};
use crate::domain::ports::PlatformGatewayRef;
use crate::error::{Error, Result};
use crate::platform::{wait_for, wait_until};
use tracing::{debug, info};

/// Binds and unbinds claim/workload pairs
#[derive(Clone)]
pub struct LifecycleManager {
    gateway: PlatformGatewayRef,
    poll: PollPolicy,
}

impl LifecycleManager {
    pub fn new(gateway: PlatformGatewayRef, poll: PollPolicy) -> Self {
        Self { gateway, poll }
    }

    pub fn gateway(&self) -> &PlatformGatewayRef {
        &self.gateway
    }

    /// Create `claim`, then a workload mounting it, and wait until both are ready
    ///
    /// The workload is pointed at `claim` regardless of the claim name in its
    /// template. Returns the bound claim and the running workload.
    pub async fn bind(
        &self,
        claim: &ClaimSpec,
        workload: &WorkloadSpec,
    ) -> Result<(VolumeClaim, ConsumerWorkload)> {
        info!("Binding {} to {}", workload.id(), claim.id());
        self.gateway
            .create_claim(claim)
            .await
            .map_err(|e| creation_error(&claim.id(), e))?;

        let mut workload = workload.clone();
        workload.claim_name = claim.name.clone();
        let running = self.attach(&workload).await?;

        let bound = self.gateway.get_claim(&claim.namespace, &claim.name).await?;
        Ok((bound, running))
    }

    /// Create a workload on an existing claim and wait until it is ready
    pub async fn attach(&self, workload: &WorkloadSpec) -> Result<ConsumerWorkload> {
        self.gateway
            .create_workload(workload)
            .await
            .map_err(|e| creation_error(&workload.id(), e))?;
        self.wait_ready(workload).await
    }

    /// Wait until the workload is Running and its claim is Bound
    pub async fn wait_ready(&self, workload: &WorkloadSpec) -> Result<ConsumerWorkload> {
        let what = format!("{} running on bound claim {}", workload.id(), workload.claim_name);
        let gateway = &self.gateway;

        let ready = wait_for(self.poll, &what, || async move {
            let current = gateway
                .get_workload(&workload.namespace, &workload.name)
                .await?;
            if !current.is_running() {
                return Ok(None);
            }
            let claim = gateway
                .get_claim(&workload.namespace, &workload.claim_name)
                .await?;
            Ok(claim.is_bound().then_some(current))
        })
        .await?;

        info!("Workload {} is ready", workload.id());
        Ok(ready)
    }

    /// Delete a workload and wait until it is gone; the claim is kept
    pub async fn detach(&self, workload: &WorkloadSpec) -> Result<()> {
        self.remove(&workload.id()).await
    }

    /// Delete the workload, then the claim, waiting for each to disappear
    pub async fn unbind(&self, claim: &ClaimSpec, workload: &WorkloadSpec) -> Result<()> {
        info!("Unbinding {} from {}", workload.id(), claim.id());
        self.remove(&workload.id()).await?;
        self.remove(&claim.id()).await
    }

    /// Delete a resource, tolerating absence, and wait until it is gone
    pub async fn remove(&self, id: &ResourceId) -> Result<()> {
        match self.gateway.delete(id).await {
            Ok(()) => debug!("Deleted {}", id),
            Err(e) if e.is_not_found() => {
                debug!("{} already absent", id);
                return Ok(());
            }
            Err(e) => return Err(e),
        }

        let gateway = &self.gateway;
        wait_until(self.poll, &format!("{} deleted", id), || async move {
            Ok(!gateway.exists(id).await?)
        })
        .await
    }
}

/// Mount path of a workload's claim
pub fn mount_path_of(workload: &WorkloadSpec) -> &str {
    &workload.mount_path
}

fn creation_error(id: &ResourceId, err: Error) -> Error {
    match err {
        Error::ResourceCreation { .. } => err,
        other => Error::ResourceCreation {
            resource: id.to_string(),
            reason: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::capacity::Capacity;
    use crate::domain::model::Labels;
    use crate::domain::ports::{DeployTarget, PlatformGateway, PluginDeployer};
    use crate::platform::{SimulatedConfig, SimulatedPlatform};
    use assert_matches::assert_matches;
    use std::sync::Arc;
    use std::time::Duration;

    fn fast_poll() -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(1),
            timeout: Duration::from_millis(500),
        }
    }

    fn claim() -> ClaimSpec {
        ClaimSpec {
            name: "rbd-pvc".into(),
            namespace: "upgrade".into(),
            size: Capacity::from_gib(2),
            storage_class: Some("csi-rbd-sc".into()),
            access_modes: vec!["ReadWriteOnce".into()],
            volume_mode: None,
            data_source: None,
        }
    }

    fn workload() -> WorkloadSpec {
        WorkloadSpec {
            name: "csi-rbd-demo-pod".into(),
            namespace: "upgrade".into(),
            labels: Labels::single("app", "upgrade-testing"),
            image: "nginx".into(),
            command: None,
            volume_name: "mypvc".into(),
            mount_path: "/var/lib/www/html".into(),
            claim_name: "from-template".into(),
        }
    }

    async fn platform() -> Arc<SimulatedPlatform> {
        let platform = Arc::new(SimulatedPlatform::new(SimulatedConfig::default()));
        platform.create_namespace("upgrade").await.unwrap();
        platform.deploy(&DeployTarget::WorkingTree).await.unwrap();
        platform
    }

    #[tokio::test]
    async fn test_bind_waits_for_running_and_bound() {
        let platform = platform().await;
        let lifecycle = LifecycleManager::new(platform.clone(), fast_poll());

        let (bound, running) = lifecycle.bind(&claim(), &workload()).await.unwrap();
        assert!(bound.is_bound());
        assert!(running.is_running());
        assert_eq!(running.spec.claim_name, "rbd-pvc");
        assert_eq!(mount_path_of(&running.spec), "/var/lib/www/html");
    }

    #[tokio::test]
    async fn test_bind_times_out_without_plugin() {
        let platform = Arc::new(SimulatedPlatform::new(SimulatedConfig::default()));
        platform.create_namespace("upgrade").await.unwrap();
        let lifecycle = LifecycleManager::new(
            platform,
            PollPolicy {
                interval: Duration::from_millis(1),
                timeout: Duration::from_millis(20),
            },
        );

        let result = lifecycle.bind(&claim(), &workload()).await;
        assert_matches!(result, Err(Error::TimeoutWaitingForReady { .. }));
    }

    #[tokio::test]
    async fn test_duplicate_claim_is_creation_error() {
        let platform = platform().await;
        let lifecycle = LifecycleManager::new(platform.clone(), fast_poll());
        platform.create_claim(&claim()).await.unwrap();

        let result = lifecycle.bind(&claim(), &workload()).await;
        assert_matches!(result, Err(Error::ResourceCreation { .. }));
    }

    #[tokio::test]
    async fn test_detach_keeps_claim_and_unbind_is_idempotent() {
        let platform = platform().await;
        let lifecycle = LifecycleManager::new(platform.clone(), fast_poll());
        let (_, running) = lifecycle.bind(&claim(), &workload()).await.unwrap();

        lifecycle.detach(&running.spec).await.unwrap();
        assert!(!platform.exists(&running.id()).await.unwrap());
        assert!(platform.exists(&claim().id()).await.unwrap());

        lifecycle.unbind(&claim(), &running.spec).await.unwrap();
        assert!(!platform.exists(&claim().id()).await.unwrap());
        lifecycle.unbind(&claim(), &running.spec).await.unwrap();
    }

    #[tokio::test]
    async fn test_attach_rebinds_same_claim() {
        let platform = platform().await;
        let lifecycle = LifecycleManager::new(platform.clone(), fast_poll());
        let (_, running) = lifecycle.bind(&claim(), &workload()).await.unwrap();
        lifecycle.detach(&running.spec).await.unwrap();

        let rebound = lifecycle.attach(&running.spec).await.unwrap();
        assert!(rebound.is_running());
        assert_eq!(rebound.spec.claim_name, "rbd-pvc");
    }
}
