//! Domain Ports - Boundaries between the validation engine and the outside
//!
//! The engine only talks to the cluster, the plugin deployer, the template
//! files and the workload shell through these traits. Adapters in
//! [`crate::platform`] implement them against Kubernetes or in memory.

use crate::domain::capacity::Capacity;
use crate::domain::model::{
    ClaimSpec, ConsumerWorkload, ExecOutput, Labels, ResourceId, RolloutKind, RolloutStatus,
    Snapshot, SnapshotSpec, VolumeClaim, WorkloadSpec,
};
use crate::error::Result;
use crate::gate::VersionInfo;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

// =============================================================================
// Platform Gateway Port
// =============================================================================

/// Port for cluster resource operations
///
/// Every call is a single request; convergence is observed by polling the
/// getters through [`crate::platform::wait_until`].
#[async_trait]
pub trait PlatformGateway: Send + Sync {
    /// Create a claim
    async fn create_claim(&self, spec: &ClaimSpec) -> Result<VolumeClaim>;

    /// Fetch a claim, `Error::NotFound` when absent
    async fn get_claim(&self, namespace: &str, name: &str) -> Result<VolumeClaim>;

    /// Raise the requested size of a claim
    async fn request_claim_size(
        &self,
        namespace: &str,
        name: &str,
        size: Capacity,
    ) -> Result<VolumeClaim>;

    /// Create a workload
    async fn create_workload(&self, spec: &WorkloadSpec) -> Result<ConsumerWorkload>;

    /// Fetch a workload, `Error::NotFound` when absent
    async fn get_workload(&self, namespace: &str, name: &str) -> Result<ConsumerWorkload>;

    /// Create a snapshot
    async fn create_snapshot(&self, spec: &SnapshotSpec) -> Result<Snapshot>;

    /// Fetch a snapshot, `Error::NotFound` when absent
    async fn get_snapshot(&self, namespace: &str, name: &str) -> Result<Snapshot>;

    /// Create a namespace; succeeds if it already exists
    async fn create_namespace(&self, name: &str) -> Result<()>;

    /// Delete any resource, `Error::NotFound` when absent
    async fn delete(&self, id: &ResourceId) -> Result<()>;

    /// Whether a resource currently exists
    async fn exists(&self, id: &ResourceId) -> Result<bool>;

    /// Replica status of a Deployment or DaemonSet
    async fn rollout_status(
        &self,
        kind: RolloutKind,
        namespace: &str,
        name: &str,
    ) -> Result<RolloutStatus>;

    /// Platform version
    async fn server_version(&self) -> Result<VersionInfo>;
}

// =============================================================================
// Execution Port
// =============================================================================

/// Port for running probes inside a running workload
#[async_trait]
pub trait WorkloadExecutor: Send + Sync {
    /// Run `command` in the first running workload matching `selector`
    async fn exec_in_workload(
        &self,
        namespace: &str,
        selector: &Labels,
        command: &[String],
    ) -> Result<ExecOutput>;
}

// =============================================================================
// Template Loader Port
// =============================================================================

/// Port for loading declarative resource templates
#[async_trait]
pub trait TemplateLoader: Send + Sync {
    async fn load_claim(&self, path: &Path) -> Result<ClaimSpec>;

    async fn load_workload(&self, path: &Path) -> Result<WorkloadSpec>;

    async fn load_snapshot(&self, path: &Path) -> Result<SnapshotSpec>;
}

// =============================================================================
// Plugin Deployer Port
// =============================================================================

/// Which plugin build to deploy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeployTarget {
    /// A tagged release fetched from the release repository
    Release(String),
    /// The manifests in the current working tree
    WorkingTree,
}

impl std::fmt::Display for DeployTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeployTarget::Release(version) => write!(f, "release {}", version),
            DeployTarget::WorkingTree => write!(f, "working tree"),
        }
    }
}

/// Port for installing and removing the storage plugin
#[async_trait]
pub trait PluginDeployer: Send + Sync {
    /// Install the plugin manifests of `target`
    async fn deploy(&self, target: &DeployTarget) -> Result<()>;

    /// Remove the currently deployed plugin
    async fn remove(&self) -> Result<()>;

    /// Install storage/snapshot class fixtures used by the templates
    async fn apply_fixtures(&self) -> Result<()>;

    /// Remove fixtures; absent fixtures are not an error
    async fn remove_fixtures(&self) -> Result<()>;
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type PlatformGatewayRef = Arc<dyn PlatformGateway>;
pub type WorkloadExecutorRef = Arc<dyn WorkloadExecutor>;
pub type TemplateLoaderRef = Arc<dyn TemplateLoader>;
pub type PluginDeployerRef = Arc<dyn PluginDeployer>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deploy_target_display() {
        assert_eq!(
            DeployTarget::Release("v3.1.0".into()).to_string(),
            "release v3.1.0"
        );
        assert_eq!(DeployTarget::WorkingTree.to_string(), "working tree");
    }
}
