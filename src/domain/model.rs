//! Domain model for upgrade scenarios
//!
//! Platform-neutral views of the resources a scenario manipulates. The
//! Kubernetes adapter converts these to and from k8s-openapi objects; the
//! simulated platform stores them directly.

use crate::domain::capacity::Capacity;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

// =============================================================================
// Resource Identity
// =============================================================================

/// Kinds of resources the validator creates or observes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    Claim,
    Workload,
    Snapshot,
    Namespace,
}

impl ResourceKind {
    /// Kubernetes kind name
    pub fn api_kind(&self) -> &'static str {
        match self {
            ResourceKind::Claim => "PersistentVolumeClaim",
            ResourceKind::Workload => "Pod",
            ResourceKind::Snapshot => "VolumeSnapshot",
            ResourceKind::Namespace => "Namespace",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.api_kind())
    }
}

/// Identity of a resource: (kind, name, namespace)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceId {
    pub kind: ResourceKind,
    pub namespace: String,
    pub name: String,
}

impl ResourceId {
    pub fn new(kind: ResourceKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn claim(namespace: &str, name: &str) -> Self {
        Self::new(ResourceKind::Claim, namespace, name)
    }

    pub fn workload(namespace: &str, name: &str) -> Self {
        Self::new(ResourceKind::Workload, namespace, name)
    }

    pub fn snapshot(namespace: &str, name: &str) -> Self {
        Self::new(ResourceKind::Snapshot, namespace, name)
    }

    /// Namespaces are cluster scoped; the name doubles as the namespace
    pub fn namespace(name: &str) -> Self {
        Self::new(ResourceKind::Namespace, name, name)
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ResourceKind::Namespace => write!(f, "{}/{}", self.kind, self.name),
            _ => write!(f, "{}/{}/{}", self.kind, self.namespace, self.name),
        }
    }
}

// =============================================================================
// Labels
// =============================================================================

/// Label set used both to tag workloads and to select them
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Labels(pub BTreeMap<String, String>);

impl Labels {
    pub fn single(key: &str, value: &str) -> Self {
        Self(BTreeMap::from([(key.to_string(), value.to_string())]))
    }

    /// Render as a Kubernetes equality-based selector (`a=b,c=d`)
    pub fn selector(&self) -> String {
        self.0
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Whether every label in `self` is present in `other`
    pub fn matches(&self, other: &BTreeMap<String, String>) -> bool {
        self.0.iter().all(|(k, v)| other.get(k) == Some(v))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// =============================================================================
// Claims
// =============================================================================

/// Where a new claim takes its initial content from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name")]
pub enum DataSource {
    Snapshot(String),
    Claim(String),
}

/// Request for a claim
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimSpec {
    pub name: String,
    pub namespace: String,
    pub size: Capacity,
    pub storage_class: Option<String>,
    pub access_modes: Vec<String>,
    pub volume_mode: Option<String>,
    pub data_source: Option<DataSource>,
}

impl ClaimSpec {
    pub fn id(&self) -> ResourceId {
        ResourceId::claim(&self.namespace, &self.name)
    }
}

/// Claim binding phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClaimPhase {
    Pending,
    Bound,
    Lost,
}

/// Observed claim
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeClaim {
    pub spec: ClaimSpec,
    pub phase: ClaimPhase,
    /// Capacity reported in status once bound
    pub capacity: Option<Capacity>,
    /// A `Resizing` or `FileSystemResizePending` condition is present
    pub resize_in_progress: bool,
}

impl VolumeClaim {
    pub fn id(&self) -> ResourceId {
        self.spec.id()
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn namespace(&self) -> &str {
        &self.spec.namespace
    }

    pub fn is_bound(&self) -> bool {
        self.phase == ClaimPhase::Bound
    }
}

// =============================================================================
// Workloads
// =============================================================================

/// Request for a workload that mounts one claim
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadSpec {
    pub name: String,
    pub namespace: String,
    pub labels: Labels,
    pub image: String,
    pub command: Option<Vec<String>>,
    pub volume_name: String,
    pub mount_path: String,
    pub claim_name: String,
}

impl WorkloadSpec {
    pub fn id(&self) -> ResourceId {
        ResourceId::workload(&self.namespace, &self.name)
    }

    /// Join a file name onto the mount path
    pub fn path_in_mount(&self, file: &str) -> String {
        format!("{}/{}", self.mount_path.trim_end_matches('/'), file)
    }
}

/// Workload lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkloadPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl WorkloadPhase {
    pub fn parse(phase: &str) -> Self {
        match phase {
            "Pending" => WorkloadPhase::Pending,
            "Running" => WorkloadPhase::Running,
            "Succeeded" => WorkloadPhase::Succeeded,
            "Failed" => WorkloadPhase::Failed,
            _ => WorkloadPhase::Unknown,
        }
    }
}

/// Observed workload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsumerWorkload {
    pub spec: WorkloadSpec,
    pub phase: WorkloadPhase,
}

impl ConsumerWorkload {
    pub fn id(&self) -> ResourceId {
        self.spec.id()
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn namespace(&self) -> &str {
        &self.spec.namespace
    }

    pub fn is_running(&self) -> bool {
        self.phase == WorkloadPhase::Running
    }
}

// =============================================================================
// Snapshots
// =============================================================================

/// Request for a point-in-time snapshot of a claim
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotSpec {
    pub name: String,
    pub namespace: String,
    pub source_claim: String,
    pub snapshot_class: Option<String>,
}

impl SnapshotSpec {
    pub fn id(&self) -> ResourceId {
        ResourceId::snapshot(&self.namespace, &self.name)
    }
}

/// Observed snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub spec: SnapshotSpec,
    pub ready_to_use: bool,
    /// Error message reported by the snapshot controller
    pub error: Option<String>,
}

impl Snapshot {
    pub fn id(&self) -> ResourceId {
        self.spec.id()
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }
}

// =============================================================================
// Rollouts
// =============================================================================

/// Workload controllers whose rollout gates plugin readiness
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RolloutKind {
    Deployment,
    DaemonSet,
}

impl fmt::Display for RolloutKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RolloutKind::Deployment => write!(f, "Deployment"),
            RolloutKind::DaemonSet => write!(f, "DaemonSet"),
        }
    }
}

/// Replica counts reported for a Deployment or DaemonSet
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolloutStatus {
    pub desired: i32,
    pub updated: i32,
    pub available: i32,
    /// The controller has observed the latest spec generation
    pub observed_current: bool,
}

impl RolloutStatus {
    /// All desired replicas are updated and available
    pub fn is_complete(&self) -> bool {
        self.observed_current
            && self.desired > 0
            && self.updated >= self.desired
            && self.available >= self.desired
    }
}

// =============================================================================
// Execution
// =============================================================================

/// Output of a command run inside a workload
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
}

// =============================================================================
// Checksums
// =============================================================================

/// Digest of a file inside a workload at a point in time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecksumRecord {
    pub workload: String,
    pub path: String,
    pub digest: String,
    pub taken_at: chrono::DateTime<chrono::Utc>,
}

// =============================================================================
// Test Context
// =============================================================================

/// Fixed-interval polling policy for convergence waits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            timeout: Duration::from_secs(600),
        }
    }
}

/// Read-only context for one scenario
#[derive(Debug, Clone)]
pub struct TestContext {
    /// Namespace holding every scenario resource
    pub namespace: String,
    /// Labels applied to the primary workload and used to select it
    pub selector: Labels,
    pub poll: PollPolicy,
}
