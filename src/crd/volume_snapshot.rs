//! VolumeSnapshot CRD
//!
//! Typed binding for the external-snapshotter `snapshot.storage.k8s.io/v1`
//! VolumeSnapshot. The validator only creates, reads and deletes these; the
//! CRD itself is installed with the snapshot controller.

use crate::domain::model::{Snapshot, SnapshotSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// =============================================================================
// VolumeSnapshot CRD
// =============================================================================

/// Point-in-time snapshot of a PersistentVolumeClaim
#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "snapshot.storage.k8s.io",
    version = "v1",
    kind = "VolumeSnapshot",
    plural = "volumesnapshots",
    status = "VolumeSnapshotStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSnapshotSpec {
    /// Where the snapshot content comes from
    pub source: VolumeSnapshotSource,

    /// Snapshot class; the cluster default is used when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_snapshot_class_name: Option<String>,
}

/// Snapshot source: exactly one field is set
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSnapshotSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent_volume_claim_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_snapshot_content_name: Option<String>,
}

/// Status reported by the snapshot controller
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSnapshotStatus {
    #[serde(default)]
    pub ready_to_use: Option<bool>,

    #[serde(default)]
    pub bound_volume_snapshot_content_name: Option<String>,

    #[serde(default)]
    pub restore_size: Option<String>,

    #[serde(default)]
    pub error: Option<VolumeSnapshotError>,
}

/// Last error observed while taking the snapshot
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSnapshotError {
    #[serde(default)]
    pub message: Option<String>,
}

// =============================================================================
// Conversions
// =============================================================================

impl From<&SnapshotSpec> for VolumeSnapshot {
    fn from(spec: &SnapshotSpec) -> Self {
        VolumeSnapshot {
            metadata: ObjectMeta {
                name: Some(spec.name.clone()),
                namespace: Some(spec.namespace.clone()),
                ..Default::default()
            },
            spec: VolumeSnapshotSpec {
                source: VolumeSnapshotSource {
                    persistent_volume_claim_name: Some(spec.source_claim.clone()),
                    volume_snapshot_content_name: None,
                },
                volume_snapshot_class_name: spec.snapshot_class.clone(),
            },
            status: None,
        }
    }
}

impl From<&VolumeSnapshot> for Snapshot {
    fn from(vs: &VolumeSnapshot) -> Self {
        let status = vs.status.clone().unwrap_or_default();
        Snapshot {
            spec: SnapshotSpec {
                name: vs.metadata.name.clone().unwrap_or_default(),
                namespace: vs.metadata.namespace.clone().unwrap_or_default(),
                source_claim: vs
                    .spec
                    .source
                    .persistent_volume_claim_name
                    .clone()
                    .unwrap_or_default(),
                snapshot_class: vs.spec.volume_snapshot_class_name.clone(),
            },
            ready_to_use: status.ready_to_use.unwrap_or(false),
            error: status.error.and_then(|e| e.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_yaml_round_trip_through_domain() {
        let yaml = r#"
apiVersion: snapshot.storage.k8s.io/v1
kind: VolumeSnapshot
metadata:
  name: rbd-pvc-snapshot
  namespace: upgrade-test
spec:
  volumeSnapshotClassName: csi-rbdplugin-snapclass
  source:
    persistentVolumeClaimName: rbd-pvc
status:
  readyToUse: true
"#;
        let vs: VolumeSnapshot = serde_yaml::from_str(yaml).unwrap();
        let snap = Snapshot::from(&vs);
        assert_eq!(snap.name(), "rbd-pvc-snapshot");
        assert_eq!(snap.spec.source_claim, "rbd-pvc");
        assert!(snap.ready_to_use);

        let rebuilt = VolumeSnapshot::from(&snap.spec);
        assert_eq!(
            rebuilt.spec.volume_snapshot_class_name.as_deref(),
            Some("csi-rbdplugin-snapclass")
        );
        assert!(rebuilt.status.is_none());
    }

    #[test]
    fn test_missing_status_is_not_ready() {
        let vs = VolumeSnapshot::new("snap", VolumeSnapshotSpec::default());
        let snap = Snapshot::from(&vs);
        assert!(!snap.ready_to_use);
        assert!(snap.error.is_none());
    }
}
