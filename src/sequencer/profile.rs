//! Driver profiles
//!
//! Names and paths that differ between the RBD and CephFS upgrade scenarios.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Storage plugin driver under test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Driver {
    Rbd,
    CephFs,
}

impl fmt::Display for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Driver::Rbd => write!(f, "rbd"),
            Driver::CephFs => write!(f, "cephfs"),
        }
    }
}

/// Per-driver constants for an upgrade scenario
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverProfile {
    pub driver: Driver,
    /// Provisioner Deployment
    pub provisioner: &'static str,
    /// Node plugin DaemonSet
    pub node_plugin: &'static str,
    /// Template directory under the template root
    pub template_dir: &'static str,
    /// Plugin manifest directory within a checkout
    pub manifest_dir: &'static str,
    /// Fixture manifests within a checkout
    pub fixtures: &'static [&'static str],
    pub snapshot_name: &'static str,
    /// `app` label of the workload bound before the upgrade
    pub primary_label: &'static str,
    /// `app` label of the workload rebound after the upgrade
    pub rebound_label: &'static str,
    pub snap_clone_workload: &'static str,
    pub snap_clone_label: &'static str,
    pub clone_workload: &'static str,
    pub clone_label: &'static str,
}

impl DriverProfile {
    pub const fn rbd() -> Self {
        Self {
            driver: Driver::Rbd,
            provisioner: "csi-rbdplugin-provisioner",
            node_plugin: "csi-rbdplugin",
            template_dir: "rbd",
            manifest_dir: "deploy/rbd/kubernetes",
            fixtures: &[
                "examples/rbd/secret.yaml",
                "examples/rbd/storageclass.yaml",
                "examples/rbd/snapshotclass.yaml",
            ],
            snapshot_name: "rbd-pvc-snapshot",
            primary_label: "upgrade-testing",
            rebound_label: "upgrade-testing",
            snap_clone_workload: "app-clone-from-snap",
            snap_clone_label: "validate-snap-clone",
            clone_workload: "appclone",
            clone_label: "validate-clone",
        }
    }

    pub const fn cephfs() -> Self {
        Self {
            driver: Driver::CephFs,
            provisioner: "csi-cephfsplugin-provisioner",
            node_plugin: "csi-cephfsplugin",
            template_dir: "cephfs",
            manifest_dir: "deploy/cephfs/kubernetes",
            fixtures: &[
                "examples/cephfs/secret.yaml",
                "examples/cephfs/storageclass.yaml",
                "examples/cephfs/snapshotclass.yaml",
            ],
            snapshot_name: "cephfs-pvc-snapshot",
            primary_label: "cephfs-upgrade-testing",
            rebound_label: "upgrade-testing",
            snap_clone_workload: "snap-clone-cephfs",
            snap_clone_label: "validate-snap-cephfs",
            clone_workload: "appclone",
            clone_label: "validate-clone",
        }
    }

    pub fn for_driver(driver: Driver) -> Self {
        match driver {
            Driver::Rbd => Self::rbd(),
            Driver::CephFs => Self::cephfs(),
        }
    }

    /// Path of a template file for this driver
    pub fn template(&self, root: &Path, file: &str) -> PathBuf {
        root.join(self.template_dir).join(file)
    }
}
