//! Validator configuration
//!
//! `UpgradeSettings` is the raw, serde-friendly layer read from an optional
//! YAML file and overridden by command-line flags. `validate()` turns it into
//! the immutable `UpgradeConfig` handed to every scenario.

use crate::domain::capacity::Capacity;
use crate::domain::model::PollPolicy;
use crate::error::{Error, Result};
use crate::sequencer::profile::DriverProfile;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_UPGRADE_VERSION: &str = "v3.1.0";
pub const DEFAULT_RELEASE_REPO: &str = "https://github.com/ceph/ceph-csi.git";
pub const DEFAULT_NAMESPACE: &str = "default";

// =============================================================================
// Raw Settings
// =============================================================================

/// Configuration as written in a file or given on the command line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UpgradeSettings {
    pub upgrade_testing: bool,
    #[serde(rename = "testRBD")]
    pub test_rbd: bool,
    #[serde(rename = "testCephFS")]
    pub test_cephfs: bool,
    /// Release the scenario upgrades from
    pub upgrade_version: String,
    /// Budget for every convergence wait, in minutes
    pub deploy_timeout: u64,
    /// Seconds between polls
    pub poll_interval: u64,
    #[serde(rename = "cephCSINamespace")]
    pub ceph_csi_namespace: String,
    /// Scenario namespaces are `<prefix>-<driver>`
    pub namespace_prefix: String,
    pub template_root: PathBuf,
    pub working_tree: PathBuf,
    pub release_repo: String,
    pub release_cache_dir: PathBuf,
    pub kubectl: String,
    pub claim_size: String,
    pub expand_size: String,
    pub marker_file: String,
}

impl Default for UpgradeSettings {
    fn default() -> Self {
        Self {
            upgrade_testing: false,
            test_rbd: true,
            test_cephfs: true,
            upgrade_version: DEFAULT_UPGRADE_VERSION.to_string(),
            deploy_timeout: 10,
            poll_interval: 2,
            ceph_csi_namespace: DEFAULT_NAMESPACE.to_string(),
            namespace_prefix: "upgrade-test".to_string(),
            template_root: PathBuf::from("examples"),
            working_tree: PathBuf::from("."),
            release_repo: DEFAULT_RELEASE_REPO.to_string(),
            release_cache_dir: std::env::temp_dir().join("ceph-csi-releases"),
            kubectl: "kubectl".to_string(),
            claim_size: "2Gi".to_string(),
            expand_size: "5Gi".to_string(),
            marker_file: "testClone".to_string(),
        }
    }
}

impl UpgradeSettings {
    /// Load settings from a YAML file; absent keys keep their defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        Ok(serde_yaml::from_str(&raw)?)
    }

    /// Check the settings and freeze them
    pub fn validate(&self) -> Result<UpgradeConfig> {
        if self.upgrade_testing && self.upgrade_version.trim().is_empty() {
            return Err(Error::Configuration(
                "upgrade version is required when upgrade testing is enabled".to_string(),
            ));
        }
        if self.deploy_timeout == 0 {
            return Err(Error::Configuration("deploy timeout must be positive".to_string()));
        }
        let deploy_timeout = self
            .deploy_timeout
            .checked_mul(60)
            .map(Duration::from_secs)
            .ok_or_else(|| {
                Error::Configuration(format!(
                    "deploy timeout of {} minutes is out of range",
                    self.deploy_timeout
                ))
            })?;
        let poll_interval = Duration::from_secs(self.poll_interval);
        if poll_interval.is_zero() || poll_interval >= deploy_timeout {
            return Err(Error::Configuration(format!(
                "poll interval {}s must be positive and shorter than the deploy timeout",
                self.poll_interval
            )));
        }
        if self.ceph_csi_namespace.trim().is_empty() || self.namespace_prefix.trim().is_empty() {
            return Err(Error::Configuration("namespaces must not be empty".to_string()));
        }
        if self.marker_file.is_empty() || self.marker_file.contains('/') {
            return Err(Error::Configuration(format!(
                "marker file '{}' must be a plain file name",
                self.marker_file
            )));
        }

        Ok(UpgradeConfig {
            upgrade_testing: self.upgrade_testing,
            test_rbd: self.test_rbd,
            test_cephfs: self.test_cephfs,
            upgrade_version: self.upgrade_version.trim().to_string(),
            deploy_timeout,
            poll_interval,
            plugin_namespace: self.ceph_csi_namespace.clone(),
            namespace_prefix: self.namespace_prefix.clone(),
            template_root: self.template_root.clone(),
            working_tree: self.working_tree.clone(),
            release_repo: self.release_repo.clone(),
            release_cache_dir: self.release_cache_dir.clone(),
            kubectl: self.kubectl.clone(),
            claim_size: Capacity::parse(&self.claim_size)?,
            expand_size: Capacity::parse(&self.expand_size)?,
            marker_file: self.marker_file.clone(),
        })
    }
}

// =============================================================================
// Validated Configuration
// =============================================================================

/// Immutable configuration shared by every scenario
#[derive(Debug, Clone, PartialEq)]
pub struct UpgradeConfig {
    pub upgrade_testing: bool,
    pub test_rbd: bool,
    pub test_cephfs: bool,
    pub upgrade_version: String,
    pub deploy_timeout: Duration,
    pub poll_interval: Duration,
    /// Namespace the plugin is deployed into
    pub plugin_namespace: String,
    pub namespace_prefix: String,
    pub template_root: PathBuf,
    pub working_tree: PathBuf,
    pub release_repo: String,
    pub release_cache_dir: PathBuf,
    pub kubectl: String,
    pub claim_size: Capacity,
    pub expand_size: Capacity,
    pub marker_file: String,
}

impl Default for UpgradeConfig {
    fn default() -> Self {
        Self {
            upgrade_testing: true,
            test_rbd: true,
            test_cephfs: true,
            upgrade_version: DEFAULT_UPGRADE_VERSION.to_string(),
            deploy_timeout: Duration::from_secs(600),
            poll_interval: Duration::from_secs(2),
            plugin_namespace: DEFAULT_NAMESPACE.to_string(),
            namespace_prefix: "upgrade-test".to_string(),
            template_root: PathBuf::from("examples"),
            working_tree: PathBuf::from("."),
            release_repo: DEFAULT_RELEASE_REPO.to_string(),
            release_cache_dir: std::env::temp_dir().join("ceph-csi-releases"),
            kubectl: "kubectl".to_string(),
            claim_size: Capacity::from_gib(2),
            expand_size: Capacity::from_gib(5),
            marker_file: "testClone".to_string(),
        }
    }
}

impl UpgradeConfig {
    /// Scenarios selected by the flags, in the order they run
    pub fn scenarios(&self) -> Vec<DriverProfile> {
        if !self.upgrade_testing {
            return Vec::new();
        }
        let mut selected = Vec::new();
        if self.test_rbd {
            selected.push(DriverProfile::rbd());
        }
        if self.test_cephfs {
            selected.push(DriverProfile::cephfs());
        }
        selected
    }

    /// Polling policy for every convergence wait
    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            interval: self.poll_interval,
            timeout: self.deploy_timeout,
        }
    }

    /// Namespace holding a scenario's resources
    pub fn scenario_namespace(&self, profile: &DriverProfile) -> String {
        format!("{}-{}", self.namespace_prefix, profile.driver)
    }

    pub fn plugin_namespace_is_default(&self) -> bool {
        self.plugin_namespace == DEFAULT_NAMESPACE
    }
}
