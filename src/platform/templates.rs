//! YAML Template Loader
//!
//! Reads PVC, Pod and VolumeSnapshot manifests from disk and converts them
//! into scenario requests. Any read or parse failure is reported as
//! `Error::TemplateLoad` carrying the file path.

use crate::crd::VolumeSnapshot;
use crate::domain::model::{ClaimSpec, Snapshot, SnapshotSpec, WorkloadSpec};
use crate::domain::ports::TemplateLoader;
use crate::error::{Error, Result};
use crate::platform::kubernetes::{
    claim_spec_from_pvc, unsupported_pod_fields, workload_spec_from_pod,
};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod};
use serde::de::DeserializeOwned;
use std::path::Path;
use tracing::{debug, warn};

/// Loads manifests with serde_yaml
#[derive(Debug, Clone, Default)]
pub struct YamlTemplateLoader;

impl YamlTemplateLoader {
    pub fn new() -> Self {
        Self
    }

    async fn read<T: DeserializeOwned>(&self, path: &Path) -> Result<T> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| template_error(path, e))?;
        debug!("Loaded template {}", path.display());
        serde_yaml::from_str(&raw).map_err(|e| template_error(path, e))
    }
}

fn template_error(path: &Path, reason: impl std::fmt::Display) -> Error {
    Error::TemplateLoad {
        path: path.display().to_string(),
        reason: reason.to_string(),
    }
}

/// Re-tag conversion errors with the template path
fn at_path<T>(path: &Path, result: Result<T>) -> Result<T> {
    result.map_err(|e| match e {
        Error::TemplateLoad { reason, .. } => template_error(path, reason),
        other => template_error(path, other),
    })
}

#[async_trait]
impl TemplateLoader for YamlTemplateLoader {
    async fn load_claim(&self, path: &Path) -> Result<ClaimSpec> {
        let pvc: PersistentVolumeClaim = self.read(path).await?;
        at_path(path, claim_spec_from_pvc(&pvc))
    }

    async fn load_workload(&self, path: &Path) -> Result<WorkloadSpec> {
        let pod: Pod = self.read(path).await?;
        let dropped = unsupported_pod_fields(&pod);
        if !dropped.is_empty() {
            warn!(
                "Pod template {} sets fields that are not recreated: {}",
                path.display(),
                dropped.join(", ")
            );
        }
        at_path(path, workload_spec_from_pod(&pod))
    }

    async fn load_snapshot(&self, path: &Path) -> Result<SnapshotSpec> {
        let vs: VolumeSnapshot = self.read(path).await?;
        Ok(Snapshot::from(&vs).spec)
    }
}
