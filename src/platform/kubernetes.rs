//! Kubernetes Platform Adapter
//!
//! Implements the platform gateway and workload executor ports on top of
//! kube-rs. Claims and workloads map to PersistentVolumeClaims and Pods,
//! snapshots to the external-snapshotter VolumeSnapshot CRD.

use crate::crd::VolumeSnapshot;
use crate::domain::capacity::Capacity;
use crate::domain::model::{
    ClaimPhase, ClaimSpec, ConsumerWorkload, DataSource, ExecOutput, Labels, ResourceId,
    ResourceKind, RolloutKind, RolloutStatus, Snapshot, SnapshotSpec, VolumeClaim, WorkloadPhase,
    WorkloadSpec,
};
use crate::domain::ports::{PlatformGateway, WorkloadExecutor};
use crate::error::{Error, Result};
use crate::gate::VersionInfo;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::{
    Container, Namespace, PersistentVolumeClaim, PersistentVolumeClaimSpec,
    PersistentVolumeClaimVolumeSource, Pod, PodSpec, TypedLocalObjectReference, Volume,
    VolumeMount, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{AttachParams, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Api, Client};
use std::collections::BTreeMap;
use tokio::io::AsyncReadExt;
use tracing::{debug, info};

const STORAGE: &str = "storage";
const SNAPSHOT_API_GROUP: &str = "snapshot.storage.k8s.io";

// =============================================================================
// Kubernetes Gateway
// =============================================================================

/// Gateway to a live Kubernetes cluster
#[derive(Clone)]
pub struct KubeGateway {
    client: Client,
}

impl KubeGateway {
    /// Create a gateway from an existing client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Create a gateway from the ambient kubeconfig or in-cluster config
    pub async fn try_default() -> Result<Self> {
        let client = Client::try_default().await?;
        Ok(Self::new(client))
    }

    fn claims(&self, namespace: &str) -> Api<PersistentVolumeClaim> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn snapshots(&self, namespace: &str) -> Api<VolumeSnapshot> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

/// Translate a kube error into the validator taxonomy
fn api_error(err: kube::Error, operation: &str, id: &ResourceId) -> Error {
    match err {
        kube::Error::Api(ae) if ae.code == 404 => Error::NotFound {
            kind: id.kind.api_kind().to_string(),
            name: id.name.clone(),
            namespace: id.namespace.clone(),
        },
        kube::Error::Api(ae) => Error::PlatformApi {
            operation: operation.to_string(),
            resource: id.to_string(),
            transient: ae.code == 429 || ae.code >= 500,
            reason: format!("{} ({})", ae.message, ae.code),
        },
        other => {
            let transient = Error::Kube(other).is_transient();
            Error::PlatformApi {
                operation: operation.to_string(),
                resource: id.to_string(),
                reason: "request did not reach the API server".to_string(),
                transient,
            }
        }
    }
}

#[async_trait]
impl PlatformGateway for KubeGateway {
    async fn create_claim(&self, spec: &ClaimSpec) -> Result<VolumeClaim> {
        let pvc = pvc_from_spec(spec);
        info!("Creating PVC {}/{} ({})", spec.namespace, spec.name, spec.size);
        let created = self
            .claims(&spec.namespace)
            .create(&PostParams::default(), &pvc)
            .await
            .map_err(|e| api_error(e, "create", &spec.id()))?;
        claim_from_pvc(&created)
    }

    async fn get_claim(&self, namespace: &str, name: &str) -> Result<VolumeClaim> {
        let pvc = self
            .claims(namespace)
            .get(name)
            .await
            .map_err(|e| api_error(e, "get", &ResourceId::claim(namespace, name)))?;
        claim_from_pvc(&pvc)
    }

    async fn request_claim_size(
        &self,
        namespace: &str,
        name: &str,
        size: Capacity,
    ) -> Result<VolumeClaim> {
        let patch = serde_json::json!({
            "spec": {
                "resources": {
                    "requests": { "storage": size.to_string() }
                }
            }
        });
        info!("Requesting {} for PVC {}/{}", size, namespace, name);
        let pvc = self
            .claims(namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| api_error(e, "resize", &ResourceId::claim(namespace, name)))?;
        claim_from_pvc(&pvc)
    }

    async fn create_workload(&self, spec: &WorkloadSpec) -> Result<ConsumerWorkload> {
        let pod = pod_from_spec(spec);
        info!(
            "Creating pod {}/{} bound to PVC {}",
            spec.namespace, spec.name, spec.claim_name
        );
        let created = self
            .pods(&spec.namespace)
            .create(&PostParams::default(), &pod)
            .await
            .map_err(|e| api_error(e, "create", &spec.id()))?;
        workload_from_pod(&created)
    }

    async fn get_workload(&self, namespace: &str, name: &str) -> Result<ConsumerWorkload> {
        let pod = self
            .pods(namespace)
            .get(name)
            .await
            .map_err(|e| api_error(e, "get", &ResourceId::workload(namespace, name)))?;
        workload_from_pod(&pod)
    }

    async fn create_snapshot(&self, spec: &SnapshotSpec) -> Result<Snapshot> {
        let vs = VolumeSnapshot::from(spec);
        info!(
            "Creating VolumeSnapshot {}/{} of PVC {}",
            spec.namespace, spec.name, spec.source_claim
        );
        let created = self
            .snapshots(&spec.namespace)
            .create(&PostParams::default(), &vs)
            .await
            .map_err(|e| api_error(e, "create", &spec.id()))?;
        Ok(Snapshot::from(&created))
    }

    async fn get_snapshot(&self, namespace: &str, name: &str) -> Result<Snapshot> {
        let vs = self
            .snapshots(namespace)
            .get(name)
            .await
            .map_err(|e| api_error(e, "get", &ResourceId::snapshot(namespace, name)))?;
        Ok(Snapshot::from(&vs))
    }

    async fn create_namespace(&self, name: &str) -> Result<()> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let id = ResourceId::namespace(name);

        match api.get(name).await {
            Ok(_) => {
                debug!("Namespace {} already exists", name);
                return Ok(());
            }
            Err(kube::Error::Api(ae)) if ae.code == 404 => {}
            Err(e) => return Err(api_error(e, "get", &id)),
        }

        let ns = Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(BTreeMap::from([(
                    "app.kubernetes.io/managed-by".to_string(),
                    "csi-upgrade-validator".to_string(),
                )])),
                ..Default::default()
            },
            ..Default::default()
        };

        info!("Creating namespace {}", name);
        match api.create(&PostParams::default(), &ns).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(()),
            Err(e) => Err(api_error(e, "create", &id)),
        }
    }

    async fn delete(&self, id: &ResourceId) -> Result<()> {
        let dp = DeleteParams::default();
        let result = match id.kind {
            ResourceKind::Claim => self.claims(&id.namespace).delete(&id.name, &dp).await.map(|_| ()),
            ResourceKind::Workload => self.pods(&id.namespace).delete(&id.name, &dp).await.map(|_| ()),
            ResourceKind::Snapshot => self
                .snapshots(&id.namespace)
                .delete(&id.name, &dp)
                .await
                .map(|_| ()),
            ResourceKind::Namespace => {
                let api: Api<Namespace> = Api::all(self.client.clone());
                api.delete(&id.name, &dp).await.map(|_| ())
            }
        };
        result.map_err(|e| api_error(e, "delete", id))?;
        debug!("Deleted {}", id);
        Ok(())
    }

    async fn exists(&self, id: &ResourceId) -> Result<bool> {
        let result = match id.kind {
            ResourceKind::Claim => self.get_claim(&id.namespace, &id.name).await.map(|_| ()),
            ResourceKind::Workload => self.get_workload(&id.namespace, &id.name).await.map(|_| ()),
            ResourceKind::Snapshot => self.get_snapshot(&id.namespace, &id.name).await.map(|_| ()),
            ResourceKind::Namespace => {
                let api: Api<Namespace> = Api::all(self.client.clone());
                api.get(&id.name)
                    .await
                    .map(|_| ())
                    .map_err(|e| api_error(e, "get", id))
            }
        };
        match result {
            Ok(()) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn rollout_status(
        &self,
        kind: RolloutKind,
        namespace: &str,
        name: &str,
    ) -> Result<RolloutStatus> {
        let id = ResourceId::new(ResourceKind::Workload, namespace, name);
        match kind {
            RolloutKind::Deployment => {
                let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
                let deployment = api.get(name).await.map_err(|e| api_error(e, "get", &id))?;
                Ok(deployment_rollout(&deployment))
            }
            RolloutKind::DaemonSet => {
                let api: Api<DaemonSet> = Api::namespaced(self.client.clone(), namespace);
                let ds = api.get(name).await.map_err(|e| api_error(e, "get", &id))?;
                Ok(daemonset_rollout(&ds))
            }
        }
    }

    async fn server_version(&self) -> Result<VersionInfo> {
        let info = self.client.apiserver_version().await?;
        VersionInfo::from_parts(&info.major, &info.minor, &info.git_version)
    }
}

#[async_trait]
impl WorkloadExecutor for KubeGateway {
    async fn exec_in_workload(
        &self,
        namespace: &str,
        selector: &Labels,
        command: &[String],
    ) -> Result<ExecOutput> {
        let pods = self.pods(namespace);
        let rendered = command.join(" ");
        let label_selector = selector.selector();
        let execution_error = |workload: &str, reason: String| Error::Execution {
            workload: workload.to_string(),
            command: rendered.clone(),
            reason,
        };

        let list = pods
            .list(&ListParams::default().labels(&label_selector))
            .await
            .map_err(|e| execution_error(&label_selector, e.to_string()))?;

        // Exec into the first running pod, like `kubectl exec` on a selector
        let pod_name = list
            .items
            .iter()
            .find(|pod| pod_phase(pod) == WorkloadPhase::Running)
            .and_then(|pod| pod.metadata.name.clone())
            .ok_or_else(|| {
                execution_error(&label_selector, "no running pod matches selector".into())
            })?;

        debug!("Executing `{}` in pod {}/{}", rendered, namespace, pod_name);

        let mut attached = pods
            .exec(
                &pod_name,
                command.to_vec(),
                &AttachParams::default().stdout(true).stderr(true),
            )
            .await
            .map_err(|e| execution_error(&pod_name, e.to_string()))?;

        let stdout_reader = attached.stdout();
        let stderr_reader = attached.stderr();
        let status = attached.take_status();

        let (stdout, stderr) = tokio::join!(read_stream(stdout_reader), read_stream(stderr_reader));
        let stdout = stdout.map_err(|e| execution_error(&pod_name, e.to_string()))?;
        let stderr = stderr.map_err(|e| execution_error(&pod_name, e.to_string()))?;

        if let Some(status) = status {
            if let Some(status) = status.await {
                if status.status.as_deref() == Some("Failure") {
                    let reason = status
                        .message
                        .filter(|m| !m.is_empty())
                        .unwrap_or_else(|| stderr.trim().to_string());
                    return Err(execution_error(&pod_name, reason));
                }
            }
        }

        attached
            .join()
            .await
            .map_err(|e| execution_error(&pod_name, e.to_string()))?;

        Ok(ExecOutput { stdout, stderr })
    }
}

async fn read_stream<R>(reader: Option<R>) -> std::io::Result<String>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut buffer = String::new();
    if let Some(mut reader) = reader {
        reader.read_to_string(&mut buffer).await?;
    }
    Ok(buffer)
}

// =============================================================================
// Conversions
// =============================================================================

/// Build a PVC object from a claim request
pub fn pvc_from_spec(spec: &ClaimSpec) -> PersistentVolumeClaim {
    let data_source = spec.data_source.as_ref().map(|source| match source {
        DataSource::Snapshot(name) => TypedLocalObjectReference {
            api_group: Some(SNAPSHOT_API_GROUP.to_string()),
            kind: "VolumeSnapshot".to_string(),
            name: name.clone(),
        },
        DataSource::Claim(name) => TypedLocalObjectReference {
            api_group: None,
            kind: "PersistentVolumeClaim".to_string(),
            name: name.clone(),
        },
    });

    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(spec.name.clone()),
            namespace: Some(spec.namespace.clone()),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(spec.access_modes.clone()),
            storage_class_name: spec.storage_class.clone(),
            volume_mode: spec.volume_mode.clone(),
            data_source,
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([(
                    STORAGE.to_string(),
                    Quantity(spec.size.to_string()),
                )])),
                ..Default::default()
            }),
            ..Default::default()
        }),
        status: None,
    }
}

/// Extract the claim request from a PVC object
pub fn claim_spec_from_pvc(pvc: &PersistentVolumeClaim) -> Result<ClaimSpec> {
    let name = pvc.metadata.name.clone().unwrap_or_default();
    let spec = pvc.spec.clone().unwrap_or_default();

    let size = spec
        .resources
        .as_ref()
        .and_then(|r| r.requests.as_ref())
        .and_then(|requests| requests.get(STORAGE))
        .map(|q| Capacity::parse(&q.0))
        .transpose()?
        .ok_or_else(|| Error::CapacityParse(format!("PVC {} has no storage request", name)))?;

    let data_source = spec.data_source.as_ref().and_then(|ds| match ds.kind.as_str() {
        "VolumeSnapshot" => Some(DataSource::Snapshot(ds.name.clone())),
        "PersistentVolumeClaim" => Some(DataSource::Claim(ds.name.clone())),
        _ => None,
    });

    Ok(ClaimSpec {
        name,
        namespace: pvc.metadata.namespace.clone().unwrap_or_default(),
        size,
        storage_class: spec.storage_class_name.clone(),
        access_modes: spec.access_modes.clone().unwrap_or_default(),
        volume_mode: spec.volume_mode.clone(),
        data_source,
    })
}

/// Observed claim state from a PVC object
pub fn claim_from_pvc(pvc: &PersistentVolumeClaim) -> Result<VolumeClaim> {
    let spec = claim_spec_from_pvc(pvc)?;
    let status = pvc.status.clone().unwrap_or_default();

    let phase = match status.phase.as_deref() {
        Some("Bound") => ClaimPhase::Bound,
        Some("Lost") => ClaimPhase::Lost,
        _ => ClaimPhase::Pending,
    };
    let capacity = status
        .capacity
        .as_ref()
        .and_then(|c| c.get(STORAGE))
        .map(|q| Capacity::parse(&q.0))
        .transpose()?;
    let resize_in_progress = status.conditions.unwrap_or_default().iter().any(|c| {
        matches!(c.type_.as_str(), "Resizing" | "FileSystemResizePending") && c.status == "True"
    });

    Ok(VolumeClaim {
        spec,
        phase,
        capacity,
        resize_in_progress,
    })
}

/// Build a pod object from a workload request
///
/// The pod has one container mounting one claim-backed volume. Anything else
/// a template carried is not part of [`WorkloadSpec`] and is not recreated;
/// see [`unsupported_pod_fields`].
pub fn pod_from_spec(spec: &WorkloadSpec) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(spec.name.clone()),
            namespace: Some(spec.namespace.clone()),
            labels: Some(spec.labels.0.clone()),
            ..Default::default()
        },
        spec: Some(PodSpec {
            containers: vec![Container {
                name: spec.name.clone(),
                image: Some(spec.image.clone()),
                command: spec.command.clone(),
                volume_mounts: Some(vec![VolumeMount {
                    name: spec.volume_name.clone(),
                    mount_path: spec.mount_path.clone(),
                    ..Default::default()
                }]),
                ..Default::default()
            }],
            volumes: Some(vec![Volume {
                name: spec.volume_name.clone(),
                persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                    claim_name: spec.claim_name.clone(),
                    read_only: Some(false),
                }),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        status: None,
    }
}

/// Extract the workload request from a pod object
///
/// The first container's first volume mount is the claim mount. Other
/// containers, volumes and pod or container settings are dropped.
pub fn workload_spec_from_pod(pod: &Pod) -> Result<WorkloadSpec> {
    let name = pod.metadata.name.clone().unwrap_or_default();
    let invalid = |reason: &str| Error::TemplateLoad {
        path: format!("Pod/{}", name),
        reason: reason.to_string(),
    };

    let spec = pod.spec.as_ref().ok_or_else(|| invalid("missing spec"))?;
    let container = spec.containers.first().ok_or_else(|| invalid("no containers"))?;
    let mount = container
        .volume_mounts
        .as_ref()
        .and_then(|mounts| mounts.first())
        .ok_or_else(|| invalid("first container has no volume mount"))?;
    let claim_name = spec
        .volumes
        .as_ref()
        .and_then(|volumes| volumes.iter().find(|v| v.name == mount.name))
        .and_then(|v| v.persistent_volume_claim.as_ref())
        .map(|pvc| pvc.claim_name.clone())
        .ok_or_else(|| invalid("mounted volume is not backed by a PVC"))?;

    Ok(WorkloadSpec {
        name: name.clone(),
        namespace: pod.metadata.namespace.clone().unwrap_or_default(),
        labels: Labels(pod.metadata.labels.clone().unwrap_or_default()),
        image: container.image.clone().unwrap_or_default(),
        command: container.command.clone(),
        volume_name: mount.name.clone(),
        mount_path: mount.mount_path.clone(),
        claim_name,
    })
}

/// Pod settings that [`workload_spec_from_pod`] drops
pub fn unsupported_pod_fields(pod: &Pod) -> Vec<&'static str> {
    let Some(spec) = pod.spec.as_ref() else {
        return Vec::new();
    };

    let mut checks = vec![
        (spec.containers.len() > 1, "extra containers"),
        (
            spec.init_containers.as_ref().is_some_and(|c| !c.is_empty()),
            "initContainers",
        ),
        (spec.volumes.as_ref().is_some_and(|v| v.len() > 1), "extra volumes"),
        (spec.security_context.is_some(), "securityContext"),
        (spec.node_selector.is_some(), "nodeSelector"),
        (spec.tolerations.is_some(), "tolerations"),
    ];
    if let Some(container) = spec.containers.first() {
        checks.extend([
            (
                container.volume_mounts.as_ref().is_some_and(|m| m.len() > 1),
                "extra volumeMounts",
            ),
            (container.volume_devices.is_some(), "volumeDevices"),
            (container.args.is_some(), "args"),
            (container.env.is_some(), "env"),
            (container.resources.is_some(), "resources"),
            (container.security_context.is_some(), "container securityContext"),
        ]);
    }

    checks
        .into_iter()
        .filter(|(present, _)| *present)
        .map(|(_, field)| field)
        .collect()
}

fn pod_phase(pod: &Pod) -> WorkloadPhase {
    pod.status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .map(WorkloadPhase::parse)
        .unwrap_or(WorkloadPhase::Pending)
}

/// Observed workload state from a pod object
pub fn workload_from_pod(pod: &Pod) -> Result<ConsumerWorkload> {
    Ok(ConsumerWorkload {
        spec: workload_spec_from_pod(pod)?,
        phase: pod_phase(pod),
    })
}

/// Rollout state of a Deployment
pub fn deployment_rollout(deployment: &Deployment) -> RolloutStatus {
    let desired = deployment
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(1);
    let status = deployment.status.clone().unwrap_or_default();
    let generation = deployment.metadata.generation.unwrap_or(0);

    RolloutStatus {
        desired,
        updated: status.updated_replicas.unwrap_or(0),
        available: status.available_replicas.unwrap_or(0),
        observed_current: status.observed_generation.unwrap_or(0) >= generation,
    }
}

/// Rollout state of a DaemonSet
pub fn daemonset_rollout(ds: &DaemonSet) -> RolloutStatus {
    let status = ds.status.clone().unwrap_or_default();
    let generation = ds.metadata.generation.unwrap_or(0);

    RolloutStatus {
        desired: status.desired_number_scheduled,
        updated: status
            .updated_number_scheduled
            .unwrap_or(status.desired_number_scheduled),
        available: status.number_ready,
        observed_current: status.observed_generation.unwrap_or(0) >= generation,
    }
}
