//! Simulated Platform
//!
//! In-process implementation of every port. Resources converge after a
//! configurable number of observations, volumes hold real file contents,
//! snapshots and clones copy them, and a small command interpreter answers
//! the digest, marker and capacity probes the validator runs inside
//! workloads. Used by the test suite and by `--standalone` runs.

use crate::domain::capacity::Capacity;
use crate::domain::model::{
    ClaimPhase, ClaimSpec, ConsumerWorkload, DataSource, ExecOutput, Labels, ResourceId,
    ResourceKind, RolloutKind, RolloutStatus, Snapshot, SnapshotSpec, VolumeClaim, WorkloadPhase,
    WorkloadSpec,
};
use crate::domain::ports::{
    DeployTarget, PlatformGateway, PluginDeployer, TemplateLoader, WorkloadExecutor,
};
use crate::error::{Error, Result};
use crate::gate::VersionInfo;
use async_trait::async_trait;
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::{debug, info};

// =============================================================================
// Configuration
// =============================================================================

/// Failures the simulated platform can be told to produce
#[derive(Debug, Clone, Default)]
pub struct FaultPlan {
    /// Alter every volume's files when the plugin is deployed a second time
    pub corrupt_on_redeploy: bool,
    /// Snapshots report this error and never become ready
    pub snapshot_error: Option<String>,
    /// Expansion requests are accepted but never complete
    pub stall_resize: bool,
    /// The filesystem does not grow with the claim
    pub stall_filesystem_growth: bool,
    /// Alter a volume's files when it is expanded
    pub corrupt_on_resize: bool,
    /// Controller rollouts never become available
    pub stall_rollout: bool,
    /// Deploying after the first deploy fails
    pub fail_redeploy: bool,
    /// Every command run inside a workload fails
    pub fail_exec: bool,
}

/// Simulated platform configuration
#[derive(Debug, Clone)]
pub struct SimulatedConfig {
    /// Version reported by `server_version`
    pub version: VersionInfo,
    /// Observations before a created resource converges
    pub settle_polls: u32,
    /// Share of a volume taken by filesystem metadata, per mille
    pub fs_overhead_permille: u64,
    pub faults: FaultPlan,
}

impl Default for SimulatedConfig {
    fn default() -> Self {
        Self {
            version: VersionInfo::new(1, 29),
            settle_polls: 2,
            fs_overhead_permille: 20,
            faults: FaultPlan::default(),
        }
    }
}

// =============================================================================
// State
// =============================================================================

type Key = (String, String);

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

/// Files stored on a volume, keyed by path relative to the volume root
type Files = BTreeMap<String, Vec<u8>>;

#[derive(Debug, Clone)]
struct ClaimEntry {
    spec: ClaimSpec,
    phase: ClaimPhase,
    capacity: Option<Capacity>,
    fs_size: Option<Capacity>,
    observations: u32,
    /// Observations since the last expansion request
    resizing: Option<u32>,
    files: Files,
}

impl ClaimEntry {
    fn view(&self) -> VolumeClaim {
        VolumeClaim {
            spec: self.spec.clone(),
            phase: self.phase,
            capacity: self.capacity,
            resize_in_progress: self.resizing.is_some(),
        }
    }
}

#[derive(Debug, Clone)]
struct WorkloadEntry {
    spec: WorkloadSpec,
    phase: WorkloadPhase,
    observations: u32,
}

impl WorkloadEntry {
    fn view(&self) -> ConsumerWorkload {
        ConsumerWorkload {
            spec: self.spec.clone(),
            phase: self.phase,
        }
    }
}

#[derive(Debug, Clone)]
struct SnapshotEntry {
    spec: SnapshotSpec,
    ready: bool,
    error: Option<String>,
    observations: u32,
    /// Point-in-time copy of the source claim's files
    content: Option<Files>,
}

impl SnapshotEntry {
    fn view(&self) -> Snapshot {
        Snapshot {
            spec: self.spec.clone(),
            ready_to_use: self.ready,
            error: self.error.clone(),
        }
    }
}

#[derive(Debug, Default)]
struct State {
    namespaces: BTreeSet<String>,
    claims: BTreeMap<Key, ClaimEntry>,
    workloads: BTreeMap<Key, WorkloadEntry>,
    snapshots: BTreeMap<Key, SnapshotEntry>,
    /// Deleted resources still visible to `exists`, with remaining observations
    terminating: BTreeMap<ResourceId, u32>,
    plugin: Option<DeployTarget>,
    rollout_observations: u32,
    deploys: Vec<DeployTarget>,
    removals: u32,
    fixtures_applied: bool,
    created: Vec<ResourceId>,
}

impl State {
    fn require_namespace(&self, namespace: &str) -> Result<()> {
        if self.namespaces.contains(namespace) {
            Ok(())
        } else {
            Err(not_found(&ResourceId::namespace(namespace)))
        }
    }

    fn is_live(&self, id: &ResourceId) -> bool {
        let k = key(&id.namespace, &id.name);
        match id.kind {
            ResourceKind::Claim => self.claims.contains_key(&k),
            ResourceKind::Workload => self.workloads.contains_key(&k),
            ResourceKind::Snapshot => self.snapshots.contains_key(&k),
            ResourceKind::Namespace => self.namespaces.contains(&id.name),
        }
    }
}

fn not_found(id: &ResourceId) -> Error {
    Error::NotFound {
        kind: id.kind.api_kind().to_string(),
        name: id.name.clone(),
        namespace: id.namespace.clone(),
    }
}

fn already_exists(id: &ResourceId) -> Error {
    Error::ResourceCreation {
        resource: id.to_string(),
        reason: "already exists".to_string(),
    }
}

fn digest(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}

// =============================================================================
// Simulated Platform
// =============================================================================

/// In-memory cluster with a deployable storage plugin
pub struct SimulatedPlatform {
    config: SimulatedConfig,
    state: RwLock<State>,
}

impl SimulatedPlatform {
    pub fn new(config: SimulatedConfig) -> Self {
        Self {
            config,
            state: RwLock::new(State::default()),
        }
    }

    /// Platform reporting `version` with default behaviour otherwise
    pub fn with_version(version: VersionInfo) -> Self {
        Self::new(SimulatedConfig {
            version,
            ..Default::default()
        })
    }

    fn settled(&self, observations: u32) -> bool {
        observations >= self.config.settle_polls
    }

    fn filesystem_size(&self, capacity: Capacity) -> Capacity {
        let overhead = capacity.bytes() / 1000 * self.config.fs_overhead_permille;
        Capacity::from_bytes(capacity.bytes() - overhead)
    }

    /// Advance a claim by one observation and return its view
    fn observe_claim(&self, state: &mut State, namespace: &str, name: &str) -> Result<VolumeClaim> {
        let k = key(namespace, name);
        let plugin_ready = state.plugin.is_some();

        let (pending, source) = match state.claims.get(&k) {
            Some(entry) => (entry.phase == ClaimPhase::Pending, entry.spec.data_source.clone()),
            None => return Err(not_found(&ResourceId::claim(namespace, name))),
        };

        // Content the claim would be provisioned with, if its source is ready
        let initial = if pending && plugin_ready {
            match &source {
                None => Some(Files::new()),
                Some(DataSource::Snapshot(snap)) => state
                    .snapshots
                    .get(&key(namespace, snap))
                    .filter(|s| s.ready)
                    .and_then(|s| s.content.clone()),
                Some(DataSource::Claim(src)) => state
                    .claims
                    .get(&key(namespace, src))
                    .filter(|c| c.phase == ClaimPhase::Bound)
                    .map(|c| c.files.clone()),
            }
        } else {
            None
        };

        let stall_resize = self.config.faults.stall_resize;
        let stall_fs = self.config.faults.stall_filesystem_growth;
        let settle = self.config.settle_polls;
        let entry = state
            .claims
            .get_mut(&k)
            .ok_or_else(|| not_found(&ResourceId::claim(namespace, name)))?;

        if pending && plugin_ready {
            entry.observations += 1;
            if entry.observations >= settle {
                if let Some(files) = initial {
                    debug!("Simulated claim {}/{} bound", namespace, name);
                    entry.phase = ClaimPhase::Bound;
                    entry.capacity = Some(entry.spec.size);
                    entry.fs_size = Some(self.filesystem_size(entry.spec.size));
                    entry.files = files;
                }
            }
        }

        if let Some(n) = entry.resizing {
            if plugin_ready && !stall_resize {
                let n = n + 1;
                if n >= settle {
                    debug!("Simulated claim {}/{} expanded to {}", namespace, name, entry.spec.size);
                    entry.resizing = None;
                    entry.capacity = Some(entry.spec.size);
                    if !stall_fs {
                        entry.fs_size = Some(self.filesystem_size(entry.spec.size));
                    }
                } else {
                    entry.resizing = Some(n);
                }
            }
        }

        Ok(entry.view())
    }

    fn observe_workload(
        &self,
        state: &mut State,
        namespace: &str,
        name: &str,
    ) -> Result<ConsumerWorkload> {
        let k = key(namespace, name);
        let claim_name = match state.workloads.get(&k) {
            Some(entry) => entry.spec.claim_name.clone(),
            None => return Err(not_found(&ResourceId::workload(namespace, name))),
        };
        let claim_bound = self
            .observe_claim(state, namespace, &claim_name)
            .map(|c| c.is_bound())
            .unwrap_or(false);
        let plugin_ready = state.plugin.is_some();
        let settle = self.config.settle_polls;

        let entry = state
            .workloads
            .get_mut(&k)
            .ok_or_else(|| not_found(&ResourceId::workload(namespace, name)))?;
        if entry.phase == WorkloadPhase::Pending && claim_bound && plugin_ready {
            entry.observations += 1;
            if entry.observations >= settle {
                debug!("Simulated workload {}/{} running", namespace, name);
                entry.phase = WorkloadPhase::Running;
            }
        }
        Ok(entry.view())
    }

    fn observe_snapshot(&self, state: &mut State, namespace: &str, name: &str) -> Result<Snapshot> {
        let plugin_ready = state.plugin.is_some();
        let entry = state
            .snapshots
            .get_mut(&key(namespace, name))
            .ok_or_else(|| not_found(&ResourceId::snapshot(namespace, name)))?;

        if !entry.ready && plugin_ready {
            if let Some(reason) = &self.config.faults.snapshot_error {
                entry.error = Some(reason.clone());
            } else if entry.content.is_some() {
                entry.observations += 1;
                if self.settled(entry.observations) {
                    debug!("Simulated snapshot {}/{} ready", namespace, name);
                    entry.ready = true;
                }
            }
        }
        Ok(entry.view())
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// Targets deployed so far, in order
    pub fn deployed_targets(&self) -> Vec<DeployTarget> {
        self.state.read().deploys.clone()
    }

    /// Currently deployed plugin target
    pub fn plugin_target(&self) -> Option<DeployTarget> {
        self.state.read().plugin.clone()
    }

    /// Number of plugin removals
    pub fn removals(&self) -> u32 {
        self.state.read().removals
    }

    pub fn fixtures_applied(&self) -> bool {
        self.state.read().fixtures_applied
    }

    /// Every resource ever created, in creation order
    pub fn created_resources(&self) -> Vec<ResourceId> {
        self.state.read().created.clone()
    }

    /// Resources that currently exist
    pub fn live_resources(&self) -> Vec<ResourceId> {
        let state = self.state.read();
        let mut live: Vec<ResourceId> = state
            .namespaces
            .iter()
            .map(|ns| ResourceId::namespace(ns))
            .collect();
        live.extend(state.claims.keys().map(|(ns, n)| ResourceId::claim(ns, n)));
        live.extend(state.workloads.keys().map(|(ns, n)| ResourceId::workload(ns, n)));
        live.extend(state.snapshots.keys().map(|(ns, n)| ResourceId::snapshot(ns, n)));
        live
    }

    /// Contents of a file on a claim's volume
    pub fn read_file(&self, namespace: &str, claim: &str, file: &str) -> Option<Vec<u8>> {
        self.state
            .read()
            .claims
            .get(&key(namespace, claim))
            .and_then(|c| c.files.get(file).cloned())
    }

    // =========================================================================
    // Command Interpreter
    // =========================================================================

    fn run_command(&self, workload: &WorkloadSpec, tokens: &[String]) -> Result<ExecOutput> {
        let fail = |reason: String| Error::Execution {
            workload: workload.name.clone(),
            command: tokens.join(" "),
            reason,
        };
        let args: Vec<&str> = tokens.iter().map(String::as_str).collect();
        let claim = key(&workload.namespace, &workload.claim_name);

        match args.as_slice() {
            ["sha256sum", path] => {
                let file = relative_to_mount(workload, path)
                    .ok_or_else(|| fail(format!("sha256sum: {}: No such file or directory", path)))?;
                let state = self.state.read();
                let content = state
                    .claims
                    .get(&claim)
                    .and_then(|c| c.files.get(&file))
                    .ok_or_else(|| fail(format!("sha256sum: {}: No such file or directory", path)))?;
                Ok(ExecOutput {
                    stdout: format!("{}  {}\n", digest(content), path),
                    stderr: String::new(),
                })
            }
            ["printf", "%s", content, ">", path] => {
                let file = relative_to_mount(workload, path)
                    .ok_or_else(|| fail(format!("sh: can't create {}: Read-only file system", path)))?;
                let mut state = self.state.write();
                let entry = state
                    .claims
                    .get_mut(&claim)
                    .ok_or_else(|| fail("volume not mounted".to_string()))?;
                entry.files.insert(file, content.as_bytes().to_vec());
                Ok(ExecOutput::default())
            }
            ["df", "-B1", "--output=size", path, "|", "tail", "-n", "1"] => {
                if relative_to_mount(workload, path).is_none() {
                    return Err(fail(format!("df: {}: No such file or directory", path)));
                }
                let state = self.state.read();
                let size = state
                    .claims
                    .get(&claim)
                    .and_then(|c| c.fs_size)
                    .ok_or_else(|| fail("volume not mounted".to_string()))?;
                Ok(ExecOutput {
                    stdout: format!("{}\n", size.bytes()),
                    stderr: String::new(),
                })
            }
            _ => Err(fail("sh: unsupported command".to_string())),
        }
    }
}

/// Path of `path` relative to the workload's mount, if it lies inside it
fn relative_to_mount(workload: &WorkloadSpec, path: &str) -> Option<String> {
    let mount = workload.mount_path.trim_end_matches('/');
    let rest = path.strip_prefix(mount)?;
    if rest.is_empty() {
        return Some(String::new());
    }
    rest.strip_prefix('/').map(|r| r.to_string())
}

/// Split a shell line into words, honouring single quotes and backslashes
pub fn shell_words(line: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_word = true;
                for q in chars.by_ref() {
                    if q == '\'' {
                        break;
                    }
                    current.push(q);
                }
            }
            '\\' => {
                in_word = true;
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            '|' | '>' => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
                words.push(c.to_string());
            }
            c if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            c => {
                in_word = true;
                current.push(c);
            }
        }
    }
    if in_word {
        words.push(current);
    }
    words
}

// =============================================================================
// Port Implementations
// =============================================================================

#[async_trait]
impl PlatformGateway for SimulatedPlatform {
    async fn create_claim(&self, spec: &ClaimSpec) -> Result<VolumeClaim> {
        let mut state = self.state.write();
        state.require_namespace(&spec.namespace)?;
        let id = spec.id();
        if state.is_live(&id) {
            return Err(already_exists(&id));
        }
        let entry = ClaimEntry {
            spec: spec.clone(),
            phase: ClaimPhase::Pending,
            capacity: None,
            fs_size: None,
            observations: 0,
            resizing: None,
            files: Files::new(),
        };
        let view = entry.view();
        state.claims.insert(key(&spec.namespace, &spec.name), entry);
        state.terminating.remove(&id);
        state.created.push(id);
        Ok(view)
    }

    async fn get_claim(&self, namespace: &str, name: &str) -> Result<VolumeClaim> {
        let mut state = self.state.write();
        self.observe_claim(&mut state, namespace, name)
    }

    async fn request_claim_size(
        &self,
        namespace: &str,
        name: &str,
        size: Capacity,
    ) -> Result<VolumeClaim> {
        let mut state = self.state.write();
        let id = ResourceId::claim(namespace, name);
        let entry = state
            .claims
            .get_mut(&key(namespace, name))
            .ok_or_else(|| not_found(&id))?;
        if size < entry.spec.size {
            return Err(Error::PlatformApi {
                operation: "patch".to_string(),
                resource: id.to_string(),
                reason: "spec.resources.requests.storage: field can not be less than previous value"
                    .to_string(),
                transient: false,
            });
        }
        if size > entry.spec.size {
            entry.spec.size = size;
            entry.resizing = Some(0);
            if self.config.faults.corrupt_on_resize {
                for content in entry.files.values_mut() {
                    content.push(b'!');
                }
            }
        }
        Ok(entry.view())
    }

    async fn create_workload(&self, spec: &WorkloadSpec) -> Result<ConsumerWorkload> {
        let mut state = self.state.write();
        state.require_namespace(&spec.namespace)?;
        let id = spec.id();
        if state.is_live(&id) {
            return Err(already_exists(&id));
        }
        let entry = WorkloadEntry {
            spec: spec.clone(),
            phase: WorkloadPhase::Pending,
            observations: 0,
        };
        let view = entry.view();
        state.workloads.insert(key(&spec.namespace, &spec.name), entry);
        state.terminating.remove(&id);
        state.created.push(id);
        Ok(view)
    }

    async fn get_workload(&self, namespace: &str, name: &str) -> Result<ConsumerWorkload> {
        let mut state = self.state.write();
        self.observe_workload(&mut state, namespace, name)
    }

    async fn create_snapshot(&self, spec: &SnapshotSpec) -> Result<Snapshot> {
        let mut state = self.state.write();
        state.require_namespace(&spec.namespace)?;
        let id = spec.id();
        if state.is_live(&id) {
            return Err(already_exists(&id));
        }
        let content = state
            .claims
            .get(&key(&spec.namespace, &spec.source_claim))
            .filter(|c| c.phase == ClaimPhase::Bound)
            .map(|c| c.files.clone());
        let entry = SnapshotEntry {
            spec: spec.clone(),
            ready: false,
            error: None,
            observations: 0,
            content,
        };
        let view = entry.view();
        state.snapshots.insert(key(&spec.namespace, &spec.name), entry);
        state.terminating.remove(&id);
        state.created.push(id);
        Ok(view)
    }

    async fn get_snapshot(&self, namespace: &str, name: &str) -> Result<Snapshot> {
        let mut state = self.state.write();
        self.observe_snapshot(&mut state, namespace, name)
    }

    async fn create_namespace(&self, name: &str) -> Result<()> {
        let mut state = self.state.write();
        if state.namespaces.insert(name.to_string()) {
            state.terminating.remove(&ResourceId::namespace(name));
            state.created.push(ResourceId::namespace(name));
        }
        Ok(())
    }

    async fn delete(&self, id: &ResourceId) -> Result<()> {
        let mut state = self.state.write();
        let k = key(&id.namespace, &id.name);
        let removed = match id.kind {
            ResourceKind::Claim => state.claims.remove(&k).is_some(),
            ResourceKind::Workload => state.workloads.remove(&k).is_some(),
            ResourceKind::Snapshot => state.snapshots.remove(&k).is_some(),
            ResourceKind::Namespace => {
                let ns = id.name.clone();
                state.claims.retain(|(n, _), _| *n != ns);
                state.workloads.retain(|(n, _), _| *n != ns);
                state.snapshots.retain(|(n, _), _| *n != ns);
                state.namespaces.remove(&ns)
            }
        };
        if !removed {
            // Deleting a terminating resource again is accepted
            return if state.terminating.contains_key(id) {
                Ok(())
            } else {
                Err(not_found(id))
            };
        }
        debug!("Simulated delete of {}", id);
        let grace = self.config.settle_polls;
        state.terminating.insert(id.clone(), grace);
        Ok(())
    }

    async fn exists(&self, id: &ResourceId) -> Result<bool> {
        let mut state = self.state.write();
        if state.is_live(id) {
            return Ok(true);
        }
        match state.terminating.get(id).copied() {
            Some(0) | None => {
                state.terminating.remove(id);
                Ok(false)
            }
            Some(n) => {
                state.terminating.insert(id.clone(), n - 1);
                Ok(true)
            }
        }
    }

    async fn rollout_status(
        &self,
        kind: RolloutKind,
        namespace: &str,
        name: &str,
    ) -> Result<RolloutStatus> {
        let mut state = self.state.write();
        if state.plugin.is_none() {
            return Err(Error::NotFound {
                kind: kind.to_string(),
                name: name.to_string(),
                namespace: namespace.to_string(),
            });
        }
        state.rollout_observations += 1;
        let available = if self.settled(state.rollout_observations)
            && !self.config.faults.stall_rollout
        {
            1
        } else {
            0
        };
        Ok(RolloutStatus {
            desired: 1,
            updated: 1,
            available,
            observed_current: true,
        })
    }

    async fn server_version(&self) -> Result<VersionInfo> {
        Ok(self.config.version)
    }
}

#[async_trait]
impl WorkloadExecutor for SimulatedPlatform {
    async fn exec_in_workload(
        &self,
        namespace: &str,
        selector: &Labels,
        command: &[String],
    ) -> Result<ExecOutput> {
        let workload = {
            let state = self.state.read();
            state
                .workloads
                .values()
                .find(|w| {
                    w.spec.namespace == namespace
                        && w.phase == WorkloadPhase::Running
                        && selector.matches(&w.spec.labels.0)
                })
                .map(|w| w.spec.clone())
        };
        let workload = workload.ok_or_else(|| Error::Execution {
            workload: selector.selector(),
            command: command.join(" "),
            reason: format!("no running workload in {} matches selector", namespace),
        })?;

        if self.config.faults.fail_exec {
            return Err(Error::Execution {
                workload: workload.name.clone(),
                command: command.join(" "),
                reason: "container exited with code 126".to_string(),
            });
        }

        let tokens = match command {
            [sh, flag, script] if sh == "sh" && flag == "-c" => shell_words(script),
            other => other.to_vec(),
        };
        self.run_command(&workload, &tokens)
    }
}

#[async_trait]
impl PluginDeployer for SimulatedPlatform {
    async fn deploy(&self, target: &DeployTarget) -> Result<()> {
        let mut state = self.state.write();
        if self.config.faults.fail_redeploy && !state.deploys.is_empty() {
            return Err(Error::Deployer(format!("simulated failure deploying {}", target)));
        }
        info!("Simulated deploy of plugin {}", target);
        state.deploys.push(target.clone());
        state.plugin = Some(target.clone());
        state.rollout_observations = 0;

        if self.config.faults.corrupt_on_redeploy && state.deploys.len() > 1 {
            for claim in state.claims.values_mut() {
                for content in claim.files.values_mut() {
                    content.push(b'!');
                }
            }
        }
        Ok(())
    }

    async fn remove(&self) -> Result<()> {
        let mut state = self.state.write();
        if state.plugin.take().is_some() {
            info!("Simulated removal of plugin");
            state.removals += 1;
        }
        Ok(())
    }

    async fn apply_fixtures(&self) -> Result<()> {
        self.state.write().fixtures_applied = true;
        Ok(())
    }

    async fn remove_fixtures(&self) -> Result<()> {
        self.state.write().fixtures_applied = false;
        Ok(())
    }
}

// =============================================================================
// Built-in Templates
// =============================================================================

/// Template loader serving the plugin's example manifests from memory
///
/// Paths are matched on `<driver>/<file>` where driver is `rbd` or `cephfs`,
/// so the same template root works for live and simulated runs.
#[derive(Debug, Clone, Default)]
pub struct BuiltinTemplates;

impl BuiltinTemplates {
    pub fn new() -> Self {
        Self
    }
}

struct DriverNames {
    claim: &'static str,
    storage_class: &'static str,
    access_mode: &'static str,
    pod: &'static str,
    mount_path: &'static str,
    snapshot: &'static str,
    snapshot_class: &'static str,
    restore_claim: &'static str,
    restore_pod: &'static str,
    clone_claim: &'static str,
    clone_pod: &'static str,
}

const RBD: DriverNames = DriverNames {
    claim: "rbd-pvc",
    storage_class: "csi-rbd-sc",
    access_mode: "ReadWriteOnce",
    pod: "csi-rbd-demo-pod",
    mount_path: "/var/lib/www/html",
    snapshot: "rbd-pvc-snapshot",
    snapshot_class: "csi-rbdplugin-snapclass",
    restore_claim: "rbd-pvc-restore",
    restore_pod: "csi-rbd-restore-demo-pod",
    clone_claim: "rbd-pvc-clone",
    clone_pod: "csi-rbd-clone-demo-app",
};

const CEPHFS: DriverNames = DriverNames {
    claim: "csi-cephfs-pvc",
    storage_class: "csi-cephfs-sc",
    access_mode: "ReadWriteMany",
    pod: "csi-cephfs-demo-pod",
    mount_path: "/var/lib/www",
    snapshot: "cephfs-pvc-snapshot",
    snapshot_class: "csi-cephfsplugin-snapclass",
    restore_claim: "cephfs-pvc-restore",
    restore_pod: "csi-cephfs-restore-demo-pod",
    clone_claim: "cephfs-pvc-clone",
    clone_pod: "csi-cephfs-clone-demo-app",
};

fn split_template(path: &Path) -> Result<(&'static DriverNames, String)> {
    let unknown = || Error::TemplateLoad {
        path: path.display().to_string(),
        reason: "no built-in template".to_string(),
    };
    let file = path
        .file_name()
        .and_then(|f| f.to_str())
        .ok_or_else(unknown)?
        .to_string();
    let driver = path
        .parent()
        .and_then(|p| p.file_name())
        .and_then(|d| d.to_str())
        .ok_or_else(unknown)?;
    match driver {
        "rbd" => Ok((&RBD, file)),
        "cephfs" => Ok((&CEPHFS, file)),
        _ => Err(unknown()),
    }
}

#[async_trait]
impl TemplateLoader for BuiltinTemplates {
    async fn load_claim(&self, path: &Path) -> Result<ClaimSpec> {
        let (names, file) = split_template(path)?;
        let (name, data_source) = match file.as_str() {
            "pvc.yaml" => (names.claim, None),
            "pvc-restore.yaml" => (
                names.restore_claim,
                Some(DataSource::Snapshot(names.snapshot.to_string())),
            ),
            "pvc-clone.yaml" => (
                names.clone_claim,
                Some(DataSource::Claim(names.claim.to_string())),
            ),
            _ => {
                return Err(Error::TemplateLoad {
                    path: path.display().to_string(),
                    reason: "not a claim template".to_string(),
                })
            }
        };
        Ok(ClaimSpec {
            name: name.to_string(),
            namespace: String::new(),
            size: Capacity::from_gib(1),
            storage_class: Some(names.storage_class.to_string()),
            access_modes: vec![names.access_mode.to_string()],
            volume_mode: None,
            data_source,
        })
    }

    async fn load_workload(&self, path: &Path) -> Result<WorkloadSpec> {
        let (names, file) = split_template(path)?;
        let (name, claim) = match file.as_str() {
            "pod.yaml" => (names.pod, names.claim),
            "pod-restore.yaml" => (names.restore_pod, names.restore_claim),
            "pod-clone.yaml" => (names.clone_pod, names.clone_claim),
            _ => {
                return Err(Error::TemplateLoad {
                    path: path.display().to_string(),
                    reason: "not a workload template".to_string(),
                })
            }
        };
        Ok(WorkloadSpec {
            name: name.to_string(),
            namespace: String::new(),
            labels: Labels::default(),
            image: "docker.io/library/nginx:latest".to_string(),
            command: None,
            volume_name: "mypvc".to_string(),
            mount_path: names.mount_path.to_string(),
            claim_name: claim.to_string(),
        })
    }

    async fn load_snapshot(&self, path: &Path) -> Result<SnapshotSpec> {
        let (names, file) = split_template(path)?;
        if file != "snapshot.yaml" {
            return Err(Error::TemplateLoad {
                path: path.display().to_string(),
                reason: "not a snapshot template".to_string(),
            });
        }
        Ok(SnapshotSpec {
            name: names.snapshot.to_string(),
            namespace: String::new(),
            source_claim: names.claim.to_string(),
            snapshot_class: Some(names.snapshot_class.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn claim(ns: &str, name: &str, source: Option<DataSource>) -> ClaimSpec {
        ClaimSpec {
            name: name.into(),
            namespace: ns.into(),
            size: Capacity::from_gib(2),
            storage_class: Some("csi-rbd-sc".into()),
            access_modes: vec!["ReadWriteOnce".into()],
            volume_mode: None,
            data_source: source,
        }
    }

    fn workload(ns: &str, name: &str, claim: &str, app: &str) -> WorkloadSpec {
        WorkloadSpec {
            name: name.into(),
            namespace: ns.into(),
            labels: Labels::single("app", app),
            image: "nginx".into(),
            command: None,
            volume_name: "mypvc".into(),
            mount_path: "/var/lib/www/html".into(),
            claim_name: claim.into(),
        }
    }

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".into(), "-c".into(), script.into()]
    }

    async fn converge(platform: &SimulatedPlatform, ns: &str, pod: &str) {
        for _ in 0..10 {
            if platform.get_workload(ns, pod).await.unwrap().is_running() {
                return;
            }
        }
        panic!("workload {} never converged", pod);
    }

    #[test]
    fn test_shell_words() {
        assert_eq!(
            shell_words("printf %s 'it'\\''s' > /mnt/f"),
            vec!["printf", "%s", "it's", ">", "/mnt/f"]
        );
        assert_eq!(
            shell_words("df -B1 --output=size /mnt|tail -n 1"),
            vec!["df", "-B1", "--output=size", "/mnt", "|", "tail", "-n", "1"]
        );
    }

    #[tokio::test]
    async fn test_nothing_binds_without_plugin() {
        let platform = SimulatedPlatform::new(SimulatedConfig::default());
        platform.create_namespace("ns").await.unwrap();
        platform.create_claim(&claim("ns", "pvc", None)).await.unwrap();
        for _ in 0..5 {
            assert!(!platform.get_claim("ns", "pvc").await.unwrap().is_bound());
        }
        platform.deploy(&DeployTarget::WorkingTree).await.unwrap();
        platform.get_claim("ns", "pvc").await.unwrap();
        assert!(platform.get_claim("ns", "pvc").await.unwrap().is_bound());
    }

    #[tokio::test]
    async fn test_marker_digest_and_clone() {
        let platform = SimulatedPlatform::new(SimulatedConfig::default());
        platform.deploy(&DeployTarget::WorkingTree).await.unwrap();
        platform.create_namespace("ns").await.unwrap();
        platform.create_claim(&claim("ns", "pvc", None)).await.unwrap();
        platform
            .create_workload(&workload("ns", "app", "pvc", "upgrade-testing"))
            .await
            .unwrap();
        converge(&platform, "ns", "app").await;

        let selector = Labels::single("app", "upgrade-testing");
        platform
            .exec_in_workload("ns", &selector, &sh("printf %s 'hello' > /var/lib/www/html/testClone"))
            .await
            .unwrap();
        let out = platform
            .exec_in_workload("ns", &selector, &sh("sha256sum /var/lib/www/html/testClone"))
            .await
            .unwrap();
        assert!(out.stdout.starts_with(&digest(b"hello")));

        platform
            .create_claim(&claim("ns", "clone", Some(DataSource::Claim("pvc".into()))))
            .await
            .unwrap();
        platform.get_claim("ns", "clone").await.unwrap();
        platform.get_claim("ns", "clone").await.unwrap();
        assert_eq!(
            platform.read_file("ns", "clone", "testClone"),
            Some(b"hello".to_vec())
        );
    }

    #[tokio::test]
    async fn test_missing_file_fails_exec() {
        let platform = SimulatedPlatform::new(SimulatedConfig::default());
        platform.deploy(&DeployTarget::WorkingTree).await.unwrap();
        platform.create_namespace("ns").await.unwrap();
        platform.create_claim(&claim("ns", "pvc", None)).await.unwrap();
        platform
            .create_workload(&workload("ns", "app", "pvc", "a"))
            .await
            .unwrap();
        converge(&platform, "ns", "app").await;

        let result = platform
            .exec_in_workload("ns", &Labels::single("app", "a"), &sh("sha256sum /var/lib/www/html/nope"))
            .await;
        assert_matches!(result, Err(Error::Execution { reason, .. }) if reason.contains("No such file"));
    }

    #[tokio::test]
    async fn test_delete_absent_is_not_found_and_namespace_cascades() {
        let platform = SimulatedPlatform::new(SimulatedConfig::default());
        platform.create_namespace("ns").await.unwrap();
        platform.create_claim(&claim("ns", "pvc", None)).await.unwrap();

        let missing = platform.delete(&ResourceId::workload("ns", "ghost")).await;
        assert!(missing.unwrap_err().is_not_found());

        platform.delete(&ResourceId::namespace("ns")).await.unwrap();
        assert!(platform.live_resources().is_empty());
        let result = platform.create_claim(&claim("ns", "pvc", None)).await;
        assert!(result.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_deleted_resource_lingers_then_disappears() {
        let platform = SimulatedPlatform::new(SimulatedConfig::default());
        platform.create_namespace("ns").await.unwrap();
        platform.create_claim(&claim("ns", "pvc", None)).await.unwrap();
        let id = ResourceId::claim("ns", "pvc");
        platform.delete(&id).await.unwrap();

        let mut seen = 0;
        while platform.exists(&id).await.unwrap() {
            seen += 1;
            assert!(seen < 10);
        }
        assert_eq!(seen, 2);
    }

    #[tokio::test]
    async fn test_builtin_templates() {
        let templates = BuiltinTemplates::new();
        let restore = templates
            .load_claim(Path::new("examples/rbd/pvc-restore.yaml"))
            .await
            .unwrap();
        assert_eq!(restore.data_source, Some(DataSource::Snapshot("rbd-pvc-snapshot".into())));

        let pod = templates
            .load_workload(Path::new("examples/cephfs/pod.yaml"))
            .await
            .unwrap();
        assert_eq!(pod.claim_name, "csi-cephfs-pvc");

        let unknown = templates.load_claim(Path::new("examples/nfs/pvc.yaml")).await;
        assert_matches!(unknown, Err(Error::TemplateLoad { .. }));
    }
}
