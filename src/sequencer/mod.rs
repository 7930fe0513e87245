//! Upgrade Sequencer
//!
//! Drives one upgrade scenario end to end:
//!
//! ```text
//! NotDeployed -> OldVersionDeployed -> WorkloadBound -> SnapshotCaptured
//!   -> PluginRemoved -> NewVersionDeployed -> WorkloadRebound -> Verified
//!   -> CloneValidated | CloneSkipped -> ResizeValidated | ResizeSkipped
//!   -> TornDown
//! ```
//!
//! Steps run strictly in order and the first failure aborts the scenario.
//! Teardown runs on every exit path and never masks the original failure.

pub mod ledger;
pub mod profile;
pub mod report;
pub mod state;

pub use ledger::ResourceLedger;
pub use profile::{Driver, DriverProfile};
pub use report::{ScenarioReport, StepOutcome, StepReport};
pub use state::{StateMachine, UpgradeState};

use crate::config::UpgradeConfig;
use crate::domain::model::{
    ChecksumRecord, ClaimSpec, Labels, ResourceId, RolloutKind, SnapshotSpec, TestContext,
    WorkloadSpec,
};
use crate::domain::ports::{
    DeployTarget, PlatformGatewayRef, PluginDeployerRef, TemplateLoaderRef, WorkloadExecutorRef,
};
use crate::error::{Error, ErrorAction, Phase, Result};
use crate::gate::GatedStep;
use crate::platform::{wait_until, BuiltinTemplates, SimulatedPlatform};
use crate::validation::{
    assert_equal, CloneOrchestrator, IntegrityVerifier, LifecycleManager, ResizeOrchestrator,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

pub const STEP_PREPARE: &str = "Prepare";
pub const STEP_DEPLOY_OLD: &str = "Deploy(oldVersion)";
pub const STEP_BIND: &str = "BindInitialWorkload";
pub const STEP_SNAPSHOT: &str = "CaptureSnapshot";
pub const STEP_REMOVE: &str = "RemoveWorkload";
pub const STEP_REDEPLOY: &str = "RedeployPlugin(newVersion)";
pub const STEP_REBIND: &str = "RebindWorkload";

// =============================================================================
// Collaborators
// =============================================================================

/// Ports a scenario runs against
#[derive(Clone)]
pub struct Collaborators {
    pub gateway: PlatformGatewayRef,
    pub executor: WorkloadExecutorRef,
    pub templates: TemplateLoaderRef,
    pub deployer: PluginDeployerRef,
}

impl Collaborators {
    /// Every port served by one simulated platform
    pub fn standalone(platform: Arc<SimulatedPlatform>) -> Self {
        Self {
            gateway: platform.clone(),
            executor: platform.clone(),
            templates: Arc::new(BuiltinTemplates::new()),
            deployer: platform,
        }
    }
}

// =============================================================================
// Scenario Context
// =============================================================================

/// Mutable state threaded through the transitions of one scenario
struct ScenarioContext {
    machine: StateMachine,
    ledger: ResourceLedger,
    report: ScenarioReport,
    fixtures_applied: bool,
    claim: Option<ClaimSpec>,
    workload: Option<WorkloadSpec>,
    snapshot: Option<SnapshotSpec>,
    baseline: Option<ChecksumRecord>,
}

impl ScenarioContext {
    fn new(report: ScenarioReport) -> Self {
        Self {
            machine: StateMachine::new(),
            ledger: ResourceLedger::new(),
            report,
            fixtures_applied: false,
            claim: None,
            workload: None,
            snapshot: None,
            baseline: None,
        }
    }

    fn primary(&self) -> Result<(ClaimSpec, WorkloadSpec)> {
        match (&self.claim, &self.workload) {
            (Some(claim), Some(workload)) => Ok((claim.clone(), workload.clone())),
            _ => Err(Error::Internal("primary workload is not bound".to_string())),
        }
    }

    fn baseline(&self) -> Result<ChecksumRecord> {
        self.baseline
            .clone()
            .ok_or_else(|| Error::Internal("baseline checksum was not captured".to_string()))
    }

    fn snapshot(&self) -> Result<SnapshotSpec> {
        self.snapshot
            .clone()
            .ok_or_else(|| Error::Internal("snapshot was not captured".to_string()))
    }
}

/// Record a finished step and tag failures with its name
fn finish_step<T>(
    ctx: &mut ScenarioContext,
    step: &str,
    started: Instant,
    result: Result<T>,
) -> Result<T> {
    let elapsed = started.elapsed();
    match result {
        Ok(value) => {
            info!("Step {} passed in {:?}", step, elapsed);
            ctx.report.record(step, StepOutcome::Passed, elapsed);
            Ok(value)
        }
        Err(e) => {
            ctx.report.record(
                step,
                StepOutcome::Failed {
                    error: e.to_string(),
                },
                elapsed,
            );
            Err(e.in_step(step))
        }
    }
}

// =============================================================================
// Upgrade Sequencer
// =============================================================================

/// Runs one driver's upgrade scenario
pub struct UpgradeSequencer {
    config: UpgradeConfig,
    profile: DriverProfile,
    context: TestContext,
    ports: Collaborators,
    lifecycle: LifecycleManager,
    verifier: IntegrityVerifier,
    clones: CloneOrchestrator,
    resize: ResizeOrchestrator,
}

impl UpgradeSequencer {
    pub fn new(config: UpgradeConfig, profile: DriverProfile, ports: Collaborators) -> Self {
        let context = TestContext {
            namespace: config.scenario_namespace(&profile),
            selector: Labels::single("app", profile.primary_label),
            poll: config.poll_policy(),
        };
        let poll = context.poll;
        let lifecycle = LifecycleManager::new(ports.gateway.clone(), poll);
        Self {
            context,
            verifier: IntegrityVerifier::new(ports.executor.clone()),
            clones: CloneOrchestrator::new(lifecycle.clone(), poll),
            resize: ResizeOrchestrator::new(lifecycle.clone(), ports.executor.clone(), poll),
            lifecycle,
            config,
            profile,
            ports,
        }
    }

    /// Namespace holding the scenario's resources
    pub fn namespace(&self) -> &str {
        &self.context.namespace
    }

    /// Run the scenario to completion and tear everything down
    pub async fn run(&self) -> ScenarioReport {
        info!(
            "Starting {} upgrade scenario from {} in namespace {}",
            self.profile.driver, self.config.upgrade_version, self.context.namespace
        );
        let mut ctx = ScenarioContext::new(ScenarioReport::new(
            self.profile.driver,
            &self.context.namespace,
            &self.config.upgrade_version,
        ));

        if let Err(e) = self.execute(&mut ctx).await {
            error!("{} upgrade scenario failed: {}", self.profile.driver, e);
            ctx.report.failure = Some(e.to_string());
        }
        self.teardown(&mut ctx).await;

        ctx.report.states = ctx.machine.visited().to_vec();
        ctx.report.finished_at = Some(chrono::Utc::now());
        ctx.report
    }

    async fn execute(&self, ctx: &mut ScenarioContext) -> Result<()> {
        let started = Instant::now();
        let result = self.prepare(ctx).await;
        finish_step(ctx, STEP_PREPARE, started, result)?;

        let started = Instant::now();
        let result = self.deploy_old_version(ctx).await;
        finish_step(ctx, STEP_DEPLOY_OLD, started, result)?;

        let started = Instant::now();
        let result = self.bind_initial_workload(ctx).await;
        finish_step(ctx, STEP_BIND, started, result)?;

        let started = Instant::now();
        let result = self.capture_snapshot(ctx).await;
        finish_step(ctx, STEP_SNAPSHOT, started, result)?;

        let started = Instant::now();
        let result = self.remove_workload(ctx).await;
        finish_step(ctx, STEP_REMOVE, started, result)?;

        let started = Instant::now();
        let result = self.redeploy_plugin(ctx).await;
        finish_step(ctx, STEP_REDEPLOY, started, result)?;

        let started = Instant::now();
        let result = self.rebind_workload(ctx).await;
        finish_step(ctx, STEP_REBIND, started, result)?;

        let from_snapshot = self.gated(ctx, GatedStep::CloneFromSnapshot).await?;
        let from_claim = self.gated(ctx, GatedStep::CloneFromClaim).await?;
        ctx.machine.advance(if from_snapshot || from_claim {
            UpgradeState::CloneValidated
        } else {
            UpgradeState::CloneSkipped
        })?;

        let resized = self.gated(ctx, GatedStep::Resize).await?;
        ctx.machine.advance(if resized {
            UpgradeState::ResizeValidated
        } else {
            UpgradeState::ResizeSkipped
        })?;
        Ok(())
    }

    // =========================================================================
    // Transitions
    // =========================================================================

    async fn prepare(&self, ctx: &mut ScenarioContext) -> Result<()> {
        let gateway = &self.ports.gateway;
        if !self.config.plugin_namespace_is_default() {
            gateway.create_namespace(&self.config.plugin_namespace).await?;
        }
        gateway.create_namespace(&self.context.namespace).await?;

        ctx.fixtures_applied = true;
        self.ports.deployer.apply_fixtures().await
    }

    async fn deploy_old_version(&self, ctx: &mut ScenarioContext) -> Result<()> {
        let target = DeployTarget::Release(self.config.upgrade_version.clone());
        self.ports.deployer.deploy(&target).await?;
        self.wait_for_plugin().await?;
        ctx.machine.advance(UpgradeState::OldVersionDeployed)
    }

    async fn bind_initial_workload(&self, ctx: &mut ScenarioContext) -> Result<()> {
        let mut claim = self.load_claim("pvc.yaml").await?;
        claim.size = self.config.claim_size;

        let mut workload = self.load_workload("pod.yaml").await?;
        workload.labels = self.context.selector.clone();
        workload.claim_name = claim.name.clone();

        ctx.ledger.record(claim.id());
        ctx.ledger.record(workload.id());
        self.lifecycle.bind(&claim, &workload).await?;

        let path = workload.path_in_mount(&self.config.marker_file);
        let marker = format!(
            "{} upgrade from {} at {}",
            self.profile.driver,
            self.config.upgrade_version,
            chrono::Utc::now().to_rfc3339()
        );
        self.verifier
            .write_marker(&workload, &path, &workload.labels, &marker)
            .await?;
        let baseline = self
            .verifier
            .capture_checksum(&workload, &path, &workload.labels)
            .await?;
        info!("Baseline checksum of {}: {}", path, baseline.digest);

        ctx.claim = Some(claim);
        ctx.workload = Some(workload);
        ctx.baseline = Some(baseline);
        ctx.machine.advance(UpgradeState::WorkloadBound)
    }

    async fn capture_snapshot(&self, ctx: &mut ScenarioContext) -> Result<()> {
        let (claim, _) = ctx.primary()?;
        let path = self.profile.template(&self.config.template_root, "snapshot.yaml");
        let mut snapshot = self.ports.templates.load_snapshot(&path).await?;
        snapshot.name = self.profile.snapshot_name.to_string();
        snapshot.namespace = self.context.namespace.clone();
        snapshot.source_claim = claim.name;

        ctx.ledger.record(snapshot.id());
        self.clones.snapshot(&snapshot).await?;
        ctx.snapshot = Some(snapshot);
        ctx.machine.advance(UpgradeState::SnapshotCaptured)
    }

    async fn remove_workload(&self, ctx: &mut ScenarioContext) -> Result<()> {
        let (_, workload) = ctx.primary()?;
        self.lifecycle.detach(&workload).await?;
        ctx.ledger.forget(&workload.id());

        self.ports.deployer.remove().await?;
        ctx.machine.advance(UpgradeState::PluginRemoved)
    }

    async fn redeploy_plugin(&self, ctx: &mut ScenarioContext) -> Result<()> {
        self.ports.deployer.deploy(&DeployTarget::WorkingTree).await?;
        self.wait_for_plugin().await?;
        ctx.machine.advance(UpgradeState::NewVersionDeployed)
    }

    async fn rebind_workload(&self, ctx: &mut ScenarioContext) -> Result<()> {
        let (_, mut workload) = ctx.primary()?;
        workload.labels = Labels::single("app", self.profile.rebound_label);

        ctx.ledger.record(workload.id());
        self.lifecycle.attach(&workload).await?;
        ctx.workload = Some(workload.clone());
        ctx.machine.advance(UpgradeState::WorkloadRebound)?;

        let path = workload.path_in_mount(&self.config.marker_file);
        let after = self
            .verifier
            .capture_checksum(&workload, &path, &workload.labels)
            .await?;
        assert_equal(&ctx.baseline()?, &after)?;
        ctx.machine.advance(UpgradeState::Verified)
    }

    /// Run a version-gated step; returns whether it ran
    async fn gated(&self, ctx: &mut ScenarioContext, step: GatedStep) -> Result<bool> {
        let name = step.to_string();
        let started = Instant::now();
        let version = match self.ports.gateway.server_version().await {
            Ok(version) => version,
            Err(e) => return finish_step(ctx, &name, started, Err(e)),
        };
        ctx.report.platform_version = Some(version.to_string());

        if !step.is_enabled(&version) {
            let reason = format!(
                "requires platform {} or newer, found {}",
                step.minimum(),
                version
            );
            warn!("Skipping {}: {}", name, reason);
            ctx.report
                .record(&name, StepOutcome::Skipped { reason }, started.elapsed());
            return Ok(false);
        }

        let result = match step {
            GatedStep::CloneFromSnapshot => self.validate_clone(ctx, true).await,
            GatedStep::CloneFromClaim => self.validate_clone(ctx, false).await,
            GatedStep::Resize => self.validate_resize(ctx).await,
        };
        finish_step(ctx, &name, started, result).map(|_| true)
    }

    async fn validate_clone(&self, ctx: &mut ScenarioContext, from_snapshot: bool) -> Result<()> {
        let (source, _) = ctx.primary()?;
        let baseline = ctx.baseline()?;
        let (claim_file, pod_file, name, label) = if from_snapshot {
            (
                "pvc-restore.yaml",
                "pod-restore.yaml",
                self.profile.snap_clone_workload,
                self.profile.snap_clone_label,
            )
        } else {
            (
                "pvc-clone.yaml",
                "pod-clone.yaml",
                self.profile.clone_workload,
                self.profile.clone_label,
            )
        };

        let claim = self.load_claim(claim_file).await?;
        let mut workload = self.load_workload(pod_file).await?;
        workload.name = name.to_string();
        workload.labels = Labels::single("app", label);
        workload.claim_name = claim.name.clone();

        ctx.ledger.record(claim.id());
        ctx.ledger.record(workload.id());
        let size = self.config.claim_size;
        if from_snapshot {
            let snapshot = ctx.snapshot()?;
            self.clones
                .clone_from_snapshot(&snapshot, &claim, &workload, size)
                .await?;
        } else {
            self.clones
                .clone_from_claim(&source, &claim, &workload, size)
                .await?;
        }

        let path = workload.path_in_mount(&self.config.marker_file);
        let cloned = self
            .verifier
            .capture_checksum(&workload, &path, &workload.labels)
            .await?;
        assert_equal(&baseline, &cloned)?;

        self.lifecycle.unbind(&claim, &workload).await?;
        ctx.ledger.forget(&workload.id());
        ctx.ledger.forget(&claim.id());
        Ok(())
    }

    async fn validate_resize(&self, ctx: &mut ScenarioContext) -> Result<()> {
        let (claim, workload) = ctx.primary()?;
        let target = self.config.expand_size;
        self.resize
            .expand(&claim, &workload, &workload.labels, target)
            .await?;
        if let Some(claim) = ctx.claim.as_mut() {
            claim.size = target;
        }

        // Expansion must not touch the data
        let path = workload.path_in_mount(&self.config.marker_file);
        let after = self
            .verifier
            .capture_checksum(&workload, &path, &workload.labels)
            .await?;
        assert_equal(&ctx.baseline()?, &after)
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    async fn load_claim(&self, file: &str) -> Result<ClaimSpec> {
        let path = self.profile.template(&self.config.template_root, file);
        let mut claim = self.ports.templates.load_claim(&path).await?;
        claim.namespace = self.context.namespace.clone();
        Ok(claim)
    }

    async fn load_workload(&self, file: &str) -> Result<WorkloadSpec> {
        let path = self.profile.template(&self.config.template_root, file);
        let mut workload = self.ports.templates.load_workload(&path).await?;
        workload.namespace = self.context.namespace.clone();
        Ok(workload)
    }

    /// Wait for the provisioner Deployment and node plugin DaemonSet
    async fn wait_for_plugin(&self) -> Result<()> {
        futures::future::try_join(
            self.wait_for_rollout(RolloutKind::Deployment, self.profile.provisioner),
            self.wait_for_rollout(RolloutKind::DaemonSet, self.profile.node_plugin),
        )
        .await?;
        Ok(())
    }

    async fn wait_for_rollout(&self, kind: RolloutKind, name: &str) -> Result<()> {
        let namespace = self.config.plugin_namespace.as_str();
        let gateway = &self.ports.gateway;

        wait_until(
            self.context.poll,
            &format!("{} {}/{} rollout", kind, namespace, name),
            || async move {
                match gateway.rollout_status(kind, namespace, name).await {
                    Ok(status) => Ok(status.is_complete()),
                    // Not created yet
                    Err(e) if e.is_not_found() => Ok(false),
                    Err(e) => Err(e),
                }
            },
        )
        .await
        .map_err(|e| match e {
            Error::TimeoutWaitingForReady { timeout, .. } => Error::DeploymentNotReady {
                kind: kind.to_string(),
                name: name.to_string(),
                namespace: namespace.to_string(),
                timeout,
            },
            other => other,
        })?;

        info!("{} {}/{} rolled out", kind, namespace, name);
        Ok(())
    }

    // =========================================================================
    // Teardown
    // =========================================================================

    async fn teardown(&self, ctx: &mut ScenarioContext) {
        info!("Tearing down {} scenario", self.profile.driver);
        let mut failures = ctx.ledger.release(&self.lifecycle).await;

        if ctx.fixtures_applied {
            if let Err(e) = self.ports.deployer.remove_fixtures().await {
                warn!("Failed to remove fixtures: {}", e);
                failures += 1;
            }
        }
        if let Err(e) = self.ports.deployer.remove().await {
            warn!("Failed to remove plugin: {}", e);
            failures += 1;
        }
        if !self.config.plugin_namespace_is_default() {
            failures += self.release_namespace(&self.config.plugin_namespace).await;
        }
        failures += self.release_namespace(&self.context.namespace).await;

        if let Err(e) = ctx.machine.advance(UpgradeState::TornDown) {
            warn!("{}", e);
        }
        ctx.report.teardown_failures = failures;
    }

    async fn release_namespace(&self, name: &str) -> usize {
        match self.lifecycle.remove(&ResourceId::namespace(name)).await {
            Ok(()) => 0,
            Err(e) => match e.action(Phase::Teardown) {
                ErrorAction::Ignore => 0,
                _ => {
                    warn!("Failed to delete namespace {}: {}", name, e);
                    1
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::capacity::Capacity;
    use crate::domain::model::ResourceKind;
    use crate::gate::VersionInfo;
    use crate::platform::{FaultPlan, SimulatedConfig};
    use assert_matches::assert_matches;
    use std::time::Duration;

    fn config() -> UpgradeConfig {
        UpgradeConfig {
            deploy_timeout: Duration::from_millis(300),
            poll_interval: Duration::from_millis(1),
            ..Default::default()
        }
    }

    fn platform(version: VersionInfo, faults: FaultPlan) -> Arc<SimulatedPlatform> {
        Arc::new(SimulatedPlatform::new(SimulatedConfig {
            version,
            faults,
            ..Default::default()
        }))
    }

    async fn run(
        platform: &Arc<SimulatedPlatform>,
        config: UpgradeConfig,
        profile: DriverProfile,
    ) -> ScenarioReport {
        UpgradeSequencer::new(config, profile, Collaborators::standalone(platform.clone()))
            .run()
            .await
    }

    fn created(platform: &SimulatedPlatform, kind: ResourceKind, name: &str) -> bool {
        platform
            .created_resources()
            .iter()
            .any(|id| id.kind == kind && id.name == name)
    }

    #[tokio::test]
    async fn test_rbd_upgrade_passes_on_current_platform() {
        let platform = platform(VersionInfo::new(1, 29), FaultPlan::default());
        let report = run(&platform, config(), DriverProfile::rbd()).await;

        assert!(report.passed(), "{}", report);
        assert_eq!(report.outcome(STEP_REBIND), Some(&StepOutcome::Passed));
        for step in [GatedStep::CloneFromSnapshot, GatedStep::CloneFromClaim, GatedStep::Resize] {
            assert_eq!(report.outcome(&step.to_string()), Some(&StepOutcome::Passed));
        }
        assert_eq!(
            report.states.last().copied(),
            Some(UpgradeState::TornDown)
        );
        assert!(report.states.contains(&UpgradeState::CloneValidated));
        assert!(report.states.contains(&UpgradeState::ResizeValidated));

        assert_eq!(
            platform.deployed_targets(),
            vec![
                DeployTarget::Release("v3.1.0".into()),
                DeployTarget::WorkingTree
            ]
        );
        assert!(created(&platform, ResourceKind::Snapshot, "rbd-pvc-snapshot"));
        assert!(created(&platform, ResourceKind::Workload, "app-clone-from-snap"));
        assert!(created(&platform, ResourceKind::Workload, "appclone"));
        assert!(platform.live_resources().is_empty());
        assert!(platform.plugin_target().is_none());
        assert!(!platform.fixtures_applied());
        assert_eq!(report.teardown_failures, 0);
    }

    #[tokio::test]
    async fn test_data_lost_during_upgrade_fails_rebind() {
        let platform = platform(
            VersionInfo::new(1, 29),
            FaultPlan {
                corrupt_on_redeploy: true,
                ..Default::default()
            },
        );
        let report = run(&platform, config(), DriverProfile::rbd()).await;

        assert!(!report.passed());
        assert_matches!(report.outcome(STEP_REBIND), Some(StepOutcome::Failed { error }) if error.contains("Checksum mismatch"));
        let failure = report.failure.clone().unwrap();
        assert!(failure.contains(STEP_REBIND));
        assert!(report.outcome(&GatedStep::Resize.to_string()).is_none());
        assert_eq!(report.states.last().copied(), Some(UpgradeState::TornDown));
        assert!(platform.live_resources().is_empty());
    }

    #[tokio::test]
    async fn test_data_lost_during_resize_fails_resize() {
        let platform = platform(
            VersionInfo::new(1, 29),
            FaultPlan {
                corrupt_on_resize: true,
                ..Default::default()
            },
        );
        let report = run(&platform, config(), DriverProfile::rbd()).await;

        assert!(!report.passed());
        assert_eq!(report.outcome(STEP_REBIND), Some(&StepOutcome::Passed));
        assert_matches!(
            report.outcome("ValidateResize"),
            Some(StepOutcome::Failed { error }) if error.contains("Checksum mismatch")
        );
        assert!(!report.states.contains(&UpgradeState::ResizeValidated));
        assert!(platform.live_resources().is_empty());
    }

    #[tokio::test]
    async fn test_clone_steps_skipped_below_1_16() {
        let platform = platform(VersionInfo::new(1, 15), FaultPlan::default());
        let report = run(&platform, config(), DriverProfile::rbd()).await;

        assert!(report.passed(), "{}", report);
        assert_matches!(
            report.outcome("ValidateClone(fromSnapshot=true)"),
            Some(StepOutcome::Skipped { .. })
        );
        assert_matches!(
            report.outcome("ValidateClone(fromSnapshot=false)"),
            Some(StepOutcome::Skipped { .. })
        );
        assert_eq!(report.outcome("ValidateResize"), Some(&StepOutcome::Passed));
        assert!(report.states.contains(&UpgradeState::CloneSkipped));
        assert!(!created(&platform, ResourceKind::Claim, "rbd-pvc-restore"));
        assert!(!created(&platform, ResourceKind::Claim, "rbd-pvc-clone"));
        assert_eq!(report.platform_version.as_deref(), Some("1.15"));
    }

    #[tokio::test]
    async fn test_claim_clone_only_on_1_16() {
        let platform = platform(VersionInfo::new(1, 16), FaultPlan::default());
        let report = run(&platform, config(), DriverProfile::rbd()).await;

        assert!(report.passed(), "{}", report);
        assert_matches!(
            report.outcome("ValidateClone(fromSnapshot=true)"),
            Some(StepOutcome::Skipped { reason }) if reason.contains("1.17")
        );
        assert_eq!(
            report.outcome("ValidateClone(fromSnapshot=false)"),
            Some(&StepOutcome::Passed)
        );
        assert!(report.states.contains(&UpgradeState::CloneValidated));
        assert!(!created(&platform, ResourceKind::Claim, "rbd-pvc-restore"));
        assert!(created(&platform, ResourceKind::Claim, "rbd-pvc-clone"));
    }

    #[tokio::test]
    async fn test_resize_skipped_below_1_15() {
        let platform = platform(VersionInfo::new(1, 14), FaultPlan::default());
        let report = run(&platform, config(), DriverProfile::rbd()).await;

        assert!(report.passed(), "{}", report);
        assert_matches!(report.outcome("ValidateResize"), Some(StepOutcome::Skipped { .. }));
        assert!(report.states.contains(&UpgradeState::ResizeSkipped));
    }

    #[tokio::test]
    async fn test_redeploy_failure_still_tears_down() {
        let platform = platform(
            VersionInfo::new(1, 29),
            FaultPlan {
                fail_redeploy: true,
                ..Default::default()
            },
        );
        let report = run(&platform, config(), DriverProfile::rbd()).await;

        assert!(!report.passed());
        assert!(report.failure.clone().unwrap().contains(STEP_REDEPLOY));
        assert!(report.states.contains(&UpgradeState::PluginRemoved));
        assert_eq!(report.states.last().copied(), Some(UpgradeState::TornDown));
        assert!(platform.live_resources().is_empty());
        assert!(!platform.fixtures_applied());
    }

    #[tokio::test]
    async fn test_snapshot_failure_aborts_before_upgrade() {
        let platform = platform(
            VersionInfo::new(1, 29),
            FaultPlan {
                snapshot_error: Some("snapshot controller unavailable".into()),
                ..Default::default()
            },
        );
        let report = run(&platform, config(), DriverProfile::rbd()).await;

        assert_matches!(report.outcome(STEP_SNAPSHOT), Some(StepOutcome::Failed { error }) if error.contains("snapshot controller unavailable"));
        assert_eq!(platform.deployed_targets().len(), 1);
        assert!(platform.live_resources().is_empty());
    }

    #[tokio::test]
    async fn test_stalled_rollout_is_deployment_not_ready() {
        let platform = platform(
            VersionInfo::new(1, 29),
            FaultPlan {
                stall_rollout: true,
                ..Default::default()
            },
        );
        let report = run(&platform, config(), DriverProfile::rbd()).await;

        assert_matches!(report.outcome(STEP_DEPLOY_OLD), Some(StepOutcome::Failed { error }) if error.contains("did not complete rollout"));
        assert_eq!(report.states, vec![UpgradeState::NotDeployed, UpgradeState::TornDown]);
        assert!(platform.plugin_target().is_none());
    }

    #[tokio::test]
    async fn test_cephfs_in_dedicated_plugin_namespace() {
        let platform = platform(VersionInfo::new(1, 29), FaultPlan::default());
        let config = UpgradeConfig {
            plugin_namespace: "ceph-csi".into(),
            expand_size: Capacity::from_gib(3),
            ..config()
        };
        let report = run(&platform, config, DriverProfile::cephfs()).await;

        assert!(report.passed(), "{}", report);
        assert_eq!(report.namespace, "upgrade-test-cephfs");
        assert!(created(&platform, ResourceKind::Namespace, "ceph-csi"));
        assert!(created(&platform, ResourceKind::Workload, "snap-clone-cephfs"));
        assert!(platform.live_resources().is_empty());
    }

    #[tokio::test]
    async fn test_scenarios_run_back_to_back() {
        let platform = platform(VersionInfo::new(1, 29), FaultPlan::default());
        let config = config();
        let mut reports = Vec::new();
        for profile in config.scenarios() {
            reports.push(run(&platform, config.clone(), profile).await);
        }
        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(ScenarioReport::passed));
        assert_eq!(platform.deployed_targets().len(), 4);
    }
}
