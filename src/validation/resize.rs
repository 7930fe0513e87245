//! Resize Orchestrator
//!
//! Expands a claim and confirms the new capacity is visible inside the
//! consuming workload. Capacities are compared in whole GiB, rounded up,
//! because filesystem metadata makes the mounted size slightly smaller than
//! the volume.

use crate::domain::capacity::Capacity;
use crate::domain::model::{ClaimSpec, Labels, PollPolicy, WorkloadSpec};
use crate::domain::ports::WorkloadExecutorRef;
use crate::error::{Error, Result};
use crate::platform::wait_for;
use crate::validation::integrity::shell_quote;
use crate::validation::lifecycle::LifecycleManager;
use parking_lot::Mutex;
use tracing::{debug, info};

/// Command printing the size in bytes of the filesystem mounted at `path`
pub fn capacity_probe_command(path: &str) -> Vec<String> {
    vec![
        "sh".to_string(),
        "-c".to_string(),
        format!("df -B1 --output=size {} | tail -n 1", shell_quote(path)),
    ]
}

/// Parse the byte count printed by the capacity probe
pub fn parse_probe_output(stdout: &str) -> Option<Capacity> {
    let line = stdout.lines().rev().find(|l| !l.trim().is_empty())?;
    line.trim().parse::<u64>().ok().map(Capacity::from_bytes)
}

/// Expands claims and verifies the filesystem grew
#[derive(Clone)]
pub struct ResizeOrchestrator {
    lifecycle: LifecycleManager,
    executor: WorkloadExecutorRef,
    poll: PollPolicy,
}

impl ResizeOrchestrator {
    pub fn new(lifecycle: LifecycleManager, executor: WorkloadExecutorRef, poll: PollPolicy) -> Self {
        Self {
            lifecycle,
            executor,
            poll,
        }
    }

    /// Expand `claim` to `new_size` and verify it from inside `workload`
    ///
    /// Returns the capacity observed inside the workload.
    pub async fn expand(
        &self,
        claim: &ClaimSpec,
        workload: &WorkloadSpec,
        selector: &Labels,
        new_size: Capacity,
    ) -> Result<Capacity> {
        if new_size < claim.size {
            return Err(Error::ShrinkNotSupported {
                claim: claim.id().to_string(),
                current: claim.size.to_string(),
                requested: new_size.to_string(),
            });
        }

        info!("Expanding claim {} from {} to {}", claim.id(), claim.size, new_size);
        let gateway = self.lifecycle.gateway();
        gateway
            .request_claim_size(&claim.namespace, &claim.name, new_size)
            .await?;

        wait_for(
            self.poll,
            &format!("claim {} expanded to {}", claim.id(), new_size),
            || async move {
                let current = gateway.get_claim(&claim.namespace, &claim.name).await?;
                let grown = current.capacity.is_some_and(|c| c >= new_size);
                Ok((grown && !current.resize_in_progress).then_some(()))
            },
        )
        .await
        .map_err(|e| match e {
            Error::TimeoutWaitingForReady { timeout, .. } => Error::ExpansionTimeout {
                claim: claim.id().to_string(),
                requested: new_size.to_string(),
                timeout,
            },
            other => other,
        })?;

        self.lifecycle.wait_ready(workload).await?;
        let observed = self.probe_until(workload, selector, new_size).await?;
        info!(
            "Claim {} reports {} inside {}",
            claim.id(),
            observed,
            workload.id()
        );
        Ok(observed)
    }

    /// Poll the in-workload capacity until it reaches `expected`
    async fn probe_until(
        &self,
        workload: &WorkloadSpec,
        selector: &Labels,
        expected: Capacity,
    ) -> Result<Capacity> {
        let command = capacity_probe_command(&workload.mount_path);
        let last = Mutex::new(Capacity::from_bytes(0));
        let executor = &self.executor;
        let (command, last_ref) = (&command, &last);

        let result = wait_for(
            self.poll,
            &format!("filesystem at {} to reach {}", workload.mount_path, expected),
            || async move {
                let output = executor
                    .exec_in_workload(&workload.namespace, selector, command)
                    .await?;
                let observed = parse_probe_output(&output.stdout).ok_or_else(|| Error::Execution {
                    workload: workload.name.clone(),
                    command: command.join(" "),
                    reason: format!("unexpected capacity output '{}'", output.stdout.trim()),
                })?;
                debug!("Filesystem at {} is {} bytes", workload.mount_path, observed.bytes());
                *last_ref.lock() = observed;
                Ok((observed.round_up_gib() >= expected.round_up_gib()).then_some(observed))
            },
        )
        .await;

        match result {
            Err(Error::TimeoutWaitingForReady { .. }) => Err(Error::CapacityMismatch {
                path: workload.mount_path.clone(),
                expected_bytes: expected.bytes(),
                observed_bytes: last.lock().bytes(),
            }),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::{DeployTarget, PlatformGateway, PluginDeployer};
    use crate::platform::{FaultPlan, SimulatedConfig, SimulatedPlatform};
    use assert_matches::assert_matches;
    use std::sync::Arc;
    use std::time::Duration;

    fn poll() -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(1),
            timeout: Duration::from_millis(100),
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
            claim_name: "rbd-pvc".into(),
        }
    }

    async fn setup(faults: FaultPlan) -> (Arc<SimulatedPlatform>, ResizeOrchestrator) {
        let platform = Arc::new(SimulatedPlatform::new(SimulatedConfig {
            faults,
            ..Default::default()
        }));
        platform.create_namespace("upgrade").await.unwrap();
        platform.deploy(&DeployTarget::WorkingTree).await.unwrap();
        let lifecycle = LifecycleManager::new(platform.clone(), poll());
        lifecycle.bind(&claim(), &workload()).await.unwrap();
        let resize = ResizeOrchestrator::new(lifecycle, platform.clone(), poll());
        (platform, resize)
    }

    #[test]
    fn test_parse_probe_output() {
        assert_eq!(
            parse_probe_output("5263945728\n"),
            Some(Capacity::from_bytes(5263945728))
        );
        assert_eq!(parse_probe_output("   1B-blocks\n"), None);
        assert_eq!(parse_probe_output(""), None);
    }

    #[test]
    fn test_probe_command_quotes_mount() {
        let cmd = capacity_probe_command("/var/lib/www/html");
        assert_eq!(cmd[2], "df -B1 --output=size '/var/lib/www/html' | tail -n 1");
    }

    #[tokio::test]
    async fn test_expand_to_five_gib() {
        let (platform, resize) = setup(FaultPlan::default()).await;
        let observed = resize
            .expand(&claim(), &workload(), &workload().labels, Capacity::from_gib(5))
            .await
            .unwrap();
        assert!(observed < Capacity::from_gib(5));
        assert_eq!(observed.round_up_gib(), 5);

        let current = platform.get_claim("upgrade", "rbd-pvc").await.unwrap();
        assert!(current.capacity.unwrap() >= Capacity::from_gib(5));
    }

    #[tokio::test]
    async fn test_shrink_is_rejected() {
        let (platform, resize) = setup(FaultPlan::default()).await;
        let result = resize
            .expand(&claim(), &workload(), &workload().labels, Capacity::from_gib(1))
            .await;
        assert_matches!(result, Err(Error::ShrinkNotSupported { .. }));
        let current = platform.get_claim("upgrade", "rbd-pvc").await.unwrap();
        assert_eq!(current.spec.size, Capacity::from_gib(2));
    }

    #[tokio::test]
    async fn test_stalled_expansion_times_out() {
        let (_, resize) = setup(FaultPlan {
            stall_resize: true,
            ..Default::default()
        })
        .await;
        let result = resize
            .expand(&claim(), &workload(), &workload().labels, Capacity::from_gib(5))
            .await;
        assert_matches!(result, Err(Error::ExpansionTimeout { requested, .. }) if requested == "5Gi");
    }

    #[tokio::test]
    async fn test_filesystem_not_grown_is_capacity_mismatch() {
        let (_, resize) = setup(FaultPlan {
            stall_filesystem_growth: true,
            ..Default::default()
        })
        .await;
        let result = resize
            .expand(&claim(), &workload(), &workload().labels, Capacity::from_gib(5))
            .await;
        assert_matches!(
            result,
            Err(Error::CapacityMismatch { expected_bytes, observed_bytes, .. })
                if expected_bytes == 5 * crate::domain::capacity::GIB && observed_bytes > 0
        );
    }
}
