//! Platform Adapters
//!
//! Provides implementations of the domain ports:
//! - Kubernetes (kube-rs) gateway and workload executor
//! - Simulated in-process platform (standalone mode and tests)
//! - YAML template loader
//! - Manifest based plugin deployer
//!
//! and the fixed-interval poller every convergence wait goes through.

pub mod deployer;
pub mod kubernetes;
pub mod simulated;
pub mod templates;

pub use self::deployer::*;
pub use self::kubernetes::*;
pub use self::simulated::*;
pub use self::templates::*;

use crate::domain::model::PollPolicy;
use crate::error::{Error, ErrorAction, Phase, Result};
use std::future::Future;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

/// Poll `probe` at a fixed interval until it yields a value
///
/// The probe runs immediately, then once per `policy.interval`. Transient
/// probe errors are logged and polling continues; any other error aborts the
/// wait. Returns `Error::TimeoutWaitingForReady` once `policy.timeout` has
/// elapsed without a value.
pub async fn wait_for<T, F, Fut>(policy: PollPolicy, what: &str, mut probe: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let deadline = Instant::now() + policy.timeout;
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        match probe().await {
            Ok(Some(value)) => {
                debug!("{} converged after {} attempt(s)", what, attempt);
                return Ok(value);
            }
            Ok(None) => {
                debug!("Waiting for {} (attempt {})", what, attempt);
            }
            Err(e) => match e.action(Phase::Polling) {
                ErrorAction::KeepPolling => {
                    warn!("Transient error while waiting for {}: {}", what, e);
                }
                _ => return Err(e),
            },
        }

        if Instant::now() >= deadline {
            return Err(Error::TimeoutWaitingForReady {
                what: what.to_string(),
                timeout: policy.timeout,
            });
        }
        sleep(policy.interval).await;
    }
}

/// Poll `predicate` at a fixed interval until it holds
pub async fn wait_until<F, Fut>(policy: PollPolicy, what: &str, mut predicate: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    wait_for(policy, what, || {
        let check = predicate();
        async move { Ok(check.await?.then_some(())) }
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn fast() -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(1),
            timeout: Duration::from_millis(200),
        }
    }

    #[tokio::test]
    async fn test_wait_until_converges() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        wait_until(fast(), "counter", move || {
            let counter = counter.clone();
            async move { Ok(counter.fetch_add(1, Ordering::SeqCst) >= 2) }
        })
        .await
        .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_wait_until_times_out() {
        let policy = PollPolicy {
            interval: Duration::from_millis(1),
            timeout: Duration::from_millis(10),
        };
        let result = wait_until(policy, "never", || async { Ok(false) }).await;
        assert_matches!(result, Err(Error::TimeoutWaitingForReady { what, .. }) if what == "never");
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let value = wait_for(fast(), "flaky", move || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(Error::PlatformApi {
                        operation: "get".into(),
                        resource: "Pod/app".into(),
                        reason: "503".into(),
                        transient: true,
                    })
                } else {
                    Ok(Some(42))
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn test_permanent_errors_abort() {
        let result = wait_until(fast(), "gone", || async {
            Err::<bool, _>(Error::NotFound {
                kind: "Pod".into(),
                name: "app".into(),
                namespace: "ns".into(),
            })
        })
        .await;
        assert_matches!(result, Err(Error::NotFound { .. }));
    }
}
