//! Scenario reports

use crate::sequencer::profile::Driver;
use crate::sequencer::state::UpgradeState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Outcome of one scenario step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepOutcome {
    Passed,
    Skipped { reason: String },
    Failed { error: String },
}

/// A step and how it went
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepReport {
    pub step: String,
    #[serde(flatten)]
    pub outcome: StepOutcome,
    pub elapsed_ms: u64,
}

/// Result of one upgrade scenario
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioReport {
    pub driver: Driver,
    pub namespace: String,
    pub from_version: String,
    /// Platform version seen by the gated steps
    pub platform_version: Option<String>,
    pub states: Vec<UpgradeState>,
    pub steps: Vec<StepReport>,
    /// Failure that aborted the scenario, with the failing step
    pub failure: Option<String>,
    /// Resources teardown could not release
    pub teardown_failures: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ScenarioReport {
    pub fn new(driver: Driver, namespace: &str, from_version: &str) -> Self {
        Self {
            driver,
            namespace: namespace.to_string(),
            from_version: from_version.to_string(),
            platform_version: None,
            states: Vec::new(),
            steps: Vec::new(),
            failure: None,
            teardown_failures: 0,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn record(&mut self, step: impl Into<String>, outcome: StepOutcome, elapsed: Duration) {
        self.steps.push(StepReport {
            step: step.into(),
            outcome,
            elapsed_ms: elapsed.as_millis() as u64,
        });
    }

    pub fn passed(&self) -> bool {
        self.failure.is_none()
    }

    /// Outcome of the named step, if it ran or was skipped
    pub fn outcome(&self, step: &str) -> Option<&StepOutcome> {
        self.steps.iter().find(|s| s.step == step).map(|s| &s.outcome)
    }
}

impl fmt::Display for ScenarioReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verdict = if self.passed() { "PASSED" } else { "FAILED" };
        writeln!(
            f,
            "{} upgrade from {} in {}: {}",
            self.driver, self.from_version, self.namespace, verdict
        )?;
        for step in &self.steps {
            match &step.outcome {
                StepOutcome::Passed => writeln!(f, "  [ok]   {} ({} ms)", step.step, step.elapsed_ms)?,
                StepOutcome::Skipped { reason } => {
                    writeln!(f, "  [skip] {}: {}", step.step, reason)?
                }
                StepOutcome::Failed { error } => writeln!(f, "  [FAIL] {}: {}", step.step, error)?,
            }
        }
        if self.teardown_failures > 0 {
            writeln!(f, "  teardown left {} resource(s) behind", self.teardown_failures)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_serializes_outcomes() {
        let mut report = ScenarioReport::new(Driver::Rbd, "upgrade-test-rbd", "v3.1.0");
        report.record("BindInitialWorkload", StepOutcome::Passed, Duration::from_millis(12));
        report.record(
            "ValidateResize",
            StepOutcome::Skipped {
                reason: "requires platform 1.15".into(),
            },
            Duration::ZERO,
        );

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["driver"], "rbd");
        assert_eq!(json["steps"][0]["status"], "passed");
        assert_eq!(json["steps"][1]["status"], "skipped");
        assert_eq!(json["steps"][1]["reason"], "requires platform 1.15");
        assert!(report.passed());
        assert!(report.to_string().contains("[skip] ValidateResize"));
    }
}
