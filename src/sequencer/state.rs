//! Upgrade scenario state machine

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// States of an upgrade scenario, in the order they are normally visited
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpgradeState {
    NotDeployed,
    OldVersionDeployed,
    WorkloadBound,
    SnapshotCaptured,
    PluginRemoved,
    NewVersionDeployed,
    WorkloadRebound,
    Verified,
    CloneValidated,
    CloneSkipped,
    ResizeValidated,
    ResizeSkipped,
    TornDown,
}

impl UpgradeState {
    /// Whether `self -> next` is a legal transition
    ///
    /// Teardown is reachable from every state except itself.
    pub fn can_transition_to(self, next: UpgradeState) -> bool {
        use UpgradeState::*;

        if next == TornDown {
            return self != TornDown;
        }
        matches!(
            (self, next),
            (NotDeployed, OldVersionDeployed)
                | (OldVersionDeployed, WorkloadBound)
                | (WorkloadBound, SnapshotCaptured)
                | (SnapshotCaptured, PluginRemoved)
                | (PluginRemoved, NewVersionDeployed)
                | (NewVersionDeployed, WorkloadRebound)
                | (WorkloadRebound, Verified)
                | (Verified, CloneValidated)
                | (Verified, CloneSkipped)
                | (CloneValidated, ResizeValidated)
                | (CloneValidated, ResizeSkipped)
                | (CloneSkipped, ResizeValidated)
                | (CloneSkipped, ResizeSkipped)
        )
    }
}

impl fmt::Display for UpgradeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Current state plus every state visited so far
#[derive(Debug, Clone)]
pub struct StateMachine {
    current: UpgradeState,
    visited: Vec<UpgradeState>,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self {
            current: UpgradeState::NotDeployed,
            visited: vec![UpgradeState::NotDeployed],
        }
    }
}

impl StateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> UpgradeState {
        self.current
    }

    pub fn visited(&self) -> &[UpgradeState] {
        &self.visited
    }

    /// Move to `next`, rejecting illegal transitions
    pub fn advance(&mut self, next: UpgradeState) -> Result<()> {
        if !self.current.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                from: self.current.to_string(),
                to: next.to_string(),
            });
        }
        self.current = next;
        self.visited.push(next);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use UpgradeState::*;

    #[test]
    fn test_happy_path() {
        let mut machine = StateMachine::new();
        for next in [
            OldVersionDeployed,
            WorkloadBound,
            SnapshotCaptured,
            PluginRemoved,
            NewVersionDeployed,
            WorkloadRebound,
            Verified,
            CloneSkipped,
            ResizeValidated,
            TornDown,
        ] {
            machine.advance(next).unwrap();
        }
        assert_eq!(machine.current(), TornDown);
        assert_eq!(machine.visited().len(), 11);
    }

    #[test]
    fn test_skipping_ahead_is_rejected() {
        let mut machine = StateMachine::new();
        let result = machine.advance(Verified);
        assert_matches!(result, Err(Error::InvalidTransition { from, to }) if from == "NotDeployed" && to == "Verified");
        assert_eq!(machine.current(), NotDeployed);
    }

    #[test]
    fn test_teardown_from_anywhere_but_only_once() {
        let mut machine = StateMachine::new();
        machine.advance(OldVersionDeployed).unwrap();
        machine.advance(TornDown).unwrap();
        assert!(machine.advance(TornDown).is_err());
        assert!(!TornDown.can_transition_to(NotDeployed));
    }
}
