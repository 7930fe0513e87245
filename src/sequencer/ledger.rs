//! Resource Ledger
//!
//! Records every resource a scenario creates so teardown can release them
//! newest first, whichever step failed.

use crate::domain::model::ResourceId;
use crate::error::{ErrorAction, Phase};
use crate::validation::LifecycleManager;
use tracing::{debug, warn};

/// LIFO record of acquired resources
#[derive(Debug, Default)]
pub struct ResourceLedger {
    entries: Vec<ResourceId>,
}

impl ResourceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a newly created resource
    pub fn record(&mut self, id: ResourceId) {
        debug!("Ledger: acquired {}", id);
        self.entries.retain(|e| *e != id);
        self.entries.push(id);
    }

    /// Drop a resource that a step already released
    pub fn forget(&mut self, id: &ResourceId) {
        self.entries.retain(|e| e != id);
    }

    pub fn contains(&self, id: &ResourceId) -> bool {
        self.entries.contains(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Release everything newest first
    ///
    /// Absent resources are ignored; other failures are logged and counted.
    /// The ledger is empty afterwards, so a second release is a no-op.
    pub async fn release(&mut self, lifecycle: &LifecycleManager) -> usize {
        let mut failures = 0;
        while let Some(id) = self.entries.pop() {
            match lifecycle.remove(&id).await {
                Ok(()) => debug!("Ledger: released {}", id),
                Err(e) => match e.action(Phase::Teardown) {
                    ErrorAction::Ignore => debug!("Ledger: {} already gone", id),
                    _ => {
                        warn!("Failed to release {}: {}", id, e);
                        failures += 1;
                    }
                },
            }
        }
        failures
    }
}
