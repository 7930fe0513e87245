//! Error types for the CSI Upgrade Validator
//!
//! Provides structured error types for every stage of an upgrade scenario:
//! platform access, readiness polling, data integrity checks, and the
//! external collaborators (templates, deployer, executor).

use std::time::Duration;
use thiserror::Error;

/// Unified error type for the validator
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Step {step} failed: {source}")]
    StepFailed {
        step: String,
        #[source]
        source: Box<Error>,
    },

    // =========================================================================
    // Platform Errors
    // =========================================================================
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Platform API error during {operation} of {resource}: {reason}")]
    PlatformApi {
        operation: String,
        resource: String,
        reason: String,
        transient: bool,
    },

    #[error("Resource not found: {kind}/{name} in namespace {namespace}")]
    NotFound {
        kind: String,
        name: String,
        namespace: String,
    },

    #[error("Failed to create {resource}: {reason}")]
    ResourceCreation { resource: String, reason: String },

    // =========================================================================
    // Convergence Errors
    // =========================================================================
    #[error("Timed out after {timeout:?} waiting for {what}")]
    TimeoutWaitingForReady { what: String, timeout: Duration },

    #[error("{kind} {namespace}/{name} did not complete rollout within {timeout:?}")]
    DeploymentNotReady {
        kind: String,
        name: String,
        namespace: String,
        timeout: Duration,
    },

    #[error("Snapshot {name} could not be created: {reason}")]
    SnapshotCreation { name: String, reason: String },

    // =========================================================================
    // Integrity Errors
    // =========================================================================
    #[error("Command `{command}` failed in workload {workload}: {reason}")]
    Execution {
        workload: String,
        command: String,
        reason: String,
    },

    #[error("Checksum mismatch for {path}: expected {expected}, received {actual}")]
    ChecksumMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    // =========================================================================
    // Resize Errors
    // =========================================================================
    #[error("Expansion of claim {claim} to {requested} not observed within {timeout:?}")]
    ExpansionTimeout {
        claim: String,
        requested: String,
        timeout: Duration,
    },

    #[error("Capacity mismatch at {path}: expected at least {expected_bytes} bytes, observed {observed_bytes}")]
    CapacityMismatch {
        path: String,
        expected_bytes: u64,
        observed_bytes: u64,
    },

    #[error("Claim {claim} cannot shrink from {current} to {requested}")]
    ShrinkNotSupported {
        claim: String,
        current: String,
        requested: String,
    },

    // =========================================================================
    // Collaborator Errors
    // =========================================================================
    #[error("Failed to load template {path}: {reason}")]
    TemplateLoad { path: String, reason: String },

    #[error("Plugin deployment failed: {0}")]
    Deployer(String),

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("Capacity parse error: {0}")]
    CapacityParse(String),

    #[error("Version parse error: {0}")]
    VersionParse(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Phase of a scenario in which an error surfaced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Inside a `wait_until` probe
    Polling,
    /// Setting up resources or verifying invariants
    Verification,
    /// Releasing resources after the scenario
    Teardown,
}

/// Action to take on an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Log and poll again at the next interval
    KeepPolling,
    /// Stop the scenario and surface the error
    Abort,
    /// Swallow the error (idempotent cleanup)
    Ignore,
}

impl Error {
    /// Wrap an error with the name of the step that produced it
    pub fn in_step(self, step: impl Into<String>) -> Self {
        match self {
            // Keep the innermost step name
            Error::StepFailed { .. } => self,
            other => Error::StepFailed {
                step: step.into(),
                source: Box::new(other),
            },
        }
    }

    /// Determine what action to take for this error in the given phase
    pub fn action(&self, phase: Phase) -> ErrorAction {
        match phase {
            Phase::Teardown if self.is_not_found() => ErrorAction::Ignore,
            Phase::Polling if self.is_transient() => ErrorAction::KeepPolling,
            _ => ErrorAction::Abort,
        }
    }

    /// Check if this error reports an absent resource
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound { .. } => true,
            Error::Kube(kube::Error::Api(ae)) => ae.code == 404,
            Error::StepFailed { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    /// Check if this error is transient
    pub fn is_transient(&self) -> bool {
        match self {
            Error::PlatformApi { transient, .. } => *transient,
            Error::Kube(kube::Error::Api(ae)) => ae.code == 429 || ae.code >= 500,
            Error::Kube(kube::Error::HyperError(_)) | Error::Kube(kube::Error::Service(_)) => true,
            _ => false,
        }
    }

    /// Name of the failing step, if the error carries one
    pub fn step(&self) -> Option<&str> {
        match self {
            Error::StepFailed { step, .. } => Some(step),
            _ => None,
        }
    }
}

/// Result type alias for the validator
pub type Result<T> = std::result::Result<T, Error>;
