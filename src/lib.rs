//! CSI Upgrade Validator
//!
//! Verifies that volumes provisioned by one release of a CSI storage plugin
//! survive an in-place upgrade to the working-tree build, and that clone and
//! resize keep working afterwards.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Upgrade Sequencer                              │
//! │     state machine · resource ledger · version gates · reports          │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐  ┌────────────┐  │
//! │  │  Lifecycle   │  │  Integrity   │  │    Clone     │  │   Resize   │  │
//! │  │ bind/unbind  │  │  checksums   │  │ snapshot/pvc │  │  expansion │  │
//! │  └──────┬───────┘  └──────┬───────┘  └──────┬───────┘  └─────┬──────┘  │
//! │         └─────────────────┴────────┬────────┴────────────────┘         │
//! ├────────────────────────────────────┴────────────────────────────────────┤
//! │                            Domain Ports                                 │
//! │   PlatformGateway · WorkloadExecutor · TemplateLoader · PluginDeployer  │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────────────┐  ┌───────────────────┐  ┌──────────────────┐  │
//! │  │  Kubernetes (kube)   │  │ kubectl deployer  │  │    Simulated     │  │
//! │  │  + YAML templates    │  │   + git releases  │  │    platform      │  │
//! │  └──────────────────────┘  └───────────────────┘  └──────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`sequencer`]: Upgrade scenarios, teardown and reports
//! - [`validation`]: Lifecycle, integrity, clone and resize building blocks
//! - [`platform`]: Kubernetes, simulated and deployment adapters
//! - [`domain`]: Resource model and port definitions
//! - [`gate`]: Platform version gating
//! - [`config`]: Validator configuration
//! - [`crd`]: Custom Resource Definitions
//! - [`error`]: Error types and handling

pub mod config;
pub mod crd;
pub mod domain;
pub mod error;
pub mod gate;
pub mod platform;
pub mod sequencer;
pub mod validation;

// Re-export commonly used types
pub use config::{UpgradeConfig, UpgradeSettings};

pub use domain::ports::{
    DeployTarget, PlatformGateway, PluginDeployer, TemplateLoader, WorkloadExecutor,
};

pub use error::{Error, ErrorAction, Result};

pub use gate::{GatedStep, VersionInfo};

pub use platform::{
    BuiltinTemplates, DeployerConfig, FaultPlan, KubeGateway, KubectlDeployer, SimulatedConfig,
    SimulatedPlatform, YamlTemplateLoader,
};

pub use sequencer::{
    Collaborators, Driver, DriverProfile, ScenarioReport, StepOutcome, UpgradeSequencer,
    UpgradeState,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
