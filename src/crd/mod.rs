//! Custom Resource Definitions consumed by the validator
//!
//! - VolumeSnapshot: external-snapshotter snapshot of a claim

pub mod volume_snapshot;

pub use volume_snapshot::*;
