//! Validation building blocks
//!
//! - Lifecycle: bind/attach/detach/unbind of claim and workload pairs
//! - Integrity: marker files and content digests inside workloads
//! - Clone: snapshots and clones from snapshots or claims
//! - Resize: claim expansion verified inside the workload

pub mod clone;
pub mod integrity;
pub mod lifecycle;
pub mod resize;

pub use clone::CloneOrchestrator;
pub use integrity::{assert_equal, IntegrityVerifier};
pub use lifecycle::{mount_path_of, LifecycleManager};
pub use resize::ResizeOrchestrator;
