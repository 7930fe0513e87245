//! Domain layer - Core types and port definitions
//!
//! This module defines the scenario resource model and the traits (ports)
//! that platform adapters implement.

pub mod capacity;
pub mod model;
pub mod ports;

pub use capacity::*;
pub use model::*;
pub use ports::*;
