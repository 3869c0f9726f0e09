//! Domain layer - Capability ports
//!
//! This module defines the traits (ports) that backend adapters implement,
//! keeping the reconciler independent of the cluster and storage APIs.

pub mod ports;

pub use ports::*;
