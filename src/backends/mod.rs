//! Backend Adapters
//!
//! Implementations of the domain ports:
//! - Kubernetes: persistent volumes, claims and credential secrets
//! - Azure Blob: container creation with shared key auth
//! - Memory: in-process backends for standalone runs and tests

pub mod azure_blob;
pub mod kubernetes;
pub mod memory;

pub use azure_blob::*;
pub use kubernetes::*;
pub use memory::*;
