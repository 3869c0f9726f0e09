//! Blob Provisioner - Per-Profile Storage for Kubernetes
//!
//! Keeps every tenant profile supplied with one Azure Blob container,
//! persistent volume and persistent volume claim per storage tier in the
//! instance catalog. Each tick recomputes desired state from scratch and
//! only ever creates what is missing.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         Scheduler                            │
//! │            (tick, sleep, repeat until cancelled)             │
//! ├──────────────────────────────────────────────────────────────┤
//! │                         Reconciler                           │
//! │   ┌──────────────────┐  ┌────────────────┐  ┌─────────────┐  │
//! │   │  Desired State   │  │   Existence    │  │ Tick Report │  │
//! │   │     Builder      │  │    Checker     │  │             │  │
//! │   └──────────────────┘  └────────────────┘  └─────────────┘  │
//! ├──────────────────────────────────────────────────────────────┤
//! │                    Domain Ports (traits)                     │
//! ├──────────────────────────────────────────────────────────────┤
//! │                          Backends                            │
//! │   ┌──────────────────┐  ┌────────────────┐  ┌─────────────┐  │
//! │   │    Kubernetes    │  │   Azure Blob   │  │  In-Memory  │  │
//! │   │  (PV/PVC/Secret) │  │  (Shared Key)  │  │ (standalone)│  │
//! │   └──────────────────┘  └────────────────┘  └─────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`catalog`]: Storage tier catalog, capacities and secret references
//! - [`provisioning`]: Desired state, existence snapshots, reconciler and scheduler
//! - [`domain`]: Ports the reconciler depends on
//! - [`backends`]: Kubernetes, Azure Blob and in-memory adapters
//! - [`metrics`]: Prometheus metrics
//! - [`error`]: Error types and handling

pub mod backends;
pub mod catalog;
pub mod domain;
pub mod error;
pub mod metrics;
pub mod provisioning;

// Re-export commonly used types
pub use catalog::{Catalog, Instance, SecretRef, StorageCapacity, DEFAULT_SECRET_NAMESPACE};

pub use domain::ports::{
    ClusterStateReader, ClusterStateWriter, ObjectStorageClient, ObjectStorageProvider,
    ProfileSource, SecretReader, StaticProfiles,
};

pub use error::{Error, ErrorClass, Result};

pub use metrics::ProvisionerMetrics;

pub use provisioning::{
    volume_name, AccessMode, ActionOutcome, CapacitySource, DesiredClaim, DesiredState,
    DesiredStateBuilder, DesiredStateConfig, DesiredVolume, ExistenceChecker, ObjectKind,
    PairReport, PairState, Reconciler, ReconcilerConfig, Scheduler, SchedulerConfig, TickReport,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
