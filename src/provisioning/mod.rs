//! Provisioning
//!
//! Desired-state construction, existence snapshots, the per-tick reconciler
//! and the scheduler that drives it.

pub mod desired;
pub mod existence;
pub mod reconciler;
pub mod report;
pub mod scheduler;

pub use desired::{
    volume_name, AccessMode, CapacitySource, DesiredClaim, DesiredContainer, DesiredState,
    DesiredStateBuilder, DesiredStateConfig, DesiredVolume, ReclaimPolicy,
};
pub use existence::ExistenceChecker;
pub use reconciler::{Reconciler, ReconcilerConfig};
pub use report::{ActionOutcome, ObjectKind, PairReport, PairState, ScopedFailure, TickReport};
pub use scheduler::{Scheduler, SchedulerConfig};
