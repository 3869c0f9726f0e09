//! Tick Reports
//!
//! What a reconciliation pass attempted and how each attempt ended. Reports
//! are logged and exported as metrics; nothing is persisted.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of object an action touched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    Container,
    Volume,
    Claim,
}

impl ObjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Container => "container",
            ObjectKind::Volume => "volume",
            ObjectKind::Claim => "claim",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of one create-if-absent step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome", content = "reason")]
pub enum ActionOutcome {
    /// Create call succeeded
    Created,
    /// Create call reported a conflict
    AlreadyExists,
    /// Present in the tick's snapshot, no call made
    Present,
    /// Step does not apply (container for a read-only tier)
    NotApplicable,
    /// Step was not attempted this tick
    Skipped(String),
    /// Create call failed
    Failed(String),
}

impl ActionOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            ActionOutcome::Created => "created",
            ActionOutcome::AlreadyExists => "already_exists",
            ActionOutcome::Present => "present",
            ActionOutcome::NotApplicable => "not_applicable",
            ActionOutcome::Skipped(_) => "skipped",
            ActionOutcome::Failed(_) => "failed",
        }
    }

    /// The object is known to exist after this step
    pub fn is_satisfied(&self) -> bool {
        matches!(
            self,
            ActionOutcome::Created | ActionOutcome::AlreadyExists | ActionOutcome::Present
        )
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, ActionOutcome::Failed(_) | ActionOutcome::Skipped(_))
    }
}

/// Where a pair stands after a tick, inferred from its outcomes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PairState {
    Absent,
    ContainerCreated,
    VolumeCreated,
    ClaimCreated,
}

/// Outcomes for one (profile, instance) pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairReport {
    pub profile: String,
    pub instance: String,
    pub container: ActionOutcome,
    pub volume: ActionOutcome,
    pub claim: ActionOutcome,
}

impl PairReport {
    pub fn outcome(&self, kind: ObjectKind) -> &ActionOutcome {
        match kind {
            ObjectKind::Container => &self.container,
            ObjectKind::Volume => &self.volume,
            ObjectKind::Claim => &self.claim,
        }
    }

    pub fn state(&self) -> PairState {
        let container_ok =
            self.container.is_satisfied() || self.container == ActionOutcome::NotApplicable;
        match (container_ok, self.volume.is_satisfied(), self.claim.is_satisfied()) {
            (true, true, true) => PairState::ClaimCreated,
            (true, true, false) => PairState::VolumeCreated,
            (true, false, _) => PairState::ContainerCreated,
            (false, _, _) => PairState::Absent,
        }
    }

    pub fn has_failures(&self) -> bool {
        self.container.is_failure() || self.volume.is_failure() || self.claim.is_failure()
    }
}

/// A failure that took out more than one step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopedFailure {
    /// Profile or instance name
    pub scope: String,
    pub reason: String,
}

/// Summary of one reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickReport {
    pub pairs: Vec<PairReport>,
    /// Profiles whose claims could not be listed
    pub failed_profiles: Vec<ScopedFailure>,
    /// Instances whose storage credentials could not be resolved
    pub failed_instances: Vec<ScopedFailure>,
}

impl TickReport {
    /// Number of create calls that succeeded
    pub fn created(&self) -> usize {
        self.count(|o| *o == ActionOutcome::Created)
    }

    /// Number of steps that ended in a failure
    pub fn failures(&self) -> usize {
        self.count(ActionOutcome::is_failure)
            + self.failed_profiles.len()
            + self.failed_instances.len()
    }

    pub fn is_clean(&self) -> bool {
        self.failures() == 0
    }

    pub fn pair(&self, profile: &str, instance: &str) -> Option<&PairReport> {
        self.pairs
            .iter()
            .find(|p| p.profile == profile && p.instance == instance)
    }

    fn count(&self, pred: impl Fn(&ActionOutcome) -> bool) -> usize {
        self.pairs
            .iter()
            .flat_map(|p| [&p.container, &p.volume, &p.claim])
            .filter(|o| pred(*o))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(container: ActionOutcome, volume: ActionOutcome, claim: ActionOutcome) -> PairReport {
        PairReport {
            profile: "alice".into(),
            instance: "standard".into(),
            container,
            volume,
            claim,
        }
    }

    #[test]
    fn test_pair_state() {
        use ActionOutcome::*;

        assert_eq!(pair(Created, Created, Created).state(), PairState::ClaimCreated);
        assert_eq!(pair(NotApplicable, Present, Present).state(), PairState::ClaimCreated);
        assert_eq!(
            pair(AlreadyExists, Created, Failed("quota".into())).state(),
            PairState::VolumeCreated
        );
        assert_eq!(
            pair(Created, Failed("denied".into()), Created).state(),
            PairState::ContainerCreated
        );
        assert_eq!(
            pair(Skipped("no credentials".into()), Created, Created).state(),
            PairState::Absent
        );
    }

    #[test]
    fn test_tick_counts() {
        use ActionOutcome::*;

        let report = TickReport {
            pairs: vec![
                pair(Created, Created, Present),
                pair(NotApplicable, Failed("boom".into()), Created),
            ],
            failed_profiles: vec![ScopedFailure {
                scope: "bob".into(),
                reason: "timeout".into(),
            }],
            failed_instances: vec![],
        };

        assert_eq!(report.created(), 3);
        assert_eq!(report.failures(), 2);
        assert!(!report.is_clean());
        assert!(report.pair("alice", "standard").is_some());
        assert!(report.pair("alice", "premium").is_none());
    }
}
