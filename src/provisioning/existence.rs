//! Existence Checker
//!
//! Name-indexed view of the volumes and claims observed at the start of a
//! tick. Objects are matched by name only: a pre-existing object is left
//! untouched even when its spec differs from the desired one.

use super::desired::{DesiredClaim, DesiredVolume};
use std::collections::{HashMap, HashSet};

/// Snapshot of existing storage objects, indexed by name
#[derive(Debug, Clone, Default)]
pub struct ExistenceChecker {
    volumes: HashSet<String>,
    claims: HashMap<String, HashSet<String>>,
}

impl ExistenceChecker {
    /// Index the cluster's volume names
    pub fn new<I>(volume_names: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        Self {
            volumes: volume_names.into_iter().collect(),
            claims: HashMap::new(),
        }
    }

    /// Index the claim names observed in one profile namespace
    pub fn observe_claims<I>(&mut self, namespace: &str, claim_names: I)
    where
        I: IntoIterator<Item = String>,
    {
        self.claims
            .insert(namespace.to_string(), claim_names.into_iter().collect());
    }

    pub fn volume_exists(&self, volume: &DesiredVolume) -> bool {
        self.volumes.contains(&volume.name)
    }

    pub fn claim_exists(&self, claim: &DesiredClaim) -> bool {
        self.claims
            .get(&claim.namespace)
            .map(|names| names.contains(&claim.name))
            .unwrap_or(false)
    }

    /// Record a volume created during this tick
    pub fn mark_volume(&mut self, name: &str) {
        self.volumes.insert(name.to_string());
    }

    /// Record a claim created during this tick
    pub fn mark_claim(&mut self, namespace: &str, name: &str) {
        self.claims
            .entry(namespace.to_string())
            .or_default()
            .insert(name.to_string());
    }
}
