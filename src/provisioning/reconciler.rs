//! Reconciler
//!
//! One full convergence pass over every (profile, instance) pair:
//! - Resolves a storage client per writable instance
//! - Snapshots existing volumes, and claims per profile
//! - Creates whatever container, volume or claim is missing
//!
//! Failures stay as narrow as possible. A failed create only affects its
//! own step, a failed claim listing only its profile, and a failed
//! credential lookup only its instance's containers. Everything is retried
//! on the next tick because desired state is recomputed from scratch.

use super::desired::{DesiredStateBuilder, DesiredStateConfig, DesiredVolume};
use super::existence::ExistenceChecker;
use super::report::{ActionOutcome, ObjectKind, PairReport, ScopedFailure, TickReport};
use crate::catalog::{Catalog, Instance};
use crate::domain::ports::{
    ClusterStateReaderRef, ClusterStateWriterRef, ObjectStorageClientRef,
    ObjectStorageProviderRef, ProfileSourceRef,
};
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the reconciler
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// How desired objects are derived
    pub desired: DesiredStateConfig,
    /// Upper bound for any single backend call
    pub call_timeout: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            desired: DesiredStateConfig::default(),
            call_timeout: Duration::from_secs(30),
        }
    }
}

// =============================================================================
// Reconciler
// =============================================================================

/// Converges cluster and object storage towards the catalog
pub struct Reconciler {
    catalog: Arc<Catalog>,
    builder: DesiredStateBuilder,
    profiles: ProfileSourceRef,
    reader: ClusterStateReaderRef,
    writer: ClusterStateWriterRef,
    storage: ObjectStorageProviderRef,
    call_timeout: Duration,
}

/// Volume names handed out during one tick, with the pair that owns each
type VolumeOwners = HashMap<String, (String, String)>;

impl Reconciler {
    pub fn new(
        config: ReconcilerConfig,
        catalog: Arc<Catalog>,
        profiles: ProfileSourceRef,
        reader: ClusterStateReaderRef,
        writer: ClusterStateWriterRef,
        storage: ObjectStorageProviderRef,
    ) -> Self {
        Self {
            catalog,
            builder: DesiredStateBuilder::new(config.desired),
            profiles,
            reader,
            writer,
            storage,
            call_timeout: config.call_timeout,
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Run one pass over every (profile, instance) pair
    ///
    /// Returns an error only when nothing could be reconciled this tick
    /// (the profile list or the volume snapshot is unavailable).
    pub async fn reconcile(&self) -> Result<TickReport> {
        let mut report = TickReport::default();

        let profiles = self
            .timed("list profiles", self.profiles.profiles())
            .await?;

        let clients = self.storage_clients(&mut report).await;

        let volumes = self
            .timed("list volumes", self.reader.list_volume_names())
            .await
            .map_err(|e| list_failed("PersistentVolume", "cluster", e))?;
        let mut checker = ExistenceChecker::new(volumes);
        let mut owners = VolumeOwners::new();

        for profile in &profiles {
            info!(profile = %profile, "Updating profile");

            let claims = match self
                .timed("list claims", self.reader.list_claim_names(profile))
                .await
            {
                Ok(claims) => claims,
                Err(e) => {
                    let e = list_failed("PersistentVolumeClaim", profile, e);
                    warn!(profile = %profile, error = %e, "Failed to list claims, skipping profile");
                    report.failed_profiles.push(ScopedFailure {
                        scope: profile.clone(),
                        reason: e.to_string(),
                    });
                    continue;
                }
            };
            checker.observe_claims(profile, claims);

            for instance in self.catalog.instances() {
                let pair = self
                    .reconcile_pair(profile, instance, &clients, &mut checker, &mut owners)
                    .await;
                report.pairs.push(pair);
            }
        }

        Ok(report)
    }

    /// Build a storage client for every writable instance
    async fn storage_clients(
        &self,
        report: &mut TickReport,
    ) -> HashMap<String, ObjectStorageClientRef> {
        let mut clients = HashMap::new();

        for instance in self.catalog.instances().iter().filter(|i| !i.read_only) {
            match self
                .timed("resolve storage client", self.storage.client_for(instance))
                .await
            {
                Ok(client) => {
                    debug!(
                        instance = %instance.name,
                        account = %client.account_name(),
                        "Resolved storage client"
                    );
                    clients.insert(instance.name.clone(), client);
                }
                Err(e) => {
                    warn!(
                        instance = %instance.name,
                        secret = %instance.secret,
                        error = %e,
                        "Failed to resolve storage credentials, skipping containers for instance"
                    );
                    report.failed_instances.push(ScopedFailure {
                        scope: instance.name.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        clients
    }

    async fn reconcile_pair(
        &self,
        profile: &str,
        instance: &Instance,
        clients: &HashMap<String, ObjectStorageClientRef>,
        checker: &mut ExistenceChecker,
        owners: &mut VolumeOwners,
    ) -> PairReport {
        let desired = self.builder.build(profile, instance);

        // Container
        let container = match &desired.container {
            None => ActionOutcome::NotApplicable,
            Some(container) => match clients.get(&instance.name) {
                None => ActionOutcome::Skipped("storage credentials unavailable".into()),
                Some(client) => {
                    let name = format!("{}/{}", instance.name, container.container_name);
                    let exists = match self
                        .timed("check container", client.container_exists(&container.container_name))
                        .await
                    {
                        Ok(exists) => exists,
                        Err(e) => {
                            debug!(container = %name, error = %e, "Container lookup failed, attempting create");
                            false
                        }
                    };
                    self.create_if_absent(
                        ObjectKind::Container,
                        &name,
                        exists,
                        client.create_container(&container.container_name),
                    )
                    .await
                }
            },
        };

        // Volume
        let volume = match self.claim_volume_name(profile, instance, &desired.volume, owners) {
            Some(skipped) => skipped,
            None => {
                let outcome = self
                    .create_if_absent(
                        ObjectKind::Volume,
                        &desired.volume.name,
                        checker.volume_exists(&desired.volume),
                        self.writer.create_volume(&desired.volume),
                    )
                    .await;
                if outcome.is_satisfied() {
                    checker.mark_volume(&desired.volume.name);
                }
                outcome
            }
        };

        // Claim
        let claim_name = format!("{}/{}", desired.claim.namespace, desired.claim.name);
        let claim = self
            .create_if_absent(
                ObjectKind::Claim,
                &claim_name,
                checker.claim_exists(&desired.claim),
                self.writer.create_claim(&desired.claim),
            )
            .await;
        if claim.is_satisfied() {
            checker.mark_claim(&desired.claim.namespace, &desired.claim.name);
        }

        PairReport {
            profile: profile.to_string(),
            instance: instance.name.clone(),
            container,
            volume,
            claim,
        }
    }

    /// Reserve a volume name for this pair. Returns an outcome when another
    /// pair already took the name this tick (`a` + `b-c` vs `a-b` + `c`).
    fn claim_volume_name(
        &self,
        profile: &str,
        instance: &Instance,
        volume: &DesiredVolume,
        owners: &mut VolumeOwners,
    ) -> Option<ActionOutcome> {
        let me = (profile.to_string(), instance.name.clone());
        match owners.get(&volume.name) {
            Some(owner) if *owner != me => {
                warn!(
                    volume = %volume.name,
                    profile = %profile,
                    instance = %instance.name,
                    owner_profile = %owner.0,
                    owner_instance = %owner.1,
                    "Volume name collides with another profile/instance pair"
                );
                Some(ActionOutcome::Skipped(format!(
                    "volume name collides with {}/{}",
                    owner.0, owner.1
                )))
            }
            Some(_) => None,
            None => {
                owners.insert(volume.name.clone(), me);
                None
            }
        }
    }

    /// Issue `create` unless the object is already known to exist
    async fn create_if_absent<F>(
        &self,
        kind: ObjectKind,
        name: &str,
        exists: bool,
        create: F,
    ) -> ActionOutcome
    where
        F: Future<Output = Result<()>>,
    {
        if exists {
            debug!(kind = %kind, name = %name, "Already present");
            return ActionOutcome::Present;
        }

        info!(kind = %kind, name = %name, "Creating");
        match self.timed("create", create).await {
            Ok(()) => {
                info!(kind = %kind, name = %name, "Succeeded");
                ActionOutcome::Created
            }
            Err(e) if e.is_conflict() => {
                info!(kind = %kind, name = %name, "Already exists");
                ActionOutcome::AlreadyExists
            }
            Err(e) => {
                warn!(kind = %kind, name = %name, error = %e, "Failed");
                ActionOutcome::Failed(e.to_string())
            }
        }
    }

    /// Bound a backend call by the per-call timeout
    async fn timed<T, F>(&self, operation: &str, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(Error::timeout(operation, self.call_timeout)),
        }
    }
}

fn list_failed(kind: &str, scope: &str, error: Error) -> Error {
    match error {
        e @ Error::ListFailed { .. } => e,
        e => Error::ListFailed {
            kind: kind.to_string(),
            scope: scope.to_string(),
            reason: e.to_string(),
        },
    }
}
