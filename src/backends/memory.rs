//! In-Memory Backends
//!
//! Process-local implementations of the cluster and object storage ports.
//! They back `--standalone` runs and the reconciler tests, and support
//! failure injection, artificial latency and call counting.

use crate::backends::azure_blob::{StorageAccountCredentials, ACCOUNT_KEY_KEY, ACCOUNT_NAME_KEY};
use crate::catalog::{Catalog, Instance, SecretRef};
use crate::domain::ports::{
    ClusterStateReader, ClusterStateWriter, ObjectStorageClient, ObjectStorageClientRef,
    ObjectStorageProvider, SecretReader, SecretReaderRef,
};
use crate::error::{Error, Result, CONTAINER_ALREADY_EXISTS};
use crate::provisioning::desired::{DesiredClaim, DesiredVolume};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

// =============================================================================
// Cluster
// =============================================================================

#[derive(Debug, Default)]
struct ClusterState {
    /// Volumes by name; `None` for volumes seeded without a spec
    volumes: BTreeMap<String, Option<DesiredVolume>>,
    /// Claims by namespace, then name
    claims: BTreeMap<String, BTreeMap<String, DesiredClaim>>,
    secrets: BTreeMap<(String, String), BTreeMap<String, Vec<u8>>>,
    /// Volumes that exist but are left out of listings
    unlisted_volumes: BTreeSet<String>,
    failing_volume_creates: BTreeSet<String>,
    failing_claim_lists: BTreeSet<String>,
    fail_volume_list: bool,
    volume_create_calls: usize,
    claim_create_calls: usize,
    created_volumes: Vec<String>,
    latency: Option<Duration>,
}

/// In-process stand-in for the Kubernetes API
#[derive(Debug, Default)]
pub struct InMemoryCluster {
    state: Mutex<ClusterState>,
}

impl InMemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a credentials secret for `account`
    pub fn add_storage_account_secret(&self, name: &str, namespace: &str, account: &str) {
        let mut data = BTreeMap::new();
        data.insert(ACCOUNT_NAME_KEY.to_string(), account.as_bytes().to_vec());
        data.insert(
            ACCOUNT_KEY_KEY.to_string(),
            BASE64.encode(format!("{}-key", account)).into_bytes(),
        );
        self.state
            .lock()
            .secrets
            .insert((namespace.to_string(), name.to_string()), data);
    }

    /// Store a credentials secret for every secret the catalog references.
    /// The account is named after the secret.
    pub fn seed_catalog_secrets(&self, catalog: &Catalog) {
        for instance in catalog.instances() {
            let secret = &instance.secret;
            let account: String = secret
                .secret_name
                .chars()
                .filter(|c| c.is_ascii_alphanumeric())
                .collect();
            self.add_storage_account_secret(&secret.secret_name, &secret.secret_namespace, &account);
        }
    }

    pub fn remove_secret(&self, name: &str, namespace: &str) {
        self.state
            .lock()
            .secrets
            .remove(&(namespace.to_string(), name.to_string()));
    }

    /// Seed a volume that was created outside the provisioner
    pub fn insert_volume_name(&self, name: &str) {
        self.state.lock().volumes.entry(name.to_string()).or_insert(None);
    }

    /// Leave a volume out of listings while it still blocks creation
    pub fn hide_from_listing(&self, name: &str) {
        self.state.lock().unlisted_volumes.insert(name.to_string());
    }

    pub fn fail_volume_create(&self, name: &str) {
        self.state.lock().failing_volume_creates.insert(name.to_string());
    }

    pub fn fail_claim_listing(&self, namespace: &str) {
        self.state.lock().failing_claim_lists.insert(namespace.to_string());
    }

    pub fn fail_volume_listing(&self) {
        self.state.lock().fail_volume_list = true;
    }

    pub fn clear_failures(&self) {
        let mut state = self.state.lock();
        state.failing_volume_creates.clear();
        state.failing_claim_lists.clear();
        state.fail_volume_list = false;
    }

    /// Delay every call by `latency`
    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().latency = Some(latency);
    }

    pub fn volume(&self, name: &str) -> Option<DesiredVolume> {
        self.state.lock().volumes.get(name).cloned().flatten()
    }

    pub fn claim(&self, namespace: &str, name: &str) -> Option<DesiredClaim> {
        self.state
            .lock()
            .claims
            .get(namespace)
            .and_then(|claims| claims.get(name))
            .cloned()
    }

    pub fn volume_create_calls(&self) -> usize {
        self.state.lock().volume_create_calls
    }

    pub fn claim_create_calls(&self) -> usize {
        self.state.lock().claim_create_calls
    }

    /// Names of volumes created through the port, in creation order
    pub fn created_volume_names(&self) -> Vec<String> {
        self.state.lock().created_volumes.clone()
    }

    async fn delay(&self) {
        let latency = self.state.lock().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl ClusterStateReader for InMemoryCluster {
    async fn list_volume_names(&self) -> Result<Vec<String>> {
        self.delay().await;
        let state = self.state.lock();
        if state.fail_volume_list {
            return Err(Error::ListFailed {
                kind: "PersistentVolume".into(),
                scope: "cluster".into(),
                reason: "injected failure".into(),
            });
        }
        Ok(state
            .volumes
            .keys()
            .filter(|name| !state.unlisted_volumes.contains(*name))
            .cloned()
            .collect())
    }

    async fn list_claim_names(&self, namespace: &str) -> Result<Vec<String>> {
        self.delay().await;
        let state = self.state.lock();
        if state.failing_claim_lists.contains(namespace) {
            return Err(Error::ListFailed {
                kind: "PersistentVolumeClaim".into(),
                scope: namespace.to_string(),
                reason: "injected failure".into(),
            });
        }
        Ok(state
            .claims
            .get(namespace)
            .map(|claims| claims.keys().cloned().collect())
            .unwrap_or_default())
    }
}

#[async_trait]
impl ClusterStateWriter for InMemoryCluster {
    async fn create_volume(&self, volume: &DesiredVolume) -> Result<()> {
        self.delay().await;
        let mut state = self.state.lock();
        state.volume_create_calls += 1;

        if state.failing_volume_creates.contains(&volume.name) {
            return Err(Error::CreateFailed {
                kind: "PersistentVolume".into(),
                name: volume.name.clone(),
                reason: "injected failure".into(),
            });
        }
        if state.volumes.contains_key(&volume.name) {
            return Err(Error::ResourceExists {
                kind: "PersistentVolume".into(),
                name: volume.name.clone(),
            });
        }

        debug!(volume = %volume.name, "Stored volume");
        state.volumes.insert(volume.name.clone(), Some(volume.clone()));
        state.created_volumes.push(volume.name.clone());
        Ok(())
    }

    async fn create_claim(&self, claim: &DesiredClaim) -> Result<()> {
        self.delay().await;
        let mut state = self.state.lock();
        state.claim_create_calls += 1;

        let claims = state.claims.entry(claim.namespace.clone()).or_default();
        if claims.contains_key(&claim.name) {
            return Err(Error::ResourceExists {
                kind: "PersistentVolumeClaim".into(),
                name: format!("{}/{}", claim.namespace, claim.name),
            });
        }

        debug!(namespace = %claim.namespace, claim = %claim.name, "Stored claim");
        claims.insert(claim.name.clone(), claim.clone());
        Ok(())
    }
}

#[async_trait]
impl SecretReader for InMemoryCluster {
    async fn read_secret(&self, secret: &SecretRef) -> Result<BTreeMap<String, Vec<u8>>> {
        self.delay().await;
        self.state
            .lock()
            .secrets
            .get(&(secret.secret_namespace.clone(), secret.secret_name.clone()))
            .cloned()
            .ok_or_else(|| Error::SecretUnavailable {
                name: secret.secret_name.clone(),
                namespace: secret.secret_namespace.clone(),
                reason: "not found".into(),
            })
    }
}

// =============================================================================
// Object Storage
// =============================================================================

#[derive(Debug, Default)]
struct StorageState {
    /// Containers by account
    containers: BTreeMap<String, BTreeSet<String>>,
    /// (account, container) pairs that exist but report absent on lookup
    unlisted: BTreeSet<(String, String)>,
    failing: BTreeSet<(String, String)>,
    failing_lookups: BTreeSet<(String, String)>,
    create_calls: usize,
    clients_built: usize,
}

/// In-process stand-in for the blob service
pub struct InMemoryObjectStorage {
    secrets: SecretReaderRef,
    state: Arc<Mutex<StorageState>>,
}

impl InMemoryObjectStorage {
    /// Accounts are resolved from secrets exactly like the blob adapter does
    pub fn new(secrets: SecretReaderRef) -> Self {
        Self {
            secrets,
            state: Arc::new(Mutex::new(StorageState::default())),
        }
    }

    pub fn has_container(&self, account: &str, container: &str) -> bool {
        self.state
            .lock()
            .containers
            .get(account)
            .map(|c| c.contains(container))
            .unwrap_or(false)
    }

    /// Seed a container the existence lookup does not see
    pub fn preload_container_hidden(&self, account: &str, container: &str) {
        let mut state = self.state.lock();
        state
            .containers
            .entry(account.to_string())
            .or_default()
            .insert(container.to_string());
        state
            .unlisted
            .insert((account.to_string(), container.to_string()));
    }

    pub fn fail_container(&self, account: &str, container: &str) {
        self.state
            .lock()
            .failing
            .insert((account.to_string(), container.to_string()));
    }

    /// Make existence lookups for a container fail
    pub fn fail_container_lookup(&self, account: &str, container: &str) {
        self.state
            .lock()
            .failing_lookups
            .insert((account.to_string(), container.to_string()));
    }

    pub fn container_create_calls(&self) -> usize {
        self.state.lock().create_calls
    }

    pub fn clients_built(&self) -> usize {
        self.state.lock().clients_built
    }
}

#[async_trait]
impl ObjectStorageProvider for InMemoryObjectStorage {
    async fn client_for(&self, instance: &Instance) -> Result<ObjectStorageClientRef> {
        let data = self.secrets.read_secret(&instance.secret).await?;
        let credentials = StorageAccountCredentials::from_secret_data(&instance.secret, &data)?;
        self.state.lock().clients_built += 1;
        Ok(Arc::new(InMemoryContainerClient {
            account: credentials.account_name,
            state: self.state.clone(),
        }))
    }
}

struct InMemoryContainerClient {
    account: String,
    state: Arc<Mutex<StorageState>>,
}

#[async_trait]
impl ObjectStorageClient for InMemoryContainerClient {
    fn account_name(&self) -> &str {
        &self.account
    }

    async fn container_exists(&self, container_name: &str) -> Result<bool> {
        let state = self.state.lock();
        let key = (self.account.clone(), container_name.to_string());
        if state.failing_lookups.contains(&key) {
            return Err(Error::ObjectStorage {
                account: self.account.clone(),
                container: container_name.to_string(),
                status: 403,
                code: "AuthorizationFailure".into(),
            });
        }
        Ok(!state.unlisted.contains(&key)
            && state
                .containers
                .get(&self.account)
                .map(|c| c.contains(container_name))
                .unwrap_or(false))
    }

    async fn create_container(&self, container_name: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.create_calls += 1;

        let error = |status: u16, code: &str| Error::ObjectStorage {
            account: self.account.clone(),
            container: container_name.to_string(),
            status,
            code: code.to_string(),
        };

        if state
            .failing
            .contains(&(self.account.clone(), container_name.to_string()))
        {
            return Err(error(500, "InternalError"));
        }

        let containers = state.containers.entry(self.account.clone()).or_default();
        if !containers.insert(container_name.to_string()) {
            return Err(error(409, CONTAINER_ALREADY_EXISTS));
        }

        debug!(account = %self.account, container = %container_name, "Stored container");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provisioning::desired::DesiredStateBuilder;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn test_cluster_create_and_list() {
        let cluster = InMemoryCluster::new();
        let catalog = Catalog::builtin().unwrap();
        let desired = DesiredStateBuilder::default().build("alice", catalog.get("standard").unwrap());

        cluster.create_volume(&desired.volume).await.unwrap();
        cluster.create_claim(&desired.claim).await.unwrap();

        assert_eq!(cluster.list_volume_names().await.unwrap(), vec!["alice-standard"]);
        assert_eq!(cluster.list_claim_names("alice").await.unwrap(), vec!["standard"]);
        assert!(cluster.list_claim_names("bob").await.unwrap().is_empty());

        let err = cluster.create_volume(&desired.volume).await.unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(cluster.volume_create_calls(), 2);
    }

    #[tokio::test]
    async fn test_seeded_secrets_resolve_accounts() {
        let cluster = Arc::new(InMemoryCluster::new());
        let catalog = Catalog::builtin().unwrap();
        cluster.seed_catalog_secrets(&catalog);

        let storage = InMemoryObjectStorage::new(cluster.clone());
        let client = storage.client_for(catalog.get("premium").unwrap()).await.unwrap();
        assert_eq!(client.account_name(), "azuresecretpremium");

        assert!(!client.container_exists("alice").await.unwrap());
        client.create_container("alice").await.unwrap();
        assert!(client.container_exists("alice").await.unwrap());
        assert_matches!(
            client.create_container("alice").await,
            Err(e) if e.is_conflict()
        );
        assert_eq!(storage.container_create_calls(), 2);
    }
}
