//! Domain Ports - Capability traits the reconciler depends on
//!
//! These traits define the boundaries between the reconciliation logic and
//! the cluster, the object storage service and the tenant directory.
//! Adapters in [`crate::backends`] implement them.

use crate::catalog::{Instance, SecretRef};
use crate::error::Result;
use crate::provisioning::desired::{DesiredClaim, DesiredVolume};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

// =============================================================================
// Cluster State Ports
// =============================================================================

/// Read access to the storage objects already present on the cluster
#[async_trait]
pub trait ClusterStateReader: Send + Sync {
    /// Names of all persistent volumes (cluster scoped)
    async fn list_volume_names(&self) -> Result<Vec<String>>;

    /// Names of all persistent volume claims in a namespace
    async fn list_claim_names(&self, namespace: &str) -> Result<Vec<String>>;
}

/// Create access for cluster storage objects
///
/// Implementations report an object that already exists as
/// [`crate::error::Error::ResourceExists`] (or a kube 409).
#[async_trait]
pub trait ClusterStateWriter: Send + Sync {
    /// Create a persistent volume
    async fn create_volume(&self, volume: &DesiredVolume) -> Result<()>;

    /// Create a persistent volume claim in the claim's namespace
    async fn create_claim(&self, claim: &DesiredClaim) -> Result<()>;
}

/// Read access to credential secrets
#[async_trait]
pub trait SecretReader: Send + Sync {
    /// Fetch the decoded data of a secret
    async fn read_secret(&self, secret: &SecretRef) -> Result<BTreeMap<String, Vec<u8>>>;
}

// =============================================================================
// Object Storage Ports
// =============================================================================

/// A storage client bound to one storage account
#[async_trait]
pub trait ObjectStorageClient: Send + Sync {
    /// Storage account this client writes to
    fn account_name(&self) -> &str;

    /// Whether the container is already there
    async fn container_exists(&self, container_name: &str) -> Result<bool>;

    /// Create a container; an existing container is reported as a conflict
    async fn create_container(&self, container_name: &str) -> Result<()>;
}

/// Builds storage clients scoped to an instance's credentials
#[async_trait]
pub trait ObjectStorageProvider: Send + Sync {
    async fn client_for(&self, instance: &Instance) -> Result<ObjectStorageClientRef>;
}

// =============================================================================
// Profile Source Port
// =============================================================================

/// Directory of tenants that should receive storage
#[async_trait]
pub trait ProfileSource: Send + Sync {
    async fn profiles(&self) -> Result<Vec<String>>;
}

/// Fixed list of profiles
#[derive(Debug, Clone)]
pub struct StaticProfiles {
    profiles: Vec<String>,
}

impl StaticProfiles {
    pub fn new<I, S>(profiles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            profiles: profiles.into_iter().map(Into::into).collect(),
        }
    }
}

impl Default for StaticProfiles {
    fn default() -> Self {
        Self::new(["alice", "bob"])
    }
}

#[async_trait]
impl ProfileSource for StaticProfiles {
    async fn profiles(&self) -> Result<Vec<String>> {
        Ok(self.profiles.clone())
    }
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type ClusterStateReaderRef = Arc<dyn ClusterStateReader>;
pub type ClusterStateWriterRef = Arc<dyn ClusterStateWriter>;
pub type SecretReaderRef = Arc<dyn SecretReader>;
pub type ObjectStorageClientRef = Arc<dyn ObjectStorageClient>;
pub type ObjectStorageProviderRef = Arc<dyn ObjectStorageProvider>;
pub type ProfileSourceRef = Arc<dyn ProfileSource>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_profiles_keep_order() {
        let source = StaticProfiles::new(vec!["carol", "alice"]);
        assert_eq!(source.profiles().await.unwrap(), vec!["carol", "alice"]);

        let default = StaticProfiles::default();
        assert_eq!(default.profiles().await.unwrap(), vec!["alice", "bob"]);
    }
}
