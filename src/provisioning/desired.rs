//! Desired State Builder
//!
//! Pure mapping from a (profile, instance) pair to the volume, claim and
//! container that pair should have. No I/O happens here; the same inputs
//! always produce the same desired objects.

use crate::catalog::{Instance, SecretRef, StorageCapacity};
use k8s_openapi::api::core::v1::{
    CSIPersistentVolumeSource, ObjectReference, PersistentVolume, PersistentVolumeClaim,
    PersistentVolumeClaimSpec, PersistentVolumeSpec, SecretReference,
    VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// =============================================================================
// Constants
// =============================================================================

pub const PROFILE_LABEL: &str = "profile";
pub const AUTOMOUNT_LABEL: &str = "blob.aaw.statcan.gc.ca/automount";
pub const CLASSIFICATION_LABEL: &str = "data.statcan.gc.ca/classification";

/// CSI driver serving the volumes
pub const BLOB_CSI_DRIVER: &str = "blob.csi.azure.com";

/// Lets pods running as other users read the fuse mount
pub const MOUNT_ALLOW_OTHER: &str = "-o allow_other";

/// Requested for read-only tiers. blobfuse ignores it, so read-only access
/// is only enforced through the access mode and the CSI `readOnly` flag.
pub const MOUNT_READ_ONLY: &str = "-o ro";

const RESOURCE_STORAGE: &str = "storage";

// =============================================================================
// Enums
// =============================================================================

/// Volume access mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccessMode {
    ReadWriteMany,
    ReadOnlyMany,
}

impl AccessMode {
    pub fn for_instance(instance: &Instance) -> Self {
        if instance.read_only {
            AccessMode::ReadOnlyMany
        } else {
            AccessMode::ReadWriteMany
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AccessMode::ReadWriteMany => "ReadWriteMany",
            AccessMode::ReadOnlyMany => "ReadOnlyMany",
        }
    }
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Reclaim policy; volumes are never released back to the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReclaimPolicy {
    Retain,
}

impl ReclaimPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReclaimPolicy::Retain => "Retain",
        }
    }
}

/// Where the requested size of volumes and claims comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapacitySource {
    /// One deployment-wide size for every tier
    #[default]
    Fixed,
    /// The `capacity` declared by each catalog instance
    Catalog,
}

// =============================================================================
// Desired Objects
// =============================================================================

/// Claim a volume is reserved for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimRef {
    pub name: String,
    pub namespace: String,
}

/// Desired cluster-scoped persistent volume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredVolume {
    pub name: String,
    pub access_mode: AccessMode,
    pub capacity: StorageCapacity,
    pub secret_ref: SecretRef,
    pub reclaim_policy: ReclaimPolicy,
    pub claim_ref: ClaimRef,
    pub mount_options: Vec<String>,
    pub container_name: String,
    pub read_only: bool,
    pub csi_driver: String,
    pub labels: BTreeMap<String, String>,
}

/// Desired namespaced persistent volume claim
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredClaim {
    pub namespace: String,
    pub name: String,
    pub access_mode: AccessMode,
    pub capacity: StorageCapacity,
    pub volume_name: String,
    /// Always empty so no dynamic provisioner picks the claim up
    pub storage_class_name: String,
    pub labels: BTreeMap<String, String>,
}

/// Desired blob container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredContainer {
    pub credentials_from: SecretRef,
    pub container_name: String,
}

/// Everything one (profile, instance) pair should have
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredState {
    pub volume: DesiredVolume,
    pub claim: DesiredClaim,
    /// Absent for read-only instances
    pub container: Option<DesiredContainer>,
}

/// Persistent volume names are cluster scoped, so they carry the profile
pub fn volume_name(profile: &str, instance: &Instance) -> String {
    format!("{}-{}", profile, instance.name)
}

// =============================================================================
// Builder
// =============================================================================

/// Configuration for [`DesiredStateBuilder`]
#[derive(Debug, Clone)]
pub struct DesiredStateConfig {
    /// Size used when `capacity_source` is `Fixed`
    pub capacity: StorageCapacity,
    pub capacity_source: CapacitySource,
    pub csi_driver: String,
}

impl Default for DesiredStateConfig {
    fn default() -> Self {
        Self {
            capacity: StorageCapacity::default(),
            capacity_source: CapacitySource::Fixed,
            csi_driver: BLOB_CSI_DRIVER.to_string(),
        }
    }
}

/// Derives desired objects for (profile, instance) pairs
#[derive(Debug, Clone, Default)]
pub struct DesiredStateBuilder {
    config: DesiredStateConfig,
}

impl DesiredStateBuilder {
    pub fn new(config: DesiredStateConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DesiredStateConfig {
        &self.config
    }

    /// Build the volume, claim and (for writable tiers) container
    pub fn build(&self, profile: &str, instance: &Instance) -> DesiredState {
        DesiredState {
            volume: self.volume(profile, instance),
            claim: self.claim(profile, instance),
            container: self.container(profile, instance),
        }
    }

    fn capacity_for(&self, instance: &Instance) -> StorageCapacity {
        match self.config.capacity_source {
            CapacitySource::Fixed => self.config.capacity.clone(),
            CapacitySource::Catalog => instance.capacity.clone(),
        }
    }

    pub fn volume(&self, profile: &str, instance: &Instance) -> DesiredVolume {
        let mut mount_options = vec![MOUNT_ALLOW_OTHER.to_string()];
        if instance.read_only {
            mount_options.push(MOUNT_READ_ONLY.to_string());
        }

        let mut labels = BTreeMap::new();
        labels.insert(CLASSIFICATION_LABEL.to_string(), instance.classification.clone());
        labels.insert(PROFILE_LABEL.to_string(), profile.to_string());

        DesiredVolume {
            name: volume_name(profile, instance),
            access_mode: AccessMode::for_instance(instance),
            capacity: self.capacity_for(instance),
            secret_ref: instance.secret.clone(),
            reclaim_policy: ReclaimPolicy::Retain,
            claim_ref: ClaimRef {
                name: instance.name.clone(),
                namespace: profile.to_string(),
            },
            mount_options,
            container_name: profile.to_string(),
            read_only: instance.read_only,
            csi_driver: self.config.csi_driver.clone(),
            labels,
        }
    }

    pub fn claim(&self, profile: &str, instance: &Instance) -> DesiredClaim {
        let mut labels = BTreeMap::new();
        labels.insert(CLASSIFICATION_LABEL.to_string(), instance.classification.clone());
        labels.insert(AUTOMOUNT_LABEL.to_string(), "true".to_string());

        DesiredClaim {
            namespace: profile.to_string(),
            name: instance.name.clone(),
            access_mode: AccessMode::for_instance(instance),
            capacity: self.capacity_for(instance),
            volume_name: volume_name(profile, instance),
            storage_class_name: String::new(),
            labels,
        }
    }

    pub fn container(&self, profile: &str, instance: &Instance) -> Option<DesiredContainer> {
        if instance.read_only {
            return None;
        }
        Some(DesiredContainer {
            credentials_from: instance.secret.clone(),
            container_name: profile.to_string(),
        })
    }
}

// =============================================================================
// Manifest Rendering
// =============================================================================

impl DesiredVolume {
    /// Render as a Kubernetes `PersistentVolume`
    pub fn to_manifest(&self) -> PersistentVolume {
        let mut capacity = BTreeMap::new();
        capacity.insert(
            RESOURCE_STORAGE.to_string(),
            Quantity(self.capacity.quantity().to_string()),
        );

        let mut volume_attributes = BTreeMap::new();
        volume_attributes.insert("containerName".to_string(), self.container_name.clone());

        PersistentVolume {
            metadata: ObjectMeta {
                name: Some(self.name.clone()),
                labels: Some(self.labels.clone()),
                ..Default::default()
            },
            spec: Some(PersistentVolumeSpec {
                access_modes: Some(vec![self.access_mode.as_str().to_string()]),
                capacity: Some(capacity),
                csi: Some(CSIPersistentVolumeSource {
                    driver: self.csi_driver.clone(),
                    node_stage_secret_ref: Some(SecretReference {
                        name: Some(self.secret_ref.secret_name.clone()),
                        namespace: Some(self.secret_ref.secret_namespace.clone()),
                    }),
                    read_only: Some(self.read_only),
                    volume_attributes: Some(volume_attributes),
                    volume_handle: self.name.clone(),
                    ..Default::default()
                }),
                persistent_volume_reclaim_policy: Some(self.reclaim_policy.as_str().to_string()),
                mount_options: Some(self.mount_options.clone()),
                claim_ref: Some(ObjectReference {
                    name: Some(self.claim_ref.name.clone()),
                    namespace: Some(self.claim_ref.namespace.clone()),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

impl DesiredClaim {
    /// Render as a Kubernetes `PersistentVolumeClaim`
    pub fn to_manifest(&self) -> PersistentVolumeClaim {
        let mut requests = BTreeMap::new();
        requests.insert(
            RESOURCE_STORAGE.to_string(),
            Quantity(self.capacity.quantity().to_string()),
        );

        PersistentVolumeClaim {
            metadata: ObjectMeta {
                name: Some(self.name.clone()),
                namespace: Some(self.namespace.clone()),
                labels: Some(self.labels.clone()),
                ..Default::default()
            },
            spec: Some(PersistentVolumeClaimSpec {
                access_modes: Some(vec![self.access_mode.as_str().to_string()]),
                resources: Some(VolumeResourceRequirements {
                    requests: Some(requests),
                    ..Default::default()
                }),
                storage_class_name: Some(self.storage_class_name.clone()),
                volume_name: Some(self.volume_name.clone()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;

    fn standard() -> Instance {
        Catalog::builtin().unwrap().get("standard").unwrap().clone()
    }

    fn standard_ro() -> Instance {
        Catalog::builtin().unwrap().get("standard-ro").unwrap().clone()
    }

    #[test]
    fn test_writable_volume() {
        let builder = DesiredStateBuilder::default();
        let state = builder.build("alice", &standard());

        let volume = &state.volume;
        assert_eq!(volume.name, "alice-standard");
        assert_eq!(volume.access_mode, AccessMode::ReadWriteMany);
        assert_eq!(volume.reclaim_policy, ReclaimPolicy::Retain);
        assert_eq!(volume.claim_ref.name, "standard");
        assert_eq!(volume.claim_ref.namespace, "alice");
        assert_eq!(volume.mount_options, vec![MOUNT_ALLOW_OTHER.to_string()]);
        assert_eq!(volume.secret_ref.secret_name, "azure-secret");
        assert_eq!(volume.secret_ref.secret_namespace, "azure-blob-csi-system");
        assert_eq!(volume.labels[PROFILE_LABEL], "alice");
        assert_eq!(volume.labels[CLASSIFICATION_LABEL], "unclassified");

        let claim = &state.claim;
        assert_eq!(claim.name, "standard");
        assert_eq!(claim.namespace, "alice");
        assert_eq!(claim.volume_name, "alice-standard");
        assert_eq!(claim.labels[AUTOMOUNT_LABEL], "true");
        assert!(!claim.labels.contains_key(PROFILE_LABEL));

        let container = state.container.expect("writable tier has a container");
        assert_eq!(container.container_name, "alice");
        assert_eq!(container.credentials_from.secret_name, "azure-secret");
    }

    #[test]
    fn test_read_only_volume() {
        let state = DesiredStateBuilder::default().build("bob", &standard_ro());

        assert!(state.container.is_none());
        assert_eq!(state.volume.access_mode, AccessMode::ReadOnlyMany);
        assert_eq!(state.claim.access_mode, AccessMode::ReadOnlyMany);
        assert!(state.volume.read_only);
        assert_eq!(
            state.volume.mount_options,
            vec![MOUNT_ALLOW_OTHER.to_string(), MOUNT_READ_ONLY.to_string()]
        );
        assert_eq!(state.volume.labels[CLASSIFICATION_LABEL], "protected-b");
    }

    #[test]
    fn test_build_is_deterministic() {
        let builder = DesiredStateBuilder::default();
        let instance = standard();

        let first = builder.build("alice", &instance);
        let _ = builder.build("bob", &standard_ro());
        let second = builder.build("alice", &instance);
        assert_eq!(first, second);
    }

    #[test]
    fn test_capacity_source() {
        let instance = standard();

        let fixed = DesiredStateBuilder::default().build("alice", &instance);
        assert_eq!(fixed.volume.capacity.quantity(), "100G");
        assert_eq!(fixed.claim.capacity.quantity(), "100G");

        let from_catalog = DesiredStateBuilder::new(DesiredStateConfig {
            capacity_source: CapacitySource::Catalog,
            ..Default::default()
        })
        .build("alice", &instance);
        assert_eq!(from_catalog.volume.capacity.quantity(), "100Gi");
        assert_eq!(from_catalog.claim.capacity.quantity(), "100Gi");
    }

    #[test]
    fn test_volume_manifest() {
        let volume = DesiredStateBuilder::default().volume("alice", &standard());
        let pv = volume.to_manifest();

        assert_eq!(pv.metadata.name.as_deref(), Some("alice-standard"));
        let spec = pv.spec.unwrap();
        assert_eq!(spec.access_modes, Some(vec!["ReadWriteMany".to_string()]));
        assert_eq!(spec.persistent_volume_reclaim_policy.as_deref(), Some("Retain"));
        assert_eq!(spec.capacity.unwrap()["storage"], Quantity("100G".into()));

        let claim_ref = spec.claim_ref.unwrap();
        assert_eq!(claim_ref.name.as_deref(), Some("standard"));
        assert_eq!(claim_ref.namespace.as_deref(), Some("alice"));

        let csi = spec.csi.unwrap();
        assert_eq!(csi.driver, BLOB_CSI_DRIVER);
        assert_eq!(csi.volume_handle, "alice-standard");
        assert_eq!(csi.read_only, Some(false));
        assert_eq!(csi.volume_attributes.unwrap()["containerName"], "alice");
        let secret = csi.node_stage_secret_ref.unwrap();
        assert_eq!(secret.name.as_deref(), Some("azure-secret"));
        assert_eq!(secret.namespace.as_deref(), Some("azure-blob-csi-system"));
    }

    #[test]
    fn test_claim_manifest() {
        let claim = DesiredStateBuilder::default().claim("alice", &standard_ro());
        let pvc = claim.to_manifest();

        assert_eq!(pvc.metadata.name.as_deref(), Some("standard-ro"));
        assert_eq!(pvc.metadata.namespace.as_deref(), Some("alice"));
        let spec = pvc.spec.unwrap();
        assert_eq!(spec.access_modes, Some(vec!["ReadOnlyMany".to_string()]));
        assert_eq!(spec.storage_class_name.as_deref(), Some(""));
        assert_eq!(spec.volume_name.as_deref(), Some("alice-standard-ro"));
        assert_eq!(
            spec.resources.unwrap().requests.unwrap()["storage"],
            Quantity("100G".into())
        );
    }
}
