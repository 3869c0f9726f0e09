//! Kubernetes Cluster Adapter
//!
//! Lists and creates persistent volumes and claims, and reads credential
//! secrets, through the Kubernetes API.

use crate::catalog::SecretRef;
use crate::domain::ports::{ClusterStateReader, ClusterStateWriter, SecretReader};
use crate::error::{Error, Result};
use crate::provisioning::desired::{DesiredClaim, DesiredVolume};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{PersistentVolume, PersistentVolumeClaim, Secret};
use kube::api::{Api, ListParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Connection timeout for the API server
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Read timeout for API calls
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Kubeconfig to load explicitly, or `None` to let [`Config::infer`] pick
/// one. Path lists (as found in `KUBECONFIG`) are left to inference, which
/// merges them.
pub fn kubeconfig_path(explicit: Option<&Path>) -> Option<PathBuf> {
    let path = explicit?;
    if path.as_os_str().is_empty() {
        return None;
    }
    if std::env::split_paths(path.as_os_str()).count() > 1 {
        warn!(kubeconfig = %path.display(), "Kubeconfig is a path list, inferring config instead");
        return None;
    }
    Some(path.to_path_buf())
}

/// Create a kube client from an optional kubeconfig path, falling back to
/// in-cluster / environment inference
pub async fn create_client(kubeconfig: Option<&Path>, read_timeout: Duration) -> Result<Client> {
    let mut config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                Error::KubeConfig(format!("failed to read {}: {}", path.display(), e))
            })?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| Error::KubeConfig(format!("failed to load kubeconfig: {}", e)))?
        }
        None => Config::infer()
            .await
            .map_err(|e| Error::KubeConfig(format!("failed to infer config: {}", e)))?,
    };
    config.connect_timeout = Some(DEFAULT_CONNECT_TIMEOUT);
    config.read_timeout = Some(read_timeout);

    info!(cluster_url = %config.cluster_url, "Connecting to Kubernetes API");
    Client::try_from(config)
        .map_err(|e| Error::KubeConfig(format!("failed to create client: {}", e)))
}

/// Cluster ports backed by a kube client
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

/// Map a create error, turning 409 into [`Error::ResourceExists`]
fn create_error(kind: &str, name: &str, error: kube::Error) -> Error {
    match error {
        kube::Error::Api(response) if response.code == 409 => Error::ResourceExists {
            kind: kind.to_string(),
            name: name.to_string(),
        },
        e => Error::Kube(e),
    }
}

fn list_error(kind: &str, scope: &str, error: kube::Error) -> Error {
    Error::ListFailed {
        kind: kind.to_string(),
        scope: scope.to_string(),
        reason: error.to_string(),
    }
}

#[async_trait]
impl ClusterStateReader for KubeCluster {
    async fn list_volume_names(&self) -> Result<Vec<String>> {
        let api: Api<PersistentVolume> = Api::all(self.client.clone());
        let volumes = api
            .list_metadata(&ListParams::default())
            .await
            .map_err(|e| list_error("PersistentVolume", "cluster", e))?;

        Ok(volumes
            .items
            .into_iter()
            .filter_map(|v| v.metadata.name)
            .collect())
    }

    async fn list_claim_names(&self, namespace: &str) -> Result<Vec<String>> {
        let api: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), namespace);
        let claims = api
            .list_metadata(&ListParams::default())
            .await
            .map_err(|e| list_error("PersistentVolumeClaim", namespace, e))?;

        Ok(claims
            .items
            .into_iter()
            .filter_map(|c| c.metadata.name)
            .collect())
    }
}

#[async_trait]
impl ClusterStateWriter for KubeCluster {
    async fn create_volume(&self, volume: &DesiredVolume) -> Result<()> {
        let api: Api<PersistentVolume> = Api::all(self.client.clone());
        api.create(&PostParams::default(), &volume.to_manifest())
            .await
            .map_err(|e| create_error("PersistentVolume", &volume.name, e))?;
        debug!(volume = %volume.name, "PersistentVolume created");
        Ok(())
    }

    async fn create_claim(&self, claim: &DesiredClaim) -> Result<()> {
        let api: Api<PersistentVolumeClaim> =
            Api::namespaced(self.client.clone(), &claim.namespace);
        api.create(&PostParams::default(), &claim.to_manifest())
            .await
            .map_err(|e| {
                create_error(
                    "PersistentVolumeClaim",
                    &format!("{}/{}", claim.namespace, claim.name),
                    e,
                )
            })?;
        debug!(namespace = %claim.namespace, claim = %claim.name, "PersistentVolumeClaim created");
        Ok(())
    }
}

#[async_trait]
impl SecretReader for KubeCluster {
    async fn read_secret(&self, secret: &SecretRef) -> Result<BTreeMap<String, Vec<u8>>> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), &secret.secret_namespace);
        let found = api
            .get(&secret.secret_name)
            .await
            .map_err(|e| Error::SecretUnavailable {
                name: secret.secret_name.clone(),
                namespace: secret.secret_namespace.clone(),
                reason: e.to_string(),
            })?;

        Ok(found
            .data
            .unwrap_or_default()
            .into_iter()
            .map(|(key, value)| (key, value.0))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use kube::error::ErrorResponse;

    fn api_error(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".into(),
            message: format!("persistentvolumes \"alice-standard\" {}", reason),
            reason: reason.into(),
            code,
        })
    }

    #[test]
    fn test_create_conflict_maps_to_exists() {
        let err = create_error("PersistentVolume", "alice-standard", api_error(409, "AlreadyExists"));
        assert_matches!(err, Error::ResourceExists { ref name, .. } if name == "alice-standard");
        assert!(err.is_conflict());
    }

    #[test]
    fn test_other_create_errors_stay_failures() {
        let err = create_error("PersistentVolume", "alice-standard", api_error(422, "Invalid"));
        assert_matches!(err, Error::Kube(_));
        assert!(!err.is_conflict());
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_kubeconfig_path_lists_fall_back_to_inference() {
        let single = Path::new("/etc/provisioner/kubeconfig");
        assert_eq!(kubeconfig_path(Some(single)), Some(single.to_path_buf()));
        assert_eq!(kubeconfig_path(None), None);
        assert_eq!(kubeconfig_path(Some(Path::new(""))), None);

        let list = std::env::join_paths(["/home/ops/.kube/config", "/home/ops/.kube/staging"])
            .unwrap();
        assert_eq!(kubeconfig_path(Some(Path::new(&list))), None);
    }

    #[test]
    fn test_list_errors_are_transient() {
        let err = list_error("PersistentVolumeClaim", "alice", api_error(403, "Forbidden"));
        assert_eq!(err.class(), crate::error::ErrorClass::TickTransient);
    }
}
