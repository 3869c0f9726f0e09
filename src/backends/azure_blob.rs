//! Azure Blob Storage Adapter
//!
//! Creates blob containers through the Blob service REST API, authorised
//! with the storage account's shared key. Credentials come from the secret
//! referenced by each catalog instance, so every instance gets a client
//! bound to its own storage account.

use crate::catalog::{Instance, SecretRef};
use crate::domain::ports::{
    ObjectStorageClient, ObjectStorageClientRef, ObjectStorageProvider, SecretReaderRef,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use reqwest::{Method, StatusCode};
use sha2::Sha256;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

/// Secret key holding the storage account name
pub const ACCOUNT_NAME_KEY: &str = "azurestorageaccountname";
/// Secret key holding the base64 storage account key
pub const ACCOUNT_KEY_KEY: &str = "azurestorageaccountkey";

/// Blob service REST version sent with every request
pub const BLOB_API_VERSION: &str = "2021-08-06";

const ERROR_CODE_HEADER: &str = "x-ms-error-code";

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the blob adapter
#[derive(Debug, Clone)]
pub struct AzureBlobConfig {
    /// DNS suffix appended to the account name
    pub endpoint_suffix: String,
    /// HTTP request timeout
    pub request_timeout: Duration,
}

impl Default for AzureBlobConfig {
    fn default() -> Self {
        Self {
            endpoint_suffix: "blob.core.windows.net".to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

// =============================================================================
// Credentials
// =============================================================================

/// Shared key credentials for one storage account
#[derive(Clone)]
pub struct StorageAccountCredentials {
    pub account_name: String,
    account_key: Vec<u8>,
}

impl fmt::Debug for StorageAccountCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageAccountCredentials")
            .field("account_name", &self.account_name)
            .field("account_key", &"<redacted>")
            .finish()
    }
}

impl StorageAccountCredentials {
    /// Build credentials from an account name and base64 account key
    pub fn new(account_name: impl Into<String>, account_key: &str) -> Result<Self> {
        let account_name = account_name.into();
        let account_key = BASE64
            .decode(account_key.trim())
            .map_err(|e| Error::InvalidAccountKey {
                account: account_name.clone(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            account_name,
            account_key,
        })
    }

    /// Extract credentials from decoded secret data
    pub fn from_secret_data(secret: &SecretRef, data: &BTreeMap<String, Vec<u8>>) -> Result<Self> {
        let field = |key: &str| -> Result<String> {
            let value = data.get(key).ok_or_else(|| Error::SecretMissingKey {
                name: secret.secret_name.clone(),
                namespace: secret.secret_namespace.clone(),
                key: key.to_string(),
            })?;
            String::from_utf8(value.clone()).map_err(|e| Error::SecretUnavailable {
                name: secret.secret_name.clone(),
                namespace: secret.secret_namespace.clone(),
                reason: format!("{} is not UTF-8: {}", key, e),
            })
        };

        let account_name = field(ACCOUNT_NAME_KEY)?.trim().to_string();
        let account_key = field(ACCOUNT_KEY_KEY)?;
        Self::new(account_name, &account_key)
    }

    /// Base64 HMAC-SHA256 of `string_to_sign` under the account key
    pub fn sign(&self, string_to_sign: &str) -> Result<String> {
        let mut mac = HmacSha256::new_from_slice(&self.account_key).map_err(|e| {
            Error::InvalidAccountKey {
                account: self.account_name.clone(),
                reason: e.to_string(),
            }
        })?;
        mac.update(string_to_sign.as_bytes());
        Ok(BASE64.encode(mac.finalize().into_bytes()))
    }
}

/// Shared Key string-to-sign for container-level requests without a body
fn container_string_to_sign(verb: &str, date: &str, account: &str, container: &str) -> String {
    // VERB followed by eleven empty standard headers
    format!(
        "{verb}\n{blank}x-ms-date:{date}\nx-ms-version:{version}\n/{account}/{container}\nrestype:container",
        verb = verb,
        blank = "\n".repeat(11),
        date = date,
        version = BLOB_API_VERSION,
        account = account,
        container = container,
    )
}

fn rfc1123_now() -> String {
    chrono::Utc::now()
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}

// =============================================================================
// Client
// =============================================================================

/// Container client for one storage account
pub struct AzureBlobClient {
    http: reqwest::Client,
    credentials: StorageAccountCredentials,
    base_url: String,
}

impl AzureBlobClient {
    pub fn new(
        http: reqwest::Client,
        credentials: StorageAccountCredentials,
        config: &AzureBlobConfig,
    ) -> Self {
        let base_url = format!(
            "https://{}.{}",
            credentials.account_name, config.endpoint_suffix
        );
        Self {
            http,
            credentials,
            base_url,
        }
    }

    fn container_url(&self, container: &str) -> String {
        format!(
            "{}/{}?restype=container",
            self.base_url,
            urlencoding::encode(container)
        )
    }

    async fn send(&self, method: Method, container: &str) -> Result<reqwest::Response> {
        let date = rfc1123_now();
        let signature = self.credentials.sign(&container_string_to_sign(
            method.as_str(),
            &date,
            &self.credentials.account_name,
            container,
        ))?;

        let mut request = self
            .http
            .request(method.clone(), self.container_url(container))
            .header("x-ms-date", &date)
            .header("x-ms-version", BLOB_API_VERSION)
            .header(
                reqwest::header::AUTHORIZATION,
                format!("SharedKey {}:{}", self.credentials.account_name, signature),
            );
        if method == Method::PUT {
            request = request.header(reqwest::header::CONTENT_LENGTH, "0");
        }

        debug!(
            account = %self.credentials.account_name,
            container = %container,
            method = %method,
            "Sending blob container request"
        );
        Ok(request.send().await?)
    }

    fn status_error(&self, container: &str, response: &reqwest::Response) -> Error {
        let code = response
            .headers()
            .get(ERROR_CODE_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("Unknown")
            .to_string();
        Error::ObjectStorage {
            account: self.credentials.account_name.clone(),
            container: container.to_string(),
            status: response.status().as_u16(),
            code,
        }
    }
}

#[async_trait]
impl ObjectStorageClient for AzureBlobClient {
    fn account_name(&self) -> &str {
        &self.credentials.account_name
    }

    async fn container_exists(&self, container_name: &str) -> Result<bool> {
        let response = self.send(Method::HEAD, container_name).await?;
        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(self.status_error(container_name, &response)),
        }
    }

    async fn create_container(&self, container_name: &str) -> Result<()> {
        let response = self.send(Method::PUT, container_name).await?;
        if response.status() == StatusCode::CREATED {
            Ok(())
        } else {
            Err(self.status_error(container_name, &response))
        }
    }
}

// =============================================================================
// Provider
// =============================================================================

/// Resolves instance secrets into blob clients
pub struct AzureBlobProvider {
    secrets: SecretReaderRef,
    http: reqwest::Client,
    config: AzureBlobConfig,
}

impl AzureBlobProvider {
    pub fn new(secrets: SecretReaderRef, config: AzureBlobConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            secrets,
            http,
            config,
        })
    }

    /// Build a client from credentials that are already resolved
    pub fn client(&self, credentials: StorageAccountCredentials) -> AzureBlobClient {
        AzureBlobClient::new(self.http.clone(), credentials, &self.config)
    }
}

#[async_trait]
impl ObjectStorageProvider for AzureBlobProvider {
    async fn client_for(&self, instance: &Instance) -> Result<ObjectStorageClientRef> {
        let data = self.secrets.read_secret(&instance.secret).await?;
        let credentials = StorageAccountCredentials::from_secret_data(&instance.secret, &data)?;
        Ok(Arc::new(self.client(credentials)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::memory::InMemoryCluster;
    use crate::catalog::Catalog;
    use assert_matches::assert_matches;

    const TEST_KEY: &str = "cHJvdmlzaW9uZXItdGVzdC1rZXktMDEyMzQ1Njc4OQ==";

    fn secret_data(name: &str, key: &str) -> BTreeMap<String, Vec<u8>> {
        let mut data = BTreeMap::new();
        data.insert(ACCOUNT_NAME_KEY.to_string(), name.as_bytes().to_vec());
        data.insert(ACCOUNT_KEY_KEY.to_string(), key.as_bytes().to_vec());
        data
    }

    #[test]
    fn test_string_to_sign_layout() {
        let sts = container_string_to_sign("PUT", "Sun, 18 Oct 2026 12:00:00 GMT", "acct", "alice");
        let lines: Vec<_> = sts.split('\n').collect();

        assert_eq!(lines[0], "PUT");
        assert!(lines[1..12].iter().all(|l| l.is_empty()));
        assert_eq!(lines[12], "x-ms-date:Sun, 18 Oct 2026 12:00:00 GMT");
        assert_eq!(lines[13], "x-ms-version:2021-08-06");
        assert_eq!(lines[14], "/acct/alice");
        assert_eq!(lines[15], "restype:container");
    }

    #[test]
    fn test_shared_key_signature() {
        let credentials = StorageAccountCredentials::new("acct", TEST_KEY).unwrap();
        let sts = container_string_to_sign("PUT", "Sun, 18 Oct 2026 12:00:00 GMT", "acct", "alice");

        assert_eq!(
            credentials.sign(&sts).unwrap(),
            "0PBbLY4P08csS/+g4blgwjpphilMRWbMtE9trHdH4SI="
        );
    }

    #[test]
    fn test_credentials_from_secret() {
        let secret = SecretRef::parse("azure-secret").unwrap();

        let credentials =
            StorageAccountCredentials::from_secret_data(&secret, &secret_data("acct\n", TEST_KEY))
                .unwrap();
        assert_eq!(credentials.account_name, "acct");
        assert!(!format!("{:?}", credentials).contains(TEST_KEY));

        let mut missing = secret_data("acct", TEST_KEY);
        missing.remove(ACCOUNT_KEY_KEY);
        assert_matches!(
            StorageAccountCredentials::from_secret_data(&secret, &missing),
            Err(Error::SecretMissingKey { key, .. }) if key == ACCOUNT_KEY_KEY
        );

        assert_matches!(
            StorageAccountCredentials::from_secret_data(&secret, &secret_data("acct", "not base64!")),
            Err(Error::InvalidAccountKey { .. })
        );
    }

    #[test]
    fn test_container_url() {
        let credentials = StorageAccountCredentials::new("acct", TEST_KEY).unwrap();
        let client = AzureBlobClient::new(
            reqwest::Client::new(),
            credentials,
            &AzureBlobConfig::default(),
        );
        assert_eq!(
            client.container_url("alice"),
            "https://acct.blob.core.windows.net/alice?restype=container"
        );
        assert_eq!(client.account_name(), "acct");
    }

    #[tokio::test]
    async fn test_provider_resolves_instance_account() {
        let cluster = Arc::new(InMemoryCluster::new());
        cluster.add_storage_account_secret("azure-secret-premium", "azure-blob-csi-system", "premiumacct");
        let provider = AzureBlobProvider::new(cluster.clone(), AzureBlobConfig::default()).unwrap();
        let catalog = Catalog::builtin().unwrap();

        let client = provider
            .client_for(catalog.get("premium").unwrap())
            .await
            .unwrap();
        assert_eq!(client.account_name(), "premiumacct");

        let err = provider
            .client_for(catalog.get("standard").unwrap())
            .await
            .err()
            .unwrap();
        assert_matches!(err, Error::SecretUnavailable { .. });
    }
}
