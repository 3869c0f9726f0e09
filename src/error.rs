//! Error types for the blob provisioner
//!
//! Provides structured error types for catalog loading, cluster access,
//! object storage and the reconciliation loop, together with the
//! classification the reconciler uses to decide how far a failure reaches.

use thiserror::Error;

/// Unified error type for the provisioner
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Catalog Errors
    // =========================================================================
    #[error("Catalog entry {index} is malformed: {reason}")]
    CatalogParse { index: usize, reason: String },

    #[error("Duplicate instance in catalog: {name}")]
    DuplicateInstance { name: String },

    #[error("Invalid secret reference: {0}")]
    InvalidSecretRef(String),

    #[error("Capacity parse error: {0}")]
    CapacityParse(String),

    // =========================================================================
    // Kubernetes Errors
    // =========================================================================
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Kubeconfig error: {0}")]
    KubeConfig(String),

    #[error("Resource already exists: {kind}/{name}")]
    ResourceExists { kind: String, name: String },

    #[error("Listing {kind} failed in {scope}: {reason}")]
    ListFailed {
        kind: String,
        scope: String,
        reason: String,
    },

    #[error("Creating {kind}/{name} failed: {reason}")]
    CreateFailed {
        kind: String,
        name: String,
        reason: String,
    },

    // =========================================================================
    // Credential Errors
    // =========================================================================
    #[error("Secret {namespace}/{name} could not be read: {reason}")]
    SecretUnavailable {
        name: String,
        namespace: String,
        reason: String,
    },

    #[error("Secret {namespace}/{name} is missing key {key}")]
    SecretMissingKey {
        name: String,
        namespace: String,
        key: String,
    },

    #[error("Invalid storage account key for {account}: {reason}")]
    InvalidAccountKey { account: String, reason: String },

    // =========================================================================
    // Object Storage Errors
    // =========================================================================
    #[error("Object storage request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Object storage error for {account}/{container}: HTTP {status} {code}")]
    ObjectStorage {
        account: String,
        container: String,
        status: u16,
        code: String,
    },

    // =========================================================================
    // Timeouts
    // =========================================================================
    #[error("Operation timed out after {millis}ms: {operation}")]
    Timeout { operation: String, millis: u64 },

    // =========================================================================
    // Parse / IO Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// How far a failure reaches within the reconciliation loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The process cannot proceed (no valid desired state or cluster access)
    Fatal,
    /// Abort the current scope (tick or profile), retry on the next tick
    TickTransient,
    /// The object already exists; counts as success
    Conflict,
    /// A single create failed; left for the next tick
    ObjectFailure,
    /// Credentials for one instance could not be resolved
    InstanceCredential,
}

impl Error {
    /// Classify this error
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::Configuration(_)
            | Error::CatalogParse { .. }
            | Error::DuplicateInstance { .. }
            | Error::InvalidSecretRef(_)
            | Error::CapacityParse(_)
            | Error::KubeConfig(_)
            | Error::JsonParse(_)
            | Error::Io(_) => ErrorClass::Fatal,

            Error::ResourceExists { .. } => ErrorClass::Conflict,
            Error::ObjectStorage { code, .. } if code == CONTAINER_ALREADY_EXISTS => {
                ErrorClass::Conflict
            }
            Error::Kube(kube::Error::Api(response)) if response.code == 409 => {
                ErrorClass::Conflict
            }

            Error::ListFailed { .. } | Error::Timeout { .. } => ErrorClass::TickTransient,

            Error::SecretUnavailable { .. }
            | Error::SecretMissingKey { .. }
            | Error::InvalidAccountKey { .. } => ErrorClass::InstanceCredential,

            _ => ErrorClass::ObjectFailure,
        }
    }

    /// Timeout for `operation` after `limit`, saturating at `u64::MAX` ms
    pub fn timeout(operation: impl Into<String>, limit: std::time::Duration) -> Self {
        Error::Timeout {
            operation: operation.into(),
            millis: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Check if this error means the object is already there
    pub fn is_conflict(&self) -> bool {
        self.class() == ErrorClass::Conflict
    }

    /// Check if the process must stop
    pub fn is_fatal(&self) -> bool {
        self.class() == ErrorClass::Fatal
    }
}

/// Error code returned by the blob service when the container exists
pub const CONTAINER_ALREADY_EXISTS: &str = "ContainerAlreadyExists";

/// Result type alias for the provisioner
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    fn api_error(code: u16, reason: &str) -> Error {
        Error::Kube(kube::Error::Api(kube::error::ErrorResponse {
            status: "Failure".into(),
            message: format!("{} test", reason),
            reason: reason.into(),
            code,
        }))
    }

    #[test]
    fn test_error_classes() {
        let err = Error::CatalogParse {
            index: 2,
            reason: "missing field `name`".into(),
        };
        assert_eq!(err.class(), ErrorClass::Fatal);
        assert!(err.is_fatal());

        let err = Error::ListFailed {
            kind: "PersistentVolumeClaim".into(),
            scope: "alice".into(),
            reason: "connection refused".into(),
        };
        assert_eq!(err.class(), ErrorClass::TickTransient);

        let err = Error::SecretMissingKey {
            name: "azure-secret".into(),
            namespace: "azure-blob-csi-system".into(),
            key: "azurestorageaccountkey".into(),
        };
        assert_eq!(err.class(), ErrorClass::InstanceCredential);
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_timeout_millis_saturate() {
        let err = Error::timeout("list volumes", std::time::Duration::from_millis(1500));
        assert!(matches!(err, Error::Timeout { millis: 1500, .. }));
        assert_eq!(err.class(), ErrorClass::TickTransient);

        let err = Error::timeout("tick 1", std::time::Duration::MAX);
        assert!(matches!(err, Error::Timeout { millis: u64::MAX, .. }));
    }

    #[test]
    fn test_conflicts() {
        assert!(api_error(409, "AlreadyExists").is_conflict());
        assert!(!api_error(403, "Forbidden").is_conflict());
        assert_eq!(api_error(500, "InternalError").class(), ErrorClass::ObjectFailure);

        let exists = Error::ObjectStorage {
            account: "acct".into(),
            container: "alice".into(),
            status: 409,
            code: CONTAINER_ALREADY_EXISTS.into(),
        };
        assert!(exists.is_conflict());

        let being_deleted = Error::ObjectStorage {
            account: "acct".into(),
            container: "alice".into(),
            status: 409,
            code: "ContainerBeingDeleted".into(),
        };
        assert_eq!(being_deleted.class(), ErrorClass::ObjectFailure);

        let exists = Error::ResourceExists {
            kind: "PersistentVolume".into(),
            name: "alice-standard".into(),
        };
        assert!(exists.is_conflict());
    }
}
