//! Secret references in `name/namespace` form

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Namespace assumed when a reference carries no `/namespace` part
pub const DEFAULT_SECRET_NAMESPACE: &str = "azure-blob-csi-system";

/// Pointer to the secret holding a storage account's credentials
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SecretRef {
    pub secret_name: String,
    pub secret_namespace: String,
}

impl SecretRef {
    /// Parse `<name>/<namespace>` or a bare `<name>`
    pub fn parse(input: &str) -> Result<Self> {
        let (name, namespace) = match input.split_once('/') {
            Some((name, namespace)) => (name, namespace),
            None => (input, DEFAULT_SECRET_NAMESPACE),
        };

        if name.is_empty() || namespace.is_empty() || namespace.contains('/') {
            return Err(Error::InvalidSecretRef(input.to_string()));
        }

        Ok(Self {
            secret_name: name.to_string(),
            secret_namespace: namespace.to_string(),
        })
    }
}

impl TryFrom<String> for SecretRef {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<SecretRef> for String {
    fn from(value: SecretRef) -> Self {
        value.to_string()
    }
}

impl fmt::Display for SecretRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.secret_name, self.secret_namespace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_with_namespace() {
        let secret = SecretRef::parse("azure-secret/azure-blob-csi-system").unwrap();
        assert_eq!(secret.secret_name, "azure-secret");
        assert_eq!(secret.secret_namespace, "azure-blob-csi-system");

        let secret = SecretRef::parse("creds/team-a").unwrap();
        assert_eq!(secret.secret_namespace, "team-a");
    }

    #[test]
    fn test_parse_defaults_namespace() {
        let secret = SecretRef::parse("azure-secret-premium").unwrap();
        assert_eq!(secret.secret_name, "azure-secret-premium");
        assert_eq!(secret.secret_namespace, DEFAULT_SECRET_NAMESPACE);
    }

    #[test]
    fn test_parse_invalid() {
        assert!(SecretRef::parse("").is_err());
        assert!(SecretRef::parse("/ns").is_err());
        assert!(SecretRef::parse("name/").is_err());
        assert!(SecretRef::parse("a/b/c").is_err());
    }

    #[test]
    fn test_display_round_trips() {
        let secret = SecretRef::parse("azure-secret").unwrap();
        assert_eq!(secret.to_string(), "azure-secret/azure-blob-csi-system");
    }
}
