//! Storage Tier Catalog
//!
//! The catalog is the ordered list of storage tiers ("instances") every
//! profile is entitled to. It is read once at startup from a stream of JSON
//! objects (one object per tier, not wrapped in an array) and is immutable
//! for the lifetime of the process.

pub mod capacity;
pub mod secret_ref;

pub use capacity::StorageCapacity;
pub use secret_ref::{SecretRef, DEFAULT_SECRET_NAMESPACE};

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info};

/// Tiers provisioned when no catalog file is given
pub const DEFAULT_CATALOG: &str = r#"
{"name": "standard", "classification": "unclassified", "secret": "azure-secret/azure-blob-csi-system", "capacity": "100Gi", "readOnly": false}
{"name": "premium", "classification": "unclassified", "secret": "azure-secret-premium/azure-blob-csi-system", "capacity": "100Gi", "readOnly": false}
{"name": "standard-ro", "classification": "protected-b", "secret": "azure-secret/azure-blob-csi-system", "capacity": "100Gi", "readOnly": true}
{"name": "premium-ro", "classification": "protected-b", "secret": "azure-secret-premium/azure-blob-csi-system", "capacity": "100Gi", "readOnly": true}
"#;

// =============================================================================
// Instance
// =============================================================================

/// A named storage tier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    /// Tier name, unique within the catalog
    pub name: String,
    /// Data classification applied as a label
    pub classification: String,
    /// Secret holding the storage account credentials
    pub secret: SecretRef,
    /// Declared size of the tier
    pub capacity: StorageCapacity,
    /// Mount read-only and never create containers
    #[serde(default)]
    pub read_only: bool,
}

// =============================================================================
// Catalog
// =============================================================================

/// Ordered, validated set of instances
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    instances: Vec<Instance>,
}

impl Catalog {
    /// Parse a stream of JSON instance objects
    pub fn parse(input: &str) -> Result<Self> {
        let stream = serde_json::Deserializer::from_str(input).into_iter::<Instance>();

        let mut instances = Vec::new();
        for (index, entry) in stream.enumerate() {
            let instance = entry.map_err(|e| Error::CatalogParse {
                index,
                reason: e.to_string(),
            })?;
            debug!(
                instance = %instance.name,
                classification = %instance.classification,
                secret = %instance.secret,
                read_only = instance.read_only,
                "Loaded catalog entry"
            );
            instances.push(instance);
        }

        Self::from_instances(instances)
    }

    /// Build a catalog from already-decoded instances
    pub fn from_instances(instances: Vec<Instance>) -> Result<Self> {
        let mut seen = HashSet::new();
        for (index, instance) in instances.iter().enumerate() {
            if instance.name.is_empty() {
                return Err(Error::CatalogParse {
                    index,
                    reason: "instance name is empty".into(),
                });
            }
            if !seen.insert(instance.name.as_str()) {
                return Err(Error::DuplicateInstance {
                    name: instance.name.clone(),
                });
            }
        }

        Ok(Self { instances })
    }

    /// Read and parse a catalog file
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let catalog = Self::parse(&contents)?;
        info!(
            path = %path.display(),
            instances = catalog.len(),
            "Loaded storage catalog"
        );
        Ok(catalog)
    }

    /// The built-in four tier catalog
    pub fn builtin() -> Result<Self> {
        Self::parse(DEFAULT_CATALOG)
    }

    /// Instances in catalog order
    pub fn instances(&self) -> &[Instance] {
        &self.instances
    }

    /// Look up an instance by name
    pub fn get(&self, name: &str) -> Option<&Instance> {
        self.instances.iter().find(|i| i.name == name)
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::io::Write;

    #[test]
    fn test_builtin_catalog() {
        let catalog = Catalog::builtin().unwrap();
        let names: Vec<_> = catalog.instances().iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["standard", "premium", "standard-ro", "premium-ro"]);

        let premium_ro = catalog.get("premium-ro").unwrap();
        assert!(premium_ro.read_only);
        assert_eq!(premium_ro.classification, "protected-b");
        assert_eq!(premium_ro.secret.secret_name, "azure-secret-premium");
        assert_eq!(premium_ro.capacity.quantity(), "100Gi");
    }

    #[test]
    fn test_parse_bare_secret_and_missing_read_only() {
        let catalog = Catalog::parse(
            r#"{"name": "scratch", "classification": "unclassified", "secret": "scratch-secret", "capacity": "10Gi"}"#,
        )
        .unwrap();

        let scratch = &catalog.instances()[0];
        assert!(!scratch.read_only);
        assert_eq!(scratch.secret.secret_namespace, DEFAULT_SECRET_NAMESPACE);
    }

    #[test]
    fn test_malformed_entry_reports_index() {
        let input = r#"
            {"name": "standard", "classification": "unclassified", "secret": "s", "capacity": "1Gi", "readOnly": false}
            {"name": "broken", "classification": "unclassified", "capacity": "1Gi"}
        "#;
        assert_matches!(Catalog::parse(input), Err(Error::CatalogParse { index: 1, .. }));

        let bad_capacity = r#"{"name": "x", "classification": "c", "secret": "s", "capacity": "lots"}"#;
        assert_matches!(Catalog::parse(bad_capacity), Err(Error::CatalogParse { index: 0, .. }));

        let bad_secret = r#"{"name": "x", "classification": "c", "secret": "a/b/c", "capacity": "1Gi"}"#;
        assert_matches!(Catalog::parse(bad_secret), Err(Error::CatalogParse { index: 0, .. }));
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let input = r#"
            {"name": "standard", "classification": "a", "secret": "s", "capacity": "1Gi"}
            {"name": "standard", "classification": "b", "secret": "s", "capacity": "1Gi"}
        "#;
        assert_matches!(
            Catalog::parse(input),
            Err(Error::DuplicateInstance { name }) if name == "standard"
        );
    }

    #[test]
    fn test_empty_input_is_empty_catalog() {
        let catalog = Catalog::parse("  \n ").unwrap();
        assert!(catalog.is_empty());
    }

    #[test]
    fn test_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(DEFAULT_CATALOG.as_bytes()).unwrap();

        let catalog = Catalog::from_path(file.path()).unwrap();
        assert_eq!(catalog.len(), 4);

        assert_matches!(
            Catalog::from_path(file.path().with_extension("missing")),
            Err(Error::Io(_))
        );
    }
}
