//! Image references used by the feature charts
//!
//! Built once at process start and shared by reference; nothing here is
//! global or mutated after construction.

use std::path::Path;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::Result;

/// A container image repository and tag
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ImageRef {
    pub repository: String,
    pub tag: String,
}

impl ImageRef {
    pub fn new(repository: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            tag: tag.into(),
        }
    }

    /// Chart-side `image` block. Digests are never pinned through values.
    pub fn to_values(&self) -> serde_json::Value {
        json!({
            "repository": self.repository,
            "tag": self.tag,
            "useDigest": false,
        })
    }
}

impl std::fmt::Display for ImageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.repository, self.tag)
    }
}

/// All images the feature charts are rendered with
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImageRegistry {
    pub cilium_agent: ImageRef,
    pub cilium_operator: ImageRef,
    pub coredns: ImageRef,
    pub metrics_server: ImageRef,
    pub local_storage: ImageRef,
}

impl Default for ImageRegistry {
    fn default() -> Self {
        Self {
            cilium_agent: ImageRef::new("quay.io/cilium/cilium", "v1.16.3"),
            cilium_operator: ImageRef::new("quay.io/cilium/operator-generic", "v1.16.3"),
            coredns: ImageRef::new("registry.k8s.io/coredns/coredns", "v1.11.3"),
            metrics_server: ImageRef::new("registry.k8s.io/metrics-server/metrics-server", "v0.7.2"),
            local_storage: ImageRef::new("ghcr.io/openebs/rawfile-localpv", "0.8.0"),
        }
    }
}

impl ImageRegistry {
    /// Load a registry override document; omitted entries are not allowed so
    /// a partial file cannot silently mix versions.
    pub fn load(path: &Path) -> Result<Self> {
        let document = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&document)?)
    }

    /// Version reported for every feature layered on the CNI release
    pub fn cilium_version(&self) -> &str {
        &self.cilium_agent.tag
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_values_block() {
        let image = ImageRef::new("quay.io/cilium/cilium", "v1.16.3");
        assert_eq!(
            image.to_values(),
            json!({"repository": "quay.io/cilium/cilium", "tag": "v1.16.3", "useDigest": false})
        );
        assert_eq!(image.to_string(), "quay.io/cilium/cilium:v1.16.3");
    }

    #[test]
    fn test_load_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("images.yaml");
        let mut registry = ImageRegistry::default();
        registry.cilium_agent.tag = "v1.17.0".to_string();
        std::fs::write(&path, serde_yaml::to_string(&registry).unwrap()).unwrap();

        let loaded = ImageRegistry::load(&path).unwrap();
        assert_eq!(loaded.cilium_version(), "v1.17.0");
    }
}
