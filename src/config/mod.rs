//! Desired cluster configuration consumed by the feature engine
//!
//! The engine only reads this document. It is owned by whatever stores the
//! cluster's desired state and arrives fully resolved on each change event.

pub mod types;

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::Path;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub use types::*;

/// Operator-set tuning knobs that are not part of the primary schema
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct Annotations(BTreeMap<String, String>);

impl Annotations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Annotations {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// The subset of cluster configuration that drives feature reconciliation
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterConfig {
    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub ingress: IngressConfig,

    #[serde(default)]
    pub load_balancer: LoadBalancerConfig,

    #[serde(default)]
    pub local_storage: LocalStorageConfig,

    #[serde(default)]
    pub metrics_server: MetricsServerConfig,

    #[serde(default)]
    pub dns: DnsConfig,

    #[serde(default)]
    pub api_server: ApiServerConfig,

    #[serde(default, skip_serializing_if = "Annotations::is_empty")]
    pub annotations: Annotations,
}

impl ClusterConfig {
    /// Parse a configuration document. JSON is a subset of YAML, so both are accepted.
    pub fn from_yaml(document: &str) -> Result<Self> {
        let config: ClusterConfig = serde_yaml::from_str(document)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a configuration document from disk
    pub fn load(path: &Path) -> Result<Self> {
        let document = std::fs::read_to_string(path)?;
        Self::from_yaml(&document)
    }

    /// Structural validation that does not depend on the host environment.
    ///
    /// CIDR and address checks for enabled features happen here so a bad
    /// document is rejected before any reconcile starts; the reconcilers
    /// still re-check what they consume.
    pub fn validate(&self) -> Result<()> {
        if self.load_balancer.enabled() {
            for cidr in &self.load_balancer.cidrs {
                cidr.trim()
                    .parse::<ipnet::IpNet>()
                    .map_err(|_| Error::InvalidCidr(cidr.clone()))?;
            }
            for range in &self.load_balancer.ip_ranges {
                for addr in [&range.start, &range.stop] {
                    addr.trim()
                        .parse::<IpAddr>()
                        .map_err(|_| Error::InvalidIp(addr.clone()))?;
                }
            }
            if self.load_balancer.bgp_mode() {
                self.load_balancer.checked_bgp_peer_address()?;
            }
        }

        if self.dns.enabled() && !self.dns.service_ip().is_empty() {
            let ip = self.dns.service_ip();
            ip.parse::<IpAddr>()
                .map_err(|_| Error::InvalidIp(ip.to_string()))?;
        }

        if self.local_storage.enabled() && !self.local_storage.local_path().starts_with('/') {
            return Err(Error::ValidationError(format!(
                "localStorage.localPath must be absolute, got {:?}",
                self.local_storage.local_path()
            )));
        }

        Ok(())
    }
}
