//! Per-feature configuration types
//!
//! Every feature carries a tri-state `enabled` flag. An unset flag resolves to
//! the feature's default through the `enabled()` accessor, so callers never
//! have to interpret `None` themselves.
//!
//! - [`NetworkConfig`] - pod network (CNI) and its pod CIDR
//! - [`GatewayConfig`], [`IngressConfig`] - overlays on the network release
//! - [`LoadBalancerConfig`] - L2/BGP announcements and address pools
//! - [`LocalStorageConfig`], [`MetricsServerConfig`], [`DnsConfig`] - standalone releases

use std::net::IpAddr;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default pod CIDR when none is configured
pub const DEFAULT_POD_CIDR: &str = "10.1.0.0/16";

/// Default host path backing local persistent volumes
pub const DEFAULT_LOCAL_STORAGE_PATH: &str = "/var/lib/cluster-features/local-storage";

/// Default cluster DNS domain
pub const DEFAULT_CLUSTER_DOMAIN: &str = "cluster.local";

/// Default kube-apiserver secure port
pub const DEFAULT_SECURE_PORT: u16 = 6443;

/// Pod network (CNI) configuration
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NetworkConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    /// Comma-joined list of one or two CIDRs (IPv4 and/or IPv6)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_cidr: Option<String>,
}

impl NetworkConfig {
    pub fn enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }

    pub fn pod_cidr(&self) -> &str {
        self.pod_cidr.as_deref().unwrap_or(DEFAULT_POD_CIDR)
    }
}

/// Gateway API configuration
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
}

impl GatewayConfig {
    pub fn enabled(&self) -> bool {
        self.enabled.unwrap_or(false)
    }
}

/// Ingress controller configuration
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IngressConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    /// Name of the TLS secret (in kube-system) served when an Ingress has none
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_tls_secret: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_proxy_protocol: Option<bool>,
}

impl IngressConfig {
    pub fn enabled(&self) -> bool {
        self.enabled.unwrap_or(false)
    }

    pub fn default_tls_secret(&self) -> &str {
        self.default_tls_secret.as_deref().unwrap_or_default()
    }

    pub fn enable_proxy_protocol(&self) -> bool {
        self.enable_proxy_protocol.unwrap_or(false)
    }
}

/// An explicit, inclusive address range for the load-balancer pool
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IpRange {
    pub start: String,
    pub stop: String,
}

/// Load-balancer configuration
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancerConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cidrs: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ip_ranges: Vec<IpRange>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub l2_mode: Option<bool>,

    /// Interface name patterns used for L2 announcements
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub l2_interfaces: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bgp_mode: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bgp_local_asn: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bgp_peer_address: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bgp_peer_asn: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bgp_peer_port: Option<u16>,
}

impl LoadBalancerConfig {
    pub fn enabled(&self) -> bool {
        self.enabled.unwrap_or(false)
    }

    pub fn l2_mode(&self) -> bool {
        self.l2_mode.unwrap_or(false)
    }

    pub fn bgp_mode(&self) -> bool {
        self.bgp_mode.unwrap_or(false)
    }

    pub fn bgp_local_asn(&self) -> u32 {
        self.bgp_local_asn.unwrap_or_default()
    }

    pub fn bgp_peer_address(&self) -> &str {
        self.bgp_peer_address.as_deref().unwrap_or_default()
    }

    /// Trimmed BGP peer address, either a plain IP or a CIDR such as
    /// `10.0.0.1/32`. An unset address is returned empty.
    pub fn checked_bgp_peer_address(&self) -> Result<&str> {
        let address = self.bgp_peer_address().trim();
        if address.is_empty()
            || address.parse::<IpAddr>().is_ok()
            || address.parse::<ipnet::IpNet>().is_ok()
        {
            Ok(address)
        } else {
            Err(Error::InvalidIp(address.to_string()))
        }
    }

    pub fn bgp_peer_asn(&self) -> u32 {
        self.bgp_peer_asn.unwrap_or_default()
    }

    pub fn bgp_peer_port(&self) -> u16 {
        self.bgp_peer_port.unwrap_or_default()
    }
}

/// Persistent volume reclaim policy for the local storage class
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ReclaimPolicy {
    Retain,
    Recycle,
    #[default]
    Delete,
}

impl std::fmt::Display for ReclaimPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReclaimPolicy::Retain => write!(f, "Retain"),
            ReclaimPolicy::Recycle => write!(f, "Recycle"),
            ReclaimPolicy::Delete => write!(f, "Delete"),
        }
    }
}

/// Local persistent storage configuration
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LocalStorageConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reclaim_policy: Option<ReclaimPolicy>,

    /// Mark the storage class as the cluster default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<bool>,
}

impl LocalStorageConfig {
    pub fn enabled(&self) -> bool {
        self.enabled.unwrap_or(false)
    }

    pub fn local_path(&self) -> &str {
        self.local_path
            .as_deref()
            .unwrap_or(DEFAULT_LOCAL_STORAGE_PATH)
    }

    pub fn reclaim_policy(&self) -> ReclaimPolicy {
        self.reclaim_policy.clone().unwrap_or_default()
    }

    pub fn set_default(&self) -> bool {
        self.default.unwrap_or(true)
    }
}

/// Metrics-server configuration
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MetricsServerConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
}

impl MetricsServerConfig {
    pub fn enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }
}

/// Cluster DNS configuration
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DnsConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_domain: Option<String>,

    /// Cluster IP pinned on the DNS Service; empty lets the cluster allocate one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_ip: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub upstream_nameservers: Vec<String>,
}

impl DnsConfig {
    pub fn enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }

    pub fn cluster_domain(&self) -> &str {
        self.cluster_domain
            .as_deref()
            .unwrap_or(DEFAULT_CLUSTER_DOMAIN)
    }

    pub fn service_ip(&self) -> &str {
        self.service_ip.as_deref().unwrap_or_default()
    }

    /// Upstream resolvers, falling back to the host's resolv.conf
    pub fn upstream_nameservers(&self) -> Vec<String> {
        if self.upstream_nameservers.is_empty() {
            vec!["/etc/resolv.conf".to_string()]
        } else {
            self.upstream_nameservers.clone()
        }
    }
}

/// kube-apiserver facts the engine needs
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApiServerConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secure_port: Option<u16>,
}

impl ApiServerConfig {
    pub fn secure_port(&self) -> u16 {
        self.secure_port.unwrap_or(DEFAULT_SECURE_PORT)
    }
}
