//! Operator tuning knobs carried as configuration annotations

use crate::config::Annotations;
use crate::error::{Error, Result};

pub const DEVICES_ANNOTATION: &str = "k8sd/v1alpha1/cilium/devices";
pub const DIRECT_ROUTING_DEVICE_ANNOTATION: &str = "k8sd/v1alpha1/cilium/direct-routing-device";
pub const VLAN_BPF_BYPASS_ANNOTATION: &str = "k8sd/v1alpha1/cilium/vlan-bpf-bypass";
pub const TUNNEL_PORT_ANNOTATION: &str = "k8sd/v1alpha1/cilium/tunnel-port";
pub const CNI_EXCLUSIVE_ANNOTATION: &str = "k8sd/v1alpha1/cilium/cni-exclusive";
pub const SCTP_ENABLED_ANNOTATION: &str = "k8sd/v1alpha1/cilium/sctp/enabled";

pub const METRICS_SERVER_IMAGE_REPO_ANNOTATION: &str = "k8sd/v1alpha1/metrics-server/image-repo";
pub const METRICS_SERVER_IMAGE_TAG_ANNOTATION: &str = "k8sd/v1alpha1/metrics-server/image-tag";

/// Default VXLAN destination port of the overlay
pub const DEFAULT_TUNNEL_PORT: u16 = 8472;

const MAX_VLAN_ID: u16 = 4094;

/// Typed view of the network annotations
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InternalConfig {
    pub devices: Option<String>,
    pub direct_routing_device: Option<String>,
    pub vlan_bpf_bypass: Vec<u16>,
    pub tunnel_port: u16,
    pub cni_exclusive: bool,
    pub sctp_enabled: bool,
}

impl Default for InternalConfig {
    fn default() -> Self {
        Self {
            devices: None,
            direct_routing_device: None,
            vlan_bpf_bypass: Vec::new(),
            tunnel_port: DEFAULT_TUNNEL_PORT,
            cni_exclusive: true,
            sctp_enabled: false,
        }
    }
}

impl InternalConfig {
    /// Parse the known keys; everything else is ignored
    pub fn parse(annotations: &Annotations) -> Result<Self> {
        let mut config = Self::default();

        if let Some(devices) = non_empty(annotations.get(DEVICES_ANNOTATION)) {
            config.devices = Some(devices.to_string());
        }
        if let Some(device) = non_empty(annotations.get(DIRECT_ROUTING_DEVICE_ANNOTATION)) {
            config.direct_routing_device = Some(device.to_string());
        }
        if let Some(value) = annotations.get(VLAN_BPF_BYPASS_ANNOTATION) {
            config.vlan_bpf_bypass = parse_vlan_list(value)?;
        }
        if let Some(value) = annotations.get(TUNNEL_PORT_ANNOTATION) {
            config.tunnel_port = parse_port(TUNNEL_PORT_ANNOTATION, value)?;
        }
        if let Some(value) = annotations.get(CNI_EXCLUSIVE_ANNOTATION) {
            config.cni_exclusive = parse_bool(CNI_EXCLUSIVE_ANNOTATION, value)?;
        }
        if let Some(value) = annotations.get(SCTP_ENABLED_ANNOTATION) {
            config.sctp_enabled = parse_bool(SCTP_ENABLED_ANNOTATION, value)?;
        }

        Ok(config)
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn invalid(key: &str, value: &str, reason: impl Into<String>) -> Error {
    Error::InvalidAnnotation {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.into(),
    }
}

/// Accepts the usual spellings: 1/t/true and 0/f/false, any case
fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "t" | "true" => Ok(true),
        "0" | "f" | "false" => Ok(false),
        _ => Err(invalid(key, value, "expected a boolean")),
    }
}

fn parse_port(key: &str, value: &str) -> Result<u16> {
    match value.trim().parse::<u16>() {
        Ok(port) if port > 0 => Ok(port),
        _ => Err(invalid(key, value, "expected a port between 1 and 65535")),
    }
}

/// Comma separated VLAN IDs, optionally wrapped in braces. Duplicates keep
/// their first position.
fn parse_vlan_list(value: &str) -> Result<Vec<u16>> {
    let trimmed = value.trim();
    let inner = trimmed
        .strip_prefix('{')
        .and_then(|rest| rest.strip_suffix('}'))
        .unwrap_or(trimmed)
        .trim();
    if inner.is_empty() {
        return Ok(Vec::new());
    }

    let mut ids = Vec::new();
    for entry in inner.split(',') {
        let id = match entry.trim().parse::<u16>() {
            Ok(id) if id <= MAX_VLAN_ID => id,
            _ => {
                return Err(invalid(
                    VLAN_BPF_BYPASS_ANNOTATION,
                    value,
                    format!("{:?} is not a VLAN ID between 0 and {}", entry.trim(), MAX_VLAN_ID),
                ))
            }
        };
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    Ok(ids)
}
