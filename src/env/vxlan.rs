//! VXLAN interface inspection and tunnel port conflict checks

use serde::Deserialize;

use crate::error::{Error, Result};

/// Name of the VXLAN device the CNI agent creates for its overlay
pub const CNI_VXLAN_DEVICE: &str = "cilium_vxlan";

/// An existing VXLAN link and its destination port
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VxlanInterface {
    pub name: String,
    pub port: u16,
}

#[derive(Deserialize)]
struct Link {
    ifname: String,
    #[serde(default)]
    linkinfo: Option<LinkInfo>,
}

#[derive(Deserialize)]
struct LinkInfo {
    #[serde(default)]
    info_kind: Option<String>,
    #[serde(default)]
    info_data: Option<InfoData>,
}

#[derive(Deserialize)]
struct InfoData {
    #[serde(default)]
    port: Option<u16>,
}

/// Parse `ip -d -j link show type vxlan` output
pub fn parse_ip_link_json(output: &str) -> Result<Vec<VxlanInterface>> {
    if output.trim().is_empty() {
        return Ok(Vec::new());
    }
    let links: Vec<Link> = serde_json::from_str(output)?;
    Ok(links
        .into_iter()
        .filter_map(|link| {
            let info = link.linkinfo?;
            if info.info_kind.as_deref() != Some("vxlan") {
                return None;
            }
            let port = info.info_data?.port?;
            Some(VxlanInterface {
                name: link.ifname,
                port,
            })
        })
        .collect())
}

/// Fail if `port` cannot be used as the overlay's VXLAN destination port.
///
/// A foreign interface bound to `port` is a conflict, and so is `own_device`
/// already existing with some other port: the kernel will not re-point it.
pub fn check_vxlan_port(interfaces: &[VxlanInterface], own_device: &str, port: u16) -> Result<()> {
    for iface in interfaces {
        if iface.name == own_device {
            if iface.port != port {
                return Err(Error::VxlanDevicePortMismatch {
                    device: own_device.to_string(),
                    existing: iface.port,
                    requested: port,
                });
            }
        } else if iface.port == port {
            return Err(Error::VxlanPortInUse {
                port,
                interface: iface.name.clone(),
            });
        }
    }
    Ok(())
}
