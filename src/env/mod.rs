//! Environment probes
//!
//! The parsers in the submodules are pure and take file or command output as
//! input. [`HostEnvironment`] feeds them from the running host; reconcilers
//! only see the [`Environment`] trait so tests can substitute fixed facts.

pub mod address;
pub mod cidr;
pub mod mounts;
pub mod vxlan;

use std::net::IpAddr;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::error::{Error, Result};

pub use address::localhost_address;
pub use cidr::{split_cidrs, SplitCidrs};
pub use mounts::MountPropagation;
pub use vxlan::{check_vxlan_port, VxlanInterface, CNI_VXLAN_DEVICE};

/// Facts about the host the engine runs on
#[async_trait]
pub trait Environment: Send + Sync {
    /// Whether the daemon runs under strict confinement
    fn strict(&self) -> bool;

    /// Host mount point of a filesystem type such as `bpf` or `cgroup2`
    async fn mount_path(&self, fs_type: &str) -> Result<String>;

    /// Propagation of the mount containing `path`
    async fn mount_propagation(&self, path: &str) -> Result<MountPropagation>;

    /// Whether the host is itself an LXD container
    async fn on_lxd(&self) -> bool;

    /// Existing VXLAN links
    async fn vxlan_interfaces(&self) -> Result<Vec<VxlanInterface>>;

    /// CIDR of the network holding the IPv6 default route
    async fn default_route_ipv6_cidr(&self) -> Result<String>;

    /// Address other nodes reach this node on
    async fn node_address(&self) -> Result<IpAddr>;
}

/// [`Environment`] backed by procfs and the `ip` tool
#[derive(Clone, Debug)]
pub struct HostEnvironment {
    strict: bool,
    node_address: Option<IpAddr>,
    proc_dir: PathBuf,
    lxd_socket: PathBuf,
    ip_binary: PathBuf,
}

impl HostEnvironment {
    pub fn new(strict: bool) -> Self {
        Self {
            strict,
            node_address: None,
            proc_dir: PathBuf::from("/proc"),
            lxd_socket: PathBuf::from("/dev/lxd/sock"),
            ip_binary: PathBuf::from("ip"),
        }
    }

    /// Pin the node address instead of discovering it
    pub fn with_node_address(mut self, address: Option<IpAddr>) -> Self {
        self.node_address = address;
        self
    }

    /// Read procfs from another root
    pub fn with_proc_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.proc_dir = dir.into();
        self
    }

    pub fn with_lxd_socket(mut self, path: impl Into<PathBuf>) -> Self {
        self.lxd_socket = path.into();
        self
    }

    async fn read_proc(&self, relative: &str) -> Result<String> {
        Ok(tokio::fs::read_to_string(self.proc_dir.join(relative)).await?)
    }
}

#[async_trait]
impl Environment for HostEnvironment {
    fn strict(&self) -> bool {
        self.strict
    }

    async fn mount_path(&self, fs_type: &str) -> Result<String> {
        let table = self.read_proc("mounts").await?;
        mounts::find_mount_path(&table, fs_type)
            .ok_or_else(|| Error::Environment(format!("no {} filesystem is mounted", fs_type)))
    }

    async fn mount_propagation(&self, path: &str) -> Result<MountPropagation> {
        let table = self.read_proc("self/mountinfo").await?;
        mounts::find_mount_propagation(&table, path)
            .ok_or_else(|| Error::Environment(format!("no mount found for {}", path)))
    }

    async fn on_lxd(&self) -> bool {
        tokio::fs::try_exists(&self.lxd_socket)
            .await
            .unwrap_or(false)
    }

    async fn vxlan_interfaces(&self) -> Result<Vec<VxlanInterface>> {
        let output = Command::new(&self.ip_binary)
            .args(["-d", "-j", "link", "show", "type", "vxlan"])
            .output()
            .await?;
        if !output.status.success() {
            return Err(Error::Environment(format!(
                "failed to list VXLAN interfaces: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        vxlan::parse_ip_link_json(&String::from_utf8_lossy(&output.stdout))
    }

    async fn default_route_ipv6_cidr(&self) -> Result<String> {
        let routes = self.read_proc("net/ipv6_route").await?;
        let ifname = address::default_route_ipv6_interface(&routes)
            .ok_or_else(|| Error::Environment("no IPv6 default route found".to_string()))?;
        let addresses = self.read_proc("net/if_inet6").await?;
        let network = address::global_ipv6_network(&addresses, &ifname).ok_or_else(|| {
            Error::Environment(format!("no global IPv6 address on interface {}", ifname))
        })?;
        debug!("IPv6 default route via {} in {}", ifname, network);
        Ok(network.to_string())
    }

    async fn node_address(&self) -> Result<IpAddr> {
        if let Some(address) = self.node_address {
            return Ok(address);
        }
        // Connecting a UDP socket sends nothing but selects the outbound source address
        for target in ["192.0.2.1:80", "[2001:db8::1]:80"] {
            let bind = if target.starts_with('[') {
                "[::]:0"
            } else {
                "0.0.0.0:0"
            };
            let Ok(socket) = tokio::net::UdpSocket::bind(bind).await else {
                continue;
            };
            if socket.connect(target).await.is_ok() {
                if let Ok(local) = socket.local_addr() {
                    return Ok(local.ip());
                }
            }
        }
        Err(Error::Environment(
            "could not determine the node address".to_string(),
        ))
    }
}
