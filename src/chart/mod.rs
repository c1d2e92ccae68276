//! Chart references, desired lifecycle states, and the chart executor seam
//!
//! The executor itself (install/upgrade/delete of a release) is an external
//! collaborator; the engine only ever talks to it through [`ChartExecutor`].

pub mod helm;
pub mod registry;
mod values;

use async_trait::async_trait;

use crate::error::Result;

pub use helm::HelmCli;
pub use registry::{ImageRef, ImageRegistry};
pub use values::Values;

/// Namespace every feature release is installed into
pub const KUBE_SYSTEM: &str = "kube-system";

/// A packaged deployment unit and the release it is installed as
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Chart {
    /// Chart directory name under the charts root
    pub name: &'static str,
    pub namespace: &'static str,
    /// Release name
    pub install_name: &'static str,
}

/// The pod network (CNI) chart. Gateway, ingress and load-balancer layer onto this release.
pub const CILIUM: Chart = Chart {
    name: "cilium",
    namespace: KUBE_SYSTEM,
    install_name: "cilium",
};

/// Gateway API custom resource definitions
pub const GATEWAY_API_CRDS: Chart = Chart {
    name: "gateway-api",
    namespace: KUBE_SYSTEM,
    install_name: "gateway-api",
};

/// GatewayClass served by the CNI's gateway controller
pub const CILIUM_GATEWAY_CLASS: Chart = Chart {
    name: "cilium-gateway-class",
    namespace: KUBE_SYSTEM,
    install_name: "cilium-gateway-class",
};

/// Load-balancer IP pools, L2 announcement and BGP peering policies
pub const CILIUM_LOADBALANCER: Chart = Chart {
    name: "cilium-loadbalancer",
    namespace: KUBE_SYSTEM,
    install_name: "cilium-loadbalancer",
};

pub const LOCAL_STORAGE: Chart = Chart {
    name: "rawfile-csi",
    namespace: KUBE_SYSTEM,
    install_name: "local-storage",
};

pub const METRICS_SERVER: Chart = Chart {
    name: "metrics-server",
    namespace: KUBE_SYSTEM,
    install_name: "metrics-server",
};

pub const COREDNS: Chart = Chart {
    name: "coredns",
    namespace: KUBE_SYSTEM,
    install_name: "coredns",
};

impl std::fmt::Display for Chart {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.install_name)
    }
}

/// Desired lifecycle state of a release
///
/// None of these states fail because the release is already where it should
/// be: deleting an absent release and upgrading an absent release are both
/// no-ops that report `changed == false`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    /// Install or upgrade, creating the release if absent
    Present,
    /// Uninstall; no-op if absent
    Deleted,
    /// Upgrade only if the release already exists; never installs
    UpgradeOnly,
}

impl State {
    /// `UpgradeOnly` while `cond` holds, `Deleted` otherwise
    pub fn upgrade_only_or_deleted(cond: bool) -> Self {
        if cond {
            State::UpgradeOnly
        } else {
            State::Deleted
        }
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            State::Present => write!(f, "present"),
            State::Deleted => write!(f, "deleted"),
            State::UpgradeOnly => write!(f, "upgrade-only"),
        }
    }
}

/// Installs, upgrades and deletes chart releases
#[async_trait]
pub trait ChartExecutor: Send + Sync {
    /// Converge `chart` to `state` using `values`.
    ///
    /// Returns whether the release's rendered manifest differs from what was
    /// running before the call.
    async fn apply(&self, chart: &Chart, state: State, values: Option<&Values>) -> Result<bool>;
}
