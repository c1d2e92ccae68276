use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use super::internal::InternalConfig;
use super::values::{compose_base_overlays, network_values, NetworkFacts, StrictMounts};
use super::{ensure_active, Feature, FeatureEngine, FeatureError, FeatureStatus, ENABLED_MSG};
use crate::chart::{State, Values, CILIUM};
use crate::config::ClusterConfig;
use crate::env::{check_vxlan_port, localhost_address, split_cidrs, MountPropagation, CNI_VXLAN_DEVICE};
use crate::error::{Error, Result, StepExt};

impl FeatureEngine {
    /// Converge the pod network release.
    ///
    /// Disabling deletes the release. Enabling probes the host, builds values
    /// and installs or upgrades it; probe failures abort before the release
    /// is touched.
    #[instrument(skip_all, fields(feature = %Feature::Network, enabled = cfg.network.enabled()))]
    pub async fn apply_network(
        &self,
        cancel: &CancellationToken,
        cfg: &ClusterConfig,
    ) -> std::result::Result<FeatureStatus, FeatureError> {
        if !cfg.network.enabled() {
            return match self.disable_network(cancel).await {
                Ok(()) => Ok(FeatureStatus::disabled()),
                // Disable failures are reported with the deploy template
                Err(e) => Err(FeatureError::deploy(Feature::Network, e)),
            };
        }

        self.enable_network(cancel, cfg)
            .await
            .map_err(|e| FeatureError::deploy(Feature::Network, e))?;
        Ok(FeatureStatus::enabled(
            self.images.cilium_version(),
            ENABLED_MSG,
        ))
    }

    async fn disable_network(&self, cancel: &CancellationToken) -> Result<()> {
        ensure_active(cancel)?;
        self.charts
            .apply(&CILIUM, State::Deleted, None)
            .await
            .step("failed to uninstall network")?;
        info!("Network disabled");
        Ok(())
    }

    async fn enable_network(&self, cancel: &CancellationToken, cfg: &ClusterConfig) -> Result<()> {
        let values = self.compute_network_values(cfg).await?;
        ensure_active(cancel)?;
        self.charts
            .apply(&CILIUM, State::Present, Some(&values))
            .await
            .step("failed to enable network")?;
        info!("Network enabled");
        Ok(())
    }

    /// Full values of the network release, overlays included
    pub async fn compute_network_values(&self, cfg: &ClusterConfig) -> Result<Values> {
        let internal = InternalConfig::parse(&cfg.annotations).step("failed to parse annotations")?;
        let cidrs = split_cidrs(cfg.network.pod_cidr()).step("invalid pod CIDR")?;

        let interfaces = self
            .env
            .vxlan_interfaces()
            .await
            .step("failed to list VXLAN interfaces")?;
        check_vxlan_port(&interfaces, CNI_VXLAN_DEVICE, internal.tunnel_port)
            .step("failed to check VXLAN port")?;

        let strict_mounts = if self.env.strict() {
            Some(StrictMounts {
                bpf_root: self
                    .env
                    .mount_path("bpf")
                    .await
                    .step("failed to get bpf mount path")?,
                cgroup_root: self
                    .env
                    .mount_path("cgroup2")
                    .await
                    .step("failed to get cgroup2 mount path")?,
            })
        } else {
            self.ensure_sys_shared().await?;
            None
        };

        let ipv6_native_routing_cidr = if cidrs.is_ipv6_only() {
            Some(
                self.env
                    .default_route_ipv6_cidr()
                    .await
                    .step("failed to get default route CIDR")?,
            )
        } else {
            None
        };

        let node_address = self
            .env
            .node_address()
            .await
            .step("failed to determine node address")?;

        let facts = NetworkFacts {
            cidrs,
            strict_mounts,
            ipv6_native_routing_cidr,
            localhost: localhost_address(node_address),
        };
        debug!(?facts, "Probed network environment");

        let mut values = network_values(&self.images, cfg, &internal, &facts);
        values.merge(compose_base_overlays(cfg));
        Ok(values)
    }

    /// The agent needs /sys shared so its BPF mounts propagate to the host
    async fn ensure_sys_shared(&self) -> Result<()> {
        let propagation = self
            .env
            .mount_propagation("/sys")
            .await
            .step("failed to get mount propagation type for /sys")?;
        if propagation != MountPropagation::Private {
            return Ok(());
        }

        if self.env.on_lxd().await {
            Err(Error::Environment(
                "/sys is not a shared mount on the LXD container, this might be resolved by updating LXD on the host to version 5.0.2 or newer".to_string(),
            ))
        } else {
            Err(Error::Environment("/sys is not a shared mount".to_string()))
        }
    }
}
