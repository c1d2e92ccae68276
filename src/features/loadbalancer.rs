use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use super::values::{load_balancer_base_values, load_balancer_cr_values};
use super::{ensure_active, Feature, FeatureEngine, FeatureError, FeatureStatus};
use crate::chart::{State, CILIUM, CILIUM_LOADBALANCER};
use crate::config::{ClusterConfig, LoadBalancerConfig};
use crate::error::{Result, StepExt};

/// API group/version serving the load-balancer custom resources
pub const CILIUM_CRD_GROUP_VERSION: &str = "cilium.io/v2alpha1";

const L2_ANNOUNCEMENT_POLICIES: &str = "ciliuml2announcementpolicies";
const LOAD_BALANCER_IP_POOLS: &str = "ciliumloadbalancerippools";
const BGP_PEERING_POLICIES: &str = "ciliumbgppeeringpolicies";

/// Resources that must be registered before the CR release can apply
pub fn required_crds(cfg: &LoadBalancerConfig) -> Vec<&'static str> {
    let mut required = vec![L2_ANNOUNCEMENT_POLICIES, LOAD_BALANCER_IP_POOLS];
    if cfg.bgp_mode() {
        required.push(BGP_PEERING_POLICIES);
    }
    required
}

/// Success message naming the announcement mode; BGP is checked first
pub fn enabled_message(cfg: &LoadBalancerConfig) -> &'static str {
    if cfg.bgp_mode() {
        "enabled, BGP mode"
    } else if cfg.l2_mode() {
        "enabled, L2 mode"
    } else {
        "enabled, Unknown mode"
    }
}

impl FeatureEngine {
    /// Converge load-balancer support: announcement flags on the network
    /// release plus the pool and policy CRs in their own release
    #[instrument(skip_all, fields(feature = %Feature::LoadBalancer))]
    pub async fn apply_load_balancer(
        &self,
        cancel: &CancellationToken,
        cfg: &ClusterConfig,
    ) -> std::result::Result<FeatureStatus, FeatureError> {
        let network_enabled = cfg.network.enabled();
        let lb = &cfg.load_balancer;

        if lb.enabled() && network_enabled {
            self.enable_load_balancer(cancel, lb)
                .await
                .map_err(|e| FeatureError::deploy(Feature::LoadBalancer, e))?;
            Ok(FeatureStatus::enabled(
                self.images.cilium_version(),
                enabled_message(lb),
            ))
        } else {
            self.disable_load_balancer(cancel, lb, network_enabled)
                .await
                .map_err(|e| FeatureError::delete(Feature::LoadBalancer, e))?;
            Ok(FeatureStatus::disabled())
        }
    }

    async fn enable_load_balancer(
        &self,
        cancel: &CancellationToken,
        lb: &LoadBalancerConfig,
    ) -> Result<()> {
        // Reject bad pools before touching either release
        let cr_values =
            load_balancer_cr_values(lb).step("invalid load balancer configuration")?;
        ensure_active(cancel)?;

        let changed = self
            .charts
            .apply(
                &CILIUM,
                State::upgrade_only_or_deleted(true),
                Some(&load_balancer_base_values(lb, true)),
            )
            .await
            .step("failed to update cilium configuration for load balancer")?;

        self.wait_for_crds(cancel, CILIUM_CRD_GROUP_VERSION, &required_crds(lb))
            .await
            .step("failed to wait for required CRDs to be available")?;

        self.charts
            .apply(&CILIUM_LOADBALANCER, State::Present, Some(&cr_values))
            .await
            .step("failed to apply load balancer configuration")?;

        if changed {
            self.rollout_restart_cilium(cancel)
                .await
                .step("failed to rollout restart cilium to apply load balancer configuration")?;
        }
        info!("Load balancer {} (changed: {})", enabled_message(lb), changed);
        Ok(())
    }

    async fn disable_load_balancer(
        &self,
        cancel: &CancellationToken,
        lb: &LoadBalancerConfig,
        network_enabled: bool,
    ) -> Result<()> {
        ensure_active(cancel)?;
        self.charts
            .apply(&CILIUM_LOADBALANCER, State::Deleted, None)
            .await
            .step("failed to uninstall load balancer configuration")?;

        let changed = self
            .charts
            .apply(
                &CILIUM,
                State::upgrade_only_or_deleted(network_enabled),
                Some(&load_balancer_base_values(lb, false)),
            )
            .await
            .step("failed to disable load balancer on cilium")?;

        if changed && network_enabled {
            self.rollout_restart_cilium(cancel)
                .await
                .step("failed to rollout restart cilium to remove load balancer configuration")?;
        }
        info!("Load balancer disabled (changed: {})", changed);
        Ok(())
    }
}
