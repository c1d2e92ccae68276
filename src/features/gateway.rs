use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use super::values::gateway_values;
use super::{ensure_active, Feature, FeatureEngine, FeatureError, FeatureStatus, ENABLED_MSG};
use crate::chart::{State, CILIUM, CILIUM_GATEWAY_CLASS, GATEWAY_API_CRDS};
use crate::config::ClusterConfig;
use crate::error::{Result, StepExt};

impl FeatureEngine {
    /// Converge Gateway API support.
    ///
    /// Installs the Gateway API CRDs and GatewayClass and switches the
    /// network release's gateway controller on. Only effective while the
    /// network feature is enabled.
    #[instrument(skip_all, fields(feature = %Feature::Gateway))]
    pub async fn apply_gateway(
        &self,
        cancel: &CancellationToken,
        cfg: &ClusterConfig,
    ) -> std::result::Result<FeatureStatus, FeatureError> {
        let network_enabled = cfg.network.enabled();

        if cfg.gateway.enabled() && network_enabled {
            self.enable_gateway(cancel)
                .await
                .map_err(|e| FeatureError::deploy(Feature::Gateway, e))?;
            Ok(FeatureStatus::enabled(
                self.images.cilium_version(),
                ENABLED_MSG,
            ))
        } else {
            self.disable_gateway(cancel, network_enabled)
                .await
                .map_err(|e| FeatureError::delete(Feature::Gateway, e))?;
            Ok(FeatureStatus::disabled())
        }
    }

    async fn enable_gateway(&self, cancel: &CancellationToken) -> Result<()> {
        ensure_active(cancel)?;
        self.charts
            .apply(&GATEWAY_API_CRDS, State::Present, None)
            .await
            .step("failed to install Gateway API CRDs")?;

        self.charts
            .apply(&CILIUM_GATEWAY_CLASS, State::Present, None)
            .await
            .step("failed to install Gateway API GatewayClass")?;

        let changed = self
            .charts
            .apply(
                &CILIUM,
                State::upgrade_only_or_deleted(true),
                Some(&gateway_values(true)),
            )
            .await
            .step("failed to upgrade Gateway API cilium configuration")?;

        if changed {
            self.rollout_restart_cilium(cancel)
                .await
                .step("failed to rollout restart cilium to apply Gateway API")?;
        }
        info!("Gateway enabled (changed: {})", changed);
        Ok(())
    }

    async fn disable_gateway(&self, cancel: &CancellationToken, network_enabled: bool) -> Result<()> {
        ensure_active(cancel)?;
        self.charts
            .apply(&CILIUM_GATEWAY_CLASS, State::Deleted, None)
            .await
            .step("failed to delete Gateway API GatewayClass")?;

        let changed = self
            .charts
            .apply(
                &CILIUM,
                State::upgrade_only_or_deleted(network_enabled),
                Some(&gateway_values(false)),
            )
            .await
            .step("failed to upgrade Gateway API cilium configuration")?;

        // The CRDs must outlive the controller that watches them
        self.charts
            .apply(&GATEWAY_API_CRDS, State::Deleted, None)
            .await
            .step("failed to delete Gateway API CRDs")?;

        if changed && network_enabled {
            self.rollout_restart_cilium(cancel)
                .await
                .step("failed to rollout restart cilium to remove Gateway API")?;
        }
        info!("Gateway disabled (changed: {})", changed);
        Ok(())
    }
}
