use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use super::values::ingress_values;
use super::{ensure_active, Feature, FeatureEngine, FeatureError, FeatureStatus, ENABLED_MSG};
use crate::chart::{State, CILIUM};
use crate::config::ClusterConfig;
use crate::error::{Result, StepExt};

impl FeatureEngine {
    /// Converge the ingress controller embedded in the network release
    #[instrument(skip_all, fields(feature = %Feature::Ingress))]
    pub async fn apply_ingress(
        &self,
        cancel: &CancellationToken,
        cfg: &ClusterConfig,
    ) -> std::result::Result<FeatureStatus, FeatureError> {
        let network_enabled = cfg.network.enabled();
        let enabled = cfg.ingress.enabled() && network_enabled;

        let result = self.converge_ingress(cancel, cfg, enabled, network_enabled).await;
        match (enabled, result) {
            (true, Ok(())) => Ok(FeatureStatus::enabled(
                self.images.cilium_version(),
                ENABLED_MSG,
            )),
            (false, Ok(())) => Ok(FeatureStatus::disabled()),
            (true, Err(e)) => Err(FeatureError::deploy(Feature::Ingress, e)),
            (false, Err(e)) => Err(FeatureError::delete(Feature::Ingress, e)),
        }
    }

    async fn converge_ingress(
        &self,
        cancel: &CancellationToken,
        cfg: &ClusterConfig,
        enabled: bool,
        network_enabled: bool,
    ) -> Result<()> {
        ensure_active(cancel)?;
        let changed = self
            .charts
            .apply(
                &CILIUM,
                State::upgrade_only_or_deleted(network_enabled),
                Some(&ingress_values(&cfg.ingress, enabled)),
            )
            .await
            .step(if enabled {
                "failed to enable ingress"
            } else {
                "failed to disable ingress"
            })?;

        if changed && network_enabled {
            self.rollout_restart_cilium(cancel)
                .await
                .step("failed to rollout restart cilium to apply ingress")?;
        }
        info!("Ingress {} (changed: {})", if enabled { "enabled" } else { "disabled" }, changed);
        Ok(())
    }
}
