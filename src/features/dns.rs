use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use super::values::dns_values;
use super::{ensure_active, Feature, FeatureEngine, FeatureError, FeatureStatus, ENABLED_MSG};
use crate::chart::{State, COREDNS, KUBE_SYSTEM};
use crate::config::{ClusterConfig, DnsConfig};
use crate::error::{Error, Result, StepExt};

const COREDNS_SERVICE: &str = "coredns";

impl FeatureEngine {
    /// Converge cluster DNS.
    ///
    /// On enable, also returns the cluster IP the DNS Service ended up with
    /// so kubelets can be pointed at it.
    #[instrument(skip_all, fields(feature = %Feature::Dns))]
    pub async fn apply_dns(
        &self,
        cancel: &CancellationToken,
        cfg: &ClusterConfig,
    ) -> std::result::Result<(FeatureStatus, Option<String>), FeatureError> {
        if !cfg.dns.enabled() {
            self.disable_dns(cancel)
                .await
                .map_err(|e| FeatureError::delete(Feature::Dns, e))?;
            return Ok((FeatureStatus::disabled(), None));
        }

        let dns_ip = self
            .enable_dns(cancel, &cfg.dns)
            .await
            .map_err(|e| FeatureError::deploy(Feature::Dns, e))?;
        Ok((
            FeatureStatus::enabled(self.images.coredns.tag.clone(), ENABLED_MSG),
            Some(dns_ip),
        ))
    }

    async fn enable_dns(&self, cancel: &CancellationToken, dns: &DnsConfig) -> Result<String> {
        ensure_active(cancel)?;
        self.charts
            .apply(&COREDNS, State::Present, Some(&dns_values(&self.images.coredns, dns)))
            .await
            .step("failed to apply coredns")?;

        let dns_ip = self
            .kube
            .get_service_cluster_ip(COREDNS_SERVICE, KUBE_SYSTEM)
            .await
            .step("failed to retrieve the coredns service")?
            .ok_or_else(|| Error::Environment("coredns service has no cluster IP".to_string()))?;
        info!("DNS enabled at {}", dns_ip);
        Ok(dns_ip)
    }

    async fn disable_dns(&self, cancel: &CancellationToken) -> Result<()> {
        ensure_active(cancel)?;
        self.charts
            .apply(&COREDNS, State::Deleted, None)
            .await
            .step("failed to uninstall coredns")?;
        info!("DNS disabled");
        Ok(())
    }
}
