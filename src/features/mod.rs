//! Feature reconciliation engine
//!
//! One reconciler per feature converges a chart release (and, for overlay
//! features, a slice of the network release's values) to the desired
//! configuration and reports a [`FeatureStatus`]. Reconcilers never keep
//! state between calls; every status is rebuilt from scratch.
//!
//! Network, gateway and ingress all write the same release. Callers must not
//! run those three concurrently; [`FeatureEngine::reconcile_all`] runs every
//! feature sequentially.

mod dns;
mod gateway;
mod ingress;
pub mod internal;
mod loadbalancer;
mod local_storage;
mod metrics_server;
mod network;
pub mod rollout;
mod status;
pub mod values;

#[cfg(test)]
mod network_test;
#[cfg(test)]
pub(crate) mod test_support;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::chart::{ChartExecutor, ImageRegistry};
use crate::config::ClusterConfig;
use crate::env::Environment;
use crate::error::{Error, Result};
use crate::kubernetes::KubernetesAccessor;

pub use internal::InternalConfig;
pub use status::{
    Feature, FeatureError, FeatureStatus, ReconcileReport, DISABLED_MSG, ENABLED_MSG,
};

/// Restart attempts per workload when none are configured
pub const DEFAULT_RESTART_ATTEMPTS: u32 = 3;

/// Default interval between CRD readiness polls
pub const DEFAULT_CRD_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Default upper bound on waiting for CRDs to register
pub const DEFAULT_CRD_TIMEOUT: Duration = Duration::from_secs(120);

/// Tunables of the engine's bounded waits
#[derive(Clone, Debug)]
pub struct EngineOptions {
    pub restart_attempts: u32,
    pub crd_poll_interval: Duration,
    pub crd_timeout: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            restart_attempts: DEFAULT_RESTART_ATTEMPTS,
            crd_poll_interval: DEFAULT_CRD_POLL_INTERVAL,
            crd_timeout: DEFAULT_CRD_TIMEOUT,
        }
    }
}

/// Converges feature state through the chart executor and the cluster API
#[derive(Clone)]
pub struct FeatureEngine {
    pub(crate) charts: Arc<dyn ChartExecutor>,
    pub(crate) kube: Arc<dyn KubernetesAccessor>,
    pub(crate) env: Arc<dyn Environment>,
    pub(crate) images: Arc<ImageRegistry>,
    pub(crate) options: EngineOptions,
}

impl FeatureEngine {
    pub fn new(
        charts: Arc<dyn ChartExecutor>,
        kube: Arc<dyn KubernetesAccessor>,
        env: Arc<dyn Environment>,
        images: Arc<ImageRegistry>,
    ) -> Self {
        Self {
            charts,
            kube,
            env,
            images,
            options: EngineOptions::default(),
        }
    }

    pub fn with_options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn images(&self) -> &ImageRegistry {
        &self.images
    }

    /// Joint network, gateway and ingress pass.
    ///
    /// Each feature still applies the network release once, in that order.
    #[instrument(skip_all)]
    pub async fn reconcile_network_stack(
        &self,
        cancel: &CancellationToken,
        cfg: &ClusterConfig,
    ) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        let (result, elapsed) = timed(self.apply_network(cancel, cfg)).await;
        report.record_timed(Feature::Network, result, elapsed);
        let (result, elapsed) = timed(self.apply_gateway(cancel, cfg)).await;
        report.record_timed(Feature::Gateway, result, elapsed);
        let (result, elapsed) = timed(self.apply_ingress(cancel, cfg)).await;
        report.record_timed(Feature::Ingress, result, elapsed);

        report
    }

    /// Reconcile every feature, network first.
    ///
    /// A failing feature does not stop the ones after it; its failure status
    /// lands in the report next to the error.
    #[instrument(skip_all)]
    pub async fn reconcile_all(
        &self,
        cancel: &CancellationToken,
        cfg: &ClusterConfig,
    ) -> ReconcileReport {
        let mut report = self.reconcile_network_stack(cancel, cfg).await;

        let (result, elapsed) = timed(self.apply_load_balancer(cancel, cfg)).await;
        report.record_timed(Feature::LoadBalancer, result, elapsed);
        let (result, elapsed) = timed(self.apply_local_storage(cancel, cfg)).await;
        report.record_timed(Feature::LocalStorage, result, elapsed);
        let (result, elapsed) = timed(self.apply_metrics_server(cancel, cfg)).await;
        report.record_timed(Feature::MetricsServer, result, elapsed);

        let (result, elapsed) = timed(self.apply_dns(cancel, cfg)).await;
        let result = result.map(|(status, dns_ip)| {
            report.dns_ip = dns_ip;
            status
        });
        report.record_timed(Feature::Dns, result, elapsed);

        if report.is_success() {
            info!("All features reconciled");
        } else {
            for err in &report.errors {
                warn!(feature = %err.feature, error = %err.source, "Feature reconcile failed");
            }
        }
        report
    }
}

async fn timed<F: Future>(future: F) -> (F::Output, Duration) {
    let start = Instant::now();
    let output = future.await;
    (output, start.elapsed())
}

/// Fail fast once the caller has given up
pub(crate) fn ensure_active(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(Error::Cancelled)
    } else {
        Ok(())
    }
}
