//! Rollout restarts of the CNI workloads and CRD readiness polling

use std::future::Future;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::FeatureEngine;
use crate::chart::KUBE_SYSTEM;
use crate::error::{Error, Result};

pub const CILIUM_OPERATOR_DEPLOYMENT: &str = "cilium-operator";
pub const CILIUM_DAEMONSET: &str = "cilium";

/// Run `operation` up to `attempts` times back to back.
///
/// Cancellation aborts immediately with [`Error::Cancelled`]; exhausting the
/// attempts wraps the last failure in [`Error::RolloutRestart`].
pub async fn retry_for<F, Fut>(
    cancel: &CancellationToken,
    attempts: u32,
    workload: &str,
    mut operation: F,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            result = operation() => result,
        };

        match result {
            Ok(()) => return Ok(()),
            Err(e) if attempt >= attempts => {
                return Err(Error::RolloutRestart {
                    workload: workload.to_string(),
                    attempts,
                    source: Box::new(e),
                });
            }
            Err(e) => {
                warn!(
                    workload = %workload,
                    attempt = attempt,
                    error = %e,
                    "Restart failed, retrying"
                );
            }
        }
    }
}

impl FeatureEngine {
    /// Restart the CNI operator, then the agents, so they pick up new values
    #[instrument(skip_all)]
    pub async fn rollout_restart_cilium(&self, cancel: &CancellationToken) -> Result<()> {
        let attempts = self.options.restart_attempts;

        retry_for(
            cancel,
            attempts,
            &format!("deployment {}/{}", KUBE_SYSTEM, CILIUM_OPERATOR_DEPLOYMENT),
            || self.kube.restart_deployment(CILIUM_OPERATOR_DEPLOYMENT, KUBE_SYSTEM),
        )
        .await?;

        retry_for(
            cancel,
            attempts,
            &format!("daemonset {}/{}", KUBE_SYSTEM, CILIUM_DAEMONSET),
            || self.kube.restart_daemonset(CILIUM_DAEMONSET, KUBE_SYSTEM),
        )
        .await?;

        info!("Rolled out restart of cilium workloads");
        Ok(())
    }

    /// Block until every resource in `required` is served by `group_version`.
    ///
    /// Listing errors count as "not registered yet". Gives up after the
    /// configured CRD timeout, or immediately on cancellation.
    #[instrument(skip(self, cancel))]
    pub async fn wait_for_crds(
        &self,
        cancel: &CancellationToken,
        group_version: &str,
        required: &[&str],
    ) -> Result<()> {
        let timeout = self.options.crd_timeout;
        let start = Instant::now();

        loop {
            let listed = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                listed = self.kube.list_resources_for_group_version(group_version) => listed,
            };

            let missing: Vec<String> = match listed {
                Ok(list) => required
                    .iter()
                    .filter(|name| !list.resources.iter().any(|r| r.name == **name))
                    .map(|name| name.to_string())
                    .collect(),
                Err(e) => {
                    debug!(error = %e, "Group version {} not served yet", group_version);
                    required.iter().map(|name| name.to_string()).collect()
                }
            };

            if missing.is_empty() {
                debug!("All required resources of {} are registered", group_version);
                return Ok(());
            }

            if start.elapsed() >= timeout {
                return Err(Error::CrdWaitTimeout {
                    group_version: group_version.to_string(),
                    missing,
                    waited: timeout,
                });
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(self.options.crd_poll_interval) => {}
            }
        }
    }
}
