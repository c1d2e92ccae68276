//! Controller loop for feature reconciliation
//!
//! Watches the ConfigMap holding the desired cluster configuration and, on
//! the elected leader only, runs a full reconcile pass whenever the
//! configuration changes. Passes run one at a time so the network release
//! has a single writer.

pub mod leader;
#[cfg(feature = "metrics")]
pub mod metrics;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::runtime::watcher::{self, Event};
use kube::runtime::WatchStreamExt;
use kube::{Api, Client};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::ClusterConfig;
use crate::error::{Error, Result};
use crate::features::{FeatureEngine, ReconcileReport};

pub use leader::{holder_identity, run_leader_election};

/// ConfigMap data key holding the configuration document
pub const CONFIG_KEY: &str = "config.yaml";

/// Default name of the ConfigMap holding the desired configuration
pub const DEFAULT_CONFIG_MAP: &str = "cluster-features";

/// Full pass even without changes, to repair drift
const RESYNC_INTERVAL: Duration = Duration::from_secs(300);

/// Delay before retrying a pass that failed with a retriable error
const REQUEUE_AFTER: Duration = Duration::from_secs(30);

/// How often leadership changes are noticed
const LEADER_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Shared state of the controller loop
pub struct ControllerState {
    pub client: Client,
    pub engine: FeatureEngine,
    /// Namespace of the configuration ConfigMap
    pub namespace: String,
    pub config_map: String,
    pub is_leader: Arc<AtomicBool>,
}

/// Parse the desired configuration out of its ConfigMap
pub fn config_from_config_map(cm: &ConfigMap) -> Result<ClusterConfig> {
    let document = cm
        .data
        .as_ref()
        .and_then(|data| data.get(CONFIG_KEY))
        .ok_or_else(|| Error::ConfigError(format!("ConfigMap has no {} key", CONFIG_KEY)))?;
    ClusterConfig::from_yaml(document)
}

/// Run one pass and log every feature's outcome
pub async fn reconcile_once(
    engine: &FeatureEngine,
    cancel: &CancellationToken,
    cfg: &ClusterConfig,
) -> ReconcileReport {
    let report = engine.reconcile_all(cancel, cfg).await;

    for (feature, status) in &report.statuses {
        info!(
            feature = %feature,
            enabled = status.enabled,
            version = %status.version,
            "{}",
            status.message
        );
    }

    #[cfg(feature = "metrics")]
    metrics::record_report(&report);

    report
}

/// Watch the configuration ConfigMap and reconcile until cancelled
#[instrument(skip_all, fields(config_map = %state.config_map, namespace = %state.namespace))]
pub async fn run_controller(state: Arc<ControllerState>, cancel: CancellationToken) -> Result<()> {
    let api: Api<ConfigMap> = Api::namespaced(state.client.clone(), &state.namespace);
    let watch_config =
        watcher::Config::default().fields(&format!("metadata.name={}", state.config_map));
    let mut events = std::pin::pin!(watcher::watcher(api, watch_config).default_backoff());

    let mut resync = tokio::time::interval(RESYNC_INTERVAL);
    resync.set_missed_tick_behavior(MissedTickBehavior::Skip);
    resync.tick().await;

    let mut leader_poll = tokio::time::interval(LEADER_POLL_INTERVAL);
    leader_poll.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut desired: Option<ClusterConfig> = None;
    let mut retry_at: Option<Instant> = None;
    let mut was_leader = false;

    info!("Starting feature controller");

    loop {
        let trigger = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            event = events.next() => match event {
                Some(event) => handle_event(event, &mut desired),
                None => {
                    warn!("ConfigMap watch ended");
                    break;
                }
            },
            _ = leader_poll.tick() => {
                let leader = state.is_leader.load(Ordering::Relaxed);
                let gained = leader && !was_leader;
                was_leader = leader;
                gained
            }
            _ = tokio::time::sleep_until(retry_at.unwrap_or_else(|| Instant::now() + REQUEUE_AFTER)),
                if retry_at.is_some() =>
            {
                retry_at = None;
                true
            }
            _ = resync.tick() => true,
        };

        if !trigger {
            continue;
        }
        let Some(cfg) = desired.as_ref() else {
            debug!("No desired configuration yet");
            continue;
        };
        if !state.is_leader.load(Ordering::Relaxed) {
            debug!("Not the leader, skipping reconcile");
            continue;
        }

        let report = reconcile_once(&state.engine, &cancel, cfg).await;
        retry_at = report
            .errors
            .iter()
            .any(|err| err.source.is_retriable())
            .then(|| Instant::now() + REQUEUE_AFTER);
        if retry_at.is_some() {
            info!("Retrying failed features in {:?}", REQUEUE_AFTER);
        }
    }

    info!("Feature controller stopped");
    Ok(())
}

/// Track the desired configuration; returns whether a pass is due
fn handle_event(
    event: std::result::Result<Event<ConfigMap>, watcher::Error>,
    desired: &mut Option<ClusterConfig>,
) -> bool {
    match event {
        Ok(Event::Apply(cm)) | Ok(Event::InitApply(cm)) => match config_from_config_map(&cm) {
            Ok(cfg) if desired.as_ref() == Some(&cfg) => {
                debug!("Configuration unchanged");
                false
            }
            Ok(cfg) => {
                info!("Desired configuration changed");
                *desired = Some(cfg);
                true
            }
            Err(e) => {
                error!(error = %e, "Rejected configuration, keeping the previous one");
                false
            }
        },
        Ok(Event::Delete(_)) => {
            warn!("Configuration ConfigMap deleted, leaving features as they are");
            *desired = None;
            false
        }
        Ok(Event::Init) | Ok(Event::InitDone) => false,
        Err(e) => {
            warn!(error = %e, "ConfigMap watch error, will retry");
            false
        }
    }
}
