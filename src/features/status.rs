//! Feature identity and the status contract every reconciler returns

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Status message of a feature that converged to enabled
pub const ENABLED_MSG: &str = "enabled";

/// Status message of a feature that converged to disabled
pub const DISABLED_MSG: &str = "disabled";

/// An optional, independently toggleable cluster capability
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Feature {
    Network,
    Gateway,
    Ingress,
    LoadBalancer,
    LocalStorage,
    MetricsServer,
    Dns,
}

impl Feature {
    pub const ALL: [Feature; 7] = [
        Feature::Network,
        Feature::Gateway,
        Feature::Ingress,
        Feature::LoadBalancer,
        Feature::LocalStorage,
        Feature::MetricsServer,
        Feature::Dns,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Feature::Network => "network",
            Feature::Gateway => "gateway",
            Feature::Ingress => "ingress",
            Feature::LoadBalancer => "load-balancer",
            Feature::LocalStorage => "local-storage",
            Feature::MetricsServer => "metrics-server",
            Feature::Dns => "dns",
        }
    }

    /// Name used in status messages
    fn title(&self) -> &'static str {
        match self {
            Feature::Network => "Cilium Network",
            Feature::Gateway => "Cilium Gateway",
            Feature::Ingress => "Cilium Ingress",
            Feature::LoadBalancer => "Cilium Load Balancer",
            Feature::LocalStorage => "Local Storage",
            Feature::MetricsServer => "Metrics Server",
            Feature::Dns => "DNS",
        }
    }

    pub fn deploy_failed_message(&self, err: &Error) -> String {
        format!("Failed to deploy {}, the error was: {}", self.title(), err)
    }

    pub fn delete_failed_message(&self, err: &Error) -> String {
        format!("Failed to delete {}, the error was: {}", self.title(), err)
    }
}

impl std::fmt::Display for Feature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one reconcile of one feature.
///
/// Built fresh on every call. `version` is empty whenever `enabled` is false.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureStatus {
    pub enabled: bool,
    pub version: String,
    pub message: String,
}

impl FeatureStatus {
    pub fn enabled(version: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            enabled: true,
            version: version.into(),
            message: message.into(),
        }
    }

    pub fn disabled() -> Self {
        Self::failed(DISABLED_MSG)
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            enabled: false,
            version: String::new(),
            message: message.into(),
        }
    }
}

/// A feature reconcile that failed.
///
/// Carries the status to report alongside the underlying error; its display
/// form is the status message.
#[derive(Debug, thiserror::Error)]
#[error("{}", .status.message)]
pub struct FeatureError {
    pub feature: Feature,
    pub status: FeatureStatus,
    #[source]
    pub source: Error,
}

impl FeatureError {
    /// Failure on the enable path
    pub fn deploy(feature: Feature, source: Error) -> Self {
        Self {
            feature,
            status: FeatureStatus::failed(feature.deploy_failed_message(&source)),
            source,
        }
    }

    /// Failure on the disable path
    pub fn delete(feature: Feature, source: Error) -> Self {
        Self {
            feature,
            status: FeatureStatus::failed(feature.delete_failed_message(&source)),
            source,
        }
    }
}

/// Result of reconciling several features in one pass
#[derive(Debug, Default)]
pub struct ReconcileReport {
    pub statuses: BTreeMap<Feature, FeatureStatus>,
    pub errors: Vec<FeatureError>,
    /// Cluster IP of the DNS service, when DNS converged to enabled
    pub dns_ip: Option<String>,
    /// Wall time each feature's reconcile took
    pub durations: BTreeMap<Feature, Duration>,
}

impl ReconcileReport {
    /// Fold one feature's outcome into the report
    pub fn record(&mut self, feature: Feature, result: Result<FeatureStatus, FeatureError>) {
        match result {
            Ok(status) => {
                self.statuses.insert(feature, status);
            }
            Err(err) => {
                self.statuses.insert(feature, err.status.clone());
                self.errors.push(err);
            }
        }
    }

    /// [`ReconcileReport::record`] plus how long the feature took
    pub fn record_timed(
        &mut self,
        feature: Feature,
        result: Result<FeatureStatus, FeatureError>,
        elapsed: Duration,
    ) {
        self.durations.insert(feature, elapsed);
        self.record(feature, result);
    }

    /// Whether `feature` failed in this pass
    pub fn failed(&self, feature: Feature) -> bool {
        self.errors.iter().any(|err| err.feature == feature)
    }

    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn status(&self, feature: Feature) -> Option<&FeatureStatus> {
        self.statuses.get(&feature)
    }
}
