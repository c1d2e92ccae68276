//! Prometheus metrics for the feature controller
//!
//! # Exported metrics
//! - `features_reconcile_total` (counter): reconciles labeled by feature and result
//!   (`enabled`, `disabled`, `error`).
//! - `features_reconcile_duration_seconds` (histogram): reconcile duration labeled by feature.
//! - `features_reconcile_errors_total` (counter): failures labeled by feature and error kind.
//! - `features_enabled` (gauge): 1 while a feature last converged to enabled.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, AtomicU64};

use axum::{http::StatusCode, routing::get, Router};
use once_cell::sync::Lazy;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::features::{Feature, ReconcileReport};
use crate::Result;

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct FeatureLabels {
    pub feature: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ResultLabels {
    pub feature: String,
    /// "enabled", "disabled" or "error"
    pub result: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ErrorLabels {
    pub feature: String,
    /// Error category, e.g. "chart", "environment", "crd_wait"
    pub kind: String,
}

pub static RECONCILE_TOTAL: Lazy<Family<ResultLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

pub static RECONCILE_DURATION_SECONDS: Lazy<Family<FeatureLabels, Histogram>> = Lazy::new(|| {
    fn reconcile_histogram() -> Histogram {
        // 1ms .. ~32s across 16 buckets; CRD waits and restarts land at the top
        Histogram::new(exponential_buckets(0.001, 2.0, 16))
    }

    Family::new_with_constructor(reconcile_histogram)
});

pub static RECONCILE_ERRORS_TOTAL: Lazy<Family<ErrorLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

pub static FEATURE_ENABLED: Lazy<Family<FeatureLabels, Gauge<i64, AtomicI64>>> =
    Lazy::new(Family::default);

/// Global metrics registry
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let mut registry = Registry::default();

    registry.register(
        "features_reconcile",
        "Feature reconciles by outcome",
        RECONCILE_TOTAL.clone(),
    );
    registry.register(
        "features_reconcile_duration_seconds",
        "Duration of a single feature reconcile in seconds",
        RECONCILE_DURATION_SECONDS.clone(),
    );
    registry.register(
        "features_reconcile_errors",
        "Feature reconcile failures by error kind",
        RECONCILE_ERRORS_TOTAL.clone(),
    );
    registry.register(
        "features_enabled",
        "Whether the feature last converged to enabled",
        FEATURE_ENABLED.clone(),
    );

    registry
});

fn feature_labels(feature: Feature) -> FeatureLabels {
    FeatureLabels {
        feature: feature.to_string(),
    }
}

/// Fold one reconcile pass into the metric families
pub fn record_report(report: &ReconcileReport) {
    for (feature, status) in &report.statuses {
        let result = if report.failed(*feature) {
            "error"
        } else if status.enabled {
            "enabled"
        } else {
            "disabled"
        };
        RECONCILE_TOTAL
            .get_or_create(&ResultLabels {
                feature: feature.to_string(),
                result: result.to_string(),
            })
            .inc();
        FEATURE_ENABLED
            .get_or_create(&feature_labels(*feature))
            .set(i64::from(status.enabled));
    }

    for (feature, elapsed) in &report.durations {
        RECONCILE_DURATION_SECONDS
            .get_or_create(&feature_labels(*feature))
            .observe(elapsed.as_secs_f64());
    }

    for err in &report.errors {
        RECONCILE_ERRORS_TOTAL
            .get_or_create(&ErrorLabels {
                feature: err.feature.to_string(),
                kind: err.source.kind().to_string(),
            })
            .inc();
    }
}

/// Text exposition of [`REGISTRY`]
pub fn encode_metrics() -> std::result::Result<String, std::fmt::Error> {
    let mut buffer = String::new();
    prometheus_client::encoding::text::encode(&mut buffer, &REGISTRY)?;
    Ok(buffer)
}

async fn metrics_handler() -> (StatusCode, String) {
    match encode_metrics() {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

async fn healthz() -> &'static str {
    "ok"
}

/// Serve `/metrics` and `/healthz` on `addr` until cancelled
pub async fn serve(addr: SocketAddr, cancel: CancellationToken) -> Result<()> {
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .map_err(|e| {
            error!("Metrics server error: {:?}", e);
            e
        })?;
    Ok(())
}
