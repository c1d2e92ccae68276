use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use super::internal::{METRICS_SERVER_IMAGE_REPO_ANNOTATION, METRICS_SERVER_IMAGE_TAG_ANNOTATION};
use super::values::metrics_server_values;
use super::{ensure_active, Feature, FeatureEngine, FeatureError, FeatureStatus, ENABLED_MSG};
use crate::chart::{ImageRef, State, METRICS_SERVER};
use crate::config::{Annotations, ClusterConfig};
use crate::error::{Result, StepExt};

/// Registry image with per-cluster repository/tag overrides applied
fn metrics_server_image(default: &ImageRef, annotations: &Annotations) -> ImageRef {
    let pick = |key: &str, fallback: &str| {
        annotations
            .get(key)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .unwrap_or(fallback)
            .to_string()
    };
    ImageRef::new(
        pick(METRICS_SERVER_IMAGE_REPO_ANNOTATION, &default.repository),
        pick(METRICS_SERVER_IMAGE_TAG_ANNOTATION, &default.tag),
    )
}

impl FeatureEngine {
    #[instrument(skip_all, fields(feature = %Feature::MetricsServer))]
    pub async fn apply_metrics_server(
        &self,
        cancel: &CancellationToken,
        cfg: &ClusterConfig,
    ) -> std::result::Result<FeatureStatus, FeatureError> {
        if !cfg.metrics_server.enabled() {
            self.converge_metrics_server(cancel, State::Deleted, None)
                .await
                .map_err(|e| FeatureError::delete(Feature::MetricsServer, e))?;
            return Ok(FeatureStatus::disabled());
        }

        let image = metrics_server_image(&self.images.metrics_server, &cfg.annotations);
        self.converge_metrics_server(cancel, State::Present, Some(&image))
            .await
            .map_err(|e| FeatureError::deploy(Feature::MetricsServer, e))?;
        Ok(FeatureStatus::enabled(image.tag, ENABLED_MSG))
    }

    async fn converge_metrics_server(
        &self,
        cancel: &CancellationToken,
        state: State,
        image: Option<&ImageRef>,
    ) -> Result<()> {
        ensure_active(cancel)?;
        let values = image.map(metrics_server_values);
        self.charts
            .apply(&METRICS_SERVER, state, values.as_ref())
            .await
            .step(match state {
                State::Deleted => "failed to uninstall metrics server",
                _ => "failed to install metrics server",
            })?;
        info!("Metrics server {}", state);
        Ok(())
    }
}
