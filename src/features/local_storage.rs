use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use super::values::local_storage_values;
use super::{ensure_active, Feature, FeatureEngine, FeatureError, FeatureStatus};
use crate::chart::{State, LOCAL_STORAGE};
use crate::config::{ClusterConfig, LocalStorageConfig};
use crate::error::{Result, StepExt};

impl FeatureEngine {
    /// Converge the local persistent volume provisioner
    #[instrument(skip_all, fields(feature = %Feature::LocalStorage))]
    pub async fn apply_local_storage(
        &self,
        cancel: &CancellationToken,
        cfg: &ClusterConfig,
    ) -> std::result::Result<FeatureStatus, FeatureError> {
        let storage = &cfg.local_storage;

        if !storage.enabled() {
            self.disable_local_storage(cancel)
                .await
                .map_err(|e| FeatureError::delete(Feature::LocalStorage, e))?;
            return Ok(FeatureStatus::disabled());
        }

        self.enable_local_storage(cancel, storage)
            .await
            .map_err(|e| FeatureError::deploy(Feature::LocalStorage, e))?;
        Ok(FeatureStatus::enabled(
            self.images.local_storage.tag.clone(),
            format!("enabled at {}", storage.local_path()),
        ))
    }

    async fn enable_local_storage(
        &self,
        cancel: &CancellationToken,
        storage: &LocalStorageConfig,
    ) -> Result<()> {
        ensure_active(cancel)?;
        let values = local_storage_values(&self.images.local_storage, storage);
        self.charts
            .apply(&LOCAL_STORAGE, State::Present, Some(&values))
            .await
            .step("failed to enable local storage")?;
        info!("Local storage enabled at {}", storage.local_path());
        Ok(())
    }

    async fn disable_local_storage(&self, cancel: &CancellationToken) -> Result<()> {
        ensure_active(cancel)?;
        self.charts
            .apply(&LOCAL_STORAGE, State::Deleted, None)
            .await
            .step("failed to uninstall local storage")?;
        info!("Local storage disabled");
        Ok(())
    }
}
