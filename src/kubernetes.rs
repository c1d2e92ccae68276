//! Kubernetes API access used by the feature engine
//!
//! The engine only needs a handful of calls: bump workloads so they restart,
//! discover which resources a group/version serves, and read a Service's
//! cluster IP. [`KubeAccessor`] implements them on a kube-rs client.

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::APIResourceList;
use kube::api::{Api, Patch, PatchParams};
use kube::Client;
use serde_json::json;
use tracing::{debug, info, instrument};

use crate::error::{Error, Result};

/// Annotation kubectl uses for `rollout restart`
pub const RESTARTED_AT_ANNOTATION: &str = "kubectl.kubernetes.io/restartedAt";

const FIELD_MANAGER: &str = "cluster-features";

fn patch_params() -> PatchParams {
    PatchParams {
        field_manager: Some(FIELD_MANAGER.to_string()),
        ..Default::default()
    }
}

#[async_trait]
pub trait KubernetesAccessor: Send + Sync {
    /// Trigger a rolling restart of a Deployment
    async fn restart_deployment(&self, name: &str, namespace: &str) -> Result<()>;

    /// Trigger a rolling restart of a DaemonSet
    async fn restart_daemonset(&self, name: &str, namespace: &str) -> Result<()>;

    /// Resources served by an API group/version such as `cilium.io/v2alpha1`
    async fn list_resources_for_group_version(&self, group_version: &str)
        -> Result<APIResourceList>;

    /// Cluster IP of a Service, `None` when the Service has none yet
    async fn get_service_cluster_ip(&self, name: &str, namespace: &str) -> Result<Option<String>>;
}

/// [`KubernetesAccessor`] backed by a kube-rs client
#[derive(Clone)]
pub struct KubeAccessor {
    client: Client,
}

impl KubeAccessor {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

/// Merge patch that bumps the pod template's restart annotation.
///
/// Changing the template triggers a rollout; with no pods yet it is a plain
/// spec update.
pub fn restart_patch(timestamp: &str) -> serde_json::Value {
    json!({
        "spec": {
            "template": {
                "metadata": {
                    "annotations": {
                        RESTARTED_AT_ANNOTATION: timestamp
                    }
                }
            }
        }
    })
}

#[async_trait]
impl KubernetesAccessor for KubeAccessor {
    #[instrument(skip(self))]
    async fn restart_deployment(&self, name: &str, namespace: &str) -> Result<()> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let patch = restart_patch(&Utc::now().to_rfc3339());
        api.patch(name, &patch_params(), &Patch::Merge(&patch)).await?;
        info!("Restarted deployment {}/{}", namespace, name);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn restart_daemonset(&self, name: &str, namespace: &str) -> Result<()> {
        let api: Api<DaemonSet> = Api::namespaced(self.client.clone(), namespace);
        let patch = restart_patch(&Utc::now().to_rfc3339());
        api.patch(name, &patch_params(), &Patch::Merge(&patch)).await?;
        info!("Restarted daemonset {}/{}", namespace, name);
        Ok(())
    }

    async fn list_resources_for_group_version(
        &self,
        group_version: &str,
    ) -> Result<APIResourceList> {
        // The core group is served under /api, everything else under /apis
        let resources = if group_version.contains('/') {
            self.client.list_api_group_resources(group_version).await?
        } else {
            self.client.list_core_api_resources(group_version).await?
        };
        debug!(
            "Group version {} serves {} resources",
            group_version,
            resources.resources.len()
        );
        Ok(resources)
    }

    async fn get_service_cluster_ip(&self, name: &str, namespace: &str) -> Result<Option<String>> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        let service = api.get_opt(name).await?.ok_or_else(|| {
            Error::Environment(format!("service {}/{} not found", namespace, name))
        })?;
        Ok(service
            .spec
            .and_then(|spec| spec.cluster_ip)
            .filter(|ip| !ip.is_empty() && ip != "None"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restart_patch_shape() {
        let patch = restart_patch("2024-05-01T10:00:00+00:00");
        assert_eq!(
            patch["spec"]["template"]["metadata"]["annotations"][RESTARTED_AT_ANNOTATION],
            "2024-05-01T10:00:00+00:00"
        );
    }
}
