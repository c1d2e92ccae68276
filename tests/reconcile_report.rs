//! Whole-cluster reconcile passes through the public engine API

use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{APIResource, APIResourceList};
use tokio_util::sync::CancellationToken;

use cluster_features::chart::{Chart, ChartExecutor, ImageRegistry, State, Values, CILIUM};
use cluster_features::config::ClusterConfig;
use cluster_features::env::{Environment, MountPropagation, VxlanInterface};
use cluster_features::features::{EngineOptions, Feature, FeatureEngine};
use cluster_features::kubernetes::KubernetesAccessor;
use cluster_features::{Error, Result};

/// Applies every release and reports it changed the first time it is touched
#[derive(Default)]
struct FirstApplyChanges {
    seen: Mutex<HashSet<(&'static str, String)>>,
    applied: Mutex<Vec<(Chart, State)>>,
}

#[async_trait]
impl ChartExecutor for FirstApplyChanges {
    async fn apply(&self, chart: &Chart, state: State, values: Option<&Values>) -> Result<bool> {
        self.applied.lock().unwrap().push((*chart, state));
        let rendered = values.map(|v| v.to_json().to_string()).unwrap_or_default();
        Ok(self
            .seen
            .lock()
            .unwrap()
            .insert((chart.install_name, format!("{state}:{rendered}"))))
    }
}

#[derive(Default)]
struct Cluster {
    restarts: Mutex<u32>,
}

#[async_trait]
impl KubernetesAccessor for Cluster {
    async fn restart_deployment(&self, _name: &str, _namespace: &str) -> Result<()> {
        *self.restarts.lock().unwrap() += 1;
        Ok(())
    }

    async fn restart_daemonset(&self, _name: &str, _namespace: &str) -> Result<()> {
        *self.restarts.lock().unwrap() += 1;
        Ok(())
    }

    async fn list_resources_for_group_version(&self, group_version: &str) -> Result<APIResourceList> {
        Ok(APIResourceList {
            group_version: group_version.to_string(),
            resources: ["ciliuml2announcementpolicies", "ciliumloadbalancerippools"]
                .into_iter()
                .map(|name| APIResource {
                    name: name.to_string(),
                    ..Default::default()
                })
                .collect(),
        })
    }

    async fn get_service_cluster_ip(&self, _name: &str, _namespace: &str) -> Result<Option<String>> {
        Ok(Some("10.152.183.10".to_string()))
    }
}

struct Host;

#[async_trait]
impl Environment for Host {
    fn strict(&self) -> bool {
        false
    }

    async fn mount_path(&self, _fs_type: &str) -> Result<String> {
        Err(Error::Environment("not confined".to_string()))
    }

    async fn mount_propagation(&self, _path: &str) -> Result<MountPropagation> {
        Ok(MountPropagation::Shared)
    }

    async fn on_lxd(&self) -> bool {
        false
    }

    async fn vxlan_interfaces(&self) -> Result<Vec<VxlanInterface>> {
        Ok(Vec::new())
    }

    async fn default_route_ipv6_cidr(&self) -> Result<String> {
        Ok("2001:db8::/64".to_string())
    }

    async fn node_address(&self) -> Result<IpAddr> {
        Ok(IpAddr::from([192, 168, 1, 20]))
    }
}

fn engine(charts: Arc<FirstApplyChanges>, cluster: Arc<Cluster>) -> FeatureEngine {
    FeatureEngine::new(charts, cluster, Arc::new(Host), Arc::new(ImageRegistry::default()))
        .with_options(EngineOptions {
            restart_attempts: 2,
            crd_poll_interval: Duration::from_millis(5),
            crd_timeout: Duration::from_millis(50),
        })
}

#[tokio::test]
async fn converged_cluster_stops_restarting() {
    let charts = Arc::new(FirstApplyChanges::default());
    let cluster = Arc::new(Cluster::default());
    let engine = engine(charts.clone(), cluster.clone());
    let cfg = ClusterConfig::from_yaml("gateway: {enabled: true}\ningress: {enabled: true}\n").unwrap();

    let first = engine.reconcile_all(&CancellationToken::new(), &cfg).await;
    assert!(first.is_success(), "{:?}", first.errors);
    let restarts_after_first = *cluster.restarts.lock().unwrap();
    assert!(restarts_after_first > 0);

    let second = engine.reconcile_all(&CancellationToken::new(), &cfg).await;
    assert!(second.is_success());
    assert_eq!(first.statuses, second.statuses);
    assert_eq!(*cluster.restarts.lock().unwrap(), restarts_after_first);
}

#[tokio::test]
async fn bgp_mode_without_peering_crd_fails_only_load_balancer() {
    let charts = Arc::new(FirstApplyChanges::default());
    let engine = engine(charts.clone(), Arc::new(Cluster::default()));
    let cfg = ClusterConfig::from_yaml(
        r#"
loadBalancer:
  enabled: true
  bgpMode: true
  bgpPeerAddress: 10.0.0.1
  bgpPeerAsn: 64513
  cidrs: ["198.51.100.0/24"]
"#,
    )
    .unwrap();

    let report = engine.reconcile_all(&CancellationToken::new(), &cfg).await;

    assert_eq!(report.errors.len(), 1);
    let lb = report.status(Feature::LoadBalancer).unwrap();
    assert!(!lb.enabled);
    assert!(lb
        .message
        .starts_with("Failed to deploy Cilium Load Balancer, the error was: failed to wait for required CRDs to be available"));
    assert!(report.status(Feature::Dns).unwrap().enabled);
    assert_eq!(report.dns_ip.as_deref(), Some("10.152.183.10"));
    assert_eq!(report.durations.len(), Feature::ALL.len());
}

#[tokio::test]
async fn network_release_written_once_per_network_feature() {
    let charts = Arc::new(FirstApplyChanges::default());
    let engine = engine(charts.clone(), Arc::new(Cluster::default()));

    engine
        .reconcile_network_stack(&CancellationToken::new(), &ClusterConfig::default())
        .await;

    let applied = charts.applied.lock().unwrap();
    let cilium: Vec<State> = applied
        .iter()
        .filter(|(chart, _)| *chart == CILIUM)
        .map(|(_, state)| *state)
        .collect();
    assert_eq!(cilium, vec![State::Present, State::UpgradeOnly, State::UpgradeOnly]);
}
