//! In-memory collaborators for reconciler tests

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{APIResource, APIResourceList};

use super::{EngineOptions, FeatureEngine};
use crate::chart::{Chart, ChartExecutor, ImageRegistry, State, Values};
use crate::env::{Environment, MountPropagation, VxlanInterface};
use crate::error::{Error, Result};
use crate::kubernetes::KubernetesAccessor;

#[derive(Clone, Debug)]
pub struct ChartCall {
    pub chart: Chart,
    pub state: State,
    pub values: Option<Values>,
}

/// Records every apply; `changed` and failures are scripted per release
#[derive(Default)]
pub struct RecordingCharts {
    calls: Mutex<Vec<ChartCall>>,
    changed: Mutex<HashMap<&'static str, bool>>,
    failures: Mutex<HashMap<&'static str, String>>,
}

impl RecordingCharts {
    pub fn set_changed(&self, chart: &Chart, changed: bool) {
        self.changed
            .lock()
            .unwrap()
            .insert(chart.install_name, changed);
    }

    pub fn fail(&self, chart: &Chart, message: &str) {
        self.failures
            .lock()
            .unwrap()
            .insert(chart.install_name, message.to_string());
    }

    pub fn calls(&self) -> Vec<ChartCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, chart: &Chart) -> Vec<ChartCall> {
        self.calls()
            .into_iter()
            .filter(|call| call.chart == *chart)
            .collect()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }
}

#[async_trait]
impl ChartExecutor for RecordingCharts {
    async fn apply(&self, chart: &Chart, state: State, values: Option<&Values>) -> Result<bool> {
        self.calls.lock().unwrap().push(ChartCall {
            chart: *chart,
            state,
            values: values.cloned(),
        });
        if let Some(message) = self.failures.lock().unwrap().get(chart.install_name) {
            return Err(Error::ChartError {
                chart: chart.to_string(),
                message: message.clone(),
            });
        }
        Ok(self
            .changed
            .lock()
            .unwrap()
            .get(chart.install_name)
            .copied()
            .unwrap_or(false))
    }
}

/// Records restarts; restart failures, served resources and the DNS
/// service IP are scripted
pub struct RecordingKube {
    restarts: Mutex<Vec<String>>,
    restart_failures: Mutex<HashMap<String, u32>>,
    resources: Mutex<Option<Vec<String>>>,
    cluster_ip: Mutex<Option<String>>,
}

impl Default for RecordingKube {
    fn default() -> Self {
        Self {
            restarts: Mutex::new(Vec::new()),
            restart_failures: Mutex::new(HashMap::new()),
            resources: Mutex::new(Some(vec![
                "ciliuml2announcementpolicies".to_string(),
                "ciliumloadbalancerippools".to_string(),
                "ciliumbgppeeringpolicies".to_string(),
            ])),
            cluster_ip: Mutex::new(Some("10.152.183.10".to_string())),
        }
    }
}

impl RecordingKube {
    /// Fail the next `times` restarts of `workload` (e.g. "deployment/cilium-operator")
    pub fn fail_restarts(&self, workload: &str, times: u32) {
        self.restart_failures
            .lock()
            .unwrap()
            .insert(workload.to_string(), times);
    }

    /// Restart attempts in order, successful or not
    pub fn restarts(&self) -> Vec<String> {
        self.restarts.lock().unwrap().clone()
    }

    /// `None` makes the group/version unknown to the API server
    pub fn set_resources(&self, resources: Option<&[&str]>) {
        *self.resources.lock().unwrap() =
            resources.map(|names| names.iter().map(|n| n.to_string()).collect());
    }

    pub fn set_cluster_ip(&self, ip: Option<&str>) {
        *self.cluster_ip.lock().unwrap() = ip.map(str::to_string);
    }

    fn restart(&self, workload: String) -> Result<()> {
        self.restarts.lock().unwrap().push(workload.clone());
        let mut failures = self.restart_failures.lock().unwrap();
        match failures.get_mut(&workload) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Err(Error::Environment(format!("{} restart rejected", workload)))
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl KubernetesAccessor for RecordingKube {
    async fn restart_deployment(&self, name: &str, _namespace: &str) -> Result<()> {
        self.restart(format!("deployment/{}", name))
    }

    async fn restart_daemonset(&self, name: &str, _namespace: &str) -> Result<()> {
        self.restart(format!("daemonset/{}", name))
    }

    async fn list_resources_for_group_version(
        &self,
        group_version: &str,
    ) -> Result<APIResourceList> {
        let resources = self.resources.lock().unwrap().clone();
        match resources {
            Some(names) => Ok(APIResourceList {
                group_version: group_version.to_string(),
                resources: names
                    .into_iter()
                    .map(|name| APIResource {
                        name,
                        ..Default::default()
                    })
                    .collect(),
            }),
            None => Err(Error::Environment(format!(
                "the server could not find the requested resource {}",
                group_version
            ))),
        }
    }

    async fn get_service_cluster_ip(&self, _name: &str, _namespace: &str) -> Result<Option<String>> {
        Ok(self.cluster_ip.lock().unwrap().clone())
    }
}

/// Fixed host facts
#[derive(Clone, Debug)]
pub struct StaticEnvironment {
    pub strict: bool,
    pub bpf_path: Option<String>,
    pub cgroup_path: Option<String>,
    /// `None` when no mount covers /sys
    pub sys_propagation: Option<MountPropagation>,
    pub lxd: bool,
    pub vxlan: Vec<VxlanInterface>,
    pub ipv6_route_cidr: Option<String>,
    pub node_address: IpAddr,
}

impl Default for StaticEnvironment {
    fn default() -> Self {
        Self {
            strict: false,
            bpf_path: Some("/sys/fs/bpf".to_string()),
            cgroup_path: Some("/sys/fs/cgroup".to_string()),
            sys_propagation: Some(MountPropagation::Shared),
            lxd: false,
            vxlan: Vec::new(),
            ipv6_route_cidr: Some("2001:db8::/64".to_string()),
            node_address: IpAddr::from([10, 0, 0, 10]),
        }
    }
}

#[async_trait]
impl Environment for StaticEnvironment {
    fn strict(&self) -> bool {
        self.strict
    }

    async fn mount_path(&self, fs_type: &str) -> Result<String> {
        let path = match fs_type {
            "bpf" => self.bpf_path.clone(),
            "cgroup2" => self.cgroup_path.clone(),
            _ => None,
        };
        path.ok_or_else(|| Error::Environment(format!("no {} filesystem is mounted", fs_type)))
    }

    async fn mount_propagation(&self, path: &str) -> Result<MountPropagation> {
        self.sys_propagation
            .ok_or_else(|| Error::Environment(format!("no mount found for {}", path)))
    }

    async fn on_lxd(&self) -> bool {
        self.lxd
    }

    async fn vxlan_interfaces(&self) -> Result<Vec<VxlanInterface>> {
        Ok(self.vxlan.clone())
    }

    async fn default_route_ipv6_cidr(&self) -> Result<String> {
        self.ipv6_route_cidr
            .clone()
            .ok_or_else(|| Error::Environment("no IPv6 default route found".to_string()))
    }

    async fn node_address(&self) -> Result<IpAddr> {
        Ok(self.node_address)
    }
}

/// Fakes plus the engine options tests run with
pub struct Harness {
    pub charts: Arc<RecordingCharts>,
    pub kube: Arc<RecordingKube>,
    pub env: StaticEnvironment,
    pub options: EngineOptions,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            charts: Arc::new(RecordingCharts::default()),
            kube: Arc::new(RecordingKube::default()),
            env: StaticEnvironment::default(),
            options: EngineOptions {
                restart_attempts: 3,
                crd_poll_interval: Duration::from_millis(10),
                crd_timeout: Duration::from_millis(100),
            },
        }
    }

    pub fn engine(&self) -> FeatureEngine {
        FeatureEngine::new(
            self.charts.clone(),
            self.kube.clone(),
            Arc::new(self.env.clone()),
            Arc::new(ImageRegistry::default()),
        )
        .with_options(self.options.clone())
    }
}
