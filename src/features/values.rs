//! Chart value builders
//!
//! Pure functions from desired configuration and probed facts to chart
//! values. Nothing here touches the cluster or the host.

use std::net::IpAddr;

use serde_json::{json, Value};

use super::internal::InternalConfig;
use crate::chart::{ImageRef, ImageRegistry, Values, KUBE_SYSTEM};
use crate::config::{
    ClusterConfig, DnsConfig, IngressConfig, LoadBalancerConfig, LocalStorageConfig,
};
use crate::env::SplitCidrs;
use crate::error::{Error, Result};

/// Host mount roots used instead of auto-mounting under strict confinement
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StrictMounts {
    pub bpf_root: String,
    pub cgroup_root: String,
}

/// Environment facts the network values depend on
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NetworkFacts {
    pub cidrs: SplitCidrs,
    pub strict_mounts: Option<StrictMounts>,
    /// Set only for IPv6-only pod networks
    pub ipv6_native_routing_cidr: Option<String>,
    /// Loopback address the agent reaches the API server on
    pub localhost: &'static str,
}

/// Values of the pod network release, without feature overlays
pub fn network_values(
    images: &ImageRegistry,
    cfg: &ClusterConfig,
    internal: &InternalConfig,
    facts: &NetworkFacts,
) -> Values {
    let mut values = Values::new()
        .with("image", images.cilium_agent.to_values())
        .with("operator.replicas", 1)
        .with("operator.image", images.cilium_operator.to_values())
        .with("socketLB.enabled", true)
        .with("cni.confPath", "/etc/cni/net.d")
        .with("cni.binPath", "/opt/cni/bin")
        .with("cni.exclusive", internal.cni_exclusive)
        .with("sctp.enabled", internal.sctp_enabled)
        .with("ipv4.enabled", facts.cidrs.ipv4.is_some())
        .with("ipv6.enabled", facts.cidrs.ipv6.is_some())
        .with("envoy.enabled", false)
        .with("nodePort.enabled", true)
        .with("nodePort.enableHealthCheck", false)
        .with("disableEnvoyVersionCheck", true)
        .with("k8sServiceHost", facts.localhost)
        .with("k8sServicePort", cfg.api_server.secure_port())
        .with("tunnelPort", internal.tunnel_port);

    if let Some(cidr) = &facts.cidrs.ipv4 {
        values.set("ipam.operator.clusterPoolIPv4PodCIDRList", cidr.as_str());
    }
    if let Some(cidr) = &facts.cidrs.ipv6 {
        values.set("ipam.operator.clusterPoolIPv6PodCIDRList", cidr.as_str());
    }
    if let Some(devices) = &internal.devices {
        values.set("devices", devices.as_str());
    }
    if let Some(device) = &internal.direct_routing_device {
        values.set("nodePort.directRoutingDevice", device.as_str());
    }
    if !internal.vlan_bpf_bypass.is_empty() {
        values.set("bpf.vlanBypass", internal.vlan_bpf_bypass.clone());
    }

    if let Some(mounts) = &facts.strict_mounts {
        values.set("bpf.autoMount.enabled", false);
        values.set("bpf.root", mounts.bpf_root.as_str());
        values.set("cgroup.autoMount.enabled", false);
        values.set("cgroup.hostRoot", mounts.cgroup_root.as_str());
    }

    if let Some(cidr) = &facts.ipv6_native_routing_cidr {
        values.set("routingMode", "native");
        values.set("ipv6NativeRoutingCIDR", cidr.as_str());
        values.set("autoDirectNodeRoutes", true);
    }

    values
}

/// Gateway API overlay on the network release
pub fn gateway_values(enabled: bool) -> Values {
    Values::new().with("gatewayAPI.enabled", enabled)
}

/// Ingress controller overlay on the network release.
///
/// The disabled profile resets every field explicitly so chart defaults cannot
/// bring back an earlier setting.
pub fn ingress_values(cfg: &IngressConfig, enabled: bool) -> Values {
    let controller = if enabled {
        json!({
            "enabled": true,
            "loadbalancerMode": "shared",
            "defaultSecretNamespace": KUBE_SYSTEM,
            "defaultSecretName": cfg.default_tls_secret(),
            "enableProxyProtocol": cfg.enable_proxy_protocol(),
        })
    } else {
        json!({
            "enabled": false,
            "loadbalancerMode": "",
            "defaultSecretNamespace": "",
            "defaultSecretName": "",
            "enableProxyProtocol": false,
        })
    };
    Values::new().with("ingressController", controller)
}

/// Load-balancer overlay on the network release
pub fn load_balancer_base_values(cfg: &LoadBalancerConfig, enabled: bool) -> Values {
    if enabled {
        Values::new()
            .with("l2announcements.enabled", cfg.l2_mode())
            .with("bgpControlPlane.enabled", cfg.bgp_mode())
            .with("externalIPs.enabled", true)
            // Sized for roughly 50 load-balanced services
            .with("k8sClientRateLimit.qps", 10)
            .with("k8sClientRateLimit.burst", 20)
    } else {
        Values::new()
            .with("l2announcements.enabled", false)
            .with("bgpControlPlane.enabled", false)
            .with("externalIPs.enabled", false)
            .with("k8sClientRateLimit.qps", 5)
            .with("k8sClientRateLimit.burst", 10)
    }
}

/// Values of the load-balancer CR release: address pool, L2 policy, BGP peering
pub fn load_balancer_cr_values(cfg: &LoadBalancerConfig) -> Result<Values> {
    let mut blocks: Vec<Value> = Vec::new();
    for cidr in &cfg.cidrs {
        let cidr = cidr.trim();
        cidr.parse::<ipnet::IpNet>()
            .map_err(|_| Error::InvalidCidr(cidr.to_string()))?;
        blocks.push(json!({ "cidr": cidr }));
    }
    for range in &cfg.ip_ranges {
        let start = parse_ip(&range.start)?;
        let stop = parse_ip(&range.stop)?;
        if start.is_ipv4() != stop.is_ipv4() {
            return Err(Error::ValidationError(format!(
                "address range {} - {} mixes address families",
                range.start, range.stop
            )));
        }
        blocks.push(json!({ "start": start.to_string(), "stop": stop.to_string() }));
    }

    let mut neighbors = Vec::new();
    if cfg.bgp_mode() {
        neighbors.push(json!({
            "peerAddress": cfg.checked_bgp_peer_address()?,
            "peerASN": cfg.bgp_peer_asn(),
            "peerPort": cfg.bgp_peer_port(),
        }));
    }

    Ok(Values::new()
        .with("l2.enabled", cfg.l2_mode())
        .with("l2.interfaces", cfg.l2_interfaces.clone())
        .with("ipPool.cidrs", blocks)
        .with("bgp.enabled", cfg.bgp_mode())
        .with("bgp.localASN", cfg.bgp_local_asn())
        .with("bgp.neighbors", neighbors))
}

fn parse_ip(address: &str) -> Result<IpAddr> {
    address
        .trim()
        .parse()
        .map_err(|_| Error::InvalidIp(address.to_string()))
}

/// Every overlay the network release carries for `cfg`, merged into one tree.
///
/// Overlays are composed from effective enablement, so a disabled network
/// yields the disabled profile of each overlay.
pub fn compose_base_overlays(cfg: &ClusterConfig) -> Values {
    let network = cfg.network.enabled();
    let mut values = gateway_values(network && cfg.gateway.enabled());
    values.merge(ingress_values(
        &cfg.ingress,
        network && cfg.ingress.enabled(),
    ));
    values.merge(load_balancer_base_values(
        &cfg.load_balancer,
        network && cfg.load_balancer.enabled(),
    ));
    values
}

pub fn local_storage_values(image: &ImageRef, cfg: &LocalStorageConfig) -> Values {
    Values::new()
        .with("image", image.to_values())
        .with("storageClass.enabled", true)
        .with("storageClass.isDefault", cfg.set_default())
        .with("storageClass.reclaimPolicy", cfg.reclaim_policy().to_string())
        .with("node.storage.path", cfg.local_path())
}

pub fn metrics_server_values(image: &ImageRef) -> Values {
    Values::new()
        .with("image", image.to_values())
        .with("securityContext.seccompProfile.type", "RuntimeDefault")
}

/// Values of the cluster DNS release, including its single server block
pub fn dns_values(image: &ImageRef, cfg: &DnsConfig) -> Values {
    let plugins = json!([
        { "name": "errors" },
        { "name": "health", "configBlock": "lameduck 5s" },
        { "name": "ready" },
        {
            "name": "kubernetes",
            "parameters": format!("{} in-addr.arpa ip6.arpa", cfg.cluster_domain()),
            "configBlock": "pods insecure\nfallthrough in-addr.arpa ip6.arpa\nttl 30",
        },
        { "name": "prometheus", "parameters": "0.0.0.0:9153" },
        { "name": "forward", "parameters": format!(". {}", cfg.upstream_nameservers().join(" ")) },
        { "name": "cache", "parameters": "30" },
        { "name": "loop" },
        { "name": "reload" },
        { "name": "loadbalance" },
    ]);

    let mut values = Values::new()
        .with("image", image.to_values())
        .with("service.name", "coredns")
        .with("deployment.name", "coredns")
        .with(
            "servers",
            json!([{
                "zones": [{ "zone": "." }],
                "port": 53,
                "plugins": plugins,
            }]),
        );
    if !cfg.service_ip().is_empty() {
        values.set("service.clusterIP", cfg.service_ip());
    }
    values
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IpRange;
    use crate::env::split_cidrs;

    fn facts(pod_cidr: &str) -> NetworkFacts {
        NetworkFacts {
            cidrs: split_cidrs(pod_cidr).unwrap(),
            strict_mounts: None,
            ipv6_native_routing_cidr: None,
            localhost: "127.0.0.1",
        }
    }

    #[test]
    fn test_network_values_address_families() {
        let images = ImageRegistry::default();
        let cfg = ClusterConfig::default();
        let internal = InternalConfig::default();

        for (cidr, v4, v6) in [
            ("10.1.0.0/16", true, false),
            ("fd01::/108", false, true),
            ("10.1.0.0/16,fd01::/108", true, true),
        ] {
            let values = network_values(&images, &cfg, &internal, &facts(cidr));
            assert_eq!(values.get("ipv4.enabled"), Some(&json!(v4)), "{cidr}");
            assert_eq!(values.get("ipv6.enabled"), Some(&json!(v6)), "{cidr}");
        }
    }

    #[test]
    fn test_network_values_defaults() {
        let images = ImageRegistry::default();
        let values = network_values(
            &images,
            &ClusterConfig::default(),
            &InternalConfig::default(),
            &facts("10.1.0.0/16"),
        );

        assert_eq!(values.get("tunnelPort"), Some(&json!(8472)));
        assert_eq!(values.get("cni.exclusive"), Some(&json!(true)));
        assert_eq!(values.get("k8sServiceHost"), Some(&json!("127.0.0.1")));
        assert_eq!(values.get("k8sServicePort"), Some(&json!(6443)));
        assert_eq!(
            values.get("ipam.operator.clusterPoolIPv4PodCIDRList"),
            Some(&json!("10.1.0.0/16"))
        );
        assert_eq!(values.get("ipam.operator.clusterPoolIPv6PodCIDRList"), None);
        assert_eq!(values.get("bpf"), None);
        assert_eq!(values.get("routingMode"), None);
        assert_eq!(values.get("devices"), None);
        assert_eq!(values.get("image.tag"), Some(&json!("v1.16.3")));
    }

    #[test]
    fn test_network_values_strict_and_ipv6_only() {
        let images = ImageRegistry::default();
        let internal = InternalConfig {
            direct_routing_device: Some("eth0".to_string()),
            vlan_bpf_bypass: vec![0, 10],
            ..Default::default()
        };
        let mut facts = facts("fd01::/108");
        facts.strict_mounts = Some(StrictMounts {
            bpf_root: "/sys/fs/bpf".to_string(),
            cgroup_root: "/sys/fs/cgroup".to_string(),
        });
        facts.ipv6_native_routing_cidr = Some("2001:db8::/64".to_string());
        facts.localhost = "::1";

        let values = network_values(&images, &ClusterConfig::default(), &internal, &facts);

        assert_eq!(values.get("bpf.autoMount.enabled"), Some(&json!(false)));
        assert_eq!(values.get("bpf.root"), Some(&json!("/sys/fs/bpf")));
        assert_eq!(values.get("bpf.vlanBypass"), Some(&json!([0, 10])));
        assert_eq!(values.get("cgroup.hostRoot"), Some(&json!("/sys/fs/cgroup")));
        assert_eq!(values.get("routingMode"), Some(&json!("native")));
        assert_eq!(values.get("ipv6NativeRoutingCIDR"), Some(&json!("2001:db8::/64")));
        assert_eq!(values.get("autoDirectNodeRoutes"), Some(&json!(true)));
        assert_eq!(values.get("nodePort.directRoutingDevice"), Some(&json!("eth0")));
        assert_eq!(values.get("k8sServiceHost"), Some(&json!("::1")));
    }

    #[test]
    fn test_ingress_disabled_profile_resets_everything() {
        let cfg = IngressConfig {
            enabled: Some(false),
            default_tls_secret: Some("my-cert".to_string()),
            enable_proxy_protocol: Some(true),
        };
        assert_eq!(
            ingress_values(&cfg, false).to_json(),
            json!({"ingressController": {
                "enabled": false,
                "loadbalancerMode": "",
                "defaultSecretNamespace": "",
                "defaultSecretName": "",
                "enableProxyProtocol": false,
            }})
        );
        assert_eq!(
            ingress_values(&cfg, true).get("ingressController.defaultSecretName"),
            Some(&json!("my-cert"))
        );
    }

    #[test]
    fn test_load_balancer_cr_values() {
        let cfg = LoadBalancerConfig {
            enabled: Some(true),
            cidrs: vec!["198.51.100.0/24".to_string()],
            ip_ranges: vec![IpRange {
                start: "203.0.113.10".to_string(),
                stop: "203.0.113.20".to_string(),
            }],
            l2_mode: Some(true),
            l2_interfaces: vec!["eth.*".to_string()],
            bgp_mode: Some(true),
            bgp_local_asn: Some(64512),
            bgp_peer_address: Some("10.0.0.1".to_string()),
            bgp_peer_asn: Some(64513),
            bgp_peer_port: Some(179),
        };

        let values = load_balancer_cr_values(&cfg).unwrap();
        assert_eq!(
            values.get("ipPool.cidrs"),
            Some(&json!([
                {"cidr": "198.51.100.0/24"},
                {"start": "203.0.113.10", "stop": "203.0.113.20"}
            ]))
        );
        assert_eq!(
            values.get("bgp.neighbors"),
            Some(&json!([{"peerAddress": "10.0.0.1", "peerASN": 64513, "peerPort": 179}]))
        );
        assert_eq!(values.get("l2.interfaces"), Some(&json!(["eth.*"])));
    }

    #[test]
    fn test_load_balancer_cr_values_peer_address_forms() {
        let mut cfg = LoadBalancerConfig {
            bgp_mode: Some(true),
            bgp_peer_address: Some(" 10.0.0.1/32 ".to_string()),
            bgp_peer_asn: Some(64513),
            ..Default::default()
        };
        let values = load_balancer_cr_values(&cfg).unwrap();
        assert_eq!(
            values.get("bgp.neighbors"),
            Some(&json!([{"peerAddress": "10.0.0.1/32", "peerASN": 64513, "peerPort": 0}]))
        );

        cfg.bgp_peer_address = None;
        let values = load_balancer_cr_values(&cfg).unwrap();
        assert_eq!(
            values.get("bgp.neighbors"),
            Some(&json!([{"peerAddress": "", "peerASN": 64513, "peerPort": 0}]))
        );
    }

    #[test]
    fn test_load_balancer_cr_values_rejects_bad_input() {
        let cfg = LoadBalancerConfig {
            cidrs: vec!["198.51.100.0/33".to_string()],
            ..Default::default()
        };
        assert!(matches!(
            load_balancer_cr_values(&cfg),
            Err(Error::InvalidCidr(_))
        ));

        let cfg = LoadBalancerConfig {
            bgp_mode: Some(true),
            bgp_peer_address: Some("not-an-ip".to_string()),
            ..Default::default()
        };
        assert!(matches!(load_balancer_cr_values(&cfg), Err(Error::InvalidIp(_))));

        let cfg = LoadBalancerConfig {
            ip_ranges: vec![IpRange {
                start: "10.0.0.1".to_string(),
                stop: "fd00::1".to_string(),
            }],
            ..Default::default()
        };
        assert!(matches!(
            load_balancer_cr_values(&cfg),
            Err(Error::ValidationError(_))
        ));
    }

    #[test]
    fn test_compose_base_overlays_follows_network() {
        let mut cfg = ClusterConfig::default();
        cfg.gateway.enabled = Some(true);
        cfg.ingress.enabled = Some(true);
        cfg.load_balancer.enabled = Some(true);

        let values = compose_base_overlays(&cfg);
        assert_eq!(values.get("gatewayAPI.enabled"), Some(&json!(true)));
        assert_eq!(values.get("ingressController.enabled"), Some(&json!(true)));
        assert_eq!(values.get("externalIPs.enabled"), Some(&json!(true)));

        cfg.network.enabled = Some(false);
        let values = compose_base_overlays(&cfg);
        assert_eq!(values.get("gatewayAPI.enabled"), Some(&json!(false)));
        assert_eq!(values.get("ingressController.enabled"), Some(&json!(false)));
        assert_eq!(values.get("externalIPs.enabled"), Some(&json!(false)));
    }

    #[test]
    fn test_dns_server_block() {
        let cfg = DnsConfig {
            service_ip: Some("10.152.183.10".to_string()),
            upstream_nameservers: vec!["1.1.1.1".to_string(), "8.8.8.8".to_string()],
            ..Default::default()
        };
        let values = dns_values(&ImageRegistry::default().coredns, &cfg);

        assert_eq!(values.get("service.clusterIP"), Some(&json!("10.152.183.10")));
        let plugins = &values.get("servers").unwrap()[0]["plugins"];
        assert_eq!(
            plugins[3]["parameters"],
            json!("cluster.local in-addr.arpa ip6.arpa")
        );
        assert_eq!(plugins[5]["parameters"], json!(". 1.1.1.1 8.8.8.8"));
    }
}
