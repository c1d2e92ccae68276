//! Tests for the network reconciler
//!
//! Covers the disable path, address family handling, strict confinement
//! mounts, the /sys propagation check and VXLAN port conflicts.

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    use crate::chart::{State, CILIUM};
    use crate::config::ClusterConfig;
    use crate::env::{MountPropagation, VxlanInterface, CNI_VXLAN_DEVICE};
    use crate::error::Error;
    use crate::features::internal::TUNNEL_PORT_ANNOTATION;
    use crate::features::test_support::Harness;

    fn network_config(pod_cidr: &str) -> ClusterConfig {
        let mut cfg = ClusterConfig::default();
        cfg.network.enabled = Some(true);
        cfg.network.pod_cidr = Some(pod_cidr.to_string());
        cfg
    }

    #[tokio::test]
    async fn test_disable_when_absent_is_safe() {
        let harness = Harness::new();
        let mut cfg = ClusterConfig::default();
        cfg.network.enabled = Some(false);

        let status = harness
            .engine()
            .apply_network(&CancellationToken::new(), &cfg)
            .await
            .unwrap();

        assert!(!status.enabled);
        assert_eq!(status.version, "");
        assert_eq!(status.message, "disabled");

        let calls = harness.charts.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].chart, CILIUM);
        assert_eq!(calls[0].state, State::Deleted);
    }

    #[tokio::test]
    async fn test_disable_failure_keeps_deploy_template() {
        let harness = Harness::new();
        harness.charts.fail(&CILIUM, "connection refused");
        let mut cfg = ClusterConfig::default();
        cfg.network.enabled = Some(false);

        let err = harness
            .engine()
            .apply_network(&CancellationToken::new(), &cfg)
            .await
            .unwrap_err();

        assert!(!err.status.enabled);
        assert_eq!(
            err.status.message,
            "Failed to deploy Cilium Network, the error was: failed to uninstall network: chart kube-system/cilium: connection refused"
        );
    }

    #[tokio::test]
    async fn test_dual_stack_under_strict_confinement() {
        let mut harness = Harness::new();
        harness.env.strict = true;
        harness.env.bpf_path = Some("/var/snap/bpf".to_string());
        harness.env.sys_propagation = Some(MountPropagation::Private);

        let status = harness
            .engine()
            .apply_network(
                &CancellationToken::new(),
                &network_config("192.0.2.0/24,2001:db8::/32"),
            )
            .await
            .unwrap();

        assert!(status.enabled);
        assert_eq!(status.version, "v1.16.3");
        assert_eq!(status.message, "enabled");

        let calls = harness.charts.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].state, State::Present);
        let values = calls[0].values.as_ref().unwrap();
        assert_eq!(values.get("ipv4.enabled"), Some(&json!(true)));
        assert_eq!(values.get("ipv6.enabled"), Some(&json!(true)));
        assert_eq!(values.get("bpf.root"), Some(&json!("/var/snap/bpf")));
        assert_eq!(values.get("cgroup.autoMount.enabled"), Some(&json!(false)));
        // Not IPv6-only, so no native routing
        assert_eq!(values.get("routingMode"), None);
    }

    #[tokio::test]
    async fn test_strict_without_bpf_mount_aborts_before_apply() {
        let mut harness = Harness::new();
        harness.env.strict = true;
        harness.env.bpf_path = None;

        let err = harness
            .engine()
            .apply_network(&CancellationToken::new(), &network_config("10.1.0.0/16"))
            .await
            .unwrap_err();

        assert!(err
            .status
            .message
            .contains("failed to get bpf mount path"));
        assert!(harness.charts.calls().is_empty());
    }

    #[tokio::test]
    async fn test_single_family_cidrs() {
        for (cidr, v4, v6) in [("10.1.0.0/16", true, false), ("fd01::/108", false, true)] {
            let harness = Harness::new();
            harness
                .engine()
                .apply_network(&CancellationToken::new(), &network_config(cidr))
                .await
                .unwrap();

            let values = harness.charts.calls()[0].values.clone().unwrap();
            assert_eq!(values.get("ipv4.enabled"), Some(&json!(v4)), "{cidr}");
            assert_eq!(values.get("ipv6.enabled"), Some(&json!(v6)), "{cidr}");
        }
    }

    #[tokio::test]
    async fn test_ipv6_only_uses_native_routing() {
        let harness = Harness::new();
        harness
            .engine()
            .apply_network(&CancellationToken::new(), &network_config("fd01::/108"))
            .await
            .unwrap();

        let values = harness.charts.calls()[0].values.clone().unwrap();
        assert_eq!(values.get("routingMode"), Some(&json!("native")));
        assert_eq!(values.get("ipv6NativeRoutingCIDR"), Some(&json!("2001:db8::/64")));
        assert_eq!(values.get("autoDirectNodeRoutes"), Some(&json!(true)));
    }

    #[tokio::test]
    async fn test_invalid_pod_cidr() {
        let harness = Harness::new();
        let err = harness
            .engine()
            .apply_network(&CancellationToken::new(), &network_config("10.1.0.0/16,10.2.0.0/16"))
            .await
            .unwrap_err();

        assert_eq!(err.source.kind(), "input");
        assert!(harness.charts.calls().is_empty());
    }

    #[tokio::test]
    async fn test_private_sys_mount() {
        let mut harness = Harness::new();
        harness.env.sys_propagation = Some(MountPropagation::Private);

        let err = harness
            .engine()
            .apply_network(&CancellationToken::new(), &network_config("10.1.0.0/16"))
            .await
            .unwrap_err();
        assert_eq!(
            err.status.message,
            "Failed to deploy Cilium Network, the error was: /sys is not a shared mount"
        );

        harness.env.lxd = true;
        let err = harness
            .engine()
            .apply_network(&CancellationToken::new(), &network_config("10.1.0.0/16"))
            .await
            .unwrap_err();
        assert!(err
            .status
            .message
            .ends_with("updating LXD on the host to version 5.0.2 or newer"));
        assert!(harness.charts.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unresolved_sys_mount_aborts_before_apply() {
        let mut harness = Harness::new();
        harness.env.sys_propagation = None;

        let err = harness
            .engine()
            .apply_network(&CancellationToken::new(), &network_config("10.1.0.0/16"))
            .await
            .unwrap_err();
        assert_eq!(
            err.status.message,
            "Failed to deploy Cilium Network, the error was: failed to get mount propagation type for /sys: no mount found for /sys"
        );
        assert_eq!(err.source.kind(), "environment");
        assert!(harness.charts.calls().is_empty());
    }

    #[tokio::test]
    async fn test_slave_sys_mount_is_accepted() {
        let mut harness = Harness::new();
        harness.env.sys_propagation = Some(MountPropagation::Slave);

        let status = harness
            .engine()
            .apply_network(&CancellationToken::new(), &network_config("10.1.0.0/16"))
            .await
            .unwrap();
        assert!(status.enabled);
    }

    #[tokio::test]
    async fn test_vxlan_port_conflict_fails_before_apply() {
        let mut harness = Harness::new();
        harness.env.vxlan = vec![VxlanInterface {
            name: "vxlan0".to_string(),
            port: 8473,
        }];
        let mut cfg = network_config("10.1.0.0/16");
        cfg.annotations.insert(TUNNEL_PORT_ANNOTATION, "8473");

        let err = harness
            .engine()
            .apply_network(&CancellationToken::new(), &cfg)
            .await
            .unwrap_err();

        assert!(matches!(
            &err.source,
            Error::Step { source, .. } if matches!(**source, Error::VxlanPortInUse { port: 8473, .. })
        ));
        assert!(harness.charts.calls().is_empty());
    }

    #[tokio::test]
    async fn test_own_vxlan_device_on_other_port() {
        let mut harness = Harness::new();
        harness.env.vxlan = vec![VxlanInterface {
            name: CNI_VXLAN_DEVICE.to_string(),
            port: 8472,
        }];
        let mut cfg = network_config("10.1.0.0/16");
        cfg.annotations.insert(TUNNEL_PORT_ANNOTATION, "8473");

        let err = harness
            .engine()
            .apply_network(&CancellationToken::new(), &cfg)
            .await
            .unwrap_err();

        assert!(err
            .status
            .message
            .contains("cilium_vxlan interface already exists with port 8472"));
        assert!(harness.charts.calls().is_empty());
    }

    #[tokio::test]
    async fn test_network_values_carry_overlays() {
        let harness = Harness::new();
        let mut cfg = network_config("10.1.0.0/16");
        cfg.ingress.enabled = Some(true);
        cfg.ingress.default_tls_secret = Some("wildcard".to_string());

        harness
            .engine()
            .apply_network(&CancellationToken::new(), &cfg)
            .await
            .unwrap();

        let values = harness.charts.calls()[0].values.clone().unwrap();
        assert_eq!(values.get("ingressController.enabled"), Some(&json!(true)));
        assert_eq!(
            values.get("ingressController.defaultSecretName"),
            Some(&json!("wildcard"))
        );
        assert_eq!(values.get("gatewayAPI.enabled"), Some(&json!(false)));
    }

    #[tokio::test]
    async fn test_cancelled_before_apply() {
        let harness = Harness::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = harness
            .engine()
            .apply_network(&cancel, &network_config("10.1.0.0/16"))
            .await
            .unwrap_err();

        assert!(matches!(err.source, Error::Cancelled));
        assert!(harness.charts.calls().is_empty());
    }
}
