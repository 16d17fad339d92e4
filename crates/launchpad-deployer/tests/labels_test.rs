// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tests for resource and routing label translation.

use launchpad_deployer::labels::{
    self, RoutingConfig, RoutingLabels, to_routing_labels, to_runtime_limits,
};
use launchpad_deployer::types::{ResourceLimits, RoutingMode};

fn routing(subdomain: &str) -> RoutingConfig {
    RoutingConfig {
        app_id: "a1".to_string(),
        subdomain: subdomain.to_string(),
        port: 8080,
        network: "launchpad".to_string(),
        cert_resolver: "letsencrypt".to_string(),
        mode: RoutingMode::Single,
    }
}

fn count_matching(labels: &std::collections::BTreeMap<String, String>, f: impl Fn(&str) -> bool) -> usize {
    labels.keys().filter(|k| f(k)).count()
}

// ============================================================================
// Runtime limits
// ============================================================================

#[test]
fn test_runtime_limits_conversion() {
    let limits = to_runtime_limits(&ResourceLimits {
        memory_mb: 256,
        cpu: 0.5,
    });

    assert_eq!(limits.memory_bytes, 256 * 1024 * 1024);
    assert_eq!(limits.memory_swap_bytes, limits.memory_bytes);
    assert_eq!(limits.nano_cpus, 500_000_000);
}

#[test]
fn test_runtime_limits_swap_pinned_for_many_inputs() {
    for memory_mb in [0u64, 1, 128, 512, 2048, 16384] {
        for cpu in [0.0, 0.25, 1.0, 2.5] {
            let input = ResourceLimits { memory_mb, cpu };
            let first = to_runtime_limits(&input);
            let second = to_runtime_limits(&input);

            assert_eq!(first, second);
            assert_eq!(first.memory_swap_bytes, first.memory_bytes);
            assert_eq!(first.memory_bytes, memory_mb as i64 * 1024 * 1024);
        }
    }
}

// ============================================================================
// Routing labels
// ============================================================================

#[test]
fn test_public_host_labels() {
    let labels = to_routing_labels(&routing("a1.example.com"));

    assert_eq!(labels["proxy.enable"], "true");
    assert_eq!(labels["proxy.docker.network"], "launchpad");
    assert_eq!(labels["app.id"], "a1");
    assert_eq!(labels["app.subdomain"], "a1.example.com");

    assert_eq!(labels["proxy.http.routers.app-a1.rule"], "Host(`a1.example.com`)");
    assert_eq!(labels["proxy.http.routers.app-a1.entrypoints"], "websecure");
    assert_eq!(labels["proxy.http.routers.app-a1.tls"], "true");
    assert_eq!(labels["proxy.http.routers.app-a1.tls.certresolver"], "letsencrypt");

    assert_eq!(labels["proxy.http.routers.app-a1-http.rule"], "Host(`a1.example.com`)");
    assert_eq!(labels["proxy.http.routers.app-a1-http.entrypoints"], "web");
    assert_eq!(labels["proxy.http.routers.app-a1-http.middlewares"], "app-a1-redirect");

    assert_eq!(
        labels["proxy.http.middlewares.app-a1-redirect.redirectscheme.scheme"],
        "https"
    );
    assert_eq!(
        labels["proxy.http.middlewares.app-a1-redirect.redirectscheme.permanent"],
        "true"
    );

    assert_eq!(labels["proxy.http.services.app-a1.loadbalancer.server.port"], "8080");
    assert_eq!(labels["proxy.http.services.app-a1.loadbalancer.healthcheck.path"], "/");
    assert_eq!(labels["proxy.http.services.app-a1.loadbalancer.healthcheck.interval"], "10s");
    assert_eq!(labels["proxy.http.services.app-a1.loadbalancer.healthcheck.timeout"], "5s");
}

#[test]
fn test_public_host_has_one_of_each_router_and_middleware() {
    let labels = to_routing_labels(&routing("a1.example.com"));

    let rules = count_matching(&labels, |k| k.starts_with("proxy.http.routers.") && k.ends_with(".rule"));
    let tls_routers = count_matching(&labels, |k| k.ends_with(".tls"));
    let redirect_routers = count_matching(&labels, |k| k.ends_with(".middlewares"));
    let middlewares = count_matching(&labels, |k| {
        k.starts_with("proxy.http.middlewares.") && k.ends_with(".redirectscheme.scheme")
    });

    assert_eq!(rules, 2);
    assert_eq!(tls_routers, 1);
    assert_eq!(redirect_routers, 1);
    assert_eq!(middlewares, 1);
}

#[test]
fn test_local_hosts_have_no_tls() {
    for host in ["a1.local", "a1.localhost", "A1.LOCALHOST"] {
        let labels = to_routing_labels(&routing(host));

        assert!(
            labels.keys().all(|k| !k.contains(".tls")),
            "unexpected TLS key for {host}"
        );
        assert!(labels.keys().all(|k| !k.contains("middlewares")));
        assert_eq!(labels["proxy.http.routers.app-a1.entrypoints"], "web");
        assert_eq!(labels["proxy.enable"], "true");
        assert_eq!(labels["app.id"], "a1");
    }
}

#[test]
fn test_labels_are_deterministic() {
    let cfg = routing("a1.example.com");
    assert_eq!(to_routing_labels(&cfg), to_routing_labels(&cfg.clone()));
}

#[test]
fn test_routing_mode_only_changes_tag() {
    let single = to_routing_labels(&routing("a1.example.com"));
    let mut compose_cfg = routing("a1.example.com");
    compose_cfg.mode = RoutingMode::Compose;
    let compose = to_routing_labels(&compose_cfg);

    assert_eq!(single["app.routing-mode"], "single");
    assert_eq!(compose["app.routing-mode"], "compose");

    let strip = |mut m: std::collections::BTreeMap<String, String>| {
        m.remove(labels::APP_ROUTING_MODE_LABEL);
        m
    };
    assert_eq!(strip(single), strip(compose));
}

#[test]
fn test_builder_composes_fragments() {
    let labels = RoutingLabels::new()
        .router("r", "Host(`x`)", "web", None, None)
        .service("r", 3000)
        .build();

    assert_eq!(labels[&labels::router_rule_label("r")], "Host(`x`)");
    assert_eq!(labels[&labels::service_port_label("r")], "3000");
    assert!(!labels.contains_key("proxy.enable"));
}
