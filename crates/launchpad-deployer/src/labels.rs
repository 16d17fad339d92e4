// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Translation of plan resources and routing intent into runtime constraints
//! and reverse-proxy labels.
//!
//! Everything here is pure. The label keys are a compatibility surface with
//! the reverse proxy:
//!
//! | Key | Present |
//! |-----|---------|
//! | `proxy.enable` | always |
//! | `proxy.http.routers.<name>.rule` / `.entrypoints` | always |
//! | `proxy.http.routers.<name>.tls` / `.tls.certresolver` | public hosts |
//! | `proxy.http.routers.<name>-http.rule` / `.entrypoints` / `.middlewares` | public hosts |
//! | `proxy.http.middlewares.<name>-redirect.redirectscheme.*` | public hosts |
//! | `proxy.http.services.<name>.loadbalancer.server.port` | always |
//! | `proxy.http.services.<name>.loadbalancer.healthcheck.*` | always |
//! | `proxy.docker.network` | always |
//! | `app.id`, `app.subdomain`, `app.routing-mode` | always |
//!
//! `<name>` is `app-<appID>`.

use std::collections::BTreeMap;

use crate::types::{ResourceLimits, RoutingMode};

/// Label carrying the owning application ID. Used for discovery.
pub const APP_ID_LABEL: &str = "app.id";
/// Label carrying the routed hostname.
pub const APP_SUBDOMAIN_LABEL: &str = "app.subdomain";
/// Label carrying the routing mode.
pub const APP_ROUTING_MODE_LABEL: &str = "app.routing-mode";
/// Proxy enable flag.
pub const PROXY_ENABLE_LABEL: &str = "proxy.enable";
/// Proxy network label.
pub const PROXY_NETWORK_LABEL: &str = "proxy.docker.network";

const HEALTHCHECK_PATH: &str = "/";
const HEALTHCHECK_INTERVAL: &str = "10s";
const HEALTHCHECK_TIMEOUT: &str = "5s";
const HTTP_ENTRYPOINT: &str = "web";
const HTTPS_ENTRYPOINT: &str = "websecure";
const LOCAL_SUFFIXES: [&str; 2] = [".local", ".localhost"];

const BYTES_PER_MB: i64 = 1024 * 1024;
const NANO_CPUS_PER_CORE: f64 = 1e9;

/// Runtime-level resource constraints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeLimits {
    /// Memory limit in bytes.
    pub memory_bytes: i64,
    /// Memory + swap limit in bytes. Always equal to `memory_bytes`.
    pub memory_swap_bytes: i64,
    /// CPU quota in nano-CPUs.
    pub nano_cpus: i64,
}

/// Convert plan limits to runtime limits. Inputs are validated by the caller.
pub fn to_runtime_limits(limits: &ResourceLimits) -> RuntimeLimits {
    let memory_bytes = (limits.memory_mb as i64).saturating_mul(BYTES_PER_MB);
    RuntimeLimits {
        memory_bytes,
        memory_swap_bytes: memory_bytes,
        nano_cpus: (limits.cpu * NANO_CPUS_PER_CORE) as i64,
    }
}

/// Routing intent for one application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingConfig {
    /// Application ID.
    pub app_id: String,
    /// Hostname routed to the application.
    pub subdomain: String,
    /// Container port behind the proxy.
    pub port: u16,
    /// Shared network the proxy reaches containers on.
    pub network: String,
    /// Certificate resolver for TLS routers.
    pub cert_resolver: String,
    /// Routing mode tag.
    pub mode: RoutingMode,
}

impl RoutingConfig {
    /// Router and service name.
    pub fn router_name(&self) -> String {
        router_name(&self.app_id)
    }

    /// Whether the hostname is a local development host (no TLS).
    pub fn is_local(&self) -> bool {
        is_local_host(&self.subdomain)
    }
}

/// Router and service name for an application.
pub fn router_name(app_id: &str) -> String {
    format!("app-{app_id}")
}

/// Redirect middleware name for an application.
pub fn redirect_middleware_name(app_id: &str) -> String {
    format!("app-{app_id}-redirect")
}

/// Label selector matching every container tagged for `app_id`.
pub fn app_selector(app_id: &str) -> String {
    format!("{APP_ID_LABEL}={app_id}")
}

/// Label holding a router's rule.
pub fn router_rule_label(router: &str) -> String {
    format!("proxy.http.routers.{router}.rule")
}

/// Label holding a service's backend port.
pub fn service_port_label(service: &str) -> String {
    format!("proxy.http.services.{service}.loadbalancer.server.port")
}

fn is_local_host(host: &str) -> bool {
    let host = host.to_ascii_lowercase();
    LOCAL_SUFFIXES.iter().any(|suffix| host.ends_with(suffix))
}

/// Builder for proxy label sets.
#[derive(Debug, Default)]
pub struct RoutingLabels {
    labels: BTreeMap<String, String>,
}

impl RoutingLabels {
    /// Create an empty label set.
    pub fn new() -> Self {
        Self::default()
    }

    fn set(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Add a router.
    pub fn router(
        self,
        name: &str,
        rule: &str,
        entrypoint: &str,
        middleware: Option<&str>,
        cert_resolver: Option<&str>,
    ) -> Self {
        let prefix = format!("proxy.http.routers.{name}");
        let mut this = self
            .set(router_rule_label(name), rule)
            .set(format!("{prefix}.entrypoints"), entrypoint);
        if let Some(middleware) = middleware {
            this = this.set(format!("{prefix}.middlewares"), middleware);
        }
        if let Some(resolver) = cert_resolver {
            this = this
                .set(format!("{prefix}.tls"), "true")
                .set(format!("{prefix}.tls.certresolver"), resolver);
        }
        this
    }

    /// Add a permanent redirect-to-https middleware.
    pub fn https_redirect(self, name: &str) -> Self {
        let prefix = format!("proxy.http.middlewares.{name}.redirectscheme");
        self.set(format!("{prefix}.scheme"), "https")
            .set(format!("{prefix}.permanent"), "true")
    }

    /// Add a load-balanced service with a proxy health check.
    pub fn service(self, name: &str, port: u16) -> Self {
        let prefix = format!("proxy.http.services.{name}.loadbalancer");
        self.set(service_port_label(name), port.to_string())
            .set(format!("{prefix}.healthcheck.path"), HEALTHCHECK_PATH)
            .set(format!("{prefix}.healthcheck.interval"), HEALTHCHECK_INTERVAL)
            .set(format!("{prefix}.healthcheck.timeout"), HEALTHCHECK_TIMEOUT)
    }

    /// Add the identifying tags and network.
    pub fn identity(self, cfg: &RoutingConfig) -> Self {
        self.set(PROXY_ENABLE_LABEL, "true")
            .set(PROXY_NETWORK_LABEL, cfg.network.as_str())
            .set(APP_ID_LABEL, cfg.app_id.as_str())
            .set(APP_SUBDOMAIN_LABEL, cfg.subdomain.as_str())
            .set(APP_ROUTING_MODE_LABEL, cfg.mode.as_str())
    }

    /// Finish the label set.
    pub fn build(self) -> BTreeMap<String, String> {
        self.labels
    }
}

/// Generate the full proxy label set for an application.
pub fn to_routing_labels(cfg: &RoutingConfig) -> BTreeMap<String, String> {
    let name = cfg.router_name();
    let rule = format!("Host(`{}`)", cfg.subdomain);

    let labels = RoutingLabels::new().identity(cfg).service(&name, cfg.port);

    if cfg.is_local() {
        return labels
            .router(&name, &rule, HTTP_ENTRYPOINT, None, None)
            .build();
    }

    let redirect = redirect_middleware_name(&cfg.app_id);
    labels
        .router(
            &format!("{name}-http"),
            &rule,
            HTTP_ENTRYPOINT,
            Some(&redirect),
            None,
        )
        .router(
            &name,
            &rule,
            HTTPS_ENTRYPOINT,
            None,
            Some(&cfg.cert_resolver),
        )
        .https_redirect(&redirect)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_suffix_detection() {
        assert!(is_local_host("myapp.local"));
        assert!(is_local_host("myapp.localhost"));
        assert!(is_local_host("MyApp.LOCALHOST"));
        assert!(!is_local_host("myapp.example.com"));
        assert!(!is_local_host("localhost.example.com"));
    }

    #[test]
    fn test_names() {
        assert_eq!(router_name("a1"), "app-a1");
        assert_eq!(redirect_middleware_name("a1"), "app-a1-redirect");
        assert_eq!(app_selector("a1"), "app.id=a1");
    }
}
