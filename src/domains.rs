//! The authoritative domain↔Gateway index, derived on demand from
//! VirtualServices. A Gateway's `hosts` field is not consulted: it carries
//! mesh-internal names, while the VirtualServices bound to the Gateway carry
//! the externally routable domains.
//!
//! Matching is exact. Suffix and partial matches are rejected because
//! tenant clusters routinely share a base domain; the only wildcard honored
//! is a VirtualService host of literal `*`.

use std::collections::BTreeSet;

use kube::api::ListParams;
use kube::{Api, Client, ResourceExt};
use tracing::*;

use crate::istio::{Gateway, VirtualService};
use crate::labels::{
    HTTP01_SOLVER_LABEL, HTTP01_SOLVER_LABEL_VALUE, MANAGED_BY_LABEL, MANAGED_BY_VALUE,
};
use crate::{Error, Result};

/// The `namespace/name` form a VirtualService may use to reference a Gateway.
pub fn gateway_ref(namespace: &str, name: &str) -> String {
    format!("{namespace}/{name}")
}

/// VirtualServices created by this operator or by cert-manager's solver are
/// excluded from the index so challenge routes never feed back into it.
pub fn is_operator_managed_vs(vs: &VirtualService) -> bool {
    let labeled = vs
        .metadata
        .labels
        .as_ref()
        .map(|labels| {
            labels.get(MANAGED_BY_LABEL).map(String::as_str) == Some(MANAGED_BY_VALUE)
                || labels.get(HTTP01_SOLVER_LABEL).map(String::as_str)
                    == Some(HTTP01_SOLVER_LABEL_VALUE)
        })
        .unwrap_or(false);
    let name = vs.name_any();
    labeled || name.contains("http01-solver") || name.contains("acme-solver")
}

/// True when the VirtualService binds to the Gateway by bare name or
/// `namespace/name`.
pub fn vs_targets_gateway(vs: &VirtualService, gateway_ns: &str, gateway_name: &str) -> bool {
    let qualified = gateway_ref(gateway_ns, gateway_name);
    vs.spec
        .gateways
        .iter()
        .any(|gw| gw == gateway_name || *gw == qualified)
}

/// Domains the Gateway serves, derived from a VirtualService listing:
/// sorted, de-duplicated union of hosts over every non-operator VS bound to
/// the Gateway.
pub fn domains_for_gateway_in(virtual_services: &[VirtualService], gateway: &Gateway) -> Vec<String> {
    let gateway_ns = gateway.namespace().unwrap_or_default();
    let gateway_name = gateway.name_any();
    let mut domains = BTreeSet::new();
    for vs in virtual_services {
        if is_operator_managed_vs(vs) {
            continue;
        }
        if vs_targets_gateway(vs, &gateway_ns, &gateway_name) {
            domains.extend(vs.spec.hosts.iter().cloned());
        }
    }
    domains.into_iter().collect()
}

/// Exact match, or a Gateway-declared host of literal `*`.
pub fn matches_domain(gateway_domains: &[String], domain: &str) -> bool {
    gateway_domains.iter().any(|d| d == domain || d == "*")
}

/// Domains the Gateway serves, listing VirtualServices cluster-wide.
pub async fn domains_for_gateway(client: Client, gateway: &Gateway) -> Result<Vec<String>> {
    let api_vs: Api<VirtualService> = Api::all(client);
    let vss = api_vs
        .list(&ListParams::default())
        .await
        .map_err(Error::KubeError)?;
    Ok(domains_for_gateway_in(&vss.items, gateway))
}

/// Resolve the Gateway responsible for a domain through the index.
/// Returns None when no Gateway's domain set contains the domain.
pub async fn find_gateway_for_domain(client: Client, domain: &str) -> Result<Option<Gateway>> {
    let api_gw: Api<Gateway> = Api::all(client.clone());
    let gateways = api_gw
        .list(&ListParams::default())
        .await
        .map_err(Error::KubeError)?;
    let api_vs: Api<VirtualService> = Api::all(client);
    let vss = api_vs
        .list(&ListParams::default())
        .await
        .map_err(Error::KubeError)?;

    debug!(
        domain,
        gateway_count = gateways.items.len(),
        "Determining Gateway for domain"
    );

    for gateway in gateways.items {
        let domains = domains_for_gateway_in(&vss.items, &gateway);
        if matches_domain(&domains, domain) {
            info!(
                domain,
                gateway = %gateway.name_any(),
                gateway_namespace = %gateway.namespace().unwrap_or_default(),
                "Gateway found via VirtualService domain match"
            );
            return Ok(Some(gateway));
        }
    }

    info!(domain, "No Gateway found for domain");
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::istio::{GatewaySpec, VirtualServiceSpec};

    fn gateway(ns: &str, name: &str) -> Gateway {
        let mut gw = Gateway::new(name, GatewaySpec::default());
        gw.metadata.namespace = Some(ns.into());
        gw
    }

    fn vs(name: &str, hosts: &[&str], gateways: &[&str]) -> VirtualService {
        let mut vs = VirtualService::new(
            name,
            VirtualServiceSpec {
                hosts: hosts.iter().map(|h| h.to_string()).collect(),
                gateways: gateways.iter().map(|g| g.to_string()).collect(),
                http: vec![],
            },
        );
        vs.metadata.namespace = Some("app".into());
        vs
    }

    #[test]
    fn domains_union_is_sorted_and_deduplicated() {
        let gw = gateway("app", "gw");
        let vss = vec![
            vs("v1", &["b.example.com", "a.example.com"], &["gw"]),
            vs("v2", &["a.example.com", "c.example.com"], &["app/gw"]),
        ];
        assert_eq!(
            domains_for_gateway_in(&vss, &gw),
            vec!["a.example.com", "b.example.com", "c.example.com"]
        );
    }

    #[test]
    fn unrelated_gateways_contribute_nothing() {
        let gw = gateway("app", "gw");
        let vss = vec![
            vs("v1", &["a.example.com"], &["other-gw"]),
            vs("v2", &["b.example.com"], &["other-ns/gw"]),
        ];
        assert!(domains_for_gateway_in(&vss, &gw).is_empty());
    }

    #[test]
    fn solver_virtualservices_are_excluded() {
        let gw = gateway("app", "gw");

        let mut labeled = vs("routes", &["managed.example.com"], &["gw"]);
        labeled.metadata.labels = Some(
            [(MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string())]
                .into_iter()
                .collect(),
        );
        let mut solver_labeled = vs("other", &["solver.example.com"], &["gw"]);
        solver_labeled.metadata.labels = Some(
            [(
                HTTP01_SOLVER_LABEL.to_string(),
                HTTP01_SOLVER_LABEL_VALUE.to_string(),
            )]
            .into_iter()
            .collect(),
        );
        let by_name = vs("http01-solver-a-example-com", &["a.example.com"], &["gw"]);
        let by_name2 = vs("legacy-acme-solver-route", &["b.example.com"], &["gw"]);
        let genuine = vs("site", &["site.example.com"], &["gw"]);

        let vss = vec![labeled, solver_labeled, by_name, by_name2, genuine];
        assert_eq!(domains_for_gateway_in(&vss, &gw), vec!["site.example.com"]);
    }

    #[test]
    fn domain_match_is_exact_only() {
        // A shared base domain must not cause cross-tenant matches
        let domains = vec!["app-alpha.example.com".to_string()];
        assert!(!matches_domain(&domains, "app-gamma.example.com"));
        assert!(!matches_domain(&domains, "example.com"));
        assert!(!matches_domain(&domains, "alpha.example.com"));
        assert!(matches_domain(&domains, "app-alpha.example.com"));
    }

    #[test]
    fn literal_wildcard_matches_any_domain() {
        let domains = vec!["*".to_string()];
        assert!(matches_domain(&domains, "anything.example.com"));
        // but *.example.com is not a supported wildcard form
        let scoped = vec!["*.example.com".to_string()];
        assert!(!matches_domain(&scoped, "a.example.com"));
    }

    #[test]
    fn empty_metadata_name_treated_as_foreign() {
        let plain = vs("site", &["site.example.com"], &["gw"]);
        assert!(!is_operator_managed_vs(&plain));
    }
}
