//! Domain resolution scenarios: a solver pod's domain must land on exactly
//! the Gateway whose VirtualServices declare that domain, with no suffix
//! matching across tenants sharing a base domain.

use operator::domains::{domains_for_gateway_in, matches_domain};
use operator::istio::{Gateway, GatewaySpec, VirtualService, VirtualServiceSpec};
use operator::labels::challenge_vs_name;

fn gateway(ns: &str, name: &str) -> Gateway {
    let mut gw = Gateway::new(name, GatewaySpec::default());
    gw.metadata.namespace = Some(ns.into());
    gw
}

fn vs(ns: &str, name: &str, hosts: &[&str], gateways: &[&str]) -> VirtualService {
    let mut vs = VirtualService::new(
        name,
        VirtualServiceSpec {
            hosts: hosts.iter().map(|h| h.to_string()).collect(),
            gateways: gateways.iter().map(|g| g.to_string()).collect(),
            http: vec![],
        },
    );
    vs.metadata.namespace = Some(ns.into());
    vs
}

#[test]
fn solver_domain_resolves_to_the_declaring_gateway_only() {
    // Two Gateways, each serving one domain through its VirtualService
    let g1 = gateway("tenant-a", "gw");
    let g2 = gateway("tenant-b", "gw");
    let vss = vec![
        vs("tenant-a", "routes-a", &["a.example.com"], &["tenant-a/gw"]),
        vs("tenant-b", "routes-b", &["b.example.com"], &["tenant-b/gw"]),
    ];

    let g1_domains = domains_for_gateway_in(&vss, &g1);
    let g2_domains = domains_for_gateway_in(&vss, &g2);
    assert_eq!(g1_domains, vec!["a.example.com"]);
    assert_eq!(g2_domains, vec!["b.example.com"]);

    assert!(matches_domain(&g1_domains, "a.example.com"));
    assert!(!matches_domain(&g2_domains, "a.example.com"));
}

#[test]
fn shared_base_domains_never_cross_match() {
    let domains = vec!["app-alpha.example.com".to_string()];
    assert!(!matches_domain(&domains, "app-gamma.example.com"));
    assert!(!matches_domain(&domains, "example.com"));
}

#[test]
fn literal_wildcard_gateway_catches_everything() {
    let g = gateway("edge", "catchall");
    let vss = vec![vs("edge", "wild", &["*"], &["catchall"])];
    let domains = domains_for_gateway_in(&vss, &g);
    assert!(matches_domain(&domains, "whatever.example.com"));
}

#[test]
fn challenge_routes_do_not_feed_the_index() {
    // The operator's own challenge route must never make a Gateway look
    // responsible for the challenged domain
    let g = gateway("app", "gw");
    let challenge = vs(
        "app",
        &challenge_vs_name("a.example.com"),
        &["a.example.com"],
        &["gw"],
    );
    let vss = vec![challenge];
    assert!(domains_for_gateway_in(&vss, &g).is_empty());
}

#[test]
fn bare_and_qualified_gateway_references_both_bind() {
    let g = gateway("app", "gw");
    let vss = vec![
        vs("app", "bare", &["a.example.com"], &["gw"]),
        vs("app", "qualified", &["b.example.com"], &["app/gw"]),
    ];
    assert_eq!(
        domains_for_gateway_in(&vss, &g),
        vec!["a.example.com", "b.example.com"]
    );
}
