use super::*;
use crate::istio::GatewaySpec;
use k8s_openapi::api::core::v1::{ServicePort, ServiceSpec};
use kube::core::ObjectMeta;
use std::collections::BTreeMap;

fn pod(ns: &str) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some("cm-acme-http-solver-x1".into()),
            namespace: Some(ns.into()),
            uid: Some("pod-uid-1".into()),
            ..ObjectMeta::default()
        },
        ..Pod::default()
    }
}

fn service(ns: &str, port: Option<i32>) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some("cm-acme-http-solver-svc".into()),
            namespace: Some(ns.into()),
            ..ObjectMeta::default()
        },
        spec: Some(ServiceSpec {
            ports: port.map(|p| {
                vec![ServicePort {
                    port: p,
                    ..ServicePort::default()
                }]
            }),
            ..ServiceSpec::default()
        }),
        ..Service::default()
    }
}

fn gateway(ns: &str) -> Gateway {
    let mut gw = Gateway::new("gw", GatewaySpec::default());
    gw.metadata.namespace = Some(ns.into());
    gw
}

#[test]
fn desired_vs_routes_the_challenge_prefix_to_the_solver() {
    let vs = desired_challenge_vs(
        &pod("istio-system"),
        &service("istio-system", Some(8089)),
        &gateway("app"),
        "a.example.com",
    );

    assert_eq!(vs.name_any(), "http01-solver-a-example-com");
    assert_eq!(vs.namespace().as_deref(), Some("app"));
    assert_eq!(vs.spec.hosts, vec!["a.example.com"]);
    assert_eq!(vs.spec.gateways, vec!["app/gw"]);

    let route = &vs.spec.http[0];
    let uri = route.match_.as_ref().unwrap()[0].uri.as_ref().unwrap();
    assert_eq!(uri.prefix.as_deref(), Some("/.well-known/acme-challenge/"));
    let destination = route.route[0].destination.as_ref().unwrap();
    assert_eq!(
        destination.host,
        "cm-acme-http-solver-svc.istio-system.svc.cluster.local"
    );
    assert_eq!(destination.port.as_ref().unwrap().number, 8089);
}

#[test]
fn desired_vs_is_labeled_for_gc() {
    let vs = desired_challenge_vs(
        &pod("istio-system"),
        &service("istio-system", Some(8089)),
        &gateway("app"),
        "a.example.com",
    );
    let labels = vs.metadata.labels.as_ref().unwrap();
    assert_eq!(
        labels.get("app.kubernetes.io/managed-by").map(String::as_str),
        Some("istio-http01")
    );
    assert_eq!(
        labels
            .get("acme.cert-manager.io/solver-pod")
            .map(String::as_str),
        Some("cm-acme-http-solver-x1")
    );
    assert_eq!(
        labels
            .get("acme.cert-manager.io/solver-service")
            .map(String::as_str),
        Some("cm-acme-http-solver-svc")
    );
}

#[test]
fn cross_namespace_pods_get_no_owner_reference() {
    let vs = desired_challenge_vs(
        &pod("istio-system"),
        &service("istio-system", Some(8089)),
        &gateway("app"),
        "a.example.com",
    );
    assert!(vs.metadata.owner_references.is_none());
}

#[test]
fn same_namespace_pod_owns_the_vs() {
    let vs = desired_challenge_vs(
        &pod("app"),
        &service("app", Some(8089)),
        &gateway("app"),
        "a.example.com",
    );
    // Bare gateway reference within the shared namespace
    assert_eq!(vs.spec.gateways, vec!["gw"]);
    let owners = vs.metadata.owner_references.as_ref().unwrap();
    assert_eq!(owners[0].kind, "Pod");
    assert_eq!(owners[0].name, "cm-acme-http-solver-x1");
    assert_eq!(owners[0].controller, Some(true));
}

#[test]
fn solver_port_defaults_when_service_has_none() {
    assert_eq!(solver_port(&service("ns", Some(4444))), 4444);
    assert_eq!(solver_port(&service("ns", None)), 8089);
}

#[test]
fn destination_namespace_parsed_from_route_host() {
    let vs = desired_challenge_vs(
        &pod("istio-system"),
        &service("istio-system", Some(8089)),
        &gateway("app"),
        "a.example.com",
    );
    assert_eq!(destination_namespace(&vs), "istio-system");
}

#[test]
fn destination_namespace_falls_back_to_cert_manager_default() {
    let vs = VirtualService::new("x", VirtualServiceSpec::default());
    assert_eq!(destination_namespace(&vs), "istio-system");

    assert_eq!(
        parse_destination_namespace("svc.solver-ns.svc.cluster.local").as_deref(),
        Some("solver-ns")
    );
    assert_eq!(parse_destination_namespace("bare-host"), None);
}

#[test]
fn challenge_vs_recognized_by_name_or_label() {
    let by_name = VirtualService::new("http01-solver-a", VirtualServiceSpec::default());
    assert!(is_challenge_vs(&by_name));

    let mut by_label = VirtualService::new("anything", VirtualServiceSpec::default());
    by_label.metadata.labels = Some(BTreeMap::from([(
        "acme.cert-manager.io/http01-solver".to_string(),
        "true".to_string(),
    )]));
    assert!(is_challenge_vs(&by_label));

    let foreign = VirtualService::new("site-routes", VirtualServiceSpec::default());
    assert!(!is_challenge_vs(&foreign));
}

#[test]
fn wildcard_domain_produces_a_legal_name() {
    let vs = desired_challenge_vs(
        &pod("istio-system"),
        &service("istio-system", Some(8089)),
        &gateway("app"),
        "*.example.com",
    );
    assert_eq!(vs.name_any(), "http01-solver-wildcard-example-com");
    assert_eq!(vs.spec.hosts, vec!["*.example.com"]);
}
