//! Challenge VirtualService construction and reconciliation. The route
//! forwards only `/.well-known/acme-challenge/` for the challenged domain to
//! the solver Service, through the Gateway that owns the domain, so the ACME
//! validator reaches the solver before the domain has a working certificate.

use k8s_openapi::api::core::v1::{Pod, Service};
use kube::api::{ListParams, PostParams};
use kube::{Api, Client, Resource, ResourceExt};
use tracing::*;

use crate::istio::{
    Destination, Gateway, HttpMatchRequest, HttpRoute, HttpRouteDestination, PortSelector,
    StringMatch, VirtualService, VirtualServiceSpec,
};
use crate::labels::{
    challenge_vs_name, DEFAULT_CERT_MANAGER_NAMESPACE, DEFAULT_SOLVER_PORT, HTTP01_SOLVER_LABEL,
    HTTP01_SOLVER_LABEL_VALUE, MANAGED_BY_LABEL, MANAGED_BY_VALUE, SOLVER_POD_LABEL,
    SOLVER_SERVICE_LABEL,
};
use crate::{is_not_found, Error, Result};

pub static ACME_CHALLENGE_PREFIX: &str = "/.well-known/acme-challenge/";

/// Port the solver Service listens on; cert-manager's default when the
/// Service declares none.
pub fn solver_port(service: &Service) -> u32 {
    service
        .spec
        .as_ref()
        .and_then(|s| s.ports.as_ref())
        .and_then(|ports| ports.first())
        .map(|p| p.port as u32)
        .unwrap_or(DEFAULT_SOLVER_PORT)
}

/// Recognize a challenge VirtualService by label or by name fragment.
pub fn is_challenge_vs(vs: &VirtualService) -> bool {
    let name = vs.name_any();
    name.contains("http01-solver")
        || name.contains("acme-solver")
        || vs.labels().get(HTTP01_SOLVER_LABEL).map(String::as_str)
            == Some(HTTP01_SOLVER_LABEL_VALUE)
}

/// Namespace encoded in a `svc.namespace.svc.cluster.local` destination host.
pub fn parse_destination_namespace(host: &str) -> Option<String> {
    let mut parts = host.split('.');
    parts.next()?;
    parts.next().map(str::to_string)
}

/// Namespace the solver pod and Service live in, derived from the route
/// destination; falls back to the default cert-manager namespace.
pub fn destination_namespace(vs: &VirtualService) -> String {
    vs.spec
        .http
        .first()
        .and_then(|route| route.route.first())
        .and_then(|dest| dest.destination.as_ref())
        .and_then(|destination| parse_destination_namespace(&destination.host))
        .filter(|ns| !ns.is_empty())
        .unwrap_or_else(|| DEFAULT_CERT_MANAGER_NAMESPACE.to_string())
}

fn challenge_labels(pod: &Pod, service: &Service) -> std::collections::BTreeMap<String, String> {
    [
        (MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string()),
        (
            HTTP01_SOLVER_LABEL.to_string(),
            HTTP01_SOLVER_LABEL_VALUE.to_string(),
        ),
        (SOLVER_POD_LABEL.to_string(), pod.name_any()),
        (SOLVER_SERVICE_LABEL.to_string(), service.name_any()),
    ]
    .into_iter()
    .collect()
}

fn solver_destination(service: &Service) -> Destination {
    Destination {
        host: format!(
            "{}.{}.svc.cluster.local",
            service.name_any(),
            service.namespace().unwrap_or_default()
        ),
        port: Some(PortSelector {
            number: solver_port(service),
        }),
    }
}

/// The challenge VirtualService for (pod, service, gateway, domain). It
/// lives in the Gateway's namespace; the pod owns it only when both share a
/// namespace, since Kubernetes forbids cross-namespace owner references.
/// Without an owner the GC sweeps are the sole cleanup path.
pub fn desired_challenge_vs(
    pod: &Pod,
    service: &Service,
    gateway: &Gateway,
    domain: &str,
) -> VirtualService {
    let gateway_namespace = gateway.namespace().unwrap_or_default();
    let pod_namespace = pod.namespace().unwrap_or_default();
    let gateway_ref = if gateway_namespace == pod_namespace {
        gateway.name_any()
    } else {
        format!("{gateway_namespace}/{}", gateway.name_any())
    };

    let mut vs = VirtualService::new(
        &challenge_vs_name(domain),
        VirtualServiceSpec {
            hosts: vec![domain.to_string()],
            gateways: vec![gateway_ref],
            http: vec![HttpRoute {
                match_: Some(vec![HttpMatchRequest {
                    uri: Some(StringMatch {
                        prefix: Some(ACME_CHALLENGE_PREFIX.to_string()),
                        ..StringMatch::default()
                    }),
                }]),
                route: vec![HttpRouteDestination {
                    destination: Some(solver_destination(service)),
                }],
            }],
        },
    );
    vs.metadata.namespace = Some(gateway_namespace.clone());
    vs.metadata.labels = Some(challenge_labels(pod, service));
    if pod_namespace == gateway_namespace
        && let Some(owner) = pod.controller_owner_ref(&())
    {
        vs.metadata.owner_references = Some(vec![owner]);
    }
    vs
}

/// Find an existing challenge VirtualService for the domain: the Gateway's
/// namespace first (where the operator creates them), then everywhere else.
pub async fn find_challenge_vs_for_domain(
    client: Client,
    gateway: &Gateway,
    domain: &str,
) -> Result<Option<VirtualService>> {
    let gateway_namespace = gateway.namespace().unwrap_or_default();
    let api_local: Api<VirtualService> = Api::namespaced(client.clone(), &gateway_namespace);
    let local = api_local
        .list(&ListParams::default())
        .await
        .map_err(Error::KubeError)?;
    for vs in local.items {
        if vs.spec.hosts.iter().any(|h| h == domain) && is_challenge_vs(&vs) {
            return Ok(Some(vs));
        }
    }

    let api_all: Api<VirtualService> = Api::all(client);
    let all = api_all
        .list(&ListParams::default())
        .await
        .map_err(Error::KubeError)?;
    for vs in all.items {
        if vs.namespace().as_deref() == Some(gateway_namespace.as_str()) {
            continue;
        }
        if vs.spec.hosts.iter().any(|h| h == domain) && is_challenge_vs(&vs) {
            return Ok(Some(vs));
        }
    }
    Ok(None)
}

/// A challenge VirtualService is valid while the solver pod and Service it
/// names both exist in the namespace its destination points at. Anything
/// else is an orphan.
pub async fn is_vs_valid(client: Client, vs: &VirtualService) -> bool {
    let labels = vs.labels();
    let Some(pod_name) = labels.get(SOLVER_POD_LABEL).filter(|v| !v.is_empty()) else {
        return false;
    };
    let Some(service_name) = labels.get(SOLVER_SERVICE_LABEL).filter(|v| !v.is_empty()) else {
        return false;
    };

    let namespace = destination_namespace(vs);
    let api_pod: Api<Pod> = Api::namespaced(client.clone(), &namespace);
    let pod_exists = api_pod.get(pod_name).await.is_ok();
    let api_svc: Api<Service> = Api::namespaced(client, &namespace);
    let service_exists = api_svc.get(service_name).await.is_ok();

    let valid = pod_exists && service_exists;
    if !valid {
        debug!(
            virtual_service = %vs.name_any(),
            pod = pod_name.as_str(),
            service = service_name.as_str(),
            namespace = %namespace,
            pod_exists,
            service_exists,
            "VirtualService is not valid"
        );
    }
    valid
}

/// Rebind an existing challenge VirtualService to a new solver pod: labels,
/// ownership and destination move; hosts and gateway stay.
pub async fn update_vs_for_solver(
    client: Client,
    pod: &Pod,
    service: &Service,
    existing: &VirtualService,
) -> Result<()> {
    let namespace = existing
        .namespace()
        .ok_or_else(|| Error::ValidationError("VirtualService has no namespace".into()))?;
    let mut vs = existing.clone();

    vs.metadata
        .labels
        .get_or_insert_default()
        .extend(challenge_labels(pod, service));
    if pod.namespace().as_deref() == Some(namespace.as_str()) {
        vs.metadata.owner_references = pod.controller_owner_ref(&()).map(|owner| vec![owner]);
    } else {
        vs.metadata.owner_references = None;
    }
    if let Some(route) = vs.spec.http.first_mut()
        && let Some(dest) = route.route.first_mut()
    {
        dest.destination = Some(solver_destination(service));
    }

    let api: Api<VirtualService> = Api::namespaced(client, &namespace);
    api.replace(&vs.name_any(), &PostParams::default(), &vs)
        .await
        .map_err(Error::KubeError)?;
    info!(
        virtual_service = %vs.name_any(),
        pod = %pod.name_any(),
        service = %service.name_any(),
        "Updated VirtualService for HTTP01 solver"
    );
    Ok(())
}

/// Create the challenge VirtualService; racing an identical create is fine.
pub async fn create_vs_for_solver(
    client: Client,
    pod: &Pod,
    service: &Service,
    gateway: &Gateway,
    domain: &str,
) -> Result<VirtualService> {
    let vs = desired_challenge_vs(pod, service, gateway, domain);
    let namespace = gateway.namespace().unwrap_or_default();
    let api: Api<VirtualService> = Api::namespaced(client, &namespace);
    match api.create(&PostParams::default(), &vs).await {
        Ok(created) => {
            info!(
                virtual_service = %created.name_any(),
                path = ACME_CHALLENGE_PREFIX,
                solver_service = %service.name_any(),
                solver_port = solver_port(service),
                "Created VirtualService for HTTP01 solver"
            );
            Ok(created)
        }
        Err(err) if crate::is_already_exists(&err) => {
            api.get(&vs.name_any()).await.map_err(Error::KubeError)
        }
        Err(err) => Err(Error::KubeError(err)),
    }
}

/// Delete a challenge VirtualService, tolerating a concurrent delete.
pub async fn delete_vs(client: Client, vs: &VirtualService) -> Result<()> {
    let namespace = vs
        .namespace()
        .ok_or_else(|| Error::ValidationError("VirtualService has no namespace".into()))?;
    let api: Api<VirtualService> = Api::namespaced(client, &namespace);
    match api.delete(&vs.name_any(), &Default::default()).await {
        Ok(_) => Ok(()),
        Err(err) if is_not_found(&err) => Ok(()),
        Err(err) => Err(Error::KubeError(err)),
    }
}

#[cfg(test)]
mod tests;
