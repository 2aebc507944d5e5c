use k8s_openapi::api::core::v1::{Pod, Service};
use kube::api::ListParams;
use kube::{Api, Client, ResourceExt};
use tracing::*;

use crate::labels::{
    HTTP01_SOLVER_LABEL, HTTP01_SOLVER_LABEL_VALUE, HTTP_DOMAIN_LABEL, HTTP_TOKEN_LABEL,
};
use crate::{is_not_found, Error, Result};

/// cert-manager selects the solver pod by its `http-domain` and `http-token`
/// labels; a Service belongs to the pod when it carries the solver label and
/// its selector names both values.
pub fn service_selector_matches_pod(service: &Service, pod: &Pod) -> bool {
    if service.labels().get(HTTP01_SOLVER_LABEL).map(String::as_str)
        != Some(HTTP01_SOLVER_LABEL_VALUE)
    {
        return false;
    }
    let Some(selector) = service.spec.as_ref().and_then(|s| s.selector.as_ref()) else {
        return false;
    };
    let pod_domain = pod.labels().get(HTTP_DOMAIN_LABEL);
    let pod_token = pod.labels().get(HTTP_TOKEN_LABEL);
    match (pod_domain, pod_token) {
        (Some(domain), Some(token)) if !domain.is_empty() && !token.is_empty() => {
            selector.get(HTTP_DOMAIN_LABEL) == Some(domain)
                && selector.get(HTTP_TOKEN_LABEL) == Some(token)
        }
        _ => false,
    }
}

/// The Service fronting a solver pod: a Service named like the pod wins,
/// otherwise the first solver-labeled Service whose selector matches the
/// pod's challenge labels. cert-manager may not have created it yet, so the
/// miss is retriable.
pub async fn find_service_for_pod(client: Client, pod: &Pod) -> Result<Service> {
    let namespace = pod.namespace().unwrap_or_default();
    let api_svc: Api<Service> = Api::namespaced(client, &namespace);

    match api_svc.get(&pod.name_any()).await {
        Ok(service) => {
            info!(
                service = %service.name_any(),
                pod = %pod.name_any(),
                "Found Service by pod name"
            );
            return Ok(service);
        }
        Err(err) if is_not_found(&err) => {}
        Err(err) => return Err(Error::KubeError(err)),
    }

    let services = api_svc
        .list(&ListParams::default())
        .await
        .map_err(Error::KubeError)?;
    for service in services.items {
        if service_selector_matches_pod(&service, pod) {
            info!(
                service = %service.name_any(),
                pod = %pod.name_any(),
                "Found Service by selector match"
            );
            return Ok(service);
        }
    }

    Err(Error::SolverServiceNotFound(pod.name_any()))
}
