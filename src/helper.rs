use k8s_openapi::api::core::v1::Pod;
use kube::api::ListParams;
use kube::{Api, Client};

use crate::labels::DEFAULT_CERT_MANAGER_NAMESPACE;
use crate::{Error, Result};

/// Namespace the operator pod runs in, from POD_NAMESPACE.
pub fn operator_namespace() -> String {
    std::env::var("POD_NAMESPACE")
        .ok()
        .filter(|ns| !ns.is_empty())
        .unwrap_or_else(|| DEFAULT_CERT_MANAGER_NAMESPACE.to_string())
}

/// Pod name from HOSTNAME, if the kubelet injected one.
pub fn operator_pod_name() -> Option<String> {
    std::env::var("HOSTNAME").ok().filter(|h| !h.is_empty())
}

/// DEBUG_MODE accepts true/false/0/1; anything else is off.
pub fn debug_mode() -> bool {
    parse_bool_env(std::env::var("DEBUG_MODE").ok().as_deref())
}

pub(crate) fn parse_bool_env(value: Option<&str>) -> bool {
    match value {
        Some("1") => true,
        Some("0") => false,
        Some(v) => v.parse::<bool>().unwrap_or(false),
        None => false,
    }
}

/// Resolve the operator pod: HOSTNAME when set, otherwise the first pod in
/// the operator namespace matching the deployment labels (with leader
/// election there is only one).
pub async fn get_operator_pod(client: Client) -> Result<Pod> {
    let namespace = operator_namespace();
    let api_pods = Api::<Pod>::namespaced(client, &namespace);
    if let Some(name) = operator_pod_name() {
        return api_pods.get(&name).await.map_err(Error::KubeError);
    }
    let selector = "app.kubernetes.io/name=istio-http01,control-plane=controller-manager";
    let pods = api_pods
        .list(&ListParams::default().labels(selector))
        .await
        .map_err(Error::KubeError)?;
    pods.items
        .into_iter()
        .next()
        .ok_or_else(|| Error::OtherError(format!("operator pod not found in {namespace}")))
}
