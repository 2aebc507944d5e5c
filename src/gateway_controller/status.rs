//! The published gateway index: which domains and certificates every
//! Gateway serves, written as pretty JSON onto the operator pod's
//! annotation so a single `kubectl describe pod` answers "what does the
//! operator think the cluster looks like".

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Pod;
use kube::api::{ListParams, Patch, PatchParams};
use kube::{Api, Client, ResourceExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::*;

use crate::cert_manager::{is_certificate_ready, Certificate};
use crate::domains::domains_for_gateway_in;
use crate::helper::get_operator_pod;
use crate::istio::{Gateway, VirtualService};
use crate::labels::GATEWAY_DOMAINS_ANNOTATION;
use crate::{Error, Result};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GatewayCertificate {
    pub name: String,
    pub namespace: String,
    pub dns_names: Vec<String>,
    pub ready: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GatewayInfo {
    pub domains: Vec<String>,
    pub certificates: Vec<GatewayCertificate>,
}

/// Every TLS credential of the Gateway, normalized to (namespace, name).
/// A bare credential lives in the Gateway's own namespace.
pub fn credential_refs(gateway: &Gateway) -> Vec<(String, String)> {
    let gateway_namespace = gateway.namespace().unwrap_or_default();
    gateway
        .spec
        .servers
        .iter()
        .filter_map(|server| server.tls.as_ref())
        .filter_map(|tls| tls.credential_name.as_deref())
        .filter(|cred| !cred.is_empty())
        .map(|cred| match cred.split_once('/') {
            Some((ns, name)) => (ns.to_string(), name.to_string()),
            None => (gateway_namespace.clone(), cred.to_string()),
        })
        .collect()
}

/// Certificates whose secret backs one of the Gateway's credentials,
/// de-duplicated, with their Ready flag.
pub fn certificates_for_gateway_in(
    certificates: &[Certificate],
    gateway: &Gateway,
) -> Vec<GatewayCertificate> {
    let refs = credential_refs(gateway);
    let mut seen = std::collections::BTreeSet::new();
    let mut result = Vec::new();
    for cert in certificates {
        let cert_namespace = cert.namespace().unwrap_or_default();
        let secret_name = &cert.spec.secret_name;
        if secret_name.is_empty() {
            continue;
        }
        let matched = refs
            .iter()
            .any(|(ns, name)| name == secret_name && *ns == cert_namespace);
        if !matched {
            continue;
        }
        let key = format!("{cert_namespace}/{}", cert.name_any());
        if !seen.insert(key) {
            continue;
        }
        result.push(GatewayCertificate {
            name: cert.name_any(),
            namespace: cert_namespace,
            dns_names: cert.spec.dns_names.clone().unwrap_or_default(),
            ready: is_certificate_ready(cert),
        });
    }
    result
}

/// Assemble the cluster-wide index from already-listed objects.
pub fn cluster_gateway_info_in(
    gateways: &[Gateway],
    virtual_services: &[VirtualService],
    certificates: &[Certificate],
) -> BTreeMap<String, GatewayInfo> {
    let mut info = BTreeMap::new();
    for gateway in gateways {
        let key = format!(
            "{}/{}",
            gateway.namespace().unwrap_or_default(),
            gateway.name_any()
        );
        info.insert(
            key,
            GatewayInfo {
                domains: domains_for_gateway_in(virtual_services, gateway),
                certificates: certificates_for_gateway_in(certificates, gateway),
            },
        );
    }
    info
}

/// Recompute the cluster index and publish it on the operator pod.
pub async fn publish_gateway_index(client: Client) -> Result<()> {
    let api_gw: Api<Gateway> = Api::all(client.clone());
    let gateways = api_gw
        .list(&ListParams::default())
        .await
        .map_err(Error::KubeError)?;
    let api_vs: Api<VirtualService> = Api::all(client.clone());
    let virtual_services = api_vs
        .list(&ListParams::default())
        .await
        .map_err(Error::KubeError)?;
    let api_cert: Api<Certificate> = Api::all(client.clone());
    let certificates = api_cert
        .list(&ListParams::default())
        .await
        .map_err(Error::KubeError)?;

    let info = cluster_gateway_info_in(&gateways.items, &virtual_services.items, &certificates.items);
    let payload = serde_json::to_string_pretty(&info).map_err(Error::SerializationError)?;

    let operator_pod = get_operator_pod(client.clone()).await?;
    let namespace = operator_pod.namespace().unwrap_or_default();
    let api_pod: Api<Pod> = Api::namespaced(client, &namespace);
    let patch = json!({
        "metadata": {
            "annotations": {
                GATEWAY_DOMAINS_ANNOTATION: payload,
            },
        },
    });
    api_pod
        .patch(
            &operator_pod.name_any(),
            &PatchParams::default(),
            &Patch::Merge(&patch),
        )
        .await
        .map_err(Error::KubeError)?;

    info!(
        pod = %operator_pod.name_any(),
        namespace = %namespace,
        gateway_count = info.len(),
        "Updated operator pod annotation with Gateway domains and certificates"
    );
    Ok(())
}
