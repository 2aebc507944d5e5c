//! The HSTS-stripping EnvoyFilter. The filter patches the HTTP connection
//! manager in GATEWAY context with a Lua response filter that removes the
//! `strict-transport-security` header, so a browser hitting the temporary
//! self-signed certificate can never cache HSTS for the domain.
//!
//! EnvoyFilter is not part of the operator's typed scheme; a single
//! typeless [`DynamicObject`] handle is used for create, get and delete, and
//! NotFound is always success.

use std::collections::BTreeMap;

use kube::api::{ApiResource, DynamicObject, GroupVersionKind, PostParams};
use kube::{Api, Client, ResourceExt};
use serde_json::json;
use tracing::*;

use crate::istio::Gateway;
use crate::labels::{
    hsts_filter_name, MANAGED_BY_LABEL, MANAGED_BY_VALUE, ORIGINAL_CERT_LABEL, TEMP_LABEL,
    TEMP_LABEL_VALUE,
};
use crate::{is_already_exists, is_not_found, Error, Result};

static HSTS_STRIP_LUA: &str = "function envoy_on_response(response_handle)\n  response_handle:headers():remove(\"strict-transport-security\")\nend\n";

fn envoyfilter_resource() -> ApiResource {
    ApiResource::from_gvk(&GroupVersionKind::gvk(
        "networking.istio.io",
        "v1alpha3",
        "EnvoyFilter",
    ))
}

fn envoyfilter_api(client: Client, namespace: &str) -> Api<DynamicObject> {
    Api::namespaced_with(client, namespace, &envoyfilter_resource())
}

/// Workload selector for the filter: the Gateway's own selector, or the
/// stock ingress gateway labels when the Gateway declares none.
fn workload_labels(gateway: &Gateway) -> BTreeMap<String, String> {
    match gateway.spec.selector.as_ref().filter(|s| !s.is_empty()) {
        Some(selector) => selector.clone(),
        None => BTreeMap::from([("istio".to_string(), "ingressgateway".to_string())]),
    }
}

/// Build the filter object for a Gateway.
pub fn build_hsts_filter(gateway: &Gateway, original_secret: &str) -> Result<DynamicObject> {
    let namespace = gateway.namespace().unwrap_or_default();
    let name = hsts_filter_name(&namespace, &gateway.name_any());
    let filter = json!({
        "apiVersion": "networking.istio.io/v1alpha3",
        "kind": "EnvoyFilter",
        "metadata": {
            "name": name,
            "namespace": namespace,
            "labels": {
                MANAGED_BY_LABEL: MANAGED_BY_VALUE,
                TEMP_LABEL: TEMP_LABEL_VALUE,
                ORIGINAL_CERT_LABEL: original_secret,
            },
        },
        "spec": {
            "workloadSelector": {
                "labels": workload_labels(gateway),
            },
            "configPatches": [{
                "applyTo": "HTTP_FILTER",
                "match": {
                    "context": "GATEWAY",
                    "proxy": { "proxyVersion": ".*" },
                    "listener": {
                        "filterChain": {
                            "filter": { "name": "envoy.filters.network.http_connection_manager" },
                        },
                    },
                },
                "patch": {
                    "operation": "INSERT_BEFORE",
                    "value": {
                        "name": "envoy.filters.http.lua",
                        "typed_config": {
                            "@type": "type.googleapis.com/envoy.extensions.filters.http.lua.v3.Lua",
                            "inline_code": HSTS_STRIP_LUA,
                        },
                    },
                },
            }],
        },
    });
    serde_json::from_value(filter).map_err(Error::SerializationError)
}

/// Create the filter if it is absent. Returns whether a create was issued.
pub async fn ensure_hsts_filter(
    client: Client,
    gateway: &Gateway,
    original_secret: &str,
) -> Result<bool> {
    let namespace = gateway.namespace().unwrap_or_default();
    let name = hsts_filter_name(&namespace, &gateway.name_any());
    let api = envoyfilter_api(client, &namespace);

    match api.get(&name).await {
        Ok(_) => {
            debug!(envoyfilter = %name, namespace = %namespace, "EnvoyFilter to disable HSTS already exists");
            return Ok(false);
        }
        Err(err) if is_not_found(&err) => {}
        Err(err) => return Err(Error::KubeError(err)),
    }

    let filter = build_hsts_filter(gateway, original_secret)?;
    match api.create(&PostParams::default(), &filter).await {
        Ok(_) => {
            info!(
                envoyfilter = %name,
                gateway = %gateway.name_any(),
                gateway_namespace = %namespace,
                "Created EnvoyFilter to disable HSTS"
            );
            Ok(true)
        }
        Err(err) if is_already_exists(&err) => Ok(false),
        Err(err) => Err(Error::KubeError(err)),
    }
}

/// Best-effort idempotent delete. An absent filter is success; a filter of
/// the same name without the temp label is somebody else's and is left
/// alone.
pub async fn delete_hsts_filter(client: Client, gateway: &Gateway) -> Result<()> {
    let namespace = gateway.namespace().unwrap_or_default();
    let name = hsts_filter_name(&namespace, &gateway.name_any());
    let api = envoyfilter_api(client, &namespace);

    let filter = match api.get(&name).await {
        Ok(filter) => filter,
        Err(err) if is_not_found(&err) => return Ok(()),
        Err(err) => return Err(Error::KubeError(err)),
    };
    if filter.labels().get(TEMP_LABEL).map(String::as_str) != Some(TEMP_LABEL_VALUE) {
        return Ok(());
    }

    match api.delete(&name, &Default::default()).await {
        Ok(_) => {
            info!(
                envoyfilter = %name,
                gateway = %gateway.name_any(),
                gateway_namespace = %namespace,
                "Deleted EnvoyFilter that disabled HSTS"
            );
            Ok(())
        }
        Err(err) if is_not_found(&err) => Ok(()),
        Err(err) => Err(Error::KubeError(err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::istio::GatewaySpec;

    fn gateway(selector: Option<BTreeMap<String, String>>) -> Gateway {
        let mut gw = Gateway::new(
            "g",
            GatewaySpec {
                selector,
                servers: vec![],
            },
        );
        gw.metadata.namespace = Some("app".into());
        gw
    }

    #[test]
    fn filter_patches_gateway_context_before_connection_manager() {
        let filter = build_hsts_filter(&gateway(None), "app-tls").unwrap();
        assert_eq!(filter.name_any(), "disable-hsts-app-g");

        let spec = &filter.data["spec"];
        let patch = &spec["configPatches"][0];
        assert_eq!(patch["applyTo"], "HTTP_FILTER");
        assert_eq!(patch["match"]["context"], "GATEWAY");
        assert_eq!(
            patch["match"]["listener"]["filterChain"]["filter"]["name"],
            "envoy.filters.network.http_connection_manager"
        );
        assert_eq!(patch["patch"]["operation"], "INSERT_BEFORE");
        let lua = patch["patch"]["value"]["typed_config"]["inline_code"]
            .as_str()
            .unwrap();
        assert!(lua.contains("strict-transport-security"));
    }

    #[test]
    fn filter_uses_gateway_selector_when_present() {
        let selector = BTreeMap::from([("app".to_string(), "edge-gw".to_string())]);
        let filter = build_hsts_filter(&gateway(Some(selector)), "app-tls").unwrap();
        assert_eq!(
            filter.data["spec"]["workloadSelector"]["labels"]["app"],
            "edge-gw"
        );
    }

    #[test]
    fn filter_falls_back_to_stock_ingressgateway() {
        let filter = build_hsts_filter(&gateway(Some(BTreeMap::new())), "app-tls").unwrap();
        assert_eq!(
            filter.data["spec"]["workloadSelector"]["labels"]["istio"],
            "ingressgateway"
        );
    }

    #[test]
    fn filter_is_labeled_for_guarded_deletion() {
        let filter = build_hsts_filter(&gateway(None), "app-tls").unwrap();
        let labels = filter.labels();
        assert_eq!(labels.get(TEMP_LABEL).map(String::as_str), Some("true"));
        assert_eq!(
            labels.get(MANAGED_BY_LABEL).map(String::as_str),
            Some("istio-http01")
        );
        assert_eq!(
            labels.get(ORIGINAL_CERT_LABEL).map(String::as_str),
            Some("app-tls")
        );
    }
}
