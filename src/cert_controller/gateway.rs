//! Gateway mutations for the temporary-TLS swap. The pure functions mutate a
//! deserialized Gateway in place and report whether anything changed; the
//! async shells re-read the live object first and write it back with an
//! optimistic-concurrency replace, so a conflicting writer surfaces as a 409
//! and the reconciler requeues.
//!
//! Gateways are shared objects. Only credentialName, httpsRedirect and the
//! operator's own annotations are ever touched; the annotations are the sole
//! record of the pre-swap state and the restore path trusts nothing else.

use kube::api::{ListParams, PostParams};
use kube::{Api, Client, ResourceExt};
use tracing::*;

use crate::cert_manager::Certificate;
use crate::istio::Gateway;
use crate::labels::{
    original_credential_annotation, original_redirect_annotation, temp_secret_name,
};
use crate::{Error, Result};

/// True when any port-80 server enforces the HTTPS redirect.
pub fn has_https_redirect(gateway: &Gateway) -> bool {
    gateway.spec.servers.iter().any(|server| {
        server.port.as_ref().is_some_and(|p| p.number == 80)
            && server
                .tls
                .as_ref()
                .is_some_and(|tls| tls.https_redirect == Some(true))
    })
}

/// A credentialName matches a secret either bare (name only, any namespace)
/// or fully qualified as `namespace/name`.
fn credential_matches(credential: &str, secret_name: &str, secret_namespace: &str) -> bool {
    match credential.split_once('/') {
        Some((ns, name)) => ns == secret_namespace && name == secret_name,
        None => credential == secret_name,
    }
}

/// True when any TLS server of the Gateway references the secret.
pub fn uses_secret(gateway: &Gateway, secret_name: &str, secret_namespace: &str) -> bool {
    gateway.spec.servers.iter().any(|server| {
        server
            .tls
            .as_ref()
            .and_then(|tls| tls.credential_name.as_deref())
            .is_some_and(|cred| credential_matches(cred, secret_name, secret_namespace))
    })
}

/// A Gateway is related to a Certificate when it references the original
/// secret, the temporary sibling, or carries the swap annotation for it.
pub fn is_related(gateway: &Gateway, original_secret: &str, secret_namespace: &str) -> bool {
    uses_secret(gateway, original_secret, secret_namespace)
        || uses_secret(gateway, &temp_secret_name(original_secret), secret_namespace)
        || gateway
            .annotations()
            .get(&original_credential_annotation(original_secret))
            .is_some_and(|v| !v.is_empty())
}

/// The form a credential takes on this Gateway: bare when the secret lives
/// in the Gateway's namespace, `namespace/name` otherwise.
fn credential_form(gateway: &Gateway, secret_name: &str, secret_namespace: &str) -> String {
    if !secret_namespace.is_empty() && Some(secret_namespace) != gateway.namespace().as_deref() {
        format!("{secret_namespace}/{secret_name}")
    } else {
        secret_name.to_string()
    }
}

/// Swap every port-443 server off the original secret onto the temporary
/// one and flip httpsRedirect off on port-80 servers, recording the original
/// values in annotations. Returns whether the Gateway changed.
pub fn swap_to_temporary(
    gateway: &mut Gateway,
    original_secret: &str,
    secret_namespace: &str,
) -> bool {
    let temp_secret = temp_secret_name(original_secret);
    let temp_credential = credential_form(gateway, &temp_secret, secret_namespace);
    let original_credential = credential_form(gateway, original_secret, secret_namespace);
    let redirect_key = original_redirect_annotation(original_secret);

    let mut updated = false;
    let mut redirect_flipped = false;
    for server in &mut gateway.spec.servers {
        let Some(port) = server.port.as_ref().map(|p| p.number) else {
            continue;
        };
        let Some(tls) = server.tls.as_mut() else {
            continue;
        };
        if port == 443
            && tls
                .credential_name
                .as_deref()
                .is_some_and(|cred| credential_matches(cred, original_secret, secret_namespace))
        {
            tls.credential_name = Some(temp_credential.clone());
            updated = true;
        }
        if port == 80 && tls.https_redirect == Some(true) {
            tls.https_redirect = Some(false);
            redirect_flipped = true;
            updated = true;
        }
    }

    if updated {
        let annotations = gateway.metadata.annotations.get_or_insert_default();
        if redirect_flipped {
            annotations
                .entry(redirect_key)
                .or_insert_with(|| "true".to_string());
        }
        annotations.insert(
            original_credential_annotation(original_secret),
            original_credential,
        );
    }
    updated
}

/// Flip httpsRedirect off on port-80 servers without touching the HTTPS
/// servers, recording the original value. Used when the Gateway is already
/// on the temporary secret but the redirect crept back.
pub fn disable_https_redirect(gateway: &mut Gateway, original_secret: &str) -> bool {
    let redirect_key = original_redirect_annotation(original_secret);
    let already_recorded = gateway.annotations().contains_key(&redirect_key);

    let mut updated = false;
    for server in &mut gateway.spec.servers {
        if server.port.as_ref().map(|p| p.number) != Some(80) {
            continue;
        }
        if let Some(tls) = server.tls.as_mut()
            && tls.https_redirect == Some(true)
        {
            tls.https_redirect = Some(false);
            updated = true;
        }
    }
    if updated && !already_recorded {
        gateway
            .metadata
            .annotations
            .get_or_insert_default()
            .insert(redirect_key, "true".to_string());
    }
    updated
}

pub struct RestoreOutcome {
    pub changed: bool,
    pub secret_restored: bool,
    pub redirect_restored: bool,
}

/// Put the Gateway back into its pre-swap state: original credentialName on
/// every server still holding the temporary secret, httpsRedirect back on
/// where the swap turned it off, and both annotations removed. Annotations
/// are stripped whenever no server references the temporary secret any
/// longer, so a half-restored Gateway cannot keep stale swap records.
pub fn restore_original(
    gateway: &mut Gateway,
    original_secret: &str,
    secret_namespace: &str,
) -> RestoreOutcome {
    let credential_key = original_credential_annotation(original_secret);
    let redirect_key = original_redirect_annotation(original_secret);
    let temp_fragment = temp_secret_name(original_secret);

    // The annotation holds the exact original form; recompute only if a
    // partial write lost it.
    let original_credential = gateway
        .annotations()
        .get(&credential_key)
        .cloned()
        .unwrap_or_else(|| credential_form(gateway, original_secret, secret_namespace));
    let should_restore_redirect = gateway
        .annotations()
        .get(&redirect_key)
        .is_some_and(|v| v == "true");

    let mut secret_restored = false;
    let mut redirect_restored = false;
    for server in &mut gateway.spec.servers {
        let Some(tls) = server.tls.as_mut() else {
            continue;
        };
        if tls
            .credential_name
            .as_deref()
            .is_some_and(|cred| cred.contains(&temp_fragment))
        {
            tls.credential_name = Some(original_credential.clone());
            secret_restored = true;
        }
    }
    if should_restore_redirect {
        for server in &mut gateway.spec.servers {
            if server.port.as_ref().map(|p| p.number) != Some(80) {
                continue;
            }
            if let Some(tls) = server.tls.as_mut()
                && tls.https_redirect == Some(false)
            {
                tls.https_redirect = Some(true);
                redirect_restored = true;
            }
        }
    }

    let mut annotations_removed = false;
    let on_temp = gateway.spec.servers.iter().any(|server| {
        server
            .tls
            .as_ref()
            .and_then(|tls| tls.credential_name.as_deref())
            .is_some_and(|cred| cred.contains(&temp_fragment))
    });
    if !on_temp && let Some(annotations) = gateway.metadata.annotations.as_mut() {
        annotations_removed |= annotations.remove(&credential_key).is_some();
        annotations_removed |= annotations.remove(&redirect_key).is_some();
        if annotations.is_empty() {
            gateway.metadata.annotations = None;
        }
    }

    RestoreOutcome {
        changed: secret_restored || redirect_restored || annotations_removed,
        secret_restored,
        redirect_restored,
    }
}

/// Gateways related to a Certificate: referencing its secret, the temporary
/// sibling, or annotated with the original credential.
pub async fn find_gateways_using_certificate(
    client: Client,
    secret_name: &str,
    secret_namespace: &str,
) -> Result<Vec<Gateway>> {
    let api_gw: Api<Gateway> = Api::all(client);
    let gateways = api_gw
        .list(&ListParams::default())
        .await
        .map_err(Error::KubeError)?;
    let matching: Vec<Gateway> = gateways
        .items
        .into_iter()
        .filter(|gw| is_related(gw, secret_name, secret_namespace))
        .collect();
    debug!(
        secret_name,
        secret_namespace,
        found = matching.len(),
        "Search for Gateways using certificate completed"
    );
    Ok(matching)
}

async fn replace_gateway(client: Client, gateway: &Gateway) -> Result<()> {
    let ns = gateway
        .namespace()
        .ok_or_else(|| Error::ValidationError("Gateway has no namespace".into()))?;
    let api: Api<Gateway> = Api::namespaced(client, &ns);
    api.replace(&gateway.name_any(), &PostParams::default(), gateway)
        .await
        .map_err(Error::KubeError)?;
    Ok(())
}

/// Re-read the Gateway and swap it onto the temporary secret.
/// Returns whether a write was issued.
pub async fn swap_gateway_to_temporary(
    client: Client,
    gateway: &Gateway,
    cert: &Certificate,
) -> Result<bool> {
    let ns = gateway.namespace().unwrap_or_default();
    let api: Api<Gateway> = Api::namespaced(client.clone(), &ns);
    let mut fresh = api.get(&gateway.name_any()).await.map_err(Error::KubeError)?;

    let secret_namespace = cert.namespace().unwrap_or_default();
    if !swap_to_temporary(&mut fresh, &cert.spec.secret_name, &secret_namespace) {
        return Ok(false);
    }
    replace_gateway(client, &fresh).await?;
    info!(
        gateway = %fresh.name_any(),
        gateway_namespace = %ns,
        original_secret = %cert.spec.secret_name,
        temp_secret = %temp_secret_name(&cert.spec.secret_name),
        "Updated Gateway to use temporary self-signed certificate"
    );
    Ok(true)
}

/// Re-read the Gateway and flip httpsRedirect off so the HTTP-01 challenge
/// can be served over plain HTTP.
pub async fn disable_redirect_for_challenge(
    client: Client,
    gateway: &Gateway,
    original_secret: &str,
) -> Result<bool> {
    let ns = gateway.namespace().unwrap_or_default();
    let api: Api<Gateway> = Api::namespaced(client.clone(), &ns);
    let mut fresh = api.get(&gateway.name_any()).await.map_err(Error::KubeError)?;

    if !disable_https_redirect(&mut fresh, original_secret) {
        return Ok(false);
    }
    replace_gateway(client, &fresh).await?;
    info!(
        gateway = %fresh.name_any(),
        gateway_namespace = %ns,
        original_secret,
        "Disabled httpsRedirect in Gateway for HTTP01 challenge"
    );
    Ok(true)
}

/// Re-read the Gateway and restore its pre-swap state.
pub async fn restore_gateway(
    client: Client,
    gateway: &Gateway,
    cert: &Certificate,
) -> Result<RestoreOutcome> {
    let ns = gateway.namespace().unwrap_or_default();
    let api: Api<Gateway> = Api::namespaced(client.clone(), &ns);
    let mut fresh = api.get(&gateway.name_any()).await.map_err(Error::KubeError)?;

    let secret_namespace = cert.namespace().unwrap_or_default();
    let outcome = restore_original(&mut fresh, &cert.spec.secret_name, &secret_namespace);
    if outcome.changed {
        replace_gateway(client, &fresh).await?;
        info!(
            gateway = %fresh.name_any(),
            gateway_namespace = %ns,
            original_secret = %cert.spec.secret_name,
            secret_restored = outcome.secret_restored,
            https_redirect_restored = outcome.redirect_restored,
            "Restored original secret and httpsRedirect in Gateway"
        );
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests;
