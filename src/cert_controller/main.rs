use chrono::{DateTime, Utc};
use kube::runtime::controller::Action;
use kube::{Api, ResourceExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::*;

use super::envoyfilter::{delete_hsts_filter, ensure_hsts_filter};
use super::gateway::{
    disable_redirect_for_challenge, find_gateways_using_certificate, has_https_redirect,
    restore_gateway, uses_secret,
};
use super::temporary::{delete_temporary, ensure_temporary_setup};
use super::verification;
use crate::cert_manager::{is_certificate_ready, Certificate};
use crate::events_helper::{emit_event, OperatorEvent};
use crate::helper::debug_mode;
use crate::labels::{temp_certificate_name, temp_secret_name};
use crate::Result;

crate::controller_scaffold! {
    controller_ty: Certificate,
    reporter: "cert-controller",
    run_fn: run_cert,
    reconcile_fn: reconcile_cert,
    error_policy_fn: certificate_error_policy,
    error_requeue_secs: 30,
    api_builder: |client: kube::Client| kube::Api::<Certificate>::all(client),
    watcher_config: kube::runtime::watcher::Config::default().any_semantic(),
    preflight: |api: kube::Api<Certificate>| async move {
        if let Err(e) = api.list(&kube::api::ListParams::default().limit(1)).await {
            error!("Certificate CRD is not queryable; {e:?}. Is cert-manager installed?");
            std::process::exit(1);
        }
    }
}

/// In debug mode restoration is postponed until the temporary certificate
/// has been observable for five minutes; returns the requeue delay while the
/// hold is active.
pub fn restore_hold_remaining(created: DateTime<Utc>, now: DateTime<Utc>) -> Option<Duration> {
    let min_hold = chrono::Duration::minutes(5);
    let elapsed = now - created;
    if elapsed >= min_hold {
        return None;
    }
    let remaining = (min_hold - elapsed)
        .to_std()
        .unwrap_or(Duration::from_secs(30));
    Some(remaining.max(Duration::from_secs(30)))
}

async fn reconcile_cert(cert: Arc<Certificate>, ctx: Arc<Context>) -> Result<Action> {
    let ns = cert.namespace().unwrap();
    let name = cert.name_any();
    info!(
        certificate = %name,
        namespace = %ns,
        secret_name = %cert.spec.secret_name,
        dns_names = ?cert.spec.dns_names,
        issuer = %format!(
            "{}/{}",
            cert.spec.issuer_ref.kind.as_deref().unwrap_or("Issuer"),
            cert.spec.issuer_ref.name
        ),
        "Reconciling Certificate"
    );
    if let Some(conditions) = cert.status.as_ref().and_then(|s| s.conditions.as_ref()) {
        for condition in conditions {
            debug!(
                certificate = %name,
                condition_type = %condition.type_,
                status = %condition.status,
                reason = condition.reason.as_deref().unwrap_or(""),
                "Certificate condition"
            );
        }
    }

    let ready = is_certificate_ready(&cert);
    let gateways =
        find_gateways_using_certificate(ctx.client.clone(), &cert.spec.secret_name, &ns).await?;
    let temp_secret = temp_secret_name(&cert.spec.secret_name);

    if !ready {
        info!(certificate = %name, namespace = %ns, "Certificate is not ready yet");
        for gateway in &gateways {
            if has_https_redirect(gateway) {
                if let Err(err) = ensure_temporary_setup(&ctx, &cert, gateway).await {
                    error!(
                        certificate = %name,
                        gateway = %gateway.name_any(),
                        error = %err,
                        "failed to ensure temporary certificate setup"
                    );
                }
            } else if uses_secret(gateway, &temp_secret, &ns) {
                // S2 with the redirect crept back on; turn it off again so
                // the challenge stays reachable over plain HTTP.
                if let Err(err) =
                    disable_redirect_for_challenge(ctx.client.clone(), gateway, &cert.spec.secret_name)
                        .await
                {
                    error!(
                        gateway = %gateway.name_any(),
                        error = %err,
                        "failed to disable httpsRedirect for HTTP01 challenge"
                    );
                }
            } else {
                // Without a redirect the challenge is already reachable; the
                // original secret will simply fail TLS until issuance.
                info!(
                    certificate = %name,
                    gateway = %gateway.name_any(),
                    "Gateway has no httpsRedirect, nothing to swap"
                );
            }
        }
        return Ok(Action::requeue(Duration::from_secs(30)));
    }

    if !gateways.is_empty() {
        for gateway in &gateways {
            if uses_secret(gateway, &temp_secret, &ns) {
                // Still on the temporary secret: the HSTS filter must stay
                // until the swap back completes.
                if let Err(err) =
                    ensure_hsts_filter(ctx.client.clone(), gateway, &cert.spec.secret_name).await
                {
                    error!(gateway = %gateway.name_any(), error = %err, "failed to ensure EnvoyFilter");
                }
            } else if let Err(err) = delete_hsts_filter(ctx.client.clone(), gateway).await {
                error!(gateway = %gateway.name_any(), error = %err, "failed to delete EnvoyFilter for HSTS");
            }
        }

        if debug_mode() {
            let api_cert: Api<Certificate> = Api::namespaced(ctx.client.clone(), &ns);
            if let Ok(temp) = api_cert.get(&temp_certificate_name(&name)).await
                && let Some(created) = temp.creation_timestamp()
                && let Some(remaining) = restore_hold_remaining(created.0, Utc::now())
            {
                info!(
                    certificate = %name,
                    remaining = ?remaining,
                    "Debug mode: delaying certificate restoration"
                );
                return Ok(Action::requeue(remaining));
            }
        }

        for gateway in &gateways {
            match restore_gateway(ctx.client.clone(), gateway, &cert).await {
                Ok(outcome) if outcome.changed => {
                    emit_event(
                        &ctx.recorder,
                        cert.as_ref(),
                        OperatorEvent::GatewayRestored,
                        Some(format!(
                            "Gateway `{}/{}` restored to the original certificate",
                            gateway.namespace().unwrap_or_default(),
                            gateway.name_any()
                        )),
                    )
                    .await;
                }
                Ok(_) => {}
                Err(err) => {
                    error!(
                        certificate = %name,
                        gateway = %gateway.name_any(),
                        error = %err,
                        "failed to restore original secret in Gateway"
                    );
                    continue;
                }
            }
            if let Err(err) = delete_hsts_filter(ctx.client.clone(), gateway).await {
                error!(gateway = %gateway.name_any(), error = %err, "failed to delete EnvoyFilter for HSTS");
            }
            verification::verify_restore(ctx.client.clone(), gateway, Some(&cert)).await;
        }

        if let Err(err) = delete_temporary(&ctx, &cert).await {
            error!(certificate = %name, error = %err, "failed to delete temporary self-signed certificate");
        }
    }

    // Periodic pass keeps watching for temporary certificates becoming ready
    // and for user-initiated drift.
    Ok(Action::requeue(Duration::from_secs(30)))
}
