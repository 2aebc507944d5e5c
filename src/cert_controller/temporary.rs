//! The temporary self-signed Certificate and Issuer that stand in for the
//! original certificate while it cannot be issued, and the idempotent
//! convergence toward the swapped state.
//!
//! Ordering constraint: the HSTS-stripping filter must exist before the
//! temporary certificate can ever be served. A client that receives even one
//! response with the HSTS header during the gap would cache it for the
//! domain and be locked out of the plain-HTTP challenge.

use std::collections::BTreeSet;

use kube::api::PostParams;
use kube::{Api, ResourceExt};
use tracing::*;

use super::envoyfilter::ensure_hsts_filter;
use super::gateway::{is_related, swap_gateway_to_temporary};
use super::main::Context;
use super::verification;
use crate::cert_manager::{
    is_certificate_ready, CertIssuerRef, Certificate, CertificateSpec, Issuer, IssuerSpec,
    SelfSignedIssuer,
};
use crate::domains::domains_for_gateway;
use crate::events_helper::{emit_event, OperatorEvent};
use crate::istio::Gateway;
use crate::labels::{
    temp_certificate_name, temp_issuer_name, temp_secret_name, MANAGED_BY_LABEL, MANAGED_BY_VALUE,
    ORIGINAL_CERT_LABEL, TEMP_LABEL, TEMP_LABEL_VALUE,
};
use crate::{is_already_exists, is_not_found, Error, Result};

fn temp_labels(cert: &Certificate) -> std::collections::BTreeMap<String, String> {
    [
        (MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string()),
        (TEMP_LABEL.to_string(), TEMP_LABEL_VALUE.to_string()),
        (ORIGINAL_CERT_LABEL.to_string(), cert.name_any()),
    ]
    .into_iter()
    .collect()
}

/// Self-signed Issuer that exists only to mint the temporary certificate.
pub fn temp_issuer_for(cert: &Certificate) -> Issuer {
    let mut issuer = Issuer::new(
        &temp_issuer_name(&cert.name_any()),
        IssuerSpec {
            self_signed: Some(SelfSignedIssuer {}),
            ..IssuerSpec::default()
        },
    );
    issuer.metadata.namespace = cert.namespace();
    issuer.metadata.labels = Some(
        [
            (MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string()),
            (TEMP_LABEL.to_string(), TEMP_LABEL_VALUE.to_string()),
        ]
        .into_iter()
        .collect(),
    );
    issuer
}

/// Temporary Certificate covering the union of the original DNS names and
/// every domain the Gateway currently serves, so no SNI lands on a mismatched
/// certificate during the swap. Short-lived: issuance is expected to finish
/// well within a day.
pub fn temp_certificate_for(cert: &Certificate, gateway_domains: &[String]) -> Certificate {
    let dns_names: BTreeSet<String> = cert
        .spec
        .dns_names
        .iter()
        .flatten()
        .chain(gateway_domains)
        .cloned()
        .collect();
    let mut temp = Certificate::new(
        &temp_certificate_name(&cert.name_any()),
        CertificateSpec {
            secret_name: temp_secret_name(&cert.spec.secret_name),
            dns_names: Some(dns_names.into_iter().collect()),
            common_name: cert.spec.common_name.clone(),
            duration: Some("24h".to_string()),
            renew_before: Some("1h".to_string()),
            issuer_ref: CertIssuerRef {
                name: temp_issuer_name(&cert.name_any()),
                kind: Some("Issuer".to_string()),
                group: Some("cert-manager.io".to_string()),
            },
        },
    );
    temp.metadata.namespace = cert.namespace();
    temp.metadata.labels = Some(temp_labels(cert));
    temp
}

async fn create_temporary(ctx: &Context, cert: &Certificate, gateway: &Gateway) -> Result<()> {
    let ns = cert.namespace().unwrap_or_default();
    let api_issuer: Api<Issuer> = Api::namespaced(ctx.client.clone(), &ns);
    let issuer = temp_issuer_for(cert);
    match api_issuer.create(&PostParams::default(), &issuer).await {
        Ok(_) => {}
        Err(err) if is_already_exists(&err) => {
            debug!(issuer = %issuer.name_any(), namespace = %ns, "Self-signed issuer already exists");
        }
        Err(err) => return Err(Error::KubeError(err)),
    }

    // The temporary certificate covers every Gateway domain, not only the
    // DNS names of the original certificate.
    let gateway_domains = match domains_for_gateway(ctx.client.clone(), gateway).await {
        Ok(domains) => domains,
        Err(err) => {
            warn!(
                gateway = %gateway.name_any(),
                error = %err,
                "Failed to get domains for Gateway, using certificate DNS names"
            );
            cert.spec.dns_names.clone().unwrap_or_default()
        }
    };

    let temp = temp_certificate_for(cert, &gateway_domains);
    info!(
        certificate = %temp.name_any(),
        gateway = %gateway.name_any(),
        dns_names = ?temp.spec.dns_names,
        "Creating temporary certificate with DNS names from Gateway and Certificate"
    );
    let api_cert: Api<Certificate> = Api::namespaced(ctx.client.clone(), &ns);
    match api_cert.create(&PostParams::default(), &temp).await {
        Ok(_) => {
            emit_event(
                &ctx.recorder,
                cert,
                OperatorEvent::TemporaryCertificateCreated,
                Some(format!(
                    "Created temporary self-signed certificate `{}` for Gateway `{}`",
                    temp.name_any(),
                    gateway.name_any()
                )),
            )
            .await;
        }
        Err(err) if is_already_exists(&err) => {
            debug!(certificate = %temp.name_any(), namespace = %ns, "Temporary certificate already exists");
        }
        Err(err) => return Err(Error::KubeError(err)),
    }

    // Install the HSTS filter now, before the temporary secret is ever
    // mounted. Failure is retried on the next pass.
    if let Err(err) = ensure_hsts_filter(ctx.client.clone(), gateway, &cert.spec.secret_name).await
    {
        warn!(
            gateway = %gateway.name_any(),
            error = %err,
            "Failed to create EnvoyFilter to disable HSTS (will retry later)"
        );
    }
    Ok(())
}

/// Idempotent convergence of one (Certificate, Gateway) pair toward the
/// swapped state. Each step is a no-op when already satisfied; a partially
/// converged pair finishes on a later pass.
pub async fn ensure_temporary_setup(
    ctx: &Context,
    cert: &Certificate,
    gateway: &Gateway,
) -> Result<()> {
    let secret_namespace = cert.namespace().unwrap_or_default();
    if !is_related(gateway, &cert.spec.secret_name, &secret_namespace) {
        return Err(Error::ValidationError(format!(
            "gateway {}/{} is not related to certificate {}",
            gateway.namespace().unwrap_or_default(),
            gateway.name_any(),
            cert.name_any()
        )));
    }

    let api_cert: Api<Certificate> = Api::namespaced(ctx.client.clone(), &secret_namespace);
    let temp_name = temp_certificate_name(&cert.name_any());
    let temp = match api_cert.get(&temp_name).await {
        Ok(temp) => temp,
        Err(err) if is_not_found(&err) => {
            info!(
                certificate = %cert.name_any(),
                gateway = %gateway.name_any(),
                "Temporary certificate not found, creating it"
            );
            return create_temporary(ctx, cert, gateway).await;
        }
        Err(err) => return Err(Error::KubeError(err)),
    };

    if !is_certificate_ready(&temp) {
        debug!(
            certificate = %cert.name_any(),
            temp_certificate = %temp_name,
            "Temporary certificate not ready yet, waiting"
        );
        return Ok(());
    }

    // Filter before the port-443 rewrite: no response served off the
    // temporary secret may carry HSTS.
    ensure_hsts_filter(ctx.client.clone(), gateway, &cert.spec.secret_name).await?;

    let swapped = swap_gateway_to_temporary(ctx.client.clone(), gateway, cert).await?;
    if swapped {
        emit_event(
            &ctx.recorder,
            cert,
            OperatorEvent::GatewaySwapped,
            Some(format!(
                "Gateway `{}/{}` now serves the temporary certificate",
                gateway.namespace().unwrap_or_default(),
                gateway.name_any()
            )),
        )
        .await;

        verification::verify_swap(ctx.client.clone(), gateway, &temp).await;
    }
    Ok(())
}

/// Delete the temporary Certificate and Issuer. Anything not carrying the
/// operator's temp label is refused and left in place.
pub async fn delete_temporary(ctx: &Context, cert: &Certificate) -> Result<()> {
    let ns = cert.namespace().unwrap_or_default();
    let api_cert: Api<Certificate> = Api::namespaced(ctx.client.clone(), &ns);
    let temp_name = temp_certificate_name(&cert.name_any());

    match api_cert.get(&temp_name).await {
        Ok(temp) => {
            if temp.labels().get(TEMP_LABEL).map(String::as_str) == Some(TEMP_LABEL_VALUE) {
                match api_cert.delete(&temp_name, &Default::default()).await {
                    Ok(_) => {
                        info!(certificate = %temp_name, "Deleted temporary self-signed certificate");
                        emit_event(
                            &ctx.recorder,
                            cert,
                            OperatorEvent::TemporaryCertificateDeleted,
                            Some(format!("Deleted temporary certificate `{temp_name}`")),
                        )
                        .await;
                    }
                    Err(err) if is_not_found(&err) => {}
                    Err(err) => return Err(Error::KubeError(err)),
                }
            }
        }
        Err(err) if is_not_found(&err) => {}
        Err(err) => return Err(Error::KubeError(err)),
    }

    let api_issuer: Api<Issuer> = Api::namespaced(ctx.client.clone(), &ns);
    let issuer_name = temp_issuer_name(&cert.name_any());
    match api_issuer.get(&issuer_name).await {
        Ok(issuer) => {
            if issuer.labels().get(TEMP_LABEL).map(String::as_str) == Some(TEMP_LABEL_VALUE) {
                match api_issuer.delete(&issuer_name, &Default::default()).await {
                    Ok(_) => info!(issuer = %issuer_name, "Deleted temporary self-signed issuer"),
                    Err(err) if is_not_found(&err) => {}
                    Err(err) => warn!(issuer = %issuer_name, error = %err, "failed to delete temporary issuer"),
                }
            }
        }
        Err(err) if is_not_found(&err) => {}
        Err(err) => return Err(Error::KubeError(err)),
    }
    Ok(())
}
