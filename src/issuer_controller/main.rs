//! Report-only observer for cert-manager Issuers. Surfaces the issuer kind,
//! its interesting configuration and its conditions in the operator log for
//! debugging; never mutates anything.

use kube::runtime::controller::Action;
use kube::ResourceExt;
use std::sync::Arc;
use tracing::*;

use crate::cert_manager::Issuer;
use crate::Result;

crate::controller_scaffold! {
    controller_ty: Issuer,
    reporter: "issuer-controller",
    run_fn: run_issuer,
    reconcile_fn: reconcile_issuer,
    error_policy_fn: issuer_error_policy,
    error_requeue_secs: 5 * 60,
    api_builder: |client: kube::Client| kube::Api::<Issuer>::all(client),
    watcher_config: kube::runtime::watcher::Config::default().any_semantic()
}

async fn reconcile_issuer(issuer: Arc<Issuer>, _ctx: Arc<Context>) -> Result<Action> {
    let name = issuer.name_any();
    let namespace = issuer.namespace().unwrap_or_default();
    info!(issuer = %name, namespace = %namespace, "Issuer detected");

    if let Some(acme) = issuer.spec.acme.as_ref() {
        info!(
            issuer = %name,
            namespace = %namespace,
            server = acme.server.as_deref().unwrap_or(""),
            email = acme.email.as_deref().unwrap_or(""),
            "ACME Issuer"
        );
        for (index, solver) in acme.solvers.iter().flatten().enumerate() {
            if let Some(http01) = solver.http01.as_ref() {
                info!(issuer = %name, namespace = %namespace, solver_index = index, "HTTP01 Solver configured");
                if let Some(ingress) = http01.ingress.as_ref() {
                    if let Some(class) = ingress.class.as_deref() {
                        info!(issuer = %name, namespace = %namespace, ingress_class = class, "HTTP01 Ingress class");
                    }
                    if let Some(ingress_name) = ingress.name.as_deref().filter(|n| !n.is_empty()) {
                        info!(issuer = %name, namespace = %namespace, ingress_name, "HTTP01 Ingress name");
                    }
                }
            }
        }
    }
    if issuer.spec.self_signed.is_some() {
        info!(issuer = %name, namespace = %namespace, "SelfSigned Issuer");
    }
    if let Some(ca) = issuer.spec.ca.as_ref() {
        info!(
            issuer = %name,
            namespace = %namespace,
            secret_name = ca.secret_name.as_deref().unwrap_or(""),
            "CA Issuer"
        );
    }
    if let Some(vault) = issuer.spec.vault.as_ref() {
        info!(
            issuer = %name,
            namespace = %namespace,
            server = vault.server.as_deref().unwrap_or(""),
            path = vault.path.as_deref().unwrap_or(""),
            "Vault Issuer"
        );
    }

    for condition in issuer
        .status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .into_iter()
        .flatten()
    {
        info!(
            issuer = %name,
            namespace = %namespace,
            condition_type = %condition.type_,
            status = %condition.status,
            reason = condition.reason.as_deref().unwrap_or(""),
            message = condition.message.as_deref().unwrap_or(""),
            "Issuer condition"
        );
    }

    Ok(Action::await_change())
}
