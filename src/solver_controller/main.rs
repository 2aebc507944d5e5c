use k8s_openapi::api::core::v1::Pod;
use kube::runtime::controller::Action;
use kube::runtime::finalizer::{finalizer, Event as Finalizer};
use kube::{Api, ResourceExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::*;

use super::cleanup::{
    cleanup_orphaned_global, cleanup_orphaned_in_namespace, delete_virtual_services_for_pod,
};
use super::pod::solver_domain;
use super::service::find_service_for_pod;
use super::virtualservice::{
    create_vs_for_solver, delete_vs, find_challenge_vs_for_domain, is_vs_valid,
    update_vs_for_solver,
};
use crate::domains::find_gateway_for_domain;
use crate::events_helper::{emit_event, OperatorEvent};
use crate::labels::{
    HTTP01_SOLVER_LABEL, HTTP01_SOLVER_LABEL_VALUE, SOLVER_POD_LABEL, SOLVER_POD_PREFIX,
};
use crate::{Error, Result};

pub static SOLVER_FINALIZER: &str = "istio-http01.rieset.io/solver-finalizer";

crate::controller_scaffold! {
    controller_ty: Pod,
    reporter: "solver-controller",
    run_fn: run_solver,
    reconcile_fn: reconcile_solver_pod,
    error_policy_fn: solver_error_policy,
    error_requeue_secs: 30,
    api_builder: |client: kube::Client| kube::Api::<Pod>::all(client),
    watcher_config: {
        kube::runtime::watcher::Config::default()
            .labels(&format!("{HTTP01_SOLVER_LABEL}={HTTP01_SOLVER_LABEL_VALUE}"))
    }
}

async fn reconcile_solver_pod(pod: Arc<Pod>, ctx: Arc<Context>) -> Result<Action> {
    let ns = pod.namespace().unwrap();
    let api_pod: Api<Pod> = Api::namespaced(ctx.client.clone(), &ns);
    finalizer(&api_pod, SOLVER_FINALIZER, pod, async |event| match event {
        Finalizer::Apply(pod) => solver_apply(pod, ctx.clone()).await,
        Finalizer::Cleanup(pod) => solver_cleanup(pod, ctx.clone()).await,
    })
    .await
    .map_err(|e| Error::FinalizerError(Box::new(e)))
}

async fn solver_apply(pod: Arc<Pod>, ctx: Arc<Context>) -> Result<Action> {
    let name = pod.name_any();
    if !name.starts_with(SOLVER_POD_PREFIX) {
        return Ok(Action::await_change());
    }

    let Some(domain) = solver_domain(&pod) else {
        // The acmesolver container has not surfaced its arguments yet
        return Ok(Action::requeue(Duration::from_secs(30)));
    };

    let gateway = find_gateway_for_domain(ctx.client.clone(), &domain)
        .await?
        .ok_or_else(|| Error::NoGatewayForDomain(domain.clone()))?;
    let gateway_namespace = gateway.namespace().unwrap_or_default();

    let mut existing =
        find_challenge_vs_for_domain(ctx.client.clone(), &gateway, &domain).await?;

    if existing.is_none()
        && let Err(err) = cleanup_orphaned_in_namespace(ctx.client.clone(), &gateway_namespace).await
    {
        error!(namespace = %gateway_namespace, error = %err, "failed to cleanup orphaned VirtualServices in namespace");
    }

    if let Some(vs) = existing.take() {
        if !is_vs_valid(ctx.client.clone(), &vs).await {
            info!(
                virtual_service = %vs.name_any(),
                pod = %name,
                "VirtualService is not valid, deleting it"
            );
            delete_vs(ctx.client.clone(), &vs).await?;
            // fall through and create a fresh one below
        } else if vs.labels().get(SOLVER_POD_LABEL) != Some(&name) {
            // Valid route left behind by a previous solver attempt: rebind it
            let service = find_service_for_pod(ctx.client.clone(), &pod).await?;
            update_vs_for_solver(ctx.client.clone(), &pod, &service, &vs).await?;
            emit_event(
                &ctx.recorder,
                pod.as_ref(),
                OperatorEvent::ChallengeRouteUpdated,
                Some(format!(
                    "Rebound VirtualService `{}` to solver pod `{name}`",
                    vs.name_any()
                )),
            )
            .await;
            if let Err(err) = cleanup_orphaned_global(ctx.client.clone()).await {
                error!(error = %err, "failed to cleanup orphaned VirtualServices");
            }
            return Ok(Action::requeue(Duration::from_secs(30)));
        } else {
            // Route already points at this pod; only the periodic GC remains
            if let Err(err) = cleanup_orphaned_global(ctx.client.clone()).await {
                error!(error = %err, "failed to cleanup orphaned VirtualServices");
            }
            return Ok(Action::requeue(Duration::from_secs(30)));
        }
    }

    let service = find_service_for_pod(ctx.client.clone(), &pod).await?;
    let created = create_vs_for_solver(ctx.client.clone(), &pod, &service, &gateway, &domain).await?;
    emit_event(
        &ctx.recorder,
        pod.as_ref(),
        OperatorEvent::ChallengeRouteCreated,
        Some(format!(
            "Created VirtualService `{}` routing {domain} to `{}`",
            created.name_any(),
            service.name_any()
        )),
    )
    .await;

    if let Err(err) = cleanup_orphaned_global(ctx.client.clone()).await {
        error!(error = %err, "failed to cleanup orphaned VirtualServices");
    }

    // Re-check periodically to catch user-initiated drift
    Ok(Action::requeue(Duration::from_secs(30)))
}

async fn solver_cleanup(pod: Arc<Pod>, ctx: Arc<Context>) -> Result<Action> {
    let name = pod.name_any();
    let deleted = delete_virtual_services_for_pod(ctx.client.clone(), &name).await?;
    if deleted > 0 {
        emit_event(
            &ctx.recorder,
            pod.as_ref(),
            OperatorEvent::ChallengeRouteDeleted,
            Some(format!(
                "Deleted {deleted} VirtualService(s) for removed solver pod `{name}`"
            )),
        )
        .await;
    }
    Ok(Action::await_change())
}
