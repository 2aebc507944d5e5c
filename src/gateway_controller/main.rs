use kube::runtime::controller::Action;
use kube::runtime::reflector::ObjectRef;
use kube::ResourceExt;
use std::sync::Arc;
use std::time::Duration;
use tracing::*;

use super::status::publish_gateway_index;
use crate::domains::domains_for_gateway;
use crate::istio::{Gateway, VirtualService};
use crate::Result;

crate::controller_scaffold! {
    controller_ty: Gateway,
    reporter: "gateway-controller",
    run_fn: run_gateway,
    reconcile_fn: reconcile_gateway,
    error_policy_fn: gateway_error_policy,
    error_requeue_secs: 60,
    api_builder: |client: kube::Client| kube::Api::<Gateway>::all(client),
    watcher_config: kube::runtime::watcher::Config::default().any_semantic(),
    watches: |controller: kube::runtime::controller::Controller<Gateway>, client: kube::Client| {
        // Re-index a Gateway whenever a VirtualService that references it
        // changes; the domain set is derived from VirtualServices.
        controller.watches(
            kube::Api::<VirtualService>::all(client),
            kube::runtime::watcher::Config::default(),
            |vs: VirtualService| {
                let vs_namespace = vs.namespace().unwrap_or_default();
                vs.spec
                    .gateways
                    .iter()
                    .map(|gateway| match gateway.split_once('/') {
                        Some((ns, name)) => ObjectRef::new(name).within(ns),
                        None => ObjectRef::new(gateway).within(&vs_namespace),
                    })
                    .collect::<Vec<ObjectRef<Gateway>>>()
            },
        )
    }
}

async fn reconcile_gateway(gateway: Arc<Gateway>, ctx: Arc<Context>) -> Result<Action> {
    let name = gateway.name_any();
    let namespace = gateway.namespace().unwrap_or_default();
    info!(gateway = %name, namespace = %namespace, "Reconciling Gateway");

    if !gateway.spec.servers.is_empty() {
        let total_hosts: usize = gateway
            .spec
            .servers
            .iter()
            .map(|server| server.hosts.len())
            .sum();
        info!(
            gateway = %name,
            namespace = %namespace,
            server_count = gateway.spec.servers.len(),
            total_hosts,
            "Gateway servers"
        );
    }

    match domains_for_gateway(ctx.client.clone(), &gateway).await {
        Ok(domains) => {
            info!(gateway = %name, namespace = %namespace, domains = ?domains, "Gateway domains from VirtualService");
        }
        Err(err) => {
            error!(gateway = %name, namespace = %namespace, error = %err, "failed to get domains for Gateway");
        }
    }

    if let Err(err) = publish_gateway_index(ctx.client.clone()).await {
        error!(gateway = %name, error = %err, "failed to update operator pod status");
    }

    // Periodic pass keeps the published index honest against drift
    Ok(Action::requeue(Duration::from_secs(60)))
}
