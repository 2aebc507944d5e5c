//! Garbage collection of challenge VirtualServices. A challenge VS whose
//! solver pod or Service is gone is an orphan; sweeps run opportunistically
//! inside the reconcile loop so orphans are cleared even across controller
//! restarts and for VSes that could not carry an owner reference.

use kube::api::ListParams;
use kube::{Api, Client, ResourceExt};
use tracing::*;

use super::virtualservice::{delete_vs, is_vs_valid};
use crate::istio::VirtualService;
use crate::labels::{
    HTTP01_SOLVER_LABEL, HTTP01_SOLVER_LABEL_VALUE, MANAGED_BY_LABEL, MANAGED_BY_VALUE,
    SOLVER_POD_LABEL,
};
use crate::{Error, Result};

fn managed_selector() -> String {
    format!("{MANAGED_BY_LABEL}={MANAGED_BY_VALUE}")
}

/// Delete every challenge VirtualService bound to a pod, cluster-wide.
/// The removal path when the solver pod goes away.
pub async fn delete_virtual_services_for_pod(client: Client, pod_name: &str) -> Result<usize> {
    let api: Api<VirtualService> = Api::all(client.clone());
    let selector = format!("{},{SOLVER_POD_LABEL}={pod_name}", managed_selector());
    let vss = api
        .list(&ListParams::default().labels(&selector))
        .await
        .map_err(Error::KubeError)?;

    let mut deleted = 0;
    for vs in &vss.items {
        if vs.labels().get(HTTP01_SOLVER_LABEL).map(String::as_str)
            != Some(HTTP01_SOLVER_LABEL_VALUE)
        {
            continue;
        }
        match delete_vs(client.clone(), vs).await {
            Ok(()) => {
                deleted += 1;
                info!(
                    virtual_service = %vs.name_any(),
                    namespace = %vs.namespace().unwrap_or_default(),
                    pod = pod_name,
                    "Deleted VirtualService for removed pod"
                );
            }
            Err(err) => {
                error!(
                    virtual_service = %vs.name_any(),
                    error = %err,
                    "failed to delete VirtualService"
                );
            }
        }
    }
    Ok(deleted)
}

async fn sweep(client: Client, virtual_services: Vec<VirtualService>, scope: &str) -> Result<usize> {
    let mut deleted = 0;
    for vs in &virtual_services {
        if vs.labels().get(HTTP01_SOLVER_LABEL).map(String::as_str)
            != Some(HTTP01_SOLVER_LABEL_VALUE)
        {
            continue;
        }
        if is_vs_valid(client.clone(), vs).await {
            continue;
        }
        match delete_vs(client.clone(), vs).await {
            Ok(()) => {
                deleted += 1;
                info!(
                    virtual_service = %vs.name_any(),
                    namespace = %vs.namespace().unwrap_or_default(),
                    scope,
                    "Deleted orphaned VirtualService"
                );
            }
            Err(err) => {
                error!(
                    virtual_service = %vs.name_any(),
                    error = %err,
                    "failed to delete orphaned VirtualService"
                );
            }
        }
    }
    if deleted > 0 {
        info!(count = deleted, scope, "Cleaned up orphaned VirtualServices");
    }
    Ok(deleted)
}

/// Sweep the operator's challenge VSes in one namespace. Triggered when a
/// domain lookup comes up empty, which is when stale routes would otherwise
/// shadow the new one.
pub async fn cleanup_orphaned_in_namespace(client: Client, namespace: &str) -> Result<usize> {
    let api: Api<VirtualService> = Api::namespaced(client.clone(), namespace);
    let vss = api
        .list(&ListParams::default().labels(&managed_selector()))
        .await
        .map_err(Error::KubeError)?;
    sweep(client, vss.items, namespace).await
}

/// Sweep every challenge VS in the cluster. Runs after each successful
/// create or update.
pub async fn cleanup_orphaned_global(client: Client) -> Result<usize> {
    let api: Api<VirtualService> = Api::all(client.clone());
    let selector = format!(
        "{},{HTTP01_SOLVER_LABEL}={HTTP01_SOLVER_LABEL_VALUE}",
        managed_selector()
    );
    let vss = api
        .list(&ListParams::default().labels(&selector))
        .await
        .map_err(Error::KubeError)?;
    sweep(client, vss.items, "cluster").await
}
