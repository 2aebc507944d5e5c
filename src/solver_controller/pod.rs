use k8s_openapi::api::core::v1::Pod;

/// The challenged domain, read from the `--domain=` argument of the pod's
/// `acmesolver` container. cert-manager owns the pod spec, so absence just
/// means the pod is not (yet) a recognizable solver.
pub fn solver_domain(pod: &Pod) -> Option<String> {
    pod.spec
        .as_ref()?
        .containers
        .iter()
        .find(|container| container.name == "acmesolver")?
        .args
        .as_ref()?
        .iter()
        .find_map(|arg| arg.strip_prefix("--domain=").map(str::to_string))
}
