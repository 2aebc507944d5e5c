//! Label and annotation keys shared by all controllers, plus the derived
//! names of every object the operator owns. Names are a function of the
//! source object's identity, so there is exactly one owned object per
//! (Gateway, domain) or (Certificate, Gateway) pair by construction.

/// Label marking an object as created by this operator.
pub static MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
/// Value of [`MANAGED_BY_LABEL`] on objects the operator owns.
pub static MANAGED_BY_VALUE: &str = "istio-http01";

/// Label marking transient objects, checked before any delete.
pub static TEMP_LABEL: &str = "istio-http01.rieset.io/temp";
pub static TEMP_LABEL_VALUE: &str = "true";
/// Label recording the Certificate a temporary object was derived from.
pub static ORIGINAL_CERT_LABEL: &str = "istio-http01.rieset.io/original-cert";

/// cert-manager's marker label on HTTP01 solver pods and services.
pub static HTTP01_SOLVER_LABEL: &str = "acme.cert-manager.io/http01-solver";
pub static HTTP01_SOLVER_LABEL_VALUE: &str = "true";
/// Solver pod labels carrying the challenged domain and token, mirrored in
/// the solver Service's selector.
pub static HTTP_DOMAIN_LABEL: &str = "acme.cert-manager.io/http-domain";
pub static HTTP_TOKEN_LABEL: &str = "acme.cert-manager.io/http-token";
/// Labels on challenge VirtualServices recording the solver pod and service.
pub static SOLVER_POD_LABEL: &str = "acme.cert-manager.io/solver-pod";
pub static SOLVER_SERVICE_LABEL: &str = "acme.cert-manager.io/solver-service";

/// Name prefix cert-manager gives every HTTP01 solver pod.
pub static SOLVER_POD_PREFIX: &str = "cm-acme-http-solver-";

/// Operator pod annotation carrying the gateway-domains index as JSON.
pub static GATEWAY_DOMAINS_ANNOTATION: &str = "istio-http01.rieset.io/gateway-domains";

/// Namespace cert-manager solver pods default to when the operator cannot
/// derive one, and the default operator namespace.
pub static DEFAULT_CERT_MANAGER_NAMESPACE: &str = "istio-system";

/// Port the solver serves on when its Service declares none.
pub const DEFAULT_SOLVER_PORT: u32 = 8089;

/// Gateway annotation remembering the original credentialName that was
/// swapped out for the temporary secret. The value keeps the original form
/// (bare name or `namespace/name`) so restore is exact.
pub fn original_credential_annotation(secret_name: &str) -> String {
    format!("istio-http01.rieset.io/original-credential-name-{secret_name}")
}

/// Gateway annotation recording that a port-80 server's httpsRedirect was
/// flipped off; the value is always `"true"`.
pub fn original_redirect_annotation(secret_name: &str) -> String {
    format!("istio-http01.rieset.io/original-https-redirect-{secret_name}")
}

/// Name of the temporary self-signed Certificate derived from `cert_name`.
pub fn temp_certificate_name(cert_name: &str) -> String {
    format!("{cert_name}-temp-selfsigned")
}

/// Name of the temporary self-signed Issuer derived from `cert_name`.
pub fn temp_issuer_name(cert_name: &str) -> String {
    format!("{cert_name}-temp-selfsigned-issuer")
}

/// Name of the secret the temporary Certificate writes.
pub fn temp_secret_name(secret_name: &str) -> String {
    format!("{secret_name}-temp")
}

/// Name of the HSTS-stripping EnvoyFilter for a Gateway.
pub fn hsts_filter_name(gateway_ns: &str, gateway_name: &str) -> String {
    format!("disable-hsts-{gateway_ns}-{gateway_name}")
}

/// Name of the challenge VirtualService for a domain. Kubernetes object
/// names are capped at 63 characters.
pub fn challenge_vs_name(domain: &str) -> String {
    let normalized = domain.replace('.', "-").replace('*', "wildcard");
    let mut name = format!("http01-solver-{normalized}");
    name.truncate(63);
    name
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn challenge_vs_name_normalizes_domain() {
        assert_eq!(
            challenge_vs_name("app.example.com"),
            "http01-solver-app-example-com"
        );
        assert_eq!(
            challenge_vs_name("*.example.com"),
            "http01-solver-wildcard-example-com"
        );
    }

    #[test]
    fn challenge_vs_name_truncates_to_63() {
        let long = "a.very.long.subdomain.chain.that.exceeds.kubernetes.name.limits.example.com";
        let name = challenge_vs_name(long);
        assert_eq!(name.len(), 63);
        assert!(name.starts_with("http01-solver-a-very-long"));
    }

    #[test]
    fn derived_names_follow_original_certificate() {
        assert_eq!(temp_certificate_name("web"), "web-temp-selfsigned");
        assert_eq!(temp_issuer_name("web"), "web-temp-selfsigned-issuer");
        assert_eq!(temp_secret_name("web-tls"), "web-tls-temp");
        assert_eq!(hsts_filter_name("app", "gw"), "disable-hsts-app-gw");
    }
}
