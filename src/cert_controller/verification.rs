//! End-to-end verification probes. After a swap or restore the operator can
//! confirm what the ingress actually serves by dialing its external address
//! and inspecting the presented leaf certificate. Probe outcomes only log;
//! they never fail a reconciliation, because the data plane may lag the
//! config plane by design.

use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::core::v1::Service;
use kube::api::ListParams;
use kube::{Api, Client, ResourceExt};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::*;
use x509_parser::extensions::GeneralName;
use x509_parser::prelude::{FromDer, X509Certificate};

use crate::cert_manager::Certificate;
use crate::domains::domains_for_gateway;
use crate::istio::Gateway;
use crate::{Error, Result};

/// Overall budget per probe; dialing gets half of it.
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);
const DIAL_TIMEOUT: Duration = Duration::from_secs(5);

/// The probe terminates TLS itself to capture the leaf; trust is not the
/// point, the certificate contents are.
#[derive(Debug)]
struct CaptureLeafVerifier(Arc<CryptoProvider>);

impl ServerCertVerifier for CaptureLeafVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

/// True when every label of the wanted selector appears in the Service's
/// selector with the same value.
fn service_matches_selector(
    service: &Service,
    wanted: &std::collections::BTreeMap<String, String>,
) -> bool {
    let Some(selector) = service.spec.as_ref().and_then(|s| s.selector.as_ref()) else {
        return false;
    };
    wanted
        .iter()
        .all(|(key, value)| selector.get(key) == Some(value))
}

/// External address of the ingress workload behind the Gateway: the Service
/// matching the Gateway's workload selector, preferring a LoadBalancer
/// ingress IP, then the resolved LoadBalancer hostname, then externalIPs.
pub async fn ingress_gateway_address(client: Client, gateway: &Gateway) -> Result<String> {
    let wanted = match gateway.spec.selector.as_ref().filter(|s| !s.is_empty()) {
        Some(selector) => selector.clone(),
        None => std::collections::BTreeMap::from([(
            "istio".to_string(),
            "ingressgateway".to_string(),
        )]),
    };

    let api_svc: Api<Service> = Api::all(client);
    let services = api_svc
        .list(&ListParams::default())
        .await
        .map_err(Error::KubeError)?;

    for svc in &services.items {
        if !service_matches_selector(svc, &wanted) {
            continue;
        }
        let spec = svc.spec.as_ref();
        if spec.and_then(|s| s.type_.as_deref()) == Some("LoadBalancer") {
            let ingress = svc
                .status
                .as_ref()
                .and_then(|s| s.load_balancer.as_ref())
                .and_then(|lb| lb.ingress.as_ref())
                .and_then(|ing| ing.first());
            if let Some(ingress) = ingress {
                if let Some(ip) = ingress.ip.as_ref().filter(|ip| !ip.is_empty()) {
                    return Ok(ip.clone());
                }
                if let Some(hostname) = ingress.hostname.as_ref().filter(|h| !h.is_empty())
                    && let Ok(mut addrs) =
                        tokio::net::lookup_host((hostname.as_str(), 443)).await
                    && let Some(addr) = addrs.next()
                {
                    return Ok(addr.ip().to_string());
                }
            }
        }
        if let Some(ip) = spec
            .and_then(|s| s.external_ips.as_ref())
            .and_then(|ips| ips.first())
        {
            return Ok(ip.clone());
        }
    }

    Err(Error::OtherError(format!(
        "ingress gateway IP not found for Gateway {}/{}",
        gateway.namespace().unwrap_or_default(),
        gateway.name_any()
    )))
}

/// DNS names a leaf certificate answers for: SAN DNS entries plus the
/// subject common name.
fn leaf_dns_names(der: &[u8]) -> Result<Vec<String>> {
    let (_, cert) = X509Certificate::from_der(der)
        .map_err(|e| Error::OtherError(format!("failed to parse certificate: {e}")))?;
    let mut names: Vec<String> = Vec::new();
    if let Ok(Some(san)) = cert.subject_alternative_name() {
        for general_name in &san.value.general_names {
            if let GeneralName::DNSName(dns) = general_name {
                names.push((*dns).to_string());
            }
        }
    }
    if let Some(cn) = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|attr| attr.as_str().ok())
        && !cn.is_empty()
    {
        names.push(cn.to_string());
    }
    Ok(names)
}

/// The presented certificate must answer for at least one Gateway domain
/// (exactly, or as a name the domain is a subdomain of) and carry at least
/// one of the expected DNS names.
fn leaf_covers(cert_names: &[String], gateway_domains: &[String], expected: &[String]) -> bool {
    let domain_found = cert_names.iter().any(|cert_name| {
        gateway_domains
            .iter()
            .any(|domain| domain == cert_name || domain.ends_with(&format!(".{cert_name}")))
    });
    let expected_found = cert_names
        .iter()
        .any(|cert_name| expected.iter().any(|name| name == cert_name));
    domain_found && expected_found
}

fn parse_status_line(response: &str) -> Option<u16> {
    response
        .lines()
        .next()?
        .split_whitespace()
        .nth(1)?
        .parse()
        .ok()
}

async fn https_probe(domain: &str, expected: &[String], domains: &[String], ingress_ip: &str) -> Result<u16> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = rustls::ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(Error::TlsError)?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(CaptureLeafVerifier(provider)))
        .with_no_client_auth();
    let connector = tokio_rustls::TlsConnector::from(Arc::new(config));
    let server_name = ServerName::try_from(domain.to_string())
        .map_err(|e| Error::ValidationError(format!("invalid SNI {domain}: {e}")))?;

    let tcp = tokio::time::timeout(DIAL_TIMEOUT, TcpStream::connect((ingress_ip, 443)))
        .await
        .map_err(|_| Error::OtherError(format!("dial timeout connecting to {ingress_ip}:443")))?
        .map_err(Error::IoError)?;
    let mut stream = connector
        .connect(server_name, tcp)
        .await
        .map_err(Error::IoError)?;

    let leaf = stream
        .get_ref()
        .1
        .peer_certificates()
        .and_then(|certs| certs.first())
        .ok_or_else(|| Error::OtherError("no certificate provided".into()))?;
    let cert_names = leaf_dns_names(leaf.as_ref())?;
    if !leaf_covers(&cert_names, domains, expected) {
        return Err(Error::ValidationError(format!(
            "certificate DNS names ({cert_names:?}) do not match Gateway domains ({domains:?}) and expected names ({expected:?})"
        )));
    }

    let request =
        format!("GET / HTTP/1.1\r\nHost: {domain}\r\nConnection: close\r\n\r\n");
    stream
        .write_all(request.as_bytes())
        .await
        .map_err(Error::IoError)?;
    let mut buf = vec![0u8; 1024];
    let n = stream.read(&mut buf).await.map_err(Error::IoError)?;
    let status = parse_status_line(&String::from_utf8_lossy(&buf[..n]))
        .ok_or_else(|| Error::OtherError("unparseable HTTPS response".into()))?;
    if status >= 400 {
        return Err(Error::OtherError(format!(
            "HTTPS request failed with status code {status}"
        )));
    }
    Ok(status)
}

/// Connect to the ingress over HTTPS with SNI set to the first Gateway
/// domain, check the presented leaf against the expected DNS names, then
/// complete one GET.
pub async fn verify_certificate_via_https(
    client: Client,
    gateway: &Gateway,
    expected_dns_names: &[String],
    ingress_ip: &str,
) -> Result<()> {
    let domains = domains_for_gateway(client, gateway).await?;
    let Some(domain) = domains.first().cloned() else {
        return Err(Error::ValidationError(format!(
            "no domains found for Gateway {}/{}",
            gateway.namespace().unwrap_or_default(),
            gateway.name_any()
        )));
    };

    let status = tokio::time::timeout(
        PROBE_TIMEOUT,
        https_probe(&domain, expected_dns_names, &domains, ingress_ip),
    )
    .await
    .map_err(|_| Error::OtherError("HTTPS probe timed out".into()))??;

    info!(
        gateway = %gateway.name_any(),
        gateway_namespace = %gateway.namespace().unwrap_or_default(),
        domain = %domain,
        ingress_ip,
        status_code = status,
        "HTTPS certificate verification successful"
    );
    Ok(())
}

async fn http_probe(domain: &str, ingress_ip: &str) -> Result<u16> {
    let mut stream = tokio::time::timeout(DIAL_TIMEOUT, TcpStream::connect((ingress_ip, 80)))
        .await
        .map_err(|_| Error::OtherError(format!("dial timeout connecting to {ingress_ip}:80")))?
        .map_err(Error::IoError)?;
    let request =
        format!("GET / HTTP/1.1\r\nHost: {domain}\r\nConnection: close\r\n\r\n");
    stream
        .write_all(request.as_bytes())
        .await
        .map_err(Error::IoError)?;
    let mut buf = vec![0u8; 1024];
    let n = stream.read(&mut buf).await.map_err(Error::IoError)?;
    let status = parse_status_line(&String::from_utf8_lossy(&buf[..n]))
        .ok_or_else(|| Error::OtherError("unparseable HTTP response".into()))?;
    if status >= 400 {
        return Err(Error::OtherError(format!(
            "HTTP request failed with status code {status}"
        )));
    }
    Ok(status)
}

/// Dial the ingress over plain HTTP with the first Gateway domain as Host;
/// anything below 400 counts as reachable.
pub async fn verify_via_http(client: Client, gateway: &Gateway, ingress_ip: &str) -> Result<()> {
    let domains = domains_for_gateway(client, gateway).await?;
    let Some(domain) = domains.first().cloned() else {
        return Err(Error::ValidationError(format!(
            "no domains found for Gateway {}/{}",
            gateway.namespace().unwrap_or_default(),
            gateway.name_any()
        )));
    };

    let status = tokio::time::timeout(PROBE_TIMEOUT, http_probe(&domain, ingress_ip))
        .await
        .map_err(|_| Error::OtherError("HTTP probe timed out".into()))??;

    info!(
        gateway = %gateway.name_any(),
        gateway_namespace = %gateway.namespace().unwrap_or_default(),
        domain = %domain,
        ingress_ip,
        status_code = status,
        "HTTP verification successful"
    );
    Ok(())
}

/// Check that the ingress presents the temporary certificate. Log-only.
pub async fn verify_swap(client: Client, gateway: &Gateway, temp_cert: &Certificate) {
    let ingress_ip = match ingress_gateway_address(client.clone(), gateway).await {
        Ok(ip) => ip,
        Err(err) => {
            warn!(gateway = %gateway.name_any(), error = %err, "failed to get ingress gateway IP");
            return;
        }
    };
    let expected = temp_cert.spec.dns_names.clone().unwrap_or_default();
    if let Err(err) =
        verify_certificate_via_https(client, gateway, &expected, &ingress_ip).await
    {
        warn!(
            gateway = %gateway.name_any(),
            ingress_ip = %ingress_ip,
            error = %err,
            "failed to verify temporary certificate via HTTPS"
        );
    }
}

/// Check that the ingress is back on the original certificate after a
/// restore; falls back to a plain HTTP reachability probe when the original
/// Certificate cannot be found. Log-only.
pub async fn verify_restore(client: Client, gateway: &Gateway, cert: Option<&Certificate>) {
    let ingress_ip = match ingress_gateway_address(client.clone(), gateway).await {
        Ok(ip) => ip,
        Err(err) => {
            warn!(gateway = %gateway.name_any(), error = %err, "failed to get ingress gateway IP");
            return;
        }
    };
    let result = match cert {
        Some(cert) => {
            let expected = cert.spec.dns_names.clone().unwrap_or_default();
            verify_certificate_via_https(client, gateway, &expected, &ingress_ip).await
        }
        None => verify_via_http(client, gateway, &ingress_ip).await,
    };
    if let Err(err) = result {
        warn!(
            gateway = %gateway.name_any(),
            ingress_ip = %ingress_ip,
            error = %err,
            "failed to verify certificate after restore"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaf_must_cover_a_gateway_domain_and_an_expected_name() {
        let cert_names = vec!["app.example.com".to_string()];
        let domains = vec!["app.example.com".to_string()];
        let expected = vec!["app.example.com".to_string()];
        assert!(leaf_covers(&cert_names, &domains, &expected));

        // Covers the gateway domain but not the expected set
        let other_expected = vec!["other.example.com".to_string()];
        assert!(!leaf_covers(&cert_names, &domains, &other_expected));

        // Matches the expected set but none of the gateway domains
        let other_domains = vec!["unrelated.example.net".to_string()];
        assert!(!leaf_covers(&cert_names, &other_domains, &expected));
    }

    #[test]
    fn leaf_parent_name_covers_subdomains() {
        // A cert for example.com covers app.example.com as a suffix parent
        let cert_names = vec!["example.com".to_string()];
        let domains = vec!["app.example.com".to_string()];
        let expected = vec!["example.com".to_string()];
        assert!(leaf_covers(&cert_names, &domains, &expected));

        // But a shared suffix alone is not parenthood
        let cert_names = vec!["pp.example.com".to_string()];
        assert!(!leaf_covers(
            &cert_names,
            &domains,
            &["pp.example.com".to_string()]
        ));
    }

    #[test]
    fn status_line_parsing() {
        assert_eq!(parse_status_line("HTTP/1.1 200 OK\r\n"), Some(200));
        assert_eq!(
            parse_status_line("HTTP/1.1 301 Moved Permanently\r\nLocation: x"),
            Some(301)
        );
        assert_eq!(parse_status_line("garbage"), None);
        assert_eq!(parse_status_line(""), None);
    }

    #[test]
    fn selector_match_is_subset_semantics() {
        use k8s_openapi::api::core::v1::ServiceSpec;
        let mut svc = Service::default();
        svc.spec = Some(ServiceSpec {
            selector: Some(
                [
                    ("istio".to_string(), "ingressgateway".to_string()),
                    ("app".to_string(), "istio-ingressgateway".to_string()),
                ]
                .into_iter()
                .collect(),
            ),
            ..ServiceSpec::default()
        });
        let wanted =
            std::collections::BTreeMap::from([("istio".to_string(), "ingressgateway".to_string())]);
        assert!(service_matches_selector(&svc, &wanted));

        let mismatched =
            std::collections::BTreeMap::from([("istio".to_string(), "egressgateway".to_string())]);
        assert!(!service_matches_selector(&svc, &mismatched));

        let selectorless = Service::default();
        assert!(!service_matches_selector(&selectorless, &wanted));
    }
}
