//! Typed declarations for the cert-manager.io/v1 resources the operator
//! observes and creates. Only the fields the operator touches are declared;
//! unknown fields pass through the apiserver untouched because every write
//! to a foreign Certificate is a create of an object we own.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

#[skip_serializing_none]
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
#[kube(
    group = "cert-manager.io",
    version = "v1",
    kind = "Certificate",
    derive = "Default",
    namespaced,
    status = "CertificateStatus"
)]
pub struct CertificateSpec {
    pub secret_name: String,
    pub dns_names: Option<Vec<String>>,
    pub common_name: Option<String>,
    /// Lifetime as a cert-manager duration string, e.g. `"24h"`.
    pub duration: Option<String>,
    /// Renewal window before expiry, e.g. `"1h"`.
    pub renew_before: Option<String>,
    pub issuer_ref: CertIssuerRef,
}

#[skip_serializing_none]
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CertIssuerRef {
    pub name: String,
    pub kind: Option<String>,
    pub group: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CertificateStatus {
    pub conditions: Option<Vec<CertManagerCondition>>,
}

/// cert-manager condition; `status` is the string "True"/"False"/"Unknown".
#[skip_serializing_none]
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CertManagerCondition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: String,
    pub reason: Option<String>,
    pub message: Option<String>,
}

/// A Certificate is ready once cert-manager has issued it and written the
/// secret. Absent Ready condition means not ready.
pub fn is_certificate_ready(cert: &Certificate) -> bool {
    cert.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|conds| {
            conds
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
        .unwrap_or(false)
}

#[skip_serializing_none]
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
#[kube(
    group = "cert-manager.io",
    version = "v1",
    kind = "Issuer",
    derive = "Default",
    namespaced,
    status = "IssuerStatus"
)]
pub struct IssuerSpec {
    pub acme: Option<AcmeIssuer>,
    pub self_signed: Option<SelfSignedIssuer>,
    pub ca: Option<CaIssuer>,
    pub vault: Option<VaultIssuer>,
}

#[skip_serializing_none]
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AcmeIssuer {
    pub server: Option<String>,
    pub email: Option<String>,
    pub solvers: Option<Vec<AcmeSolver>>,
}

#[skip_serializing_none]
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AcmeSolver {
    pub http01: Option<AcmeHttp01Solver>,
}

#[skip_serializing_none]
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AcmeHttp01Solver {
    pub ingress: Option<AcmeHttp01Ingress>,
}

#[skip_serializing_none]
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AcmeHttp01Ingress {
    pub class: Option<String>,
    pub name: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SelfSignedIssuer {}

#[skip_serializing_none]
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CaIssuer {
    pub secret_name: Option<String>,
}

#[skip_serializing_none]
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VaultIssuer {
    pub server: Option<String>,
    pub path: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IssuerStatus {
    pub conditions: Option<Vec<CertManagerCondition>>,
}
