use super::*;
use crate::istio::{GatewaySpec, Server, ServerPort, ServerTlsSettings};

fn server(port: u32, credential: Option<&str>, redirect: Option<bool>, hosts: &[&str]) -> Server {
    Server {
        port: Some(ServerPort {
            number: port,
            name: None,
            protocol: None,
        }),
        hosts: hosts.iter().map(|h| h.to_string()).collect(),
        tls: Some(ServerTlsSettings {
            mode: None,
            credential_name: credential.map(String::from),
            https_redirect: redirect,
        }),
        name: None,
    }
}

fn redirecting_gateway(ns: &str, credential: &str) -> Gateway {
    let mut gw = Gateway::new(
        "gw",
        GatewaySpec {
            selector: None,
            servers: vec![
                server(80, None, Some(true), &["app.example.com"]),
                server(443, Some(credential), None, &["app.example.com"]),
            ],
        },
    );
    gw.metadata.namespace = Some(ns.into());
    gw
}

fn credential_of(gw: &Gateway, port: u32) -> Option<String> {
    gw.spec
        .servers
        .iter()
        .find(|s| s.port.as_ref().map(|p| p.number) == Some(port))
        .and_then(|s| s.tls.as_ref())
        .and_then(|tls| tls.credential_name.clone())
}

fn redirect_of(gw: &Gateway, port: u32) -> Option<bool> {
    gw.spec
        .servers
        .iter()
        .find(|s| s.port.as_ref().map(|p| p.number) == Some(port))
        .and_then(|s| s.tls.as_ref())
        .and_then(|tls| tls.https_redirect)
}

#[test]
fn swap_moves_credential_and_disables_redirect() {
    let mut gw = redirecting_gateway("app", "app-tls");
    assert!(swap_to_temporary(&mut gw, "app-tls", "app"));

    assert_eq!(credential_of(&gw, 443).as_deref(), Some("app-tls-temp"));
    assert_eq!(redirect_of(&gw, 80), Some(false));
    let annotations = gw.metadata.annotations.as_ref().unwrap();
    assert_eq!(
        annotations
            .get("istio-http01.rieset.io/original-credential-name-app-tls")
            .map(String::as_str),
        Some("app-tls")
    );
    assert_eq!(
        annotations
            .get("istio-http01.rieset.io/original-https-redirect-app-tls")
            .map(String::as_str),
        Some("true")
    );
}

#[test]
fn swap_is_idempotent() {
    let mut gw = redirecting_gateway("app", "app-tls");
    assert!(swap_to_temporary(&mut gw, "app-tls", "app"));
    // Second pass finds nothing left to change
    assert!(!swap_to_temporary(&mut gw, "app-tls", "app"));
    assert_eq!(credential_of(&gw, 443).as_deref(), Some("app-tls-temp"));
}

#[test]
fn swap_preserves_qualified_credential_form() {
    // Secret lives in a different namespace than the Gateway
    let mut gw = redirecting_gateway("edge", "certs/app-tls");
    assert!(swap_to_temporary(&mut gw, "app-tls", "certs"));
    assert_eq!(
        credential_of(&gw, 443).as_deref(),
        Some("certs/app-tls-temp")
    );
    assert_eq!(
        gw.annotations()
            .get("istio-http01.rieset.io/original-credential-name-app-tls")
            .map(String::as_str),
        Some("certs/app-tls")
    );
}

#[test]
fn swap_ignores_unrelated_credentials() {
    let mut gw = redirecting_gateway("app", "other-tls");
    // Only the redirect changes; the foreign credential stays put
    assert!(swap_to_temporary(&mut gw, "app-tls", "app"));
    assert_eq!(credential_of(&gw, 443).as_deref(), Some("other-tls"));
}

#[test]
fn swap_then_restore_round_trips_exactly() {
    let mut gw = redirecting_gateway("app", "app-tls");
    let pristine = serde_json::to_value(&gw).unwrap();

    assert!(swap_to_temporary(&mut gw, "app-tls", "app"));
    let outcome = restore_original(&mut gw, "app-tls", "app");
    assert!(outcome.changed);
    assert!(outcome.secret_restored);
    assert!(outcome.redirect_restored);

    assert_eq!(serde_json::to_value(&gw).unwrap(), pristine);
}

#[test]
fn round_trip_preserves_qualified_form() {
    let mut gw = redirecting_gateway("edge", "certs/app-tls");
    let pristine = serde_json::to_value(&gw).unwrap();
    assert!(swap_to_temporary(&mut gw, "app-tls", "certs"));
    restore_original(&mut gw, "app-tls", "certs");
    assert_eq!(serde_json::to_value(&gw).unwrap(), pristine);
}

#[test]
fn restore_strips_stale_annotations_when_already_on_original() {
    // A user manually restored the credential while in S2; annotations stayed
    let mut gw = redirecting_gateway("app", "app-tls");
    gw.metadata.annotations.get_or_insert_default().insert(
        "istio-http01.rieset.io/original-credential-name-app-tls".into(),
        "app-tls".into(),
    );
    gw.metadata.annotations.get_or_insert_default().insert(
        "istio-http01.rieset.io/original-https-redirect-app-tls".into(),
        "true".into(),
    );

    let outcome = restore_original(&mut gw, "app-tls", "app");
    assert!(outcome.changed);
    assert!(!outcome.secret_restored);
    assert!(gw.metadata.annotations.is_none());
}

#[test]
fn restore_keeps_foreign_annotations() {
    let mut gw = redirecting_gateway("app", "app-tls");
    gw.metadata
        .annotations
        .get_or_insert_default()
        .insert("team.example.com/owner".into(), "platform".into());
    swap_to_temporary(&mut gw, "app-tls", "app");
    restore_original(&mut gw, "app-tls", "app");
    assert_eq!(
        gw.annotations()
            .get("team.example.com/owner")
            .map(String::as_str),
        Some("platform")
    );
}

#[test]
fn restore_does_not_touch_untracked_redirect_servers() {
    // A port-80 server whose redirect was never on must stay untouched
    let mut gw = Gateway::new(
        "gw",
        GatewaySpec {
            selector: None,
            servers: vec![
                server(80, None, Some(true), &["a.example.com"]),
                server(80, None, None, &["b.example.com"]),
                server(443, Some("app-tls"), None, &["a.example.com"]),
            ],
        },
    );
    gw.metadata.namespace = Some("app".into());
    let pristine = serde_json::to_value(&gw).unwrap();

    swap_to_temporary(&mut gw, "app-tls", "app");
    restore_original(&mut gw, "app-tls", "app");
    assert_eq!(serde_json::to_value(&gw).unwrap(), pristine);
}

#[test]
fn disable_redirect_records_original_once() {
    let mut gw = redirecting_gateway("app", "app-tls-temp");
    assert!(disable_https_redirect(&mut gw, "app-tls"));
    assert_eq!(redirect_of(&gw, 80), Some(false));
    assert_eq!(
        gw.annotations()
            .get("istio-http01.rieset.io/original-https-redirect-app-tls")
            .map(String::as_str),
        Some("true")
    );
    // Nothing left to disable
    assert!(!disable_https_redirect(&mut gw, "app-tls"));
}

#[test]
fn has_https_redirect_only_counts_port_80() {
    let gw = redirecting_gateway("app", "app-tls");
    assert!(has_https_redirect(&gw));

    let mut no_redirect = redirecting_gateway("app", "app-tls");
    for server in &mut no_redirect.spec.servers {
        if let Some(tls) = server.tls.as_mut() {
            tls.https_redirect = None;
        }
    }
    assert!(!has_https_redirect(&no_redirect));
}

#[test]
fn uses_secret_understands_both_credential_forms() {
    let bare = redirecting_gateway("app", "app-tls");
    assert!(uses_secret(&bare, "app-tls", "app"));
    // Bare form matches by name regardless of the secret namespace
    assert!(uses_secret(&bare, "app-tls", "elsewhere"));

    let qualified = redirecting_gateway("edge", "certs/app-tls");
    assert!(uses_secret(&qualified, "app-tls", "certs"));
    assert!(!uses_secret(&qualified, "app-tls", "app"));
}

#[test]
fn related_via_annotation_alone() {
    let mut gw = redirecting_gateway("app", "something-else");
    assert!(!is_related(&gw, "app-tls", "app"));
    gw.metadata.annotations.get_or_insert_default().insert(
        "istio-http01.rieset.io/original-credential-name-app-tls".into(),
        "app-tls".into(),
    );
    assert!(is_related(&gw, "app-tls", "app"));
}

#[test]
fn related_via_temp_secret() {
    let gw = redirecting_gateway("app", "app-tls-temp");
    assert!(is_related(&gw, "app-tls", "app"));
}
