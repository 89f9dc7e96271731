#![allow(clippy::unwrap_used)]
// Integration tests for `Session` against a wiremock controller.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use url::Url;
use wiremock::matchers::{body_partial_json, header, header_exists, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use acikit_api::{
    ClassQuery, Credentials, Error, FakeClock, RequestSigner, Session, TransportConfig,
};

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup(credentials: Credentials) -> (MockServer, Session) {
    let server = MockServer::start().await;
    let base_url = Url::parse(&server.uri()).unwrap();
    let session = Session::new(base_url, credentials, TransportConfig::default()).unwrap();
    (server, session)
}

fn login_body(token: &str, refresh_secs: u64) -> serde_json::Value {
    json!({
        "totalCount": "1",
        "imdata": [{ "aaaLogin": { "attributes": {
            "token": token,
            "refreshTimeoutSeconds": refresh_secs.to_string(),
        }}}]
    })
}

async fn mount_login(server: &MockServer, token: &str, refresh_secs: u64) {
    Mock::given(method("POST"))
        .and(path("/api/aaaLogin.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(login_body(token, refresh_secs)))
        .mount(server)
        .await;
}

fn tenant(name: &str) -> serde_json::Value {
    json!({ "fvTenant": { "attributes": { "dn": format!("uni/tn-{name}"), "name": name } } })
}

// ── Authentication ──────────────────────────────────────────────────

#[tokio::test]
async fn test_password_login_sends_credentials() {
    let (server, session) = setup(Credentials::password("admin", "secret")).await;

    Mock::given(method("POST"))
        .and(path("/api/aaaLogin.json"))
        .and(body_partial_json(json!({
            "aaaUser": { "attributes": { "name": "admin", "pwd": "secret" } }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(login_body("TOKEN-1", 600)))
        .expect(1)
        .mount(&server)
        .await;

    session.login().await.unwrap();
    assert_eq!(session.token().as_deref(), Some("TOKEN-1"));
    assert!(session.is_authenticated());
}

#[tokio::test]
async fn test_login_rejected() {
    let (server, session) = setup(Credentials::password("admin", "wrong")).await;

    Mock::given(method("POST"))
        .and(path("/api/aaaLogin.json"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "imdata": [{ "error": { "attributes": { "code": "401", "text": "bad password" } } }]
        })))
        .mount(&server)
        .await;

    let result = session.login().await;
    match result {
        Err(Error::Authentication { message }) => assert!(message.contains("bad password")),
        other => panic!("expected Authentication error, got: {other:?}"),
    }
    assert!(session.token().is_none());
}

// ── Class queries ───────────────────────────────────────────────────

#[tokio::test]
async fn test_class_query_carries_token_cookie() {
    let (server, session) = setup(Credentials::password("admin", "secret")).await;
    mount_login(&server, "TOKEN-1", 600).await;

    Mock::given(method("GET"))
        .and(path("/api/class/fvTenant.json"))
        .and(header("Cookie", "APIC-cookie=TOKEN-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "totalCount": "2",
            "imdata": [tenant("common"), tenant("prod")]
        })))
        .expect(1)
        .mount(&server)
        .await;

    session.login().await.unwrap();
    let data = session
        .get_imdata(&ClassQuery::new("fvTenant").path())
        .await
        .unwrap();
    assert_eq!(data.imdata.len(), 2);
}

#[tokio::test]
async fn test_query_options_reach_the_wire() {
    let (server, session) = setup(Credentials::password("admin", "secret")).await;
    mount_login(&server, "TOKEN-1", 600).await;

    Mock::given(method("GET"))
        .and(path("/api/class/fvTenant.json"))
        .and(query_param("query-target", "subtree"))
        .and(query_param("target-subtree-class", "fvAp"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "imdata": [] })))
        .expect(1)
        .mount(&server)
        .await;

    session.login().await.unwrap();
    let query = ClassQuery::new("fvTenant")
        .target(acikit_api::QueryTarget::Subtree)
        .target_subtree_class("fvAp");
    session.get_imdata(&query.path()).await.unwrap();
}

#[tokio::test]
async fn test_controller_error_is_surfaced() {
    let (server, session) = setup(Credentials::password("admin", "secret")).await;
    mount_login(&server, "TOKEN-1", 600).await;

    Mock::given(method("GET"))
        .and(path("/api/class/noSuchClass.json"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "imdata": [{ "error": { "attributes": { "code": "122", "text": "unknown class noSuchClass" } } }]
        })))
        .mount(&server)
        .await;

    session.login().await.unwrap();
    let err = session
        .get_imdata("/api/class/noSuchClass.json")
        .await
        .unwrap_err();
    assert_eq!(err.controller_code(), Some("122"));
}

// ── Token lifecycle ─────────────────────────────────────────────────

#[tokio::test]
async fn test_request_after_deadline_refreshes_first() {
    let server = MockServer::start().await;
    let clock = FakeClock::new();
    let session = Session::new(
        Url::parse(&server.uri()).unwrap(),
        Credentials::password("admin", "secret"),
        TransportConfig::default(),
    )
    .unwrap()
    .clock(Arc::new(clock.clone()))
    .refresh_guard(Duration::from_secs(30));

    mount_login(&server, "TOKEN-1", 300).await;
    Mock::given(method("GET"))
        .and(path("/api/aaaRefresh.json"))
        .and(header("Cookie", "APIC-cookie=TOKEN-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(login_body("TOKEN-2", 300)))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/class/fvTenant.json"))
        .and(header("Cookie", "APIC-cookie=TOKEN-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "imdata": [] })))
        .expect(1)
        .mount(&server)
        .await;

    session.login().await.unwrap();
    clock.advance(Duration::from_secs(271));
    session.get_imdata("/api/class/fvTenant.json").await.unwrap();
    assert_eq!(session.token().as_deref(), Some("TOKEN-2"));
}

#[tokio::test]
async fn test_forbidden_triggers_single_relogin() {
    let (server, session) = setup(Credentials::password("admin", "secret")).await;
    mount_login(&server, "TOKEN-1", 600).await;

    Mock::given(method("GET"))
        .and(path("/api/class/fvTenant.json"))
        .respond_with(ResponseTemplate::new(403).set_body_string("token was invalid"))
        .expect(2)
        .mount(&server)
        .await;

    session.login().await.unwrap();
    let result = session.get("/api/class/fvTenant.json").await;
    assert!(matches!(result, Err(Error::SessionExpired)), "got: {result:?}");

    let logins = server
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.url.path() == "/api/aaaLogin.json")
        .count();
    assert_eq!(logins, 2);
}

// ── Certificate signing ─────────────────────────────────────────────

#[tokio::test]
async fn test_certificate_requests_are_signed() {
    let signer = RequestSigner::from_pem(include_bytes!("fixtures/user.key")).unwrap();
    let (server, session) =
        setup(Credentials::certificate("admin", "admin-cert", signer)).await;

    let expected_sig = include_str!("fixtures/get_tenants.sig").trim();
    let expected_cookie = format!(
        "APIC-Certificate-Algorithm=v1.0; \
         APIC-Certificate-DN=uni/userext/user-admin/usercert-admin-cert; \
         APIC-Certificate-Fingerprint=fingerprint; \
         APIC-Request-Signature={expected_sig}"
    );

    Mock::given(method("GET"))
        .and(path("/api/class/fvTenant.json"))
        .and(header("Cookie", expected_cookie.as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "imdata": [tenant("common")]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let data = session.get_imdata("/api/class/fvTenant.json").await.unwrap();
    assert_eq!(data.imdata.len(), 1);
}

#[tokio::test]
async fn test_logout_clears_token() {
    let (server, session) = setup(Credentials::password("admin", "secret")).await;
    mount_login(&server, "TOKEN-1", 600).await;

    Mock::given(method("POST"))
        .and(path("/api/aaaLogout.json"))
        .and(header_exists("Cookie"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "imdata": [] })))
        .expect(1)
        .mount(&server)
        .await;

    session.login().await.unwrap();
    session.logout().await.unwrap();
    assert!(session.token().is_none());
    assert!(matches!(session.websocket_url(), Err(Error::NotLoggedIn)));
}
