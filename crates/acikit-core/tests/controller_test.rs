#![allow(clippy::unwrap_used)]
// End-to-end tests for `Controller`: wiremock for plain HTTP flows, the
// in-memory dispatcher and socket for subscriptions and clock-driven flows.

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use url::Url;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use acikit_api::mock::{MockConnector, MockDispatcher};
use acikit_api::{FakeClock, Method};
use acikit_core::{
    ConnectionState, Controller, ControllerConfig, CoreError, DeepQuery, Registry, Seams,
    SubscriptionEvent, within,
};

// ── Helpers ─────────────────────────────────────────────────────────

fn tenant(name: &str) -> Value {
    json!({ "fvTenant": { "attributes": { "dn": format!("uni/tn-{name}"), "name": name } } })
}

async fn wiremock_controller() -> (MockServer, Controller) {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/aaaLogin.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "imdata": [{ "aaaLogin": { "attributes": {
                "token": "T1", "refreshTimeoutSeconds": "300"
            }}}]
        })))
        .mount(&server)
        .await;

    let mut config =
        ControllerConfig::with_password(Url::parse(&server.uri()).unwrap(), "admin", "p");
    config.subscription_enabled = false;
    let controller = Controller::new(config);
    controller.connect().await.unwrap();
    (server, controller)
}

struct Harness {
    controller: Controller,
    mock: Arc<MockDispatcher>,
    socket: Arc<MockConnector>,
    clock: FakeClock,
}

async fn seamed_controller(refresh_secs: u64) -> Harness {
    let mock = Arc::new(MockDispatcher::new());
    mock.on_login("T1", refresh_secs);
    let socket = Arc::new(MockConnector::new());
    let clock = FakeClock::new();

    let mut config =
        ControllerConfig::with_password(Url::parse("https://c.example/").unwrap(), "admin", "p");
    config.reconnect.initial_delay = Duration::from_millis(5);
    config.reconnect.max_delay = Duration::from_millis(20);

    let controller = Controller::with_seams(
        config,
        Registry::with_defaults(),
        Seams {
            dispatcher: Some(mock.clone()),
            connector: Some(socket.clone()),
            clock: Some(Arc::new(clock.clone())),
        },
    );
    controller.connect().await.unwrap();
    Harness {
        controller,
        mock,
        socket,
        clock,
    }
}

const TENANT_SUB: &str = "/api/class/fvTenant.json?subscription=yes";

fn frame(id: &str, name: &str, status: &str) -> Value {
    json!({
        "subscriptionId": id,
        "imdata": [{ "fvTenant": { "attributes": {
            "dn": format!("uni/tn-{name}"), "name": name, "status": status
        }}}]
    })
}

// ── Queries ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_login_and_class_fetch() {
    let (server, controller) = wiremock_controller().await;

    Mock::given(method("GET"))
        .and(path("/api/class/fvTenant.json"))
        .and(query_param("query-target", "self"))
        .and(header("cookie", "APIC-cookie=T1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "totalCount": "2",
            "imdata": [tenant("common"), tenant("t1")]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let snapshot = controller.get_class("fvTenant").await.unwrap();
    assert!(snapshot.report.is_clean());

    let names: Vec<&str> = snapshot
        .nodes()
        .iter()
        .map(|id| snapshot.graph.node(*id).name())
        .collect();
    assert_eq!(names, vec!["common", "t1"]);
    assert!(
        snapshot
            .nodes()
            .iter()
            .all(|id| snapshot.graph.node(*id).parent().is_none())
    );
    assert_eq!(controller.session().unwrap().token().as_deref(), Some("T1"));
}

#[tokio::test]
async fn test_deep_fetch_round_trips() {
    let (server, controller) = wiremock_controller().await;

    let tree = json!({
        "fvTenant": {
            "attributes": { "dn": "uni/tn-t1", "name": "t1", "descr": "prod" },
            "children": [
                { "fvAp": {
                    "attributes": { "dn": "uni/tn-t1/ap-app", "name": "app" },
                    "children": [{ "fvAEPg": {
                        "attributes": { "dn": "uni/tn-t1/ap-app/epg-web", "name": "web", "pcTag": "49153" },
                        "children": [
                            { "fvRsBd": { "attributes": { "tnFvBDName": "bd" } } },
                            { "tagInst": { "attributes": { "name": "frontend" } } }
                        ]
                    }}]
                }},
                { "fvBD": {
                    "attributes": { "dn": "uni/tn-t1/BD-bd", "name": "bd" },
                    "children": [{ "fvRsCtx": { "attributes": { "tnFvCtxName": "vrf" } } }]
                }},
                { "fvCtx": { "attributes": { "dn": "uni/tn-t1/ctx-vrf", "name": "vrf" } } }
            ]
        }
    });

    Mock::given(method("GET"))
        .and(path("/api/mo/uni/tn-t1.json"))
        .and(query_param("rsp-subtree", "full"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "imdata": [tree.clone()] })),
        )
        .mount(&server)
        .await;

    let snapshot = controller
        .get_deep("uni/tn-t1", &DeepQuery::default())
        .await
        .unwrap();
    assert!(snapshot.report.is_clean(), "{:?}", snapshot.report);
    assert!(snapshot.report.unresolved.is_empty());

    let root = snapshot.nodes()[0];
    assert_eq!(snapshot.graph.get_json(root), tree);
}

#[tokio::test]
async fn test_deep_fetch_of_missing_dn() {
    let (server, controller) = wiremock_controller().await;
    Mock::given(method("GET"))
        .and(path("/api/mo/uni/tn-nope.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "imdata": [] })))
        .mount(&server)
        .await;

    let err = controller
        .get_deep("uni/tn-nope", &DeepQuery::default())
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::NotFound { .. }));
}

#[tokio::test]
async fn test_class_deep_fetch_builds_subtrees() {
    let (server, controller) = wiremock_controller().await;
    Mock::given(method("GET"))
        .and(path("/api/class/fvTenant.json"))
        .and(query_param("rsp-subtree", "full"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "imdata": [
            { "fvTenant": {
                "attributes": { "dn": "uni/tn-t1", "name": "t1" },
                "children": [{ "fvBD": { "attributes": { "dn": "uni/tn-t1/BD-bd", "name": "bd" } } }]
            }},
            tenant("t2")
        ]})))
        .mount(&server)
        .await;

    let snapshot = controller
        .get_class_deep("fvTenant", &DeepQuery::default())
        .await
        .unwrap();
    assert_eq!(snapshot.nodes().len(), 2);
    assert!(snapshot.graph.find_by_dn("uni/tn-t1/BD-bd").is_some());
}

#[tokio::test]
async fn test_timeout_leaves_graph_untouched() {
    let (server, controller) = wiremock_controller().await;
    Mock::given(method("GET"))
        .and(path("/api/class/fvTenant.json"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "imdata": [tenant("late")] }))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let mut graph = controller.new_graph();
    let result = within(
        Duration::from_millis(200),
        controller.fetch_into(&mut graph, "/api/class/fvTenant.json", None, &[]),
    )
    .await;
    assert!(matches!(result, Err(CoreError::Timeout { .. })));
    assert!(graph.is_empty());
}

// ── Push ────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_push_posts_under_parent_dn() {
    let h = seamed_controller(300).await;
    let mut graph = h.controller.new_graph();
    let tenant = graph.add_root("fvTenant", "t1").unwrap();
    let app = graph.add_child(tenant, "fvAp", "app").unwrap();

    let resp = h.controller.push(&graph, tenant).await.unwrap();
    assert!(resp.is_ok());
    let resp = h.controller.push(&graph, app).await.unwrap();
    assert!(resp.is_ok());

    let to_uni = h.mock.requests_to("/api/mo/uni.json");
    assert_eq!(to_uni.len(), 1);
    let body: Value = serde_json::from_str(to_uni[0].body.as_deref().unwrap()).unwrap();
    assert_eq!(body["fvTenant"]["attributes"]["dn"], "uni/tn-t1");
    assert_eq!(h.mock.requests_to("/api/mo/uni/tn-t1.json").len(), 1);
}

#[tokio::test]
async fn test_rejected_push_is_returned() {
    let h = seamed_controller(300).await;
    h.mock.respond(
        Method::Post,
        "/api/mo/uni.json",
        400,
        json!({ "imdata": [{ "error": { "attributes": { "code": "103", "text": "bad" } } }] }),
    );
    let mut graph = h.controller.new_graph();
    let tenant = graph.add_root("fvTenant", "t1").unwrap();

    let resp = h.controller.push(&graph, tenant).await.unwrap();
    assert_eq!(resp.status, 400);
    assert_eq!(resp.fault().unwrap().code.as_deref(), Some("103"));
}

// ── Token refresh ───────────────────────────────────────────────────

#[tokio::test]
async fn test_refresh_precedes_request_after_deadline() {
    let h = seamed_controller(60).await;
    h.mock.on_refresh("T2", 60);

    h.clock.advance(Duration::from_secs(51));
    h.controller.session().unwrap().get("/api/class/fvTenant.json").await.unwrap();

    let paths: Vec<String> = h.mock.requests().into_iter().map(|r| r.path).collect();
    assert_eq!(
        paths,
        vec![
            "/api/aaaLogin.json".to_string(),
            "/api/aaaRefresh.json".to_string(),
            "/api/class/fvTenant.json".to_string(),
        ]
    );
    let get = h.mock.requests_to("/api/class/fvTenant.json");
    assert_eq!(get[0].header("Cookie"), Some("APIC-cookie=T2"));
}

#[tokio::test]
async fn test_no_refresh_before_deadline() {
    let h = seamed_controller(60).await;
    h.clock.advance(Duration::from_secs(49));
    h.controller.session().unwrap().get("/api/class/fvTenant.json").await.unwrap();
    assert!(h.mock.requests_to("/api/aaaRefresh.json").is_empty());
}

// ── Subscriptions ───────────────────────────────────────────────────

#[tokio::test]
async fn test_subscription_events_apply_in_order() {
    let h = seamed_controller(300).await;
    h.mock.respond_json(
        Method::Get,
        TENANT_SUB,
        json!({ "subscriptionId": "72057594037927937", "imdata": [] }),
    );

    let handle = h.controller.subscribe_class("fvTenant", true).await.unwrap();
    assert!(h.controller.is_subscribed(TENANT_SUB));

    for status in ["created", "modified", "deleted"] {
        assert!(h.socket.send_frame(&frame("72057594037927937", "t2", status)));
    }
    let mut graph = h.controller.new_graph();
    let mut statuses = Vec::new();
    for _ in 0..3 {
        let event = h
            .controller
            .next_event(handle, Duration::from_secs(2))
            .await
            .unwrap();
        let mo = event.as_object().unwrap();
        statuses.push(mo.status.to_string());
        graph.apply_event(mo).unwrap();
    }
    assert_eq!(statuses, vec!["created", "modified", "deleted"]);

    let t2 = graph.find_by_dn("uni/tn-t2").unwrap();
    assert_eq!(graph.node(t2).name(), "t2");
    assert!(graph.is_deleted(t2));
}

#[tokio::test]
async fn test_reconnect_replays_subscription() {
    let h = seamed_controller(300).await;
    h.mock
        .respond_json(Method::Get, TENANT_SUB, json!({ "subscriptionId": "1", "imdata": [] }));
    h.mock
        .respond_json(Method::Get, TENANT_SUB, json!({ "subscriptionId": "2", "imdata": [] }));
    let mut state = h.controller.connection_state();

    let handle = h.controller.subscribe_class("fvTenant", true).await.unwrap();
    h.socket.drop_connection();
    h.socket.wait_for_connection(2).await;

    let first = h
        .controller
        .next_event(handle, Duration::from_secs(2))
        .await
        .unwrap();
    assert!(first.is_lost());
    state
        .wait_for(|s| *s == ConnectionState::Connected)
        .await
        .unwrap();

    assert!(h.socket.send_frame(&frame("2", "t3", "created")));
    let mut graph = h.controller.new_graph();
    let event = h
        .controller
        .next_event(handle, Duration::from_secs(2))
        .await
        .unwrap();
    assert!(matches!(event, SubscriptionEvent::Object(_)));
    graph.apply_event(event.as_object().unwrap()).unwrap();
    assert!(graph.find_by_dn("uni/tn-t3").is_some());

    let stats = h.controller.stats().unwrap();
    assert_eq!(stats.channel.reconnects, 1);
    assert_eq!(h.mock.requests_to("/api/class/fvTenant.json").len(), 2);
}

#[tokio::test]
async fn test_subscriptions_disabled() {
    let (_server, controller) = wiremock_controller().await;
    let err = controller.subscribe_class("fvTenant", false).await.unwrap_err();
    assert!(matches!(err, CoreError::SubscriptionsDisabled));
}

#[tokio::test]
async fn test_disconnect_logs_out() {
    let h = seamed_controller(300).await;
    h.controller.disconnect().await;
    assert_eq!(h.mock.requests_to("/api/aaaLogout.json").len(), 1);
    assert_eq!(
        *h.controller.connection_state().borrow(),
        ConnectionState::Disconnected
    );
    assert!(matches!(
        h.controller.session(),
        Err(CoreError::ControllerDisconnected)
    ));
}
