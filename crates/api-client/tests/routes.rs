use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::extract::{Json, Path, State};
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::Router;
use serde_json::{Value, json};
use tokio::sync::Mutex;

use opencode2go_api_client::opencode2go_api_types::{SendMessageRequest, ServerEvent};
use opencode2go_api_client::{ApiClient, ClientError, RetryConfig, StreamItem};
use opencode2go_core::{PermissionLevel, PermissionSettings};

#[derive(Default)]
struct MockState {
    sent: Mutex<Vec<(String, Value)>>,
    permissions: Mutex<Option<Value>>,
    stream_connections: AtomicUsize,
}

async fn spawn(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock server");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    format!("http://{addr}")
}

fn mock_router(state: Arc<MockState>) -> Router {
    Router::new()
        .route("/app", get(|| async { Json(json!({"hostname": "devbox", "version": "0.4.2"})) }))
        .route(
            "/config/providers",
            get(|| async {
                // Raw body keeps the model key order the server chose.
                (
                    [(header::CONTENT_TYPE, "application/json")],
                    r#"{"providers":[{"id":"anthropic","name":"Anthropic","models":{"zeta":{"id":"zeta","name":"Zeta"},"alpha":{"id":"alpha","name":"Alpha"}}}],"default":{"anthropic":"alpha"}}"#,
                )
            }),
        )
        .route("/config/modes", get(|| async { StatusCode::INTERNAL_SERVER_ERROR }))
        .route(
            "/config/permission",
            post(|State(s): State<Arc<MockState>>, Json(body): Json<Value>| async move {
                *s.permissions.lock().await = Some(body);
                Json(json!(true))
            }),
        )
        .route(
            "/session",
            get(|| async {
                Json(json!([
                    {"id": "ses_2", "title": "Second", "time": {"created": 1_700_000_100, "updated": 1_700_000_200}},
                    {"id": "ses_1", "title": "First", "parentID": null, "time": {"created": 1_700_000_000, "updated": 1_700_000_050}}
                ]))
            })
            .post(|| async {
                Json(json!({"id": "ses_new", "title": "", "time": {"created": 1_700_000_300, "updated": 1_700_000_300}}))
            }),
        )
        .route(
            "/session/{id}",
            delete(|Path(id): Path<String>| async move {
                if id == "ses_1" {
                    Json(json!(true)).into_response()
                } else {
                    (StatusCode::NOT_FOUND, "no such session").into_response()
                }
            }),
        )
        .route(
            "/session/{id}/message",
            get(|Path(id): Path<String>| async move {
                if id != "ses_1" {
                    return Json(json!([])).into_response();
                }
                Json(json!([
                    {"info": {"id": "msg_1", "role": "user", "sessionID": "ses_1", "time": {"created": 1_700_000_000_000i64}},
                     "parts": [{"id": "prt_1", "type": "text", "text": "hello"}]},
                    {"info": {"id": "msg_2", "role": "assistant", "sessionID": "ses_1", "time": {"created": 1_700_000_001_000i64}},
                     "parts": [{"id": "prt_2", "type": "tool", "tool": "bash", "state": {"status": "completed"}}]}
                ]))
                .into_response()
            })
            .post(
                |State(s): State<Arc<MockState>>, Path(id): Path<String>, Json(body): Json<Value>| async move {
                    s.sent.lock().await.push((id, body));
                    Json(json!({"id": "msg_reply", "role": "assistant"}))
                },
            ),
        )
        .route(
            "/event",
            get(|State(s): State<Arc<MockState>>| async move {
                s.stream_connections.fetch_add(1, Ordering::SeqCst);
                (
                    [(header::CONTENT_TYPE, "text/event-stream")],
                    concat!(
                        "data: {\"type\":\"server.connected\",\"properties\":{}}\n\n",
                        ": ping\n\n",
                        "data: not json\n\n",
                        "data: {\"type\":\"message.part.updated\",\"properties\":{\"part\":{\"id\":\"prt_9\",\"sessionID\":\"ses_1\",\"messageID\":\"msg_9\",\"type\":\"text\",\"text\":\"hi\"}}}\n\n",
                    ),
                )
            }),
        )
        .with_state(state)
}

async fn client_with_state() -> (ApiClient, Arc<MockState>) {
    let state = Arc::new(MockState::default());
    let base = spawn(mock_router(state.clone())).await;
    let client = ApiClient::new(&format!("{base}/"), Duration::from_secs(5)).expect("client");
    (client, state)
}

#[tokio::test]
async fn probe_and_config_routes() {
    let (client, _) = client_with_state().await;
    let app = client.probe().await.expect("probe");
    assert_eq!(app.hostname.as_deref(), Some("devbox"));

    let providers = client.providers().await.expect("providers");
    let models: Vec<_> = providers.providers[0].models.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(models, vec!["zeta", "alpha"]);
    assert_eq!(providers.default.get("anthropic").map(String::as_str), Some("alpha"));

    let err = client.modes().await.expect_err("modes should fail");
    assert_eq!(err.status(), Some(500));
    assert!(err.is_transient());
}

#[tokio::test]
async fn session_routes_round_trip() {
    let (client, _) = client_with_state().await;
    let sessions = client.list_sessions().await.expect("list");
    assert_eq!(sessions.len(), 2);
    assert_eq!(sessions[0].id, "ses_2");
    assert!(sessions[1].parent_id.is_none());

    let created = client.create_session().await.expect("create");
    assert_eq!(created.id, "ses_new");

    client.delete_session("ses_1").await.expect("delete existing");
    match client.delete_session("ses_missing").await {
        Err(ClientError::Server { status, body }) => {
            assert_eq!(status, 404);
            assert_eq!(body, "no such session");
        }
        other => panic!("expected 404, got {other:?}"),
    }
}

#[tokio::test]
async fn message_history_and_send() {
    let (client, state) = client_with_state().await;
    let history = client.messages("ses_1").await.expect("history");
    assert_eq!(history.len(), 2);
    let assistant = history[1].clone().into_message();
    assert_eq!(assistant.parts[0].kind().as_str(), "tool");

    let req = SendMessageRequest::text("ses_1", "msg_a", "part_a", "hi there", "anthropic", "alpha", "build");
    client.send_message("ses_1", &req).await.expect("send");
    let sent = state.sent.lock().await;
    assert_eq!(sent[0].0, "ses_1");
    assert_eq!(sent[0].1["parts"][0]["text"], "hi there");
    assert_eq!(sent[0].1["parts"][0]["sessionID"], "ses_1");
}

#[tokio::test]
async fn permissions_are_posted() {
    let (client, state) = client_with_state().await;
    client
        .set_permissions(&PermissionSettings {
            edit: PermissionLevel::Allow,
            bash: PermissionLevel::Deny,
        })
        .await
        .expect("permissions");
    assert_eq!(
        state.permissions.lock().await.clone(),
        Some(json!({"edit": "allow", "bash": "deny"}))
    );
}

#[tokio::test]
async fn unreachable_server_is_connectivity_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    let client = ApiClient::new(&format!("http://{addr}"), Duration::from_secs(2)).expect("client");
    let err = client.probe().await.expect_err("nothing listens");
    assert!(matches!(err, ClientError::Connectivity { .. }));
}

#[tokio::test]
async fn event_stream_skips_malformed_frames() {
    let (client, _) = client_with_state().await;
    let mut sub = client.subscribe_events(RetryConfig::disabled());

    let first = tokio::time::timeout(Duration::from_secs(5), sub.next()).await.expect("timely");
    assert!(matches!(first, Some(StreamItem::Event(ServerEvent::ServerConnected))));

    let second = tokio::time::timeout(Duration::from_secs(5), sub.next()).await.expect("timely");
    match second {
        Some(StreamItem::Event(ServerEvent::PartUpdated { message_id, .. })) => {
            assert_eq!(message_id, "msg_9");
        }
        other => panic!("unexpected {other:?}"),
    }

    let third = tokio::time::timeout(Duration::from_secs(5), sub.next()).await.expect("timely");
    assert!(matches!(
        third,
        Some(StreamItem::Interrupted { reconnecting: false, .. })
    ));
    assert!(sub.next().await.is_none());
}

#[tokio::test]
async fn event_stream_reconnects_after_close() {
    let (client, state) = client_with_state().await;
    let mut sub = client.subscribe_events(RetryConfig::from_millis(&[10], None));

    let mut connected = 0;
    while connected < 2 {
        let item = tokio::time::timeout(Duration::from_secs(5), sub.next())
            .await
            .expect("timely")
            .expect("stream open");
        match item {
            StreamItem::Event(ServerEvent::ServerConnected) => connected += 1,
            StreamItem::Interrupted { reconnecting, .. } => assert!(reconnecting),
            StreamItem::Event(_) => {}
        }
    }
    assert!(state.stream_connections.load(Ordering::SeqCst) >= 2);
    sub.close();
}
