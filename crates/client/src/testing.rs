//! Scripted in-memory [`Transport`] for tests of this crate and its users.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::{Notify, mpsc};

use opencode2go_api_client::{ClientError, EventSubscription, StreamItem};
use opencode2go_api_types::{
    AppInfo, MessageEnvelope, ModeInfo, ProvidersResponse, SendMessageRequest, ServerEvent,
    SessionInfo,
};
use opencode2go_core::testing::at;
use opencode2go_core::{Endpoint, PermissionSettings};

use crate::transport::{Transport, TransportResult};

struct FakeServer {
    reachable: bool,
    providers: Value,
    modes: Option<Value>,
    /// Newest first, like `POST /session` leaves them.
    sessions: Vec<Value>,
    messages: HashMap<String, Vec<Value>>,
    send_error: Option<String>,
    history_gates: HashMap<String, Arc<Notify>>,
    sent: Vec<(String, Value)>,
    permissions: Vec<PermissionSettings>,
    events: Option<mpsc::Sender<StreamItem>>,
    subscriptions: usize,
    created: usize,
}

impl Default for FakeServer {
    fn default() -> Self {
        Self {
            reachable: true,
            providers: json!({
                "providers": [
                    {"id": "p1", "name": "Provider One", "models": {"m1": {"id": "m1", "name": "Model One"}}}
                ],
                "default": {}
            }),
            modes: None,
            sessions: Vec::new(),
            messages: HashMap::new(),
            send_error: None,
            history_gates: HashMap::new(),
            sent: Vec::new(),
            permissions: Vec::new(),
            events: None,
            subscriptions: 0,
            created: 0,
        }
    }
}

/// Servers keyed by base URL. Unknown URLs behave like an empty, reachable
/// server.
#[derive(Clone, Default)]
pub struct FakeTransport {
    servers: Arc<Mutex<HashMap<String, FakeServer>>>,
}

fn unavailable(base_url: &str) -> ClientError {
    ClientError::Server {
        status: 503,
        body: format!("{base_url} unavailable"),
    }
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_server<R>(&self, base_url: &str, f: impl FnOnce(&mut FakeServer) -> R) -> R {
        let mut servers = lock(&self.servers);
        f(servers.entry(base_url.to_string()).or_default())
    }

    fn reachable_server<R>(
        &self,
        base_url: &str,
        f: impl FnOnce(&mut FakeServer) -> TransportResult<R>,
    ) -> TransportResult<R> {
        self.with_server(base_url, |server| {
            if !server.reachable {
                return Err(unavailable(base_url));
            }
            f(server)
        })
    }

    pub fn set_reachable(&self, endpoint: &Endpoint, reachable: bool) {
        self.with_server(&endpoint.url(), |s| s.reachable = reachable);
    }

    pub fn set_providers(&self, endpoint: &Endpoint, providers: Value) {
        self.with_server(&endpoint.url(), |s| s.providers = providers);
    }

    pub fn set_modes(&self, endpoint: &Endpoint, modes: Value) {
        self.with_server(&endpoint.url(), |s| s.modes = Some(modes));
    }

    /// Append a session updated `updated_secs` after the test base time.
    pub fn add_session(&self, endpoint: &Endpoint, id: &str, title: &str, updated_secs: i64) {
        self.add_raw_session(
            endpoint,
            json!({
                "id": id,
                "title": title,
                "time": {"created": at(0).timestamp(), "updated": at(updated_secs).timestamp()}
            }),
        );
    }

    pub fn add_raw_session(&self, endpoint: &Endpoint, session: Value) {
        self.with_server(&endpoint.url(), |s| s.sessions.push(session));
    }

    /// Append a raw `{info, parts}` history entry.
    pub fn add_message(&self, endpoint: &Endpoint, session_id: &str, envelope: Value) {
        self.with_server(&endpoint.url(), |s| {
            s.messages
                .entry(session_id.to_string())
                .or_default()
                .push(envelope)
        });
    }

    pub fn fail_sends(&self, endpoint: &Endpoint, reason: &str) {
        self.with_server(&endpoint.url(), |s| s.send_error = Some(reason.to_string()));
    }

    /// Hold history requests for `session_id` until the returned handle is
    /// notified once per request.
    pub fn gate_history(&self, endpoint: &Endpoint, session_id: &str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.with_server(&endpoint.url(), |s| {
            s.history_gates
                .insert(session_id.to_string(), gate.clone())
        });
        gate
    }

    /// `(session_id, request body)` of every accepted send.
    pub fn sent(&self, endpoint: &Endpoint) -> Vec<(String, Value)> {
        self.with_server(&endpoint.url(), |s| s.sent.clone())
    }

    pub fn permissions(&self, endpoint: &Endpoint) -> Vec<PermissionSettings> {
        self.with_server(&endpoint.url(), |s| s.permissions.clone())
    }

    pub fn subscriptions(&self, endpoint: &Endpoint) -> usize {
        self.with_server(&endpoint.url(), |s| s.subscriptions)
    }

    /// Push an event to the endpoint's live subscription. Returns false when
    /// nobody listens.
    pub fn push_event(&self, endpoint: &Endpoint, event: ServerEvent) -> bool {
        self.push(endpoint, StreamItem::Event(event))
    }

    /// Push a raw `{type, properties}` frame.
    pub fn push_raw(&self, endpoint: &Endpoint, frame: Value) -> bool {
        match ServerEvent::parse(&frame.to_string()) {
            Ok(event) => self.push_event(endpoint, event),
            Err(_) => false,
        }
    }

    /// Simulate a dropped stream; with `reconnecting` a fresh
    /// `server.connected` follows.
    pub fn interrupt(&self, endpoint: &Endpoint, reconnecting: bool) -> bool {
        let delivered = self.push(
            endpoint,
            StreamItem::Interrupted {
                reason: "connection reset".to_string(),
                reconnecting,
            },
        );
        if reconnecting {
            self.push_event(endpoint, ServerEvent::ServerConnected)
        } else {
            self.with_server(&endpoint.url(), |s| s.events = None);
            delivered
        }
    }

    fn push(&self, endpoint: &Endpoint, item: StreamItem) -> bool {
        self.with_server(&endpoint.url(), |s| {
            s.events
                .as_ref()
                .is_some_and(|tx| tx.try_send(item).is_ok())
        })
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn parse<T: serde::de::DeserializeOwned>(value: Value) -> TransportResult<T> {
    serde_json::from_value(value).map_err(|source| ClientError::Parse {
        url: "fake://".to_string(),
        source,
    })
}

#[async_trait]
impl Transport for FakeTransport {
    async fn probe(&self, base_url: &str) -> TransportResult<AppInfo> {
        self.reachable_server(base_url, |_| {
            Ok(AppInfo {
                hostname: Some("fake".to_string()),
                version: Some("0.0.0".to_string()),
                extra: Default::default(),
            })
        })
    }

    async fn providers(&self, base_url: &str) -> TransportResult<ProvidersResponse> {
        let raw = self.reachable_server(base_url, |s| Ok(s.providers.clone()))?;
        parse(raw)
    }

    async fn modes(&self, base_url: &str) -> TransportResult<Vec<ModeInfo>> {
        let raw = self.reachable_server(base_url, |s| {
            s.modes.clone().ok_or_else(|| ClientError::Server {
                status: 500,
                body: "modes unavailable".to_string(),
            })
        })?;
        parse(raw)
    }

    async fn list_sessions(&self, base_url: &str) -> TransportResult<Vec<SessionInfo>> {
        let raw = self.reachable_server(base_url, |s| Ok(Value::Array(s.sessions.clone())))?;
        parse(raw)
    }

    async fn create_session(&self, base_url: &str) -> TransportResult<SessionInfo> {
        let raw = self.reachable_server(base_url, |s| {
            s.created += 1;
            let session = json!({
                "id": format!("ses_created_{}", s.created),
                "title": "",
                "time": {"created": at(1_000).timestamp(), "updated": at(1_000).timestamp()}
            });
            s.sessions.insert(0, session.clone());
            Ok(session)
        })?;
        parse(raw)
    }

    async fn delete_session(&self, base_url: &str, session_id: &str) -> TransportResult<()> {
        self.reachable_server(base_url, |s| {
            let before = s.sessions.len();
            s.sessions.retain(|v| v["id"] != session_id);
            if s.sessions.len() == before {
                return Err(ClientError::Server {
                    status: 404,
                    body: format!("session {session_id} not found"),
                });
            }
            s.messages.remove(session_id);
            Ok(())
        })
    }

    async fn messages(
        &self,
        base_url: &str,
        session_id: &str,
    ) -> TransportResult<Vec<MessageEnvelope>> {
        let gate = self.with_server(base_url, |s| s.history_gates.get(session_id).cloned());
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let raw = self.reachable_server(base_url, |s| {
            Ok(Value::Array(
                s.messages.get(session_id).cloned().unwrap_or_default(),
            ))
        })?;
        parse(raw)
    }

    async fn send_message(
        &self,
        base_url: &str,
        session_id: &str,
        request: &SendMessageRequest,
    ) -> TransportResult<()> {
        let body = serde_json::to_value(request).map_err(|source| ClientError::Parse {
            url: base_url.to_string(),
            source,
        })?;
        self.reachable_server(base_url, |s| {
            if let Some(reason) = &s.send_error {
                return Err(ClientError::Server {
                    status: 500,
                    body: reason.clone(),
                });
            }
            s.sent.push((session_id.to_string(), body));
            Ok(())
        })
    }

    async fn set_permissions(
        &self,
        base_url: &str,
        settings: &PermissionSettings,
    ) -> TransportResult<()> {
        self.reachable_server(base_url, |s| {
            s.permissions.push(*settings);
            Ok(())
        })
    }

    fn subscribe(&self, base_url: &str) -> EventSubscription {
        let (tx, rx) = mpsc::channel(64);
        self.with_server(base_url, |s| {
            s.subscriptions += 1;
            if s.reachable {
                let _ = tx.try_send(StreamItem::Event(ServerEvent::ServerConnected));
                s.events = Some(tx);
            } else {
                let _ = tx.try_send(StreamItem::Interrupted {
                    reason: format!("{base_url} unavailable"),
                    reconnecting: false,
                });
            }
        });
        EventSubscription::from_channel(rx)
    }
}
