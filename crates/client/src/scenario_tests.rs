//! Controller and driver behaviour against the scripted transport.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{Value, json};

use opencode2go_core::testing::{raw_message, raw_text};
use opencode2go_core::{
    DiscoveredServer, Endpoint, MessageOrigin, NewEndpoint, PartFilter, PartKind,
    PermissionLevel, PermissionSettings, Protocol, Role, SessionKey,
};
use opencode2go_local_store::MemoryStore;

use crate::controller::{ConnectionStatus, ControllerError, ConversationController, SendOutcome};
use crate::discovery::NoDiscovery;
use crate::driver::{Command, Driver};
use crate::effects::{Effect, EffectRunner, Subscription};
use crate::registry::EndpointRegistry;
use crate::testing::FakeTransport;
use crate::timeline::LoadState;

struct Harness {
    fake: FakeTransport,
    endpoint: Endpoint,
    controller: ConversationController,
    runner: EffectRunner,
    sub: Option<Subscription>,
}

impl Harness {
    fn new() -> Self {
        let fake = FakeTransport::new();
        let endpoint = Endpoint::default_local(Protocol::Http, "e1.local", 4096);
        let registry = EndpointRegistry::load(Arc::new(MemoryStore::new()), endpoint.clone());
        Self {
            runner: EffectRunner::new(Arc::new(fake.clone()), Arc::new(NoDiscovery)),
            controller: ConversationController::new(registry, PartFilter::show_all()),
            fake,
            endpoint,
            sub: None,
        }
    }

    /// E1 with `S1` (two messages, most recent) and `S2` (none).
    fn with_two_sessions() -> Self {
        let harness = Self::new();
        let ep = &harness.endpoint;
        harness.fake.add_session(ep, "S1", "First", 20);
        harness.fake.add_session(ep, "S2", "Second", 10);
        harness.fake.add_message(
            ep,
            "S1",
            raw_message("m2", "assistant", 2, vec![raw_text("m2-p", "answer")]),
        );
        harness.fake.add_message(
            ep,
            "S1",
            raw_message("m1", "user", 1, vec![raw_text("m1-p", "question")]),
        );
        harness
    }

    async fn run(&mut self, effects: Vec<Effect>) {
        self.controller.run(&self.runner, effects, &mut self.sub).await;
    }

    async fn start(&mut self) {
        let effects = self.controller.start();
        self.run(effects).await;
    }

    /// Apply every stream item that is already queued.
    async fn drain(&mut self) {
        while let Ok(true) = tokio::time::timeout(
            Duration::from_millis(50),
            self.controller.pump(&self.runner, &mut self.sub),
        )
        .await
        {}
    }

    fn key(&self, session_id: &str) -> SessionKey {
        SessionKey::new(&self.endpoint.id, session_id)
    }

    fn texts(&self) -> Vec<(Role, String)> {
        self.controller
            .visible_messages()
            .iter()
            .map(|m| (m.role, m.text()))
            .collect()
    }
}

fn message_updated(session_id: &str, id: &str, role: &str, created_ms: i64) -> Value {
    json!({
        "type": "message.updated",
        "properties": {"info": {
            "id": id, "role": role, "sessionID": session_id,
            "time": {"created": created_ms},
            "providerID": "p1", "modelID": "m1"
        }}
    })
}

fn part_updated(session_id: &str, message_id: &str, part: Value) -> Value {
    let mut part = part;
    part["sessionID"] = json!(session_id);
    part["messageID"] = json!(message_id);
    json!({"type": "message.part.updated", "properties": {"part": part}})
}

#[tokio::test]
async fn end_to_end_two_sessions() {
    let mut h = Harness::with_two_sessions();
    h.start().await;

    let snapshot = h.controller.snapshot();
    assert_eq!(snapshot.status, ConnectionStatus::Connected);
    let listed: Vec<_> = snapshot.sessions.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(listed, vec!["S1", "S2"]);
    assert_eq!(snapshot.current_session, Some(h.key("S1")));
    assert_eq!(snapshot.selected_provider.as_deref(), Some("p1"));
    assert_eq!(snapshot.selected_model.as_deref(), Some("m1"));
    assert_eq!(snapshot.selected_mode.as_deref(), Some("build"));
    assert_eq!(
        h.texts(),
        vec![
            (Role::User, "question".to_string()),
            (Role::Assistant, "answer".to_string())
        ]
    );
    assert_eq!(h.fake.subscriptions(&h.endpoint), 1);
    assert!(h.controller.registry().get_active().is_some_and(|e| e.last_connected_at.is_some()));

    let effects = h.controller.send("hello").expect("send accepted");
    let shown = h.controller.visible_messages();
    assert_eq!(shown.len(), 3);
    let optimistic = &shown[2];
    assert_eq!(optimistic.role, Role::User);
    assert_eq!(optimistic.origin, MessageOrigin::Optimistic);
    assert_eq!(optimistic.parts.len(), 1);
    assert_eq!(optimistic.parts[0].kind(), PartKind::Text);
    assert_eq!(optimistic.text(), "hello");

    h.run(effects).await;
    let sent = h.fake.sent(&h.endpoint);
    assert_eq!(sent.len(), 1);
    let (session_id, body) = &sent[0];
    assert_eq!(session_id, "S1");
    assert_eq!(body["providerID"], "p1");
    assert_eq!(body["modelID"], "m1");
    assert_eq!(body["mode"], "build");
    assert_eq!(body["parts"][0]["text"], "hello");
    assert_eq!(body["parts"][0]["sessionID"], "S1");
    let message_id = body["messageID"].as_str().expect("message id").to_string();
    assert!(message_id.starts_with("msg_"));
    assert_eq!(
        h.controller.last_send(),
        Some(&SendOutcome::Sent {
            message_id: message_id.clone()
        })
    );

    // Server echo of the user message, then the assistant reply.
    let now_ms = Utc::now().timestamp_millis();
    h.fake.push_raw(&h.endpoint, message_updated("S1", &message_id, "user", now_ms));
    h.fake.push_raw(&h.endpoint, message_updated("S1", "msg_reply", "assistant", now_ms + 1_000));
    h.fake.push_raw(
        &h.endpoint,
        part_updated("S1", "msg_reply", json!({"id": "prt_hi", "type": "text", "text": "hi"})),
    );
    h.drain().await;

    let shown = h.controller.visible_messages();
    assert_eq!(shown.len(), 4);
    assert_eq!(shown[2].id, message_id);
    assert_eq!(shown[2].origin, MessageOrigin::Server);
    let last = &shown[3];
    assert_eq!(last.role, Role::Assistant);
    assert_eq!(last.text(), "hi");
}

#[tokio::test]
async fn events_stamped_before_the_history_still_land_last() {
    let mut h = Harness::with_two_sessions();
    h.start().await;

    // A server clock behind the loaded history must not reorder live messages.
    h.fake.push_raw(&h.endpoint, message_updated("S1", "msg_skewed", "assistant", 0));
    h.fake.push_raw(
        &h.endpoint,
        part_updated("S1", "msg_skewed", json!({"id": "prt_s", "type": "text", "text": "late"})),
    );
    h.drain().await;

    let ids: Vec<_> = h.controller.visible_messages().into_iter().map(|m| m.id).collect();
    assert_eq!(ids, vec!["m1", "m2", "msg_skewed"]);
}

#[tokio::test]
async fn message_sent_during_a_reload_stays_visible() {
    let mut h = Harness::with_two_sessions();
    h.start().await;

    let reload = h.controller.select_session("S1").expect("S1");
    assert_eq!(h.controller.snapshot().load_state, LoadState::Loading);
    let send = h.controller.send("hello").expect("send accepted");
    assert_eq!(h.texts(), vec![(Role::User, "hello".to_string())]);

    h.run(reload).await;
    h.run(send).await;
    assert_eq!(
        h.texts(),
        vec![
            (Role::User, "question".to_string()),
            (Role::Assistant, "answer".to_string()),
            (Role::User, "hello".to_string()),
        ]
    );
    assert_eq!(h.fake.sent(&h.endpoint).len(), 1);
}

#[tokio::test]
async fn empty_session_shows_nothing_until_events_arrive() {
    let mut h = Harness::with_two_sessions();
    h.start().await;
    let effects = h.controller.select_session("S2").expect("known session");
    h.run(effects).await;
    assert!(h.controller.visible_messages().is_empty());
    assert_eq!(h.controller.snapshot().load_state, LoadState::Loaded);

    // Events for the session that is no longer selected are ignored.
    h.fake.push_raw(&h.endpoint, part_updated("S1", "m9", raw_text("p", "late")));
    h.drain().await;
    assert!(h.controller.visible_messages().is_empty());
    assert!(h.controller.timeline().messages(&h.key("S1")).is_empty());
}

#[tokio::test]
async fn stale_history_is_discarded_after_switching_session() {
    let mut h = Harness::with_two_sessions();
    h.fake.add_message(
        &h.endpoint,
        "S2",
        raw_message("s2-m1", "user", 5, vec![raw_text("s2-p", "from S2")]),
    );
    h.start().await;

    let reload_s1 = h.controller.select_session("S1").expect("S1");
    let load_s2 = h.controller.select_session("S2").expect("S2");
    // S2's response lands first, then S1's late one.
    h.run(load_s2).await;
    h.run(reload_s1).await;

    assert_eq!(h.controller.current_session(), Some(&h.key("S2")));
    assert_eq!(h.texts(), vec![(Role::User, "from S2".to_string())]);
    assert_eq!(
        h.controller.timeline().state(&h.key("S1")),
        LoadState::Empty
    );
}

#[tokio::test]
async fn results_from_a_previous_endpoint_are_dropped() {
    let mut h = Harness::with_two_sessions();
    let e2 = h.controller.registry_mut().add(NewEndpoint {
        name: "Second box".to_string(),
        protocol: Protocol::Http,
        host: "e2.local".to_string(),
        port: 4096,
    });
    h.fake.add_session(&e2, "T1", "Other", 5);
    h.fake.add_message(&e2, "T1", raw_message("t1-m1", "user", 1, vec![raw_text("t", "on e2")]));
    h.start().await;

    let pending = h.controller.select_session("S2").expect("S2");
    let switch = h.controller.activate_endpoint(&e2.id).expect("e2 known");
    h.run(switch).await;
    h.run(pending).await;

    assert_eq!(h.controller.current_session(), Some(&SessionKey::new(&e2.id, "T1")));
    assert_eq!(h.texts(), vec![(Role::User, "on e2".to_string())]);
    assert_eq!(h.fake.subscriptions(&e2), 1);
    assert!(matches!(
        h.controller.activate_endpoint("nope"),
        Err(ControllerError::UnknownEndpoint(_))
    ));
}

#[tokio::test]
async fn history_reload_is_idempotent() {
    let mut h = Harness::with_two_sessions();
    h.start().await;
    let first = h.controller.visible_messages();
    let effects = h.controller.select_session("S1").expect("S1");
    h.run(effects).await;
    assert_eq!(h.controller.visible_messages(), first);
}

#[tokio::test]
async fn failed_send_surfaces_an_error_message() {
    let mut h = Harness::with_two_sessions();
    h.start().await;
    h.fake.fail_sends(&h.endpoint, "boom");

    let effects = h.controller.send("hello").expect("accepted locally");
    h.run(effects).await;

    let shown = h.controller.visible_messages();
    assert_eq!(shown.len(), 4);
    assert_eq!(shown[2].text(), "hello");
    let error = &shown[3];
    assert_eq!(error.role, Role::Assistant);
    assert_eq!(error.origin, MessageOrigin::LocalError);
    assert_eq!(error.text(), "Error: server returned 500: boom");
    assert!(matches!(
        h.controller.last_send(),
        Some(SendOutcome::Failed { error, .. }) if error.contains("boom")
    ));
}

#[tokio::test]
async fn send_preconditions() {
    let mut h = Harness::new();
    h.controller.set_auto_create(false);
    h.start().await;
    assert_eq!(h.controller.current_session(), None);
    assert!(matches!(h.controller.send("   "), Err(ControllerError::EmptyMessage)));
    assert!(matches!(h.controller.send("hi"), Err(ControllerError::NoSession)));

    h.fake.set_providers(&h.endpoint, json!({"providers": [], "default": {}}));
    h.fake.add_session(&h.endpoint, "S1", "First", 1);
    let effects = h.controller.activate_endpoint(&h.endpoint.id).expect("known");
    h.run(effects).await;
    assert_eq!(h.controller.current_session(), Some(&h.key("S1")));
    assert!(matches!(h.controller.send("hi"), Err(ControllerError::NoModel)));
    assert!(h.fake.sent(&h.endpoint).is_empty());
}

#[tokio::test]
async fn endpoint_without_sessions_gets_one_created() {
    let mut h = Harness::new();
    h.start().await;
    let current = h.controller.current_session().cloned().expect("created session selected");
    assert_eq!(current.session_id, "ses_created_1");
    assert_eq!(h.controller.sessions().sessions_for(&h.endpoint.id).count(), 1);
    assert_eq!(h.controller.snapshot().load_state, LoadState::Loaded);
    assert_eq!(h.fake.subscriptions(&h.endpoint), 1);
}

#[tokio::test]
async fn unreachable_endpoint_reports_status() {
    let mut h = Harness::with_two_sessions();
    h.fake.set_reachable(&h.endpoint, false);
    h.start().await;
    assert!(matches!(h.controller.status(), ConnectionStatus::Unreachable(_)));
    assert!(h.sub.is_none());
    assert!(h.controller.snapshot().sessions.is_empty());
}

#[tokio::test]
async fn unknown_part_kinds_fall_back_and_respect_the_filter() {
    let mut h = Harness::new();
    h.fake.add_session(&h.endpoint, "S1", "First", 1);
    h.fake.add_message(
        &h.endpoint,
        "S1",
        raw_message(
            "m1",
            "assistant",
            1,
            vec![
                json!({"id": "w", "type": "widget", "text": "raw widget text"}),
                raw_text("t", "plain"),
            ],
        ),
    );
    h.start().await;

    let shown = h.controller.visible_messages();
    assert_eq!(shown[0].parts.len(), 2);
    let widget = &shown[0].parts[0];
    assert_eq!(widget.kind(), PartKind::Unknown);
    assert!(matches!(
        &widget.body,
        opencode2go_core::PartBody::Unknown { kind, text: Some(text), .. }
            if kind == "widget" && text == "raw widget text"
    ));

    h.controller.set_filter(PartFilter::only([PartKind::Text]));
    let shown = h.controller.visible_messages();
    assert_eq!(shown[0].parts.len(), 1);
    assert_eq!(shown[0].text(), "plain");

    h.controller.set_filter(PartFilter::only([PartKind::Tool]));
    assert!(h.controller.visible_messages().is_empty());
}

#[tokio::test]
async fn reconnect_reloads_the_current_history() {
    let mut h = Harness::with_two_sessions();
    h.start().await;
    h.drain().await;

    h.fake.add_message(
        &h.endpoint,
        "S1",
        raw_message("m3", "assistant", 3, vec![raw_text("m3-p", "missed while offline")]),
    );
    h.fake.interrupt(&h.endpoint, true);
    h.drain().await;

    assert_eq!(h.controller.status(), &ConnectionStatus::Connected);
    let texts = h.texts();
    assert_eq!(texts.len(), 3);
    assert_eq!(texts[2].1, "missed while offline");

    h.fake.interrupt(&h.endpoint, false);
    h.drain().await;
    assert!(matches!(h.controller.status(), ConnectionStatus::Unreachable(_)));
}

#[tokio::test]
async fn session_events_update_the_store() {
    let mut h = Harness::with_two_sessions();
    h.start().await;

    h.fake.push_raw(
        &h.endpoint,
        json!({"type": "session.updated", "properties": {"info": {
            "id": "S2", "title": "Renamed", "time": {"created": 0, "updated": Utc::now().timestamp()}
        }}}),
    );
    h.drain().await;
    let s2 = h.controller.sessions().get(&h.key("S2")).expect("S2");
    assert_eq!(s2.title, "Renamed");

    // Deleting the current session moves to the next most recent one.
    h.fake.push_raw(
        &h.endpoint,
        json!({"type": "session.deleted", "properties": {"info": {"id": "S1", "title": "First"}}}),
    );
    h.drain().await;
    assert!(h.controller.sessions().get(&h.key("S1")).is_none());
    assert_eq!(h.controller.current_session(), Some(&h.key("S2")));
}

#[tokio::test]
async fn deleting_sessions() {
    let mut h = Harness::with_two_sessions();
    h.start().await;

    assert!(matches!(
        h.controller.delete_session("ghost"),
        Err(ControllerError::UnknownSession(_))
    ));
    let effects = h.controller.delete_session("S1").expect("known");
    h.run(effects).await;
    assert_eq!(h.controller.current_session(), Some(&h.key("S2")));

    let effects = h.controller.delete_session("S2").expect("known");
    h.run(effects).await;
    assert_eq!(h.controller.current_session(), None);
    assert!(h.controller.snapshot().sessions.is_empty());
}

#[tokio::test]
async fn creating_a_session_selects_it() {
    let mut h = Harness::with_two_sessions();
    h.start().await;
    let effects = h.controller.create_session().expect("active endpoint");
    h.run(effects).await;
    assert_eq!(h.controller.current_session(), Some(&h.key("ses_created_1")));
    assert_eq!(h.controller.snapshot().sessions[0].id, "ses_created_1");
}

#[tokio::test]
async fn provider_model_and_mode_selection() {
    let mut h = Harness::with_two_sessions();
    h.fake.set_providers(
        &h.endpoint,
        json!({
            "providers": [
                {"id": "openai", "name": "OpenAI", "models": {"gpt": {"id": "gpt", "name": "GPT"}}},
                {"id": "anthropic", "name": "Anthropic", "models": {
                    "haiku": {"id": "haiku", "name": "Haiku"},
                    "sonnet": {"id": "sonnet", "name": "Sonnet"}
                }}
            ],
            "default": {"anthropic": "sonnet"}
        }),
    );
    h.fake.set_modes(
        &h.endpoint,
        json!([
            {"name": "build"},
            {"name": "review", "model": {"providerID": "openai", "modelID": "gpt"}, "tools": {"bash": false}}
        ]),
    );
    h.start().await;

    assert_eq!(h.controller.selected_provider(), Some("anthropic"));
    assert_eq!(h.controller.selected_model(), Some("sonnet"));
    assert_eq!(h.controller.selected_mode(), Some("build"));

    assert!(h.controller.select_model("haiku"));
    assert!(!h.controller.select_model("gpt"));
    assert_eq!(h.controller.selected_model(), Some("haiku"));

    assert!(h.controller.select_mode("review"));
    assert_eq!(h.controller.selected_provider(), Some("openai"));
    assert_eq!(h.controller.selected_model(), Some("gpt"));
    assert!(!h.controller.modes()[1].tool_enabled("bash"));

    assert!(!h.controller.select_provider("mistral"));
    assert!(h.controller.select_provider("anthropic"));
    assert_eq!(h.controller.selected_model(), Some("sonnet"));
    assert!(!h.controller.select_mode("nonexistent"));
}

#[tokio::test]
async fn permissions_are_pushed_to_the_active_endpoint() {
    let mut h = Harness::with_two_sessions();
    h.start().await;
    let settings = PermissionSettings {
        edit: PermissionLevel::Allow,
        bash: PermissionLevel::Deny,
    };
    let effects = h.controller.set_permissions(settings).expect("active endpoint");
    h.run(effects).await;
    assert_eq!(h.fake.permissions(&h.endpoint), vec![settings]);
}

#[tokio::test]
async fn losing_a_discovered_active_endpoint_reconnects() {
    let mut h = Harness::new();
    let server = DiscoveredServer {
        host: "10.0.0.7".to_string(),
        port: 4096,
        name: "lab".to_string(),
        version: None,
        response_time_ms: 3,
    };
    assert!(h.controller.merge_discovered(std::slice::from_ref(&server)).is_empty());
    let effects = h
        .controller
        .activate_endpoint(&server.endpoint_id())
        .expect("discovered endpoint is known");
    h.run(effects).await;
    assert_eq!(h.controller.status(), &ConnectionStatus::Connected);

    let effects = h.controller.merge_discovered(&[]);
    assert!(!effects.is_empty());
    h.run(effects).await;
    assert_eq!(h.controller.registry().active_id(), Some(h.endpoint.id.as_str()));
}

#[tokio::test]
async fn driver_ignores_history_of_a_deselected_session() {
    let h = Harness::with_two_sessions();
    h.fake.add_message(
        &h.endpoint,
        "S2",
        raw_message("s2-m1", "user", 5, vec![raw_text("s2-p", "from S2")]),
    );
    let gate = h.fake.gate_history(&h.endpoint, "S1");
    let (handle, task) = Driver::new(h.controller, h.runner).spawn();

    // S1 is picked on connect but its history hangs.
    let s1 = SessionKey::new(&h.endpoint.id, "S1");
    tokio::time::timeout(
        Duration::from_secs(5),
        handle.wait_for(|s| s.current_session.as_ref() == Some(&s1)),
    )
    .await
    .expect("timely")
    .expect("driver alive");

    handle
        .send(Command::SelectSession("S2".to_string()))
        .await
        .expect("driver alive");
    let s2 = SessionKey::new(&h.endpoint.id, "S2");
    let loaded = tokio::time::timeout(
        Duration::from_secs(5),
        handle.wait_for(|s| {
            s.current_session.as_ref() == Some(&s2) && s.load_state == LoadState::Loaded
        }),
    )
    .await
    .expect("timely")
    .expect("driver alive");
    assert_eq!(loaded.messages.len(), 1);

    gate.notify_one();
    tokio::time::sleep(Duration::from_millis(100)).await;
    let snapshot = handle.snapshot();
    assert_eq!(snapshot.current_session, Some(s2));
    assert_eq!(snapshot.messages.len(), 1);
    assert_eq!(snapshot.messages[0].text(), "from S2");

    handle.send(Command::Shutdown).await.expect("driver alive");
    let controller = task.await.expect("driver task");
    assert_eq!(controller.status(), &ConnectionStatus::Connected);
}
