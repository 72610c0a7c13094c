use std::collections::VecDeque;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use opencode2go_api_client::StreamItem;
use opencode2go_api_types::{SendMessageRequest, ServerEvent};
use opencode2go_core::{
    DiscoveredServer, Endpoint, Message, MessageOrigin, Mode, Part, PartFilter,
    PermissionSettings, Provider, ProviderCatalog, Role, Session, SessionKey, visible_messages,
};

use crate::effects::{Call, Effect, EffectRunner, Reply, Subscription};
use crate::registry::EndpointRegistry;
use crate::sessions::SessionStore;
use crate::timeline::{LoadState, MessageTimeline};

/// Mode sent when none is selected.
const FALLBACK_MODE: &str = "build";

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Unreachable(String),
}

impl ConnectionStatus {
    pub fn label(&self) -> &str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Unreachable(_) => "unreachable",
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ControllerError {
    #[error("unknown endpoint: {0}")]
    UnknownEndpoint(String),
    #[error("no active endpoint")]
    NoEndpoint,
    #[error("unknown session: {0}")]
    UnknownSession(String),
    #[error("no session selected")]
    NoSession,
    #[error("no provider and model selected")]
    NoModel,
    #[error("message is empty")]
    EmptyMessage,
}

pub type ControllerResult<T> = Result<T, ControllerError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Sent { message_id: String },
    Failed { message_id: String, error: String },
}

/// Everything a presentation layer renders.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ControllerSnapshot {
    pub status: ConnectionStatus,
    pub endpoints: Vec<Endpoint>,
    pub active_endpoint: Option<Endpoint>,
    /// Sessions of the active endpoint, server order.
    pub sessions: Vec<Session>,
    pub current_session: Option<SessionKey>,
    pub load_state: LoadState,
    /// Current session's messages with the part filter applied.
    pub messages: Vec<Message>,
    pub providers: Vec<Provider>,
    pub modes: Vec<Mode>,
    pub selected_provider: Option<String>,
    pub selected_model: Option<String>,
    pub selected_mode: Option<String>,
    pub filter: PartFilter,
    pub last_send: Option<SendOutcome>,
}

/// Owns the client state of one conversation surface.
///
/// Methods never block on I/O: they update state and return the effects to
/// run. Results come back through [`handle_reply`](Self::handle_reply) and
/// stream items through [`handle_stream_item`](Self::handle_stream_item).
#[derive(Debug)]
pub struct ConversationController {
    registry: EndpointRegistry,
    sessions: SessionStore,
    timeline: MessageTimeline,
    catalog: ProviderCatalog,
    modes: Vec<Mode>,
    selected_provider: Option<String>,
    selected_model: Option<String>,
    selected_mode: Option<String>,
    current: Option<SessionKey>,
    filter: PartFilter,
    status: ConnectionStatus,
    epoch: u64,
    subscribed: bool,
    interrupted: bool,
    auto_create: bool,
    last_send: Option<SendOutcome>,
}

impl ConversationController {
    pub fn new(registry: EndpointRegistry, filter: PartFilter) -> Self {
        Self {
            registry,
            sessions: SessionStore::new(),
            timeline: MessageTimeline::new(),
            catalog: ProviderCatalog::default(),
            modes: Mode::builtin(),
            selected_provider: None,
            selected_model: None,
            selected_mode: None,
            current: None,
            filter,
            status: ConnectionStatus::Disconnected,
            epoch: 0,
            subscribed: false,
            interrupted: false,
            auto_create: true,
            last_send: None,
        }
    }

    /// Whether connecting to an endpoint without sessions creates one.
    pub fn set_auto_create(&mut self, enabled: bool) {
        self.auto_create = enabled;
    }

    pub fn registry(&self) -> &EndpointRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut EndpointRegistry {
        &mut self.registry
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn timeline(&self) -> &MessageTimeline {
        &self.timeline
    }

    pub fn status(&self) -> &ConnectionStatus {
        &self.status
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn current_session(&self) -> Option<&SessionKey> {
        self.current.as_ref()
    }

    pub fn catalog(&self) -> &ProviderCatalog {
        &self.catalog
    }

    pub fn modes(&self) -> &[Mode] {
        &self.modes
    }

    pub fn selected_provider(&self) -> Option<&str> {
        self.selected_provider.as_deref()
    }

    pub fn selected_model(&self) -> Option<&str> {
        self.selected_model.as_deref()
    }

    pub fn selected_mode(&self) -> Option<&str> {
        self.selected_mode.as_deref()
    }

    pub fn filter(&self) -> &PartFilter {
        &self.filter
    }

    pub fn last_send(&self) -> Option<&SendOutcome> {
        self.last_send.as_ref()
    }

    fn active_endpoint(&self) -> ControllerResult<Endpoint> {
        self.registry
            .get_active()
            .cloned()
            .ok_or(ControllerError::NoEndpoint)
    }

    fn is_current_epoch(&self, epoch: u64, what: &str) -> bool {
        if epoch != self.epoch {
            debug!("dropping stale {what} (epoch {epoch}, current {})", self.epoch);
            return false;
        }
        true
    }

    // ── Connection ──────────────────────────────────────────────────────

    /// Connect to the active endpoint, if there is one.
    pub fn start(&mut self) -> Vec<Effect> {
        if self.registry.get_active().is_some() {
            self.connect()
        } else {
            Vec::new()
        }
    }

    pub fn activate_endpoint(&mut self, id: &str) -> ControllerResult<Vec<Effect>> {
        if !self.registry.set_active(id) {
            return Err(ControllerError::UnknownEndpoint(id.to_string()));
        }
        Ok(self.connect())
    }

    fn connect(&mut self) -> Vec<Effect> {
        self.disconnect();
        let Some(endpoint) = self.registry.get_active().cloned() else {
            return vec![Effect::Unsubscribe];
        };
        info!("connecting to {} ({})", endpoint.name, endpoint.url());
        self.status = ConnectionStatus::Connecting;
        vec![
            Effect::Unsubscribe,
            Effect::Call(Call::Probe {
                epoch: self.epoch,
                endpoint,
            }),
        ]
    }

    /// Invalidate everything in flight for the previous endpoint.
    fn disconnect(&mut self) {
        self.epoch += 1;
        if let Some(key) = self.current.take() {
            self.timeline.release(&key);
        }
        self.subscribed = false;
        self.interrupted = false;
        self.status = ConnectionStatus::Disconnected;
    }

    pub fn refresh_sessions(&mut self) -> ControllerResult<Vec<Effect>> {
        let endpoint = self.active_endpoint()?;
        Ok(vec![Effect::Call(Call::LoadSessions {
            epoch: self.epoch,
            endpoint,
            select: false,
        })])
    }

    pub fn discover(&self) -> Vec<Effect> {
        vec![Effect::Call(Call::Discover)]
    }

    /// Feed a discovery result to the registry. Reconnects when the active
    /// endpoint changed as a consequence.
    pub fn merge_discovered(&mut self, servers: &[DiscoveredServer]) -> Vec<Effect> {
        let before = self.registry.active_id().map(str::to_string);
        self.registry.merge_discovered(servers);
        if self.registry.active_id() == before.as_deref() {
            return Vec::new();
        }
        self.connect()
    }

    // ── Sessions ────────────────────────────────────────────────────────

    /// Make `session_id` current and (re)load its history.
    pub fn select_session(&mut self, session_id: &str) -> ControllerResult<Vec<Effect>> {
        let endpoint = self.active_endpoint()?;
        let key = SessionKey::new(&endpoint.id, session_id);
        if self.sessions.get(&key).is_none() {
            return Err(ControllerError::UnknownSession(session_id.to_string()));
        }
        Ok(self.open_session(endpoint, key))
    }

    fn open_session(&mut self, endpoint: Endpoint, key: SessionKey) -> Vec<Effect> {
        if let Some(previous) = self.current.take()
            && previous != key
        {
            self.timeline.release(&previous);
        }
        let ticket = self.timeline.begin_load(key.clone());
        self.current = Some(key);
        vec![Effect::Call(Call::LoadHistory {
            epoch: self.epoch,
            endpoint,
            ticket,
        })]
    }

    /// Select the endpoint's most recent session, or clear the selection.
    fn open_most_recent(&mut self, endpoint: Endpoint) -> Vec<Effect> {
        match self.sessions.most_recent(&endpoint.id).map(Session::key) {
            Some(key) => self.open_session(endpoint, key),
            None => {
                if let Some(previous) = self.current.take() {
                    self.timeline.release(&previous);
                }
                Vec::new()
            }
        }
    }

    pub fn create_session(&mut self) -> ControllerResult<Vec<Effect>> {
        let endpoint = self.active_endpoint()?;
        Ok(vec![Effect::Call(Call::CreateSession {
            epoch: self.epoch,
            endpoint,
        })])
    }

    pub fn delete_session(&mut self, session_id: &str) -> ControllerResult<Vec<Effect>> {
        let endpoint = self.active_endpoint()?;
        if self
            .sessions
            .get(&SessionKey::new(&endpoint.id, session_id))
            .is_none()
        {
            return Err(ControllerError::UnknownSession(session_id.to_string()));
        }
        Ok(vec![Effect::Call(Call::DeleteSession {
            epoch: self.epoch,
            endpoint,
            session_id: session_id.to_string(),
        })])
    }

    /// Drop a session locally; a current one is replaced by the next most
    /// recent.
    fn forget_session(&mut self, key: &SessionKey) -> Vec<Effect> {
        self.sessions
            .apply_delete_event(&key.endpoint_id, &key.session_id);
        if self.current.as_ref() != Some(key) {
            return Vec::new();
        }
        self.timeline.release(key);
        self.current = None;
        match self.registry.get_active().cloned() {
            Some(endpoint) if endpoint.id == key.endpoint_id => self.open_most_recent(endpoint),
            _ => Vec::new(),
        }
    }

    // ── Selection ───────────────────────────────────────────────────────

    /// Select a provider and its default model.
    pub fn select_provider(&mut self, provider_id: &str) -> bool {
        let Some(provider) = self.catalog.provider(provider_id) else {
            return false;
        };
        self.selected_model = self.catalog.default_model(provider).map(|m| m.id.clone());
        self.selected_provider = Some(provider.id.clone());
        true
    }

    /// Select a model of the selected provider.
    pub fn select_model(&mut self, model_id: &str) -> bool {
        let known = self
            .selected_provider
            .as_deref()
            .and_then(|p| self.catalog.provider(p))
            .is_some_and(|p| p.model(model_id).is_some());
        if known {
            self.selected_model = Some(model_id.to_string());
        }
        known
    }

    /// Select a mode. A mode pinned to a model the server offers switches
    /// the provider/model selection too.
    pub fn select_mode(&mut self, name: &str) -> bool {
        let Some(mode) = self.modes.iter().find(|m| m.name == name) else {
            return false;
        };
        if let Some(pinned) = mode.model.as_ref().filter(|m| self.catalog.contains(m)) {
            self.selected_provider = Some(pinned.provider_id.clone());
            self.selected_model = Some(pinned.model_id.clone());
        }
        self.selected_mode = Some(mode.name.clone());
        true
    }

    pub fn set_filter(&mut self, filter: PartFilter) {
        self.filter = filter;
    }

    fn apply_catalog(&mut self, catalog: ProviderCatalog, modes: Vec<Mode>) {
        self.catalog = catalog;
        self.modes = if modes.is_empty() { Mode::builtin() } else { modes };

        let provider_ok = self
            .selected_provider
            .as_deref()
            .and_then(|p| self.catalog.provider(p));
        let model_ok = provider_ok
            .zip(self.selected_model.as_deref())
            .is_some_and(|(p, m)| p.model(m).is_some());
        if !model_ok {
            let (provider, model) = match self.catalog.default_selection() {
                Some((provider, model)) => (Some(provider.id.clone()), model.map(|m| m.id.clone())),
                None => (None, None),
            };
            self.selected_provider = provider;
            self.selected_model = model;
        }

        let mode_ok = self
            .selected_mode
            .as_deref()
            .is_some_and(|name| self.modes.iter().any(|m| m.name == name));
        if !mode_ok {
            self.selected_mode = self.modes.first().map(|m| m.name.clone());
        }
    }

    // ── Sending ─────────────────────────────────────────────────────────

    /// Show `text` as an optimistic user message and post it.
    pub fn send(&mut self, text: &str) -> ControllerResult<Vec<Effect>> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ControllerError::EmptyMessage);
        }
        let key = self.current.clone().ok_or(ControllerError::NoSession)?;
        let (Some(provider), Some(model)) = (&self.selected_provider, &self.selected_model) else {
            return Err(ControllerError::NoModel);
        };
        let endpoint = self.active_endpoint()?;

        let message_id = format!("msg_{}", Uuid::new_v4().simple());
        let part_id = format!("part_{}", Uuid::new_v4().simple());
        let mode = self.selected_mode.as_deref().unwrap_or(FALLBACK_MODE);
        let request = SendMessageRequest::text(
            &key.session_id,
            &message_id,
            &part_id,
            text,
            provider,
            model,
            mode,
        );

        let mut optimistic = Message::new(&message_id, Role::User, Utc::now())
            .with_parts([Part::text(part_id, text)]);
        optimistic.provider_id = Some(provider.clone());
        optimistic.model_id = Some(model.clone());
        optimistic.origin = MessageOrigin::Optimistic;
        self.timeline.insert_local(&key, optimistic);

        Ok(vec![Effect::Call(Call::Send {
            epoch: self.epoch,
            endpoint,
            key,
            request,
        })])
    }

    pub fn set_permissions(&mut self, settings: PermissionSettings) -> ControllerResult<Vec<Effect>> {
        let endpoint = self.active_endpoint()?;
        Ok(vec![Effect::Call(Call::SetPermissions { endpoint, settings })])
    }

    // ── Results ─────────────────────────────────────────────────────────

    pub fn handle_reply(&mut self, reply: Reply) -> Vec<Effect> {
        match reply {
            Reply::Probed {
                epoch,
                endpoint_id,
                result,
            } => {
                if !self.is_current_epoch(epoch, "probe") {
                    return Vec::new();
                }
                let Ok(endpoint) = self.active_endpoint() else {
                    return Vec::new();
                };
                match result {
                    Ok(app) => {
                        info!(
                            "connected to {} (version {})",
                            endpoint.url(),
                            app.version.as_deref().unwrap_or("unknown")
                        );
                        self.status = ConnectionStatus::Connected;
                        self.registry.mark_connected(&endpoint_id);
                        vec![
                            Effect::Call(Call::FetchCatalog {
                                epoch,
                                endpoint: endpoint.clone(),
                            }),
                            Effect::Call(Call::LoadSessions {
                                epoch,
                                endpoint,
                                select: true,
                            }),
                        ]
                    }
                    Err(e) => {
                        warn!("{} is unreachable: {e}", endpoint.url());
                        self.status = ConnectionStatus::Unreachable(e.to_string());
                        Vec::new()
                    }
                }
            }
            Reply::Catalog {
                epoch,
                providers,
                modes,
            } => {
                if !self.is_current_epoch(epoch, "catalog") {
                    return Vec::new();
                }
                let catalog = providers.map(ProviderCatalog::from).unwrap_or_else(|e| {
                    warn!("failed to load providers: {e}");
                    ProviderCatalog::default()
                });
                let modes = match modes {
                    Ok(modes) => modes.into_iter().map(Mode::from).collect(),
                    Err(e) => {
                        debug!("modes unavailable, using built-in modes: {e}");
                        Mode::builtin()
                    }
                };
                self.apply_catalog(catalog, modes);
                Vec::new()
            }
            Reply::Sessions {
                epoch,
                endpoint_id,
                select,
                result,
            } => {
                if !self.is_current_epoch(epoch, "session list") {
                    return Vec::new();
                }
                let sessions = result.unwrap_or_else(|e| {
                    warn!("failed to load sessions: {e}");
                    Vec::new()
                });
                self.sessions.replace_endpoint(&endpoint_id, sessions);
                self.after_session_list(select)
            }
            Reply::SessionCreated {
                epoch,
                endpoint_id,
                result,
            } => {
                if !self.is_current_epoch(epoch, "created session") {
                    return Vec::new();
                }
                match result {
                    Ok(session) => {
                        let key = session.key();
                        self.sessions.insert_front(session);
                        match self.active_endpoint() {
                            Ok(endpoint) if endpoint.id == endpoint_id => {
                                self.open_session(endpoint, key)
                            }
                            _ => Vec::new(),
                        }
                    }
                    Err(e) => {
                        warn!("failed to create session: {e}");
                        self.ensure_subscribed()
                    }
                }
            }
            Reply::SessionDeleted { epoch, key, result } => {
                if !self.is_current_epoch(epoch, "session delete") {
                    return Vec::new();
                }
                match result {
                    Ok(()) => self.forget_session(&key),
                    Err(e) => {
                        warn!("failed to delete session {}: {e}", key.session_id);
                        Vec::new()
                    }
                }
            }
            Reply::History {
                epoch,
                ticket,
                result,
            } => {
                if !self.is_current_epoch(epoch, "history") {
                    return Vec::new();
                }
                let messages = result.unwrap_or_else(|e| {
                    warn!("failed to load history of {}: {e}", ticket.key.session_id);
                    Vec::new()
                });
                self.timeline.complete_load(&ticket, messages);
                self.ensure_subscribed()
            }
            Reply::Sent {
                epoch: _,
                key,
                message_id,
                result,
            } => {
                // Not epoch-gated: a session that is no longer tracked just
                // ignores the local error message.
                self.last_send = Some(match result {
                    Ok(()) => SendOutcome::Sent { message_id },
                    Err(e) => {
                        warn!("failed to send message {message_id}: {e}");
                        let error = e.to_string();
                        let mut notice = Message::new(
                            format!("err_{}", Uuid::new_v4().simple()),
                            Role::Assistant,
                            Utc::now(),
                        )
                        .with_parts([Part::text(
                            format!("part_{}", Uuid::new_v4().simple()),
                            format!("Error: {error}"),
                        )]);
                        notice.origin = MessageOrigin::LocalError;
                        self.timeline.insert_local(&key, notice);
                        SendOutcome::Failed { message_id, error }
                    }
                });
                Vec::new()
            }
            Reply::PermissionsSet {
                endpoint_id,
                result,
            } => {
                match result {
                    Ok(()) => info!("permissions updated on {endpoint_id}"),
                    Err(e) => warn!("failed to update permissions on {endpoint_id}: {e}"),
                }
                Vec::new()
            }
            Reply::Discovered(servers) => self.merge_discovered(&servers),
        }
    }

    fn after_session_list(&mut self, select: bool) -> Vec<Effect> {
        let Ok(endpoint) = self.active_endpoint() else {
            return Vec::new();
        };
        if let Some(current) = self.current.clone()
            && self.sessions.get(&current).is_none()
        {
            return self.forget_session(&current);
        }
        if !select || self.current.is_some() {
            return Vec::new();
        }
        if self.sessions.most_recent(&endpoint.id).is_some() {
            return self.open_most_recent(endpoint);
        }
        if self.auto_create {
            return vec![Effect::Call(Call::CreateSession {
                epoch: self.epoch,
                endpoint,
            })];
        }
        self.ensure_subscribed()
    }

    fn ensure_subscribed(&mut self) -> Vec<Effect> {
        if self.subscribed {
            return Vec::new();
        }
        let Ok(endpoint) = self.active_endpoint() else {
            return Vec::new();
        };
        self.subscribed = true;
        vec![Effect::Subscribe {
            epoch: self.epoch,
            endpoint,
        }]
    }

    // ── Live events ─────────────────────────────────────────────────────

    pub fn handle_stream_item(&mut self, epoch: u64, item: StreamItem) -> Vec<Effect> {
        if !self.is_current_epoch(epoch, "stream item") {
            return Vec::new();
        }
        match item {
            StreamItem::Event(event) => self.handle_event(event),
            StreamItem::Interrupted {
                reason,
                reconnecting: true,
            } => {
                debug!("event stream interrupted, reconnecting: {reason}");
                self.interrupted = true;
                self.status = ConnectionStatus::Connecting;
                Vec::new()
            }
            StreamItem::Interrupted {
                reason,
                reconnecting: false,
            } => {
                warn!("event stream closed: {reason}");
                self.subscribed = false;
                self.status = ConnectionStatus::Unreachable(reason);
                Vec::new()
            }
        }
    }

    /// The subscription of `epoch` ended without an `Interrupted` item.
    pub fn subscription_closed(&mut self, epoch: u64) {
        if epoch == self.epoch && self.subscribed {
            debug!("event stream ended");
            self.subscribed = false;
            if self.status == ConnectionStatus::Connected {
                self.status = ConnectionStatus::Disconnected;
            }
        }
    }

    /// Apply a push from the active endpoint.
    pub fn handle_event(&mut self, event: ServerEvent) -> Vec<Effect> {
        let Ok(endpoint) = self.active_endpoint() else {
            return Vec::new();
        };
        match &event {
            ServerEvent::ServerConnected => {
                self.status = ConnectionStatus::Connected;
                if !std::mem::take(&mut self.interrupted) {
                    return Vec::new();
                }
                // Anything may have happened while the stream was down.
                let mut effects = vec![Effect::Call(Call::LoadSessions {
                    epoch: self.epoch,
                    endpoint: endpoint.clone(),
                    select: false,
                })];
                if let Some(key) = self.current.clone() {
                    effects.extend(self.open_session(endpoint, key));
                }
                effects
            }
            ServerEvent::SessionUpdated(info) => {
                self.sessions.apply_update_event(&endpoint.id, info);
                Vec::new()
            }
            ServerEvent::SessionDeleted(info) => {
                self.forget_session(&SessionKey::new(&endpoint.id, &info.id))
            }
            ServerEvent::Other { event_type } => {
                debug!("ignoring {event_type} event");
                Vec::new()
            }
            _ => {
                let outcome = self.timeline.apply_event(&endpoint.id, &event);
                debug!("{} -> {outcome:?}", event.event_type());
                Vec::new()
            }
        }
    }

    // ── Presentation ────────────────────────────────────────────────────

    /// Current session's messages, parts filtered, empty messages dropped.
    pub fn visible_messages(&self) -> Vec<Message> {
        let Some(key) = &self.current else {
            return Vec::new();
        };
        visible_messages(self.timeline.messages(key), &self.filter)
    }

    pub fn snapshot(&self) -> ControllerSnapshot {
        let active = self.registry.get_active().cloned();
        let sessions = active
            .as_ref()
            .map(|ep| self.sessions.sessions_for(&ep.id).cloned().collect())
            .unwrap_or_default();
        ControllerSnapshot {
            status: self.status.clone(),
            endpoints: self.registry.list(),
            active_endpoint: active,
            sessions,
            current_session: self.current.clone(),
            load_state: self
                .current
                .as_ref()
                .map_or(LoadState::Empty, |k| self.timeline.state(k)),
            messages: self.visible_messages(),
            providers: self.catalog.providers.clone(),
            modes: self.modes.clone(),
            selected_provider: self.selected_provider.clone(),
            selected_model: self.selected_model.clone(),
            selected_mode: self.selected_mode.clone(),
            filter: self.filter.clone(),
            last_send: self.last_send.clone(),
        }
    }

    // ── Inline execution ────────────────────────────────────────────────

    /// Run `effects` and everything they lead to, one at a time.
    pub async fn run(
        &mut self,
        runner: &EffectRunner,
        effects: Vec<Effect>,
        subscription: &mut Option<Subscription>,
    ) {
        let mut queue = VecDeque::from(effects);
        while let Some(effect) = queue.pop_front() {
            match effect {
                Effect::Subscribe { epoch, endpoint } => {
                    *subscription = Some(runner.subscribe(epoch, &endpoint));
                }
                Effect::Unsubscribe => *subscription = None,
                Effect::Call(call) => {
                    let reply = runner.call(call).await;
                    queue.extend(self.handle_reply(reply));
                }
            }
        }
    }

    /// Wait for the next stream item and apply it. Returns false once the
    /// stream is gone.
    pub async fn pump(
        &mut self,
        runner: &EffectRunner,
        subscription: &mut Option<Subscription>,
    ) -> bool {
        let Some(sub) = subscription.as_mut() else {
            return false;
        };
        let epoch = sub.epoch;
        match sub.next().await {
            Some(item) => {
                let effects = self.handle_stream_item(epoch, item);
                self.run(runner, effects, subscription).await;
                true
            }
            None => {
                self.subscription_closed(epoch);
                *subscription = None;
                false
            }
        }
    }
}
