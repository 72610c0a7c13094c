//! Per-session message history kept in sync with server pushes.
//!
//! A session's timeline moves `Empty -> Loading -> Loaded`. Updates that
//! arrive while a load is in flight are buffered and replayed on top of the
//! loaded history, so an event can never be lost to a concurrent load and a
//! load can never resurrect state an event already superseded.
//!
//! Only the loaded history is sorted by creation time. Everything after it
//! is appended in arrival order.

use std::collections::HashMap;

use chrono::Utc;
use tracing::{debug, warn};

use opencode2go_api_types::{MessageInfo, ServerEvent};
use opencode2go_core::{Endpoint, Message, MessageOrigin, Part, Role, SessionKey, classify};

use crate::transport::{Transport, TransportResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadState {
    #[default]
    Empty,
    Loading,
    Loaded,
}

/// Proof of a started load. Only the most recent ticket of a session can
/// complete it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadTicket {
    pub key: SessionKey,
    pub generation: u64,
}

#[derive(Debug, Clone)]
pub enum TimelineUpdate {
    MessageUpdated(MessageInfo),
    PartUpdated { message_id: String, part: Part },
    MessageRemoved { message_id: String },
    PartRemoved { message_id: String, part_id: String },
    /// Optimistic or locally synthesized message.
    InsertLocal(Message),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    Buffered,
    /// Untracked session, unrelated event, or a local insert whose id exists.
    Ignored,
    /// Removal of a message or part the timeline does not hold.
    NotFound,
}

#[derive(Debug, Default)]
struct SessionTimeline {
    state: LoadState,
    generation: u64,
    messages: Vec<Message>,
    pending: Vec<TimelineUpdate>,
}

#[derive(Debug, Default)]
pub struct MessageTimeline {
    sessions: HashMap<SessionKey, SessionTimeline>,
    next_generation: u64,
}

/// Fetch a session's history, converted and in server order.
pub async fn fetch_history(
    transport: &dyn Transport,
    endpoint: &Endpoint,
    session_id: &str,
) -> TransportResult<Vec<Message>> {
    let envelopes = transport.messages(&endpoint.url(), session_id).await?;
    Ok(envelopes.into_iter().map(|e| e.into_message()).collect())
}

impl MessageTimeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, key: &SessionKey) -> LoadState {
        self.sessions
            .get(key)
            .map_or(LoadState::Empty, |t| t.state)
    }

    pub fn messages(&self, key: &SessionKey) -> &[Message] {
        self.sessions
            .get(key)
            .map_or(&[][..], |t| t.messages.as_slice())
    }

    /// Forget a session entirely. Later events for it are ignored until the
    /// next `begin_load`.
    pub fn release(&mut self, key: &SessionKey) {
        self.sessions.remove(key);
    }

    /// Start (or restart) loading `key`. Server messages and buffered
    /// updates from earlier loads are dropped; local messages stay visible.
    pub fn begin_load(&mut self, key: SessionKey) -> LoadTicket {
        self.next_generation += 1;
        let generation = self.next_generation;
        let timeline = self.sessions.entry(key.clone()).or_default();
        timeline.state = LoadState::Loading;
        timeline.generation = generation;
        timeline.messages.retain(|m| m.origin != MessageOrigin::Server);
        timeline.pending.clear();
        LoadTicket { key, generation }
    }

    /// Install a loaded history. Returns false when the ticket is stale.
    pub fn complete_load(&mut self, ticket: &LoadTicket, mut messages: Vec<Message>) -> bool {
        let Some(timeline) = self.sessions.get_mut(&ticket.key) else {
            debug!("dropping history for released session {}", ticket.key);
            return false;
        };
        if timeline.state != LoadState::Loading || timeline.generation != ticket.generation {
            debug!(
                "dropping stale history for {} (generation {}, current {})",
                ticket.key, ticket.generation, timeline.generation
            );
            return false;
        }

        // `sort_by_key` is stable: equal timestamps keep server order.
        messages.sort_by_key(|m| m.created_at);
        let local = std::mem::replace(&mut timeline.messages, messages);
        for message in local {
            // The server copy of an echoed optimistic message wins.
            if timeline.message_mut(&message.id).is_none() {
                timeline.messages.push(message);
            }
        }
        timeline.state = LoadState::Loaded;
        for update in std::mem::take(&mut timeline.pending) {
            timeline.apply_loaded(update);
        }
        true
    }

    /// `begin_load`, fetch and `complete_load` in one go. A failed fetch
    /// leaves the session loaded with an empty history.
    pub async fn load_history(
        &mut self,
        transport: &dyn Transport,
        endpoint: &Endpoint,
        session_id: &str,
    ) -> Vec<Message> {
        let ticket = self.begin_load(SessionKey::new(&endpoint.id, session_id));
        let messages = match fetch_history(transport, endpoint, session_id).await {
            Ok(messages) => messages,
            Err(e) => {
                warn!("failed to load history of {session_id}: {e}");
                Vec::new()
            }
        };
        self.complete_load(&ticket, messages);
        self.messages(&ticket.key).to_vec()
    }

    pub fn apply(&mut self, key: &SessionKey, update: TimelineUpdate) -> ApplyOutcome {
        let Some(timeline) = self.sessions.get_mut(key) else {
            return ApplyOutcome::Ignored;
        };
        match timeline.state {
            LoadState::Empty => ApplyOutcome::Ignored,
            // Local messages show up immediately, even mid-load.
            LoadState::Loading if matches!(update, TimelineUpdate::InsertLocal(_)) => {
                timeline.apply_loaded(update)
            }
            LoadState::Loading => {
                timeline.pending.push(update);
                ApplyOutcome::Buffered
            }
            LoadState::Loaded => timeline.apply_loaded(update),
        }
    }

    pub fn insert_local(&mut self, key: &SessionKey, message: Message) -> ApplyOutcome {
        self.apply(key, TimelineUpdate::InsertLocal(message))
    }

    /// Route a server push for `endpoint_id`. Non-message events are ignored.
    pub fn apply_event(&mut self, endpoint_id: &str, event: &ServerEvent) -> ApplyOutcome {
        let (session_id, update) = match event {
            ServerEvent::MessageUpdated(info) => {
                (&info.session_id, TimelineUpdate::MessageUpdated(info.clone()))
            }
            ServerEvent::PartUpdated {
                session_id,
                message_id,
                part,
            } => (
                session_id,
                TimelineUpdate::PartUpdated {
                    message_id: message_id.clone(),
                    part: classify(part),
                },
            ),
            ServerEvent::MessageRemoved {
                session_id,
                message_id,
            } => (
                session_id,
                TimelineUpdate::MessageRemoved {
                    message_id: message_id.clone(),
                },
            ),
            ServerEvent::PartRemoved {
                session_id,
                message_id,
                part_id,
            } => (
                session_id,
                TimelineUpdate::PartRemoved {
                    message_id: message_id.clone(),
                    part_id: part_id.clone(),
                },
            ),
            _ => return ApplyOutcome::Ignored,
        };
        self.apply(&SessionKey::new(endpoint_id, session_id.as_str()), update)
    }
}

impl SessionTimeline {
    fn message_mut(&mut self, id: &str) -> Option<&mut Message> {
        self.messages.iter_mut().find(|m| m.id == id)
    }

    fn apply_loaded(&mut self, update: TimelineUpdate) -> ApplyOutcome {
        match update {
            TimelineUpdate::MessageUpdated(info) => {
                match self.message_mut(&info.id) {
                    Some(existing) => {
                        existing.role = info.role();
                        if info.provider_id.is_some() {
                            existing.provider_id = info.provider_id;
                        }
                        if info.model_id.is_some() {
                            existing.model_id = info.model_id;
                        }
                        existing.origin = MessageOrigin::Server;
                    }
                    None => self.messages.push(info.into_message()),
                }
                ApplyOutcome::Applied
            }
            TimelineUpdate::PartUpdated { message_id, part } => {
                match self.message_mut(&message_id) {
                    Some(existing) => {
                        existing.upsert_part(part);
                    }
                    None => {
                        // Part before its message.updated; the later update
                        // fills in the real role.
                        let placeholder = Message::new(message_id, Role::Assistant, Utc::now())
                            .with_parts([part]);
                        self.messages.push(placeholder);
                    }
                }
                ApplyOutcome::Applied
            }
            TimelineUpdate::MessageRemoved { message_id } => {
                let before = self.messages.len();
                self.messages.retain(|m| m.id != message_id);
                if self.messages.len() == before {
                    ApplyOutcome::NotFound
                } else {
                    ApplyOutcome::Applied
                }
            }
            TimelineUpdate::PartRemoved {
                message_id,
                part_id,
            } => {
                let removed = self
                    .message_mut(&message_id)
                    .is_some_and(|m| m.remove_part(&part_id));
                if removed {
                    ApplyOutcome::Applied
                } else {
                    ApplyOutcome::NotFound
                }
            }
            TimelineUpdate::InsertLocal(message) => {
                if self.message_mut(&message.id).is_some() {
                    return ApplyOutcome::Ignored;
                }
                self.messages.push(message);
                ApplyOutcome::Applied
            }
        }
    }
}
