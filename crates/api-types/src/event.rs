use serde::Deserialize;
use serde_json::Value;

use crate::{MessageInfo, SessionInfo};

/// Raw `{type, properties}` frame from `GET /event`.
#[derive(Debug, Clone, Deserialize)]
pub struct EventEnvelope {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub properties: Value,
}

/// Server push events the client reacts to.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// Sent once per stream when the subscription is established.
    ServerConnected,
    SessionUpdated(SessionInfo),
    SessionDeleted(SessionInfo),
    MessageUpdated(MessageInfo),
    MessageRemoved {
        session_id: String,
        message_id: String,
    },
    /// Carries the full part (text parts hold the accumulated text).
    PartUpdated {
        session_id: String,
        message_id: String,
        part: Value,
    },
    PartRemoved {
        session_id: String,
        message_id: String,
        part_id: String,
    },
    /// Anything else (`storage.write`, `lsp.*`, ...).
    Other { event_type: String },
}

#[derive(Deserialize)]
struct InfoProps<T> {
    info: T,
}

#[derive(Deserialize)]
struct PartProps {
    part: Value,
}

#[derive(Deserialize)]
struct RemovedProps {
    #[serde(rename = "sessionID", alias = "sessionId")]
    session_id: String,
    #[serde(rename = "messageID", alias = "messageId")]
    message_id: String,
    #[serde(rename = "partID", alias = "partId", default)]
    part_id: String,
}

impl ServerEvent {
    /// Parse one `data:` payload.
    pub fn parse(data: &str) -> serde_json::Result<Self> {
        let envelope: EventEnvelope = serde_json::from_str(data)?;
        Self::from_envelope(envelope)
    }

    pub fn from_envelope(envelope: EventEnvelope) -> serde_json::Result<Self> {
        let props = envelope.properties;
        let event = match envelope.event_type.as_str() {
            "server.connected" => Self::ServerConnected,
            "session.updated" => {
                Self::SessionUpdated(serde_json::from_value::<InfoProps<_>>(props)?.info)
            }
            "session.deleted" => {
                Self::SessionDeleted(serde_json::from_value::<InfoProps<_>>(props)?.info)
            }
            "message.updated" => {
                Self::MessageUpdated(serde_json::from_value::<InfoProps<_>>(props)?.info)
            }
            "message.removed" => {
                let removed: RemovedProps = serde_json::from_value(props)?;
                Self::MessageRemoved {
                    session_id: removed.session_id,
                    message_id: removed.message_id,
                }
            }
            "message.part.updated" => {
                let PartProps { part } = serde_json::from_value(props)?;
                let ids: RemovedProps = serde_json::from_value(part.clone())?;
                Self::PartUpdated {
                    session_id: ids.session_id,
                    message_id: ids.message_id,
                    part,
                }
            }
            "message.part.removed" => {
                let removed: RemovedProps = serde_json::from_value(props)?;
                Self::PartRemoved {
                    session_id: removed.session_id,
                    message_id: removed.message_id,
                    part_id: removed.part_id,
                }
            }
            _ => Self::Other {
                event_type: envelope.event_type,
            },
        };
        Ok(event)
    }

    pub fn event_type(&self) -> &str {
        match self {
            Self::ServerConnected => "server.connected",
            Self::SessionUpdated(_) => "session.updated",
            Self::SessionDeleted(_) => "session.deleted",
            Self::MessageUpdated(_) => "message.updated",
            Self::MessageRemoved { .. } => "message.removed",
            Self::PartUpdated { .. } => "message.part.updated",
            Self::PartRemoved { .. } => "message.part.removed",
            Self::Other { event_type } => event_type,
        }
    }

    /// Session the event is about, if any.
    pub fn session_id(&self) -> Option<&str> {
        match self {
            Self::SessionUpdated(info) | Self::SessionDeleted(info) => Some(&info.id),
            Self::MessageUpdated(info) => Some(&info.session_id),
            Self::MessageRemoved { session_id, .. }
            | Self::PartUpdated { session_id, .. }
            | Self::PartRemoved { session_id, .. } => Some(session_id),
            Self::ServerConnected | Self::Other { .. } => None,
        }
    }
}
