use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::part::Part;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// Anything that is not `"user"` renders as assistant output.
    pub fn from_wire(value: &str) -> Self {
        if value.eq_ignore_ascii_case("user") {
            Self::User
        } else {
            Self::Assistant
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// Where a message in the timeline came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageOrigin {
    /// History load or live event.
    #[default]
    Server,
    /// Created locally on send, not yet echoed by the server.
    Optimistic,
    /// Synthesized locally to surface a failed send.
    LocalError,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub parts: Vec<Part>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    #[serde(default)]
    pub origin: MessageOrigin,
}

impl Message {
    pub fn new(id: impl Into<String>, role: Role, created_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            role,
            parts: Vec::new(),
            created_at,
            provider_id: None,
            model_id: None,
            origin: MessageOrigin::Server,
        }
    }

    /// Build a message from raw parts, enforcing unique part ids.
    pub fn with_parts(mut self, parts: impl IntoIterator<Item = Part>) -> Self {
        for part in parts {
            self.upsert_part(part);
        }
        self
    }

    pub fn part(&self, id: &str) -> Option<&Part> {
        self.parts.iter().find(|p| p.id == id)
    }

    /// Merge into the part with the same id, or append.
    ///
    /// Parts arriving without an id get a positional one so the
    /// unique-id invariant holds. Returns `true` when a new part was appended.
    pub fn upsert_part(&mut self, mut part: Part) -> bool {
        if part.id.is_empty() {
            part.id = self.unused_part_id();
        }
        match self.parts.iter_mut().find(|p| p.id == part.id) {
            Some(existing) => {
                existing.merge(part);
                false
            }
            None => {
                self.parts.push(part);
                true
            }
        }
    }

    fn unused_part_id(&self) -> String {
        (self.parts.len()..)
            .map(|n| format!("{}#{n}", self.id))
            .find(|id| self.part(id).is_none())
            .unwrap_or_default()
    }

    pub fn remove_part(&mut self, part_id: &str) -> bool {
        let before = self.parts.len();
        self.parts.retain(|p| p.id != part_id);
        self.parts.len() != before
    }

    /// Concatenated text of all text parts.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(Part::as_text)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::part::PartKind;

    #[test]
    fn duplicate_part_ids_collapse_in_first_position() {
        let msg = Message::new("m1", Role::Assistant, Utc::now()).with_parts([
            Part::text("p1", "a"),
            Part::text("p2", "b"),
            Part::text("p1", "c"),
        ]);
        assert_eq!(msg.parts.len(), 2);
        assert_eq!(msg.parts[0].as_text(), Some("c"));
        assert_eq!(msg.parts[1].id, "p2");
    }

    #[test]
    fn empty_part_ids_get_positional_ids() {
        let msg = Message::new("m1", Role::Assistant, Utc::now())
            .with_parts([Part::text("", "a"), Part::text("", "b")]);
        assert_eq!(msg.parts[0].id, "m1#0");
        assert_eq!(msg.parts[1].id, "m1#1");
        assert!(msg.parts.iter().all(|p| p.kind() == PartKind::Text));
    }

    #[test]
    fn positional_ids_skip_ids_still_in_use() {
        let mut msg = Message::new("m1", Role::Assistant, Utc::now())
            .with_parts([Part::text("", "a"), Part::text("", "b")]);
        assert!(msg.remove_part("m1#0"));
        assert!(msg.upsert_part(Part::text("", "c")));
        let ids: Vec<_> = msg.parts.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["m1#1", "m1#2"]);
        assert_eq!(msg.text(), "b\nc");
    }

    #[test]
    fn role_defaults_to_assistant() {
        assert_eq!(Role::from_wire("user"), Role::User);
        assert_eq!(Role::from_wire("system"), Role::Assistant);
    }

    #[test]
    fn remove_part_reports_presence() {
        let mut msg = Message::new("m1", Role::User, Utc::now()).with_parts([Part::text("p", "x")]);
        assert!(msg.remove_part("p"));
        assert!(!msg.remove_part("p"));
    }
}
