use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::message::Message;
use crate::part::{Part, PartKind};

/// Selection over the filterable part kinds. Empty means "show all".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartFilter {
    kinds: BTreeSet<PartKind>,
}

impl PartFilter {
    pub fn show_all() -> Self {
        Self::default()
    }

    /// `Unknown` is not selectable and is dropped.
    pub fn only(kinds: impl IntoIterator<Item = PartKind>) -> Self {
        Self {
            kinds: kinds
                .into_iter()
                .filter(|k| *k != PartKind::Unknown)
                .collect(),
        }
    }

    pub fn is_show_all(&self) -> bool {
        self.kinds.is_empty()
    }

    pub fn contains(&self, kind: PartKind) -> bool {
        self.kinds.contains(&kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = PartKind> + '_ {
        self.kinds.iter().copied()
    }

    /// Flip one kind. Returns whether it is selected afterwards.
    pub fn toggle(&mut self, kind: PartKind) -> bool {
        if kind == PartKind::Unknown {
            return false;
        }
        if !self.kinds.remove(&kind) {
            self.kinds.insert(kind);
            return true;
        }
        false
    }

    pub fn select_all(&mut self) {
        self.kinds = PartKind::FILTERABLE.into_iter().collect();
    }

    pub fn select_none(&mut self) {
        self.kinds.clear();
    }

    pub fn allows(&self, part: &Part) -> bool {
        self.is_show_all() || self.kinds.contains(&part.kind())
    }
}

/// Parts visible under `filter`, in their original order.
pub fn filter_visible<'a>(parts: &'a [Part], filter: &PartFilter) -> Vec<&'a Part> {
    parts.iter().filter(|p| filter.allows(p)).collect()
}

/// A message is shown when at least one of its parts is.
pub fn message_visible(message: &Message, filter: &PartFilter) -> bool {
    message.parts.iter().any(|p| filter.allows(p))
}

/// Copies of the visible messages holding only their visible parts.
pub fn visible_messages(messages: &[Message], filter: &PartFilter) -> Vec<Message> {
    messages
        .iter()
        .filter(|m| message_visible(m, filter))
        .map(|m| Message {
            parts: filter_visible(&m.parts, filter).into_iter().cloned().collect(),
            ..m.clone()
        })
        .collect()
}
