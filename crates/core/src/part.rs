use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::time::epoch_from_json;

/// Discriminator of a [`Part`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PartKind {
    Text,
    Tool,
    ToolInvocation,
    StepStart,
    StepFinish,
    File,
    Snapshot,
    /// Anything the client does not recognize.
    Unknown,
}

impl PartKind {
    /// The kinds a user can select in a part filter, in display order.
    pub const FILTERABLE: [PartKind; 7] = [
        PartKind::Text,
        PartKind::Tool,
        PartKind::ToolInvocation,
        PartKind::StepStart,
        PartKind::StepFinish,
        PartKind::File,
        PartKind::Snapshot,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Tool => "tool",
            Self::ToolInvocation => "tool-invocation",
            Self::StepStart => "step-start",
            Self::StepFinish => "step-finish",
            Self::File => "file",
            Self::Snapshot => "snapshot",
            Self::Unknown => "unknown",
        }
    }

    /// Parse a wire discriminator. Returns `None` for anything outside the
    /// known set, including the literal `"unknown"`.
    pub fn from_wire(value: &str) -> Option<Self> {
        Self::FILTERABLE.into_iter().find(|k| k.as_str() == value)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Text => "Text Content",
            Self::Tool => "Tool Results",
            Self::ToolInvocation => "Tool Invocations",
            Self::StepStart => "Step Start",
            Self::StepFinish => "Step Finish",
            Self::File => "File Attachments",
            Self::Snapshot => "Snapshots",
            Self::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for PartKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Error,
}

impl ToolStatus {
    /// Unrecognized statuses are treated as pending.
    fn from_wire(value: &str) -> Self {
        match value {
            "running" => Self::Running,
            "completed" => Self::Completed,
            "error" => Self::Error,
            _ => Self::Pending,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ToolState {
    pub status: ToolStatus,
    pub input: Option<Value>,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub title: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl ToolState {
    /// Overlay `newer` on top of `self`: fields present in `newer` win,
    /// absent ones keep their previous value.
    fn merge(&mut self, newer: ToolState) {
        self.status = newer.status;
        self.input = newer.input.or(self.input.take());
        self.output = newer.output.or(self.output.take());
        self.error = newer.error.or(self.error.take());
        self.title = newer.title.or(self.title.take());
        self.started_at = newer.started_at.or(self.started_at);
        self.ended_at = newer.ended_at.or(self.ended_at);
    }
}

/// Kind-specific payload of a part.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum PartBody {
    Text {
        text: String,
    },
    Tool {
        tool: String,
        state: Option<ToolState>,
    },
    ToolInvocation {
        tool: String,
        input: Option<Value>,
    },
    StepStart,
    StepFinish,
    File {
        filename: String,
    },
    Snapshot {
        id: String,
        title: Option<String>,
        url: Option<String>,
        data: Option<Value>,
    },
    Unknown {
        /// Discriminator as received, empty when missing.
        kind: String,
        text: Option<String>,
        raw: Value,
    },
}

impl PartBody {
    pub fn kind(&self) -> PartKind {
        match self {
            Self::Text { .. } => PartKind::Text,
            Self::Tool { .. } => PartKind::Tool,
            Self::ToolInvocation { .. } => PartKind::ToolInvocation,
            Self::StepStart => PartKind::StepStart,
            Self::StepFinish => PartKind::StepFinish,
            Self::File { .. } => PartKind::File,
            Self::Snapshot { .. } => PartKind::Snapshot,
            Self::Unknown { .. } => PartKind::Unknown,
        }
    }
}

/// One typed unit of message content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Part {
    pub id: String,
    pub body: PartBody,
}

impl Part {
    pub fn text(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            body: PartBody::Text { text: text.into() },
        }
    }

    pub fn kind(&self) -> PartKind {
        self.body.kind()
    }

    pub fn as_text(&self) -> Option<&str> {
        match &self.body {
            PartBody::Text { text } => Some(text),
            _ => None,
        }
    }

    /// Apply a later update of the same part.
    ///
    /// Same kind: fields carried by `newer` replace ours, optional fields it
    /// leaves out keep their current value. Different kind: the body is
    /// replaced outright.
    pub fn merge(&mut self, newer: Part) {
        let body = std::mem::replace(&mut self.body, PartBody::StepStart);
        self.body = match (body, newer.body) {
            (
                PartBody::Tool { state: old, .. },
                PartBody::Tool { tool, state: new },
            ) => {
                let state = match (old, new) {
                    (Some(mut old), Some(new)) => {
                        old.merge(new);
                        Some(old)
                    }
                    (old, new) => new.or(old),
                };
                PartBody::Tool { tool, state }
            }
            (
                PartBody::ToolInvocation { input: old, .. },
                PartBody::ToolInvocation { tool, input },
            ) => PartBody::ToolInvocation {
                tool,
                input: input.or(old),
            },
            (
                PartBody::Snapshot {
                    title: old_title,
                    url: old_url,
                    data: old_data,
                    ..
                },
                PartBody::Snapshot {
                    id,
                    title,
                    url,
                    data,
                },
            ) => PartBody::Snapshot {
                id,
                title: title.or(old_title),
                url: url.or(old_url),
                data: data.or(old_data),
            },
            (_, newer) => newer,
        };
    }
}

/// Classify a raw server part into a typed [`Part`].
///
/// Total: every input yields a part. Inputs whose discriminator is unknown,
/// or whose kind is missing a required field, become [`PartBody::Unknown`]
/// carrying the raw payload.
pub fn classify(raw: &Value) -> Part {
    let id = str_field(raw, "id").unwrap_or_default().to_string();
    let discriminator = str_field(raw, "type").unwrap_or_default();

    let body = PartKind::from_wire(discriminator)
        .and_then(|kind| classify_known(kind, raw, &id))
        .unwrap_or_else(|| PartBody::Unknown {
            kind: discriminator.to_string(),
            text: str_field(raw, "text").map(str::to_string),
            raw: raw.clone(),
        });

    Part { id, body }
}

fn classify_known(kind: PartKind, raw: &Value, id: &str) -> Option<PartBody> {
    let body = match kind {
        PartKind::Text => PartBody::Text {
            text: str_field(raw, "text").unwrap_or_default().to_string(),
        },
        PartKind::Tool => PartBody::Tool {
            tool: non_empty(str_field(raw, "tool"))?,
            state: raw.get("state").filter(|s| s.is_object()).map(tool_state),
        },
        PartKind::ToolInvocation => {
            let invocation = raw.get("invocation")?;
            PartBody::ToolInvocation {
                tool: non_empty(str_field(invocation, "tool"))?,
                input: present(invocation.get("input")),
            }
        }
        PartKind::StepStart => PartBody::StepStart,
        PartKind::StepFinish => PartBody::StepFinish,
        PartKind::File => PartBody::File {
            filename: non_empty(str_field(raw, "filename"))?,
        },
        PartKind::Snapshot => snapshot(raw, id),
        PartKind::Unknown => return None,
    };
    Some(body)
}

fn tool_state(state: &Value) -> ToolState {
    let time = state.get("time");
    ToolState {
        status: ToolStatus::from_wire(str_field(state, "status").unwrap_or_default()),
        input: present(state.get("input")),
        output: present(state.get("output")),
        error: error_text(state.get("error")),
        title: str_field(state, "title").map(str::to_string),
        started_at: time.and_then(|t| t.get("start")).and_then(epoch_from_json),
        ended_at: time.and_then(|t| t.get("end")).and_then(epoch_from_json),
    }
}

fn snapshot(raw: &Value, part_id: &str) -> PartBody {
    match raw.get("snapshot") {
        Some(Value::Object(_)) => {
            let snap = &raw["snapshot"];
            PartBody::Snapshot {
                id: non_empty(str_field(snap, "id")).unwrap_or_else(|| part_id.to_string()),
                title: str_field(snap, "title").map(str::to_string),
                url: str_field(snap, "url").map(str::to_string),
                data: present(snap.get("data")),
            }
        }
        Some(Value::String(id)) if !id.is_empty() => PartBody::Snapshot {
            id: id.clone(),
            title: None,
            url: None,
            data: None,
        },
        _ => PartBody::Snapshot {
            id: part_id.to_string(),
            title: None,
            url: None,
            data: None,
        },
    }
}

fn error_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.filter(|s| !s.is_empty()).map(str::to_string)
}

fn present(value: Option<&Value>) -> Option<Value> {
    value.filter(|v| !v.is_null()).cloned()
}
