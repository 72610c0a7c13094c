//! Plain-text rendering of client state.

use std::collections::HashMap;

use chrono::{DateTime, Local, Utc};
use serde_json::Value;

use opencode2go_core::{
    Endpoint, Message, MessageOrigin, Part, PartBody, Role, Session, SessionForest, ToolState,
};

const TITLE_WIDTH: usize = 48;
const OUTPUT_PREVIEW: usize = 200;

pub fn format_time(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string()
}

pub fn endpoint_line(endpoint: &Endpoint, active: bool) -> String {
    let marker = if active { "*" } else { " " };
    let mut flags = Vec::new();
    if endpoint.is_default {
        flags.push("default".to_string());
    }
    if endpoint.is_discovered {
        flags.push("discovered".to_string());
    }
    if let Some(at) = endpoint.last_connected_at {
        flags.push(format!("last connected {}", format_time(at)));
    }
    let flags = if flags.is_empty() {
        String::new()
    } else {
        format!("  ({})", flags.join(", "))
    };
    format!(
        "{marker} {:<28} {:<24} {}{flags}",
        endpoint.id,
        endpoint.name,
        endpoint.url()
    )
}

pub fn session_line(session: &Session, depth: usize, with_endpoint: bool) -> String {
    let indent = "  ".repeat(depth);
    let endpoint = if with_endpoint {
        format!("  [{}]", session.endpoint_name)
    } else {
        String::new()
    };
    format!(
        "{indent}{:<32} {:<width$} {}{endpoint}",
        session.id,
        session.label(TITLE_WIDTH),
        format_time(session.updated_at),
        width = TITLE_WIDTH,
    )
}

/// Sessions with children indented under their parent.
pub fn session_tree(sessions: &[Session]) -> Vec<String> {
    let forest = SessionForest::build(sessions);
    forest
        .walk(sessions.len())
        .into_iter()
        .map(|(index, depth)| session_line(&sessions[index], depth, false))
        .collect()
}

pub fn render_message(message: &Message) -> String {
    let who = match (message.role, message.origin) {
        (_, MessageOrigin::LocalError) => "error",
        (Role::User, _) => "you",
        (Role::Assistant, _) => "assistant",
    };
    let model = match (&message.provider_id, &message.model_id) {
        (Some(p), Some(m)) if message.role == Role::Assistant => format!(" · {p}/{m}"),
        _ => String::new(),
    };
    let mut out = format!("── {who} · {}{model}\n", format_time(message.created_at));
    for part in &message.parts {
        if let Some(rendered) = render_part(part) {
            out.push_str(&rendered);
            if !rendered.ends_with('\n') {
                out.push('\n');
            }
        }
    }
    out
}

/// `None` for parts with nothing worth printing.
pub fn render_part(part: &Part) -> Option<String> {
    match &part.body {
        PartBody::Text { text } => Some(text.clone()),
        PartBody::Tool { tool, state } => Some(render_tool(tool, state.as_ref())),
        PartBody::ToolInvocation { tool, input } => Some(match input {
            Some(input) => format!("  → {tool} {}", compact(input)),
            None => format!("  → {tool}"),
        }),
        PartBody::StepStart => Some("  · step".to_string()),
        PartBody::StepFinish => None,
        PartBody::File { filename } => Some(format!("  📎 {filename}")),
        PartBody::Snapshot { id, title, .. } => {
            Some(format!("  ◉ snapshot {}", title.as_deref().unwrap_or(id)))
        }
        PartBody::Unknown { kind, text, .. } => {
            let kind = if kind.is_empty() { "?" } else { kind };
            Some(match text {
                Some(text) => format!("  [{kind}] {text}"),
                None => format!("  [{kind}]"),
            })
        }
    }
}

/// Incremental printer for a changing message list.
///
/// A message is printed once when it first appears. When the last printed
/// message grows only its new tail is printed; any other change reprints the
/// whole message.
#[derive(Debug, Default)]
pub struct Transcript {
    shown: HashMap<String, String>,
    last: Option<String>,
}

impl Transcript {
    /// Treat `messages` as already on screen.
    pub fn mark_seen(&mut self, messages: &[Message]) {
        for message in messages {
            self.shown.insert(message.id.clone(), render_message(message));
            self.last = Some(message.id.clone());
        }
    }

    pub fn reset(&mut self) {
        self.shown.clear();
        self.last = None;
    }

    /// Text to print so the screen catches up with `messages`.
    pub fn update(&mut self, messages: &[Message]) -> String {
        let mut out = String::new();
        for message in messages {
            let rendered = render_message(message);
            match self.shown.get(&message.id) {
                Some(previous) if *previous == rendered => continue,
                Some(previous)
                    if self.last.as_deref() == Some(message.id.as_str())
                        && rendered.starts_with(previous.as_str()) =>
                {
                    out.push_str(&rendered[previous.len()..]);
                }
                _ => out.push_str(&rendered),
            }
            self.shown.insert(message.id.clone(), rendered);
            self.last = Some(message.id.clone());
        }
        out
    }
}

fn render_tool(tool: &str, state: Option<&ToolState>) -> String {
    let Some(state) = state else {
        return format!("  ⚙ {tool}");
    };
    let status = format!("{:?}", state.status).to_lowercase();
    let label = state.title.as_deref().unwrap_or(tool);
    let mut line = format!("  ⚙ {label} ({status})");
    if let Some(error) = &state.error {
        line.push_str(&format!("\n    error: {error}"));
    } else if let Some(output) = &state.output {
        let output = match output {
            Value::String(s) => s.clone(),
            other => compact(other),
        };
        line.push_str(&format!("\n    {}", preview(output.trim(), OUTPUT_PREVIEW)));
    }
    line
}

fn compact(value: &Value) -> String {
    preview(&value.to_string(), OUTPUT_PREVIEW)
}

fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{cut}…")
}
