use chrono::{DateTime, Duration, Utc};
use serde_json::{Value, json};

use crate::{Endpoint, Message, Part, Protocol, Role, Session};

/// Fixed base instant so ordering assertions are deterministic.
pub fn base_time() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// `base_time() + secs`.
pub fn at(secs: i64) -> DateTime<Utc> {
    base_time() + Duration::seconds(secs)
}

/// Manual endpoint with a generated id.
pub fn endpoint(host: &str, port: u16) -> Endpoint {
    Endpoint {
        id: format!("test-ep-{}", next_id()),
        name: format!("{host}:{port}"),
        protocol: Protocol::Http,
        host: host.to_string(),
        port,
        is_default: false,
        is_discovered: false,
        last_connected_at: None,
        discovered_at: None,
    }
}

/// Root session on `endpoint_id`, updated `updated_secs` after [`base_time`].
pub fn session(endpoint_id: &str, id: &str, updated_secs: i64) -> Session {
    Session {
        id: id.to_string(),
        title: format!("Session {id}"),
        created_at: base_time(),
        updated_at: at(updated_secs),
        parent_id: None,
        endpoint_id: endpoint_id.to_string(),
        endpoint_name: endpoint_id.to_string(),
    }
}

/// Message with a single text part.
pub fn text_message(id: &str, role: Role, created_secs: i64, text: &str) -> Message {
    Message::new(id, role, at(created_secs)).with_parts([Part::text(format!("{id}-p0"), text)])
}

/// Raw `{info, parts}` history entry as the server sends it.
pub fn raw_message(id: &str, role: &str, created_secs: i64, parts: Vec<Value>) -> Value {
    json!({
        "info": {
            "id": id,
            "role": role,
            "sessionID": "ses",
            "time": {"created": at(created_secs).timestamp_millis()}
        },
        "parts": parts,
    })
}

/// Raw text part.
pub fn raw_text(id: &str, text: &str) -> Value {
    json!({"id": id, "type": "text", "text": text})
}

fn next_id() -> u32 {
    use std::sync::atomic::{AtomicU32, Ordering};
    static COUNTER: AtomicU32 = AtomicU32::new(0);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}
