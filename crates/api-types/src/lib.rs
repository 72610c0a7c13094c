//! Wire types for the opencode server API.
//!
//! Field names follow the server (`sessionID`, `providerID`, ...). Each
//! response type converts into its `opencode2go-core` counterpart; the rest of
//! the client never sees these shapes.

pub mod event;

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::{self, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use opencode2go_core::time::epoch_f64_to_datetime;
use opencode2go_core::{
    Message, Mode, Model, ModelRef, PermissionSettings, Provider, ProviderCatalog, Role, Session,
    classify,
};

pub use event::{EventEnvelope, ServerEvent};

// ─── App ─────────────────────────────────────────────────────────────────────

/// `GET /app`. Only a handful of fields matter to the client; the rest is
/// kept for display.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppInfo {
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

// ─── Sessions ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TimeInfo {
    #[serde(default)]
    pub created: Option<f64>,
    #[serde(default)]
    pub updated: Option<f64>,
}

impl TimeInfo {
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created.map(epoch_f64_to_datetime)
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated.map(epoch_f64_to_datetime)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionInfo {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(
        rename = "parentID",
        alias = "parentId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub time: TimeInfo,
}

impl SessionInfo {
    /// Tag with the endpoint it was fetched from. Missing timestamps become
    /// the epoch, a missing `updated` falls back to `created`.
    pub fn into_session(self, endpoint_id: &str, endpoint_name: &str) -> Session {
        let created_at = self.time.created_at().unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        let updated_at = self.time.updated_at().unwrap_or(created_at);
        Session {
            id: self.id,
            title: self.title,
            created_at,
            updated_at,
            parent_id: self.parent_id.filter(|p| !p.is_empty()),
            endpoint_id: endpoint_id.to_string(),
            endpoint_name: endpoint_name.to_string(),
        }
    }
}

// ─── Messages ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MessageInfo {
    pub id: String,
    #[serde(default = "default_role")]
    pub role: String,
    #[serde(rename = "sessionID", alias = "sessionId", default)]
    pub session_id: String,
    #[serde(default)]
    pub time: TimeInfo,
    #[serde(rename = "providerID", alias = "providerId", default)]
    pub provider_id: Option<String>,
    #[serde(rename = "modelID", alias = "modelId", default)]
    pub model_id: Option<String>,
}

impl MessageInfo {
    pub fn role(&self) -> Role {
        Role::from_wire(&self.role)
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.time.created_at().unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
    }

    pub fn into_message(self) -> Message {
        let mut message = Message::new(self.id.clone(), self.role(), self.created_at());
        message.provider_id = self.provider_id;
        message.model_id = self.model_id;
        message
    }
}

/// One entry of `GET /session/{id}/message`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MessageEnvelope {
    pub info: MessageInfo,
    #[serde(default)]
    pub parts: Vec<Value>,
}

impl MessageEnvelope {
    pub fn into_message(self) -> Message {
        let parts = self.parts.iter().map(classify).collect::<Vec<_>>();
        self.info.into_message().with_parts(parts)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TextPartInput {
    pub id: String,
    #[serde(rename = "sessionID")]
    pub session_id: String,
    #[serde(rename = "messageID")]
    pub message_id: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub text: String,
}

/// Body of `POST /session/{id}/message`.
#[derive(Debug, Clone, Serialize)]
pub struct SendMessageRequest {
    #[serde(rename = "messageID")]
    pub message_id: String,
    #[serde(rename = "providerID")]
    pub provider_id: String,
    #[serde(rename = "modelID")]
    pub model_id: String,
    pub mode: String,
    pub parts: Vec<TextPartInput>,
}

impl SendMessageRequest {
    pub fn text(
        session_id: &str,
        message_id: &str,
        part_id: &str,
        text: &str,
        provider_id: &str,
        model_id: &str,
        mode: &str,
    ) -> Self {
        Self {
            message_id: message_id.to_string(),
            provider_id: provider_id.to_string(),
            model_id: model_id.to_string(),
            mode: mode.to_string(),
            parts: vec![TextPartInput {
                id: part_id.to_string(),
                session_id: session_id.to_string(),
                message_id: message_id.to_string(),
                kind: "text",
                text: text.to_string(),
            }],
        }
    }
}

// ─── Config ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModelInfo {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderInfo {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// The server sends an object keyed by model id; its order is the
    /// display order.
    #[serde(default, deserialize_with = "models_in_order")]
    pub models: Vec<ModelInfo>,
}

/// `GET /config/providers`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ProvidersResponse {
    #[serde(default)]
    pub providers: Vec<ProviderInfo>,
    #[serde(default)]
    pub default: BTreeMap<String, String>,
}

impl From<ProvidersResponse> for ProviderCatalog {
    fn from(resp: ProvidersResponse) -> Self {
        let providers = resp
            .providers
            .into_iter()
            .map(|p| Provider {
                name: if p.name.is_empty() { p.id.clone() } else { p.name },
                id: p.id,
                models: p
                    .models
                    .into_iter()
                    .map(|m| Model {
                        name: if m.name.is_empty() { m.id.clone() } else { m.name },
                        id: m.id,
                    })
                    .collect(),
            })
            .collect();
        ProviderCatalog {
            providers,
            defaults: resp.default,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModeModel {
    #[serde(rename = "providerID", alias = "providerId")]
    pub provider_id: String,
    #[serde(rename = "modelID", alias = "modelId")]
    pub model_id: String,
}

/// One entry of `GET /config/modes`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModeInfo {
    pub name: String,
    #[serde(default)]
    pub model: Option<ModeModel>,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub tools: BTreeMap<String, bool>,
}

impl From<ModeInfo> for Mode {
    fn from(info: ModeInfo) -> Self {
        Mode {
            name: info.name,
            prompt: info.prompt,
            tools: info.tools,
            model: info.model.map(|m| ModelRef {
                provider_id: m.provider_id,
                model_id: m.model_id,
            }),
        }
    }
}

/// Body of `POST /config/permission`.
pub type PermissionRequest = PermissionSettings;

// ─── Serde helpers ───────────────────────────────────────────────────────────

fn default_role() -> String {
    "assistant".to_string()
}

/// Accept models either as `{id: {...}}` (document order kept) or as a list.
fn models_in_order<'de, D>(deserializer: D) -> Result<Vec<ModelInfo>, D::Error>
where
    D: Deserializer<'de>,
{
    struct ModelsVisitor;

    impl<'de> Visitor<'de> for ModelsVisitor {
        type Value = Vec<ModelInfo>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a map or list of models")
        }

        fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
            let mut models = Vec::with_capacity(map.size_hint().unwrap_or(0));
            while let Some((key, value)) = map.next_entry::<String, Value>()? {
                let id = value
                    .get("id")
                    .and_then(Value::as_str)
                    .unwrap_or(&key)
                    .to_string();
                let name = value
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                models.push(ModelInfo { id, name });
            }
            Ok(models)
        }

        fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
            let mut models = Vec::with_capacity(seq.size_hint().unwrap_or(0));
            while let Some(model) = seq.next_element::<ModelInfo>()? {
                models.push(model);
            }
            Ok(models)
        }

        fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(Vec::new())
        }
    }

    deserializer.deserialize_any(ModelsVisitor)
}
