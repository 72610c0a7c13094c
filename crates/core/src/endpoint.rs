use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Id of the built-in endpoint that can never be deleted.
pub const DEFAULT_ENDPOINT_ID: &str = "default";
pub const DEFAULT_ENDPOINT_NAME: &str = "Local Server";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Http,
    Https,
}

impl Protocol {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported protocol `{0}` (expected http or https)")]
pub struct ParseProtocolError(pub String);

impl FromStr for Protocol {
    type Err = ParseProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(Self::Http),
            "https" => Ok(Self::Https),
            other => Err(ParseProtocolError(other.to_string())),
        }
    }
}

/// A remote opencode server address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub protocol: Protocol,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub is_discovered: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_connected_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discovered_at: Option<DateTime<Utc>>,
}

impl Endpoint {
    /// The built-in endpoint seeded into an empty registry.
    pub fn default_local(protocol: Protocol, host: &str, port: u16) -> Self {
        Self {
            id: DEFAULT_ENDPOINT_ID.to_string(),
            name: DEFAULT_ENDPOINT_NAME.to_string(),
            protocol,
            host: host.to_string(),
            port,
            is_default: true,
            is_discovered: false,
            last_connected_at: None,
            discovered_at: None,
        }
    }

    /// Base URL: `{protocol}://{host}:{port}`.
    pub fn url(&self) -> String {
        format!("{}://{}:{}", self.protocol, self.host, self.port)
    }

    pub fn address(&self) -> (&str, u16) {
        (self.host.as_str(), self.port)
    }

    pub fn same_address(&self, host: &str, port: u16) -> bool {
        self.port == port && self.host.eq_ignore_ascii_case(host)
    }
}

/// Fields for a manually added endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEndpoint {
    pub name: String,
    pub protocol: Protocol,
    pub host: String,
    pub port: u16,
}

/// Partial update of a manual endpoint. `None` keeps the current value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndpointPatch {
    pub name: Option<String>,
    pub protocol: Option<Protocol>,
    pub host: Option<String>,
    pub port: Option<u16>,
}

impl EndpointPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.protocol.is_none() && self.host.is_none() && self.port.is_none()
    }

    pub fn apply(&self, endpoint: &mut Endpoint) {
        if let Some(name) = &self.name {
            endpoint.name = name.clone();
        }
        if let Some(protocol) = self.protocol {
            endpoint.protocol = protocol;
        }
        if let Some(host) = &self.host {
            endpoint.host = host.clone();
        }
        if let Some(port) = self.port {
            endpoint.port = port;
        }
    }
}

/// A server answering on the local network, as reported by discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredServer {
    pub host: String,
    pub port: u16,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub response_time_ms: u64,
}

impl DiscoveredServer {
    pub fn endpoint_id(&self) -> String {
        format!("discovered_{}_{}", self.host, self.port)
    }

    /// Discovered entries are always plain http.
    pub fn to_endpoint(&self, discovered_at: DateTime<Utc>) -> Endpoint {
        Endpoint {
            id: self.endpoint_id(),
            name: format!("{} ({}:{})", self.name, self.host, self.port),
            protocol: Protocol::Http,
            host: self.host.clone(),
            port: self.port,
            is_default: false,
            is_discovered: true,
            last_connected_at: None,
            discovered_at: Some(discovered_at),
        }
    }
}
