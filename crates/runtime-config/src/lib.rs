//! Shared configuration types.
//!
//! `ClientConfig` is the operator-edited `opencode2go.toml`. `AppSettings` is
//! UI state the client writes itself (JSON in the local key-value store).

use opencode2go_core::{Endpoint, PartFilter, PermissionLevel, PermissionSettings, Protocol};
use serde::{Deserialize, Serialize};

/// Canonical config file name.
pub const CONFIG_FILE_NAME: &str = "opencode2go.toml";

/// Key under which [`AppSettings`] are stored.
pub const SETTINGS_KEY: &str = "opencode-settings";

/// Top-level runtime configuration (persisted as `opencode2go.toml`).
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ClientConfig {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub network: NetworkSettings,
    #[serde(default)]
    pub discovery: DiscoverySettings,
    #[serde(default)]
    pub permissions: PermissionConfig,
    #[serde(default)]
    pub logging: LoggingSettings,
}

impl ClientConfig {
    /// The built-in endpoint seeded into a fresh registry.
    pub fn default_endpoint(&self) -> Endpoint {
        Endpoint::default_local(self.server.protocol, &self.server.host, self.server.port)
    }
}

/// Address of the built-in default endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerSettings {
    #[serde(default)]
    pub protocol: Protocol,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            protocol: Protocol::Http,
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkSettings {
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Backoff between event-stream reconnects; the last entry repeats.
    #[serde(default = "default_reconnect_delays")]
    pub reconnect_delays_ms: Vec<u64>,
    /// Consecutive failed reconnects before giving up, 0 = never give up.
    #[serde(default)]
    pub reconnect_max_retries: usize,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout(),
            reconnect_delays_ms: default_reconnect_delays(),
            reconnect_max_retries: 0,
        }
    }
}

impl NetworkSettings {
    pub fn reconnect_limit(&self) -> Option<usize> {
        (self.reconnect_max_retries > 0).then_some(self.reconnect_max_retries)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiscoverySettings {
    /// Hosts probed on each discovery pass.
    #[serde(default = "default_discovery_hosts")]
    pub hosts: Vec<String>,
    #[serde(default = "default_discovery_ports")]
    pub ports: Vec<u16>,
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    /// Seconds between background passes, 0 disables periodic discovery.
    #[serde(default = "default_discovery_interval")]
    pub interval_secs: u64,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            hosts: default_discovery_hosts(),
            ports: default_discovery_ports(),
            probe_timeout_ms: default_probe_timeout_ms(),
            interval_secs: default_discovery_interval(),
        }
    }
}

/// Permission policy pushed to the server on `permissions push`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PermissionConfig {
    #[serde(default)]
    pub edit: PermissionLevel,
    #[serde(default)]
    pub bash: PermissionLevel,
}

impl From<&PermissionConfig> for PermissionSettings {
    fn from(cfg: &PermissionConfig) -> Self {
        Self {
            edit: cfg.edit,
            bash: cfg.bash,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingSettings {
    /// `tracing_subscriber::EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

// ── Persisted UI settings ───────────────────────────────────────────────

pub const FONT_SIZES: &[u16] = &[12, 14, 16, 18];

pub const AVAILABLE_FONTS: &[&str] = &[
    "JetBrains Mono",
    "Fira Code",
    "SF Mono",
    "Monaco",
    "Inconsolata",
    "Roboto Mono",
    "Consolas",
    "Courier New",
    "Menlo",
    "Source Code Pro",
    "Ubuntu Mono",
    "Cascadia Code",
    "monospace",
];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct AppSettings {
    #[serde(default)]
    pub appearance: AppearanceSettings,
    #[serde(default)]
    pub part_filter: PartFilter,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AppearanceSettings {
    #[serde(default = "default_theme")]
    pub theme: String,
    #[serde(default = "default_font")]
    pub font: String,
    #[serde(default = "default_font_size")]
    pub font_size: u16,
}

impl Default for AppearanceSettings {
    fn default() -> Self {
        Self {
            theme: default_theme(),
            font: default_font(),
            font_size: default_font_size(),
        }
    }
}

// ── Serde default functions ─────────────────────────────────────────────

fn default_host() -> String {
    "localhost".to_string()
}
fn default_port() -> u16 {
    4096
}
fn default_request_timeout() -> u64 {
    30
}
fn default_reconnect_delays() -> Vec<u64> {
    vec![1_000, 2_000, 4_000, 8_000]
}
fn default_discovery_hosts() -> Vec<String> {
    vec!["localhost".to_string(), "127.0.0.1".to_string()]
}
fn default_discovery_ports() -> Vec<u16> {
    vec![4096, 3000, 8080]
}
fn default_probe_timeout_ms() -> u64 {
    800
}
fn default_discovery_interval() -> u64 {
    30
}
fn default_log_filter() -> String {
    "warn".to_string()
}
fn default_theme() -> String {
    "dracula".to_string()
}
fn default_font() -> String {
    "JetBrains Mono".to_string()
}
fn default_font_size() -> u16 {
    14
}

/// Apply compatibility fallbacks after loading raw TOML.
/// Returns true when any field was updated.
pub fn apply_compat_fallbacks(config: &mut ClientConfig) -> bool {
    let mut changed = false;

    if config.server.host.trim().is_empty() {
        config.server.host = default_host();
        changed = true;
    }
    if config.server.port == 0 {
        config.server.port = default_port();
        changed = true;
    }
    if config.network.request_timeout_secs == 0 {
        config.network.request_timeout_secs = default_request_timeout();
        changed = true;
    }
    if config.network.reconnect_delays_ms.is_empty() {
        config.network.reconnect_delays_ms = default_reconnect_delays();
        changed = true;
    }
    if config.logging.filter.trim().is_empty() {
        config.logging.filter = default_log_filter();
        changed = true;
    }

    changed
}

/// Same idea for settings written by older builds.
pub fn normalize_settings(settings: &mut AppSettings) -> bool {
    let mut changed = false;

    if !FONT_SIZES.contains(&settings.appearance.font_size) {
        settings.appearance.font_size = default_font_size();
        changed = true;
    }
    if settings.appearance.theme.trim().is_empty() {
        settings.appearance.theme = default_theme();
        changed = true;
    }
    if settings.appearance.font.trim().is_empty() {
        settings.appearance.font = default_font();
        changed = true;
    }

    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencode2go_core::PartKind;

    #[test]
    fn empty_file_yields_defaults() {
        let cfg: ClientConfig = toml::from_str("").expect("parse toml");
        assert_eq!(cfg, ClientConfig::default());
        assert_eq!(cfg.default_endpoint().url(), "http://localhost:4096");
        assert_eq!(cfg.network.reconnect_limit(), None);
    }

    #[test]
    fn sections_deserialize_from_toml() {
        let cfg: ClientConfig = toml::from_str(
            r#"
[server]
protocol = "https"
host = "devbox.lan"
port = 8443

[network]
request_timeout_secs = 5
reconnect_delays_ms = [100, 500]
reconnect_max_retries = 3

[discovery]
hosts = ["10.0.0.5"]
ports = [4096]
interval_secs = 0

[permissions]
edit = "allow"
bash = "deny"
"#,
        )
        .expect("parse toml");

        assert_eq!(cfg.default_endpoint().url(), "https://devbox.lan:8443");
        assert_eq!(cfg.network.reconnect_limit(), Some(3));
        assert_eq!(cfg.discovery.hosts, vec!["10.0.0.5".to_string()]);
        assert_eq!(cfg.discovery.probe_timeout_ms, 800);
        let perms = PermissionSettings::from(&cfg.permissions);
        assert_eq!(perms.edit, PermissionLevel::Allow);
        assert_eq!(perms.bash, PermissionLevel::Deny);
    }

    #[test]
    fn apply_compat_fallbacks_repairs_blank_values() {
        let mut cfg: ClientConfig = toml::from_str(
            r#"
[server]
host = ""
port = 0

[network]
reconnect_delays_ms = []
"#,
        )
        .expect("parse toml");

        assert!(apply_compat_fallbacks(&mut cfg));
        assert_eq!(cfg.server.host, "localhost");
        assert_eq!(cfg.server.port, 4096);
        assert!(!cfg.network.reconnect_delays_ms.is_empty());
        assert!(!apply_compat_fallbacks(&mut cfg));
    }

    #[test]
    fn default_config_serializes_every_section() {
        let encoded = toml::to_string(&ClientConfig::default()).expect("serialize config");
        for section in ["[server]", "[network]", "[discovery]", "[permissions]", "[logging]"] {
            assert!(encoded.contains(section), "missing {section}");
        }
    }

    #[test]
    fn settings_merge_over_defaults() {
        let settings: AppSettings =
            serde_json::from_str(r#"{"appearance":{"theme":"nord"},"partFilter":["text"]}"#)
                .expect("parse settings");
        assert_eq!(settings.appearance.theme, "nord");
        assert_eq!(settings.appearance.font, "JetBrains Mono");
        assert!(settings.part_filter.contains(PartKind::Text));
    }

    #[test]
    fn normalize_settings_rejects_odd_font_sizes() {
        let mut settings = AppSettings::default();
        settings.appearance.font_size = 13;
        assert!(normalize_settings(&mut settings));
        assert_eq!(settings.appearance.font_size, 14);
        assert!(!normalize_settings(&mut settings));
    }
}
