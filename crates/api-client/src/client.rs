use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use opencode2go_api_types::*;

use crate::error::{ClientError, Result};
use crate::events::{self, EventSubscription};
use crate::retry::RetryConfig;

/// Connect timeout for the long-lived event stream, which has no overall
/// request timeout.
const STREAM_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Typed HTTP client for one opencode server.
#[derive(Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    stream_client: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    /// Create a client for `base_url`. `timeout` bounds every request except
    /// the event stream.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ClientError::Build)?;
        let stream_client = reqwest::Client::builder()
            .connect_timeout(STREAM_CONNECT_TIMEOUT.min(timeout))
            .build()
            .map_err(ClientError::Build)?;
        Ok(Self {
            client,
            stream_client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Create from an existing `reqwest::Client` (e.g. shared in tests).
    pub fn with_client(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            stream_client: client.clone(),
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn session_url(&self, session_id: &str, suffix: &str) -> String {
        self.url(&format!(
            "/session/{}{}",
            urlencoding::encode(session_id),
            suffix
        ))
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.url(path);
        let resp = self.client.get(&url).send().await.map_err(connectivity(&url))?;
        parse_response(&url, resp).await
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        url: String,
        body: &B,
    ) -> Result<T> {
        let resp = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(connectivity(&url))?;
        parse_response(&url, resp).await
    }

    // ── App ───────────────────────────────────────────────────────────────

    /// Connectivity probe. Any 2xx counts as reachable; the body is parsed
    /// leniently.
    pub async fn probe(&self) -> Result<AppInfo> {
        let url = self.url("/app");
        let resp = self.client.get(&url).send().await.map_err(connectivity(&url))?;
        let body = checked_body(resp, &url).await?;
        Ok(serde_json::from_slice(&body).unwrap_or_default())
    }

    // ── Config ────────────────────────────────────────────────────────────

    pub async fn providers(&self) -> Result<ProvidersResponse> {
        self.get("/config/providers").await
    }

    pub async fn modes(&self) -> Result<Vec<ModeInfo>> {
        self.get("/config/modes").await
    }

    pub async fn set_permissions(&self, req: &PermissionRequest) -> Result<()> {
        let url = self.url("/config/permission");
        let resp = self
            .client
            .post(&url)
            .json(req)
            .send()
            .await
            .map_err(connectivity(&url))?;
        checked_body(resp, &url).await.map(drop)
    }

    // ── Sessions ──────────────────────────────────────────────────────────

    pub async fn list_sessions(&self) -> Result<Vec<SessionInfo>> {
        self.get("/session").await
    }

    pub async fn create_session(&self) -> Result<SessionInfo> {
        self.post(self.url("/session"), &serde_json::json!({})).await
    }

    pub async fn delete_session(&self, session_id: &str) -> Result<()> {
        let url = self.session_url(session_id, "");
        let resp = self
            .client
            .delete(&url)
            .send()
            .await
            .map_err(connectivity(&url))?;
        checked_body(resp, &url).await.map(drop)
    }

    // ── Messages ──────────────────────────────────────────────────────────

    pub async fn messages(&self, session_id: &str) -> Result<Vec<MessageEnvelope>> {
        let url = self.session_url(session_id, "/message");
        let resp = self.client.get(&url).send().await.map_err(connectivity(&url))?;
        parse_response(&url, resp).await
    }

    /// Post a user message. The assistant reply streams back as events; the
    /// returned body is whatever the server answered with.
    pub async fn send_message(&self, session_id: &str, req: &SendMessageRequest) -> Result<Value> {
        let url = self.session_url(session_id, "/message");
        let resp = self
            .client
            .post(&url)
            .json(req)
            .send()
            .await
            .map_err(connectivity(&url))?;
        let body = checked_body(resp, &url).await?;
        Ok(serde_json::from_slice(&body).unwrap_or(Value::Null))
    }

    // ── Events ────────────────────────────────────────────────────────────

    /// Subscribe to `GET /event`, reconnecting per `retry`.
    pub fn subscribe_events(&self, retry: RetryConfig) -> EventSubscription {
        events::spawn_event_relay_task(self.stream_client.clone(), self.url("/event"), retry)
    }
}

fn connectivity(url: &str) -> impl FnOnce(reqwest::Error) -> ClientError + '_ {
    move |source| ClientError::Connectivity {
        url: url.to_string(),
        source,
    }
}

async fn checked_body(resp: reqwest::Response, url: &str) -> Result<Vec<u8>> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(ClientError::Server {
            status: status.as_u16(),
            body,
        });
    }
    let bytes = resp.bytes().await.map_err(connectivity(url))?;
    Ok(bytes.to_vec())
}

async fn parse_response<T: DeserializeOwned>(url: &str, resp: reqwest::Response) -> Result<T> {
    let body = checked_body(resp, url).await?;
    serde_json::from_slice(&body).map_err(|source| ClientError::Parse {
        url: url.to_string(),
        source,
    })
}
