use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use opencode2go_api_client::{ApiClient, ClientError, EventSubscription, RetryConfig};
use opencode2go_api_types::{
    AppInfo, MessageEnvelope, ModeInfo, ProvidersResponse, SendMessageRequest, SessionInfo,
};
use opencode2go_core::PermissionSettings;

pub type TransportResult<T> = Result<T, ClientError>;

/// Everything the client needs from a server, addressed by base URL so one
/// transport can serve every endpoint.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn probe(&self, base_url: &str) -> TransportResult<AppInfo>;
    async fn providers(&self, base_url: &str) -> TransportResult<ProvidersResponse>;
    async fn modes(&self, base_url: &str) -> TransportResult<Vec<ModeInfo>>;
    async fn list_sessions(&self, base_url: &str) -> TransportResult<Vec<SessionInfo>>;
    async fn create_session(&self, base_url: &str) -> TransportResult<SessionInfo>;
    async fn delete_session(&self, base_url: &str, session_id: &str) -> TransportResult<()>;
    async fn messages(&self, base_url: &str, session_id: &str)
    -> TransportResult<Vec<MessageEnvelope>>;
    async fn send_message(
        &self,
        base_url: &str,
        session_id: &str,
        request: &SendMessageRequest,
    ) -> TransportResult<()>;
    async fn set_permissions(
        &self,
        base_url: &str,
        settings: &PermissionSettings,
    ) -> TransportResult<()>;

    /// Open the endpoint's event stream. Dropping the subscription closes it.
    fn subscribe(&self, base_url: &str) -> EventSubscription;
}

/// [`Transport`] over HTTP, one cached [`ApiClient`] per base URL.
pub struct HttpTransport {
    timeout: Duration,
    retry: RetryConfig,
    clients: Mutex<HashMap<String, ApiClient>>,
}

impl HttpTransport {
    pub fn new(timeout: Duration, retry: RetryConfig) -> Self {
        Self {
            timeout,
            retry,
            clients: Mutex::new(HashMap::new()),
        }
    }

    fn client(&self, base_url: &str) -> TransportResult<ApiClient> {
        let mut clients = match self.clients.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(client) = clients.get(base_url) {
            return Ok(client.clone());
        }
        let client = ApiClient::new(base_url, self.timeout)?;
        clients.insert(base_url.to_string(), client.clone());
        Ok(client)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn probe(&self, base_url: &str) -> TransportResult<AppInfo> {
        self.client(base_url)?.probe().await
    }

    async fn providers(&self, base_url: &str) -> TransportResult<ProvidersResponse> {
        self.client(base_url)?.providers().await
    }

    async fn modes(&self, base_url: &str) -> TransportResult<Vec<ModeInfo>> {
        self.client(base_url)?.modes().await
    }

    async fn list_sessions(&self, base_url: &str) -> TransportResult<Vec<SessionInfo>> {
        self.client(base_url)?.list_sessions().await
    }

    async fn create_session(&self, base_url: &str) -> TransportResult<SessionInfo> {
        self.client(base_url)?.create_session().await
    }

    async fn delete_session(&self, base_url: &str, session_id: &str) -> TransportResult<()> {
        self.client(base_url)?.delete_session(session_id).await
    }

    async fn messages(
        &self,
        base_url: &str,
        session_id: &str,
    ) -> TransportResult<Vec<MessageEnvelope>> {
        self.client(base_url)?.messages(session_id).await
    }

    async fn send_message(
        &self,
        base_url: &str,
        session_id: &str,
        request: &SendMessageRequest,
    ) -> TransportResult<()> {
        self.client(base_url)?
            .send_message(session_id, request)
            .await
            .map(drop)
    }

    async fn set_permissions(
        &self,
        base_url: &str,
        settings: &PermissionSettings,
    ) -> TransportResult<()> {
        self.client(base_url)?.set_permissions(settings).await
    }

    fn subscribe(&self, base_url: &str) -> EventSubscription {
        match self.client(base_url) {
            Ok(client) => client.subscribe_events(self.retry.clone()),
            Err(e) => {
                tracing::warn!("cannot subscribe to {base_url}: {e}");
                let (_tx, rx) = tokio::sync::mpsc::channel(1);
                EventSubscription::from_channel(rx)
            }
        }
    }
}
