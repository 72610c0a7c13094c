use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use opencode2go_api_types::ServerEvent;

use crate::retry::RetryConfig;
use crate::sse::SseParser;

const CHANNEL_CAPACITY: usize = 256;

/// Items delivered by an [`EventSubscription`].
#[derive(Debug, Clone)]
pub enum StreamItem {
    Event(ServerEvent),
    /// The stream dropped or could not be opened. When `reconnecting` is
    /// true another attempt follows and a fresh `server.connected` event
    /// marks its success.
    Interrupted { reason: String, reconnecting: bool },
}

/// Handle to a live event stream. Dropping it stops the relay task.
pub struct EventSubscription {
    rx: mpsc::Receiver<StreamItem>,
    task: Option<JoinHandle<()>>,
}

impl EventSubscription {
    /// Wrap a channel fed by something other than the HTTP relay.
    pub fn from_channel(rx: mpsc::Receiver<StreamItem>) -> Self {
        Self { rx, task: None }
    }

    /// Next item, or `None` once the stream has ended for good.
    pub async fn next(&mut self) -> Option<StreamItem> {
        self.rx.recv().await
    }

    pub fn close(mut self) {
        self.abort();
    }

    fn abort(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        self.abort();
    }
}

impl std::fmt::Debug for EventSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSubscription")
            .field("relay", &self.task.is_some())
            .finish()
    }
}

pub(crate) fn spawn_event_relay_task(
    client: reqwest::Client,
    url: String,
    retry: RetryConfig,
) -> EventSubscription {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let task = tokio::spawn(async move {
        let mut attempt = 0usize;
        loop {
            let reason = match relay_once(&client, &url, &tx, &mut attempt).await {
                RelayEnd::ReceiverGone => return,
                RelayEnd::Failed(reason) => reason,
            };

            let delay = retry.delay_for(attempt);
            let reconnecting = delay.is_some();
            warn!(%url, attempt, reconnecting, "event stream interrupted: {reason}");
            if tx
                .send(StreamItem::Interrupted {
                    reason,
                    reconnecting,
                })
                .await
                .is_err()
            {
                return;
            }
            let Some(delay) = delay else {
                return;
            };
            attempt += 1;
            tokio::time::sleep(delay).await;
        }
    });
    EventSubscription {
        rx,
        task: Some(task),
    }
}

enum RelayEnd {
    ReceiverGone,
    Failed(String),
}

async fn relay_once(
    client: &reqwest::Client,
    url: &str,
    tx: &mpsc::Sender<StreamItem>,
    attempt: &mut usize,
) -> RelayEnd {
    let response = match client
        .get(url)
        .header("Accept", "text/event-stream")
        .send()
        .await
    {
        Ok(response) => response,
        Err(error) => return RelayEnd::Failed(format!("stream request failed: {error}")),
    };
    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return RelayEnd::Failed(format!("stream failed with status {status}: {body}"));
    }
    *attempt = 0;

    let mut parser = SseParser::new();
    let mut bytes_stream = response.bytes_stream();
    while let Some(chunk) = bytes_stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(error) => return RelayEnd::Failed(format!("stream read failed: {error}")),
        };
        for frame in parser.feed(&chunk) {
            if !forward(tx, &frame.data).await {
                return RelayEnd::ReceiverGone;
            }
        }
    }
    if let Some(frame) = parser.finish() {
        if !forward(tx, &frame.data).await {
            return RelayEnd::ReceiverGone;
        }
    }
    RelayEnd::Failed("stream closed by server".to_string())
}

/// Returns false when nobody is listening anymore.
async fn forward(tx: &mpsc::Sender<StreamItem>, data: &str) -> bool {
    match ServerEvent::parse(data) {
        Ok(event) => tx.send(StreamItem::Event(event)).await.is_ok(),
        Err(error) => {
            debug!("skipping malformed event ({error}): {data}");
            !tx.is_closed()
        }
    }
}
