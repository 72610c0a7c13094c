use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::future::join_all;
use tracing::debug;

use opencode2go_core::DiscoveredServer;
use opencode2go_runtime_config::DiscoverySettings;

use crate::transport::Transport;

/// Where discovery results come from.
#[async_trait]
pub trait DiscoverySource: Send + Sync {
    async fn discover(&self) -> Vec<DiscoveredServer>;
}

/// Discovery that never finds anything; used when no candidates are
/// configured.
pub struct NoDiscovery;

#[async_trait]
impl DiscoverySource for NoDiscovery {
    async fn discover(&self) -> Vec<DiscoveredServer> {
        Vec::new()
    }
}

/// Probes every `host:port` candidate with `GET /app`.
pub struct ProbeDiscovery {
    transport: Arc<dyn Transport>,
    hosts: Vec<String>,
    ports: Vec<u16>,
    timeout: Duration,
}

impl ProbeDiscovery {
    pub fn new(
        transport: Arc<dyn Transport>,
        hosts: Vec<String>,
        ports: Vec<u16>,
        timeout: Duration,
    ) -> Self {
        Self {
            transport,
            hosts,
            ports,
            timeout,
        }
    }

    pub fn from_settings(transport: Arc<dyn Transport>, settings: &DiscoverySettings) -> Self {
        Self::new(
            transport,
            settings.hosts.clone(),
            settings.ports.clone(),
            Duration::from_millis(settings.probe_timeout_ms),
        )
    }

    async fn probe(&self, host: &str, port: u16) -> Option<DiscoveredServer> {
        let url = format!("http://{host}:{port}");
        let started = Instant::now();
        let info = match tokio::time::timeout(self.timeout, self.transport.probe(&url)).await {
            Ok(Ok(info)) => info,
            Ok(Err(e)) => {
                debug!("no server at {url}: {e}");
                return None;
            }
            Err(_) => {
                debug!("probe of {url} timed out");
                return None;
            }
        };
        Some(DiscoveredServer {
            host: host.to_string(),
            port,
            name: info
                .hostname
                .filter(|h| !h.trim().is_empty())
                .unwrap_or_else(|| "opencode".to_string()),
            version: info.version,
            response_time_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        })
    }
}

#[async_trait]
impl DiscoverySource for ProbeDiscovery {
    /// Candidates answering within the timeout, in candidate order. Hosts
    /// listed twice are probed once.
    async fn discover(&self) -> Vec<DiscoveredServer> {
        let mut candidates: Vec<(&str, u16)> = Vec::new();
        for host in &self.hosts {
            for &port in &self.ports {
                if !candidates.contains(&(host.as_str(), port)) {
                    candidates.push((host.as_str(), port));
                }
            }
        }
        let found = join_all(candidates.iter().map(|&(host, port)| self.probe(host, port))).await;
        found.into_iter().flatten().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeTransport;
    use opencode2go_core::testing::endpoint;

    #[tokio::test]
    async fn finds_reachable_candidates_in_order() {
        let fake = FakeTransport::new();
        fake.set_reachable(&endpoint("localhost", 3000), false);
        fake.set_reachable(&endpoint("localhost", 8080), false);
        fake.set_reachable(&endpoint("10.0.0.2", 3000), false);

        let discovery = ProbeDiscovery::new(
            Arc::new(fake),
            vec!["localhost".to_string(), "10.0.0.2".to_string(), "localhost".to_string()],
            vec![4096, 3000, 8080],
            Duration::from_millis(200),
        );
        let found = discovery.discover().await;
        let addresses: Vec<_> = found.iter().map(|s| (s.host.as_str(), s.port)).collect();
        assert_eq!(
            addresses,
            vec![("localhost", 4096), ("10.0.0.2", 4096), ("10.0.0.2", 8080)]
        );
        assert_eq!(found[0].name, "fake");
        assert_eq!(found[0].version.as_deref(), Some("0.0.0"));
    }

    #[tokio::test]
    async fn no_candidates_no_results() {
        let discovery = ProbeDiscovery::new(
            Arc::new(FakeTransport::new()),
            Vec::new(),
            vec![4096],
            Duration::from_millis(200),
        );
        assert!(discovery.discover().await.is_empty());
        assert!(NoDiscovery.discover().await.is_empty());
    }
}
