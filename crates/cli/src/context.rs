use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result, bail};
use tracing::debug;

use opencode2go_api_client::RetryConfig;
use opencode2go_client::{
    ConnectionStatus, ControllerResult, ConversationController, DiscoverySource, Effect,
    EffectRunner, EndpointRegistry, HttpTransport, ProbeDiscovery, SettingsStore, Subscription,
    Transport,
};
use opencode2go_core::Endpoint;
use opencode2go_local_store::{JsonFileStore, KeyValueStore};
use opencode2go_runtime_config::ClientConfig;

/// Config, local store and transport shared by every command.
pub struct Context {
    pub config: ClientConfig,
    pub store: Arc<dyn KeyValueStore>,
    pub transport: Arc<dyn Transport>,
}

impl Context {
    pub fn load(config: ClientConfig) -> Result<Self> {
        let store_path = opencode2go_paths::store_path()?;
        let store = JsonFileStore::open(&store_path)
            .with_context(|| format!("Failed to open local store at {}", store_path.display()))?;
        debug!("local store at {}", store_path.display());
        let network = &config.network;
        let retry = RetryConfig::from_millis(&network.reconnect_delays_ms, network.reconnect_limit());
        let transport = HttpTransport::new(Duration::from_secs(network.request_timeout_secs), retry);
        Ok(Self {
            config,
            store: Arc::new(store),
            transport: Arc::new(transport),
        })
    }

    pub fn registry(&self) -> EndpointRegistry {
        EndpointRegistry::load(self.store.clone(), self.config.default_endpoint())
    }

    pub fn settings(&self) -> SettingsStore {
        SettingsStore::load(self.store.clone())
    }

    pub fn discovery(&self) -> Arc<dyn DiscoverySource> {
        Arc::new(ProbeDiscovery::from_settings(
            self.transport.clone(),
            &self.config.discovery,
        ))
    }

    pub fn runner(&self) -> EffectRunner {
        EffectRunner::new(self.transport.clone(), self.discovery())
    }

    /// A controller over the persisted registry, not yet started.
    pub fn controller(&self) -> ConversationController {
        let filter = self.settings().part_filter().clone();
        let mut controller = ConversationController::new(self.registry(), filter);
        controller.set_auto_create(false);
        controller
    }

    pub fn active_endpoint(&self) -> Result<Endpoint> {
        self.registry()
            .get_active()
            .cloned()
            .context("No active server; add one with `opencode2go servers add`")
    }

    /// The active endpoint, once it answers a probe.
    pub async fn reachable_endpoint(&self) -> Result<Endpoint> {
        let endpoint = self.active_endpoint()?;
        if let Err(e) = self.transport.probe(&endpoint.url()).await {
            bail!("{} is unreachable: {e}", endpoint.url());
        }
        Ok(endpoint)
    }
}

/// A started controller driven inline, one effect batch at a time.
pub struct Connection {
    pub controller: ConversationController,
    runner: EffectRunner,
    subscription: Option<Subscription>,
}

impl Connection {
    /// Connect to the active endpoint and load its sessions. The most recent
    /// session is opened, nothing is created.
    pub async fn open(ctx: &Context) -> Result<Self> {
        let mut conn = Self {
            controller: ctx.controller(),
            runner: ctx.runner(),
            subscription: None,
        };
        let effects = conn.controller.start();
        conn.run(effects).await;
        match conn.controller.status().clone() {
            ConnectionStatus::Connected => Ok(conn),
            ConnectionStatus::Unreachable(reason) => {
                let registry = conn.controller.registry();
                let url = registry.server_url(registry.get_active());
                bail!("{url} is unreachable: {reason}")
            }
            other => bail!("Could not connect ({})", other.label()),
        }
    }

    pub async fn run(&mut self, effects: Vec<Effect>) {
        self.controller
            .run(&self.runner, effects, &mut self.subscription)
            .await;
    }

    /// Run the effects of an accepted controller call.
    pub async fn apply(&mut self, result: ControllerResult<Vec<Effect>>) -> Result<()> {
        let effects = result?;
        self.run(effects).await;
        Ok(())
    }

    /// Make `session_id` current, or keep the most recent one when `None`.
    pub async fn select(&mut self, session_id: Option<&str>) -> Result<()> {
        match session_id {
            Some(id) => {
                let result = self.controller.select_session(id);
                self.apply(result).await
            }
            None if self.controller.current_session().is_some() => Ok(()),
            None => bail!("No sessions on this server; create one with `opencode2go new`"),
        }
    }

    /// Apply the next event-stream item. False once the stream is gone.
    pub async fn pump(&mut self) -> bool {
        self.controller
            .pump(&self.runner, &mut self.subscription)
            .await
    }
}
