use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use opencode2go_core::{DiscoveredServer, Endpoint, EndpointPatch, NewEndpoint};
use opencode2go_local_store::{KeyValueStore, load_or_warn, persist_or_warn, remove_or_warn};

/// Storage key for the manual endpoint list.
pub const SERVERS_KEY: &str = "opencode-servers";
/// Storage key for the active endpoint id.
pub const CURRENT_SERVER_KEY: &str = "opencode-current-server";

/// Known endpoints and which one is active.
///
/// Manual endpoints are persisted on every mutation. Discovered endpoints are
/// rebuilt from the last discovery result and never stored; one is hidden
/// whenever a manual endpoint has the same host and port.
pub struct EndpointRegistry {
    store: Arc<dyn KeyValueStore>,
    default_endpoint: Endpoint,
    manual: Vec<Endpoint>,
    discovered_raw: Vec<DiscoveredServer>,
    discovered: Vec<Endpoint>,
    active_id: Option<String>,
}

impl std::fmt::Debug for EndpointRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointRegistry")
            .field("manual", &self.manual)
            .field("discovered", &self.discovered)
            .field("active_id", &self.active_id)
            .finish_non_exhaustive()
    }
}

impl EndpointRegistry {
    /// Load from `store`, seeding `default_endpoint` when nothing usable is
    /// stored. The stored active id is kept when it names a manual endpoint,
    /// otherwise the first manual endpoint becomes active.
    pub fn load(store: Arc<dyn KeyValueStore>, default_endpoint: Endpoint) -> Self {
        let mut manual: Vec<Endpoint> = load_or_warn(store.as_ref(), SERVERS_KEY).unwrap_or_default();
        manual.retain(|ep| !ep.is_discovered);
        let mut seeded = false;
        if !manual.iter().any(|ep| ep.is_default) {
            manual.insert(0, default_endpoint.clone());
            seeded = true;
        }

        let stored_active: Option<String> = load_or_warn(store.as_ref(), CURRENT_SERVER_KEY);
        let active_id = stored_active
            .filter(|id| manual.iter().any(|ep| &ep.id == id))
            .or_else(|| manual.first().map(|ep| ep.id.clone()));

        let registry = Self {
            store,
            default_endpoint,
            manual,
            discovered_raw: Vec::new(),
            discovered: Vec::new(),
            active_id,
        };
        if seeded {
            debug!("seeded endpoint registry with the default endpoint");
            registry.persist();
        }
        registry
    }

    /// Manual endpoints in insertion order, then discovered ones in
    /// discovery order.
    pub fn list(&self) -> Vec<Endpoint> {
        self.manual
            .iter()
            .chain(self.discovered.iter())
            .cloned()
            .collect()
    }

    pub fn manual(&self) -> &[Endpoint] {
        &self.manual
    }

    pub fn discovered(&self) -> &[Endpoint] {
        &self.discovered
    }

    pub fn get(&self, id: &str) -> Option<&Endpoint> {
        self.manual
            .iter()
            .chain(self.discovered.iter())
            .find(|ep| ep.id == id)
    }

    pub fn get_active(&self) -> Option<&Endpoint> {
        self.active_id.as_deref().and_then(|id| self.get(id))
    }

    pub fn active_id(&self) -> Option<&str> {
        self.active_id.as_deref()
    }

    /// Returns false (and changes nothing) for unknown ids.
    pub fn set_active(&mut self, id: &str) -> bool {
        if self.get(id).is_none() {
            return false;
        }
        self.active_id = Some(id.to_string());
        self.persist();
        true
    }

    pub fn add(&mut self, data: NewEndpoint) -> Endpoint {
        let endpoint = Endpoint {
            id: format!("server_{}", uuid::Uuid::new_v4().simple()),
            name: data.name,
            protocol: data.protocol,
            host: data.host,
            port: data.port,
            is_default: false,
            is_discovered: false,
            last_connected_at: None,
            discovered_at: None,
        };
        info!("added endpoint {} ({})", endpoint.name, endpoint.url());
        self.manual.push(endpoint.clone());
        self.rederive_discovered();
        self.persist();
        endpoint
    }

    /// Patch a manual endpoint. Returns false for unknown or discovered ids.
    pub fn update(&mut self, id: &str, patch: &EndpointPatch) -> bool {
        let Some(endpoint) = self.manual.iter_mut().find(|ep| ep.id == id) else {
            return false;
        };
        patch.apply(endpoint);
        self.rederive_discovered();
        self.persist();
        true
    }

    /// Remove a manual endpoint. The default endpoint, discovered entries and
    /// unknown ids are left alone and return false.
    pub fn delete(&mut self, id: &str) -> bool {
        let Some(index) = self.manual.iter().position(|ep| ep.id == id) else {
            return false;
        };
        if self.manual[index].is_default {
            debug!("refusing to delete the default endpoint");
            return false;
        }
        let removed = self.manual.remove(index);
        info!("deleted endpoint {}", removed.name);
        if self.active_id.as_deref() == Some(id) {
            self.active_id = self.manual.first().map(|ep| ep.id.clone());
        }
        self.rederive_discovered();
        self.persist();
        true
    }

    /// Replace the discovered set with `servers`.
    pub fn merge_discovered(&mut self, servers: &[DiscoveredServer]) {
        self.discovered_raw = servers.to_vec();
        let before = self.active_id.clone();
        self.rederive_discovered();
        if self.active_id != before {
            self.persist();
        }
    }

    /// Stamp `last_connected_at` on a successful connection.
    pub fn mark_connected(&mut self, id: &str) {
        let now = Utc::now();
        if let Some(ep) = self.manual.iter_mut().find(|ep| ep.id == id) {
            ep.last_connected_at = Some(now);
            self.persist();
        } else if let Some(ep) = self.discovered.iter_mut().find(|ep| ep.id == id) {
            ep.last_connected_at = Some(now);
        }
    }

    /// Base URL of `endpoint`, or of the configured default endpoint.
    pub fn server_url(&self, endpoint: Option<&Endpoint>) -> String {
        endpoint.unwrap_or(&self.default_endpoint).url()
    }

    fn rederive_discovered(&mut self) {
        let previous = std::mem::take(&mut self.discovered);
        let mut derived: Vec<Endpoint> = Vec::with_capacity(self.discovered_raw.len());
        for server in &self.discovered_raw {
            if self
                .manual
                .iter()
                .any(|ep| ep.same_address(&server.host, server.port))
            {
                continue;
            }
            let id = server.endpoint_id();
            if derived.iter().any(|ep| ep.id == id) {
                continue;
            }
            let mut endpoint = server.to_endpoint(Utc::now());
            if let Some(old) = previous.iter().find(|ep| ep.id == id) {
                endpoint.discovered_at = old.discovered_at;
                endpoint.last_connected_at = old.last_connected_at;
            }
            derived.push(endpoint);
        }
        self.discovered = derived;

        // A vanished discovered endpoint hands over to the manual endpoint at
        // the same address if there is one, otherwise to the first manual.
        if let Some(active) = self.active_id.clone() {
            if self.get(&active).is_none() {
                let replacement = previous
                    .iter()
                    .find(|ep| ep.id == active)
                    .and_then(|gone| {
                        self.manual
                            .iter()
                            .find(|ep| ep.same_address(&gone.host, gone.port))
                    })
                    .or_else(|| self.manual.first())
                    .map(|ep| ep.id.clone());
                debug!("active endpoint {active} vanished, now {replacement:?}");
                self.active_id = replacement;
            }
        }
    }

    fn persist(&self) {
        persist_or_warn(self.store.as_ref(), SERVERS_KEY, &self.manual);
        match &self.active_id {
            Some(id) => persist_or_warn(self.store.as_ref(), CURRENT_SERVER_KEY, id),
            None => remove_or_warn(self.store.as_ref(), CURRENT_SERVER_KEY),
        }
    }
}
