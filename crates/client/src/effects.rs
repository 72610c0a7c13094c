//! Side effects requested by the controller and their results.
//!
//! The controller never awaits. It returns [`Effect`]s, something runs them
//! (inline via `ConversationController::run`, or concurrently in the
//! driver) and feeds each [`Reply`] back. Every effect carries the endpoint
//! epoch it was issued under so results from a superseded connection can be
//! recognized and dropped.

use std::sync::Arc;

use opencode2go_api_client::{EventSubscription, StreamItem};
use opencode2go_api_types::{AppInfo, ModeInfo, ProvidersResponse, SendMessageRequest};
use opencode2go_core::{
    DiscoveredServer, Endpoint, Message, PermissionSettings, Session, SessionKey,
};

use crate::discovery::DiscoverySource;
use crate::sessions::{create_remote, fetch_sessions};
use crate::timeline::{LoadTicket, fetch_history};
use crate::transport::{Transport, TransportResult};

#[derive(Debug)]
pub enum Effect {
    Call(Call),
    /// Replace the current event subscription with one for `endpoint`.
    Subscribe { epoch: u64, endpoint: Endpoint },
    /// Drop the current event subscription, if any.
    Unsubscribe,
}

/// Asynchronous request against a server.
#[derive(Debug)]
pub enum Call {
    Probe {
        epoch: u64,
        endpoint: Endpoint,
    },
    FetchCatalog {
        epoch: u64,
        endpoint: Endpoint,
    },
    /// `select` picks (or creates) a session once the list arrives.
    LoadSessions {
        epoch: u64,
        endpoint: Endpoint,
        select: bool,
    },
    CreateSession {
        epoch: u64,
        endpoint: Endpoint,
    },
    DeleteSession {
        epoch: u64,
        endpoint: Endpoint,
        session_id: String,
    },
    LoadHistory {
        epoch: u64,
        endpoint: Endpoint,
        ticket: LoadTicket,
    },
    Send {
        epoch: u64,
        endpoint: Endpoint,
        key: SessionKey,
        request: SendMessageRequest,
    },
    SetPermissions {
        endpoint: Endpoint,
        settings: PermissionSettings,
    },
    Discover,
}

#[derive(Debug)]
pub enum Reply {
    Probed {
        epoch: u64,
        endpoint_id: String,
        result: TransportResult<AppInfo>,
    },
    Catalog {
        epoch: u64,
        providers: TransportResult<ProvidersResponse>,
        modes: TransportResult<Vec<ModeInfo>>,
    },
    Sessions {
        epoch: u64,
        endpoint_id: String,
        select: bool,
        result: TransportResult<Vec<Session>>,
    },
    SessionCreated {
        epoch: u64,
        endpoint_id: String,
        result: TransportResult<Session>,
    },
    SessionDeleted {
        epoch: u64,
        key: SessionKey,
        result: TransportResult<()>,
    },
    History {
        epoch: u64,
        ticket: LoadTicket,
        result: TransportResult<Vec<Message>>,
    },
    Sent {
        epoch: u64,
        key: SessionKey,
        message_id: String,
        result: TransportResult<()>,
    },
    PermissionsSet {
        endpoint_id: String,
        result: TransportResult<()>,
    },
    Discovered(Vec<DiscoveredServer>),
}

/// Event stream tagged with the epoch it was opened under.
#[derive(Debug)]
pub struct Subscription {
    pub epoch: u64,
    stream: EventSubscription,
}

impl Subscription {
    pub async fn next(&mut self) -> Option<StreamItem> {
        self.stream.next().await
    }
}

/// Executes [`Call`]s. Cheap to clone; clones share the transport.
#[derive(Clone)]
pub struct EffectRunner {
    transport: Arc<dyn Transport>,
    discovery: Arc<dyn DiscoverySource>,
}

impl EffectRunner {
    pub fn new(transport: Arc<dyn Transport>, discovery: Arc<dyn DiscoverySource>) -> Self {
        Self {
            transport,
            discovery,
        }
    }

    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    pub fn subscribe(&self, epoch: u64, endpoint: &Endpoint) -> Subscription {
        Subscription {
            epoch,
            stream: self.transport.subscribe(&endpoint.url()),
        }
    }

    pub async fn call(&self, call: Call) -> Reply {
        let transport = self.transport.as_ref();
        match call {
            Call::Probe { epoch, endpoint } => Reply::Probed {
                epoch,
                result: transport.probe(&endpoint.url()).await,
                endpoint_id: endpoint.id,
            },
            Call::FetchCatalog { epoch, endpoint } => {
                let url = endpoint.url();
                let (providers, modes) =
                    futures::join!(transport.providers(&url), transport.modes(&url));
                Reply::Catalog {
                    epoch,
                    providers,
                    modes,
                }
            }
            Call::LoadSessions {
                epoch,
                endpoint,
                select,
            } => Reply::Sessions {
                epoch,
                select,
                result: fetch_sessions(transport, &endpoint).await,
                endpoint_id: endpoint.id,
            },
            Call::CreateSession { epoch, endpoint } => Reply::SessionCreated {
                epoch,
                result: create_remote(transport, &endpoint).await,
                endpoint_id: endpoint.id,
            },
            Call::DeleteSession {
                epoch,
                endpoint,
                session_id,
            } => Reply::SessionDeleted {
                epoch,
                result: transport.delete_session(&endpoint.url(), &session_id).await,
                key: SessionKey::new(endpoint.id, session_id),
            },
            Call::LoadHistory {
                epoch,
                endpoint,
                ticket,
            } => Reply::History {
                epoch,
                result: fetch_history(transport, &endpoint, &ticket.key.session_id).await,
                ticket,
            },
            Call::Send {
                epoch,
                endpoint,
                key,
                request,
            } => Reply::Sent {
                epoch,
                result: transport
                    .send_message(&endpoint.url(), &key.session_id, &request)
                    .await,
                message_id: request.message_id,
                key,
            },
            Call::SetPermissions { endpoint, settings } => Reply::PermissionsSet {
                result: transport.set_permissions(&endpoint.url(), &settings).await,
                endpoint_id: endpoint.id,
            },
            Call::Discover => Reply::Discovered(self.discovery.discover().await),
        }
    }
}
