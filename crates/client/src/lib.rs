//! Sync core of the opencode2go client.
//!
//! [`EndpointRegistry`] tracks servers, [`SessionStore`] their sessions and
//! [`MessageTimeline`] the message history of each session, kept current by
//! the server's event stream. [`ConversationController`] ties them to a
//! [`Transport`]; [`Driver`] runs a controller on its own task.

pub mod controller;
pub mod discovery;
pub mod driver;
pub mod effects;
pub mod registry;
pub mod sessions;
pub mod settings;
pub mod timeline;
pub mod transport;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

#[cfg(test)]
mod scenario_tests;

pub use controller::{
    ConnectionStatus, ControllerError, ControllerResult, ControllerSnapshot,
    ConversationController, SendOutcome,
};
pub use discovery::{DiscoverySource, NoDiscovery, ProbeDiscovery};
pub use driver::{Command, Driver, DriverHandle, DriverStopped};
pub use effects::{Call, Effect, EffectRunner, Reply, Subscription};
pub use registry::EndpointRegistry;
pub use sessions::SessionStore;
pub use settings::SettingsStore;
pub use timeline::{ApplyOutcome, LoadState, LoadTicket, MessageTimeline, TimelineUpdate};
pub use transport::{HttpTransport, Transport, TransportResult};
