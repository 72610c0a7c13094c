//! Domain model for the opencode2go client.
//!
//! Everything in here is transport-agnostic: the wire formats live in
//! `opencode2go-api-types` and convert into these types.

pub mod catalog;
pub mod endpoint;
pub mod filter;
pub mod message;
pub mod part;
pub mod permission;
pub mod session;
pub mod time;

pub use catalog::{Mode, Model, ModelRef, Provider, ProviderCatalog};
pub use endpoint::{DiscoveredServer, Endpoint, EndpointPatch, NewEndpoint, Protocol};
pub use filter::{PartFilter, filter_visible, message_visible, visible_messages};
pub use message::{Message, MessageOrigin, Role};
pub use part::{Part, PartBody, PartKind, ToolState, ToolStatus, classify};
pub use permission::{PermissionLevel, PermissionSettings};
pub use session::{Session, SessionForest, SessionKey};

#[cfg(any(test, feature = "testing"))]
pub mod testing;
