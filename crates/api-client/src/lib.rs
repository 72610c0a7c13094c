pub mod client;
pub mod error;
pub mod events;
pub mod retry;
pub mod sse;

pub use client::ApiClient;
pub use error::{ClientError, Result};
pub use events::{EventSubscription, StreamItem};
pub use opencode2go_api_types;
pub use retry::RetryConfig;
