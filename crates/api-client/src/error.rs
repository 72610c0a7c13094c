use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Debug, Error)]
pub enum ClientError {
    /// The request never produced a response (DNS, refused, timeout, ...).
    #[error("cannot reach {url}: {source}")]
    Connectivity {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("server returned {status}: {body}")]
    Server { status: u16, body: String },

    #[error("unexpected response from {url}: {source}")]
    Parse {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to build HTTP client: {0}")]
    Build(#[source] reqwest::Error),
}

impl ClientError {
    /// Worth retrying: the server was unreachable or failed on its side.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Connectivity { .. } => true,
            Self::Server { status, .. } => *status >= 500,
            Self::Parse { .. } | Self::Build(_) => false,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Server { status, .. } => Some(*status),
            _ => None,
        }
    }
}
