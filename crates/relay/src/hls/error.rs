use std::sync::Arc;

use thiserror::Error;

/// Errors raised inside the playlist/fetch/decrypt pipeline.
#[derive(Debug, Clone, Error)]
pub enum HlsError {
    #[error("network error: {source}")]
    Network {
        #[source]
        source: Arc<reqwest::Error>,
    },

    #[error("HTTP {status} fetching {url}")]
    HttpStatus { status: u16, url: String },

    #[error("playlist error: {0}")]
    Playlist(String),

    #[error("timed out after {timeout_ms} ms fetching {url}")]
    Timeout { url: String, timeout_ms: u64 },

    #[error("decryption error: {0}")]
    Decryption(String),

    #[error("unsupported key protocol for {uri}")]
    UnsupportedKeyProtocol { uri: String },

    #[error("operation cancelled")]
    Cancelled,
}

impl From<reqwest::Error> for HlsError {
    fn from(err: reqwest::Error) -> Self {
        HlsError::Network {
            source: Arc::new(err),
        }
    }
}

impl HlsError {
    /// Errors after which no further segment of the session may be forwarded.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            HlsError::Decryption(_) | HlsError::UnsupportedKeyProtocol { .. }
        )
    }

    pub fn is_timeout(&self) -> bool {
        match self {
            HlsError::Timeout { .. } => true,
            HlsError::Network { source } => source.is_timeout(),
            _ => false,
        }
    }
}
