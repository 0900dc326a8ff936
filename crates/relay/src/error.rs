use thiserror::Error;

/// Why a tuning session could not start or stopped early.
///
/// A client disconnect is not an error; see
/// [`SessionOutcome`](crate::session::SessionOutcome).
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("all tuners already in use for namespace `{namespace}`")]
    NoTunerAvailable { namespace: String },

    #[error("unknown channel `{uid}` in {namespace}/{instance}")]
    UnknownChannel {
        uid: String,
        namespace: String,
        instance: String,
    },

    #[error("provider never started streaming channel `{channel}`: {reason}")]
    ProviderNeverStarted { channel: String, reason: String },

    #[error("provider stopped playing channel `{channel}`: {reason}")]
    ProviderStoppedPlaying { channel: String, reason: String },

    #[error("decryption failed for channel `{channel}`: {reason}")]
    DecryptionFailed { channel: String, reason: String },

    #[error("unexpected internal error: {0}")]
    UnexpectedInternalError(String),
}

impl SessionError {
    pub fn provider_never_started(channel: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ProviderNeverStarted {
            channel: channel.into(),
            reason: reason.into(),
        }
    }

    pub fn provider_stopped(channel: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ProviderStoppedPlaying {
            channel: channel.into(),
            reason: reason.into(),
        }
    }

    pub fn decryption_failed(channel: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::DecryptionFailed {
            channel: channel.into(),
            reason: reason.into(),
        }
    }

    /// Whether the client may immediately retune and expect a fresh attempt
    /// to behave differently.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SessionError::NoTunerAvailable { .. }
                | SessionError::ProviderNeverStarted { .. }
                | SessionError::ProviderStoppedPlaying { .. }
                | SessionError::UnexpectedInternalError(_)
        )
    }

    /// HTTP status and short message the tuning endpoint reports.
    pub fn status_message(&self) -> (u16, &'static str) {
        match self {
            SessionError::NoTunerAvailable { .. } => (400, "All tuners already in use"),
            SessionError::UnknownChannel { .. } => (404, "Unknown channel"),
            SessionError::ProviderNeverStarted { .. } => (503, "Provider never started"),
            SessionError::ProviderStoppedPlaying { .. } => (503, "Provider stopped playing"),
            SessionError::DecryptionFailed { .. } => (502, "Unable to decrypt stream"),
            SessionError::UnexpectedInternalError(_) => (500, "Internal error"),
        }
    }
}

/// Configuration problems found while loading or validating settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid url filter `{pattern}` for namespace `{namespace}`: {source}")]
    UrlFilter {
        namespace: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("invalid value for `{field}`: {reason}")]
    Invalid { field: String, reason: String },
}

pub type Result<T> = std::result::Result<T, SessionError>;
