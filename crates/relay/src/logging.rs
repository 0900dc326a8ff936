//! Logging setup for processes embedding the relay.
//!
//! The filter comes from `RUST_LOG` when set, otherwise
//! [`DEFAULT_LOG_FILTER`], and can be changed at runtime through the
//! returned [`LogFilter`].

use chrono::Local;
use thiserror::Error;
use tracing::info;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::Writer, time::FormatTime},
    layer::SubscriberExt,
    reload::{self, Handle},
    util::SubscriberInitExt,
};

/// Default log filter directive.
pub const DEFAULT_LOG_FILTER: &str = "tuner_relay=info,ts=info,reqwest=warn";

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("invalid filter directive: {0}")]
    Filter(String),

    #[error("failed to install subscriber: {0}")]
    Init(String),
}

/// Timestamps in the server's local timezone.
#[derive(Debug, Clone, Copy)]
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

type FilterHandle = Handle<EnvFilter, tracing_subscriber::Registry>;

/// Runtime handle on the installed filter.
#[derive(Clone)]
pub struct LogFilter {
    handle: FilterHandle,
}

impl LogFilter {
    pub fn current(&self) -> String {
        self.handle
            .with_current(|filter| filter.to_string())
            .unwrap_or_default()
    }

    /// Replace the filter, e.g. `"tuner_relay=debug"`.
    pub fn set(&self, directive: &str) -> Result<(), LoggingError> {
        let filter = parse_filter(directive)?;
        self.handle
            .reload(filter)
            .map_err(|e| LoggingError::Filter(e.to_string()))?;
        info!(directive, "Log filter updated");
        Ok(())
    }
}

impl std::fmt::Debug for LogFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogFilter")
            .field("current", &self.current())
            .finish()
    }
}

fn parse_filter(directive: &str) -> Result<EnvFilter, LoggingError> {
    EnvFilter::try_new(directive).map_err(|e| LoggingError::Filter(e.to_string()))
}

/// Install the global subscriber: console output, or one JSON object per
/// line when `json` is set. Fails if a subscriber is already installed.
pub fn init_logging(json: bool) -> Result<LogFilter, LoggingError> {
    let initial =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let (filter_layer, handle) = reload::Layer::new(initial);

    tracing_subscriber::registry()
        .with(filter_layer)
        .with((!json).then(|| fmt::layer().with_timer(LocalTimer)))
        .with(json.then(|| fmt::layer().json().with_timer(LocalTimer)))
        .try_init()
        .map_err(|e| LoggingError::Init(e.to_string()))?;

    Ok(LogFilter { handle })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_parses() {
        assert!(parse_filter(DEFAULT_LOG_FILTER).is_ok());
        assert!(matches!(
            parse_filter("tuner_relay=loud"),
            Err(LoggingError::Filter(_))
        ));
    }
}
