//! Relay configuration.
//!
//! Durations are stored as integer `_ms` / `_secs` fields so the JSON form
//! stays readable; accessor methods hand out [`Duration`]s.

use std::collections::HashMap;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Top level configuration for all relay sessions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub stream: StreamConfig,
    pub http: HttpConfig,
    /// Per provider namespace policy; unknown namespaces use the defaults.
    pub namespaces: HashMap<String, NamespaceConfig>,
}

impl RelayConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: RelayConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints and compile url filters once so bad
    /// patterns surface at startup instead of on the first tune.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stream.job_queue_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "stream.job_queue_capacity".into(),
                reason: "must be at least 1".into(),
            });
        }
        if self.stream.output_queue_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "stream.output_queue_capacity".into(),
                reason: "must be at least 1".into(),
            });
        }
        if self.stream.startup_timeout() > self.stream.stream_idle_timeout() {
            return Err(ConfigError::Invalid {
                field: "stream.startup_timeout_secs".into(),
                reason: "must not exceed stream_idle_timeout_secs".into(),
            });
        }
        for (namespace, ns) in &self.namespaces {
            ns.compiled_url_filter(namespace)?;
        }
        Ok(())
    }

    /// Policy for `namespace`, falling back to defaults.
    pub fn namespace(&self, namespace: &str) -> NamespaceConfig {
        self.namespaces.get(namespace).cloned().unwrap_or_default()
    }
}

/// Session timing and queueing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Bound on waiting for the first usable segment.
    pub startup_timeout_secs: u64,
    /// Session ends when no segment made progress for this long. Half of it
    /// flips the tuner status to "No Reply".
    pub stream_idle_timeout_secs: u64,
    /// Filler frame cadence while no data arrives.
    pub keepalive_interval_ms: u64,
    /// Floor for the playlist re-poll interval.
    pub min_poll_interval_ms: u64,
    pub job_queue_capacity: usize,
    pub output_queue_capacity: usize,
    /// Consecutive segment fetch failures that trigger a source refresh.
    pub refresh_after_fetch_failures: u32,
    /// Consecutive refreshes without progress before giving up.
    pub max_source_refreshes: u32,
    pub shutdown_timeout_ms: u64,
    pub client_write_timeout_secs: u64,
    pub key_cache_capacity: u64,
    /// Generate PAT/PMT/TVCT/STT for filler frames when a channel has no
    /// cached table set.
    pub synthesize_psip: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            startup_timeout_secs: 20,
            stream_idle_timeout_secs: 59,
            keepalive_interval_ms: 4_000,
            min_poll_interval_ms: 500,
            job_queue_capacity: 20,
            output_queue_capacity: 2,
            refresh_after_fetch_failures: 3,
            max_source_refreshes: 5,
            shutdown_timeout_ms: 3_000,
            client_write_timeout_secs: 20,
            key_cache_capacity: 20,
            synthesize_psip: true,
        }
    }
}

impl StreamConfig {
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    pub fn stream_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.stream_idle_timeout_secs)
    }

    pub fn no_reply_threshold(&self) -> Duration {
        self.stream_idle_timeout() / 2
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms)
    }

    pub fn min_poll_interval(&self) -> Duration {
        Duration::from_millis(self.min_poll_interval_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn client_write_timeout(&self) -> Duration {
        Duration::from_secs(self.client_write_timeout_secs)
    }
}

/// Upstream HTTP settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub connect_timeout_ms: u64,
    /// Maximum gap between body chunks.
    pub read_timeout_ms: u64,
    pub playlist_timeout_ms: u64,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 2_000,
            read_timeout_ms: 4_000,
            playlist_timeout_ms: 6_000,
            user_agent: format!("tuner-relay/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl HttpConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn playlist_timeout(&self) -> Duration {
        Duration::from_millis(self.playlist_timeout_ms)
    }
}

/// How playlist entries are identified for de-duplication.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentKeyMode {
    /// `(absolute uri, program date time)`
    #[default]
    UriAndProgramDateTime,
    /// `(absolute uri, 0)`
    UriOnly,
}

/// How a tune request for the namespace is answered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamMode {
    /// Fetch, check and frame the stream, holding a tuner for the session.
    #[default]
    InternalProxy,
    /// Point the client at the provider's playlist. No tuner is held since
    /// the relay never learns when the client stops watching.
    M3u8Redirect,
}

/// Per provider namespace policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NamespaceConfig {
    /// Fixed number of virtual tuners.
    pub tuner_count: usize,
    pub stream_mode: StreamMode,
    pub enable_pts_filter: bool,
    /// PTS (90 kHz ticks) below which a segment counts as pre-roll.
    pub pts_minimum: u64,
    /// Largest PTS jump (90 kHz ticks) accepted between or within segments.
    pub pts_max_delta: u64,
    /// Segments scheduled on the first poll of a live playlist.
    pub segments_to_play: usize,
    /// Segments whose URI matches are replaced by table frames.
    pub url_filter: Option<String>,
    pub key_mode: SegmentKeyMode,
    /// Rewrite SDT provider/service names in forwarded data.
    pub update_sdt: bool,
}

impl Default for NamespaceConfig {
    fn default() -> Self {
        Self {
            tuner_count: 4,
            stream_mode: StreamMode::default(),
            enable_pts_filter: false,
            pts_minimum: 1_000,
            pts_max_delta: 5 * ts::PTS_CLOCK_HZ,
            segments_to_play: 3,
            url_filter: None,
            key_mode: SegmentKeyMode::default(),
            update_sdt: true,
        }
    }
}

impl NamespaceConfig {
    pub fn compiled_url_filter(&self, namespace: &str) -> Result<Option<Regex>, ConfigError> {
        self.url_filter
            .as_deref()
            .filter(|pattern| !pattern.is_empty())
            .map(|pattern| {
                Regex::new(pattern).map_err(|source| ConfigError::UrlFilter {
                    namespace: namespace.to_string(),
                    pattern: pattern.to_string(),
                    source,
                })
            })
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RelayConfig::default();
        assert_eq!(config.stream.stream_idle_timeout(), Duration::from_secs(59));
        assert_eq!(config.stream.no_reply_threshold(), Duration::from_millis(29_500));
        assert_eq!(config.http.connect_timeout(), Duration::from_secs(2));
        assert_eq!(config.http.read_timeout(), Duration::from_secs(4));
        assert_eq!(config.namespace("anything").pts_max_delta, 450_000);
        assert_eq!(config.namespace("anything").stream_mode, StreamMode::InternalProxy);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = RelayConfig::from_json_str(
            r#"{
                "stream": { "keepalive_interval_ms": 1000 },
                "namespaces": {
                    "X": { "tuner_count": 5, "url_filter": "/ads/", "key_mode": "uri_only" }
                }
            }"#,
        )
        .unwrap();
        assert_eq!(config.stream.keepalive_interval(), Duration::from_secs(1));
        assert_eq!(config.stream.job_queue_capacity, 20);
        let ns = config.namespace("X");
        assert_eq!(ns.tuner_count, 5);
        assert_eq!(ns.key_mode, SegmentKeyMode::UriOnly);
        assert!(ns.compiled_url_filter("X").unwrap().unwrap().is_match("http://cdn/ads/1.ts"));
    }

    #[test]
    fn test_bad_filter_rejected() {
        let err = RelayConfig::from_json_str(r#"{"namespaces": {"X": {"url_filter": "("}}}"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::UrlFilter { .. }));
    }

    #[test]
    fn test_stream_mode_names() {
        let config =
            RelayConfig::from_json_str(r#"{"namespaces": {"X": {"stream_mode": "m3u8_redirect"}}}"#)
                .unwrap();
        assert_eq!(config.namespace("X").stream_mode, StreamMode::M3u8Redirect);
        // modes that hand the stream to an external program are not available
        let err = RelayConfig::from_json_str(r#"{"namespaces": {"X": {"stream_mode": "ffmpeg_proxy"}}}"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::Json(_)));
    }

    #[test]
    fn test_zero_queue_rejected() {
        let err = RelayConfig::from_json_str(r#"{"stream": {"job_queue_capacity": 0}}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }
}
