// Raw HTTP access to the provider: segment and key bodies, direct streams,
// and the per-channel bundle of loaders a session works with.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use reqwest::Client;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::{debug, info, trace, warn};

use crate::channel::ChannelRecord;
use crate::config::HttpConfig;
use crate::hls::HlsError;
use crate::hls::playlist::{HttpPlaylistLoader, PlaylistLoader};

/// Body chunks of an upstream response.
pub type ByteStream = BoxStream<'static, Result<Bytes, HlsError>>;

#[async_trait]
pub trait SegmentDownloader: Send + Sync {
    /// Start a GET for `uri` and stream its body.
    async fn open(&self, uri: &str) -> Result<ByteStream, HlsError>;

    /// Whole body of `uri`.
    async fn download(&self, uri: &str) -> Result<Bytes, HlsError> {
        let mut stream = self.open(uri).await?;
        let mut body = BytesMut::new();
        while let Some(chunk) = stream.next().await {
            body.extend_from_slice(&chunk?);
        }
        Ok(body.freeze())
    }

    /// Like [`download`](Self::download) but any failure is logged and
    /// reported as `None`; the caller skips the segment.
    async fn fetch(&self, uri: &str) -> Option<Bytes> {
        match self.download(uri).await {
            Ok(data) => {
                trace!(uri, bytes = data.len(), "Segment fetched");
                Some(data)
            }
            Err(e) => {
                info!(uri, error = %e, "Segment fetch failed");
                None
            }
        }
    }
}

/// reqwest based downloader. The connect timeout lives on the client; the
/// read timeout bounds the wait for response headers and for every body chunk.
pub struct HttpSegmentFetcher {
    client: Client,
    headers: HeaderMap,
    read_timeout: Duration,
}

impl HttpSegmentFetcher {
    pub fn new(client: Client, headers: HeaderMap, read_timeout: Duration) -> Self {
        Self {
            client,
            headers,
            read_timeout,
        }
    }

    fn timeout_error(&self, uri: &str) -> HlsError {
        HlsError::Timeout {
            url: uri.to_string(),
            timeout_ms: self.read_timeout.as_millis() as u64,
        }
    }
}

#[async_trait]
impl SegmentDownloader for HttpSegmentFetcher {
    async fn open(&self, uri: &str) -> Result<ByteStream, HlsError> {
        let request = self.client.get(uri).headers(self.headers.clone()).send();
        let response = tokio::time::timeout(self.read_timeout, request)
            .await
            .map_err(|_| self.timeout_error(uri))??;

        let status = response.status();
        if !status.is_success() {
            return Err(HlsError::HttpStatus {
                status: status.as_u16(),
                url: uri.to_string(),
            });
        }

        let read_timeout = self.read_timeout;
        let timeout_error = self.timeout_error(uri);
        let chunks = stream::unfold(Some(response), move |state| {
            let timeout_error = timeout_error.clone();
            async move {
                let mut response = state?;
                match tokio::time::timeout(read_timeout, response.chunk()).await {
                    Ok(Ok(Some(chunk))) => Some((Ok(chunk), Some(response))),
                    Ok(Ok(None)) => None,
                    Ok(Err(e)) => Some((Err(HlsError::from(e)), None)),
                    Err(_) => Some((Err(timeout_error), None)),
                }
            }
        });
        Ok(chunks.boxed())
    }
}

/// Loaders bound to one channel's request headers.
#[derive(Clone)]
pub struct ChannelUpstream {
    pub playlists: Arc<dyn PlaylistLoader>,
    pub segments: Arc<dyn SegmentDownloader>,
}

/// Creates the upstream access a session needs for its channel.
pub trait Upstream: Send + Sync {
    fn for_channel(&self, channel: &ChannelRecord) -> ChannelUpstream;
}

/// Shares one reqwest client across all sessions.
#[derive(Debug, Clone)]
pub struct HttpUpstream {
    client: Client,
    config: HttpConfig,
}

impl HttpUpstream {
    pub fn new(config: &HttpConfig) -> Result<Self, HlsError> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout())
            .user_agent(config.user_agent.as_str())
            .build()?;
        Ok(Self {
            client,
            config: config.clone(),
        })
    }
}

impl Upstream for HttpUpstream {
    fn for_channel(&self, channel: &ChannelRecord) -> ChannelUpstream {
        let headers = header_map(&channel.stream.headers);
        debug!(channel = %channel.display_number, headers = headers.len(), "Building upstream");
        ChannelUpstream {
            playlists: Arc::new(HttpPlaylistLoader::new(
                self.client.clone(),
                headers.clone(),
                self.config.playlist_timeout(),
            )),
            segments: Arc::new(HttpSegmentFetcher::new(
                self.client.clone(),
                headers,
                self.config.read_timeout(),
            )),
        }
    }
}

/// Convert channel headers, skipping (and logging) invalid names or values.
pub fn header_map(headers: &HashMap<String, String>) -> HeaderMap {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                map.insert(name, value);
            }
            _ => warn!(header = %name, "Ignoring invalid channel header"),
        }
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Chunked(Vec<Result<&'static [u8], HlsError>>);

    #[async_trait]
    impl SegmentDownloader for Chunked {
        async fn open(&self, _uri: &str) -> Result<ByteStream, HlsError> {
            let chunks: Vec<Result<Bytes, HlsError>> = self
                .0
                .iter()
                .map(|c| c.clone().map(Bytes::from_static))
                .collect();
            Ok(stream::iter(chunks).boxed())
        }
    }

    #[tokio::test]
    async fn test_download_concatenates_chunks() {
        let downloader = Chunked(vec![Ok(&b"ab"[..]), Ok(&b"cd"[..])]);
        assert_eq!(downloader.download("http://cdn/1.ts").await.unwrap(), "abcd");
        assert_eq!(downloader.fetch("http://cdn/1.ts").await.unwrap(), "abcd");
    }

    #[tokio::test]
    async fn test_fetch_maps_failure_to_none() {
        let downloader = Chunked(vec![
            Ok(&b"ab"[..]),
            Err(HlsError::Timeout {
                url: "http://cdn/1.ts".into(),
                timeout_ms: 4000,
            }),
        ]);
        assert!(downloader.download("http://cdn/1.ts").await.unwrap_err().is_timeout());
        assert!(downloader.fetch("http://cdn/1.ts").await.is_none());
    }

    #[test]
    fn test_header_map_skips_invalid() {
        let headers = HashMap::from([
            ("Referer".to_string(), "https://example.com/".to_string()),
            ("bad header".to_string(), "x".to_string()),
        ]);
        let map = header_map(&headers);
        assert_eq!(map.len(), 1);
        assert_eq!(map["referer"], "https://example.com/");
    }
}
