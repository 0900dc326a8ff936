//! Collaborator interfaces the relay consumes. Implementations live with the
//! provider plugins, the channel database and the HTTP layer.

use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::channel::{AtscTableSet, ChannelRecord};
use crate::tuner::TunerStatus;

/// Resolves playable URLs for a provider's channels.
#[async_trait]
pub trait StreamProvider: Send + Sync {
    /// Current source URL for `channel`, or `None` when the provider cannot
    /// play it right now.
    async fn stream_source_uri(&self, channel: &ChannelRecord) -> Option<String>;

    /// Whether a URL obtained at `last_refresh` should be replaced.
    fn is_refresh_due(&self, last_refresh: Instant, instance: &str) -> bool;
}

/// Read access to the channel database.
#[async_trait]
pub trait ChannelStore: Send + Sync {
    async fn get_channel_record(
        &self,
        uid: &str,
        namespace: &str,
        instance: &str,
    ) -> Option<ChannelRecord>;

    /// Persist a newly learned table set for the channel.
    async fn update_channel_atsc(&self, _channel: &ChannelRecord, _tables: &AtscTableSet) {}
}

/// Receives tuner status changes (admin UI, HDHomeRun responders).
pub trait TunerStatusReporter: Send + Sync {
    fn report_tuner_status(&self, namespace: &str, index: usize, status: TunerStatus);
}

/// Reporter that drops every update.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopStatusReporter;

impl TunerStatusReporter for NoopStatusReporter {
    fn report_tuner_status(&self, _namespace: &str, _index: usize, _status: TunerStatus) {}
}

/// The tuning client's socket.
#[async_trait]
pub trait ClientSink: Send {
    /// Write all of `bytes`. Broken pipe and connection reset errors mean the
    /// client went away.
    async fn write_client_bytes(&mut self, bytes: &[u8]) -> io::Result<usize>;
}

/// Adapts any tokio writer (e.g. a `TcpStream` or hyper body pipe) to a
/// [`ClientSink`].
#[derive(Debug)]
pub struct WriterSink<W>(pub W);

impl<W> WriterSink<W> {
    pub fn into_inner(self) -> W {
        self.0
    }
}

#[async_trait]
impl<W> ClientSink for WriterSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn write_client_bytes(&mut self, bytes: &[u8]) -> io::Result<usize> {
        self.0.write_all(bytes).await?;
        self.0.flush().await?;
        Ok(bytes.len())
    }
}

/// Whether an I/O error from the client socket is an ordinary disconnect.
pub fn is_client_disconnect(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::WriteZero
    )
}

/// Namespace to provider map, built once at startup.
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn StreamProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, namespace: impl Into<String>, provider: Arc<dyn StreamProvider>) {
        self.providers.insert(namespace.into(), provider);
    }

    pub fn with(mut self, namespace: impl Into<String>, provider: Arc<dyn StreamProvider>) -> Self {
        self.register(namespace, provider);
        self
    }

    pub fn get(&self, namespace: &str) -> Option<Arc<dyn StreamProvider>> {
        self.providers.get(namespace).cloned()
    }

    pub fn namespaces(&self) -> impl Iterator<Item = &str> {
        self.providers.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("namespaces", &self.providers.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedProvider;

    #[async_trait]
    impl StreamProvider for FixedProvider {
        async fn stream_source_uri(&self, _channel: &ChannelRecord) -> Option<String> {
            Some("http://cdn/live.m3u8".into())
        }

        fn is_refresh_due(&self, _last_refresh: Instant, _instance: &str) -> bool {
            false
        }
    }

    #[test]
    fn test_registry_lookup() {
        let registry = ProviderRegistry::new().with("pluto", Arc::new(FixedProvider));
        assert!(registry.get("pluto").is_some());
        assert!(registry.get("other").is_none());
        assert_eq!(registry.namespaces().collect::<Vec<_>>(), vec!["pluto"]);
    }

    #[tokio::test]
    async fn test_async_write_sink() {
        let mut sink = WriterSink(Vec::<u8>::new());
        let written = sink.write_client_bytes(&[0x47; 188]).await.unwrap();
        assert_eq!(written, 188);
        assert_eq!(sink.into_inner().len(), 188);
    }

    #[test]
    fn test_disconnect_kinds() {
        assert!(is_client_disconnect(&io::Error::from(io::ErrorKind::BrokenPipe)));
        assert!(is_client_disconnect(&io::Error::from(io::ErrorKind::ConnectionReset)));
        assert!(!is_client_disconnect(&io::Error::from(io::ErrorKind::PermissionDenied)));
    }
}
