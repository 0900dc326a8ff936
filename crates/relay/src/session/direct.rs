// Relay of continuous MPEG-TS sources that are not playlists. The body is
// forwarded as it arrives, cut at packet boundaries.

use std::ops::ControlFlow;

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use tokio::time::{sleep, sleep_until};
use tracing::{debug, info};
use ts::{SYNC_BYTE, TS_PACKET_SIZE};
use url::Url;

use super::{SessionEnd, SessionState, StreamSession};
use crate::error::Result;
use crate::hls::{ByteStream, HlsError};
use crate::provider::ClientSink;

enum DirectEvent {
    Cancelled,
    Chunk(Option<std::result::Result<Bytes, HlsError>>),
    Keepalive,
    Deadline,
}

/// Buffers body chunks until they form whole packets. Leading bytes before
/// the first sync byte are discarded.
#[derive(Debug, Default)]
struct PacketAligner {
    pending: BytesMut,
    synced: bool,
}

impl PacketAligner {
    fn push(&mut self, chunk: &[u8]) -> Option<Bytes> {
        self.pending.extend_from_slice(chunk);
        if !self.synced {
            let Some(start) = self.pending.iter().position(|&b| b == SYNC_BYTE) else {
                self.pending.clear();
                return None;
            };
            let _ = self.pending.split_to(start);
            self.synced = true;
        }
        let whole = self.pending.len() / TS_PACKET_SIZE * TS_PACKET_SIZE;
        (whole > 0).then(|| self.pending.split_to(whole).freeze())
    }

    fn reset(&mut self) {
        self.pending.clear();
        self.synced = false;
    }
}

impl StreamSession<'_> {
    pub(super) async fn run_direct<S: ClientSink>(&mut self, sink: &mut S) -> Result<SessionEnd> {
        let mut url = match self.initial_source().await? {
            ControlFlow::Continue(url) => url,
            ControlFlow::Break(end) => return Ok(end),
        };
        let mut aligner = PacketAligner::default();

        loop {
            let opened = tokio::select! {
                biased;
                _ = self.token.cancelled() => return Ok(SessionEnd::Cancelled),
                opened = self.upstream.segments.open(url.as_str()) => opened,
            };
            match opened {
                Ok(stream) => {
                    debug!(uri = %url, "Direct stream opened");
                    if let ControlFlow::Break(end) = self.pump(stream, &mut aligner, sink).await? {
                        return Ok(end);
                    }
                }
                Err(e) => info!(uri = %url, error = %e, "Failed to open direct stream"),
            }
            aligner.reset();

            url = match self.reopen(url).await? {
                ControlFlow::Continue(url) => url,
                ControlFlow::Break(end) => return Ok(end),
            };
        }
    }

    /// Forward one response body until it ends or fails.
    async fn pump<S: ClientSink>(
        &mut self,
        mut stream: ByteStream,
        aligner: &mut PacketAligner,
        sink: &mut S,
    ) -> Result<ControlFlow<SessionEnd>> {
        loop {
            let deadline = self.progress.deadline(self.config());
            let event = tokio::select! {
                biased;
                _ = self.token.cancelled() => DirectEvent::Cancelled,
                chunk = stream.next() => DirectEvent::Chunk(chunk),
                _ = sleep_until(self.progress.next_keepalive) => DirectEvent::Keepalive,
                _ = sleep_until(deadline) => DirectEvent::Deadline,
            };

            let flow = match event {
                DirectEvent::Cancelled => return Ok(ControlFlow::Break(SessionEnd::Cancelled)),
                DirectEvent::Deadline => return Err(self.timed_out()),
                DirectEvent::Keepalive => self.keepalive(sink).await?,
                DirectEvent::Chunk(Some(Ok(chunk))) => match aligner.push(&chunk) {
                    Some(packets) => {
                        self.learn_tables(&packets).await;
                        self.forward(sink, packets).await?
                    }
                    None => ControlFlow::Continue(()),
                },
                DirectEvent::Chunk(Some(Err(e))) => {
                    info!(error = %e, "Direct stream interrupted");
                    return Ok(ControlFlow::Continue(()));
                }
                DirectEvent::Chunk(None) => {
                    info!("Direct stream ended");
                    return Ok(ControlFlow::Continue(()));
                }
            };
            if let ControlFlow::Break(end) = flow {
                return Ok(ControlFlow::Break(end));
            }
        }
    }

    /// Wait a poll interval, then ask the provider for a new source. The
    /// current one is reused when the provider has nothing better.
    async fn reopen(&mut self, current: Url) -> Result<ControlFlow<SessionEnd, Url>> {
        let attempt = self.begin_refresh()?;
        info!(attempt, "Reopening direct stream");
        tokio::select! {
            biased;
            _ = self.token.cancelled() => return Ok(ControlFlow::Break(SessionEnd::Cancelled)),
            _ = sleep(self.config().min_poll_interval()) => {}
        }
        let url = self.resolve_source().await.unwrap_or(current);
        self.source_url = Some(url.clone());
        self.transition(if self.progress.started {
            SessionState::Streaming
        } else {
            SessionState::Starting
        });
        Ok(ControlFlow::Continue(url))
    }
}
