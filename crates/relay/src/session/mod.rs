//! Stream session coordinator.
//!
//! A session binds one tuning client to one tuner slot. It drives the
//! pipeline for the channel, validates and frames what comes out of it, and
//! writes the result to the client until the client leaves, the caller
//! cancels, or the upstream gives up.

mod direct;

use std::fmt;
use std::ops::ControlFlow;
use std::sync::Arc;

use bytes::Bytes;
use regex::Regex;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};
use url::Url;

use crate::atsc::{self, BLANK_PACKET, PsipBuilder, TableTracker};
use crate::channel::{AtscTableSet, ChannelRecord, StreamKind};
use crate::config::{NamespaceConfig, RelayConfig, StreamConfig, StreamMode};
use crate::error::{Result, SessionError};
use crate::hls::{
    ChannelUpstream, DecryptionService, PipelineHandle, PlayQueue, PollerSource, SegmentOutcome,
    Upstream,
};
use crate::provider::{
    ChannelStore, ClientSink, ProviderRegistry, StreamProvider, TunerStatusReporter,
    is_client_disconnect,
};
use crate::pts::PtsValidator;
use crate::tuner::{TunerLease, TunerPool, TunerStatus};

/// Lifecycle of a session. Every transition is logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Allocating,
    Starting,
    Streaming,
    Refreshing,
    Terminating,
    Released,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Allocating => "allocating",
            SessionState::Starting => "starting",
            SessionState::Streaming => "streaming",
            SessionState::Refreshing => "refreshing",
            SessionState::Terminating => "terminating",
            SessionState::Released => "released",
        };
        f.write_str(name)
    }
}

/// How a session that did not fail came to an end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The client closed its connection. The normal way a session ends.
    ClientDisconnected,
    /// The caller's cancellation token fired.
    Cancelled,
    /// The upstream playlist ended after data was forwarded.
    EndOfStream,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub segments_forwarded: u64,
    pub bytes_forwarded: u64,
    pub filler_frames: u64,
    pub refreshes: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    pub end: SessionEnd,
    pub stats: SessionStats,
    /// End of the last forwarded segment in 90 kHz ticks; 0 when the PTS
    /// filter is off or nothing was forwarded.
    pub last_pts: u64,
}

/// How a tune request was answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TuneResponse {
    /// The client should fetch the playlist at `location` itself.
    Redirect { location: Url },
    /// The stream was relayed to the client until the session ended.
    Relayed(SessionOutcome),
}

/// A client asking to watch a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TuneRequest {
    pub uid: String,
    pub namespace: String,
    pub instance: String,
}

impl TuneRequest {
    pub fn new(
        uid: impl Into<String>,
        namespace: impl Into<String>,
        instance: impl Into<String>,
    ) -> Self {
        Self {
            uid: uid.into(),
            namespace: namespace.into(),
            instance: instance.into(),
        }
    }

    fn unknown_channel(&self) -> SessionError {
        SessionError::UnknownChannel {
            uid: self.uid.clone(),
            namespace: self.namespace.clone(),
            instance: self.instance.clone(),
        }
    }
}

/// Everything sessions share: configuration, the tuner pool and the
/// collaborators. Cheap to clone.
#[derive(Clone)]
pub struct RelayContext {
    pub config: Arc<RelayConfig>,
    pub tuners: Arc<TunerPool>,
    pub providers: ProviderRegistry,
    pub channels: Arc<dyn ChannelStore>,
    pub upstream: Arc<dyn Upstream>,
}

impl RelayContext {
    /// Build the context and a tuner pool with one entry per configured or
    /// registered namespace.
    pub fn new(
        config: RelayConfig,
        providers: ProviderRegistry,
        channels: Arc<dyn ChannelStore>,
        upstream: Arc<dyn Upstream>,
        reporter: Arc<dyn TunerStatusReporter>,
    ) -> Self {
        let mut namespaces: Vec<String> = config.namespaces.keys().cloned().collect();
        for namespace in providers.namespaces() {
            if !namespaces.iter().any(|n| n == namespace) {
                namespaces.push(namespace.to_string());
            }
        }
        let counts: Vec<(String, usize)> = namespaces
            .into_iter()
            .map(|namespace| {
                let count = config.namespace(&namespace).tuner_count;
                (namespace, count)
            })
            .collect();
        Self {
            tuners: Arc::new(TunerPool::new(counts, reporter)),
            config: Arc::new(config),
            providers,
            channels,
            upstream,
        }
    }

    /// Pick which of several provider instances carrying the same channel
    /// should serve a new tune.
    pub fn select_instance(&self, namespace: &str, candidates: &[String]) -> Option<String> {
        self.tuners
            .least_loaded_instance(namespace, candidates)
            .map(str::to_string)
    }

    /// Answer `request` the way its namespace is configured to: either a
    /// redirect to the provider's playlist or a relayed session on `sink`.
    pub async fn serve<S: ClientSink>(
        &self,
        request: &TuneRequest,
        sink: &mut S,
        token: CancellationToken,
    ) -> Result<TuneResponse> {
        match self.config.namespace(&request.namespace).stream_mode {
            StreamMode::M3u8Redirect => {
                let location = self.redirect(request).await?;
                Ok(TuneResponse::Redirect { location })
            }
            StreamMode::InternalProxy => self
                .tune(request, sink, token)
                .await
                .map(TuneResponse::Relayed),
        }
    }

    /// Current playlist URL for the requested channel. No tuner is bound.
    #[instrument(
        skip_all,
        fields(namespace = %request.namespace, instance = %request.instance, channel = %request.uid)
    )]
    pub async fn redirect(&self, request: &TuneRequest) -> Result<Url> {
        let (channel, provider) = self.lookup(request).await?;
        let uri = provider.stream_source_uri(&channel).await.ok_or_else(|| {
            warn!("Provider has no source for channel");
            request.unknown_channel()
        })?;
        let location = Url::parse(&uri).map_err(|e| {
            warn!(uri = %uri, error = %e, "Provider returned an invalid source URL");
            request.unknown_channel()
        })?;
        info!(uri = %location, "Redirecting client to provider playlist");
        Ok(location)
    }

    /// Serve `request` to `sink` until the client disconnects, `token` is
    /// cancelled or the upstream fails for good. The tuner slot is released
    /// before this returns, whatever the result.
    #[instrument(
        skip_all,
        fields(namespace = %request.namespace, instance = %request.instance, channel = %request.uid)
    )]
    pub async fn tune<S: ClientSink>(
        &self,
        request: &TuneRequest,
        sink: &mut S,
        token: CancellationToken,
    ) -> Result<SessionOutcome> {
        let (channel, provider) = self.lookup(request).await?;
        let mut session = StreamSession::new(self, channel, provider, token)?;
        session.allocate()?;
        let result = session.run(sink).await;
        session.release();

        match &result {
            Ok(outcome) => info!(
                end = ?outcome.end,
                segments = outcome.stats.segments_forwarded,
                bytes = outcome.stats.bytes_forwarded,
                "Session finished"
            ),
            Err(e) => warn!(error = %e, "Session failed"),
        }
        result
    }

    async fn lookup(&self, request: &TuneRequest) -> Result<(ChannelRecord, Arc<dyn StreamProvider>)> {
        let channel = self
            .channels
            .get_channel_record(&request.uid, &request.namespace, &request.instance)
            .await
            .ok_or_else(|| request.unknown_channel())?;
        let provider = self.providers.get(&request.namespace).ok_or_else(|| {
            warn!("No provider registered for namespace");
            request.unknown_channel()
        })?;
        Ok((channel, provider))
    }
}

impl fmt::Debug for RelayContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayContext")
            .field("config", &self.config)
            .field("tuners", &self.tuners)
            .field("providers", &self.providers)
            .finish_non_exhaustive()
    }
}

/// Liveness bookkeeping driving the startup, idle and keepalive timers.
#[derive(Debug)]
struct Progress {
    started: bool,
    session_start: Instant,
    last_progress: Instant,
    next_keepalive: Instant,
    fetch_failures: u32,
    refreshes_without_progress: u32,
}

impl Progress {
    fn new(keepalive: std::time::Duration) -> Self {
        let now = Instant::now();
        Self {
            started: false,
            session_start: now,
            last_progress: now,
            next_keepalive: now + keepalive,
            fetch_failures: 0,
            refreshes_without_progress: 0,
        }
    }

    fn deadline(&self, config: &StreamConfig) -> Instant {
        if self.started {
            self.last_progress + config.stream_idle_timeout()
        } else {
            self.session_start + config.startup_timeout()
        }
    }
}

enum Event {
    Cancelled,
    Outcome(Option<SegmentOutcome>),
    Keepalive,
    Deadline,
}

struct StreamSession<'a> {
    ctx: &'a RelayContext,
    channel: ChannelRecord,
    provider: Arc<dyn StreamProvider>,
    namespace: NamespaceConfig,
    url_filter: Option<Regex>,
    service_name: String,
    upstream: ChannelUpstream,
    decryption: Arc<DecryptionService>,
    token: CancellationToken,
    state: SessionState,
    lease: Option<TunerLease>,
    pipeline: Option<PipelineHandle>,
    source_url: Option<Url>,
    tables: TableTracker,
    psip: PsipBuilder,
    validator: PtsValidator,
    progress: Progress,
    stats: SessionStats,
}

impl<'a> StreamSession<'a> {
    fn new(
        ctx: &'a RelayContext,
        channel: ChannelRecord,
        provider: Arc<dyn StreamProvider>,
        token: CancellationToken,
    ) -> Result<Self> {
        let namespace = ctx.config.namespace(&channel.namespace);
        let url_filter = namespace
            .compiled_url_filter(&channel.namespace)
            .map_err(|e| SessionError::UnexpectedInternalError(e.to_string()))?;
        let upstream = ctx.upstream.for_channel(&channel);
        let decryption = Arc::new(DecryptionService::new(
            Arc::clone(&upstream.segments),
            ctx.config.stream.key_cache_capacity,
        ));
        let validator = PtsValidator::new(
            namespace.enable_pts_filter,
            namespace.pts_minimum,
            namespace.pts_max_delta,
        );
        Ok(Self {
            ctx,
            service_name: channel.service_name(),
            tables: TableTracker::new(channel.atsc.clone()),
            channel,
            provider,
            namespace,
            url_filter,
            upstream,
            decryption,
            token: token.child_token(),
            state: SessionState::Allocating,
            lease: None,
            pipeline: None,
            source_url: None,
            psip: PsipBuilder::new(),
            validator,
            progress: Progress::new(ctx.config.stream.keepalive_interval()),
            stats: SessionStats::default(),
        })
    }

    fn config(&self) -> &'a StreamConfig {
        &self.ctx.config.stream
    }

    fn transition(&mut self, next: SessionState) {
        if self.state != next {
            debug!(from = %self.state, to = %next, "Session state changed");
            self.state = next;
        }
    }

    fn allocate(&mut self) -> Result<()> {
        let lease = self
            .ctx
            .tuners
            .lease(
                &self.channel.namespace,
                &self.channel.instance,
                &self.channel.display_number,
            )
            .ok_or_else(|| {
                warn!("All tuners in use");
                SessionError::NoTunerAvailable {
                    namespace: self.channel.namespace.clone(),
                }
            })?;
        debug!(slot = lease.index(), "Tuner bound to session");
        self.lease = Some(lease);
        Ok(())
    }

    fn release(&mut self) {
        self.transition(SessionState::Terminating);
        self.token.cancel();
        self.pipeline = None;
        self.lease = None;
        self.transition(SessionState::Released);
    }

    fn set_status(&self, status: TunerStatus) {
        if let Some(lease) = &self.lease {
            lease.set_status(status);
        }
    }

    async fn run<S: ClientSink>(&mut self, sink: &mut S) -> Result<SessionOutcome> {
        self.transition(SessionState::Starting);
        let end = match self.channel.stream.kind {
            StreamKind::Playlist => {
                let result = self.run_playlist(sink).await;
                self.stop_pipeline().await?;
                result?
            }
            StreamKind::Direct => self.run_direct(sink).await?,
        };
        Ok(SessionOutcome {
            end,
            stats: self.stats.clone(),
            last_pts: self.validator.state().prev_last_pts,
        })
    }

    /// Ask the provider where the channel plays right now.
    async fn resolve_source(&self) -> Option<Url> {
        let uri = tokio::select! {
            biased;
            _ = self.token.cancelled() => return None,
            uri = self.provider.stream_source_uri(&self.channel) => uri,
        }?;
        match Url::parse(&uri) {
            Ok(url) => Some(url),
            Err(e) => {
                warn!(uri = %uri, error = %e, "Provider returned an invalid source URL");
                None
            }
        }
    }

    /// Initial source, or the reason the session cannot start.
    async fn initial_source(&mut self) -> Result<ControlFlow<SessionEnd, Url>> {
        match self.resolve_source().await {
            Some(url) => {
                info!(uri = %url, "Resolved stream source");
                self.source_url = Some(url.clone());
                Ok(ControlFlow::Continue(url))
            }
            None if self.token.is_cancelled() => Ok(ControlFlow::Break(SessionEnd::Cancelled)),
            None => Err(SessionError::provider_never_started(
                &self.channel.display_number,
                "provider returned no usable source URL",
            )),
        }
    }

    fn start_pipeline(&mut self, url: Url) {
        let config = self.config();
        let queue = PlayQueue::new(
            self.namespace.key_mode,
            self.namespace.segments_to_play,
            self.url_filter.clone(),
        );
        let source = PollerSource {
            provider: Arc::clone(&self.provider),
            channel: self.channel.clone(),
            url,
            min_interval: config.min_poll_interval(),
        };
        self.pipeline = Some(PipelineHandle::spawn(
            &self.upstream,
            Arc::clone(&self.decryption),
            queue,
            source,
            config,
            &self.token,
        ));
    }

    async fn stop_pipeline(&mut self) -> Result<()> {
        let Some(pipeline) = self.pipeline.take() else {
            return Ok(());
        };
        pipeline
            .shutdown(self.config().shutdown_timeout())
            .await
            .map_err(|e| {
                error!(error = %e, "Pipeline task failed");
                SessionError::UnexpectedInternalError(format!("pipeline task failed: {e}"))
            })
    }

    async fn run_playlist<S: ClientSink>(&mut self, sink: &mut S) -> Result<SessionEnd> {
        let url = match self.initial_source().await? {
            ControlFlow::Continue(url) => url,
            ControlFlow::Break(end) => return Ok(end),
        };
        self.start_pipeline(url);

        loop {
            let deadline = self.progress.deadline(self.config());
            let event = tokio::select! {
                biased;
                _ = self.token.cancelled() => Event::Cancelled,
                outcome = next_outcome(&mut self.pipeline) => Event::Outcome(outcome),
                _ = sleep_until(self.progress.next_keepalive) => Event::Keepalive,
                _ = sleep_until(deadline) => Event::Deadline,
            };

            let flow = match event {
                Event::Cancelled => return Ok(SessionEnd::Cancelled),
                Event::Deadline => return Err(self.timed_out()),
                Event::Keepalive => self.keepalive(sink).await?,
                Event::Outcome(None) if self.progress.started => {
                    info!("Upstream playlist ended");
                    return Ok(SessionEnd::EndOfStream);
                }
                Event::Outcome(None) => {
                    return Err(SessionError::provider_never_started(
                        &self.channel.display_number,
                        "playlist ended before any segment was forwarded",
                    ));
                }
                Event::Outcome(Some(outcome)) => self.handle_outcome(outcome, sink).await?,
            };
            if let ControlFlow::Break(end) = flow {
                return Ok(end);
            }
        }
    }

    async fn handle_outcome<S: ClientSink>(
        &mut self,
        outcome: SegmentOutcome,
        sink: &mut S,
    ) -> Result<ControlFlow<SessionEnd>> {
        match outcome {
            SegmentOutcome::Data { job, data } => {
                self.learn_tables(&data).await;
                let decision = self.validator.check_segment(&data);
                trace!(uri = %job.uri, ?decision, "Segment checked");
                if let Some(forward) = decision.forwarded(&data)
                    && !forward.is_empty()
                    && let ControlFlow::Break(end) = self.forward(sink, forward).await?
                {
                    return Ok(ControlFlow::Break(end));
                }
                if decision.needs_refresh() {
                    self.refresh().await?;
                }
                Ok(ControlFlow::Continue(()))
            }
            SegmentOutcome::Filtered(job) => {
                debug!(uri = %job.uri, "Replacing filtered segment with table frame");
                self.set_status(TunerStatus::Filtered);
                self.mark_progress();
                self.write_table_frame(sink).await
            }
            SegmentOutcome::Repeated(_) => self.write_table_frame(sink).await,
            SegmentOutcome::FetchFailed(job) => {
                self.progress.fetch_failures += 1;
                debug!(uri = %job.uri, failures = self.progress.fetch_failures, "Segment skipped");
                if self.progress.fetch_failures >= self.config().refresh_after_fetch_failures {
                    self.refresh().await?;
                }
                Ok(ControlFlow::Continue(()))
            }
            SegmentOutcome::Fatal { job, error } => {
                warn!(uri = %job.uri, error = %error, "Stopping session, stream cannot be decrypted");
                Err(SessionError::decryption_failed(
                    &self.channel.display_number,
                    error.to_string(),
                ))
            }
        }
    }

    /// Restart the pipeline against a freshly resolved source. The client
    /// connection and PTS history are kept.
    async fn refresh(&mut self) -> Result<()> {
        let attempt = self.begin_refresh()?;
        info!(attempt, "Refreshing stream source");
        self.stop_pipeline().await?;
        let url = match self.resolve_source().await {
            Some(url) => {
                self.source_url = Some(url.clone());
                Some(url)
            }
            None => {
                warn!("Provider returned no source on refresh, reusing the previous one");
                self.source_url.clone()
            }
        };
        if let Some(url) = url {
            self.start_pipeline(url);
        }
        self.transition(if self.progress.started {
            SessionState::Streaming
        } else {
            SessionState::Starting
        });
        Ok(())
    }

    /// Count a refresh attempt. Fails once more than `max_source_refreshes`
    /// happened in a row without progress.
    fn begin_refresh(&mut self) -> Result<u32> {
        self.transition(SessionState::Refreshing);
        self.progress.fetch_failures = 0;
        self.progress.refreshes_without_progress += 1;
        self.stats.refreshes += 1;
        let attempts = self.progress.refreshes_without_progress;
        if attempts > self.config().max_source_refreshes {
            let reason = format!("{} source refreshes without progress", attempts - 1);
            return Err(if self.progress.started {
                SessionError::provider_stopped(&self.channel.display_number, reason)
            } else {
                SessionError::provider_never_started(&self.channel.display_number, reason)
            });
        }
        Ok(attempts)
    }

    fn timed_out(&self) -> SessionError {
        let config = self.config();
        if self.progress.started {
            SessionError::provider_stopped(
                &self.channel.display_number,
                format!("no data for {:?}", config.stream_idle_timeout()),
            )
        } else {
            SessionError::provider_never_started(
                &self.channel.display_number,
                format!("no usable segment within {:?}", config.startup_timeout()),
            )
        }
    }

    async fn learn_tables(&mut self, data: &Bytes) {
        if let Some(tables) = self.tables.observe(data) {
            info!(packets = tables.packets.len(), "Channel tables changed upstream");
            self.ctx
                .channels
                .update_channel_atsc(&self.channel, &tables)
                .await;
            self.channel.atsc = Some(tables);
        }
    }

    fn mark_progress(&mut self) {
        let now = Instant::now();
        self.progress.started = true;
        self.progress.last_progress = now;
        self.progress.next_keepalive = now + self.config().keepalive_interval();
        self.progress.fetch_failures = 0;
        self.progress.refreshes_without_progress = 0;
        self.transition(SessionState::Streaming);
    }

    /// Rewrite and write live data.
    async fn forward<S: ClientSink>(
        &mut self,
        sink: &mut S,
        data: Bytes,
    ) -> Result<ControlFlow<SessionEnd>> {
        let data = if self.namespace.update_sdt {
            atsc::rewrite_service_descriptor(&data, &self.channel.namespace, &self.service_name)
        } else {
            data
        };
        let flow = self.write(sink, &data).await?;
        if flow.is_continue() {
            self.stats.segments_forwarded += 1;
            self.stats.bytes_forwarded += data.len() as u64;
            self.set_status(TunerStatus::Streaming);
            self.mark_progress();
        }
        Ok(flow)
    }

    /// The channel's tables (cached, else synthesized) as one frame.
    fn table_frame(&mut self) -> Bytes {
        let synthesized;
        let tables: Option<&AtscTableSet> = match self.tables.current() {
            Some(tables) => Some(tables),
            None if self.config().synthesize_psip => match self.psip.build(&self.channel) {
                Ok(tables) => {
                    synthesized = tables;
                    Some(&synthesized)
                }
                Err(e) => {
                    warn!(error = %e, "Failed to synthesize channel tables");
                    None
                }
            },
            None => None,
        };
        atsc::format_tables(tables).unwrap_or_else(|e| {
            warn!(error = %e, "Cached tables do not fit a frame, sending blank frame");
            Bytes::from(BLANK_PACKET.repeat(AtscTableSet::MAX_PACKETS))
        })
    }

    async fn write_table_frame<S: ClientSink>(&mut self, sink: &mut S) -> Result<ControlFlow<SessionEnd>> {
        let frame = self.table_frame();
        let flow = self.write(sink, &frame).await?;
        if flow.is_continue() {
            self.stats.filler_frames += 1;
            self.progress.next_keepalive = Instant::now() + self.config().keepalive_interval();
        }
        Ok(flow)
    }

    /// No data for a keepalive interval: keep the client's decoder fed and
    /// flag the tuner once the silence gets long.
    async fn keepalive<S: ClientSink>(&mut self, sink: &mut S) -> Result<ControlFlow<SessionEnd>> {
        let silent_for = self.progress.last_progress.elapsed();
        if silent_for >= self.config().no_reply_threshold() {
            self.set_status(TunerStatus::NoReply);
        }
        trace!(?silent_for, "Sending keepalive frame");
        self.write_table_frame(sink).await
    }

    async fn write<S: ClientSink>(&mut self, sink: &mut S, bytes: &[u8]) -> Result<ControlFlow<SessionEnd>> {
        let timeout = self.config().client_write_timeout();
        match tokio::time::timeout(timeout, sink.write_client_bytes(bytes)).await {
            Ok(Ok(_)) => Ok(ControlFlow::Continue(())),
            Ok(Err(e)) if is_client_disconnect(&e) => {
                info!(error = %e, "Client disconnected");
                Ok(ControlFlow::Break(SessionEnd::ClientDisconnected))
            }
            Ok(Err(e)) => {
                error!(error = %e, "Writing to client failed");
                Err(SessionError::UnexpectedInternalError(format!(
                    "client write failed: {e}"
                )))
            }
            Err(_) => {
                info!(?timeout, "Client stopped reading, treating as disconnect");
                Ok(ControlFlow::Break(SessionEnd::ClientDisconnected))
            }
        }
    }
}

async fn next_outcome(pipeline: &mut Option<PipelineHandle>) -> Option<SegmentOutcome> {
    match pipeline {
        Some(pipeline) => pipeline.recv().await,
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::NoopStatusReporter;

    #[test]
    fn test_progress_deadline_switches_to_idle_timeout() {
        let config = StreamConfig::default();
        let mut progress = Progress::new(config.keepalive_interval());
        assert_eq!(
            progress.deadline(&config),
            progress.session_start + config.startup_timeout()
        );
        progress.started = true;
        assert_eq!(
            progress.deadline(&config),
            progress.last_progress + config.stream_idle_timeout()
        );
    }

    #[test]
    fn test_state_display() {
        assert_eq!(SessionState::Refreshing.to_string(), "refreshing");
        assert_eq!(SessionState::Released.to_string(), "released");
    }

    struct NoChannels;

    #[async_trait::async_trait]
    impl ChannelStore for NoChannels {
        async fn get_channel_record(
            &self,
            _uid: &str,
            _namespace: &str,
            _instance: &str,
        ) -> Option<ChannelRecord> {
            None
        }
    }

    #[test]
    fn test_context_sizes_pool_per_namespace() {
        let config = RelayConfig::from_json_str(r#"{"namespaces": {"X": {"tuner_count": 5}}}"#)
            .unwrap();
        let upstream = crate::hls::HttpUpstream::new(&config.http).unwrap();
        let ctx = RelayContext::new(
            config,
            ProviderRegistry::new(),
            Arc::new(NoChannels),
            Arc::new(upstream),
            Arc::new(NoopStatusReporter),
        );
        assert_eq!(ctx.tuners.tuner_count("X"), 5);
        assert_eq!(ctx.tuners.tuner_count("Y"), 0);

        let candidates = vec!["a".to_string(), "b".to_string()];
        ctx.tuners.allocate("X", "a", "5.1").unwrap();
        assert_eq!(ctx.select_instance("X", &candidates).as_deref(), Some("b"));
    }
}
