// Playlist poller: keeps the queue of not-yet-fetched segments in step with
// the provider's live manifest.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use m3u8_rs::{
    KeyMethod, MediaPlaylist, MediaPlaylistType, MediaSegment, Playlist, parse_playlist_res,
};
use regex::Regex;
use reqwest::Client;
use reqwest::header::HeaderMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::channel::ChannelRecord;
use crate::config::SegmentKeyMode;
use crate::hls::HlsError;
use crate::provider::StreamProvider;

/// Identity of a playlist entry: absolute URI plus program date time in
/// milliseconds (0 when absent or when keys are URI only).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SegmentKey {
    pub uri: String,
    pub program_date_time: i64,
}

/// Encryption declared for a segment by the nearest preceding `EXT-X-KEY`.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentEncryption {
    pub method: KeyMethod,
    /// Absolute key URI.
    pub key_uri: Option<String>,
    pub iv: Option<String>,
}

/// One unit of work for the fetch task.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentJob {
    pub key: SegmentKey,
    pub uri: String,
    pub duration: f32,
    pub encryption: Option<SegmentEncryption>,
    /// Matched the namespace URL filter; never fetched.
    pub filtered: bool,
}

#[derive(Debug)]
struct QueueEntry {
    job: SegmentJob,
    played: bool,
    dispatched: bool,
}

/// Segments known from the manifest, in manifest order.
#[derive(Debug)]
pub struct PlayQueue {
    entries: VecDeque<QueueEntry>,
    keys: HashSet<SegmentKey>,
    key_mode: SegmentKeyMode,
    segments_to_play: usize,
    url_filter: Option<Regex>,
    cold: bool,
    ended: bool,
    last_duration: Option<f32>,
}

impl PlayQueue {
    pub fn new(key_mode: SegmentKeyMode, segments_to_play: usize, url_filter: Option<Regex>) -> Self {
        Self {
            entries: VecDeque::new(),
            keys: HashSet::new(),
            key_mode,
            segments_to_play,
            url_filter,
            cold: true,
            ended: false,
            last_duration: None,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys in queue order.
    pub fn keys(&self) -> impl Iterator<Item = &SegmentKey> {
        self.entries.iter().map(|e| &e.job.key)
    }

    pub fn is_played(&self, key: &SegmentKey) -> bool {
        self.entries.iter().any(|e| &e.job.key == key && e.played)
    }

    /// The manifest carried `EXT-X-ENDLIST` and every entry was handed out.
    pub fn is_finished(&self) -> bool {
        self.ended && self.entries.iter().all(|e| e.dispatched)
    }

    /// Wait before the next reload: the last segment duration, floored.
    pub fn poll_interval(&self, minimum: Duration) -> Duration {
        self.last_duration
            .filter(|d| d.is_finite() && *d > 0.0)
            .map(|d| Duration::from_secs_f32(d).max(minimum))
            .unwrap_or(minimum)
    }

    /// Merge a freshly loaded manifest. Returns `(added, removed)`.
    pub fn apply(&mut self, playlist: &MediaPlaylist, base: &Url) -> (usize, usize) {
        let manifest = self.manifest_jobs(playlist, base);
        let present: HashSet<&SegmentKey> = manifest.iter().map(|(job, _)| &job.key).collect();

        let before = self.entries.len();
        self.entries.retain(|entry| {
            let keep = !entry.played || present.contains(&entry.job.key);
            if !keep {
                trace!(uri = %entry.job.uri, "Removed from play queue");
                self.keys.remove(&entry.job.key);
            }
            keep
        });
        let removed = before - self.entries.len();

        let live = !playlist.end_list && playlist.playlist_type != Some(MediaPlaylistType::Vod);
        let skip_before = if self.cold && live {
            manifest.len().saturating_sub(self.segments_to_play)
        } else {
            0
        };

        let mut added = 0;
        for (position, (job, discontinuity)) in manifest.into_iter().enumerate() {
            if self.keys.contains(&job.key) {
                continue;
            }
            if discontinuity
                && let Some(entry) = self.entries.iter_mut().find(|e| e.job.uri == job.uri)
            {
                debug!(uri = %job.uri, "Discontinuity renamed queued segment");
                self.keys.remove(&entry.job.key);
                self.keys.insert(job.key.clone());
                entry.job.key = job.key;
                continue;
            }
            let played = position < skip_before;
            if job.filtered {
                debug!(uri = %job.uri, "Segment matches url filter");
            }
            self.keys.insert(job.key.clone());
            self.entries.push_back(QueueEntry {
                job,
                played,
                dispatched: played,
            });
            added += 1;
        }

        self.cold = false;
        self.ended = !live;
        if let Some(last) = playlist.segments.last() {
            self.last_duration = Some(last.duration);
        }
        (added, removed)
    }

    /// Next entry not yet handed to the fetch task, in queue order.
    pub fn next_pending(&mut self) -> Option<SegmentJob> {
        let entry = self.entries.iter_mut().find(|e| !e.dispatched)?;
        entry.dispatched = true;
        Some(entry.job.clone())
    }

    /// Record that the fetch task is done with a job. A job renamed by a
    /// discontinuity is still found by its URI.
    pub fn mark_played(&mut self, key: &SegmentKey, uri: &str) {
        let entry = match self.entries.iter().position(|e| &e.job.key == key) {
            Some(index) => self.entries.get_mut(index),
            None => self.entries.iter_mut().find(|e| e.job.uri == uri),
        };
        if let Some(entry) = entry {
            entry.played = true;
            entry.dispatched = true;
        }
    }

    fn manifest_jobs(&self, playlist: &MediaPlaylist, base: &Url) -> Vec<(SegmentJob, bool)> {
        let mut current_key: Option<SegmentEncryption> = None;
        let mut jobs = Vec::with_capacity(playlist.segments.len());
        for segment in &playlist.segments {
            if let Some(key) = &segment.key {
                current_key = match key.method {
                    KeyMethod::None => None,
                    _ => Some(SegmentEncryption {
                        method: key.method.clone(),
                        key_uri: key.uri.as_deref().map(|uri| resolve(base, uri)),
                        iv: key.iv.clone(),
                    }),
                };
            } else if clears_key(segment) {
                current_key = None;
            }
            let uri = resolve(base, &segment.uri);
            let program_date_time = match self.key_mode {
                SegmentKeyMode::UriAndProgramDateTime => segment
                    .program_date_time
                    .map(|t| t.timestamp_millis())
                    .unwrap_or(0),
                SegmentKeyMode::UriOnly => 0,
            };
            let filtered = self
                .url_filter
                .as_ref()
                .is_some_and(|filter| filter.is_match(&uri));
            jobs.push((
                SegmentJob {
                    key: SegmentKey {
                        uri: uri.clone(),
                        program_date_time,
                    },
                    uri,
                    duration: segment.duration,
                    encryption: current_key.clone(),
                    filtered,
                },
                segment.discontinuity,
            ));
        }
        jobs
    }
}

/// m3u8-rs rejects `EXT-X-KEY:METHOD=NONE` without an IV and keeps it as an
/// unknown tag, so the parsed segment carries no key at all.
fn clears_key(segment: &MediaSegment) -> bool {
    segment.unknown_tags.iter().any(|tag| {
        tag.tag == "X-KEY"
            && tag.rest.as_deref().is_some_and(|attrs| {
                attrs
                    .split(',')
                    .any(|attr| attr.trim().eq_ignore_ascii_case("METHOD=NONE"))
            })
    })
}

fn resolve(base: &Url, uri: &str) -> String {
    base.join(uri)
        .map(String::from)
        .unwrap_or_else(|_| uri.to_string())
}

#[async_trait]
pub trait PlaylistLoader: Send + Sync {
    /// Fetch and parse the media playlist at `url`. Returns it together with
    /// the URL its relative URIs resolve against.
    async fn load(&self, url: &Url) -> Result<(MediaPlaylist, Url), HlsError>;
}

pub struct HttpPlaylistLoader {
    client: Client,
    headers: HeaderMap,
    timeout: Duration,
}

impl HttpPlaylistLoader {
    pub fn new(client: Client, headers: HeaderMap, timeout: Duration) -> Self {
        Self {
            client,
            headers,
            timeout,
        }
    }

    async fn fetch_playlist(&self, url: &Url) -> Result<Playlist, HlsError> {
        let response = self
            .client
            .get(url.clone())
            .headers(self.headers.clone())
            .timeout(self.timeout)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(HlsError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        let body = response.bytes().await?;
        parse_playlist_res(&body)
            .map_err(|e| HlsError::Playlist(format!("Failed to parse playlist {url}: {e}")))
    }
}

#[async_trait]
impl PlaylistLoader for HttpPlaylistLoader {
    async fn load(&self, url: &Url) -> Result<(MediaPlaylist, Url), HlsError> {
        match self.fetch_playlist(url).await? {
            Playlist::MediaPlaylist(playlist) => Ok((playlist, url.clone())),
            Playlist::MasterPlaylist(master) => {
                let variant = master
                    .variants
                    .iter()
                    .filter(|v| !v.is_i_frame)
                    .max_by_key(|v| v.bandwidth)
                    .ok_or_else(|| HlsError::Playlist(format!("Master playlist {url} has no variants")))?;
                let media_url = url.join(&variant.uri).map_err(|e| {
                    HlsError::Playlist(format!("Invalid variant URI {}: {e}", variant.uri))
                })?;
                debug!(bandwidth = variant.bandwidth, url = %media_url, "Selected variant");
                match self.fetch_playlist(&media_url).await? {
                    Playlist::MediaPlaylist(playlist) => Ok((playlist, media_url)),
                    Playlist::MasterPlaylist(_) => Err(HlsError::Playlist(format!(
                        "Variant {media_url} is another master playlist"
                    ))),
                }
            }
        }
    }
}

/// Where the poller gets (and re-gets) its playlist URL.
#[derive(Clone)]
pub struct PollerSource {
    pub provider: Arc<dyn StreamProvider>,
    pub channel: ChannelRecord,
    pub url: Url,
    pub min_interval: Duration,
}

pub struct PlaylistPoller {
    loader: Arc<dyn PlaylistLoader>,
    queue: PlayQueue,
}

impl PlaylistPoller {
    pub fn new(loader: Arc<dyn PlaylistLoader>, queue: PlayQueue) -> Self {
        Self { loader, queue }
    }

    pub fn queue(&self) -> &PlayQueue {
        &self.queue
    }

    /// Load the manifest and merge it. Failures are logged and count as an
    /// unchanged manifest.
    pub async fn reload(&mut self, playlist_uri: &Url) -> (usize, usize) {
        match self.loader.load(playlist_uri).await {
            Ok((playlist, base)) => {
                let (added, removed) = self.queue.apply(&playlist, &base);
                trace!(added, removed, queued = self.queue.len(), "Playlist reloaded");
                (added, removed)
            }
            Err(e) => {
                warn!(uri = %playlist_uri, error = %e, "Playlist reload failed");
                (0, 0)
            }
        }
    }

    /// Reload, dispatch new jobs and sleep until cancelled or the playlist
    /// ends. `played` carries `(key, uri)` of every job the fetch task has
    /// finished with.
    pub async fn run(
        mut self,
        mut source: PollerSource,
        jobs: mpsc::Sender<SegmentJob>,
        mut played: mpsc::UnboundedReceiver<(SegmentKey, String)>,
        token: CancellationToken,
    ) {
        let mut last_refresh = Instant::now();
        loop {
            while let Ok((key, uri)) = played.try_recv() {
                self.queue.mark_played(&key, &uri);
            }

            if source
                .provider
                .is_refresh_due(last_refresh, &source.channel.instance)
            {
                let fresh = tokio::select! {
                    biased;
                    _ = token.cancelled() => return,
                    uri = source.provider.stream_source_uri(&source.channel) => uri,
                };
                match fresh.as_deref().map(Url::parse) {
                    Some(Ok(url)) => {
                        info!(uri = %url, "Refreshed playlist source");
                        source.url = url;
                    }
                    Some(Err(e)) => warn!(error = %e, "Provider returned an invalid source URL"),
                    None => warn!("Provider returned no source URL on refresh"),
                }
                last_refresh = Instant::now();
            }

            tokio::select! {
                biased;
                _ = token.cancelled() => return,
                _ = self.reload(&source.url) => {}
            }

            while let Some(job) = self.queue.next_pending() {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => return,
                    sent = jobs.send(job) => {
                        if sent.is_err() {
                            debug!("Fetch task gone, stopping poller");
                            return;
                        }
                    }
                }
            }

            if self.queue.is_finished() {
                debug!("Playlist ended, poller done");
                return;
            }

            let interval = self.queue.poll_interval(source.min_interval);
            tokio::select! {
                biased;
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }
}
