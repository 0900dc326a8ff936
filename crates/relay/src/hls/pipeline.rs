// One generation of the per-session pipeline: the poller task feeding jobs
// to the fetch/decrypt task, which hands finished segments to the session.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::StreamConfig;
use crate::hls::HlsError;
use crate::hls::decryption::DecryptionService;
use crate::hls::fetcher::{ChannelUpstream, SegmentDownloader};
use crate::hls::playlist::{PlayQueue, PlaylistPoller, PollerSource, SegmentJob, SegmentKey};

/// What happened to one job.
#[derive(Debug)]
pub enum SegmentOutcome {
    Data { job: SegmentJob, data: Bytes },
    /// Matched the URL filter; not fetched.
    Filtered(SegmentJob),
    /// Same URI as the previous job; not fetched again.
    Repeated(SegmentJob),
    /// Fetch or key fetch failed; the segment is skipped.
    FetchFailed(SegmentJob),
    /// Decryption is impossible; nothing further may be forwarded.
    Fatal { job: SegmentJob, error: HlsError },
}

impl SegmentOutcome {
    pub fn job(&self) -> &SegmentJob {
        match self {
            SegmentOutcome::Data { job, .. }
            | SegmentOutcome::Filtered(job)
            | SegmentOutcome::Repeated(job)
            | SegmentOutcome::FetchFailed(job)
            | SegmentOutcome::Fatal { job, .. } => job,
        }
    }
}

/// Fetch/decrypt stage.
pub struct SegmentWorker {
    segments: Arc<dyn SegmentDownloader>,
    decryption: Arc<DecryptionService>,
}

impl SegmentWorker {
    pub fn new(segments: Arc<dyn SegmentDownloader>, decryption: Arc<DecryptionService>) -> Self {
        Self {
            segments,
            decryption,
        }
    }

    /// Process jobs in order until the job channel closes, the session
    /// stops reading, or a fatal outcome was delivered.
    pub async fn run(
        self,
        mut jobs: mpsc::Receiver<SegmentJob>,
        outcomes: mpsc::Sender<SegmentOutcome>,
        played: mpsc::UnboundedSender<(SegmentKey, String)>,
        token: CancellationToken,
    ) {
        let mut last_uri: Option<String> = None;
        loop {
            let job = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                job = jobs.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
            };

            let outcome = if job.filtered {
                SegmentOutcome::Filtered(job)
            } else if last_uri.as_deref() == Some(job.uri.as_str()) {
                warn!(uri = %job.uri, "Same segment sent twice by provider, skipping");
                SegmentOutcome::Repeated(job)
            } else {
                last_uri = Some(job.uri.clone());
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    outcome = self.process(job) => outcome,
                }
            };

            let fatal = matches!(outcome, SegmentOutcome::Fatal { .. });
            let done = (outcome.job().key.clone(), outcome.job().uri.clone());
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                sent = outcomes.send(outcome) => {
                    if sent.is_err() {
                        debug!("Session stopped reading, fetch task done");
                        break;
                    }
                }
            }
            // the poller may already be gone
            let _ = played.send(done);
            if fatal {
                break;
            }
        }
    }

    async fn process(&self, job: SegmentJob) -> SegmentOutcome {
        let Some(data) = self.segments.fetch(&job.uri).await else {
            return SegmentOutcome::FetchFailed(job);
        };
        let Some(encryption) = &job.encryption else {
            return SegmentOutcome::Data { job, data };
        };
        match self.decryption.decrypt(data, encryption).await {
            Ok(data) => SegmentOutcome::Data { job, data },
            Err(error) if error.is_fatal() => {
                warn!(uri = %job.uri, error = %error, "Segment cannot be decrypted");
                SegmentOutcome::Fatal { job, error }
            }
            Err(error) => {
                info!(uri = %job.uri, error = %error, "Key fetch failed, skipping segment");
                SegmentOutcome::FetchFailed(job)
            }
        }
    }
}

/// Running poller and fetch tasks plus the receiving end of their output.
pub struct PipelineHandle {
    outcomes: mpsc::Receiver<SegmentOutcome>,
    token: CancellationToken,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl PipelineHandle {
    /// Spawn both tasks under a child of `parent`.
    pub fn spawn(
        upstream: &ChannelUpstream,
        decryption: Arc<DecryptionService>,
        queue: PlayQueue,
        source: PollerSource,
        config: &StreamConfig,
        parent: &CancellationToken,
    ) -> Self {
        let token = parent.child_token();
        let (job_tx, job_rx) = mpsc::channel(config.job_queue_capacity);
        let (out_tx, out_rx) = mpsc::channel(config.output_queue_capacity);
        let (played_tx, played_rx) = mpsc::unbounded_channel();

        debug!(uri = %source.url, "Starting pipeline");
        let poller = PlaylistPoller::new(Arc::clone(&upstream.playlists), queue);
        let poller_task = tokio::spawn(poller.run(source, job_tx, played_rx, token.clone()));

        let worker = SegmentWorker::new(Arc::clone(&upstream.segments), decryption);
        let worker_task = tokio::spawn(worker.run(job_rx, out_tx, played_tx, token.clone()));

        Self {
            outcomes: out_rx,
            token,
            tasks: vec![("poller", poller_task), ("fetcher", worker_task)],
        }
    }

    /// Next outcome; `None` once both tasks have finished.
    pub async fn recv(&mut self) -> Option<SegmentOutcome> {
        self.outcomes.recv().await
    }

    /// Cancel both tasks and wait up to `timeout` for them, aborting
    /// stragglers. A panicked task is reported as its join error.
    pub async fn shutdown(mut self, timeout: Duration) -> Result<(), JoinError> {
        self.token.cancel();
        self.outcomes.close();

        let mut first_error = None;
        for (name, mut task) in self.tasks.drain(..) {
            match tokio::time::timeout(timeout, &mut task).await {
                Ok(Ok(())) => trace!(task = name, "Pipeline task joined"),
                Ok(Err(e)) if e.is_cancelled() => {}
                Ok(Err(e)) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
                Err(_) => {
                    warn!(task = name, "Pipeline task did not stop in time, aborting");
                    task.abort();
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for PipelineHandle {
    fn drop(&mut self) {
        self.token.cancel();
        for (_, task) in &self.tasks {
            task.abort();
        }
    }
}
