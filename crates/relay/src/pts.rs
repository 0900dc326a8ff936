//! Presentation timestamp checks applied to every fetched segment before it
//! reaches the client.
//!
//! All values are 90 kHz ticks. The decision table runs in a fixed priority
//! order; see [`PtsValidator::check`].

use bytes::Bytes;
use tracing::debug;
use ts::{PtsSample, align_down, pts_delta};

/// Tolerance when looking for the point where a lagging segment catches up.
const CATCH_UP_SLACK: u64 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Entire segment is below the minimum PTS.
    PreRoll,
    /// Starts below the minimum and ends behind what was already played.
    Stale,
    /// Entirely behind the last forwarded position.
    Past,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PtsDecision {
    /// Forward the whole segment.
    Forward,
    /// Forward `data[offset..]`.
    ForwardTail { offset: usize },
    /// Forward `data[..len]`, then refresh the upstream source.
    ForwardHead { len: usize },
    /// Forward nothing and read the next segment.
    Drop(DropReason),
    /// Forward nothing and refresh the upstream source.
    Refresh,
}

impl PtsDecision {
    /// The bytes of `data` this decision lets through, if any.
    pub fn forwarded(&self, data: &Bytes) -> Option<Bytes> {
        match *self {
            PtsDecision::Forward => Some(data.clone()),
            PtsDecision::ForwardTail { offset } => Some(data.slice(offset.min(data.len())..)),
            PtsDecision::ForwardHead { len } => Some(data.slice(..len.min(data.len()))),
            PtsDecision::Drop(_) | PtsDecision::Refresh => None,
        }
    }

    pub fn needs_refresh(&self) -> bool {
        matches!(self, PtsDecision::Refresh | PtsDecision::ForwardHead { .. })
    }
}

/// Per session timestamp bookkeeping. Positions are on the unwrapped
/// timeline and may exceed 2^33 on long running streams.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PtsState {
    pub first_pts: u64,
    pub last_pts: u64,
    /// End of the last forwarded segment; 0 until something is forwarded.
    pub prev_last_pts: u64,
    pub delta_from_prev: i64,
    pub pts_size: u64,
    /// Frame duration used when a segment has a single sample.
    pub default_duration: u64,
}

#[derive(Debug, Clone)]
pub struct PtsValidator {
    enabled: bool,
    minimum: u64,
    max_delta: u64,
    state: PtsState,
}

impl PtsValidator {
    pub fn new(enabled: bool, minimum: u64, max_delta: u64) -> Self {
        Self {
            enabled,
            minimum,
            max_delta,
            state: PtsState::default(),
        }
    }

    pub fn disabled() -> Self {
        Self::new(false, 0, 0)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn state(&self) -> &PtsState {
        &self.state
    }

    /// Scan `data` for video PTS values and decide what to forward.
    pub fn check_segment(&mut self, data: &Bytes) -> PtsDecision {
        if !self.enabled {
            return PtsDecision::Forward;
        }
        let samples = ts::scan_video_pts(data);
        self.check(&samples, data.len())
    }

    /// Decide what to do with a segment of `segment_len` bytes whose video
    /// timestamps are `samples`, in stream order.
    ///
    /// Raw values are unwrapped onto a continuous timeline anchored at the
    /// last forwarded position, so a stream crossing the 33-bit rollover
    /// keeps moving forward. The minimum check uses raw values since a
    /// restarted stream begins near zero whatever came before.
    pub fn check(&mut self, samples: &[PtsSample], segment_len: usize) -> PtsDecision {
        if !self.enabled {
            return PtsDecision::Forward;
        }
        let Some(raw_first) = samples.first().map(|s| s.pts) else {
            debug!("No video PTS in segment, forwarding unchanged");
            return PtsDecision::Forward;
        };

        let prev = self.state.prev_last_pts;
        let anchor = if prev == 0 { raw_first } else { prev };
        let timeline = unwrap_samples(anchor, samples);
        let (first, last) = (timeline[0], timeline[timeline.len() - 1]);

        let duration = match timeline.as_slice() {
            [.., before, end] if end.pts > before.pts => {
                self.state.default_duration = end.pts - before.pts;
                self.state.default_duration
            }
            _ => self.state.default_duration,
        };
        let first_pts = first.pts;
        let last_pts = last.pts + duration;
        let raw_last = raw_first.saturating_add(last_pts).saturating_sub(first_pts);
        self.state.first_pts = first_pts;
        self.state.last_pts = last_pts;
        self.state.delta_from_prev = if prev == 0 {
            0
        } else {
            first_pts as i64 - prev as i64
        };
        self.state.pts_size = last_pts.abs_diff(first_pts);
        debug!(
            raw_first,
            first_pts,
            last_pts,
            pts_size = self.state.pts_size,
            delta = self.state.delta_from_prev,
            samples = samples.len(),
            "Checking segment PTS"
        );

        if raw_first < self.minimum {
            if raw_last < self.minimum {
                debug!("PTS below minimum for entire segment, dropping");
                return PtsDecision::Drop(DropReason::PreRoll);
            }
            if last_pts <= prev {
                debug!(last_pts, prev, "Pre-roll segment ends in the past, dropping");
                return PtsDecision::Drop(DropReason::Stale);
            }
            self.state.prev_last_pts = last_pts;
            let offset = samples
                .iter()
                .find(|s| s.pts >= self.minimum)
                .map(|s| align_down(s.offset));
            return match offset {
                Some(offset) if offset > 0 && offset < segment_len => {
                    debug!(offset, "Skipping pre-roll head");
                    PtsDecision::ForwardTail { offset }
                }
                _ => PtsDecision::Forward,
            };
        }

        if raw_last < self.minimum {
            debug!("Valid head with pre-roll tail, refreshing source");
            return PtsDecision::Refresh;
        }

        if self.state.delta_from_prev > self.max_delta as i64 {
            debug!(delta = self.state.delta_from_prev, "PTS jump between segments, refreshing source");
            return PtsDecision::Refresh;
        }

        if self.state.pts_size > self.max_delta {
            let jump = timeline
                .windows(2)
                .find(|pair| pair[1].pts.abs_diff(pair[0].pts) > self.max_delta);
            if let Some([good, bad]) = jump {
                let len = align_down(bad.offset);
                if len > 0 {
                    debug!(len, "PTS jump inside segment, forwarding good head");
                    self.state.prev_last_pts = good.pts;
                    return PtsDecision::ForwardHead { len };
                }
            }
            debug!("Large PTS span without an internal jump, forwarding");
            self.state.prev_last_pts = last_pts;
            return PtsDecision::Forward;
        }

        if first_pts < prev {
            if last_pts <= prev {
                debug!(last_pts, prev, "Segment entirely in the past, dropping");
                return PtsDecision::Drop(DropReason::Past);
            }
            let catch_up = timeline
                .iter()
                .find(|s| s.pts + CATCH_UP_SLACK >= prev)
                .map(|s| align_down(s.offset));
            return match catch_up {
                Some(0) => {
                    self.state.prev_last_pts = last_pts;
                    PtsDecision::Forward
                }
                Some(offset) if offset < segment_len => {
                    debug!(offset, "Segment partly in the past, forwarding tail");
                    self.state.prev_last_pts = last_pts;
                    PtsDecision::ForwardTail { offset }
                }
                _ => PtsDecision::Drop(DropReason::Past),
            };
        }

        self.state.prev_last_pts = last_pts;
        PtsDecision::Forward
    }
}

/// Place each raw sample on the timeline: the first relative to `anchor`,
/// each later one relative to the sample before it. Positions that would
/// fall before zero clamp to zero.
fn unwrap_samples(anchor: u64, samples: &[PtsSample]) -> Vec<PtsSample> {
    let mut reference = anchor;
    samples
        .iter()
        .map(|sample| {
            let pts = reference.saturating_add_signed(pts_delta(reference, sample.pts));
            reference = pts;
            PtsSample { pts, offset: sample.offset }
        })
        .collect()
}
