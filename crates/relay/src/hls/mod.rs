// Playlist polling, segment fetching and decryption for one session.

pub mod decryption;
pub mod error;
pub mod fetcher;
pub mod pipeline;
pub mod playlist;

pub use decryption::{DEFAULT_IV, DecryptionService};
pub use error::HlsError;
pub use fetcher::{
    ByteStream, ChannelUpstream, HttpSegmentFetcher, HttpUpstream, SegmentDownloader, Upstream,
    header_map,
};
pub use pipeline::{PipelineHandle, SegmentOutcome, SegmentWorker};
pub use playlist::{
    HttpPlaylistLoader, PlayQueue, PlaylistLoader, PlaylistPoller, PollerSource,
    SegmentEncryption, SegmentJob, SegmentKey,
};
