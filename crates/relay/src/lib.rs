//! Live stream relay for a virtual HDHomeRun tuner.
//!
//! A tune request binds a client to one of a namespace's virtual tuners and
//! turns the channel's upstream (an HLS playlist or a continuous MPEG-TS
//! body) into one uninterrupted transport stream for that client:
//!
//! - [`hls`] polls the playlist, fetches and decrypts segments
//! - [`pts`] drops or trims segments whose timestamps would confuse a decoder
//! - [`atsc`] keeps the client fed with table frames while no data flows
//! - [`session`] ties it together and owns timeouts, refreshes and cleanup
//! - [`tuner`] tracks which virtual tuners are busy
//!
//! Channel lookup, source URLs and tuner status display are provided by the
//! embedding application through the traits in [`provider`].

pub mod atsc;
pub mod channel;
pub mod config;
pub mod error;
pub mod hls;
pub mod logging;
pub mod provider;
pub mod pts;
pub mod session;
pub mod tuner;

pub use channel::{AtscTableSet, ChannelRecord, StreamKind, StreamSource};
pub use config::{
    HttpConfig, NamespaceConfig, RelayConfig, SegmentKeyMode, StreamConfig, StreamMode,
};
pub use error::{ConfigError, Result, SessionError};
pub use provider::{
    ChannelStore, ClientSink, NoopStatusReporter, ProviderRegistry, StreamProvider,
    TunerStatusReporter, WriterSink,
};
pub use session::{
    RelayContext, SessionEnd, SessionOutcome, SessionState, SessionStats, TuneRequest,
    TuneResponse,
};
pub use tuner::{TunerLease, TunerPool, TunerSlot, TunerStatus};
