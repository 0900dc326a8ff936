//! Transport Stream (TS) primitives for MPEG-2 Transport Stream data
//!
//! This crate provides packet parsing, CRC-32/MPEG, PES timestamp parsing,
//! PAT/PMT decoding and building, SDT service descriptor rewriting and ATSC
//! PSIP (TVCT/STT) section builders. Everything here is synchronous and
//! allocation-light; I/O lives in the callers.

pub mod crc32;
pub mod error;
pub mod packet;
pub mod pat;
pub mod pes;
pub mod pmt;
pub mod psip;
pub mod scan;
pub mod sdt;

pub use crc32::{append_section_crc32, mpeg2_crc32, mpeg2_crc32_bitwise, validate_section_crc32};
pub use error::TsError;
pub use packet::{
    ContinuityCounters, PID_NULL, PID_PAT, PID_PSIP, PID_SDT, SYNC_BYTE, TS_PACKET_SIZE, TsPacket,
    align_down, aligned_packets, packet_pid,
};
pub use pat::{Pat, PatProgram};
pub use pes::{PTS_CLOCK_HZ, PTS_WRAP, PesHeader, pts_delta};
pub use pmt::{Pmt, PmtStream, StreamType};
pub use psip::VirtualChannel;
pub use scan::{PtsSample, scan_video_pts};

/// Result type for TS parsing operations
pub type Result<T> = std::result::Result<T, TsError>;
