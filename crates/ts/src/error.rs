use thiserror::Error;

/// Errors produced while parsing or building transport stream structures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TsError {
    #[error("invalid packet size: {0} (expected 188)")]
    InvalidPacketSize(usize),

    #[error("invalid sync byte: 0x{0:02X}")]
    InvalidSyncByte(u8),

    #[error("insufficient data: expected {expected} bytes, got {actual}")]
    InsufficientData { expected: usize, actual: usize },

    #[error("invalid table id: expected 0x{expected:02X}, got 0x{actual:02X}")]
    InvalidTableId { expected: u8, actual: u8 },

    #[error("invalid section length: {0}")]
    InvalidSectionLength(u16),

    #[error("CRC-32 mismatch: stored 0x{expected:08X}, calculated 0x{calculated:08X}")]
    Crc32Mismatch { expected: u32, calculated: u32 },

    #[error("invalid PES start code")]
    InvalidPesStartCode,

    #[error("invalid PTS/DTS flags: {0:#04b}")]
    InvalidPtsDtsFlags(u8),

    #[error("section does not fit in a single packet: {0} bytes")]
    SectionTooLarge(usize),

    #[error("string too long for descriptor: {0} bytes")]
    StringTooLong(usize),

    #[error("parse error: {0}")]
    ParseError(String),
}
