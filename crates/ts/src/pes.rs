use crate::{Result, TsError};

/// Video stream ID range (0xE0..=0xEF)
pub const STREAM_ID_VIDEO_MIN: u8 = 0xE0;
/// Video stream ID range (0xE0..=0xEF)
pub const STREAM_ID_VIDEO_MAX: u8 = 0xEF;

/// PTS/DTS clock rate.
pub const PTS_CLOCK_HZ: u64 = 90_000;

/// PTS values are 33 bits wide and wrap to zero after this many ticks.
pub const PTS_WRAP: u64 = 1 << 33;

/// Signed distance from `from` to `to` on the 33-bit timestamp circle, in
/// `(-2^32, 2^32]`. Only the low 33 bits of either argument are used.
pub fn pts_delta(from: u64, to: u64) -> i64 {
    let forward = to.wrapping_sub(from) & (PTS_WRAP - 1);
    if forward > PTS_WRAP / 2 {
        forward as i64 - PTS_WRAP as i64
    } else {
        forward as i64
    }
}

/// Parse a 33-bit PTS or DTS timestamp from 5 bytes.
///
/// Layout: `[marker(4) | ts32..30 | 1 | ts29..15 | 1 | ts14..0 | 1]`
pub fn parse_timestamp(data: &[u8]) -> Option<u64> {
    if data.len() < 5 {
        return None;
    }
    let ts = (((data[0] as u64 >> 1) & 0x07) << 30)
        | ((data[1] as u64) << 22)
        | (((data[2] as u64 >> 1) & 0x7F) << 15)
        | ((data[3] as u64) << 7)
        | ((data[4] as u64 >> 1) & 0x7F);
    Some(ts)
}

/// Encode a 33-bit timestamp with the given 4-bit prefix (0b0010 for a lone
/// PTS, 0b0011 / 0b0001 for a PTS/DTS pair).
pub fn encode_timestamp(prefix: u8, ts: u64) -> [u8; 5] {
    let ts = ts & 0x1_FFFF_FFFF;
    [
        (prefix << 4) | (((ts >> 30) as u8 & 0x07) << 1) | 0x01,
        (ts >> 22) as u8,
        (((ts >> 15) as u8 & 0x7F) << 1) | 0x01,
        (ts >> 7) as u8,
        ((ts as u8 & 0x7F) << 1) | 0x01,
    ]
}

/// Check if a stream_id has an optional PES header (PTS/DTS fields).
fn has_optional_pes_header(stream_id: u8) -> bool {
    // ISO 13818-1 Table 2-18
    !matches!(
        stream_id,
        0xBC | 0xBE | 0xBF | 0xF0 | 0xF1 | 0xFF | 0xF2 | 0xF8
    )
}

/// PES header fields needed for timing.
#[derive(Debug, Clone)]
pub struct PesHeader {
    pub stream_id: u8,
    pub pts: Option<u64>,
    pub dts: Option<u64>,
}

impl PesHeader {
    /// Parse PES header from a byte slice starting with the PES start code (0x000001).
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 6 {
            return Err(TsError::InsufficientData {
                expected: 6,
                actual: data.len(),
            });
        }
        if data[..3] != [0x00, 0x00, 0x01] {
            return Err(TsError::InvalidPesStartCode);
        }

        let stream_id = data[3];
        if !has_optional_pes_header(stream_id) {
            return Ok(PesHeader {
                stream_id,
                pts: None,
                dts: None,
            });
        }

        if data.len() < 9 {
            return Err(TsError::InsufficientData {
                expected: 9,
                actual: data.len(),
            });
        }

        let pts_dts_flags = (data[7] >> 6) & 0x03;
        let needed = match pts_dts_flags {
            0b00 => 9,
            0b10 => 14,
            0b11 => 19,
            _ => return Err(TsError::InvalidPtsDtsFlags(pts_dts_flags)),
        };
        if data.len() < needed {
            return Err(TsError::InsufficientData {
                expected: needed,
                actual: data.len(),
            });
        }

        let pts = (pts_dts_flags & 0b10 != 0)
            .then(|| parse_timestamp(&data[9..14]))
            .flatten();
        let dts = (pts_dts_flags == 0b11)
            .then(|| parse_timestamp(&data[14..19]))
            .flatten();

        Ok(PesHeader {
            stream_id,
            pts,
            dts,
        })
    }

    /// Check if this is a video stream.
    pub fn is_video(&self) -> bool {
        (STREAM_ID_VIDEO_MIN..=STREAM_ID_VIDEO_MAX).contains(&self.stream_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pts_delta_across_wrap() {
        assert_eq!(pts_delta(10, 25), 15);
        assert_eq!(pts_delta(25, 10), -15);
        assert_eq!(pts_delta(PTS_WRAP - 100, 50), 150);
        assert_eq!(pts_delta(50, PTS_WRAP - 100), -150);
        assert_eq!(pts_delta(0, PTS_WRAP / 2), (PTS_WRAP / 2) as i64);
        assert_eq!(pts_delta(0, PTS_WRAP / 2 + 1), -((PTS_WRAP / 2 - 1) as i64));
        // an unwrapped reference past 2^33 still measures against the raw value
        assert_eq!(pts_delta(PTS_WRAP + 500, 600), 100);
    }

    fn pes_with_pts(stream_id: u8, pts: u64) -> Vec<u8> {
        let mut pes = vec![0x00, 0x00, 0x01, stream_id, 0x00, 0x00, 0x80, 0x80, 0x05];
        pes.extend_from_slice(&encode_timestamp(0b0010, pts));
        pes
    }

    #[test]
    fn test_timestamp_encoding_is_reversible_at_33_bits() {
        for ts in [0u64, 1, 90_000, 0x1_0000_0000, 0x1_FFFF_FFFF] {
            assert_eq!(parse_timestamp(&encode_timestamp(0b0010, ts)), Some(ts));
        }
    }

    #[test]
    fn test_parse_video_pts() {
        let header = PesHeader::parse(&pes_with_pts(0xE0, 180_000)).unwrap();
        assert!(header.is_video());
        assert_eq!(header.pts, Some(180_000));
        assert_eq!(header.dts, None);
    }

    #[test]
    fn test_parse_pts_and_dts() {
        let mut pes = vec![0x00, 0x00, 0x01, 0xE1, 0x00, 0x00, 0x80, 0xC0, 0x0A];
        pes.extend_from_slice(&encode_timestamp(0b0011, 93_003));
        pes.extend_from_slice(&encode_timestamp(0b0001, 90_000));
        let header = PesHeader::parse(&pes).unwrap();
        assert_eq!(header.pts, Some(93_003));
        assert_eq!(header.dts, Some(90_000));
    }

    #[test]
    fn test_padding_stream_has_no_timing() {
        let header = PesHeader::parse(&[0x00, 0x00, 0x01, 0xBE, 0x00, 0x10]).unwrap();
        assert!(header.pts.is_none());
        assert!(!header.is_video());
    }

    #[test]
    fn test_bad_start_code_and_flags() {
        assert_eq!(
            PesHeader::parse(&[0x00, 0x00, 0x02, 0xE0, 0, 0]).unwrap_err(),
            TsError::InvalidPesStartCode
        );
        let pes = [0x00, 0x00, 0x01, 0xE0, 0x00, 0x00, 0x80, 0x40, 0x00];
        assert_eq!(
            PesHeader::parse(&pes).unwrap_err(),
            TsError::InvalidPtsDtsFlags(0b01)
        );
    }
}
