use crate::crc32::append_section_crc32;
use crate::pat::section_bytes;
use crate::{Result, TsError};

pub const TABLE_ID_PMT: u8 = 0x02;

/// Elementary stream types this crate cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamType {
    Mpeg2Video,
    H264,
    H265,
    AdtsAac,
    Ac3,
    Other(u8),
}

impl From<u8> for StreamType {
    fn from(value: u8) -> Self {
        match value {
            0x02 => StreamType::Mpeg2Video,
            0x1B => StreamType::H264,
            0x24 => StreamType::H265,
            0x0F => StreamType::AdtsAac,
            0x81 => StreamType::Ac3,
            other => StreamType::Other(other),
        }
    }
}

impl From<StreamType> for u8 {
    fn from(value: StreamType) -> Self {
        match value {
            StreamType::Mpeg2Video => 0x02,
            StreamType::H264 => 0x1B,
            StreamType::H265 => 0x24,
            StreamType::AdtsAac => 0x0F,
            StreamType::Ac3 => 0x81,
            StreamType::Other(other) => other,
        }
    }
}

impl StreamType {
    pub fn is_video(self) -> bool {
        matches!(
            self,
            StreamType::Mpeg2Video | StreamType::H264 | StreamType::H265
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PmtStream {
    pub stream_type: StreamType,
    pub elementary_pid: u16,
}

/// Program Map Table (descriptors are skipped)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pmt {
    pub program_number: u16,
    pub version_number: u8,
    pub pcr_pid: u16,
    pub streams: Vec<PmtStream>,
}

impl Pmt {
    /// Parse a PMT from PSI section data (pointer field already removed).
    pub fn parse(data: &[u8]) -> Result<Self> {
        let section = section_bytes(data, TABLE_ID_PMT, 13)?;

        let program_number = u16::from_be_bytes([section[3], section[4]]);
        let version_number = (section[5] >> 1) & 0x1F;
        let pcr_pid = ((section[8] as u16 & 0x1F) << 8) | section[9] as u16;
        let program_info_length = (((section[10] as usize) & 0x0F) << 8) | section[11] as usize;

        let streams_end = section.len() - 4;
        let mut pos = 12 + program_info_length;
        if pos > streams_end {
            return Err(TsError::InvalidSectionLength(section.len() as u16 - 3));
        }

        let mut streams = Vec::new();
        while pos + 5 <= streams_end {
            let stream_type = StreamType::from(section[pos]);
            let elementary_pid = ((section[pos + 1] as u16 & 0x1F) << 8) | section[pos + 2] as u16;
            let es_info_length =
                (((section[pos + 3] as usize) & 0x0F) << 8) | section[pos + 4] as usize;
            pos += 5 + es_info_length;
            if pos > streams_end {
                return Err(TsError::InsufficientData {
                    expected: pos,
                    actual: streams_end,
                });
            }
            streams.push(PmtStream {
                stream_type,
                elementary_pid,
            });
        }

        Ok(Pmt {
            program_number,
            version_number,
            pcr_pid,
            streams,
        })
    }

    /// PID of the first video elementary stream.
    pub fn video_pid(&self) -> Option<u16> {
        self.streams
            .iter()
            .find(|s| s.stream_type.is_video())
            .map(|s| s.elementary_pid)
    }

    /// Serialize to a section with CRC. Descriptor loops are written empty.
    pub fn to_section(&self) -> Vec<u8> {
        let section_length = 13 + self.streams.len() * 5;
        let mut section = Vec::with_capacity(3 + section_length);
        section.push(TABLE_ID_PMT);
        section.push(0xB0 | ((section_length >> 8) as u8 & 0x0F));
        section.push((section_length & 0xFF) as u8);
        section.extend_from_slice(&self.program_number.to_be_bytes());
        section.push(0xC1 | ((self.version_number & 0x1F) << 1));
        section.push(0x00);
        section.push(0x00);
        section.push(0xE0 | ((self.pcr_pid >> 8) as u8 & 0x1F));
        section.push((self.pcr_pid & 0xFF) as u8);
        section.extend_from_slice(&[0xF0, 0x00]);
        for stream in &self.streams {
            section.push(stream.stream_type.into());
            section.push(0xE0 | ((stream.elementary_pid >> 8) as u8 & 0x1F));
            section.push((stream.elementary_pid & 0xFF) as u8);
            section.extend_from_slice(&[0xF0, 0x00]);
        }
        append_section_crc32(&mut section);
        section
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_built_pmt() {
        let pmt = Pmt {
            program_number: 1,
            version_number: 0,
            pcr_pid: 0x31,
            streams: vec![
                PmtStream {
                    stream_type: StreamType::Ac3,
                    elementary_pid: 0x34,
                },
                PmtStream {
                    stream_type: StreamType::H264,
                    elementary_pid: 0x31,
                },
            ],
        };
        let parsed = Pmt::parse(&pmt.to_section()).unwrap();
        assert_eq!(parsed, pmt);
        assert_eq!(parsed.video_pid(), Some(0x31));
    }

    #[test]
    fn test_es_info_is_skipped() {
        // one H.264 stream with a 3-byte descriptor, CRC appended below
        let mut section = vec![
            0x02, 0xB0, 0x00, 0x00, 0x01, 0xC1, 0x00, 0x00, 0xE1, 0x00, 0xF0, 0x00, 0x1B, 0xE1,
            0x00, 0xF0, 0x03, 0x0A, 0x01, 0x00,
        ];
        section[2] = (section.len() - 3 + 4) as u8;
        append_section_crc32(&mut section);
        let pmt = Pmt::parse(&section).unwrap();
        assert_eq!(pmt.video_pid(), Some(0x100));
        assert_eq!(pmt.pcr_pid, 0x100);
    }
}
