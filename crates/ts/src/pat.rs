use crate::crc32::{append_section_crc32, validate_section_crc32};
use crate::{Result, TsError};

pub const TABLE_ID_PAT: u8 = 0x00;

/// Program Association Table entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatProgram {
    pub program_number: u16,
    pub pmt_pid: u16,
}

/// Program Association Table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pat {
    pub transport_stream_id: u16,
    pub version_number: u8,
    pub programs: Vec<PatProgram>,
}

impl Pat {
    /// Parse a PAT from PSI section data (pointer field already removed).
    /// The CRC is verified.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let section = section_bytes(data, TABLE_ID_PAT, 9)?;

        let transport_stream_id = u16::from_be_bytes([section[3], section[4]]);
        let version_number = (section[5] >> 1) & 0x1F;

        let programs = section[8..section.len() - 4]
            .chunks_exact(4)
            .map(|entry| PatProgram {
                program_number: u16::from_be_bytes([entry[0], entry[1]]),
                pmt_pid: ((entry[2] as u16 & 0x1F) << 8) | entry[3] as u16,
            })
            .collect();

        Ok(Pat {
            transport_stream_id,
            version_number,
            programs,
        })
    }

    /// PMT PID of the first real program (program_number 0 is the NIT).
    pub fn first_pmt_pid(&self) -> Option<u16> {
        self.programs
            .iter()
            .find(|p| p.program_number != 0)
            .map(|p| p.pmt_pid)
    }

    /// Serialize to a section with CRC.
    pub fn to_section(&self) -> Vec<u8> {
        let section_length = 9 + self.programs.len() * 4;
        let mut section = Vec::with_capacity(3 + section_length);
        section.push(TABLE_ID_PAT);
        section.push(0xB0 | ((section_length >> 8) as u8 & 0x0F));
        section.push((section_length & 0xFF) as u8);
        section.extend_from_slice(&self.transport_stream_id.to_be_bytes());
        section.push(0xC1 | ((self.version_number & 0x1F) << 1));
        section.push(0x00);
        section.push(0x00);
        for program in &self.programs {
            section.extend_from_slice(&program.program_number.to_be_bytes());
            section.push(0xE0 | ((program.pmt_pid >> 8) as u8 & 0x1F));
            section.push((program.pmt_pid & 0xFF) as u8);
        }
        append_section_crc32(&mut section);
        section
    }
}

/// Validate the generic long-form section header and CRC, returning exactly
/// the section bytes (header through CRC).
pub(crate) fn section_bytes(data: &[u8], table_id: u8, min_length: u16) -> Result<&[u8]> {
    if data.len() < 3 {
        return Err(TsError::InsufficientData {
            expected: 3,
            actual: data.len(),
        });
    }
    if data[0] != table_id {
        return Err(TsError::InvalidTableId {
            expected: table_id,
            actual: data[0],
        });
    }
    let section_length = ((data[1] as u16 & 0x0F) << 8) | data[2] as u16;
    if section_length < min_length {
        return Err(TsError::InvalidSectionLength(section_length));
    }
    let end = 3 + section_length as usize;
    if data.len() < end {
        return Err(TsError::InsufficientData {
            expected: end,
            actual: data.len(),
        });
    }
    let section = &data[..end];
    if !validate_section_crc32(section) {
        let stored = u32::from_be_bytes([
            section[end - 4],
            section[end - 3],
            section[end - 2],
            section[end - 1],
        ]);
        return Err(TsError::Crc32Mismatch {
            expected: stored,
            calculated: crate::crc32::mpeg2_crc32(&section[..end - 4]),
        });
    }
    Ok(section)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_pat() -> Pat {
        Pat {
            transport_stream_id: 0x0B21,
            version_number: 1,
            programs: vec![
                PatProgram {
                    program_number: 0,
                    pmt_pid: 0x0010,
                },
                PatProgram {
                    program_number: 1,
                    pmt_pid: 0x0030,
                },
            ],
        }
    }

    #[test]
    fn test_parse_built_section() {
        let pat = sample_pat();
        let section = pat.to_section();
        assert_eq!(section[1] & 0xF0, 0xB0);
        assert_eq!(Pat::parse(&section).unwrap(), pat);
        assert_eq!(pat.first_pmt_pid(), Some(0x0030));
    }

    #[test]
    fn test_trailing_stuffing_is_ignored() {
        let mut section = sample_pat().to_section();
        section.extend_from_slice(&[0xFF; 20]);
        assert_eq!(Pat::parse(&section).unwrap().programs.len(), 2);
    }

    #[test]
    fn test_corrupt_crc_rejected() {
        let mut section = sample_pat().to_section();
        section[4] ^= 0x01;
        assert!(matches!(
            Pat::parse(&section),
            Err(TsError::Crc32Mismatch { .. })
        ));
    }

    #[test]
    fn test_wrong_table_id() {
        let mut section = sample_pat().to_section();
        section[0] = 0x02;
        assert_eq!(
            Pat::parse(&section).unwrap_err(),
            TsError::InvalidTableId {
                expected: 0x00,
                actual: 0x02
            }
        );
    }
}
