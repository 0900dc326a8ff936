/// MPEG-2 CRC-32 (ITU-T H.222.0 / ISO 13818-1)
///
/// Polynomial: 0x04C11DB7, init: 0xFFFFFFFF, no bit reflection, no final XOR.
/// This is NOT the same as the zlib/ISO 3309 CRC-32.
const POLY: u32 = 0x04C1_1DB7;

/// Compile-time generated 256-entry lookup table for MPEG-2 CRC-32.
const CRC32_TABLE: [u32; 256] = {
    let mut table = [0u32; 256];
    let mut i = 0u32;
    while i < 256 {
        let mut crc = i << 24;
        let mut j = 0;
        while j < 8 {
            if crc & 0x8000_0000 != 0 {
                crc = (crc << 1) ^ POLY;
            } else {
                crc <<= 1;
            }
            j += 1;
        }
        table[i as usize] = crc;
        i += 1;
    }
    table
};

/// Compute MPEG-2 CRC-32 over a byte slice (table driven).
pub fn mpeg2_crc32(data: &[u8]) -> u32 {
    let mut crc: u32 = 0xFFFF_FFFF;
    for &byte in data {
        crc = (crc << 8) ^ CRC32_TABLE[((crc >> 24) ^ byte as u32) as usize];
    }
    crc
}

/// Bit-at-a-time MPEG-2 CRC-32. Slow; kept as the reference the table is
/// checked against.
pub fn mpeg2_crc32_bitwise(data: &[u8]) -> u32 {
    let mut crc: u32 = 0xFFFF_FFFF;
    for &byte in data {
        for bit in (0..8).rev() {
            let input = (byte >> bit) & 1 != 0;
            let top = crc & 0x8000_0000 != 0;
            crc <<= 1;
            if input != top {
                crc ^= POLY;
            }
        }
    }
    crc
}

/// Validate that the MPEG-2 CRC-32 over the full PSI section (including the
/// stored 4-byte CRC at the end) equals zero.
pub fn validate_section_crc32(section_data: &[u8]) -> bool {
    section_data.len() >= 4 && mpeg2_crc32(section_data) == 0x0000_0000
}

/// Append the big-endian CRC of `section` to itself.
pub fn append_section_crc32(section: &mut Vec<u8>) {
    let crc = mpeg2_crc32(section);
    section.extend_from_slice(&crc.to_be_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_vector() {
        assert_eq!(mpeg2_crc32(b"123456789"), 0x0376_E6E7);
        assert_eq!(mpeg2_crc32_bitwise(b"123456789"), 0x0376_E6E7);
    }

    #[test]
    fn test_empty_data() {
        assert_eq!(mpeg2_crc32(b""), 0xFFFF_FFFF);
        assert!(!validate_section_crc32(b""));
    }

    #[test]
    fn test_table_matches_bitwise() {
        let data: Vec<u8> = (0..=255u8).chain((0..64).map(|i| i * 3)).collect();
        for end in [1, 7, 64, 188, data.len()] {
            assert_eq!(mpeg2_crc32(&data[..end]), mpeg2_crc32_bitwise(&data[..end]));
        }
    }

    #[test]
    fn test_append_then_validate() {
        // PAT body for a single program on PID 0x30
        let mut section = vec![0x00, 0xB0, 0x0D, 0x0B, 0x21, 0xC3, 0x00, 0x00, 0x00, 0x01, 0xE0, 0x30];
        append_section_crc32(&mut section);
        assert_eq!(section.len(), 16);
        assert!(validate_section_crc32(&section));
    }

    #[test]
    fn test_single_byte_corruption_detected() {
        let mut section = b"test section data".to_vec();
        append_section_crc32(&mut section);
        for i in 0..section.len() {
            let mut corrupt = section.clone();
            corrupt[i] ^= 0x01;
            assert!(!validate_section_crc32(&corrupt), "flip at {i} undetected");
        }
    }
}
