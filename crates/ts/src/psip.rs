//! ATSC A/65 PSIP section builders: Terrestrial Virtual Channel Table and
//! System Time Table.

use crate::crc32::append_section_crc32;
use crate::pat::section_bytes;
use crate::{Result, TsError};

pub const TABLE_ID_TVCT: u8 = 0xC8;
pub const TABLE_ID_STT: u8 = 0xCD;

/// extended_channel_name_descriptor
pub const EXTENDED_CHANNEL_NAME_TAG: u8 = 0xA0;

/// Seconds between the Unix epoch and the GPS epoch (1980-01-06T00:00:00Z).
pub const GPS_EPOCH_UNIX_SECONDS: i64 = 315_964_800;

/// GPS minus UTC, valid since 2017-01-01.
pub const GPS_UTC_OFFSET_SECONDS: u8 = 18;

/// ATSC digital television service_type
pub const ATSC_SERVICE_DIGITAL_TV: u8 = 0x02;

const SHORT_NAME_CHARS: usize = 7;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualChannel {
    /// Up to 7 characters, UTF-16 encoded on the wire.
    pub short_name: String,
    pub major_number: u16,
    pub minor_number: u16,
    pub program_number: u16,
    pub source_id: u16,
    pub long_name: Option<String>,
}

/// Convert a Unix timestamp to ATSC system_time (GPS seconds, leap seconds
/// included).
pub fn unix_to_gps_seconds(unix_seconds: i64) -> u32 {
    let gps = unix_seconds - GPS_EPOCH_UNIX_SECONDS + GPS_UTC_OFFSET_SECONDS as i64;
    gps.clamp(0, u32::MAX as i64) as u32
}

/// Build a System Time Table section.
pub fn build_stt_section(gps_seconds: u32) -> Vec<u8> {
    let mut section = vec![TABLE_ID_STT, 0xF0, 0x00, 0x00, 0x00, 0xC1, 0x00, 0x00, 0x00];
    section.extend_from_slice(&gps_seconds.to_be_bytes());
    section.push(GPS_UTC_OFFSET_SECONDS);
    // daylight_saving: not in DST, no transition pending
    section.extend_from_slice(&[0x60, 0x00]);
    finish_section(&mut section);
    section
}

/// Read system_time and GPS_UTC_offset back from an STT section.
pub fn parse_stt_section(data: &[u8]) -> Result<(u32, u8)> {
    let section = section_bytes(data, TABLE_ID_STT, 17)?;
    let system_time = u32::from_be_bytes([section[9], section[10], section[11], section[12]]);
    Ok((system_time, section[13]))
}

/// Build a Terrestrial Virtual Channel Table section.
pub fn build_tvct_section(
    transport_stream_id: u16,
    version: u8,
    channels: &[VirtualChannel],
) -> Result<Vec<u8>> {
    if channels.len() > u8::MAX as usize {
        return Err(TsError::SectionTooLarge(channels.len()));
    }
    let mut section = vec![TABLE_ID_TVCT, 0xF0, 0x00];
    section.extend_from_slice(&transport_stream_id.to_be_bytes());
    section.push(0xC1 | ((version & 0x1F) << 1));
    section.extend_from_slice(&[0x00, 0x00, 0x00]);
    section.push(channels.len() as u8);

    for channel in channels {
        let mut name_units: Vec<u16> = channel.short_name.encode_utf16().take(SHORT_NAME_CHARS).collect();
        name_units.resize(SHORT_NAME_CHARS, 0);
        for unit in name_units {
            section.extend_from_slice(&unit.to_be_bytes());
        }

        let numbers: u32 = 0x00F0_0000
            | ((channel.major_number as u32 & 0x3FF) << 10)
            | (channel.minor_number as u32 & 0x3FF);
        section.extend_from_slice(&numbers.to_be_bytes()[1..]);
        // modulation_mode: 8-VSB, carrier_frequency: 0
        section.extend_from_slice(&[0x04, 0x00, 0x00, 0x00, 0x00]);
        section.extend_from_slice(&transport_stream_id.to_be_bytes());
        section.extend_from_slice(&channel.program_number.to_be_bytes());
        // ETM none, not access controlled, not hidden, reserved, hide_guide 0
        section.push(0x0D);
        section.push(0xC0 | ATSC_SERVICE_DIGITAL_TV);
        section.extend_from_slice(&channel.source_id.to_be_bytes());

        let descriptors = match &channel.long_name {
            Some(name) => extended_channel_name_descriptor(name)?,
            None => Vec::new(),
        };
        section.push(0xFC | ((descriptors.len() >> 8) as u8 & 0x03));
        section.push((descriptors.len() & 0xFF) as u8);
        section.extend_from_slice(&descriptors);
    }

    // additional_descriptors_length = 0
    section.extend_from_slice(&[0xFC, 0x00]);
    finish_section(&mut section);
    Ok(section)
}

/// ATSC multiple_string_structure with a single English, uncompressed segment.
fn multiple_string_structure(text: &str) -> Result<Vec<u8>> {
    let bytes = text.as_bytes();
    if bytes.len() > u8::MAX as usize {
        return Err(TsError::StringTooLong(bytes.len()));
    }
    let mut out = vec![0x01];
    out.extend_from_slice(b"eng");
    out.extend_from_slice(&[0x01, 0x00, 0x00, bytes.len() as u8]);
    out.extend_from_slice(bytes);
    Ok(out)
}

fn extended_channel_name_descriptor(name: &str) -> Result<Vec<u8>> {
    let body = multiple_string_structure(name)?;
    if body.len() > u8::MAX as usize {
        return Err(TsError::StringTooLong(body.len()));
    }
    let mut out = vec![EXTENDED_CHANNEL_NAME_TAG, body.len() as u8];
    out.extend_from_slice(&body);
    Ok(out)
}

/// Fill in section_length (private-section syntax bits 0xF0) and append CRC.
fn finish_section(section: &mut Vec<u8>) {
    let section_length = section.len() - 3 + 4;
    section[1] = 0xF0 | ((section_length >> 8) as u8 & 0x0F);
    section[2] = (section_length & 0xFF) as u8;
    append_section_crc32(section);
}
