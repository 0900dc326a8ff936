//! Service Description Table (ETSI EN 300 468 5.2.3) support limited to what
//! a relay needs: reading service names and rewriting the service descriptor.

use crate::crc32::append_section_crc32;
use crate::packet::{SYNC_BYTE, TS_PACKET_SIZE};
use crate::pat::section_bytes;
use crate::{Result, TsError};

/// SDT actual transport stream
pub const TABLE_ID_SDT_ACTUAL: u8 = 0x42;

/// service_descriptor tag
pub const SERVICE_DESCRIPTOR_TAG: u8 = 0x48;

/// digital television service
pub const SERVICE_TYPE_DIGITAL_TV: u8 = 0x01;

const SDT_HEADER_LEN: usize = 11;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdtService {
    pub service_id: u16,
    pub service_type: Option<u8>,
    pub provider_name: Vec<u8>,
    pub service_name: Vec<u8>,
}

/// Parse the services of an SDT section (pointer field removed, CRC checked).
pub fn parse_services(data: &[u8]) -> Result<Vec<SdtService>> {
    let section = section_bytes(data, TABLE_ID_SDT_ACTUAL, (SDT_HEADER_LEN - 3 + 4) as u16)?;
    let mut services = Vec::new();
    for entry in service_entries(section)? {
        let mut service = SdtService {
            service_id: entry.service_id,
            service_type: None,
            provider_name: Vec::new(),
            service_name: Vec::new(),
        };
        if let Some(descriptor) = find_descriptor(entry.descriptors, SERVICE_DESCRIPTOR_TAG)? {
            let (service_type, provider, name) = decode_service_descriptor(descriptor)?;
            service.service_type = Some(service_type);
            service.provider_name = provider.to_vec();
            service.service_name = name.to_vec();
        }
        services.push(service);
    }
    Ok(services)
}

/// Rewrite the provider and service names of every service in an SDT
/// section, keeping the service type and all other descriptors. Services
/// without a service descriptor gain one of type digital television.
///
/// Returns the new section including a freshly computed CRC.
pub fn rewrite_service_names(data: &[u8], provider: &[u8], service: &[u8]) -> Result<Vec<u8>> {
    if provider.len() > u8::MAX as usize {
        return Err(TsError::StringTooLong(provider.len()));
    }
    if service.len() > u8::MAX as usize {
        return Err(TsError::StringTooLong(service.len()));
    }

    let section = section_bytes(data, TABLE_ID_SDT_ACTUAL, (SDT_HEADER_LEN - 3 + 4) as u16)?;
    let mut out = Vec::with_capacity(section.len() + provider.len() + service.len());
    out.extend_from_slice(&section[..SDT_HEADER_LEN]);

    for entry in service_entries(section)? {
        let existing = find_descriptor(entry.descriptors, SERVICE_DESCRIPTOR_TAG)?;
        let service_type = match existing {
            Some(descriptor) => decode_service_descriptor(descriptor)?.0,
            None => SERVICE_TYPE_DIGITAL_TV,
        };

        let payload_len = 3 + provider.len() + service.len();
        if payload_len > u8::MAX as usize {
            return Err(TsError::StringTooLong(payload_len));
        }
        let mut replacement = Vec::with_capacity(2 + payload_len);
        replacement.push(SERVICE_DESCRIPTOR_TAG);
        replacement.push(payload_len as u8);
        replacement.push(service_type);
        replacement.push(provider.len() as u8);
        replacement.extend_from_slice(provider);
        replacement.push(service.len() as u8);
        replacement.extend_from_slice(service);

        let mut descriptors = Vec::with_capacity(entry.descriptors.len() + replacement.len());
        let mut replaced = false;
        for descriptor in descriptor_iter(entry.descriptors) {
            let descriptor = descriptor?;
            if descriptor[0] == SERVICE_DESCRIPTOR_TAG && !replaced {
                descriptors.extend_from_slice(&replacement);
                replaced = true;
            } else {
                descriptors.extend_from_slice(descriptor);
            }
        }
        if !replaced {
            descriptors.extend_from_slice(&replacement);
        }

        let loop_length = descriptors.len();
        if loop_length > 0x0FFF {
            return Err(TsError::SectionTooLarge(loop_length));
        }
        out.extend_from_slice(&entry.service_id.to_be_bytes());
        out.push(entry.eit_flags);
        out.push((entry.status_bits & 0xF0) | ((loop_length >> 8) as u8 & 0x0F));
        out.push((loop_length & 0xFF) as u8);
        out.extend_from_slice(&descriptors);
    }

    let section_length = out.len() - 3 + 4;
    if section_length > 0x03FD {
        return Err(TsError::SectionTooLarge(section_length));
    }
    out[1] = (out[1] & 0xF0) | ((section_length >> 8) as u8 & 0x0F);
    out[2] = (section_length & 0xFF) as u8;
    append_section_crc32(&mut out);
    Ok(out)
}

/// Rewrite the names inside a single SDT packet. The packet must start a
/// section (PUSI set), carry no adaptation field, and the rewritten section
/// must still fit in the packet. Bytes outside the section are preserved
/// except the stuffing after it.
pub fn rewrite_sdt_packet(packet: &[u8], provider: &[u8], service: &[u8]) -> Result<Vec<u8>> {
    if packet.len() != TS_PACKET_SIZE {
        return Err(TsError::InvalidPacketSize(packet.len()));
    }
    if packet[0] != SYNC_BYTE {
        return Err(TsError::InvalidSyncByte(packet[0]));
    }
    if packet[1] & 0x40 == 0 {
        return Err(TsError::ParseError("SDT packet does not start a section".into()));
    }
    if (packet[3] >> 4) & 0x03 != 0x01 {
        return Err(TsError::ParseError("SDT packet carries an adaptation field".into()));
    }

    let section_start = 5 + packet[4] as usize;
    if section_start >= TS_PACKET_SIZE {
        return Err(TsError::InsufficientData {
            expected: section_start + 1,
            actual: TS_PACKET_SIZE,
        });
    }
    let section = rewrite_service_names(&packet[section_start..], provider, service)?;
    if section_start + section.len() > TS_PACKET_SIZE {
        return Err(TsError::SectionTooLarge(section.len()));
    }

    let mut out = Vec::with_capacity(TS_PACKET_SIZE);
    out.extend_from_slice(&packet[..section_start]);
    out.extend_from_slice(&section);
    out.resize(TS_PACKET_SIZE, 0xFF);
    Ok(out)
}

struct ServiceEntry<'a> {
    service_id: u16,
    eit_flags: u8,
    status_bits: u8,
    descriptors: &'a [u8],
}

fn service_entries(section: &[u8]) -> Result<Vec<ServiceEntry<'_>>> {
    let end = section.len() - 4;
    let mut pos = SDT_HEADER_LEN;
    let mut entries = Vec::new();
    while pos < end {
        if pos + 5 > end {
            return Err(TsError::InsufficientData {
                expected: pos + 5,
                actual: end,
            });
        }
        let loop_length = ((section[pos + 3] as usize & 0x0F) << 8) | section[pos + 4] as usize;
        let descriptors_end = pos + 5 + loop_length;
        if descriptors_end > end {
            return Err(TsError::InsufficientData {
                expected: descriptors_end,
                actual: end,
            });
        }
        entries.push(ServiceEntry {
            service_id: u16::from_be_bytes([section[pos], section[pos + 1]]),
            eit_flags: section[pos + 2],
            status_bits: section[pos + 3],
            descriptors: &section[pos + 5..descriptors_end],
        });
        pos = descriptors_end;
    }
    Ok(entries)
}

fn descriptor_iter(data: &[u8]) -> impl Iterator<Item = Result<&[u8]>> {
    let mut pos = 0;
    std::iter::from_fn(move || {
        if pos >= data.len() {
            return None;
        }
        if pos + 2 > data.len() {
            pos = data.len();
            return Some(Err(TsError::InsufficientData {
                expected: 2,
                actual: 1,
            }));
        }
        let end = pos + 2 + data[pos + 1] as usize;
        if end > data.len() {
            let actual = data.len() - pos;
            pos = data.len();
            return Some(Err(TsError::InsufficientData {
                expected: end,
                actual,
            }));
        }
        let descriptor = &data[pos..end];
        pos = end;
        Some(Ok(descriptor))
    })
}

fn find_descriptor(data: &[u8], tag: u8) -> Result<Option<&[u8]>> {
    for descriptor in descriptor_iter(data) {
        let descriptor = descriptor?;
        if descriptor[0] == tag {
            return Ok(Some(descriptor));
        }
    }
    Ok(None)
}

fn decode_service_descriptor(descriptor: &[u8]) -> Result<(u8, &[u8], &[u8])> {
    let body = &descriptor[2..];
    let malformed = || TsError::ParseError("malformed service descriptor".into());
    let service_type = *body.first().ok_or_else(malformed)?;
    let provider_len = *body.get(1).ok_or_else(malformed)? as usize;
    let provider = body.get(2..2 + provider_len).ok_or_else(malformed)?;
    let name_len = *body.get(2 + provider_len).ok_or_else(malformed)? as usize;
    let name = body
        .get(3 + provider_len..3 + provider_len + name_len)
        .ok_or_else(malformed)?;
    Ok((service_type, provider, name))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::crc32::validate_section_crc32;

    /// SDT with one service carrying a service descriptor and a trailing
    /// private descriptor.
    pub(crate) fn sample_sdt_section(provider: &[u8], name: &[u8]) -> Vec<u8> {
        let mut descriptors = vec![
            SERVICE_DESCRIPTOR_TAG,
            (3 + provider.len() + name.len()) as u8,
            0x19,
            provider.len() as u8,
        ];
        descriptors.extend_from_slice(provider);
        descriptors.push(name.len() as u8);
        descriptors.extend_from_slice(name);
        descriptors.extend_from_slice(&[0x5F, 0x04, 0x00, 0x00, 0x00, 0x01]);

        let mut section = vec![
            0x42, 0xF0, 0x00, 0x00, 0x01, 0xC1, 0x00, 0x00, 0xFF, 0x01, 0xFF, 0x00, 0x01, 0xFC,
        ];
        section.push(0x80 | ((descriptors.len() >> 8) as u8 & 0x0F));
        section.push(descriptors.len() as u8);
        section.extend_from_slice(&descriptors);
        let section_length = section.len() - 3 + 4;
        section[2] = section_length as u8;
        append_section_crc32(&mut section);
        section
    }

    pub(crate) fn sample_sdt_packet(provider: &[u8], name: &[u8]) -> Vec<u8> {
        let mut packet = vec![0x47, 0x40, 0x11, 0x17, 0x00];
        packet.extend_from_slice(&sample_sdt_section(provider, name));
        packet.resize(TS_PACKET_SIZE, 0xFF);
        packet
    }

    #[test]
    fn test_parse_services() {
        let services = parse_services(&sample_sdt_section(b"FFmpeg", b"Service01")).unwrap();
        assert_eq!(services.len(), 1);
        assert_eq!(services[0].service_id, 1);
        assert_eq!(services[0].service_type, Some(0x19));
        assert_eq!(services[0].provider_name, b"FFmpeg");
        assert_eq!(services[0].service_name, b"Service01");
    }

    #[test]
    fn test_rewrite_keeps_type_and_other_descriptors() {
        let section = sample_sdt_section(b"FFmpeg", b"Service01");
        let rewritten = rewrite_service_names(&section, b"pluto", b"5.1 News Now").unwrap();

        assert!(validate_section_crc32(&rewritten));
        let services = parse_services(&rewritten).unwrap();
        assert_eq!(services[0].service_type, Some(0x19));
        assert_eq!(services[0].provider_name, b"pluto");
        assert_eq!(services[0].service_name, b"5.1 News Now");
        // private descriptor survives at the end of the loop
        let body_end = rewritten.len() - 4;
        assert_eq!(&rewritten[body_end - 6..body_end], &[0x5F, 0x04, 0, 0, 0, 1]);
        // header up to the first service is untouched apart from the length
        assert_eq!(&rewritten[3..11], &section[3..11]);
    }

    #[test]
    fn test_rewrite_packet_pads_with_stuffing() {
        let packet = sample_sdt_packet(b"FFmpeg", b"Service01");
        let out = rewrite_sdt_packet(&packet, b"p", b"s").unwrap();
        assert_eq!(out.len(), TS_PACKET_SIZE);
        assert_eq!(&out[..5], &packet[..5]);
        assert_eq!(*out.last().unwrap(), 0xFF);
        let services = parse_services(&out[5..]).unwrap();
        assert_eq!(services[0].service_name, b"s");
    }

    #[test]
    fn test_bad_crc_is_refused() {
        let mut packet = sample_sdt_packet(b"FFmpeg", b"Service01");
        packet[20] ^= 0x10;
        assert!(matches!(
            rewrite_sdt_packet(&packet, b"p", b"s"),
            Err(TsError::Crc32Mismatch { .. })
        ));
    }

    #[test]
    fn test_oversized_names_are_refused() {
        let packet = sample_sdt_packet(b"FFmpeg", b"Service01");
        let long = vec![b'x'; 200];
        assert!(matches!(
            rewrite_sdt_packet(&packet, &long, &long),
            Err(TsError::StringTooLong(_))
        ));
        let name = vec![b'x'; 90];
        assert!(matches!(
            rewrite_sdt_packet(&packet, &name, &name),
            Err(TsError::SectionTooLarge(_))
        ));
    }
}
