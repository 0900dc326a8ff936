//! Broadcast-style table handling for the client stream: filler frames,
//! table extraction from live segments, SDT renaming and PSIP synthesis.

use bytes::{Bytes, BytesMut};
use thiserror::Error;
use tracing::{debug, trace, warn};
use ts::{
    ContinuityCounters, PID_PAT, PID_PSIP, PID_SDT, Pat, PatProgram, Pmt, PmtStream, StreamType,
    TS_PACKET_SIZE, TsError, TsPacket, VirtualChannel, aligned_packets, packet_pid,
};

use crate::channel::{AtscTableSet, ChannelRecord};

/// Seven packets, the unit written when no live data is available.
pub const FRAME_SIZE: usize = AtscTableSet::MAX_PACKETS * TS_PACKET_SIZE;

/// Null-PID packet with a zero pointer field and 0xFF stuffing.
pub const BLANK_PACKET: [u8; TS_PACKET_SIZE] = blank_packet();

const fn blank_packet() -> [u8; TS_PACKET_SIZE] {
    let mut packet = [0xFF; TS_PACKET_SIZE];
    packet[0] = 0x47;
    packet[1] = 0x1F;
    packet[2] = 0xFF;
    packet[3] = 0x10;
    packet[4] = 0x00;
    packet
}

const SYNTH_TRANSPORT_STREAM_ID: u16 = 1;
const SYNTH_PROGRAM_NUMBER: u16 = 1;
const SYNTH_PMT_PID: u16 = 0x30;
const SYNTH_VIDEO_PID: u16 = SYNTH_PMT_PID + 1;
const SYNTH_AUDIO_PID: u16 = SYNTH_PMT_PID + 4;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FramerError {
    #[error("{0} tables do not fit in one frame")]
    TooManyTables(usize),

    #[error("table {index} is {len} bytes, longer than a transport packet")]
    TableTooLong { index: usize, len: usize },

    #[error(transparent)]
    Ts(#[from] TsError),
}

/// Lay out `tables` (or nothing) as one 1316-byte frame; unused slots hold
/// [`BLANK_PACKET`] and short tables are padded with 0xFF.
pub fn format_tables(tables: Option<&AtscTableSet>) -> Result<Bytes, FramerError> {
    let packets = tables.map(|t| t.packets.as_slice()).unwrap_or_default();
    if packets.len() > AtscTableSet::MAX_PACKETS {
        return Err(FramerError::TooManyTables(packets.len()));
    }
    if let Some((index, packet)) = packets
        .iter()
        .enumerate()
        .find(|(_, p)| p.len() > TS_PACKET_SIZE)
    {
        return Err(FramerError::TableTooLong {
            index,
            len: packet.len(),
        });
    }

    let mut frame = BytesMut::with_capacity(FRAME_SIZE);
    for packet in packets {
        frame.extend_from_slice(packet);
        frame.resize(frame.len() + TS_PACKET_SIZE - packet.len(), 0xFF);
    }
    while frame.len() < FRAME_SIZE {
        frame.extend_from_slice(&BLANK_PACKET);
    }
    Ok(frame.freeze())
}

/// Collect the packets carrying the stream's own tables: the first PAT,
/// the first packet of each PMT it announces, the first SDT and PSIP base
/// PID section starts, in stream order and at most seven.
pub fn extract_tables(data: &Bytes) -> Vec<Bytes> {
    let mut tables: Vec<Bytes> = Vec::new();
    let mut pmt_pids: Vec<u16> = Vec::new();
    let mut seen_pids: Vec<u16> = Vec::new();

    for (offset, raw) in aligned_packets(data) {
        if tables.len() == AtscTableSet::MAX_PACKETS {
            break;
        }
        let pid = packet_pid(raw);
        if seen_pids.contains(&pid) {
            continue;
        }
        let wanted = pid == PID_PAT || pid == PID_SDT || pid == PID_PSIP || pmt_pids.contains(&pid);
        if !wanted {
            continue;
        }
        let packet_bytes = data.slice(offset..offset + TS_PACKET_SIZE);
        let packet = match TsPacket::parse(packet_bytes.clone()) {
            Ok(packet) if !packet.transport_error_indicator && packet.payload_unit_start_indicator => {
                packet
            }
            _ => continue,
        };
        let Some(section) = packet.get_psi_payload() else {
            continue;
        };

        if pid == PID_PAT {
            match Pat::parse(&section) {
                Ok(pat) => {
                    pmt_pids = pat
                        .programs
                        .iter()
                        .filter(|p| p.program_number != 0)
                        .map(|p| p.pmt_pid)
                        .collect();
                    trace!(?pmt_pids, "Decoded PAT");
                }
                Err(e) => {
                    debug!(error = %e, "Skipping undecodable PAT");
                    continue;
                }
            }
        } else if pmt_pids.contains(&pid) {
            match Pmt::parse(&section) {
                Ok(pmt) => trace!(pid, video_pid = ?pmt.video_pid(), "Decoded PMT"),
                Err(e) => {
                    debug!(pid, error = %e, "Skipping undecodable PMT");
                    continue;
                }
            }
        }

        seen_pids.push(pid);
        tables.push(packet_bytes);
    }
    tables
}

/// Remembers the table set of a channel and reports when the upstream
/// tables differ from it.
#[derive(Debug, Default)]
pub struct TableTracker {
    cached: Option<AtscTableSet>,
    learned: bool,
}

impl TableTracker {
    pub fn new(cached: Option<AtscTableSet>) -> Self {
        Self {
            cached,
            learned: false,
        }
    }

    pub fn current(&self) -> Option<&AtscTableSet> {
        self.cached.as_ref()
    }

    /// Learn tables from the first segment that has them. Returns the new
    /// set when it differs from the cached one.
    pub fn observe(&mut self, data: &Bytes) -> Option<AtscTableSet> {
        if self.learned {
            return None;
        }
        let packets = extract_tables(data);
        if packets.is_empty() {
            return None;
        }
        self.learned = true;
        let found = AtscTableSet::new(packets);
        match &self.cached {
            Some(cached) if cached.same_tables(&found) => None,
            _ => {
                debug!(packets = found.packets.len(), "Upstream tables changed");
                self.cached = Some(found.clone());
                Some(found)
            }
        }
    }
}

/// Replace the provider and service names in every SDT section start of
/// `data`. Packets that cannot be rewritten are passed through untouched.
pub fn rewrite_service_descriptor(data: &Bytes, provider: &str, service: &str) -> Bytes {
    let mut out: Option<BytesMut> = None;
    for (offset, raw) in aligned_packets(data) {
        if packet_pid(raw) != PID_SDT || raw[1] & 0x40 == 0 {
            continue;
        }
        match ts::sdt::rewrite_sdt_packet(raw, provider.as_bytes(), service.as_bytes()) {
            Ok(rewritten) => {
                let buffer = out.get_or_insert_with(|| BytesMut::from(&data[..]));
                buffer[offset..offset + TS_PACKET_SIZE].copy_from_slice(&rewritten);
            }
            Err(e) => debug!(offset, error = %e, "Leaving SDT packet unmodified"),
        }
    }
    match out {
        Some(buffer) => buffer.freeze(),
        None => data.clone(),
    }
}

/// Generates PAT, PMT, TVCT and STT packets for a channel that has no table
/// set of its own. Continuity counters advance with every call.
#[derive(Debug, Default)]
pub struct PsipBuilder {
    counters: ContinuityCounters,
    version: u8,
}

impl PsipBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn build(&mut self, channel: &ChannelRecord) -> Result<AtscTableSet, FramerError> {
        self.build_at(channel, chrono::Utc::now().timestamp())
    }

    pub fn build_at(
        &mut self,
        channel: &ChannelRecord,
        unix_seconds: i64,
    ) -> Result<AtscTableSet, FramerError> {
        let pat = Pat {
            transport_stream_id: SYNTH_TRANSPORT_STREAM_ID,
            version_number: self.version,
            programs: vec![PatProgram {
                program_number: SYNTH_PROGRAM_NUMBER,
                pmt_pid: SYNTH_PMT_PID,
            }],
        };
        let pmt = Pmt {
            program_number: SYNTH_PROGRAM_NUMBER,
            version_number: self.version,
            pcr_pid: SYNTH_VIDEO_PID,
            streams: vec![
                PmtStream {
                    stream_type: StreamType::Mpeg2Video,
                    elementary_pid: SYNTH_VIDEO_PID,
                },
                PmtStream {
                    stream_type: StreamType::Ac3,
                    elementary_pid: SYNTH_AUDIO_PID,
                },
            ],
        };
        let (major_number, minor_number) = channel.channel_numbers();
        let virtual_channel = VirtualChannel {
            short_name: channel.display_name.chars().take(7).collect(),
            major_number,
            minor_number,
            program_number: SYNTH_PROGRAM_NUMBER,
            source_id: SYNTH_PROGRAM_NUMBER,
            long_name: Some(channel.display_name.clone()),
        };
        let tvct = match ts::psip::build_tvct_section(
            SYNTH_TRANSPORT_STREAM_ID,
            self.version,
            std::slice::from_ref(&virtual_channel),
        ) {
            Ok(section) => section,
            Err(e) => {
                warn!(channel = %channel.display_number, error = %e, "Long channel name dropped from TVCT");
                let short = VirtualChannel {
                    long_name: None,
                    ..virtual_channel
                };
                ts::psip::build_tvct_section(SYNTH_TRANSPORT_STREAM_ID, self.version, &[short])?
            }
        };
        let stt = ts::psip::build_stt_section(ts::psip::unix_to_gps_seconds(unix_seconds));

        let packets = [
            (PID_PAT, pat.to_section()),
            (SYNTH_PMT_PID, pmt.to_section()),
            (PID_PSIP, tvct),
            (PID_PSIP, stt),
        ]
        .into_iter()
        .enumerate()
        .map(|(index, (pid, section))| self.packetize(index, pid, &section))
        .collect::<Result<Vec<_>, _>>()?;
        Ok(AtscTableSet::new(packets))
    }

    fn packetize(&mut self, index: usize, pid: u16, section: &[u8]) -> Result<Bytes, FramerError> {
        let header = self.counters.psi_header(pid);
        if header.len() + section.len() > TS_PACKET_SIZE {
            return Err(FramerError::TableTooLong {
                index,
                len: header.len() + section.len(),
            });
        }
        let mut packet = BytesMut::with_capacity(TS_PACKET_SIZE);
        packet.extend_from_slice(&header);
        packet.extend_from_slice(section);
        packet.resize(TS_PACKET_SIZE, 0xFF);
        Ok(packet.freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::StreamSource;
    use ts::validate_section_crc32;

    fn channel() -> ChannelRecord {
        ChannelRecord {
            uid: "news".into(),
            namespace: "pluto".into(),
            instance: "default".into(),
            display_number: "5.1".into(),
            display_name: "News Now".into(),
            stream: StreamSource::default(),
            atsc: None,
        }
    }

    fn psi_packet(pid: u16, cc: u8, section: &[u8]) -> Vec<u8> {
        let mut packet = vec![0x47, 0x40 | (pid >> 8) as u8, pid as u8, 0x10 | cc, 0x00];
        packet.extend_from_slice(section);
        packet.resize(TS_PACKET_SIZE, 0xFF);
        packet
    }

    fn sdt_section(provider: &[u8], name: &[u8]) -> Vec<u8> {
        let mut descriptors = vec![0x48, (3 + provider.len() + name.len()) as u8, 0x01, provider.len() as u8];
        descriptors.extend_from_slice(provider);
        descriptors.push(name.len() as u8);
        descriptors.extend_from_slice(name);
        let mut section = vec![
            0x42, 0xF0, 0x00, 0x00, 0x01, 0xC1, 0x00, 0x00, 0xFF, 0x01, 0xFF, 0x00, 0x01, 0xFC,
            0x80,
            descriptors.len() as u8,
        ];
        section.extend_from_slice(&descriptors);
        section[2] = (section.len() - 3 + 4) as u8;
        ts::append_section_crc32(&mut section);
        section
    }

    fn sample_stream() -> Bytes {
        let pat = Pat {
            transport_stream_id: 7,
            version_number: 0,
            programs: vec![PatProgram {
                program_number: 1,
                pmt_pid: 0x1000,
            }],
        };
        let pmt = Pmt {
            program_number: 1,
            version_number: 0,
            pcr_pid: 0x100,
            streams: vec![PmtStream {
                stream_type: StreamType::H264,
                elementary_pid: 0x100,
            }],
        };
        let mut data = Vec::new();
        data.extend(psi_packet(0x100, 0, &[0u8; 10])); // video before tables
        data.extend(psi_packet(PID_PAT, 0, &pat.to_section()));
        data.extend(psi_packet(0x1000, 0, &pmt.to_section()));
        data.extend(psi_packet(PID_SDT, 0, &sdt_section(b"FFmpeg", b"Service01")));
        data.extend(psi_packet(PID_PAT, 1, &pat.to_section())); // repeat ignored
        data.extend(psi_packet(0x100, 1, &[0u8; 10]));
        Bytes::from(data)
    }

    #[test]
    fn test_blank_frame() {
        let frame = format_tables(None).unwrap();
        assert_eq!(frame.len(), FRAME_SIZE);
        for packet in frame.chunks(TS_PACKET_SIZE) {
            assert_eq!(&packet[..5], &[0x47, 0x1F, 0xFF, 0x10, 0x00]);
            assert!(packet[5..].iter().all(|&b| b == 0xFF));
        }
    }

    #[test]
    fn test_short_tables_are_padded() {
        let tables = AtscTableSet::new(vec![Bytes::from_static(&[0x47, 0x40, 0x00, 0x10, 0x00, 0xAA])]);
        let frame = format_tables(Some(&tables)).unwrap();
        assert_eq!(frame.len(), FRAME_SIZE);
        assert_eq!(frame[5], 0xAA);
        assert!(frame[6..TS_PACKET_SIZE].iter().all(|&b| b == 0xFF));
        assert_eq!(&frame[TS_PACKET_SIZE..TS_PACKET_SIZE + 5], &BLANK_PACKET[..5]);
    }

    #[test]
    fn test_format_rejects_oversized_input() {
        let eight = AtscTableSet::new(vec![Bytes::from_static(&BLANK_PACKET); 8]);
        assert_eq!(format_tables(Some(&eight)), Err(FramerError::TooManyTables(8)));
        let long = AtscTableSet::new(vec![Bytes::from(vec![0x47; 189])]);
        assert_eq!(
            format_tables(Some(&long)),
            Err(FramerError::TableTooLong { index: 0, len: 189 })
        );
    }

    #[test]
    fn test_extract_tables_in_stream_order() {
        let data = sample_stream();
        let tables = extract_tables(&data);
        let pids: Vec<u16> = tables.iter().map(|p| packet_pid(p)).collect();
        assert_eq!(pids, vec![PID_PAT, 0x1000, PID_SDT]);
        assert!(tables.iter().all(|p| p.len() == TS_PACKET_SIZE));
    }

    #[test]
    fn test_tracker_reports_changes_once() {
        let data = sample_stream();
        let mut tracker = TableTracker::new(None);
        assert!(tracker.observe(&data).is_some());
        assert!(tracker.observe(&data).is_none());

        let known = AtscTableSet::new(extract_tables(&data));
        let mut tracker = TableTracker::new(Some(known));
        assert!(tracker.observe(&data).is_none());
    }

    #[test]
    fn test_rewrite_service_descriptor() {
        let data = sample_stream();
        let out = rewrite_service_descriptor(&data, "pluto", "5.1 News Now");
        assert_eq!(out.len(), data.len());
        let sdt = &out[3 * TS_PACKET_SIZE..4 * TS_PACKET_SIZE];
        let services = ts::sdt::parse_services(&sdt[5..]).unwrap();
        assert_eq!(services[0].provider_name, b"pluto");
        assert_eq!(services[0].service_name, b"5.1 News Now");
        // other packets untouched
        assert_eq!(&out[..3 * TS_PACKET_SIZE], &data[..3 * TS_PACKET_SIZE]);
        assert_eq!(&out[4 * TS_PACKET_SIZE..], &data[4 * TS_PACKET_SIZE..]);
    }

    #[test]
    fn test_corrupt_sdt_left_alone() {
        let mut section = sdt_section(b"FFmpeg", b"Service01");
        let last = section.len() - 1;
        section[last] ^= 0x01;
        let data = Bytes::from(psi_packet(PID_SDT, 0, &section));
        let out = rewrite_service_descriptor(&data, "pluto", "5.1 News Now");
        assert_eq!(out, data);
    }

    #[test]
    fn test_psip_builder() {
        let mut builder = PsipBuilder::new();
        let tables = builder.build_at(&channel(), 1_700_000_000).unwrap();
        assert_eq!(tables.packets.len(), 4);

        let pids: Vec<u16> = tables.packets.iter().map(|p| packet_pid(p)).collect();
        assert_eq!(pids, vec![PID_PAT, SYNTH_PMT_PID, PID_PSIP, PID_PSIP]);

        let pat = Pat::parse(&tables.packets[0][5..]).unwrap();
        assert_eq!(pat.first_pmt_pid(), Some(SYNTH_PMT_PID));
        let pmt = Pmt::parse(&tables.packets[1][5..]).unwrap();
        assert_eq!(pmt.video_pid(), Some(SYNTH_VIDEO_PID));

        let tvct_len = 3 + (((tables.packets[2][6] as usize) & 0x0F) << 8 | tables.packets[2][7] as usize);
        assert!(validate_section_crc32(&tables.packets[2][5..5 + tvct_len]));

        let (gps, offset) = ts::psip::parse_stt_section(&tables.packets[3][5..]).unwrap();
        assert_eq!(gps, (1_700_000_000 - 315_964_800 + 18) as u32);
        assert_eq!(offset, 18);

        // two PSIP packets share a PID, so their counters differ
        assert_eq!(tables.packets[2][3] & 0x0F, 0);
        assert_eq!(tables.packets[3][3] & 0x0F, 1);
        let again = builder.build_at(&channel(), 1_700_000_001).unwrap();
        assert_eq!(again.packets[0][3] & 0x0F, 1);
        assert!(format_tables(Some(&again)).is_ok());
    }
}
