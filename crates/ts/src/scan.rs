use bytes::Bytes;
use tracing::trace;

use crate::packet::{TS_PACKET_SIZE, TsPacket, aligned_packets};
use crate::pes::PesHeader;

/// A presentation timestamp and the offset of the packet that carried the
/// start of its PES header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PtsSample {
    pub pts: u64,
    /// Always a multiple of 188.
    pub offset: usize,
}

/// Collect the PTS of every PES header on the first video PID found in
/// `data`, in stream order.
pub fn scan_video_pts(data: &Bytes) -> Vec<PtsSample> {
    let mut video_pid: Option<u16> = None;
    let mut samples = Vec::new();

    for (offset, raw) in aligned_packets(data) {
        // cheap header checks before slicing
        if raw[1] & 0x40 == 0 || raw[1] & 0x80 != 0 {
            continue;
        }
        let Ok(packet) = TsPacket::parse(data.slice(offset..offset + TS_PACKET_SIZE)) else {
            continue;
        };
        if video_pid.is_some_and(|pid| pid != packet.pid) {
            continue;
        }
        let Some(payload) = packet.payload.as_ref() else {
            continue;
        };
        let Ok(header) = PesHeader::parse(payload) else {
            continue;
        };
        if !header.is_video() {
            continue;
        }
        if video_pid.is_none() {
            trace!(pid = packet.pid, "Locked on video PID");
            video_pid = Some(packet.pid);
        }
        if let Some(pts) = header.pts {
            samples.push(PtsSample { pts, offset });
        }
    }
    samples
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pes::encode_timestamp;

    fn pes_packet(pid: u16, stream_id: u8, pts: u64) -> Vec<u8> {
        let mut packet = vec![
            0x47,
            0x40 | (pid >> 8) as u8,
            pid as u8,
            0x10,
            0x00,
            0x00,
            0x01,
            stream_id,
            0x00,
            0x00,
            0x80,
            0x80,
            0x05,
        ];
        packet.extend_from_slice(&encode_timestamp(0b0010, pts));
        packet.resize(TS_PACKET_SIZE, 0xFF);
        packet
    }

    #[test]
    fn test_scan_picks_first_video_pid() {
        let mut data = Vec::new();
        data.extend(pes_packet(0x101, 0xC0, 5)); // audio ignored
        data.extend(pes_packet(0x100, 0xE0, 1000));
        data.extend(pes_packet(0x102, 0xE0, 7)); // second video PID ignored
        data.extend(pes_packet(0x100, 0xE0, 4000));

        let samples = scan_video_pts(&Bytes::from(data));
        assert_eq!(
            samples,
            vec![
                PtsSample { pts: 1000, offset: 188 },
                PtsSample { pts: 4000, offset: 564 }
            ]
        );
    }

    #[test]
    fn test_scan_without_video_is_empty() {
        let data = Bytes::from(pes_packet(0x101, 0xC0, 5));
        assert!(scan_video_pts(&data).is_empty());
        assert!(scan_video_pts(&Bytes::new()).is_empty());
    }
}
