use crate::{Result, TsError};
use bytes::Bytes;
use std::collections::HashMap;

/// Size of one transport stream packet.
pub const TS_PACKET_SIZE: usize = 188;

/// Sync byte at the start of every packet.
pub const SYNC_BYTE: u8 = 0x47;

/// PAT PID (always 0x0000)
pub const PID_PAT: u16 = 0x0000;

/// SDT/BAT PID (always 0x0011)
pub const PID_SDT: u16 = 0x0011;

/// ATSC PSIP base PID carrying MGT, TVCT and STT.
pub const PID_PSIP: u16 = 0x1FFB;

/// NULL PID (always 0x1FFF)
pub const PID_NULL: u16 = 0x1FFF;

/// Transport stream packet header and payload view.
#[derive(Debug, Clone)]
pub struct TsPacket {
    /// Transport Error Indicator
    pub transport_error_indicator: bool,
    /// Payload Unit Start Indicator
    pub payload_unit_start_indicator: bool,
    /// Packet Identifier
    pub pid: u16,
    /// Adaptation Field Control
    pub adaptation_field_control: u8,
    /// Continuity Counter
    pub continuity_counter: u8,
    /// Payload data (if present)
    pub payload: Option<Bytes>,
}

impl TsPacket {
    /// Parse a TS packet from 188 bytes
    pub fn parse(data: Bytes) -> Result<Self> {
        if data.len() != TS_PACKET_SIZE {
            return Err(TsError::InvalidPacketSize(data.len()));
        }
        if data[0] != SYNC_BYTE {
            return Err(TsError::InvalidSyncByte(data[0]));
        }

        let byte1 = data[1];
        let byte3 = data[3];
        let adaptation_field_control = (byte3 >> 4) & 0x03;

        let mut offset = 4;
        if adaptation_field_control & 0x02 != 0 {
            let adaptation_field_length = data[offset] as usize;
            offset += 1 + adaptation_field_length;
            if offset > data.len() {
                return Err(TsError::InsufficientData {
                    expected: offset,
                    actual: data.len(),
                });
            }
        }

        let payload = if adaptation_field_control & 0x01 != 0 && offset < data.len() {
            Some(data.slice(offset..))
        } else {
            None
        };

        Ok(TsPacket {
            transport_error_indicator: (byte1 & 0x80) != 0,
            payload_unit_start_indicator: (byte1 & 0x40) != 0,
            pid: packet_pid(&data),
            adaptation_field_control,
            continuity_counter: byte3 & 0x0F,
            payload,
        })
    }

    /// Check if this packet has a payload
    pub fn has_payload(&self) -> bool {
        self.adaptation_field_control & 0x01 != 0
    }

    /// Get the PSI payload (removes pointer field if PUSI is set)
    pub fn get_psi_payload(&self) -> Option<Bytes> {
        let payload = self.payload.as_ref()?;
        if !self.payload_unit_start_indicator {
            return Some(payload.clone());
        }
        let pointer_field = *payload.first()? as usize;
        if 1 + pointer_field < payload.len() {
            Some(payload.slice(1 + pointer_field..))
        } else {
            None
        }
    }
}

/// PID of a raw packet. The slice must hold at least the 4-byte header.
#[inline]
pub fn packet_pid(packet: &[u8]) -> u16 {
    ((packet[1] as u16 & 0x1F) << 8) | packet[2] as u16
}

/// Iterate the 188-byte aligned packets of `data` that start with a sync
/// byte, yielding `(byte_offset, packet)`. A trailing partial packet is ignored.
pub fn aligned_packets(data: &[u8]) -> impl Iterator<Item = (usize, &[u8])> {
    data.chunks_exact(TS_PACKET_SIZE)
        .enumerate()
        .filter(|(_, packet)| packet[0] == SYNC_BYTE)
        .map(|(index, packet)| (index * TS_PACKET_SIZE, packet))
}

/// Round `offset` down to a packet boundary.
#[inline]
pub fn align_down(offset: usize) -> usize {
    offset - offset % TS_PACKET_SIZE
}

/// Per-PID continuity counters for packets this process generates.
#[derive(Debug, Default, Clone)]
pub struct ContinuityCounters {
    counters: HashMap<u16, u8>,
}

impl ContinuityCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the counter to use for the next packet on `pid` and advance it.
    pub fn next(&mut self, pid: u16) -> u8 {
        let counter = self.counters.entry(pid).or_insert(0);
        let current = *counter;
        *counter = (current + 1) & 0x0F;
        current
    }

    /// Build the 5-byte prefix of a PSI packet: TS header with PUSI set,
    /// payload only, followed by a zero pointer field.
    pub fn psi_header(&mut self, pid: u16) -> [u8; 5] {
        let cc = self.next(pid);
        [
            SYNC_BYTE,
            0x40 | ((pid >> 8) as u8 & 0x1F),
            (pid & 0xFF) as u8,
            0x10 | cc,
            0x00,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_sync_byte() {
        let mut data = vec![0u8; 188];
        data[0] = 0x46;
        assert_eq!(
            TsPacket::parse(data.into()).unwrap_err(),
            TsError::InvalidSyncByte(0x46)
        );
    }

    #[test]
    fn test_short_packet_rejected() {
        let data = vec![0x47u8; 100];
        assert_eq!(
            TsPacket::parse(data.into()).unwrap_err(),
            TsError::InvalidPacketSize(100)
        );
    }

    #[test]
    fn test_psi_payload_skips_pointer_field() {
        let mut data = vec![0xFFu8; 188];
        data[..8].copy_from_slice(&[0x47, 0x40, 0x11, 0x15, 0x02, 0xAA, 0xBB, 0x42]);

        let packet = TsPacket::parse(data.into()).unwrap();
        assert_eq!(packet.pid, PID_SDT);
        assert!(packet.payload_unit_start_indicator);
        assert_eq!(packet.continuity_counter, 5);
        assert!(packet.has_payload());
        assert_eq!(packet.get_psi_payload().unwrap()[0], 0x42);
    }

    #[test]
    fn test_adaptation_field_is_skipped() {
        let mut data = vec![0x00u8; 188];
        data[..6].copy_from_slice(&[0x47, 0x01, 0x00, 0x30, 0x01, 0x00]);
        data[6] = 0xAB;

        let packet = TsPacket::parse(data.into()).unwrap();
        assert_eq!(packet.pid, 0x0100);
        assert_eq!(packet.payload.unwrap()[0], 0xAB);
    }

    #[test]
    fn test_aligned_packets_skip_garbage_and_tail() {
        let mut data = vec![0u8; 188 * 3 + 50];
        data[0] = SYNC_BYTE;
        data[188 * 2] = SYNC_BYTE;
        let offsets: Vec<usize> = aligned_packets(&data).map(|(o, _)| o).collect();
        assert_eq!(offsets, vec![0, 376]);
        assert_eq!(align_down(377), 376);
    }

    #[test]
    fn test_continuity_counter_wraps_per_pid() {
        let mut counters = ContinuityCounters::new();
        for expected in 0..16 {
            assert_eq!(counters.next(PID_PSIP), expected);
        }
        assert_eq!(counters.next(PID_PSIP), 0);
        assert_eq!(counters.next(PID_PAT), 0);
        assert_eq!(counters.psi_header(PID_PAT), [0x47, 0x40, 0x00, 0x11, 0x00]);
    }
}
