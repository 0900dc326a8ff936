use std::collections::HashMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// How the upstream delivers the channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    /// HLS media playlist
    #[default]
    Playlist,
    /// Continuous MPEG-TS over HTTP
    Direct,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamSource {
    pub kind: StreamKind,
    /// Extra request headers the provider requires.
    pub headers: HashMap<String, String>,
    /// Last known URL; providers usually resolve a fresh one per tune.
    pub url: Option<String>,
}

/// A channel as stored by the channel database. Sessions hold a read-only copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelRecord {
    pub uid: String,
    pub namespace: String,
    pub instance: String,
    /// Dotted virtual channel number, e.g. `"5.1"`.
    pub display_number: String,
    pub display_name: String,
    #[serde(default)]
    pub stream: StreamSource,
    #[serde(default)]
    pub atsc: Option<AtscTableSet>,
}

impl ChannelRecord {
    /// `"<number> <name>"`, used as the SDT service name.
    pub fn service_name(&self) -> String {
        format!("{} {}", self.display_number, self.display_name)
    }

    /// Major and minor numbers parsed from `display_number`; a missing or
    /// unparsable minor part yields 0.
    pub fn channel_numbers(&self) -> (u16, u16) {
        let mut parts = self.display_number.splitn(2, ['.', '-']);
        let major = parts
            .next()
            .and_then(|p| p.trim().parse().ok())
            .unwrap_or(0);
        let minor = parts
            .next()
            .and_then(|p| p.trim().parse().ok())
            .unwrap_or(0);
        (major, minor)
    }
}

/// Up to 7 transport packets carrying a channel's own PSI/PSIP tables.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AtscTableSet {
    #[serde(with = "hex_packets")]
    pub packets: Vec<Bytes>,
}

impl AtscTableSet {
    pub const MAX_PACKETS: usize = 7;

    pub fn new(packets: Vec<Bytes>) -> Self {
        Self { packets }
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    /// Compare table content, ignoring the 4-byte TS headers whose
    /// continuity counters change on every repetition.
    pub fn same_tables(&self, other: &AtscTableSet) -> bool {
        self.packets.len() == other.packets.len()
            && self
                .packets
                .iter()
                .zip(&other.packets)
                .all(|(a, b)| a.get(4..) == b.get(4..))
    }
}

mod hex_packets {
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(packets: &[Bytes], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(packets.iter().map(hex::encode))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Bytes>, D::Error> {
        Vec::<String>::deserialize(deserializer)?
            .into_iter()
            .map(|s| hex::decode(s).map(Bytes::from).map_err(D::Error::custom))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(number: &str) -> ChannelRecord {
        ChannelRecord {
            uid: "news-1".into(),
            namespace: "pluto".into(),
            instance: "default".into(),
            display_number: number.into(),
            display_name: "News Now".into(),
            stream: StreamSource::default(),
            atsc: None,
        }
    }

    #[test]
    fn test_channel_numbers() {
        assert_eq!(record("5.1").channel_numbers(), (5, 1));
        assert_eq!(record("1024").channel_numbers(), (1024, 0));
        assert_eq!(record("7-3").channel_numbers(), (7, 3));
        assert_eq!(record("abc").channel_numbers(), (0, 0));
        assert_eq!(record("5.1").service_name(), "5.1 News Now");
    }

    #[test]
    fn test_same_tables_ignores_header() {
        let a = AtscTableSet::new(vec![Bytes::from_static(&[0x47, 0x40, 0x00, 0x10, 0x00, 0xAB])]);
        let b = AtscTableSet::new(vec![Bytes::from_static(&[0x47, 0x40, 0x00, 0x1F, 0x00, 0xAB])]);
        let c = AtscTableSet::new(vec![Bytes::from_static(&[0x47, 0x40, 0x00, 0x10, 0x00, 0xAC])]);
        assert!(a.same_tables(&b));
        assert!(!a.same_tables(&c));
        assert!(!a.same_tables(&AtscTableSet::default()));
    }

    #[test]
    fn test_record_json_with_hex_tables() {
        let mut rec = record("5.1");
        rec.atsc = Some(AtscTableSet::new(vec![Bytes::from_static(&[0x47, 0x1F, 0xFF])]));
        let json = serde_json::to_string(&rec).unwrap();
        assert!(json.contains("\"471fff\""));
        let back: ChannelRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, rec);
    }
}
