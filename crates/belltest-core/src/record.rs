//! Fixed-size raw time-tag records.
//!
//! Each station's hardware writes a flat stream of 24-byte records:
//!
//! | bytes  | content                                  |
//! |--------|------------------------------------------|
//! | 0      | channel id (u8)                          |
//! | 1..8   | unused                                   |
//! | 8..16  | timestamp, little-endian u64 (320 ps)    |
//! | 16..24 | unused                                   |

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Bytes per raw record.
pub const RECORD_SIZE: usize = 24;

/// Picoseconds per timestamp tick.
pub const TICK_PS: u64 = 320;

const CHANNEL_OFFSET: usize = 0;
const TIMESTAMP_OFFSET: usize = 8;

/// One of the two detector stations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Station {
    Alice,
    Bob,
}

impl Station {
    pub const BOTH: [Station; 2] = [Station::Alice, Station::Bob];

    /// Lowercase name used in sync-table keys and JSON output.
    pub fn key(self) -> &'static str {
        match self {
            Self::Alice => "alice",
            Self::Bob => "bob",
        }
    }
}

impl fmt::Display for Station {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Alice => f.pad("ALICE"),
            Self::Bob => f.pad("BOB"),
        }
    }
}

/// A single time-tagged channel event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawEvent {
    pub channel: u8,
    pub timestamp: u64,
    pub station: Station,
}

/// Decode a raw record stream.
pub fn decode_records(bytes: &[u8], station: Station) -> Result<Vec<RawEvent>> {
    if bytes.len() % RECORD_SIZE != 0 {
        return Err(Error::RecordSizeMismatch {
            len: bytes.len(),
            record_size: RECORD_SIZE,
        });
    }
    Ok(bytes
        .chunks_exact(RECORD_SIZE)
        .map(|rec| {
            let mut ts = [0u8; 8];
            ts.copy_from_slice(&rec[TIMESTAMP_OFFSET..TIMESTAMP_OFFSET + 8]);
            RawEvent {
                channel: rec[CHANNEL_OFFSET],
                timestamp: u64::from_le_bytes(ts),
                station,
            }
        })
        .collect())
}

/// Read and decode a whole raw record file.
pub fn read_records(path: &Path, station: Station) -> Result<Vec<RawEvent>> {
    let bytes = std::fs::read(path)?;
    let events = decode_records(&bytes, station)?;
    log::debug!(
        "{station}: read {} records from {}",
        events.len(),
        path.display()
    );
    Ok(events)
}

/// Encode events into the 24-byte layout, zeroing unused bytes.
pub fn encode_records(events: &[RawEvent]) -> Vec<u8> {
    let mut out = vec![0u8; events.len() * RECORD_SIZE];
    for (rec, ev) in out.chunks_exact_mut(RECORD_SIZE).zip(events) {
        rec[CHANNEL_OFFSET] = ev.channel;
        rec[TIMESTAMP_OFFSET..TIMESTAMP_OFFSET + 8].copy_from_slice(&ev.timestamp.to_le_bytes());
    }
    out
}

/// Convenience constructor used throughout fixtures.
pub fn events_from_pairs(pairs: &[(u8, u64)], station: Station) -> Vec<RawEvent> {
    pairs
        .iter()
        .map(|&(channel, timestamp)| RawEvent {
            channel,
            timestamp,
            station,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_reads_channel_and_le_timestamp() {
        let mut rec = [0xAAu8; RECORD_SIZE];
        rec[0] = 6;
        rec[8..16].copy_from_slice(&0x0102_0304_0506_0708u64.to_le_bytes());
        let events = decode_records(&rec, Station::Bob).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].channel, 6);
        assert_eq!(events[0].timestamp, 0x0102_0304_0506_0708);
        assert_eq!(events[0].station, Station::Bob);
    }

    #[test]
    fn test_decode_rejects_partial_record() {
        let bytes = vec![0u8; RECORD_SIZE * 3 + 5];
        match decode_records(&bytes, Station::Alice) {
            Err(Error::RecordSizeMismatch { len, record_size }) => {
                assert_eq!(len, 77);
                assert_eq!(record_size, RECORD_SIZE);
            }
            other => panic!("expected RecordSizeMismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_stream_is_valid() {
        assert!(decode_records(&[], Station::Alice).unwrap().is_empty());
    }

    #[test]
    fn test_encode_zeroes_padding() {
        let events = events_from_pairs(&[(2, 77)], Station::Alice);
        let bytes = encode_records(&events);
        assert_eq!(bytes.len(), RECORD_SIZE);
        assert!(bytes[1..8].iter().all(|&b| b == 0));
        assert!(bytes[16..].iter().all(|&b| b == 0));
        assert_eq!(decode_records(&bytes, Station::Alice).unwrap(), events);
    }

    #[test]
    fn test_read_records_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alice_raw.dat");
        let events = events_from_pairs(&[(0, 1), (6, 120_000), (4, 240_017)], Station::Alice);
        std::fs::write(&path, encode_records(&events)).unwrap();
        assert_eq!(read_records(&path, Station::Alice).unwrap(), events);
    }

    #[test]
    fn test_station_display_and_key() {
        assert_eq!(Station::Alice.to_string(), "ALICE");
        assert_eq!(Station::Bob.key(), "bob");
    }
}
