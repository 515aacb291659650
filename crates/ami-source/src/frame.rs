//! Telemetry frame record.

use serde::{Deserialize, Serialize};

/// Encoded size of one frame: `timestamp: i32 LE` then `data: i32 LE`.
pub const RECORD_LEN: usize = 8;

/// One telemetry sample produced by a data source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryFrame {
    pub timestamp: i32,
    pub data: i32,
}

impl TelemetryFrame {
    pub fn new(timestamp: i32, data: i32) -> Self {
        Self { timestamp, data }
    }

    pub fn encode(&self) -> [u8; RECORD_LEN] {
        let mut buf = [0u8; RECORD_LEN];
        buf[..4].copy_from_slice(&self.timestamp.to_le_bytes());
        buf[4..].copy_from_slice(&self.data.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8; RECORD_LEN]) -> Self {
        let [t0, t1, t2, t3, d0, d1, d2, d3] = *buf;
        Self {
            timestamp: i32::from_le_bytes([t0, t1, t2, t3]),
            data: i32::from_le_bytes([d0, d1, d2, d3]),
        }
    }

    /// Encode a run of frames back to back, as a file source expects them.
    pub fn encode_all(frames: &[TelemetryFrame]) -> Vec<u8> {
        frames.iter().flat_map(|f| f.encode()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoding_is_little_endian() {
        let frame = TelemetryFrame::new(1, -2);
        assert_eq!(frame.encode(), [1, 0, 0, 0, 0xfe, 0xff, 0xff, 0xff]);
        assert_eq!(TelemetryFrame::decode(&frame.encode()), frame);
    }

    #[test]
    fn encode_all_concatenates() {
        let frames = [TelemetryFrame::new(1, 2), TelemetryFrame::new(3, 4)];
        let bytes = TelemetryFrame::encode_all(&frames);
        assert_eq!(bytes.len(), 2 * RECORD_LEN);
    }
}
