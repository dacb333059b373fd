//! Wire layout for the per-cabin sensor frame and the byte-block codec.
//!
//! One cabin occupies 12 bytes, big-endian: `i16` analog, `f32` pressure,
//! `i16` position, `f32` angle.

/// One cabin's sensor snapshot at a single sample instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CabinFrame {
    /// Zero-based cabin index within the array.
    pub cabin_index: usize,
    /// Raw analog reading.
    pub analog: i16,
    /// Pressure in engineering units.
    pub pressure: f32,
    /// Angular position, degrees, 0..359.
    pub position: i16,
    /// Angle reading, engineering units.
    pub angle: f32,
    /// Sample timestamp in monotonic seconds.
    pub timestamp: f64,
}

/// Byte size of one cabin's frame.
pub const CABIN_FRAME_SIZE: usize = 12;

/// One polling instant across all cabins.
#[derive(Debug, Clone, PartialEq)]
pub struct PollFrame {
    /// Sample timestamp in monotonic seconds.
    pub timestamp: f64,
    /// Per-cabin snapshots, in cabin-index order. Shorter than the
    /// configured cabin count if the underlying read was truncated.
    pub cabins: Vec<CabinFrame>,
}

/// Decode a byte-block read into cabin frames.
///
/// A buffer shorter than `cabin_count * CABIN_FRAME_SIZE` yields a
/// correspondingly shorter, but still valid, sequence -- this matches the
/// documented "short read truncates, never pads" contract.
#[must_use]
pub fn decode_cabin_array(bytes: &[u8], cabin_count: usize, timestamp: f64) -> Vec<CabinFrame> {
    let mut cabins = Vec::with_capacity(cabin_count);
    for (cabin_index, chunk) in bytes.chunks_exact(CABIN_FRAME_SIZE).enumerate() {
        if cabin_index >= cabin_count {
            break;
        }
        cabins.push(decode_cabin_frame(cabin_index, chunk, timestamp));
    }
    cabins
}

fn decode_cabin_frame(cabin_index: usize, chunk: &[u8], timestamp: f64) -> CabinFrame {
    debug_assert_eq!(chunk.len(), CABIN_FRAME_SIZE);
    let analog = i16::from_be_bytes([chunk[0], chunk[1]]);
    let pressure = f32::from_be_bytes([chunk[2], chunk[3], chunk[4], chunk[5]]);
    let position = i16::from_be_bytes([chunk[6], chunk[7]]);
    let angle = f32::from_be_bytes([chunk[8], chunk[9], chunk[10], chunk[11]]);
    CabinFrame {
        cabin_index,
        analog,
        pressure,
        position,
        angle,
        timestamp,
    }
}

/// Encode one cabin's frame back into its 12-byte wire representation.
/// Used by the mock transport and by tests exercising the codec round-trip.
#[must_use]
pub fn encode_cabin_frame(frame: &CabinFrame) -> [u8; CABIN_FRAME_SIZE] {
    let mut buf = [0u8; CABIN_FRAME_SIZE];
    buf[0..2].copy_from_slice(&frame.analog.to_be_bytes());
    buf[2..6].copy_from_slice(&frame.pressure.to_be_bytes());
    buf[6..8].copy_from_slice(&frame.position.to_be_bytes());
    buf[8..12].copy_from_slice(&frame.angle.to_be_bytes());
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_single_cabin() {
        let frame = CabinFrame {
            cabin_index: 0,
            analog: -1234,
            pressure: 987.5,
            position: 180,
            angle: 45.25,
            timestamp: 1.0,
        };
        let bytes = encode_cabin_frame(&frame);
        let decoded = decode_cabin_array(&bytes, 1, 1.0);
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0], frame);
    }

    #[test]
    fn test_short_read_truncates() {
        let bytes = vec![0u8; CABIN_FRAME_SIZE * 2 + 3];
        let decoded = decode_cabin_array(&bytes, 5, 0.0);
        assert_eq!(decoded.len(), 2);
    }

    #[test]
    fn test_cabin_index_assigned_in_order() {
        let bytes = vec![0u8; CABIN_FRAME_SIZE * 3];
        let decoded = decode_cabin_array(&bytes, 3, 0.0);
        assert_eq!(
            decoded.iter().map(|c| c.cabin_index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
    }
}
