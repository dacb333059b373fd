//! Synthetic transport for offline development and tests.
//!
//! Produces a plausible pressure waveform per cabin (a slow decay followed
//! by a recovery, repeating) with small random jitter, so cycle detection
//! has something realistic to chew on without a PLC attached.

use crate::error::TransportResult;
use crate::frame::{encode_cabin_frame, CabinFrame, CABIN_FRAME_SIZE};
use crate::PlcTransport;
use rand::Rng;

/// Always-connected transport that synthesizes cabin readings from a tick
/// counter plus jitter.
#[derive(Debug)]
pub struct MockTransport {
    cabin_count: usize,
    tick: u64,
}

impl MockTransport {
    /// Create a new mock transport for `cabin_count` cabins.
    #[must_use]
    pub fn new(cabin_count: usize) -> Self {
        Self {
            cabin_count,
            tick: 0,
        }
    }

    fn synthesize(&self, cabin_index: usize) -> CabinFrame {
        let mut rng = rand::thread_rng();
        let phase = (self.tick as f64 * 0.05 + cabin_index as f64).sin();
        let base_pressure = 1000.0 + phase * 400.0;
        let jitter: f64 = rng.gen_range(-2.0..2.0);
        CabinFrame {
            cabin_index,
            analog: ((base_pressure / 10.0) as i32).clamp(i16::MIN as i32, i16::MAX as i32) as i16,
            pressure: (base_pressure + jitter) as f32,
            position: ((self.tick % 360) as i32) as i16,
            angle: ((self.tick as f64 * 1.5) % 360.0) as f32,
            timestamp: 0.0,
        }
    }
}

impl PlcTransport for MockTransport {
    fn connect(&mut self) -> TransportResult<()> {
        Ok(())
    }

    fn disconnect(&mut self) {}

    fn is_connected(&self) -> bool {
        true
    }

    fn db_read(&mut self, _db_number: u16, _offset: u32, len: usize) -> TransportResult<Vec<u8>> {
        self.tick = self.tick.wrapping_add(1);
        let requested_cabins = len / CABIN_FRAME_SIZE;
        let n = requested_cabins.min(self.cabin_count);
        let mut buf = Vec::with_capacity(len);
        for i in 0..n {
            buf.extend_from_slice(&encode_cabin_frame(&self.synthesize(i)));
        }
        buf.resize(len, 0);
        Ok(buf)
    }

    fn db_write(&mut self, _db_number: u16, _offset: u32, _data: &[u8]) -> TransportResult<()> {
        Ok(())
    }
}
