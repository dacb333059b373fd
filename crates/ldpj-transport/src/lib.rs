//! PLC byte-block transport abstraction.
//!
//! This crate provides:
//! - [`PlcTransport`] trait, the only contract the rest of the backend
//!   depends on
//! - [`frame`] module with the per-cabin wire layout and codec
//! - [`s7`] module with a TCP-based stand-in for a vendor S7 driver
//! - [`mock`] module with a synthetic, always-connected transport for
//!   offline development and tests

pub mod error;
pub mod frame;
pub mod mock;
pub mod s7;

pub use error::{TransportError, TransportResult};
pub use frame::{decode_cabin_array, encode_cabin_frame, CabinFrame, PollFrame, CABIN_FRAME_SIZE};
pub use mock::MockTransport;
pub use s7::S7Transport;

/// Byte-block read/write contract the rest of the backend depends on.
///
/// Implementations own their own connection state; a failed `db_read` or
/// `db_write` must leave `is_connected` false so the caller's reconnect
/// path is triggered on the next attempt.
pub trait PlcTransport: Send {
    /// Establish the link. Idempotent: calling while already connected is a
    /// no-op that returns `Ok(())`.
    fn connect(&mut self) -> TransportResult<()>;

    /// Tear down the link. Idempotent; swallows errors, there is nothing a
    /// caller can do about a failed disconnect.
    fn disconnect(&mut self);

    /// Whether the transport currently believes it has a live link.
    fn is_connected(&self) -> bool;

    /// Read `len` bytes from `(db_number, offset)`.
    fn db_read(&mut self, db_number: u16, offset: u32, len: usize) -> TransportResult<Vec<u8>>;

    /// Write `data` to `(db_number, offset)`.
    fn db_write(&mut self, db_number: u16, offset: u32, data: &[u8]) -> TransportResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_transport_is_always_connected() {
        let mut t = MockTransport::new(2);
        assert!(t.is_connected());
        t.connect().unwrap();
        assert!(t.is_connected());
    }
}
