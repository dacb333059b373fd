//! Write-back path: encodes the classification result and the active
//! fault code as big-endian `i16` words back to the PLC.
//!
//! Both writes share the polling engine's transport handle; because
//! writes happen only from the processing loop while the polling worker
//! issues reads, serializing all access through one `Mutex` is what keeps
//! the two from corrupting each other's in-flight request.

use ldpj_common::{FaultWriteConfig, WriteBackConfig};
use ldpj_transport::{PlcTransport, TransportError};
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Errors from a write-back attempt. Non-fatal: the processing loop logs
/// and continues on either variant.
#[derive(Debug, Error)]
pub enum PlcWriteError {
    /// The underlying transport write failed.
    #[error("PLC write-back failed: {0}")]
    Transport(#[from] TransportError),
}

/// Shared, lockable transport handle, the same one the polling engine reads from.
pub type SharedTransport = Arc<Mutex<Box<dyn PlcTransport>>>;

/// Encodes and writes the classification result and fault code back to the PLC.
pub struct ResultSender {
    transport: SharedTransport,
    write_back: WriteBackConfig,
    fault_write: FaultWriteConfig,
}

impl ResultSender {
    /// Build a sender over a shared transport handle.
    #[must_use]
    pub fn new(
        transport: SharedTransport,
        write_back: WriteBackConfig,
        fault_write: FaultWriteConfig,
    ) -> Self {
        Self {
            transport,
            write_back,
            fault_write,
        }
    }

    /// Write the classification result.
    ///
    /// `value = base + int(probability * scale)` for a pass (`label ==
    /// 1`), or plain `base` for a leak.
    ///
    /// # Errors
    ///
    /// Returns [`PlcWriteError`] if the underlying transport write fails.
    pub fn write_result(&self, label: i32, probability: f64) -> Result<(), PlcWriteError> {
        let value: i16 = if label == 1 {
            let scaled = (probability * f64::from(self.write_back.scale)) as i32;
            i32::from(self.write_back.base)
                .saturating_add(scaled)
                .clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16
        } else {
            self.write_back.base
        };
        self.write(
            self.write_back.db_number,
            self.write_back.byte_offset,
            value,
        )
    }

    /// Write the currently-highest-severity fault's PLC value (or `0`).
    ///
    /// # Errors
    ///
    /// Returns [`PlcWriteError`] if the underlying transport write fails.
    pub fn write_fault_code(&self, plc_value: i32) -> Result<(), PlcWriteError> {
        let value = plc_value.clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16;
        self.write(self.fault_write.db_number, self.fault_write.byte_offset, value)
    }

    fn write(&self, db_number: u16, byte_offset: u32, value: i16) -> Result<(), PlcWriteError> {
        let bytes = value.to_be_bytes();
        let mut transport = self.transport.lock().expect("transport mutex poisoned");
        transport
            .db_write(db_number, byte_offset, &bytes)
            .map_err(PlcWriteError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ldpj_transport::MockTransport;

    fn sender() -> ResultSender {
        let transport: Arc<Mutex<Box<dyn PlcTransport>>> =
            Arc::new(Mutex::new(Box::new(MockTransport::new(1))));
        ResultSender::new(
            transport,
            WriteBackConfig {
                db_number: 9,
                byte_offset: 200,
                scale: 10,
                base: 0,
            },
            FaultWriteConfig {
                db_number: 9,
                byte_offset: 202,
            },
        )
    }

    #[test]
    fn test_write_result_leak_writes_base() {
        let s = sender();
        assert!(s.write_result(0, 0.9).is_ok());
    }

    #[test]
    fn test_write_result_pass_scales_probability() {
        let s = sender();
        assert!(s.write_result(1, 0.8).is_ok());
    }

    #[test]
    fn test_write_fault_code_ok() {
        let s = sender();
        assert!(s.write_fault_code(1).is_ok());
    }
}
