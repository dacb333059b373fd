//! TCP-based PLC transport.
//!
//! Speaks a minimal byte-block request/response protocol over a plain
//! `TcpStream`: this stands in for a vendor S7 communication driver, which
//! is an external dependency out of scope for this backend. The contract
//! this module implements -- connect/reconnect, and block read/write with a
//! small framed request -- is the part that belongs here.
//!
//! Wire format, all integers big-endian:
//! - Read request: `[0x01, db:u16, offset:u32, len:u16]` (9 bytes);
//!   response is exactly `len` bytes.
//! - Write request: `[0x02, db:u16, offset:u32, len:u16, data...]`;
//!   response is a single `0x00` ack byte.

use crate::error::{TransportError, TransportResult};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;
use tracing::info;

const OP_READ: u8 = 0x01;
const OP_WRITE: u8 = 0x02;

/// Connection parameters for [`S7Transport`].
#[derive(Debug, Clone)]
pub struct S7Config {
    /// Server address.
    pub addr: SocketAddr,
    /// Connect timeout.
    pub connect_timeout: Duration,
    /// Per-operation read/write timeout.
    pub io_timeout: Duration,
    /// Delay between reconnect attempts.
    pub reconnect_delay: Duration,
    /// Give up after this many consecutive reconnect attempts.
    pub max_reconnect_attempts: u32,
}

impl Default for S7Config {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:102".parse().expect("static addr parses"),
            connect_timeout: Duration::from_secs(3),
            io_timeout: Duration::from_secs(2),
            reconnect_delay: Duration::from_secs(5),
            max_reconnect_attempts: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkState {
    Disconnected,
    Connected,
}

/// TCP-backed PLC transport implementing the byte-block request protocol.
#[derive(Debug)]
pub struct S7Transport {
    config: S7Config,
    stream: Option<TcpStream>,
    state: LinkState,
}

impl S7Transport {
    /// Create a new transport with the given connection parameters.
    #[must_use]
    pub fn new(config: S7Config) -> Self {
        Self {
            config,
            stream: None,
            state: LinkState::Disconnected,
        }
    }

    fn mark_disconnected(&mut self) {
        self.stream = None;
        self.state = LinkState::Disconnected;
    }

    fn request(&mut self, request: &[u8], response_len: usize) -> TransportResult<Vec<u8>> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(TransportError::ConnectionLost(
                "not connected to PLC".into(),
            ));
        };

        if let Err(e) = stream.write_all(request) {
            self.mark_disconnected();
            return Err(TransportError::WriteFailed(format!("send failed: {e}")));
        }

        let mut response = vec![0u8; response_len];
        if let Err(e) = self
            .stream
            .as_mut()
            .expect("checked above")
            .read_exact(&mut response)
        {
            self.mark_disconnected();
            return Err(TransportError::ReadFailed(format!(
                "receive failed: {e}"
            )));
        }
        Ok(response)
    }
}

impl crate::PlcTransport for S7Transport {
    fn connect(&mut self) -> TransportResult<()> {
        if self.state == LinkState::Connected {
            return Ok(());
        }

        info!(addr = %self.config.addr, "connecting to PLC");
        let stream = TcpStream::connect_timeout(&self.config.addr, self.config.connect_timeout)
            .map_err(|e| TransportError::ConnectionLost(format!("connect failed: {e}")))?;
        stream
            .set_read_timeout(Some(self.config.io_timeout))
            .map_err(|e| TransportError::ConnectionLost(format!("set read timeout: {e}")))?;
        stream
            .set_write_timeout(Some(self.config.io_timeout))
            .map_err(|e| TransportError::ConnectionLost(format!("set write timeout: {e}")))?;
        let _ = stream.set_nodelay(true);

        self.stream = Some(stream);
        self.state = LinkState::Connected;
        info!("PLC connection established");
        Ok(())
    }

    fn disconnect(&mut self) {
        self.mark_disconnected();
    }

    fn is_connected(&self) -> bool {
        self.state == LinkState::Connected
    }

    fn db_read(&mut self, db_number: u16, offset: u32, len: usize) -> TransportResult<Vec<u8>> {
        if !self.is_connected() {
            return Err(TransportError::ConnectionLost(
                "not connected to PLC".into(),
            ));
        }
        let mut req = Vec::with_capacity(9);
        req.push(OP_READ);
        req.extend_from_slice(&db_number.to_be_bytes());
        req.extend_from_slice(&offset.to_be_bytes());
        req.extend_from_slice(&(len as u16).to_be_bytes());
        self.request(&req, len)
    }

    fn db_write(&mut self, db_number: u16, offset: u32, data: &[u8]) -> TransportResult<()> {
        if !self.is_connected() {
            return Err(TransportError::ConnectionLost(
                "not connected to PLC".into(),
            ));
        }
        let mut req = Vec::with_capacity(9 + data.len());
        req.push(OP_WRITE);
        req.extend_from_slice(&db_number.to_be_bytes());
        req.extend_from_slice(&offset.to_be_bytes());
        req.extend_from_slice(&(data.len() as u16).to_be_bytes());
        req.extend_from_slice(data);
        let ack = self.request(&req, 1)?;
        if ack.first() != Some(&0x00) {
            return Err(TransportError::WriteFailed("PLC rejected write".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PlcTransport;

    #[test]
    fn test_not_connected_rejects_read() {
        let mut t = S7Transport::new(S7Config::default());
        let err = t.db_read(9, 0, 12).unwrap_err();
        assert!(matches!(err, TransportError::ConnectionLost(_)));
    }

    #[test]
    fn test_not_connected_rejects_write() {
        let mut t = S7Transport::new(S7Config::default());
        let err = t.db_write(9, 200, &[0, 0]).unwrap_err();
        assert!(matches!(err, TransportError::ConnectionLost(_)));
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let mut t = S7Transport::new(S7Config::default());
        t.disconnect();
        t.disconnect();
        assert!(!t.is_connected());
    }
}
