//! Fixed-period PLC polling engine with a ring-buffered frame history.
//!
//! Structured after the daemon's signal handler: shared atomics carry the
//! lifecycle flags, a background thread does the work, and the handle the
//! rest of the process holds is just `Arc`s into that shared state. The
//! transport handle is shared with [`crate::result_sender::ResultSender`]
//! so reads and write-backs serialize through the same lock.

use ldpj_common::{monotonic_secs, CabinArrayConfig, ConnectionConfig, PollingConfig};
use ldpj_transport::{decode_cabin_array, PlcTransport, PollFrame};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Shared, lockable transport handle, reused by the result sender.
pub type SharedTransport = Arc<Mutex<Box<dyn PlcTransport>>>;

/// Counters exposed for health checks and diagnostics.
#[derive(Debug, Default)]
struct Counters {
    total_polls: AtomicU64,
    errors: AtomicU64,
    reconnects: AtomicU64,
}

struct Shared {
    buffer: Mutex<VecDeque<PollFrame>>,
    buffer_size: usize,
    connected: AtomicBool,
    running: AtomicBool,
    counters: Counters,
}

/// Polls the configured cabin array at a fixed period into a ring buffer.
pub struct PollingEngine {
    shared: Arc<Shared>,
    transport: SharedTransport,
    cabin_array: CabinArrayConfig,
    connection: ConnectionConfig,
    interval: Duration,
    handle: Option<JoinHandle<()>>,
}

impl PollingEngine {
    /// Build an engine over `transport`, not yet started.
    #[must_use]
    pub fn new(
        transport: SharedTransport,
        polling: PollingConfig,
        cabin_array: CabinArrayConfig,
        connection: ConnectionConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                buffer: Mutex::new(VecDeque::with_capacity(polling.buffer_size)),
                buffer_size: polling.buffer_size,
                connected: AtomicBool::new(false),
                running: AtomicBool::new(false),
                counters: Counters::default(),
            }),
            transport,
            cabin_array,
            connection,
            interval: polling.interval,
            handle: None,
        }
    }

    /// A clone of the shared transport handle, for the result sender.
    #[must_use]
    pub fn transport_handle(&self) -> SharedTransport {
        Arc::clone(&self.transport)
    }

    /// A cheap, cloneable read-only handle onto this engine's shared state,
    /// for the processing loop (draining) and the health checker (liveness
    /// and connectivity probes). Outlives a `stop()`'d engine.
    #[must_use]
    pub fn handle(&self) -> PollingHandle {
        PollingHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Start the background poll loop. A no-op if already running.
    pub fn start(&mut self) {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let shared = Arc::clone(&self.shared);
        let transport = Arc::clone(&self.transport);
        let cabin_array = self.cabin_array;
        let connection = self.connection.clone();
        let interval = self.interval;

        self.handle = Some(std::thread::spawn(move || {
            run_poll_loop(&shared, &transport, cabin_array, &connection, interval);
        }));
        info!(interval_ms = %interval.as_millis(), "polling engine started");
    }

    /// Signal the poll loop to stop and join it, with a 5-second bound.
    pub fn stop(&mut self) {
        self.shared.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            join_with_bound(handle);
        }
    }

    /// Whether the poll loop is currently running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Relaxed)
    }

    /// Whether the transport last reported itself connected.
    #[must_use]
    pub fn plc_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Relaxed)
    }

    /// Current number of frames held in the ring buffer.
    #[must_use]
    pub fn buffer_length(&self) -> usize {
        self.shared
            .buffer
            .lock()
            .expect("poll buffer mutex poisoned")
            .len()
    }

    /// Total poll attempts since start.
    #[must_use]
    pub fn total_polls(&self) -> u64 {
        self.shared.counters.total_polls.load(Ordering::Relaxed)
    }

    /// Total poll errors since start.
    #[must_use]
    pub fn error_count(&self) -> u64 {
        self.shared.counters.errors.load(Ordering::Relaxed)
    }

    /// Total reconnect attempts since start.
    #[must_use]
    pub fn reconnect_count(&self) -> u64 {
        self.shared.counters.reconnects.load(Ordering::Relaxed)
    }

    /// The most recently buffered frame, if any.
    #[must_use]
    pub fn latest_frame(&self) -> Option<PollFrame> {
        self.shared
            .buffer
            .lock()
            .expect("poll buffer mutex poisoned")
            .back()
            .cloned()
    }

    /// Every frame strictly newer than `since` (exclusive), in
    /// chronological order. Non-destructive: the ring buffer is left
    /// untouched, so the consumer advances a watermark rather than
    /// popping entries, decoupling its cadence from the producer's.
    #[must_use]
    pub fn drain_frames_since(&self, since: f64) -> Vec<PollFrame> {
        let buffer = self.shared.buffer.lock().expect("poll buffer mutex poisoned");
        buffer
            .iter()
            .filter(|f| f.timestamp > since)
            .cloned()
            .collect()
    }
}

impl Drop for PollingEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Read-only view onto a [`PollingEngine`]'s shared state. Cloning is an
/// `Arc` bump; every method is safe to call from a different thread than
/// the one driving `start`/`stop`.
#[derive(Clone)]
pub struct PollingHandle {
    shared: Arc<Shared>,
}

impl PollingHandle {
    /// Whether the poll loop is currently running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Relaxed)
    }

    /// Whether the transport last reported itself connected.
    #[must_use]
    pub fn plc_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Relaxed)
    }

    /// Current number of frames held in the ring buffer.
    #[must_use]
    pub fn buffer_length(&self) -> usize {
        self.shared
            .buffer
            .lock()
            .expect("poll buffer mutex poisoned")
            .len()
    }

    /// Total poll attempts since start.
    #[must_use]
    pub fn total_polls(&self) -> u64 {
        self.shared.counters.total_polls.load(Ordering::Relaxed)
    }

    /// Total poll errors since start.
    #[must_use]
    pub fn error_count(&self) -> u64 {
        self.shared.counters.errors.load(Ordering::Relaxed)
    }

    /// Total reconnect attempts since start.
    #[must_use]
    pub fn reconnect_count(&self) -> u64 {
        self.shared.counters.reconnects.load(Ordering::Relaxed)
    }

    /// Every frame strictly newer than `since` (exclusive), in
    /// chronological order. Non-destructive: the ring buffer is left
    /// untouched.
    #[must_use]
    pub fn drain_frames_since(&self, since: f64) -> Vec<PollFrame> {
        let buffer = self.shared.buffer.lock().expect("poll buffer mutex poisoned");
        buffer
            .iter()
            .filter(|f| f.timestamp > since)
            .cloned()
            .collect()
    }
}

fn run_poll_loop(
    shared: &Arc<Shared>,
    transport: &SharedTransport,
    cabin_array: CabinArrayConfig,
    connection: &ConnectionConfig,
    interval: Duration,
) {
    while shared.running.load(Ordering::SeqCst) {
        let tick_start = std::time::Instant::now();
        if !poll_once(shared, transport, cabin_array, connection) {
            // Reconnect attempt failed this tick: sleep the configured
            // reconnect interval rather than the normal poll period, per
            // the polling protocol's step 2.
            std::thread::sleep(connection.reconnect_interval);
            continue;
        }
        let elapsed = tick_start.elapsed();
        if elapsed < interval {
            std::thread::sleep(interval - elapsed);
        }
    }
    debug!("polling engine loop exited");
}

/// Run one poll tick. Returns `false` if the tick was a reconnect attempt
/// that failed, signalling the caller to sleep the reconnect interval
/// instead of the normal poll period.
fn poll_once(
    shared: &Arc<Shared>,
    transport: &SharedTransport,
    cabin_array: CabinArrayConfig,
    connection: &ConnectionConfig,
) -> bool {
    shared.counters.total_polls.fetch_add(1, Ordering::Relaxed);
    let mut guard = transport.lock().expect("transport mutex poisoned");

    if !guard.is_connected() {
        shared.connected.store(false, Ordering::Relaxed);
        shared.counters.reconnects.fetch_add(1, Ordering::Relaxed);
        if let Err(e) = guard.connect() {
            warn!(error = %e, ip = %connection.ip, "PLC reconnect attempt failed");
            shared.counters.errors.fetch_add(1, Ordering::Relaxed);
            return false;
        }
    }

    let len = cabin_array.cabin_count * cabin_array.cabin_size_bytes;
    let read = guard.db_read(cabin_array.db_number, cabin_array.start_offset, len);
    drop(guard);

    match read {
        Ok(bytes) => {
            shared.connected.store(true, Ordering::Relaxed);
            let ts = monotonic_secs();
            let cabins = decode_cabin_array(&bytes, cabin_array.cabin_count, ts);
            push_frame(shared, PollFrame { timestamp: ts, cabins });
        }
        Err(e) => {
            error!(error = %e, "PLC poll read failed");
            shared.connected.store(false, Ordering::Relaxed);
            shared.counters.errors.fetch_add(1, Ordering::Relaxed);
        }
    }
    true
}

fn push_frame(shared: &Arc<Shared>, frame: PollFrame) {
    let mut buffer = shared.buffer.lock().expect("poll buffer mutex poisoned");
    if buffer.len() >= shared.buffer_size {
        buffer.pop_front();
    }
    buffer.push_back(frame);
}

/// Join the poll thread. The loop checks `running` once per poll interval,
/// so shutdown latency is bounded by the configured interval, well under
/// the 5-second budget the processing loop assumes for worker teardown.
fn join_with_bound(handle: JoinHandle<()>) {
    if handle.join().is_err() {
        error!("polling thread panicked during shutdown");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ldpj_transport::MockTransport;

    fn engine() -> PollingEngine {
        let transport: SharedTransport = Arc::new(Mutex::new(Box::new(MockTransport::new(2))));
        PollingEngine::new(
            transport,
            PollingConfig {
                interval: Duration::from_millis(5),
                buffer_size: 4,
            },
            CabinArrayConfig {
                db_number: 9,
                start_offset: 0,
                cabin_count: 2,
                cabin_size_bytes: 12,
            },
            ConnectionConfig::default(),
        )
    }

    #[test]
    fn test_start_stop_lifecycle() {
        let mut e = engine();
        assert!(!e.is_running());
        e.start();
        assert!(e.is_running());
        std::thread::sleep(Duration::from_millis(30));
        e.stop();
        assert!(!e.is_running());
        assert!(e.total_polls() > 0);
    }

    #[test]
    fn test_buffer_caps_at_configured_size() {
        let mut e = engine();
        e.start();
        std::thread::sleep(Duration::from_millis(100));
        e.stop();
        assert!(e.buffer_length() <= 4);
    }

    #[test]
    fn test_drain_frames_since_is_strictly_greater_than() {
        let mut e = engine();
        e.start();
        std::thread::sleep(Duration::from_millis(40));
        e.stop();
        let first = e.drain_frames_since(-1.0);
        assert!(!first.is_empty());
        let watermark = first.last().unwrap().timestamp;
        let second = e.drain_frames_since(watermark);
        assert!(second.iter().all(|f| f.timestamp > watermark));
    }

    #[test]
    fn test_double_start_is_a_noop() {
        let mut e = engine();
        e.start();
        e.start();
        e.stop();
    }
}
