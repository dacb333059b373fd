//! Single-threaded cooperative orchestrator tying the rest of this crate
//! together: drains the poller, advances every cabin's FSM, and for each
//! PROCESSING cabin runs feature extraction, inference, persistence,
//! write-back, and alarm push, before resetting it.
//!
//! Runs on the foreground thread (the daemon's `main.rs` drives
//! [`ProcessingLoop::run_once`] in a loop); [`FsmManager`] and
//! [`InferenceAdapter`] are still wrapped in a `Mutex` because the health
//! checker's background thread also reads them (stuck-cabin and
//! model-loaded probes).

use ldpj_common::{FeatureMode, LatencyMetrics, MetricsSnapshot, RuntimeConfig};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

use crate::alarm::AlarmPusher;
use crate::faults::FaultReporter;
use crate::features::{compute_features, features_to_vector};
use crate::fsm::{CabinState, FsmManager};
use crate::inference::InferenceAdapter;
use crate::polling::PollingHandle;
use crate::result_sender::ResultSender;
use ldpj_storage::{NewTestRecord, RecordStore};

/// One cabin's state and point count, for [`LoopDiagnostics`].
#[derive(Debug, Clone)]
pub struct CabinDiagnostic {
    /// Cabin index.
    pub cabin_index: usize,
    /// Current FSM state, as its display name.
    pub state: String,
    /// Points accumulated in the current (or just-completed) cycle.
    pub points: usize,
}

/// Structured snapshot returned by [`ProcessingLoop::get_diagnostics`].
#[derive(Debug, Clone)]
pub struct LoopDiagnostics {
    /// Whether the loop is currently running.
    pub running: bool,
    /// Whether the loop is currently paused.
    pub paused: bool,
    /// Advisory watchdog flag.
    pub watchdog: bool,
    /// Classification threshold in effect.
    pub threshold: f64,
    /// Feature vector mode in effect.
    pub feature_mode: FeatureMode,
    /// Watermark used for the next drain.
    pub last_poll_ts: f64,
    /// Current poller ring-buffer occupancy.
    pub poller_buffer: usize,
    /// Poller total poll count.
    pub poller_total_polls: u64,
    /// Poller error count.
    pub poller_errors: u64,
    /// Poller reconnect count.
    pub poller_reconnects: u64,
    /// Per-cabin state snapshot.
    pub cabin_states: Vec<CabinDiagnostic>,
    /// Whether an inference model is currently loaded.
    pub model_loaded: bool,
    /// Loaded model's version string, empty if none.
    pub model_version: String,
    /// Recent inference latency histogram snapshot.
    pub latency: MetricsSnapshot,
}

/// Ties together the poller, FSM manager, inference adapter, record store,
/// result sender, alarm pusher, and fault reporter into the main control
/// loop.
pub struct ProcessingLoop {
    threshold: f64,
    feature_mode: FeatureMode,
    loop_interval: std::time::Duration,

    poller: PollingHandle,
    fsm: Arc<Mutex<FsmManager>>,
    inference: Arc<Mutex<InferenceAdapter>>,
    store: Arc<RecordStore>,
    sender: ResultSender,
    alarm: Arc<AlarmPusher>,
    reporter: Arc<FaultReporter>,
    latency: Arc<Mutex<LatencyMetrics>>,

    running: AtomicBool,
    paused: AtomicBool,
    watchdog: AtomicBool,
    last_poll_ts: f64,
}

impl ProcessingLoop {
    /// Build an orchestrator, not yet started.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cfg: RuntimeConfig,
        poller: PollingHandle,
        fsm: Arc<Mutex<FsmManager>>,
        inference: Arc<Mutex<InferenceAdapter>>,
        store: Arc<RecordStore>,
        sender: ResultSender,
        alarm: Arc<AlarmPusher>,
        reporter: Arc<FaultReporter>,
        latency: Arc<Mutex<LatencyMetrics>>,
    ) -> Self {
        Self {
            threshold: cfg.threshold,
            feature_mode: cfg.feature_mode,
            loop_interval: cfg.loop_interval,
            poller,
            fsm,
            inference,
            store,
            sender,
            alarm,
            reporter,
            latency,
            running: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            watchdog: AtomicBool::new(true),
            last_poll_ts: 0.0,
        }
    }

    /// Mark the loop running (idempotent), also clearing `paused`.
    pub fn start(&self) {
        self.running.store(true, Ordering::SeqCst);
        self.paused.store(false, Ordering::SeqCst);
        info!("processing loop started");
    }

    /// Mark the loop stopped.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        info!("processing loop stopped");
    }

    /// Pause processing without stopping the loop.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        info!("processing loop paused");
    }

    /// Resume processing.
    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        info!("processing loop resumed");
    }

    /// Flip the advisory watchdog flag, returning its new value.
    pub fn toggle_watchdog(&self) -> bool {
        let new_value = !self.watchdog.load(Ordering::SeqCst);
        self.watchdog.store(new_value, Ordering::SeqCst);
        info!(watchdog = new_value, "watchdog toggled");
        new_value
    }

    /// Apply a reloaded classification threshold, taking effect on the next
    /// iteration.
    pub fn set_threshold(&mut self, threshold: f64) {
        info!(old = self.threshold, new = threshold, "classification threshold reloaded");
        self.threshold = threshold;
    }

    /// Apply a reloaded feature vector ordering mode, taking effect on the
    /// next iteration.
    pub fn set_feature_mode(&mut self, feature_mode: FeatureMode) {
        info!(old = ?self.feature_mode, new = ?feature_mode, "feature mode reloaded");
        self.feature_mode = feature_mode;
    }

    /// Whether the loop is currently running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Whether the loop is currently paused.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Run one iteration: drain, advance FSMs, process PROCESSING cabins,
    /// handle FAULT cabins. Always sleeps `loop_interval` before returning,
    /// including while paused or stopped.
    pub fn run_once(&mut self) {
        if self.running.load(Ordering::SeqCst) && !self.paused.load(Ordering::SeqCst) {
            self.feed_fsm();

            let (processing, faulted) = {
                let fsm = self.fsm.lock().expect("fsm mutex poisoned");
                (
                    fsm.indices_in_state(CabinState::Processing),
                    fsm.indices_in_state(CabinState::Fault),
                )
            };

            for cabin_index in processing {
                self.process_cabin(cabin_index);
            }
            for cabin_index in faulted {
                self.handle_fault(cabin_index);
            }

            if let Err(e) = self.sender.write_fault_code(self.reporter.get_highest_plc_value()) {
                warn!(error = %e, "fault code write-back failed");
            }
        }
        std::thread::sleep(self.loop_interval);
    }

    fn feed_fsm(&mut self) {
        let frames = self.poller.drain_frames_since(self.last_poll_ts);
        if frames.is_empty() {
            return;
        }
        let mut fsm = self.fsm.lock().expect("fsm mutex poisoned");
        for frame in &frames {
            fsm.update_all(&frame.cabins);
        }
        drop(fsm);
        self.last_poll_ts = frames.last().expect("checked non-empty above").timestamp;
    }

    fn process_cabin(&mut self, cabin_index: usize) {
        let data = {
            let fsm = self.fsm.lock().expect("fsm mutex poisoned");
            match fsm.get(cabin_index) {
                Some(f) => f.harvest(),
                None => return,
            }
        };

        if data.point_count() < 2 {
            warn!(cabin_index, points = data.point_count(), "insufficient data, skipping");
            self.reset_cabin(cabin_index);
            return;
        }

        let t0 = std::time::Instant::now();
        let feats = compute_features(&data.pressures, cabin_index as i64);
        let vector = features_to_vector(&feats, self.feature_mode);

        let (label, probability, confidence) = {
            let inference = self.inference.lock().expect("inference mutex poisoned");
            if inference.is_loaded() {
                match inference.predict(&vector, self.threshold) {
                    Ok(r) => (r.label, r.probability, r.confidence),
                    Err(e) => {
                        warn!(cabin_index, error = %e, "inference failed, degrading");
                        (-1, 0.0, 0.0)
                    }
                }
            } else {
                warn!(cabin_index, "model not loaded, skipping inference");
                (-1, 0.0, 0.0)
            }
        };
        let model_version = self.model_version();

        let elapsed = t0.elapsed();
        let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
        self.latency.lock().expect("latency mutex poisoned").record(elapsed);

        let duration_s = if data.timestamps.len() > 1 {
            data.timestamps[data.timestamps.len() - 1] - data.timestamps[0]
        } else {
            0.0
        };

        let record = NewTestRecord {
            batch_id: String::new(),
            cavity_id: cabin_index as i64,
            timestamp: ldpj_common::local_timestamp(),
            pressure_data: serde_json::to_string(&data.pressures).unwrap_or_default(),
            angle_data: serde_json::to_string(&data.angles).ok(),
            ai_data: serde_json::to_string(&data.analog).ok(),
            position_data: serde_json::to_string(&data.positions).ok(),
            features: serde_json::to_string(&feats).ok(),
            label: i64::from(label),
            probability,
            confidence,
            model_version: model_version.clone(),
            duration_s,
            point_count: data.point_count() as i64,
        };
        if let Err(e) = self.store.log_record(record) {
            warn!(cabin_index, error = %e, "database logging failed");
            self.reporter.raise_fault("F006", &format!("database write failed: {e}"));
        }

        if let Err(e) = self.sender.write_result(label, probability) {
            warn!(cabin_index, error = %e, "PLC write-back failed");
        }

        if label == 0 {
            self.alarm.push_leak_alarm(cabin_index, probability);
        }

        let label_str = match label {
            1 => "OK",
            0 => "LEAK",
            _ => "N/A",
        };
        info!(
            cabin_index,
            label_str,
            probability,
            confidence,
            points = data.point_count(),
            elapsed_ms,
            "cycle processed"
        );

        self.reset_cabin(cabin_index);
    }

    fn handle_fault(&mut self, cabin_index: usize) {
        warn!(cabin_index, "cabin in FAULT state, resetting");
        self.reporter
            .raise_fault("F009", &format!("cabin {cabin_index} state machine fault"));
        if let Some(fsm) = self.fsm.lock().expect("fsm mutex poisoned").get_mut(cabin_index) {
            fsm.clear_fault();
        }
    }

    fn reset_cabin(&mut self, cabin_index: usize) {
        if let Some(fsm) = self.fsm.lock().expect("fsm mutex poisoned").get_mut(cabin_index) {
            fsm.reset();
        }
    }

    fn model_version(&self) -> String {
        self.inference
            .lock()
            .expect("inference mutex poisoned")
            .version()
            .to_string()
    }

    /// A structured snapshot of the loop's internal state, for the command
    /// controller's diagnostics output.
    #[must_use]
    pub fn get_diagnostics(&self) -> LoopDiagnostics {
        let fsm = self.fsm.lock().expect("fsm mutex poisoned");
        let cabin_states = fsm
            .iter()
            .map(|f| CabinDiagnostic {
                cabin_index: f.cabin_index(),
                state: f.state().to_string(),
                points: f.point_count(),
            })
            .collect();
        drop(fsm);

        let inference = self.inference.lock().expect("inference mutex poisoned");
        LoopDiagnostics {
            running: self.running.load(Ordering::SeqCst),
            paused: self.paused.load(Ordering::SeqCst),
            watchdog: self.watchdog.load(Ordering::SeqCst),
            threshold: self.threshold,
            feature_mode: self.feature_mode,
            last_poll_ts: self.last_poll_ts,
            poller_buffer: self.poller.buffer_length(),
            poller_total_polls: self.poller.total_polls(),
            poller_errors: self.poller.error_count(),
            poller_reconnects: self.poller.reconnect_count(),
            cabin_states,
            model_loaded: inference.is_loaded(),
            model_version: inference.version().to_string(),
            latency: self.latency.lock().expect("latency mutex poisoned").snapshot(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ldpj_common::{
        CabinArrayConfig, ConnectionConfig, CycleDetectionConfig, FaultWriteConfig, PollingConfig,
        WriteBackConfig,
    };
    use ldpj_transport::{MockTransport, PlcTransport};

    fn cycle_cfg() -> CycleDetectionConfig {
        CycleDetectionConfig {
            start_pressure_drop: 50.0,
            end_pressure_rise: 50.0,
            min_collection_points: 2,
            max_collection_points: 3000,
            max_collection_duration_s: 45.0,
            collection_timeout_s: 60.0,
            idle_pressure_min: 0.0,
        }
    }

    fn build_loop(dir: &std::path::Path) -> ProcessingLoop {
        let transport: Arc<Mutex<Box<dyn PlcTransport>>> =
            Arc::new(Mutex::new(Box::new(MockTransport::new(1))));
        let mut engine = crate::polling::PollingEngine::new(
            Arc::clone(&transport),
            PollingConfig {
                interval: std::time::Duration::from_millis(5),
                buffer_size: 8,
            },
            CabinArrayConfig {
                db_number: 9,
                start_offset: 0,
                cabin_count: 1,
                cabin_size_bytes: 12,
            },
            ConnectionConfig::default(),
        );
        let handle = engine.handle();
        engine.start();
        std::thread::sleep(std::time::Duration::from_millis(20));
        engine.stop();

        let fsm = Arc::new(Mutex::new(FsmManager::new(1, cycle_cfg())));
        let inference = Arc::new(Mutex::new(InferenceAdapter::new()));
        let store = Arc::new(RecordStore::open(&dir.join("test.db")).unwrap());
        let sender = ResultSender::new(
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
        );
        let alarm = Arc::new(AlarmPusher::new(ldpj_common::AlarmPusherConfig::default()));
        let reporter = Arc::new(FaultReporter::new());
        let latency = Arc::new(Mutex::new(LatencyMetrics::new(
            100,
            std::time::Duration::from_millis(200),
        )));

        ProcessingLoop::new(
            RuntimeConfig::default(),
            handle,
            fsm,
            inference,
            store,
            sender,
            alarm,
            reporter,
            latency,
        )
    }

    #[test]
    fn test_lifecycle_flags() {
        let dir = tempfile::tempdir().unwrap();
        let looper = build_loop(dir.path());
        assert!(!looper.is_running());
        looper.start();
        assert!(looper.is_running());
        looper.pause();
        assert!(looper.is_paused());
        looper.resume();
        assert!(!looper.is_paused());
        looper.stop();
        assert!(!looper.is_running());
    }

    #[test]
    fn test_toggle_watchdog_flips_value() {
        let dir = tempfile::tempdir().unwrap();
        let looper = build_loop(dir.path());
        let first = looper.toggle_watchdog();
        let second = looper.toggle_watchdog();
        assert_ne!(first, second);
    }

    #[test]
    fn test_set_threshold_and_feature_mode_reflected_in_diagnostics() {
        let dir = tempfile::tempdir().unwrap();
        let mut looper = build_loop(dir.path());
        looper.set_threshold(0.7);
        looper.set_feature_mode(FeatureMode::SixDim);
        let diag = looper.get_diagnostics();
        assert_eq!(diag.threshold, 0.7);
        assert_eq!(diag.feature_mode, FeatureMode::SixDim);
    }

    #[test]
    fn test_run_once_while_stopped_does_not_panic() {
        let dir = tempfile::tempdir().unwrap();
        let mut looper = build_loop(dir.path());
        looper.run_once();
    }

    #[test]
    fn test_process_cabin_insufficient_points_is_skipped_not_logged() {
        let dir = tempfile::tempdir().unwrap();
        let mut looper = build_loop(dir.path());
        looper.start();
        {
            let mut fsm = looper.fsm.lock().unwrap();
            fsm.get_mut(0).unwrap().update(&ldpj_transport::CabinFrame {
                cabin_index: 0,
                analog: 0,
                pressure: 1000.0,
                position: 0,
                angle: 0.0,
                timestamp: 0.0,
            });
            fsm.get_mut(0).unwrap().update(&ldpj_transport::CabinFrame {
                cabin_index: 0,
                analog: 0,
                pressure: 940.0,
                position: 0,
                angle: 0.0,
                timestamp: 0.1,
            });
        }
        looper.process_cabin(0);
        assert_eq!(looper.store.count_records().unwrap(), 0);
    }

    #[test]
    fn test_get_diagnostics_reports_cabin_states() {
        let dir = tempfile::tempdir().unwrap();
        let looper = build_loop(dir.path());
        let diag = looper.get_diagnostics();
        assert_eq!(diag.cabin_states.len(), 1);
        assert!(!diag.model_loaded);
    }
}
