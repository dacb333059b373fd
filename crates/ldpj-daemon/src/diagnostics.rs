//! Aggregated status snapshot for the periodic status line logged by the
//! main loop (`runtime.status_log_interval` apart, see `main.rs`).
//!
//! Combines the processing loop's own diagnostics with the health
//! checker's last report and the fault reporter's active-fault summary
//! into one structure, matching what the original REPL's `h`/`d` commands
//! printed side by side on demand.

use ldpj_pipeline::{FaultSummary, HealthReport, LoopDiagnostics};
use serde::Serialize;

/// Combined snapshot of loop state, health probes, and active faults.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    /// Whether the processing loop is running.
    pub running: bool,
    /// Whether the processing loop is paused.
    pub paused: bool,
    /// Advisory watchdog flag.
    pub watchdog: bool,
    /// Whether an inference model is currently loaded.
    pub model_loaded: bool,
    /// Loaded model's version string, empty if none.
    pub model_version: String,
    /// Current poller ring-buffer occupancy.
    pub poller_buffer: usize,
    /// Poller total poll count.
    pub poller_total_polls: u64,
    /// Poller error count.
    pub poller_errors: u64,
    /// Poller reconnect count.
    pub poller_reconnects: u64,
    /// Number of cabins currently tracked by the FSM manager.
    pub cabin_count: usize,
    /// `true` iff any active fault is CRITICAL.
    pub degraded: bool,
    /// Number of currently active faults.
    pub active_fault_count: usize,
    /// Total faults ever raised, including resolved ones.
    pub fault_history_count: usize,
    /// Per-probe outcomes from the most recent health sweep.
    pub probe_names_failing: Vec<String>,
    /// Mean inference latency over the recent window, milliseconds.
    pub avg_inference_latency_ms: Option<f64>,
    /// Maximum inference latency over the recent window, milliseconds.
    pub max_inference_latency_ms: Option<f64>,
}

/// Build a [`StatusReport`] from the three collaborators' own snapshots.
#[must_use]
pub fn build_status_report(
    loop_diag: &LoopDiagnostics,
    health: &HealthReport,
    faults: &FaultSummary,
) -> StatusReport {
    let probe_names_failing = health
        .probes
        .iter()
        .filter(|p| matches!(p.status, ldpj_pipeline::ProbeStatus::Failing))
        .map(|p| p.name.to_string())
        .collect();

    StatusReport {
        running: loop_diag.running,
        paused: loop_diag.paused,
        watchdog: loop_diag.watchdog,
        model_loaded: loop_diag.model_loaded,
        model_version: loop_diag.model_version.clone(),
        poller_buffer: loop_diag.poller_buffer,
        poller_total_polls: loop_diag.poller_total_polls,
        poller_errors: loop_diag.poller_errors,
        poller_reconnects: loop_diag.poller_reconnects,
        cabin_count: loop_diag.cabin_states.len(),
        degraded: health.degraded,
        active_fault_count: faults.active.len(),
        fault_history_count: faults.history_count,
        probe_names_failing,
        avg_inference_latency_ms: loop_diag.latency.mean_ns.map(|ns| ns as f64 / 1_000_000.0),
        max_inference_latency_ms: loop_diag.latency.max_ns.map(|ns| ns as f64 / 1_000_000.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ldpj_common::{FeatureMode, MetricsSnapshot};
    use ldpj_pipeline::{CabinDiagnostic, ProbeReport, ProbeStatus};

    fn loop_diag() -> LoopDiagnostics {
        LoopDiagnostics {
            running: true,
            paused: false,
            watchdog: true,
            threshold: 0.3,
            feature_mode: FeatureMode::SevenDim,
            last_poll_ts: 1.0,
            poller_buffer: 2,
            poller_total_polls: 10,
            poller_errors: 0,
            poller_reconnects: 0,
            cabin_states: vec![CabinDiagnostic {
                cabin_index: 0,
                state: "IDLE".to_string(),
                points: 0,
            }],
            model_loaded: true,
            model_version: "v1".to_string(),
            latency: MetricsSnapshot {
                total_count: 5,
                min_ns: Some(1_000_000),
                max_ns: Some(3_000_000),
                mean_ns: Some(2_000_000),
                overrun_count: 0,
                sample_count: 5,
                last_ns: Some(3_000_000),
            },
        }
    }

    #[test]
    fn test_build_status_report_flags_failing_probes() {
        let health = HealthReport {
            degraded: true,
            probes: vec![
                ProbeReport {
                    name: "plc_connection",
                    status: ProbeStatus::Failing,
                    detail: "not connected".to_string(),
                },
                ProbeReport {
                    name: "model_loaded",
                    status: ProbeStatus::Ok,
                    detail: "loaded".to_string(),
                },
            ],
        };
        let faults = FaultSummary {
            active: Vec::new(),
            history_count: 3,
            has_critical: true,
        };
        let report = build_status_report(&loop_diag(), &health, &faults);
        assert!(report.degraded);
        assert_eq!(report.probe_names_failing, vec!["plc_connection".to_string()]);
        assert_eq!(report.fault_history_count, 3);
        assert_eq!(report.cabin_count, 1);
        assert_eq!(report.avg_inference_latency_ms, Some(2.0));
        assert_eq!(report.max_inference_latency_ms, Some(3.0));
    }
}
