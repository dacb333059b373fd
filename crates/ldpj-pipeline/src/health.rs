//! Periodic self-diagnosis: runs a fixed set of probes against the rest of
//! the system, raising or resolving the matching fault code on each tick.
//!
//! The checker holds no direct references to the polling engine, model, or
//! FSM manager -- it is handed a [`HealthProbeSources`] bundle of closures
//! at construction, one per probe, so this crate stays free of a dependency
//! on exactly how those components are wired together by the daemon.

use ldpj_common::{FaultLevel, HealthConfig};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use tracing::{debug, error};

use crate::faults::FaultReporter;

/// Outcome of one probe execution.
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeStatus {
    /// The probe ran and the underlying condition is healthy.
    Ok,
    /// The probe ran and raised its fault.
    Failing,
    /// The probe is disabled by configuration.
    Skipped,
    /// The probe's check closure panicked; caught and reported, never
    /// propagated to the checker's background thread.
    Error(String),
}

/// One probe's result, alongside the name used for the field it checks.
#[derive(Debug, Clone)]
pub struct ProbeReport {
    /// Probe name, e.g. `"plc_connection"`.
    pub name: &'static str,
    /// Outcome of this run.
    pub status: ProbeStatus,
    /// Free-text detail, e.g. a measured value.
    pub detail: String,
}

/// Structured result of [`HealthChecker::run_all_checks`].
#[derive(Debug, Clone)]
pub struct HealthReport {
    /// Per-probe results, in registration order.
    pub probes: Vec<ProbeReport>,
    /// `true` iff any active fault is CRITICAL (mirrors the fault
    /// reporter's own `has_critical`).
    pub degraded: bool,
}

/// Construction-time bundle of accessors the checker's probes read from.
/// Each field is an `Arc`-wrapped closure so the daemon can compose
/// whatever locking or atomics its component wiring needs without this
/// crate knowing about it.
#[derive(Clone)]
pub struct HealthProbeSources {
    /// Whether the PLC transport currently reports itself connected.
    pub plc_connected: Arc<dyn Fn() -> bool + Send + Sync>,
    /// Whether the polling engine's background worker is still running.
    pub poller_alive: Arc<dyn Fn() -> bool + Send + Sync>,
    /// Whether an inference model is currently loaded.
    pub model_loaded: Arc<dyn Fn() -> bool + Send + Sync>,
    /// Most recently observed inference latency, milliseconds. Deliberately
    /// the last sample, not a windowed mean: a single spike must trip F004
    /// even if the surrounding window stays healthy.
    pub last_inference_latency_ms: Arc<dyn Fn() -> Option<f64> + Send + Sync>,
    /// Cabin indices currently stuck COLLECTING past the configured
    /// threshold.
    pub stuck_cabins: Arc<dyn Fn(f64) -> Vec<usize> + Send + Sync>,
    /// Current on-disk size of the record store, megabytes.
    pub db_size_mb: Arc<dyn Fn() -> f64 + Send + Sync>,
    /// Path whose filesystem is probed for free space (F005).
    pub disk_probe_path: std::path::PathBuf,
}

/// Hard-coded database-size ceiling for the store probe (F007); not
/// configurable, per the system's design notes.
const DB_SIZE_LIMIT_MB: f64 = 450.0;

struct Shared {
    running: AtomicBool,
    last_report: Mutex<HealthReport>,
}

/// Background worker that runs every configured probe on a fixed interval,
/// reporting into a [`FaultReporter`].
pub struct HealthChecker {
    cfg: HealthConfig,
    reporter: Arc<FaultReporter>,
    sources: HealthProbeSources,
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl HealthChecker {
    /// Build a checker, not yet started.
    #[must_use]
    pub fn new(cfg: HealthConfig, reporter: Arc<FaultReporter>, sources: HealthProbeSources) -> Self {
        Self {
            cfg,
            reporter,
            sources,
            shared: Arc::new(Shared {
                running: AtomicBool::new(false),
                last_report: Mutex::new(HealthReport {
                    probes: Vec::new(),
                    degraded: false,
                }),
            }),
            handle: None,
        }
    }

    /// Start the background tick loop. A no-op if disabled by config or
    /// already running.
    pub fn start(&mut self) {
        if !self.cfg.enabled || self.shared.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let shared = Arc::clone(&self.shared);
        let reporter = Arc::clone(&self.reporter);
        let sources = self.sources.clone();
        let checks = self.cfg.checks;
        let interval = self.cfg.check_interval;

        self.handle = Some(std::thread::spawn(move || {
            while shared.running.load(Ordering::SeqCst) {
                let report = run_all_checks(&reporter, &sources, checks);
                *shared.last_report.lock().expect("health report mutex poisoned") = report;
                std::thread::sleep(interval);
            }
            debug!("health checker loop exited");
        }));
    }

    /// Stop the background loop and join it, bounded by a generous sleep
    /// multiple so a slow probe iteration still honors shutdown.
    pub fn stop(&mut self) {
        self.shared.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("health checker thread panicked during shutdown");
            }
        }
    }

    /// Run every enabled probe once, synchronously, and return the report.
    /// Callable on demand (e.g. by the command controller's `h` command)
    /// independent of the background tick cadence.
    #[must_use]
    pub fn run_all_checks(&self) -> HealthReport {
        run_all_checks(&self.reporter, &self.sources, self.cfg.checks)
    }

    /// The most recent report produced by the background loop, if it has
    /// run at least once.
    #[must_use]
    pub fn last_report(&self) -> HealthReport {
        self.shared
            .last_report
            .lock()
            .expect("health report mutex poisoned")
            .clone()
    }
}

fn run_all_checks(
    reporter: &FaultReporter,
    sources: &HealthProbeSources,
    checks: ldpj_common::HealthChecksConfig,
) -> HealthReport {
    let probes = vec![
        run_probe("plc_connection", checks.plc_connection_enabled, || {
            check_plc(reporter, sources)
        }),
        run_probe("model_loaded", checks.model_loaded_enabled, || {
            check_model(reporter, sources)
        }),
        run_probe("disk_space", checks.disk_space_enabled, || {
            check_disk(reporter, sources, checks.min_free_disk_mb)
        }),
        run_probe("inference_latency", checks.inference_latency_enabled, || {
            check_latency(reporter, sources, checks.max_inference_latency_ms)
        }),
        run_probe("polling_thread", checks.polling_thread_enabled, || {
            check_poller(reporter, sources)
        }),
        run_probe("fsm_stuck", checks.fsm_stuck_enabled, || {
            check_fsm(reporter, sources, checks.max_stuck_duration_s)
        }),
        run_probe("database", checks.database_enabled, || {
            check_database(reporter, sources)
        }),
    ];

    HealthReport {
        degraded: reporter.has_critical(),
        probes,
    }
}

fn run_probe(
    name: &'static str,
    enabled: bool,
    check: impl FnOnce() -> (ProbeStatus, String),
) -> ProbeReport {
    if !enabled {
        return ProbeReport {
            name,
            status: ProbeStatus::Skipped,
            detail: String::new(),
        };
    }
    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(check)) {
        Ok((status, detail)) => ProbeReport { name, status, detail },
        Err(_) => ProbeReport {
            name,
            status: ProbeStatus::Error("probe panicked".to_string()),
            detail: String::new(),
        },
    }
}

fn check_plc(reporter: &FaultReporter, sources: &HealthProbeSources) -> (ProbeStatus, String) {
    let connected = (sources.plc_connected)();
    if connected {
        reporter.resolve_fault("F001");
        (ProbeStatus::Ok, "connected".into())
    } else {
        reporter.raise_fault("F001", "PLC connection lost");
        (ProbeStatus::Failing, "not connected".into())
    }
}

fn check_model(reporter: &FaultReporter, sources: &HealthProbeSources) -> (ProbeStatus, String) {
    let loaded = (sources.model_loaded)();
    if loaded {
        reporter.resolve_fault("F002");
        (ProbeStatus::Ok, "loaded".into())
    } else {
        reporter.raise_fault("F002", "AI model not loaded");
        (ProbeStatus::Failing, "not loaded".into())
    }
}

fn check_disk(
    reporter: &FaultReporter,
    sources: &HealthProbeSources,
    min_free_mb: f64,
) -> (ProbeStatus, String) {
    match free_disk_mb(&sources.disk_probe_path) {
        Ok(free_mb) => {
            if free_mb >= min_free_mb {
                reporter.resolve_fault("F005");
                (ProbeStatus::Ok, format!("{free_mb:.0}MB free"))
            } else {
                reporter.raise_fault(
                    "F005",
                    &format!("disk free {free_mb:.0}MB below {min_free_mb:.0}MB threshold"),
                );
                (ProbeStatus::Failing, format!("{free_mb:.0}MB free"))
            }
        }
        Err(e) => (ProbeStatus::Error(e), String::new()),
    }
}

#[cfg(unix)]
fn free_disk_mb(path: &std::path::Path) -> Result<f64, String> {
    use nix::sys::statvfs::statvfs;
    let probe_path = if path.as_os_str().is_empty() {
        std::path::Path::new(".")
    } else {
        path
    };
    let stat = statvfs(probe_path).map_err(|e| e.to_string())?;
    let free_bytes = stat.blocks_available() as f64 * stat.fragment_size() as f64;
    Ok(free_bytes / (1024.0 * 1024.0))
}

#[cfg(not(unix))]
fn free_disk_mb(_path: &std::path::Path) -> Result<f64, String> {
    Ok(f64::MAX)
}

fn check_latency(
    reporter: &FaultReporter,
    sources: &HealthProbeSources,
    max_ms: f64,
) -> (ProbeStatus, String) {
    let Some(last_ms) = (sources.last_inference_latency_ms)() else {
        reporter.resolve_fault("F004");
        return (ProbeStatus::Ok, "no inference yet".into());
    };
    if last_ms <= max_ms {
        reporter.resolve_fault("F004");
        (ProbeStatus::Ok, format!("{last_ms:.1}ms"))
    } else {
        reporter.raise_fault(
            "F004",
            &format!("inference latency {last_ms:.1}ms exceeds {max_ms:.1}ms"),
        );
        (ProbeStatus::Failing, format!("{last_ms:.1}ms"))
    }
}

fn check_poller(reporter: &FaultReporter, sources: &HealthProbeSources) -> (ProbeStatus, String) {
    let alive = (sources.poller_alive)();
    if alive {
        reporter.resolve_fault("F008");
        (ProbeStatus::Ok, "running".into())
    } else {
        reporter.raise_fault("F008", "polling worker terminated abnormally");
        (ProbeStatus::Failing, "not running".into())
    }
}

fn check_fsm(
    reporter: &FaultReporter,
    sources: &HealthProbeSources,
    max_stuck_duration_s: f64,
) -> (ProbeStatus, String) {
    let stuck = (sources.stuck_cabins)(max_stuck_duration_s);
    if stuck.is_empty() {
        reporter.resolve_fault("F009");
        (ProbeStatus::Ok, "no cabin stuck".into())
    } else {
        reporter.raise_fault("F009", &format!("cabins stuck COLLECTING: {stuck:?}"));
        (ProbeStatus::Failing, format!("{stuck:?}"))
    }
}

fn check_database(reporter: &FaultReporter, sources: &HealthProbeSources) -> (ProbeStatus, String) {
    let size_mb = (sources.db_size_mb)();
    if size_mb > DB_SIZE_LIMIT_MB {
        reporter.raise_fault(
            "F007",
            &format!("database size {size_mb:.0}MB approaching {DB_SIZE_LIMIT_MB:.0}MB limit"),
        );
        (ProbeStatus::Failing, format!("{size_mb:.1}MB"))
    } else {
        reporter.resolve_fault("F007");
        (ProbeStatus::Ok, format!("{size_mb:.1}MB"))
    }
}

/// Whether a fault level meets or exceeds `min`, used by the alarm pusher's
/// push-gate; kept here so both share one severity ordering (see
/// [`ldpj_common::FaultLevel`]'s derived `Ord`).
#[must_use]
pub fn level_meets(level: FaultLevel, min: FaultLevel) -> bool {
    level >= min
}
