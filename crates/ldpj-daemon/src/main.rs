//! Leak-detection edge backend daemon entry point.
//!
//! Wires the PLC transport, polling engine, per-cabin FSM fleet, inference
//! adapter, record store, result sender, alarm pusher, fault reporter, and
//! health checker into the processing loop described by the top-level
//! design, then drives that loop on the foreground thread until a shutdown
//! signal arrives.

mod diagnostics;
mod signals;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use ldpj_common::{local_timestamp, monotonic_secs, LatencyMetrics, LdpjConfig};
use ldpj_pipeline::{
    AlarmPusher, FaultReporter, FsmManager, HealthChecker, HealthProbeSources, InferenceAdapter,
    PollingEngine, ProcessingLoop, ResultSender,
};
use ldpj_storage::RecordStore;
use ldpj_transport::{MockTransport, PlcTransport, S7Transport};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};

use crate::signals::SignalHandler;

/// PLC transport selector, the one CLI flag this daemon exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum TransportMode {
    /// Real S7-style TCP transport.
    S7,
    /// Synthetic, always-connected transport for offline development.
    Mock,
}

/// Leak-detection edge backend command-line arguments.
#[derive(Parser, Debug)]
#[command(
    name = "ldpj-daemon",
    about = "Leak-detection edge backend - real-time cycle detection and classification",
    version,
    long_about = None
)]
struct Args {
    /// Which PLC transport to use.
    #[arg(long, value_enum, default_value_t = TransportMode::Mock)]
    mode: TransportMode,

    /// Path to a configuration file (TOML). Missing or malformed files
    /// fall back to built-in defaults.
    #[arg(long, short = 'c', value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override the configured `EnvFilter` logging directive, e.g.
    /// `debug` or `ldpj_pipeline=debug,warn`.
    #[arg(long, value_name = "DIRECTIVE")]
    log_level: Option<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let (mut config, config_path) = load_config(args.config.as_deref());
    if let Some(level) = args.log_level.clone() {
        config.logging.level = level;
    }

    init_logging(&config.logging);
    info!(version = env!("CARGO_PKG_VERSION"), mode = ?args.mode, "starting leak-detection backend");

    let signal_handler = SignalHandler::new().context("failed to install signal handlers")?;

    run_daemon(&config, config_path.as_deref(), args.mode, &signal_handler)
}

/// Resolve the effective config, along with the path it came from (if any)
/// so a later SIGHUP can re-read the same file.
fn load_config(path: Option<&std::path::Path>) -> (LdpjConfig, Option<PathBuf>) {
    match path {
        Some(p) => (LdpjConfig::from_file_or_default(p), Some(p.to_path_buf())),
        None => {
            let default_path = PathBuf::from("config/default.toml");
            if default_path.exists() {
                let config = LdpjConfig::from_file_or_default(&default_path);
                (config, Some(default_path))
            } else {
                info!("no config file found, using built-in defaults");
                (LdpjConfig::default(), None)
            }
        }
    }
}

fn init_logging(cfg: &ldpj_common::LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cfg.level.clone()));

    let _ = std::fs::create_dir_all(&cfg.directory);
    let file_appender = tracing_appender::rolling::daily(&cfg.directory, &cfg.file_name_prefix);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    // Leak the guard: the daemon runs for the process lifetime, so there is
    // no later point at which dropping it to flush would be meaningful.
    std::mem::forget(guard);

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);

    if cfg.stdout {
        subscriber
            .with_writer(std::io::stdout.and(file_writer))
            .init();
    } else {
        subscriber.with_writer(file_writer).init();
    }
}

fn build_transport(mode: TransportMode, cfg: &ldpj_common::ConnectionConfig, cabin_count: usize) -> Box<dyn PlcTransport> {
    match mode {
        TransportMode::Mock => {
            info!("using mock PLC transport");
            Box::new(MockTransport::new(cabin_count))
        }
        TransportMode::S7 => {
            let addr = format!("{}:102", cfg.ip)
                .parse()
                .unwrap_or_else(|_| "127.0.0.1:102".parse().expect("static fallback parses"));
            info!(%addr, rack = cfg.rack, slot = cfg.slot, "using S7 PLC transport");
            Box::new(S7Transport::new(ldpj_transport::s7::S7Config {
                addr,
                connect_timeout: Duration::from_secs(3),
                io_timeout: Duration::from_secs(2),
                reconnect_delay: cfg.reconnect_interval,
                max_reconnect_attempts: u32::MAX,
            }))
        }
    }
}

fn run_daemon(
    config: &LdpjConfig,
    config_path: Option<&std::path::Path>,
    mode: TransportMode,
    signals: &SignalHandler,
) -> Result<()> {
    let transport = build_transport(mode, &config.connection, config.cabin_array.cabin_count);
    let transport: Arc<Mutex<Box<dyn PlcTransport>>> = Arc::new(Mutex::new(transport));

    let mut poller = PollingEngine::new(
        Arc::clone(&transport),
        config.polling.clone(),
        config.cabin_array,
        config.connection.clone(),
    );
    let poller_handle = poller.handle();
    poller.start();

    let fsm = Arc::new(Mutex::new(FsmManager::new(
        config.cabin_array.cabin_count,
        config.cycle_detection,
    )));

    let mut inference_adapter = InferenceAdapter::new();
    match inference_adapter.load(&config.model.classifier_path, &config.model.scaler_path) {
        Ok(()) => info!(version = inference_adapter.version(), "inference model loaded"),
        Err(e) => warn!(error = %e, "no inference model loaded at startup, cycles will classify as unavailable"),
    }
    let inference = Arc::new(Mutex::new(inference_adapter));

    let store = Arc::new(
        RecordStore::open(&config.runtime.database.path)
            .with_context(|| format!("failed to open record store at {:?}", config.runtime.database.path))?,
    );

    let sender = ResultSender::new(
        Arc::clone(&transport),
        config.write_back,
        config.fault_write,
    );

    let reporter = Arc::new(FaultReporter::new());

    let mut alarm_pusher = AlarmPusher::new(config.ipc.alarm_pusher.clone());
    {
        let reporter_for_exhaustion = Arc::clone(&reporter);
        alarm_pusher.set_on_exhausted(Arc::new(move |detail: &str| {
            reporter_for_exhaustion.raise_fault("F010", detail);
        }));
    }
    let alarm = Arc::new(alarm_pusher);
    {
        // The alarm pusher is the reporter's one cross-subsystem push: every
        // newly-raised fault above its configured severity gets POSTed out,
        // fired from the pusher's own detached worker thread so raising a
        // fault here never blocks on network I/O.
        let alarm_for_callback = Arc::clone(&alarm);
        reporter.register_callback(Arc::new(move |event: &ldpj_pipeline::FaultEvent| {
            alarm_for_callback.push_alarm(&event.code.mnemonic, &event.message, event.code.level);
        }));
    }

    let latency = Arc::new(Mutex::new(LatencyMetrics::new(
        config.runtime.metrics.histogram_size,
        Duration::from_secs_f64(config.health.checks.max_inference_latency_ms / 1000.0),
    )));

    let mut health_checker = HealthChecker::new(
        config.health.clone(),
        Arc::clone(&reporter),
        health_sources(&poller_handle, &inference, &fsm, &store, &latency),
    );
    health_checker.start();

    let mut processing_loop = ProcessingLoop::new(
        config.runtime.clone(),
        poller_handle,
        Arc::clone(&fsm),
        inference,
        Arc::clone(&store),
        sender,
        alarm,
        Arc::clone(&reporter),
        latency,
    );
    processing_loop.start();

    info!("processing loop entering main cycle");
    let mut last_status_log = monotonic_secs();
    while !signals.shutdown_requested() {
        if signals.take_reload_request() {
            reload_config(config_path, &mut processing_loop);
        }

        processing_loop.run_once();

        let now = monotonic_secs();
        if now - last_status_log >= config.runtime.status_log_interval.as_secs_f64() {
            last_status_log = now;
            log_status(&processing_loop, &health_checker, &reporter);
        }
    }

    shutdown(&mut processing_loop, &mut health_checker, &mut poller, &store);
    Ok(())
}

/// Re-read the config file on SIGHUP and apply the runtime knobs the
/// processing loop can pick up without a full subsystem restart.
fn reload_config(config_path: Option<&std::path::Path>, processing_loop: &mut ProcessingLoop) {
    let Some(path) = config_path else {
        warn!("reload signal received but daemon was started without a config file, ignoring");
        return;
    };
    info!(?path, "reload signal received, re-reading configuration");
    let reloaded = LdpjConfig::from_file_or_default(path);
    processing_loop.set_threshold(reloaded.runtime.threshold);
    processing_loop.set_feature_mode(reloaded.runtime.feature_mode);
}

/// Log a combined status snapshot, mirroring what the original REPL's
/// `h`/`d` commands printed on demand.
fn log_status(processing_loop: &ProcessingLoop, health_checker: &HealthChecker, reporter: &FaultReporter) {
    let report = diagnostics::build_status_report(
        &processing_loop.get_diagnostics(),
        &health_checker.last_report(),
        &reporter.summary(),
    );
    info!(status = ?report, "status");
}

fn health_sources(
    poller: &ldpj_pipeline::PollingHandle,
    inference: &Arc<Mutex<InferenceAdapter>>,
    fsm: &Arc<Mutex<FsmManager>>,
    store: &Arc<RecordStore>,
    latency: &Arc<Mutex<LatencyMetrics>>,
) -> HealthProbeSources {
    let poller_for_connected = poller.clone();
    let poller_for_alive = poller.clone();
    let inference = Arc::clone(inference);
    let fsm = Arc::clone(fsm);
    let store = Arc::clone(store);
    let latency = Arc::clone(latency);

    HealthProbeSources {
        plc_connected: Arc::new(move || poller_for_connected.plc_connected()),
        poller_alive: Arc::new(move || poller_for_alive.is_running()),
        model_loaded: Arc::new(move || inference.lock().expect("inference mutex poisoned").is_loaded()),
        last_inference_latency_ms: Arc::new(move || {
            latency
                .lock()
                .expect("latency mutex poisoned")
                .latest()
                .map(|d| d.as_secs_f64() * 1000.0)
        }),
        stuck_cabins: Arc::new(move |max_duration_s| {
            fsm.lock()
                .expect("fsm mutex poisoned")
                .stuck_cabins(monotonic_secs(), max_duration_s)
        }),
        db_size_mb: Arc::new(move || store.get_db_size_mb()),
        disk_probe_path: std::env::current_dir().unwrap_or_default(),
    }
}

/// Two-step cooperative shutdown: processing loop, then health checker,
/// then polling engine, then record store close.
fn shutdown(
    processing_loop: &mut ProcessingLoop,
    health_checker: &mut HealthChecker,
    poller: &mut PollingEngine,
    store: &RecordStore,
) {
    info!(at = %local_timestamp(), "shutdown signal received, stopping");
    processing_loop.stop();
    health_checker.stop();
    poller.stop();
    store.close();
    info!("shutdown complete");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_default_mode_is_mock() {
        let args = Args::parse_from(["ldpj-daemon"]);
        assert_eq!(args.mode, TransportMode::Mock);
        assert!(args.config.is_none());
        assert!(args.log_level.is_none());
    }

    #[test]
    fn test_args_parses_s7_mode_and_config() {
        let args = Args::parse_from(["ldpj-daemon", "--mode", "s7", "-c", "ldpj.toml"]);
        assert_eq!(args.mode, TransportMode::S7);
        assert_eq!(args.config, Some(PathBuf::from("ldpj.toml")));
    }

    #[test]
    fn test_args_parses_log_level_override() {
        let args = Args::parse_from(["ldpj-daemon", "--log-level", "debug"]);
        assert_eq!(args.log_level, Some("debug".to_string()));
    }

    #[test]
    fn test_load_config_missing_file_falls_back_to_default() {
        let (config, path) = load_config(Some(std::path::Path::new("/nonexistent/ldpj.toml")));
        assert_eq!(config.cabin_array.cabin_count, 25);
        assert_eq!(path, Some(PathBuf::from("/nonexistent/ldpj.toml")));
    }

    #[test]
    fn test_build_transport_mock_is_connected() {
        let transport = build_transport(
            TransportMode::Mock,
            &ldpj_common::ConnectionConfig::default(),
            3,
        );
        assert!(transport.is_connected());
    }
}
