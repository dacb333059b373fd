//! Fault code registry and the deduplicated active-fault reporter.
//!
//! The registry is a fixed table known at build time (F001-F010). The
//! reporter's active set is keyed by mnemonic, holds at most one event per
//! code, and pushes to registered callbacks -- the alarm pusher is wired
//! in as one such callback by the daemon, never called directly from here.

use ldpj_common::{local_timestamp, FaultLevel};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};

/// One entry of the fixed fault registry.
#[derive(Debug, Clone, PartialEq)]
pub struct FaultCode {
    /// Short mnemonic, e.g. `"F001"`.
    pub mnemonic: String,
    /// Numeric value written back to the PLC's fault word.
    pub plc_value: i32,
    /// Severity.
    pub level: FaultLevel,
    /// Human-readable description.
    pub description: String,
}

/// `(mnemonic, plc_value, level, description)` -- registration order
/// matters, it is the tie-break `get_highest_plc_value` uses.
const REGISTRY: &[(&str, i32, FaultLevel, &str)] = &[
    ("F001", 1, FaultLevel::Critical, "PLC connection lost"),
    ("F002", 2, FaultLevel::Critical, "AI model load failed"),
    ("F003", 3, FaultLevel::Error, "Sensor data out of range"),
    ("F004", 4, FaultLevel::Warning, "Inference latency exceeded"),
    ("F005", 5, FaultLevel::Error, "Disk space low"),
    ("F006", 6, FaultLevel::Error, "Database write failed"),
    ("F007", 7, FaultLevel::Warning, "Database size approaching limit"),
    (
        "F008",
        8,
        FaultLevel::Error,
        "Collection thread terminated abnormally",
    ),
    (
        "F009",
        9,
        FaultLevel::Warning,
        "State machine stuck (COLLECTING timeout)",
    ),
    ("F010", 10, FaultLevel::Warning, "Alarm push failed"),
];

/// Look up a fault code by mnemonic. An unrecognized mnemonic yields a
/// generic fault (PLC value 99, ERROR level) rather than panicking.
#[must_use]
pub fn lookup_fault_code(mnemonic: &str) -> FaultCode {
    REGISTRY
        .iter()
        .find(|(m, ..)| *m == mnemonic)
        .map(|(m, plc_value, level, description)| FaultCode {
            mnemonic: (*m).to_string(),
            plc_value: *plc_value,
            level: *level,
            description: (*description).to_string(),
        })
        .unwrap_or_else(|| FaultCode {
            mnemonic: mnemonic.to_string(),
            plc_value: 99,
            level: FaultLevel::Error,
            description: "unrecognized fault code".to_string(),
        })
}

fn registration_index(mnemonic: &str) -> usize {
    REGISTRY
        .iter()
        .position(|(m, ..)| *m == mnemonic)
        .unwrap_or(usize::MAX)
}

/// One raised (and possibly since-resolved) fault occurrence.
#[derive(Debug, Clone)]
pub struct FaultEvent {
    /// The registry entry this event refers to.
    pub code: FaultCode,
    /// Free-text detail supplied by the raiser.
    pub message: String,
    /// Local timestamp of the most recent raise.
    pub raised_at: String,
}

/// Callback invoked whenever a *new* fault is raised (not on a refresh of
/// an already-active one). Must not block: the alarm pusher callback
/// spawns its own worker per call.
pub type FaultCallback = Arc<dyn Fn(&FaultEvent) + Send + Sync>;

/// Structured snapshot returned by [`FaultReporter::summary`].
#[derive(Debug, Clone)]
pub struct FaultSummary {
    /// Currently active events, in registration order.
    pub active: Vec<FaultEvent>,
    /// Total faults ever raised (including resolved ones).
    pub history_count: usize,
    /// Whether any active fault is CRITICAL.
    pub has_critical: bool,
}

#[derive(Default)]
struct Inner {
    active: HashMap<String, FaultEvent>,
    history_count: usize,
    callbacks: Vec<FaultCallback>,
}

/// Deduplicated active-fault set with callback dispatch.
pub struct FaultReporter {
    inner: Mutex<Inner>,
}

impl Default for FaultReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl FaultReporter {
    /// Create an empty reporter with no active faults and no callbacks.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Register a callback invoked on every newly-raised fault.
    pub fn register_callback(&self, callback: FaultCallback) {
        self.inner
            .lock()
            .expect("fault reporter mutex poisoned")
            .callbacks
            .push(callback);
    }

    /// Raise a fault. If `mnemonic` is not already active, creates a new
    /// event, logs at the code's severity, and invokes every registered
    /// callback (callback panics are caught and logged, never propagated).
    /// If already active, only the timestamp is refreshed -- no callback
    /// fires and no new log line is emitted.
    pub fn raise_fault(&self, mnemonic: &str, message: &str) {
        let code = lookup_fault_code(mnemonic);
        let (event, callbacks) = {
            let mut inner = self.inner.lock().expect("fault reporter mutex poisoned");
            if let Some(existing) = inner.active.get_mut(mnemonic) {
                existing.raised_at = local_timestamp();
                return;
            }
            let event = FaultEvent {
                code,
                message: message.to_string(),
                raised_at: local_timestamp(),
            };
            inner.active.insert(mnemonic.to_string(), event.clone());
            inner.history_count += 1;
            (event, inner.callbacks.clone())
        };

        log_fault_raised(&event);

        for callback in callbacks {
            let outcome =
                std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| callback(&event)));
            if outcome.is_err() {
                warn!(mnemonic = %event.code.mnemonic, "fault callback panicked, suppressing");
            }
        }
    }

    /// Resolve a fault, removing it from the active set. A no-op (besides
    /// an absence of log output) if it wasn't active.
    pub fn resolve_fault(&self, mnemonic: &str) {
        let removed = self
            .inner
            .lock()
            .expect("fault reporter mutex poisoned")
            .active
            .remove(mnemonic)
            .is_some();
        if removed {
            info!(mnemonic, "fault resolved");
        }
    }

    /// Whether any active fault has CRITICAL severity.
    #[must_use]
    pub fn has_critical(&self) -> bool {
        self.inner
            .lock()
            .expect("fault reporter mutex poisoned")
            .active
            .values()
            .any(|e| e.code.level == FaultLevel::Critical)
    }

    /// PLC value of the highest-severity active fault, ties broken by
    /// registration order; `0` if no fault is active.
    #[must_use]
    pub fn get_highest_plc_value(&self) -> i32 {
        let inner = self.inner.lock().expect("fault reporter mutex poisoned");
        inner
            .active
            .values()
            .max_by(|a, b| {
                a.code
                    .level
                    .cmp(&b.code.level)
                    .then_with(|| {
                        registration_index(&b.code.mnemonic)
                            .cmp(&registration_index(&a.code.mnemonic))
                    })
            })
            .map_or(0, |e| e.code.plc_value)
    }

    /// A structured snapshot of the active set and history size.
    #[must_use]
    pub fn summary(&self) -> FaultSummary {
        let inner = self.inner.lock().expect("fault reporter mutex poisoned");
        let mut active: Vec<FaultEvent> = inner.active.values().cloned().collect();
        active.sort_by_key(|e| registration_index(&e.code.mnemonic));
        FaultSummary {
            has_critical: active.iter().any(|e| e.code.level == FaultLevel::Critical),
            active,
            history_count: inner.history_count,
        }
    }
}

fn log_fault_raised(event: &FaultEvent) {
    match event.code.level {
        FaultLevel::Info => info!(mnemonic = %event.code.mnemonic, message = %event.message, "fault raised"),
        FaultLevel::Warning => warn!(mnemonic = %event.code.mnemonic, message = %event.message, "fault raised"),
        FaultLevel::Error | FaultLevel::Critical => {
            error!(mnemonic = %event.code.mnemonic, message = %event.message, "fault raised");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_unknown_code_is_generic_not_panicking() {
        let code = lookup_fault_code("F999");
        assert_eq!(code.plc_value, 99);
        assert_eq!(code.level, FaultLevel::Error);
    }

    #[test]
    fn test_raise_dedup_fires_callback_once() {
        let reporter = FaultReporter::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);
        reporter.register_callback(Arc::new(move |_event| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        }));

        reporter.raise_fault("F004", "latency high");
        reporter.raise_fault("F004", "latency high again");

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(reporter.summary().active.len(), 1);
    }

    #[test]
    fn test_raise_f001_sets_critical_and_highest_value() {
        let reporter = FaultReporter::new();
        reporter.raise_fault("F004", "latency high");
        assert!(!reporter.has_critical());

        reporter.raise_fault("F001", "plc link down");
        assert!(reporter.has_critical());
        assert_eq!(reporter.get_highest_plc_value(), 1);
    }

    #[test]
    fn test_resolve_removes_from_active_set() {
        let reporter = FaultReporter::new();
        reporter.raise_fault("F004", "latency high");
        reporter.raise_fault("F004", "latency high");
        reporter.resolve_fault("F004");
        assert!(reporter.summary().active.is_empty());
        assert_eq!(reporter.get_highest_plc_value(), 0);
    }

    #[test]
    fn test_resolve_unknown_is_a_noop() {
        let reporter = FaultReporter::new();
        reporter.resolve_fault("F004");
        assert!(reporter.summary().active.is_empty());
    }

    #[test]
    fn test_at_most_one_event_per_code() {
        let reporter = FaultReporter::new();
        for _ in 0..5 {
            reporter.raise_fault("F007", "db growing");
        }
        assert_eq!(reporter.summary().active.len(), 1);
    }
}
