//! Outbound HTTP alarm push to external IPC systems.
//!
//! Each push is fire-and-forget: `push_alarm` spawns one detached thread
//! per call that POSTs the payload to every configured target in turn,
//! retrying each with a short sleep between attempts. This module never
//! imports [`crate::faults::FaultReporter`] directly -- it is itself
//! registered as one of the reporter's callbacks, so calling back into it
//! here would be a cycle. Instead a caller (the processing loop) may wire
//! an `on_exhausted` closure that it uses to raise F010 on its own terms.

use ldpj_common::{local_timestamp, AlarmPusherConfig, AlarmTarget, FaultLevel};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Invoked from the push worker thread when every retry against a target
/// is exhausted. Must not block.
pub type FailureCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// JSON body POSTed to each alarm target.
#[derive(Debug, Serialize)]
struct AlarmPayload {
    source: &'static str,
    fault_code: String,
    message: String,
    level: &'static str,
    timestamp: String,
}

fn level_name(level: FaultLevel) -> &'static str {
    match level {
        FaultLevel::Info => "INFO",
        FaultLevel::Warning => "WARNING",
        FaultLevel::Error => "ERROR",
        FaultLevel::Critical => "CRITICAL",
    }
}

/// Pushes alarm notifications to configured HTTP targets.
pub struct AlarmPusher {
    cfg: AlarmPusherConfig,
    client: Arc<reqwest::blocking::Client>,
    on_exhausted: Option<FailureCallback>,
}

impl AlarmPusher {
    /// Build a pusher from its configuration section.
    #[must_use]
    pub fn new(cfg: AlarmPusherConfig) -> Self {
        Self {
            cfg,
            client: Arc::new(reqwest::blocking::Client::new()),
            on_exhausted: None,
        }
    }

    /// Register a callback fired (from the push worker thread) when every
    /// retry against a target is exhausted. The daemon wires this to raise
    /// F010 via the fault reporter, keeping that dependency out of this
    /// module.
    pub fn set_on_exhausted(&mut self, callback: FailureCallback) {
        self.on_exhausted = Some(callback);
    }

    /// Whether the pusher is enabled at all.
    #[must_use]
    pub fn enabled(&self) -> bool {
        self.cfg.enabled
    }

    /// Whether `level` meets the configured minimum severity to push.
    #[must_use]
    pub fn should_push(&self, level: FaultLevel) -> bool {
        level >= self.cfg.min_fault_level_to_push
    }

    /// Push a fault event to every configured target, fire-and-forget.
    /// A no-op if disabled or `level` is below the configured minimum.
    pub fn push_alarm(&self, fault_code: &str, message: &str, level: FaultLevel) {
        if !self.cfg.enabled || !self.should_push(level) {
            return;
        }
        let payload = AlarmPayload {
            source: "ldpj_backend",
            fault_code: fault_code.to_string(),
            message: message.to_string(),
            level: level_name(level),
            timestamp: local_timestamp(),
        };
        let targets = self.cfg.targets.clone();
        let client = Arc::clone(&self.client);
        let on_exhausted = self.on_exhausted.clone();
        std::thread::spawn(move || send_to_all(&client, &targets, &payload, on_exhausted.as_deref()));
    }

    /// Convenience entry point for a detected leak, gated only by
    /// `push_on_leak` (independent of `min_fault_level_to_push`), always
    /// at ERROR severity.
    pub fn push_leak_alarm(&self, cabin_index: usize, probability: f64) {
        if !self.cfg.push_on_leak {
            return;
        }
        self.push_alarm(
            "LEAK",
            &format!("cabin {cabin_index} leak detected (probability={probability:.4})"),
            FaultLevel::Error,
        );
    }
}

fn send_to_all(
    client: &reqwest::blocking::Client,
    targets: &[AlarmTarget],
    payload: &AlarmPayload,
    on_exhausted: Option<&(dyn Fn(&str) + Send + Sync)>,
) {
    for target in targets {
        send_with_retry(client, target, payload, on_exhausted);
    }
}

fn send_with_retry(
    client: &reqwest::blocking::Client,
    target: &AlarmTarget,
    payload: &AlarmPayload,
    on_exhausted: Option<&(dyn Fn(&str) + Send + Sync)>,
) {
    let retries = target.retries.max(1);
    for attempt in 1..=retries {
        let result = client
            .post(&target.url)
            .timeout(target.timeout)
            .json(payload)
            .send();
        match result {
            Ok(resp) if resp.status().is_success() || resp.status().is_redirection() => {
                info!(url = %target.url, attempt, "alarm pushed");
                return;
            }
            Ok(resp) => {
                warn!(url = %target.url, status = %resp.status(), attempt, "alarm push rejected");
            }
            Err(e) => {
                warn!(url = %target.url, error = %e, attempt, "alarm push failed");
            }
        }
        if attempt < retries {
            std::thread::sleep(std::time::Duration::from_secs(1));
        }
    }
    error!(url = %target.url, retries, "alarm push exhausted all retries");
    if let Some(callback) = on_exhausted {
        callback(&format!("alarm push to {} exhausted all retries", target.url));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn cfg(enabled: bool, push_on_leak: bool, min: FaultLevel) -> AlarmPusherConfig {
        AlarmPusherConfig {
            enabled,
            targets: vec![AlarmTarget {
                url: "http://127.0.0.1:1/unreachable".to_string(),
                timeout: Duration::from_millis(50),
                retries: 1,
            }],
            push_on_leak,
            min_fault_level_to_push: min,
        }
    }

    #[test]
    fn test_should_push_respects_minimum_level() {
        let pusher = AlarmPusher::new(cfg(true, true, FaultLevel::Error));
        assert!(!pusher.should_push(FaultLevel::Warning));
        assert!(pusher.should_push(FaultLevel::Error));
        assert!(pusher.should_push(FaultLevel::Critical));
    }

    #[test]
    fn test_disabled_pusher_push_alarm_is_a_noop() {
        let pusher = AlarmPusher::new(cfg(false, true, FaultLevel::Info));
        pusher.push_alarm("F001", "plc down", FaultLevel::Critical);
    }

    #[test]
    fn test_push_leak_alarm_gated_by_push_on_leak_only() {
        let pusher = AlarmPusher::new(cfg(true, false, FaultLevel::Critical));
        pusher.push_leak_alarm(2, 0.91);
    }

    #[test]
    fn test_push_alarm_below_min_level_is_a_noop() {
        let pusher = AlarmPusher::new(cfg(true, true, FaultLevel::Critical));
        pusher.push_alarm("F004", "latency high", FaultLevel::Warning);
    }

    #[test]
    fn test_exhausted_push_invokes_callback() {
        use std::sync::atomic::{AtomicBool, Ordering};
        let fired = Arc::new(AtomicBool::new(false));
        let fired_clone = Arc::clone(&fired);
        let mut pusher = AlarmPusher::new(cfg(true, true, FaultLevel::Error));
        pusher.set_on_exhausted(Arc::new(move |_detail| {
            fired_clone.store(true, Ordering::SeqCst);
        }));
        pusher.push_alarm("F001", "plc down", FaultLevel::Critical);
        std::thread::sleep(Duration::from_millis(300));
        assert!(fired.load(Ordering::SeqCst));
    }
}
