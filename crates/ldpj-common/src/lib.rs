#![doc = "Shared configuration, timing, and metrics types used across the leak-detection backend."]

pub mod config;
pub mod metrics;
pub mod time;

pub use config::*;
pub use metrics::*;
pub use time::*;
