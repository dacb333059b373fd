//! Row types for the `test_records` table.

use serde::{Deserialize, Serialize};

/// One completed cycle, ready to persist.
///
/// The raw series and feature object are passed as already-serialized JSON
/// text: the store does not know about `FeatureVector` or `CabinFrame`
/// shapes, only about column contracts, keeping this crate independent of
/// `ldpj-pipeline`.
#[derive(Debug, Clone)]
pub struct NewTestRecord {
    /// Batch tag supplied by the caller; empty string if none.
    pub batch_id: String,
    /// Cabin/cavity index the cycle belongs to.
    pub cavity_id: i64,
    /// ISO-8601-ish local timestamp, see `ldpj_common::time::local_timestamp`.
    pub timestamp: String,
    /// JSON-encoded array of pressures.
    pub pressure_data: String,
    /// JSON-encoded array of angles.
    pub angle_data: Option<String>,
    /// JSON-encoded array of analog readings.
    pub ai_data: Option<String>,
    /// JSON-encoded array of positions.
    pub position_data: Option<String>,
    /// JSON-encoded feature object.
    pub features: Option<String>,
    /// Classification label, -1/0/1.
    pub label: i64,
    /// Raw model probability.
    pub probability: f64,
    /// Derived confidence.
    pub confidence: f64,
    /// Model artifact version string, empty if unavailable.
    pub model_version: String,
    /// Wall-clock duration of the cycle, seconds.
    pub duration_s: f64,
    /// Number of points collected for the cycle.
    pub point_count: i64,
}

/// Summary row returned by `query_records`: everything but the raw series.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordSummary {
    /// Row id.
    pub id: i64,
    /// Batch tag.
    pub batch_id: String,
    /// Cabin/cavity index.
    pub cavity_id: i64,
    /// Cycle timestamp.
    pub timestamp: String,
    /// Classification label.
    pub label: i64,
    /// Raw model probability.
    pub probability: f64,
    /// Derived confidence.
    pub confidence: f64,
    /// Model artifact version.
    pub model_version: String,
    /// Cycle duration, seconds.
    pub duration_s: f64,
    /// Points collected.
    pub point_count: i64,
    /// Row insertion timestamp.
    pub created_at: String,
}

/// Full row returned by `query_record_detail`, including raw series.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordDetail {
    /// Summary fields.
    #[serde(flatten)]
    pub summary: RecordSummary,
    /// JSON-encoded pressure series.
    pub pressure_data: String,
    /// JSON-encoded angle series, if any.
    pub angle_data: Option<String>,
    /// JSON-encoded analog series, if any.
    pub ai_data: Option<String>,
    /// JSON-encoded position series, if any.
    pub position_data: Option<String>,
    /// JSON-encoded feature object, if any.
    pub features: Option<String>,
}

/// Filters accepted by `query_records`.
#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    /// Inclusive lower bound on `timestamp`, lexicographic compare.
    pub start_time: Option<String>,
    /// Inclusive upper bound on `timestamp`, lexicographic compare.
    pub end_time: Option<String>,
    /// Restrict to one cavity.
    pub cavity_id: Option<i64>,
    /// Restrict to one label.
    pub label: Option<i64>,
}
