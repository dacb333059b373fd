//! Embedded SQLite-backed record store.
//!
//! All access is serialized through a single pooled connection
//! (`max_connections(1)`), matching the "one mutex" design this store is
//! grounded on: the original system serializes every write and query
//! through a single connection handle. Journal mode is WAL and
//! synchronous is NORMAL, both applied on open, trading strict durability
//! on power-cut for write throughput -- individual record loss is
//! tolerated, corruption is not.
//!
//! The public surface is synchronous: the processing loop is a plain
//! `std::thread`, not an async task, so `RecordStore` owns a small
//! current-thread Tokio runtime and blocks on it internally. This keeps
//! `sqlx` (the workspace's chosen database crate) usable from a
//! synchronous caller without forcing the whole daemon onto an async
//! runtime.

use crate::error::{StorageError, StorageResult};
use crate::model::{NewTestRecord, RecordDetail, RecordFilter, RecordSummary};
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::sync::Mutex;
use tracing::{info, warn};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS test_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    batch_id TEXT NOT NULL DEFAULT '',
    cavity_id INTEGER NOT NULL,
    timestamp TEXT NOT NULL,
    pressure_data TEXT NOT NULL,
    angle_data TEXT,
    ai_data TEXT,
    position_data TEXT,
    features TEXT,
    label INTEGER,
    probability REAL,
    confidence REAL,
    model_version TEXT,
    duration_s REAL,
    point_count INTEGER,
    created_at TEXT NOT NULL DEFAULT (datetime('now', 'localtime'))
);
CREATE INDEX IF NOT EXISTS idx_test_records_timestamp ON test_records (timestamp);
CREATE INDEX IF NOT EXISTS idx_test_records_cavity_id ON test_records (cavity_id);
CREATE INDEX IF NOT EXISTS idx_test_records_label ON test_records (label);
"#;

/// Durable append-oriented log of completed test cycles.
pub struct RecordStore {
    pool: SqlitePool,
    runtime: tokio::runtime::Runtime,
    path: std::path::PathBuf,
    // Guards nothing by itself (the pool already serializes via
    // max_connections(1)); held so `close()` has an exclusive point to
    // drain in-flight callers through before dropping the pool.
    guard: Mutex<()>,
}

impl RecordStore {
    /// Open (creating if absent) the database file at `path`, applying the
    /// schema and WAL/NORMAL pragmas.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Open`] if the file cannot be created or the
    /// schema cannot be applied.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("building a current-thread tokio runtime cannot fail");

        let path_buf = path.to_path_buf();
        let pool = runtime.block_on(async {
            if let Some(parent) = path_buf.parent() {
                if !parent.as_os_str().is_empty() {
                    let _ = std::fs::create_dir_all(parent);
                }
            }
            let url = format!("sqlite://{}?mode=rwc", path_buf.display());
            let pool = SqlitePoolOptions::new()
                .max_connections(1)
                .connect(&url)
                .await
                .map_err(|source| StorageError::Open {
                    path: path_buf.display().to_string(),
                    source,
                })?;

            sqlx::query("PRAGMA journal_mode=WAL;")
                .execute(&pool)
                .await
                .map_err(|source| StorageError::Open {
                    path: path_buf.display().to_string(),
                    source,
                })?;
            sqlx::query("PRAGMA synchronous=NORMAL;")
                .execute(&pool)
                .await
                .map_err(|source| StorageError::Open {
                    path: path_buf.display().to_string(),
                    source,
                })?;
            sqlx::query(SCHEMA)
                .execute(&pool)
                .await
                .map_err(|source| StorageError::Open {
                    path: path_buf.display().to_string(),
                    source,
                })?;

            Ok::<_, StorageError>(pool)
        })?;

        info!(path = %path_buf.display(), "record store opened");
        Ok(Self {
            pool,
            runtime,
            path: path_buf,
            guard: Mutex::new(()),
        })
    }

    /// Insert a full record and return its new id.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Insert`] on an underlying database failure.
    pub fn log_record(&self, record: NewTestRecord) -> StorageResult<i64> {
        let _permit = self.guard.lock().expect("store mutex poisoned");
        self.runtime.block_on(async {
            let row = sqlx::query(
                r#"
                INSERT INTO test_records
                    (batch_id, cavity_id, timestamp, pressure_data, angle_data,
                     ai_data, position_data, features, label, probability,
                     confidence, model_version, duration_s, point_count)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                RETURNING id
                "#,
            )
            .bind(&record.batch_id)
            .bind(record.cavity_id)
            .bind(&record.timestamp)
            .bind(&record.pressure_data)
            .bind(&record.angle_data)
            .bind(&record.ai_data)
            .bind(&record.position_data)
            .bind(&record.features)
            .bind(record.label)
            .bind(record.probability)
            .bind(record.confidence)
            .bind(&record.model_version)
            .bind(record.duration_s)
            .bind(record.point_count)
            .fetch_one(&self.pool)
            .await
            .map_err(StorageError::Insert)?;

            let id: i64 = row.try_get("id").map_err(StorageError::Insert)?;
            Ok(id)
        })
    }

    /// Query summary rows (no raw series), newest first.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Query`] on an underlying database failure.
    pub fn query_records(
        &self,
        filter: &RecordFilter,
        limit: u32,
        offset: u32,
    ) -> StorageResult<Vec<RecordSummary>> {
        let _permit = self.guard.lock().expect("store mutex poisoned");
        self.runtime.block_on(async {
            let mut sql = String::from(
                "SELECT id, batch_id, cavity_id, timestamp, label, probability, \
                 confidence, model_version, duration_s, point_count, created_at \
                 FROM test_records WHERE 1=1",
            );
            if filter.start_time.is_some() {
                sql.push_str(" AND timestamp >= ?");
            }
            if filter.end_time.is_some() {
                sql.push_str(" AND timestamp <= ?");
            }
            if filter.cavity_id.is_some() {
                sql.push_str(" AND cavity_id = ?");
            }
            if filter.label.is_some() {
                sql.push_str(" AND label = ?");
            }
            sql.push_str(" ORDER BY id DESC LIMIT ? OFFSET ?");

            let mut query = sqlx::query(&sql);
            if let Some(ref v) = filter.start_time {
                query = query.bind(v);
            }
            if let Some(ref v) = filter.end_time {
                query = query.bind(v);
            }
            if let Some(v) = filter.cavity_id {
                query = query.bind(v);
            }
            if let Some(v) = filter.label {
                query = query.bind(v);
            }
            query = query.bind(i64::from(limit)).bind(i64::from(offset));

            let rows = query.fetch_all(&self.pool).await.map_err(StorageError::Query)?;
            rows.iter().map(row_to_summary).collect()
        })
    }

    /// Fetch the full row, including raw series, for one id.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Query`] on an underlying database failure.
    /// Returns `Ok(None)` if no row with that id exists.
    pub fn query_record_detail(&self, id: i64) -> StorageResult<Option<RecordDetail>> {
        let _permit = self.guard.lock().expect("store mutex poisoned");
        self.runtime.block_on(async {
            let row = sqlx::query(
                "SELECT id, batch_id, cavity_id, timestamp, label, probability, \
                 confidence, model_version, duration_s, point_count, created_at, \
                 pressure_data, angle_data, ai_data, position_data, features \
                 FROM test_records WHERE id = ?",
            )
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StorageError::Query)?;

            row.as_ref().map(row_to_detail).transpose()
        })
    }

    /// Total row count.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Query`] on an underlying database failure.
    pub fn count_records(&self) -> StorageResult<i64> {
        let _permit = self.guard.lock().expect("store mutex poisoned");
        self.runtime.block_on(async {
            let row = sqlx::query("SELECT COUNT(*) AS n FROM test_records")
                .fetch_one(&self.pool)
                .await
                .map_err(StorageError::Query)?;
            row.try_get("n").map_err(StorageError::Query)
        })
    }

    /// Current on-disk size of the database file, in megabytes.
    ///
    /// Returns `0.0` if the size cannot be determined, rather than failing
    /// -- this is a best-effort health-checker signal, not a hard API.
    #[must_use]
    pub fn get_db_size_mb(&self) -> f64 {
        std::fs::metadata(&self.path)
            .map(|m| m.len() as f64 / (1024.0 * 1024.0))
            .unwrap_or_else(|e| {
                warn!(error = %e, "failed to stat record store file");
                0.0
            })
    }

    /// Release the database handle.
    pub fn close(&self) {
        let _permit = self.guard.lock().expect("store mutex poisoned");
        self.runtime.block_on(self.pool.close());
    }
}

fn row_to_summary(row: &SqliteRow) -> StorageResult<RecordSummary> {
    Ok(RecordSummary {
        id: row.try_get("id").map_err(StorageError::Query)?,
        batch_id: row.try_get("batch_id").map_err(StorageError::Query)?,
        cavity_id: row.try_get("cavity_id").map_err(StorageError::Query)?,
        timestamp: row.try_get("timestamp").map_err(StorageError::Query)?,
        label: row.try_get("label").map_err(StorageError::Query)?,
        probability: row.try_get("probability").map_err(StorageError::Query)?,
        confidence: row.try_get("confidence").map_err(StorageError::Query)?,
        model_version: row.try_get("model_version").map_err(StorageError::Query)?,
        duration_s: row.try_get("duration_s").map_err(StorageError::Query)?,
        point_count: row.try_get("point_count").map_err(StorageError::Query)?,
        created_at: row.try_get("created_at").map_err(StorageError::Query)?,
    })
}

fn row_to_detail(row: &SqliteRow) -> StorageResult<RecordDetail> {
    Ok(RecordDetail {
        summary: row_to_summary(row)?,
        pressure_data: row.try_get("pressure_data").map_err(StorageError::Query)?,
        angle_data: row.try_get("angle_data").map_err(StorageError::Query)?,
        ai_data: row.try_get("ai_data").map_err(StorageError::Query)?,
        position_data: row.try_get("position_data").map_err(StorageError::Query)?,
        features: row.try_get("features").map_err(StorageError::Query)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_record(cavity_id: i64, label: i64) -> NewTestRecord {
        NewTestRecord {
            batch_id: "batch-1".into(),
            cavity_id,
            timestamp: "2026-07-28 10:00:00".into(),
            pressure_data: serde_json::to_string(&[100.0, 200.0, 300.0]).unwrap(),
            angle_data: None,
            ai_data: None,
            position_data: None,
            features: Some(
                serde_json::json!({"max": 300.0, "min": 100.0, "cavity_id": cavity_id as f64})
                    .to_string(),
            ),
            label,
            probability: 0.95,
            confidence: 0.95,
            model_version: "v1".into(),
            duration_s: 1.5,
            point_count: 3,
        }
    }

    #[test]
    fn test_round_trip_insert_and_detail() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::open(&dir.path().join("ldpj.db")).unwrap();

        let id = store.log_record(new_record(2, 1)).unwrap();
        assert_eq!(id, 1);
        assert_eq!(store.count_records().unwrap(), 1);

        let detail = store.query_record_detail(id).unwrap().unwrap();
        assert_eq!(detail.summary.cavity_id, 2);
        assert!(detail.features.unwrap().contains("cavity_id"));
    }

    #[test]
    fn test_ids_strictly_increasing() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::open(&dir.path().join("ldpj.db")).unwrap();

        let a = store.log_record(new_record(0, 1)).unwrap();
        let b = store.log_record(new_record(0, 0)).unwrap();
        let c = store.log_record(new_record(1, 1)).unwrap();
        assert!(a < b && b < c);
    }

    #[test]
    fn test_query_records_filters_by_cavity_and_label() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::open(&dir.path().join("ldpj.db")).unwrap();

        store.log_record(new_record(0, 1)).unwrap();
        store.log_record(new_record(1, 0)).unwrap();
        store.log_record(new_record(1, 1)).unwrap();

        let filter = RecordFilter {
            cavity_id: Some(1),
            label: Some(0),
            ..Default::default()
        };
        let rows = store.query_records(&filter, 100, 0).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].cavity_id, 1);
        assert_eq!(rows[0].label, 0);
    }

    #[test]
    fn test_query_record_detail_missing_id_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::open(&dir.path().join("ldpj.db")).unwrap();
        assert!(store.query_record_detail(999).unwrap().is_none());
    }

    #[test]
    fn test_db_size_nonzero_after_insert() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::open(&dir.path().join("ldpj.db")).unwrap();
        store.log_record(new_record(0, 1)).unwrap();
        assert!(store.get_db_size_mb() >= 0.0);
    }
}
