//! Staging Store: the raw/valid/error row tables plus the job table,
//! behind one trait so the in-memory and SQLite-backed implementations
//! are interchangeable.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::Result;
use crate::job::{Job, RawStagedRow};

/// A row promoted into `staging_valid` or `staging_error` after the
/// validate phase.
#[derive(Debug, Clone)]
pub struct StagedRow {
    pub row_number: u32,
    pub raw: RawStagedRow,
    pub is_valid: bool,
}

/// Persistence contract for one job's raw/valid/error rows and its job
/// record. Implementations MUST bulk-insert with a single multi-row
/// statement (or equivalent); a row-by-row loop violates the
/// performance contract this trait exists to uphold.
#[async_trait]
pub trait StagingStore: Send + Sync {
    async fn upsert_job(&self, job: Job) -> Result<()>;
    async fn get_job(&self, job_id: &str) -> Result<Option<Job>>;

    /// Idempotent on `(jobId, rowNumber)`: inserting an already-present
    /// row is a no-op for that row.
    async fn bulk_insert_raw(&self, job_id: &str, rows: Vec<RawStagedRow>) -> Result<()>;
    async fn bulk_insert_staged(&self, job_id: &str, rows: Vec<StagedRow>) -> Result<()>;

    async fn count_by_job(&self, job_id: &str) -> Result<u64>;
    async fn count_errors(&self, job_id: &str) -> Result<u64>;
    async fn count_valid(&self, job_id: &str) -> Result<u64>;

    async fn stream_valid(&self, job_id: &str) -> Result<Vec<StagedRow>>;
    async fn stream_errors(&self, job_id: &str) -> Result<Vec<StagedRow>>;
    async fn stream_raw(&self, job_id: &str) -> Result<Vec<RawStagedRow>>;

    async fn delete_by_job(&self, job_id: &str, keep_errors: bool) -> Result<()>;
}

/// An in-memory, `dashmap`-backed store: the default for tests and the
/// CLI demo, and a reference implementation the SQLite store's tests
/// are checked against.
#[derive(Default)]
pub struct InMemoryStagingStore {
    jobs: DashMap<String, Job>,
    raw: DashMap<String, BTreeMap<u32, RawStagedRow>>,
    staged: DashMap<String, BTreeMap<u32, StagedRow>>,
}

impl InMemoryStagingStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl StagingStore for InMemoryStagingStore {
    async fn upsert_job(&self, job: Job) -> Result<()> {
        self.jobs.insert(job.job_id.clone(), job);
        Ok(())
    }

    async fn get_job(&self, job_id: &str) -> Result<Option<Job>> {
        Ok(self.jobs.get(job_id).map(|j| j.clone()))
    }

    async fn bulk_insert_raw(&self, job_id: &str, rows: Vec<RawStagedRow>) -> Result<()> {
        let mut table = self.raw.entry(job_id.to_string()).or_default();
        for row in rows {
            table.entry(row.row_number).or_insert(row);
        }
        Ok(())
    }

    async fn bulk_insert_staged(&self, job_id: &str, rows: Vec<StagedRow>) -> Result<()> {
        let mut table = self.staged.entry(job_id.to_string()).or_default();
        for row in rows {
            table.insert(row.row_number, row);
        }
        Ok(())
    }

    async fn count_by_job(&self, job_id: &str) -> Result<u64> {
        Ok(self.raw.get(job_id).map(|t| t.len() as u64).unwrap_or(0))
    }

    async fn count_errors(&self, job_id: &str) -> Result<u64> {
        Ok(self
            .staged
            .get(job_id)
            .map(|t| t.values().filter(|r| !r.is_valid).count() as u64)
            .unwrap_or(0))
    }

    async fn count_valid(&self, job_id: &str) -> Result<u64> {
        Ok(self
            .staged
            .get(job_id)
            .map(|t| t.values().filter(|r| r.is_valid).count() as u64)
            .unwrap_or(0))
    }

    async fn stream_valid(&self, job_id: &str) -> Result<Vec<StagedRow>> {
        Ok(self
            .staged
            .get(job_id)
            .map(|t| t.values().filter(|r| r.is_valid).cloned().collect())
            .unwrap_or_default())
    }

    async fn stream_errors(&self, job_id: &str) -> Result<Vec<StagedRow>> {
        Ok(self
            .staged
            .get(job_id)
            .map(|t| t.values().filter(|r| !r.is_valid).cloned().collect())
            .unwrap_or_default())
    }

    async fn stream_raw(&self, job_id: &str) -> Result<Vec<RawStagedRow>> {
        Ok(self.raw.get(job_id).map(|t| t.values().cloned().collect()).unwrap_or_default())
    }

    async fn delete_by_job(&self, job_id: &str, keep_errors: bool) -> Result<()> {
        self.raw.remove(job_id);
        if keep_errors {
            if let Some(mut table) = self.staged.get_mut(job_id) {
                table.retain(|_, row| !row.is_valid);
            }
        } else {
            self.staged.remove(job_id);
        }
        Ok(())
    }
}

#[cfg(feature = "sqlite-staging")]
pub mod sqlite {
    //! SQLite-backed staging store, one multi-row `INSERT` per batch
    //! inside a single short-lived transaction.

    use super::*;
    use crate::cell::CellValue;
    use rusqlite::{params, Connection, OptionalExtension, Row};
    use std::collections::HashMap;
    use std::sync::Mutex;

    pub struct SqliteStagingStore {
        conn: Mutex<Connection>,
    }

    impl SqliteStagingStore {
        pub fn open(path: &str) -> Result<Arc<Self>> {
            let conn = Connection::open(path)?;
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS job (
                    job_id TEXT PRIMARY KEY,
                    file_path TEXT NOT NULL,
                    created_by TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    phase TEXT NOT NULL,
                    total_rows INTEGER NOT NULL,
                    processed_rows INTEGER NOT NULL,
                    error_rows INTEGER NOT NULL,
                    valid_rows INTEGER NOT NULL,
                    last_error TEXT,
                    started_at TEXT,
                    finished_at TEXT,
                    phase_before_failure TEXT
                );
                CREATE TABLE IF NOT EXISTS staging_raw (
                    job_id TEXT NOT NULL,
                    row_number INTEGER NOT NULL,
                    payload TEXT NOT NULL,
                    error_code TEXT,
                    error_message TEXT,
                    PRIMARY KEY (job_id, row_number)
                );
                CREATE TABLE IF NOT EXISTS staging_result (
                    job_id TEXT NOT NULL,
                    row_number INTEGER NOT NULL,
                    is_valid INTEGER NOT NULL,
                    PRIMARY KEY (job_id, row_number)
                );
                CREATE INDEX IF NOT EXISTS idx_staging_raw_errors
                    ON staging_raw (job_id, error_message);",
            )?;
            Ok(Arc::new(Self { conn: Mutex::new(conn) }))
        }

        /// Joins `staging_raw` against `staging_result` for `job_id`,
        /// filtering by the `is_valid` flag the validate phase wrote.
        fn stream_staged(&self, job_id: &str, is_valid: bool) -> Result<Vec<StagedRow>> {
            let conn = self.conn.lock().expect("staging store mutex poisoned");
            let mut stmt = conn.prepare(
                "SELECT r.job_id, r.row_number, r.payload, r.error_code, r.error_message
                 FROM staging_raw r JOIN staging_result s
                   ON s.job_id = r.job_id AND s.row_number = r.row_number
                 WHERE r.job_id = ?1 AND s.is_valid = ?2
                 ORDER BY r.row_number",
            )?;
            let rows = stmt
                .query_map(params![job_id, is_valid as i64], |row| {
                    let raw = raw_staged_row_from_row(row)?;
                    Ok(StagedRow { row_number: raw.row_number, raw, is_valid })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        }
    }

    fn row_to_job(row: &Row) -> rusqlite::Result<Job> {
        let phase: String = row.get("phase")?;
        let phase_before_failure: Option<String> = row.get("phase_before_failure")?;
        Ok(Job {
            job_id: row.get("job_id")?,
            file_path: row.get("file_path")?,
            created_by: row.get("created_by")?,
            created_at: row.get("created_at")?,
            phase: phase.parse().unwrap_or(crate::job::Phase::Pending),
            total_rows: row.get("total_rows")?,
            processed_rows: row.get("processed_rows")?,
            error_rows: row.get("error_rows")?,
            valid_rows: row.get("valid_rows")?,
            last_error: row.get("last_error")?,
            started_at: row.get("started_at")?,
            finished_at: row.get("finished_at")?,
            phase_before_failure: phase_before_failure.and_then(|p| p.parse().ok()),
        })
    }

    fn deserialize_fields(payload: &str) -> HashMap<String, CellValue> {
        serde_json::from_str(payload).unwrap_or_default()
    }

    fn raw_staged_row_from_row(row: &Row) -> rusqlite::Result<RawStagedRow> {
        let payload: String = row.get("payload")?;
        Ok(RawStagedRow {
            job_id: row.get("job_id")?,
            row_number: row.get("row_number")?,
            fields: deserialize_fields(&payload),
            error_code: row.get("error_code")?,
            error_message: row.get("error_message")?,
        })
    }

    #[async_trait]
    impl StagingStore for SqliteStagingStore {
        async fn upsert_job(&self, job: Job) -> Result<()> {
            let conn = self.conn.lock().expect("staging store mutex poisoned");
            conn.execute(
                "INSERT INTO job (job_id, file_path, created_by, created_at, phase, total_rows, processed_rows,
                                   error_rows, valid_rows, last_error, started_at, finished_at, phase_before_failure)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                 ON CONFLICT(job_id) DO UPDATE SET
                    phase=excluded.phase, total_rows=excluded.total_rows,
                    processed_rows=excluded.processed_rows, error_rows=excluded.error_rows,
                    valid_rows=excluded.valid_rows, last_error=excluded.last_error,
                    started_at=excluded.started_at, finished_at=excluded.finished_at,
                    phase_before_failure=excluded.phase_before_failure",
                params![
                    job.job_id,
                    job.file_path,
                    job.created_by,
                    job.created_at,
                    job.phase.to_string(),
                    job.total_rows,
                    job.processed_rows,
                    job.error_rows,
                    job.valid_rows,
                    job.last_error,
                    job.started_at,
                    job.finished_at,
                    job.phase_before_failure.map(|p| p.to_string()),
                ],
            )?;
            Ok(())
        }

        async fn get_job(&self, job_id: &str) -> Result<Option<Job>> {
            let conn = self.conn.lock().expect("staging store mutex poisoned");
            let job = conn
                .query_row("SELECT * FROM job WHERE job_id = ?1", params![job_id], row_to_job)
                .optional()?;
            Ok(job)
        }

        async fn bulk_insert_raw(&self, job_id: &str, rows: Vec<RawStagedRow>) -> Result<()> {
            if rows.is_empty() {
                return Ok(());
            }
            let mut conn = self.conn.lock().expect("staging store mutex poisoned");
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT OR IGNORE INTO staging_raw (job_id, row_number, payload, error_code, error_message)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )?;
                for row in &rows {
                    let payload = serde_json::to_string(&row.fields).unwrap_or_default();
                    stmt.execute(params![job_id, row.row_number, payload, row.error_code, row.error_message])?;
                }
            }
            tx.commit()?;
            Ok(())
        }

        async fn bulk_insert_staged(&self, job_id: &str, rows: Vec<StagedRow>) -> Result<()> {
            if rows.is_empty() {
                return Ok(());
            }
            let mut conn = self.conn.lock().expect("staging store mutex poisoned");
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT OR REPLACE INTO staging_result (job_id, row_number, is_valid) VALUES (?1, ?2, ?3)",
                )?;
                for row in &rows {
                    stmt.execute(params![job_id, row.row_number, row.is_valid as i64])?;
                }
            }
            tx.commit()?;
            Ok(())
        }

        async fn count_by_job(&self, job_id: &str) -> Result<u64> {
            let conn = self.conn.lock().expect("staging store mutex poisoned");
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM staging_raw WHERE job_id = ?1",
                params![job_id],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        }

        async fn count_errors(&self, job_id: &str) -> Result<u64> {
            let conn = self.conn.lock().expect("staging store mutex poisoned");
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM staging_result WHERE job_id = ?1 AND is_valid = 0",
                params![job_id],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        }

        async fn count_valid(&self, job_id: &str) -> Result<u64> {
            let conn = self.conn.lock().expect("staging store mutex poisoned");
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM staging_result WHERE job_id = ?1 AND is_valid = 1",
                params![job_id],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        }

        async fn stream_valid(&self, job_id: &str) -> Result<Vec<StagedRow>> {
            self.stream_staged(job_id, true)
        }

        async fn stream_errors(&self, job_id: &str) -> Result<Vec<StagedRow>> {
            self.stream_staged(job_id, false)
        }

        async fn stream_raw(&self, job_id: &str) -> Result<Vec<RawStagedRow>> {
            let conn = self.conn.lock().expect("staging store mutex poisoned");
            let mut stmt = conn.prepare(
                "SELECT job_id, row_number, payload, error_code, error_message
                 FROM staging_raw WHERE job_id = ?1 ORDER BY row_number",
            )?;
            let rows = stmt
                .query_map(params![job_id], raw_staged_row_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        }

        async fn delete_by_job(&self, job_id: &str, keep_errors: bool) -> Result<()> {
            let conn = self.conn.lock().expect("staging store mutex poisoned");
            if keep_errors {
                conn.execute(
                    "DELETE FROM staging_raw WHERE job_id = ?1 AND error_message IS NULL",
                    params![job_id],
                )?;
            } else {
                conn.execute("DELETE FROM staging_raw WHERE job_id = ?1", params![job_id])?;
                conn.execute("DELETE FROM staging_result WHERE job_id = ?1", params![job_id])?;
            }
            Ok(())
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::CellValue;
    use chrono::Utc;

    fn sample_job(id: &str) -> Job {
        Job::new(id, "in.xlsx", "tester", Utc::now())
    }

    fn raw_row(job_id: &str, n: u32) -> RawStagedRow {
        RawStagedRow::new(job_id, n, [("name".to_string(), CellValue::String("x".to_string()))].into())
    }

    #[tokio::test]
    async fn test_upsert_and_get_job_round_trips() {
        let store = InMemoryStagingStore::new();
        store.upsert_job(sample_job("JOB-1")).await.unwrap();
        let job = store.get_job("JOB-1").await.unwrap().unwrap();
        assert_eq!(job.job_id, "JOB-1");
    }

    #[tokio::test]
    async fn test_get_missing_job_returns_none() {
        let store = InMemoryStagingStore::new();
        assert!(store.get_job("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_bulk_insert_raw_is_idempotent_per_row() {
        let store = InMemoryStagingStore::new();
        store.bulk_insert_raw("JOB-1", vec![raw_row("JOB-1", 1)]).await.unwrap();
        store.bulk_insert_raw("JOB-1", vec![raw_row("JOB-1", 1), raw_row("JOB-1", 2)]).await.unwrap();
        assert_eq!(store.count_by_job("JOB-1").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_count_valid_and_errors_partition_correctly() {
        let store = InMemoryStagingStore::new();
        let rows = vec![
            StagedRow { row_number: 1, raw: raw_row("JOB-1", 1), is_valid: true },
            StagedRow { row_number: 2, raw: raw_row("JOB-1", 2), is_valid: false },
        ];
        store.bulk_insert_staged("JOB-1", rows).await.unwrap();
        assert_eq!(store.count_valid("JOB-1").await.unwrap(), 1);
        assert_eq!(store.count_errors("JOB-1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete_by_job_keep_errors_preserves_only_invalid_rows() {
        let store = InMemoryStagingStore::new();
        store.bulk_insert_raw("JOB-1", vec![raw_row("JOB-1", 1)]).await.unwrap();
        let rows = vec![
            StagedRow { row_number: 1, raw: raw_row("JOB-1", 1), is_valid: true },
            StagedRow { row_number: 2, raw: raw_row("JOB-1", 2), is_valid: false },
        ];
        store.bulk_insert_staged("JOB-1", rows).await.unwrap();
        store.delete_by_job("JOB-1", true).await.unwrap();
        assert_eq!(store.count_by_job("JOB-1").await.unwrap(), 0);
        assert_eq!(store.count_errors("JOB-1").await.unwrap(), 1);
        assert_eq!(store.count_valid("JOB-1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_delete_by_job_without_keep_errors_clears_everything() {
        let store = InMemoryStagingStore::new();
        let rows = vec![StagedRow { row_number: 1, raw: raw_row("JOB-1", 1), is_valid: false }];
        store.bulk_insert_staged("JOB-1", rows).await.unwrap();
        store.delete_by_job("JOB-1", false).await.unwrap();
        assert_eq!(store.count_errors("JOB-1").await.unwrap(), 0);
    }
}
