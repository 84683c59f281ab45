//! Orchestrator: drives a job through PENDING -> INGESTING ->
//! INGEST_COMPLETED -> VALIDATING -> VALIDATED -> APPLYING -> APPLIED ->
//! RECONCILING -> COMPLETED, with FAILED as a restartable terminal
//! state.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::cell::CellValue;
use crate::config::MigrationConfig;
use crate::container::Container;
use crate::early_validator::validate_dimension;
use crate::error::{Error, Result};
use crate::executor::{self, BatchSink, SinkOutcome};
use crate::job::{Job, Phase, RawStagedRow};
use crate::row_mapper::RowSchema;
use crate::row_validator::RowValidator;
use crate::staging::{StagedRow, StagingStore};
use crate::stream_reader::SheetStreamReader;

/// Streams validated rows into their target tables, in topological
/// dependency order. Implemented by the transport layer that embeds
/// this crate; the orchestrator only calls through this trait.
///
/// Natural-key uniqueness within the target schema is the implementer's
/// responsibility: this crate does not enforce it, since it depends
/// entirely on the destination schema.
#[async_trait]
pub trait ApplySink: Send + Sync {
    async fn apply_batch(&self, rows: &[StagedRow]) -> Result<u64>;
}

/// What `start` reports when a job id is reused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    InProgress,
    AlreadyCompleted,
}

pub struct Orchestrator<St: StagingStore> {
    staging: Arc<St>,
    config: MigrationConfig,
    recent_starts: Mutex<VecDeque<Instant>>,
}

impl<St: StagingStore> Orchestrator<St> {
    pub fn new(staging: Arc<St>, config: MigrationConfig) -> Self {
        Self { staging, config, recent_starts: Mutex::new(VecDeque::new()) }
    }

    /// Enforces the ingress rate limit of `maxStartsPerMinute` job
    /// starts per instance.
    async fn admit_start(&self) -> Result<()> {
        let mut starts = self.recent_starts.lock().await;
        let cutoff = Instant::now() - Duration::from_secs(60);
        while starts.front().is_some_and(|t| *t < cutoff) {
            starts.pop_front();
        }
        if starts.len() as u32 >= self.config.max_starts_per_minute {
            return Err(Error::RateLimited { limit: self.config.max_starts_per_minute });
        }
        starts.push_back(Instant::now());
        Ok(())
    }

    /// Checks for an existing job and decides whether a fresh start,
    /// restart, or short-circuit is appropriate, per §4.G idempotency.
    pub async fn start_or_resume(&self, job_id: &str, file_path: &str, created_by: &str) -> Result<(Job, StartOutcome)> {
        if let Some(existing) = self.staging.get_job(job_id).await? {
            return match existing.phase {
                Phase::Completed => Ok((existing, StartOutcome::AlreadyCompleted)),
                Phase::Failed => Ok((existing, StartOutcome::Started)),
                _ => Ok((existing, StartOutcome::InProgress)),
            };
        }
        self.admit_start().await?;
        let job = Job::new(job_id, file_path, created_by, Utc::now());
        self.staging.upsert_job(job.clone()).await?;
        Ok((job, StartOutcome::Started))
    }

    /// Ingest: reader -> mapper -> validator -> bulk insert into
    /// `staging_raw`. Idempotent on `(jobId, rowNumber)`.
    ///
    /// `validator` carries the caller's schema-specific rules (required
    /// fields, length bounds, date ordering, enum membership); an empty
    /// `RowValidator::new()` runs only the row mapper's own coercion
    /// checks.
    pub async fn ingest(
        &self,
        mut job: Job,
        file_bytes: Vec<u8>,
        schema_descriptors: &[crate::row_mapper::FieldDescriptor],
        validator: RowValidator,
        cancel: CancellationToken,
    ) -> Result<Job> {
        job.transition_to(Phase::Ingesting)?;
        self.staging.upsert_job(job.clone()).await?;

        let result = self.run_ingest(&mut job, file_bytes, schema_descriptors, validator, cancel).await;
        match result {
            Ok(()) => {
                job.transition_to(Phase::IngestCompleted)?;
            }
            Err(err) => {
                job.last_error = Some(err.to_string());
                job.transition_to(Phase::Failed)?;
                self.staging.upsert_job(job.clone()).await?;
                return Err(err);
            }
        }
        self.staging.upsert_job(job.clone()).await?;
        Ok(job)
    }

    async fn run_ingest(
        &self,
        job: &mut Job,
        file_bytes: Vec<u8>,
        schema_descriptors: &[crate::row_mapper::FieldDescriptor],
        validator: RowValidator,
        cancel: CancellationToken,
    ) -> Result<()> {
        let container = Container::open(file_bytes)?;

        let early = validate_dimension(container.sheet_reader(), self.config.size_policy())?;
        if !early.valid {
            return Err(Error::FileTooLarge { reason: early.reason.unwrap_or_default() });
        }

        let mut reader = SheetStreamReader::new(container.sheet_reader(), &container.shared_strings, &container.styles, None);

        let header_batch = reader.next_batch(1)?;
        let header_row = header_batch.first().ok_or_else(|| Error::FileCorrupt("empty sheet".to_string()))?;
        let header: std::collections::HashMap<u32, String> = header_row
            .cells
            .iter()
            .map(|(col, value)| (*col, value.to_string()))
            .collect();
        let schema = RowSchema::build(schema_descriptors, &header)?;

        let mut total_rows = 0u64;
        let mut error_rows = 0u64;
        let mut valid_rows = 0u64;
        let mut all_raw_rows = Vec::new();

        while reader.has_more() {
            if cancel.is_cancelled() {
                return Err(Error::Internal("ingestion cancelled".to_string()));
            }
            let rows = reader.next_batch(self.config.batch_size)?;
            if rows.is_empty() {
                break;
            }
            for row in rows {
                let raw: std::collections::HashMap<u32, CellValue> = row.cells.into_iter().collect();
                let mapped = schema.map_row(&raw);
                let outcome = validator.validate(&mapped);
                total_rows += 1;
                if outcome.is_valid() {
                    valid_rows += 1;
                } else {
                    error_rows += 1;
                }
                let mut staged = RawStagedRow::new(job.job_id.clone(), row.row_number, mapped.fields);
                staged.error_code = outcome.error_code;
                staged.error_message = outcome.message;
                all_raw_rows.push(staged);
            }
        }

        job.total_rows = total_rows;
        job.error_rows = error_rows;
        job.valid_rows = valid_rows;

        struct RawInsertSink<St> {
            staging: Arc<St>,
            job_id: String,
        }
        #[async_trait]
        impl<St: StagingStore> BatchSink<RawStagedRow> for RawInsertSink<St> {
            async fn execute(&self, batch: &crate::batch::Batch<RawStagedRow>) -> SinkOutcome {
                match self.staging.bulk_insert_raw(&self.job_id, batch.rows.clone()).await {
                    Ok(()) => SinkOutcome::Success,
                    Err(err) if err.retryable() => SinkOutcome::Transient,
                    Err(_) => SinkOutcome::Permanent,
                }
            }
        }

        let sink = Arc::new(RawInsertSink { staging: self.staging.clone(), job_id: job.job_id.clone() });
        let summary = executor::run(all_raw_rows, sink, self.config.executor_config(), cancel).await;
        if summary.failed > 0 {
            return Err(Error::Internal(format!("{} rows failed to stage into staging_raw", summary.failed)));
        }
        Ok(())
    }

    /// Validate: re-runs cross-row duplicate-key detection over the whole
    /// raw staging set (in addition to the per-row errors already recorded
    /// at ingest time), promoting rows into `staging_valid`/`staging_error`.
    ///
    /// `schema_descriptors` is the same schema passed to `ingest`; fields
    /// declared `FieldKind::Identifier` form the natural key checked for
    /// duplicates within the file. A row whose key fields are all empty
    /// has no natural key and is never flagged as a duplicate.
    pub async fn validate(&self, mut job: Job, schema_descriptors: &[crate::row_mapper::FieldDescriptor]) -> Result<Job> {
        job.transition_to(Phase::Validating)?;
        let raw_rows = self.staging.stream_raw(&job.job_id).await?;

        let key_fields: Vec<&str> = schema_descriptors
            .iter()
            .filter(|d| d.kind == crate::row_mapper::FieldKind::Identifier)
            .map(|d| d.field_name.as_str())
            .collect();

        let mut seen_keys = std::collections::HashSet::new();
        let mut valid_rows = 0u64;
        let mut error_rows = 0u64;

        let staged: Vec<StagedRow> = raw_rows
            .into_iter()
            .map(|mut raw| {
                let mut is_valid = raw.error_code.is_none();
                if is_valid && !key_fields.is_empty() {
                    if let Some(key) = natural_key(&raw.fields, &key_fields) {
                        if !seen_keys.insert(key) {
                            is_valid = false;
                            raw.error_code = Some(merge_codes(raw.error_code.take(), "DUPLICATE_KEY"));
                            raw.error_message =
                                Some(merge_messages(raw.error_message.take(), "duplicate natural key within file"));
                        }
                    }
                }
                if is_valid {
                    valid_rows += 1;
                } else {
                    error_rows += 1;
                }
                StagedRow { row_number: raw.row_number, raw, is_valid }
            })
            .collect();

        job.valid_rows = valid_rows;
        job.error_rows = error_rows;
        self.staging.bulk_insert_staged(&job.job_id, staged).await?;
        job.transition_to(Phase::Validated)?;
        self.staging.upsert_job(job.clone()).await?;
        Ok(job)
    }

    /// Apply: streams `staging_valid` rows through `sink` using the
    /// bounded-parallel batch executor.
    pub async fn apply<A: ApplySink + 'static>(&self, mut job: Job, sink: Arc<A>, cancel: CancellationToken) -> Result<Job> {
        job.transition_to(Phase::Applying)?;
        let valid_rows = self.staging.stream_valid(&job.job_id).await?;

        struct ApplySinkAdapter<A>(Arc<A>);
        #[async_trait]
        impl<A: ApplySink> BatchSink<StagedRow> for ApplySinkAdapter<A> {
            async fn execute(&self, batch: &crate::batch::Batch<StagedRow>) -> SinkOutcome {
                match self.0.apply_batch(&batch.rows).await {
                    Ok(_) => SinkOutcome::Success,
                    Err(err) if err.retryable() => SinkOutcome::Transient,
                    Err(_) => SinkOutcome::Permanent,
                }
            }
        }

        let summary = executor::run(valid_rows, Arc::new(ApplySinkAdapter(sink)), self.config.executor_config(), cancel).await;
        if summary.failed > 0 {
            job.last_error = Some(format!("{} rows failed to apply", summary.failed));
            job.transition_to(Phase::Failed)?;
            self.staging.upsert_job(job.clone()).await?;
            return Err(Error::Internal(format!("{} rows failed to apply", summary.failed)));
        }
        job.transition_to(Phase::Applied)?;
        self.staging.upsert_job(job.clone()).await?;
        Ok(job)
    }

    /// Writes every `staging_error` row for `job_id` out as an `.xlsx`
    /// workbook, `source_columns` plus the trailing `errorMessage`/
    /// `errorCode` columns, for the caller to hand back to whoever
    /// submitted the file.
    pub async fn write_error_file<W: std::io::Write + std::io::Seek>(&self, job_id: &str, source_columns: &[String], sink: W) -> Result<()> {
        let errors = self.staging.stream_errors(job_id).await?;
        let columns = crate::error_writer::error_file_columns(source_columns);
        let rows = errors.into_iter().map(|row| {
            let mut values: Vec<String> = source_columns
                .iter()
                .map(|name| row.raw.fields.get(name).map(|v| v.to_string()).unwrap_or_default())
                .collect();
            values.push(row.raw.error_message.clone().unwrap_or_default());
            values.push(row.raw.error_code.clone().unwrap_or_default());
            values
        });
        crate::error_writer::write_error_workbook(sink, &columns, rows)
    }

    /// Reconcile: asserts `validCount == insertedCount`.
    pub async fn reconcile(&self, mut job: Job, inserted_count: u64) -> Result<Job> {
        job.transition_to(Phase::Reconciling)?;
        let valid_count = self.staging.count_valid(&job.job_id).await?;
        if valid_count != inserted_count {
            job.last_error = Some(format!("expected {valid_count}, inserted {inserted_count}"));
            job.transition_to(Phase::Failed)?;
            self.staging.upsert_job(job.clone()).await?;
            return Err(Error::ReconciliationMismatch { expected: valid_count, actual: inserted_count });
        }
        job.transition_to(Phase::Completed)?;
        self.staging.upsert_job(job.clone()).await?;
        Ok(job)
    }
}

/// Joins the text form of each key field into one composite key, in
/// declaration order. Returns `None` if every key field is empty, since an
/// all-empty key carries no identity to deduplicate against.
fn natural_key(fields: &std::collections::HashMap<String, CellValue>, key_fields: &[&str]) -> Option<String> {
    let mut parts = Vec::with_capacity(key_fields.len());
    let mut any_non_empty = false;
    for name in key_fields {
        let text = fields.get(*name).map(|v| v.to_string()).unwrap_or_default();
        if !text.is_empty() {
            any_non_empty = true;
        }
        parts.push(text);
    }
    if !any_non_empty {
        return None;
    }
    Some(parts.join("\u{1f}"))
}

fn merge_codes(existing: Option<String>, code: &str) -> String {
    match existing {
        Some(e) if !e.is_empty() => format!("{e},{code}"),
        _ => code.to_string(),
    }
}

fn merge_messages(existing: Option<String>, message: &str) -> String {
    match existing {
        Some(e) if !e.is_empty() => format!("{e}; {message}"),
        _ => message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row_mapper::{ColumnHint, FieldDescriptor, FieldKind};
    use crate::staging::InMemoryStagingStore;

    fn orchestrator() -> Orchestrator<InMemoryStagingStore> {
        Orchestrator::new(InMemoryStagingStore::new(), MigrationConfig::default())
    }

    #[tokio::test]
    async fn test_start_or_resume_creates_a_new_job() {
        let orch = orchestrator();
        let (job, outcome) = orch.start_or_resume("JOB-1", "in.xlsx", "tester").await.unwrap();
        assert_eq!(job.phase, Phase::Pending);
        assert_eq!(outcome, StartOutcome::Started);
    }

    #[tokio::test]
    async fn test_start_or_resume_reports_in_progress_for_running_job() {
        let orch = orchestrator();
        let (mut job, _) = orch.start_or_resume("JOB-1", "in.xlsx", "tester").await.unwrap();
        job.transition_to(Phase::Ingesting).unwrap();
        orch.staging.upsert_job(job).await.unwrap();

        let (_, outcome) = orch.start_or_resume("JOB-1", "in.xlsx", "tester").await.unwrap();
        assert_eq!(outcome, StartOutcome::InProgress);
    }

    #[tokio::test]
    async fn test_start_or_resume_reports_already_completed() {
        let orch = orchestrator();
        let (mut job, _) = orch.start_or_resume("JOB-1", "in.xlsx", "tester").await.unwrap();
        for phase in [
            Phase::Ingesting,
            Phase::IngestCompleted,
            Phase::Validating,
            Phase::Validated,
            Phase::Applying,
            Phase::Applied,
            Phase::Reconciling,
            Phase::Completed,
        ] {
            job.transition_to(phase).unwrap();
        }
        orch.staging.upsert_job(job).await.unwrap();

        let (_, outcome) = orch.start_or_resume("JOB-1", "in.xlsx", "tester").await.unwrap();
        assert_eq!(outcome, StartOutcome::AlreadyCompleted);
    }

    #[tokio::test]
    async fn test_rate_limiter_rejects_excess_starts() {
        let mut config = MigrationConfig::default();
        config.max_starts_per_minute = 1;
        let orch = Orchestrator::new(InMemoryStagingStore::new(), config);
        orch.start_or_resume("JOB-1", "in.xlsx", "tester").await.unwrap();
        let err = orch.start_or_resume("JOB-2", "in.xlsx", "tester").await.unwrap_err();
        assert!(matches!(err, Error::RateLimited { .. }));
    }

    fn xlsx_bytes(header: &[&str], rows: &[Vec<&str>]) -> Vec<u8> {
        use std::io::Write;
        use zip::write::{FileOptions, ZipWriter};

        let mut buf = Vec::new();
        {
            let cursor = std::io::Cursor::new(&mut buf);
            let mut zip = ZipWriter::new(cursor);
            let options = FileOptions::default();

            zip.start_file("_rels/.rels", options).unwrap();
            zip.write_all(br#"<?xml version="1.0"?><Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/></Relationships>"#).unwrap();

            zip.start_file("xl/_rels/workbook.xml.rels", options).unwrap();
            zip.write_all(br#"<?xml version="1.0"?><Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/></Relationships>"#).unwrap();

            zip.start_file("xl/worksheets/sheet1.xml", options).unwrap();
            let mut sheet = String::from(r#"<?xml version="1.0"?><worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>"#);
            sheet.push_str(&format!(r#"<row r="1">{}</row>"#, header.iter().enumerate().map(|(i, h)| format!(r#"<c r="{}1" t="inlineStr"><is><t>{}</t></is></c>"#, col_letter(i as u32 + 1), h)).collect::<String>()));
            for (r, row) in rows.iter().enumerate() {
                let row_num = r as u32 + 2;
                sheet.push_str(&format!(r#"<row r="{row_num}">{}</row>"#, row.iter().enumerate().map(|(i, v)| format!(r#"<c r="{}{row_num}" t="inlineStr"><is><t>{}</t></is></c>"#, col_letter(i as u32 + 1), v)).collect::<String>()));
            }
            sheet.push_str("</sheetData></worksheet>");
            zip.write_all(sheet.as_bytes()).unwrap();
            zip.finish().unwrap();
        }
        buf
    }

    fn col_letter(mut col: u32) -> String {
        let mut letters = Vec::new();
        while col > 0 {
            let rem = (col - 1) % 26;
            letters.push((b'A' + rem as u8) as char);
            col = (col - 1) / 26;
        }
        letters.iter().rev().collect()
    }

    #[tokio::test]
    async fn test_full_ingest_validate_flow_produces_expected_counts() {
        let orch = orchestrator();
        let (job, _) = orch.start_or_resume("JOB-1", "in.xlsx", "tester").await.unwrap();

        let bytes = xlsx_bytes(&["name"], &[vec!["Alice"], vec![""]]);
        let descriptors = vec![FieldDescriptor::new("name", ColumnHint::Name("name".to_string()), FieldKind::Text).required()];
        let job = orch.ingest(job, bytes, &descriptors, RowValidator::new(), CancellationToken::new()).await.unwrap();
        assert_eq!(job.phase, Phase::IngestCompleted);
        assert_eq!(job.total_rows, 2);
        assert_eq!(job.valid_rows, 1);
        assert_eq!(job.error_rows, 1);

        let job = orch.validate(job, &descriptors).await.unwrap();
        assert_eq!(job.phase, Phase::Validated);
        assert_eq!(orch.staging.count_valid(&job.job_id).await.unwrap(), 1);
        assert_eq!(orch.staging.count_errors(&job.job_id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_validate_flags_duplicate_natural_key_within_file() {
        let orch = orchestrator();
        let (job, _) = orch.start_or_resume("JOB-1", "in.xlsx", "tester").await.unwrap();

        let bytes = xlsx_bytes(&["code"], &[vec!["A1"], vec!["A1"], vec!["A2"]]);
        let descriptors = vec![FieldDescriptor::new("code", ColumnHint::Name("code".to_string()), FieldKind::Identifier)];
        let job = orch.ingest(job, bytes, &descriptors, RowValidator::new(), CancellationToken::new()).await.unwrap();
        assert_eq!(job.valid_rows, 3); // no per-row errors yet, duplicates caught at validate

        let job = orch.validate(job, &descriptors).await.unwrap();
        assert_eq!(orch.staging.count_valid(&job.job_id).await.unwrap(), 2);
        assert_eq!(orch.staging.count_errors(&job.job_id).await.unwrap(), 1);

        let errors = orch.staging.stream_errors(&job.job_id).await.unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].raw.error_code.as_deref(), Some("DUPLICATE_KEY"));
    }

    #[tokio::test]
    async fn test_write_error_file_includes_source_columns_and_error_details() {
        let orch = orchestrator();
        let (job, _) = orch.start_or_resume("JOB-1", "in.xlsx", "tester").await.unwrap();
        let bytes = xlsx_bytes(&["name"], &[vec![""]]);
        let descriptors = vec![FieldDescriptor::new("name", ColumnHint::Name("name".to_string()), FieldKind::Text).required()];
        let job = orch.ingest(job, bytes, &descriptors, RowValidator::new(), CancellationToken::new()).await.unwrap();
        let job = orch.validate(job, &descriptors).await.unwrap();

        let mut buf = Vec::new();
        {
            let cursor = std::io::Cursor::new(&mut buf);
            orch.write_error_file(&job.job_id, &["name".to_string()], cursor).await.unwrap();
        }
        let mut archive = zip::ZipArchive::new(std::io::Cursor::new(buf)).unwrap();
        let mut sheet = archive.by_name("xl/worksheets/sheet1.xml").unwrap();
        let mut content = String::new();
        std::io::Read::read_to_string(&mut sheet, &mut content).unwrap();
        assert!(content.contains("REQUIRED_NAME"));
    }

    struct CountingSink;
    #[async_trait]
    impl ApplySink for CountingSink {
        async fn apply_batch(&self, rows: &[StagedRow]) -> Result<u64> {
            Ok(rows.len() as u64)
        }
    }

    #[tokio::test]
    async fn test_apply_and_reconcile_succeed_when_counts_match() {
        let orch = orchestrator();
        let (job, _) = orch.start_or_resume("JOB-1", "in.xlsx", "tester").await.unwrap();
        let bytes = xlsx_bytes(&["name"], &[vec!["Alice"]]);
        let descriptors = vec![FieldDescriptor::new("name", ColumnHint::Name("name".to_string()), FieldKind::Text)];
        let job = orch.ingest(job, bytes, &descriptors, RowValidator::new(), CancellationToken::new()).await.unwrap();
        let job = orch.validate(job, &descriptors).await.unwrap();
        let job = orch.apply(job, Arc::new(CountingSink), CancellationToken::new()).await.unwrap();
        assert_eq!(job.phase, Phase::Applied);
        let job = orch.reconcile(job, 1).await.unwrap();
        assert_eq!(job.phase, Phase::Completed);
    }

    #[tokio::test]
    async fn test_reconcile_fails_on_count_mismatch() {
        let orch = orchestrator();
        let (job, _) = orch.start_or_resume("JOB-1", "in.xlsx", "tester").await.unwrap();
        let bytes = xlsx_bytes(&["name"], &[vec!["Alice"]]);
        let descriptors = vec![FieldDescriptor::new("name", ColumnHint::Name("name".to_string()), FieldKind::Text)];
        let job = orch.ingest(job, bytes, &descriptors, RowValidator::new(), CancellationToken::new()).await.unwrap();
        let job = orch.validate(job, &descriptors).await.unwrap();
        let job = orch.apply(job, Arc::new(CountingSink), CancellationToken::new()).await.unwrap();
        let err = orch.reconcile(job, 0).await.unwrap_err();
        assert!(matches!(err, Error::ReconciliationMismatch { .. }));
    }
}
