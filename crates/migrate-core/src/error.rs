//! Error types for the migration core library.
//!
//! Fatal errors (file/IO/structural) are represented here as [`Error`]
//! variants. Row-local validation failures are NOT represented as
//! `Result::Err` anywhere in this crate; they are data attached to a
//! [`crate::row::RawStagedRow`] so that one bad row never aborts a run.

use thiserror::Error;

/// The top-level error type for the migration core library.
#[derive(Error, Debug)]
pub enum Error {
    /// The workbook's declared dimension (or a streaming row count)
    /// exceeds the configured `maxRows`/`maxCells` policy.
    #[error("file too large: {reason}")]
    FileTooLarge { reason: String },

    /// The container is not a valid ZIP, or a required part is missing or
    /// malformed beyond recovery.
    #[error("file corrupt: {0}")]
    FileCorrupt(String),

    /// An underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An error originating from the ZIP container layer.
    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// An error encountered while parsing worksheet or part XML.
    #[error("XML parse error: {0}")]
    XmlParse(#[from] quick_xml::Error),

    /// An error encountered while deserializing a bounded XML part
    /// (shared strings, styles, relationships) into typed structures.
    #[error("XML deserialization error: {0}")]
    XmlDeserialize(#[from] quick_xml::DeError),

    /// A header-binding schema was ambiguous: two distinct source headers
    /// normalized to the same key. Raised at descriptor-build time, never
    /// at row-mapping time.
    #[error("ambiguous header binding: '{header_a}' and '{header_b}' both normalize to '{normalized}'")]
    AmbiguousHeaderBinding {
        header_a: String,
        header_b: String,
        normalized: String,
    },

    /// The requested job id does not exist in the staging store.
    #[error("job not found: {0}")]
    JobNotFound(String),

    /// A restart or phase invocation was attempted on a job whose current
    /// phase does not permit it (e.g. validating a job still INGESTING).
    #[error("invalid phase transition: job {job_id} is in phase {current:?}, cannot run {attempted}")]
    InvalidPhaseTransition {
        job_id: String,
        current: crate::job::Phase,
        attempted: &'static str,
    },

    /// Apply succeeded but the post-apply counts did not reconcile.
    #[error("reconciliation mismatch: expected {expected} inserted, found {actual}")]
    ReconciliationMismatch { expected: u64, actual: u64 },

    /// The sliding-window circuit breaker is open; the caller should back
    /// off rather than retry immediately.
    #[error("circuit open, retry after {retry_after_secs}s")]
    CircuitOpen { retry_after_secs: u64 },

    /// The orchestrator's start-rate limiter rejected a new job start.
    #[error("rate limited: at most {limit} job starts per minute per instance")]
    RateLimited { limit: u32 },

    /// A transient fault surfaced by an `ApplySink`'s target database
    /// (deadlock, statement timeout, connection loss) rather than by this
    /// crate's own I/O. Distinct from `Internal` so the batch executor's
    /// retry path can actually be exercised by a real target failure.
    #[error("transient database error: {0}")]
    TransientDb(String),

    /// A staging-store-backed error (e.g. the sqlite backend).
    #[cfg(feature = "sqlite-staging")]
    #[error("staging store error: {0}")]
    Staging(#[from] rusqlite::Error),

    /// An internal or otherwise unclassified error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// The short token surfaced in HTTP envelopes and row `errorCode`
    /// columns, per the error-handling design.
    pub fn code(&self) -> &'static str {
        match self {
            Error::FileTooLarge { .. } => "FILE_TOO_LARGE",
            Error::FileCorrupt(_) => "FILE_CORRUPT",
            Error::Io(_) => "IO_ERROR",
            Error::Zip(_) => "FILE_CORRUPT",
            Error::XmlParse(_) | Error::XmlDeserialize(_) => "FILE_CORRUPT",
            Error::AmbiguousHeaderBinding { .. } => "AMBIGUOUS_HEADER_BINDING",
            Error::JobNotFound(_) => "JOB_NOT_FOUND",
            Error::InvalidPhaseTransition { .. } => "INVALID_PHASE_TRANSITION",
            Error::ReconciliationMismatch { .. } => "RECONCILIATION_MISMATCH",
            Error::CircuitOpen { .. } => "CIRCUIT_OPEN",
            Error::RateLimited { .. } => "RATE_LIMITED",
            Error::TransientDb(_) => "TRANSIENT_DB",
            #[cfg(feature = "sqlite-staging")]
            Error::Staging(_) => "IO_ERROR",
            Error::Internal(_) => "INTERNAL",
        }
    }

    /// Whether the HTTP envelope should mark this error retryable.
    pub fn retryable(&self) -> bool {
        matches!(self, Error::CircuitOpen { .. } | Error::RateLimited { .. } | Error::TransientDb(_))
    }
}

/// A convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
