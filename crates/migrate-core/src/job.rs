//! Job and phase bookkeeping: the migration's unit of work and the
//! state machine it moves through.

use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// The migration's phase state machine. Every job moves monotonically
/// forward through these phases except `Failed`, which is terminal but
/// restartable: re-running ingestion for a failed job resumes from its
/// last completed phase rather than starting over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Pending,
    Ingesting,
    IngestCompleted,
    Validating,
    Validated,
    Applying,
    Applied,
    Reconciling,
    Completed,
    Failed,
}

impl Phase {
    /// Phases reachable directly from this one via a single successful
    /// transition, not counting the `Failed` escape hatch every
    /// non-terminal phase can take.
    pub fn next(self) -> Option<Phase> {
        match self {
            Phase::Pending => Some(Phase::Ingesting),
            Phase::Ingesting => Some(Phase::IngestCompleted),
            Phase::IngestCompleted => Some(Phase::Validating),
            Phase::Validating => Some(Phase::Validated),
            Phase::Validated => Some(Phase::Applying),
            Phase::Applying => Some(Phase::Applied),
            Phase::Applied => Some(Phase::Reconciling),
            Phase::Reconciling => Some(Phase::Completed),
            Phase::Completed | Phase::Failed => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Completed | Phase::Failed)
    }

    /// Whether `self -> target` is a legal transition: either the normal
    /// forward step, or a failure from any non-terminal phase.
    pub fn can_transition_to(self, target: Phase) -> bool {
        if self.is_terminal() {
            return false;
        }
        target == Phase::Failed || self.next() == Some(target)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Phase::Pending => "PENDING",
            Phase::Ingesting => "INGESTING",
            Phase::IngestCompleted => "INGEST_COMPLETED",
            Phase::Validating => "VALIDATING",
            Phase::Validated => "VALIDATED",
            Phase::Applying => "APPLYING",
            Phase::Applied => "APPLIED",
            Phase::Reconciling => "RECONCILING",
            Phase::Completed => "COMPLETED",
            Phase::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for Phase {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Phase::Pending),
            "INGESTING" => Ok(Phase::Ingesting),
            "INGEST_COMPLETED" => Ok(Phase::IngestCompleted),
            "VALIDATING" => Ok(Phase::Validating),
            "VALIDATED" => Ok(Phase::Validated),
            "APPLYING" => Ok(Phase::Applying),
            "APPLIED" => Ok(Phase::Applied),
            "RECONCILING" => Ok(Phase::Reconciling),
            "COMPLETED" => Ok(Phase::Completed),
            "FAILED" => Ok(Phase::Failed),
            other => Err(crate::error::Error::Internal(format!("unrecognized phase '{other}'"))),
        }
    }
}

/// A single migration run: one source file, tracked end to end.
#[derive(Debug, Clone)]
pub struct Job {
    pub job_id: String,
    pub file_path: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub phase: Phase,
    pub total_rows: u64,
    pub processed_rows: u64,
    pub error_rows: u64,
    pub valid_rows: u64,
    pub last_error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// The phase the job was in immediately before a `Failed` transition,
    /// so a restart can resume from there instead of from `Pending`.
    pub phase_before_failure: Option<Phase>,
}

impl Job {
    pub fn new(job_id: impl Into<String>, file_path: impl Into<String>, created_by: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            job_id: job_id.into(),
            file_path: file_path.into(),
            created_by: created_by.into(),
            created_at,
            phase: Phase::Pending,
            total_rows: 0,
            processed_rows: 0,
            error_rows: 0,
            valid_rows: 0,
            last_error: None,
            started_at: None,
            finished_at: None,
            phase_before_failure: None,
        }
    }

    /// Attempts to move the job to `target`, returning
    /// `Error::InvalidPhaseTransition` if the move isn't legal from the
    /// job's current phase.
    pub fn transition_to(&mut self, target: Phase) -> crate::error::Result<()> {
        if !self.phase.can_transition_to(target) {
            return Err(crate::error::Error::InvalidPhaseTransition {
                job_id: self.job_id.clone(),
                current: self.phase,
                attempted: phase_name(target),
            });
        }
        if target == Phase::Failed {
            self.phase_before_failure = Some(self.phase);
        }
        self.phase = target;
        if target.is_terminal() {
            self.finished_at = Some(Utc::now());
        } else if target == Phase::Ingesting && self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
        Ok(())
    }

    /// The phase a restart should resume from: the phase recorded just
    /// before failure, or `Pending` if the job never started.
    pub fn resume_phase(&self) -> Phase {
        match self.phase {
            Phase::Failed => self.phase_before_failure.unwrap_or(Phase::Pending),
            other => other,
        }
    }
}

fn phase_name(phase: Phase) -> &'static str {
    match phase {
        Phase::Pending => "PENDING",
        Phase::Ingesting => "INGESTING",
        Phase::IngestCompleted => "INGEST_COMPLETED",
        Phase::Validating => "VALIDATING",
        Phase::Validated => "VALIDATED",
        Phase::Applying => "APPLYING",
        Phase::Applied => "APPLIED",
        Phase::Reconciling => "RECONCILING",
        Phase::Completed => "COMPLETED",
        Phase::Failed => "FAILED",
    }
}

/// A row as it lands in the raw staging table, before validation. The
/// field map mirrors the worksheet columns by their mapped field name.
#[derive(Debug, Clone)]
pub struct RawStagedRow {
    pub job_id: String,
    pub row_number: u32,
    pub fields: HashMap<String, crate::cell::CellValue>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

impl RawStagedRow {
    pub fn new(job_id: impl Into<String>, row_number: u32, fields: HashMap<String, crate::cell::CellValue>) -> Self {
        Self {
            job_id: job_id.into(),
            row_number,
            fields,
            error_code: None,
            error_message: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn job() -> Job {
        Job::new("JOB-20260101-001", "in.xlsx", "tester", Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap())
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut j = job();
        for target in [
            Phase::Ingesting,
            Phase::IngestCompleted,
            Phase::Validating,
            Phase::Validated,
            Phase::Applying,
            Phase::Applied,
            Phase::Reconciling,
            Phase::Completed,
        ] {
            j.transition_to(target).unwrap();
        }
        assert_eq!(j.phase, Phase::Completed);
        assert!(j.finished_at.is_some());
    }

    #[test]
    fn test_skipping_a_phase_is_rejected() {
        let mut j = job();
        let err = j.transition_to(Phase::Validating).unwrap_err();
        assert!(matches!(err, crate::error::Error::InvalidPhaseTransition { .. }));
    }

    #[test]
    fn test_failure_is_reachable_from_any_non_terminal_phase() {
        let mut j = job();
        j.transition_to(Phase::Ingesting).unwrap();
        j.transition_to(Phase::Failed).unwrap();
        assert_eq!(j.phase, Phase::Failed);
        assert!(j.finished_at.is_some());
    }

    #[test]
    fn test_terminal_phases_accept_no_further_transitions() {
        let mut j = job();
        j.transition_to(Phase::Failed).unwrap();
        assert!(j.transition_to(Phase::Ingesting).is_err());
    }

    #[test]
    fn test_resume_phase_recovers_phase_before_failure() {
        let mut j = job();
        j.transition_to(Phase::Ingesting).unwrap();
        j.transition_to(Phase::IngestCompleted).unwrap();
        j.transition_to(Phase::Failed).unwrap();
        assert_eq!(j.resume_phase(), Phase::IngestCompleted);
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(Phase::IngestCompleted.to_string(), "INGEST_COMPLETED");
        assert_eq!(Phase::Failed.to_string(), "FAILED");
    }

    #[test]
    fn test_phase_round_trips_through_display_and_parse() {
        for phase in [
            Phase::Pending,
            Phase::Ingesting,
            Phase::IngestCompleted,
            Phase::Validating,
            Phase::Validated,
            Phase::Applying,
            Phase::Applied,
            Phase::Reconciling,
            Phase::Completed,
            Phase::Failed,
        ] {
            let parsed: Phase = phase.to_string().parse().unwrap();
            assert_eq!(parsed, phase);
        }
    }

    #[test]
    fn test_parse_rejects_unknown_phase_string() {
        assert!("BOGUS".parse::<Phase>().is_err());
    }
}
