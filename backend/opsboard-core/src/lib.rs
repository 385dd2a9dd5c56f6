// src/lib.rs
//! Scheduling and operations core for multi-location businesses.
//!
//! The crate turns task templates and shift records into a time-bound
//! operational picture: recurring templates are expanded into virtual
//! occurrences, each occurrence is classified against its deadline and the
//! shift coverage for its locations, and the results are grouped into the
//! dashboard buckets. Alongside the read side, two write-side engines own
//! the schedule-period lifecycle (draft -> published -> locked, with change
//! requests once locked) and the attendance exception workflow.
//!
//! All time-sensitive functions take "now" as an explicit parameter; the
//! crate never reads a system clock.

use thiserror::Error;

pub mod coverage;
pub mod deadline;
pub mod governance;
pub mod grouping;
pub mod schedule;
pub mod tasks;
pub mod workforce;

mod governance_tests;

pub use coverage::{has_coverage, CoverageMode};
pub use deadline::{
    is_late_completion, is_overdue, materialize_completion, resolve_deadline, resolve_start,
    ViewContext,
};
pub use governance::{ChangeRequest, ChangeType, RequestStatus, ScheduleGovernance};
pub use grouping::{categorize, group_occurrences, OccurrenceCategory, OccurrenceGroups};
pub use schedule::{week_start_of, PeriodState, SchedulePeriod, Shift};
pub use tasks::{
    assemble_occurrences, expand, recover_base_id, virtual_occurrence_date, virtual_occurrence_id,
    Occurrence, RecurrenceType, TaskStatus, TaskTemplate,
};
pub use workforce::{
    AttendanceEvent, ExceptionStatus, ExceptionType, SharedExceptions, UnscheduledClockInPolicy,
    WorkforceException, WorkforceExceptionEngine, WorkforcePolicy,
};

// --- Error Taxonomy ---

/// Malformed input, surfaced synchronously and never partially applied.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationIssue {
    #[error("recurrence interval must be at least 1, got {interval}")]
    NonPositiveInterval { interval: i32 },
    #[error("expansion window is empty: {start} is after {end}")]
    EmptyWindow {
        start: chrono::NaiveDate,
        end: chrono::NaiveDate,
    },
    #[error("a reason code is required for change requests against a locked period")]
    ReasonCodeRequired,
    #[error("change request targets unknown shift {shift_id}")]
    UnknownShift { shift_id: String },
    #[error("unknown schedule period: {period_id}")]
    UnknownPeriod { period_id: String },
    #[error("unknown change request: {request_id}")]
    UnknownRequest { request_id: String },
    #[error("unknown workforce exception: {exception_id}")]
    UnknownException { exception_id: String },
    #[error("edit and delete requests must name a target shift")]
    MissingTargetShift,
    #[error("change request carries no shift payload to apply")]
    MissingPayload,
    #[error("change request payload does not decode to a shift: {detail}")]
    MalformedPayload { detail: String },
    #[error("{outcome:?} is not a terminal exception outcome")]
    NonTerminalOutcome { outcome: workforce::ExceptionStatus },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Malformed request; nothing was applied.
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationIssue),
    /// Optimistic-guard failure: state changed between read and write.
    /// The caller should refetch and may retry.
    #[error("conflict on {entity}: {detail}")]
    Conflict { entity: String, detail: String },
    /// Well-formed but currently disallowed by policy.
    #[error("blocked by policy: {detail}")]
    PolicyBlock { detail: String },
}

impl CoreError {
    pub(crate) fn conflict(entity: &str, detail: impl Into<String>) -> Self {
        CoreError::Conflict {
            entity: entity.to_string(),
            detail: detail.into(),
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, CoreError::Conflict { .. })
    }

    pub fn is_policy_block(&self) -> bool {
        matches!(self, CoreError::PolicyBlock { .. })
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
