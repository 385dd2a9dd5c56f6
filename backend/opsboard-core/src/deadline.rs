// src/deadline.rs
use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::tasks::{virtual_occurrence_id, Occurrence, RecurrenceType, TaskStatus, TaskTemplate};

/// The display context a caller is classifying for. Context is supplied by
/// the display collaborator; the core never infers it from data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewContext {
    Today,
    Tomorrow,
    All,
}

impl ViewContext {
    /// A view whose dates are definitionally in the future. Occurrences
    /// shown under it can never be overdue, whatever the raw comparison
    /// says; context and deadline must never disagree on screen.
    pub fn is_future_view(self) -> bool {
        matches!(self, ViewContext::Tomorrow)
    }
}

/// Re-bases a template timestamp onto a virtual occurrence date, keeping
/// the time of day.
fn rebase(instant: NaiveDateTime, date: NaiveDate) -> NaiveDateTime {
    date.and_time(instant.time())
}

/// The effective due instant of an occurrence.
///
/// Precedence: `start_at + duration_minutes` when both are present,
/// otherwise `due_at`, otherwise no deadline (and never overdue). Virtual
/// occurrences re-base the template's time of day onto their own date.
pub fn resolve_deadline(occurrence: &Occurrence) -> Option<NaiveDateTime> {
    let template = occurrence.template();
    let (due_at, start_at) = occurrence_times(occurrence);
    match (start_at, template.duration_minutes) {
        (Some(start), Some(minutes)) => Some(start + Duration::minutes(minutes)),
        _ => due_at,
    }
}

/// The working-window start of an occurrence, if it has one.
pub fn resolve_start(occurrence: &Occurrence) -> Option<NaiveDateTime> {
    occurrence_times(occurrence).1
}

fn occurrence_times(occurrence: &Occurrence) -> (Option<NaiveDateTime>, Option<NaiveDateTime>) {
    let template = occurrence.template();
    match occurrence {
        Occurrence::Persisted(_) => (template.due_at, template.start_at),
        Occurrence::Virtual { date, .. } => (
            template.due_at.map(|dt| rebase(dt, *date)),
            template.start_at.map(|dt| rebase(dt, *date)),
        ),
    }
}

/// An occurrence is overdue iff its resolved deadline is strictly in the
/// past and it is not completed. In an explicitly-future view context this
/// is always false.
pub fn is_overdue(occurrence: &Occurrence, now: NaiveDateTime, context: ViewContext) -> bool {
    if context.is_future_view() {
        return false;
    }
    if occurrence.is_completed() {
        return false;
    }
    matches!(resolve_deadline(occurrence), Some(deadline) if deadline < now)
}

/// Whether a completion at `completed_at` lands after the occurrence's
/// resolved deadline. Distinct from overdue: late applies only to
/// completed occurrences, is computed once at completion time, and is
/// stored on the row rather than recomputed live.
pub fn is_late_completion(occurrence: &Occurrence, completed_at: NaiveDateTime) -> bool {
    matches!(resolve_deadline(occurrence), Some(deadline) if completed_at > deadline)
}

/// Produces the persisted row that completing an occurrence writes back.
///
/// Completing the persisted row stamps it in place. Completing a virtual
/// occurrence materializes a new dated row: its identity is the virtual
/// occurrence id, its times are re-based onto the occurrence date, and it
/// carries no recurrence of its own (the base template keeps recurring).
/// The `completed_late` flag is stamped here, once.
pub fn materialize_completion(occurrence: &Occurrence, completed_at: NaiveDateTime) -> TaskTemplate {
    let late = is_late_completion(occurrence, completed_at);
    match occurrence {
        Occurrence::Persisted(template) => {
            let mut row = template.clone();
            row.status = TaskStatus::Completed;
            row.completed_at = Some(completed_at);
            row.completed_late = Some(late);
            row
        }
        Occurrence::Virtual { base, date } => {
            let mut row = base.clone();
            row.id = virtual_occurrence_id(&base.id, *date);
            row.due_at = base.due_at.map(|dt| rebase(dt, *date));
            row.start_at = base.start_at.map(|dt| rebase(dt, *date));
            row.recurrence_type = RecurrenceType::None;
            row.recurrence_end_date = None;
            row.status = TaskStatus::Completed;
            row.completed_at = Some(completed_at);
            row.completed_late = Some(late);
            row
        }
    }
}
