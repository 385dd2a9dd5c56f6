// src/tasks.rs
use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::schedule::LocationId;
use crate::{CoreResult, ValidationIssue};

pub type TaskId = String;

/// Separator between a template id and the occurrence date in a virtual
/// occurrence identity. Base ids are opaque UUID-shaped strings, so the
/// separator never appears inside one.
pub const VIRTUAL_ID_SEPARATOR: &str = "::";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecurrenceType {
    None,
    Daily,
    Weekly,
    Monthly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Archived,
}

/// The persisted task definition from which occurrences derive.
///
/// Temporal shape is either a fixed `due_at` or a `start_at` +
/// `duration_minutes` window. `status` and the completion fields apply to
/// the base record only; virtual occurrences derived from it carry their
/// own date and are never completed in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskTemplate {
    pub id: TaskId,
    pub title: String,
    pub due_at: Option<NaiveDateTime>,
    pub start_at: Option<NaiveDateTime>,
    pub duration_minutes: Option<i64>,
    pub recurrence_type: RecurrenceType,
    pub recurrence_interval: i32,
    pub recurrence_end_date: Option<NaiveDate>,
    pub assignee_id: Option<String>,
    pub role_id: Option<String>,
    pub location_ids: Vec<LocationId>,
    pub status: TaskStatus,
    pub created_by: Option<String>,
    pub completed_at: Option<NaiveDateTime>,
    /// Whether completion happened after the resolved deadline. Stamped
    /// once at completion time; never recomputed live.
    pub completed_late: Option<bool>,
}

impl TaskTemplate {
    /// The anchor instant recurrence steps from: the fixed due time, or
    /// the start of the working window.
    pub fn anchor(&self) -> Option<NaiveDateTime> {
        self.due_at.or(self.start_at)
    }

    pub fn is_recurring(&self) -> bool {
        self.recurrence_type != RecurrenceType::None
    }

    pub fn is_completed(&self) -> bool {
        self.status == TaskStatus::Completed
    }
}

// --- Occurrence Identity ---

/// A single dated instance of a task: the persisted row itself, or a
/// virtual instance derived at read time for a future recurrence date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Occurrence {
    Persisted(TaskTemplate),
    Virtual { base: TaskTemplate, date: NaiveDate },
}

impl Occurrence {
    pub fn template(&self) -> &TaskTemplate {
        match self {
            Occurrence::Persisted(template) => template,
            Occurrence::Virtual { base, .. } => base,
        }
    }

    /// Globally unique identity: the row id for persisted occurrences,
    /// `{base_id}::{date}` for virtual ones.
    pub fn occurrence_id(&self) -> String {
        match self {
            Occurrence::Persisted(template) => template.id.clone(),
            Occurrence::Virtual { base, date } => virtual_occurrence_id(&base.id, *date),
        }
    }

    pub fn base_id(&self) -> &str {
        &self.template().id
    }

    /// Virtual occurrences are never completed; only the persisted row
    /// carries completion state.
    pub fn is_completed(&self) -> bool {
        match self {
            Occurrence::Persisted(template) => template.is_completed(),
            Occurrence::Virtual { .. } => false,
        }
    }

    pub fn location_ids(&self) -> &[LocationId] {
        &self.template().location_ids
    }

    /// The concrete date of this occurrence, where one is known.
    pub fn date(&self) -> Option<NaiveDate> {
        match self {
            Occurrence::Persisted(template) => template.anchor().map(|dt| dt.date()),
            Occurrence::Virtual { date, .. } => Some(*date),
        }
    }
}

pub fn virtual_occurrence_id(base_id: &str, date: NaiveDate) -> String {
    format!("{base_id}{VIRTUAL_ID_SEPARATOR}{date}")
}

/// Recovers the template id from any occurrence identity. Persisted ids
/// pass through unchanged; a virtual id loses its date suffix.
pub fn recover_base_id(occurrence_id: &str) -> &str {
    match occurrence_id.rsplit_once(VIRTUAL_ID_SEPARATOR) {
        Some((base, tail)) if parse_iso_date(tail).is_some() => base,
        _ => occurrence_id,
    }
}

/// The date component of a virtual occurrence identity, if the identity
/// has one.
pub fn virtual_occurrence_date(occurrence_id: &str) -> Option<NaiveDate> {
    occurrence_id
        .rsplit_once(VIRTUAL_ID_SEPARATOR)
        .and_then(|(_, tail)| parse_iso_date(tail))
}

fn parse_iso_date(text: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(text, "%Y-%m-%d").ok()
}

// --- Occurrence Engine ---

/// Lazy sequence of the virtual occurrence dates of one template inside a
/// window. Holds its own cursor, so every call to [`expand`] yields an
/// identical, restartable sequence.
#[derive(Debug, Clone)]
pub struct VirtualOccurrences {
    anchor: Option<NaiveDate>,
    recurrence: RecurrenceType,
    interval: i64,
    window_start: NaiveDate,
    /// Already clamped by `recurrence_end_date`.
    effective_end: NaiveDate,
    step: i64,
}

impl Iterator for VirtualOccurrences {
    type Item = NaiveDate;

    fn next(&mut self) -> Option<NaiveDate> {
        let anchor = self.anchor?;
        if self.recurrence == RecurrenceType::None {
            return None;
        }
        loop {
            let stepped = match self.recurrence {
                RecurrenceType::Daily => {
                    anchor.checked_add_signed(Duration::days(self.step * self.interval))?
                }
                RecurrenceType::Weekly => {
                    anchor.checked_add_signed(Duration::days(7 * self.step * self.interval))?
                }
                RecurrenceType::Monthly => add_months_clamped(anchor, self.step * self.interval)?,
                RecurrenceType::None => return None,
            };
            self.step += 1;
            if stepped > self.effective_end {
                return None;
            }
            if stepped < self.window_start {
                continue;
            }
            return Some(stepped);
        }
    }
}

/// Expands a recurring template into its virtual occurrence dates inside
/// `[window_start, window_end]`.
///
/// The template's own anchor date is never re-synthesized virtually; the
/// persisted row already represents it. Non-recurring templates produce an
/// empty sequence. A non-positive interval on a recurring template is a
/// validation error, not a silent default.
pub fn expand(
    template: &TaskTemplate,
    window_start: NaiveDate,
    window_end: NaiveDate,
) -> CoreResult<VirtualOccurrences> {
    if window_start > window_end {
        return Err(ValidationIssue::EmptyWindow {
            start: window_start,
            end: window_end,
        }
        .into());
    }
    if template.is_recurring() && template.recurrence_interval <= 0 {
        return Err(ValidationIssue::NonPositiveInterval {
            interval: template.recurrence_interval,
        }
        .into());
    }

    let effective_end = match template.recurrence_end_date {
        Some(end_date) => window_end.min(end_date),
        None => window_end,
    };
    debug!(
        "Expanding template {} ({:?} x{}) over [{}, {}]",
        template.id, template.recurrence_type, template.recurrence_interval, window_start,
        effective_end
    );

    Ok(VirtualOccurrences {
        anchor: template.anchor().map(|dt| dt.date()),
        recurrence: template.recurrence_type,
        interval: i64::from(template.recurrence_interval.max(1)),
        window_start,
        effective_end,
        step: 1,
    })
}

/// Calendar-aware month stepping. The k-th occurrence is always computed
/// from the anchor, so a day-31 anchor clamps to Feb 29 in a leap February
/// and still lands on Mar 31 the month after.
fn add_months_clamped(anchor: NaiveDate, months: i64) -> Option<NaiveDate> {
    let zero_based = i64::from(anchor.year()) * 12 + i64::from(anchor.month0()) + months;
    let year = i32::try_from(zero_based.div_euclid(12)).ok()?;
    let month = u32::try_from(zero_based.rem_euclid(12)).ok()? + 1;
    let day = anchor.day().min(days_in_month(year, month)?);
    NaiveDate::from_ymd_opt(year, month, day)
}

fn days_in_month(year: i32, month: u32) -> Option<u32> {
    let first_of_next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    Some((first_of_next - Duration::days(1)).day())
}

/// Composes the raw occurrence set for a window: persisted rows that are
/// still relevant to it plus every expanded virtual date. This is the
/// input the grouping pipeline consumes.
pub fn assemble_occurrences(
    templates: &[TaskTemplate],
    window_start: NaiveDate,
    window_end: NaiveDate,
) -> CoreResult<Vec<Occurrence>> {
    let mut occurrences = Vec::new();
    for template in templates {
        if template.status == TaskStatus::Archived {
            continue;
        }
        if persisted_row_in_window(template, window_start, window_end) {
            occurrences.push(Occurrence::Persisted(template.clone()));
        }
        for date in expand(template, window_start, window_end)? {
            occurrences.push(Occurrence::Virtual {
                base: template.clone(),
                date,
            });
        }
    }
    debug!(
        "Assembled {} occurrences over [{}, {}] from {} templates",
        occurrences.len(),
        window_start,
        window_end,
        templates.len()
    );
    Ok(occurrences)
}

/// A persisted row belongs to the window when its own date falls inside
/// it, or when it is still incomplete from before the window (an overdue
/// task stays on the board until handled). Rows anchored after the window
/// are out; rows with no anchor at all are always in play.
fn persisted_row_in_window(
    template: &TaskTemplate,
    window_start: NaiveDate,
    window_end: NaiveDate,
) -> bool {
    match template.anchor() {
        Some(anchor) => {
            let date = anchor.date();
            if date > window_end {
                return false;
            }
            date >= window_start || !template.is_completed()
        }
        None => !template.is_completed(),
    }
}
