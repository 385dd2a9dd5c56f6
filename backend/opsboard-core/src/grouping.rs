// src/grouping.rs
use std::collections::HashSet;

use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::coverage::{has_coverage, CoverageMode};
use crate::deadline::{is_overdue, resolve_start, ViewContext};
use crate::schedule::Shift;
use crate::tasks::Occurrence;

/// The single operational category of an occurrence. Every occurrence
/// lands in exactly one, which is what keeps the dashboard buckets
/// disjoint by construction instead of by set subtraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OccurrenceCategory {
    Completed,
    HappeningNow,
    NoCoverage,
    Overdue,
    Pending,
}

/// Whether `now` falls inside the occurrence's `[start, start + duration)`
/// working window. Completed occurrences are never "happening".
pub fn happening_now(occurrence: &Occurrence, now: NaiveDateTime) -> bool {
    if occurrence.is_completed() {
        return false;
    }
    let (start, minutes) = match (resolve_start(occurrence), occurrence.template().duration_minutes)
    {
        (Some(start), Some(minutes)) => (start, minutes),
        _ => return false,
    };
    start <= now && now < start + Duration::minutes(minutes)
}

/// The explicit priority function behind the buckets.
///
/// Completed short-circuits everything; an in-flight occurrence is its own
/// category; between the rest, a staffing gap outranks lateness and
/// lateness outranks pending. The ordering is a deliberate tie-break: an
/// overdue-and-uncovered occurrence reports as no-coverage because the
/// actionable problem is staffing, not lateness.
pub fn categorize(
    occurrence: &Occurrence,
    shifts: &[Shift],
    now: NaiveDateTime,
    mode: CoverageMode,
    context: ViewContext,
) -> OccurrenceCategory {
    if occurrence.is_completed() {
        return OccurrenceCategory::Completed;
    }
    if happening_now(occurrence, now) {
        return OccurrenceCategory::HappeningNow;
    }
    if !has_coverage(occurrence, shifts, mode) {
        return OccurrenceCategory::NoCoverage;
    }
    if is_overdue(occurrence, now, context) {
        return OccurrenceCategory::Overdue;
    }
    OccurrenceCategory::Pending
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OccurrenceGroups {
    pub pending: Vec<Occurrence>,
    pub overdue: Vec<Occurrence>,
    pub no_coverage: Vec<Occurrence>,
    pub completed: Vec<Occurrence>,
    pub happening_now: Vec<Occurrence>,
}

impl OccurrenceGroups {
    pub fn total(&self) -> usize {
        self.pending.len()
            + self.overdue.len()
            + self.no_coverage.len()
            + self.completed.len()
            + self.happening_now.len()
    }
}

/// Partitions a window's occurrences into the five dashboard buckets.
///
/// Identity is the full occurrence id, so two virtual dates of the same
/// template are distinct entries while a duplicate of the same dated
/// occurrence is dropped. Each surviving identity lands in exactly one
/// bucket via [`categorize`].
pub fn group_occurrences(
    occurrences: Vec<Occurrence>,
    shifts: &[Shift],
    now: NaiveDateTime,
    mode: CoverageMode,
    context: ViewContext,
) -> OccurrenceGroups {
    let mut groups = OccurrenceGroups::default();
    let mut seen: HashSet<String> = HashSet::new();

    for occurrence in occurrences {
        let identity = occurrence.occurrence_id();
        if !seen.insert(identity.clone()) {
            debug!("Dropping duplicate occurrence identity {}", identity);
            continue;
        }
        match categorize(&occurrence, shifts, now, mode, context) {
            OccurrenceCategory::Completed => groups.completed.push(occurrence),
            OccurrenceCategory::HappeningNow => groups.happening_now.push(occurrence),
            OccurrenceCategory::NoCoverage => groups.no_coverage.push(occurrence),
            OccurrenceCategory::Overdue => groups.overdue.push(occurrence),
            OccurrenceCategory::Pending => groups.pending.push(occurrence),
        }
    }

    debug!(
        "Grouped {} occurrences: {} pending, {} overdue, {} no-coverage, {} completed, {} happening now",
        groups.total(),
        groups.pending.len(),
        groups.overdue.len(),
        groups.no_coverage.len(),
        groups.completed.len(),
        groups.happening_now.len()
    );
    groups
}
