// src/coverage.rs
use serde::{Deserialize, Serialize};

use crate::deadline::{resolve_deadline, resolve_start};
use crate::schedule::Shift;
use crate::tasks::Occurrence;

/// Whether unpublished shifts count toward coverage. Live dashboards only
/// trust published shifts; planners need visibility before publishing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoverageMode {
    Live,
    Planning,
}

/// Whether at least one shift staffs this occurrence: the shift's location
/// must be one of the occurrence's associated locations and its
/// `[start, end)` window must contain the occurrence's deadline (or its
/// start time when no deadline resolves).
///
/// An occurrence with no temporal anchor, or no location association, can
/// never be covered; no-coverage is its own operational signal, not a
/// variant of pending.
pub fn has_coverage(occurrence: &Occurrence, shifts: &[Shift], mode: CoverageMode) -> bool {
    let instant = match resolve_deadline(occurrence).or_else(|| resolve_start(occurrence)) {
        Some(instant) => instant,
        None => return false,
    };
    shifts.iter().any(|shift| {
        (shift.published || mode == CoverageMode::Planning)
            && occurrence
                .location_ids()
                .iter()
                .any(|location| *location == shift.location_id)
            && shift.contains(instant)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::{RecurrenceType, TaskStatus, TaskTemplate};
    use chrono::NaiveDateTime;

    fn dt(datetime_str: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(datetime_str, "%Y-%m-%d %H:%M:%S")
            .unwrap_or_else(|_| panic!("Invalid datetime string format: {}", datetime_str))
    }

    fn build_shift(id: &str, location: &str, start: &str, end: &str, published: bool) -> Shift {
        Shift {
            id: id.to_string(),
            company_id: "c1".to_string(),
            location_id: location.to_string(),
            role: None,
            employee_id: Some("e1".to_string()),
            start: dt(start),
            end: dt(end),
            published,
        }
    }

    fn occurrence_due_at(due: &str, locations: &[&str]) -> Occurrence {
        Occurrence::Persisted(TaskTemplate {
            id: "t1".to_string(),
            title: "Task".to_string(),
            due_at: Some(dt(due)),
            start_at: None,
            duration_minutes: None,
            recurrence_type: RecurrenceType::None,
            recurrence_interval: 1,
            recurrence_end_date: None,
            assignee_id: None,
            role_id: None,
            location_ids: locations.iter().map(|l| l.to_string()).collect(),
            status: TaskStatus::Pending,
            created_by: None,
            completed_at: None,
            completed_late: None,
        })
    }

    #[test]
    fn covered_when_a_published_shift_contains_the_deadline() {
        let occurrence = occurrence_due_at("2024-03-04 10:00:00", &["loc-1"]);
        let shifts = [build_shift(
            "s1",
            "loc-1",
            "2024-03-04 08:00:00",
            "2024-03-04 16:00:00",
            true,
        )];
        assert!(has_coverage(&occurrence, &shifts, CoverageMode::Live));
    }

    #[test]
    fn unpublished_shifts_count_only_in_planning_mode() {
        let occurrence = occurrence_due_at("2024-03-04 10:00:00", &["loc-1"]);
        let shifts = [build_shift(
            "s1",
            "loc-1",
            "2024-03-04 08:00:00",
            "2024-03-04 16:00:00",
            false,
        )];
        assert!(!has_coverage(&occurrence, &shifts, CoverageMode::Live));
        assert!(has_coverage(&occurrence, &shifts, CoverageMode::Planning));
    }

    #[test]
    fn any_associated_location_may_match() {
        let occurrence = occurrence_due_at("2024-03-04 10:00:00", &["loc-1", "loc-2"]);
        let shifts = [build_shift(
            "s1",
            "loc-2",
            "2024-03-04 08:00:00",
            "2024-03-04 16:00:00",
            true,
        )];
        assert!(has_coverage(&occurrence, &shifts, CoverageMode::Live));
        assert!(!has_coverage(
            &occurrence_due_at("2024-03-04 10:00:00", &["loc-3"]),
            &shifts,
            CoverageMode::Live
        ));
    }

    #[test]
    fn shift_end_is_exclusive() {
        let occurrence = occurrence_due_at("2024-03-04 16:00:00", &["loc-1"]);
        let shifts = [build_shift(
            "s1",
            "loc-1",
            "2024-03-04 08:00:00",
            "2024-03-04 16:00:00",
            true,
        )];
        assert!(
            !has_coverage(&occurrence, &shifts, CoverageMode::Live),
            "a deadline exactly at shift end is uncovered"
        );
    }

    #[test]
    fn start_time_is_the_fallback_instant() {
        let mut template = match occurrence_due_at("2024-03-04 10:00:00", &["loc-1"]) {
            Occurrence::Persisted(t) => t,
            _ => unreachable!(),
        };
        template.due_at = None;
        template.start_at = Some(dt("2024-03-04 09:00:00"));
        // No duration: no deadline resolves, the start instant is matched.
        let occurrence = Occurrence::Persisted(template);
        let shifts = [build_shift(
            "s1",
            "loc-1",
            "2024-03-04 08:00:00",
            "2024-03-04 10:00:00",
            true,
        )];
        assert!(has_coverage(&occurrence, &shifts, CoverageMode::Live));
    }

    #[test]
    fn no_temporal_anchor_means_no_coverage() {
        let occurrence = Occurrence::Persisted(TaskTemplate {
            id: "t1".to_string(),
            title: "Task".to_string(),
            due_at: None,
            start_at: None,
            duration_minutes: None,
            recurrence_type: RecurrenceType::None,
            recurrence_interval: 1,
            recurrence_end_date: None,
            assignee_id: None,
            role_id: None,
            location_ids: vec!["loc-1".to_string()],
            status: TaskStatus::Pending,
            created_by: None,
            completed_at: None,
            completed_late: None,
        });
        let shifts = [build_shift(
            "s1",
            "loc-1",
            "2024-03-04 00:00:00",
            "2024-03-05 00:00:00",
            true,
        )];
        assert!(!has_coverage(&occurrence, &shifts, CoverageMode::Live));
    }
}
