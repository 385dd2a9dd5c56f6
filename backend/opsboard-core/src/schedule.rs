// src/schedule.rs
use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

// --- Identifier Aliases ---
//
// All identifiers arriving from the persistence collaborator are opaque
// strings (UUID-shaped in production, but nothing here depends on that).

pub type CompanyId = String;
pub type LocationId = String;
pub type EmployeeId = String;
pub type ShiftId = String;
pub type PeriodId = String;

/// Monday of the ISO week containing `date`.
///
/// Schedule periods are keyed on this normalized date, so any date inside
/// a week resolves to the same period row.
pub fn week_start_of(date: NaiveDate) -> NaiveDate {
    date - Duration::days(i64::from(date.weekday().num_days_from_monday()))
}

/// Deterministic period identifier for a (company, location, week) key.
/// Two actors creating the same period concurrently derive the same id,
/// which is what makes the lazy get-or-create a true upsert.
pub fn period_id_for(company_id: &str, location_id: &str, week_start: NaiveDate) -> PeriodId {
    format!("{company_id}::{location_id}::{week_start}")
}

// --- Shift ---

/// A scheduled block of staffed time at one location. Shifts are consumed
/// by the coverage matcher and owned by the governance engine; the read
/// side never mutates them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shift {
    pub id: ShiftId,
    pub company_id: CompanyId,
    pub location_id: LocationId,
    pub role: Option<String>,
    pub employee_id: Option<EmployeeId>,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub published: bool,
}

impl Shift {
    /// Half-open containment: `[start, end)`.
    pub fn contains(&self, instant: NaiveDateTime) -> bool {
        self.start <= instant && instant < self.end
    }

    pub fn scheduled_minutes(&self) -> i64 {
        (self.end - self.start).num_minutes()
    }

    /// The governance week this shift belongs to.
    pub fn week_start(&self) -> NaiveDate {
        week_start_of(self.start.date())
    }
}

// --- Schedule Period ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodState {
    Draft,
    Published,
    Locked,
}

/// The governance unit for one (company, location, ISO week).
///
/// State only advances draft -> published -> locked; unlock is the sole
/// backward transition (locked -> published). Draft is never reached again
/// once left. At most one row exists per key; rows are created lazily on
/// first access.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulePeriod {
    pub id: PeriodId,
    pub company_id: CompanyId,
    pub location_id: LocationId,
    pub week_start: NaiveDate,
    pub state: PeriodState,
    pub created_at: NaiveDateTime,
    pub published_at: Option<NaiveDateTime>,
    pub published_by: Option<String>,
    pub locked_at: Option<NaiveDateTime>,
    pub locked_by: Option<String>,
}

impl SchedulePeriod {
    pub fn new(
        company_id: &str,
        location_id: &str,
        week_start: NaiveDate,
        now: NaiveDateTime,
    ) -> Self {
        let week_start = week_start_of(week_start);
        Self {
            id: period_id_for(company_id, location_id, week_start),
            company_id: company_id.to_string(),
            location_id: location_id.to_string(),
            week_start,
            state: PeriodState::Draft,
            created_at: now,
            published_at: None,
            published_by: None,
            locked_at: None,
            locked_by: None,
        }
    }

    pub fn is_locked(&self) -> bool {
        self.state == PeriodState::Locked
    }
}
