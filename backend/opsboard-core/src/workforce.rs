// src/workforce.rs
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::schedule::{week_start_of, CompanyId, EmployeeId, LocationId, Shift, ShiftId};
use crate::{CoreError, CoreResult, ValidationIssue};

pub type ExceptionId = String;
pub type AttendanceId = String;

// --- Policy ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnscheduledClockInPolicy {
    /// Clock-ins without a shift are fine; nothing is raised.
    Allow,
    /// Raise an `UnscheduledShift` exception for review.
    ExceptionTicket,
    /// The clock-in itself is rejected upstream; nothing reaches this
    /// engine, and nothing is raised here either.
    Block,
}

/// Per-company attendance policy, optionally narrowed to one location.
/// Resolution falls back location-specific -> company-wide -> defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkforcePolicy {
    pub company_id: CompanyId,
    pub location_id: Option<LocationId>,
    pub unscheduled_clock_in_policy: UnscheduledClockInPolicy,
    pub grace_minutes: i64,
    pub late_threshold_minutes: i64,
    pub early_leave_threshold_minutes: i64,
    pub overtime_threshold_minutes: i64,
    pub block_publish_on_critical: bool,
    pub require_reason_on_locked_edits: bool,
}

impl WorkforcePolicy {
    /// Permissive company-wide defaults, used when no policy row exists.
    pub fn company_default(company_id: &str) -> Self {
        Self {
            company_id: company_id.to_string(),
            location_id: None,
            unscheduled_clock_in_policy: UnscheduledClockInPolicy::Allow,
            grace_minutes: 5,
            late_threshold_minutes: 15,
            early_leave_threshold_minutes: 15,
            overtime_threshold_minutes: 60,
            block_publish_on_critical: false,
            require_reason_on_locked_edits: false,
        }
    }

    /// The instant after which a clock-in counts as a late start.
    fn late_start_cutoff(&self, shift_start: NaiveDateTime) -> NaiveDateTime {
        shift_start + Duration::minutes(self.grace_minutes + self.late_threshold_minutes)
    }
}

// --- Exceptions ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExceptionType {
    LateStart,
    EarlyLeave,
    UnscheduledShift,
    NoShow,
    ShiftExtended,
    Overtime,
}

impl ExceptionType {
    /// Staffing-integrity anomalies that gate schedule publication.
    pub fn is_critical(self) -> bool {
        matches!(self, ExceptionType::NoShow | ExceptionType::UnscheduledShift)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExceptionStatus {
    Pending,
    Approved,
    Denied,
    Resolved,
    AutoResolved,
}

impl ExceptionStatus {
    pub fn is_open(self) -> bool {
        self == ExceptionStatus::Pending
    }

    pub fn is_terminal(self) -> bool {
        !self.is_open()
    }
}

/// One detected attendance anomaly. At most one open row exists per
/// (employee, shift, type); re-evaluating the same event never duplicates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkforceException {
    pub id: ExceptionId,
    pub company_id: CompanyId,
    pub location_id: LocationId,
    pub employee_id: EmployeeId,
    pub exception_type: ExceptionType,
    pub status: ExceptionStatus,
    pub shift_id: Option<ShiftId>,
    pub attendance_id: Option<AttendanceId>,
    /// The governance week this anomaly belongs to, stamped at raise time
    /// from the shift (or the event) so the publish gate never re-joins
    /// attendance data.
    pub week_start: NaiveDate,
    pub detected_at: NaiveDateTime,
    pub resolved_at: Option<NaiveDateTime>,
    pub resolved_by: Option<String>,
}

/// A clock-in/out pair reported by the attendance collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceEvent {
    pub id: AttendanceId,
    pub company_id: CompanyId,
    pub location_id: LocationId,
    pub employee_id: EmployeeId,
    pub shift_id: Option<ShiftId>,
    pub clock_in: Option<NaiveDateTime>,
    pub clock_out: Option<NaiveDateTime>,
}

// --- Ledger ---

/// Exception rows plus the id sequence, behind one guard so the
/// existing-open check and the insert can never interleave.
#[derive(Debug, Default)]
pub struct ExceptionLedger {
    by_id: HashMap<ExceptionId, WorkforceException>,
    seq: u64,
}

impl ExceptionLedger {
    fn next_id(&mut self) -> ExceptionId {
        self.seq += 1;
        format!("exc-{:06}", self.seq)
    }

    fn has_open(
        &self,
        employee_id: &str,
        shift_id: Option<&str>,
        exception_type: ExceptionType,
    ) -> bool {
        self.by_id.values().any(|exception| {
            exception.status.is_open()
                && exception.exception_type == exception_type
                && exception.employee_id == employee_id
                && exception.shift_id.as_deref() == shift_id
        })
    }

    pub fn get(&self, exception_id: &str) -> Option<&WorkforceException> {
        self.by_id.get(exception_id)
    }

    pub fn all(&self) -> impl Iterator<Item = &WorkforceException> {
        self.by_id.values()
    }

    /// Unresolved critical exceptions for one (company, location, week).
    /// Queried by the governance engine before allowing `publish`.
    pub fn open_critical_for_week(
        &self,
        company_id: &str,
        location_id: &str,
        week_start: NaiveDate,
    ) -> usize {
        let week_start = week_start_of(week_start);
        self.by_id
            .values()
            .filter(|exception| {
                exception.status.is_open()
                    && exception.exception_type.is_critical()
                    && exception.company_id == company_id
                    && exception.location_id == location_id
                    && exception.week_start == week_start
            })
            .count()
    }
}

/// Shared handle to the exception ledger. The governance engine holds a
/// clone for its publish gate.
pub type SharedExceptions = Arc<Mutex<ExceptionLedger>>;

// --- Engine ---

type PolicyKey = (CompanyId, Option<LocationId>);

/// Evaluates attendance events against policy and raises / retires
/// exception records.
#[derive(Clone)]
pub struct WorkforceExceptionEngine {
    policies: Arc<Mutex<HashMap<PolicyKey, WorkforcePolicy>>>,
    exceptions: SharedExceptions,
}

impl Default for WorkforceExceptionEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkforceExceptionEngine {
    pub fn new() -> Self {
        Self {
            policies: Arc::new(Mutex::new(HashMap::new())),
            exceptions: Arc::new(Mutex::new(ExceptionLedger::default())),
        }
    }

    /// The ledger handle to share with the governance engine.
    pub fn exceptions(&self) -> SharedExceptions {
        self.exceptions.clone()
    }

    pub fn upsert_policy(&self, policy: WorkforcePolicy) {
        info!(
            "Configuring workforce policy for company {} location {:?}",
            policy.company_id, policy.location_id
        );
        let key = (policy.company_id.clone(), policy.location_id.clone());
        self.policies.lock().unwrap().insert(key, policy);
    }

    /// Location-specific row wins over the company-wide row; built-in
    /// defaults apply when neither exists.
    pub fn resolve_policy(&self, company_id: &str, location_id: &str) -> WorkforcePolicy {
        let policies = self.policies.lock().unwrap();
        if let Some(policy) =
            policies.get(&(company_id.to_string(), Some(location_id.to_string())))
        {
            return policy.clone();
        }
        if let Some(policy) = policies.get(&(company_id.to_string(), None)) {
            return policy.clone();
        }
        debug!(
            "No workforce policy configured for company {}, using defaults",
            company_id
        );
        WorkforcePolicy::company_default(company_id)
    }

    /// Evaluates one attendance event against its shift (or the absence of
    /// one). Returns the exceptions raised by this call; anomalies that
    /// already have an open exception of the same type are suppressed.
    pub fn evaluate_event(
        &self,
        event: &AttendanceEvent,
        shift: Option<&Shift>,
        now: NaiveDateTime,
    ) -> Vec<WorkforceException> {
        let policy = self.resolve_policy(&event.company_id, &event.location_id);
        let mut ledger = self.exceptions.lock().unwrap();
        let mut raised = Vec::new();

        let Some(shift) = shift else {
            // Rule 1: unscheduled clock-in.
            match policy.unscheduled_clock_in_policy {
                UnscheduledClockInPolicy::Allow => {
                    debug!(
                        "Unscheduled clock-in by {} allowed by policy",
                        event.employee_id
                    );
                }
                UnscheduledClockInPolicy::ExceptionTicket => {
                    if event.clock_in.is_some() {
                        if let Some(exception) = self.raise(
                            &mut ledger,
                            event,
                            None,
                            ExceptionType::UnscheduledShift,
                            now,
                        ) {
                            raised.push(exception);
                        }
                    }
                }
                UnscheduledClockInPolicy::Block => {
                    // Rejected upstream before reaching this engine.
                    debug!(
                        "Unscheduled clock-in by {} is blocked upstream, nothing to raise",
                        event.employee_id
                    );
                }
            }
            return raised;
        };

        // Rule 2: late start.
        if let Some(clock_in) = event.clock_in {
            if clock_in > policy.late_start_cutoff(shift.start) {
                if let Some(exception) =
                    self.raise(&mut ledger, event, Some(shift), ExceptionType::LateStart, now)
                {
                    raised.push(exception);
                }
            }
        }

        // Rule 3: early leave.
        if let Some(clock_out) = event.clock_out {
            if clock_out < shift.end - Duration::minutes(policy.early_leave_threshold_minutes) {
                if let Some(exception) =
                    self.raise(&mut ledger, event, Some(shift), ExceptionType::EarlyLeave, now)
                {
                    raised.push(exception);
                }
            }
        }

        // Rule 4: no show, once the shift has ended with no clock-in.
        if event.clock_in.is_none() && now > shift.end {
            if let Some(exception) =
                self.raise(&mut ledger, event, Some(shift), ExceptionType::NoShow, now)
            {
                raised.push(exception);
            }
        }

        // Rule 5: overtime beyond the policy threshold.
        if let (Some(clock_in), Some(clock_out)) = (event.clock_in, event.clock_out) {
            let worked = (clock_out - clock_in).num_minutes();
            if worked - shift.scheduled_minutes() > policy.overtime_threshold_minutes {
                if let Some(exception) =
                    self.raise(&mut ledger, event, Some(shift), ExceptionType::Overtime, now)
                {
                    raised.push(exception);
                }
            }
        }

        // A clock-out past the shift end plus grace extends the shift even
        // when total worked time stays inside the overtime threshold.
        if let Some(clock_out) = event.clock_out {
            if clock_out > shift.end + Duration::minutes(policy.grace_minutes)
                && !raised
                    .iter()
                    .any(|e| e.exception_type == ExceptionType::Overtime)
            {
                if let Some(exception) = self.raise(
                    &mut ledger,
                    event,
                    Some(shift),
                    ExceptionType::ShiftExtended,
                    now,
                ) {
                    raised.push(exception);
                }
            }
        }

        raised
    }

    /// Raises `NoShow` for every ended shift with an assigned employee and
    /// no clock-in on record. Intended for a scheduled sweep; idempotent
    /// like the event path.
    pub fn sweep_no_shows(
        &self,
        shifts: &[Shift],
        attendance: &[AttendanceEvent],
        now: NaiveDateTime,
    ) -> Vec<WorkforceException> {
        let mut ledger = self.exceptions.lock().unwrap();
        let mut raised = Vec::new();

        for shift in shifts {
            let Some(employee_id) = shift.employee_id.as_deref() else {
                continue;
            };
            if now <= shift.end {
                continue;
            }
            let attended = attendance.iter().any(|event| {
                event.employee_id == employee_id
                    && event.shift_id.as_deref() == Some(shift.id.as_str())
                    && event.clock_in.is_some()
            });
            if attended {
                continue;
            }
            if ledger.has_open(employee_id, Some(&shift.id), ExceptionType::NoShow) {
                continue;
            }
            let id = ledger.next_id();
            let exception = WorkforceException {
                id: id.clone(),
                company_id: shift.company_id.clone(),
                location_id: shift.location_id.clone(),
                employee_id: employee_id.to_string(),
                exception_type: ExceptionType::NoShow,
                status: ExceptionStatus::Pending,
                shift_id: Some(shift.id.clone()),
                attendance_id: None,
                week_start: shift.week_start(),
                detected_at: now,
                resolved_at: None,
                resolved_by: None,
            };
            warn!(
                "No-show detected: employee {} missed shift {} at {}",
                employee_id, shift.id, shift.location_id
            );
            ledger.by_id.insert(id, exception.clone());
            raised.push(exception);
        }
        raised
    }

    /// Terminal transition performed by a reviewer or a scheduled rule.
    /// Only pending exceptions can be resolved; a second resolution
    /// observes the row is no longer pending and fails with a conflict.
    pub fn resolve_exception(
        &self,
        exception_id: &str,
        outcome: ExceptionStatus,
        actor: &str,
        now: NaiveDateTime,
    ) -> CoreResult<WorkforceException> {
        if !outcome.is_terminal() {
            return Err(ValidationIssue::NonTerminalOutcome { outcome }.into());
        }
        let mut ledger = self.exceptions.lock().unwrap();
        let exception = ledger.by_id.get_mut(exception_id).ok_or_else(|| {
            CoreError::from(ValidationIssue::UnknownException {
                exception_id: exception_id.to_string(),
            })
        })?;
        if !exception.status.is_open() {
            warn!(
                "Resolution of exception {} refused: already {:?}",
                exception_id, exception.status
            );
            return Err(CoreError::conflict(
                "workforce_exception",
                format!("expected pending, found {:?}", exception.status),
            ));
        }
        exception.status = outcome;
        exception.resolved_at = Some(now);
        exception.resolved_by = Some(actor.to_string());
        info!(
            "Exception {} ({:?}) resolved as {:?} by {}",
            exception_id, exception.exception_type, outcome, actor
        );
        Ok(exception.clone())
    }

    /// Unresolved critical exceptions for a (company, location, week).
    pub fn open_critical_for_week(
        &self,
        company_id: &str,
        location_id: &str,
        week_start: NaiveDate,
    ) -> usize {
        self.exceptions
            .lock()
            .unwrap()
            .open_critical_for_week(company_id, location_id, week_start)
    }

    pub fn get_exception(&self, exception_id: &str) -> Option<WorkforceException> {
        self.exceptions.lock().unwrap().get(exception_id).cloned()
    }

    /// Inserts a new pending exception unless an open one of the same
    /// (employee, shift, type) already exists. Runs under the ledger guard
    /// held by the caller, so check and insert cannot interleave.
    fn raise(
        &self,
        ledger: &mut ExceptionLedger,
        event: &AttendanceEvent,
        shift: Option<&Shift>,
        exception_type: ExceptionType,
        now: NaiveDateTime,
    ) -> Option<WorkforceException> {
        let shift_id = shift.map(|s| s.id.as_str());
        if ledger.has_open(&event.employee_id, shift_id, exception_type) {
            debug!(
                "Suppressing duplicate {:?} for employee {} shift {:?}",
                exception_type, event.employee_id, shift_id
            );
            return None;
        }
        let week_start = match shift {
            Some(shift) => shift.week_start(),
            None => week_start_of(
                event
                    .clock_in
                    .or(event.clock_out)
                    .map(|instant| instant.date())
                    .unwrap_or_else(|| now.date()),
            ),
        };
        let id = ledger.next_id();
        let exception = WorkforceException {
            id: id.clone(),
            company_id: event.company_id.clone(),
            location_id: event.location_id.clone(),
            employee_id: event.employee_id.clone(),
            exception_type,
            status: ExceptionStatus::Pending,
            shift_id: shift.map(|s| s.id.clone()),
            attendance_id: Some(event.id.clone()),
            week_start,
            detected_at: now,
            resolved_at: None,
            resolved_by: None,
        };
        info!(
            "Raising {:?} exception {} for employee {} (shift {:?})",
            exception_type, id, event.employee_id, exception.shift_id
        );
        ledger.by_id.insert(id, exception.clone());
        Some(exception)
    }
}
