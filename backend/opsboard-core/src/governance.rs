// src/governance.rs
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::schedule::{
    period_id_for, week_start_of, PeriodId, PeriodState, SchedulePeriod, Shift, ShiftId,
};
use crate::workforce::{ExceptionLedger, SharedExceptions, WorkforcePolicy};
use crate::{CoreError, CoreResult, ValidationIssue};

pub type RequestId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Add,
    Edit,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Approved,
    Denied,
}

/// A proposed shift mutation against one schedule period. Required once
/// the period is locked; terminal after approval or denial (a denied
/// request is never re-opened, resubmission means a new request).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRequest {
    pub id: RequestId,
    pub period_id: PeriodId,
    pub change_type: ChangeType,
    pub status: RequestStatus,
    /// Target shift for edit/delete; absent for add.
    pub shift_id: Option<ShiftId>,
    /// Snapshot of the target shift at submission time.
    pub payload_before: Option<Value>,
    /// The desired shift state; applied verbatim on approval.
    pub payload_after: Option<Value>,
    pub reason_code: Option<String>,
    pub submitted_by: Option<String>,
    pub submitted_at: Option<NaiveDateTime>,
    pub decided_by: Option<String>,
    pub decided_at: Option<NaiveDateTime>,
}

/// Owns the schedule-period lifecycle and the change-request approval
/// protocol. Periods advance draft -> published -> locked; unlock is the
/// sole backward transition. Once locked, direct shift mutation is
/// refused and edits travel as change requests.
///
/// The stores stand in for the persistence collaborator; every status
/// re-check happens under the same guard as the mutation it protects, so
/// concurrent writers observe a conflict instead of double-applying.
#[derive(Clone)]
pub struct ScheduleGovernance {
    periods: Arc<Mutex<HashMap<PeriodId, SchedulePeriod>>>,
    shifts: Arc<Mutex<HashMap<ShiftId, Shift>>>,
    requests: Arc<Mutex<HashMap<RequestId, ChangeRequest>>>,
    exceptions: SharedExceptions,
}

impl ScheduleGovernance {
    /// `exceptions` is the ledger handle shared with the workforce engine;
    /// the publish gate reads it.
    pub fn new(exceptions: SharedExceptions) -> Self {
        Self {
            periods: Arc::new(Mutex::new(HashMap::new())),
            shifts: Arc::new(Mutex::new(HashMap::new())),
            requests: Arc::new(Mutex::new(HashMap::new())),
            exceptions,
        }
    }

    // --- Period Lifecycle ---

    /// Fetches the period row for (company, location, week), creating it
    /// in `Draft` on first access. The insert is an upsert keyed on the
    /// normalized week start and runs under one guard, so two actors
    /// viewing the same week concurrently converge on a single row.
    pub fn get_or_create_period(
        &self,
        company_id: &str,
        location_id: &str,
        week_start: NaiveDate,
        now: NaiveDateTime,
    ) -> SchedulePeriod {
        let week_start = week_start_of(week_start);
        let id = period_id_for(company_id, location_id, week_start);
        let mut periods = self.periods.lock().unwrap();
        periods
            .entry(id)
            .or_insert_with(|| {
                info!(
                    "Creating draft schedule period for {}/{} week {}",
                    company_id, location_id, week_start
                );
                SchedulePeriod::new(company_id, location_id, week_start, now)
            })
            .clone()
    }

    pub fn get_period(&self, period_id: &str) -> Option<SchedulePeriod> {
        self.periods.lock().unwrap().get(period_id).cloned()
    }

    /// Draft/Published -> Published. Stamps the publisher. Blocked while
    /// unresolved critical exceptions exist for the period's week and the
    /// policy says so; authorization is the caller's concern.
    pub fn publish(
        &self,
        period_id: &str,
        actor: &str,
        now: NaiveDateTime,
        policy: &WorkforcePolicy,
    ) -> CoreResult<SchedulePeriod> {
        let mut periods = self.periods.lock().unwrap();
        let period = get_period_mut(&mut periods, period_id)?;
        if period.state == PeriodState::Locked {
            return Err(CoreError::conflict(
                "schedule_period",
                "cannot publish a locked period; unlock it first",
            ));
        }
        check_publish_gate(&self.exceptions.lock().unwrap(), period, policy)?;
        apply_publish(period, actor, now);
        Ok(period.clone())
    }

    /// Published -> Locked. Stamps the locker.
    pub fn lock(&self, period_id: &str, actor: &str, now: NaiveDateTime) -> CoreResult<SchedulePeriod> {
        let mut periods = self.periods.lock().unwrap();
        let period = get_period_mut(&mut periods, period_id)?;
        match period.state {
            PeriodState::Published => {
                apply_lock(period, actor, now);
                Ok(period.clone())
            }
            PeriodState::Draft => Err(CoreError::conflict(
                "schedule_period",
                "cannot lock a draft period; publish it first (or use publish_and_lock)",
            )),
            PeriodState::Locked => Err(CoreError::conflict(
                "schedule_period",
                "period is already locked",
            )),
        }
    }

    /// Atomic publish + lock, for periods that must never be edited after
    /// publication. Both stamps land under one guard; the publish gate
    /// still applies.
    pub fn publish_and_lock(
        &self,
        period_id: &str,
        actor: &str,
        now: NaiveDateTime,
        policy: &WorkforcePolicy,
    ) -> CoreResult<SchedulePeriod> {
        let mut periods = self.periods.lock().unwrap();
        let period = get_period_mut(&mut periods, period_id)?;
        if period.state == PeriodState::Locked {
            return Err(CoreError::conflict(
                "schedule_period",
                "period is already locked",
            ));
        }
        check_publish_gate(&self.exceptions.lock().unwrap(), period, policy)?;
        apply_publish(period, actor, now);
        apply_lock(period, actor, now);
        Ok(period.clone())
    }

    /// Locked -> Published: the sole backward transition. Clears the lock
    /// stamp; changes applied while locked stay applied.
    pub fn unlock(
        &self,
        period_id: &str,
        actor: &str,
        now: NaiveDateTime,
    ) -> CoreResult<SchedulePeriod> {
        let mut periods = self.periods.lock().unwrap();
        let period = get_period_mut(&mut periods, period_id)?;
        if period.state != PeriodState::Locked {
            return Err(CoreError::conflict(
                "schedule_period",
                format!("cannot unlock a period in state {:?}", period.state),
            ));
        }
        period.state = PeriodState::Published;
        period.locked_at = None;
        period.locked_by = None;
        info!("Schedule period {} unlocked by {} at {}", period_id, actor, now);
        Ok(period.clone())
    }

    // --- Direct Shift Mutation (unlocked periods only) ---

    /// Writes a shift directly. Refused while the governing period (the
    /// shift's location + week) is locked; locked-period edits travel as
    /// change requests instead.
    pub fn upsert_shift(&self, shift: Shift, now: NaiveDateTime) -> CoreResult<Shift> {
        let periods = self.periods.lock().unwrap();
        self.refuse_if_locked(&periods, &shift.company_id, &shift.location_id, shift.week_start())?;
        let mut shifts = self.shifts.lock().unwrap();
        info!(
            "Writing shift {} at {} ({} - {}) at {}",
            shift.id, shift.location_id, shift.start, shift.end, now
        );
        shifts.insert(shift.id.clone(), shift.clone());
        Ok(shift)
    }

    /// Removes a shift directly, under the same locked-period rule.
    pub fn remove_shift(&self, shift_id: &str, now: NaiveDateTime) -> CoreResult<Shift> {
        let periods = self.periods.lock().unwrap();
        let mut shifts = self.shifts.lock().unwrap();
        let shift = shifts.get(shift_id).cloned().ok_or_else(|| {
            CoreError::from(ValidationIssue::UnknownShift {
                shift_id: shift_id.to_string(),
            })
        })?;
        self.refuse_if_locked(&periods, &shift.company_id, &shift.location_id, shift.week_start())?;
        shifts.remove(shift_id);
        info!("Removed shift {} at {}", shift_id, now);
        Ok(shift)
    }

    pub fn get_shift(&self, shift_id: &str) -> Option<Shift> {
        self.shifts.lock().unwrap().get(shift_id).cloned()
    }

    // --- Change Requests ---

    /// Accepts a change request for later approval. The reason code is
    /// validated here, at submission, when the originating period is
    /// locked and the policy demands one. Edit/delete must name an
    /// existing target; its current state is snapshotted as
    /// `payload_before`.
    pub fn submit_request(
        &self,
        mut request: ChangeRequest,
        now: NaiveDateTime,
        policy: &WorkforcePolicy,
    ) -> CoreResult<ChangeRequest> {
        let period = self.get_period(&request.period_id).ok_or_else(|| {
            CoreError::from(ValidationIssue::UnknownPeriod {
                period_id: request.period_id.clone(),
            })
        })?;
        if period.is_locked()
            && policy.require_reason_on_locked_edits
            && request.reason_code.is_none()
        {
            return Err(ValidationIssue::ReasonCodeRequired.into());
        }

        match request.change_type {
            ChangeType::Add => {
                if request.payload_after.is_none() {
                    return Err(ValidationIssue::MissingPayload.into());
                }
            }
            ChangeType::Edit | ChangeType::Delete => {
                let shift_id = request
                    .shift_id
                    .clone()
                    .ok_or(ValidationIssue::MissingTargetShift)?;
                let current = self.get_shift(&shift_id).ok_or_else(|| {
                    CoreError::from(ValidationIssue::UnknownShift {
                        shift_id: shift_id.clone(),
                    })
                })?;
                request.payload_before = Some(snapshot_shift(&current)?);
                if request.change_type == ChangeType::Edit && request.payload_after.is_none() {
                    return Err(ValidationIssue::MissingPayload.into());
                }
            }
        }

        request.status = RequestStatus::Pending;
        request.submitted_at = Some(now);
        request.decided_by = None;
        request.decided_at = None;
        info!(
            "Change request {} ({:?}) submitted against period {}",
            request.id, request.change_type, request.period_id
        );
        self.requests
            .lock()
            .unwrap()
            .insert(request.id.clone(), request.clone());
        Ok(request)
    }

    /// Approves a pending request and applies its payload to the shift
    /// store, atomically: the pending check, the apply, and the status
    /// flip all happen under one guard. If the apply fails the request
    /// stays pending and nothing surfaces as approved. The losing side of
    /// a concurrent approval observes "no longer pending".
    pub fn approve_request(
        &self,
        request_id: &str,
        actor: &str,
        now: NaiveDateTime,
    ) -> CoreResult<ChangeRequest> {
        let mut requests = self.requests.lock().unwrap();
        let request = requests.get_mut(request_id).ok_or_else(|| {
            CoreError::from(ValidationIssue::UnknownRequest {
                request_id: request_id.to_string(),
            })
        })?;
        if request.status != RequestStatus::Pending {
            warn!(
                "Approval of change request {} refused: already {:?}",
                request_id, request.status
            );
            return Err(CoreError::conflict(
                "change_request",
                format!("expected pending, found {:?}", request.status),
            ));
        }

        // Apply before flipping status; an error here leaves the request
        // pending and the shift store untouched.
        let mut shifts = self.shifts.lock().unwrap();
        match request.change_type {
            ChangeType::Add | ChangeType::Edit => {
                let payload = request
                    .payload_after
                    .as_ref()
                    .ok_or(ValidationIssue::MissingPayload)?;
                let shift = decode_shift(payload)?;
                if request.change_type == ChangeType::Edit && !shifts.contains_key(&shift.id) {
                    return Err(ValidationIssue::UnknownShift {
                        shift_id: shift.id.clone(),
                    }
                    .into());
                }
                shifts.insert(shift.id.clone(), shift);
            }
            ChangeType::Delete => {
                let shift_id = request
                    .shift_id
                    .clone()
                    .ok_or(ValidationIssue::MissingTargetShift)?;
                shifts.remove(&shift_id).ok_or_else(|| {
                    CoreError::from(ValidationIssue::UnknownShift {
                        shift_id: shift_id.clone(),
                    })
                })?;
            }
        }

        request.status = RequestStatus::Approved;
        request.decided_by = Some(actor.to_string());
        request.decided_at = Some(now);
        info!(
            "Change request {} ({:?}) approved by {}",
            request_id, request.change_type, actor
        );
        Ok(request.clone())
    }

    /// Marks a pending request denied without applying anything. Denied is
    /// terminal.
    pub fn deny_request(
        &self,
        request_id: &str,
        actor: &str,
        now: NaiveDateTime,
    ) -> CoreResult<ChangeRequest> {
        let mut requests = self.requests.lock().unwrap();
        let request = requests.get_mut(request_id).ok_or_else(|| {
            CoreError::from(ValidationIssue::UnknownRequest {
                request_id: request_id.to_string(),
            })
        })?;
        if request.status != RequestStatus::Pending {
            return Err(CoreError::conflict(
                "change_request",
                format!("expected pending, found {:?}", request.status),
            ));
        }
        request.status = RequestStatus::Denied;
        request.decided_by = Some(actor.to_string());
        request.decided_at = Some(now);
        info!("Change request {} denied by {}", request_id, actor);
        Ok(request.clone())
    }

    pub fn get_request(&self, request_id: &str) -> Option<ChangeRequest> {
        self.requests.lock().unwrap().get(request_id).cloned()
    }

    // --- Internals ---

    fn refuse_if_locked(
        &self,
        periods: &HashMap<PeriodId, SchedulePeriod>,
        company_id: &str,
        location_id: &str,
        week_start: NaiveDate,
    ) -> CoreResult<()> {
        let id = period_id_for(company_id, location_id, week_start);
        if let Some(period) = periods.get(&id) {
            if period.is_locked() {
                warn!(
                    "Direct shift mutation refused: period {} is locked",
                    period.id
                );
                return Err(CoreError::conflict(
                    "schedule_period",
                    "period is locked; submit a change request instead",
                ));
            }
        }
        Ok(())
    }
}

fn get_period_mut<'a>(
    periods: &'a mut HashMap<PeriodId, SchedulePeriod>,
    period_id: &str,
) -> CoreResult<&'a mut SchedulePeriod> {
    periods.get_mut(period_id).ok_or_else(|| {
        CoreError::from(ValidationIssue::UnknownPeriod {
            period_id: period_id.to_string(),
        })
    })
}

fn check_publish_gate(
    ledger: &ExceptionLedger,
    period: &SchedulePeriod,
    policy: &WorkforcePolicy,
) -> CoreResult<()> {
    if !policy.block_publish_on_critical {
        return Ok(());
    }
    let open = ledger.open_critical_for_week(
        &period.company_id,
        &period.location_id,
        period.week_start,
    );
    if open > 0 {
        warn!(
            "Publish blocked for period {}: {} unresolved critical exception(s)",
            period.id, open
        );
        return Err(CoreError::PolicyBlock {
            detail: format!(
                "{open} unresolved critical exception(s) for week {}",
                period.week_start
            ),
        });
    }
    Ok(())
}

fn apply_publish(period: &mut SchedulePeriod, actor: &str, now: NaiveDateTime) {
    period.state = PeriodState::Published;
    period.published_at = Some(now);
    period.published_by = Some(actor.to_string());
    info!("Schedule period {} published by {}", period.id, actor);
}

fn apply_lock(period: &mut SchedulePeriod, actor: &str, now: NaiveDateTime) {
    period.state = PeriodState::Locked;
    period.locked_at = Some(now);
    period.locked_by = Some(actor.to_string());
    info!("Schedule period {} locked by {}", period.id, actor);
}

fn snapshot_shift(shift: &Shift) -> CoreResult<Value> {
    serde_json::to_value(shift).map_err(|err| {
        CoreError::from(ValidationIssue::MalformedPayload {
            detail: err.to_string(),
        })
    })
}

fn decode_shift(payload: &Value) -> CoreResult<Shift> {
    serde_json::from_value(payload.clone())
        .context("change request payload must be a shift record")
        .map_err(|err| {
            CoreError::from(ValidationIssue::MalformedPayload {
                detail: format!("{err:#}"),
            })
        })
}
