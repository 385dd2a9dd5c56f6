// src/governance_tests.rs

#[cfg(test)]
mod tests {
    use crate::governance::*;
    use crate::schedule::{period_id_for, PeriodState, Shift};
    use crate::workforce::{
        ExceptionStatus, UnscheduledClockInPolicy, WorkforceExceptionEngine, WorkforcePolicy,
    };
    use crate::CoreError;
    use chrono::{NaiveDate, NaiveDateTime};
    use std::thread;

    fn d(date_str: &str) -> NaiveDate {
        NaiveDate::parse_from_str(date_str, "%Y-%m-%d")
            .unwrap_or_else(|_| panic!("Invalid date string format: {}", date_str))
    }

    fn dt(datetime_str: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(datetime_str, "%Y-%m-%d %H:%M:%S")
            .unwrap_or_else(|_| panic!("Invalid datetime string format: {}", datetime_str))
    }

    fn setup_governance() -> (ScheduleGovernance, WorkforceExceptionEngine, WorkforcePolicy) {
        let engine = WorkforceExceptionEngine::new();
        let governance = ScheduleGovernance::new(engine.exceptions());
        let policy = WorkforcePolicy::company_default("c1");
        (governance, engine, policy)
    }

    fn build_shift(id: &str, start: &str, end: &str) -> Shift {
        Shift {
            id: id.to_string(),
            company_id: "c1".to_string(),
            location_id: "loc-1".to_string(),
            role: Some("crew".to_string()),
            employee_id: Some("e1".to_string()),
            start: dt(start),
            end: dt(end),
            published: true,
        }
    }

    fn build_request(id: &str, period_id: &str, change_type: ChangeType) -> ChangeRequest {
        ChangeRequest {
            id: id.to_string(),
            period_id: period_id.to_string(),
            change_type,
            status: RequestStatus::Pending,
            shift_id: None,
            payload_before: None,
            payload_after: None,
            reason_code: None,
            submitted_by: Some("manager".to_string()),
            submitted_at: None,
            decided_by: None,
            decided_at: None,
        }
    }

    // --- Period lifecycle ---

    #[test]
    fn get_or_create_is_lazy_and_stable() {
        let (governance, _, _) = setup_governance();
        let now = dt("2024-03-04 08:00:00");

        // Any date inside the week resolves to the same Monday-keyed row.
        let first = governance.get_or_create_period("c1", "loc-1", d("2024-03-06"), now);
        let second = governance.get_or_create_period("c1", "loc-1", d("2024-03-04"), now);

        assert_eq!(first.id, second.id);
        assert_eq!(first.week_start, d("2024-03-04"));
        assert_eq!(first.state, PeriodState::Draft);
        assert_eq!(first.id, period_id_for("c1", "loc-1", d("2024-03-04")));
    }

    #[test]
    fn concurrent_first_access_creates_exactly_one_row() {
        let (governance, _, _) = setup_governance();
        let now = dt("2024-03-04 08:00:00");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let governance = governance.clone();
                thread::spawn(move || {
                    governance
                        .get_or_create_period("c1", "loc-1", d("2024-03-05"), now)
                        .id
                })
            })
            .collect();
        let ids: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert!(
            ids.windows(2).all(|pair| pair[0] == pair[1]),
            "all racers must observe the same period row: {ids:?}"
        );
    }

    #[test]
    fn state_machine_is_monotonic() {
        let (governance, _, policy) = setup_governance();
        let now = dt("2024-03-04 08:00:00");
        let period = governance.get_or_create_period("c1", "loc-1", d("2024-03-04"), now);

        // Draft cannot be locked directly.
        assert!(governance.lock(&period.id, "ops", now).is_err());

        let published = governance.publish(&period.id, "ops", now, &policy).unwrap();
        assert_eq!(published.state, PeriodState::Published);
        assert_eq!(published.published_by.as_deref(), Some("ops"));

        // Publishing again is allowed (published -> published refresh).
        assert!(governance.publish(&period.id, "ops2", now, &policy).is_ok());

        let locked = governance.lock(&period.id, "ops", now).unwrap();
        assert_eq!(locked.state, PeriodState::Locked);
        assert_eq!(locked.locked_by.as_deref(), Some("ops"));

        // Locked refuses publish and a second lock.
        assert!(governance.publish(&period.id, "ops", now, &policy).is_err());
        assert!(governance.lock(&period.id, "ops", now).is_err());

        let unlocked = governance.unlock(&period.id, "ops", now).unwrap();
        assert_eq!(unlocked.state, PeriodState::Published);
        assert!(unlocked.locked_at.is_none(), "unlock clears the lock stamp");
        assert!(unlocked.published_at.is_some(), "publish stamp survives unlock");

        // Draft is unreachable once left: no transition leads back.
        assert!(governance.unlock(&period.id, "ops", now).is_err());
        assert_eq!(
            governance.get_period(&period.id).unwrap().state,
            PeriodState::Published
        );
    }

    #[test]
    fn publish_and_lock_is_one_step() {
        let (governance, _, policy) = setup_governance();
        let now = dt("2024-03-04 08:00:00");
        let period = governance.get_or_create_period("c1", "loc-1", d("2024-03-04"), now);

        let locked = governance
            .publish_and_lock(&period.id, "ops", now, &policy)
            .unwrap();
        assert_eq!(locked.state, PeriodState::Locked);
        assert!(locked.published_at.is_some());
        assert!(locked.locked_at.is_some());
    }

    #[test]
    fn publish_is_gated_on_unresolved_critical_exceptions() {
        let (governance, engine, mut policy) = setup_governance();
        policy.block_publish_on_critical = true;
        let now = dt("2024-03-08 23:00:00");

        let shift = build_shift("s1", "2024-03-05 09:00:00", "2024-03-05 17:00:00");
        governance.upsert_shift(shift.clone(), now).unwrap();
        let raised = engine.sweep_no_shows(&[shift], &[], now);
        assert_eq!(raised.len(), 1, "the sweep must raise a no-show");

        let period = governance.get_or_create_period("c1", "loc-1", d("2024-03-05"), now);
        let blocked = governance.publish(&period.id, "ops", now, &policy);
        assert!(
            matches!(blocked, Err(ref e) if e.is_policy_block()),
            "publish must report a policy block, got {blocked:?}"
        );

        // Resolving the exception clears the gate.
        engine
            .resolve_exception(&raised[0].id, ExceptionStatus::Resolved, "ops", now)
            .unwrap();
        assert!(governance.publish(&period.id, "ops", now, &policy).is_ok());
    }

    #[test]
    fn publish_gate_is_ignored_when_policy_does_not_block() {
        let (governance, engine, policy) = setup_governance();
        let now = dt("2024-03-08 23:00:00");

        let shift = build_shift("s1", "2024-03-05 09:00:00", "2024-03-05 17:00:00");
        governance.upsert_shift(shift.clone(), now).unwrap();
        engine.sweep_no_shows(&[shift], &[], now);

        let period = governance.get_or_create_period("c1", "loc-1", d("2024-03-05"), now);
        assert!(
            governance.publish(&period.id, "ops", now, &policy).is_ok(),
            "default policy does not gate publication"
        );
    }

    // --- Direct mutation vs locked periods ---

    #[test]
    fn locked_period_refuses_direct_shift_mutation() {
        let (governance, _, policy) = setup_governance();
        let now = dt("2024-03-04 08:00:00");

        let shift = build_shift("s1", "2024-03-05 09:00:00", "2024-03-05 17:00:00");
        governance.upsert_shift(shift.clone(), now).unwrap();

        let period = governance.get_or_create_period("c1", "loc-1", d("2024-03-05"), now);
        governance
            .publish_and_lock(&period.id, "ops", now, &policy)
            .unwrap();

        let edit = governance.upsert_shift(build_shift("s1", "2024-03-05 10:00:00", "2024-03-05 18:00:00"), now);
        assert!(matches!(edit, Err(ref e) if e.is_conflict()));
        let removal = governance.remove_shift("s1", now);
        assert!(matches!(removal, Err(ref e) if e.is_conflict()));

        // A different (unlocked) week at the same location is unaffected.
        let other_week = build_shift("s2", "2024-03-12 09:00:00", "2024-03-12 17:00:00");
        assert!(governance.upsert_shift(other_week, now).is_ok());

        // Unlocking restores direct mutation.
        governance.unlock(&period.id, "ops", now).unwrap();
        assert!(governance.remove_shift("s1", now).is_ok());
    }

    // --- Change requests ---

    fn locked_period_with_shift(
        governance: &ScheduleGovernance,
        policy: &WorkforcePolicy,
        now: NaiveDateTime,
    ) -> (String, Shift) {
        let shift = build_shift("s1", "2024-03-05 09:00:00", "2024-03-05 17:00:00");
        governance.upsert_shift(shift.clone(), now).unwrap();
        let period = governance.get_or_create_period("c1", "loc-1", d("2024-03-05"), now);
        governance
            .publish_and_lock(&period.id, "ops", now, policy)
            .unwrap();
        (period.id, shift)
    }

    #[test]
    fn reason_code_is_required_at_submission_for_locked_periods() {
        let (governance, _, mut policy) = setup_governance();
        policy.require_reason_on_locked_edits = true;
        let now = dt("2024-03-04 08:00:00");
        let (period_id, shift) = locked_period_with_shift(&governance, &policy, now);

        let mut request = build_request("r1", &period_id, ChangeType::Delete);
        request.shift_id = Some(shift.id.clone());

        let rejected = governance.submit_request(request.clone(), now, &policy);
        assert!(
            matches!(
                rejected,
                Err(CoreError::Validation(crate::ValidationIssue::ReasonCodeRequired))
            ),
            "submission without a reason must fail, got {rejected:?}"
        );

        request.reason_code = Some("staffing_gap".to_string());
        let accepted = governance.submit_request(request, now, &policy).unwrap();
        assert_eq!(accepted.status, RequestStatus::Pending);
        assert!(
            accepted.payload_before.is_some(),
            "the target shift is snapshotted at submission"
        );
    }

    #[test]
    fn edit_and_delete_must_target_an_existing_shift() {
        let (governance, _, policy) = setup_governance();
        let now = dt("2024-03-04 08:00:00");
        let (period_id, _) = locked_period_with_shift(&governance, &policy, now);

        let mut request = build_request("r1", &period_id, ChangeType::Edit);
        request.shift_id = Some("missing".to_string());
        request.payload_after = Some(serde_json::json!({}));
        let result = governance.submit_request(request, now, &policy);
        assert!(matches!(
            result,
            Err(CoreError::Validation(crate::ValidationIssue::UnknownShift { .. }))
        ));

        let no_target = build_request("r2", &period_id, ChangeType::Delete);
        let result = governance.submit_request(no_target, now, &policy);
        assert!(matches!(
            result,
            Err(CoreError::Validation(crate::ValidationIssue::MissingTargetShift))
        ));
    }

    #[test]
    fn approve_add_creates_the_shift() {
        let (governance, _, policy) = setup_governance();
        let now = dt("2024-03-04 08:00:00");
        let (period_id, _) = locked_period_with_shift(&governance, &policy, now);

        let new_shift = build_shift("s2", "2024-03-06 09:00:00", "2024-03-06 17:00:00");
        let mut request = build_request("r1", &period_id, ChangeType::Add);
        request.payload_after = Some(serde_json::to_value(&new_shift).unwrap());
        governance.submit_request(request, now, &policy).unwrap();

        let approved = governance.approve_request("r1", "admin", now).unwrap();
        assert_eq!(approved.status, RequestStatus::Approved);
        assert_eq!(approved.decided_by.as_deref(), Some("admin"));
        assert_eq!(governance.get_shift("s2"), Some(new_shift));
    }

    #[test]
    fn approve_edit_applies_payload_after() {
        let (governance, _, policy) = setup_governance();
        let now = dt("2024-03-04 08:00:00");
        let (period_id, shift) = locked_period_with_shift(&governance, &policy, now);

        let mut edited = shift.clone();
        edited.end = dt("2024-03-05 18:00:00");
        let mut request = build_request("r1", &period_id, ChangeType::Edit);
        request.shift_id = Some(shift.id.clone());
        request.payload_after = Some(serde_json::to_value(&edited).unwrap());
        let submitted = governance.submit_request(request, now, &policy).unwrap();
        assert_eq!(
            submitted.payload_before,
            Some(serde_json::to_value(&shift).unwrap())
        );

        governance.approve_request("r1", "admin", now).unwrap();
        assert_eq!(governance.get_shift("s1"), Some(edited));
    }

    #[test]
    fn approve_delete_removes_the_shift() {
        let (governance, _, policy) = setup_governance();
        let now = dt("2024-03-04 08:00:00");
        let (period_id, shift) = locked_period_with_shift(&governance, &policy, now);

        let mut request = build_request("r1", &period_id, ChangeType::Delete);
        request.shift_id = Some(shift.id.clone());
        governance.submit_request(request, now, &policy).unwrap();

        governance.approve_request("r1", "admin", now).unwrap();
        assert_eq!(governance.get_shift("s1"), None);
    }

    #[test]
    fn failed_apply_leaves_the_request_pending() {
        let (governance, _, policy) = setup_governance();
        let now = dt("2024-03-04 08:00:00");
        let (period_id, shift) = locked_period_with_shift(&governance, &policy, now);

        let mut request = build_request("r1", &period_id, ChangeType::Delete);
        request.shift_id = Some(shift.id.clone());
        governance.submit_request(request, now, &policy).unwrap();

        // The target disappears before approval (period unlocked, shift
        // removed directly).
        let period = governance.get_period(&period_id).unwrap();
        governance.unlock(&period.id, "ops", now).unwrap();
        governance.remove_shift(&shift.id, now).unwrap();

        let result = governance.approve_request("r1", "admin", now);
        assert!(matches!(
            result,
            Err(CoreError::Validation(crate::ValidationIssue::UnknownShift { .. }))
        ));
        assert_eq!(
            governance.get_request("r1").unwrap().status,
            RequestStatus::Pending,
            "a failed apply must not surface as approved"
        );
    }

    #[test]
    fn denied_requests_are_terminal_and_apply_nothing() {
        let (governance, _, policy) = setup_governance();
        let now = dt("2024-03-04 08:00:00");
        let (period_id, shift) = locked_period_with_shift(&governance, &policy, now);

        let mut request = build_request("r1", &period_id, ChangeType::Delete);
        request.shift_id = Some(shift.id.clone());
        governance.submit_request(request, now, &policy).unwrap();

        let denied = governance.deny_request("r1", "admin", now).unwrap();
        assert_eq!(denied.status, RequestStatus::Denied);
        assert_eq!(governance.get_shift("s1"), Some(shift), "deny applies nothing");

        // Terminal: neither approval nor a second denial may land.
        assert!(governance.approve_request("r1", "admin", now).is_err());
        assert!(governance.deny_request("r1", "admin", now).is_err());
    }

    #[test]
    fn concurrent_approvals_yield_one_winner_and_one_conflict() {
        let (governance, _, policy) = setup_governance();
        let now = dt("2024-03-04 08:00:00");
        let (period_id, shift) = locked_period_with_shift(&governance, &policy, now);

        let mut request = build_request("r1", &period_id, ChangeType::Delete);
        request.shift_id = Some(shift.id.clone());
        governance.submit_request(request, now, &policy).unwrap();

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let governance = governance.clone();
                thread::spawn(move || governance.approve_request("r1", "admin", now))
            })
            .collect();
        let outcomes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let wins = outcomes.iter().filter(|o| o.is_ok()).count();
        let conflicts = outcomes
            .iter()
            .filter(|o| matches!(o, Err(e) if e.is_conflict()))
            .count();
        assert_eq!(
            (wins, conflicts),
            (1, 1),
            "exactly one approval applies, the loser sees a conflict: {outcomes:?}"
        );
        assert_eq!(governance.get_shift("s1"), None, "the delete applied once");
    }

    #[test]
    fn unscheduled_policy_is_not_consulted_by_governance() {
        // Governance only reads the publish/reason flags from policy; the
        // clock-in policy belongs to the workforce engine. A policy row
        // with Block must not affect period transitions.
        let (governance, _, mut policy) = setup_governance();
        policy.unscheduled_clock_in_policy = UnscheduledClockInPolicy::Block;
        let now = dt("2024-03-04 08:00:00");
        let period = governance.get_or_create_period("c1", "loc-1", d("2024-03-04"), now);
        assert!(governance.publish(&period.id, "ops", now, &policy).is_ok());
    }
}
