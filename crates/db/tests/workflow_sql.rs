use std::sync::Arc;

use chrono::{Duration, NaiveDate, Utc};

use hrflow_core::domain::absence::{AbsenceRequestId, AbsenceStatus, AbsenceTypeId};
use hrflow_core::domain::org::UserId;
use hrflow_core::domain::policy::ApprovalLevel;
use hrflow_core::workflow::notify::NotificationKind;
use hrflow_core::workflow::ports::AbsenceRequestStore;
use hrflow_core::workflow::{ApprovalDecision, NewAbsenceRequest, WorkflowEngine, WorkflowError};
use hrflow_db::{
    connect_with_settings, migrations, DbPool, HrSeedDataset, SqlNotificationSink,
    SqlOrganizationDirectory, SqlWorkflowEngine, SqlWorkflowStore,
};

struct Harness {
    pool: DbPool,
    engine: SqlWorkflowEngine,
    notifications: Arc<SqlNotificationSink>,
}

async fn harness() -> Harness {
    let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
    migrations::run_pending(&pool).await.expect("migrations");
    HrSeedDataset::load(&pool).await.expect("seed");

    let store = Arc::new(SqlWorkflowStore::new(pool.clone()));
    let notifications = Arc::new(SqlNotificationSink::new(pool.clone()));
    let engine = WorkflowEngine::new(
        Arc::new(SqlOrganizationDirectory::new(pool.clone())),
        Arc::clone(&store),
        store,
        Arc::clone(&notifications),
    );

    Harness { pool, engine, notifications }
}

fn user(id: &str) -> UserId {
    UserId(id.to_owned())
}

fn date(raw: &str) -> NaiveDate {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").expect("valid date")
}

fn annual_leave(requester: &str, start: &str, end: &str) -> NewAbsenceRequest {
    NewAbsenceRequest {
        requester_id: user(requester),
        absence_type_id: AbsenceTypeId("at-annual".to_owned()),
        start_date: date(start),
        end_date: date(end),
        start_time: None,
        end_time: None,
        reason: "family trip".to_owned(),
        attachment: None,
    }
}

#[tokio::test]
async fn engineering_annual_leave_walks_every_required_tier() {
    let h = harness().await;

    let request = h
        .engine
        .create_absence_request(annual_leave("u-emp-eng", "2024-07-01", "2024-07-03"))
        .await
        .expect("file request");
    assert_eq!(request.current_approver_id, Some(user("u-mgr-eng")));
    assert_eq!(request.approval_level, Some(ApprovalLevel::DepartmentManager));

    let steps = [
        ("u-mgr-eng", Some(("u-dir-hn", ApprovalLevel::OfficeDirector))),
        ("u-dir-hn", Some(("u-hr-01", ApprovalLevel::Hr))),
        ("u-hr-01", None),
    ];
    for (actor, expected_next) in steps {
        let outcome = h
            .engine
            .process_approval(&request.id, &user(actor), ApprovalDecision::Approved, None)
            .await
            .expect("approve");
        let next = outcome.next_approver.map(|next| (next.user_id.0, next.level));
        assert_eq!(next, expected_next.map(|(id, level)| (id.to_owned(), level)));
    }

    let stored = h.engine.store().find_request(&request.id).await.expect("find").expect("exists");
    assert_eq!(stored.status, AbsenceStatus::Approved);
    assert_eq!(stored.approved_by, Some(user("u-hr-01")));
    assert_eq!(stored.version, 3);
    assert_eq!(h.engine.store().history_for(&request.id).await.expect("history").len(), 3);

    let requester_inbox =
        h.notifications.list_for_recipient(&user("u-emp-eng")).await.expect("inbox");
    assert_eq!(requester_inbox.len(), 1);
    assert_eq!(requester_inbox[0].event.kind, NotificationKind::Completed);
}

#[tokio::test]
async fn returned_request_matches_what_was_stored() {
    let h = harness().await;

    let filed = h
        .engine
        .create_absence_request(annual_leave("u-emp-eng", "2024-07-15", "2024-07-16"))
        .await
        .expect("file request");
    let stored = h.engine.store().find_request(&filed.id).await.expect("find").expect("exists");
    assert_eq!(stored, filed);

    let outcome = h
        .engine
        .process_approval(&filed.id, &user("u-mgr-eng"), ApprovalDecision::Approved, Some("ok".to_owned()))
        .await
        .expect("approve");
    let stored = h.engine.store().find_request(&filed.id).await.expect("find").expect("exists");
    assert_eq!(stored, outcome.request);
    assert_eq!(h.engine.store().history_for(&filed.id).await.expect("history"), vec![outcome.history]);
}

#[tokio::test]
async fn absent_manager_is_skipped_for_overlapping_dates() {
    let h = harness().await;

    let manager_leave = h
        .engine
        .create_absence_request(annual_leave("u-mgr-eng", "2024-08-05", "2024-08-09"))
        .await
        .expect("manager files leave");
    // The manager is their own department approver.
    for actor in ["u-mgr-eng", "u-dir-hn", "u-hr-01"] {
        h.engine
            .process_approval(&manager_leave.id, &user(actor), ApprovalDecision::Approved, None)
            .await
            .expect("approve manager leave");
    }

    let overlapping = h
        .engine
        .create_absence_request(annual_leave("u-emp-eng", "2024-08-08", "2024-08-12"))
        .await
        .expect("overlapping request");
    assert_eq!(overlapping.current_approver_id, Some(user("u-dir-hn")));
    assert_eq!(overlapping.approval_level, Some(ApprovalLevel::OfficeDirector));

    let disjoint = h
        .engine
        .create_absence_request(annual_leave("u-emp-eng", "2024-08-12", "2024-08-13"))
        .await
        .expect("disjoint request");
    assert_eq!(disjoint.current_approver_id, Some(user("u-mgr-eng")));
}

#[tokio::test]
async fn rejection_and_cancellation_close_requests() {
    let h = harness().await;

    let rejected = h
        .engine
        .create_absence_request(annual_leave("u-emp-ops", "2024-09-02", "2024-09-02"))
        .await
        .expect("file");
    assert_eq!(rejected.current_approver_id, Some(user("u-mgr-ops")));
    let outcome = h
        .engine
        .process_approval(
            &rejected.id,
            &user("u-mgr-ops"),
            ApprovalDecision::Rejected,
            Some("quarter close".to_owned()),
        )
        .await
        .expect("reject");
    assert_eq!(outcome.request.status, AbsenceStatus::Rejected);
    assert_eq!(outcome.request.rejection_reason.as_deref(), Some("quarter close"));
    assert!(outcome.request.current_approver_id.is_none());

    let withdrawn = h
        .engine
        .create_absence_request(annual_leave("u-emp-ops", "2024-09-09", "2024-09-10"))
        .await
        .expect("file");
    let not_mine = h.engine.cancel_absence_request(&withdrawn.id, &user("u-mgr-ops")).await;
    assert!(matches!(not_mine, Err(WorkflowError::NotRequester { .. })));

    let cancelled = h
        .engine
        .cancel_absence_request(&withdrawn.id, &user("u-emp-ops"))
        .await
        .expect("cancel");
    assert_eq!(cancelled.status, AbsenceStatus::Cancelled);
    assert!(h.engine.store().history_for(&withdrawn.id).await.expect("history").is_empty());

    let again = h
        .engine
        .process_approval(&withdrawn.id, &user("u-mgr-ops"), ApprovalDecision::Approved, None)
        .await;
    assert!(matches!(again, Err(WorkflowError::NotPending { .. })));
}

#[tokio::test]
async fn zero_level_policy_approves_on_filing() {
    let h = harness().await;

    let mut input = annual_leave("u-emp-ops", "2024-10-01", "2024-10-01");
    input.absence_type_id = AbsenceTypeId("at-wfh".to_owned());
    let request = h.engine.create_absence_request(input).await.expect("file");

    assert_eq!(request.status, AbsenceStatus::Approved);
    assert!(request.current_approver_id.is_none());
    let inbox = h.notifications.list_for_request(&request.id).await.expect("notifications");
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].event.kind, NotificationKind::Completed);
}

#[tokio::test]
async fn missing_policy_is_created_with_permissive_default() {
    let h = harness().await;

    let mut input = annual_leave("u-emp-eng", "2024-11-04", "2024-11-04");
    input.absence_type_id = AbsenceTypeId("at-unpaid".to_owned());
    let request = h.engine.create_absence_request(input).await.expect("file");

    assert_eq!(request.current_approver_id, Some(user("u-mgr-eng")));
    let policies: i64 = sqlx::query_scalar(
        "SELECT COUNT(1) FROM approval_workflow WHERE department_id = 'dept-eng' AND absence_type_id = 'at-unpaid'",
    )
    .fetch_one(&h.pool)
    .await
    .expect("count policies");
    assert_eq!(policies, 1);
}

#[tokio::test]
async fn overdue_sweep_reminds_stale_approvers() {
    let h = harness().await;

    let request = h
        .engine
        .create_absence_request(annual_leave("u-emp-eng", "2024-12-02", "2024-12-03"))
        .await
        .expect("file");
    let stale = (Utc::now() - Duration::hours(30)).to_rfc3339_opts(chrono::SecondsFormat::Micros, true);
    sqlx::query("UPDATE absence_request SET created_at = ? WHERE id = ?")
        .bind(stale)
        .bind(&request.id.0)
        .execute(&h.pool)
        .await
        .expect("age request");
    h.engine
        .create_absence_request(annual_leave("u-emp-eng", "2024-12-09", "2024-12-09"))
        .await
        .expect("fresh request");

    let report = h.engine.check_overdue_requests(Utc::now()).await.expect("sweep");
    assert_eq!((report.scanned, report.reminded, report.skipped), (1, 1, 0));

    let reminders: Vec<_> = h
        .notifications
        .list_for_request(&request.id)
        .await
        .expect("notifications")
        .into_iter()
        .filter(|stored| stored.event.kind == NotificationKind::Reminder)
        .collect();
    assert_eq!(reminders.len(), 1);
    assert_eq!(reminders[0].event.recipient_id, user("u-mgr-eng"));
}

#[tokio::test]
async fn unknown_request_is_not_found() {
    let h = harness().await;

    let result = h
        .engine
        .process_approval(
            &AbsenceRequestId("missing".to_owned()),
            &user("u-mgr-eng"),
            ApprovalDecision::Approved,
            None,
        )
        .await;

    assert!(matches!(result, Err(WorkflowError::NotFound { .. })));
}
