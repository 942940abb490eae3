use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::domain::absence::{
    compute_total_days, AbsenceRequest, AbsenceRequestId, AbsenceStatus, AbsenceTypeId,
    ApprovalHistory, HistoryAction, HistoryId,
};
use crate::domain::now_micros;
use crate::domain::org::{User, UserId};
use crate::domain::policy::{ApprovalLevel, ApprovalTier, ApprovalWorkflow};
use crate::errors::DomainError;
use crate::workflow::ports::{
    AbsenceCalendar, ApprovalNotifier, OrganizationDirectory, StoreError, WorkflowStore,
};

/// Pending requests younger than this are never looked at by the overdue sweep,
/// whatever their level's configured timeout.
pub const OVERDUE_SWEEP_MIN_AGE_HOURS: i64 = 24;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NextApprover {
    pub user_id: UserId,
    pub level: ApprovalLevel,
    pub priority: i32,
}

impl NextApprover {
    fn sort_key(&self) -> (i32, ApprovalLevel, &UserId) {
        (self.priority, self.level, &self.user_id)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAbsenceRequest {
    pub requester_id: UserId,
    pub absence_type_id: AbsenceTypeId,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub reason: String,
    pub attachment: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    Approved,
    Rejected,
}

impl ApprovalDecision {
    pub fn history_action(self) -> HistoryAction {
        match self {
            Self::Approved => HistoryAction::Approved,
            Self::Rejected => HistoryAction::Rejected,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalOutcome {
    pub request: AbsenceRequest,
    pub history: ApprovalHistory,
    pub next_approver: Option<NextApprover>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub scanned: usize,
    pub reminded: usize,
    pub skipped: usize,
}

#[derive(Clone, Debug, Error, PartialEq)]
pub enum WorkflowError {
    #[error("{entity} `{id}` was not found")]
    NotFound { entity: &'static str, id: String },
    #[error("user `{0}` has no department, so no approval policy applies")]
    RequesterWithoutDepartment(String),
    #[error("absence request `{id}` is {status:?}, not pending")]
    NotPending { id: String, status: AbsenceStatus },
    #[error("user `{user_id}` did not file absence request `{request_id}`")]
    NotRequester { request_id: String, user_id: String },
    #[error("user `{user_id}` is not the current approver of absence request `{request_id}`")]
    NotCurrentApprover { request_id: String, user_id: String },
    #[error("absence request `{0}` was modified concurrently")]
    Conflict(String),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl WorkflowError {
    fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound { entity, id: id.into() }
    }
}

/// Boundary check for callers; the engine itself trusts whoever invokes it.
pub fn ensure_current_approver(
    request: &AbsenceRequest,
    actor: &UserId,
) -> Result<(), WorkflowError> {
    if !request.is_pending() {
        return Err(WorkflowError::NotPending { id: request.id.0.clone(), status: request.status });
    }
    if !request.is_current_approver(actor) {
        return Err(WorkflowError::NotCurrentApprover {
            request_id: request.id.0.clone(),
            user_id: actor.0.clone(),
        });
    }
    Ok(())
}

fn ensure_transition(from: AbsenceStatus, to: AbsenceStatus) -> Result<(), DomainError> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(DomainError::InvalidStatusTransition { from, to })
    }
}

pub struct WorkflowEngine<D, C, S, N> {
    directory: Arc<D>,
    calendar: Arc<C>,
    store: Arc<S>,
    notifier: Arc<N>,
}

impl<D, C, S, N> Clone for WorkflowEngine<D, C, S, N> {
    fn clone(&self) -> Self {
        Self {
            directory: Arc::clone(&self.directory),
            calendar: Arc::clone(&self.calendar),
            store: Arc::clone(&self.store),
            notifier: Arc::clone(&self.notifier),
        }
    }
}

impl<D, C, S, N> WorkflowEngine<D, C, S, N>
where
    D: OrganizationDirectory,
    C: AbsenceCalendar,
    S: WorkflowStore,
    N: ApprovalNotifier,
{
    pub fn new(directory: Arc<D>, calendar: Arc<C>, store: Arc<S>, notifier: Arc<N>) -> Self {
        Self { directory, calendar, store, notifier }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn get_next_approver(
        &self,
        request: &AbsenceRequest,
    ) -> Result<Option<NextApprover>, WorkflowError> {
        let policy = self.policy_for(request).await?;
        let requester = self.requester_of(request).await?;
        let history = self.store.history_for(&request.id).await?;
        self.next_approver_for(request, &policy, &requester, &history).await
    }

    pub async fn create_absence_request(
        &self,
        input: NewAbsenceRequest,
    ) -> Result<AbsenceRequest, WorkflowError> {
        let requester = self
            .directory
            .find_user(&input.requester_id)
            .await?
            .ok_or_else(|| WorkflowError::not_found("user", input.requester_id.0.clone()))?;
        let department_id = requester
            .department_id
            .clone()
            .ok_or_else(|| WorkflowError::RequesterWithoutDepartment(requester.id.0.clone()))?;

        let policy = match self.store.find_policy(&department_id, &input.absence_type_id).await? {
            Some(policy) => policy,
            None => {
                let policy = ApprovalWorkflow::permissive_default(
                    department_id.clone(),
                    input.absence_type_id.clone(),
                );
                self.store.save_policy(policy.clone()).await?;
                info!(
                    event_name = "workflow.policy.default_created",
                    workflow_id = %policy.id.0,
                    department_id = %department_id.0,
                    absence_type_id = %input.absence_type_id.0,
                    "no approval policy configured, created permissive default"
                );
                policy
            }
        };

        let now = now_micros();
        let mut request = AbsenceRequest {
            id: AbsenceRequestId::generate(),
            requester_id: input.requester_id,
            absence_type_id: input.absence_type_id,
            workflow_id: policy.id.clone(),
            start_date: input.start_date,
            end_date: input.end_date,
            start_time: input.start_time,
            end_time: input.end_time,
            total_days: compute_total_days(
                input.start_date,
                input.end_date,
                input.start_time,
                input.end_time,
            ),
            reason: input.reason,
            attachment: input.attachment,
            current_approver_id: None,
            approval_level: None,
            status: AbsenceStatus::Pending,
            approved_by: None,
            approved_at: None,
            rejection_reason: None,
            reminder_count: 0,
            version: 0,
            created_at: now,
            updated_at: now,
        };

        let next = self.next_approver_for(&request, &policy, &requester, &[]).await?;
        match &next {
            Some(next) => {
                request.current_approver_id = Some(next.user_id.clone());
                request.approval_level = Some(next.level);
            }
            None => {
                ensure_transition(request.status, AbsenceStatus::Approved)?;
                request.status = AbsenceStatus::Approved;
                request.approved_at = Some(now);
            }
        }

        self.store.insert_request(request.clone()).await?;
        info!(
            event_name = "workflow.request.created",
            request_id = %request.id.0,
            requester_id = %request.requester_id.0,
            workflow_id = %request.workflow_id.0,
            total_days = %request.total_days,
            status = request.status.as_str(),
            approval_level = request.approval_level.map(ApprovalLevel::as_str).unwrap_or("none"),
            "absence request filed"
        );

        match next {
            Some(next) => self.notifier.approval_required(&request, &next.user_id).await,
            None => self.notifier.completed(&request).await,
        }

        Ok(request)
    }

    pub async fn process_approval(
        &self,
        request_id: &AbsenceRequestId,
        actor: &UserId,
        decision: ApprovalDecision,
        comment: Option<String>,
    ) -> Result<ApprovalOutcome, WorkflowError> {
        let request = self.load_request(request_id).await?;
        if !request.is_pending() {
            return Err(WorkflowError::NotPending { id: request.id.0.clone(), status: request.status });
        }
        let level = request.approval_level.ok_or_else(|| {
            DomainError::InvariantViolation(format!(
                "pending absence request `{}` has no approval level",
                request.id.0
            ))
        })?;

        let now = now_micros();
        let history = ApprovalHistory {
            id: HistoryId::generate(),
            request_id: request.id.clone(),
            approver_id: actor.clone(),
            level,
            action: decision.history_action(),
            comment: comment.clone(),
            created_at: now,
        };

        let expected_version = request.version;
        let mut updated = request.clone();
        updated.version += 1;
        updated.updated_at = now;

        let next = match decision {
            ApprovalDecision::Approved => {
                let policy = self.policy_for(&request).await?;
                let requester = self.requester_of(&request).await?;
                let mut rows = self.store.history_for(&request.id).await?;
                rows.push(history.clone());

                let next = self.next_approver_for(&updated, &policy, &requester, &rows).await?;
                match &next {
                    Some(next) => {
                        updated.current_approver_id = Some(next.user_id.clone());
                        updated.approval_level = Some(next.level);
                    }
                    None => {
                        ensure_transition(request.status, AbsenceStatus::Approved)?;
                        updated.status = AbsenceStatus::Approved;
                        updated.approved_by = Some(actor.clone());
                        updated.approved_at = Some(now);
                        updated.current_approver_id = None;
                        updated.approval_level = None;
                    }
                }
                next
            }
            ApprovalDecision::Rejected => {
                ensure_transition(request.status, AbsenceStatus::Rejected)?;
                updated.status = AbsenceStatus::Rejected;
                updated.approved_by = Some(actor.clone());
                updated.approved_at = Some(now);
                updated.rejection_reason = Some(comment.unwrap_or_default());
                updated.current_approver_id = None;
                updated.approval_level = None;
                None
            }
        };

        if !self.store.commit_transition(&updated, expected_version, Some(&history)).await? {
            warn!(
                event_name = "workflow.request.conflict",
                request_id = %request.id.0,
                expected_version,
                "absence request changed while the decision was being applied"
            );
            return Err(WorkflowError::Conflict(request.id.0.clone()));
        }

        info!(
            event_name = "workflow.request.decided",
            request_id = %updated.id.0,
            actor_id = %actor.0,
            level = level.as_str(),
            action = history.action.as_str(),
            status = updated.status.as_str(),
            next_level = next.as_ref().map(|next| next.level.as_str()).unwrap_or("none"),
            "approval decision applied"
        );

        match (&next, updated.status) {
            (Some(next), _) => self.notifier.approval_required(&updated, &next.user_id).await,
            (None, AbsenceStatus::Rejected) => self.notifier.rejected(&updated).await,
            (None, _) => self.notifier.completed(&updated).await,
        }

        Ok(ApprovalOutcome { request: updated, history, next_approver: next })
    }

    /// Requester-initiated withdrawal of a pending request. Leaves no history row.
    pub async fn cancel_absence_request(
        &self,
        request_id: &AbsenceRequestId,
        actor: &UserId,
    ) -> Result<AbsenceRequest, WorkflowError> {
        let request = self.load_request(request_id).await?;
        if request.requester_id != *actor {
            return Err(WorkflowError::NotRequester {
                request_id: request.id.0.clone(),
                user_id: actor.0.clone(),
            });
        }
        if !request.is_pending() {
            return Err(WorkflowError::NotPending { id: request.id.0.clone(), status: request.status });
        }
        ensure_transition(request.status, AbsenceStatus::Cancelled)?;

        let mut updated = request.clone();
        updated.status = AbsenceStatus::Cancelled;
        updated.current_approver_id = None;
        updated.approval_level = None;
        updated.version += 1;
        updated.updated_at = now_micros();

        if !self.store.commit_transition(&updated, request.version, None).await? {
            return Err(WorkflowError::Conflict(request.id.0.clone()));
        }

        info!(
            event_name = "workflow.request.cancelled",
            request_id = %updated.id.0,
            requester_id = %actor.0,
            "absence request cancelled by requester"
        );
        Ok(updated)
    }

    /// One reminder per overdue request. The stored reminder count is reported
    /// as-is and `max_reminders` is not consulted.
    pub async fn check_overdue_requests(
        &self,
        now: DateTime<Utc>,
    ) -> Result<SweepReport, WorkflowError> {
        let cutoff = now - Duration::hours(OVERDUE_SWEEP_MIN_AGE_HOURS);
        let pending = self.store.list_pending_created_before(cutoff).await?;
        let mut report = SweepReport { scanned: pending.len(), ..SweepReport::default() };
        let mut policies: HashMap<String, ApprovalWorkflow> = HashMap::new();

        for request in &pending {
            if !policies.contains_key(&request.workflow_id.0) {
                match self.policy_for(request).await {
                    Ok(policy) => {
                        policies.insert(policy.id.0.clone(), policy);
                    }
                    Err(error) => {
                        warn!(
                            event_name = "workflow.sweep.policy_unavailable",
                            request_id = %request.id.0,
                            error = %error,
                            "skipping request whose policy could not be loaded"
                        );
                        report.skipped += 1;
                        continue;
                    }
                }
            }
            let Some(policy) = policies.get(&request.workflow_id.0) else {
                report.skipped += 1;
                continue;
            };

            let approver = match &request.current_approver_id {
                Some(approver) if request.is_overdue(policy, now) => approver,
                _ => {
                    report.skipped += 1;
                    continue;
                }
            };

            self.notifier.reminder(request, approver, request.reminder_count).await;
            report.reminded += 1;
        }

        info!(
            event_name = "workflow.sweep.completed",
            scanned = report.scanned,
            reminded = report.reminded,
            skipped = report.skipped,
            "overdue sweep finished"
        );
        Ok(report)
    }

    async fn load_request(&self, id: &AbsenceRequestId) -> Result<AbsenceRequest, WorkflowError> {
        self.store
            .find_request(id)
            .await?
            .ok_or_else(|| WorkflowError::not_found("absence request", id.0.clone()))
    }

    async fn policy_for(&self, request: &AbsenceRequest) -> Result<ApprovalWorkflow, WorkflowError> {
        self.store
            .find_policy_by_id(&request.workflow_id)
            .await?
            .ok_or_else(|| WorkflowError::not_found("approval workflow", request.workflow_id.0.clone()))
    }

    async fn requester_of(&self, request: &AbsenceRequest) -> Result<User, WorkflowError> {
        self.directory
            .find_user(&request.requester_id)
            .await?
            .ok_or_else(|| WorkflowError::not_found("user", request.requester_id.0.clone()))
    }

    async fn next_approver_for(
        &self,
        request: &AbsenceRequest,
        policy: &ApprovalWorkflow,
        requester: &User,
        history: &[ApprovalHistory],
    ) -> Result<Option<NextApprover>, WorkflowError> {
        let completed: HashSet<ApprovalTier> = history
            .iter()
            .filter(|row| row.action == HistoryAction::Approved)
            .map(|row| row.level.tier())
            .collect();
        let mut candidates = Vec::new();

        if let Some(department_id) = &requester.department_id {
            let department = self
                .directory
                .find_department(department_id)
                .await?
                .ok_or_else(|| WorkflowError::not_found("department", department_id.0.clone()))?;

            if !completed.contains(&ApprovalTier::Department) {
                let candidate = self
                    .tier_candidate(
                        request,
                        policy,
                        [
                            (ApprovalLevel::DepartmentManager, department.manager_id.as_ref()),
                            (ApprovalLevel::DepartmentDeputy, department.deputy_manager_id.as_ref()),
                        ],
                    )
                    .await?;
                candidates.extend(candidate);
            }

            if !completed.contains(&ApprovalTier::Office) {
                if let Some(office_id) = &department.office_id {
                    if let Some(office) = self.directory.find_office(office_id).await? {
                        let candidate = self
                            .tier_candidate(
                                request,
                                policy,
                                [
                                    (ApprovalLevel::OfficeDirector, office.director_id.as_ref()),
                                    (ApprovalLevel::OfficeDeputy, office.deputy_director_id.as_ref()),
                                ],
                            )
                            .await?;
                        candidates.extend(candidate);
                    }
                }
            }
        }

        if policy.requires(ApprovalLevel::Hr) && !completed.contains(&ApprovalTier::Hr) {
            for user in self.directory.active_hr_users().await? {
                if self.is_absent(&user.id, request).await? {
                    debug!(
                        event_name = "workflow.routing.skip_absent",
                        request_id = %request.id.0,
                        approver_id = %user.id.0,
                        level = ApprovalLevel::Hr.as_str(),
                        "hr approver is absent for the requested dates"
                    );
                    continue;
                }
                candidates.push(NextApprover {
                    user_id: user.id,
                    level: ApprovalLevel::Hr,
                    priority: policy.hr.priority,
                });
            }
        }

        candidates.sort_by(|left, right| left.sort_key().cmp(&right.sort_key()));
        Ok(candidates.into_iter().next())
    }

    /// First of `[primary, fallback]` that is required, assigned and present.
    async fn tier_candidate(
        &self,
        request: &AbsenceRequest,
        policy: &ApprovalWorkflow,
        levels: [(ApprovalLevel, Option<&UserId>); 2],
    ) -> Result<Option<NextApprover>, WorkflowError> {
        for (level, assignee) in levels {
            let Some(user_id) = assignee else {
                continue;
            };
            if !policy.requires(level) {
                continue;
            }
            if self.is_absent(user_id, request).await? {
                debug!(
                    event_name = "workflow.routing.skip_absent",
                    request_id = %request.id.0,
                    approver_id = %user_id.0,
                    level = level.as_str(),
                    "approver is absent for the requested dates"
                );
                continue;
            }
            return Ok(Some(NextApprover {
                user_id: user_id.clone(),
                level,
                priority: policy.level(level).priority,
            }));
        }
        Ok(None)
    }

    async fn is_absent(&self, user_id: &UserId, request: &AbsenceRequest) -> Result<bool, WorkflowError> {
        Ok(self.calendar.has_approved_absence(user_id, request.start_date, request.end_date).await?)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::{DateTime, Duration, NaiveDate, Utc};
    use rust_decimal::Decimal;

    use super::{
        ensure_current_approver, ApprovalDecision, NewAbsenceRequest, WorkflowEngine,
        WorkflowError,
    };
    use crate::domain::absence::{
        AbsenceRequest, AbsenceRequestId, AbsenceStatus, AbsenceTypeId, ApprovalHistory,
        HistoryAction,
    };
    use crate::domain::org::{Department, DepartmentId, Office, OfficeId, User, UserId, UserRole};
    use crate::domain::policy::{ApprovalLevel, ApprovalWorkflow, WorkflowId};
    use crate::workflow::memory::{InMemoryDirectory, InMemoryWorkflowStore};
    use crate::workflow::notify::{InMemoryNotifier, NotificationKind};
    use crate::workflow::ports::{AbsenceRequestStore, PolicyStore, StoreError};

    type TestEngine =
        WorkflowEngine<InMemoryDirectory, InMemoryWorkflowStore, InMemoryWorkflowStore, InMemoryNotifier>;

    struct Harness {
        engine: TestEngine,
        store: Arc<InMemoryWorkflowStore>,
        notifier: Arc<InMemoryNotifier>,
    }

    fn uid(raw: &str) -> UserId {
        UserId(raw.to_owned())
    }

    fn date(raw: &str) -> NaiveDate {
        NaiveDate::parse_from_str(raw, "%Y-%m-%d").expect("valid date")
    }

    fn user(id: &str, department: Option<&str>, role: UserRole) -> User {
        User {
            id: uid(id),
            full_name: id.to_owned(),
            email: format!("{id}@example.test"),
            department_id: department.map(|dept| DepartmentId(dept.to_owned())),
            role,
            active: true,
        }
    }

    fn directory() -> InMemoryDirectory {
        InMemoryDirectory::default()
            .with_office(Office {
                id: OfficeId("off-hn".to_owned()),
                name: "Hanoi office".to_owned(),
                director_id: Some(uid("u-dir")),
                deputy_director_id: Some(uid("u-offdep")),
            })
            .with_department(Department {
                id: DepartmentId("dept-it".to_owned()),
                name: "IT".to_owned(),
                office_id: Some(OfficeId("off-hn".to_owned())),
                manager_id: Some(uid("u-mgr")),
                deputy_manager_id: Some(uid("u-dep")),
            })
            .with_department(Department {
                id: DepartmentId("dept-ops".to_owned()),
                name: "Operations".to_owned(),
                office_id: None,
                manager_id: None,
                deputy_manager_id: None,
            })
            .with_user(user("u-emp", Some("dept-it"), UserRole::Employee))
            .with_user(user("u-ops", Some("dept-ops"), UserRole::Employee))
            .with_user(user("u-mgr", Some("dept-it"), UserRole::Employee))
            .with_user(user("u-dep", Some("dept-it"), UserRole::Employee))
            .with_user(user("u-dir", None, UserRole::Employee))
            .with_user(user("u-offdep", None, UserRole::Employee))
            .with_user(user("u-hr-2", None, UserRole::Hr))
            .with_user(user("u-hr-1", None, UserRole::Hr))
            .with_user(user("u-nodept", None, UserRole::Employee))
    }

    fn policy(department: &str, levels: &[ApprovalLevel]) -> ApprovalWorkflow {
        ApprovalWorkflow::new(DepartmentId(department.to_owned()), AbsenceTypeId("annual".to_owned()))
            .with_levels(levels)
    }

    fn harness(policies: Vec<ApprovalWorkflow>) -> Harness {
        let mut store = InMemoryWorkflowStore::default();
        for policy in policies {
            store = store.with_policy(policy);
        }
        let store = Arc::new(store);
        let notifier = Arc::new(InMemoryNotifier::default());
        let engine = WorkflowEngine::new(
            Arc::new(directory()),
            Arc::clone(&store),
            Arc::clone(&store),
            Arc::clone(&notifier),
        );
        Harness { engine, store, notifier }
    }

    fn filing(requester: &str, start: &str, end: &str) -> NewAbsenceRequest {
        NewAbsenceRequest {
            requester_id: uid(requester),
            absence_type_id: AbsenceTypeId("annual".to_owned()),
            start_date: date(start),
            end_date: date(end),
            start_time: None,
            end_time: None,
            reason: "family event".to_owned(),
            attachment: None,
        }
    }

    /// An already-approved absence for `user` over the given dates.
    fn approved_absence(user: &str, start: &str, end: &str) -> AbsenceRequest {
        let now = Utc::now();
        AbsenceRequest {
            id: AbsenceRequestId(format!("abs-{user}-{start}")),
            requester_id: uid(user),
            absence_type_id: AbsenceTypeId("annual".to_owned()),
            workflow_id: WorkflowId("wf-unrelated".to_owned()),
            start_date: date(start),
            end_date: date(end),
            start_time: None,
            end_time: None,
            total_days: Decimal::ONE,
            reason: "leave".to_owned(),
            attachment: None,
            current_approver_id: None,
            approval_level: None,
            status: AbsenceStatus::Approved,
            approved_by: None,
            approved_at: Some(now),
            rejection_reason: None,
            reminder_count: 0,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn manager_only_policy_routes_to_manager_then_completes() {
        let h = harness(vec![policy("dept-it", &[ApprovalLevel::DepartmentManager])]);

        let request =
            h.engine.create_absence_request(filing("u-emp", "2024-01-10", "2024-01-11")).await.expect("create");
        assert_eq!(request.status, AbsenceStatus::Pending);
        assert_eq!(request.current_approver_id, Some(uid("u-mgr")));
        assert_eq!(request.approval_level, Some(ApprovalLevel::DepartmentManager));
        assert_eq!(request.total_days, Decimal::from(2));

        let outcome = h
            .engine
            .process_approval(&request.id, &uid("u-mgr"), ApprovalDecision::Approved, None)
            .await
            .expect("approve");
        assert_eq!(outcome.request.status, AbsenceStatus::Approved);
        assert_eq!(outcome.request.approved_by, Some(uid("u-mgr")));
        assert!(outcome.request.approved_at.is_some());
        assert_eq!(outcome.request.current_approver_id, None);
        assert!(outcome.request.approver_state_is_consistent());
        assert_eq!(outcome.next_approver, None);

        assert_eq!(
            h.notifier.kinds(),
            vec![NotificationKind::ApprovalRequired, NotificationKind::Completed]
        );
    }

    #[tokio::test]
    async fn absent_manager_without_deputy_fallback_auto_approves() {
        let h = harness(vec![policy("dept-it", &[ApprovalLevel::DepartmentManager])]);
        h.store.put_request(approved_absence("u-mgr", "2024-01-09", "2024-01-10"));

        let request =
            h.engine.create_absence_request(filing("u-emp", "2024-01-10", "2024-01-11")).await.expect("create");

        assert_eq!(request.status, AbsenceStatus::Approved);
        assert_eq!(request.current_approver_id, None);
        assert!(request.approved_at.is_some());
        assert_eq!(h.engine.get_next_approver(&request).await.expect("next"), None);
        assert_eq!(h.notifier.kinds(), vec![NotificationKind::Completed]);
    }

    #[tokio::test]
    async fn disjoint_absence_does_not_exclude_manager() {
        let h = harness(vec![policy("dept-it", &[ApprovalLevel::DepartmentManager])]);
        h.store.put_request(approved_absence("u-mgr", "2024-01-01", "2024-01-09"));

        let request =
            h.engine.create_absence_request(filing("u-emp", "2024-01-10", "2024-01-11")).await.expect("create");

        assert_eq!(request.current_approver_id, Some(uid("u-mgr")));
    }

    #[tokio::test]
    async fn absent_manager_falls_back_to_deputy_when_enabled() {
        let h = harness(vec![policy(
            "dept-it",
            &[ApprovalLevel::DepartmentManager, ApprovalLevel::DepartmentDeputy],
        )]);
        h.store.put_request(approved_absence("u-mgr", "2024-01-10", "2024-01-10"));

        let request =
            h.engine.create_absence_request(filing("u-emp", "2024-01-10", "2024-01-12")).await.expect("create");

        assert_eq!(request.current_approver_id, Some(uid("u-dep")));
        assert_eq!(request.approval_level, Some(ApprovalLevel::DepartmentDeputy));

        let outcome = h
            .engine
            .process_approval(&request.id, &uid("u-dep"), ApprovalDecision::Approved, None)
            .await
            .expect("deputy approves");
        assert_eq!(outcome.request.status, AbsenceStatus::Approved, "tier is complete after deputy");
    }

    #[tokio::test]
    async fn manager_then_hr_picks_lowest_hr_id() {
        let h = harness(vec![policy("dept-it", &[ApprovalLevel::DepartmentManager, ApprovalLevel::Hr])]);

        let request =
            h.engine.create_absence_request(filing("u-emp", "2024-01-10", "2024-01-11")).await.expect("create");
        let after_manager = h
            .engine
            .process_approval(&request.id, &uid("u-mgr"), ApprovalDecision::Approved, Some("ok".to_owned()))
            .await
            .expect("manager approves");

        assert_eq!(after_manager.request.status, AbsenceStatus::Pending);
        assert_eq!(after_manager.request.current_approver_id, Some(uid("u-hr-1")));
        assert_eq!(after_manager.request.approval_level, Some(ApprovalLevel::Hr));
        assert_eq!(after_manager.history.level, ApprovalLevel::DepartmentManager);
        assert_eq!(after_manager.request.version, 1);

        let done = h
            .engine
            .process_approval(&request.id, &uid("u-hr-1"), ApprovalDecision::Approved, None)
            .await
            .expect("hr approves");
        assert_eq!(done.request.status, AbsenceStatus::Approved);
        assert_eq!(done.request.approved_by, Some(uid("u-hr-1")));

        let history = h.store.history_for(&request.id).await.expect("history");
        let levels: Vec<ApprovalLevel> = history.iter().map(|row| row.level).collect();
        assert_eq!(levels, vec![ApprovalLevel::DepartmentManager, ApprovalLevel::Hr]);
    }

    #[tokio::test]
    async fn absent_hr_user_is_skipped() {
        let h = harness(vec![policy("dept-it", &[ApprovalLevel::Hr])]);
        h.store.put_request(approved_absence("u-hr-1", "2024-01-11", "2024-01-15"));

        let request =
            h.engine.create_absence_request(filing("u-emp", "2024-01-10", "2024-01-11")).await.expect("create");

        assert_eq!(request.current_approver_id, Some(uid("u-hr-2")));
    }

    #[tokio::test]
    async fn every_hr_user_absent_auto_approves() {
        let h = harness(vec![policy("dept-it", &[ApprovalLevel::Hr])]);
        h.store.put_request(approved_absence("u-hr-1", "2024-01-08", "2024-01-10"));
        h.store.put_request(approved_absence("u-hr-2", "2024-01-11", "2024-01-12"));

        let request =
            h.engine.create_absence_request(filing("u-emp", "2024-01-10", "2024-01-11")).await.expect("create");

        assert_eq!(request.status, AbsenceStatus::Approved);
        assert_eq!(request.current_approver_id, None);
        assert_eq!(request.approval_level, None);
        assert_eq!(h.notifier.kinds(), vec![NotificationKind::Completed]);
    }

    #[tokio::test]
    async fn absent_director_falls_back_to_office_deputy() {
        let h = harness(vec![policy(
            "dept-it",
            &[ApprovalLevel::OfficeDirector, ApprovalLevel::OfficeDeputy],
        )]);
        h.store.put_request(approved_absence("u-dir", "2024-03-01", "2024-03-05"));

        let request =
            h.engine.create_absence_request(filing("u-emp", "2024-03-04", "2024-03-06")).await.expect("create");

        assert_eq!(request.current_approver_id, Some(uid("u-offdep")));
        assert_eq!(request.approval_level, Some(ApprovalLevel::OfficeDeputy));

        let outcome = h
            .engine
            .process_approval(&request.id, &uid("u-offdep"), ApprovalDecision::Approved, None)
            .await
            .expect("office deputy approves");
        assert_eq!(outcome.request.status, AbsenceStatus::Approved, "office tier is complete after deputy");
    }

    #[tokio::test]
    async fn present_director_is_chosen_over_office_deputy() {
        let h = harness(vec![policy(
            "dept-it",
            &[ApprovalLevel::OfficeDirector, ApprovalLevel::OfficeDeputy],
        )]);
        h.store.put_request(approved_absence("u-dir", "2024-02-01", "2024-02-02"));

        let request =
            h.engine.create_absence_request(filing("u-emp", "2024-03-04", "2024-03-06")).await.expect("create");

        assert_eq!(request.current_approver_id, Some(uid("u-dir")));
        assert_eq!(request.approval_level, Some(ApprovalLevel::OfficeDirector));
    }

    #[tokio::test]
    async fn office_tier_follows_department_tier() {
        let h = harness(vec![policy(
            "dept-it",
            &[ApprovalLevel::DepartmentManager, ApprovalLevel::OfficeDirector],
        )]);

        let request =
            h.engine.create_absence_request(filing("u-emp", "2024-02-01", "2024-02-02")).await.expect("create");
        let outcome = h
            .engine
            .process_approval(&request.id, &uid("u-mgr"), ApprovalDecision::Approved, None)
            .await
            .expect("manager approves");

        assert_eq!(outcome.request.current_approver_id, Some(uid("u-dir")));
        assert_eq!(outcome.request.approval_level, Some(ApprovalLevel::OfficeDirector));
        assert_eq!(outcome.next_approver.map(|next| next.priority), Some(3));
    }

    #[tokio::test]
    async fn configured_priority_orders_the_chain() {
        let mut custom = policy("dept-it", &[ApprovalLevel::DepartmentManager, ApprovalLevel::Hr]);
        custom.hr.priority = 0;
        let h = harness(vec![custom]);

        let request =
            h.engine.create_absence_request(filing("u-emp", "2024-02-01", "2024-02-02")).await.expect("create");

        assert_eq!(request.approval_level, Some(ApprovalLevel::Hr));
        assert_eq!(request.current_approver_id, Some(uid("u-hr-1")));
    }

    #[tokio::test]
    async fn required_manager_level_without_any_assignee_contributes_nothing() {
        let h = harness(vec![policy("dept-ops", &[ApprovalLevel::DepartmentManager, ApprovalLevel::Hr])]);

        let request =
            h.engine.create_absence_request(filing("u-ops", "2024-02-01", "2024-02-01")).await.expect("create");

        assert_eq!(request.approval_level, Some(ApprovalLevel::Hr));
    }

    #[tokio::test]
    async fn next_approver_is_idempotent() {
        let h = harness(vec![policy("dept-it", &[ApprovalLevel::DepartmentManager, ApprovalLevel::Hr])]);
        let request =
            h.engine.create_absence_request(filing("u-emp", "2024-03-04", "2024-03-05")).await.expect("create");

        let first = h.engine.get_next_approver(&request).await.expect("first");
        let second = h.engine.get_next_approver(&request).await.expect("second");

        assert_eq!(first, second);
        assert_eq!(first.map(|next| next.user_id), Some(uid("u-mgr")));
    }

    #[tokio::test]
    async fn zero_level_policy_approves_immediately() {
        let h = harness(vec![policy("dept-it", &[])]);

        let request =
            h.engine.create_absence_request(filing("u-emp", "2024-03-04", "2024-03-04")).await.expect("create");

        assert_eq!(request.status, AbsenceStatus::Approved);
        assert_eq!(request.current_approver_id, None);
        assert_eq!(request.approval_level, None);
        assert!(request.approver_state_is_consistent());
    }

    #[tokio::test]
    async fn missing_policy_is_created_with_permissive_default() {
        let h = harness(Vec::new());

        let request =
            h.engine.create_absence_request(filing("u-emp", "2024-03-04", "2024-03-04")).await.expect("create");

        let stored = h
            .store
            .find_policy(&DepartmentId("dept-it".to_owned()), &AbsenceTypeId("annual".to_owned()))
            .await
            .expect("lookup")
            .expect("default policy saved");
        assert_eq!(stored.id, request.workflow_id);
        assert_eq!(stored.required_levels(), vec![ApprovalLevel::DepartmentManager, ApprovalLevel::Hr]);
        assert_eq!(request.current_approver_id, Some(uid("u-mgr")));
    }

    #[tokio::test]
    async fn requester_without_department_is_refused() {
        let h = harness(Vec::new());

        let error = h
            .engine
            .create_absence_request(filing("u-nodept", "2024-03-04", "2024-03-04"))
            .await
            .expect_err("no department");

        assert_eq!(error, WorkflowError::RequesterWithoutDepartment("u-nodept".to_owned()));
    }

    #[tokio::test]
    async fn half_day_request_is_counted_as_half() {
        let h = harness(vec![policy("dept-it", &[ApprovalLevel::DepartmentManager])]);
        let mut input = filing("u-emp", "2024-01-10", "2024-01-10");
        input.start_time = chrono::NaiveTime::from_hms_opt(9, 0, 0);
        input.end_time = chrono::NaiveTime::from_hms_opt(12, 0, 0);

        let request = h.engine.create_absence_request(input).await.expect("create");

        assert_eq!(request.total_days, Decimal::new(5, 1));
    }

    #[tokio::test]
    async fn rejection_closes_request_with_reason() {
        let h = harness(vec![policy("dept-it", &[ApprovalLevel::DepartmentManager, ApprovalLevel::Hr])]);
        let request =
            h.engine.create_absence_request(filing("u-emp", "2024-01-10", "2024-01-11")).await.expect("create");

        let outcome = h
            .engine
            .process_approval(
                &request.id,
                &uid("u-mgr"),
                ApprovalDecision::Rejected,
                Some("Lý do không hợp lệ".to_owned()),
            )
            .await
            .expect("reject");

        assert_eq!(outcome.request.status, AbsenceStatus::Rejected);
        assert_eq!(outcome.request.rejection_reason.as_deref(), Some("Lý do không hợp lệ"));
        assert_eq!(outcome.request.current_approver_id, None);
        assert_eq!(outcome.request.approved_by, Some(uid("u-mgr")));

        let history = h.store.history_for(&request.id).await.expect("history");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].action, HistoryAction::Rejected);
        assert_eq!(history[0].level, ApprovalLevel::DepartmentManager);
        assert_eq!(
            h.notifier.kinds(),
            vec![NotificationKind::ApprovalRequired, NotificationKind::Rejected]
        );
    }

    #[tokio::test]
    async fn rejection_without_comment_stores_empty_reason() {
        let h = harness(vec![policy("dept-it", &[ApprovalLevel::DepartmentManager])]);
        let request =
            h.engine.create_absence_request(filing("u-emp", "2024-01-10", "2024-01-11")).await.expect("create");

        let outcome = h
            .engine
            .process_approval(&request.id, &uid("u-mgr"), ApprovalDecision::Rejected, None)
            .await
            .expect("reject");

        assert_eq!(outcome.request.rejection_reason.as_deref(), Some(""));
    }

    #[tokio::test]
    async fn decided_request_cannot_be_decided_again() {
        let h = harness(vec![policy("dept-it", &[ApprovalLevel::DepartmentManager])]);
        let request =
            h.engine.create_absence_request(filing("u-emp", "2024-01-10", "2024-01-11")).await.expect("create");
        h.engine
            .process_approval(&request.id, &uid("u-mgr"), ApprovalDecision::Approved, None)
            .await
            .expect("approve");

        let error = h
            .engine
            .process_approval(&request.id, &uid("u-mgr"), ApprovalDecision::Approved, None)
            .await
            .expect_err("already approved");

        assert!(matches!(error, WorkflowError::NotPending { status: AbsenceStatus::Approved, .. }));
        assert_eq!(h.store.history_for(&request.id).await.expect("history").len(), 1);
    }

    #[tokio::test]
    async fn unknown_request_is_not_found() {
        let h = harness(Vec::new());

        let error = h
            .engine
            .process_approval(
                &AbsenceRequestId("missing".to_owned()),
                &uid("u-mgr"),
                ApprovalDecision::Approved,
                None,
            )
            .await
            .expect_err("missing");

        assert_eq!(
            error,
            WorkflowError::NotFound { entity: "absence request", id: "missing".to_owned() }
        );
    }

    #[tokio::test]
    async fn boundary_check_rejects_wrong_approver() {
        let h = harness(vec![policy("dept-it", &[ApprovalLevel::DepartmentManager])]);
        let request =
            h.engine.create_absence_request(filing("u-emp", "2024-01-10", "2024-01-11")).await.expect("create");

        assert!(ensure_current_approver(&request, &uid("u-mgr")).is_ok());
        assert!(matches!(
            ensure_current_approver(&request, &uid("u-hr-1")),
            Err(WorkflowError::NotCurrentApprover { .. })
        ));
    }

    #[tokio::test]
    async fn requester_can_cancel_pending_request() {
        let h = harness(vec![policy("dept-it", &[ApprovalLevel::DepartmentManager])]);
        let request =
            h.engine.create_absence_request(filing("u-emp", "2024-01-10", "2024-01-11")).await.expect("create");

        let denied = h.engine.cancel_absence_request(&request.id, &uid("u-mgr")).await;
        assert!(matches!(denied, Err(WorkflowError::NotRequester { .. })));

        let cancelled =
            h.engine.cancel_absence_request(&request.id, &uid("u-emp")).await.expect("cancel");
        assert_eq!(cancelled.status, AbsenceStatus::Cancelled);
        assert_eq!(cancelled.current_approver_id, None);
        assert!(cancelled.approver_state_is_consistent());
        assert!(h.store.history_for(&request.id).await.expect("history").is_empty());

        let error = h
            .engine
            .process_approval(&request.id, &uid("u-mgr"), ApprovalDecision::Approved, None)
            .await
            .expect_err("cancelled is terminal");
        assert!(matches!(error, WorkflowError::NotPending { status: AbsenceStatus::Cancelled, .. }));
    }

    fn stale_pending(id: &str, policy: &ApprovalWorkflow, level: ApprovalLevel, age: Duration) -> AbsenceRequest {
        let created_at = Utc::now() - age;
        AbsenceRequest {
            id: AbsenceRequestId(id.to_owned()),
            requester_id: uid("u-emp"),
            absence_type_id: AbsenceTypeId("annual".to_owned()),
            workflow_id: policy.id.clone(),
            start_date: date("2024-05-01"),
            end_date: date("2024-05-02"),
            start_time: None,
            end_time: None,
            total_days: Decimal::from(2),
            reason: "trip".to_owned(),
            attachment: None,
            current_approver_id: Some(uid("u-mgr")),
            approval_level: Some(level),
            status: AbsenceStatus::Pending,
            approved_by: None,
            approved_at: None,
            rejection_reason: None,
            reminder_count: 2,
            version: 0,
            created_at,
            updated_at: created_at,
        }
    }

    #[tokio::test]
    async fn sweep_reminds_only_truly_overdue_requests() {
        let mut configured = policy("dept-it", &[ApprovalLevel::DepartmentManager, ApprovalLevel::Hr]);
        configured.department_manager.timeout_hours = 1;
        let h = harness(vec![configured.clone()]);

        h.store.put_request(stale_pending("overdue", &configured, ApprovalLevel::DepartmentManager, Duration::hours(30)));
        h.store.put_request(stale_pending("within-hr-timeout", &configured, ApprovalLevel::Hr, Duration::hours(30)));
        h.store.put_request(stale_pending("too-young", &configured, ApprovalLevel::DepartmentManager, Duration::hours(2)));
        let mut closed = stale_pending("closed", &configured, ApprovalLevel::DepartmentManager, Duration::hours(48));
        closed.status = AbsenceStatus::Approved;
        closed.current_approver_id = None;
        closed.approval_level = None;
        h.store.put_request(closed);

        let report = h.engine.check_overdue_requests(Utc::now()).await.expect("sweep");

        assert_eq!(report.scanned, 2);
        assert_eq!(report.reminded, 1);
        assert_eq!(report.skipped, 1);

        let events = h.notifier.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, NotificationKind::Reminder);
        assert_eq!(events[0].request_id.0, "overdue");
        assert_eq!(events[0].reminder_count, Some(2));

        let stored = h
            .store
            .find_request(&AbsenceRequestId("overdue".to_owned()))
            .await
            .expect("find")
            .expect("exists");
        assert_eq!(stored.reminder_count, 2, "sweep does not bump the counter");
    }

    #[tokio::test]
    async fn sweep_keeps_reminding_past_max_reminders() {
        let mut configured = policy("dept-it", &[ApprovalLevel::DepartmentManager]);
        configured.max_reminders = 1;
        let h = harness(vec![configured.clone()]);
        h.store.put_request(stale_pending("nagged", &configured, ApprovalLevel::DepartmentManager, Duration::hours(50)));

        let now = Utc::now();
        h.engine.check_overdue_requests(now).await.expect("first sweep");
        h.engine.check_overdue_requests(now).await.expect("second sweep");

        assert_eq!(h.notifier.kinds(), vec![NotificationKind::Reminder, NotificationKind::Reminder]);
    }

    /// Serves every read one version behind, so the next commit always loses.
    struct LaggingStore {
        inner: Arc<InMemoryWorkflowStore>,
    }

    #[async_trait]
    impl PolicyStore for LaggingStore {
        async fn find_policy(
            &self,
            department_id: &DepartmentId,
            absence_type_id: &AbsenceTypeId,
        ) -> Result<Option<ApprovalWorkflow>, StoreError> {
            self.inner.find_policy(department_id, absence_type_id).await
        }

        async fn find_policy_by_id(
            &self,
            id: &WorkflowId,
        ) -> Result<Option<ApprovalWorkflow>, StoreError> {
            self.inner.find_policy_by_id(id).await
        }

        async fn save_policy(&self, policy: ApprovalWorkflow) -> Result<(), StoreError> {
            self.inner.save_policy(policy).await
        }
    }

    #[async_trait]
    impl AbsenceRequestStore for LaggingStore {
        async fn find_request(
            &self,
            id: &AbsenceRequestId,
        ) -> Result<Option<AbsenceRequest>, StoreError> {
            Ok(self.inner.find_request(id).await?.map(|mut request| {
                request.version -= 1;
                request
            }))
        }

        async fn insert_request(&self, request: AbsenceRequest) -> Result<(), StoreError> {
            self.inner.insert_request(request).await
        }

        async fn history_for(
            &self,
            id: &AbsenceRequestId,
        ) -> Result<Vec<ApprovalHistory>, StoreError> {
            self.inner.history_for(id).await
        }

        async fn commit_transition(
            &self,
            request: &AbsenceRequest,
            expected_version: i64,
            history: Option<&ApprovalHistory>,
        ) -> Result<bool, StoreError> {
            self.inner.commit_transition(request, expected_version, history).await
        }

        async fn list_pending_created_before(
            &self,
            cutoff: DateTime<Utc>,
        ) -> Result<Vec<AbsenceRequest>, StoreError> {
            self.inner.list_pending_created_before(cutoff).await
        }
    }

    #[tokio::test]
    async fn lost_race_reports_conflict_and_writes_nothing() {
        let inner = Arc::new(
            InMemoryWorkflowStore::default()
                .with_policy(policy("dept-it", &[ApprovalLevel::DepartmentManager])),
        );
        let notifier = Arc::new(InMemoryNotifier::default());
        let engine = WorkflowEngine::new(
            Arc::new(directory()),
            Arc::clone(&inner),
            Arc::new(LaggingStore { inner: Arc::clone(&inner) }),
            Arc::clone(&notifier),
        );

        let request =
            engine.create_absence_request(filing("u-emp", "2024-01-10", "2024-01-11")).await.expect("create");
        let error = engine
            .process_approval(&request.id, &uid("u-mgr"), ApprovalDecision::Approved, None)
            .await
            .expect_err("stale version");

        assert_eq!(error, WorkflowError::Conflict(request.id.0.clone()));
        assert!(inner.all_history().is_empty());
        let stored = inner.find_request(&request.id).await.expect("find").expect("exists");
        assert_eq!(stored.status, AbsenceStatus::Pending);
        assert_eq!(notifier.kinds(), vec![NotificationKind::ApprovalRequired]);
    }
}
