use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::domain::absence::{
    AbsenceRequest, AbsenceRequestId, AbsenceStatus, AbsenceTypeId, ApprovalHistory,
};
use crate::domain::org::{Department, DepartmentId, Office, OfficeId, User, UserId};
use crate::domain::policy::{ApprovalWorkflow, WorkflowId};
use crate::workflow::ports::{
    AbsenceCalendar, AbsenceRequestStore, OrganizationDirectory, PolicyStore, StoreError,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[derive(Default)]
pub struct InMemoryDirectory {
    users: Mutex<HashMap<String, User>>,
    departments: Mutex<HashMap<String, Department>>,
    offices: Mutex<HashMap<String, Office>>,
}

impl InMemoryDirectory {
    pub fn with_user(self, user: User) -> Self {
        self.put_user(user);
        self
    }

    pub fn with_department(self, department: Department) -> Self {
        lock(&self.departments).insert(department.id.0.clone(), department);
        self
    }

    pub fn with_office(self, office: Office) -> Self {
        lock(&self.offices).insert(office.id.0.clone(), office);
        self
    }

    pub fn put_user(&self, user: User) {
        lock(&self.users).insert(user.id.0.clone(), user);
    }
}

#[async_trait]
impl OrganizationDirectory for InMemoryDirectory {
    async fn find_user(&self, id: &UserId) -> Result<Option<User>, StoreError> {
        Ok(lock(&self.users).get(&id.0).cloned())
    }

    async fn find_department(&self, id: &DepartmentId) -> Result<Option<Department>, StoreError> {
        Ok(lock(&self.departments).get(&id.0).cloned())
    }

    async fn find_office(&self, id: &OfficeId) -> Result<Option<Office>, StoreError> {
        Ok(lock(&self.offices).get(&id.0).cloned())
    }

    async fn active_hr_users(&self) -> Result<Vec<User>, StoreError> {
        let mut users: Vec<User> =
            lock(&self.users).values().filter(|user| user.is_active_hr()).cloned().collect();
        users.sort_by(|left, right| left.id.cmp(&right.id));
        Ok(users)
    }
}

/// Policies, requests and history behind one set of locks; also answers
/// calendar queries from the approved requests it holds.
#[derive(Default)]
pub struct InMemoryWorkflowStore {
    policies: Mutex<HashMap<String, ApprovalWorkflow>>,
    requests: Mutex<HashMap<String, AbsenceRequest>>,
    history: Mutex<Vec<ApprovalHistory>>,
}

impl InMemoryWorkflowStore {
    pub fn with_policy(self, policy: ApprovalWorkflow) -> Self {
        lock(&self.policies).insert(policy.id.0.clone(), policy);
        self
    }

    /// Stores a request as-is, bypassing version checks.
    pub fn put_request(&self, request: AbsenceRequest) {
        lock(&self.requests).insert(request.id.0.clone(), request);
    }

    pub fn policies(&self) -> Vec<ApprovalWorkflow> {
        lock(&self.policies).values().cloned().collect()
    }

    pub fn all_history(&self) -> Vec<ApprovalHistory> {
        lock(&self.history).clone()
    }
}

#[async_trait]
impl PolicyStore for InMemoryWorkflowStore {
    async fn find_policy(
        &self,
        department_id: &DepartmentId,
        absence_type_id: &AbsenceTypeId,
    ) -> Result<Option<ApprovalWorkflow>, StoreError> {
        Ok(lock(&self.policies)
            .values()
            .find(|policy| {
                policy.department_id == *department_id && policy.absence_type_id == *absence_type_id
            })
            .cloned())
    }

    async fn find_policy_by_id(
        &self,
        id: &WorkflowId,
    ) -> Result<Option<ApprovalWorkflow>, StoreError> {
        Ok(lock(&self.policies).get(&id.0).cloned())
    }

    async fn save_policy(&self, policy: ApprovalWorkflow) -> Result<(), StoreError> {
        let mut policies = lock(&self.policies);
        let duplicate = policies.values().any(|existing| {
            existing.id != policy.id
                && existing.department_id == policy.department_id
                && existing.absence_type_id == policy.absence_type_id
        });
        if duplicate {
            return Err(StoreError::Backend(format!(
                "policy for department `{}` and absence type `{}` already exists",
                policy.department_id.0, policy.absence_type_id.0
            )));
        }
        policies.insert(policy.id.0.clone(), policy);
        Ok(())
    }
}

#[async_trait]
impl AbsenceRequestStore for InMemoryWorkflowStore {
    async fn find_request(
        &self,
        id: &AbsenceRequestId,
    ) -> Result<Option<AbsenceRequest>, StoreError> {
        Ok(lock(&self.requests).get(&id.0).cloned())
    }

    async fn insert_request(&self, request: AbsenceRequest) -> Result<(), StoreError> {
        let mut requests = lock(&self.requests);
        if requests.contains_key(&request.id.0) {
            return Err(StoreError::Backend(format!("request `{}` already exists", request.id.0)));
        }
        requests.insert(request.id.0.clone(), request);
        Ok(())
    }

    async fn history_for(&self, id: &AbsenceRequestId) -> Result<Vec<ApprovalHistory>, StoreError> {
        let mut rows: Vec<ApprovalHistory> =
            lock(&self.history).iter().filter(|row| row.request_id == *id).cloned().collect();
        rows.sort_by(|left, right| left.created_at.cmp(&right.created_at));
        Ok(rows)
    }

    async fn commit_transition(
        &self,
        request: &AbsenceRequest,
        expected_version: i64,
        history: Option<&ApprovalHistory>,
    ) -> Result<bool, StoreError> {
        let mut requests = lock(&self.requests);
        let Some(stored) = requests.get_mut(&request.id.0) else {
            return Ok(false);
        };
        if stored.version != expected_version {
            return Ok(false);
        }

        *stored = request.clone();
        if let Some(row) = history {
            lock(&self.history).push(row.clone());
        }
        Ok(true)
    }

    async fn list_pending_created_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<AbsenceRequest>, StoreError> {
        let mut pending: Vec<AbsenceRequest> = lock(&self.requests)
            .values()
            .filter(|request| request.is_pending() && request.created_at < cutoff)
            .cloned()
            .collect();
        pending.sort_by(|left, right| left.created_at.cmp(&right.created_at));
        Ok(pending)
    }
}

#[async_trait]
impl AbsenceCalendar for InMemoryWorkflowStore {
    async fn has_approved_absence(
        &self,
        user_id: &UserId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<bool, StoreError> {
        Ok(lock(&self.requests).values().any(|request| {
            request.requester_id == *user_id
                && request.status == AbsenceStatus::Approved
                && request.overlaps(start, end)
        }))
    }
}
