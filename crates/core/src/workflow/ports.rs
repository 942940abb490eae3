use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;

use crate::domain::absence::{AbsenceRequest, AbsenceRequestId, AbsenceTypeId, ApprovalHistory};
use crate::domain::org::{Department, DepartmentId, Office, OfficeId, User, UserId};
use crate::domain::policy::{ApprovalWorkflow, WorkflowId};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("storage backend failure: {0}")]
    Backend(String),
    #[error("stored record could not be decoded: {0}")]
    Decode(String),
}

/// Who manages whom: departments, offices and the HR pool.
#[async_trait]
pub trait OrganizationDirectory: Send + Sync {
    async fn find_user(&self, id: &UserId) -> Result<Option<User>, StoreError>;
    async fn find_department(&self, id: &DepartmentId) -> Result<Option<Department>, StoreError>;
    async fn find_office(&self, id: &OfficeId) -> Result<Option<Office>, StoreError>;
    async fn active_hr_users(&self) -> Result<Vec<User>, StoreError>;
}

#[async_trait]
pub trait AbsenceCalendar: Send + Sync {
    /// True when `user_id` has an approved absence overlapping `[start, end]` inclusively.
    async fn has_approved_absence(
        &self,
        user_id: &UserId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait PolicyStore: Send + Sync {
    async fn find_policy(
        &self,
        department_id: &DepartmentId,
        absence_type_id: &AbsenceTypeId,
    ) -> Result<Option<ApprovalWorkflow>, StoreError>;
    async fn find_policy_by_id(&self, id: &WorkflowId)
        -> Result<Option<ApprovalWorkflow>, StoreError>;
    async fn save_policy(&self, policy: ApprovalWorkflow) -> Result<(), StoreError>;
}

#[async_trait]
pub trait AbsenceRequestStore: Send + Sync {
    async fn find_request(
        &self,
        id: &AbsenceRequestId,
    ) -> Result<Option<AbsenceRequest>, StoreError>;

    async fn insert_request(&self, request: AbsenceRequest) -> Result<(), StoreError>;

    /// Oldest first.
    async fn history_for(&self, id: &AbsenceRequestId) -> Result<Vec<ApprovalHistory>, StoreError>;

    /// Atomically appends `history` (if any) and overwrites the stored request, but only
    /// while the stored version still equals `expected_version`. Returns `false` and
    /// writes nothing when another writer got there first.
    async fn commit_transition(
        &self,
        request: &AbsenceRequest,
        expected_version: i64,
        history: Option<&ApprovalHistory>,
    ) -> Result<bool, StoreError>;

    async fn list_pending_created_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<AbsenceRequest>, StoreError>;
}

pub trait WorkflowStore: PolicyStore + AbsenceRequestStore {}

impl<T> WorkflowStore for T where T: PolicyStore + AbsenceRequestStore {}

/// Fire-and-forget delivery. Implementations swallow and log their own failures.
#[async_trait]
pub trait ApprovalNotifier: Send + Sync {
    async fn approval_required(&self, request: &AbsenceRequest, approver_id: &UserId);
    async fn reminder(&self, request: &AbsenceRequest, approver_id: &UserId, reminder_count: u32);
    async fn completed(&self, request: &AbsenceRequest);
    async fn rejected(&self, request: &AbsenceRequest);
}
