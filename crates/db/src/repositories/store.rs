use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use hrflow_core::domain::absence::{AbsenceRequest, AbsenceRequestId, AbsenceTypeId, ApprovalHistory};
use hrflow_core::domain::org::{DepartmentId, UserId};
use hrflow_core::domain::policy::{ApprovalWorkflow, WorkflowId};
use hrflow_core::workflow::ports::{AbsenceCalendar, AbsenceRequestStore, PolicyStore, StoreError};
use hrflow_core::workflow::WorkflowEngine;

use super::{
    SqlAbsenceRequestRepository, SqlNotificationSink, SqlOrganizationDirectory, SqlPolicyRepository,
};
use crate::DbPool;

pub type SqlWorkflowEngine =
    WorkflowEngine<SqlOrganizationDirectory, SqlWorkflowStore, SqlWorkflowStore, SqlNotificationSink>;

/// The workflow engine wired to SQL ports that all share `pool`.
pub fn sql_workflow_engine(pool: &DbPool) -> SqlWorkflowEngine {
    let store = Arc::new(SqlWorkflowStore::new(pool.clone()));
    WorkflowEngine::new(
        Arc::new(SqlOrganizationDirectory::new(pool.clone())),
        Arc::clone(&store),
        store,
        Arc::new(SqlNotificationSink::new(pool.clone())),
    )
}

/// Policies and requests behind one pool, the shape the workflow engine expects.
pub struct SqlWorkflowStore {
    policies: SqlPolicyRepository,
    requests: SqlAbsenceRequestRepository,
}

impl SqlWorkflowStore {
    pub fn new(pool: DbPool) -> Self {
        Self {
            policies: SqlPolicyRepository::new(pool.clone()),
            requests: SqlAbsenceRequestRepository::new(pool),
        }
    }

    pub fn policies(&self) -> &SqlPolicyRepository {
        &self.policies
    }

    pub fn requests(&self) -> &SqlAbsenceRequestRepository {
        &self.requests
    }
}

#[async_trait]
impl PolicyStore for SqlWorkflowStore {
    async fn find_policy(
        &self,
        department_id: &DepartmentId,
        absence_type_id: &AbsenceTypeId,
    ) -> Result<Option<ApprovalWorkflow>, StoreError> {
        self.policies.find_policy(department_id, absence_type_id).await
    }

    async fn find_policy_by_id(&self, id: &WorkflowId) -> Result<Option<ApprovalWorkflow>, StoreError> {
        self.policies.find_policy_by_id(id).await
    }

    async fn save_policy(&self, policy: ApprovalWorkflow) -> Result<(), StoreError> {
        self.policies.save_policy(policy).await
    }
}

#[async_trait]
impl AbsenceRequestStore for SqlWorkflowStore {
    async fn find_request(&self, id: &AbsenceRequestId) -> Result<Option<AbsenceRequest>, StoreError> {
        self.requests.find_request(id).await
    }

    async fn insert_request(&self, request: AbsenceRequest) -> Result<(), StoreError> {
        self.requests.insert_request(request).await
    }

    async fn history_for(&self, id: &AbsenceRequestId) -> Result<Vec<ApprovalHistory>, StoreError> {
        self.requests.history_for(id).await
    }

    async fn commit_transition(
        &self,
        request: &AbsenceRequest,
        expected_version: i64,
        history: Option<&ApprovalHistory>,
    ) -> Result<bool, StoreError> {
        self.requests.commit_transition(request, expected_version, history).await
    }

    async fn list_pending_created_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<AbsenceRequest>, StoreError> {
        self.requests.list_pending_created_before(cutoff).await
    }
}

#[async_trait]
impl AbsenceCalendar for SqlWorkflowStore {
    async fn has_approved_absence(
        &self,
        user_id: &UserId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<bool, StoreError> {
        self.requests.has_approved_absence(user_id, start, end).await
    }
}
