use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::Row;

use hrflow_core::domain::absence::{
    AbsenceRequest, AbsenceRequestId, AbsenceStatus, AbsenceTypeId, ApprovalHistory,
    HistoryAction, HistoryId,
};
use hrflow_core::domain::org::UserId;
use hrflow_core::domain::policy::{ApprovalLevel, WorkflowId};
use hrflow_core::workflow::ports::{AbsenceCalendar, AbsenceRequestStore, StoreError};

use super::{
    decode_error, format_date, format_time, format_timestamp, parse_date, parse_decimal,
    parse_optional_time, parse_optional_timestamp, parse_timestamp, RepositoryError,
};
use crate::DbPool;

const REQUEST_COLUMNS: &str = "id, requester_id, absence_type_id, workflow_id,
    start_date, end_date, start_time, end_time, total_days, reason, attachment,
    current_approver_id, approval_level, status, approved_by, approved_at, rejection_reason,
    reminder_count, version, created_at, updated_at";

pub struct SqlAbsenceRequestRepository {
    pool: DbPool,
}

impl SqlAbsenceRequestRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_id(&self, id: &AbsenceRequestId) -> Result<Option<AbsenceRequest>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {REQUEST_COLUMNS} FROM absence_request WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_request).transpose()
    }

    pub async fn insert(&self, request: &AbsenceRequest) -> Result<(), RepositoryError> {
        sqlx::query(&format!(
            "INSERT INTO absence_request ({REQUEST_COLUMNS})
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(&request.id.0)
        .bind(&request.requester_id.0)
        .bind(&request.absence_type_id.0)
        .bind(&request.workflow_id.0)
        .bind(format_date(request.start_date))
        .bind(format_date(request.end_date))
        .bind(request.start_time.map(format_time))
        .bind(request.end_time.map(format_time))
        .bind(request.total_days.to_string())
        .bind(&request.reason)
        .bind(request.attachment.as_deref())
        .bind(request.current_approver_id.as_ref().map(|id| id.0.as_str()))
        .bind(request.approval_level.map(ApprovalLevel::as_str))
        .bind(request.status.as_str())
        .bind(request.approved_by.as_ref().map(|id| id.0.as_str()))
        .bind(request.approved_at.map(format_timestamp))
        .bind(request.rejection_reason.as_deref())
        .bind(i64::from(request.reminder_count))
        .bind(request.version)
        .bind(format_timestamp(request.created_at))
        .bind(format_timestamp(request.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn history(&self, id: &AbsenceRequestId) -> Result<Vec<ApprovalHistory>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, request_id, approver_id, level, action, comment, created_at
             FROM approval_history
             WHERE request_id = ?
             ORDER BY created_at ASC, rowid ASC",
        )
        .bind(&id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_history).collect()
    }

    pub async fn list_for_requester(&self, requester_id: &UserId) -> Result<Vec<AbsenceRequest>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {REQUEST_COLUMNS} FROM absence_request
             WHERE requester_id = ?
             ORDER BY created_at DESC"
        ))
        .bind(&requester_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_request).collect()
    }

    /// The approver's inbox, oldest first.
    pub async fn list_awaiting(&self, approver_id: &UserId) -> Result<Vec<AbsenceRequest>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {REQUEST_COLUMNS} FROM absence_request
             WHERE status = 'pending' AND current_approver_id = ?
             ORDER BY created_at ASC"
        ))
        .bind(&approver_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_request).collect()
    }

    pub async fn pending_created_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<AbsenceRequest>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {REQUEST_COLUMNS} FROM absence_request
             WHERE status = 'pending' AND created_at < ?
             ORDER BY created_at ASC"
        ))
        .bind(format_timestamp(cutoff))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_request).collect()
    }

    pub async fn has_overlapping_approved(
        &self,
        user_id: &UserId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<bool, RepositoryError> {
        let exists: i64 = sqlx::query_scalar(
            "SELECT EXISTS(
                 SELECT 1 FROM absence_request
                 WHERE requester_id = ?1 AND status = 'approved'
                   AND start_date <= ?2 AND end_date >= ?3
             )",
        )
        .bind(&user_id.0)
        .bind(format_date(end))
        .bind(format_date(start))
        .fetch_one(&self.pool)
        .await?;

        Ok(exists == 1)
    }

    /// Versioned update plus optional history append in one transaction.
    pub async fn commit(
        &self,
        request: &AbsenceRequest,
        expected_version: i64,
        history: Option<&ApprovalHistory>,
    ) -> Result<bool, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE absence_request SET
                 current_approver_id = ?,
                 approval_level = ?,
                 status = ?,
                 approved_by = ?,
                 approved_at = ?,
                 rejection_reason = ?,
                 reminder_count = ?,
                 version = ?,
                 updated_at = ?
             WHERE id = ? AND version = ?",
        )
        .bind(request.current_approver_id.as_ref().map(|id| id.0.as_str()))
        .bind(request.approval_level.map(ApprovalLevel::as_str))
        .bind(request.status.as_str())
        .bind(request.approved_by.as_ref().map(|id| id.0.as_str()))
        .bind(request.approved_at.map(format_timestamp))
        .bind(request.rejection_reason.as_deref())
        .bind(i64::from(request.reminder_count))
        .bind(request.version)
        .bind(format_timestamp(request.updated_at))
        .bind(&request.id.0)
        .bind(expected_version)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        if let Some(row) = history {
            sqlx::query(
                "INSERT INTO approval_history (id, request_id, approver_id, level, action, comment, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&row.id.0)
            .bind(&row.request_id.0)
            .bind(&row.approver_id.0)
            .bind(row.level.as_str())
            .bind(row.action.as_str())
            .bind(row.comment.as_deref())
            .bind(format_timestamp(row.created_at))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(true)
    }
}

#[async_trait]
impl AbsenceRequestStore for SqlAbsenceRequestRepository {
    async fn find_request(&self, id: &AbsenceRequestId) -> Result<Option<AbsenceRequest>, StoreError> {
        Ok(self.find_by_id(id).await?)
    }

    async fn insert_request(&self, request: AbsenceRequest) -> Result<(), StoreError> {
        Ok(self.insert(&request).await?)
    }

    async fn history_for(&self, id: &AbsenceRequestId) -> Result<Vec<ApprovalHistory>, StoreError> {
        Ok(self.history(id).await?)
    }

    async fn commit_transition(
        &self,
        request: &AbsenceRequest,
        expected_version: i64,
        history: Option<&ApprovalHistory>,
    ) -> Result<bool, StoreError> {
        Ok(self.commit(request, expected_version, history).await?)
    }

    async fn list_pending_created_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<AbsenceRequest>, StoreError> {
        Ok(self.pending_created_before(cutoff).await?)
    }
}

#[async_trait]
impl AbsenceCalendar for SqlAbsenceRequestRepository {
    async fn has_approved_absence(
        &self,
        user_id: &UserId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<bool, StoreError> {
        Ok(self.has_overlapping_approved(user_id, start, end).await?)
    }
}

fn row_to_request(row: &sqlx::sqlite::SqliteRow) -> Result<AbsenceRequest, RepositoryError> {
    let id: String = row.try_get("id").map_err(decode_error)?;
    let requester_id: String = row.try_get("requester_id").map_err(decode_error)?;
    let absence_type_id: String = row.try_get("absence_type_id").map_err(decode_error)?;
    let workflow_id: String = row.try_get("workflow_id").map_err(decode_error)?;
    let start_date: String = row.try_get("start_date").map_err(decode_error)?;
    let end_date: String = row.try_get("end_date").map_err(decode_error)?;
    let start_time: Option<String> = row.try_get("start_time").map_err(decode_error)?;
    let end_time: Option<String> = row.try_get("end_time").map_err(decode_error)?;
    let total_days: String = row.try_get("total_days").map_err(decode_error)?;
    let reason: String = row.try_get("reason").map_err(decode_error)?;
    let attachment: Option<String> = row.try_get("attachment").map_err(decode_error)?;
    let current_approver_id: Option<String> =
        row.try_get("current_approver_id").map_err(decode_error)?;
    let approval_level: Option<String> = row.try_get("approval_level").map_err(decode_error)?;
    let status: String = row.try_get("status").map_err(decode_error)?;
    let approved_by: Option<String> = row.try_get("approved_by").map_err(decode_error)?;
    let approved_at: Option<String> = row.try_get("approved_at").map_err(decode_error)?;
    let rejection_reason: Option<String> = row.try_get("rejection_reason").map_err(decode_error)?;
    let reminder_count: i64 = row.try_get("reminder_count").map_err(decode_error)?;
    let version: i64 = row.try_get("version").map_err(decode_error)?;
    let created_at: String = row.try_get("created_at").map_err(decode_error)?;
    let updated_at: String = row.try_get("updated_at").map_err(decode_error)?;

    let approval_level = approval_level
        .map(|raw| {
            ApprovalLevel::parse(&raw)
                .ok_or_else(|| RepositoryError::Decode(format!("unknown approval level `{raw}`")))
        })
        .transpose()?;
    let status = AbsenceStatus::parse(&status)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown absence status `{status}`")))?;
    let reminder_count = u32::try_from(reminder_count)
        .map_err(|_| RepositoryError::Decode(format!("invalid reminder count {reminder_count}")))?;

    Ok(AbsenceRequest {
        id: AbsenceRequestId(id),
        requester_id: UserId(requester_id),
        absence_type_id: AbsenceTypeId(absence_type_id),
        workflow_id: WorkflowId(workflow_id),
        start_date: parse_date(&start_date)?,
        end_date: parse_date(&end_date)?,
        start_time: parse_optional_time(start_time)?,
        end_time: parse_optional_time(end_time)?,
        total_days: parse_decimal(&total_days)?,
        reason,
        attachment,
        current_approver_id: current_approver_id.map(UserId),
        approval_level,
        status,
        approved_by: approved_by.map(UserId),
        approved_at: parse_optional_timestamp(approved_at)?,
        rejection_reason,
        reminder_count,
        version,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

fn row_to_history(row: &sqlx::sqlite::SqliteRow) -> Result<ApprovalHistory, RepositoryError> {
    let id: String = row.try_get("id").map_err(decode_error)?;
    let request_id: String = row.try_get("request_id").map_err(decode_error)?;
    let approver_id: String = row.try_get("approver_id").map_err(decode_error)?;
    let level: String = row.try_get("level").map_err(decode_error)?;
    let action: String = row.try_get("action").map_err(decode_error)?;
    let comment: Option<String> = row.try_get("comment").map_err(decode_error)?;
    let created_at: String = row.try_get("created_at").map_err(decode_error)?;

    Ok(ApprovalHistory {
        id: HistoryId(id),
        request_id: AbsenceRequestId(request_id),
        approver_id: UserId(approver_id),
        level: ApprovalLevel::parse(&level)
            .ok_or_else(|| RepositoryError::Decode(format!("unknown approval level `{level}`")))?,
        action: HistoryAction::parse(&action)
            .ok_or_else(|| RepositoryError::Decode(format!("unknown history action `{action}`")))?,
        comment,
        created_at: parse_timestamp(&created_at)?,
    })
}
