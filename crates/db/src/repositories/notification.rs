use async_trait::async_trait;
use sqlx::Row;
use tracing::{info, warn};
use uuid::Uuid;

use hrflow_core::domain::absence::{AbsenceRequest, AbsenceRequestId};
use hrflow_core::domain::org::UserId;
use hrflow_core::workflow::notify::{NotificationEvent, NotificationKind};
use hrflow_core::workflow::ports::ApprovalNotifier;

use super::{decode_error, format_timestamp, parse_timestamp, RepositoryError};
use crate::DbPool;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredNotification {
    pub id: String,
    pub event: NotificationEvent,
}

/// Persists notifications to the `notification` outbox table.
pub struct SqlNotificationSink {
    pool: DbPool,
}

impl SqlNotificationSink {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn record(&self, event: &NotificationEvent) -> Result<String, RepositoryError> {
        let id = Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO notification (id, kind, request_id, recipient_id, reminder_count, message, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(event.kind.as_str())
        .bind(&event.request_id.0)
        .bind(&event.recipient_id.0)
        .bind(event.reminder_count.map(i64::from))
        .bind(&event.message)
        .bind(format_timestamp(event.occurred_at))
        .execute(&self.pool)
        .await?;

        Ok(id)
    }

    pub async fn list_for_recipient(
        &self,
        recipient_id: &UserId,
    ) -> Result<Vec<StoredNotification>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, kind, request_id, recipient_id, reminder_count, message, created_at
             FROM notification
             WHERE recipient_id = ?
             ORDER BY created_at ASC, rowid ASC",
        )
        .bind(&recipient_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_notification).collect()
    }

    pub async fn list_for_request(
        &self,
        request_id: &AbsenceRequestId,
    ) -> Result<Vec<StoredNotification>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, kind, request_id, recipient_id, reminder_count, message, created_at
             FROM notification
             WHERE request_id = ?
             ORDER BY created_at ASC, rowid ASC",
        )
        .bind(&request_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_notification).collect()
    }

    async fn dispatch(&self, event: NotificationEvent) {
        match self.record(&event).await {
            Ok(id) => info!(
                event_name = "notification.stored",
                notification_id = %id,
                kind = event.kind.as_str(),
                request_id = %event.request_id.0,
                recipient_id = %event.recipient_id.0,
                "notification stored"
            ),
            Err(error) => warn!(
                event_name = "notification.store_failed",
                kind = event.kind.as_str(),
                request_id = %event.request_id.0,
                recipient_id = %event.recipient_id.0,
                error = %error,
                "notification could not be stored"
            ),
        }
    }
}

#[async_trait]
impl ApprovalNotifier for SqlNotificationSink {
    async fn approval_required(&self, request: &AbsenceRequest, approver_id: &UserId) {
        self.dispatch(NotificationEvent::approval_required(request, approver_id)).await;
    }

    async fn reminder(&self, request: &AbsenceRequest, approver_id: &UserId, reminder_count: u32) {
        self.dispatch(NotificationEvent::reminder(request, approver_id, reminder_count)).await;
    }

    async fn completed(&self, request: &AbsenceRequest) {
        self.dispatch(NotificationEvent::completed(request)).await;
    }

    async fn rejected(&self, request: &AbsenceRequest) {
        self.dispatch(NotificationEvent::rejected(request)).await;
    }
}

fn row_to_notification(row: &sqlx::sqlite::SqliteRow) -> Result<StoredNotification, RepositoryError> {
    let id: String = row.try_get("id").map_err(decode_error)?;
    let kind: String = row.try_get("kind").map_err(decode_error)?;
    let request_id: String = row.try_get("request_id").map_err(decode_error)?;
    let recipient_id: String = row.try_get("recipient_id").map_err(decode_error)?;
    let reminder_count: Option<i64> = row.try_get("reminder_count").map_err(decode_error)?;
    let message: String = row.try_get("message").map_err(decode_error)?;
    let created_at: String = row.try_get("created_at").map_err(decode_error)?;

    let kind = NotificationKind::parse(&kind)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown notification kind `{kind}`")))?;
    let reminder_count = reminder_count
        .map(|count| {
            u32::try_from(count)
                .map_err(|_| RepositoryError::Decode(format!("invalid reminder count {count}")))
        })
        .transpose()?;

    Ok(StoredNotification {
        id,
        event: NotificationEvent {
            kind,
            request_id: AbsenceRequestId(request_id),
            recipient_id: UserId(recipient_id),
            reminder_count,
            message,
            occurred_at: parse_timestamp(&created_at)?,
        },
    })
}
