use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::absence::{AbsenceRequest, AbsenceRequestId};
use crate::domain::now_micros;
use crate::domain::org::UserId;
use crate::workflow::ports::ApprovalNotifier;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    ApprovalRequired,
    Reminder,
    Completed,
    Rejected,
}

impl NotificationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ApprovalRequired => "approval_required",
            Self::Reminder => "reminder",
            Self::Completed => "completed",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "approval_required" => Some(Self::ApprovalRequired),
            "reminder" => Some(Self::Reminder),
            "completed" => Some(Self::Completed),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

/// One dispatched notification. Completion and rejection go to the requester.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub kind: NotificationKind,
    pub request_id: AbsenceRequestId,
    pub recipient_id: UserId,
    pub reminder_count: Option<u32>,
    pub message: String,
    pub occurred_at: DateTime<Utc>,
}

impl NotificationEvent {
    pub fn approval_required(request: &AbsenceRequest, approver_id: &UserId) -> Self {
        let level = request.approval_level.map(|level| level.as_str()).unwrap_or("unknown");
        Self::new(
            NotificationKind::ApprovalRequired,
            request,
            approver_id.clone(),
            None,
            format!(
                "absence request {} ({} days from {}) awaits your approval as {level}",
                request.id.0, request.total_days, request.start_date
            ),
        )
    }

    pub fn reminder(request: &AbsenceRequest, approver_id: &UserId, reminder_count: u32) -> Self {
        Self::new(
            NotificationKind::Reminder,
            request,
            approver_id.clone(),
            Some(reminder_count),
            format!("absence request {} is overdue for your decision", request.id.0),
        )
    }

    pub fn completed(request: &AbsenceRequest) -> Self {
        Self::new(
            NotificationKind::Completed,
            request,
            request.requester_id.clone(),
            None,
            format!("absence request {} was approved", request.id.0),
        )
    }

    pub fn rejected(request: &AbsenceRequest) -> Self {
        let reason = request.rejection_reason.as_deref().unwrap_or_default();
        Self::new(
            NotificationKind::Rejected,
            request,
            request.requester_id.clone(),
            None,
            format!("absence request {} was rejected: {reason}", request.id.0),
        )
    }

    fn new(
        kind: NotificationKind,
        request: &AbsenceRequest,
        recipient_id: UserId,
        reminder_count: Option<u32>,
        message: String,
    ) -> Self {
        Self {
            kind,
            request_id: request.id.clone(),
            recipient_id,
            reminder_count,
            message,
            occurred_at: now_micros(),
        }
    }
}

#[derive(Clone, Default)]
pub struct InMemoryNotifier {
    events: Arc<Mutex<Vec<NotificationEvent>>>,
}

impl InMemoryNotifier {
    pub fn events(&self) -> Vec<NotificationEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn kinds(&self) -> Vec<NotificationKind> {
        self.events().into_iter().map(|event| event.kind).collect()
    }

    fn push(&self, event: NotificationEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}

#[async_trait]
impl ApprovalNotifier for InMemoryNotifier {
    async fn approval_required(&self, request: &AbsenceRequest, approver_id: &UserId) {
        self.push(NotificationEvent::approval_required(request, approver_id));
    }

    async fn reminder(&self, request: &AbsenceRequest, approver_id: &UserId, reminder_count: u32) {
        self.push(NotificationEvent::reminder(request, approver_id, reminder_count));
    }

    async fn completed(&self, request: &AbsenceRequest) {
        self.push(NotificationEvent::completed(request));
    }

    async fn rejected(&self, request: &AbsenceRequest) {
        self.push(NotificationEvent::rejected(request));
    }
}
