use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::org::UserId;
use crate::domain::policy::{ApprovalLevel, ApprovalWorkflow, WorkflowId};

/// Longest same-day span, in hours, still counted as half a day.
pub const HALF_DAY_MAX_HOURS: i64 = 4;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AbsenceTypeId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbsenceType {
    pub id: AbsenceTypeId,
    pub name: String,
    pub code: String,
    pub requires_approval: bool,
    pub max_days_per_year: Option<u32>,
    pub active: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AbsenceRequestId(pub String);

impl AbsenceRequestId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HistoryId(pub String);

impl HistoryId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbsenceStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
}

impl AbsenceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Only pending requests move; pending -> pending is an advance to the next approver.
    pub fn can_transition_to(self, next: AbsenceStatus) -> bool {
        match (self, next) {
            (Self::Pending, _) => true,
            (Self::Approved | Self::Rejected | Self::Cancelled, _) => false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryAction {
    Approved,
    Rejected,
    Forwarded,
}

impl HistoryAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Forwarded => "forwarded",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "forwarded" => Some(Self::Forwarded),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalHistory {
    pub id: HistoryId,
    pub request_id: AbsenceRequestId,
    pub approver_id: UserId,
    pub level: ApprovalLevel,
    pub action: HistoryAction,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbsenceRequest {
    pub id: AbsenceRequestId,
    pub requester_id: UserId,
    pub absence_type_id: AbsenceTypeId,
    pub workflow_id: WorkflowId,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub total_days: Decimal,
    pub reason: String,
    pub attachment: Option<String>,
    pub current_approver_id: Option<UserId>,
    pub approval_level: Option<ApprovalLevel>,
    pub status: AbsenceStatus,
    /// Whoever closed the request, approving or rejecting.
    pub approved_by: Option<UserId>,
    pub approved_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub reminder_count: u32,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AbsenceRequest {
    pub fn is_pending(&self) -> bool {
        self.status == AbsenceStatus::Pending
    }

    pub fn is_current_approver(&self, user_id: &UserId) -> bool {
        self.is_pending() && self.current_approver_id.as_ref() == Some(user_id)
    }

    /// Inclusive on both ends.
    pub fn overlaps(&self, start: NaiveDate, end: NaiveDate) -> bool {
        self.start_date <= end && start <= self.end_date
    }

    pub fn deadline(&self, policy: &ApprovalWorkflow) -> Option<DateTime<Utc>> {
        self.approval_level.map(|level| self.created_at + policy.timeout_for(level))
    }

    /// The timeout runs from creation, not from when the current level was reached.
    pub fn is_overdue(&self, policy: &ApprovalWorkflow, now: DateTime<Utc>) -> bool {
        if !self.is_pending() {
            return false;
        }
        self.deadline(policy).map(|deadline| now > deadline).unwrap_or(false)
    }

    pub fn approver_state_is_consistent(&self) -> bool {
        let has_approver = self.current_approver_id.is_some();
        has_approver == self.is_pending() && has_approver == self.approval_level.is_some()
    }
}

/// Whole days in the range, or a flat half/full day when both times are given.
/// The time-bounded branch never scales with the number of days.
pub fn compute_total_days(
    start_date: NaiveDate,
    end_date: NaiveDate,
    start_time: Option<NaiveTime>,
    end_time: Option<NaiveTime>,
) -> Decimal {
    match (start_time, end_time) {
        (Some(start_time), Some(end_time)) => {
            let span = end_date.and_time(end_time) - start_date.and_time(start_time);
            if span <= Duration::hours(HALF_DAY_MAX_HOURS) {
                Decimal::new(5, 1)
            } else {
                Decimal::ONE
            }
        }
        _ => Decimal::from((end_date - start_date).num_days() + 1),
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, NaiveDate, NaiveTime, Utc};
    use rust_decimal::Decimal;

    use super::{
        compute_total_days, AbsenceRequest, AbsenceRequestId, AbsenceStatus, AbsenceTypeId,
    };
    use crate::domain::org::{DepartmentId, UserId};
    use crate::domain::policy::{ApprovalLevel, ApprovalWorkflow, WorkflowId};

    fn date(raw: &str) -> NaiveDate {
        NaiveDate::parse_from_str(raw, "%Y-%m-%d").expect("valid date")
    }

    fn time(raw: &str) -> NaiveTime {
        NaiveTime::parse_from_str(raw, "%H:%M").expect("valid time")
    }

    fn pending_request() -> AbsenceRequest {
        let now = Utc::now();
        AbsenceRequest {
            id: AbsenceRequestId("abs-1".to_owned()),
            requester_id: UserId("u-emp".to_owned()),
            absence_type_id: AbsenceTypeId("annual".to_owned()),
            workflow_id: WorkflowId("wf-1".to_owned()),
            start_date: date("2024-01-10"),
            end_date: date("2024-01-12"),
            start_time: None,
            end_time: None,
            total_days: Decimal::from(3),
            reason: "family trip".to_owned(),
            attachment: None,
            current_approver_id: Some(UserId("u-mgr".to_owned())),
            approval_level: Some(ApprovalLevel::DepartmentManager),
            status: AbsenceStatus::Pending,
            approved_by: None,
            approved_at: None,
            rejection_reason: None,
            reminder_count: 0,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn whole_day_count_is_inclusive() {
        assert_eq!(compute_total_days(date("2024-01-10"), date("2024-01-10"), None, None), Decimal::ONE);
        assert_eq!(
            compute_total_days(date("2024-01-10"), date("2024-01-11"), None, None),
            Decimal::from(2)
        );
    }

    #[test]
    fn short_same_day_span_counts_as_half_day() {
        let days = compute_total_days(
            date("2024-01-10"),
            date("2024-01-10"),
            Some(time("09:00")),
            Some(time("12:00")),
        );
        assert_eq!(days, Decimal::new(5, 1));

        let boundary = compute_total_days(
            date("2024-01-10"),
            date("2024-01-10"),
            Some(time("08:00")),
            Some(time("12:00")),
        );
        assert_eq!(boundary, Decimal::new(5, 1));
    }

    #[test]
    fn long_same_day_span_is_a_flat_full_day() {
        let days = compute_total_days(
            date("2024-01-10"),
            date("2024-01-10"),
            Some(time("08:00")),
            Some(time("17:00")),
        );
        assert_eq!(days, Decimal::ONE);
    }

    #[test]
    fn time_bounded_multi_day_range_is_still_one_day() {
        let days = compute_total_days(
            date("2024-01-10"),
            date("2024-01-12"),
            Some(time("09:00")),
            Some(time("10:00")),
        );
        assert_eq!(days, Decimal::ONE);
    }

    #[test]
    fn a_single_time_falls_back_to_whole_days() {
        let days = compute_total_days(date("2024-01-10"), date("2024-01-11"), Some(time("09:00")), None);
        assert_eq!(days, Decimal::from(2));
    }

    #[test]
    fn overlap_is_inclusive_at_both_ends() {
        let request = pending_request();
        assert!(request.overlaps(date("2024-01-12"), date("2024-01-20")));
        assert!(request.overlaps(date("2024-01-01"), date("2024-01-10")));
        assert!(!request.overlaps(date("2024-01-13"), date("2024-01-20")));
        assert!(!request.overlaps(date("2024-01-01"), date("2024-01-09")));
    }

    #[test]
    fn only_pending_requests_can_transition() {
        assert!(AbsenceStatus::Pending.can_transition_to(AbsenceStatus::Approved));
        assert!(AbsenceStatus::Pending.can_transition_to(AbsenceStatus::Pending));
        for terminal in [AbsenceStatus::Approved, AbsenceStatus::Rejected, AbsenceStatus::Cancelled] {
            assert!(terminal.is_terminal());
            assert!(!terminal.can_transition_to(AbsenceStatus::Pending));
            assert!(!terminal.can_transition_to(AbsenceStatus::Cancelled));
        }
    }

    #[test]
    fn overdue_uses_the_current_level_timeout_from_creation() {
        let mut policy = ApprovalWorkflow::permissive_default(
            DepartmentId("dept-it".to_owned()),
            AbsenceTypeId("annual".to_owned()),
        );
        policy.department_manager.timeout_hours = 24;

        let mut request = pending_request();
        request.created_at = Utc::now() - Duration::hours(30);
        assert!(request.is_overdue(&policy, Utc::now()));

        request.created_at = Utc::now() - Duration::hours(10);
        assert!(!request.is_overdue(&policy, Utc::now()));

        request.approval_level = Some(ApprovalLevel::Hr);
        request.created_at = Utc::now() - Duration::hours(30);
        assert!(!request.is_overdue(&policy, Utc::now()), "hr timeout is 72h");
    }

    #[test]
    fn closed_requests_are_never_overdue() {
        let policy = ApprovalWorkflow::permissive_default(
            DepartmentId("dept-it".to_owned()),
            AbsenceTypeId("annual".to_owned()),
        );
        let mut request = pending_request();
        request.created_at = Utc::now() - Duration::days(10);
        request.status = AbsenceStatus::Approved;

        assert!(!request.is_overdue(&policy, Utc::now()));
    }

    #[test]
    fn approver_consistency_tracks_pending_state() {
        let mut request = pending_request();
        assert!(request.approver_state_is_consistent());
        assert!(request.is_current_approver(&UserId("u-mgr".to_owned())));

        request.status = AbsenceStatus::Approved;
        assert!(!request.approver_state_is_consistent());
        assert!(!request.is_current_approver(&UserId("u-mgr".to_owned())));

        request.current_approver_id = None;
        request.approval_level = None;
        assert!(request.approver_state_is_consistent());
    }
}
