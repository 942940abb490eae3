pub mod attendance;
pub mod config;
pub mod domain;
pub mod errors;
pub mod workflow;

pub use attendance::{
    evaluate_check_in, haversine_distance_m, AttendanceError, AttendanceRecord,
    AttendanceRecordId, CheckInDecision, GeoPoint, WorkLocation, WorkLocationId,
};
pub use domain::absence::{
    AbsenceRequest, AbsenceRequestId, AbsenceStatus, AbsenceType, AbsenceTypeId, ApprovalHistory,
    HistoryAction, HistoryId,
};
pub use domain::org::{Department, DepartmentId, Office, OfficeId, User, UserId, UserRole};
pub use domain::policy::{ApprovalLevel, ApprovalTier, ApprovalWorkflow, LevelPolicy, WorkflowId};
pub use errors::DomainError;
pub use workflow::{
    ApprovalDecision, ApprovalOutcome, NewAbsenceRequest, NextApprover, SweepReport,
    WorkflowEngine, WorkflowError,
};
