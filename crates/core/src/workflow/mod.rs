pub mod engine;
pub mod memory;
pub mod notify;
pub mod ports;

pub use engine::{
    ensure_current_approver, ApprovalDecision, ApprovalOutcome, NewAbsenceRequest, NextApprover,
    SweepReport, WorkflowEngine, WorkflowError, OVERDUE_SWEEP_MIN_AGE_HOURS,
};
pub use memory::{InMemoryDirectory, InMemoryWorkflowStore};
pub use notify::{InMemoryNotifier, NotificationEvent, NotificationKind};
pub use ports::{
    AbsenceCalendar, AbsenceRequestStore, ApprovalNotifier, OrganizationDirectory, PolicyStore,
    StoreError, WorkflowStore,
};
