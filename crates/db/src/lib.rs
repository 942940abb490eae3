pub mod connection;
pub mod fixtures;
pub mod migrations;
pub mod repositories;

pub use connection::{connect, connect_with_settings, DbPool};
pub use fixtures::{HrSeedDataset, PolicySeedInfo, SeedResult, VerificationResult};
pub use repositories::{
    sql_workflow_engine, RepositoryError, SqlAbsenceRequestRepository, SqlAbsenceTypeRepository,
    SqlAttendanceRepository, SqlNotificationSink, SqlOrganizationDirectory, SqlPolicyRepository,
    SqlWorkflowEngine, SqlWorkflowStore, StoredNotification,
};
