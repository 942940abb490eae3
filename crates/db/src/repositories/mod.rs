use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use hrflow_core::workflow::ports::StoreError;

pub mod absence;
pub mod absence_type;
pub mod attendance;
pub mod notification;
pub mod org;
pub mod policy;
pub mod store;

pub use absence::SqlAbsenceRequestRepository;
pub use absence_type::SqlAbsenceTypeRepository;
pub use attendance::SqlAttendanceRepository;
pub use notification::{SqlNotificationSink, StoredNotification};
pub use org::SqlOrganizationDirectory;
pub use policy::SqlPolicyRepository;
pub use store::{sql_workflow_engine, SqlWorkflowEngine, SqlWorkflowStore};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

impl From<RepositoryError> for StoreError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::Database(error) => Self::Backend(error.to_string()),
            RepositoryError::Decode(message) => Self::Decode(message),
        }
    }
}

pub(crate) fn decode_error(error: impl ToString) -> RepositoryError {
    RepositoryError::Decode(error.to_string())
}

/// Fixed-width UTC text so stored timestamps sort lexically.
pub(crate) fn format_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|value| value.with_timezone(&Utc))
        .map_err(|error| RepositoryError::Decode(format!("timestamp `{raw}`: {error}")))
}

pub(crate) fn parse_optional_timestamp(
    raw: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    raw.as_deref().map(parse_timestamp).transpose()
}

pub(crate) fn format_date(value: NaiveDate) -> String {
    value.format("%Y-%m-%d").to_string()
}

pub(crate) fn parse_date(raw: &str) -> Result<NaiveDate, RepositoryError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|error| RepositoryError::Decode(format!("date `{raw}`: {error}")))
}

pub(crate) fn format_time(value: NaiveTime) -> String {
    value.format("%H:%M:%S").to_string()
}

pub(crate) fn parse_optional_time(raw: Option<String>) -> Result<Option<NaiveTime>, RepositoryError> {
    raw.map(|value| {
        NaiveTime::parse_from_str(&value, "%H:%M:%S")
            .map_err(|error| RepositoryError::Decode(format!("time `{value}`: {error}")))
    })
    .transpose()
}

pub(crate) fn parse_decimal(raw: &str) -> Result<Decimal, RepositoryError> {
    Decimal::from_str(raw)
        .map_err(|error| RepositoryError::Decode(format!("decimal `{raw}`: {error}")))
}
