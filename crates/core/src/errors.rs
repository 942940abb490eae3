use thiserror::Error;

use crate::domain::absence::AbsenceStatus;

/// Rule violations raised by the domain model itself, independent of storage.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum DomainError {
    #[error("invalid absence request transition from {from:?} to {to:?}")]
    InvalidStatusTransition { from: AbsenceStatus, to: AbsenceStatus },
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}
