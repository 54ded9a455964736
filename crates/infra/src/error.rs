//! Error taxonomy surfaced to callers of the lifecycle, ledger and query APIs.

use thiserror::Error;

use depot_core::DomainError;

use crate::store::StoreError;

/// Stable classification for mapping onto transport status codes.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Caller's fault (4xx-equivalent).
    Validation,
    NotFound,
    Conflict,
    /// Transaction or connectivity failure; always surfaced.
    Storage,
}

#[derive(Debug, Error)]
pub enum DepotError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("storage failure: {0}")]
    Storage(StoreError),
}

impl DepotError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DepotError::Validation(_) => ErrorKind::Validation,
            DepotError::NotFound(_) => ErrorKind::NotFound,
            DepotError::Conflict(_) => ErrorKind::Conflict,
            DepotError::Storage(_) => ErrorKind::Storage,
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        DepotError::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        DepotError::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        DepotError::Conflict(msg.into())
    }
}

impl From<DomainError> for DepotError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) => DepotError::Validation(msg),
            DomainError::InvalidId(msg) => DepotError::Validation(msg),
            DomainError::NotFound(msg) => DepotError::NotFound(msg),
            DomainError::Conflict(msg) => DepotError::Conflict(msg),
            DomainError::InvariantViolation(msg) => DepotError::Conflict(msg),
        }
    }
}

impl From<StoreError> for DepotError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Conflict(msg) => DepotError::Conflict(msg),
            StoreError::NotFound(msg) => DepotError::NotFound(msg),
            other => DepotError::Storage(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_errors_map_onto_taxonomy() {
        assert_eq!(DepotError::from(DomainError::validation("x")).kind(), ErrorKind::Validation);
        assert_eq!(DepotError::from(DomainError::invalid_id("x")).kind(), ErrorKind::Validation);
        assert_eq!(DepotError::from(DomainError::not_found("x")).kind(), ErrorKind::NotFound);
        assert_eq!(DepotError::from(DomainError::invariant("x")).kind(), ErrorKind::Conflict);
        assert_eq!(DepotError::from(DomainError::conflict("x")).kind(), ErrorKind::Conflict);
    }

    #[test]
    fn store_errors_keep_conflicts_visible() {
        assert_eq!(
            DepotError::from(StoreError::Conflict("dup".into())).kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            DepotError::from(StoreError::Unavailable("down".into())).kind(),
            ErrorKind::Storage
        );
    }
}
