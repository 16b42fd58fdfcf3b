use thiserror::Error;

/// Failures reported by a persistence backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Duplicate record: {0}")]
    Duplicate(String),
}

/// Outcome kinds of the reservation engine operations.
///
/// Only `TransientStoreFailure` and `Conflict` are worth retrying by the
/// caller; every other kind is final for the request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulingError {
    #[error("Invalid party: {0}")]
    InvalidParty(String),

    #[error("Slot unavailable: {0}")]
    SlotUnavailable(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Transient store failure: {0}")]
    TransientStoreFailure(String),

    #[error("Conflict: {0}")]
    Conflict(String),
}

impl SchedulingError {
    pub fn is_transient(&self) -> bool {
        matches!(self, SchedulingError::TransientStoreFailure(_))
    }
}

impl From<StoreError> for SchedulingError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(reason) => SchedulingError::TransientStoreFailure(reason),
            StoreError::Duplicate(reason) => SchedulingError::Conflict(reason),
        }
    }
}
