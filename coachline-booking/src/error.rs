use coachline_core::CoreError;
use uuid::Uuid;

use crate::policy::PolicyError;
use crate::store::StoreError;

/// Every failure an engine operation reports to its caller.
///
/// None of these are retried internally: each one has money or inventory
/// consequences the caller has to decide about.
#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition {
        from: String,
        to: String,
    },

    #[error("Seats unavailable: {0:?}")]
    SeatUnavailable(Vec<Uuid>),

    #[error("Insufficient capacity: requested {requested}, available {available}")]
    InsufficientCapacity {
        requested: usize,
        available: usize,
    },

    #[error("No applicable cancellation policy for booking {0}")]
    PolicyNotFound(Uuid),

    #[error("Booking {0} changed since the preview was taken")]
    StaleState(Uuid),

    #[error("Booking {0} has already expired")]
    AlreadyExpired(Uuid),

    #[error("Booking {0} is already confirmed")]
    AlreadyConfirmed(Uuid),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Not authorized: {0}")]
    Unauthorized(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Invalid cancellation policy: {0}")]
    InvalidPolicy(#[from] PolicyError),

    #[error("Storage failure: {0}")]
    Store(String),
}

impl BookingError {
    pub fn transition(from: impl std::fmt::Debug, to: &str) -> Self {
        BookingError::InvalidTransition {
            from: format!("{:?}", from),
            to: to.to_string(),
        }
    }
}

impl From<StoreError> for BookingError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::SeatUnavailable(seats) => BookingError::SeatUnavailable(seats),
            StoreError::VersionConflict(booking_id) => BookingError::StaleState(booking_id),
            StoreError::NotFound(what) => BookingError::NotFound(what),
            StoreError::Backend(msg) => BookingError::Store(msg),
        }
    }
}

impl From<CoreError> for BookingError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ValidationError(msg) => BookingError::Validation(msg),
            other => BookingError::Store(other.to_string()),
        }
    }
}

pub type BookingResult<T> = Result<T, BookingError>;
