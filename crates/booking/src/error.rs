use thiserror::Error;

/// Failures of the booking pipeline.
///
/// Redelivered payment events and events that match no reservation are not
/// errors; they are acknowledged outcomes of reconciliation
/// (see [`crate::Reconciled`]).
#[derive(Debug, Error)]
pub enum BookingError {
    #[error("{0}")]
    Validation(String),

    #[error("match {0} not found")]
    MatchNotFound(i64),

    #[error("reservation {0} not found")]
    ReservationNotFound(i64),

    #[error("class {class} is sold out for match {match_id}")]
    CapacityExceeded { match_id: i64, class: String },

    #[error("signature verification failed: {0}")]
    SignatureVerification(String),

    #[error("external service failed: {0}")]
    ExternalService(String),

    #[error("store error: {0}")]
    Store(#[from] anyhow::Error),
}

impl From<sqlx::Error> for BookingError {
    fn from(e: sqlx::Error) -> Self {
        BookingError::Store(e.into())
    }
}

pub type Result<T, E = BookingError> = std::result::Result<T, E>;
