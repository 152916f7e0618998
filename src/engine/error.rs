use ulid::Ulid;

use crate::model::{BookingAction, BookingStatus};

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// The requested interval collides with an active booking.
    /// Recoverable — the caller should re-query availability.
    SlotUnavailable(Ulid),
    InvalidTransition {
        from: BookingStatus,
        action: BookingAction,
    },
    Unauthorized(&'static str),
    Validation(&'static str),
    HasActiveBookings(Ulid),
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::SlotUnavailable(id) => {
                write!(f, "slot unavailable: conflicts with booking {id}")
            }
            EngineError::InvalidTransition { from, action } => {
                write!(f, "invalid transition: cannot {action} a {from} booking")
            }
            EngineError::Unauthorized(msg) => write!(f, "unauthorized: {msg}"),
            EngineError::Validation(msg) => write!(f, "validation failed: {msg}"),
            EngineError::HasActiveBookings(id) => {
                write!(f, "cannot delete provider {id}: has active bookings")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
