use crate::model::ReservationStatus;
use crate::time::TimeError;

use super::Rejection;

#[derive(Debug)]
pub enum EngineError {
    /// (kind, id), e.g. ("space", "lab_1").
    NotFound(&'static str, String),
    AlreadyExists(&'static str, String),
    /// The availability rules refused the request.
    Unavailable(Rejection),
    InvalidTime(TimeError),
    Invalid(String),
    InvalidTransition {
        from: ReservationStatus,
        action: &'static str,
    },
    Forbidden(&'static str),
    BadCredentials,
    PendingApproval,
    HasReservations(String),
    Inactive(String),
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(kind, id) => write!(f, "{kind} not found: {id}"),
            EngineError::AlreadyExists(kind, id) => write!(f, "{kind} already exists: {id}"),
            EngineError::Unavailable(rejection) => write!(f, "{rejection}"),
            EngineError::InvalidTime(e) => write!(f, "{e}"),
            EngineError::Invalid(msg) => write!(f, "invalid request: {msg}"),
            EngineError::InvalidTransition { from, action } => {
                write!(f, "cannot {action} a reservation that is {}", from.as_str())
            }
            EngineError::Forbidden(what) => write!(f, "permission denied: {what}"),
            EngineError::BadCredentials => write!(f, "invalid email or password"),
            EngineError::PendingApproval => write!(f, "account pending administrator approval"),
            EngineError::HasReservations(id) => {
                write!(f, "cannot delete space {id}: it still has active reservations")
            }
            EngineError::Inactive(id) => write!(f, "space {id} is out of service"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<TimeError> for EngineError {
    fn from(e: TimeError) -> Self {
        EngineError::InvalidTime(e)
    }
}
