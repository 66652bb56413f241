use mechbook_core::{Role, ServiceError};
use mechbook_shared::Decision;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error("This action is only available to the {0}")]
    WrongRole(Role),

    #[error("Action not available: {0}")]
    NotEligible(String),

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Booking {booking_id} already has a {decision} response in flight")]
    ActionInFlight {
        booking_id: String,
        decision: Decision,
    },

    #[error("Booking {0} is not loaded in this session")]
    UnknownBooking(String),

    #[error("Booking session is closed")]
    Closed,
}

impl SessionError {
    /// Whether the error should replace the visible error message.
    /// A rejected duplicate tap is not worth telling the user about.
    pub fn is_user_visible(&self) -> bool {
        !matches!(self, SessionError::ActionInFlight { .. } | SessionError::Closed)
    }
}

pub type SessionResult<T> = Result<T, SessionError>;
