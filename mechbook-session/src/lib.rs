pub mod controller;
pub mod error;
pub mod guard;
pub mod otp;
pub mod scheduler;
pub mod tracking;

pub use controller::{BookingSession, SessionConfig, SessionView};
pub use error::{SessionError, SessionResult};
pub use guard::{FlightPermit, SingleFlight};
pub use otp::OtpAction;
pub use scheduler::{RepeatingTask, SkipReason, TickOutcome};
pub use tracking::LocationPermission;
