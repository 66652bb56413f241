pub mod models;
pub mod pii;

pub use models::booking::{Booking, BookingStatus, Decision};
pub use models::events::SessionEvent;
pub use models::location::{Coordinates, LocationSample};
pub use models::review::ReviewRequest;
pub use pii::Masked;
