pub mod identity;
pub mod location;
pub mod mock;
pub mod repository;

pub use identity::{Identity, Role};
pub use location::{FixedLocationProvider, LocationError, LocationProvider, PermissionStatus};
pub use repository::{BookingPage, BookingService, ServiceError, ServiceResult};

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Identity verification failed: {0}")]
    IdentityError(String),
}

pub type CoreResult<T> = Result<T, CoreError>;
