use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use mechbook_shared::{Booking, Coordinates, Decision, LocationSample, ReviewRequest};

use crate::identity::Role;

/// Normalized failures from the remote booking service
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ServiceError {
    #[error("Network error: {0}")]
    Transport(String),
    #[error("Session expired or not authorized")]
    Unauthorized,
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("{0}")]
    Rejected(String),
    #[error("Unexpected response: {0}")]
    Decode(String),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

fn first_page() -> u32 {
    1
}

/// One page of the role's booking list
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingPage {
    pub bookings: Vec<Booking>,
    #[serde(default = "first_page")]
    pub page: u32,
    #[serde(default = "first_page")]
    pub total_pages: u32,
}

impl BookingPage {
    pub fn is_last(&self) -> bool {
        self.bookings.is_empty() || self.page >= self.total_pages
    }
}

/// The authoritative store of bookings, OTP state and reported locations.
///
/// Every call is an independent round trip; implementations hold no
/// per-booking state on the client side.
#[async_trait]
pub trait BookingService: Send + Sync {
    /// Fetch one page (1-based) of the bookings visible to `role`
    async fn list_bookings(&self, role: Role, page: u32) -> ServiceResult<BookingPage>;

    /// Mechanic accepts or declines a pending booking
    async fn respond(&self, booking_id: &str, decision: Decision) -> ServiceResult<()>;

    async fn verify_meet_otp(&self, booking_id: &str, code: &str) -> ServiceResult<Booking>;

    /// Owner asks the server to issue the completion code
    async fn generate_complete_otp(&self, booking_id: &str) -> ServiceResult<Booking>;

    async fn verify_complete_otp(&self, booking_id: &str, code: &str) -> ServiceResult<Booking>;

    async fn push_location(&self, booking_id: &str, position: Coordinates) -> ServiceResult<()>;

    /// All samples reported for the booking, by either participant
    async fn list_locations(&self, booking_id: &str) -> ServiceResult<Vec<LocationSample>>;

    async fn submit_review(&self, review: &ReviewRequest) -> ServiceResult<()>;
}
