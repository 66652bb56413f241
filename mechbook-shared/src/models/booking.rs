use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Utc};
use std::fmt;

use crate::pii::Masked;

/// Booking status as reported by the remote booking service
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    Pending,
    Accepted,
    Declined,
    InProgress,
    Completed,
    /// Any status string this client does not know about
    #[serde(other)]
    Unknown,
}

impl BookingStatus {
    /// Live location sharing runs only in these states
    pub fn is_trackable(&self) -> bool {
        matches!(self, BookingStatus::Accepted | BookingStatus::InProgress)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "PENDING",
            BookingStatus::Accepted => "ACCEPTED",
            BookingStatus::Declined => "DECLINED",
            BookingStatus::InProgress => "IN_PROGRESS",
            BookingStatus::Completed => "COMPLETED",
            BookingStatus::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A mechanic's answer to a pending booking
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Accepted,
    Declined,
}

impl Decision {
    /// Status the booking moves to once the server applies this decision
    pub fn resulting_status(&self) -> BookingStatus {
        match self {
            Decision::Accepted => BookingStatus::Accepted,
            Decision::Declined => BookingStatus::Declined,
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.resulting_status().as_str())
    }
}

/// A single service request linking one owner and one mechanic.
///
/// The remote booking service owns this record; clients hold a cached copy
/// that is replaced wholesale on every fetch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    #[serde(alias = "_id")]
    pub id: String,
    pub status: BookingStatus,
    pub owner_id: String,
    pub mechanic_id: String,
    #[serde(default)]
    pub vehicle_make: String,
    #[serde(default)]
    pub vehicle_model: String,
    #[serde(default)]
    pub issue_description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meet_otp: Option<Masked<String>>,
    #[serde(default)]
    pub meet_verified: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complete_otp: Option<Masked<String>>,
    #[serde(default)]
    pub complete_verified: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Booking {
    pub fn new(
        owner_id: String,
        mechanic_id: String,
        vehicle_make: String,
        vehicle_model: String,
        issue_description: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            status: BookingStatus::Pending,
            owner_id,
            mechanic_id,
            vehicle_make,
            vehicle_model,
            issue_description,
            meet_otp: None,
            meet_verified: false,
            complete_otp: None,
            complete_verified: false,
            created_at: Some(Utc::now()),
        }
    }

    /// Checks the OTP ordering rules: nothing about completion may exist before the meet step
    pub fn otp_order_holds(&self) -> bool {
        self.meet_verified || (self.complete_otp.is_none() && !self.complete_verified)
    }
}
