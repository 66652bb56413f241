use crate::models::booking::BookingStatus;

/// Signals a booking session emits to the presentation layer
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionEvent {
    SnapshotUpdated {
        booking_id: String,
        status: BookingStatus,
    },
    BookingMissing {
        booking_id: String,
    },
    /// Notification badges should be re-fetched
    BadgeRefresh,
    FeedbackRequested {
        booking_id: String,
    },
    TrackingStarted {
        booking_id: String,
    },
    TrackingStopped {
        booking_id: String,
    },
    PermissionDenied,
}
