use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};

/// A latitude/longitude pair, the only thing map rendering needs from the core
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }
}

/// One reported position of a participant during an active booking
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LocationSample {
    pub user_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub booking_id: String,
    pub timestamp: DateTime<Utc>,
}

impl LocationSample {
    pub fn coordinates(&self) -> Coordinates {
        Coordinates::new(self.latitude, self.longitude)
    }

    /// Latest sample reported by `user_id`, if any
    pub fn latest_for<'a>(samples: &'a [LocationSample], user_id: &str) -> Option<&'a LocationSample> {
        samples
            .iter()
            .filter(|s| s.user_id == user_id)
            .max_by_key(|s| s.timestamp)
    }
}
