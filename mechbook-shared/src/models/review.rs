use serde::{Deserialize, Serialize};

/// Feedback left by the owner once a booking is completed
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReviewRequest {
    pub booking_id: String,
    pub mechanic_id: String,
    pub rating: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}
