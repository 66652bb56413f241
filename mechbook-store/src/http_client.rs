use async_trait::async_trait;
use mechbook_core::{BookingPage, BookingService, Identity, Role, ServiceError, ServiceResult};
use mechbook_shared::{Booking, Coordinates, Decision, LocationSample, ReviewRequest};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::app_config::ApiConfig;

/// Remote booking service over HTTP/JSON, authenticated with the session's bearer token
pub struct HttpBookingService {
    client: reqwest::Client,
    base_url: String,
    token: String,
    page_size: u32,
}

#[derive(Debug, Serialize)]
struct RespondBody {
    status: Decision,
}

#[derive(Debug, Serialize)]
struct OtpBody<'a> {
    otp: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LocationBody<'a> {
    latitude: f64,
    longitude: f64,
    booking_id: &'a str,
}

// Some endpoints wrap their payload, some don't.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum BookingEnvelope {
    Wrapped { booking: Booking },
    Bare(Booking),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PageEnvelope {
    Paged(BookingPage),
    Bare(Vec<Booking>),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LocationsEnvelope {
    Wrapped { locations: Vec<LocationSample> },
    Bare(Vec<LocationSample>),
}

impl HttpBookingService {
    pub fn new(api: &ApiConfig, identity: &Identity) -> ServiceResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(api.request_timeout_secs))
            .build()
            .map_err(|e| ServiceError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url: api.base_url.trim_end_matches('/').to_string(),
            token: identity.token().to_string(),
            page_size: api.page_size,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn send(&self, request: RequestBuilder) -> ServiceResult<Response> {
        let response = request
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| ServiceError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        debug!(%status, "Booking service rejected request");
        Err(error_for_status(status, &body))
    }

    async fn fetch<T: DeserializeOwned>(&self, request: RequestBuilder) -> ServiceResult<T> {
        self.send(request)
            .await?
            .json::<T>()
            .await
            .map_err(|e| ServiceError::Decode(e.to_string()))
    }

    async fn fetch_booking(&self, request: RequestBuilder) -> ServiceResult<Booking> {
        Ok(match self.fetch::<BookingEnvelope>(request).await? {
            BookingEnvelope::Wrapped { booking } => booking,
            BookingEnvelope::Bare(booking) => booking,
        })
    }
}

/// Map a non-2xx reply onto the service error taxonomy
fn error_for_status(status: StatusCode, body: &str) -> ServiceError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ServiceError::Unauthorized,
        StatusCode::NOT_FOUND => {
            ServiceError::NotFound(server_message(body).unwrap_or_else(|| "resource".to_string()))
        }
        _ => ServiceError::Rejected(server_message(body).unwrap_or_else(|| status.to_string())),
    }
}

/// The `error` or `message` field of a JSON error body
fn server_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value
        .get("error")
        .or_else(|| value.get("message"))?
        .as_str()
        .map(str::to_string)
}

#[async_trait]
impl BookingService for HttpBookingService {
    async fn list_bookings(&self, role: Role, page: u32) -> ServiceResult<BookingPage> {
        let path = match role {
            Role::Owner => "bookings/owner",
            Role::Mechanic => "bookings/mechanic",
        };
        let request = self
            .client
            .get(self.url(path))
            .query(&[("page", page), ("limit", self.page_size)]);

        Ok(match self.fetch::<PageEnvelope>(request).await? {
            PageEnvelope::Paged(page) => page,
            PageEnvelope::Bare(bookings) => BookingPage {
                bookings,
                page,
                total_pages: page,
            },
        })
    }

    async fn respond(&self, booking_id: &str, decision: Decision) -> ServiceResult<()> {
        let request = self
            .client
            .patch(self.url(&format!("bookings/{}/respond", booking_id)))
            .json(&RespondBody { status: decision });
        self.send(request).await?;
        Ok(())
    }

    async fn verify_meet_otp(&self, booking_id: &str, code: &str) -> ServiceResult<Booking> {
        let request = self
            .client
            .post(self.url(&format!("bookings/{}/verify-meet-otp", booking_id)))
            .json(&OtpBody { otp: code });
        self.fetch_booking(request).await
    }

    async fn generate_complete_otp(&self, booking_id: &str) -> ServiceResult<Booking> {
        let request = self
            .client
            .post(self.url(&format!("bookings/{}/generate-complete-otp", booking_id)));
        self.fetch_booking(request).await
    }

    async fn verify_complete_otp(&self, booking_id: &str, code: &str) -> ServiceResult<Booking> {
        let request = self
            .client
            .post(self.url(&format!("bookings/{}/verify-complete-otp", booking_id)))
            .json(&OtpBody { otp: code });
        self.fetch_booking(request).await
    }

    async fn push_location(&self, booking_id: &str, position: Coordinates) -> ServiceResult<()> {
        let request = self.client.post(self.url("locations")).json(&LocationBody {
            latitude: position.latitude,
            longitude: position.longitude,
            booking_id,
        });
        self.send(request).await?;
        Ok(())
    }

    async fn list_locations(&self, booking_id: &str) -> ServiceResult<Vec<LocationSample>> {
        let request = self.client.get(self.url(&format!("locations/{}", booking_id)));
        Ok(match self.fetch::<LocationsEnvelope>(request).await? {
            LocationsEnvelope::Wrapped { locations } => locations,
            LocationsEnvelope::Bare(locations) => locations,
        })
    }

    async fn submit_review(&self, review: &ReviewRequest) -> ServiceResult<()> {
        let request = self.client.post(self.url("reviews")).json(review);
        self.send(request).await?;
        Ok(())
    }
}
