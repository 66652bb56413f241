use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use mechbook_shared::Coordinates;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PermissionStatus {
    Granted,
    Denied,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LocationError {
    #[error("Location permission denied")]
    PermissionDenied,
    #[error("Location unavailable: {0}")]
    Unavailable(String),
    #[error("Timed out waiting for a location fix")]
    TimedOut,
}

/// Device positioning, supplied by the platform
#[async_trait]
pub trait LocationProvider: Send + Sync {
    async fn request_permission(&self) -> PermissionStatus;

    /// A live fix. May take arbitrarily long; callers apply their own timeout.
    async fn current_position(&self) -> Result<Coordinates, LocationError>;

    async fn last_known_position(&self) -> Result<Option<Coordinates>, LocationError>;
}

/// Provider for hosts without positioning hardware: reports a configured point, or nothing
pub struct FixedLocationProvider {
    position: Option<Coordinates>,
}

impl FixedLocationProvider {
    pub fn new(position: Option<Coordinates>) -> Self {
        Self { position }
    }
}

#[async_trait]
impl LocationProvider for FixedLocationProvider {
    async fn request_permission(&self) -> PermissionStatus {
        if self.position.is_some() {
            PermissionStatus::Granted
        } else {
            PermissionStatus::Denied
        }
    }

    async fn current_position(&self) -> Result<Coordinates, LocationError> {
        self.position
            .ok_or_else(|| LocationError::Unavailable("no fixed position configured".to_string()))
    }

    async fn last_known_position(&self) -> Result<Option<Coordinates>, LocationError> {
        Ok(self.position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fixed_provider_without_position() {
        let provider = FixedLocationProvider::new(None);
        assert_eq!(provider.request_permission().await, PermissionStatus::Denied);
        assert!(provider.current_position().await.is_err());
        assert_eq!(provider.last_known_position().await, Ok(None));
    }

    #[tokio::test]
    async fn test_fixed_provider_with_position() {
        let here = Coordinates::new(6.52, 3.37);
        let provider = FixedLocationProvider::new(Some(here));
        assert_eq!(provider.request_permission().await, PermissionStatus::Granted);
        assert_eq!(provider.current_position().await, Ok(here));
    }
}
