use mechbook_core::{LocationError, PermissionStatus};
use mechbook_shared::{Coordinates, LocationSample, SessionEvent};
use serde::Serialize;
use std::ops::ControlFlow;
use std::sync::Arc;
use tokio::time;
use tracing::{debug, info, warn};

use crate::controller::{BookingSession, SessionShared};
use crate::error::SessionResult;
use crate::scheduler::{RepeatingTask, SkipReason, TickOutcome};

/// Location permission as far as this session knows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LocationPermission {
    #[default]
    NotAsked,
    Requesting,
    Granted,
    Denied,
}

impl From<PermissionStatus> for LocationPermission {
    fn from(status: PermissionStatus) -> Self {
        match status {
            PermissionStatus::Granted => LocationPermission::Granted,
            PermissionStatus::Denied => LocationPermission::Denied,
        }
    }
}

impl SessionShared {
    /// Start or stop the sync loop to match the current snapshot.
    ///
    /// Permission is asked at most once automatically; after a denial only
    /// `BookingSession::enable_location` asks again.
    pub(crate) async fn reconcile_tracking(self: &Arc<Self>) {
        if self.is_closed() {
            return;
        }

        let known = {
            let mut state = self.state.write().await;
            if !state.trackable() {
                None
            } else if state.permission == LocationPermission::NotAsked {
                state.permission = LocationPermission::Requesting;
                Some(None)
            } else {
                Some(Some(state.permission))
            }
        };

        let permission = match known {
            None => {
                self.stop_tracking();
                return;
            }
            Some(Some(permission)) => permission,
            Some(None) => self.ask_permission().await,
        };

        if permission == LocationPermission::Granted && self.state.read().await.trackable() {
            self.start_tracking();
        }
    }

    pub(crate) async fn ask_permission(&self) -> LocationPermission {
        let permission = LocationPermission::from(self.locator.request_permission().await);
        self.state.write().await.permission = permission;

        if permission == LocationPermission::Denied {
            warn!(booking_id = %self.booking_id, "Location permission denied, live tracking stays off");
            self.emit(SessionEvent::PermissionDenied);
        }
        permission
    }

    fn start_tracking(self: &Arc<Self>) {
        {
            let mut tasks = self.tasks();
            if tasks.tracking.is_some() || self.is_closed() {
                return;
            }

            let weak = Arc::downgrade(self);
            tasks.tracking = Some(RepeatingTask::spawn(
                "location-sync",
                self.config.location_interval,
                move || {
                    let weak = weak.clone();
                    async move {
                        match weak.upgrade() {
                            Some(shared) => {
                                shared.location_tick().await;
                                ControlFlow::Continue(())
                            }
                            None => ControlFlow::Break(()),
                        }
                    }
                },
            ));
        }

        info!(booking_id = %self.booking_id, "Live location sync started");
        self.emit(SessionEvent::TrackingStarted {
            booking_id: self.booking_id.clone(),
        });
    }

    pub(crate) fn stop_tracking(&self) {
        let task = self.tasks().tracking.take();
        if let Some(task) = task {
            task.cancel();
            info!(booking_id = %self.booking_id, "Live location sync stopped");
            self.emit(SessionEvent::TrackingStopped {
                booking_id: self.booking_id.clone(),
            });
        }
    }

    /// One push-and-pull cycle. Any failure skips the cycle; the next tick retries.
    pub(crate) async fn location_tick(&self) -> TickOutcome {
        if self.is_closed() {
            return TickOutcome::Skipped(SkipReason::Closed);
        }

        let participants = {
            let state = self.state.read().await;
            state
                .snapshot
                .as_ref()
                .filter(|b| b.status.is_trackable())
                .map(|b| (b.owner_id.clone(), b.mechanic_id.clone()))
        };
        let Some((owner_id, mechanic_id)) = participants else {
            return TickOutcome::Skipped(SkipReason::NotTrackable);
        };

        let position = match self.read_position().await {
            Ok(position) => position,
            Err(e) => {
                debug!(booking_id = %self.booking_id, error = %e, "No device position this tick");
                return TickOutcome::Skipped(SkipReason::Location(e));
            }
        };

        if let Err(e) = self.service.push_location(&self.booking_id, position).await {
            debug!(booking_id = %self.booking_id, error = %e, "Location push failed");
            return TickOutcome::Skipped(SkipReason::Service(e));
        }

        let samples = match self.service.list_locations(&self.booking_id).await {
            Ok(samples) => samples,
            Err(e) => {
                debug!(booking_id = %self.booking_id, error = %e, "Location pull failed");
                return TickOutcome::Skipped(SkipReason::Service(e));
            }
        };

        let owner = LocationSample::latest_for(&samples, &owner_id).map(|s| s.coordinates());
        let mechanic = LocationSample::latest_for(&samples, &mechanic_id).map(|s| s.coordinates());

        let mut state = self.state.write().await;
        // The booking may have left the trackable states while this tick was in flight.
        if !state.trackable() {
            return TickOutcome::Skipped(SkipReason::NotTrackable);
        }
        state.owner_position = owner;
        state.mechanic_position = mechanic;
        TickOutcome::Applied
    }

    /// Live fix within the timeout, otherwise the last known position
    async fn read_position(&self) -> Result<Coordinates, LocationError> {
        match time::timeout(self.config.location_timeout, self.locator.current_position()).await {
            Ok(Ok(position)) => return Ok(position),
            Ok(Err(e)) => debug!(error = %e, "Live fix failed, using last known position"),
            Err(_) => debug!("Live fix timed out, using last known position"),
        }

        self.locator
            .last_known_position()
            .await?
            .ok_or_else(|| LocationError::Unavailable("no last known position".to_string()))
    }
}

impl BookingSession {
    /// Manual "enable location" action, e.g. after an earlier denial
    pub async fn enable_location(&self) -> SessionResult<LocationPermission> {
        let shared = &self.shared;
        shared.ensure_open()?;

        shared.state.write().await.permission = LocationPermission::Requesting;
        let permission = shared.ask_permission().await;
        if permission == LocationPermission::Granted {
            shared.reconcile_tracking().await;
        }
        Ok(permission)
    }

    /// Run one sync cycle now instead of waiting for the timer
    pub async fn sync_location(&self) -> TickOutcome {
        self.shared.location_tick().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::SessionConfig;
    use mechbook_core::mock::{MockLocationProvider, MockServer};
    use mechbook_core::{Identity, Role};
    use mechbook_shared::{Booking, BookingStatus};
    use std::time::Duration;

    fn accepted(server: &MockServer) -> Booking {
        let mut booking = Booking::new(
            "owner-1".to_string(),
            "mech-1".to_string(),
            "Mazda".to_string(),
            "3".to_string(),
            "Alternator".to_string(),
        );
        booking.status = BookingStatus::Accepted;
        server.insert_booking(booking.clone());
        booking
    }

    fn config() -> SessionConfig {
        SessionConfig {
            location_timeout: Duration::from_secs(2),
            ..SessionConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_permission_asked_once() {
        let server = MockServer::new();
        let booking = accepted(&server);
        let locator = Arc::new(MockLocationProvider::denying());
        let session = BookingSession::new(
            Identity::new("owner-1", Role::Owner, "token"),
            &booking.id,
            Arc::new(server.client("owner-1")),
            locator.clone(),
            config(),
        );

        session.load().await.unwrap();
        session.refresh().await;
        session.load().await.unwrap();

        assert_eq!(locator.permission_requests(), 1);
        let view = session.view().await;
        assert_eq!(view.permission, LocationPermission::Denied);
        assert!(!view.tracking);
        // Status polling is unaffected by the denial.
        assert_eq!(view.booking.map(|b| b.status), Some(BookingStatus::Accepted));
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_enable_after_denial() {
        let server = MockServer::new();
        let booking = accepted(&server);
        let locator = Arc::new(MockLocationProvider::denying());
        let session = BookingSession::new(
            Identity::new("owner-1", Role::Owner, "token"),
            &booking.id,
            Arc::new(server.client("owner-1")),
            locator.clone(),
            config(),
        );
        session.load().await.unwrap();
        assert!(!session.is_tracking());

        locator.set_grant(true);
        assert_eq!(session.enable_location().await, Ok(LocationPermission::Granted));
        assert!(session.is_tracking());
        assert_eq!(locator.permission_requests(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_falls_back_to_last_known_position() {
        let server = MockServer::new();
        let booking = accepted(&server);
        let locator = Arc::new(MockLocationProvider::granting(Coordinates::new(1.0, 1.0)));
        locator.set_hanging(true);
        locator.set_last_known(Some(Coordinates::new(6.45, 3.39)));
        let session = BookingSession::new(
            Identity::new("owner-1", Role::Owner, "token"),
            &booking.id,
            Arc::new(server.client("owner-1")),
            locator.clone(),
            config(),
        );
        session.load().await.unwrap();

        assert!(session.sync_location().await.is_applied());
        let view = session.view().await;
        assert_eq!(view.owner_position, Some(Coordinates::new(6.45, 3.39)));
        assert!(view.mechanic_position.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_position_skips_tick() {
        let server = MockServer::new();
        let booking = accepted(&server);
        let locator = Arc::new(MockLocationProvider::granting(Coordinates::new(1.0, 1.0)));
        locator.set_fix(None);
        locator.set_last_known(None);
        let session = BookingSession::new(
            Identity::new("owner-1", Role::Owner, "token"),
            &booking.id,
            Arc::new(server.client("owner-1")),
            locator,
            config(),
        );
        session.load().await.unwrap();

        let outcome = session.sync_location().await;
        assert!(matches!(outcome, TickOutcome::Skipped(SkipReason::Location(_))));
        assert_eq!(server.push_calls(), 0);
        assert_eq!(server.pull_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_push_skips_pull() {
        let server = MockServer::new();
        let booking = accepted(&server);
        let session = BookingSession::new(
            Identity::new("mech-1", Role::Mechanic, "token"),
            &booking.id,
            Arc::new(server.client("mech-1")),
            Arc::new(MockLocationProvider::granting(Coordinates::new(2.0, 2.0))),
            config(),
        );
        session.load().await.unwrap();

        server.fail_pushes(1);
        let outcome = session.sync_location().await;
        assert!(matches!(outcome, TickOutcome::Skipped(SkipReason::Service(_))));
        assert_eq!(server.pull_calls(), 0);
        assert!(session.view().await.error.is_none());
    }
}
