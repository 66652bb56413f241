use mechbook_core::{BookingService, Identity, LocationProvider, Role, ServiceResult};
use mechbook_shared::{Booking, BookingStatus, Coordinates, Decision, ReviewRequest, SessionEvent};
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

use crate::error::{SessionError, SessionResult};
use crate::guard::SingleFlight;
use crate::otp::{otp_action, OtpAction};
use crate::scheduler::{RepeatingTask, SkipReason, TickOutcome};
use crate::tracking::LocationPermission;

const EVENT_CAPACITY: usize = 64;

/// Timing knobs for one booking session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub refresh_interval: Duration,
    pub location_interval: Duration,
    /// How long to wait for a live fix before falling back to the last known position
    pub location_timeout: Duration,
    /// Upper bound on booking-list pages walked per fetch
    pub max_pages: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(5),
            location_interval: Duration::from_secs(5),
            location_timeout: Duration::from_secs(10),
            max_pages: 10,
        }
    }
}

/// Read-only picture of the session for the presentation layer
#[derive(Debug, Clone, PartialEq)]
pub struct SessionView {
    pub booking: Option<Booking>,
    pub loading: bool,
    pub error: Option<String>,
    /// The booking id was not in this role's booking list at the last fetch
    pub missing: bool,
    pub permission: LocationPermission,
    pub tracking: bool,
    pub owner_position: Option<Coordinates>,
    pub mechanic_position: Option<Coordinates>,
    pub otp: OtpAction,
    pub feedback_prompted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PendingResponse {
    pub(crate) booking_id: String,
    pub(crate) decision: Decision,
}

#[derive(Debug, Default)]
pub(crate) struct SessionState {
    pub(crate) snapshot: Option<Booking>,
    pub(crate) applied_seq: u64,
    pub(crate) loading: bool,
    pub(crate) error: Option<String>,
    pub(crate) missing: bool,
    pub(crate) permission: LocationPermission,
    pub(crate) owner_position: Option<Coordinates>,
    pub(crate) mechanic_position: Option<Coordinates>,
    pub(crate) feedback_prompted: bool,
}

impl SessionState {
    pub(crate) fn trackable(&self) -> bool {
        self.snapshot.as_ref().is_some_and(|b| b.status.is_trackable())
    }
}

#[derive(Default)]
pub(crate) struct SessionTasks {
    pub(crate) refresh: Option<RepeatingTask>,
    pub(crate) tracking: Option<RepeatingTask>,
}

pub(crate) struct SessionShared {
    pub(crate) identity: Identity,
    pub(crate) booking_id: String,
    pub(crate) config: SessionConfig,
    pub(crate) service: Arc<dyn BookingService>,
    pub(crate) locator: Arc<dyn LocationProvider>,
    pub(crate) state: RwLock<SessionState>,
    pub(crate) responding: SingleFlight<PendingResponse>,
    tasks: Mutex<SessionTasks>,
    events: broadcast::Sender<SessionEvent>,
    next_seq: AtomicU64,
    closed: AtomicBool,
}

impl SessionShared {
    pub(crate) fn tasks(&self) -> MutexGuard<'_, SessionTasks> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn ensure_open(&self) -> SessionResult<()> {
        if self.is_closed() {
            return Err(SessionError::Closed);
        }
        Ok(())
    }

    pub(crate) fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Sequence number for a request about to go out. Responses are applied
    /// only if nothing newer has been applied in the meantime.
    pub(crate) fn begin_request(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Record a foreground failure as the visible error message
    pub(crate) async fn fail(&self, err: SessionError) -> SessionError {
        if err.is_user_visible() {
            self.state.write().await.error = Some(err.to_string());
        }
        err
    }

    pub(crate) async fn clear_error(&self) {
        self.state.write().await.error = None;
    }

    /// Walk the role's booking list until the target booking turns up
    async fn fetch_target(&self) -> ServiceResult<Option<Booking>> {
        let role = self.identity.role;
        let mut page = 1;
        loop {
            let batch = self.service.list_bookings(role, page).await?;
            let last = batch.is_last();
            if let Some(found) = batch.bookings.into_iter().find(|b| b.id == self.booking_id) {
                if !self.identity.participates_in(&found) {
                    warn!(
                        booking_id = %self.booking_id,
                        user_id = %self.identity.user_id,
                        %role,
                        "Listed booking does not name this user, treating as missing"
                    );
                    return Ok(None);
                }
                return Ok(Some(found));
            }
            if last || page >= self.config.max_pages {
                debug!(booking_id = %self.booking_id, %role, pages = page, "Booking not in role's list");
                return Ok(None);
            }
            page += 1;
        }
    }

    /// Replace the snapshot with a fetched booking, or mark it missing.
    /// Returns false when the response is older than what is already shown.
    pub(crate) async fn apply_snapshot(self: &Arc<Self>, seq: u64, found: Option<Booking>) -> bool {
        let mut events = Vec::new();
        {
            let mut state = self.state.write().await;
            if seq <= state.applied_seq {
                debug!(
                    booking_id = %self.booking_id,
                    seq,
                    applied = state.applied_seq,
                    "Discarding out-of-order booking response"
                );
                return false;
            }
            state.applied_seq = seq;

            match found {
                Some(booking) => {
                    if !booking.otp_order_holds() {
                        warn!(booking_id = %booking.id, "Completion OTP state present before meet verification");
                    }
                    if state.snapshot.as_ref() != Some(&booking) {
                        events.push(SessionEvent::SnapshotUpdated {
                            booking_id: booking.id.clone(),
                            status: booking.status,
                        });
                    }
                    if booking.complete_verified && !state.feedback_prompted {
                        state.feedback_prompted = true;
                        events.push(SessionEvent::FeedbackRequested {
                            booking_id: booking.id.clone(),
                        });
                    }
                    if !booking.status.is_trackable() {
                        state.owner_position = None;
                        state.mechanic_position = None;
                    }
                    state.missing = false;
                    state.snapshot = Some(booking);
                }
                None => {
                    if !state.missing {
                        events.push(SessionEvent::BookingMissing {
                            booking_id: self.booking_id.clone(),
                        });
                    }
                    state.snapshot = None;
                    state.missing = true;
                    state.owner_position = None;
                    state.mechanic_position = None;
                }
            }
        }

        for event in events {
            self.emit(event);
        }
        self.reconcile_tracking().await;
        true
    }

    pub(crate) async fn refresh_tick(self: &Arc<Self>) -> TickOutcome {
        if self.is_closed() {
            return TickOutcome::Skipped(SkipReason::Closed);
        }
        let seq = self.begin_request();
        match self.fetch_target().await {
            Ok(found) => {
                if self.apply_snapshot(seq, found).await {
                    TickOutcome::Applied
                } else {
                    TickOutcome::Skipped(SkipReason::Stale)
                }
            }
            Err(e) => {
                debug!(booking_id = %self.booking_id, error = %e, "Background refresh failed, retrying next tick");
                TickOutcome::Skipped(SkipReason::Service(e))
            }
        }
    }

    fn spawn_refresh(self: &Arc<Self>) -> RepeatingTask {
        let weak = Arc::downgrade(self);
        RepeatingTask::spawn("booking-refresh", self.config.refresh_interval, move || {
            let weak = weak.clone();
            async move {
                match weak.upgrade() {
                    Some(shared) => {
                        shared.refresh_tick().await;
                        ControlFlow::Continue(())
                    }
                    None => ControlFlow::Break(()),
                }
            }
        })
    }
}

/// Client-side view of one booking, kept fresh by polling.
///
/// The session owns the snapshot and every timer it starts. Closing or
/// dropping it cancels the refresh and location timers together.
pub struct BookingSession {
    pub(crate) shared: Arc<SessionShared>,
}

impl BookingSession {
    pub fn new(
        identity: Identity,
        booking_id: impl Into<String>,
        service: Arc<dyn BookingService>,
        locator: Arc<dyn LocationProvider>,
        config: SessionConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            shared: Arc::new(SessionShared {
                identity,
                booking_id: booking_id.into(),
                config,
                service,
                locator,
                state: RwLock::new(SessionState::default()),
                responding: SingleFlight::new(),
                tasks: Mutex::new(SessionTasks::default()),
                events,
                next_seq: AtomicU64::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Create a session, load the booking once and start periodic refresh.
    /// A failed first load leaves the error in the view; polling still starts.
    pub async fn open(
        identity: Identity,
        booking_id: impl Into<String>,
        service: Arc<dyn BookingService>,
        locator: Arc<dyn LocationProvider>,
        config: SessionConfig,
    ) -> Self {
        let session = Self::new(identity, booking_id, service, locator, config);
        if let Err(e) = session.load().await {
            warn!(booking_id = %session.booking_id(), error = %e, "Initial booking load failed");
        }
        session.start_polling();
        session
    }

    pub fn start_polling(&self) {
        let mut tasks = self.shared.tasks();
        if tasks.refresh.is_some() || self.shared.is_closed() {
            return;
        }
        tasks.refresh = Some(self.shared.spawn_refresh());
    }

    pub fn booking_id(&self) -> &str {
        &self.shared.booking_id
    }

    pub fn identity(&self) -> &Identity {
        &self.shared.identity
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events.subscribe()
    }

    pub async fn snapshot(&self) -> Option<Booking> {
        self.shared.state.read().await.snapshot.clone()
    }

    pub async fn view(&self) -> SessionView {
        let tracking = self.is_tracking();
        let state = self.shared.state.read().await;
        SessionView {
            booking: state.snapshot.clone(),
            loading: state.loading,
            error: state.error.clone(),
            missing: state.missing,
            permission: state.permission,
            tracking,
            owner_position: state.owner_position,
            mechanic_position: state.mechanic_position,
            otp: otp_action(state.snapshot.as_ref(), self.shared.identity.role),
            feedback_prompted: state.feedback_prompted,
        }
    }

    /// User-initiated fetch. Errors land in the view and leave the snapshot untouched.
    pub async fn load(&self) -> SessionResult<Option<Booking>> {
        let shared = &self.shared;
        shared.ensure_open()?;

        let seq = shared.begin_request();
        {
            let mut state = shared.state.write().await;
            state.loading = true;
            state.error = None;
        }

        let result = shared.fetch_target().await;
        shared.state.write().await.loading = false;

        match result {
            Ok(found) => {
                shared.apply_snapshot(seq, found.clone()).await;
                Ok(found)
            }
            Err(e) => {
                warn!(booking_id = %shared.booking_id, error = %e, "Failed to load booking");
                Err(shared.fail(e.into()).await)
            }
        }
    }

    /// One silent refresh cycle, the same work the periodic timer does
    pub async fn refresh(&self) -> TickOutcome {
        self.shared.refresh_tick().await
    }

    /// Mechanic accepts or declines a pending booking.
    ///
    /// Only one response may be outstanding; a second tap while the first
    /// is in flight is rejected without touching the network.
    pub async fn respond(&self, booking_id: &str, decision: Decision) -> SessionResult<()> {
        let shared = &self.shared;
        shared.ensure_open()?;

        if shared.identity.role != Role::Mechanic {
            return Err(shared.fail(SessionError::WrongRole(Role::Mechanic)).await);
        }

        let status = shared
            .state
            .read()
            .await
            .snapshot
            .as_ref()
            .filter(|b| b.id == booking_id)
            .map(|b| b.status);
        match status {
            Some(BookingStatus::Pending) => {}
            Some(other) => {
                let err = SessionError::NotEligible(format!("booking is already {}", other));
                return Err(shared.fail(err).await);
            }
            None => {
                return Err(shared.fail(SessionError::UnknownBooking(booking_id.to_string())).await);
            }
        }

        let _permit = shared
            .responding
            .try_acquire(PendingResponse {
                booking_id: booking_id.to_string(),
                decision,
            })
            .map_err(|current| {
                debug!(booking_id, "Response already in flight, ignoring");
                SessionError::ActionInFlight {
                    booking_id: current.booking_id,
                    decision: current.decision,
                }
            })?;

        info!(booking_id, %decision, "Submitting booking response");
        if let Err(e) = shared.service.respond(booking_id, decision).await {
            warn!(booking_id, error = %e, "Booking response failed");
            return Err(shared.fail(e.into()).await);
        }

        shared.emit(SessionEvent::BadgeRefresh);
        // The decision is recorded; a failed reload is left to the refresh timer.
        if let Err(e) = self.load().await {
            warn!(booking_id, error = %e, "Reload after response failed");
            shared.clear_error().await;
        }
        Ok(())
    }

    /// Owner's review of the mechanic, available once the job is verified complete
    pub async fn submit_feedback(&self, rating: u8, comment: Option<String>) -> SessionResult<()> {
        let shared = &self.shared;
        shared.ensure_open()?;

        if shared.identity.role != Role::Owner {
            return Err(shared.fail(SessionError::WrongRole(Role::Owner)).await);
        }
        if !(1..=5).contains(&rating) {
            let err = SessionError::Validation("rating must be between 1 and 5".to_string());
            return Err(shared.fail(err).await);
        }

        let booking = shared.state.read().await.snapshot.clone();
        let Some(booking) = booking.filter(|b| b.complete_verified) else {
            let err = SessionError::NotEligible("feedback opens once the job is verified complete".to_string());
            return Err(shared.fail(err).await);
        };

        let review = ReviewRequest {
            booking_id: booking.id,
            mechanic_id: booking.mechanic_id,
            rating,
            comment: comment
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty()),
        };

        if let Err(e) = shared.service.submit_review(&review).await {
            warn!(booking_id = %review.booking_id, error = %e, "Review submission failed");
            return Err(shared.fail(e.into()).await);
        }
        info!(booking_id = %review.booking_id, rating, "Review submitted");
        Ok(())
    }

    pub fn is_tracking(&self) -> bool {
        self.shared.tasks().tracking.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// End the session: every timer is cancelled and none fires again
    pub fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let (refresh, tracking) = {
            let mut tasks = self.shared.tasks();
            (tasks.refresh.take(), tasks.tracking.take())
        };
        if let Some(task) = refresh {
            task.cancel();
        }
        if let Some(task) = tracking {
            task.cancel();
            self.shared.emit(SessionEvent::TrackingStopped {
                booking_id: self.shared.booking_id.clone(),
            });
        }
        info!(booking_id = %self.shared.booking_id, "Booking session closed");
    }
}

impl Drop for BookingSession {
    fn drop(&mut self) {
        self.close();
    }
}
