//! In-memory stand-ins for the booking service and the device location provider.

use async_trait::async_trait;
use chrono::Utc;
use mechbook_shared::{
    Booking, BookingStatus, Coordinates, Decision, LocationSample, Masked, ReviewRequest,
};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;

use crate::identity::Role;
use crate::location::{LocationError, LocationProvider, PermissionStatus};
use crate::repository::{BookingPage, BookingService, ServiceError, ServiceResult};

#[derive(Default)]
struct ServerState {
    bookings: Vec<Booking>,
    locations: Vec<LocationSample>,
    reviews: Vec<ReviewRequest>,
    offline: bool,
    failing_pushes: usize,
    failing_lists: usize,
}

#[derive(Default)]
struct CallCounters {
    list: AtomicUsize,
    respond: AtomicUsize,
    otp: AtomicUsize,
    push: AtomicUsize,
    pull: AtomicUsize,
}

/// Authoritative booking store shared by every mock client.
///
/// Behaves like the real service: meet codes are issued on acceptance,
/// meet verification moves the booking to IN_PROGRESS and completion
/// verification moves it to COMPLETED.
pub struct MockServer {
    state: Mutex<ServerState>,
    calls: CallCounters,
    next_code: AtomicU32,
    page_size: usize,
    respond_gate: Mutex<Option<Arc<Notify>>>,
}

impl MockServer {
    pub fn new() -> Arc<Self> {
        Self::with_page_size(20)
    }

    pub fn with_page_size(page_size: usize) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ServerState::default()),
            calls: CallCounters::default(),
            next_code: AtomicU32::new(4821),
            page_size: page_size.max(1),
            respond_gate: Mutex::new(None),
        })
    }

    /// A client authenticated as `user_id`
    pub fn client(self: &Arc<Self>, user_id: &str) -> MockBookingService {
        MockBookingService {
            server: Arc::clone(self),
            user_id: user_id.to_string(),
        }
    }

    pub fn insert_booking(&self, booking: Booking) {
        self.state().bookings.push(booking);
    }

    pub fn booking(&self, booking_id: &str) -> Option<Booking> {
        self.state().bookings.iter().find(|b| b.id == booking_id).cloned()
    }

    /// Edit a stored booking in place, as the backend would
    pub fn update_booking(&self, booking_id: &str, f: impl FnOnce(&mut Booking)) {
        if let Some(booking) = self.state().bookings.iter_mut().find(|b| b.id == booking_id) {
            f(booking);
        }
    }

    /// Server-side status change, e.g. the backend closing a job
    pub fn set_status(&self, booking_id: &str, status: BookingStatus) {
        self.update_booking(booking_id, |b| b.status = status);
    }

    pub fn set_offline(&self, offline: bool) {
        self.state().offline = offline;
    }

    /// Fail the next `count` location pushes
    pub fn fail_pushes(&self, count: usize) {
        self.state().failing_pushes = count;
    }

    /// Fail the next `count` booking list fetches
    pub fn fail_lists(&self, count: usize) {
        self.state().failing_lists = count;
    }

    /// Hold every `respond` call until the returned handle is notified
    pub fn hold_responses(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.respond_gate.lock().unwrap_or_else(|e| e.into_inner()) = Some(Arc::clone(&gate));
        gate
    }

    pub fn reviews(&self) -> Vec<ReviewRequest> {
        self.state().reviews.clone()
    }

    pub fn list_calls(&self) -> usize {
        self.calls.list.load(Ordering::SeqCst)
    }

    pub fn respond_calls(&self) -> usize {
        self.calls.respond.load(Ordering::SeqCst)
    }

    pub fn otp_calls(&self) -> usize {
        self.calls.otp.load(Ordering::SeqCst)
    }

    pub fn push_calls(&self) -> usize {
        self.calls.push.load(Ordering::SeqCst)
    }

    pub fn pull_calls(&self) -> usize {
        self.calls.pull.load(Ordering::SeqCst)
    }

    fn state(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn issue_code(&self) -> Masked<String> {
        Masked(format!("{:04}", self.next_code.fetch_add(1, Ordering::SeqCst) % 10_000))
    }

    fn ensure_online(&self) -> ServiceResult<()> {
        if self.state().offline {
            return Err(ServiceError::Transport("connection refused".to_string()));
        }
        Ok(())
    }
}

/// A `BookingService` bound to one signed-in user of a `MockServer`
#[derive(Clone)]
pub struct MockBookingService {
    server: Arc<MockServer>,
    user_id: String,
}

impl MockBookingService {
    fn with_booking<T>(
        &self,
        booking_id: &str,
        f: impl FnOnce(&mut Booking, &MockServer) -> ServiceResult<T>,
    ) -> ServiceResult<T> {
        let mut state = self.server.state();
        let booking = state
            .bookings
            .iter_mut()
            .find(|b| b.id == booking_id)
            .ok_or_else(|| ServiceError::NotFound(format!("booking {}", booking_id)))?;
        f(booking, &self.server)
    }
}

#[async_trait]
impl BookingService for MockBookingService {
    async fn list_bookings(&self, role: Role, page: u32) -> ServiceResult<BookingPage> {
        self.server.calls.list.fetch_add(1, Ordering::SeqCst);
        self.server.ensure_online()?;

        let mut state = self.server.state();
        if state.failing_lists > 0 {
            state.failing_lists -= 1;
            return Err(ServiceError::Transport("list dropped".to_string()));
        }
        let visible: Vec<&Booking> = state
            .bookings
            .iter()
            .filter(|b| match role {
                Role::Owner => b.owner_id == self.user_id,
                Role::Mechanic => b.mechanic_id == self.user_id,
            })
            .collect();

        let size = self.server.page_size;
        let total_pages = visible.len().div_ceil(size).max(1) as u32;
        let skip = (page.max(1) as usize - 1) * size;
        let bookings = visible.into_iter().skip(skip).take(size).cloned().collect();

        Ok(BookingPage { bookings, page, total_pages })
    }

    async fn respond(&self, booking_id: &str, decision: Decision) -> ServiceResult<()> {
        self.server.calls.respond.fetch_add(1, Ordering::SeqCst);
        let gate = self
            .server
            .respond_gate
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.server.ensure_online()?;

        self.with_booking(booking_id, |booking, server| {
            if booking.mechanic_id != self.user_id {
                return Err(ServiceError::Unauthorized);
            }
            if booking.status != BookingStatus::Pending {
                return Err(ServiceError::Rejected("Booking is no longer pending".to_string()));
            }
            booking.status = decision.resulting_status();
            if decision == Decision::Accepted {
                booking.meet_otp = Some(server.issue_code());
            }
            Ok(())
        })
    }

    async fn verify_meet_otp(&self, booking_id: &str, code: &str) -> ServiceResult<Booking> {
        self.server.calls.otp.fetch_add(1, Ordering::SeqCst);
        self.server.ensure_online()?;

        self.with_booking(booking_id, |booking, _| {
            if booking.mechanic_id != self.user_id {
                return Err(ServiceError::Unauthorized);
            }
            if booking.meet_verified {
                return Err(ServiceError::Rejected("Meet OTP already verified".to_string()));
            }
            match &booking.meet_otp {
                Some(expected) if expected.expose() == code => {
                    booking.meet_verified = true;
                    booking.status = BookingStatus::InProgress;
                    Ok(booking.clone())
                }
                _ => Err(ServiceError::Rejected("Invalid OTP".to_string())),
            }
        })
    }

    async fn generate_complete_otp(&self, booking_id: &str) -> ServiceResult<Booking> {
        self.server.calls.otp.fetch_add(1, Ordering::SeqCst);
        self.server.ensure_online()?;

        self.with_booking(booking_id, |booking, server| {
            if booking.owner_id != self.user_id {
                return Err(ServiceError::Unauthorized);
            }
            if !booking.meet_verified {
                return Err(ServiceError::Rejected("Meet OTP not verified yet".to_string()));
            }
            if booking.complete_otp.is_none() {
                booking.complete_otp = Some(server.issue_code());
            }
            Ok(booking.clone())
        })
    }

    async fn verify_complete_otp(&self, booking_id: &str, code: &str) -> ServiceResult<Booking> {
        self.server.calls.otp.fetch_add(1, Ordering::SeqCst);
        self.server.ensure_online()?;

        self.with_booking(booking_id, |booking, _| {
            if booking.mechanic_id != self.user_id {
                return Err(ServiceError::Unauthorized);
            }
            if booking.complete_verified {
                return Err(ServiceError::Rejected("Completion OTP already verified".to_string()));
            }
            match &booking.complete_otp {
                Some(expected) if expected.expose() == code => {
                    booking.complete_verified = true;
                    booking.status = BookingStatus::Completed;
                    Ok(booking.clone())
                }
                _ => Err(ServiceError::Rejected("Invalid OTP".to_string())),
            }
        })
    }

    async fn push_location(&self, booking_id: &str, position: Coordinates) -> ServiceResult<()> {
        self.server.calls.push.fetch_add(1, Ordering::SeqCst);
        self.server.ensure_online()?;

        let mut state = self.server.state();
        if state.failing_pushes > 0 {
            state.failing_pushes -= 1;
            return Err(ServiceError::Transport("push dropped".to_string()));
        }
        state.locations.push(LocationSample {
            user_id: self.user_id.clone(),
            latitude: position.latitude,
            longitude: position.longitude,
            booking_id: booking_id.to_string(),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    async fn list_locations(&self, booking_id: &str) -> ServiceResult<Vec<LocationSample>> {
        self.server.calls.pull.fetch_add(1, Ordering::SeqCst);
        self.server.ensure_online()?;

        Ok(self
            .server
            .state()
            .locations
            .iter()
            .filter(|s| s.booking_id == booking_id)
            .cloned()
            .collect())
    }

    async fn submit_review(&self, review: &ReviewRequest) -> ServiceResult<()> {
        self.server.ensure_online()?;
        self.server.state().reviews.push(review.clone());
        Ok(())
    }
}

/// Scriptable device location
pub struct MockLocationProvider {
    grant: AtomicBool,
    hang: AtomicBool,
    fix: Mutex<Option<Coordinates>>,
    last_known: Mutex<Option<Coordinates>>,
    permission_requests: AtomicUsize,
}

impl MockLocationProvider {
    pub fn granting(fix: Coordinates) -> Self {
        Self {
            grant: AtomicBool::new(true),
            hang: AtomicBool::new(false),
            fix: Mutex::new(Some(fix)),
            last_known: Mutex::new(Some(fix)),
            permission_requests: AtomicUsize::new(0),
        }
    }

    pub fn denying() -> Self {
        let provider = Self::granting(Coordinates::new(0.0, 0.0));
        provider.grant.store(false, Ordering::SeqCst);
        provider
    }

    pub fn set_grant(&self, grant: bool) {
        self.grant.store(grant, Ordering::SeqCst);
    }

    /// Make live fixes never resolve, so callers hit their timeout
    pub fn set_hanging(&self, hang: bool) {
        self.hang.store(hang, Ordering::SeqCst);
    }

    pub fn set_fix(&self, fix: Option<Coordinates>) {
        *self.fix.lock().unwrap_or_else(|e| e.into_inner()) = fix;
    }

    pub fn set_last_known(&self, last_known: Option<Coordinates>) {
        *self.last_known.lock().unwrap_or_else(|e| e.into_inner()) = last_known;
    }

    pub fn permission_requests(&self) -> usize {
        self.permission_requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LocationProvider for MockLocationProvider {
    async fn request_permission(&self) -> PermissionStatus {
        self.permission_requests.fetch_add(1, Ordering::SeqCst);
        if self.grant.load(Ordering::SeqCst) {
            PermissionStatus::Granted
        } else {
            PermissionStatus::Denied
        }
    }

    async fn current_position(&self) -> Result<Coordinates, LocationError> {
        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let fix = *self.fix.lock().unwrap_or_else(|e| e.into_inner());
        fix.ok_or_else(|| LocationError::Unavailable("no fix".to_string()))
    }

    async fn last_known_position(&self) -> Result<Option<Coordinates>, LocationError> {
        Ok(*self.last_known.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending_booking(server: &MockServer) -> Booking {
        let booking = Booking::new(
            "owner-1".to_string(),
            "mech-1".to_string(),
            "Toyota".to_string(),
            "Hilux".to_string(),
            "Engine knocking".to_string(),
        );
        server.insert_booking(booking.clone());
        booking
    }

    #[tokio::test]
    async fn test_mock_server_otp_ordering() {
        let server = MockServer::new();
        let booking = pending_booking(&server);
        let owner = server.client("owner-1");
        let mechanic = server.client("mech-1");

        mechanic.respond(&booking.id, Decision::Accepted).await.unwrap();
        assert!(owner.generate_complete_otp(&booking.id).await.is_err());

        let code = server.booking(&booking.id).unwrap().meet_otp.unwrap().into_inner();
        let updated = mechanic.verify_meet_otp(&booking.id, &code).await.unwrap();
        assert!(updated.meet_verified);
        assert_eq!(updated.status, BookingStatus::InProgress);

        let updated = owner.generate_complete_otp(&booking.id).await.unwrap();
        assert!(updated.complete_otp.is_some());
        assert!(updated.otp_order_holds());
    }

    #[tokio::test]
    async fn test_mock_server_paginates_by_role() {
        let server = MockServer::with_page_size(2);
        for _ in 0..3 {
            pending_booking(&server);
        }
        let mechanic = server.client("mech-1");

        let first = mechanic.list_bookings(Role::Mechanic, 1).await.unwrap();
        assert_eq!(first.bookings.len(), 2);
        assert_eq!(first.total_pages, 2);
        assert!(!first.is_last());

        let second = mechanic.list_bookings(Role::Mechanic, 2).await.unwrap();
        assert_eq!(second.bookings.len(), 1);
        assert!(second.is_last());

        let as_owner = mechanic.list_bookings(Role::Owner, 1).await.unwrap();
        assert!(as_owner.bookings.is_empty());
    }

    #[tokio::test]
    async fn test_only_mechanic_may_respond() {
        let server = MockServer::new();
        let booking = pending_booking(&server);

        let result = server.client("owner-1").respond(&booking.id, Decision::Accepted).await;
        assert_eq!(result, Err(ServiceError::Unauthorized));
        assert_eq!(server.booking(&booking.id).unwrap().status, BookingStatus::Pending);
    }
}
