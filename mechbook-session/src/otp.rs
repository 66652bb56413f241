use mechbook_core::Role;
use mechbook_shared::{Booking, BookingStatus, Masked};
use tracing::{info, warn};

use crate::controller::BookingSession;
use crate::error::{SessionError, SessionResult};

/// What the viewer can do about one-time codes right now.
///
/// Derived from the snapshot on every read, never stored.
#[derive(Debug, Clone, PartialEq)]
pub enum OtpAction {
    /// Codes do not apply to the booking in its current state
    None,
    /// The other participant has to act first
    Waiting,
    /// Owner shows this code to the mechanic on arrival
    ShowMeetCode(Masked<String>),
    EnterMeetCode,
    RequestCompletionCode,
    ShowCompletionCode(Masked<String>),
    EnterCompletionCode,
    Finished,
}

/// Eligibility table for the two OTP steps.
///
/// The meet step gates everything: while it is unverified nothing about the
/// completion code is offered, whatever else the snapshot says.
pub fn otp_action(booking: Option<&Booking>, role: Role) -> OtpAction {
    let Some(booking) = booking else {
        return OtpAction::None;
    };
    if !matches!(
        booking.status,
        BookingStatus::Accepted | BookingStatus::InProgress | BookingStatus::Completed
    ) {
        return OtpAction::None;
    }

    if !booking.meet_verified {
        return match role {
            Role::Owner => booking
                .meet_otp
                .clone()
                .map(OtpAction::ShowMeetCode)
                .unwrap_or(OtpAction::Waiting),
            Role::Mechanic => OtpAction::EnterMeetCode,
        };
    }

    if booking.complete_verified {
        return OtpAction::Finished;
    }

    match (&booking.complete_otp, role) {
        (None, Role::Owner) => OtpAction::RequestCompletionCode,
        (None, Role::Mechanic) => OtpAction::Waiting,
        (Some(code), Role::Owner) => OtpAction::ShowCompletionCode(code.clone()),
        (Some(_), Role::Mechanic) => OtpAction::EnterCompletionCode,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OtpStep {
    Meet,
    Completion,
}

impl OtpStep {
    fn expected_action(&self) -> OtpAction {
        match self {
            OtpStep::Meet => OtpAction::EnterMeetCode,
            OtpStep::Completion => OtpAction::EnterCompletionCode,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            OtpStep::Meet => "meet",
            OtpStep::Completion => "completion",
        }
    }
}

impl BookingSession {
    pub async fn otp_action(&self) -> OtpAction {
        let state = self.shared.state.read().await;
        otp_action(state.snapshot.as_ref(), self.shared.identity.role)
    }

    /// Mechanic proves they met the owner. Wrong codes are retryable.
    pub async fn verify_meet_otp(&self, code: &str) -> SessionResult<Booking> {
        self.submit_code(OtpStep::Meet, code).await
    }

    /// Mechanic proves the job is done. Success opens the one-time feedback prompt.
    pub async fn verify_complete_otp(&self, code: &str) -> SessionResult<Booking> {
        self.submit_code(OtpStep::Completion, code).await
    }

    /// Owner asks for the completion code once the meet code is verified
    pub async fn generate_complete_otp(&self) -> SessionResult<Booking> {
        let shared = &self.shared;
        shared.ensure_open()?;

        if shared.identity.role != Role::Owner {
            return Err(shared.fail(SessionError::WrongRole(Role::Owner)).await);
        }
        if self.otp_action().await != OtpAction::RequestCompletionCode {
            let err = SessionError::NotEligible(
                "a completion code can only be requested after the meet code is verified".to_string(),
            );
            return Err(shared.fail(err).await);
        }

        shared.clear_error().await;
        let booking = match shared.service.generate_complete_otp(&shared.booking_id).await {
            Ok(booking) => booking,
            Err(e) => {
                warn!(booking_id = %shared.booking_id, error = %e, "Completion code request failed");
                return Err(shared.fail(e.into()).await);
            }
        };

        info!(booking_id = %shared.booking_id, "Completion code issued");
        // The reply to a write outranks any fetch that was in flight alongside it.
        let seq = shared.begin_request();
        shared.apply_snapshot(seq, Some(booking.clone())).await;
        Ok(booking)
    }

    async fn submit_code(&self, step: OtpStep, code: &str) -> SessionResult<Booking> {
        let shared = &self.shared;
        shared.ensure_open()?;

        if shared.identity.role != Role::Mechanic {
            return Err(shared.fail(SessionError::WrongRole(Role::Mechanic)).await);
        }
        let code = code.trim();
        if code.is_empty() {
            let err = SessionError::Validation(format!("enter the {} code shown by the owner", step.label()));
            return Err(shared.fail(err).await);
        }
        if self.otp_action().await != step.expected_action() {
            let err = SessionError::NotEligible(format!("the {} code is not expected now", step.label()));
            return Err(shared.fail(err).await);
        }

        shared.clear_error().await;
        let result = match step {
            OtpStep::Meet => shared.service.verify_meet_otp(&shared.booking_id, code).await,
            OtpStep::Completion => shared.service.verify_complete_otp(&shared.booking_id, code).await,
        };
        let booking = match result {
            Ok(booking) => booking,
            Err(e) => {
                warn!(booking_id = %shared.booking_id, step = step.label(), error = %e, "Code verification failed");
                return Err(shared.fail(e.into()).await);
            }
        };

        info!(booking_id = %shared.booking_id, step = step.label(), "Code verified");
        let seq = shared.begin_request();
        shared.apply_snapshot(seq, Some(booking.clone())).await;
        Ok(booking)
    }
}
