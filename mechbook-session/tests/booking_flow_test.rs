use std::sync::Arc;
use std::time::Duration;

use mechbook_core::mock::{MockLocationProvider, MockServer};
use mechbook_core::{Identity, Role};
use mechbook_session::{BookingSession, OtpAction, SessionConfig, SessionError};
use mechbook_shared::{Booking, BookingStatus, Coordinates, Decision, SessionEvent};
use tokio::sync::broadcast::Receiver;

fn pending_booking(server: &MockServer) -> Booking {
    let booking = Booking::new(
        "owner-1".to_string(),
        "mech-1".to_string(),
        "Toyota".to_string(),
        "Camry".to_string(),
        "Check engine light".to_string(),
    );
    server.insert_booking(booking.clone());
    booking
}

async fn open_as(
    server: &Arc<MockServer>,
    user: &str,
    role: Role,
    booking_id: &str,
    position: Coordinates,
) -> BookingSession {
    BookingSession::open(
        Identity::new(user, role, format!("token-{}", user)),
        booking_id,
        Arc::new(server.client(user)),
        Arc::new(MockLocationProvider::granting(position)),
        SessionConfig::default(),
    )
    .await
}

fn drain(events: &mut Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    seen
}

fn feedback_prompts(events: &[SessionEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, SessionEvent::FeedbackRequested { .. }))
        .count()
}

#[tokio::test(start_paused = true)]
async fn test_full_booking_lifecycle() {
    let server = MockServer::new();
    let booking = pending_booking(&server);

    let owner = open_as(&server, "owner-1", Role::Owner, &booking.id, Coordinates::new(6.50, 3.35)).await;
    let mechanic = open_as(&server, "mech-1", Role::Mechanic, &booking.id, Coordinates::new(6.60, 3.30)).await;
    let mut mechanic_events = mechanic.subscribe();
    let mut owner_events = owner.subscribe();

    assert_eq!(owner.view().await.otp, OtpAction::None);
    assert!(!mechanic.is_tracking());

    // Mechanic accepts; their own view reloads immediately.
    mechanic.respond(&booking.id, Decision::Accepted).await.unwrap();
    assert_eq!(mechanic.snapshot().await.unwrap().status, BookingStatus::Accepted);
    assert!(mechanic.is_tracking());

    // The owner sees it on the next poll.
    tokio::time::sleep(Duration::from_millis(5_100)).await;
    let owner_view = owner.view().await;
    assert_eq!(owner_view.booking.as_ref().map(|b| b.status), Some(BookingStatus::Accepted));
    assert!(owner_view.tracking);
    let meet_code = match owner_view.otp {
        OtpAction::ShowMeetCode(code) => code.into_inner(),
        other => panic!("owner should see the meet code, got {:?}", other),
    };
    assert_eq!(mechanic.view().await.otp, OtpAction::EnterMeetCode);

    let verified = mechanic.verify_meet_otp(&meet_code).await.unwrap();
    assert!(verified.meet_verified);
    assert!(mechanic.is_tracking());

    owner.refresh().await;
    assert_eq!(owner.view().await.otp, OtpAction::RequestCompletionCode);
    let with_code = owner.generate_complete_otp().await.unwrap();
    let completion_code = with_code.complete_otp.clone().unwrap().into_inner();
    assert!(matches!(owner.view().await.otp, OtpAction::ShowCompletionCode(_)));

    mechanic.refresh().await;
    assert_eq!(mechanic.view().await.otp, OtpAction::EnterCompletionCode);
    let done = mechanic.verify_complete_otp(&completion_code).await.unwrap();
    assert!(done.complete_verified);
    assert_eq!(done.status, BookingStatus::Completed);
    assert!(!mechanic.is_tracking());

    // Further polls do not prompt again.
    tokio::time::sleep(Duration::from_secs(20)).await;
    assert!(!owner.is_tracking());

    let mechanic_seen = drain(&mut mechanic_events);
    assert_eq!(feedback_prompts(&mechanic_seen), 1);
    assert!(mechanic_seen.contains(&SessionEvent::BadgeRefresh));
    assert!(mechanic_seen.contains(&SessionEvent::TrackingStopped { booking_id: booking.id.clone() }));

    let owner_seen = drain(&mut owner_events);
    assert_eq!(feedback_prompts(&owner_seen), 1);
    assert!(owner.view().await.feedback_prompted);

    owner.submit_feedback(5, Some("  Quick and friendly ".to_string())).await.unwrap();
    let reviews = server.reviews();
    assert_eq!(reviews.len(), 1);
    assert_eq!(reviews[0].mechanic_id, "mech-1");
    assert_eq!(reviews[0].comment.as_deref(), Some("Quick and friendly"));
}

#[tokio::test(start_paused = true)]
async fn test_completion_code_never_before_meet_verification() {
    let server = MockServer::new();
    let booking = pending_booking(&server);
    let owner = open_as(&server, "owner-1", Role::Owner, &booking.id, Coordinates::new(0.0, 0.0)).await;
    let mechanic = open_as(&server, "mech-1", Role::Mechanic, &booking.id, Coordinates::new(0.0, 0.0)).await;

    // Too early: still pending.
    assert!(matches!(owner.generate_complete_otp().await, Err(SessionError::NotEligible(_))));

    mechanic.respond(&booking.id, Decision::Accepted).await.unwrap();
    owner.load().await.unwrap();

    // Accepted but the meet code is unverified.
    assert!(matches!(owner.generate_complete_otp().await, Err(SessionError::NotEligible(_))));
    assert_eq!(mechanic.generate_complete_otp().await, Err(SessionError::WrongRole(Role::Owner)));
    // The mechanic cannot jump to the completion step either.
    assert!(matches!(
        mechanic.verify_complete_otp("0000").await,
        Err(SessionError::NotEligible(_))
    ));

    assert_eq!(server.otp_calls(), 0);
    let stored = server.booking(&booking.id).unwrap();
    assert!(stored.complete_otp.is_none());
    assert!(stored.otp_order_holds());
    assert!(owner.view().await.error.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_meet_verification_happens_once() {
    let server = MockServer::new();
    let booking = pending_booking(&server);
    let mechanic = open_as(&server, "mech-1", Role::Mechanic, &booking.id, Coordinates::new(0.0, 0.0)).await;
    mechanic.respond(&booking.id, Decision::Accepted).await.unwrap();

    // Wrong and empty codes are recoverable.
    assert!(matches!(mechanic.verify_meet_otp("   ").await, Err(SessionError::Validation(_))));
    assert!(matches!(mechanic.verify_meet_otp("0000").await, Err(SessionError::Service(_))));
    assert!(!mechanic.snapshot().await.unwrap().meet_verified);
    assert!(mechanic.view().await.error.is_some());

    let code = server.booking(&booking.id).unwrap().meet_otp.unwrap().into_inner();
    let verified = mechanic.verify_meet_otp(&format!(" {} ", code)).await.unwrap();
    assert!(verified.meet_verified);
    assert!(mechanic.view().await.error.is_none());
    let calls = server.otp_calls();

    // A second submission is not offered and never reaches the server.
    assert!(matches!(mechanic.verify_meet_otp(&code).await, Err(SessionError::NotEligible(_))));
    assert_eq!(server.otp_calls(), calls);
    assert!(mechanic.snapshot().await.unwrap().meet_verified);
}

#[tokio::test(start_paused = true)]
async fn test_feedback_requires_completion() {
    let server = MockServer::new();
    let booking = pending_booking(&server);
    let owner = open_as(&server, "owner-1", Role::Owner, &booking.id, Coordinates::new(0.0, 0.0)).await;

    assert!(matches!(owner.submit_feedback(4, None).await, Err(SessionError::NotEligible(_))));
    assert!(matches!(owner.submit_feedback(9, None).await, Err(SessionError::Validation(_))));
    assert!(server.reviews().is_empty());
}
