mod command;

use anyhow::{bail, Context};
use command::Command;
use mechbook_core::{FixedLocationProvider, Identity};
use mechbook_session::{BookingSession, OtpAction, SessionConfig, SessionError};
use mechbook_shared::SessionEvent;
use mechbook_store::{Config, HttpBookingService};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn session_config(config: &Config) -> SessionConfig {
    SessionConfig {
        refresh_interval: Duration::from_secs(config.polling.refresh_interval_secs),
        location_interval: Duration::from_secs(config.polling.location_interval_secs),
        location_timeout: Duration::from_secs(config.polling.location_timeout_secs),
        max_pages: config.api.max_pages,
    }
}

async fn run_command(session: &BookingSession, command: Command) -> Result<(), SessionError> {
    match command {
        Command::Show | Command::Quit => {}
        Command::Refresh => {
            let outcome = session.refresh().await;
            tracing::info!(?outcome, "Manual refresh");
        }
        Command::Respond(decision) => session.respond(session.booking_id(), decision).await?,
        Command::VerifyMeet(code) => {
            session.verify_meet_otp(&code).await?;
        }
        Command::RequestCompletion => {
            let booking = session.generate_complete_otp().await?;
            if let Some(code) = booking.complete_otp {
                println!("Completion code: {}", code.expose());
            }
        }
        Command::VerifyCompletion(code) => {
            session.verify_complete_otp(&code).await?;
        }
        Command::EnableLocation => {
            let permission = session.enable_location().await?;
            tracing::info!(?permission, "Location permission");
        }
        Command::Review { rating, comment } => session.submit_feedback(rating, comment).await?,
    }
    Ok(())
}

async fn print_view(session: &BookingSession) {
    let view = session.view().await;
    match &view.booking {
        Some(booking) => println!(
            "[{}] {} {} {}: {}",
            booking.status, booking.vehicle_make, booking.vehicle_model, booking.id, booking.issue_description
        ),
        None if view.missing => println!("Booking {} not found", session.booking_id()),
        None => println!("Loading booking {}", session.booking_id()),
    }
    match &view.otp {
        OtpAction::ShowMeetCode(code) => println!("  share this code with the mechanic: {}", code.expose()),
        OtpAction::ShowCompletionCode(code) => {
            println!("  share this code to confirm completion: {}", code.expose())
        }
        other => println!("  next step: {:?}", other),
    }
    if view.tracking {
        println!("  owner at {:?}, mechanic at {:?}", view.owner_position, view.mechanic_position);
    }
    if let Some(error) = &view.error {
        println!("  error: {}", error);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mechbook_app=debug,mechbook_session=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let Some(booking_id) = std::env::args().nth(1) else {
        bail!("usage: mechbook-app <booking-id>");
    };

    let config = Config::load().context("Failed to load config")?;
    let identity = Identity::from_bearer(&config.auth.token).context("Invalid bearer token")?;
    tracing::info!(user_id = %identity.user_id, role = %identity.role, %booking_id, "Opening booking session");

    let service = HttpBookingService::new(&config.api, &identity)?;
    let locator = FixedLocationProvider::new(config.device.position());

    let session = BookingSession::open(
        identity,
        booking_id,
        Arc::new(service),
        Arc::new(locator),
        session_config(&config),
    )
    .await;
    let mut events = session.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    print_view(&session).await;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(SessionEvent::FeedbackRequested { booking_id }) => {
                    println!("Booking {} is complete. Leave a review with: review <1-5> [comment]", booking_id);
                }
                Ok(event) => {
                    tracing::debug!(?event, "Session event");
                    print_view(&session).await;
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Dropped session events");
                }
                Err(RecvError::Closed) => break,
            },
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match Command::parse(&line) {
                    Ok(Command::Quit) => break,
                    Ok(command) => {
                        if let Err(e) = run_command(&session, command).await {
                            if e.is_user_visible() {
                                println!("  {}", e);
                            }
                        }
                        print_view(&session).await;
                    }
                    Err(message) => println!("  {}", message),
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    tracing::info!("Closing booking session");
    session.close();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::{File, FileFormat};

    #[test]
    fn test_session_config_from_polling_section() {
        let config: Config = config::Config::builder()
            .add_source(File::from_str(
                r#"
                [api]
                base_url = "http://localhost:5000/api"
                max_pages = 3

                [auth]
                token = ""

                [polling]
                refresh_interval_secs = 2
                "#,
                FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        let session = session_config(&config);
        assert_eq!(session.refresh_interval, Duration::from_secs(2));
        assert_eq!(session.location_interval, Duration::from_secs(5));
        assert_eq!(session.location_timeout, Duration::from_secs(10));
        assert_eq!(session.max_pages, 3);
    }
}
