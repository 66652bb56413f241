use mechbook_core::{LocationError, ServiceError};
use std::future::Future;
use std::ops::ControlFlow;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, warn};

pub const MIN_PERIOD: Duration = Duration::from_millis(100);

/// Result of one background cycle. Background work never fails loudly:
/// a cycle either applied its result or was skipped until the next tick.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Applied,
    Skipped(SkipReason),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    Service(ServiceError),
    Location(LocationError),
    /// A newer response was already applied
    Stale,
    NotTrackable,
    Closed,
}

impl TickOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, TickOutcome::Applied)
    }
}

/// A periodic task owned by a handle. Dropping or cancelling the handle
/// aborts the task; it never fires again afterwards.
///
/// The first tick happens one full period after spawning. A zero period
/// is raised to `MIN_PERIOD`.
pub struct RepeatingTask {
    name: &'static str,
    handle: JoinHandle<()>,
}

impl RepeatingTask {
    pub fn spawn<F, Fut>(name: &'static str, period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ControlFlow<()>> + Send + 'static,
    {
        if period < MIN_PERIOD {
            warn!(task = name, period_ms = period.as_millis() as u64, "Period too short, using minimum");
        }
        let period = period.max(MIN_PERIOD);

        let handle = tokio::spawn(async move {
            let mut interval = time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if tick().await.is_break() {
                    debug!(task = name, "Repeating task finished");
                    break;
                }
            }
        });

        debug!(task = name, period_ms = period.as_millis() as u64, "Repeating task started");
        Self { name, handle }
    }

    pub fn cancel(self) {
        // Drop does the work.
    }
}

impl Drop for RepeatingTask {
    fn drop(&mut self) {
        self.handle.abort();
        debug!(task = self.name, "Repeating task cancelled");
    }
}
