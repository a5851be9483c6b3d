//! Driving automatic turn progression with Tokio timers.
//!
//! In automatic mode the [`TurnClock`](crate::TurnClock) only arms an
//! [`Alarm`](crate::Alarm); something has to wait for it. [`drive_automatic`]
//! sleeps until each alarm's deadline and then fires it on the turn queue.
//!
//! The services are `!Send`, so the driver runs on a current-thread runtime
//! or inside a `LocalSet`.

use tokio::sync::Notify;
use tracing::info;

use crate::services::Services;

/// Why [`drive_automatic`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveOutcome {
    /// Progress is manual, so there is no alarm to wait for.
    Manual,
    /// The stop signal was notified.
    Stopped,
}

/// Run automatic turns until progress turns manual or `stop` is notified.
///
/// Returns immediately if progress is already manual.
pub async fn drive_automatic(services: &Services, stop: &Notify) -> DriveOutcome {
    loop {
        let Some(alarm) = services.turn_clock().pending_alarm() else {
            info!("Turn progression is manual, driver returning");
            return DriveOutcome::Manual;
        };
        tokio::select! {
            () = tokio::time::sleep_until(alarm.deadline) => {
                services
                    .queue()
                    .sync(|ctx| services.turn_clock().alarm_fired(ctx, alarm.generation));
            }
            () = stop.notified() => {
                info!("Turn driver stopped");
                return DriveOutcome::Stopped;
            }
        }
    }
}
