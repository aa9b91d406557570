//! Periodic service trait and timer driver.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// Work that is driven by a periodic timer.
///
/// # Lifecycle
///
/// 1. Construction: the service is built and wrapped in an `Arc`
/// 2. Driving: [`run_periodic`] calls `tick()` once per interval
/// 3. Shutdown: the driver returns when the shutdown channel flips to `true`
///
/// Only one driver should call `tick()` for a given service; ticks never
/// overlap because the driver awaits each one before scheduling the next.
#[async_trait]
pub trait PeriodicService: Send + Sync {
    /// Returns the name of this service (for logging).
    fn name(&self) -> &str;

    /// Performs one unit of periodic work.
    async fn tick(&self);
}

/// Calls `service.tick()` every `interval` until `shutdown` becomes true.
///
/// The first tick runs immediately. A tick that overruns the interval delays
/// the next one rather than causing a burst. Returns the number of ticks run.
pub async fn run_periodic<S>(
    service: Arc<S>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> u64
where
    S: PeriodicService + ?Sized,
{
    let mut timer = tokio::time::interval(interval);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut ticks = 0u64;

    info!(service = service.name(), ?interval, "Starting periodic service");

    loop {
        if *shutdown.borrow() {
            break;
        }

        tokio::select! {
            _ = timer.tick() => {
                service.tick().await;
                ticks += 1;
                debug!(service = service.name(), ticks, "Periodic tick complete");
            }
            changed = shutdown.changed() => {
                // Sender dropped counts as shutdown.
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    info!(service = service.name(), ticks, "Periodic service stopped");
    ticks
}
