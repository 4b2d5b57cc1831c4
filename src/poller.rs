//! Fixed-interval order polling loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use crate::differ::OrderSnapshotDiffer;
use crate::notify::NotificationCoordinator;

/// Poll immediately, then every `interval`, until `cancel` fires.
///
/// Each tick runs in its own task so a slow request never delays the next
/// tick. The returned handle resolves once the loop has stopped and the
/// polls already in flight have finished.
pub fn start_order_poller(
    differ: Arc<OrderSnapshotDiffer>,
    coordinator: Arc<NotificationCoordinator>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Order poller started (interval: {}ms)", interval.as_millis());
        let in_flight = TaskTracker::new();
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let differ = differ.clone();
                    let coordinator = coordinator.clone();
                    in_flight.spawn(async move {
                        let delta = differ.poll().await;
                        coordinator.on_delta(&delta);
                    });
                }
            }
        }

        in_flight.close();
        debug!(pending = in_flight.len(), "Waiting for in-flight polls");
        in_flight.wait().await;
        info!("Order poller stopped");
    })
}
