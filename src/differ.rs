//! Order activity detection by snapshot comparison.
//!
//! The backend has no push channel, so every poll fetches the active orders
//! and compares `order id -> item count` against the previous poll.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::api::BackendApi;
use crate::models::Order;

/// `order id -> item count` at one poll.
pub type Snapshot = HashMap<i64, usize>;

/// One order worth alerting about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderActivity {
    pub order_id: i64,
    /// "Meja 12", "Takeaway A-3", ...
    pub location: String,
    pub item_count: usize,
    /// Items added since the previous snapshot; equals `item_count` for new orders.
    pub added_items: usize,
}

impl OrderActivity {
    fn from_order(order: &Order, previous: usize) -> Self {
        let item_count = order.item_count();
        Self {
            order_id: order.id,
            location: order.location_descriptor(),
            item_count,
            added_items: item_count.saturating_sub(previous),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeltaResult {
    /// First successful poll; nothing is reported.
    Seeded { order_count: usize },
    NoActivity,
    Activity {
        /// Increases with every activity result, used to drop duplicates.
        seq: u64,
        new_orders: Vec<OrderActivity>,
        grown_orders: Vec<OrderActivity>,
    },
    FetchFailed {
        error: String,
        /// Backend unreachable or failing server-side, as opposed to an
        /// answer we could not use.
        network: bool,
        /// True only for the first failure of an outage.
        notify: bool,
    },
    /// A newer poll finished first; this result was discarded.
    Superseded,
}

impl DeltaResult {
    pub fn has_activity(&self) -> bool {
        matches!(self, DeltaResult::Activity { .. })
    }
}

pub fn build_snapshot(orders: &[Order]) -> Snapshot {
    orders.iter().map(|o| (o.id, o.item_count())).collect()
}

/// Split `orders` into new and grown relative to `previous`, keeping the
/// backend's order. Shrunk and unchanged orders are not reported.
pub fn classify(previous: &Snapshot, orders: &[Order]) -> (Vec<OrderActivity>, Vec<OrderActivity>) {
    let mut new_orders = Vec::new();
    let mut grown_orders = Vec::new();
    for order in orders {
        match previous.get(&order.id) {
            None => new_orders.push(OrderActivity::from_order(order, 0)),
            Some(&old) if order.item_count() > old => {
                grown_orders.push(OrderActivity::from_order(order, old))
            }
            Some(_) => {}
        }
    }
    (new_orders, grown_orders)
}

#[derive(Debug, Default)]
struct DifferState {
    snapshot: Option<Snapshot>,
    outage_notified: bool,
    seq: u64,
    /// Ticket of the newest poll whose result was applied.
    applied_ticket: u64,
}

pub struct OrderSnapshotDiffer {
    backend: Arc<dyn BackendApi>,
    tickets: AtomicU64,
    state: Mutex<DifferState>,
}

impl OrderSnapshotDiffer {
    pub fn new(backend: Arc<dyn BackendApi>) -> Self {
        Self {
            backend,
            tickets: AtomicU64::new(0),
            state: Mutex::new(DifferState::default()),
        }
    }

    /// Fetch active orders once and classify them against the stored snapshot.
    ///
    /// Overlapping calls are allowed. Results are applied in ticket order; a
    /// poll that finishes after a newer one returns [`DeltaResult::Superseded`].
    pub async fn poll(&self) -> DeltaResult {
        let ticket = self.tickets.fetch_add(1, Ordering::SeqCst) + 1;
        let fetched = self.backend.fetch_active_orders().await;

        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        if ticket < state.applied_ticket {
            debug!(ticket, applied = state.applied_ticket, "Discarding stale poll result");
            return DeltaResult::Superseded;
        }
        state.applied_ticket = ticket;

        let orders = match fetched {
            Ok(orders) => orders,
            Err(e) => {
                let error = e.to_string();
                let network = e.is_network();
                warn!(error = %error, network, "Active order poll failed");
                let notify = !state.outage_notified;
                if notify {
                    info!("Backend outage started");
                    state.outage_notified = true;
                }
                return DeltaResult::FetchFailed {
                    error,
                    network,
                    notify,
                };
            }
        };

        if state.outage_notified {
            info!("Backend reachable again");
            state.outage_notified = false;
        }

        let fresh = build_snapshot(&orders);
        let Some(previous) = state.snapshot.as_ref() else {
            let order_count = fresh.len();
            info!(order_count, "Seeded order snapshot");
            state.snapshot = Some(fresh);
            return DeltaResult::Seeded { order_count };
        };

        let (new_orders, grown_orders) = classify(previous, &orders);
        if new_orders.is_empty() && grown_orders.is_empty() {
            if previous.len() != fresh.len() {
                debug!(
                    before = previous.len(),
                    after = fresh.len(),
                    "Active order set changed size"
                );
                state.snapshot = Some(fresh);
            }
            return DeltaResult::NoActivity;
        }

        state.snapshot = Some(fresh);
        state.seq += 1;
        info!(
            seq = state.seq,
            new = new_orders.len(),
            grown = grown_orders.len(),
            "Order activity detected"
        );
        DeltaResult::Activity {
            seq: state.seq,
            new_orders,
            grown_orders,
        }
    }

    /// Copy of the stored snapshot, `None` before the first successful poll.
    pub fn snapshot(&self) -> Option<Snapshot> {
        self.state
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .snapshot
            .clone()
    }

    pub fn in_outage(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .outage_notified
    }
}
