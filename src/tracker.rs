//! Per-channel record of order items already sent to the printer.
//!
//! Lives only as long as the process. The backend printed flag is coarser
//! (any channel) and is not consulted when selecting items.

use std::collections::HashSet;
use std::fmt;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::{MenuCatalog, Order, OrderItem};

/// Print channels that deduplicate items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupChannel {
    Kitchen,
    MainChecker,
}

impl fmt::Display for DedupChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DedupChannel::Kitchen => f.write_str("kitchen"),
            DedupChannel::MainChecker => f.write_str("main_checker"),
        }
    }
}

/// One lock per channel. Never held across the printer hand-off.
#[derive(Debug, Default)]
pub struct PrintSessionTracker {
    kitchen: Mutex<HashSet<i64>>,
    main_checker: Mutex<HashSet<i64>>,
}

impl PrintSessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn set(&self, channel: DedupChannel) -> &Mutex<HashSet<i64>> {
        match channel {
            DedupChannel::Kitchen => &self.kitchen,
            DedupChannel::MainChecker => &self.main_checker,
        }
    }

    fn with_set<R>(&self, channel: DedupChannel, f: impl FnOnce(&mut HashSet<i64>) -> R) -> R {
        // A poisoned set is still a valid set of ids; keep using it.
        let mut guard = self
            .set(channel)
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }

    /// Items of `order` that may still be printed on `channel`, in order.
    ///
    /// Kitchen only takes food-category items; the main checker takes all.
    pub fn select_eligible(
        &self,
        order: &Order,
        channel: DedupChannel,
        catalog: &MenuCatalog,
    ) -> Vec<OrderItem> {
        let dispatched = self.with_set(channel, |set| set.clone());
        order
            .items
            .iter()
            .filter(|item| !dispatched.contains(&item.id))
            .filter(|item| match channel {
                DedupChannel::Kitchen => catalog.is_food(item),
                DedupChannel::MainChecker => true,
            })
            .cloned()
            .collect()
    }

    /// Record `item_ids` as dispatched on `channel`. Membership only grows.
    pub fn mark_dispatched(&self, channel: DedupChannel, item_ids: &[i64]) {
        let added = self.with_set(channel, |set| {
            item_ids.iter().filter(|id| set.insert(**id)).count()
        });
        debug!(channel = %channel, added, "Marked items as dispatched");
    }

    pub fn is_dispatched(&self, channel: DedupChannel, item_id: i64) -> bool {
        self.with_set(channel, |set| set.contains(&item_id))
    }

    pub fn dispatched_count(&self, channel: DedupChannel) -> usize {
        self.with_set(channel, |set| set.len())
    }

    /// Forget everything, on both channels.
    pub fn reset(&self) {
        for channel in [DedupChannel::Kitchen, DedupChannel::MainChecker] {
            self.with_set(channel, HashSet::clear);
        }
    }
}
