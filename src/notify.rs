//! User-facing alerts for order activity and print results.

use std::collections::BTreeSet;
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::differ::{DeltaResult, OrderActivity};
use crate::events::{BusEvent, EventBus};

const NOTICE_DURATION: Duration = Duration::from_secs(4);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NotificationAction {
    ViewOrder { order_id: i64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub action: Option<NotificationAction>,
    /// Auto-dismiss delay.
    pub duration: Duration,
}

impl Notification {
    pub fn new(title: impl Into<String>, description: impl Into<String>, duration: Duration) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            description: description.into(),
            action: None,
            duration,
        }
    }

    pub fn with_view_order(mut self, order_id: i64) -> Self {
        self.action = Some(NotificationAction::ViewOrder { order_id });
        self
    }

    pub fn new_order(activity: &OrderActivity, duration: Duration) -> Self {
        Self::new(
            "Pesanan baru",
            format!("{} ({} item)", activity.location, activity.item_count),
            duration,
        )
        .with_view_order(activity.order_id)
    }

    pub fn items_added(activity: &OrderActivity, duration: Duration) -> Self {
        Self::new(
            "Item baru ditambahkan",
            format!("{} item baru di {}", activity.added_items, activity.location),
            duration,
        )
        .with_view_order(activity.order_id)
    }

    pub fn network_error(error: &str, duration: Duration) -> Self {
        Self::new(
            "Koneksi ke server terputus",
            format!("Gagal memuat pesanan: {error}"),
            duration,
        )
    }

    pub fn invalid_response(error: &str, duration: Duration) -> Self {
        Self::new(
            "Data pesanan tidak valid",
            format!("Server mengirim data yang tidak bisa dibaca: {error}"),
            duration,
        )
    }

    pub fn nothing_to_print(channel: &str) -> Self {
        Self::new(
            "Tidak ada item baru",
            format!("Semua item sudah dicetak ke {channel}"),
            NOTICE_DURATION,
        )
    }

    pub fn print_failed() -> Self {
        Self::new(
            "Gagal mencetak",
            "Periksa aplikasi printer lalu coba lagi",
            NOTICE_DURATION,
        )
    }
}

/// Output side of the alerts: sound and toast.
pub trait Notifier: Send + Sync {
    /// Play the alert cue. Errors are reported but never fatal.
    fn play_alert(&self) -> Result<(), String>;

    fn show(&self, notification: Notification);
}

/// Headless notifier: terminal bell plus a log line per notification.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn play_alert(&self) -> Result<(), String> {
        let mut stderr = std::io::stderr();
        stderr
            .write_all(b"\x07")
            .and_then(|_| stderr.flush())
            .map_err(|e| format!("Failed to ring terminal bell: {e}"))
    }

    fn show(&self, notification: Notification) {
        let order_id = notification.action.as_ref().map(|a| match a {
            NotificationAction::ViewOrder { order_id } => *order_id,
        });
        info!(
            title = %notification.title,
            description = %notification.description,
            order_id = ?order_id,
            duration_secs = notification.duration.as_secs(),
            "Notification"
        );
    }
}

/// Keeps notifications in memory.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    shown: Mutex<Vec<Notification>>,
    alerts: AtomicUsize,
    alert_fails: AtomicBool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_alert_failure(&self, fail: bool) {
        self.alert_fails.store(fail, Ordering::SeqCst);
    }

    pub fn shown(&self) -> Vec<Notification> {
        self.shown
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn titles(&self) -> Vec<String> {
        self.shown().into_iter().map(|n| n.title).collect()
    }

    /// Alert attempts, failed ones included.
    pub fn alert_count(&self) -> usize {
        self.alerts.load(Ordering::SeqCst)
    }
}

impl Notifier for RecordingNotifier {
    fn play_alert(&self) -> Result<(), String> {
        self.alerts.fetch_add(1, Ordering::SeqCst);
        if self.alert_fails.load(Ordering::SeqCst) {
            return Err("audio playback blocked".to_string());
        }
        Ok(())
    }

    fn show(&self, notification: Notification) {
        self.shown
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(notification);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlertDurations {
    pub activity: Duration,
    pub network_error: Duration,
}

impl Default for AlertDurations {
    fn default() -> Self {
        Self {
            activity: Duration::from_secs(10),
            network_error: Duration::from_secs(8),
        }
    }
}

/// Activity seqs already alerted. Every seq up to `floor` is handled;
/// `above` holds handled seqs past a gap, so a result that overtook an
/// older one does not hide it.
#[derive(Debug, Default)]
struct HandledSeqs {
    floor: u64,
    above: BTreeSet<u64>,
}

impl HandledSeqs {
    /// Returns false when `seq` was handled before.
    fn insert(&mut self, seq: u64) -> bool {
        if seq <= self.floor || !self.above.insert(seq) {
            return false;
        }
        while self.above.remove(&(self.floor + 1)) {
            self.floor += 1;
        }
        true
    }
}

/// Turns differ results into alerts and bus events.
pub struct NotificationCoordinator {
    notifier: Arc<dyn Notifier>,
    bus: Arc<EventBus>,
    durations: AlertDurations,
    handled: Mutex<HandledSeqs>,
}

impl NotificationCoordinator {
    pub fn new(notifier: Arc<dyn Notifier>, bus: Arc<EventBus>, durations: AlertDurations) -> Self {
        Self {
            notifier,
            bus,
            durations,
            handled: Mutex::new(HandledSeqs::default()),
        }
    }

    fn alert(&self, order_id: i64) {
        if let Err(e) = self.notifier.play_alert() {
            warn!(order_id, error = %e, "Alert sound failed");
        }
    }

    /// React to one poll result. Returns the number of notifications shown.
    pub fn on_delta(&self, delta: &DeltaResult) -> usize {
        match delta {
            DeltaResult::Activity {
                seq,
                new_orders,
                grown_orders,
            } => {
                let first_time = self
                    .handled
                    .lock()
                    .unwrap_or_else(|p| p.into_inner())
                    .insert(*seq);
                if !first_time {
                    debug!(seq, "Delta already handled");
                    return 0;
                }
                for activity in new_orders {
                    self.alert(activity.order_id);
                    self.notifier
                        .show(Notification::new_order(activity, self.durations.activity));
                }
                for activity in grown_orders {
                    self.alert(activity.order_id);
                    self.notifier
                        .show(Notification::items_added(activity, self.durations.activity));
                }
                let shown = new_orders.len() + grown_orders.len();
                if shown > 0 {
                    self.bus.publish(BusEvent::NewOrder {
                        new_order_ids: new_orders.iter().map(|a| a.order_id).collect(),
                        grown_order_ids: grown_orders.iter().map(|a| a.order_id).collect(),
                    });
                }
                shown
            }
            DeltaResult::FetchFailed {
                error,
                network,
                notify: true,
            } => {
                let duration = self.durations.network_error;
                let notification = if *network {
                    Notification::network_error(error, duration)
                } else {
                    Notification::invalid_response(error, duration)
                };
                self.notifier.show(notification);
                1
            }
            DeltaResult::FetchFailed { notify: false, .. }
            | DeltaResult::Seeded { .. }
            | DeltaResult::NoActivity
            | DeltaResult::Superseded => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Topic;

    fn activity(order_id: i64, location: &str, item_count: usize, added: usize) -> OrderActivity {
        OrderActivity {
            order_id,
            location: location.to_string(),
            item_count,
            added_items: added,
        }
    }

    fn setup() -> (Arc<RecordingNotifier>, Arc<EventBus>, NotificationCoordinator) {
        let notifier = Arc::new(RecordingNotifier::new());
        let bus = Arc::new(EventBus::new());
        let coordinator =
            NotificationCoordinator::new(notifier.clone(), bus.clone(), AlertDurations::default());
        (notifier, bus, coordinator)
    }

    #[test]
    fn test_activity_alerts_and_publishes() {
        let (notifier, bus, coordinator) = setup();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        bus.subscribe(Topic::NewOrder, move |e| sink.lock().unwrap().push(e.clone()));

        let delta = DeltaResult::Activity {
            seq: 1,
            new_orders: vec![activity(101, "Meja 7", 1, 1)],
            grown_orders: vec![activity(100, "Takeaway A-3", 3, 1)],
        };
        assert_eq!(coordinator.on_delta(&delta), 2);
        assert_eq!(notifier.alert_count(), 2);

        let shown = notifier.shown();
        assert_eq!(shown[0].title, "Pesanan baru");
        assert!(shown[0].description.contains("Meja 7"));
        assert_eq!(shown[0].action, Some(NotificationAction::ViewOrder { order_id: 101 }));
        assert_eq!(shown[0].duration, Duration::from_secs(10));
        assert_eq!(shown[1].title, "Item baru ditambahkan");
        assert!(shown[1].description.contains("Takeaway A-3"));

        assert_eq!(
            *events.lock().unwrap(),
            vec![BusEvent::NewOrder {
                new_order_ids: vec![101],
                grown_order_ids: vec![100],
            }]
        );
    }

    #[test]
    fn test_same_delta_is_not_alerted_twice() {
        let (notifier, _bus, coordinator) = setup();
        let delta = DeltaResult::Activity {
            seq: 4,
            new_orders: vec![activity(1, "Meja 1", 1, 1)],
            grown_orders: vec![],
        };
        assert_eq!(coordinator.on_delta(&delta), 1);
        assert_eq!(coordinator.on_delta(&delta), 0);
        assert_eq!(notifier.shown().len(), 1);
    }

    #[test]
    fn test_out_of_order_deltas_both_alert() {
        let (notifier, _bus, coordinator) = setup();
        let later = DeltaResult::Activity {
            seq: 2,
            new_orders: vec![activity(202, "Meja 202", 1, 1)],
            grown_orders: vec![],
        };
        let earlier = DeltaResult::Activity {
            seq: 1,
            new_orders: vec![activity(101, "Meja 101", 1, 1)],
            grown_orders: vec![],
        };
        assert_eq!(coordinator.on_delta(&later), 1);
        assert_eq!(coordinator.on_delta(&earlier), 1);
        assert_eq!(coordinator.on_delta(&later), 0);
        assert_eq!(coordinator.on_delta(&earlier), 0);

        let described: Vec<String> = notifier.shown().into_iter().map(|n| n.description).collect();
        assert_eq!(described, vec!["Meja 202 (1 item)", "Meja 101 (1 item)"]);
        assert_eq!(notifier.alert_count(), 2);
    }

    #[test]
    fn test_handled_seqs_collapse_behind_gaps() {
        let mut handled = HandledSeqs::default();
        assert!(handled.insert(3));
        assert!(handled.insert(1));
        assert_eq!(handled.floor, 1);
        assert!(handled.insert(2));
        assert_eq!(handled.floor, 3);
        assert!(handled.above.is_empty());
        assert!(!handled.insert(2));
    }

    #[test]
    fn test_seed_and_quiet_results_are_silent() {
        let (notifier, bus, coordinator) = setup();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        bus.subscribe(Topic::NewOrder, move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        coordinator.on_delta(&DeltaResult::Seeded { order_count: 5 });
        coordinator.on_delta(&DeltaResult::NoActivity);
        coordinator.on_delta(&DeltaResult::Superseded);
        coordinator.on_delta(&DeltaResult::FetchFailed {
            error: "x".to_string(),
            network: true,
            notify: false,
        });
        assert!(notifier.shown().is_empty());
        assert_eq!(notifier.alert_count(), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_network_error_notice_uses_its_duration() {
        let (notifier, _bus, coordinator) = setup();
        coordinator.on_delta(&DeltaResult::FetchFailed {
            error: "Cannot reach backend".to_string(),
            network: true,
            notify: true,
        });
        let shown = notifier.shown();
        assert_eq!(shown.len(), 1);
        assert_eq!(shown[0].title, "Koneksi ke server terputus");
        assert_eq!(shown[0].duration, Duration::from_secs(8));
        assert!(shown[0].action.is_none());
        assert_eq!(notifier.alert_count(), 0);
    }

    #[test]
    fn test_undecodable_response_is_not_called_a_disconnect() {
        let (notifier, _bus, coordinator) = setup();
        coordinator.on_delta(&DeltaResult::FetchFailed {
            error: "Invalid response from backend: invalid money value \"12.5\"".to_string(),
            network: false,
            notify: true,
        });
        let shown = notifier.shown();
        assert_eq!(shown.len(), 1);
        assert_eq!(shown[0].title, "Data pesanan tidak valid");
        assert!(shown[0].description.contains("12.5"));
    }

    #[test]
    fn test_failed_sound_still_shows_notification() {
        let (notifier, _bus, coordinator) = setup();
        notifier.set_alert_failure(true);
        let delta = DeltaResult::Activity {
            seq: 1,
            new_orders: vec![activity(9, "Meja 9", 2, 2)],
            grown_orders: vec![],
        };
        assert_eq!(coordinator.on_delta(&delta), 1);
        assert_eq!(notifier.titles(), vec!["Pesanan baru".to_string()]);
    }
}
