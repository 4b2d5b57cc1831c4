//! Print dispatch: select, render, hand off, then record.
//!
//! Every entry point is a failure boundary. Nothing here returns an error
//! to the caller; outcomes are reported through [`PrintOutcome`] and a
//! user notice.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::api::BackendApi;
use crate::config::RelayConfig;
use crate::escpos::ControlCodes;
use crate::events::{BusEvent, EventBus};
use crate::models::{MenuCatalog, Order, OrderItem, OrderStatus};
use crate::notify::{Notification, Notifier};
use crate::receipt_renderer::{render, render_preview, ReceiptKind, RenderOptions};
use crate::tracker::{DedupChannel, PrintSessionTracker};
use crate::transport::PrintTransport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrintChannel {
    Kitchen,
    MainChecker,
    PaymentReceipt,
    Bill,
}

impl PrintChannel {
    /// Parse "kitchen", "main_checker" / "main-checker", "payment_receipt", "bill".
    pub fn from_label(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().replace('-', "_").as_str() {
            "kitchen" => Some(Self::Kitchen),
            "main_checker" | "checker" => Some(Self::MainChecker),
            "payment_receipt" | "receipt" => Some(Self::PaymentReceipt),
            "bill" => Some(Self::Bill),
            _ => None,
        }
    }

    pub fn receipt_kind(self) -> ReceiptKind {
        match self {
            Self::Kitchen => ReceiptKind::KitchenChecker,
            Self::MainChecker => ReceiptKind::MainChecker,
            Self::PaymentReceipt => ReceiptKind::PaymentReceipt,
            Self::Bill => ReceiptKind::Bill,
        }
    }

    /// Channels that never print the same item twice.
    pub fn dedup(self) -> Option<DedupChannel> {
        match self {
            Self::Kitchen => Some(DedupChannel::Kitchen),
            Self::MainChecker => Some(DedupChannel::MainChecker),
            Self::PaymentReceipt | Self::Bill => None,
        }
    }
}

impl fmt::Display for PrintChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Kitchen => "kitchen",
            Self::MainChecker => "main_checker",
            Self::PaymentReceipt => "payment_receipt",
            Self::Bill => "bill",
        };
        f.write_str(label)
    }
}

/// Result of one background printed-flag batch. Ids are sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FlagSyncReport {
    pub succeeded: Vec<i64>,
    pub failed: Vec<i64>,
}

#[derive(Debug)]
pub enum PrintOutcome {
    Printed {
        channel: PrintChannel,
        item_ids: Vec<i64>,
        /// Background printed-flag batch. `None` for channels that do not
        /// flag items.
        flag_sync: Option<JoinHandle<FlagSyncReport>>,
    },
    NothingToPrint,
    Failed {
        reason: String,
    },
}

impl PrintOutcome {
    pub fn is_printed(&self) -> bool {
        matches!(self, PrintOutcome::Printed { .. })
    }
}

/// Set the printed flag of every item in parallel. One attempt per item;
/// failures are logged and collected. Publishes `StateChanged` when at
/// least one update went through.
pub async fn sync_printed_flags(
    backend: Arc<dyn BackendApi>,
    bus: Arc<EventBus>,
    item_ids: Vec<i64>,
) -> FlagSyncReport {
    let mut tasks = JoinSet::new();
    for item_id in item_ids {
        let backend = backend.clone();
        tasks.spawn(async move { (item_id, backend.mark_item_printed(item_id).await) });
    }

    let mut report = FlagSyncReport::default();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((item_id, Ok(()))) => report.succeeded.push(item_id),
            Ok((item_id, Err(e))) => {
                warn!(item_id, error = %e, "Failed to set printed flag");
                report.failed.push(item_id);
            }
            Err(e) => error!(error = %e, "Printed flag task did not finish"),
        }
    }
    report.succeeded.sort_unstable();
    report.failed.sort_unstable();

    if !report.succeeded.is_empty() {
        bus.publish(BusEvent::StateChanged {
            source: "printed_flags",
        });
    }
    debug!(
        succeeded = report.succeeded.len(),
        failed = report.failed.len(),
        "Printed flag sync finished"
    );
    report
}

pub struct PrintDispatcher {
    backend: Arc<dyn BackendApi>,
    transport: Arc<dyn PrintTransport>,
    tracker: Arc<PrintSessionTracker>,
    bus: Arc<EventBus>,
    notifier: Arc<dyn Notifier>,
    catalog: RwLock<Arc<MenuCatalog>>,
    codes: ControlCodes,
    config: RelayConfig,
}

impl PrintDispatcher {
    pub fn new(
        backend: Arc<dyn BackendApi>,
        transport: Arc<dyn PrintTransport>,
        tracker: Arc<PrintSessionTracker>,
        bus: Arc<EventBus>,
        notifier: Arc<dyn Notifier>,
        config: &RelayConfig,
    ) -> Self {
        Self {
            backend,
            transport,
            tracker,
            bus,
            notifier,
            catalog: RwLock::new(Arc::new(MenuCatalog::default())),
            codes: ControlCodes::escpos(),
            config: config.clone(),
        }
    }

    pub fn with_codes(mut self, codes: ControlCodes) -> Self {
        self.codes = codes;
        self
    }

    pub fn set_catalog(&self, catalog: MenuCatalog) {
        info!(menu_items = catalog.len(), "Menu catalog updated");
        *self.catalog.write().unwrap_or_else(|p| p.into_inner()) = Arc::new(catalog);
    }

    fn catalog(&self) -> Arc<MenuCatalog> {
        self.catalog
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn tracker(&self) -> &PrintSessionTracker {
        &self.tracker
    }

    fn options(&self, channel: PrintChannel, tendered: Option<i64>) -> RenderOptions {
        self.config
            .render_options(channel.receipt_kind())
            .with_tendered(tendered)
    }

    /// Print `order` on `channel`.
    ///
    /// Kitchen and main checker print only items not yet dispatched on that
    /// channel and record them after a successful hand-off. Payment receipt
    /// and bill always print the whole order. Zero-quantity lines are never
    /// printed, dispatched or flagged. `tendered` is the cash handed over,
    /// used for the change line.
    pub async fn print(
        &self,
        order: &Order,
        channel: PrintChannel,
        tendered: Option<i64>,
    ) -> PrintOutcome {
        let catalog = self.catalog();
        let mut items: Vec<OrderItem> = match channel.dedup() {
            Some(dedup) => self.tracker.select_eligible(order, dedup, &catalog),
            None => order.items.clone(),
        };
        items.retain(|item| item.quantity != 0);
        if items.is_empty() {
            info!(order_id = order.id, channel = %channel, "Nothing new to print");
            self.notifier
                .show(Notification::nothing_to_print(&channel.to_string()));
            return PrintOutcome::NothingToPrint;
        }

        let options = self.options(channel, tendered);
        let rendered = catch_unwind(AssertUnwindSafe(|| {
            render(order, &items, &options, &catalog, &self.codes)
        }));
        let receipt = match rendered {
            Ok(receipt) => receipt,
            Err(_) => return self.fail(order.id, channel, "receipt rendering panicked".to_string()),
        };
        debug!(
            order_id = order.id,
            channel = %channel,
            preview = %render_preview(&receipt, &self.codes),
            "Rendered receipt"
        );

        if let Err(e) = self.transport.send(&receipt) {
            return self.fail(order.id, channel, e.to_string());
        }

        let item_ids: Vec<i64> = items.iter().map(|i| i.id).collect();
        info!(
            order_id = order.id,
            channel = %channel,
            items = item_ids.len(),
            "Receipt handed to printer"
        );

        let flag_sync = channel.dedup().map(|dedup| {
            self.tracker.mark_dispatched(dedup, &item_ids);
            tokio::spawn(sync_printed_flags(
                self.backend.clone(),
                self.bus.clone(),
                item_ids.clone(),
            ))
        });

        PrintOutcome::Printed {
            channel,
            item_ids,
            flag_sync,
        }
    }

    /// Print the payment receipt, then mark the order completed on the
    /// backend. The status update is skipped when printing fails.
    pub async fn settle(&self, order: &Order, tendered: Option<i64>) -> PrintOutcome {
        let outcome = self.print(order, PrintChannel::PaymentReceipt, tendered).await;
        if !outcome.is_printed() {
            return outcome;
        }
        match self
            .backend
            .update_order_status(order.id, OrderStatus::Completed)
            .await
        {
            Ok(()) => {
                info!(order_id = order.id, "Order completed");
                self.bus.publish(BusEvent::StateChanged {
                    source: "order_status",
                });
            }
            Err(e) => warn!(order_id = order.id, error = %e, "Failed to complete order"),
        }
        outcome
    }

    /// Print each of `order_ids` on every channel in `channels`, using a
    /// fresh read of the active orders. Ids no longer active are skipped.
    pub async fn auto_print(&self, order_ids: &[i64], channels: &[PrintChannel]) -> usize {
        if order_ids.is_empty() || channels.is_empty() {
            return 0;
        }
        let orders = match self.backend.fetch_active_orders().await {
            Ok(orders) => orders,
            Err(e) => {
                warn!(error = %e, "Auto-print skipped, could not load orders");
                return 0;
            }
        };

        let mut printed = 0;
        for order in orders.iter().filter(|o| order_ids.contains(&o.id)) {
            for channel in channels {
                if self.print(order, *channel, None).await.is_printed() {
                    printed += 1;
                }
            }
        }
        printed
    }

    fn fail(&self, order_id: i64, channel: PrintChannel, reason: String) -> PrintOutcome {
        error!(order_id, channel = %channel, reason = %reason, "Print failed");
        self.notifier.show(Notification::print_failed());
        PrintOutcome::Failed { reason }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Topic;
    use crate::notify::RecordingNotifier;
    use crate::test_support::{catalog, menu, order_501, FakeBackend};
    use crate::transport::RecordingTransport;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Harness {
        backend: Arc<FakeBackend>,
        transport: Arc<RecordingTransport>,
        notifier: Arc<RecordingNotifier>,
        bus: Arc<EventBus>,
        dispatcher: PrintDispatcher,
    }

    fn harness() -> Harness {
        let backend = Arc::new(FakeBackend::new());
        let transport = Arc::new(RecordingTransport::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let bus = Arc::new(EventBus::new());
        let dispatcher = PrintDispatcher::new(
            backend.clone(),
            transport.clone(),
            Arc::new(PrintSessionTracker::new()),
            bus.clone(),
            notifier.clone(),
            &RelayConfig::default(),
        )
        .with_codes(ControlCodes::markers());
        dispatcher.set_catalog(catalog());
        Harness {
            backend,
            transport,
            notifier,
            bus,
            dispatcher,
        }
    }

    fn state_changes(bus: &EventBus) -> Arc<AtomicUsize> {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        bus.subscribe(Topic::StateChanged, move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        hits
    }

    async fn flags(outcome: PrintOutcome) -> (Vec<i64>, FlagSyncReport) {
        match outcome {
            PrintOutcome::Printed {
                item_ids,
                flag_sync: Some(handle),
                ..
            } => (item_ids, handle.await.unwrap()),
            other => panic!("expected a flagged print, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_order_501_kitchen_prints_food_once() {
        let h = harness();
        let mut order = order_501();

        let (ids, report) = flags(h.dispatcher.print(&order, PrintChannel::Kitchen, None).await).await;
        assert_eq!(ids, vec![2]);
        assert_eq!(report.succeeded, vec![2]);
        let sent = h.transport.sent();
        assert!(sent[0].contains("Croissant"));
        assert!(!sent[0].contains("Latte"));
        assert!(sent[0].contains("CHECKER DAPUR"));

        order.items.push(OrderItem {
            id: 3,
            menu_id: 3,
            quantity: 1,
            subtotal: 25000,
            ..OrderItem::default()
        });
        let (ids, _) = flags(h.dispatcher.print(&order, PrintChannel::Kitchen, None).await).await;
        assert_eq!(ids, vec![3]);
        let second = &h.transport.sent()[1];
        assert!(second.contains("Nasi Goreng"));
        assert!(!second.contains("Croissant"));
        assert_eq!(h.backend.printed_calls(), vec![2, 3]);
    }

    #[tokio::test]
    async fn test_nothing_to_print_skips_transport() {
        let h = harness();
        let order = order_501();
        h.dispatcher.tracker().mark_dispatched(DedupChannel::Kitchen, &[2]);

        let outcome = h.dispatcher.print(&order, PrintChannel::Kitchen, None).await;
        assert!(matches!(outcome, PrintOutcome::NothingToPrint));
        assert!(h.transport.sent().is_empty());
        assert_eq!(h.notifier.titles(), vec!["Tidak ada item baru".to_string()]);
    }

    #[tokio::test]
    async fn test_zero_quantity_lines_are_not_sent_or_flagged() {
        let h = harness();
        let mut order = order_501();
        order.items[1].quantity = 0;

        let outcome = h.dispatcher.print(&order, PrintChannel::Kitchen, None).await;
        assert!(matches!(outcome, PrintOutcome::NothingToPrint));
        assert!(h.transport.sent().is_empty());
        assert!(!h.dispatcher.tracker().is_dispatched(DedupChannel::Kitchen, 2));
        assert!(h.backend.printed_calls().is_empty());

        let (ids, _) = flags(h.dispatcher.print(&order, PrintChannel::MainChecker, None).await).await;
        assert_eq!(ids, vec![1]);
        assert!(!h.dispatcher.tracker().is_dispatched(DedupChannel::MainChecker, 2));

        order.items[1].quantity = 1;
        let (ids, _) = flags(h.dispatcher.print(&order, PrintChannel::Kitchen, None).await).await;
        assert_eq!(ids, vec![2]);
    }

    #[tokio::test]
    async fn test_catalog_loaded_from_backend_menu() {
        let h = harness();
        h.dispatcher.set_catalog(MenuCatalog::default());
        h.backend.set_menu(menu());
        h.dispatcher
            .set_catalog(MenuCatalog::new(h.backend.fetch_menu().await.unwrap()));

        let outcome = h.dispatcher.print(&order_501(), PrintChannel::Kitchen, None).await;
        assert!(outcome.is_printed());
        assert!(h.transport.sent()[0].contains("Croissant"));
    }

    #[tokio::test]
    async fn test_receipt_uses_configured_store_and_paper() {
        let backend = Arc::new(FakeBackend::new());
        let transport = Arc::new(RecordingTransport::new());
        let mut config = RelayConfig::default();
        config.store.name = "WARUNG SENJA".to_string();
        config.printer.paper_width_mm = 80;
        let dispatcher = PrintDispatcher::new(
            backend,
            transport.clone(),
            Arc::new(PrintSessionTracker::new()),
            Arc::new(EventBus::new()),
            Arc::new(RecordingNotifier::new()),
            &config,
        )
        .with_codes(ControlCodes::markers());
        dispatcher.set_catalog(catalog());

        assert!(dispatcher.print(&order_501(), PrintChannel::Bill, None).await.is_printed());
        let sent = transport.sent();
        assert!(sent[0].contains("WARUNG SENJA"));
        assert!(sent[0].contains(&"-".repeat(48)));
    }

    #[tokio::test]
    async fn test_transport_failure_leaves_tracker_for_retry() {
        let h = harness();
        let order = order_501();
        h.transport.set_failure(Some("no activity found to handle intent"));

        let outcome = h.dispatcher.print(&order, PrintChannel::MainChecker, None).await;
        match outcome {
            PrintOutcome::Failed { reason } => assert!(reason.contains("no activity")),
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(h.dispatcher.tracker().dispatched_count(DedupChannel::MainChecker), 0);
        assert_eq!(h.notifier.titles(), vec!["Gagal mencetak".to_string()]);
        assert!(h.backend.printed_calls().is_empty());

        h.transport.set_failure(None);
        let (ids, _) = flags(h.dispatcher.print(&order, PrintChannel::MainChecker, None).await).await;
        assert_eq!(ids, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_partial_flag_failure_keeps_dedup_and_publishes() {
        let h = harness();
        let changes = state_changes(&h.bus);
        h.backend.fail_item(1);

        let (_, report) =
            flags(h.dispatcher.print(&order_501(), PrintChannel::MainChecker, None).await).await;
        assert_eq!(report.succeeded, vec![2]);
        assert_eq!(report.failed, vec![1]);
        assert!(h.dispatcher.tracker().is_dispatched(DedupChannel::MainChecker, 1));
        assert_eq!(changes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_all_flags_failing_publishes_nothing() {
        let h = harness();
        let changes = state_changes(&h.bus);
        h.backend.fail_item(2);

        let (_, report) = flags(h.dispatcher.print(&order_501(), PrintChannel::Kitchen, None).await).await;
        assert!(report.succeeded.is_empty());
        assert_eq!(report.failed, vec![2]);
        assert_eq!(changes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_bill_and_receipt_always_print_everything() {
        let h = harness();
        let order = order_501();
        h.dispatcher
            .tracker()
            .mark_dispatched(DedupChannel::MainChecker, &[1, 2]);

        for _ in 0..2 {
            match h.dispatcher.print(&order, PrintChannel::Bill, None).await {
                PrintOutcome::Printed {
                    item_ids, flag_sync, ..
                } => {
                    assert_eq!(item_ids, vec![1, 2]);
                    assert!(flag_sync.is_none());
                }
                other => panic!("expected print, got {other:?}"),
            }
        }
        let outcome = h
            .dispatcher
            .print(&order, PrintChannel::PaymentReceipt, Some(50000))
            .await;
        assert!(outcome.is_printed());

        let sent = h.transport.sent();
        assert_eq!(sent.len(), 3);
        assert!(sent[0].contains("BILL") && !sent[0].contains("<BEEP>"));
        assert!(sent[2].contains("STRUK PEMBELIAN") && sent[2].contains("<BEEP>"));
        assert!(h.backend.printed_calls().is_empty());
    }

    #[tokio::test]
    async fn test_settle_completes_order_after_printing() {
        let h = harness();
        let changes = state_changes(&h.bus);
        let outcome = h.dispatcher.settle(&order_501(), Some(25000)).await;
        assert!(outcome.is_printed());
        assert_eq!(h.backend.status_calls(), vec![(501, OrderStatus::Completed)]);
        assert_eq!(changes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_auto_print_uses_fresh_orders() {
        let h = harness();
        h.backend
            .push_orders(vec![order_501(), crate::test_support::order(600, 1)]);

        let printed = h
            .dispatcher
            .auto_print(&[501, 999], &[PrintChannel::Kitchen, PrintChannel::MainChecker])
            .await;
        assert_eq!(printed, 2);
        assert_eq!(h.transport.sent().len(), 2);
        assert!(h.dispatcher.tracker().is_dispatched(DedupChannel::Kitchen, 2));
        assert_eq!(h.dispatcher.tracker().dispatched_count(DedupChannel::MainChecker), 2);
    }

    #[test]
    fn test_channel_labels() {
        assert_eq!(PrintChannel::from_label(" Main-Checker "), Some(PrintChannel::MainChecker));
        assert_eq!(PrintChannel::from_label("bill"), Some(PrintChannel::Bill));
        assert_eq!(PrintChannel::from_label("fax"), None);
        assert_eq!(PrintChannel::PaymentReceipt.to_string(), "payment_receipt");
    }

    #[tokio::test]
    async fn test_settle_skips_status_when_print_fails() {
        let h = harness();
        h.transport.set_failure(Some("boom"));
        let outcome = h.dispatcher.settle(&order_501(), None).await;
        assert!(matches!(outcome, PrintOutcome::Failed { .. }));
        assert!(h.backend.status_calls().is_empty());
    }
}
