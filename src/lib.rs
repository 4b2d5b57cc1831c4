//! POS order relay
//!
//! Polls the back-office API for active orders, alerts staff when orders
//! arrive or grow, and renders ESC/POS receipts that are handed to the
//! printer app through an `intent:` URI.

use std::sync::Arc;

use anyhow::Context as _;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub mod api;
pub mod config;
pub mod diagnostics;
pub mod differ;
pub mod dispatcher;
pub mod error;
pub mod escpos;
pub mod events;
pub mod models;
pub mod notify;
pub mod poller;
pub mod receipt_renderer;
pub mod tracker;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use api::{BackendApi, HttpBackend};
pub use config::RelayConfig;
pub use differ::{DeltaResult, OrderActivity, OrderSnapshotDiffer};
pub use dispatcher::{PrintChannel, PrintDispatcher, PrintOutcome};
pub use error::{RelayError, RelayResult};
pub use events::{BusEvent, EventBus, Topic};
pub use notify::{NotificationCoordinator, Notifier};
pub use tracker::{DedupChannel, PrintSessionTracker};
pub use transport::{IntentUriTransport, PrintTransport};

use models::MenuCatalog;
use notify::LogNotifier;

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,pos_order_relay=debug"));

    diagnostics::prune_old_logs();

    let log_dir = diagnostics::get_log_dir();
    std::fs::create_dir_all(&log_dir).ok();

    let file_appender = tracing_appender::rolling::daily(&log_dir, diagnostics::LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true);
    let console_layer = fmt::layer().with_target(true);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    // The relay runs until process exit; dropping the guard would stop file logging.
    std::mem::forget(guard);
}

/// Binary entry point: logging, config, runtime, then serve until Ctrl-C.
pub fn run() -> anyhow::Result<()> {
    init_tracing();
    info!("Starting POS order relay v{}", env!("CARGO_PKG_VERSION"));
    debug!(about = %diagnostics::get_about_info(), "Build info");

    let config = RelayConfig::load().context("Failed to load relay configuration")?;
    debug!(config = %diagnostics::redacted_config(&config), "Effective configuration");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;
    runtime.block_on(serve(config))
}

async fn serve(config: RelayConfig) -> anyhow::Result<()> {
    let backend: Arc<dyn BackendApi> =
        Arc::new(HttpBackend::new(&config).context("Failed to create backend client")?);
    let bus = Arc::new(EventBus::new());
    let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier);
    let tracker = Arc::new(PrintSessionTracker::new());
    let transport: Arc<dyn PrintTransport> = Arc::new(IntentUriTransport::new(
        config.printer.scheme.clone(),
        config.printer.package.clone(),
    ));

    let dispatcher = Arc::new(PrintDispatcher::new(
        backend.clone(),
        transport,
        tracker.clone(),
        bus.clone(),
        notifier.clone(),
        &config,
    ));
    match backend.fetch_menu().await {
        Ok(menu) => dispatcher.set_catalog(MenuCatalog::new(menu)),
        Err(e) => warn!(error = %e, "Menu catalog unavailable, item names fall back to ids"),
    }

    bus.subscribe(Topic::StateChanged, |event| {
        debug!(event = ?event, "State changed");
    });
    if !config.auto_print.is_empty() {
        let channels = config.auto_print.clone();
        let dispatcher = dispatcher.clone();
        let handle = tokio::runtime::Handle::current();
        bus.subscribe(Topic::NewOrder, move |event| {
            let BusEvent::NewOrder {
                new_order_ids,
                grown_order_ids,
            } = event
            else {
                return;
            };
            let order_ids: Vec<i64> = new_order_ids
                .iter()
                .chain(grown_order_ids)
                .copied()
                .collect();
            let dispatcher = dispatcher.clone();
            let channels = channels.clone();
            handle.spawn(async move {
                let printed = dispatcher.auto_print(&order_ids, &channels).await;
                debug!(orders = order_ids.len(), printed, "Auto-print finished");
            });
        });
    }

    let differ = Arc::new(OrderSnapshotDiffer::new(backend));
    let coordinator = Arc::new(NotificationCoordinator::new(
        notifier,
        bus,
        config.alert_durations(),
    ));
    let cancel = CancellationToken::new();
    let poller = poller::start_order_poller(
        differ.clone(),
        coordinator,
        config.poll_interval(),
        cancel.clone(),
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Shutdown requested");
    cancel.cancel();
    if let Err(e) = poller.await {
        warn!(error = %e, "Order poller ended abnormally");
    }
    info!(status = %diagnostics::get_relay_status(&differ, &tracker), "Relay stopped");
    Ok(())
}
