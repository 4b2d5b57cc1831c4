//! Relay configuration.
//!
//! Sources, highest precedence first: `POS_RELAY_*` environment variables,
//! the JSON file named by `POS_RELAY_CONFIG`, built-in defaults.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::api::{
    extract_token_from_connection_string, extract_url_from_connection_string, normalize_base_url,
};
use crate::dispatcher::PrintChannel;
use crate::error::{RelayError, RelayResult};
use crate::escpos::PaperWidth;
use crate::notify::AlertDurations;
use crate::receipt_renderer::{ReceiptKind, RenderOptions, StoreProfile};

pub const ENV_CONFIG_FILE: &str = "POS_RELAY_CONFIG";
const ENV_API_URL: &str = "POS_RELAY_API_URL";
const ENV_API_TOKEN: &str = "POS_RELAY_API_TOKEN";
const ENV_CONNECTION_STRING: &str = "POS_RELAY_CONNECTION_STRING";
const ENV_POLL_INTERVAL: &str = "POS_RELAY_POLL_INTERVAL_SECS";
const ENV_PRINTER_SCHEME: &str = "POS_RELAY_PRINTER_SCHEME";
const ENV_PRINTER_PACKAGE: &str = "POS_RELAY_PRINTER_PACKAGE";
const ENV_PAPER_WIDTH: &str = "POS_RELAY_PAPER_WIDTH_MM";
const ENV_STORE_NAME: &str = "POS_RELAY_STORE_NAME";
const ENV_STORE_ADDRESS: &str = "POS_RELAY_STORE_ADDRESS";
const ENV_AUTO_PRINT: &str = "POS_RELAY_AUTO_PRINT";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrinterConfig {
    /// URI scheme registered by the printer app.
    pub scheme: String,
    /// Package name of the printer app.
    pub package: String,
    pub paper_width_mm: u32,
}

impl Default for PrinterConfig {
    fn default() -> Self {
        Self {
            scheme: "rawbt".to_string(),
            package: "ru.a402d.rawbtprinter".to_string(),
            paper_width_mm: 58,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub api_base_url: String,
    pub api_token: Option<String>,
    pub poll_interval_secs: u64,
    pub request_timeout_secs: u64,
    pub store: StoreProfile,
    pub printer: PrinterConfig,
    pub utc_offset_minutes: i32,
    pub alert_duration_secs: u64,
    pub network_error_duration_secs: u64,
    /// Channels printed automatically for new and grown orders. Empty means
    /// printing happens only on request.
    pub auto_print: Vec<PrintChannel>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8000/api".to_string(),
            api_token: None,
            poll_interval_secs: 3,
            request_timeout_secs: 10,
            store: StoreProfile::default(),
            printer: PrinterConfig::default(),
            utc_offset_minutes: 7 * 60,
            alert_duration_secs: 10,
            network_error_duration_secs: 8,
            auto_print: Vec::new(),
        }
    }
}

impl RelayConfig {
    /// Load from file (if `POS_RELAY_CONFIG` is set) and process environment.
    pub fn load() -> RelayResult<Self> {
        let mut config = match std::env::var(ENV_CONFIG_FILE) {
            Ok(path) if !path.trim().is_empty() => Self::from_file(Path::new(path.trim()))?,
            _ => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        info!(
            api_base_url = %config.api_base_url,
            poll_interval_secs = config.poll_interval_secs,
            paper_width_mm = config.printer.paper_width_mm,
            auto_print = ?config.auto_print,
            "Configuration loaded"
        );
        Ok(config)
    }

    pub fn from_file(path: &Path) -> RelayResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        Ok(config)
    }

    /// Override fields from `lookup` (normally the process environment).
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(raw) = get(ENV_CONNECTION_STRING) {
            match extract_url_from_connection_string(&raw) {
                Some(url) => self.api_base_url = url,
                None => warn!("Connection string has no usable url"),
            }
            if let Some(token) = extract_token_from_connection_string(&raw) {
                self.api_token = Some(token);
            }
        }
        if let Some(url) = get(ENV_API_URL) {
            self.api_base_url = url;
        }
        if let Some(token) = get(ENV_API_TOKEN) {
            self.api_token = Some(token);
        }
        if let Some(raw) = get(ENV_POLL_INTERVAL) {
            match raw.parse() {
                Ok(secs) => self.poll_interval_secs = secs,
                Err(_) => warn!(value = %raw, "Ignoring invalid {ENV_POLL_INTERVAL}"),
            }
        }
        if let Some(scheme) = get(ENV_PRINTER_SCHEME) {
            self.printer.scheme = scheme;
        }
        if let Some(package) = get(ENV_PRINTER_PACKAGE) {
            self.printer.package = package;
        }
        if let Some(raw) = get(ENV_PAPER_WIDTH) {
            match raw.parse() {
                Ok(mm) => self.printer.paper_width_mm = mm,
                Err(_) => warn!(value = %raw, "Ignoring invalid {ENV_PAPER_WIDTH}"),
            }
        }
        if let Some(name) = get(ENV_STORE_NAME) {
            self.store.name = name;
        }
        if let Some(address) = get(ENV_STORE_ADDRESS) {
            self.store.address = Some(address);
        }
        if let Some(raw) = get(ENV_AUTO_PRINT) {
            self.auto_print = raw
                .split(',')
                .filter(|label| !label.trim().is_empty())
                .filter_map(|label| {
                    let channel = PrintChannel::from_label(label);
                    if channel.is_none() {
                        warn!(channel = %label.trim(), "Ignoring unknown auto-print channel");
                    }
                    channel
                })
                .collect();
        }
        self.api_base_url = normalize_base_url(&self.api_base_url);
    }

    pub fn validate(&self) -> RelayResult<()> {
        if self.api_base_url.trim().is_empty() {
            return Err(RelayError::Config("api_base_url is empty".to_string()));
        }
        if self.poll_interval_secs == 0 {
            return Err(RelayError::Config(
                "poll_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.printer.scheme.trim().is_empty() || self.printer.package.trim().is_empty() {
            return Err(RelayError::Config(
                "printer scheme and package are required".to_string(),
            ));
        }
        Ok(())
    }

    pub fn alert_durations(&self) -> AlertDurations {
        AlertDurations {
            activity: Duration::from_secs(self.alert_duration_secs),
            network_error: Duration::from_secs(self.network_error_duration_secs),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn paper_width(&self) -> PaperWidth {
        PaperWidth::from_mm(self.printer.paper_width_mm)
    }

    /// Render options for one receipt kind with this store's profile.
    pub fn render_options(&self, kind: ReceiptKind) -> RenderOptions {
        RenderOptions::for_kind(kind, self.store.clone(), self.paper_width())
            .with_utc_offset(self.utc_offset_minutes)
    }
}
