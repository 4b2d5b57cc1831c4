//! Diagnostics for the relay.
//!
//! - **About info**: version, build timestamp, git SHA, platform
//! - **Status**: outage flag, snapshot size, dispatched counts per channel
//! - **Config dump**: effective configuration with secrets redacted
//! - **Log rotation helpers**: used by `lib.rs` to configure rolling log files

use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::config::RelayConfig;
use crate::differ::OrderSnapshotDiffer;
use crate::tracker::{DedupChannel, PrintSessionTracker};

/// Maximum number of log files to retain.
pub const MAX_LOG_FILES: usize = 14;

/// File name prefix of the rolling log files.
pub const LOG_FILE_PREFIX: &str = "relay";

// ---------------------------------------------------------------------------
// About info
// ---------------------------------------------------------------------------

pub fn get_about_info() -> Value {
    json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "buildTimestamp": env!("BUILD_TIMESTAMP"),
        "gitSha": env!("BUILD_GIT_SHA"),
        "platform": std::env::consts::OS,
        "arch": std::env::consts::ARCH,
    })
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Point-in-time view of the relay's in-memory state.
pub fn get_relay_status(differ: &OrderSnapshotDiffer, tracker: &PrintSessionTracker) -> Value {
    let snapshot = differ.snapshot();
    let active_orders = snapshot.as_ref().map(|s| s.len()).unwrap_or(0);
    json!({
        "seeded": snapshot.is_some(),
        "activeOrders": active_orders,
        "backendOutage": differ.in_outage(),
        "dispatched": {
            "kitchen": tracker.dispatched_count(DedupChannel::Kitchen),
            "mainChecker": tracker.dispatched_count(DedupChannel::MainChecker),
        },
    })
}

/// Effective configuration with credentials replaced by `[REDACTED]`.
pub fn redacted_config(config: &RelayConfig) -> Value {
    match serde_json::to_value(config) {
        Ok(value) => redact_sensitive_fields(value),
        Err(e) => json!({ "error": e.to_string() }),
    }
}

fn redact_sensitive_fields(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, value)| {
                    if should_redact_key(&key) && !value.is_null() {
                        (key, Value::String("[REDACTED]".to_string()))
                    } else {
                        (key, redact_sensitive_fields(value))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => {
            Value::Array(items.into_iter().map(redact_sensitive_fields).collect())
        }
        other => other,
    }
}

fn should_redact_key(key: &str) -> bool {
    let normalized = key.to_ascii_lowercase();
    ["token", "secret", "password", "key", "authorization"]
        .iter()
        .any(|marker| normalized.contains(marker))
}

// ---------------------------------------------------------------------------
// Log rotation
// ---------------------------------------------------------------------------

/// Returns the log directory path (same location used by lib.rs).
pub fn get_log_dir() -> PathBuf {
    let base = std::env::var("LOCALAPPDATA")
        .or_else(|_| std::env::var("XDG_DATA_HOME"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            #[cfg(target_os = "windows")]
            {
                PathBuf::from(std::env::var("USERPROFILE").unwrap_or_else(|_| ".".into()))
                    .join("AppData")
                    .join("Local")
            }
            #[cfg(not(target_os = "windows"))]
            {
                PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()))
                    .join(".local")
                    .join("share")
            }
        });
    base.join("pos-order-relay").join("logs")
}

pub fn prune_old_logs() {
    prune_logs_in(&get_log_dir(), MAX_LOG_FILES);
}

/// Delete all but the `keep` newest relay log files in `log_dir`. Returns
/// the number of files removed.
pub fn prune_logs_in(log_dir: &Path, keep: usize) -> usize {
    let Ok(entries) = fs::read_dir(log_dir) else {
        return 0;
    };

    let mut log_files: Vec<(PathBuf, std::time::SystemTime)> = entries
        .flatten()
        .filter(|entry| {
            entry.path().is_file()
                && entry
                    .file_name()
                    .to_str()
                    .map(|name| name.starts_with(LOG_FILE_PREFIX))
                    .unwrap_or(false)
        })
        .map(|entry| {
            let modified = entry
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(std::time::UNIX_EPOCH);
            (entry.path(), modified)
        })
        .collect();

    // Newest first; ties broken by name so rolling date suffixes order correctly.
    log_files.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| b.0.cmp(&a.0)));

    let mut removed = 0;
    for (path, _) in log_files.iter().skip(keep) {
        match fs::remove_file(path) {
            Ok(()) => removed += 1,
            Err(e) => warn!("Failed to prune log file {}: {e}", path.display()),
        }
    }
    removed
}
