//! Backend REST client.
//!
//! Only the narrow set of calls the relay needs: list active orders, flag an
//! item as printed, move an order to another status, and read the menu.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use chrono::Utc;
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::RelayConfig;
use crate::error::{RelayError, RelayResult};
use crate::models::{MenuItem, Order, OrderStatus};

/// Active-order listing, items included.
pub const ACTIVE_ORDERS_PATH: &str = "/orders?status=pending,process&with=items";

// ---------------------------------------------------------------------------
// Backend seam
// ---------------------------------------------------------------------------

#[async_trait]
pub trait BackendApi: Send + Sync {
    /// Orders whose status is pending or processing, with their items.
    async fn fetch_active_orders(&self) -> RelayResult<Vec<Order>>;

    /// Set the server-side printed flag of one order item.
    async fn mark_item_printed(&self, item_id: i64) -> RelayResult<()>;

    /// Status transition, e.g. completing an order after payment.
    async fn update_order_status(&self, order_id: i64, status: OrderStatus) -> RelayResult<()>;

    async fn fetch_menu(&self) -> RelayResult<Vec<MenuItem>>;
}

// ---------------------------------------------------------------------------
// URL normalisation / connection strings
// ---------------------------------------------------------------------------

/// Normalise the backend base URL:
/// - ensure a scheme is present (https, or http for localhost)
/// - strip trailing slashes
pub fn normalize_base_url(url: &str) -> String {
    let mut url = url.trim().to_string();
    if url.is_empty() {
        return url;
    }

    if !url.starts_with("http://") && !url.starts_with("https://") {
        if url.starts_with("localhost") || url.starts_with("127.0.0.1") {
            url = format!("http://{url}");
        } else {
            url = format!("https://{url}");
        }
    }

    while url.ends_with('/') {
        url.pop();
    }
    url
}

fn decode_connection_string_payload(raw: &str) -> Option<Value> {
    let trimmed = raw.trim();
    if trimmed.starts_with('{') {
        return serde_json::from_str::<Value>(trimmed).ok();
    }

    let compact: String = trimmed.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.len() < 20 {
        return None;
    }

    let base64 = compact.replace('-', "+").replace('_', "/");
    let padded = format!(
        "{}{}",
        base64,
        "=".repeat((4usize.wrapping_sub(base64.len() % 4)) % 4)
    );
    let decoded = BASE64_STANDARD.decode(padded).ok()?;
    serde_json::from_slice::<Value>(&decoded).ok()
}

/// Token carried in a connection string (`{"url": ..., "key": ...}`).
pub fn extract_token_from_connection_string(raw: &str) -> Option<String> {
    decode_connection_string_payload(raw)
        .and_then(|v| {
            v.get("key")
                .or_else(|| v.get("token"))
                .and_then(Value::as_str)
                .map(|s| s.trim().to_string())
        })
        .filter(|s| !s.is_empty())
}

pub fn extract_url_from_connection_string(raw: &str) -> Option<String> {
    decode_connection_string_payload(raw)
        .and_then(|v| v.get("url").and_then(Value::as_str).map(normalize_base_url))
        .filter(|s| !s.is_empty())
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

fn friendly_error(url: &str, err: reqwest::Error) -> RelayError {
    let message = if err.is_connect() {
        format!("Cannot reach backend at {url}")
    } else if err.is_timeout() {
        format!("Connection to {url} timed out")
    } else if err.is_builder() {
        format!("Invalid backend URL: {url}")
    } else {
        format!("Network error communicating with {url}: {err}")
    };
    RelayError::Http {
        message,
        source: err,
    }
}

fn status_error(status: StatusCode) -> String {
    match status.as_u16() {
        401 => "API token is invalid or expired".to_string(),
        403 => "Not authorized for this endpoint".to_string(),
        404 => "Backend endpoint not found".to_string(),
        422 => "Backend rejected the request".to_string(),
        s if s >= 500 => "Backend server error".to_string(),
        _ => "Unexpected response from backend".to_string(),
    }
}

/// Prefer the backend's own `message`/`error` text when it sends one.
fn status_failure(status: StatusCode, body_text: &str) -> RelayError {
    let message = serde_json::from_str::<Value>(body_text)
        .ok()
        .and_then(|json| {
            json.get("message")
                .or_else(|| json.get("error"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| status_error(status));
    RelayError::Status {
        status: status.as_u16(),
        message,
    }
}

/// Accept `{ "data": [...] }`, a paginated `{ "data": { "data": [...] } }`,
/// or a bare array.
pub fn parse_list<T: DeserializeOwned>(body: Value) -> RelayResult<Vec<T>> {
    let list = match body {
        Value::Array(items) => Value::Array(items),
        Value::Object(mut map) => match map.remove("data") {
            Some(Value::Object(mut inner)) => inner.remove("data").ok_or_else(|| {
                RelayError::InvalidResponse("paginated body without data list".to_string())
            })?,
            Some(data) => data,
            None => {
                return Err(RelayError::InvalidResponse(
                    "missing data field".to_string(),
                ))
            }
        },
        other => {
            return Err(RelayError::InvalidResponse(format!(
                "expected a list, got {other}"
            )))
        }
    };
    if !list.is_array() {
        return Err(RelayError::InvalidResponse("data is not a list".to_string()));
    }
    Ok(serde_json::from_value(list)?)
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

pub struct HttpBackend {
    base_url: String,
    token: Option<String>,
    client: Client,
}

impl HttpBackend {
    pub fn new(config: &RelayConfig) -> RelayResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| RelayError::Config(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            base_url: normalize_base_url(&config.api_base_url),
            token: config.api_token.clone(),
            client,
        })
    }

    /// Authenticated request. `path` includes the leading slash.
    async fn request(&self, method: Method, path: &str, body: Option<Value>) -> RelayResult<Value> {
        let full_url = format!("{}{path}", self.base_url);
        let mut req = self
            .client
            .request(method.clone(), &full_url)
            .header("Accept", "application/json");
        if let Some(token) = self.token.as_deref() {
            req = req.bearer_auth(token);
        }
        if let Some(b) = body {
            req = req.json(&b);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| friendly_error(&self.base_url, e))?;
        let status = resp.status();
        let body_text = resp.text().await.unwrap_or_default();
        debug!(method = %method, path, status = status.as_u16(), "Backend request");

        if !status.is_success() {
            return Err(status_failure(status, &body_text));
        }
        if body_text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body_text)
            .map_err(|e| RelayError::InvalidResponse(format!("invalid JSON: {e}")))
    }
}

#[async_trait]
impl BackendApi for HttpBackend {
    async fn fetch_active_orders(&self) -> RelayResult<Vec<Order>> {
        let body = self.request(Method::GET, ACTIVE_ORDERS_PATH, None).await?;
        let orders: Vec<Order> = parse_list(body)?;
        let (active, stale): (Vec<Order>, Vec<Order>) =
            orders.into_iter().partition(|o| o.status.is_active());
        if !stale.is_empty() {
            warn!(
                count = stale.len(),
                "Backend returned inactive orders in active listing, ignoring them"
            );
        }
        Ok(active)
    }

    async fn mark_item_printed(&self, item_id: i64) -> RelayResult<()> {
        let path = format!("/detail_pesanan/{item_id}");
        self.request(Method::PUT, &path, Some(serde_json::json!({ "printed": 1 })))
            .await?;
        Ok(())
    }

    async fn update_order_status(&self, order_id: i64, status: OrderStatus) -> RelayResult<()> {
        let path = format!("/pesanans/{order_id}");
        let mut body = serde_json::json!({ "status": status.as_api_str() });
        if status == OrderStatus::Completed {
            body["completed_at"] = Value::String(Utc::now().to_rfc3339());
        }
        self.request(Method::PUT, &path, Some(body)).await?;
        Ok(())
    }

    async fn fetch_menu(&self) -> RelayResult<Vec<MenuItem>> {
        let body = self.request(Method::GET, "/menu", None).await?;
        parse_list(body)
    }
}
