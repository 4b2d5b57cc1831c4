//! Backend order model as seen by the relay.
//!
//! The backend is loose about types: money arrives as numeric strings,
//! statuses as free-form text, the printed flag as 0/1. Everything is
//! normalised here at deserialization time so the rest of the crate only
//! sees closed enums and integer amounts.

use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Status / location / payment enums
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Cancelled,
}

impl OrderStatus {
    /// Map a backend status string onto the fixed status table. Unknown
    /// values fall back to pending.
    pub fn from_label(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "process" | "processing" => Self::Processing,
            "completed" | "complete" | "done" => Self::Completed,
            "cancelled" | "canceled" | "cancel" => Self::Cancelled,
            _ => Self::Pending,
        }
    }

    /// Value the backend expects in query strings and PUT payloads.
    pub fn as_api_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "process",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Active orders are the only ones included in polling.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::Processing)
    }
}

impl<'de> Deserialize<'de> for OrderStatus {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(d)?;
        Ok(raw.as_deref().map(Self::from_label).unwrap_or_default())
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum LocationType {
    #[default]
    DineIn,
    Takeaway,
}

impl LocationType {
    pub fn from_label(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "takeaway" | "take-away" | "take_away" => Self::Takeaway,
            _ => Self::DineIn,
        }
    }

    /// Upper-case label printed on receipts.
    pub fn receipt_label(self) -> &'static str {
        match self {
            Self::DineIn => "DINE-IN",
            Self::Takeaway => "TAKEAWAY",
        }
    }
}

impl<'de> Deserialize<'de> for LocationType {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(d)?;
        Ok(raw.as_deref().map(Self::from_label).unwrap_or_default())
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Cash,
    Qris,
    Other(String),
}

impl PaymentMethod {
    /// Returns `None` for blank input so "no method chosen yet" stays distinct.
    pub fn from_label(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_lowercase();
        match normalized.as_str() {
            "" => None,
            "cash" | "tunai" => Some(Self::Cash),
            "qris" => Some(Self::Qris),
            _ => Some(Self::Other(normalized)),
        }
    }
}

fn de_payment_method<'de, D: Deserializer<'de>>(d: D) -> Result<Option<PaymentMethod>, D::Error> {
    let raw = Option::<String>::deserialize(d)?;
    Ok(raw.as_deref().and_then(PaymentMethod::from_label))
}

// ---------------------------------------------------------------------------
// Loose scalar parsing
// ---------------------------------------------------------------------------

/// Parse a backend money string ("14000", "14000.00") into whole currency
/// units. Fractional parts must be zero; amounts are never floating point.
pub fn parse_money(raw: &str) -> Result<i64, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(0);
    }
    let (negative, unsigned) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed),
    };
    let (whole, fraction) = match unsigned.split_once('.') {
        Some((w, f)) => (w, f),
        None => (unsigned, ""),
    };
    if whole.is_empty() || !whole.bytes().all(|b| b.is_ascii_digit()) {
        return Err(format!("invalid money amount: {raw:?}"));
    }
    if !fraction.bytes().all(|b| b == b'0') {
        return Err(format!("fractional money amount not supported: {raw:?}"));
    }
    let value: i64 = whole
        .parse()
        .map_err(|_| format!("money amount out of range: {raw:?}"))?;
    Ok(if negative { -value } else { value })
}

fn money_from_value(value: &Value) -> Result<Option<i64>, String> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) if s.trim().is_empty() => Ok(None),
        Value::String(s) => parse_money(s).map(Some),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                return Ok(Some(i));
            }
            match n.as_f64() {
                Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Ok(Some(f as i64)),
                _ => Err(format!("invalid money amount: {n}")),
            }
        }
        other => Err(format!("invalid money amount: {other}")),
    }
}

fn de_money<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
    let value = Value::deserialize(d)?;
    money_from_value(&value)
        .map(Option::unwrap_or_default)
        .map_err(serde::de::Error::custom)
}

fn de_opt_money<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
    let value = Value::deserialize(d)?;
    money_from_value(&value).map_err(serde::de::Error::custom)
}

fn de_count<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
    match Value::deserialize(d)? {
        Value::Null => Ok(0),
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| serde::de::Error::custom(format!("invalid quantity: {n}"))),
        Value::String(s) => s
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("invalid quantity: {s:?}"))),
        other => Err(serde::de::Error::custom(format!("invalid quantity: {other}"))),
    }
}

fn de_flag<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Bool(b) => b,
        Value::Number(n) => n.as_i64().unwrap_or(0) != 0,
        Value::String(s) => matches!(s.trim(), "1" | "true"),
        _ => false,
    })
}

/// Trimmed optional text; blank strings become `None`. Numbers are accepted
/// because table numbers sometimes arrive as integers.
fn de_opt_text<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

/// Menu reference data. Read-only for this crate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct MenuItem {
    pub id: i64,
    #[serde(alias = "nama")]
    pub name: String,
    #[serde(
        default,
        alias = "receipt_category",
        alias = "kategori_struk",
        alias = "kategori",
        deserialize_with = "de_opt_text"
    )]
    pub category: Option<String>,
}

impl MenuItem {
    /// Whether this menu entry is routed to the kitchen printer.
    pub fn is_food(&self) -> bool {
        self.category
            .as_deref()
            .map(|c| matches!(c.trim().to_lowercase().as_str(), "food" | "makanan"))
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct OrderItem {
    pub id: i64,
    #[serde(default, alias = "id_menu")]
    pub menu_id: i64,
    /// Some endpoints embed the menu row; it wins over catalog lookup.
    #[serde(default)]
    pub menu: Option<MenuItem>,
    #[serde(default, alias = "jumlah", alias = "qty", deserialize_with = "de_count")]
    pub quantity: i64,
    #[serde(default, alias = "varian", deserialize_with = "de_opt_text")]
    pub variant: Option<String>,
    #[serde(default, alias = "catatan", deserialize_with = "de_opt_text")]
    pub note: Option<String>,
    #[serde(default, alias = "harga", deserialize_with = "de_money")]
    pub price: i64,
    #[serde(default, deserialize_with = "de_money")]
    pub subtotal: i64,
    /// Server-side "printed on some channel" flag. Not channel specific.
    #[serde(default, deserialize_with = "de_flag")]
    pub printed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Order {
    pub id: i64,
    #[serde(default)]
    pub status: OrderStatus,
    #[serde(default, alias = "tipe_lokasi", alias = "order_type")]
    pub location_type: LocationType,
    /// Table number for dine-in, identifier string for takeaway.
    #[serde(
        default,
        alias = "table_number",
        alias = "no_meja",
        alias = "identifier",
        deserialize_with = "de_opt_text"
    )]
    pub location_number: Option<String>,
    #[serde(default, alias = "area", deserialize_with = "de_opt_text")]
    pub location_area: Option<String>,
    #[serde(default)]
    pub created_at: String,
    #[serde(default, deserialize_with = "de_opt_text")]
    pub completed_at: Option<String>,
    #[serde(default, deserialize_with = "de_money")]
    pub total: i64,
    #[serde(default, alias = "kode_diskon", deserialize_with = "de_opt_text")]
    pub discount_code: Option<String>,
    #[serde(default, alias = "diskon", deserialize_with = "de_opt_money")]
    pub discount_amount: Option<i64>,
    #[serde(default, alias = "total_setelah_diskon", deserialize_with = "de_opt_money")]
    pub total_after_discount: Option<i64>,
    #[serde(
        default,
        alias = "metode_pembayaran",
        deserialize_with = "de_payment_method"
    )]
    pub payment_method: Option<PaymentMethod>,
    #[serde(default, alias = "bank", deserialize_with = "de_opt_text")]
    pub bank_code: Option<String>,
    #[serde(default, alias = "detail_pesanan")]
    pub items: Vec<OrderItem>,
}

impl Order {
    /// Number of item rows, the value captured in a snapshot.
    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    /// Positive discount, if any.
    pub fn effective_discount(&self) -> Option<i64> {
        self.discount_amount.filter(|amount| *amount > 0)
    }

    /// Amount the customer has to pay after discount.
    pub fn payable_total(&self) -> i64 {
        match self.effective_discount() {
            Some(discount) => self
                .total_after_discount
                .unwrap_or_else(|| (self.total - discount).max(0)),
            None => self.total,
        }
    }

    /// Timestamp shown on receipts: completion time when known.
    pub fn display_timestamp(&self) -> &str {
        self.completed_at.as_deref().unwrap_or(&self.created_at)
    }

    /// "DINE-IN" / "TAKEAWAY", suffixed with "|<area>" when an area is set.
    pub fn type_label(&self) -> String {
        let base = self.location_type.receipt_label();
        match self.location_area.as_deref() {
            Some(area) => format!("{base}|{area}"),
            None => base.to_string(),
        }
    }

    /// Short human description of where the order sits, used in alerts.
    pub fn location_descriptor(&self) -> String {
        match (self.location_type, self.location_number.as_deref()) {
            (LocationType::DineIn, Some(table)) => format!("Meja {table}"),
            (LocationType::DineIn, None) => format!("Dine-in #{}", self.id),
            (LocationType::Takeaway, Some(identifier)) => format!("Takeaway {identifier}"),
            (LocationType::Takeaway, None) => format!("Takeaway #{}", self.id),
        }
    }
}

// ---------------------------------------------------------------------------
// Menu catalog
// ---------------------------------------------------------------------------

/// Already-resolved menu reference data handed to the tracker and renderer.
#[derive(Debug, Clone, Default)]
pub struct MenuCatalog {
    items: HashMap<i64, MenuItem>,
}

impl MenuCatalog {
    pub fn new(items: impl IntoIterator<Item = MenuItem>) -> Self {
        Self {
            items: items.into_iter().map(|m| (m.id, m)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn resolve<'a>(&'a self, item: &'a OrderItem) -> Option<&'a MenuItem> {
        item.menu.as_ref().or_else(|| self.items.get(&item.menu_id))
    }

    pub fn is_food(&self, item: &OrderItem) -> bool {
        self.resolve(item).map(MenuItem::is_food).unwrap_or(false)
    }

    pub fn display_name(&self, item: &OrderItem) -> String {
        self.resolve(item)
            .map(|m| m.name.clone())
            .unwrap_or_else(|| format!("Menu #{}", item.menu_id))
    }
}
