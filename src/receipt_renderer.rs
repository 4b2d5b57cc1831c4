//! Receipt layout for the four paper channels.
//!
//! Pure: the same order, items and options always produce the same stream.

use chrono::{DateTime, FixedOffset, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::escpos::{ControlCodes, PaperWidth, ReceiptWriter};
use crate::models::{LocationType, MenuCatalog, Order, OrderItem, PaymentMethod};

/// Which paper the receipt is for. Decides the title and default layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptKind {
    KitchenChecker,
    MainChecker,
    PaymentReceipt,
    Bill,
}

impl ReceiptKind {
    pub fn title(self) -> &'static str {
        match self {
            Self::KitchenChecker => "CHECKER DAPUR",
            Self::MainChecker => "MAIN CHECKER",
            Self::PaymentReceipt => "STRUK PEMBELIAN",
            Self::Bill => "BILL",
        }
    }

    /// Checkers go to staff and carry no prices.
    pub fn shows_prices_by_default(self) -> bool {
        matches!(self, Self::PaymentReceipt | Self::Bill)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreProfile {
    pub name: String,
    pub address: Option<String>,
    pub farewell: String,
}

impl Default for StoreProfile {
    fn default() -> Self {
        Self {
            name: "KEDAI KOPI".to_string(),
            address: None,
            farewell: "Terima kasih atas kunjungan Anda".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderOptions {
    pub kind: ReceiptKind,
    pub show_prices: bool,
    /// Cash handed over by the customer, for the change line.
    pub tendered: Option<i64>,
    pub paper: PaperWidth,
    pub store: StoreProfile,
    /// Offset applied to zoned backend timestamps before printing.
    pub utc_offset_minutes: i32,
}

impl RenderOptions {
    pub fn for_kind(kind: ReceiptKind, store: StoreProfile, paper: PaperWidth) -> Self {
        Self {
            kind,
            show_prices: kind.shows_prices_by_default(),
            tendered: None,
            paper,
            store,
            utc_offset_minutes: 7 * 60,
        }
    }

    pub fn with_tendered(mut self, tendered: Option<i64>) -> Self {
        self.tendered = tendered;
        self
    }

    pub fn with_utc_offset(mut self, minutes: i32) -> Self {
        self.utc_offset_minutes = minutes;
        self
    }

    fn shows_totals(&self) -> bool {
        self.show_prices || self.kind == ReceiptKind::MainChecker
    }

    fn shows_farewell(&self) -> bool {
        matches!(self.kind, ReceiptKind::Bill | ReceiptKind::PaymentReceipt)
    }
}

/// "Rp 14.000", "-Rp 2.000".
pub fn money(amount: i64) -> String {
    let digits = amount.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(ch);
    }
    if amount < 0 {
        format!("-Rp {grouped}")
    } else {
        format!("Rp {grouped}")
    }
}

/// Render a backend timestamp as `dd/mm/yyyy HH:MM`.
///
/// Zoned timestamps are shifted to `utc_offset_minutes`; naive ones are
/// taken as already local. Anything unparseable is printed verbatim.
pub fn format_timestamp(raw: &str, utc_offset_minutes: i32) -> String {
    const OUT: &str = "%d/%m/%Y %H:%M";
    let trimmed = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return match FixedOffset::east_opt(utc_offset_minutes * 60) {
            Some(offset) => parsed.with_timezone(&offset).format(OUT).to_string(),
            None => parsed.format(OUT).to_string(),
        };
    }
    for pattern in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, pattern) {
            return naive.format(OUT).to_string();
        }
    }
    trimmed.to_string()
}

fn item_label(item: &OrderItem, catalog: &MenuCatalog) -> String {
    let name = catalog.display_name(item).replace('*', "");
    let name = name.trim();
    match item.variant.as_deref() {
        Some(variant) => format!("{}x {name} ({variant})", item.quantity),
        None => format!("{}x {name}", item.quantity),
    }
}

fn emit_header(w: &mut ReceiptWriter<'_>, order: &Order, options: &RenderOptions) {
    w.center();
    w.bold(true).line(&options.store.name).bold(false);
    if options.show_prices {
        if let Some(address) = options
            .store
            .address
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
        {
            w.wrapped(address, "");
        }
    }
    w.bold(true).line(options.kind.title()).bold(false);
    w.left().separator();

    if options.shows_totals() {
        w.line_pair("No. Order", &format!("#{}", order.id));
    }
    let place_label = match order.location_type {
        LocationType::DineIn => "Meja",
        LocationType::Takeaway => "ID",
    };
    w.line_pair(place_label, order.location_number.as_deref().unwrap_or("-"));
    w.line_pair("Tipe", &order.type_label());
    w.line_pair(
        "Waktu",
        &format_timestamp(order.display_timestamp(), options.utc_offset_minutes),
    );
    w.separator();
}

fn emit_items(
    w: &mut ReceiptWriter<'_>,
    items: &[OrderItem],
    catalog: &MenuCatalog,
    options: &RenderOptions,
) {
    for item in items.iter().filter(|item| item.quantity != 0) {
        let label = item_label(item, catalog);
        if options.show_prices {
            w.line_pair(&label, &money(item.subtotal));
        } else {
            w.wrapped(&label, "");
        }
        if let Some(note) = item.note.as_deref() {
            w.wrapped(&format!("Catatan: {note}"), "   ");
        }
    }
}

fn emit_totals(w: &mut ReceiptWriter<'_>, order: &Order, options: &RenderOptions) {
    w.separator();
    w.line_pair("Total", &money(order.total));
    if let Some(discount) = order.effective_discount() {
        let label = match order.discount_code.as_deref() {
            Some(code) => format!("Diskon ({code})"),
            None => "Diskon".to_string(),
        };
        w.line_pair(&label, &money(-discount));
    }
    let payable = order.payable_total();
    w.bold(true)
        .line_pair("TOTAL BAYAR", &money(payable))
        .bold(false);

    if !options.show_prices {
        return;
    }
    match &order.payment_method {
        Some(PaymentMethod::Cash) => {
            w.line_pair("DIBAYAR", &money(options.tendered.unwrap_or(payable)));
            if let Some(tendered) = options.tendered {
                w.line_pair("KEMBALIAN", &money(tendered.saturating_sub(payable)));
            }
        }
        Some(PaymentMethod::Qris) => {
            let method = match order.bank_code.as_deref() {
                Some(bank) => format!("QRIS - {}", bank.to_uppercase()),
                None => "QRIS".to_string(),
            };
            w.line_pair("Metode", &method);
        }
        Some(PaymentMethod::Other(name)) => {
            w.line_pair("Metode", &name.to_uppercase());
        }
        None => {}
    }
}

/// Render `items` of `order` for one paper channel.
///
/// `items` is the subset selected for this channel; it may differ from
/// `order.items`. Items with zero quantity are skipped.
pub fn render(
    order: &Order,
    items: &[OrderItem],
    options: &RenderOptions,
    catalog: &MenuCatalog,
    codes: &ControlCodes,
) -> String {
    let mut w = ReceiptWriter::new(codes, options.paper);
    w.reset();
    emit_header(&mut w, order, options);
    emit_items(&mut w, items, catalog, options);
    if options.shows_totals() {
        emit_totals(&mut w, order, options);
    }
    if options.shows_farewell() {
        w.separator().center();
        w.wrapped(&options.store.farewell, "");
        w.left();
    }
    if options.kind == ReceiptKind::PaymentReceipt {
        w.beep();
    }
    w.feed(3).cut();
    w.build()
}

/// Receipt text with every control sequence removed, for logs and
/// on-screen previews.
pub fn render_preview(receipt: &str, codes: &ControlCodes) -> String {
    let mut out = receipt.to_string();
    for code in codes.all() {
        out = out.replace(code, "");
    }
    out
}
