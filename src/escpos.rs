//! ESC/POS control codes and a paper-width aware line writer.
//!
//! The receipt is handed to the printer app as a text stream, so control
//! sequences live in the same `String` as the printable text. They are kept
//! in an injectable [`ControlCodes`] table so layout logic can be tested
//! against readable markers instead of raw bytes.

use serde::{Deserialize, Serialize};

// ESC/POS command bytes
const ESC: char = '\u{1B}';
const GS: char = '\u{1D}';

/// Paper width in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaperWidth {
    Mm58,
    Mm80,
}

impl PaperWidth {
    pub fn chars(self) -> usize {
        match self {
            PaperWidth::Mm58 => 32,
            PaperWidth::Mm80 => 48,
        }
    }

    pub fn from_mm(mm: u32) -> Self {
        if mm <= 58 {
            PaperWidth::Mm58
        } else {
            PaperWidth::Mm80
        }
    }
}

/// Opaque printer control sequences, keyed by purpose.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlCodes {
    pub reset: String,
    pub align_center: String,
    pub align_left: String,
    pub emphasis_on: String,
    pub emphasis_off: String,
    pub cut: String,
    pub beep: String,
}

impl ControlCodes {
    /// Byte sequences understood by the thermal printer driver.
    pub fn escpos() -> Self {
        Self {
            // ESC @: initialize printer
            reset: format!("{ESC}@"),
            // ESC a n: justification
            align_center: format!("{ESC}a\u{1}"),
            align_left: format!("{ESC}a\u{0}"),
            // ESC E n: emphasized mode
            emphasis_on: format!("{ESC}E\u{1}"),
            emphasis_off: format!("{ESC}E\u{0}"),
            // GS V A 16: partial cut with feed
            cut: format!("{GS}VA\u{10}"),
            // ESC B n t: buzzer, 3 beeps of 2 x 100ms
            beep: format!("{ESC}B\u{3}\u{2}"),
        }
    }

    /// Human-readable stand-ins, used by tests and previews.
    pub fn markers() -> Self {
        Self {
            reset: "<RESET>".to_string(),
            align_center: "<CENTER>".to_string(),
            align_left: "<LEFT>".to_string(),
            emphasis_on: "<B>".to_string(),
            emphasis_off: "</B>".to_string(),
            cut: "<CUT>".to_string(),
            beep: "<BEEP>".to_string(),
        }
    }

    /// All sequences in this table, longest first so stripping never leaves
    /// a prefix of another code behind.
    pub fn all(&self) -> Vec<&str> {
        let mut codes = vec![
            self.reset.as_str(),
            self.align_center.as_str(),
            self.align_left.as_str(),
            self.emphasis_on.as_str(),
            self.emphasis_off.as_str(),
            self.cut.as_str(),
            self.beep.as_str(),
        ];
        codes.retain(|c| !c.is_empty());
        codes.sort_by_key(|c| std::cmp::Reverse(c.len()));
        codes
    }
}

impl Default for ControlCodes {
    fn default() -> Self {
        Self::escpos()
    }
}

/// Compose a label/value row exactly `width` columns wide.
///
/// The value is never truncated. When both do not fit, the label is cut so
/// at least one space separates it from the value. A value of `width`
/// columns or more overflows the row; [`ReceiptWriter::line_pair`] moves
/// such values onto their own lines instead.
pub fn pair_line(label: &str, value: &str, width: usize) -> String {
    let value_len = value.chars().count();
    let label_len = label.chars().count();
    let max_label = width.saturating_sub(value_len + 1);
    let label: String = if label_len > max_label {
        label.chars().take(max_label).collect()
    } else {
        label.to_string()
    };
    let label_len = label.chars().count();
    let gap = width.saturating_sub(label_len + value_len);
    let gap = if label_len > 0 { gap.max(1) } else { gap };
    format!("{label}{}{value}", " ".repeat(gap))
}

/// Greedy word wrap on whitespace. Words longer than the width are split
/// across lines. The width never drops below 8 columns.
pub fn wrap(text: &str, width: usize) -> Vec<String> {
    let width = width.max(8);
    let mut out = Vec::new();
    let mut line = String::new();
    for word in text.split_whitespace() {
        let mut chars: Vec<char> = word.chars().collect();
        while chars.len() > width {
            if !line.is_empty() {
                out.push(std::mem::take(&mut line));
            }
            let rest = chars.split_off(width);
            out.push(chars.into_iter().collect());
            chars = rest;
        }
        let token: String = chars.into_iter().collect();
        if line.is_empty() {
            line = token;
            continue;
        }
        if line.chars().count() + 1 + token.chars().count() > width {
            out.push(std::mem::replace(&mut line, token));
        } else {
            line.push(' ');
            line.push_str(&token);
        }
    }
    if !line.is_empty() {
        out.push(line);
    }
    if out.is_empty() {
        out.push(String::new());
    }
    out
}

/// Builder for a printer-ready receipt stream.
///
/// ```rust,ignore
/// let codes = ControlCodes::escpos();
/// let mut w = ReceiptWriter::new(&codes, PaperWidth::Mm58);
/// w.reset().center().bold(true).text("KOPI").lf().bold(false).left();
/// w.line_pair("Total", "Rp 14.000");
/// w.feed(3).cut();
/// let payload = w.build();
/// ```
pub struct ReceiptWriter<'a> {
    buffer: String,
    codes: &'a ControlCodes,
    paper: PaperWidth,
}

impl<'a> ReceiptWriter<'a> {
    pub fn new(codes: &'a ControlCodes, paper: PaperWidth) -> Self {
        Self {
            buffer: String::with_capacity(512),
            codes,
            paper,
        }
    }

    pub fn width(&self) -> usize {
        self.paper.chars()
    }

    pub fn reset(&mut self) -> &mut Self {
        self.buffer.push_str(&self.codes.reset);
        self
    }

    pub fn center(&mut self) -> &mut Self {
        self.buffer.push_str(&self.codes.align_center);
        self
    }

    pub fn left(&mut self) -> &mut Self {
        self.buffer.push_str(&self.codes.align_left);
        self
    }

    pub fn bold(&mut self, on: bool) -> &mut Self {
        let code = if on {
            &self.codes.emphasis_on
        } else {
            &self.codes.emphasis_off
        };
        self.buffer.push_str(code);
        self
    }

    pub fn cut(&mut self) -> &mut Self {
        self.buffer.push_str(&self.codes.cut);
        self
    }

    pub fn beep(&mut self) -> &mut Self {
        self.buffer.push_str(&self.codes.beep);
        self
    }

    pub fn text(&mut self, s: &str) -> &mut Self {
        self.buffer.push_str(s);
        self
    }

    pub fn lf(&mut self) -> &mut Self {
        self.buffer.push('\n');
        self
    }

    /// Text followed by a line feed.
    pub fn line(&mut self, s: &str) -> &mut Self {
        self.text(s).lf()
    }

    /// Word-wrapped paragraph, each line prefixed with `indent`.
    pub fn wrapped(&mut self, text: &str, indent: &str) -> &mut Self {
        let width = self.width().saturating_sub(indent.chars().count());
        for line in wrap(text, width) {
            self.buffer.push_str(indent);
            self.buffer.push_str(&line);
            self.buffer.push('\n');
        }
        self
    }

    /// Horizontal separator matching paper width.
    pub fn separator(&mut self) -> &mut Self {
        let dashes = "-".repeat(self.width());
        self.line(&dashes)
    }

    /// Left-aligned label and right-aligned value on one row.
    pub fn line_pair(&mut self, label: &str, value: &str) -> &mut Self {
        let width = self.width();
        if value.chars().count() < width {
            let row = pair_line(label, value, width);
            return self.line(&row);
        }
        // Value alone fills the row: label first, then the value wrapped.
        if !label.trim().is_empty() {
            self.wrapped(label, "");
        }
        self.wrapped(value, "")
    }

    /// Blank lines so the cut lands below the last printed row.
    pub fn feed(&mut self, lines: usize) -> &mut Self {
        for _ in 0..lines {
            self.buffer.push('\n');
        }
        self
    }

    pub fn build(self) -> String {
        self.buffer
    }
}
