//! Minimal ESC/POS binary command builder for thermal receipt printers.
//!
//! Generates raw byte sequences that can be sent directly to the printer.
//! Supports text formatting, alignment, Arabic character encoding (WPC1256),
//! native Code 128 barcodes, and paper cutting.
#![allow(dead_code)]

// ESC/POS command bytes
const ESC: u8 = 0x1B;
const GS: u8 = 0x1D;
const LF: u8 = 0x0A;

/// Paper width in characters.
#[derive(Debug, Clone, Copy)]
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

    pub fn from_mm(mm: i32) -> Self {
        if mm <= 58 {
            PaperWidth::Mm58
        } else {
            PaperWidth::Mm80
        }
    }
}

/// Builder for generating ESC/POS binary command buffers.
///
/// ```rust,ignore
/// let data = EscPosBuilder::new()
///     .init()
///     .center()
///     .bold(true).text("INVOICE\n").bold(false)
///     .left()
///     .text("Item 1        5.00\n")
///     .feed(3)
///     .cut()
///     .build();
/// ```
pub struct EscPosBuilder {
    buffer: Vec<u8>,
    paper: PaperWidth,
    arabic_mode: bool,
}

impl EscPosBuilder {
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(512),
            paper: PaperWidth::Mm80,
            arabic_mode: false,
        }
    }

    pub fn with_paper(mut self, paper: PaperWidth) -> Self {
        self.paper = paper;
        self
    }

    /// Enable Arabic text encoding (WPC1256).
    pub fn with_arabic(mut self) -> Self {
        self.arabic_mode = true;
        self
    }

    // -----------------------------------------------------------------------
    // Initialization
    // -----------------------------------------------------------------------

    /// ESC @ — Initialize printer, reset to defaults.
    pub fn init(&mut self) -> &mut Self {
        self.buffer.extend_from_slice(&[ESC, 0x40]);
        self
    }

    /// ESC t n — Select character code page.
    pub fn code_page(&mut self, page: u8) -> &mut Self {
        self.buffer.extend_from_slice(&[ESC, 0x74, page]);
        self
    }

    /// Set code page to WPC1256 (Arabic) and enable Arabic text encoding.
    ///
    /// Shaping is the printer's job (or the raster path's); text is sent in
    /// logical order.
    pub fn arabic_mode(&mut self) -> &mut Self {
        self.code_page(32); // WPC1256 on Epson-compatible firmwares
        self.arabic_mode = true;
        self
    }

    // -----------------------------------------------------------------------
    // Text formatting
    // -----------------------------------------------------------------------

    /// ESC E n — Bold on/off.
    pub fn bold(&mut self, on: bool) -> &mut Self {
        self.buffer
            .extend_from_slice(&[ESC, 0x45, if on { 1 } else { 0 }]);
        self
    }

    /// ESC - n — Underline (0=off, 1=thin, 2=thick).
    pub fn underline(&mut self, mode: u8) -> &mut Self {
        self.buffer.extend_from_slice(&[ESC, 0x2D, mode]);
        self
    }

    /// GS ! n — Set text size (width × height multiplier, 1–8 each).
    pub fn text_size(&mut self, width: u8, height: u8) -> &mut Self {
        let w = width.clamp(1, 8) - 1;
        let h = height.clamp(1, 8) - 1;
        self.buffer.extend_from_slice(&[GS, 0x21, (w << 4) | h]);
        self
    }

    /// Reset text size to 1×1.
    pub fn normal_size(&mut self) -> &mut Self {
        self.text_size(1, 1)
    }

    /// Double-width text (2×1).
    pub fn double_width(&mut self) -> &mut Self {
        self.text_size(2, 1)
    }

    /// Double-height text (1×2).
    pub fn double_height(&mut self) -> &mut Self {
        self.text_size(1, 2)
    }

    // -----------------------------------------------------------------------
    // Alignment
    // -----------------------------------------------------------------------

    /// ESC a 0 — Left-align.
    pub fn left(&mut self) -> &mut Self {
        self.buffer.extend_from_slice(&[ESC, 0x61, 0]);
        self
    }

    /// ESC a 1 — Centre-align.
    pub fn center(&mut self) -> &mut Self {
        self.buffer.extend_from_slice(&[ESC, 0x61, 1]);
        self
    }

    /// ESC a 2 — Right-align.
    pub fn right(&mut self) -> &mut Self {
        self.buffer.extend_from_slice(&[ESC, 0x61, 2]);
        self
    }

    // -----------------------------------------------------------------------
    // Text output
    // -----------------------------------------------------------------------

    /// Append text. Characters are encoded as ASCII or WPC1256 (Arabic mode).
    pub fn text(&mut self, s: &str) -> &mut Self {
        if self.arabic_mode {
            self.buffer.extend(encode_cp1256(s));
        } else {
            // ASCII fallback — pass through bytes < 0x80, replace rest with '?'
            for ch in s.chars() {
                let code = ch as u32;
                if code < 0x80 {
                    self.buffer.push(code as u8);
                } else {
                    self.buffer.push(b'?');
                }
            }
        }
        self
    }

    /// Append raw bytes (e.g. pre-encoded text).
    pub fn raw(&mut self, data: &[u8]) -> &mut Self {
        self.buffer.extend_from_slice(data);
        self
    }

    /// Append a line-feed.
    pub fn lf(&mut self) -> &mut Self {
        self.buffer.push(LF);
        self
    }

    /// Print a horizontal separator using dashes, matching paper width.
    pub fn separator(&mut self) -> &mut Self {
        let width = self.paper.chars();
        for _ in 0..width {
            self.buffer.push(b'-');
        }
        self.buffer.push(LF);
        self
    }

    /// Print a line with left-aligned label and right-aligned value.
    pub fn line_pair(&mut self, label: &str, value: &str) -> &mut Self {
        let width = self.paper.chars();
        let gap = width.saturating_sub(label.chars().count() + value.chars().count());
        self.text(label);
        for _ in 0..gap {
            self.buffer.push(b' ');
        }
        self.text(value);
        self.lf()
    }

    // -----------------------------------------------------------------------
    // Barcodes
    // -----------------------------------------------------------------------

    /// GS H n — HRI (human readable) text position: 0=none, 2=below.
    pub fn barcode_hri_below(&mut self, show: bool) -> &mut Self {
        self.buffer
            .extend_from_slice(&[GS, 0x48, if show { 2 } else { 0 }]);
        self
    }

    /// GS h n — Barcode height in dots.
    pub fn barcode_height(&mut self, dots: u8) -> &mut Self {
        self.buffer.extend_from_slice(&[GS, 0x68, dots]);
        self
    }

    /// GS w n — Barcode module width (2–6).
    pub fn barcode_module_width(&mut self, width: u8) -> &mut Self {
        self.buffer
            .extend_from_slice(&[GS, 0x77, width.clamp(2, 6)]);
        self
    }

    /// GS k 73 — Print a Code 128 barcode (code set B, ASCII data only).
    ///
    /// Data outside the printable ASCII range or longer than the printer's
    /// 255-byte limit is rejected.
    pub fn barcode_code128(&mut self, data: &str) -> Result<&mut Self, String> {
        if data.is_empty() {
            return Err("Barcode data is empty".into());
        }
        if !data.chars().all(|c| (' '..='~').contains(&c)) {
            return Err("Code 128 data must be printable ASCII".into());
        }
        // "{B" prefix selects code set B; total payload caps at 255 bytes
        let payload_len = data.len() + 2;
        if payload_len > 255 {
            return Err("Barcode data is too long".into());
        }
        self.buffer
            .extend_from_slice(&[GS, 0x6B, 73, payload_len as u8, b'{', b'B']);
        self.buffer.extend_from_slice(data.as_bytes());
        Ok(self)
    }

    // -----------------------------------------------------------------------
    // Feed / cut
    // -----------------------------------------------------------------------

    /// ESC d n — Feed n lines.
    pub fn feed(&mut self, lines: u8) -> &mut Self {
        self.buffer.extend_from_slice(&[ESC, 0x64, lines]);
        self
    }

    /// GS V A 16 — Partial cut with 16-dot feed.
    pub fn cut(&mut self) -> &mut Self {
        self.buffer.extend_from_slice(&[GS, 0x56, 0x41, 0x10]);
        self
    }

    /// GS V 0 — Full cut.
    pub fn full_cut(&mut self) -> &mut Self {
        self.buffer.extend_from_slice(&[GS, 0x56, 0x00]);
        self
    }

    // -----------------------------------------------------------------------
    // Build
    // -----------------------------------------------------------------------

    /// Consume the builder and return the binary ESC/POS payload.
    pub fn build(self) -> Vec<u8> {
        self.buffer
    }
}

impl Default for EscPosBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// WPC1256 Arabic character encoding
// ---------------------------------------------------------------------------

/// Encode a string to WPC1256 bytes. ASCII characters pass through; Arabic
/// letters are mapped to their CP1256 byte values; Arabic-Indic digits are
/// folded to ASCII digits; harakat are dropped. Unknown characters are
/// replaced with `?` (0x3F).
fn encode_cp1256(text: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(text.len());
    for ch in text.chars() {
        let code = ch as u32;
        // ASCII printable + control chars (LF, CR, etc.)
        if code < 0x80 {
            bytes.push(code as u8);
            continue;
        }
        // Arabic-Indic digits ٠–٩ fold to ASCII
        if (0x0660..=0x0669).contains(&code) {
            bytes.push(b'0' + (code - 0x0660) as u8);
            continue;
        }
        // Eastern Arabic-Indic digits ۰–۹ (Persian forms) fold the same way
        if (0x06F0..=0x06F9).contains(&code) {
            bytes.push(b'0' + (code - 0x06F0) as u8);
            continue;
        }
        // Harakat carry no width on thermal output — drop them
        if (0x064B..=0x0652).contains(&code) {
            continue;
        }
        if let Some(b) = arabic_to_cp1256(ch) {
            bytes.push(b);
        } else {
            bytes.push(b'?');
        }
    }
    bytes
}

/// Map a Unicode Arabic character to its CP1256 byte value.
fn arabic_to_cp1256(ch: char) -> Option<u8> {
    match ch {
        '\u{060C}' => Some(0xA1), // ، Arabic comma
        '\u{061B}' => Some(0xBA), // ؛ Arabic semicolon
        '\u{061F}' => Some(0xBF), // ؟ Arabic question mark
        '\u{0621}' => Some(0xC1), // ء
        '\u{0622}' => Some(0xC2), // آ
        '\u{0623}' => Some(0xC3), // أ
        '\u{0624}' => Some(0xC4), // ؤ
        '\u{0625}' => Some(0xC5), // إ
        '\u{0626}' => Some(0xC6), // ئ
        '\u{0627}' => Some(0xC7), // ا
        '\u{0628}' => Some(0xC8), // ب
        '\u{0629}' => Some(0xC9), // ة
        '\u{062A}' => Some(0xCA), // ت
        '\u{062B}' => Some(0xCB), // ث
        '\u{062C}' => Some(0xCC), // ج
        '\u{062D}' => Some(0xCD), // ح
        '\u{062E}' => Some(0xCE), // خ
        '\u{062F}' => Some(0xCF), // د
        '\u{0630}' => Some(0xD0), // ذ
        '\u{0631}' => Some(0xD1), // ر
        '\u{0632}' => Some(0xD2), // ز
        '\u{0633}' => Some(0xD3), // س
        '\u{0634}' => Some(0xD4), // ش
        '\u{0635}' => Some(0xD5), // ص
        '\u{0636}' => Some(0xD6), // ض
        '\u{0637}' => Some(0xD8), // ط
        '\u{0638}' => Some(0xD9), // ظ
        '\u{0639}' => Some(0xDA), // ع
        '\u{063A}' => Some(0xDB), // غ
        '\u{0640}' => Some(0xDC), // ـ tatweel
        '\u{0641}' => Some(0xDD), // ف
        '\u{0642}' => Some(0xDE), // ق
        '\u{0643}' => Some(0xDF), // ك
        '\u{0644}' => Some(0xE1), // ل
        '\u{0645}' => Some(0xE3), // م
        '\u{0646}' => Some(0xE4), // ن
        '\u{0647}' => Some(0xE5), // ه
        '\u{0648}' => Some(0xE6), // و
        '\u{0649}' => Some(0xEC), // ى
        '\u{064A}' => Some(0xED), // ي
        '\u{067E}' => Some(0x81), // پ
        '\u{0686}' => Some(0x8D), // چ
        '\u{0698}' => Some(0x8E), // ژ
        '\u{06AF}' => Some(0x90), // گ
        _ => None,
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_sequence() {
        let data = {
            let mut b = EscPosBuilder::new();
            b.init();
            b.build()
        };
        assert_eq!(data, vec![0x1B, 0x40]);
    }

    #[test]
    fn test_arabic_encoding() {
        // "اب" (alef + ba)
        let data = {
            let mut b = EscPosBuilder::new().with_arabic();
            b.init().arabic_mode().text("\u{0627}\u{0628}\n");
            b.build()
        };
        // ESC @ + ESC t 32 + 0xC7 0xC8 LF
        assert_eq!(data, vec![0x1B, 0x40, 0x1B, 0x74, 32, 0xC7, 0xC8, 0x0A]);
    }

    #[test]
    fn test_arabic_digits_fold_to_ascii() {
        let data = {
            let mut b = EscPosBuilder::new().with_arabic();
            b.text("\u{0661}\u{0662}\u{0663}");
            b.build()
        };
        assert_eq!(data, b"123");
    }

    #[test]
    fn test_harakat_are_dropped() {
        // لَ (lam + fatha) — the fatha must not produce a byte
        let data = {
            let mut b = EscPosBuilder::new().with_arabic();
            b.text("\u{0644}\u{064E}");
            b.build()
        };
        assert_eq!(data, vec![0xE1]);
    }

    #[test]
    fn test_ascii_mode_replaces_non_ascii() {
        let data = {
            let mut b = EscPosBuilder::new();
            b.text("A\u{0628}C");
            b.build()
        };
        assert_eq!(data, b"A?C");
    }

    #[test]
    fn test_separator_80mm() {
        let data = {
            let mut b = EscPosBuilder::new();
            b.separator();
            b.build()
        };
        // 48 dashes + LF
        assert_eq!(data.len(), 49);
        assert!(data[..48].iter().all(|&b| b == b'-'));
        assert_eq!(data[48], 0x0A);
    }

    #[test]
    fn test_line_pair() {
        let data = {
            let mut b = EscPosBuilder::new().with_paper(PaperWidth::Mm58);
            // 32 chars wide
            b.line_pair("Item", "5.00");
            b.build()
        };
        // "Item" (4) + spaces (24) + "5.00" (4) + LF = 33 bytes
        assert_eq!(data.len(), 33);
        assert_eq!(&data[..4], b"Item");
        assert_eq!(&data[28..32], b"5.00");
        assert_eq!(data[32], 0x0A);
    }

    #[test]
    fn test_text_size() {
        let data = {
            let mut b = EscPosBuilder::new();
            b.text_size(2, 2);
            b.build()
        };
        // GS ! n where n = ((2-1) << 4) | (2-1) = 0x11
        assert_eq!(data, vec![0x1D, 0x21, 0x11]);
    }

    #[test]
    fn test_barcode_code128() {
        let data = {
            let mut b = EscPosBuilder::new();
            b.barcode_code128("6291001234567").expect("barcode");
            b.build()
        };
        // GS k 73 len { B + 13 data bytes
        assert_eq!(&data[..4], &[0x1D, 0x6B, 73, 15]);
        assert_eq!(&data[4..6], b"{B");
        assert_eq!(&data[6..], b"6291001234567");
    }

    #[test]
    fn test_barcode_rejects_bad_data() {
        let mut b = EscPosBuilder::new();
        assert!(b.barcode_code128("").is_err());
        assert!(b.barcode_code128("كود").is_err());
        let long = "9".repeat(300);
        assert!(b.barcode_code128(&long).is_err());
    }

    #[test]
    fn test_full_invoice_block() {
        let mut b = EscPosBuilder::new();
        b.init()
            .center()
            .bold(true)
            .text("SALES INVOICE\n")
            .bold(false)
            .separator()
            .left()
            .text("No: 1024\n")
            .text("Date: 2026-08-02\n")
            .separator()
            .line_pair("Subtotal", "120.00")
            .line_pair("Discount", "10.00")
            .line_pair("TOTAL", "110.00")
            .feed(4)
            .cut();
        let data = b.build();
        assert!(data.len() > 50);
        assert_eq!(&data[..2], &[0x1B, 0x40]);
        // Ends with cut command
        let tail = &data[data.len() - 4..];
        assert_eq!(tail, &[0x1D, 0x56, 0x41, 0x10]);
    }
}
