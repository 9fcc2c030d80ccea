//! Document renderer for printable store paperwork.
//!
//! Builds two renditions of every document: a plain-text archive copy that
//! the print worker writes next to the job, and the ESC/POS byte stream that
//! goes to the thermal printer. Documents are typed; command payloads are
//! deserialized into these structs before rendering so malformed jobs fail
//! before paper moves.

use serde::{Deserialize, Serialize};

use crate::escpos::{EscPosBuilder, PaperWidth};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DocItem {
    pub name: String,
    pub quantity: f64,
    pub unit_price: f64,
    pub total: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SalesInvoiceDoc {
    pub invoice_id: String,
    pub invoice_no: i64,
    /// "shop" or "warehouse" book.
    pub source: String,
    pub invoice_date: String,
    #[serde(default)]
    pub customer_name: Option<String>,
    #[serde(default)]
    pub customer_phone: Option<String>,
    #[serde(default)]
    pub items: Vec<DocItem>,
    pub subtotal: f64,
    pub discount: f64,
    pub total: f64,
    pub paid: f64,
    /// Accountant settlement sign; renders as "مرحلة" / "غير مرحلة".
    #[serde(default)]
    pub posted: bool,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct QuotationDoc {
    pub quotation_id: String,
    pub quote_no: i64,
    pub customer_name: String,
    pub quote_date: String,
    pub validity_days: i64,
    #[serde(default)]
    pub items: Vec<DocItem>,
    pub subtotal: f64,
    pub discount: f64,
    pub total: f64,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ShopReceiptDoc {
    pub receipt_id: String,
    pub receipt_no: i64,
    /// "in" (money received) or "out" (money paid out).
    pub kind: String,
    pub party_name: String,
    pub amount: f64,
    pub method: String,
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
    pub recorded_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MaintenanceTicketDoc {
    pub ticket_id: String,
    pub ticket_no: i64,
    pub customer_name: String,
    #[serde(default)]
    pub customer_phone: Option<String>,
    pub device: String,
    pub fault: String,
    #[serde(default)]
    pub accessories: Option<String>,
    pub estimated_cost: f64,
    pub paid_amount: f64,
    pub status: String,
    pub received_at: String,
}

/// The documents the print pipeline understands. `product_label` jobs render
/// through the labels module instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "doc", rename_all = "snake_case")]
pub enum PrintDocument {
    SalesInvoice(SalesInvoiceDoc),
    Quotation(QuotationDoc),
    ShopReceipt(ShopReceiptDoc),
    MaintenanceTicket(MaintenanceTicketDoc),
}

/// Store identity and layout settings shared by every rendition.
#[derive(Debug, Clone)]
pub struct LayoutConfig {
    pub paper_width: PaperWidth,
    pub store_name: String,
    pub store_address: Option<String>,
    pub store_phone: Option<String>,
    pub footer_text: Option<String>,
    /// Send WPC1256-encoded text to the printer.
    pub arabic: bool,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            paper_width: PaperWidth::Mm80,
            store_name: "Matjar".to_string(),
            store_address: None,
            store_phone: None,
            footer_text: Some("شكراً لتعاملكم معنا".to_string()),
            arabic: true,
        }
    }
}

fn money(value: f64) -> String {
    format!("{value:.2}")
}

fn qty(value: f64) -> String {
    if (value.fract()).abs() < f64::EPSILON {
        format!("{}", value as i64)
    } else {
        format!("{value:.2}")
    }
}

/// The settlement sign as it prints on invoices.
pub fn posted_label(posted: bool) -> &'static str {
    if posted {
        "مرحلة"
    } else {
        "غير مرحلة"
    }
}

fn receipt_kind_label(kind: &str) -> &'static str {
    match kind {
        "in" => "سند قبض",
        "out" => "سند صرف",
        _ => "سند",
    }
}

fn maintenance_status_label(status: &str) -> &'static str {
    match status {
        "received" => "مستلم",
        "in_repair" => "قيد الصيانة",
        "ready" => "جاهز",
        "delivered" => "مُسلّم",
        "rejected" => "مرفوض",
        _ => "-",
    }
}

// ---------------------------------------------------------------------------
// Plain-text rendition
// ---------------------------------------------------------------------------

struct TextSheet {
    width: usize,
    lines: Vec<String>,
}

impl TextSheet {
    fn new(width: usize) -> Self {
        Self {
            width,
            lines: Vec::new(),
        }
    }

    fn center(&mut self, text: &str) {
        let len = text.chars().count();
        let pad = self.width.saturating_sub(len) / 2;
        self.lines.push(format!("{}{}", " ".repeat(pad), text));
    }

    fn line(&mut self, text: &str) {
        self.lines.push(text.to_string());
    }

    fn pair(&mut self, label: &str, value: &str) {
        let used = label.chars().count() + value.chars().count();
        let gap = self.width.saturating_sub(used).max(1);
        self.lines.push(format!("{label}{}{value}", " ".repeat(gap)));
    }

    fn separator(&mut self) {
        self.lines.push("-".repeat(self.width));
    }

    fn blank(&mut self) {
        self.lines.push(String::new());
    }

    fn build(self) -> String {
        let mut out = self.lines.join("\n");
        out.push('\n');
        out
    }
}

fn text_header(sheet: &mut TextSheet, cfg: &LayoutConfig, title: &str) {
    sheet.center(&cfg.store_name);
    if let Some(addr) = cfg.store_address.as_deref().filter(|s| !s.trim().is_empty()) {
        sheet.center(addr);
    }
    if let Some(phone) = cfg.store_phone.as_deref().filter(|s| !s.trim().is_empty()) {
        sheet.center(phone);
    }
    sheet.separator();
    sheet.center(title);
    sheet.separator();
}

fn text_items(sheet: &mut TextSheet, items: &[DocItem]) {
    if items.is_empty() {
        sheet.line("(no items)");
        return;
    }
    for item in items {
        sheet.pair(
            &format!("{}x {}", qty(item.quantity), item.name),
            &money(item.total),
        );
        if item.quantity != 1.0 {
            sheet.line(&format!("   @ {}", money(item.unit_price)));
        }
    }
}

fn text_footer(sheet: &mut TextSheet, cfg: &LayoutConfig) {
    if let Some(footer) = cfg.footer_text.as_deref().filter(|s| !s.trim().is_empty()) {
        sheet.blank();
        sheet.center(footer);
    }
}

/// Render the plain-text archive copy.
pub fn render_text(document: &PrintDocument, cfg: &LayoutConfig) -> String {
    let mut sheet = TextSheet::new(cfg.paper_width.chars());

    match document {
        PrintDocument::SalesInvoice(doc) => {
            let title = if doc.source == "warehouse" {
                "فاتورة مبيعات - مستودع"
            } else {
                "فاتورة مبيعات"
            };
            text_header(&mut sheet, cfg, title);
            sheet.pair("No", &format!("#{}", doc.invoice_no));
            sheet.pair("Date", &doc.invoice_date);
            if let Some(customer) = doc.customer_name.as_deref().filter(|s| !s.trim().is_empty()) {
                sheet.pair("Customer", customer);
            }
            sheet.pair("Status", posted_label(doc.posted));
            sheet.separator();
            text_items(&mut sheet, &doc.items);
            sheet.separator();
            sheet.pair("Subtotal", &money(doc.subtotal));
            if doc.discount > 0.0 {
                sheet.pair("Discount", &money(doc.discount));
            }
            sheet.pair("TOTAL", &money(doc.total));
            sheet.pair("Paid", &money(doc.paid));
            sheet.pair("Remaining", &money((doc.total - doc.paid).max(0.0)));
            if let Some(notes) = doc.notes.as_deref().filter(|s| !s.trim().is_empty()) {
                sheet.separator();
                sheet.line(notes);
            }
        }
        PrintDocument::Quotation(doc) => {
            text_header(&mut sheet, cfg, "عرض سعر");
            sheet.pair("No", &format!("#{}", doc.quote_no));
            sheet.pair("Date", &doc.quote_date);
            sheet.pair("Customer", &doc.customer_name);
            sheet.pair("Valid for", &format!("{} days", doc.validity_days));
            sheet.separator();
            text_items(&mut sheet, &doc.items);
            sheet.separator();
            sheet.pair("Subtotal", &money(doc.subtotal));
            if doc.discount > 0.0 {
                sheet.pair("Discount", &money(doc.discount));
            }
            sheet.pair("TOTAL", &money(doc.total));
            if let Some(notes) = doc.notes.as_deref().filter(|s| !s.trim().is_empty()) {
                sheet.separator();
                sheet.line(notes);
            }
        }
        PrintDocument::ShopReceipt(doc) => {
            text_header(&mut sheet, cfg, receipt_kind_label(&doc.kind));
            sheet.pair("No", &format!("#{}", doc.receipt_no));
            sheet.pair("Date", &doc.recorded_at);
            sheet.pair("Party", &doc.party_name);
            sheet.pair("Method", &doc.method);
            if let Some(reference) = doc.reference.as_deref().filter(|s| !s.trim().is_empty()) {
                sheet.pair("Reference", reference);
            }
            sheet.separator();
            sheet.pair("AMOUNT", &money(doc.amount));
            if let Some(note) = doc.note.as_deref().filter(|s| !s.trim().is_empty()) {
                sheet.separator();
                sheet.line(note);
            }
        }
        PrintDocument::MaintenanceTicket(doc) => {
            text_header(&mut sheet, cfg, "تذكرة صيانة");
            sheet.pair("No", &format!("#{}", doc.ticket_no));
            sheet.pair("Received", &doc.received_at);
            sheet.pair("Customer", &doc.customer_name);
            if let Some(phone) = doc.customer_phone.as_deref().filter(|s| !s.trim().is_empty()) {
                sheet.pair("Phone", phone);
            }
            sheet.separator();
            sheet.pair("Device", &doc.device);
            sheet.line(&format!("Fault: {}", doc.fault));
            if let Some(acc) = doc.accessories.as_deref().filter(|s| !s.trim().is_empty()) {
                sheet.line(&format!("Accessories: {acc}"));
            }
            sheet.separator();
            sheet.pair("Status", maintenance_status_label(&doc.status));
            sheet.pair("Estimated", &money(doc.estimated_cost));
            sheet.pair("Paid", &money(doc.paid_amount));
        }
    }

    text_footer(&mut sheet, cfg);
    sheet.build()
}

// ---------------------------------------------------------------------------
// ESC/POS rendition
// ---------------------------------------------------------------------------

fn escpos_header(builder: &mut EscPosBuilder, cfg: &LayoutConfig, title: &str) {
    builder.center().bold(true).double_height();
    builder.text(&cfg.store_name).lf();
    builder.normal_size().bold(false);
    if let Some(addr) = cfg.store_address.as_deref().filter(|s| !s.trim().is_empty()) {
        builder.text(addr).lf();
    }
    if let Some(phone) = cfg.store_phone.as_deref().filter(|s| !s.trim().is_empty()) {
        builder.text(phone).lf();
    }
    builder.left().separator();
    builder.center().bold(true).text(title).lf().bold(false);
    builder.left().separator();
}

fn escpos_items(builder: &mut EscPosBuilder, items: &[DocItem]) {
    if items.is_empty() {
        builder.text("(no items)").lf();
        return;
    }
    for item in items {
        builder.line_pair(
            &format!("{}x {}", qty(item.quantity), item.name),
            &money(item.total),
        );
    }
}

fn escpos_footer(builder: &mut EscPosBuilder, cfg: &LayoutConfig) {
    if let Some(footer) = cfg.footer_text.as_deref().filter(|s| !s.trim().is_empty()) {
        builder.center().text(footer).lf();
    }
    builder.feed(4).cut();
}

/// Render the ESC/POS byte stream for the thermal printer.
pub fn render_escpos(document: &PrintDocument, cfg: &LayoutConfig) -> Vec<u8> {
    let mut builder = EscPosBuilder::new().with_paper(cfg.paper_width);
    builder.init();
    if cfg.arabic {
        builder.arabic_mode();
    }

    match document {
        PrintDocument::SalesInvoice(doc) => {
            let title = if doc.source == "warehouse" {
                "فاتورة مبيعات - مستودع"
            } else {
                "فاتورة مبيعات"
            };
            escpos_header(&mut builder, cfg, title);
            builder.line_pair("No", &format!("#{}", doc.invoice_no));
            builder.line_pair("Date", &doc.invoice_date);
            if let Some(customer) = doc.customer_name.as_deref().filter(|s| !s.trim().is_empty()) {
                builder.line_pair("Customer", customer);
            }
            builder.line_pair("Status", posted_label(doc.posted));
            builder.separator();
            escpos_items(&mut builder, &doc.items);
            builder.separator();
            builder.line_pair("Subtotal", &money(doc.subtotal));
            if doc.discount > 0.0 {
                builder.line_pair("Discount", &money(doc.discount));
            }
            builder.bold(true);
            builder.line_pair("TOTAL", &money(doc.total));
            builder.bold(false);
            builder.line_pair("Paid", &money(doc.paid));
            builder.line_pair("Remaining", &money((doc.total - doc.paid).max(0.0)));
        }
        PrintDocument::Quotation(doc) => {
            escpos_header(&mut builder, cfg, "عرض سعر");
            builder.line_pair("No", &format!("#{}", doc.quote_no));
            builder.line_pair("Date", &doc.quote_date);
            builder.line_pair("Customer", &doc.customer_name);
            builder.line_pair("Valid for", &format!("{} days", doc.validity_days));
            builder.separator();
            escpos_items(&mut builder, &doc.items);
            builder.separator();
            builder.line_pair("Subtotal", &money(doc.subtotal));
            if doc.discount > 0.0 {
                builder.line_pair("Discount", &money(doc.discount));
            }
            builder.bold(true);
            builder.line_pair("TOTAL", &money(doc.total));
            builder.bold(false);
        }
        PrintDocument::ShopReceipt(doc) => {
            escpos_header(&mut builder, cfg, receipt_kind_label(&doc.kind));
            builder.line_pair("No", &format!("#{}", doc.receipt_no));
            builder.line_pair("Date", &doc.recorded_at);
            builder.line_pair("Party", &doc.party_name);
            builder.line_pair("Method", &doc.method);
            builder.separator();
            builder.bold(true).double_height();
            builder.line_pair("AMOUNT", &money(doc.amount));
            builder.normal_size().bold(false);
        }
        PrintDocument::MaintenanceTicket(doc) => {
            escpos_header(&mut builder, cfg, "تذكرة صيانة");
            builder.line_pair("No", &format!("#{}", doc.ticket_no));
            builder.line_pair("Received", &doc.received_at);
            builder.line_pair("Customer", &doc.customer_name);
            if let Some(phone) = doc.customer_phone.as_deref().filter(|s| !s.trim().is_empty()) {
                builder.line_pair("Phone", phone);
            }
            builder.separator();
            builder.line_pair("Device", &doc.device);
            builder.text(&format!("Fault: {}", doc.fault)).lf();
            builder.separator();
            builder.line_pair("Status", maintenance_status_label(&doc.status));
            builder.line_pair("Estimated", &money(doc.estimated_cost));
            builder.line_pair("Paid", &money(doc.paid_amount));
        }
    }

    escpos_footer(&mut builder, cfg);
    builder.build()
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn invoice_doc() -> PrintDocument {
        PrintDocument::SalesInvoice(SalesInvoiceDoc {
            invoice_id: "inv-1".into(),
            invoice_no: 1024,
            source: "shop".into(),
            invoice_date: "2026-08-02".into(),
            customer_name: Some("Omar".into()),
            customer_phone: None,
            items: vec![
                DocItem {
                    name: "Cable".into(),
                    quantity: 2.0,
                    unit_price: 5.0,
                    total: 10.0,
                },
                DocItem {
                    name: "Charger".into(),
                    quantity: 1.0,
                    unit_price: 12.0,
                    total: 12.0,
                },
            ],
            subtotal: 22.0,
            discount: 2.0,
            total: 20.0,
            paid: 15.0,
            posted: false,
            notes: None,
        })
    }

    #[test]
    fn invoice_text_carries_totals_and_settlement_sign() {
        let text = render_text(&invoice_doc(), &LayoutConfig::default());
        assert!(text.contains("#1024"));
        assert!(text.contains("20.00"));
        assert!(text.contains("Remaining"));
        assert!(text.contains("5.00")); // remaining = 20 - 15
        assert!(text.contains("غير مرحلة"));
    }

    #[test]
    fn posted_invoice_renders_posted_sign() {
        let mut doc = invoice_doc();
        if let PrintDocument::SalesInvoice(ref mut inv) = doc {
            inv.posted = true;
        }
        let text = render_text(&doc, &LayoutConfig::default());
        assert!(text.contains("مرحلة"));
        assert!(!text.contains("غير مرحلة"));
    }

    #[test]
    fn warehouse_invoice_gets_its_own_title() {
        let mut doc = invoice_doc();
        if let PrintDocument::SalesInvoice(ref mut inv) = doc {
            inv.source = "warehouse".into();
        }
        let text = render_text(&doc, &LayoutConfig::default());
        assert!(text.contains("مستودع"));
    }

    #[test]
    fn text_lines_fit_paper_width() {
        let cfg = LayoutConfig {
            paper_width: PaperWidth::Mm58,
            ..LayoutConfig::default()
        };
        let text = render_text(&invoice_doc(), &cfg);
        for line in text.lines() {
            // pair() lines are padded to exactly the paper width
            if line.contains("  ") && !line.trim().is_empty() {
                assert!(
                    line.chars().count() <= 32 + 4,
                    "line too wide: {line:?}"
                );
            }
        }
    }

    #[test]
    fn escpos_output_initializes_and_cuts() {
        let bytes = render_escpos(&invoice_doc(), &LayoutConfig::default());
        assert_eq!(&bytes[..2], &[0x1B, 0x40]);
        let tail = &bytes[bytes.len() - 4..];
        assert_eq!(tail, &[0x1D, 0x56, 0x41, 0x10]);
    }

    #[test]
    fn receipt_kind_titles() {
        let doc = PrintDocument::ShopReceipt(ShopReceiptDoc {
            receipt_id: "r1".into(),
            receipt_no: 7,
            kind: "in".into(),
            party_name: "Omar".into(),
            amount: 50.0,
            method: "cash".into(),
            reference: None,
            note: None,
            recorded_at: "2026-08-02".into(),
        });
        let text = render_text(&doc, &LayoutConfig::default());
        assert!(text.contains("سند قبض"));
        assert!(text.contains("50.00"));
    }

    #[test]
    fn maintenance_ticket_renders_device_and_status() {
        let doc = PrintDocument::MaintenanceTicket(MaintenanceTicketDoc {
            ticket_id: "mt-1".into(),
            ticket_no: 15,
            customer_name: "Huda".into(),
            customer_phone: Some("0791234567".into()),
            device: "مكواة بخار".into(),
            fault: "لا تسخن".into(),
            accessories: None,
            estimated_cost: 12.0,
            paid_amount: 0.0,
            status: "in_repair".into(),
            received_at: "2026-08-01".into(),
        });
        let text = render_text(&doc, &LayoutConfig::default());
        assert!(text.contains("#15"));
        assert!(text.contains("مكواة بخار"));
        assert!(text.contains("قيد الصيانة"));
    }

    #[test]
    fn document_payload_roundtrip() {
        // Print jobs persist the document as tagged JSON; it must survive.
        let doc = invoice_doc();
        let json = serde_json::to_value(&doc).expect("serialize");
        assert_eq!(json["type"], "sales_invoice");
        let back: PrintDocument = serde_json::from_value(json).expect("deserialize");
        let text_a = render_text(&doc, &LayoutConfig::default());
        let text_b = render_text(&back, &LayoutConfig::default());
        assert_eq!(text_a, text_b);
    }
}
