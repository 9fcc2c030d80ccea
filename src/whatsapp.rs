//! WhatsApp deep-link generation.
//!
//! Maintenance status notifications, quotation shares, and storefront product
//! inquiries are all delivered as prefilled `wa.me` links opened in the
//! system browser. Nothing is sent on the customer's behalf — the link only
//! opens a chat with the message drafted.

use reqwest::Url;
use serde_json::Value;
use tracing::info;

/// wa.me rejects numbers longer than 15 digits (E.164 ceiling).
const MAX_PHONE_DIGITS: usize = 15;

/// Strip a phone number down to the digits wa.me expects: no `+`, no
/// separators, no leading zeros.
pub fn normalize_wa_number(raw: &str) -> String {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    digits.trim_start_matches('0').to_string()
}

/// Build a `https://wa.me/<number>?text=<message>` link.
///
/// Fails on empty/overlong numbers; the message is query-encoded by the URL
/// builder so Arabic text and newlines survive intact.
pub fn build_link(phone: &str, message: &str) -> Result<String, String> {
    let number = normalize_wa_number(phone);
    if number.is_empty() {
        return Err("WhatsApp number is required".into());
    }
    if number.len() > MAX_PHONE_DIGITS {
        return Err(format!("WhatsApp number is too long: {number}"));
    }

    let base = format!("https://wa.me/{number}");
    let url = if message.trim().is_empty() {
        Url::parse(&base).map_err(|e| format!("Invalid WhatsApp URL: {e}"))?
    } else {
        Url::parse_with_params(&base, &[("text", message)])
            .map_err(|e| format!("Invalid WhatsApp URL: {e}"))?
    };
    Ok(url.to_string())
}

/// Open a previously built wa.me link in the system browser.
///
/// Only WhatsApp hosts are accepted here; any other external URL must go
/// through the general allowlisted opener.
pub fn open_link(link: &str) -> Result<Value, String> {
    let parsed = Url::parse(link).map_err(|e| format!("Invalid WhatsApp URL: {e}"))?;
    let host = parsed.host_str().unwrap_or_default().to_ascii_lowercase();
    if host != "wa.me" && host != "api.whatsapp.com" {
        return Err(format!("Not a WhatsApp link: {host}"));
    }

    webbrowser::open(parsed.as_str()).map_err(|e| format!("Failed to open WhatsApp link: {e}"))?;
    info!("WhatsApp link opened");
    Ok(serde_json::json!({ "success": true }))
}

// ---------------------------------------------------------------------------
// Message builders
// ---------------------------------------------------------------------------

/// Human label for a maintenance status, as it appears in the notification.
fn maintenance_status_label(status: &str) -> &str {
    match status {
        "received" => "استلمنا الجهاز",
        "in_repair" => "الجهاز قيد الصيانة",
        "ready" => "الجهاز جاهز للاستلام",
        "delivered" => "تم تسليم الجهاز",
        "rejected" => "نعتذر، تعذّر إصلاح الجهاز",
        other => other,
    }
}

/// Status notification for a maintenance ticket.
pub fn maintenance_message(ticket: &Value) -> String {
    let ticket_no = ticket
        .get("ticketNo")
        .or_else(|| ticket.get("ticket_no"))
        .and_then(Value::as_i64)
        .unwrap_or(0);
    let device = ticket
        .get("device")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let status = ticket
        .get("status")
        .and_then(Value::as_str)
        .unwrap_or("received");

    format!(
        "مرحباً، بخصوص تذكرة الصيانة رقم {ticket_no} ({device}): {}.",
        maintenance_status_label(status)
    )
}

/// Share text for a quotation.
pub fn quotation_message(quotation: &Value) -> String {
    let quote_no = quotation
        .get("quoteNo")
        .or_else(|| quotation.get("quote_no"))
        .and_then(Value::as_i64)
        .unwrap_or(0);
    let total = quotation
        .get("total")
        .and_then(Value::as_f64)
        .unwrap_or(0.0);
    let validity = quotation
        .get("validityDays")
        .or_else(|| quotation.get("validity_days"))
        .and_then(Value::as_i64)
        .unwrap_or(15);

    format!(
        "مرحباً، نرفق لكم عرض السعر رقم {quote_no} بإجمالي {total:.2}. العرض ساري لمدة {validity} يوماً."
    )
}

/// Storefront product inquiry, sent by a shopper to the store number.
pub fn storefront_inquiry_message(product: &Value) -> String {
    let name = product
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or("المنتج");
    let code = product
        .get("barcode")
        .or_else(|| product.get("shamelNo"))
        .or_else(|| product.get("shamel_no"))
        .and_then(Value::as_str)
        .unwrap_or_default();

    if code.is_empty() {
        format!("مرحباً، أود الاستفسار عن: {name}")
    } else {
        format!("مرحباً، أود الاستفسار عن: {name} (كود {code})")
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_numbers() {
        assert_eq!(normalize_wa_number("+962 79 123-4567"), "962791234567");
        assert_eq!(normalize_wa_number("00962791234567"), "962791234567");
        assert_eq!(normalize_wa_number("   "), "");
    }

    #[test]
    fn builds_encoded_link() {
        let link = build_link("+962791234567", "مرحباً بكم").expect("link");
        assert!(link.starts_with("https://wa.me/962791234567?text="));
        // The Arabic text must be percent-encoded, not raw
        assert!(!link.contains("مرحباً"));
        assert!(link.contains('%'));
    }

    #[test]
    fn empty_message_omits_text_param() {
        let link = build_link("962791234567", "").expect("link");
        assert_eq!(link, "https://wa.me/962791234567");
    }

    #[test]
    fn rejects_missing_or_overlong_numbers() {
        assert!(build_link("", "hi").is_err());
        assert!(build_link("no digits here", "hi").is_err());
        assert!(build_link("12345678901234567890", "hi").is_err());
    }

    #[test]
    fn maintenance_message_carries_ticket_and_status() {
        let msg = maintenance_message(&serde_json::json!({
            "ticketNo": 42, "device": "مكواة بخار", "status": "ready"
        }));
        assert!(msg.contains("42"));
        assert!(msg.contains("مكواة بخار"));
        assert!(msg.contains("جاهز"));
    }

    #[test]
    fn storefront_inquiry_includes_code_when_present() {
        let with_code = storefront_inquiry_message(&serde_json::json!({
            "name": "سماعات", "barcode": "6291000000017"
        }));
        assert!(with_code.contains("6291000000017"));

        let without_code = storefront_inquiry_message(&serde_json::json!({ "name": "سماعات" }));
        assert!(!without_code.contains("كود"));
    }
}
