use reqwest::Url;

use crate::{
    db, value_str, ALLOWED_EXTERNAL_HOSTS, ALLOWED_EXTERNAL_HOST_SUFFIXES, EXTERNAL_URL_MAX_LEN,
};

pub(crate) fn read_local_json(db: &db::DbState, key: &str) -> Result<serde_json::Value, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let raw = db::get_setting(&conn, "local", key);
    if let Some(raw) = raw {
        if let Ok(parsed) = serde_json::from_str::<serde_json::Value>(&raw) {
            return Ok(parsed);
        }
    }
    Ok(serde_json::Value::Null)
}

pub(crate) fn write_local_json(
    db: &db::DbState,
    key: &str,
    value: &serde_json::Value,
) -> Result<(), String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    db::set_setting(&conn, "local", key, &value.to_string())
}

/// Digits-only phone normalization shared by customer lookups and the
/// WhatsApp link builder.
pub(crate) fn normalize_phone(value: &str) -> String {
    value
        .chars()
        .filter(|c| c.is_ascii_digit())
        .collect::<String>()
}

/// Today's date as stored in date columns (UTC, YYYY-MM-DD).
pub(crate) fn today() -> String {
    chrono::Utc::now().format("%Y-%m-%d").to_string()
}

/// Reject date strings in the future (intake dates, receipt dates).
pub(crate) fn validate_date_not_future(date: &str, label: &str) -> Result<(), String> {
    let parsed = chrono::NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d")
        .map_err(|_| format!("{label} must be a YYYY-MM-DD date"))?;
    let today = chrono::Utc::now().date_naive();
    if parsed > today {
        return Err(format!("{label} cannot be in the future"));
    }
    Ok(())
}

pub(crate) fn validate_external_url(
    url_raw: &str,
    db: Option<&db::DbState>,
) -> Result<Url, String> {
    let trimmed = url_raw.trim();
    if trimmed.is_empty() {
        return Err("External URL cannot be empty".into());
    }
    if trimmed.len() > EXTERNAL_URL_MAX_LEN {
        return Err("External URL is too long".into());
    }

    let parsed = Url::parse(trimmed).map_err(|e| format!("Invalid external URL: {e}"))?;
    let scheme = parsed.scheme().to_ascii_lowercase();
    if scheme != "https" && scheme != "http" {
        return Err("Only http/https URLs are allowed".into());
    }
    if !parsed.username().is_empty() || parsed.password().is_some() {
        return Err("Credentialed URLs are not allowed".into());
    }

    let host = parsed
        .host_str()
        .ok_or("External URL is missing a host")?
        .to_ascii_lowercase();
    let localhost_http = scheme == "http" && matches!(host.as_str(), "localhost" | "127.0.0.1");

    if !localhost_http {
        let mut custom_hosts: Vec<String> = Vec::new();
        if let Some(db_state) = db {
            if let Ok(conn) = db_state.conn.lock() {
                let raw = db::get_setting(&conn, "security", "allowed_external_hosts")
                    .or_else(|| db::get_setting(&conn, "system", "allowed_external_hosts"))
                    .unwrap_or_default();
                if let Ok(arr) = serde_json::from_str::<Vec<String>>(&raw) {
                    custom_hosts = arr
                        .into_iter()
                        .map(|s| s.trim().to_ascii_lowercase())
                        .filter(|s| !s.is_empty())
                        .collect();
                } else if !raw.trim().is_empty() {
                    custom_hosts = raw
                        .split(',')
                        .map(|s| s.trim().to_ascii_lowercase())
                        .filter(|s| !s.is_empty())
                        .collect();
                }
            }
        }

        let exact_allowed =
            ALLOWED_EXTERNAL_HOSTS.iter().any(|h| host == *h) || custom_hosts.contains(&host);
        let suffix_allowed = ALLOWED_EXTERNAL_HOST_SUFFIXES
            .iter()
            .any(|suffix| host.ends_with(suffix))
            || custom_hosts
                .iter()
                .any(|base| host.ends_with(&format!(".{base}")));
        if !exact_allowed && !suffix_allowed {
            return Err(format!("External host is not allowlisted: {host}"));
        }
    }

    Ok(parsed)
}

/// Shared JSON row helper: pull the string id out of a payload that may be a
/// bare string or an object with one of the given keys.
pub(crate) fn payload_arg0_as_string(
    arg0: Option<serde_json::Value>,
    keys: &[&str],
) -> Option<String> {
    match arg0 {
        Some(serde_json::Value::String(s)) => {
            let trimmed = s.trim().to_string();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed)
            }
        }
        Some(value) => value_str(&value, keys),
        None => None,
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_phone_strips_everything_but_digits() {
        assert_eq!(normalize_phone("+962 (79) 123-4567"), "962791234567");
        assert_eq!(normalize_phone("no digits"), "");
    }

    #[test]
    fn future_dates_are_rejected() {
        assert!(validate_date_not_future("2020-01-15", "Received date").is_ok());
        assert!(validate_date_not_future(&today(), "Received date").is_ok());
        assert!(validate_date_not_future("2099-01-01", "Received date").is_err());
        assert!(validate_date_not_future("not-a-date", "Received date").is_err());
    }

    #[test]
    fn payload_arg0_accepts_string_or_object() {
        assert_eq!(
            payload_arg0_as_string(Some(serde_json::json!("abc")), &["id"]),
            Some("abc".to_string())
        );
        assert_eq!(
            payload_arg0_as_string(Some(serde_json::json!({ "productId": "p1" })), &["productId"]),
            Some("p1".to_string())
        );
        assert_eq!(payload_arg0_as_string(None, &["id"]), None);
        assert_eq!(
            payload_arg0_as_string(Some(serde_json::json!("   ")), &["id"]),
            None
        );
    }
}
