//! Hosted backend API client.
//!
//! Provides authenticated HTTP communication with the hosted backend that
//! owns the canonical copy of the catalog and documents. Used for
//! connectivity testing, sync queue drains, mirror pulls, and the storefront
//! feed publish.

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use reqwest::{Client, Method, StatusCode};
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Default timeout for API requests (30 seconds).
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout used specifically for the lightweight connectivity test.
const CONNECTIVITY_TIMEOUT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// URL normalisation
// ---------------------------------------------------------------------------

/// Normalise the backend URL:
/// - strip trailing slashes
/// - strip a trailing `/api` segment
/// - ensure a scheme is present (https, or http for localhost)
pub fn normalize_backend_url(url: &str) -> String {
    let mut url = url.trim().to_string();

    // Ensure scheme
    if !url.starts_with("http://") && !url.starts_with("https://") {
        if url.starts_with("localhost") || url.starts_with("127.0.0.1") {
            url = format!("http://{url}");
        } else {
            url = format!("https://{url}");
        }
    }

    // Strip trailing slashes
    while url.ends_with('/') {
        url.pop();
    }

    // Strip trailing /api
    if url.ends_with("/api") {
        url.truncate(url.len() - 4);
    }

    // Strip trailing slashes again (in case "/api/" was present)
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
    if compact.starts_with('{') {
        return serde_json::from_str::<Value>(&compact).ok();
    }
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

pub fn extract_api_key_from_connection_string(raw: &str) -> Option<String> {
    decode_connection_string_payload(raw)
        .and_then(|v| {
            v.get("key")
                .and_then(Value::as_str)
                .map(|s| s.trim().to_string())
        })
        .filter(|s| !s.is_empty())
}

pub fn extract_backend_url_from_connection_string(raw: &str) -> Option<String> {
    decode_connection_string_payload(raw)
        .and_then(|v| {
            v.get("url")
                .and_then(Value::as_str)
                .map(normalize_backend_url)
        })
        .filter(|s| !s.is_empty())
}

pub fn extract_store_id_from_connection_string(raw: &str) -> Option<String> {
    decode_connection_string_payload(raw)
        .and_then(|v| {
            v.get("sid")
                .or_else(|| v.get("storeId"))
                .and_then(Value::as_str)
                .map(|s| s.trim().to_string())
        })
        .filter(|s| !s.is_empty())
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

/// Convert a `reqwest::Error` into a user-friendly message.
fn friendly_error(url: &str, err: &reqwest::Error) -> String {
    if err.is_connect() {
        return format!("Cannot reach backend at {url}");
    }
    if err.is_timeout() {
        return format!("Connection to {url} timed out");
    }
    if err.is_builder() {
        return format!("Invalid backend URL: {url}");
    }
    format!("Network error communicating with {url}: {err}")
}

/// Convert an HTTP status code into a user-friendly message.
fn status_error(status: StatusCode) -> String {
    match status.as_u16() {
        401 => "API key is invalid or expired".to_string(),
        403 => "Store not authorized".to_string(),
        404 => "Backend endpoint not found".to_string(),
        s if s >= 500 => format!("Backend server error (HTTP {s})"),
        s => format!("Unexpected response from backend (HTTP {s})"),
    }
}

// ---------------------------------------------------------------------------
// Connectivity test
// ---------------------------------------------------------------------------

/// Result of a connectivity test.
#[derive(serde::Serialize)]
pub struct ConnectivityResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Test connectivity to the backend with a lightweight health-check.
pub async fn test_connectivity(backend_url: &str, api_key: &str) -> ConnectivityResult {
    let url = normalize_backend_url(backend_url);
    let resolved_api_key =
        extract_api_key_from_connection_string(api_key).unwrap_or_else(|| api_key.to_string());
    let health_url = format!("{url}/api/health");

    let client = match Client::builder().timeout(CONNECTIVITY_TIMEOUT).build() {
        Ok(c) => c,
        Err(e) => {
            return ConnectivityResult {
                success: false,
                latency_ms: None,
                error: Some(format!("Failed to create HTTP client: {e}")),
            };
        }
    };

    let start = Instant::now();

    let resp = match client
        .get(&health_url)
        .header("X-Matjar-API-Key", resolved_api_key)
        .send()
        .await
    {
        Ok(r) => r,
        Err(e) => {
            return ConnectivityResult {
                success: false,
                latency_ms: None,
                error: Some(friendly_error(&url, &e)),
            };
        }
    };

    let latency = start.elapsed().as_millis() as u64;
    let status = resp.status();

    if status.is_success() {
        info!(latency_ms = latency, "connectivity test passed");
        ConnectivityResult {
            success: true,
            latency_ms: Some(latency),
            error: None,
        }
    } else {
        ConnectivityResult {
            success: false,
            latency_ms: Some(latency),
            error: Some(status_error(status)),
        }
    }
}

// ---------------------------------------------------------------------------
// Generic authenticated fetch
// ---------------------------------------------------------------------------

/// Perform an authenticated HTTP request to the backend.
///
/// `path` should include the leading slash, e.g. `/api/store/sync/batch`.
/// `method` is an HTTP verb string: "GET", "POST", "PUT", "PATCH", "DELETE".
pub async fn fetch_from_backend(
    backend_url: &str,
    api_key: &str,
    path: &str,
    method: &str,
    body: Option<Value>,
) -> Result<Value, String> {
    let base = normalize_backend_url(backend_url);
    let resolved_api_key =
        extract_api_key_from_connection_string(api_key).unwrap_or_else(|| api_key.to_string());
    let full_url = format!("{base}{path}");

    let http_method: Method = method
        .to_uppercase()
        .parse()
        .map_err(|_| format!("Invalid HTTP method: {method}"))?;

    let client = Client::builder()
        .timeout(DEFAULT_TIMEOUT)
        .build()
        .map_err(|e| format!("Failed to create HTTP client: {e}"))?;

    // Include store_id header — required by the backend's store auth check
    let mut store_id = crate::storage::get_credential("store_id").unwrap_or_default();
    if let Some(decoded_sid) = extract_store_id_from_connection_string(api_key) {
        let existing = store_id.trim();
        if existing.is_empty() || existing != decoded_sid {
            if !existing.is_empty() && existing != decoded_sid {
                warn!(
                    stored_store_id = existing,
                    decoded_store_id = %decoded_sid,
                    "store_id mismatch detected, preferring decoded store id from connection string"
                );
            }
            store_id = decoded_sid.clone();
            let _ = crate::storage::set_credential("store_id", &decoded_sid);
        }
    }

    let mut req = client
        .request(http_method, &full_url)
        .header("X-Matjar-API-Key", resolved_api_key)
        .header("x-store-id", &store_id)
        .header("Content-Type", "application/json");

    if let Some(b) = body {
        // If the frontend pre-serialized the body via JSON.stringify(), it
        // arrives as Value::String containing JSON. Parse it back to avoid
        // double-serialization by reqwest's .json() method.
        let resolved = if let Value::String(ref s) = b {
            serde_json::from_str::<Value>(s).unwrap_or(b)
        } else {
            b
        };
        req = req.json(&resolved);
    }

    let resp = req.send().await.map_err(|e| friendly_error(&base, &e))?;
    let status = resp.status();

    if !status.is_success() {
        // Preserve validation details for diagnostics and sync queue visibility.
        let body_text = resp.text().await.unwrap_or_default();
        let detail = if let Ok(json) = serde_json::from_str::<Value>(&body_text) {
            let message = json
                .get("error")
                .or_else(|| json.get("message"))
                .and_then(Value::as_str)
                .map(|s| s.to_string())
                .unwrap_or_else(|| status_error(status));
            let details = json.get("details").or_else(|| json.get("errors")).cloned();
            if let Some(details) = details {
                format!("{message} (HTTP {}): {}", status.as_u16(), details)
            } else if !body_text.trim().is_empty() && body_text.trim() != message {
                format!("{message} (HTTP {}): {}", status.as_u16(), body_text.trim())
            } else {
                format!("{message} (HTTP {})", status.as_u16())
            }
        } else if !body_text.trim().is_empty() {
            format!(
                "{} (HTTP {}): {}",
                status_error(status),
                status.as_u16(),
                body_text.trim()
            )
        } else {
            format!("{} (HTTP {})", status_error(status), status.as_u16())
        };
        return Err(detail);
    }

    // Return the JSON body, or null for empty 204 responses.
    let body_text = resp.text().await.unwrap_or_default();
    if body_text.is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&body_text).map_err(|e| format!("Invalid JSON from backend: {e}"))
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_backend_url() {
        assert_eq!(
            normalize_backend_url("dashboard.matjar.app"),
            "https://dashboard.matjar.app"
        );
        assert_eq!(
            normalize_backend_url("https://dashboard.matjar.app/"),
            "https://dashboard.matjar.app"
        );
        assert_eq!(
            normalize_backend_url("https://dashboard.matjar.app/api/"),
            "https://dashboard.matjar.app"
        );
        assert_eq!(
            normalize_backend_url("localhost:3000"),
            "http://localhost:3000"
        );
        assert_eq!(
            normalize_backend_url("  127.0.0.1:8080/api  "),
            "http://127.0.0.1:8080"
        );
    }

    #[test]
    fn test_connection_string_json_blob() {
        let raw = r#"{ "key": "mk_live_x", "url": "shop.example.com", "sid": "store-7" }"#;
        assert_eq!(
            extract_api_key_from_connection_string(raw),
            Some("mk_live_x".to_string())
        );
        assert_eq!(
            extract_backend_url_from_connection_string(raw),
            Some("https://shop.example.com".to_string())
        );
        assert_eq!(
            extract_store_id_from_connection_string(raw),
            Some("store-7".to_string())
        );
    }

    #[test]
    fn test_connection_string_base64_blob() {
        let json = r#"{"key":"mk_live_b64","url":"b.example.com","sid":"store-9"}"#;
        let encoded = BASE64_STANDARD.encode(json);
        assert_eq!(
            extract_api_key_from_connection_string(&encoded),
            Some("mk_live_b64".to_string())
        );
        assert_eq!(
            extract_store_id_from_connection_string(&encoded),
            Some("store-9".to_string())
        );
    }

    #[test]
    fn test_connection_string_rejects_plain_key() {
        // A bare API key is not a connection string blob
        assert_eq!(extract_api_key_from_connection_string("mk_live_plain"), None);
    }
}
