//! Secure store config storage using the OS credential store.
//!
//! On Windows this uses DPAPI (via the `keyring` crate), on macOS Keychain,
//! and on Linux the Secret Service API. Holds the hosted-backend connection
//! (URL + API key), the store identity, and the managed database keys the
//! storefront feed is published through.

use keyring::Entry;
use serde_json::Value;
use tracing::{info, warn};
use zeroize::Zeroize;

const SERVICE_NAME: &str = "matjar";

// Credential keys
const KEY_BACKEND_URL: &str = "backend_url";
const KEY_STORE_ID: &str = "store_id";
const KEY_API_KEY: &str = "api_key";
const KEY_ORG_ID: &str = "organization_id";
const KEY_SUPABASE_URL: &str = "supabase_url";
const KEY_SUPABASE_ANON_KEY: &str = "supabase_anon_key";
const KEY_STOREFRONT_URL: &str = "storefront_url";
const KEY_WHATSAPP_NUMBER: &str = "whatsapp_number";

/// All credential keys managed by this module.
const ALL_KEYS: &[&str] = &[
    KEY_BACKEND_URL,
    KEY_STORE_ID,
    KEY_API_KEY,
    KEY_ORG_ID,
    KEY_SUPABASE_URL,
    KEY_SUPABASE_ANON_KEY,
    KEY_STOREFRONT_URL,
    KEY_WHATSAPP_NUMBER,
];

// ---------------------------------------------------------------------------
// Low-level helpers
// ---------------------------------------------------------------------------

/// Retrieve a single credential from the OS keyring. Returns `None` when the
/// entry does not exist (or the platform returns a "not found" error).
pub fn get_credential(key: &str) -> Option<String> {
    let entry = match Entry::new(SERVICE_NAME, key) {
        Ok(e) => e,
        Err(e) => {
            warn!(key, error = %e, "keyring: failed to create entry");
            return None;
        }
    };
    match entry.get_password() {
        Ok(pw) => Some(pw),
        Err(keyring::Error::NoEntry) => None,
        Err(e) => {
            warn!(key, error = %e, "keyring: failed to read credential");
            None
        }
    }
}

/// Store a credential in the OS keyring.
pub fn set_credential(key: &str, value: &str) -> Result<(), String> {
    let entry = Entry::new(SERVICE_NAME, key).map_err(|e| e.to_string())?;
    entry.set_password(value).map_err(|e| e.to_string())?;
    Ok(())
}

/// Delete a credential from the OS keyring. Silently succeeds if the entry
/// does not exist.
pub fn delete_credential(key: &str) -> Result<(), String> {
    let entry = Entry::new(SERVICE_NAME, key).map_err(|e| e.to_string())?;
    match entry.delete_credential() {
        Ok(()) => Ok(()),
        Err(keyring::Error::NoEntry) => Ok(()),
        Err(e) => Err(e.to_string()),
    }
}

pub fn has_credential(key: &str) -> bool {
    get_credential(key).is_some()
}

// ---------------------------------------------------------------------------
// High-level API
// ---------------------------------------------------------------------------

/// The store is considered configured when backend URL, store ID, and API
/// key are all present in the credential store.
pub fn is_configured() -> bool {
    has_credential(KEY_BACKEND_URL) && has_credential(KEY_STORE_ID) && has_credential(KEY_API_KEY)
}

/// Return all stored config as a JSON value the UI settings screen expects.
pub fn get_full_config() -> Value {
    serde_json::json!({
        "store_id":          get_credential(KEY_STORE_ID),
        "organization_id":   get_credential(KEY_ORG_ID),
        "backend_url":       get_credential(KEY_BACKEND_URL),
        "api_key":           get_credential(KEY_API_KEY),
        "supabase_url":      get_credential(KEY_SUPABASE_URL),
        "supabase_anon_key": get_credential(KEY_SUPABASE_ANON_KEY),
        "storefront_url":    get_credential(KEY_STOREFRONT_URL),
        "whatsapp_number":   get_credential(KEY_WHATSAPP_NUMBER),
    })
}

/// Store backend credentials received during onboarding.
///
/// Expected JSON shape (camelCase, matching the UI payload):
/// ```json
/// {
///   "storeId": "...",
///   "apiKey": "...",
///   "backendUrl": "...",      // optional when the apiKey is a connection string
///   "organizationId": "..."   // optional
/// }
/// ```
/// The `apiKey` may be a plain key or a base64 connection string blob that
/// also carries `url` and `sid`; the blob wins over the explicit fields.
pub fn update_store_credentials(payload: &Value) -> Result<Value, String> {
    let raw_api_key = payload
        .get("apiKey")
        .or_else(|| payload.get("api_key"))
        .and_then(Value::as_str)
        .ok_or("Missing required field: apiKey")?;
    let mut store_id = payload
        .get("storeId")
        .or_else(|| payload.get("store_id"))
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    let mut backend_url = payload
        .get("backendUrl")
        .or_else(|| payload.get("backend_url"))
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    let mut api_key = raw_api_key.trim().to_string();
    if let Some(decoded_key) = crate::api::extract_api_key_from_connection_string(raw_api_key) {
        api_key.zeroize();
        api_key = decoded_key;
        if let Some(decoded_sid) = crate::api::extract_store_id_from_connection_string(raw_api_key)
        {
            store_id = Some(decoded_sid);
        }
        if let Some(decoded_url) =
            crate::api::extract_backend_url_from_connection_string(raw_api_key)
        {
            backend_url = Some(decoded_url);
        }
    }

    let store_id = store_id.ok_or("Missing required field: storeId")?;
    if api_key.trim().is_empty() {
        return Err("Missing required field: apiKey".to_string());
    }

    set_credential(KEY_STORE_ID, &store_id)?;
    set_credential(KEY_API_KEY, api_key.trim())?;
    api_key.zeroize();

    if let Some(url) = backend_url.as_deref() {
        let normalized = crate::api::normalize_backend_url(url);
        if !normalized.trim().is_empty() {
            set_credential(KEY_BACKEND_URL, normalized.trim())?;
        }
    }
    if let Some(oid) = payload
        .get("organizationId")
        .or_else(|| payload.get("organization_id"))
        .and_then(Value::as_str)
    {
        set_credential(KEY_ORG_ID, oid)?;
    }
    if let Some(surl) = payload
        .get("supabaseUrl")
        .or_else(|| payload.get("supabase_url"))
        .and_then(Value::as_str)
    {
        set_credential(KEY_SUPABASE_URL, surl)?;
    }
    if let Some(skey) = payload
        .get("supabaseAnonKey")
        .or_else(|| payload.get("supabase_anon_key"))
        .and_then(Value::as_str)
    {
        set_credential(KEY_SUPABASE_ANON_KEY, skey)?;
    }
    if let Some(wa) = payload
        .get("whatsappNumber")
        .or_else(|| payload.get("whatsapp_number"))
        .and_then(Value::as_str)
    {
        set_credential(KEY_WHATSAPP_NUMBER, wa)?;
    }

    info!(store_id = %store_id, "store credentials updated");
    Ok(serde_json::json!({ "success": true }))
}

/// Delete every stored credential (factory reset).
pub fn factory_reset() -> Result<Value, String> {
    info!("performing factory reset – deleting all credentials");
    for key in ALL_KEYS {
        delete_credential(key)?;
    }
    Ok(serde_json::json!({ "success": true }))
}

/// Read a single store config value by key name.
pub fn get_config_value(key: Option<&str>) -> Value {
    match key {
        Some(k) => match get_credential(k) {
            Some(v) => Value::String(v),
            None => Value::Null,
        },
        None => Value::Null,
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    // These tests hit the real OS keyring, so they share global state with
    // each other and must run serially.

    #[test]
    #[serial]
    fn test_credential_roundtrip() {
        let key = "test_roundtrip_key";
        set_credential(key, "value-1").expect("set");
        assert_eq!(get_credential(key), Some("value-1".to_string()));

        set_credential(key, "value-2").expect("overwrite");
        assert_eq!(get_credential(key), Some("value-2".to_string()));

        delete_credential(key).expect("delete");
        assert_eq!(get_credential(key), None);
    }

    #[test]
    #[serial]
    fn test_delete_missing_credential_is_ok() {
        delete_credential("test_never_existed").expect("delete of missing entry succeeds");
    }

    #[test]
    #[serial]
    fn test_update_store_credentials_requires_api_key() {
        let err = update_store_credentials(&serde_json::json!({ "storeId": "s-1" }))
            .expect_err("missing apiKey should fail");
        assert!(err.contains("apiKey"));
    }

    #[test]
    #[serial]
    fn test_update_store_credentials_plain_key() {
        let result = update_store_credentials(&serde_json::json!({
            "storeId": "store-test-1",
            "apiKey": "mk_live_abc123",
            "backendUrl": "dashboard.matjar.app"
        }))
        .expect("update should succeed");
        assert_eq!(result["success"], true);
        assert_eq!(
            get_credential(KEY_BACKEND_URL),
            Some("https://dashboard.matjar.app".to_string())
        );

        factory_reset().expect("cleanup");
        assert!(!is_configured());
    }
}
