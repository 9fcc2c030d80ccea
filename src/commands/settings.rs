//! Settings and store configuration commands.

use serde_json::Value;
use tauri::Emitter;

use crate::{api, db, payload_arg0_as_string, storage, sync, value_str};

fn parse_category_key(
    arg0: Option<Value>,
    arg1: Option<Value>,
) -> (Option<String>, Option<String>) {
    match (arg0, arg1) {
        (Some(Value::String(category)), Some(Value::String(key))) => (Some(category), Some(key)),
        (Some(Value::String(key)), None) => (None, Some(key)),
        (Some(value), _) => (
            value_str(&value, &["category"]),
            value_str(&value, &["key", "setting", "name"]),
        ),
        _ => (None, None),
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// Full settings dump: local_settings grouped by category plus the keyring
/// config (secrets included — this feeds the admin settings screen only).
#[tauri::command]
pub async fn get_settings(db: tauri::State<'_, db::DbState>) -> Result<Value, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let mut settings = db::get_all_settings(&conn);
    settings["store_config"] = storage::get_full_config();
    Ok(settings)
}

#[tauri::command]
pub async fn settings_is_configured() -> Result<Value, String> {
    Ok(serde_json::json!({ "configured": storage::is_configured() }))
}

#[tauri::command]
pub async fn settings_get(
    arg0: Option<Value>,
    arg1: Option<Value>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    let (category, key) = parse_category_key(arg0, arg1);
    let key = key.ok_or("Missing setting key")?;
    let category = category.unwrap_or_else(|| "store".to_string());
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    Ok(match db::get_setting(&conn, &category, &key) {
        Some(v) => Value::String(v),
        None => Value::Null,
    })
}

#[tauri::command]
pub async fn settings_set(
    arg0: Option<Value>,
    arg1: Option<Value>,
    arg2: Option<Value>,
    db: tauri::State<'_, db::DbState>,
    app: tauri::AppHandle,
) -> Result<Value, String> {
    // Accept (category, key, value) or a single {category, key, value} object
    let (category, key, value) = match (arg0, arg1, arg2) {
        (Some(Value::String(category)), Some(Value::String(key)), Some(value)) => {
            (category, key, value)
        }
        (Some(payload), None, None) => {
            let category =
                value_str(&payload, &["category"]).unwrap_or_else(|| "store".to_string());
            let key = value_str(&payload, &["key"]).ok_or("Missing setting key")?;
            let value = payload
                .get("value")
                .cloned()
                .ok_or("Missing setting value")?;
            (category, key, value)
        }
        _ => return Err("Invalid settings payload".into()),
    };

    let stored = match &value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };

    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    db::set_setting(&conn, &category, &key, &stored)?;
    let _ = app.emit(
        "settings_changed",
        serde_json::json!({ "category": category, "key": key }),
    );
    Ok(serde_json::json!({ "success": true }))
}

/// Bulk update of one category from an object payload.
#[tauri::command]
pub async fn settings_update_local(
    arg0: Option<Value>,
    arg1: Option<Value>,
    db: tauri::State<'_, db::DbState>,
    app: tauri::AppHandle,
) -> Result<Value, String> {
    let (category, values) = match (arg0, arg1) {
        (Some(Value::String(category)), Some(values)) => (category, values),
        (Some(payload), None) => {
            let category =
                value_str(&payload, &["category"]).unwrap_or_else(|| "store".to_string());
            let values = payload
                .get("values")
                .or_else(|| payload.get("settings"))
                .cloned()
                .unwrap_or_else(|| payload.clone());
            (category, values)
        }
        _ => return Err("Invalid settings payload".into()),
    };

    let values = values
        .as_object()
        .ok_or("Settings values must be an object")?
        .clone();

    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let mut updated = 0usize;
    for (key, value) in values {
        if key == "category" {
            continue;
        }
        let stored = match &value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        db::set_setting(&conn, &category, &key, &stored)?;
        updated += 1;
    }
    let _ = app.emit(
        "settings_changed",
        serde_json::json!({ "category": category }),
    );
    Ok(serde_json::json!({ "success": true, "updated": updated }))
}

#[tauri::command]
pub async fn settings_update_store_credentials(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
    app: tauri::AppHandle,
) -> Result<Value, String> {
    let payload = arg0.ok_or("Missing credentials payload")?;
    let result = storage::update_store_credentials(&payload)?;

    // Mirror the non-secret parts into local_settings for offline reads
    {
        let conn = db.conn.lock().map_err(|e| e.to_string())?;
        if let Some(store_id) = storage::get_credential("store_id") {
            db::set_setting(&conn, "store", "store_id", &store_id)?;
        }
        if let Some(url) = storage::get_credential("backend_url") {
            db::set_setting(&conn, "store", "backend_url", &url)?;
        }
    }

    let _ = app.emit("store_configured", serde_json::json!({}));
    Ok(result)
}

#[tauri::command]
pub async fn settings_get_backend_url() -> Result<Value, String> {
    Ok(match storage::get_credential("backend_url") {
        Some(url) => Value::String(api::normalize_backend_url(&url)),
        None => Value::Null,
    })
}

#[tauri::command]
pub async fn settings_test_connection() -> Result<Value, String> {
    let backend_url =
        storage::get_credential("backend_url").ok_or("Store not configured: missing backend URL")?;
    let api_key =
        storage::get_credential("api_key").ok_or("Store not configured: missing API key")?;
    let result = api::test_connectivity(&backend_url, &api_key).await;
    serde_json::to_value(result).map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn settings_clear_connection(app: tauri::AppHandle) -> Result<Value, String> {
    let result = storage::factory_reset()?;
    let _ = app.emit("store_disconnected", serde_json::json!({}));
    Ok(result)
}

/// Factory reset: wipe credentials AND all local data.
#[tauri::command]
pub async fn settings_factory_reset(
    db: tauri::State<'_, db::DbState>,
    sync_state: tauri::State<'_, std::sync::Arc<sync::SyncState>>,
    app: tauri::AppHandle,
) -> Result<Value, String> {
    sync_state.shutdown.cancel();

    {
        let conn = db.conn.lock().map_err(|e| e.to_string())?;
        conn.execute_batch(
            "BEGIN IMMEDIATE;
             DELETE FROM print_jobs;
             DELETE FROM printer_profiles;
             DELETE FROM sales_invoice_items;
             DELETE FROM sales_invoices;
             DELETE FROM shop_receipts;
             DELETE FROM legal_case_payments;
             DELETE FROM legal_cases;
             DELETE FROM quotation_items;
             DELETE FROM quotations;
             DELETE FROM maintenance_tickets;
             DELETE FROM customers;
             DELETE FROM products;
             DELETE FROM sync_queue;
             DELETE FROM counters;
             DELETE FROM staff_sessions;
             DELETE FROM local_settings;
             COMMIT;",
        )
        .map_err(|e| format!("factory reset: {e}"))?;
    }

    storage::factory_reset()?;
    let _ = app.emit("app_reset", serde_json::json!({ "reason": "factory_reset" }));
    Ok(serde_json::json!({ "success": true }))
}

#[tauri::command]
pub async fn settings_get_language(db: tauri::State<'_, db::DbState>) -> Result<Value, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    Ok(Value::String(
        db::get_setting(&conn, "store", "language").unwrap_or_else(|| "ar".into()),
    ))
}

#[tauri::command]
pub async fn settings_set_language(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
    app: tauri::AppHandle,
) -> Result<Value, String> {
    let language =
        payload_arg0_as_string(arg0, &["language", "lang", "value"]).ok_or("Missing language")?;
    if !matches!(language.as_str(), "ar" | "en") {
        return Err(format!("Unsupported language: {language}"));
    }
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    db::set_setting(&conn, "store", "language", &language)?;
    let _ = app.emit("settings_changed", serde_json::json!({ "key": "language" }));
    Ok(serde_json::json!({ "success": true }))
}

#[tauri::command]
pub async fn store_config_get_full() -> Result<Value, String> {
    Ok(storage::get_full_config())
}

#[tauri::command]
pub async fn store_config_get(arg0: Option<Value>) -> Result<Value, String> {
    let key = payload_arg0_as_string(arg0, &["key", "name"]);
    Ok(storage::get_config_value(key.as_deref()))
}
