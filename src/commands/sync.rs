//! Sync engine commands.

use serde_json::Value;
use std::sync::Arc;

use crate::{api, db, storage, sync, value_i64};

#[tauri::command]
pub async fn sync_get_status(
    db: tauri::State<'_, db::DbState>,
    sync_state: tauri::State<'_, Arc<sync::SyncState>>,
) -> Result<Value, String> {
    sync::get_sync_status(&db, &sync_state)
}

#[tauri::command]
pub async fn sync_get_network_status() -> Result<Value, String> {
    Ok(sync::check_network_status().await)
}

#[tauri::command]
pub async fn sync_force(
    db: tauri::State<'_, db::DbState>,
    sync_state: tauri::State<'_, Arc<sync::SyncState>>,
) -> Result<Value, String> {
    sync::force_sync(&db, &sync_state).await
}

#[tauri::command]
pub async fn sync_retry_failed(db: tauri::State<'_, db::DbState>) -> Result<Value, String> {
    sync::retry_failed(&db)
}

#[tauri::command]
pub async fn sync_clear_failed(db: tauri::State<'_, db::DbState>) -> Result<Value, String> {
    sync::clear_failed(&db)
}

#[tauri::command]
pub async fn sync_prune_synced(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    let days = arg0
        .as_ref()
        .and_then(Value::as_i64)
        .or_else(|| {
            arg0.as_ref()
                .and_then(|v| value_i64(v, &["days", "olderThanDays", "older_than_days"]))
        })
        .unwrap_or(30)
        .max(1);
    sync::prune_synced(&db, days)
}

/// Generic authenticated proxy to the backend, for UI surfaces that need an
/// endpoint without a dedicated command.
#[tauri::command]
pub async fn api_fetch_from_backend(
    arg0: Option<Value>,
    arg1: Option<Value>,
    arg2: Option<Value>,
) -> Result<Value, String> {
    let base = arg0.unwrap_or_else(|| serde_json::json!({}));
    let path = crate::payload_arg0_as_string(Some(base.clone()), &["path", "endpoint", "url"])
        .ok_or("Missing API path")?;
    if !path.starts_with("/api/") {
        return Err("Backend paths must start with /api/".into());
    }
    let method = arg1
        .as_ref()
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| crate::value_str(&base, &["method"]))
        .unwrap_or_else(|| "GET".to_string());
    let body = arg2.or_else(|| base.get("body").cloned());

    let backend_url =
        storage::get_credential("backend_url").ok_or("Store not configured: missing backend URL")?;
    let api_key =
        storage::get_credential("api_key").ok_or("Store not configured: missing API key")?;

    api::fetch_from_backend(&backend_url, &api_key, &path, &method, body).await
}
