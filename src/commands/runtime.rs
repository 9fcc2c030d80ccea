//! App lifecycle and system commands.

use serde_json::Value;
use std::sync::atomic::Ordering;
use tracing::info;

use crate::{payload_arg0_as_string, validate_external_url, whatsapp, APP_START_EPOCH};

#[tauri::command]
pub async fn app_get_version() -> Result<Value, String> {
    Ok(serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "buildTimestamp": env!("BUILD_TIMESTAMP"),
        "gitSha": env!("BUILD_GIT_SHA"),
    }))
}

#[tauri::command]
pub async fn system_get_info() -> Result<Value, String> {
    let start = APP_START_EPOCH.load(Ordering::Relaxed);
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    Ok(serde_json::json!({
        "platform": std::env::consts::OS,
        "arch": std::env::consts::ARCH,
        "appVersion": env!("CARGO_PKG_VERSION"),
        "uptimeSeconds": now.saturating_sub(start),
    }))
}

#[tauri::command]
pub async fn app_shutdown(app: tauri::AppHandle) -> Result<Value, String> {
    info!("Shutdown requested from UI");
    app.exit(0);
    Ok(serde_json::json!({ "success": true }))
}

#[tauri::command]
pub async fn app_restart(app: tauri::AppHandle) -> Result<Value, String> {
    info!("Restart requested from UI");
    app.restart();
}

/// Open an allowlisted external URL in the system browser.
#[tauri::command]
pub async fn system_open_external_url(
    arg0: Option<Value>,
    db: tauri::State<'_, crate::db::DbState>,
) -> Result<Value, String> {
    let url = payload_arg0_as_string(arg0, &["url", "href", "target", "value"])
        .ok_or("Missing external URL payload")?;
    let parsed = validate_external_url(&url, Some(&db))?;
    webbrowser::open(parsed.as_str()).map_err(|e| format!("Failed to open external URL: {e}"))?;
    Ok(serde_json::json!({ "success": true }))
}

/// Open a prepared wa.me link (maintenance notification, quotation share,
/// storefront inquiry).
#[tauri::command]
pub async fn whatsapp_open_link(arg0: Option<Value>) -> Result<Value, String> {
    let link =
        payload_arg0_as_string(arg0, &["link", "url", "value"]).ok_or("Missing WhatsApp link")?;
    whatsapp::open_link(&link)
}
