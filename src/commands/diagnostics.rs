//! Database and diagnostics commands.

use serde_json::Value;
use tracing::info;

use crate::{db, diagnostics};

#[tauri::command]
pub async fn database_health_check(db: tauri::State<'_, db::DbState>) -> Result<Value, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let integrity: String = conn
        .query_row("PRAGMA integrity_check", [], |row| row.get(0))
        .map_err(|e| format!("integrity check: {e}"))?;
    Ok(serde_json::json!({
        "healthy": integrity == "ok",
        "integrity": integrity,
        "path": db.db_path.display().to_string(),
    }))
}

#[tauri::command]
pub async fn database_get_stats(db: tauri::State<'_, db::DbState>) -> Result<Value, String> {
    diagnostics::get_system_health(&db)
}

/// Clear operational data while keeping settings, credentials, and printer
/// profiles (support tool for resetting a demo store).
#[tauri::command]
pub async fn database_clear_operational_data(
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    conn.execute_batch(
        "BEGIN IMMEDIATE;
         DELETE FROM print_jobs;
         DELETE FROM sales_invoice_items;
         DELETE FROM sales_invoices;
         DELETE FROM shop_receipts;
         DELETE FROM legal_case_payments;
         DELETE FROM legal_cases;
         DELETE FROM quotation_items;
         DELETE FROM quotations;
         DELETE FROM maintenance_tickets;
         DELETE FROM sync_queue;
         COMMIT;",
    )
    .map_err(|e| format!("clear operational data: {e}"))?;
    info!("Operational data cleared");
    Ok(serde_json::json!({ "success": true }))
}

#[tauri::command]
pub async fn diagnostics_get_about() -> Result<Value, String> {
    Ok(diagnostics::get_about_info())
}

#[tauri::command]
pub async fn diagnostics_get_system_health(
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    diagnostics::get_system_health(&db)
}

#[tauri::command]
pub async fn diagnostics_export(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    let payload = arg0.unwrap_or_else(|| serde_json::json!({}));
    let options = diagnostics::DiagnosticsExportOptions {
        include_logs: payload
            .get("includeLogs")
            .and_then(Value::as_bool)
            .unwrap_or(true),
        redact_sensitive: payload
            .get("redactSensitive")
            .and_then(Value::as_bool)
            .unwrap_or(false),
    };

    let export_dir = db
        .db_path
        .parent()
        .ok_or("No data directory")?
        .join("diagnostics");
    std::fs::create_dir_all(&export_dir).map_err(|e| format!("create export dir: {e}"))?;

    let zip_path = diagnostics::export_diagnostics_with_options(&db, &export_dir, options)?;
    Ok(serde_json::json!({ "success": true, "path": zip_path }))
}

#[tauri::command]
pub async fn diagnostics_open_export_dir(
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    let export_dir = db
        .db_path
        .parent()
        .ok_or("No data directory")?
        .join("diagnostics");
    std::fs::create_dir_all(&export_dir).map_err(|e| format!("create export dir: {e}"))?;

    #[cfg(target_os = "windows")]
    let opener = "explorer";
    #[cfg(target_os = "macos")]
    let opener = "open";
    #[cfg(all(not(target_os = "windows"), not(target_os = "macos")))]
    let opener = "xdg-open";

    std::process::Command::new(opener)
        .arg(&export_dir)
        .spawn()
        .map_err(|e| format!("open export dir: {e}"))?;
    Ok(serde_json::json!({ "success": true, "path": export_dir.display().to_string() }))
}
