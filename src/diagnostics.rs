//! Diagnostics module for Matjar.
//!
//! Provides:
//! - **About info**: version, build timestamp, git SHA, platform
//! - **System health**: sync backlog, print queue state, record counts, DB size
//! - **Diagnostics export**: packages logs, sync counts, last sync errors,
//!   and printer profiles into a zip bundle.
//! - **Log rotation helpers**: used by `lib.rs` to configure rolling log files.

use crate::db::DbState;
use rusqlite::params;
use serde_json::{json, Value};
use std::fs;
use std::io::{Read as _, Write as _};
use std::path::{Path, PathBuf};
use tracing::warn;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Maximum number of log files to retain.
pub const MAX_LOG_FILES: usize = 10;

/// Maximum size per log file in bytes (5 MB).
pub const MAX_LOG_SIZE: u64 = 5 * 1024 * 1024;

#[derive(Debug, Clone, Copy)]
pub struct DiagnosticsExportOptions {
    pub include_logs: bool,
    pub redact_sensitive: bool,
}

impl Default for DiagnosticsExportOptions {
    fn default() -> Self {
        Self {
            include_logs: true,
            redact_sensitive: false,
        }
    }
}

// ---------------------------------------------------------------------------
// About info
// ---------------------------------------------------------------------------

/// Returns version, build timestamp, git SHA, and platform info.
pub fn get_about_info() -> Value {
    json!({
        "version": env!("CARGO_PKG_VERSION"),
        "buildTimestamp": env!("BUILD_TIMESTAMP"),
        "gitSha": env!("BUILD_GIT_SHA"),
        "platform": std::env::consts::OS,
        "arch": std::env::consts::ARCH,
        "rustVersion": env!("CARGO_PKG_RUST_VERSION"),
    })
}

// ---------------------------------------------------------------------------
// System health
// ---------------------------------------------------------------------------

/// Collects system health status for display on the System Health screen.
pub fn get_system_health(db: &DbState) -> Result<Value, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;

    let schema_version: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    let sync_backlog = get_sync_backlog(&conn);
    let print_status = get_print_queue_status(&conn);
    let record_counts = get_record_counts(&conn);

    let pending_sync: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sync_queue WHERE status = 'pending'",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    let db_size = fs::metadata(&db.db_path).map(|m| m.len()).unwrap_or(0);

    Ok(json!({
        "schemaVersion": schema_version,
        "syncBacklog": sync_backlog,
        "printQueue": print_status,
        "recordCounts": record_counts,
        "pendingSync": pending_sync,
        "dbSizeBytes": db_size,
    }))
}

fn get_sync_backlog(conn: &rusqlite::Connection) -> Value {
    let mut result = json!({});
    if let Ok(mut stmt) = conn.prepare(
        "SELECT entity_type, status, COUNT(*) FROM sync_queue GROUP BY entity_type, status",
    ) {
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })
            .ok();
        if let Some(rows) = rows {
            for (entity, status, count) in rows.flatten() {
                result[format!("{entity}.{status}")] = json!(count);
            }
        }
    }
    result
}

fn get_print_queue_status(conn: &rusqlite::Connection) -> Value {
    let mut result = json!({});
    if let Ok(mut stmt) =
        conn.prepare("SELECT status, COUNT(*) FROM print_jobs GROUP BY status")
    {
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })
            .ok();
        if let Some(rows) = rows {
            for (status, count) in rows.flatten() {
                result[status] = json!(count);
            }
        }
    }
    let last_error: Option<String> = conn
        .query_row(
            "SELECT last_error FROM print_jobs WHERE status = 'failed'
             ORDER BY updated_at DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .ok()
        .flatten();
    result["lastError"] = json!(last_error);
    result
}

fn get_record_counts(conn: &rusqlite::Connection) -> Value {
    let mut result = json!({});
    for (key, table) in [
        ("products", "products"),
        ("customers", "customers"),
        ("maintenanceTickets", "maintenance_tickets"),
        ("quotations", "quotations"),
        ("legalCases", "legal_cases"),
        ("shopReceipts", "shop_receipts"),
        ("salesInvoices", "sales_invoices"),
    ] {
        let count: i64 = conn
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                row.get(0)
            })
            .unwrap_or(0);
        result[key] = json!(count);
    }
    result
}

fn get_recent_sync_errors(conn: &rusqlite::Connection, limit: usize) -> Vec<Value> {
    let mut stmt = match conn.prepare(
        "SELECT entity_type, entity_id, operation, last_error, retry_count, updated_at
         FROM sync_queue
         WHERE last_error IS NOT NULL
         ORDER BY updated_at DESC
         LIMIT ?1",
    ) {
        Ok(s) => s,
        Err(_) => return Vec::new(),
    };
    let rows = stmt.query_map(params![limit as i64], |row| {
        Ok(json!({
            "entityType": row.get::<_, String>(0)?,
            "entityId": row.get::<_, String>(1)?,
            "operation": row.get::<_, String>(2)?,
            "error": row.get::<_, Option<String>>(3)?,
            "retryCount": row.get::<_, i64>(4)?,
            "updatedAt": row.get::<_, String>(5)?,
        }))
    });
    match rows {
        Ok(rows) => rows.filter_map(|r| r.ok()).collect(),
        Err(_) => Vec::new(),
    }
}

fn get_printer_diagnostics(conn: &rusqlite::Connection) -> Value {
    let mut profiles = Vec::new();
    if let Ok(mut stmt) = conn.prepare(
        "SELECT id, name, driver_type, printer_name, host, is_default FROM printer_profiles",
    ) {
        let rows = stmt.query_map([], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "name": row.get::<_, String>(1)?,
                "driverType": row.get::<_, String>(2)?,
                "printerName": row.get::<_, Option<String>>(3)?,
                "host": row.get::<_, Option<String>>(4)?,
                "isDefault": row.get::<_, i64>(5)? == 1,
            }))
        });
        if let Ok(rows) = rows {
            profiles.extend(rows.flatten());
        }
    }
    json!({ "profiles": profiles })
}

// ---------------------------------------------------------------------------
// Export
// ---------------------------------------------------------------------------

pub fn export_diagnostics(db: &DbState, output_dir: &Path) -> Result<String, String> {
    export_diagnostics_with_options(db, output_dir, DiagnosticsExportOptions::default())
}

/// Collects diagnostics data and writes a zip file to the given directory.
/// Returns the path to the zip file.
pub fn export_diagnostics_with_options(
    db: &DbState,
    output_dir: &Path,
    export_options: DiagnosticsExportOptions,
) -> Result<String, String> {
    let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S").to_string();
    let zip_name = format!("matjar-diagnostics-{timestamp}.zip");
    let zip_path = output_dir.join(&zip_name);

    let file = fs::File::create(&zip_path)
        .map_err(|e| format!("Failed to create diagnostics zip: {e}"))?;
    let mut zip = zip::ZipWriter::new(file);

    let zip_options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);

    // 1. About info
    let about = redact_value_for_export(get_about_info(), export_options.redact_sensitive);
    zip.start_file("about.json", zip_options)
        .map_err(|e| e.to_string())?;
    zip.write_all(serde_json::to_string_pretty(&about).unwrap().as_bytes())
        .map_err(|e| e.to_string())?;

    // 2. System health (acquires its own lock)
    let health = redact_value_for_export(get_system_health(db)?, export_options.redact_sensitive);
    zip.start_file("system_health.json", zip_options)
        .map_err(|e| e.to_string())?;
    zip.write_all(serde_json::to_string_pretty(&health).unwrap().as_bytes())
        .map_err(|e| e.to_string())?;

    let conn = db.conn.lock().map_err(|e| e.to_string())?;

    // 3. Last 20 sync errors
    let errors = redact_value_for_export(
        json!(get_recent_sync_errors(&conn, 20)),
        export_options.redact_sensitive,
    );
    zip.start_file("sync_errors.json", zip_options)
        .map_err(|e| e.to_string())?;
    zip.write_all(serde_json::to_string_pretty(&errors).unwrap().as_bytes())
        .map_err(|e| e.to_string())?;

    // 4. Printer profiles
    let printers = redact_value_for_export(
        get_printer_diagnostics(&conn),
        export_options.redact_sensitive,
    );
    zip.start_file("printer_diagnostics.json", zip_options)
        .map_err(|e| e.to_string())?;
    zip.write_all(serde_json::to_string_pretty(&printers).unwrap().as_bytes())
        .map_err(|e| e.to_string())?;

    drop(conn);

    // 5. Include log files
    let log_dir = get_log_dir();
    if export_options.include_logs && !export_options.redact_sensitive && log_dir.exists() {
        if let Ok(entries) = fs::read_dir(&log_dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) == Some("log")
                    || path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| n.starts_with("matjar."))
                {
                    let fname = path
                        .file_name()
                        .unwrap_or_default()
                        .to_string_lossy()
                        .to_string();
                    let zip_entry = format!("logs/{fname}");
                    if zip.start_file(&zip_entry, zip_options).is_ok() {
                        if let Ok(f) = fs::File::open(&path) {
                            let mut buf = Vec::new();
                            // Cap at 5MB per file to keep zip manageable
                            let _ = f.take(MAX_LOG_SIZE).read_to_end(&mut buf);
                            let _ = zip.write_all(&buf);
                        }
                    }
                }
            }
        }
    }

    zip.finish().map_err(|e| e.to_string())?;

    Ok(zip_path.to_string_lossy().to_string())
}

fn redact_value_for_export(value: Value, enabled: bool) -> Value {
    if !enabled {
        return value;
    }
    redact_sensitive_fields(value)
}

fn redact_sensitive_fields(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut redacted = serde_json::Map::new();
            for (key, value) in map {
                if should_redact_key(&key) {
                    redacted.insert(key, Value::String("[REDACTED]".to_string()));
                } else {
                    redacted.insert(key, redact_sensitive_fields(value));
                }
            }
            Value::Object(redacted)
        }
        Value::Array(items) => {
            Value::Array(items.into_iter().map(redact_sensitive_fields).collect())
        }
        other => other,
    }
}

fn should_redact_key(key: &str) -> bool {
    let normalized = key.to_ascii_lowercase();
    let sensitive_markers = [
        "api_key", "apikey", "token", "secret", "password", "pin", "authorization", "anon_key",
    ];
    sensitive_markers
        .iter()
        .any(|marker| normalized.contains(marker))
}

// ---------------------------------------------------------------------------
// Log rotation
// ---------------------------------------------------------------------------

/// Returns the log directory path (same location used by lib.rs).
pub fn get_log_dir() -> PathBuf {
    let base = std::env::var("LOCALAPPDATA")
        .or_else(|_| std::env::var("XDG_DATA_HOME"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            #[cfg(target_os = "windows")]
            {
                PathBuf::from(std::env::var("USERPROFILE").unwrap_or_else(|_| ".".into()))
                    .join("AppData")
                    .join("Local")
            }
            #[cfg(not(target_os = "windows"))]
            {
                PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()))
                    .join(".local")
                    .join("share")
            }
        });
    base.join("com.matjar.app").join("logs")
}

/// Prune old log files, keeping only the most recent `MAX_LOG_FILES`.
pub fn prune_old_logs() {
    let log_dir = get_log_dir();
    if !log_dir.exists() {
        return;
    }

    let mut log_files: Vec<(PathBuf, std::time::SystemTime)> = Vec::new();
    if let Ok(entries) = fs::read_dir(&log_dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_file() {
                if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                    if name.starts_with("matjar.") || name == "matjar.log" {
                        let modified = entry
                            .metadata()
                            .ok()
                            .and_then(|m| m.modified().ok())
                            .unwrap_or(std::time::UNIX_EPOCH);
                        log_files.push((path, modified));
                    }
                }
            }
        }
    }

    // Sort newest first
    log_files.sort_by(|a, b| b.1.cmp(&a.1));

    // Remove files beyond the limit
    for (path, _) in log_files.iter().skip(MAX_LOG_FILES) {
        if let Err(e) = fs::remove_file(path) {
            warn!("Failed to prune log file {}: {e}", path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_about_info_has_required_fields() {
        let info = get_about_info();
        assert!(info.get("version").is_some());
        assert!(info.get("buildTimestamp").is_some());
        assert!(info.get("gitSha").is_some());
        assert!(info.get("platform").is_some());
        assert!(info.get("arch").is_some());
    }

    #[test]
    fn test_log_dir_is_stable() {
        let d1 = get_log_dir();
        let d2 = get_log_dir();
        assert_eq!(d1, d2);
        assert!(d1.to_string_lossy().contains("com.matjar.app"));
    }

    #[test]
    fn test_system_health_with_empty_db() {
        let dir = std::env::temp_dir().join(format!("diag_test_{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let db_state = crate::db::init(&dir).unwrap();
        let health = get_system_health(&db_state).unwrap();
        assert!(health.get("schemaVersion").is_some());
        assert!(health.get("syncBacklog").is_some());
        assert!(health.get("printQueue").is_some());
        assert_eq!(health["recordCounts"]["products"], 0);
        // Cleanup
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_export_diagnostics_creates_zip() {
        let dir = std::env::temp_dir().join(format!("diag_export_{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let db_state = crate::db::init(&dir).unwrap();
        let result = export_diagnostics(&db_state, &dir);
        assert!(result.is_ok());
        let zip_path = result.unwrap();
        assert!(std::path::Path::new(&zip_path).exists());
        // Verify it's a valid zip
        let file = std::fs::File::open(&zip_path).unwrap();
        let archive = zip::ZipArchive::new(file).unwrap();
        assert!(archive.len() >= 4); // at least about, health, errors, printers
                                     // Cleanup
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_should_redact_key_matches_sensitive_markers() {
        assert!(should_redact_key("api_key"));
        assert!(should_redact_key("Authorization"));
        assert!(should_redact_key("staff_pin"));
        assert!(!should_redact_key("status"));
    }

    #[test]
    fn test_redact_sensitive_fields_recurses_through_objects() {
        let value = json!({
            "token": "tk-val",
            "nested": {
                "api_key": "key-value",
                "status": "ok"
            },
            "items": [
                { "password": "1234" },
                { "name": "safe" }
            ]
        });

        let redacted = redact_sensitive_fields(value);
        assert_eq!(redacted["token"], json!("[REDACTED]"));
        assert_eq!(redacted["nested"]["api_key"], json!("[REDACTED]"));
        assert_eq!(redacted["nested"]["status"], json!("ok"));
        assert_eq!(redacted["items"][0]["password"], json!("[REDACTED]"));
        assert_eq!(redacted["items"][1]["name"], json!("safe"));
    }
}
