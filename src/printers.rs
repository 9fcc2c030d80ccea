//! Printer profile store and raw dispatch.
//!
//! Profiles live in the `printer_profiles` table. Three driver types:
//! - `system`: hand the rendered bytes to the OS print service
//! - `network`: raw TCP to a JetDirect-style port (9100)
//! - `file`: write the bytes into the spool directory (kiosk/testing setups)

use rusqlite::params;
use serde_json::Value;
use std::io::Write;
use std::net::TcpStream;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::DbState;

const NETWORK_TIMEOUT: Duration = Duration::from_secs(5);

fn non_empty_str(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

// ---------------------------------------------------------------------------
// System printer enumeration
// ---------------------------------------------------------------------------

/// List printer names known to the OS.
#[cfg(target_os = "windows")]
pub fn list_system_printers() -> Vec<String> {
    let output = std::process::Command::new("powershell")
        .args([
            "-NoProfile",
            "-NonInteractive",
            "-Command",
            "Get-Printer | Select-Object -ExpandProperty Name",
        ])
        .output();
    match output {
        Ok(out) if out.status.success() => String::from_utf8_lossy(&out.stdout)
            .lines()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect(),
        _ => Vec::new(),
    }
}

/// List printer names known to the OS.
#[cfg(not(target_os = "windows"))]
pub fn list_system_printers() -> Vec<String> {
    let output = std::process::Command::new("lpstat").arg("-e").output();
    match output {
        Ok(out) if out.status.success() => String::from_utf8_lossy(&out.stdout)
            .lines()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect(),
        _ => Vec::new(),
    }
}

// ---------------------------------------------------------------------------
// Profile CRUD
// ---------------------------------------------------------------------------

fn profile_row_to_json(row: &rusqlite::Row<'_>) -> rusqlite::Result<Value> {
    Ok(serde_json::json!({
        "id": row.get::<_, String>(0)?,
        "name": row.get::<_, String>(1)?,
        "driverType": row.get::<_, String>(2)?,
        "printerName": row.get::<_, Option<String>>(3)?,
        "host": row.get::<_, Option<String>>(4)?,
        "port": row.get::<_, Option<i64>>(5)?,
        "paperWidthMm": row.get::<_, i64>(6)?,
        "isDefault": row.get::<_, i64>(7)? == 1,
        "createdAt": row.get::<_, String>(8)?,
        "updatedAt": row.get::<_, String>(9)?,
    }))
}

const PROFILE_COLUMNS: &str = "id, name, driver_type, printer_name, host, port, paper_width_mm,
                               is_default, created_at, updated_at";

/// Create a printer profile from a UI payload.
pub fn create_profile(db: &DbState, profile: &Value) -> Result<Value, String> {
    let name = non_empty_str(profile.get("name").and_then(Value::as_str))
        .ok_or("Profile name is required")?;
    let driver_type = non_empty_str(
        profile
            .get("driverType")
            .or_else(|| profile.get("driver_type"))
            .and_then(Value::as_str),
    )
    .unwrap_or_else(|| "system".to_string());
    if !matches!(driver_type.as_str(), "system" | "network" | "file") {
        return Err(format!("Unknown driver type: {driver_type}"));
    }
    let printer_name = non_empty_str(
        profile
            .get("printerName")
            .or_else(|| profile.get("printer_name"))
            .and_then(Value::as_str),
    );
    if driver_type == "system" && printer_name.is_none() {
        return Err("System profiles need a printerName".into());
    }
    let host = non_empty_str(profile.get("host").and_then(Value::as_str));
    if driver_type == "network" && host.is_none() {
        return Err("Network profiles need a host".into());
    }
    let port = profile.get("port").and_then(Value::as_i64).unwrap_or(9100);
    let paper_width_mm = profile
        .get("paperWidthMm")
        .or_else(|| profile.get("paper_width_mm"))
        .and_then(Value::as_i64)
        .unwrap_or(80);
    let make_default = profile
        .get("isDefault")
        .or_else(|| profile.get("is_default"))
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let id = format!("pp-{}", Uuid::new_v4());
    let conn = db.conn.lock().map_err(|e| e.to_string())?;

    conn.execute(
        "INSERT INTO printer_profiles (id, name, driver_type, printer_name, host, port,
                                       paper_width_mm, is_default, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, datetime('now'), datetime('now'))",
        params![id, name, driver_type, printer_name, host, port, paper_width_mm],
    )
    .map_err(|e| format!("create printer profile: {e}"))?;

    if make_default {
        set_default_locked(&conn, &id)?;
    }

    info!(profile_id = %id, name = %name, driver = %driver_type, "Printer profile created");
    get_profile_locked(&conn, &id)
}

/// Update mutable fields of a profile.
pub fn update_profile(db: &DbState, profile_id: &str, updates: &Value) -> Result<Value, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;

    // Confirm the profile exists first for a friendly error
    get_profile_locked(&conn, profile_id)?;

    if let Some(name) = non_empty_str(updates.get("name").and_then(Value::as_str)) {
        conn.execute(
            "UPDATE printer_profiles SET name = ?2, updated_at = datetime('now') WHERE id = ?1",
            params![profile_id, name],
        )
        .map_err(|e| e.to_string())?;
    }
    if let Some(printer_name) = non_empty_str(
        updates
            .get("printerName")
            .or_else(|| updates.get("printer_name"))
            .and_then(Value::as_str),
    ) {
        conn.execute(
            "UPDATE printer_profiles SET printer_name = ?2, updated_at = datetime('now') WHERE id = ?1",
            params![profile_id, printer_name],
        )
        .map_err(|e| e.to_string())?;
    }
    if let Some(host) = non_empty_str(updates.get("host").and_then(Value::as_str)) {
        conn.execute(
            "UPDATE printer_profiles SET host = ?2, updated_at = datetime('now') WHERE id = ?1",
            params![profile_id, host],
        )
        .map_err(|e| e.to_string())?;
    }
    if let Some(port) = updates.get("port").and_then(Value::as_i64) {
        conn.execute(
            "UPDATE printer_profiles SET port = ?2, updated_at = datetime('now') WHERE id = ?1",
            params![profile_id, port],
        )
        .map_err(|e| e.to_string())?;
    }
    if let Some(paper) = updates
        .get("paperWidthMm")
        .or_else(|| updates.get("paper_width_mm"))
        .and_then(Value::as_i64)
    {
        conn.execute(
            "UPDATE printer_profiles SET paper_width_mm = ?2, updated_at = datetime('now') WHERE id = ?1",
            params![profile_id, paper],
        )
        .map_err(|e| e.to_string())?;
    }
    if updates
        .get("isDefault")
        .or_else(|| updates.get("is_default"))
        .and_then(Value::as_bool)
        == Some(true)
    {
        set_default_locked(&conn, profile_id)?;
    }

    get_profile_locked(&conn, profile_id)
}

pub fn delete_profile(db: &DbState, profile_id: &str) -> Result<Value, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let removed = conn
        .execute(
            "DELETE FROM printer_profiles WHERE id = ?1",
            params![profile_id],
        )
        .map_err(|e| e.to_string())?;
    if removed == 0 {
        return Err(format!("Printer profile not found: {profile_id}"));
    }
    Ok(serde_json::json!({ "success": true }))
}

pub fn list_profiles(db: &DbState) -> Result<Value, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {PROFILE_COLUMNS} FROM printer_profiles ORDER BY name"
        ))
        .map_err(|e| e.to_string())?;
    let rows = stmt
        .query_map([], |row| profile_row_to_json(row))
        .map_err(|e| e.to_string())?;
    let profiles: Vec<Value> = rows.filter_map(|r| r.ok()).collect();
    Ok(serde_json::json!(profiles))
}

fn get_profile_locked(conn: &rusqlite::Connection, profile_id: &str) -> Result<Value, String> {
    conn.query_row(
        &format!("SELECT {PROFILE_COLUMNS} FROM printer_profiles WHERE id = ?1"),
        params![profile_id],
        |row| profile_row_to_json(row),
    )
    .map_err(|_| format!("Printer profile not found: {profile_id}"))
}

pub fn get_profile(db: &DbState, profile_id: &str) -> Result<Value, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    get_profile_locked(&conn, profile_id)
}

fn set_default_locked(conn: &rusqlite::Connection, profile_id: &str) -> Result<(), String> {
    conn.execute("UPDATE printer_profiles SET is_default = 0", [])
        .map_err(|e| e.to_string())?;
    let changed = conn
        .execute(
            "UPDATE printer_profiles SET is_default = 1, updated_at = datetime('now') WHERE id = ?1",
            params![profile_id],
        )
        .map_err(|e| e.to_string())?;
    if changed == 0 {
        return Err(format!("Printer profile not found: {profile_id}"));
    }
    Ok(())
}

pub fn set_default_profile(db: &DbState, profile_id: &str) -> Result<Value, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    set_default_locked(&conn, profile_id)?;
    get_profile_locked(&conn, profile_id)
}

pub fn get_default_profile(db: &DbState) -> Result<Option<Value>, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let row = conn
        .query_row(
            &format!("SELECT {PROFILE_COLUMNS} FROM printer_profiles WHERE is_default = 1 LIMIT 1"),
            [],
            |row| profile_row_to_json(row),
        )
        .ok();
    Ok(row)
}

/// Resolve the profile a job should print through: the explicit id when the
/// job carries one, otherwise the default profile.
pub fn resolve_profile(db: &DbState, profile_id: Option<&str>) -> Result<Option<Value>, String> {
    match profile_id {
        Some(id) => get_profile(db, id).map(Some),
        None => get_default_profile(db),
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// Send rendered bytes through the profile's driver.
///
/// `spool_dir` receives the payload for `file` profiles and the temp file
/// used by `system` dispatch.
pub fn dispatch_raw(profile: &Value, data: &[u8], spool_dir: &Path) -> Result<(), String> {
    let driver = profile
        .get("driverType")
        .and_then(Value::as_str)
        .unwrap_or("system");

    match driver {
        "file" => {
            std::fs::create_dir_all(spool_dir).map_err(|e| format!("create spool dir: {e}"))?;
            let path = spool_dir.join(format!("spool-{}.bin", Uuid::new_v4()));
            std::fs::write(&path, data).map_err(|e| format!("write spool file: {e}"))?;
            info!(path = %path.display(), "Print payload spooled to file");
            Ok(())
        }
        "network" => {
            let host = profile
                .get("host")
                .and_then(Value::as_str)
                .ok_or("Network profile is missing a host")?;
            let port = profile.get("port").and_then(Value::as_i64).unwrap_or(9100);
            let addr = format!("{host}:{port}");
            let mut stream = TcpStream::connect(&addr)
                .map_err(|e| format!("connect to printer {addr}: {e}"))?;
            stream
                .set_write_timeout(Some(NETWORK_TIMEOUT))
                .map_err(|e| e.to_string())?;
            stream
                .write_all(data)
                .map_err(|e| format!("send to printer {addr}: {e}"))?;
            stream.flush().map_err(|e| e.to_string())?;
            Ok(())
        }
        "system" => {
            let printer_name = profile
                .get("printerName")
                .and_then(Value::as_str)
                .ok_or("System profile is missing a printerName")?;
            std::fs::create_dir_all(spool_dir).map_err(|e| format!("create spool dir: {e}"))?;
            let path = spool_dir.join(format!("spool-{}.bin", Uuid::new_v4()));
            std::fs::write(&path, data).map_err(|e| format!("write spool file: {e}"))?;
            let result = send_to_system_printer(printer_name, &path);
            let _ = std::fs::remove_file(&path);
            result
        }
        other => Err(format!("Unknown driver type: {other}")),
    }
}

#[cfg(target_os = "windows")]
fn send_to_system_printer(printer_name: &str, path: &Path) -> Result<(), String> {
    let output = std::process::Command::new("cmd")
        .args([
            "/C",
            "print",
            &format!("/D:{printer_name}"),
            &path.display().to_string(),
        ])
        .output()
        .map_err(|e| format!("spawn print command: {e}"))?;
    if !output.status.success() {
        let err = String::from_utf8_lossy(&output.stderr).to_string();
        warn!(printer = printer_name, error = %err, "System print failed");
        return Err(format!("System print failed: {err}"));
    }
    Ok(())
}

#[cfg(not(target_os = "windows"))]
fn send_to_system_printer(printer_name: &str, path: &Path) -> Result<(), String> {
    let output = std::process::Command::new("lp")
        .args([
            "-d",
            printer_name,
            "-o",
            "raw",
            &path.display().to_string(),
        ])
        .output()
        .map_err(|e| format!("spawn lp: {e}"))?;
    if !output.status.success() {
        let err = String::from_utf8_lossy(&output.stderr).to_string();
        warn!(printer = printer_name, error = %err, "System print failed");
        return Err(format!("System print failed: {err}"));
    }
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;
    use std::path::PathBuf;
    use std::sync::Mutex;

    fn test_db() -> DbState {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        crate::db::run_migrations_for_test(&conn);
        DbState {
            conn: Mutex::new(conn),
            db_path: PathBuf::from(":memory:"),
        }
    }

    #[test]
    fn create_and_resolve_default_profile() {
        let db = test_db();
        let created = create_profile(
            &db,
            &serde_json::json!({
                "name": "Front desk", "driverType": "network",
                "host": "192.168.1.50", "isDefault": true
            }),
        )
        .expect("create");
        assert_eq!(created["driverType"], "network");
        assert_eq!(created["port"], 9100);
        assert_eq!(created["isDefault"], true);

        let resolved = resolve_profile(&db, None).expect("resolve").expect("some");
        assert_eq!(resolved["id"], created["id"]);
    }

    #[test]
    fn create_validates_driver_requirements() {
        let db = test_db();
        assert!(create_profile(&db, &serde_json::json!({ "name": "X", "driverType": "network" }))
            .is_err());
        assert!(create_profile(&db, &serde_json::json!({ "name": "X", "driverType": "system" }))
            .is_err());
        assert!(create_profile(&db, &serde_json::json!({ "driverType": "file" })).is_err());
    }

    #[test]
    fn default_is_exclusive() {
        let db = test_db();
        let a = create_profile(
            &db,
            &serde_json::json!({ "name": "A", "driverType": "file", "isDefault": true }),
        )
        .expect("create a");
        let b = create_profile(
            &db,
            &serde_json::json!({ "name": "B", "driverType": "file", "isDefault": true }),
        )
        .expect("create b");

        let refreshed_a = get_profile(&db, a["id"].as_str().unwrap()).expect("get a");
        assert_eq!(refreshed_a["isDefault"], false);
        let default = get_default_profile(&db).expect("default").expect("some");
        assert_eq!(default["id"], b["id"]);
    }

    #[test]
    fn file_dispatch_writes_payload() {
        let dir = std::env::temp_dir().join(format!("matjar-spool-test-{}", Uuid::new_v4()));
        let profile = serde_json::json!({ "driverType": "file" });
        dispatch_raw(&profile, b"\x1B\x40hello", &dir).expect("dispatch");

        let entries: Vec<_> = std::fs::read_dir(&dir)
            .expect("spool dir exists")
            .filter_map(|e| e.ok())
            .collect();
        assert_eq!(entries.len(), 1);
        let content = std::fs::read(entries[0].path()).expect("read spool");
        assert_eq!(content, b"\x1B\x40hello");

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn delete_missing_profile_errors() {
        let db = test_db();
        assert!(delete_profile(&db, "pp-missing").is_err());
    }
}
