//! Hardware commands: serial ports and the serial barcode scanner.

use serde_json::Value;
use std::sync::Arc;

use crate::{db, payload_arg0_as_string, scanner, serial, value_i64, value_str};

#[tauri::command]
pub async fn serial_list_ports() -> Result<Value, String> {
    serial::list_ports()
}

#[tauri::command]
pub async fn serial_open(arg0: Option<Value>) -> Result<Value, String> {
    let payload = arg0.ok_or("Missing serial open payload")?;
    let port = value_str(&payload, &["port", "portName", "path"]).ok_or("Missing port")?;
    let baud_rate = value_i64(&payload, &["baudRate", "baud_rate", "baud"]).unwrap_or(9600) as u32;
    let timeout_ms = value_i64(&payload, &["timeoutMs", "timeout_ms"]).map(|v| v as u64);
    serial::open_port(&port, baud_rate, timeout_ms)
}

#[tauri::command]
pub async fn serial_close(arg0: Option<Value>) -> Result<Value, String> {
    let handle = payload_arg0_as_string(arg0, &["handle", "id"]).ok_or("Missing handle")?;
    serial::close_port(&handle)
}

#[tauri::command]
pub async fn serial_read(arg0: Option<Value>, arg1: Option<Value>) -> Result<Value, String> {
    let base = arg0.unwrap_or_else(|| serde_json::json!({}));
    let handle =
        payload_arg0_as_string(Some(base.clone()), &["handle", "id"]).ok_or("Missing handle")?;
    let max_bytes = arg1
        .as_ref()
        .and_then(Value::as_u64)
        .or_else(|| value_i64(&base, &["maxBytes", "max_bytes"]).map(|v| v as u64))
        .unwrap_or(256) as usize;
    serial::read_port(&handle, max_bytes)
}

#[tauri::command]
pub async fn serial_write(arg0: Option<Value>, arg1: Option<Value>) -> Result<Value, String> {
    let base = arg0.unwrap_or_else(|| serde_json::json!({}));
    let handle =
        payload_arg0_as_string(Some(base.clone()), &["handle", "id"]).ok_or("Missing handle")?;
    let data = arg1
        .as_ref()
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| value_str(&base, &["data", "text"]))
        .ok_or("Missing data")?;
    serial::write_port(&handle, data.as_bytes())
}

// ---------------------------------------------------------------------------
// Serial barcode scanner
// ---------------------------------------------------------------------------

#[tauri::command]
pub async fn scanner_serial_start(
    arg0: Option<Value>,
    app: tauri::AppHandle,
    scanner_db: tauri::State<'_, Arc<db::DbState>>,
) -> Result<Value, String> {
    let payload = arg0.ok_or("Missing scanner payload")?;
    let port = value_str(&payload, &["port", "portName", "path"]).ok_or("Missing port")?;
    let baud_rate = value_i64(&payload, &["baudRate", "baud_rate", "baud"]).unwrap_or(9600) as u32;
    scanner::start(&port, baud_rate, app, scanner_db.inner().clone())
}

#[tauri::command]
pub async fn scanner_serial_stop() -> Result<Value, String> {
    scanner::stop()
}

#[tauri::command]
pub async fn scanner_serial_status() -> Result<Value, String> {
    Ok(scanner::status())
}

/// Resolve a code against the catalog without hardware — used by the
/// keyboard-wedge scanner path in the UI.
#[tauri::command]
pub async fn scanner_match_code(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    let code = payload_arg0_as_string(arg0, &["code", "barcode", "value"]).ok_or("Missing code")?;
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    Ok(scanner::match_product(&conn, &code).unwrap_or(Value::Null))
}
