//! Serial barcode scanner driver for COM port scanners.
//!
//! Complements the keyboard-wedge scanner path (which needs no backend
//! support) with scanners connected via serial/COM port.
//!
//! Key design goals:
//! - **Background reader**: tokio task reads the serial port, emits Tauri events
//! - **Catalog matching**: every scanned code is resolved against the product
//!   catalog (barcode first, then Shamel No) so the UI receives the matched
//!   product together with the raw code
//! - **Auto-reconnect**: on read failure, retries after backoff

use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};

use crate::db::DbState;

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

static SCANNER_RUNNING: AtomicBool = AtomicBool::new(false);
static SCANNER_HANDLE: Mutex<Option<String>> = Mutex::new(None);
static SCANNER_PORT: Mutex<Option<String>> = Mutex::new(None);
static LAST_SCAN: Mutex<Option<String>> = Mutex::new(None);

// ---------------------------------------------------------------------------
// Catalog matching
// ---------------------------------------------------------------------------

/// Resolve a scanned code against the catalog: exact barcode match first,
/// then exact Shamel No. Only active products participate.
pub fn match_product(conn: &rusqlite::Connection, code: &str) -> Option<Value> {
    let code = code.trim();
    if code.is_empty() {
        return None;
    }
    conn.query_row(
        "SELECT id, name, barcode, shamel_no, sale_price, quantity, unit
         FROM products
         WHERE is_active = 1 AND (barcode = ?1 OR shamel_no = ?1)
         ORDER BY CASE WHEN barcode = ?1 THEN 0 ELSE 1 END
         LIMIT 1",
        rusqlite::params![code],
        |row| {
            Ok(serde_json::json!({
                "id": row.get::<_, String>(0)?,
                "name": row.get::<_, String>(1)?,
                "barcode": row.get::<_, Option<String>>(2)?,
                "shamelNo": row.get::<_, Option<String>>(3)?,
                "salePrice": row.get::<_, f64>(4)?,
                "quantity": row.get::<_, f64>(5)?,
                "unit": row.get::<_, Option<String>>(6)?,
            }))
        },
    )
    .ok()
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Start the serial barcode scanner background reader.
///
/// Opens the COM port and spawns a tokio task that reads newline-terminated
/// barcodes, resolves each against the catalog, and emits `barcode_scanned_serial`
/// Tauri events.
pub fn start(
    port: &str,
    baud_rate: u32,
    app: tauri::AppHandle,
    db: Arc<DbState>,
) -> Result<Value, String> {
    if SCANNER_RUNNING.load(Ordering::SeqCst) {
        return Err("Serial scanner already running — stop first".to_string());
    }

    let result = crate::serial::open_port(port, baud_rate, Some(200))?;
    let handle = result["handle"]
        .as_str()
        .ok_or("No handle returned")?
        .to_string();

    {
        let mut h = SCANNER_HANDLE.lock().unwrap_or_else(|e| e.into_inner());
        *h = Some(handle.clone());
    }
    {
        let mut p = SCANNER_PORT.lock().unwrap_or_else(|e| e.into_inner());
        *p = Some(port.to_string());
    }

    SCANNER_RUNNING.store(true, Ordering::SeqCst);

    let port_name = port.to_string();
    let handle_clone = handle.clone();

    tokio::spawn(async move {
        info!(port = %port_name, "Serial scanner background reader started");
        let mut line_buf = String::new();

        while SCANNER_RUNNING.load(Ordering::SeqCst) {
            match crate::serial::read_port(&handle_clone, 256) {
                Ok(result) => {
                    if let Some(data) = result["data"].as_str() {
                        if !data.is_empty() {
                            line_buf.push_str(data);

                            // Process complete lines (barcodes end with \r\n or \n)
                            while let Some(pos) = line_buf.find('\n') {
                                let code = line_buf[..pos].trim().to_string();
                                line_buf = line_buf[pos + 1..].to_string();

                                if code.len() >= 3 && code.len() <= 50 {
                                    info!(code = %code, "Serial scanner: barcode detected");

                                    // Store last scan
                                    if let Ok(mut ls) = LAST_SCAN.lock() {
                                        *ls = Some(code.clone());
                                    }

                                    let product = db
                                        .conn
                                        .lock()
                                        .ok()
                                        .and_then(|conn| match_product(&conn, &code));

                                    use tauri::Emitter;
                                    let _ = app.emit(
                                        "barcode_scanned_serial",
                                        serde_json::json!({
                                            "barcode": code,
                                            "source": "serial",
                                            "product": product,
                                            "timestamp": chrono::Utc::now().to_rfc3339(),
                                        }),
                                    );
                                }
                            }

                            // Prevent unbounded growth
                            if line_buf.len() > 512 {
                                line_buf.clear();
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Serial scanner read error");
                    // Brief backoff before retry
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }

            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        let _ = crate::serial::close_port(&handle_clone);
        info!(port = %port_name, "Serial scanner background reader stopped");
    });

    Ok(serde_json::json!({
        "success": true,
        "port": port,
        "baudRate": baud_rate,
    }))
}

/// Stop the serial scanner background reader.
pub fn stop() -> Result<Value, String> {
    if !SCANNER_RUNNING.load(Ordering::SeqCst) {
        return Ok(serde_json::json!({
            "success": true,
            "message": "Scanner was not running",
        }));
    }

    SCANNER_RUNNING.store(false, Ordering::SeqCst);
    {
        let mut h = SCANNER_HANDLE.lock().unwrap_or_else(|e| e.into_inner());
        *h = None;
    }
    {
        let mut p = SCANNER_PORT.lock().unwrap_or_else(|e| e.into_inner());
        *p = None;
    }

    Ok(serde_json::json!({ "success": true }))
}

/// Current scanner status for the hardware settings screen.
pub fn status() -> Value {
    let running = SCANNER_RUNNING.load(Ordering::SeqCst);
    let port = SCANNER_PORT
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .clone();
    let last = LAST_SCAN.lock().unwrap_or_else(|e| e.into_inner()).clone();
    let port_open = SCANNER_HANDLE
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .as_deref()
        .map(crate::serial::is_open)
        .unwrap_or(false);

    serde_json::json!({
        "running": running,
        "port": port,
        "portOpen": port_open,
        "lastScan": last,
    })
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn catalog_db() -> Connection {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        crate::db::run_migrations_for_test(&conn);
        conn.execute(
            "INSERT INTO products (id, name, barcode, shamel_no, sale_price, quantity)
             VALUES ('p1', 'USB Cable', '6291001110001', 'SH-100', 3.5, 40)",
            [],
        )
        .expect("insert p1");
        conn.execute(
            "INSERT INTO products (id, name, barcode, shamel_no, sale_price, quantity)
             VALUES ('p2', 'Old Cable', NULL, '6291001110001', 1.0, 0)",
            [],
        )
        .expect("insert p2");
        conn.execute(
            "INSERT INTO products (id, name, barcode, sale_price, quantity, is_active)
             VALUES ('p3', 'Retired', '6291009999999', 9.0, 0, 0)",
            [],
        )
        .expect("insert p3");
        conn
    }

    #[test]
    fn barcode_match_wins_over_shamel_no() {
        let conn = catalog_db();
        // The code exists as p1's barcode and as p2's shamel_no; barcode wins.
        let hit = match_product(&conn, "6291001110001").expect("should match");
        assert_eq!(hit["id"], "p1");
    }

    #[test]
    fn shamel_no_fallback() {
        let conn = catalog_db();
        let hit = match_product(&conn, "SH-100").expect("should match by shamel no");
        assert_eq!(hit["id"], "p1");
        assert_eq!(hit["shamelNo"], "SH-100");
    }

    #[test]
    fn inactive_products_never_match() {
        let conn = catalog_db();
        assert!(match_product(&conn, "6291009999999").is_none());
    }

    #[test]
    fn empty_code_is_no_match() {
        let conn = catalog_db();
        assert!(match_product(&conn, "   ").is_none());
    }
}
