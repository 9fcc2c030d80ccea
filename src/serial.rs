//! Serial port access for barcode scanners.
//!
//! Scanners attach over COM/tty ports; each opened port is registered in a
//! process-wide pool under a UUID handle so the UI never touches raw port
//! names after opening. The scanner driver polls through `read_port`; the
//! settings screen enumerates candidates through `list_ports`.

use serde_json::Value;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::{Mutex, OnceLock};
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// Read timeout applied when the caller does not specify one.
const DEFAULT_TIMEOUT_MS: u64 = 1000;

/// Upper bound for a single read, matching scanner burst sizes.
const MAX_READ_BYTES: usize = 4096;

type PortPool = Mutex<HashMap<String, Box<dyn serialport::SerialPort>>>;

fn pool() -> &'static PortPool {
    static POOL: OnceLock<PortPool> = OnceLock::new();
    POOL.get_or_init(|| Mutex::new(HashMap::new()))
}

fn lock_pool() -> std::sync::MutexGuard<'static, HashMap<String, Box<dyn serialport::SerialPort>>>
{
    pool().lock().unwrap_or_else(|e| e.into_inner())
}

fn describe_port(info: &serialport::SerialPortInfo) -> Value {
    match &info.port_type {
        serialport::SerialPortType::UsbPort(usb) => serde_json::json!({
            "name": info.port_name,
            "portType": "usb",
            "vid": usb.vid,
            "pid": usb.pid,
            "manufacturer": usb.manufacturer,
            "product": usb.product,
        }),
        serialport::SerialPortType::BluetoothPort => serde_json::json!({
            "name": info.port_name,
            "portType": "bluetooth",
        }),
        serialport::SerialPortType::PciPort => serde_json::json!({
            "name": info.port_name,
            "portType": "pci",
        }),
        serialport::SerialPortType::Unknown => serde_json::json!({
            "name": info.port_name,
            "portType": "unknown",
        }),
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// List serial/COM ports present on this system.
pub fn list_ports() -> Result<Value, String> {
    let ports = serialport::available_ports().map_err(|e| format!("Failed to list ports: {e}"))?;
    let list: Vec<Value> = ports.iter().map(describe_port).collect();
    Ok(serde_json::json!({ "success": true, "ports": list }))
}

/// Open a port and register it in the pool. Returns the handle the caller
/// uses for all further operations.
pub fn open_port(port: &str, baud_rate: u32, timeout_ms: Option<u64>) -> Result<Value, String> {
    let serial = serialport::new(port, baud_rate)
        .timeout(Duration::from_millis(timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS)))
        .open()
        .map_err(|e| format!("Failed to open {port} @ {baud_rate}: {e}"))?;

    let handle = Uuid::new_v4().to_string();
    lock_pool().insert(handle.clone(), serial);

    info!(port = port, baud = baud_rate, handle = %handle, "Serial port opened");
    Ok(serde_json::json!({
        "success": true,
        "handle": handle,
        "port": port,
        "baudRate": baud_rate,
    }))
}

/// Write bytes to an open port (scanner configuration commands).
pub fn write_port(handle: &str, data: &[u8]) -> Result<Value, String> {
    let mut guard = lock_pool();
    let port = guard
        .get_mut(handle)
        .ok_or_else(|| format!("No open port with handle {handle}"))?;

    let written = port
        .write(data)
        .and_then(|n| port.flush().map(|_| n))
        .map_err(|e| format!("Serial write failed: {e}"))?;

    Ok(serde_json::json!({ "success": true, "bytesWritten": written }))
}

/// Read up to `max_bytes` from an open port.
///
/// A timeout with no data is a successful empty read — the scanner poll
/// loop treats it as "nothing scanned yet".
pub fn read_port(handle: &str, max_bytes: usize) -> Result<Value, String> {
    let mut guard = lock_pool();
    let port = guard
        .get_mut(handle)
        .ok_or_else(|| format!("No open port with handle {handle}"))?;

    let mut buf = vec![0u8; max_bytes.clamp(1, MAX_READ_BYTES)];
    let n = match port.read(&mut buf) {
        Ok(n) => n,
        Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => 0,
        Err(e) => return Err(format!("Serial read failed: {e}")),
    };
    buf.truncate(n);

    Ok(serde_json::json!({
        "success": true,
        "bytesRead": n,
        "data": String::from_utf8_lossy(&buf),
        "raw": buf,
    }))
}

/// Close a port and drop it from the pool.
pub fn close_port(handle: &str) -> Result<Value, String> {
    if lock_pool().remove(handle).is_some() {
        info!(handle = handle, "Serial port closed");
        Ok(serde_json::json!({ "success": true }))
    } else {
        warn!(handle = handle, "Close called on unknown handle");
        Ok(serde_json::json!({
            "success": false,
            "message": format!("No open port with handle {handle}"),
        }))
    }
}

/// Close every open port (app exit cleanup).
#[allow(dead_code)]
pub fn close_all() {
    let mut guard = lock_pool();
    let count = guard.len();
    guard.clear();
    if count > 0 {
        info!(count = count, "Closed all serial ports");
    }
}

/// Whether a handle still refers to an open port.
pub fn is_open(handle: &str) -> bool {
    lock_pool().contains_key(handle)
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_handles_are_reported() {
        assert!(!is_open("nope"));
        let closed = close_port("nope").expect("close is non-fatal");
        assert_eq!(closed["success"], false);
        assert!(read_port("nope", 64).is_err());
        assert!(write_port("nope", b"x").is_err());
    }

    #[test]
    fn list_ports_shape() {
        // Port availability depends on the machine; only the envelope is
        // asserted here.
        if let Ok(result) = list_ports() {
            assert_eq!(result["success"], true);
            assert!(result["ports"].is_array());
        }
    }
}
