//! Background sync engine for Matjar.
//!
//! Every mutating command writes the local row and appends an operation to
//! `sync_queue`. A background loop batches pending operations, compresses
//! the batch with zstd, and POSTs it to the hosted backend at
//! `/api/store/sync/batch`. A second phase pulls catalog changes the backend
//! accumulated from other stores (`/api/store/catalog/changes`) and upserts
//! them into the local mirror. Failures never block the UI: operations stay
//! queued and retry with a capped counter.

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use chrono::Utc;
use rusqlite::params;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tauri::{AppHandle, Emitter};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::api;
use crate::db::DbState;
use crate::storage;

/// Operations drained per cycle.
const BATCH_MAX: usize = 50;
/// zstd level for batch payloads; small batches favour speed over ratio.
const ZSTD_LEVEL: i32 = 3;

// ---------------------------------------------------------------------------
// Auth failure detection
// ---------------------------------------------------------------------------

fn is_store_auth_failure(error: &str) -> bool {
    let lower = error.to_lowercase();
    lower.contains("invalid api key for store")
        || lower.contains("store identity mismatch")
        || lower.contains("api key is invalid or expired")
        || lower.contains("store not authorized")
}

/// Perform a full factory reset triggered by store deletion on the backend.
/// Clears operational data and credentials, then emits events so the UI
/// redirects to onboarding.
fn factory_reset_from_sync(db: &DbState, app: &AppHandle) {
    warn!("Store deleted or deactivated — performing automatic factory reset");

    if let Ok(conn) = db.conn.lock() {
        let _ = conn.execute_batch(
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
             DELETE FROM customers;
             DELETE FROM products;
             DELETE FROM sync_queue;
             DELETE FROM local_settings;
             COMMIT;",
        );
    }

    let _ = storage::factory_reset();
    let _ = app.emit("app_reset", serde_json::json!({ "reason": "store_deleted" }));
    let _ = app.emit(
        "store_disabled",
        serde_json::json!({ "reason": "store_deleted" }),
    );
}

// ---------------------------------------------------------------------------
// Sync engine state (managed by Tauri)
// ---------------------------------------------------------------------------

/// Managed state for the background sync engine.
pub struct SyncState {
    pub is_running: Arc<AtomicBool>,
    pub last_sync: Arc<std::sync::Mutex<Option<String>>>,
    pub shutdown: CancellationToken,
}

impl SyncState {
    pub fn new() -> Self {
        Self {
            is_running: Arc::new(AtomicBool::new(false)),
            last_sync: Arc::new(std::sync::Mutex::new(None)),
            shutdown: CancellationToken::new(),
        }
    }
}

impl Default for SyncState {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Queue API (used by mutating commands)
// ---------------------------------------------------------------------------

/// Append an operation to the sync queue.
///
/// `operation` is one of `insert` / `update` / `delete`; `payload` is the
/// full row as the backend expects it. Returns the idempotency key.
pub fn enqueue(
    conn: &rusqlite::Connection,
    entity_type: &str,
    entity_id: &str,
    operation: &str,
    payload: &Value,
) -> Result<String, String> {
    let idempotency_key = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO sync_queue (entity_type, entity_id, operation, payload, idempotency_key)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            entity_type,
            entity_id,
            operation,
            payload.to_string(),
            idempotency_key
        ],
    )
    .map_err(|e| format!("enqueue sync op: {e}"))?;
    Ok(idempotency_key)
}

// ---------------------------------------------------------------------------
// Batch encoding
// ---------------------------------------------------------------------------

/// Encode a list of queue operations as the compressed wire payload:
/// zstd over the JSON array, then base64 for JSON transport.
pub fn encode_batch(ops: &[Value]) -> Result<Value, String> {
    let raw = serde_json::to_vec(ops).map_err(|e| format!("serialize batch: {e}"))?;
    let compressed =
        zstd::encode_all(raw.as_slice(), ZSTD_LEVEL).map_err(|e| format!("compress batch: {e}"))?;
    Ok(serde_json::json!({
        "encoding": "zstd+base64",
        "count": ops.len(),
        "payload": BASE64_STANDARD.encode(&compressed),
    }))
}

/// Decode a wire payload back into operations (used by tests and the
/// diagnostics export preview).
pub fn decode_batch(wire: &Value) -> Result<Vec<Value>, String> {
    let payload = wire
        .get("payload")
        .and_then(Value::as_str)
        .ok_or("batch payload missing")?;
    let compressed = BASE64_STANDARD
        .decode(payload)
        .map_err(|e| format!("decode batch base64: {e}"))?;
    let raw = zstd::decode_all(compressed.as_slice()).map_err(|e| format!("decompress batch: {e}"))?;
    serde_json::from_slice(&raw).map_err(|e| format!("parse batch: {e}"))
}

// ---------------------------------------------------------------------------
// Queue drain
// ---------------------------------------------------------------------------

/// A pending queue row lifted into memory for one cycle.
struct QueuedOp {
    id: i64,
    entity_type: String,
    entity_id: String,
    operation: String,
    payload: Value,
    idempotency_key: String,
}

fn load_pending_ops(conn: &rusqlite::Connection) -> Result<Vec<QueuedOp>, String> {
    let mut stmt = conn
        .prepare(
            "SELECT id, entity_type, entity_id, operation, payload, idempotency_key
             FROM sync_queue
             WHERE status = 'pending' AND retry_count < max_retries
             ORDER BY id
             LIMIT ?1",
        )
        .map_err(|e| e.to_string())?;
    let rows = stmt
        .query_map(params![BATCH_MAX as i64], |row| {
            Ok(QueuedOp {
                id: row.get(0)?,
                entity_type: row.get(1)?,
                entity_id: row.get(2)?,
                operation: row.get(3)?,
                payload: serde_json::from_str(&row.get::<_, String>(4)?)
                    .unwrap_or(Value::Null),
                idempotency_key: row.get(5)?,
            })
        })
        .map_err(|e| e.to_string())?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

fn mark_op_synced(conn: &rusqlite::Connection, id: i64) {
    let _ = conn.execute(
        "UPDATE sync_queue
         SET status = 'synced', synced_at = datetime('now'), updated_at = datetime('now')
         WHERE id = ?1",
        params![id],
    );
}

fn mark_op_failed(conn: &rusqlite::Connection, id: i64, error: &str) {
    // One statement: bump the retry counter and flip to failed once the cap
    // is reached.
    let _ = conn.execute(
        "UPDATE sync_queue
         SET retry_count = retry_count + 1,
             last_error = ?2,
             status = CASE WHEN retry_count + 1 >= max_retries THEN 'failed' ELSE 'pending' END,
             updated_at = datetime('now')
         WHERE id = ?1",
        params![id, error],
    );
}

/// Drain one batch of pending operations to the backend.
///
/// Returns the number of operations the backend applied.
async fn drain_queue(db: &DbState) -> Result<usize, String> {
    let ops = {
        let conn = db.conn.lock().map_err(|e| e.to_string())?;
        load_pending_ops(&conn)?
    };
    if ops.is_empty() {
        return Ok(0);
    }

    let wire_ops: Vec<Value> = ops
        .iter()
        .map(|op| {
            serde_json::json!({
                "entityType": op.entity_type,
                "entityId": op.entity_id,
                "operation": op.operation,
                "payload": op.payload,
                "idempotencyKey": op.idempotency_key,
            })
        })
        .collect();

    let body = encode_batch(&wire_ops)?;

    let backend_url = storage::get_credential("backend_url")
        .ok_or("Store not configured: missing backend URL")?;
    let api_key =
        storage::get_credential("api_key").ok_or("Store not configured: missing API key")?;

    let response = api::fetch_from_backend(
        &backend_url,
        &api_key,
        "/api/store/sync/batch",
        "POST",
        Some(body),
    )
    .await?;

    // Per-op results keyed by idempotency key; an op missing from the
    // response is treated as failed so it retries next cycle.
    let results = response
        .get("results")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let mut applied = 0usize;
    for op in &ops {
        let result = results.iter().find(|r| {
            r.get("idempotencyKey")
                .and_then(Value::as_str)
                .map(|k| k == op.idempotency_key)
                .unwrap_or(false)
        });
        match result {
            Some(r) if r.get("status").and_then(Value::as_str) == Some("applied") => {
                mark_op_synced(&conn, op.id);
                applied += 1;
            }
            Some(r) => {
                let error = r
                    .get("error")
                    .and_then(Value::as_str)
                    .unwrap_or("rejected by backend");
                warn!(
                    entity_type = %op.entity_type,
                    entity_id = %op.entity_id,
                    error,
                    "sync op rejected"
                );
                mark_op_failed(&conn, op.id, error);
            }
            None => mark_op_failed(&conn, op.id, "no result returned for operation"),
        }
    }

    Ok(applied)
}

// ---------------------------------------------------------------------------
// Mirror pull
// ---------------------------------------------------------------------------

/// Apply one remote product row to the local mirror.
///
/// Upserts by id and never touches rows the local store has pending edits
/// for — backend write order wins only once our own op has drained.
pub fn apply_remote_product(conn: &rusqlite::Connection, remote: &Value) -> Result<bool, String> {
    let id = remote
        .get("id")
        .and_then(Value::as_str)
        .ok_or("remote product missing id")?;

    let has_pending: bool = conn
        .query_row(
            "SELECT EXISTS(
                 SELECT 1 FROM sync_queue
                 WHERE entity_type = 'product' AND entity_id = ?1 AND status = 'pending'
             )",
            params![id],
            |row| row.get(0),
        )
        .unwrap_or(false);
    if has_pending {
        return Ok(false);
    }

    let name = remote.get("name").and_then(Value::as_str).unwrap_or("");
    if name.is_empty() {
        return Err(format!("remote product {id} missing name"));
    }

    conn.execute(
        "INSERT INTO products (id, name, barcode, shamel_no, category, unit,
                               purchase_price, sale_price, wholesale_price, quantity,
                               origin, notes, image_url, is_active, version, sync_status,
                               updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, 'synced',
                 datetime('now'))
         ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            barcode = excluded.barcode,
            shamel_no = excluded.shamel_no,
            category = excluded.category,
            unit = excluded.unit,
            purchase_price = excluded.purchase_price,
            sale_price = excluded.sale_price,
            wholesale_price = excluded.wholesale_price,
            quantity = excluded.quantity,
            origin = excluded.origin,
            notes = excluded.notes,
            image_url = excluded.image_url,
            is_active = excluded.is_active,
            version = excluded.version,
            sync_status = 'synced',
            updated_at = datetime('now')",
        params![
            id,
            name,
            remote.get("barcode").and_then(Value::as_str),
            remote
                .get("shamelNo")
                .or_else(|| remote.get("shamel_no"))
                .and_then(Value::as_str),
            remote.get("category").and_then(Value::as_str),
            remote.get("unit").and_then(Value::as_str).unwrap_or("pcs"),
            remote
                .get("purchasePrice")
                .or_else(|| remote.get("purchase_price"))
                .and_then(Value::as_f64)
                .unwrap_or(0.0),
            remote
                .get("salePrice")
                .or_else(|| remote.get("sale_price"))
                .and_then(Value::as_f64)
                .unwrap_or(0.0),
            remote
                .get("wholesalePrice")
                .or_else(|| remote.get("wholesale_price"))
                .and_then(Value::as_f64)
                .unwrap_or(0.0),
            remote.get("quantity").and_then(Value::as_f64).unwrap_or(0.0),
            remote.get("origin").and_then(Value::as_str),
            remote.get("notes").and_then(Value::as_str),
            remote
                .get("imageUrl")
                .or_else(|| remote.get("image_url"))
                .and_then(Value::as_str),
            remote
                .get("isActive")
                .or_else(|| remote.get("is_active"))
                .and_then(Value::as_bool)
                .map(|b| if b { 1 } else { 0 })
                .unwrap_or(1),
            remote.get("version").and_then(Value::as_i64).unwrap_or(1),
        ],
    )
    .map_err(|e| format!("apply remote product {id}: {e}"))?;

    Ok(true)
}

/// Pull catalog changes since the stored cursor and merge them.
async fn pull_catalog_changes(db: &DbState) -> Result<usize, String> {
    let cursor = {
        let conn = db.conn.lock().map_err(|e| e.to_string())?;
        crate::db::get_setting(&conn, "sync", "catalog_cursor")
            .unwrap_or_else(|| "1970-01-01T00:00:00Z".to_string())
    };

    let backend_url = storage::get_credential("backend_url")
        .ok_or("Store not configured: missing backend URL")?;
    let api_key =
        storage::get_credential("api_key").ok_or("Store not configured: missing API key")?;

    let path = format!("/api/store/catalog/changes?since={cursor}");
    let response =
        api::fetch_from_backend(&backend_url, &api_key, &path, "GET", None).await?;

    let products = response
        .get("products")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let next_cursor = response
        .get("cursor")
        .and_then(Value::as_str)
        .map(|s| s.to_string());

    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let mut applied = 0usize;
    for product in &products {
        match apply_remote_product(&conn, product) {
            Ok(true) => applied += 1,
            Ok(false) => {}
            Err(e) => warn!(error = %e, "skipping malformed remote product"),
        }
    }

    if let Some(cursor) = next_cursor {
        let _ = crate::db::set_setting(&conn, "sync", "catalog_cursor", &cursor);
    }

    Ok(applied)
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

fn count_queue_rows(conn: &rusqlite::Connection, status: &str) -> i64 {
    conn.query_row(
        "SELECT COUNT(*) FROM sync_queue WHERE status = ?1",
        params![status],
        |row| row.get(0),
    )
    .unwrap_or(0)
}

/// Current sync status for the UI indicator.
pub fn get_sync_status(db: &DbState, sync_state: &SyncState) -> Result<Value, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let pending = count_queue_rows(&conn, "pending");
    let failed = count_queue_rows(&conn, "failed");
    let synced = count_queue_rows(&conn, "synced");
    let last_sync = sync_state
        .last_sync
        .lock()
        .map(|g| g.clone())
        .unwrap_or(None);

    Ok(serde_json::json!({
        "isRunning": sync_state.is_running.load(Ordering::SeqCst),
        "pending": pending,
        "failed": failed,
        "synced": synced,
        "lastSync": last_sync,
        "configured": storage::is_configured(),
    }))
}

/// Reset failed operations back to pending for another round of retries.
pub fn retry_failed(db: &DbState) -> Result<Value, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let changed = conn
        .execute(
            "UPDATE sync_queue
             SET status = 'pending', retry_count = 0, last_error = NULL,
                 updated_at = datetime('now')
             WHERE status = 'failed'",
            [],
        )
        .map_err(|e| e.to_string())?;
    info!(requeued = changed, "failed sync ops requeued");
    Ok(serde_json::json!({ "success": true, "requeued": changed }))
}

/// Drop failed operations permanently.
pub fn clear_failed(db: &DbState) -> Result<Value, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let removed = conn
        .execute("DELETE FROM sync_queue WHERE status = 'failed'", [])
        .map_err(|e| e.to_string())?;
    Ok(serde_json::json!({ "success": true, "removed": removed }))
}

/// Drop synced bookkeeping rows older than the given number of days.
pub fn prune_synced(db: &DbState, older_than_days: i64) -> Result<Value, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let removed = conn
        .execute(
            "DELETE FROM sync_queue
             WHERE status = 'synced'
               AND synced_at < datetime('now', ?1)",
            params![format!("-{older_than_days} days")],
        )
        .map_err(|e| e.to_string())?;
    Ok(serde_json::json!({ "success": true, "removed": removed }))
}

/// Reachability probe against the backend health endpoint.
pub async fn check_network_status() -> Value {
    let backend_url = match storage::get_credential("backend_url") {
        Some(u) if !u.trim().is_empty() => u,
        _ => {
            return serde_json::json!({ "isOnline": false, "reason": "not_configured" });
        }
    };
    let api_key = storage::get_credential("api_key").unwrap_or_default();
    let result = api::test_connectivity(&backend_url, &api_key).await;
    serde_json::json!({
        "isOnline": result.success,
        "latencyMs": result.latency_ms,
        "error": result.error,
    })
}

// ---------------------------------------------------------------------------
// Background loop
// ---------------------------------------------------------------------------

/// Run one full sync cycle: drain the queue, then pull the catalog mirror.
async fn run_sync_cycle(db: &DbState) -> Result<usize, String> {
    let pushed = drain_queue(db).await?;
    let pulled = pull_catalog_changes(db).await?;
    Ok(pushed + pulled)
}

pub fn start_sync_loop(
    app: AppHandle,
    db: Arc<DbState>,
    sync_state: Arc<SyncState>,
    interval_secs: u64,
) {
    let is_running = sync_state.is_running.clone();
    let last_sync = sync_state.last_sync.clone();
    let shutdown = sync_state.shutdown.clone();

    // Mark as running
    is_running.store(true, Ordering::SeqCst);

    tauri::async_runtime::spawn(async move {
        info!("Sync loop started (interval: {interval_secs}s)");
        let mut previous_network_online: Option<bool> = None;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    is_running.store(false, Ordering::SeqCst);
                    info!("Sync loop stopped");
                    break;
                }
                _ = tokio::time::sleep(Duration::from_secs(interval_secs)) => {}
            }

            // Emit network status every cycle so UI indicators stay
            // event-driven without command polling.
            let network_status = check_network_status().await;
            let network_is_online = network_status
                .get("isOnline")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            let _ = app.emit("network_status", &network_status);

            // If the store is not configured yet, still emit sync status so
            // UI state remains consistent.
            if !storage::is_configured() {
                previous_network_online = None;
                if let Ok(status) = get_sync_status_snapshot(&db, &last_sync, false) {
                    let _ = app.emit("sync_status", &status);
                }
                continue;
            }

            if !network_is_online {
                if previous_network_online != Some(false) {
                    info!("Network offline; deferring remote sync and keeping queue pending");
                }
                previous_network_online = Some(false);
                if let Ok(status) = get_sync_status_snapshot(&db, &last_sync, false) {
                    let _ = app.emit("sync_status", &status);
                }
                continue;
            }

            if previous_network_online == Some(false) {
                info!("Network restored; resuming queued sync");
            }
            previous_network_online = Some(true);

            match run_sync_cycle(&db).await {
                Ok(synced) => {
                    if synced > 0 {
                        info!("Sync cycle complete: {synced} items synced");
                    }
                    if let Ok(mut guard) = last_sync.lock() {
                        *guard = Some(Utc::now().to_rfc3339());
                    }
                }
                Err(e) => {
                    if is_store_auth_failure(&e) {
                        factory_reset_from_sync(&db, &app);
                        is_running.store(false, Ordering::SeqCst);
                        info!("Sync loop stopped — store deleted");
                        break;
                    }
                    warn!("Sync cycle failed: {e}");
                }
            }

            if let Ok(status) = get_sync_status_snapshot(&db, &last_sync, network_is_online) {
                let _ = app.emit("sync_status", &status);
            }
        }
    });
}

fn get_sync_status_snapshot(
    db: &DbState,
    last_sync: &std::sync::Mutex<Option<String>>,
    online: bool,
) -> Result<Value, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    Ok(serde_json::json!({
        "isOnline": online,
        "pending": count_queue_rows(&conn, "pending"),
        "failed": count_queue_rows(&conn, "failed"),
        "lastSync": last_sync.lock().map(|g| g.clone()).unwrap_or(None),
    }))
}

/// Trigger an immediate sync cycle (called by `sync_force`).
pub async fn force_sync(db: &DbState, sync_state: &SyncState) -> Result<Value, String> {
    if !storage::is_configured() {
        return Err("Store not configured".into());
    }

    let synced = run_sync_cycle(db).await?;
    info!("Force sync complete: {synced} items synced");

    if let Ok(mut guard) = sync_state.last_sync.lock() {
        *guard = Some(Utc::now().to_rfc3339());
    }

    Ok(serde_json::json!({ "success": true, "synced": synced }))
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        crate::db::run_migrations_for_test(&conn);
        conn
    }

    #[test]
    fn enqueue_inserts_pending_row() {
        let conn = test_conn();
        let key = enqueue(
            &conn,
            "product",
            "p1",
            "insert",
            &serde_json::json!({ "id": "p1", "name": "Cable" }),
        )
        .expect("enqueue");
        assert!(!key.is_empty());

        let (status, retry): (String, i64) = conn
            .query_row(
                "SELECT status, retry_count FROM sync_queue WHERE entity_id = 'p1'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(status, "pending");
        assert_eq!(retry, 0);
    }

    #[test]
    fn batch_encoding_roundtrip() {
        let ops = vec![
            serde_json::json!({ "entityType": "product", "operation": "insert", "payload": { "name": "شاحن سريع" } }),
            serde_json::json!({ "entityType": "sales_invoice", "operation": "update", "payload": { "total": 120.5 } }),
        ];
        let wire = encode_batch(&ops).expect("encode");
        assert_eq!(wire["encoding"], "zstd+base64");
        assert_eq!(wire["count"], 2);

        let decoded = decode_batch(&wire).expect("decode");
        assert_eq!(decoded, ops);
    }

    #[test]
    fn failed_op_flips_after_max_retries() {
        let conn = test_conn();
        enqueue(&conn, "product", "p1", "insert", &serde_json::json!({})).expect("enqueue");
        let id: i64 = conn
            .query_row("SELECT id FROM sync_queue LIMIT 1", [], |row| row.get(0))
            .unwrap();

        for _ in 0..4 {
            mark_op_failed(&conn, id, "boom");
            let status: String = conn
                .query_row(
                    "SELECT status FROM sync_queue WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .unwrap();
            assert_eq!(status, "pending");
        }

        // Fifth failure reaches max_retries (5)
        mark_op_failed(&conn, id, "boom");
        let (status, error): (String, Option<String>) = conn
            .query_row(
                "SELECT status, last_error FROM sync_queue WHERE id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(status, "failed");
        assert_eq!(error.as_deref(), Some("boom"));
    }

    #[test]
    fn apply_remote_product_upserts_and_respects_pending_edits() {
        let conn = test_conn();

        let remote = serde_json::json!({
            "id": "p-remote", "name": "Power bank", "salePrice": 18.0,
            "quantity": 7.0, "version": 3
        });
        assert!(apply_remote_product(&conn, &remote).expect("apply"));

        let (name, price, version): (String, f64, i64) = conn
            .query_row(
                "SELECT name, sale_price, version FROM products WHERE id = 'p-remote'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .unwrap();
        assert_eq!(name, "Power bank");
        assert_eq!(price, 18.0);
        assert_eq!(version, 3);

        // A pending local edit blocks the remote overwrite
        enqueue(&conn, "product", "p-remote", "update", &serde_json::json!({}))
            .expect("enqueue local edit");
        let remote2 = serde_json::json!({ "id": "p-remote", "name": "Renamed remotely" });
        assert!(!apply_remote_product(&conn, &remote2).expect("apply blocked"));

        let name: String = conn
            .query_row(
                "SELECT name FROM products WHERE id = 'p-remote'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(name, "Power bank", "local mirror must keep its value");
    }

    #[test]
    fn retry_failed_requeues_rows() {
        let db_state = crate::db::DbState {
            conn: std::sync::Mutex::new(test_conn()),
            db_path: std::path::PathBuf::from(":memory:"),
        };
        {
            let conn = db_state.conn.lock().unwrap();
            enqueue(&conn, "product", "p1", "insert", &serde_json::json!({})).unwrap();
            conn.execute("UPDATE sync_queue SET status = 'failed', retry_count = 5", [])
                .unwrap();
        }

        let result = retry_failed(&db_state).expect("retry");
        assert_eq!(result["requeued"], 1);

        let conn = db_state.conn.lock().unwrap();
        assert_eq!(count_queue_rows(&conn, "pending"), 1);
        assert_eq!(count_queue_rows(&conn, "failed"), 0);
    }

    #[test]
    fn auth_failure_detection() {
        assert!(is_store_auth_failure("API key is invalid or expired"));
        assert!(is_store_auth_failure("Store not authorized (HTTP 403)"));
        assert!(!is_store_auth_failure("Connection to backend timed out"));
    }
}
