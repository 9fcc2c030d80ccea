//! Print spooler for Matjar.
//!
//! Provides an offline-safe print job queue backed by the `print_jobs` SQLite
//! table. UI "Print" actions enqueue a job; a background worker renders the
//! document (text archive copy + ESC/POS stream, or a PNG for labels),
//! writes the archive file under the app data dir, and dispatches the bytes
//! to the configured printer profile. A missing/unavailable profile is a
//! non-retryable failure.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use rusqlite::params;
use serde_json::Value;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::db::{self, DbState};
use crate::escpos::{EscPosBuilder, PaperWidth};
use crate::labels::{self, LabelDoc, LabelKind, LabelRenderOptions};
use crate::printers;
use crate::receipt_renderer::{
    self, DocItem, LayoutConfig, MaintenanceTicketDoc, PrintDocument, QuotationDoc,
    SalesInvoiceDoc, ShopReceiptDoc,
};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Directory name under the app data dir where rendered documents are written.
const DOCUMENTS_DIR: &str = "documents";

/// Dispatch attempts before a job is marked failed.
const MAX_ATTEMPTS: i64 = 3;

/// Jobs picked up per worker pass.
const WORKER_BATCH: i64 = 10;

const ENTITY_TYPES: &[&str] = &[
    "sales_invoice",
    "quotation",
    "shop_receipt",
    "maintenance_ticket",
    "product_label",
];

// ---------------------------------------------------------------------------
// Enqueue
// ---------------------------------------------------------------------------

/// Create a new print job for the given entity.
///
/// Returns `{ success, jobId }` or an error. Rejects duplicates for the same
/// `(entity_type, entity_id)` that are still pending or printing.
pub fn enqueue_print_job(
    db: &DbState,
    entity_type: &str,
    entity_id: &str,
    printer_profile_id: Option<&str>,
) -> Result<Value, String> {
    enqueue_print_job_with_payload(db, entity_type, entity_id, printer_profile_id, None)
}

/// Create a new print job and optionally persist a payload snapshot.
pub fn enqueue_print_job_with_payload(
    db: &DbState,
    entity_type: &str,
    entity_id: &str,
    printer_profile_id: Option<&str>,
    entity_payload_json: Option<&Value>,
) -> Result<Value, String> {
    if !ENTITY_TYPES.contains(&entity_type) {
        return Err(format!(
            "Invalid entity_type: {entity_type}. Must be one of {ENTITY_TYPES:?}"
        ));
    }

    let conn = db.conn.lock().map_err(|e| e.to_string())?;

    // Idempotency: reject if a pending/printing job already exists for this entity
    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM print_jobs
             WHERE entity_type = ?1 AND entity_id = ?2
               AND status IN ('pending', 'printing')",
            params![entity_type, entity_id],
            |row| row.get(0),
        )
        .ok();

    if let Some(existing_id) = existing {
        return Ok(serde_json::json!({
            "success": true,
            "jobId": existing_id,
            "message": "Print job already queued",
            "duplicate": true,
        }));
    }

    let job_id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();
    let payload_string =
        entity_payload_json.and_then(|payload| serde_json::to_string(payload).ok());

    conn.execute(
        "INSERT INTO print_jobs (id, entity_type, entity_id, entity_payload_json,
                                 printer_profile_id, status, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 'pending', ?6, ?6)",
        params![
            job_id,
            entity_type,
            entity_id,
            payload_string,
            printer_profile_id,
            now
        ],
    )
    .map_err(|e| format!("enqueue print job: {e}"))?;

    info!(job_id = %job_id, entity_type = %entity_type, entity_id = %entity_id, "Print job enqueued");

    Ok(serde_json::json!({
        "success": true,
        "jobId": job_id,
        "message": "Print job enqueued",
    }))
}

// ---------------------------------------------------------------------------
// Job listing / files
// ---------------------------------------------------------------------------

pub fn list_print_jobs(db: &DbState, status: Option<&str>) -> Result<Value, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let mut stmt = conn
        .prepare(
            "SELECT id, entity_type, entity_id, status, attempts, last_error, output_path,
                    created_at, updated_at
             FROM print_jobs
             WHERE (?1 IS NULL OR status = ?1)
             ORDER BY created_at DESC
             LIMIT 200",
        )
        .map_err(|e| e.to_string())?;
    let rows = stmt
        .query_map(params![status], |row| {
            Ok(serde_json::json!({
                "id": row.get::<_, String>(0)?,
                "entityType": row.get::<_, String>(1)?,
                "entityId": row.get::<_, String>(2)?,
                "status": row.get::<_, String>(3)?,
                "attempts": row.get::<_, i64>(4)?,
                "lastError": row.get::<_, Option<String>>(5)?,
                "outputPath": row.get::<_, Option<String>>(6)?,
                "createdAt": row.get::<_, String>(7)?,
                "updatedAt": row.get::<_, String>(8)?,
            }))
        })
        .map_err(|e| e.to_string())?;
    let jobs: Vec<Value> = rows.filter_map(|r| r.ok()).collect();
    Ok(serde_json::json!(jobs))
}

/// Read the archive file a printed job produced.
pub fn get_job_file(db: &DbState, job_id: &str) -> Result<Value, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let path: Option<String> = conn
        .query_row(
            "SELECT output_path FROM print_jobs WHERE id = ?1",
            params![job_id],
            |row| row.get(0),
        )
        .map_err(|_| format!("Print job not found: {job_id}"))?;

    let path = path.ok_or("Job has no output file yet")?;
    let content =
        fs::read_to_string(&path).map_err(|e| format!("read output file {path}: {e}"))?;
    Ok(serde_json::json!({ "path": path, "content": content }))
}

/// Requeue a finished job as a fresh pending job.
pub fn reprint_job(db: &DbState, job_id: &str) -> Result<Value, String> {
    let (entity_type, entity_id, payload, profile): (
        String,
        String,
        Option<String>,
        Option<String>,
    ) = {
        let conn = db.conn.lock().map_err(|e| e.to_string())?;
        conn.query_row(
            "SELECT entity_type, entity_id, entity_payload_json, printer_profile_id
             FROM print_jobs WHERE id = ?1",
            params![job_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )
        .map_err(|_| format!("Print job not found: {job_id}"))?
    };

    let payload_value = payload.and_then(|p| serde_json::from_str::<Value>(&p).ok());
    enqueue_print_job_with_payload(
        db,
        &entity_type,
        &entity_id,
        profile.as_deref(),
        payload_value.as_ref(),
    )
}

// ---------------------------------------------------------------------------
// Layout
// ---------------------------------------------------------------------------

/// Assemble the layout config from store settings.
pub fn layout_from_settings(conn: &rusqlite::Connection) -> LayoutConfig {
    let paper_mm = db::get_setting(conn, "store", "paper_width_mm")
        .and_then(|v| v.parse::<i32>().ok())
        .unwrap_or(80);
    LayoutConfig {
        paper_width: PaperWidth::from_mm(paper_mm),
        store_name: db::get_setting(conn, "store", "name").unwrap_or_else(|| "Matjar".into()),
        store_address: db::get_setting(conn, "store", "address"),
        store_phone: db::get_setting(conn, "store", "phone"),
        footer_text: db::get_setting(conn, "store", "receipt_footer")
            .or_else(|| Some("شكراً لتعاملكم معنا".into())),
        arabic: db::get_setting(conn, "store", "print_arabic")
            .map(|v| v != "false")
            .unwrap_or(true),
    }
}

// ---------------------------------------------------------------------------
// Document loading
// ---------------------------------------------------------------------------

fn load_doc_items(
    conn: &rusqlite::Connection,
    table: &str,
    parent_column: &str,
    parent_id: &str,
) -> Result<Vec<DocItem>, String> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT name, quantity, unit_price, line_total
             FROM {table} WHERE {parent_column} = ?1 ORDER BY position, id"
        ))
        .map_err(|e| e.to_string())?;
    let rows = stmt
        .query_map(params![parent_id], |row| {
            Ok(DocItem {
                name: row.get(0)?,
                quantity: row.get(1)?,
                unit_price: row.get(2)?,
                total: row.get(3)?,
            })
        })
        .map_err(|e| e.to_string())?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

/// Load the printable document for an entity from the database.
pub fn build_document(
    conn: &rusqlite::Connection,
    entity_type: &str,
    entity_id: &str,
) -> Result<PrintDocument, String> {
    match entity_type {
        "sales_invoice" => {
            let doc = conn
                .query_row(
                    "SELECT id, invoice_no, source, invoice_date, customer_name, customer_phone,
                            subtotal, discount, total, paid, posted, notes
                     FROM sales_invoices WHERE id = ?1",
                    params![entity_id],
                    |row| {
                        Ok(SalesInvoiceDoc {
                            invoice_id: row.get(0)?,
                            invoice_no: row.get(1)?,
                            source: row.get(2)?,
                            invoice_date: row.get(3)?,
                            customer_name: row.get(4)?,
                            customer_phone: row.get(5)?,
                            items: Vec::new(),
                            subtotal: row.get(6)?,
                            discount: row.get(7)?,
                            total: row.get(8)?,
                            paid: row.get(9)?,
                            posted: row.get::<_, i64>(10)? == 1,
                            notes: row.get(11)?,
                        })
                    },
                )
                .map_err(|_| format!("Sales invoice not found: {entity_id}"))?;
            let mut doc = doc;
            doc.items = load_doc_items(conn, "sales_invoice_items", "invoice_id", entity_id)?;
            Ok(PrintDocument::SalesInvoice(doc))
        }
        "quotation" => {
            let doc = conn
                .query_row(
                    "SELECT id, quote_no, customer_name, quote_date, validity_days,
                            subtotal, discount, total, notes
                     FROM quotations WHERE id = ?1",
                    params![entity_id],
                    |row| {
                        Ok(QuotationDoc {
                            quotation_id: row.get(0)?,
                            quote_no: row.get(1)?,
                            customer_name: row.get(2)?,
                            quote_date: row.get(3)?,
                            validity_days: row.get(4)?,
                            items: Vec::new(),
                            subtotal: row.get(5)?,
                            discount: row.get(6)?,
                            total: row.get(7)?,
                            notes: row.get(8)?,
                        })
                    },
                )
                .map_err(|_| format!("Quotation not found: {entity_id}"))?;
            let mut doc = doc;
            doc.items = load_doc_items(conn, "quotation_items", "quotation_id", entity_id)?;
            Ok(PrintDocument::Quotation(doc))
        }
        "shop_receipt" => conn
            .query_row(
                "SELECT id, receipt_no, kind, party_name, amount, method, reference, note,
                        recorded_at
                 FROM shop_receipts WHERE id = ?1",
                params![entity_id],
                |row| {
                    Ok(PrintDocument::ShopReceipt(ShopReceiptDoc {
                        receipt_id: row.get(0)?,
                        receipt_no: row.get(1)?,
                        kind: row.get(2)?,
                        party_name: row.get(3)?,
                        amount: row.get(4)?,
                        method: row.get(5)?,
                        reference: row.get(6)?,
                        note: row.get(7)?,
                        recorded_at: row.get(8)?,
                    }))
                },
            )
            .map_err(|_| format!("Shop receipt not found: {entity_id}")),
        "maintenance_ticket" => conn
            .query_row(
                "SELECT id, ticket_no, customer_name, customer_phone, device, fault,
                        accessories, estimated_cost, paid_amount, status, received_at
                 FROM maintenance_tickets WHERE id = ?1",
                params![entity_id],
                |row| {
                    Ok(PrintDocument::MaintenanceTicket(MaintenanceTicketDoc {
                        ticket_id: row.get(0)?,
                        ticket_no: row.get(1)?,
                        customer_name: row.get(2)?,
                        customer_phone: row.get(3)?,
                        device: row.get(4)?,
                        fault: row.get(5)?,
                        accessories: row.get(6)?,
                        estimated_cost: row.get(7)?,
                        paid_amount: row.get(8)?,
                        status: row.get(9)?,
                        received_at: row.get(10)?,
                    }))
                },
            )
            .map_err(|_| format!("Maintenance ticket not found: {entity_id}")),
        other => Err(format!("No document builder for entity type {other}")),
    }
}

// ---------------------------------------------------------------------------
// Label rendering
// ---------------------------------------------------------------------------

/// Lift the label docs out of a job payload. The payload is either one
/// label object or `{ items: [...], labelType, copies }`.
fn label_docs_from_payload(payload: &Value) -> Result<Vec<LabelDoc>, String> {
    let kind = LabelKind::from_str(
        payload
            .get("labelType")
            .or_else(|| payload.get("label_type"))
            .and_then(Value::as_str)
            .unwrap_or("barcode"),
    );

    let items: Vec<Value> = match payload.get("items").and_then(Value::as_array) {
        Some(items) => items.clone(),
        None => vec![payload.clone()],
    };
    if items.is_empty() {
        return Err("Label batch is empty".into());
    }

    let mut docs = Vec::new();
    for item in &items {
        let copies = item
            .get("copies")
            .and_then(Value::as_u64)
            .unwrap_or(1)
            .clamp(1, 50);
        let doc = LabelDoc::from_payload(item, kind)?;
        for _ in 0..copies {
            docs.push(doc.clone());
        }
    }
    Ok(docs)
}

/// ESC/POS stream for a batch of labels (native barcode printing).
fn render_labels_escpos(docs: &[LabelDoc], layout: &LayoutConfig) -> Result<Vec<u8>, String> {
    let mut builder = EscPosBuilder::new().with_paper(layout.paper_width);
    builder.init();
    if layout.arabic {
        builder.arabic_mode();
    }
    for doc in docs {
        builder.center();
        if !doc.name.is_empty() {
            builder.text(&doc.name).lf();
        }
        if doc.kind != LabelKind::Price {
            builder
                .barcode_height(80)
                .barcode_module_width(2)
                .barcode_hri_below(true);
            builder.barcode_code128(&doc.code)?;
            builder.lf();
        }
        if doc.price > 0.0 || doc.kind != LabelKind::Barcode {
            builder.bold(true).double_height();
            builder
                .text(&format!("{:.2} {}", doc.price, doc.currency))
                .lf();
            builder.normal_size().bold(false);
        }
        builder.feed(2).cut();
    }
    Ok(builder.build())
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

struct PendingJob {
    id: String,
    entity_type: String,
    entity_id: String,
    payload: Option<Value>,
    printer_profile_id: Option<String>,
    attempts: i64,
}

fn load_pending_jobs(conn: &rusqlite::Connection) -> Result<Vec<PendingJob>, String> {
    let mut stmt = conn
        .prepare(
            "SELECT id, entity_type, entity_id, entity_payload_json, printer_profile_id, attempts
             FROM print_jobs
             WHERE status = 'pending'
             ORDER BY created_at
             LIMIT ?1",
        )
        .map_err(|e| e.to_string())?;
    let rows = stmt
        .query_map(params![WORKER_BATCH], |row| {
            Ok(PendingJob {
                id: row.get(0)?,
                entity_type: row.get(1)?,
                entity_id: row.get(2)?,
                payload: row
                    .get::<_, Option<String>>(3)?
                    .and_then(|p| serde_json::from_str(&p).ok()),
                printer_profile_id: row.get(4)?,
                attempts: row.get(5)?,
            })
        })
        .map_err(|e| e.to_string())?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

fn mark_job(conn: &rusqlite::Connection, job_id: &str, status: &str, error: Option<&str>) {
    let _ = conn.execute(
        "UPDATE print_jobs
         SET status = ?2, last_error = ?3, last_attempt_at = datetime('now'),
             updated_at = datetime('now')
         WHERE id = ?1",
        params![job_id, status, error],
    );
}

fn mark_job_printed(conn: &rusqlite::Connection, job_id: &str, output_path: &Path) {
    let _ = conn.execute(
        "UPDATE print_jobs
         SET status = 'printed', output_path = ?2, last_error = NULL,
             last_attempt_at = datetime('now'), updated_at = datetime('now')
         WHERE id = ?1",
        params![job_id, output_path.display().to_string()],
    );
}

/// Render one job and dispatch it. Distinguishes non-retryable failures
/// (missing entity, missing profile, render errors) from dispatch failures
/// that may succeed on a later attempt.
fn process_one_job(db: &DbState, job: &PendingJob, data_dir: &Path) -> Result<(), String> {
    let documents_dir = data_dir.join(DOCUMENTS_DIR);
    fs::create_dir_all(&documents_dir).map_err(|e| format!("create documents dir: {e}"))?;

    // Resolve the target profile before taking the render lock. Profile
    // resolution failures never heal on retry.
    let profile = printers::resolve_profile(db, job.printer_profile_id.as_deref())
        .map_err(|e| format!("non_retryable:{e}"))?
        .ok_or("non_retryable:No printer profile configured".to_string())?;

    // Phase 1: render (DB lock held briefly, no I/O beyond reads)
    let (archive_path, dispatch_bytes) = {
        let conn = db.conn.lock().map_err(|e| e.to_string())?;
        let layout = layout_from_settings(&conn);

        if job.entity_type == "product_label" {
            let payload = job
                .payload
                .clone()
                .or_else(|| {
                    // Fall back to the product row when the job was enqueued
                    // by id only.
                    conn.query_row(
                        "SELECT name, barcode, shamel_no, sale_price FROM products WHERE id = ?1",
                        params![job.entity_id],
                        |row| {
                            Ok(serde_json::json!({
                                "name": row.get::<_, String>(0)?,
                                "barcode": row.get::<_, Option<String>>(1)?,
                                "shamelNo": row.get::<_, Option<String>>(2)?,
                                "salePrice": row.get::<_, f64>(3)?,
                            }))
                        },
                    )
                    .ok()
                })
                .ok_or("non_retryable:Label job has no payload and no matching product")?;

            let docs = label_docs_from_payload(&payload)
                .map_err(|e| format!("non_retryable:{e}"))?;
            let escpos = render_labels_escpos(&docs, &layout)
                .map_err(|e| format!("non_retryable:{e}"))?;

            // Archive the first label as a PNG preview
            let png = labels::render_label_png(&docs[0], &LabelRenderOptions::default())
                .map_err(|e| format!("non_retryable:{e}"))?;
            let path = documents_dir.join(format!("label-{}.png", job.id));
            fs::write(&path, &png).map_err(|e| format!("write label file: {e}"))?;

            (path, escpos)
        } else {
            let document = build_document(&conn, &job.entity_type, &job.entity_id)
                .map_err(|e| format!("non_retryable:{e}"))?;

            let text = receipt_renderer::render_text(&document, &layout);
            let escpos = receipt_renderer::render_escpos(&document, &layout);

            let path = documents_dir.join(format!("{}-{}.txt", job.entity_type, job.id));
            fs::write(&path, &text).map_err(|e| format!("write document file: {e}"))?;

            (path, escpos)
        }
    };

    // Phase 2: dispatch (no DB lock held)
    printers::dispatch_raw(&profile, &dispatch_bytes, &data_dir.join("spool"))?;

    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    mark_job_printed(&conn, &job.id, &archive_path);
    info!(job_id = %job.id, entity_type = %job.entity_type, "Print job completed");
    Ok(())
}

/// Process pending jobs once. Returns the number of jobs that printed.
pub fn process_pending_jobs(db: &DbState, data_dir: &Path) -> Result<usize, String> {
    let jobs = {
        let conn = db.conn.lock().map_err(|e| e.to_string())?;
        let jobs = load_pending_jobs(&conn)?;
        for job in &jobs {
            let _ = conn.execute(
                "UPDATE print_jobs SET status = 'printing', attempts = attempts + 1,
                        updated_at = datetime('now')
                 WHERE id = ?1",
                params![job.id],
            );
        }
        jobs
    };

    let mut printed = 0usize;
    for job in &jobs {
        match process_one_job(db, job, data_dir) {
            Ok(()) => printed += 1,
            Err(e) => {
                let conn = db.conn.lock().map_err(|e| e.to_string())?;
                if let Some(reason) = e.strip_prefix("non_retryable:") {
                    warn!(job_id = %job.id, reason, "Print job failed permanently");
                    mark_job(&conn, &job.id, "failed", Some(reason));
                } else if job.attempts + 1 >= MAX_ATTEMPTS {
                    warn!(job_id = %job.id, error = %e, "Print job failed after retries");
                    mark_job(&conn, &job.id, "failed", Some(&e));
                } else {
                    warn!(job_id = %job.id, error = %e, "Print dispatch failed; will retry");
                    mark_job(&conn, &job.id, "pending", Some(&e));
                }
            }
        }
    }

    Ok(printed)
}

/// Start the background print worker.
pub fn start_print_worker(db: Arc<DbState>, data_dir: PathBuf, interval_secs: u64) {
    tauri::async_runtime::spawn(async move {
        let interval = tokio::time::Duration::from_secs(interval_secs);
        loop {
            tokio::time::sleep(interval).await;
            match process_pending_jobs(&db, &data_dir) {
                Ok(_) => {}
                Err(e) => error!("Print worker error: {e}"),
            }
        }
    });

    info!(interval_secs = interval_secs, "Print worker started");
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;
    use std::sync::Mutex;

    fn test_db() -> DbState {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        db::run_migrations_for_test(&conn);
        DbState {
            conn: Mutex::new(conn),
            db_path: PathBuf::from(":memory:"),
        }
    }

    fn seed_invoice(db: &DbState) {
        let conn = db.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO sales_invoices (id, invoice_no, source, invoice_date, customer_name,
                                         subtotal, discount, total, paid, posted)
             VALUES ('inv-1', 1024, 'shop', '2026-08-02', 'Omar', 22.0, 2.0, 20.0, 15.0, 0)",
            [],
        )
        .expect("insert invoice");
        conn.execute(
            "INSERT INTO sales_invoice_items (id, invoice_id, name, quantity, unit_price, line_total, position)
             VALUES ('it-1', 'inv-1', 'Cable', 2, 5.0, 10.0, 0),
                    ('it-2', 'inv-1', 'Charger', 1, 12.0, 12.0, 1)",
            [],
        )
        .expect("insert items");
    }

    #[test]
    fn enqueue_rejects_duplicates_and_bad_types() {
        let db = test_db();
        seed_invoice(&db);

        let first = enqueue_print_job(&db, "sales_invoice", "inv-1", None).expect("enqueue");
        assert_eq!(first["success"], true);
        assert!(first.get("duplicate").is_none());

        let second = enqueue_print_job(&db, "sales_invoice", "inv-1", None).expect("enqueue dup");
        assert_eq!(second["duplicate"], true);
        assert_eq!(second["jobId"], first["jobId"]);

        assert!(enqueue_print_job(&db, "kitchen_ticket", "x", None).is_err());
    }

    #[test]
    fn build_document_loads_invoice_with_items() {
        let db = test_db();
        seed_invoice(&db);

        let conn = db.conn.lock().unwrap();
        let doc = build_document(&conn, "sales_invoice", "inv-1").expect("build");
        match doc {
            PrintDocument::SalesInvoice(inv) => {
                assert_eq!(inv.invoice_no, 1024);
                assert_eq!(inv.items.len(), 2);
                assert_eq!(inv.items[0].name, "Cable");
            }
            other => panic!("unexpected document: {other:?}"),
        }
    }

    #[test]
    fn build_document_missing_entity_fails() {
        let db = test_db();
        let conn = db.conn.lock().unwrap();
        assert!(build_document(&conn, "sales_invoice", "nope").is_err());
    }

    #[test]
    fn label_docs_expand_copies() {
        let payload = serde_json::json!({
            "items": [
                { "name": "Cable", "barcode": "6291001234567", "salePrice": 3.5, "copies": 3 },
                { "name": "Charger", "shamelNo": "SH-9", "salePrice": 12.0 }
            ],
            "labelType": "barcode"
        });
        let docs = label_docs_from_payload(&payload).expect("docs");
        assert_eq!(docs.len(), 4);
        assert_eq!(docs[0].code, "6291001234567");
        assert_eq!(docs[3].code, "SH-9");
    }

    #[test]
    fn label_batch_without_codes_fails() {
        let payload = serde_json::json!({
            "items": [{ "name": "No code", "salePrice": 1.0 }],
            "labelType": "barcode"
        });
        assert!(label_docs_from_payload(&payload).is_err());
    }

    #[test]
    fn worker_marks_job_printed_with_file_profile() {
        let db = test_db();
        seed_invoice(&db);
        printers::create_profile(
            &db,
            &serde_json::json!({ "name": "Spool", "driverType": "file", "isDefault": true }),
        )
        .expect("profile");

        enqueue_print_job(&db, "sales_invoice", "inv-1", None).expect("enqueue");

        let data_dir = std::env::temp_dir().join(format!("matjar-print-test-{}", Uuid::new_v4()));
        let printed = process_pending_jobs(&db, &data_dir).expect("process");
        assert_eq!(printed, 1);

        let conn = db.conn.lock().unwrap();
        let (status, output): (String, Option<String>) = conn
            .query_row(
                "SELECT status, output_path FROM print_jobs LIMIT 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(status, "printed");
        let output = output.expect("output path recorded");
        let content = std::fs::read_to_string(&output).expect("archive file");
        assert!(content.contains("#1024"));

        let _ = std::fs::remove_dir_all(&data_dir);
    }

    #[test]
    fn worker_fails_job_without_profile() {
        let db = test_db();
        seed_invoice(&db);
        enqueue_print_job(&db, "sales_invoice", "inv-1", None).expect("enqueue");

        let data_dir = std::env::temp_dir().join(format!("matjar-print-test-{}", Uuid::new_v4()));
        let printed = process_pending_jobs(&db, &data_dir).expect("process");
        assert_eq!(printed, 0);

        let conn = db.conn.lock().unwrap();
        let (status, error): (String, Option<String>) = conn
            .query_row(
                "SELECT status, last_error FROM print_jobs LIMIT 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(status, "failed", "missing profile is non-retryable");
        assert!(error.unwrap().contains("No printer profile"));

        let _ = std::fs::remove_dir_all(&data_dir);
    }

    #[test]
    fn reprint_clones_job() {
        let db = test_db();
        seed_invoice(&db);
        let first = enqueue_print_job(&db, "sales_invoice", "inv-1", None).expect("enqueue");
        let job_id = first["jobId"].as_str().unwrap().to_string();

        // Finish the first job so the reprint is not a duplicate
        {
            let conn = db.conn.lock().unwrap();
            conn.execute(
                "UPDATE print_jobs SET status = 'printed' WHERE id = ?1",
                params![job_id],
            )
            .unwrap();
        }

        let reprint = reprint_job(&db, &job_id).expect("reprint");
        assert_eq!(reprint["success"], true);
        assert_ne!(reprint["jobId"], first["jobId"]);
    }
}
