//! Sales invoicing commands (shop + warehouse books).
//!
//! Stock moves with the invoice: creating an invoice decrements product
//! quantities in the same SQLite transaction as the invoice write, item
//! edits apply the delta, and deleting an unposted invoice restores stock.
//! The accountant sign (مرحلة / غير مرحلة) gates edits: posted invoices are
//! read-only except for the sign itself.

use serde_json::Value;
use tauri::Emitter;

use crate::itemdiff;
use crate::query::{self, ListOptions};
use crate::{
    auth, db, payload_arg0_as_string, print, sync, value_f64, value_str,
};

const SEARCH_FIELDS: &[&str] = &["customerName", "customerPhone", "invoiceNo", "notes"];

const INVOICE_COLUMNS: &str = "id, invoice_no, source, customer_id, customer_name, customer_phone,
                               invoice_date, subtotal, discount, total, paid, posted, posted_at,
                               posted_by, notes, created_by, version, sync_status, created_at,
                               updated_at";

fn invoice_row_to_json(row: &rusqlite::Row<'_>) -> rusqlite::Result<Value> {
    let total: f64 = row.get(9)?;
    let paid: f64 = row.get(10)?;
    Ok(serde_json::json!({
        "id": row.get::<_, String>(0)?,
        "invoiceNo": row.get::<_, i64>(1)?,
        "source": row.get::<_, String>(2)?,
        "customerId": row.get::<_, Option<String>>(3)?,
        "customerName": row.get::<_, Option<String>>(4)?,
        "customerPhone": row.get::<_, Option<String>>(5)?,
        "invoiceDate": row.get::<_, String>(6)?,
        "subtotal": row.get::<_, f64>(7)?,
        "discount": row.get::<_, f64>(8)?,
        "total": total,
        "paid": paid,
        "remaining": (total - paid).max(0.0),
        "posted": row.get::<_, i64>(11)? == 1,
        "postedAt": row.get::<_, Option<String>>(12)?,
        "postedBy": row.get::<_, Option<String>>(13)?,
        "notes": row.get::<_, Option<String>>(14)?,
        "createdBy": row.get::<_, Option<String>>(15)?,
        "version": row.get::<_, i64>(16)?,
        "syncStatus": row.get::<_, String>(17)?,
        "createdAt": row.get::<_, Option<String>>(18)?,
        "updatedAt": row.get::<_, Option<String>>(19)?,
    }))
}

pub(crate) fn load_items(
    conn: &rusqlite::Connection,
    invoice_id: &str,
) -> Result<Vec<Value>, String> {
    let mut stmt = conn
        .prepare(
            "SELECT id, product_id, name, quantity, unit_price, line_total, position
             FROM sales_invoice_items WHERE invoice_id = ?1 ORDER BY position, id",
        )
        .map_err(|e| e.to_string())?;
    let rows = stmt
        .query_map(rusqlite::params![invoice_id], |row| {
            Ok(serde_json::json!({
                "id": row.get::<_, String>(0)?,
                "productId": row.get::<_, Option<String>>(1)?,
                "name": row.get::<_, String>(2)?,
                "quantity": row.get::<_, f64>(3)?,
                "unitPrice": row.get::<_, f64>(4)?,
                "lineTotal": row.get::<_, f64>(5)?,
                "position": row.get::<_, i64>(6)?,
            }))
        })
        .map_err(|e| e.to_string())?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

fn get_invoice_json(conn: &rusqlite::Connection, invoice_id: &str) -> Result<Value, String> {
    let mut invoice = conn
        .query_row(
            &format!("SELECT {INVOICE_COLUMNS} FROM sales_invoices WHERE id = ?1"),
            rusqlite::params![invoice_id],
            |row| invoice_row_to_json(row),
        )
        .map_err(|_| format!("Sales invoice not found: {invoice_id}"))?;
    invoice["items"] = Value::Array(load_items(conn, invoice_id)?);
    Ok(invoice)
}

fn parse_item(item: &Value) -> Result<(Option<String>, String, f64, f64, f64), String> {
    let name = value_str(item, &["name"]).ok_or("Item name is required")?;
    let quantity = value_f64(item, &["quantity", "qty"]).unwrap_or(1.0);
    let unit_price = value_f64(item, &["unitPrice", "unit_price", "price"]).unwrap_or(0.0);
    if quantity <= 0.0 {
        return Err(format!("Item '{name}': quantity must be positive"));
    }
    if unit_price < 0.0 {
        return Err(format!("Item '{name}': price cannot be negative"));
    }
    Ok((
        value_str(item, &["productId", "product_id"]),
        name,
        quantity,
        unit_price,
        quantity * unit_price,
    ))
}

/// Apply stock deltas inside the caller's transaction. A positive delta
/// takes from stock (sale); availability is checked first so an invoice can
/// never drive a quantity negative.
fn apply_stock_deltas(
    tx: &rusqlite::Connection,
    deltas: &std::collections::HashMap<String, f64>,
) -> Result<(), String> {
    for (product_id, delta) in deltas {
        if *delta > 0.0 {
            let available: f64 = tx
                .query_row(
                    "SELECT quantity FROM products WHERE id = ?1 AND is_active = 1",
                    rusqlite::params![product_id],
                    |row| row.get(0),
                )
                .map_err(|_| format!("Product not found: {product_id}"))?;
            if available + 1e-9 < *delta {
                return Err(format!(
                    "Insufficient stock for product {product_id}: need {delta}, have {available}"
                ));
            }
        }
        tx.execute(
            "UPDATE products
             SET quantity = quantity - ?2, version = version + 1,
                 sync_status = 'pending', updated_at = datetime('now')
             WHERE id = ?1",
            rusqlite::params![product_id, delta],
        )
        .map_err(|e| e.to_string())?;
    }
    Ok(())
}

fn recompute_totals(
    tx: &rusqlite::Connection,
    invoice_id: &str,
    discount: Option<f64>,
) -> Result<(), String> {
    let subtotal: f64 = tx
        .query_row(
            "SELECT COALESCE(SUM(line_total), 0) FROM sales_invoice_items WHERE invoice_id = ?1",
            rusqlite::params![invoice_id],
            |row| row.get(0),
        )
        .map_err(|e| e.to_string())?;
    let discount = match discount {
        Some(d) => d,
        None => tx
            .query_row(
                "SELECT discount FROM sales_invoices WHERE id = ?1",
                rusqlite::params![invoice_id],
                |row| row.get(0),
            )
            .unwrap_or(0.0),
    };
    if discount < 0.0 {
        return Err("Discount cannot be negative".into());
    }
    if discount > subtotal {
        return Err(format!(
            "Discount ({discount:.2}) cannot exceed subtotal ({subtotal:.2})"
        ));
    }
    tx.execute(
        "UPDATE sales_invoices
         SET subtotal = ?2, discount = ?3, total = ?2 - ?3,
             version = version + 1, sync_status = 'pending', updated_at = datetime('now')
         WHERE id = ?1",
        rusqlite::params![invoice_id, subtotal, discount],
    )
    .map_err(|e| e.to_string())?;
    Ok(())
}

fn invoice_posted(conn: &rusqlite::Connection, invoice_id: &str) -> Result<bool, String> {
    conn.query_row(
        "SELECT posted FROM sales_invoices WHERE id = ?1",
        rusqlite::params![invoice_id],
        |row| row.get::<_, i64>(0).map(|v| v == 1),
    )
    .map_err(|_| format!("Sales invoice not found: {invoice_id}"))
}

// ---------------------------------------------------------------------------
// Implementations
// ---------------------------------------------------------------------------

pub(crate) fn list_invoices_impl(db: &db::DbState, payload: &Value) -> Result<Value, String> {
    let source = value_str(payload, &["source"]);
    let posted = payload.get("posted").and_then(Value::as_bool);
    let date_from = value_str(payload, &["dateFrom", "date_from", "from"]);
    let date_to = value_str(payload, &["dateTo", "date_to", "to"]);

    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {INVOICE_COLUMNS} FROM sales_invoices
             WHERE (?1 IS NULL OR source = ?1)
               AND (?2 IS NULL OR posted = ?2)
               AND (?3 IS NULL OR invoice_date >= ?3)
               AND (?4 IS NULL OR invoice_date <= ?4)
             ORDER BY invoice_date DESC, invoice_no DESC"
        ))
        .map_err(|e| e.to_string())?;
    let rows = stmt
        .query_map(
            rusqlite::params![source, posted.map(|b| b as i64), date_from, date_to],
            |row| invoice_row_to_json(row),
        )
        .map_err(|e| e.to_string())?;
    let invoices: Vec<Value> = rows.filter_map(|r| r.ok()).collect();
    drop(stmt);
    drop(conn);

    let opts = ListOptions::from_payload(payload);
    Ok(query::apply(invoices, &opts, SEARCH_FIELDS))
}

pub(crate) fn create_invoice_impl(db: &db::DbState, payload: &Value) -> Result<Value, String> {
    let source = value_str(payload, &["source"]).unwrap_or_else(|| "shop".into());
    if !matches!(source.as_str(), "shop" | "warehouse") {
        return Err(format!("Invoice source must be shop or warehouse, got {source}"));
    }
    let items = payload
        .get("items")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    if items.is_empty() {
        return Err("An invoice needs at least one item".into());
    }
    let discount = value_f64(payload, &["discount"]).unwrap_or(0.0);
    let paid = value_f64(payload, &["paid"]).unwrap_or(0.0);
    if paid < 0.0 {
        return Err("Paid amount cannot be negative".into());
    }

    let mut conn = db.conn.lock().map_err(|e| e.to_string())?;
    let tx = conn.transaction().map_err(|e| e.to_string())?;

    let invoice_no = db::next_counter(&tx, &format!("invoice_no_{source}"))?;
    let id = format!("inv-{}", uuid::Uuid::new_v4());
    let invoice_date = value_str(payload, &["invoiceDate", "invoice_date", "date"])
        .unwrap_or_else(crate::data_helpers::today);

    tx.execute(
        "INSERT INTO sales_invoices (id, invoice_no, source, customer_id, customer_name,
                                     customer_phone, invoice_date, paid, notes, created_by)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        rusqlite::params![
            id,
            invoice_no,
            source,
            value_str(payload, &["customerId", "customer_id"]),
            value_str(payload, &["customerName", "customer_name"]),
            value_str(payload, &["customerPhone", "customer_phone", "phone"]),
            invoice_date,
            paid,
            value_str(payload, &["notes"]),
            value_str(payload, &["createdBy", "created_by"]),
        ],
    )
    .map_err(|e| format!("create invoice: {e}"))?;

    let mut inserted_items: Vec<Value> = Vec::new();
    for (position, item) in items.iter().enumerate() {
        let (product_id, name, quantity, unit_price, line_total) = parse_item(item)?;
        let item_id = format!("sii-{}", uuid::Uuid::new_v4());
        tx.execute(
            "INSERT INTO sales_invoice_items (id, invoice_id, product_id, name, quantity,
                                              unit_price, line_total, position)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                item_id,
                id,
                product_id,
                name,
                quantity,
                unit_price,
                line_total,
                position as i64,
            ],
        )
        .map_err(|e| format!("create invoice item: {e}"))?;
        inserted_items.push(serde_json::json!({
            "id": item_id, "productId": product_id, "quantity": quantity
        }));
    }

    // Stock leaves with the sale, in the same transaction as the invoice.
    let deltas = itemdiff::stock_deltas(&[], &inserted_items);
    apply_stock_deltas(&tx, &deltas)?;

    recompute_totals(&tx, &id, Some(discount))?;
    tx.commit().map_err(|e| e.to_string())?;

    let invoice = get_invoice_json(&conn, &id)?;
    sync::enqueue(&conn, "sales_invoice", &id, "insert", &invoice)?;
    Ok(serde_json::json!({ "success": true, "data": invoice }))
}

pub(crate) fn update_invoice_impl(
    db: &db::DbState,
    invoice_id: &str,
    updates: &Value,
) -> Result<Value, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    if invoice_posted(&conn, invoice_id)? {
        return Err("Posted invoices cannot be edited".into());
    }

    for (key, column) in [
        ("customerName", "customer_name"),
        ("customerPhone", "customer_phone"),
        ("invoiceDate", "invoice_date"),
        ("notes", "notes"),
    ] {
        if let Some(text) = value_str(updates, &[key]) {
            conn.execute(
                &format!("UPDATE sales_invoices SET {column} = ?2 WHERE id = ?1"),
                rusqlite::params![invoice_id, text],
            )
            .map_err(|e| e.to_string())?;
        }
    }
    if let Some(paid) = value_f64(updates, &["paid"]) {
        if paid < 0.0 {
            return Err("Paid amount cannot be negative".into());
        }
        conn.execute(
            "UPDATE sales_invoices SET paid = ?2 WHERE id = ?1",
            rusqlite::params![invoice_id, paid],
        )
        .map_err(|e| e.to_string())?;
    }

    recompute_totals(&conn, invoice_id, value_f64(updates, &["discount"]))?;

    let invoice = get_invoice_json(&conn, invoice_id)?;
    sync::enqueue(&conn, "sales_invoice", invoice_id, "update", &invoice)?;
    Ok(serde_json::json!({ "success": true, "data": invoice }))
}

/// Apply an item-list edit: diff against the stored rows, write the minimal
/// change set, and move stock by the quantity deltas — all in one
/// transaction.
pub(crate) fn update_items_impl(
    db: &db::DbState,
    invoice_id: &str,
    edited: &[Value],
) -> Result<Value, String> {
    if edited.is_empty() {
        return Err("An invoice needs at least one item".into());
    }

    let mut conn = db.conn.lock().map_err(|e| e.to_string())?;
    if invoice_posted(&conn, invoice_id)? {
        return Err("Posted invoices cannot be edited".into());
    }

    let original = load_items(&conn, invoice_id)?;
    let diff = itemdiff::diff_items(&original, edited);
    if diff.is_empty() {
        return Ok(serde_json::json!({
            "success": true,
            "data": get_invoice_json(&conn, invoice_id)?,
            "changes": diff.to_json(),
        }));
    }
    let deltas = itemdiff::stock_deltas(&original, edited);

    let tx = conn.transaction().map_err(|e| e.to_string())?;

    for id in &diff.deleted {
        tx.execute(
            "DELETE FROM sales_invoice_items WHERE id = ?1 AND invoice_id = ?2",
            rusqlite::params![id, invoice_id],
        )
        .map_err(|e| e.to_string())?;
    }
    for item in &diff.updated {
        let (product_id, name, quantity, unit_price, line_total) = parse_item(item)?;
        let item_id = item.get("id").and_then(Value::as_str).unwrap_or_default();
        tx.execute(
            "UPDATE sales_invoice_items
             SET product_id = ?3, name = ?4, quantity = ?5, unit_price = ?6, line_total = ?7
             WHERE id = ?1 AND invoice_id = ?2",
            rusqlite::params![
                item_id,
                invoice_id,
                product_id,
                name,
                quantity,
                unit_price,
                line_total
            ],
        )
        .map_err(|e| e.to_string())?;
    }
    let base_position: i64 = tx
        .query_row(
            "SELECT COALESCE(MAX(position), -1) + 1 FROM sales_invoice_items WHERE invoice_id = ?1",
            rusqlite::params![invoice_id],
            |row| row.get(0),
        )
        .unwrap_or(0);
    for (offset, item) in diff.added.iter().enumerate() {
        let (product_id, name, quantity, unit_price, line_total) = parse_item(item)?;
        tx.execute(
            "INSERT INTO sales_invoice_items (id, invoice_id, product_id, name, quantity,
                                              unit_price, line_total, position)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                format!("sii-{}", uuid::Uuid::new_v4()),
                invoice_id,
                product_id,
                name,
                quantity,
                unit_price,
                line_total,
                base_position + offset as i64,
            ],
        )
        .map_err(|e| e.to_string())?;
    }

    apply_stock_deltas(&tx, &deltas)?;
    recompute_totals(&tx, invoice_id, None)?;
    tx.commit().map_err(|e| e.to_string())?;

    let invoice = get_invoice_json(&conn, invoice_id)?;
    sync::enqueue(
        &conn,
        "sales_invoice",
        invoice_id,
        "update",
        &serde_json::json!({ "invoice": invoice, "itemChanges": diff.to_json() }),
    )?;
    Ok(serde_json::json!({
        "success": true,
        "data": invoice,
        "changes": diff.to_json(),
    }))
}

/// Flip the accountant sign. Permission is checked by the command wrapper.
pub(crate) fn set_posted_impl(
    db: &db::DbState,
    invoice_id: &str,
    posted: bool,
    posted_by: Option<&str>,
) -> Result<Value, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let current = invoice_posted(&conn, invoice_id)?;
    if current == posted {
        return Ok(serde_json::json!({
            "success": true,
            "data": get_invoice_json(&conn, invoice_id)?,
            "unchanged": true,
        }));
    }

    conn.execute(
        "UPDATE sales_invoices
         SET posted = ?2,
             posted_at = CASE WHEN ?2 THEN datetime('now') ELSE NULL END,
             posted_by = CASE WHEN ?2 THEN ?3 ELSE NULL END,
             version = version + 1, sync_status = 'pending', updated_at = datetime('now')
         WHERE id = ?1",
        rusqlite::params![invoice_id, posted, posted_by],
    )
    .map_err(|e| e.to_string())?;

    let invoice = get_invoice_json(&conn, invoice_id)?;
    sync::enqueue(&conn, "sales_invoice", invoice_id, "update", &invoice)?;
    Ok(serde_json::json!({ "success": true, "data": invoice }))
}

/// Delete an unposted invoice and put its stock back.
pub(crate) fn delete_invoice_impl(db: &db::DbState, invoice_id: &str) -> Result<Value, String> {
    let mut conn = db.conn.lock().map_err(|e| e.to_string())?;
    if invoice_posted(&conn, invoice_id)? {
        return Err("Posted invoices cannot be deleted".into());
    }

    let items = load_items(&conn, invoice_id)?;
    // Reverse of the sale: empty edited list yields negative deltas.
    let deltas = itemdiff::stock_deltas(&items, &[]);

    let tx = conn.transaction().map_err(|e| e.to_string())?;
    apply_stock_deltas(&tx, &deltas)?;
    tx.execute(
        "DELETE FROM sales_invoices WHERE id = ?1",
        rusqlite::params![invoice_id],
    )
    .map_err(|e| e.to_string())?;
    tx.commit().map_err(|e| e.to_string())?;

    sync::enqueue(
        &conn,
        "sales_invoice",
        invoice_id,
        "delete",
        &serde_json::json!({ "id": invoice_id }),
    )?;
    Ok(serde_json::json!({ "success": true }))
}

/// Aggregate totals for a range, split by settlement sign.
pub(crate) fn totals_summary_impl(db: &db::DbState, payload: &Value) -> Result<Value, String> {
    let source = value_str(payload, &["source"]);
    let date_from = value_str(payload, &["dateFrom", "date_from", "from"]);
    let date_to = value_str(payload, &["dateTo", "date_to", "to"]);

    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let (count, total, paid, posted_count): (i64, f64, f64, i64) = conn
        .query_row(
            "SELECT COUNT(*), COALESCE(SUM(total), 0), COALESCE(SUM(paid), 0),
                    COALESCE(SUM(posted), 0)
             FROM sales_invoices
             WHERE (?1 IS NULL OR source = ?1)
               AND (?2 IS NULL OR invoice_date >= ?2)
               AND (?3 IS NULL OR invoice_date <= ?3)",
            rusqlite::params![source, date_from, date_to],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )
        .map_err(|e| e.to_string())?;

    Ok(serde_json::json!({
        "count": count,
        "total": total,
        "paid": paid,
        "remaining": (total - paid).max(0.0),
        "postedCount": posted_count,
        "unpostedCount": count - posted_count,
    }))
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

#[tauri::command]
pub async fn invoice_list(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    list_invoices_impl(&db, &arg0.unwrap_or_else(|| serde_json::json!({})))
}

#[tauri::command]
pub async fn invoice_get(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    let invoice_id = payload_arg0_as_string(arg0, &["invoiceId", "invoice_id", "id"])
        .ok_or("Missing invoiceId")?;
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    get_invoice_json(&conn, &invoice_id)
}

#[tauri::command]
pub async fn invoice_create(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
    app: tauri::AppHandle,
) -> Result<Value, String> {
    let result = create_invoice_impl(&db, &arg0.unwrap_or_else(|| serde_json::json!({})))?;
    if let Some(invoice) = result.get("data") {
        let _ = app.emit("invoice_created", invoice.clone());
    }
    Ok(result)
}

#[tauri::command]
pub async fn invoice_update(
    arg0: Option<Value>,
    arg1: Option<Value>,
    db: tauri::State<'_, db::DbState>,
    app: tauri::AppHandle,
) -> Result<Value, String> {
    let base = arg0.unwrap_or_else(|| serde_json::json!({}));
    let invoice_id = payload_arg0_as_string(Some(base.clone()), &["invoiceId", "invoice_id", "id"])
        .ok_or("Missing invoiceId")?;
    let updates = arg1
        .or_else(|| base.get("updates").cloned())
        .unwrap_or_else(|| serde_json::json!({}));
    let result = update_invoice_impl(&db, &invoice_id, &updates)?;
    if let Some(invoice) = result.get("data") {
        let _ = app.emit("invoice_updated", invoice.clone());
    }
    Ok(result)
}

#[tauri::command]
pub async fn invoice_update_items(
    arg0: Option<Value>,
    arg1: Option<Value>,
    db: tauri::State<'_, db::DbState>,
    app: tauri::AppHandle,
) -> Result<Value, String> {
    let base = arg0.unwrap_or_else(|| serde_json::json!({}));
    let invoice_id = payload_arg0_as_string(Some(base.clone()), &["invoiceId", "invoice_id", "id"])
        .ok_or("Missing invoiceId")?;
    let items = arg1
        .and_then(|v| v.as_array().cloned())
        .or_else(|| base.get("items").and_then(Value::as_array).cloned())
        .ok_or("Missing items")?;
    let result = update_items_impl(&db, &invoice_id, &items)?;
    if let Some(invoice) = result.get("data") {
        let _ = app.emit("invoice_updated", invoice.clone());
    }
    Ok(result)
}

#[tauri::command]
pub async fn invoice_set_posted(
    arg0: Option<Value>,
    arg1: Option<Value>,
    db: tauri::State<'_, db::DbState>,
    auth_state: tauri::State<'_, auth::AuthState>,
    app: tauri::AppHandle,
) -> Result<Value, String> {
    if !auth::has_permission(&auth_state, Some("post_invoices")) {
        return Err("Not authorized: posting invoices requires the accountant permission".into());
    }

    let base = arg0.unwrap_or_else(|| serde_json::json!({}));
    let invoice_id = payload_arg0_as_string(Some(base.clone()), &["invoiceId", "invoice_id", "id"])
        .ok_or("Missing invoiceId")?;
    let posted = arg1
        .as_ref()
        .and_then(Value::as_bool)
        .or_else(|| base.get("posted").and_then(Value::as_bool))
        .unwrap_or(true);
    let posted_by = auth::get_session_json(&auth_state)
        .get("staffId")
        .and_then(Value::as_str)
        .map(str::to_string);

    let result = set_posted_impl(&db, &invoice_id, posted, posted_by.as_deref())?;
    if let Some(invoice) = result.get("data") {
        let _ = app.emit("invoice_updated", invoice.clone());
    }
    Ok(result)
}

#[tauri::command]
pub async fn invoice_delete(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
    app: tauri::AppHandle,
) -> Result<Value, String> {
    let invoice_id = payload_arg0_as_string(arg0, &["invoiceId", "invoice_id", "id"])
        .ok_or("Missing invoiceId")?;
    let result = delete_invoice_impl(&db, &invoice_id)?;
    let _ = app.emit("invoice_deleted", serde_json::json!({ "id": invoice_id }));
    Ok(result)
}

#[tauri::command]
pub async fn invoice_print(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    let invoice_id = payload_arg0_as_string(arg0, &["invoiceId", "invoice_id", "id"])
        .ok_or("Missing invoiceId")?;
    print::enqueue_print_job(&db, "sales_invoice", &invoice_id, None)
}

#[tauri::command]
pub async fn invoice_totals_summary(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    totals_summary_impl(&db, &arg0.unwrap_or_else(|| serde_json::json!({})))
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

    fn test_db() -> db::DbState {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        db::run_migrations_for_test(&conn);
        db::DbState {
            conn: Mutex::new(conn),
            db_path: PathBuf::from(":memory:"),
        }
    }

    fn seed_product(db: &db::DbState, id: &str, quantity: f64) {
        let conn = db.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO products (id, name, sale_price, quantity) VALUES (?1, ?1, 5.0, ?2)",
            rusqlite::params![id, quantity],
        )
        .expect("seed product");
    }

    fn product_quantity(db: &db::DbState, id: &str) -> f64 {
        let conn = db.conn.lock().unwrap();
        conn.query_row(
            "SELECT quantity FROM products WHERE id = ?1",
            rusqlite::params![id],
            |row| row.get(0),
        )
        .unwrap()
    }

    fn create_invoice(db: &db::DbState) -> Value {
        create_invoice_impl(
            db,
            &serde_json::json!({
                "source": "shop",
                "customerName": "Omar",
                "items": [
                    { "productId": "p1", "name": "Cable", "quantity": 3.0, "unitPrice": 5.0 },
                    { "name": "Labor", "quantity": 1.0, "unitPrice": 2.0 }
                ],
                "discount": 2.0,
                "paid": 10.0
            }),
        )
        .expect("create invoice")
    }

    #[test]
    fn create_decrements_stock_and_computes_totals() {
        let db = test_db();
        seed_product(&db, "p1", 10.0);

        let invoice = create_invoice(&db);
        assert_eq!(invoice["data"]["subtotal"], 17.0);
        assert_eq!(invoice["data"]["total"], 15.0);
        assert_eq!(invoice["data"]["remaining"], 5.0);
        assert_eq!(invoice["data"]["invoiceNo"], 1);
        assert_eq!(invoice["data"]["posted"], false);
        assert_eq!(product_quantity(&db, "p1"), 7.0);
    }

    #[test]
    fn insufficient_stock_rolls_back_everything() {
        let db = test_db();
        seed_product(&db, "p1", 1.0);

        let err = create_invoice_impl(
            &db,
            &serde_json::json!({
                "customerName": "Omar",
                "items": [{ "productId": "p1", "name": "Cable", "quantity": 5.0, "unitPrice": 5.0 }]
            }),
        )
        .expect_err("must fail");
        assert!(err.contains("Insufficient stock"));

        // Nothing written
        let conn = db.conn.lock().unwrap();
        let invoices: i64 = conn
            .query_row("SELECT COUNT(*) FROM sales_invoices", [], |row| row.get(0))
            .unwrap();
        assert_eq!(invoices, 0);
        drop(conn);
        assert_eq!(product_quantity(&db, "p1"), 1.0);
    }

    #[test]
    fn invoice_numbers_are_per_book() {
        let db = test_db();
        seed_product(&db, "p1", 100.0);
        let shop = create_invoice(&db);
        let warehouse = create_invoice_impl(
            &db,
            &serde_json::json!({
                "source": "warehouse",
                "items": [{ "name": "Bulk", "quantity": 1.0, "unitPrice": 1.0 }]
            }),
        )
        .expect("warehouse invoice");
        assert_eq!(shop["data"]["invoiceNo"], 1);
        assert_eq!(warehouse["data"]["invoiceNo"], 1);
    }

    #[test]
    fn item_edit_moves_stock_by_delta() {
        let db = test_db();
        seed_product(&db, "p1", 10.0);
        let invoice = create_invoice(&db);
        let id = invoice["data"]["id"].as_str().unwrap().to_string();
        let items = invoice["data"]["items"].as_array().unwrap().clone();
        let cable_id = items[0]["id"].as_str().unwrap();

        // 3 → 5 cables (delta +2), labor dropped
        let edited = vec![serde_json::json!({
            "id": cable_id, "productId": "p1", "name": "Cable", "quantity": 5.0, "unitPrice": 5.0
        })];
        let result = update_items_impl(&db, &id, &edited).expect("update items");

        assert_eq!(product_quantity(&db, "p1"), 5.0);
        assert_eq!(result["data"]["subtotal"], 25.0);
        assert_eq!(result["changes"]["deleted"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn posted_invoice_is_read_only() {
        let db = test_db();
        seed_product(&db, "p1", 10.0);
        let invoice = create_invoice(&db);
        let id = invoice["data"]["id"].as_str().unwrap().to_string();

        let posted = set_posted_impl(&db, &id, true, Some("accountant-user")).expect("post");
        assert_eq!(posted["data"]["posted"], true);
        assert_eq!(posted["data"]["postedBy"], "accountant-user");
        assert!(posted["data"]["postedAt"].is_string());

        assert!(update_invoice_impl(&db, &id, &serde_json::json!({ "notes": "x" })).is_err());
        assert!(update_items_impl(&db, &id, &[serde_json::json!({ "name": "X", "quantity": 1.0 })])
            .is_err());
        assert!(delete_invoice_impl(&db, &id).is_err());

        // Unposting reopens it
        let unposted = set_posted_impl(&db, &id, false, None).expect("unpost");
        assert_eq!(unposted["data"]["posted"], false);
        assert!(unposted["data"]["postedAt"].is_null());
        update_invoice_impl(&db, &id, &serde_json::json!({ "notes": "x" })).expect("editable again");
    }

    #[test]
    fn delete_restores_stock() {
        let db = test_db();
        seed_product(&db, "p1", 10.0);
        let invoice = create_invoice(&db);
        let id = invoice["data"]["id"].as_str().unwrap().to_string();
        assert_eq!(product_quantity(&db, "p1"), 7.0);

        delete_invoice_impl(&db, &id).expect("delete");
        assert_eq!(product_quantity(&db, "p1"), 10.0);

        let conn = db.conn.lock().unwrap();
        let items: i64 = conn
            .query_row("SELECT COUNT(*) FROM sales_invoice_items", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(items, 0, "items cascade with the invoice");
    }

    #[test]
    fn totals_summary_splits_by_settlement_sign() {
        let db = test_db();
        seed_product(&db, "p1", 100.0);
        let a = create_invoice(&db);
        create_invoice(&db);
        set_posted_impl(&db, a["data"]["id"].as_str().unwrap(), true, None).expect("post");

        let summary = totals_summary_impl(&db, &serde_json::json!({ "source": "shop" }))
            .expect("summary");
        assert_eq!(summary["count"], 2);
        assert_eq!(summary["postedCount"], 1);
        assert_eq!(summary["unpostedCount"], 1);
        assert_eq!(summary["total"], 30.0);
        assert_eq!(summary["paid"], 20.0);
    }

    #[test]
    fn list_filters_by_posted_flag() {
        let db = test_db();
        seed_product(&db, "p1", 100.0);
        let a = create_invoice(&db);
        create_invoice(&db);
        set_posted_impl(&db, a["data"]["id"].as_str().unwrap(), true, None).expect("post");

        let posted = list_invoices_impl(&db, &serde_json::json!({ "posted": true })).expect("list");
        assert_eq!(posted["total"], 1);
        let unposted =
            list_invoices_impl(&db, &serde_json::json!({ "posted": false })).expect("list");
        assert_eq!(unposted["total"], 1);
    }
}
