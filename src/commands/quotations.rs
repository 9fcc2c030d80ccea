//! Quotation commands.
//!
//! Totals are always recomputed server-side from the item rows; totals sent
//! by the UI are ignored. Item edits go through the diff engine so the sync
//! queue carries minimal operations.

use serde_json::Value;
use tauri::Emitter;

use crate::itemdiff;
use crate::query::{self, ListOptions};
use crate::{
    db, payload_arg0_as_string, print, sync, value_f64, value_i64, value_str, whatsapp,
};

const SEARCH_FIELDS: &[&str] = &["customerName", "customerPhone", "quoteNo", "notes"];

const QUOTATION_COLUMNS: &str = "id, quote_no, customer_id, customer_name, customer_phone,
                                 quote_date, validity_days, subtotal, discount, total, notes,
                                 status, version, sync_status, created_at, updated_at";

fn quotation_row_to_json(row: &rusqlite::Row<'_>) -> rusqlite::Result<Value> {
    Ok(serde_json::json!({
        "id": row.get::<_, String>(0)?,
        "quoteNo": row.get::<_, i64>(1)?,
        "customerId": row.get::<_, Option<String>>(2)?,
        "customerName": row.get::<_, String>(3)?,
        "customerPhone": row.get::<_, Option<String>>(4)?,
        "quoteDate": row.get::<_, String>(5)?,
        "validityDays": row.get::<_, i64>(6)?,
        "subtotal": row.get::<_, f64>(7)?,
        "discount": row.get::<_, f64>(8)?,
        "total": row.get::<_, f64>(9)?,
        "notes": row.get::<_, Option<String>>(10)?,
        "status": row.get::<_, String>(11)?,
        "version": row.get::<_, i64>(12)?,
        "syncStatus": row.get::<_, String>(13)?,
        "createdAt": row.get::<_, Option<String>>(14)?,
        "updatedAt": row.get::<_, Option<String>>(15)?,
    }))
}

pub(crate) fn load_items(
    conn: &rusqlite::Connection,
    quotation_id: &str,
) -> Result<Vec<Value>, String> {
    let mut stmt = conn
        .prepare(
            "SELECT id, product_id, name, quantity, unit_price, line_total, position
             FROM quotation_items WHERE quotation_id = ?1 ORDER BY position, id",
        )
        .map_err(|e| e.to_string())?;
    let rows = stmt
        .query_map(rusqlite::params![quotation_id], |row| {
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

fn get_quotation_json(conn: &rusqlite::Connection, quotation_id: &str) -> Result<Value, String> {
    let mut quotation = conn
        .query_row(
            &format!("SELECT {QUOTATION_COLUMNS} FROM quotations WHERE id = ?1"),
            rusqlite::params![quotation_id],
            |row| quotation_row_to_json(row),
        )
        .map_err(|_| format!("Quotation not found: {quotation_id}"))?;
    quotation["items"] = Value::Array(load_items(conn, quotation_id)?);
    Ok(quotation)
}

/// Validate one incoming item row and normalize it to (product_id, name,
/// quantity, unit_price, line_total).
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
    let line_total = quantity * unit_price;
    Ok((
        value_str(item, &["productId", "product_id"]),
        name,
        quantity,
        unit_price,
        line_total,
    ))
}

/// Recompute header totals from the item rows. Discount is clamped against
/// the subtotal rule, not silently adjusted.
fn recompute_totals(
    conn: &rusqlite::Connection,
    quotation_id: &str,
    discount: Option<f64>,
) -> Result<(), String> {
    let subtotal: f64 = conn
        .query_row(
            "SELECT COALESCE(SUM(line_total), 0) FROM quotation_items WHERE quotation_id = ?1",
            rusqlite::params![quotation_id],
            |row| row.get(0),
        )
        .map_err(|e| e.to_string())?;

    let discount = match discount {
        Some(d) => d,
        None => conn
            .query_row(
                "SELECT discount FROM quotations WHERE id = ?1",
                rusqlite::params![quotation_id],
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

    conn.execute(
        "UPDATE quotations
         SET subtotal = ?2, discount = ?3, total = ?2 - ?3,
             version = version + 1, sync_status = 'pending', updated_at = datetime('now')
         WHERE id = ?1",
        rusqlite::params![quotation_id, subtotal, discount],
    )
    .map_err(|e| e.to_string())?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Implementations
// ---------------------------------------------------------------------------

pub(crate) fn list_quotations_impl(db: &db::DbState, payload: &Value) -> Result<Value, String> {
    let status = value_str(payload, &["status"]);

    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {QUOTATION_COLUMNS} FROM quotations
             WHERE (?1 IS NULL OR status = ?1)
             ORDER BY quote_date DESC, quote_no DESC"
        ))
        .map_err(|e| e.to_string())?;
    let rows = stmt
        .query_map(rusqlite::params![status], |row| quotation_row_to_json(row))
        .map_err(|e| e.to_string())?;
    let quotations: Vec<Value> = rows.filter_map(|r| r.ok()).collect();
    drop(stmt);
    drop(conn);

    let opts = ListOptions::from_payload(payload);
    Ok(query::apply(quotations, &opts, SEARCH_FIELDS))
}

pub(crate) fn create_quotation_impl(db: &db::DbState, payload: &Value) -> Result<Value, String> {
    let customer_name = value_str(payload, &["customerName", "customer_name"])
        .ok_or("Customer name is required")?;
    let items = payload
        .get("items")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let discount = value_f64(payload, &["discount"]).unwrap_or(0.0);

    let mut conn = db.conn.lock().map_err(|e| e.to_string())?;
    let tx = conn.transaction().map_err(|e| e.to_string())?;

    let quote_no = db::next_counter(&tx, "quote_no")?;
    let id = format!("quo-{}", uuid::Uuid::new_v4());
    let quote_date =
        value_str(payload, &["quoteDate", "quote_date"]).unwrap_or_else(crate::data_helpers::today);

    tx.execute(
        "INSERT INTO quotations (id, quote_no, customer_id, customer_name, customer_phone,
                                 quote_date, validity_days, notes)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        rusqlite::params![
            id,
            quote_no,
            value_str(payload, &["customerId", "customer_id"]),
            customer_name,
            value_str(payload, &["customerPhone", "customer_phone", "phone"]),
            quote_date,
            value_i64(payload, &["validityDays", "validity_days"]).unwrap_or(15),
            value_str(payload, &["notes"]),
        ],
    )
    .map_err(|e| format!("create quotation: {e}"))?;

    for (position, item) in items.iter().enumerate() {
        let (product_id, name, quantity, unit_price, line_total) = parse_item(item)?;
        tx.execute(
            "INSERT INTO quotation_items (id, quotation_id, product_id, name, quantity,
                                          unit_price, line_total, position)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                format!("qi-{}", uuid::Uuid::new_v4()),
                id,
                product_id,
                name,
                quantity,
                unit_price,
                line_total,
                position as i64,
            ],
        )
        .map_err(|e| format!("create quotation item: {e}"))?;
    }

    recompute_totals(&tx, &id, Some(discount))?;
    tx.commit().map_err(|e| e.to_string())?;

    let quotation = get_quotation_json(&conn, &id)?;
    sync::enqueue(&conn, "quotation", &id, "insert", &quotation)?;
    Ok(serde_json::json!({ "success": true, "data": quotation }))
}

pub(crate) fn update_quotation_impl(
    db: &db::DbState,
    quotation_id: &str,
    updates: &Value,
) -> Result<Value, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    get_quotation_json(&conn, quotation_id)?;

    for (key, column) in [
        ("customerName", "customer_name"),
        ("customerPhone", "customer_phone"),
        ("quoteDate", "quote_date"),
        ("notes", "notes"),
    ] {
        if let Some(text) = value_str(updates, &[key]) {
            conn.execute(
                &format!("UPDATE quotations SET {column} = ?2 WHERE id = ?1"),
                rusqlite::params![quotation_id, text],
            )
            .map_err(|e| e.to_string())?;
        }
    }
    if let Some(validity) = value_i64(updates, &["validityDays", "validity_days"]) {
        if validity <= 0 {
            return Err("Validity must be positive".into());
        }
        conn.execute(
            "UPDATE quotations SET validity_days = ?2 WHERE id = ?1",
            rusqlite::params![quotation_id, validity],
        )
        .map_err(|e| e.to_string())?;
    }

    let discount = value_f64(updates, &["discount"]);
    recompute_totals(&conn, quotation_id, discount)?;

    let quotation = get_quotation_json(&conn, quotation_id)?;
    sync::enqueue(&conn, "quotation", quotation_id, "update", &quotation)?;
    Ok(serde_json::json!({ "success": true, "data": quotation }))
}

/// Apply an item-list edit through the diff engine.
pub(crate) fn update_items_impl(
    db: &db::DbState,
    quotation_id: &str,
    edited: &[Value],
) -> Result<Value, String> {
    let mut conn = db.conn.lock().map_err(|e| e.to_string())?;
    let original = load_items(&conn, quotation_id)?;
    let diff = itemdiff::diff_items(&original, edited);
    if diff.is_empty() {
        return Ok(serde_json::json!({
            "success": true,
            "data": get_quotation_json(&conn, quotation_id)?,
            "changes": diff.to_json(),
        }));
    }

    let tx = conn.transaction().map_err(|e| e.to_string())?;

    for id in &diff.deleted {
        tx.execute(
            "DELETE FROM quotation_items WHERE id = ?1 AND quotation_id = ?2",
            rusqlite::params![id, quotation_id],
        )
        .map_err(|e| e.to_string())?;
    }
    for item in &diff.updated {
        let (product_id, name, quantity, unit_price, line_total) = parse_item(item)?;
        let item_id = item.get("id").and_then(Value::as_str).unwrap_or_default();
        tx.execute(
            "UPDATE quotation_items
             SET product_id = ?3, name = ?4, quantity = ?5, unit_price = ?6, line_total = ?7
             WHERE id = ?1 AND quotation_id = ?2",
            rusqlite::params![
                item_id,
                quotation_id,
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
            "SELECT COALESCE(MAX(position), -1) + 1 FROM quotation_items WHERE quotation_id = ?1",
            rusqlite::params![quotation_id],
            |row| row.get(0),
        )
        .unwrap_or(0);
    for (offset, item) in diff.added.iter().enumerate() {
        let (product_id, name, quantity, unit_price, line_total) = parse_item(item)?;
        tx.execute(
            "INSERT INTO quotation_items (id, quotation_id, product_id, name, quantity,
                                          unit_price, line_total, position)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                format!("qi-{}", uuid::Uuid::new_v4()),
                quotation_id,
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

    recompute_totals(&tx, quotation_id, None)?;
    tx.commit().map_err(|e| e.to_string())?;

    let quotation = get_quotation_json(&conn, quotation_id)?;
    sync::enqueue(
        &conn,
        "quotation",
        quotation_id,
        "update",
        &serde_json::json!({ "quotation": quotation, "itemChanges": diff.to_json() }),
    )?;
    Ok(serde_json::json!({
        "success": true,
        "data": quotation,
        "changes": diff.to_json(),
    }))
}

pub(crate) fn set_status_impl(
    db: &db::DbState,
    quotation_id: &str,
    status: &str,
) -> Result<Value, String> {
    if !matches!(status, "draft" | "sent" | "accepted" | "expired") {
        return Err(format!("Unknown quotation status: {status}"));
    }
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let changed = conn
        .execute(
            "UPDATE quotations
             SET status = ?2, version = version + 1, sync_status = 'pending',
                 updated_at = datetime('now')
             WHERE id = ?1",
            rusqlite::params![quotation_id, status],
        )
        .map_err(|e| e.to_string())?;
    if changed == 0 {
        return Err(format!("Quotation not found: {quotation_id}"));
    }
    let quotation = get_quotation_json(&conn, quotation_id)?;
    sync::enqueue(&conn, "quotation", quotation_id, "update", &quotation)?;
    Ok(serde_json::json!({ "success": true, "data": quotation }))
}

pub(crate) fn delete_quotation_impl(db: &db::DbState, quotation_id: &str) -> Result<Value, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let removed = conn
        .execute(
            "DELETE FROM quotations WHERE id = ?1",
            rusqlite::params![quotation_id],
        )
        .map_err(|e| e.to_string())?;
    if removed == 0 {
        return Err(format!("Quotation not found: {quotation_id}"));
    }
    sync::enqueue(
        &conn,
        "quotation",
        quotation_id,
        "delete",
        &serde_json::json!({ "id": quotation_id }),
    )?;
    Ok(serde_json::json!({ "success": true }))
}

pub(crate) fn whatsapp_link_impl(db: &db::DbState, quotation_id: &str) -> Result<Value, String> {
    let quotation = {
        let conn = db.conn.lock().map_err(|e| e.to_string())?;
        get_quotation_json(&conn, quotation_id)?
    };
    let phone = quotation
        .get("customerPhone")
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .ok_or("Quotation has no customer phone")?;
    let message = whatsapp::quotation_message(&quotation);
    let link = whatsapp::build_link(phone, &message)?;
    Ok(serde_json::json!({ "link": link, "message": message }))
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

#[tauri::command]
pub async fn quotation_list(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    list_quotations_impl(&db, &arg0.unwrap_or_else(|| serde_json::json!({})))
}

#[tauri::command]
pub async fn quotation_get(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    let quotation_id = payload_arg0_as_string(arg0, &["quotationId", "quotation_id", "id"])
        .ok_or("Missing quotationId")?;
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    get_quotation_json(&conn, &quotation_id)
}

#[tauri::command]
pub async fn quotation_create(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
    app: tauri::AppHandle,
) -> Result<Value, String> {
    let result = create_quotation_impl(&db, &arg0.unwrap_or_else(|| serde_json::json!({})))?;
    if let Some(quotation) = result.get("data") {
        let _ = app.emit("quotation_created", quotation.clone());
    }
    Ok(result)
}

#[tauri::command]
pub async fn quotation_update(
    arg0: Option<Value>,
    arg1: Option<Value>,
    db: tauri::State<'_, db::DbState>,
    app: tauri::AppHandle,
) -> Result<Value, String> {
    let base = arg0.unwrap_or_else(|| serde_json::json!({}));
    let quotation_id =
        payload_arg0_as_string(Some(base.clone()), &["quotationId", "quotation_id", "id"])
            .ok_or("Missing quotationId")?;
    let updates = arg1
        .or_else(|| base.get("updates").cloned())
        .unwrap_or_else(|| serde_json::json!({}));
    let result = update_quotation_impl(&db, &quotation_id, &updates)?;
    if let Some(quotation) = result.get("data") {
        let _ = app.emit("quotation_updated", quotation.clone());
    }
    Ok(result)
}

#[tauri::command]
pub async fn quotation_update_items(
    arg0: Option<Value>,
    arg1: Option<Value>,
    db: tauri::State<'_, db::DbState>,
    app: tauri::AppHandle,
) -> Result<Value, String> {
    let base = arg0.unwrap_or_else(|| serde_json::json!({}));
    let quotation_id =
        payload_arg0_as_string(Some(base.clone()), &["quotationId", "quotation_id", "id"])
            .ok_or("Missing quotationId")?;
    let items = arg1
        .and_then(|v| v.as_array().cloned())
        .or_else(|| base.get("items").and_then(Value::as_array).cloned())
        .ok_or("Missing items")?;
    let result = update_items_impl(&db, &quotation_id, &items)?;
    if let Some(quotation) = result.get("data") {
        let _ = app.emit("quotation_updated", quotation.clone());
    }
    Ok(result)
}

#[tauri::command]
pub async fn quotation_set_status(
    arg0: Option<Value>,
    arg1: Option<Value>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    let base = arg0.unwrap_or_else(|| serde_json::json!({}));
    let quotation_id =
        payload_arg0_as_string(Some(base.clone()), &["quotationId", "quotation_id", "id"])
            .ok_or("Missing quotationId")?;
    let status = arg1
        .as_ref()
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| value_str(&base, &["status"]))
        .ok_or("Missing status")?;
    set_status_impl(&db, &quotation_id, &status)
}

#[tauri::command]
pub async fn quotation_delete(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
    app: tauri::AppHandle,
) -> Result<Value, String> {
    let quotation_id = payload_arg0_as_string(arg0, &["quotationId", "quotation_id", "id"])
        .ok_or("Missing quotationId")?;
    let result = delete_quotation_impl(&db, &quotation_id)?;
    let _ = app.emit("quotation_deleted", serde_json::json!({ "id": quotation_id }));
    Ok(result)
}

#[tauri::command]
pub async fn quotation_print(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    let quotation_id = payload_arg0_as_string(arg0, &["quotationId", "quotation_id", "id"])
        .ok_or("Missing quotationId")?;
    print::enqueue_print_job(&db, "quotation", &quotation_id, None)
}

#[tauri::command]
pub async fn quotation_whatsapp_link(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    let quotation_id = payload_arg0_as_string(arg0, &["quotationId", "quotation_id", "id"])
        .ok_or("Missing quotationId")?;
    whatsapp_link_impl(&db, &quotation_id)
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

    fn create(db: &db::DbState) -> Value {
        create_quotation_impl(
            db,
            &serde_json::json!({
                "customerName": "Acme",
                "customerPhone": "0791234567",
                "items": [
                    { "name": "Cable", "quantity": 2.0, "unitPrice": 5.0 },
                    { "name": "Charger", "quantity": 1.0, "unitPrice": 12.0 }
                ],
                "discount": 2.0
            }),
        )
        .expect("create quotation")
    }

    #[test]
    fn totals_are_recomputed_from_items() {
        let db = test_db();
        let quotation = create(&db);
        assert_eq!(quotation["data"]["subtotal"], 22.0);
        assert_eq!(quotation["data"]["discount"], 2.0);
        assert_eq!(quotation["data"]["total"], 20.0);
        assert_eq!(quotation["data"]["quoteNo"], 1);
        assert_eq!(quotation["data"]["items"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn discount_cannot_exceed_subtotal() {
        let db = test_db();
        let err = create_quotation_impl(
            &db,
            &serde_json::json!({
                "customerName": "Acme",
                "items": [{ "name": "Cable", "quantity": 1.0, "unitPrice": 5.0 }],
                "discount": 10.0
            }),
        )
        .expect_err("must fail");
        assert!(err.contains("exceed"));
    }

    #[test]
    fn item_edit_applies_diff_and_recomputes() {
        let db = test_db();
        let quotation = create(&db);
        let id = quotation["data"]["id"].as_str().unwrap().to_string();
        let items = quotation["data"]["items"].as_array().unwrap();
        let cable_id = items[0]["id"].as_str().unwrap();

        let edited = vec![
            // Cable quantity 2 -> 4
            serde_json::json!({ "id": cable_id, "name": "Cable", "quantity": 4.0, "unitPrice": 5.0 }),
            // Charger removed, new line added
            serde_json::json!({ "name": "Adapter", "quantity": 1.0, "unitPrice": 3.0 }),
        ];
        let result = update_items_impl(&db, &id, &edited).expect("update items");

        assert_eq!(result["changes"]["added"].as_array().unwrap().len(), 1);
        assert_eq!(result["changes"]["updated"].as_array().unwrap().len(), 1);
        assert_eq!(result["changes"]["deleted"].as_array().unwrap().len(), 1);

        // subtotal = 4*5 + 3 = 23; discount 2 kept
        assert_eq!(result["data"]["subtotal"], 23.0);
        assert_eq!(result["data"]["total"], 21.0);
        assert_eq!(result["data"]["items"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn status_validation() {
        let db = test_db();
        let quotation = create(&db);
        let id = quotation["data"]["id"].as_str().unwrap().to_string();

        let sent = set_status_impl(&db, &id, "sent").expect("set status");
        assert_eq!(sent["data"]["status"], "sent");
        assert!(set_status_impl(&db, &id, "archived").is_err());
    }

    #[test]
    fn delete_cascades_items() {
        let db = test_db();
        let quotation = create(&db);
        let id = quotation["data"]["id"].as_str().unwrap().to_string();

        delete_quotation_impl(&db, &id).expect("delete");
        let conn = db.conn.lock().unwrap();
        let items: i64 = conn
            .query_row("SELECT COUNT(*) FROM quotation_items", [], |row| row.get(0))
            .unwrap();
        assert_eq!(items, 0);
    }

    #[test]
    fn whatsapp_share_includes_total() {
        let db = test_db();
        let quotation = create(&db);
        let id = quotation["data"]["id"].as_str().unwrap().to_string();
        let link = whatsapp_link_impl(&db, &id).expect("link");
        assert!(link["message"].as_str().unwrap().contains("20.00"));
    }
}
