//! Customer book commands.
//!
//! Customers are shared by maintenance, quotations, invoices, and legal
//! cases. Lookups by phone run against the digits-only `phone_norm` column.

use serde_json::Value;
use tauri::Emitter;

use crate::query::{self, ListOptions};
use crate::{db, normalize_phone, payload_arg0_as_string, sync, value_i64, value_str};

const SEARCH_FIELDS: &[&str] = &["name", "phone", "address", "note"];

const CUSTOMER_COLUMNS: &str =
    "id, name, phone, phone_norm, address, note, version, sync_status, created_at, updated_at";

fn customer_row_to_json(row: &rusqlite::Row<'_>) -> rusqlite::Result<Value> {
    Ok(serde_json::json!({
        "id": row.get::<_, String>(0)?,
        "name": row.get::<_, String>(1)?,
        "phone": row.get::<_, Option<String>>(2)?,
        "phoneNorm": row.get::<_, Option<String>>(3)?,
        "address": row.get::<_, Option<String>>(4)?,
        "note": row.get::<_, Option<String>>(5)?,
        "version": row.get::<_, i64>(6)?,
        "syncStatus": row.get::<_, String>(7)?,
        "createdAt": row.get::<_, Option<String>>(8)?,
        "updatedAt": row.get::<_, Option<String>>(9)?,
    }))
}

fn get_customer_json(conn: &rusqlite::Connection, customer_id: &str) -> Result<Value, String> {
    conn.query_row(
        &format!("SELECT {CUSTOMER_COLUMNS} FROM customers WHERE id = ?1"),
        rusqlite::params![customer_id],
        |row| customer_row_to_json(row),
    )
    .map_err(|_| format!("Customer not found: {customer_id}"))
}

// ---------------------------------------------------------------------------
// Implementations
// ---------------------------------------------------------------------------

pub(crate) fn list_customers_impl(db: &db::DbState, payload: &Value) -> Result<Value, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {CUSTOMER_COLUMNS} FROM customers ORDER BY name"
        ))
        .map_err(|e| e.to_string())?;
    let rows = stmt
        .query_map([], |row| customer_row_to_json(row))
        .map_err(|e| e.to_string())?;
    let customers: Vec<Value> = rows.filter_map(|r| r.ok()).collect();
    drop(stmt);
    drop(conn);

    let opts = ListOptions::from_payload(payload);
    Ok(query::apply(customers, &opts, SEARCH_FIELDS))
}

pub(crate) fn lookup_by_phone_impl(db: &db::DbState, phone: &str) -> Result<Value, String> {
    let phone_norm = normalize_phone(phone);
    if phone_norm.is_empty() {
        return Err("Missing phone".into());
    }
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let found = conn
        .query_row(
            &format!(
                "SELECT {CUSTOMER_COLUMNS} FROM customers
                 WHERE phone_norm = ?1
                 ORDER BY updated_at DESC LIMIT 1"
            ),
            rusqlite::params![phone_norm],
            |row| customer_row_to_json(row),
        )
        .ok();
    Ok(found.unwrap_or(Value::Null))
}

pub(crate) fn create_customer_impl(db: &db::DbState, payload: &Value) -> Result<Value, String> {
    let name = value_str(payload, &["name"]).ok_or("Customer name is required")?;
    let phone = value_str(payload, &["phone", "customerPhone", "mobile"]);
    let phone_norm = phone.as_deref().map(normalize_phone);

    let id =
        value_str(payload, &["id"]).unwrap_or_else(|| format!("cust-{}", uuid::Uuid::new_v4()));
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    conn.execute(
        "INSERT INTO customers (id, name, phone, phone_norm, address, note)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![
            id,
            name,
            phone,
            phone_norm,
            value_str(payload, &["address"]),
            value_str(payload, &["note", "notes"]),
        ],
    )
    .map_err(|e| format!("create customer: {e}"))?;

    let customer = get_customer_json(&conn, &id)?;
    sync::enqueue(&conn, "customer", &id, "insert", &customer)?;
    Ok(serde_json::json!({ "success": true, "data": customer }))
}

pub(crate) fn update_customer_impl(
    db: &db::DbState,
    customer_id: &str,
    updates: &Value,
    expected_version: i64,
) -> Result<Value, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let current_version: i64 = conn
        .query_row(
            "SELECT version FROM customers WHERE id = ?1",
            rusqlite::params![customer_id],
            |row| row.get(0),
        )
        .map_err(|_| format!("Customer not found: {customer_id}"))?;

    if expected_version > 0 && expected_version != current_version {
        return Ok(serde_json::json!({
            "success": false,
            "conflict": true,
            "error": "Version conflict",
            "currentVersion": current_version,
        }));
    }

    if let Some(name) = value_str(updates, &["name"]) {
        conn.execute(
            "UPDATE customers SET name = ?2 WHERE id = ?1",
            rusqlite::params![customer_id, name],
        )
        .map_err(|e| e.to_string())?;
    }
    if let Some(phone) = value_str(updates, &["phone", "customerPhone", "mobile"]) {
        conn.execute(
            "UPDATE customers SET phone = ?2, phone_norm = ?3 WHERE id = ?1",
            rusqlite::params![customer_id, phone, normalize_phone(&phone)],
        )
        .map_err(|e| e.to_string())?;
    }
    if let Some(address) = value_str(updates, &["address"]) {
        conn.execute(
            "UPDATE customers SET address = ?2 WHERE id = ?1",
            rusqlite::params![customer_id, address],
        )
        .map_err(|e| e.to_string())?;
    }
    if let Some(note) = value_str(updates, &["note", "notes"]) {
        conn.execute(
            "UPDATE customers SET note = ?2 WHERE id = ?1",
            rusqlite::params![customer_id, note],
        )
        .map_err(|e| e.to_string())?;
    }

    conn.execute(
        "UPDATE customers
         SET version = version + 1, sync_status = 'pending', updated_at = datetime('now')
         WHERE id = ?1",
        rusqlite::params![customer_id],
    )
    .map_err(|e| e.to_string())?;

    let customer = get_customer_json(&conn, customer_id)?;
    sync::enqueue(&conn, "customer", customer_id, "update", &customer)?;
    Ok(serde_json::json!({ "success": true, "data": customer }))
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

#[tauri::command]
pub async fn customer_list(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    list_customers_impl(&db, &arg0.unwrap_or_else(|| serde_json::json!({})))
}

#[tauri::command]
pub async fn customer_lookup_by_phone(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    let phone = payload_arg0_as_string(arg0, &["phone", "customerPhone", "mobile", "telephone"])
        .ok_or("Missing phone")?;
    lookup_by_phone_impl(&db, &phone)
}

#[tauri::command]
pub async fn customer_lookup_by_id(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    let customer_id = payload_arg0_as_string(arg0, &["customerId", "customer_id", "id"])
        .ok_or("Missing customerId")?;
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    Ok(get_customer_json(&conn, &customer_id).unwrap_or(Value::Null))
}

#[tauri::command]
pub async fn customer_search(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    let query = payload_arg0_as_string(arg0, &["query", "q", "search"]).unwrap_or_default();
    if query.is_empty() {
        return Ok(serde_json::json!([]));
    }
    let result = list_customers_impl(&db, &serde_json::json!({ "search": query, "perPage": 50 }))?;
    Ok(result.get("items").cloned().unwrap_or(serde_json::json!([])))
}

#[tauri::command]
pub async fn customer_create(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
    app: tauri::AppHandle,
) -> Result<Value, String> {
    let result = create_customer_impl(&db, &arg0.unwrap_or_else(|| serde_json::json!({})))?;
    if let Some(customer) = result.get("data") {
        let _ = app.emit("customer_created", customer.clone());
    }
    Ok(result)
}

#[tauri::command]
pub async fn customer_update(
    arg0: Option<Value>,
    arg1: Option<Value>,
    arg2: Option<Value>,
    db: tauri::State<'_, db::DbState>,
    app: tauri::AppHandle,
) -> Result<Value, String> {
    let base = arg0.unwrap_or_else(|| serde_json::json!({}));
    let customer_id = payload_arg0_as_string(Some(base.clone()), &["customerId", "customer_id", "id"])
        .ok_or("Missing customerId")?;
    let updates = arg1
        .or_else(|| base.get("updates").cloned())
        .unwrap_or_else(|| serde_json::json!({}));
    let expected_version = match arg2 {
        Some(Value::Number(n)) => n.as_i64().unwrap_or(0),
        Some(Value::String(s)) => s.parse::<i64>().unwrap_or(0),
        _ => value_i64(&base, &["expectedVersion", "expected_version", "version"]).unwrap_or(0),
    };

    let result = update_customer_impl(&db, &customer_id, &updates, expected_version)?;
    if result.get("success").and_then(Value::as_bool) == Some(true) {
        if let Some(customer) = result.get("data") {
            let _ = app.emit("customer_updated", customer.clone());
        }
    }
    Ok(result)
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

    #[test]
    fn phone_lookup_uses_normalized_digits() {
        let db = test_db();
        create_customer_impl(
            &db,
            &serde_json::json!({ "name": "Omar", "phone": "+962 79 123-4567" }),
        )
        .expect("create");

        let hit = lookup_by_phone_impl(&db, "0962791234567").expect("lookup");
        // Different formatting, same digits after normalization fails (leading 0
        // differs), so exact-norm match applies:
        assert!(hit.is_null());

        let hit = lookup_by_phone_impl(&db, "962-79-1234567").expect("lookup");
        assert_eq!(hit["name"], "Omar");
    }

    #[test]
    fn update_bumps_version_and_requeues_sync() {
        let db = test_db();
        let created = create_customer_impl(&db, &serde_json::json!({ "name": "Omar" }))
            .expect("create");
        let id = created["data"]["id"].as_str().unwrap().to_string();

        let updated = update_customer_impl(
            &db,
            &id,
            &serde_json::json!({ "phone": "0791112222" }),
            1,
        )
        .expect("update");
        assert_eq!(updated["data"]["version"], 2);
        assert_eq!(updated["data"]["phoneNorm"], "0791112222");

        let stale =
            update_customer_impl(&db, &id, &serde_json::json!({ "name": "X" }), 1).expect("update");
        assert_eq!(stale["conflict"], true);

        let conn = db.conn.lock().unwrap();
        let ops: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sync_queue WHERE entity_type = 'customer'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(ops, 2); // insert + one successful update
    }

    #[test]
    fn list_paginates_and_searches() {
        let db = test_db();
        for name in ["Omar", "Osama", "Huda"] {
            create_customer_impl(&db, &serde_json::json!({ "name": name })).expect("create");
        }
        let page = list_customers_impl(
            &db,
            &serde_json::json!({ "search": "o", "perPage": 1, "page": 2, "sortBy": "name" }),
        )
        .expect("list");
        assert_eq!(page["total"], 2);
        assert_eq!(page["pageCount"], 2);
        assert_eq!(page["items"][0]["name"], "Osama");
    }
}
