//! Product catalog commands.

use chrono::Utc;
use serde_json::Value;
use tauri::Emitter;

use crate::query::{self, ListOptions};
use crate::{db, payload_arg0_as_string, scanner, sync, value_f64, value_str};

/// Fields the list search runs over.
const SEARCH_FIELDS: &[&str] = &["name", "barcode", "shamelNo", "category", "origin", "notes"];

const PRODUCT_COLUMNS: &str = "id, name, barcode, shamel_no, category, unit, purchase_price,
                               sale_price, wholesale_price, quantity, origin, notes, image_url,
                               is_active, version, sync_status, created_at, updated_at";

fn product_row_to_json(row: &rusqlite::Row<'_>) -> rusqlite::Result<Value> {
    Ok(serde_json::json!({
        "id": row.get::<_, String>(0)?,
        "name": row.get::<_, String>(1)?,
        "barcode": row.get::<_, Option<String>>(2)?,
        "shamelNo": row.get::<_, Option<String>>(3)?,
        "category": row.get::<_, Option<String>>(4)?,
        "unit": row.get::<_, Option<String>>(5)?,
        "purchasePrice": row.get::<_, f64>(6)?,
        "salePrice": row.get::<_, f64>(7)?,
        "wholesalePrice": row.get::<_, f64>(8)?,
        "quantity": row.get::<_, f64>(9)?,
        "origin": row.get::<_, Option<String>>(10)?,
        "notes": row.get::<_, Option<String>>(11)?,
        "imageUrl": row.get::<_, Option<String>>(12)?,
        "isActive": row.get::<_, i64>(13)? == 1,
        "version": row.get::<_, i64>(14)?,
        "syncStatus": row.get::<_, String>(15)?,
        "createdAt": row.get::<_, Option<String>>(16)?,
        "updatedAt": row.get::<_, Option<String>>(17)?,
    }))
}

fn load_products(
    conn: &rusqlite::Connection,
    include_inactive: bool,
) -> Result<Vec<Value>, String> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE (?1 OR is_active = 1) ORDER BY name"
        ))
        .map_err(|e| e.to_string())?;
    let rows = stmt
        .query_map(rusqlite::params![include_inactive], |row| {
            product_row_to_json(row)
        })
        .map_err(|e| e.to_string())?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

fn get_product_json(conn: &rusqlite::Connection, product_id: &str) -> Result<Value, String> {
    conn.query_row(
        &format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = ?1"),
        rusqlite::params![product_id],
        |row| product_row_to_json(row),
    )
    .map_err(|_| format!("Product not found: {product_id}"))
}

fn code_conflict(
    conn: &rusqlite::Connection,
    column: &str,
    code: &str,
    exclude_id: Option<&str>,
) -> bool {
    conn.query_row(
        &format!(
            "SELECT EXISTS(
                 SELECT 1 FROM products
                 WHERE {column} = ?1 AND is_active = 1 AND (?2 IS NULL OR id != ?2)
             )"
        ),
        rusqlite::params![code, exclude_id],
        |row| row.get::<_, bool>(0),
    )
    .unwrap_or(false)
}

fn validate_product_numbers(payload: &Value) -> Result<(), String> {
    for (key, label) in [
        ("purchasePrice", "Purchase price"),
        ("salePrice", "Sale price"),
        ("wholesalePrice", "Wholesale price"),
        ("quantity", "Quantity"),
    ] {
        if let Some(v) = value_f64(payload, &[key]) {
            if v < 0.0 {
                return Err(format!("{label} cannot be negative"));
            }
            if !v.is_finite() {
                return Err(format!("{label} must be a number"));
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Implementations
// ---------------------------------------------------------------------------

pub(crate) fn list_products_impl(db: &db::DbState, payload: &Value) -> Result<Value, String> {
    let include_inactive = payload
        .get("includeInactive")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let category = value_str(payload, &["category"]);

    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let mut products = load_products(&conn, include_inactive)?;
    drop(conn);

    if let Some(category) = category {
        products.retain(|p| {
            p.get("category")
                .and_then(Value::as_str)
                .map(|c| c.eq_ignore_ascii_case(&category))
                .unwrap_or(false)
        });
    }

    let opts = ListOptions::from_payload(payload);
    Ok(query::apply(products, &opts, SEARCH_FIELDS))
}

pub(crate) fn create_product_impl(db: &db::DbState, payload: &Value) -> Result<Value, String> {
    let name = value_str(payload, &["name"]).ok_or("Product name is required")?;
    validate_product_numbers(payload)?;

    let barcode = value_str(payload, &["barcode"]);
    let shamel_no = value_str(payload, &["shamelNo", "shamel_no"]);

    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    if let Some(ref code) = barcode {
        if code_conflict(&conn, "barcode", code, None) {
            return Err(format!("Barcode already in use: {code}"));
        }
    }
    if let Some(ref code) = shamel_no {
        if code_conflict(&conn, "shamel_no", code, None) {
            return Err(format!("Shamel No already in use: {code}"));
        }
    }

    let id = value_str(payload, &["id"]).unwrap_or_else(|| format!("prod-{}", uuid::Uuid::new_v4()));
    conn.execute(
        "INSERT INTO products (id, name, barcode, shamel_no, category, unit, purchase_price,
                               sale_price, wholesale_price, quantity, origin, notes, image_url)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        rusqlite::params![
            id,
            name,
            barcode,
            shamel_no,
            value_str(payload, &["category"]),
            value_str(payload, &["unit"]).unwrap_or_else(|| "pcs".into()),
            value_f64(payload, &["purchasePrice", "purchase_price"]).unwrap_or(0.0),
            value_f64(payload, &["salePrice", "sale_price"]).unwrap_or(0.0),
            value_f64(payload, &["wholesalePrice", "wholesale_price"]).unwrap_or(0.0),
            value_f64(payload, &["quantity"]).unwrap_or(0.0),
            value_str(payload, &["origin"]),
            value_str(payload, &["notes"]),
            value_str(payload, &["imageUrl", "image_url"]),
        ],
    )
    .map_err(|e| format!("create product: {e}"))?;

    let product = get_product_json(&conn, &id)?;
    sync::enqueue(&conn, "product", &id, "insert", &product)?;
    Ok(serde_json::json!({ "success": true, "data": product }))
}

/// Columns a product update may touch, keyed by payload name.
const UPDATABLE_FIELDS: &[(&str, &str)] = &[
    ("name", "name"),
    ("barcode", "barcode"),
    ("shamelNo", "shamel_no"),
    ("category", "category"),
    ("unit", "unit"),
    ("purchasePrice", "purchase_price"),
    ("salePrice", "sale_price"),
    ("wholesalePrice", "wholesale_price"),
    ("quantity", "quantity"),
    ("origin", "origin"),
    ("notes", "notes"),
    ("imageUrl", "image_url"),
];

pub(crate) fn update_product_impl(
    db: &db::DbState,
    product_id: &str,
    updates: &Value,
    expected_version: i64,
) -> Result<Value, String> {
    validate_product_numbers(updates)?;

    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let current_version: i64 = conn
        .query_row(
            "SELECT version FROM products WHERE id = ?1",
            rusqlite::params![product_id],
            |row| row.get(0),
        )
        .map_err(|_| format!("Product not found: {product_id}"))?;

    if expected_version > 0 && expected_version != current_version {
        return Ok(serde_json::json!({
            "success": false,
            "conflict": true,
            "error": "Version conflict",
            "currentVersion": current_version,
        }));
    }

    if let Some(code) = value_str(updates, &["barcode"]) {
        if code_conflict(&conn, "barcode", &code, Some(product_id)) {
            return Err(format!("Barcode already in use: {code}"));
        }
    }
    if let Some(code) = value_str(updates, &["shamelNo", "shamel_no"]) {
        if code_conflict(&conn, "shamel_no", &code, Some(product_id)) {
            return Err(format!("Shamel No already in use: {code}"));
        }
    }

    for (payload_key, column) in UPDATABLE_FIELDS {
        let Some(value) = updates.get(*payload_key).or_else(|| {
            // snake_case fallbacks arrive from older UI builds
            let snake = payload_key
                .chars()
                .flat_map(|c| {
                    if c.is_ascii_uppercase() {
                        vec!['_', c.to_ascii_lowercase()]
                    } else {
                        vec![c]
                    }
                })
                .collect::<String>();
            updates.get(snake)
        }) else {
            continue;
        };

        let sql = format!("UPDATE products SET {column} = ?2 WHERE id = ?1");
        match value {
            Value::String(s) => conn
                .execute(&sql, rusqlite::params![product_id, s])
                .map_err(|e| e.to_string())?,
            Value::Number(n) => conn
                .execute(&sql, rusqlite::params![product_id, n.as_f64()])
                .map_err(|e| e.to_string())?,
            Value::Null => conn
                .execute(&sql, rusqlite::params![product_id, None::<String>])
                .map_err(|e| e.to_string())?,
            _ => continue,
        };
    }

    conn.execute(
        "UPDATE products
         SET version = version + 1, sync_status = 'pending', updated_at = datetime('now')
         WHERE id = ?1",
        rusqlite::params![product_id],
    )
    .map_err(|e| e.to_string())?;

    let product = get_product_json(&conn, product_id)?;
    sync::enqueue(&conn, "product", product_id, "update", &product)?;
    Ok(serde_json::json!({ "success": true, "data": product }))
}

pub(crate) fn delete_product_impl(db: &db::DbState, product_id: &str) -> Result<Value, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let changed = conn
        .execute(
            "UPDATE products
             SET is_active = 0, sync_status = 'pending', updated_at = datetime('now')
             WHERE id = ?1 AND is_active = 1",
            rusqlite::params![product_id],
        )
        .map_err(|e| e.to_string())?;
    if changed == 0 {
        return Err(format!("Product not found: {product_id}"));
    }
    sync::enqueue(
        &conn,
        "product",
        product_id,
        "delete",
        &serde_json::json!({ "id": product_id }),
    )?;
    Ok(serde_json::json!({ "success": true }))
}

pub(crate) fn adjust_quantity_impl(
    db: &db::DbState,
    product_id: &str,
    delta: f64,
) -> Result<Value, String> {
    if !delta.is_finite() {
        return Err("Quantity delta must be a number".into());
    }
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let current: f64 = conn
        .query_row(
            "SELECT quantity FROM products WHERE id = ?1 AND is_active = 1",
            rusqlite::params![product_id],
            |row| row.get(0),
        )
        .map_err(|_| format!("Product not found: {product_id}"))?;

    let next = current + delta;
    if next < 0.0 {
        return Err(format!(
            "Stock cannot go negative (current {current}, delta {delta})"
        ));
    }

    conn.execute(
        "UPDATE products
         SET quantity = ?2, version = version + 1, sync_status = 'pending',
             updated_at = datetime('now')
         WHERE id = ?1",
        rusqlite::params![product_id, next],
    )
    .map_err(|e| e.to_string())?;

    let product = get_product_json(&conn, product_id)?;
    sync::enqueue(&conn, "product", product_id, "update", &product)?;
    Ok(serde_json::json!({ "success": true, "data": product }))
}

/// Snapshot of the active catalog plus an md5 content hash. The hash lets
/// the scanner preload and the storefront tell "unchanged" apart from
/// "refetch" without diffing rows.
pub(crate) fn catalog_snapshot_impl(db: &db::DbState) -> Result<Value, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let products = load_products(&conn, false)?;
    let serialized = serde_json::to_string(&products).map_err(|e| e.to_string())?;
    let version = format!("{:x}", md5::compute(serialized.as_bytes()));

    Ok(serde_json::json!({
        "version": version,
        "count": products.len(),
        "products": products,
        "generatedAt": Utc::now().to_rfc3339(),
    }))
}

// ---------------------------------------------------------------------------
// Payload parsing
// ---------------------------------------------------------------------------

fn parse_update_payload(
    arg0: Option<Value>,
    arg1: Option<Value>,
    arg2: Option<Value>,
) -> Result<(String, Value, i64), String> {
    let base = arg0.unwrap_or_else(|| serde_json::json!({}));
    let product_id = payload_arg0_as_string(Some(base.clone()), &["productId", "product_id", "id"])
        .ok_or("Missing productId")?;
    let updates = arg1
        .or_else(|| base.get("updates").cloned())
        .unwrap_or_else(|| serde_json::json!({}));
    if !updates.is_object() {
        return Err("updates must be an object".into());
    }
    let expected_version = match arg2 {
        Some(Value::Number(n)) => n.as_i64().unwrap_or(0),
        Some(Value::String(s)) => s.parse::<i64>().unwrap_or(0),
        _ => crate::value_i64(&base, &["expectedVersion", "expected_version", "version"])
            .unwrap_or(0),
    };
    Ok((product_id, updates, expected_version))
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

#[tauri::command]
pub async fn product_list(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    list_products_impl(&db, &arg0.unwrap_or_else(|| serde_json::json!({})))
}

#[tauri::command]
pub async fn product_get(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    let product_id =
        payload_arg0_as_string(arg0, &["productId", "product_id", "id"]).ok_or("Missing productId")?;
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    get_product_json(&conn, &product_id)
}

#[tauri::command]
pub async fn product_lookup_by_code(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    let code = payload_arg0_as_string(arg0, &["code", "barcode", "shamelNo", "value"])
        .ok_or("Missing code")?;
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    Ok(scanner::match_product(&conn, &code).unwrap_or(Value::Null))
}

#[tauri::command]
pub async fn product_search(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    let query = payload_arg0_as_string(arg0, &["query", "q", "search"]).unwrap_or_default();
    let result = list_products_impl(&db, &serde_json::json!({ "search": query, "perPage": 50 }))?;
    Ok(result.get("items").cloned().unwrap_or(serde_json::json!([])))
}

#[tauri::command]
pub async fn product_create(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
    app: tauri::AppHandle,
) -> Result<Value, String> {
    let result = create_product_impl(&db, &arg0.unwrap_or_else(|| serde_json::json!({})))?;
    if let Some(product) = result.get("data") {
        let _ = app.emit("product_created", product.clone());
    }
    Ok(result)
}

#[tauri::command]
pub async fn product_update(
    arg0: Option<Value>,
    arg1: Option<Value>,
    arg2: Option<Value>,
    db: tauri::State<'_, db::DbState>,
    app: tauri::AppHandle,
) -> Result<Value, String> {
    let (product_id, updates, expected_version) = parse_update_payload(arg0, arg1, arg2)?;
    let result = update_product_impl(&db, &product_id, &updates, expected_version)?;
    if result.get("success").and_then(Value::as_bool) == Some(true) {
        if let Some(product) = result.get("data") {
            let _ = app.emit("product_updated", product.clone());
        }
    }
    Ok(result)
}

#[tauri::command]
pub async fn product_delete(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
    app: tauri::AppHandle,
) -> Result<Value, String> {
    let product_id =
        payload_arg0_as_string(arg0, &["productId", "product_id", "id"]).ok_or("Missing productId")?;
    let result = delete_product_impl(&db, &product_id)?;
    let _ = app.emit("product_deleted", serde_json::json!({ "id": product_id }));
    Ok(result)
}

#[tauri::command]
pub async fn product_adjust_quantity(
    arg0: Option<Value>,
    arg1: Option<Value>,
    db: tauri::State<'_, db::DbState>,
    app: tauri::AppHandle,
) -> Result<Value, String> {
    let base = arg0.unwrap_or_else(|| serde_json::json!({}));
    let product_id = payload_arg0_as_string(Some(base.clone()), &["productId", "product_id", "id"])
        .ok_or("Missing productId")?;
    let delta = arg1
        .and_then(|v| v.as_f64())
        .or_else(|| value_f64(&base, &["delta", "adjustment", "change"]))
        .ok_or("Missing quantity delta")?;
    let result = adjust_quantity_impl(&db, &product_id, delta)?;
    if let Some(product) = result.get("data") {
        let _ = app.emit("product_updated", product.clone());
    }
    Ok(result)
}

#[tauri::command]
pub async fn catalog_snapshot(db: tauri::State<'_, db::DbState>) -> Result<Value, String> {
    catalog_snapshot_impl(&db)
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

    fn create(db: &db::DbState, payload: Value) -> Value {
        create_product_impl(db, &payload).expect("create product")
    }

    #[test]
    fn create_requires_name_and_rejects_negative_prices() {
        let db = test_db();
        assert!(create_product_impl(&db, &serde_json::json!({ "salePrice": 5.0 })).is_err());
        assert!(create_product_impl(
            &db,
            &serde_json::json!({ "name": "X", "salePrice": -1.0 })
        )
        .is_err());
    }

    #[test]
    fn create_rejects_duplicate_codes() {
        let db = test_db();
        create(
            &db,
            serde_json::json!({ "name": "A", "barcode": "629100", "shamelNo": "SH-1" }),
        );

        let dup_barcode =
            create_product_impl(&db, &serde_json::json!({ "name": "B", "barcode": "629100" }));
        assert!(dup_barcode.unwrap_err().contains("Barcode"));

        let dup_shamel =
            create_product_impl(&db, &serde_json::json!({ "name": "C", "shamelNo": "SH-1" }));
        assert!(dup_shamel.unwrap_err().contains("Shamel"));
    }

    #[test]
    fn create_enqueues_sync_op() {
        let db = test_db();
        create(&db, serde_json::json!({ "name": "A", "salePrice": 2.0 }));
        let conn = db.conn.lock().unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sync_queue WHERE entity_type = 'product' AND operation = 'insert'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn update_respects_optimistic_version() {
        let db = test_db();
        let created = create(&db, serde_json::json!({ "name": "A", "salePrice": 2.0 }));
        let id = created["data"]["id"].as_str().unwrap().to_string();

        // Stale version is a conflict, not an overwrite
        let conflict = update_product_impl(&db, &id, &serde_json::json!({ "salePrice": 9.0 }), 7)
            .expect("update");
        assert_eq!(conflict["conflict"], true);

        // Correct version applies and bumps
        let ok = update_product_impl(&db, &id, &serde_json::json!({ "salePrice": 9.0 }), 1)
            .expect("update");
        assert_eq!(ok["success"], true);
        assert_eq!(ok["data"]["salePrice"], 9.0);
        assert_eq!(ok["data"]["version"], 2);
    }

    #[test]
    fn adjust_quantity_guards_negative_stock() {
        let db = test_db();
        let created = create(
            &db,
            serde_json::json!({ "name": "A", "quantity": 5.0 }),
        );
        let id = created["data"]["id"].as_str().unwrap().to_string();

        let ok = adjust_quantity_impl(&db, &id, -3.0).expect("adjust");
        assert_eq!(ok["data"]["quantity"], 2.0);

        assert!(adjust_quantity_impl(&db, &id, -5.0).is_err());
    }

    #[test]
    fn soft_delete_frees_codes_and_hides_from_list() {
        let db = test_db();
        let created = create(
            &db,
            serde_json::json!({ "name": "A", "barcode": "629100" }),
        );
        let id = created["data"]["id"].as_str().unwrap().to_string();

        delete_product_impl(&db, &id).expect("delete");
        // Barcode reusable after soft delete
        create(&db, serde_json::json!({ "name": "B", "barcode": "629100" }));

        let listed = list_products_impl(&db, &serde_json::json!({})).expect("list");
        assert_eq!(listed["total"], 1);
        let listed_all =
            list_products_impl(&db, &serde_json::json!({ "includeInactive": true })).expect("list");
        assert_eq!(listed_all["total"], 2);
    }

    #[test]
    fn list_searches_all_words_across_fields() {
        let db = test_db();
        create(
            &db,
            serde_json::json!({ "name": "Samsung charger", "category": "chargers" }),
        );
        create(
            &db,
            serde_json::json!({ "name": "USB cable", "category": "cables" }),
        );

        let hits = list_products_impl(
            &db,
            &serde_json::json!({ "search": "samsung chargers" }),
        )
        .expect("list");
        assert_eq!(hits["total"], 1);
        assert_eq!(hits["items"][0]["name"], "Samsung charger");
    }

    #[test]
    fn snapshot_version_tracks_content() {
        let db = test_db();
        create(&db, serde_json::json!({ "name": "A", "salePrice": 1.0 }));

        let snap1 = catalog_snapshot_impl(&db).expect("snapshot");
        let snap2 = catalog_snapshot_impl(&db).expect("snapshot");
        assert_eq!(snap1["version"], snap2["version"]);
        assert_eq!(snap1["count"], 1);

        create(&db, serde_json::json!({ "name": "B", "salePrice": 2.0 }));
        let snap3 = catalog_snapshot_impl(&db).expect("snapshot");
        assert_ne!(snap1["version"], snap3["version"]);
    }
}
