//! Public storefront feed commands.
//!
//! A read-only projection of the active catalog: public fields only (no
//! purchase or wholesale prices), grouped by category, versioned with a
//! content hash so the storefront can skip unchanged feeds. The WhatsApp
//! inquiry link lets a shopper open a prefilled chat with the store.

use serde_json::Value;

use crate::query::{self, ListOptions};
use crate::{db, payload_arg0_as_string, storage, whatsapp};

const SEARCH_FIELDS: &[&str] = &["name", "category", "origin"];

/// Public projection of one product row.
fn storefront_row_to_json(row: &rusqlite::Row<'_>) -> rusqlite::Result<Value> {
    let quantity: f64 = row.get(6)?;
    Ok(serde_json::json!({
        "id": row.get::<_, String>(0)?,
        "name": row.get::<_, String>(1)?,
        "barcode": row.get::<_, Option<String>>(2)?,
        "shamelNo": row.get::<_, Option<String>>(3)?,
        "category": row.get::<_, Option<String>>(4)?,
        "price": row.get::<_, f64>(5)?,
        "inStock": quantity > 0.0,
        "unit": row.get::<_, Option<String>>(7)?,
        "origin": row.get::<_, Option<String>>(8)?,
        "imageUrl": row.get::<_, Option<String>>(9)?,
    }))
}

const STOREFRONT_COLUMNS: &str =
    "id, name, barcode, shamel_no, category, sale_price, quantity, unit, origin, image_url";

fn load_feed(conn: &rusqlite::Connection) -> Result<Vec<Value>, String> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {STOREFRONT_COLUMNS} FROM products
             WHERE is_active = 1
             ORDER BY category, name"
        ))
        .map_err(|e| e.to_string())?;
    let rows = stmt
        .query_map([], |row| storefront_row_to_json(row))
        .map_err(|e| e.to_string())?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

// ---------------------------------------------------------------------------
// Implementations
// ---------------------------------------------------------------------------

/// The full public feed: products grouped by category plus a version hash.
pub(crate) fn snapshot_impl(db: &db::DbState) -> Result<Value, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let products = load_feed(&conn)?;
    drop(conn);

    let serialized = serde_json::to_string(&products).map_err(|e| e.to_string())?;
    let version = format!("{:x}", md5::compute(serialized.as_bytes()));

    let mut categories = serde_json::Map::new();
    for product in &products {
        let category = product
            .get("category")
            .and_then(Value::as_str)
            .unwrap_or("other")
            .to_string();
        let bucket = categories
            .entry(category)
            .or_insert_with(|| serde_json::json!([]));
        if let Some(bucket) = bucket.as_array_mut() {
            bucket.push(product.clone());
        }
    }

    Ok(serde_json::json!({
        "version": version,
        "count": products.len(),
        "categories": categories,
        "products": products,
    }))
}

/// Browse the feed with the shared search/sort/paginate engine.
pub(crate) fn browse_impl(db: &db::DbState, payload: &Value) -> Result<Value, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let mut products = load_feed(&conn)?;
    drop(conn);

    if let Some(category) = crate::value_str(payload, &["category"]) {
        products.retain(|p| {
            p.get("category")
                .and_then(Value::as_str)
                .map(|c| c.eq_ignore_ascii_case(&category))
                .unwrap_or(false)
        });
    }
    if payload.get("inStockOnly").and_then(Value::as_bool) == Some(true) {
        products.retain(|p| p.get("inStock").and_then(Value::as_bool) == Some(true));
    }

    let opts = ListOptions::from_payload(payload);
    Ok(query::apply(products, &opts, SEARCH_FIELDS))
}

/// One product's public view.
pub(crate) fn product_impl(db: &db::DbState, product_id: &str) -> Result<Value, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    conn.query_row(
        &format!("SELECT {STOREFRONT_COLUMNS} FROM products WHERE id = ?1 AND is_active = 1"),
        rusqlite::params![product_id],
        |row| storefront_row_to_json(row),
    )
    .map_err(|_| format!("Product not available: {product_id}"))
}

/// WhatsApp inquiry link for a storefront product, addressed to the store's
/// configured number.
pub(crate) fn inquiry_link_impl(db: &db::DbState, product_id: &str) -> Result<Value, String> {
    let product = product_impl(db, product_id)?;
    let store_number = storage::get_credential("whatsapp_number")
        .filter(|n| !n.trim().is_empty())
        .ok_or("Store WhatsApp number is not configured")?;
    let message = whatsapp::storefront_inquiry_message(&product);
    let link = whatsapp::build_link(&store_number, &message)?;
    Ok(serde_json::json!({ "link": link, "message": message }))
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

#[tauri::command]
pub async fn storefront_snapshot(db: tauri::State<'_, db::DbState>) -> Result<Value, String> {
    snapshot_impl(&db)
}

#[tauri::command]
pub async fn storefront_browse(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    browse_impl(&db, &arg0.unwrap_or_else(|| serde_json::json!({})))
}

#[tauri::command]
pub async fn storefront_product(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    let product_id = payload_arg0_as_string(arg0, &["productId", "product_id", "id"])
        .ok_or("Missing productId")?;
    product_impl(&db, &product_id)
}

#[tauri::command]
pub async fn storefront_whatsapp_link(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    let product_id = payload_arg0_as_string(arg0, &["productId", "product_id", "id"])
        .ok_or("Missing productId")?;
    inquiry_link_impl(&db, &product_id)
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
        conn.execute_batch(
            "INSERT INTO products (id, name, category, sale_price, purchase_price, quantity)
             VALUES ('p1', 'Cable', 'cables', 3.0, 1.0, 5.0),
                    ('p2', 'Charger', 'chargers', 12.0, 6.0, 0.0),
                    ('p3', 'Old cable', 'cables', 2.0, 1.0, 9.0);
             UPDATE products SET is_active = 0 WHERE id = 'p3';",
        )
        .expect("seed");
        db::DbState {
            conn: Mutex::new(conn),
            db_path: PathBuf::from(":memory:"),
        }
    }

    #[test]
    fn snapshot_exposes_only_public_fields() {
        let db = test_db();
        let snapshot = snapshot_impl(&db).expect("snapshot");
        assert_eq!(snapshot["count"], 2);

        let first = &snapshot["products"][0];
        assert!(first.get("price").is_some());
        assert!(first.get("purchasePrice").is_none());
        assert!(first.get("wholesalePrice").is_none());
        assert!(first.get("quantity").is_none(), "raw stock is not public");
        assert!(first.get("inStock").is_some());
    }

    #[test]
    fn snapshot_groups_by_category_and_versions_content() {
        let db = test_db();
        let a = snapshot_impl(&db).expect("snapshot");
        assert_eq!(a["categories"]["cables"].as_array().unwrap().len(), 1);
        assert_eq!(a["categories"]["chargers"].as_array().unwrap().len(), 1);

        let b = snapshot_impl(&db).expect("snapshot");
        assert_eq!(a["version"], b["version"]);

        {
            let conn = db.conn.lock().unwrap();
            conn.execute("UPDATE products SET sale_price = 4.0 WHERE id = 'p1'", [])
                .unwrap();
        }
        let c = snapshot_impl(&db).expect("snapshot");
        assert_ne!(a["version"], c["version"]);
    }

    #[test]
    fn browse_filters_stock_and_category() {
        let db = test_db();
        let in_stock = browse_impl(&db, &serde_json::json!({ "inStockOnly": true })).expect("browse");
        assert_eq!(in_stock["total"], 1);
        assert_eq!(in_stock["items"][0]["id"], "p1");

        let chargers =
            browse_impl(&db, &serde_json::json!({ "category": "chargers" })).expect("browse");
        assert_eq!(chargers["total"], 1);
    }

    #[test]
    fn inactive_products_are_not_served() {
        let db = test_db();
        assert!(product_impl(&db, "p3").is_err());
        assert_eq!(product_impl(&db, "p1").expect("p1")["name"], "Cable");
    }
}
