//! Shop receipt commands (سند قبض / سند صرف).
//!
//! Receipts are an audit trail: voiding flags the row, nothing is ever
//! hard-deleted.

use serde_json::Value;
use tauri::Emitter;

use crate::query::{self, ListOptions};
use crate::{
    db, payload_arg0_as_string, print, sync, validate_date_not_future, value_f64, value_str,
};

const SEARCH_FIELDS: &[&str] = &["partyName", "reference", "note", "receiptNo"];

const RECEIPT_COLUMNS: &str = "id, receipt_no, kind, party_name, amount, method, reference, note,
                               recorded_at, recorded_by, voided, voided_at, void_reason,
                               sync_status, created_at, updated_at";

fn receipt_row_to_json(row: &rusqlite::Row<'_>) -> rusqlite::Result<Value> {
    Ok(serde_json::json!({
        "id": row.get::<_, String>(0)?,
        "receiptNo": row.get::<_, i64>(1)?,
        "kind": row.get::<_, String>(2)?,
        "partyName": row.get::<_, String>(3)?,
        "amount": row.get::<_, f64>(4)?,
        "method": row.get::<_, String>(5)?,
        "reference": row.get::<_, Option<String>>(6)?,
        "note": row.get::<_, Option<String>>(7)?,
        "recordedAt": row.get::<_, String>(8)?,
        "recordedBy": row.get::<_, Option<String>>(9)?,
        "voided": row.get::<_, i64>(10)? == 1,
        "voidedAt": row.get::<_, Option<String>>(11)?,
        "voidReason": row.get::<_, Option<String>>(12)?,
        "syncStatus": row.get::<_, String>(13)?,
        "createdAt": row.get::<_, Option<String>>(14)?,
        "updatedAt": row.get::<_, Option<String>>(15)?,
    }))
}

fn get_receipt_json(conn: &rusqlite::Connection, receipt_id: &str) -> Result<Value, String> {
    conn.query_row(
        &format!("SELECT {RECEIPT_COLUMNS} FROM shop_receipts WHERE id = ?1"),
        rusqlite::params![receipt_id],
        |row| receipt_row_to_json(row),
    )
    .map_err(|_| format!("Receipt not found: {receipt_id}"))
}

// ---------------------------------------------------------------------------
// Implementations
// ---------------------------------------------------------------------------

pub(crate) fn list_receipts_impl(db: &db::DbState, payload: &Value) -> Result<Value, String> {
    let kind = value_str(payload, &["kind"]);
    let date_from = value_str(payload, &["dateFrom", "date_from", "from"]);
    let date_to = value_str(payload, &["dateTo", "date_to", "to"]);
    let include_voided = payload
        .get("includeVoided")
        .and_then(Value::as_bool)
        .unwrap_or(true);

    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {RECEIPT_COLUMNS} FROM shop_receipts
             WHERE (?1 IS NULL OR kind = ?1)
               AND (?2 IS NULL OR substr(recorded_at, 1, 10) >= ?2)
               AND (?3 IS NULL OR substr(recorded_at, 1, 10) <= ?3)
               AND (?4 OR voided = 0)
             ORDER BY recorded_at DESC, receipt_no DESC"
        ))
        .map_err(|e| e.to_string())?;
    let rows = stmt
        .query_map(
            rusqlite::params![kind, date_from, date_to, include_voided],
            |row| receipt_row_to_json(row),
        )
        .map_err(|e| e.to_string())?;
    let receipts: Vec<Value> = rows.filter_map(|r| r.ok()).collect();
    drop(stmt);
    drop(conn);

    let opts = ListOptions::from_payload(payload);
    Ok(query::apply(receipts, &opts, SEARCH_FIELDS))
}

pub(crate) fn create_receipt_impl(db: &db::DbState, payload: &Value) -> Result<Value, String> {
    let kind = value_str(payload, &["kind"]).ok_or("Receipt kind is required")?;
    if !matches!(kind.as_str(), "in" | "out") {
        return Err(format!("Receipt kind must be 'in' or 'out', got {kind}"));
    }
    let party_name =
        value_str(payload, &["partyName", "party_name"]).ok_or("Party name is required")?;
    let amount = value_f64(payload, &["amount"]).ok_or("Amount is required")?;
    if amount <= 0.0 {
        return Err("Amount must be positive".into());
    }
    let method = value_str(payload, &["method"]).unwrap_or_else(|| "cash".into());
    if !matches!(method.as_str(), "cash" | "card" | "transfer") {
        return Err(format!("Unknown payment method: {method}"));
    }
    let recorded_at = value_str(payload, &["recordedAt", "recorded_at", "date"])
        .unwrap_or_else(crate::data_helpers::today);
    validate_date_not_future(&recorded_at, "Receipt date")?;

    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let receipt_no = db::next_counter(&conn, "receipt_no")?;
    let id = format!("rcpt-{}", uuid::Uuid::new_v4());

    conn.execute(
        "INSERT INTO shop_receipts (id, receipt_no, kind, party_name, amount, method,
                                    reference, note, recorded_at, recorded_by)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        rusqlite::params![
            id,
            receipt_no,
            kind,
            party_name,
            amount,
            method,
            value_str(payload, &["reference"]),
            value_str(payload, &["note", "notes"]),
            recorded_at,
            value_str(payload, &["recordedBy", "recorded_by"]),
        ],
    )
    .map_err(|e| format!("create receipt: {e}"))?;

    let receipt = get_receipt_json(&conn, &id)?;
    sync::enqueue(&conn, "shop_receipt", &id, "insert", &receipt)?;
    Ok(serde_json::json!({ "success": true, "data": receipt }))
}

pub(crate) fn void_receipt_impl(
    db: &db::DbState,
    receipt_id: &str,
    reason: Option<&str>,
) -> Result<Value, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let current = get_receipt_json(&conn, receipt_id)?;
    if current["voided"] == true {
        return Err("Receipt is already voided".into());
    }

    conn.execute(
        "UPDATE shop_receipts
         SET voided = 1, voided_at = datetime('now'), void_reason = ?2,
             sync_status = 'pending', updated_at = datetime('now')
         WHERE id = ?1",
        rusqlite::params![receipt_id, reason.map(str::trim).filter(|s| !s.is_empty())],
    )
    .map_err(|e| e.to_string())?;

    let receipt = get_receipt_json(&conn, receipt_id)?;
    sync::enqueue(&conn, "shop_receipt", receipt_id, "update", &receipt)?;
    Ok(serde_json::json!({ "success": true, "data": receipt }))
}

/// Daily in/out totals over a date range (voided receipts excluded).
pub(crate) fn daily_summary_impl(db: &db::DbState, payload: &Value) -> Result<Value, String> {
    let date_from = value_str(payload, &["dateFrom", "date_from", "from"])
        .unwrap_or_else(crate::data_helpers::today);
    let date_to = value_str(payload, &["dateTo", "date_to", "to"]).unwrap_or_else(|| date_from.clone());

    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let mut stmt = conn
        .prepare(
            "SELECT substr(recorded_at, 1, 10) AS day, kind, SUM(amount), COUNT(*)
             FROM shop_receipts
             WHERE voided = 0
               AND substr(recorded_at, 1, 10) >= ?1
               AND substr(recorded_at, 1, 10) <= ?2
             GROUP BY day, kind
             ORDER BY day",
        )
        .map_err(|e| e.to_string())?;
    let rows = stmt
        .query_map(rusqlite::params![date_from, date_to], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, f64>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })
        .map_err(|e| e.to_string())?;

    let mut days = serde_json::Map::new();
    let mut total_in = 0.0;
    let mut total_out = 0.0;
    for (day, kind, sum, count) in rows.filter_map(|r| r.ok()) {
        let entry = days
            .entry(day)
            .or_insert_with(|| serde_json::json!({ "in": 0.0, "out": 0.0, "count": 0 }));
        entry[kind.as_str()] = serde_json::json!(sum);
        entry["count"] = serde_json::json!(entry["count"].as_i64().unwrap_or(0) + count);
        match kind.as_str() {
            "in" => total_in += sum,
            _ => total_out += sum,
        }
    }

    Ok(serde_json::json!({
        "from": date_from,
        "to": date_to,
        "days": days,
        "totalIn": total_in,
        "totalOut": total_out,
        "net": total_in - total_out,
    }))
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

#[tauri::command]
pub async fn receipt_list(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    list_receipts_impl(&db, &arg0.unwrap_or_else(|| serde_json::json!({})))
}

#[tauri::command]
pub async fn receipt_get(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    let receipt_id = payload_arg0_as_string(arg0, &["receiptId", "receipt_id", "id"])
        .ok_or("Missing receiptId")?;
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    get_receipt_json(&conn, &receipt_id)
}

#[tauri::command]
pub async fn receipt_create(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
    app: tauri::AppHandle,
) -> Result<Value, String> {
    let result = create_receipt_impl(&db, &arg0.unwrap_or_else(|| serde_json::json!({})))?;
    if let Some(receipt) = result.get("data") {
        let _ = app.emit("receipt_created", receipt.clone());
    }
    Ok(result)
}

#[tauri::command]
pub async fn receipt_void(
    arg0: Option<Value>,
    arg1: Option<Value>,
    db: tauri::State<'_, db::DbState>,
    app: tauri::AppHandle,
) -> Result<Value, String> {
    let base = arg0.unwrap_or_else(|| serde_json::json!({}));
    let receipt_id = payload_arg0_as_string(Some(base.clone()), &["receiptId", "receipt_id", "id"])
        .ok_or("Missing receiptId")?;
    let reason = arg1
        .as_ref()
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| value_str(&base, &["reason", "voidReason", "void_reason"]));
    let result = void_receipt_impl(&db, &receipt_id, reason.as_deref())?;
    if let Some(receipt) = result.get("data") {
        let _ = app.emit("receipt_voided", receipt.clone());
    }
    Ok(result)
}

#[tauri::command]
pub async fn receipt_daily_summary(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    daily_summary_impl(&db, &arg0.unwrap_or_else(|| serde_json::json!({})))
}

#[tauri::command]
pub async fn receipt_print(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    let receipt_id = payload_arg0_as_string(arg0, &["receiptId", "receipt_id", "id"])
        .ok_or("Missing receiptId")?;
    print::enqueue_print_job(&db, "shop_receipt", &receipt_id, None)
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

    fn create(db: &db::DbState, kind: &str, amount: f64, date: &str) -> Value {
        create_receipt_impl(
            db,
            &serde_json::json!({
                "kind": kind, "partyName": "Omar", "amount": amount, "recordedAt": date
            }),
        )
        .expect("create receipt")
    }

    #[test]
    fn create_validates_kind_amount_and_date() {
        let db = test_db();
        assert!(create_receipt_impl(
            &db,
            &serde_json::json!({ "kind": "loan", "partyName": "X", "amount": 5.0 })
        )
        .is_err());
        assert!(create_receipt_impl(
            &db,
            &serde_json::json!({ "kind": "in", "partyName": "X", "amount": 0.0 })
        )
        .is_err());
        assert!(create_receipt_impl(
            &db,
            &serde_json::json!({ "kind": "in", "partyName": "X", "amount": 5.0, "recordedAt": "2099-01-01" })
        )
        .is_err());
    }

    #[test]
    fn void_flags_but_keeps_the_row() {
        let db = test_db();
        let receipt = create(&db, "in", 50.0, "2026-08-01");
        let id = receipt["data"]["id"].as_str().unwrap().to_string();

        let voided = void_receipt_impl(&db, &id, Some("entered twice")).expect("void");
        assert_eq!(voided["data"]["voided"], true);
        assert_eq!(voided["data"]["voidReason"], "entered twice");

        // Still listed by default, hidden when filtered out
        let all = list_receipts_impl(&db, &serde_json::json!({})).expect("list");
        assert_eq!(all["total"], 1);
        let active =
            list_receipts_impl(&db, &serde_json::json!({ "includeVoided": false })).expect("list");
        assert_eq!(active["total"], 0);

        assert!(void_receipt_impl(&db, &id, None).is_err());
    }

    #[test]
    fn daily_summary_nets_in_against_out() {
        let db = test_db();
        create(&db, "in", 100.0, "2026-08-01");
        create(&db, "in", 50.0, "2026-08-01");
        create(&db, "out", 30.0, "2026-08-01");
        create(&db, "in", 10.0, "2026-08-02");
        // Voided receipts don't count
        let voided = create(&db, "in", 999.0, "2026-08-01");
        void_receipt_impl(&db, voided["data"]["id"].as_str().unwrap(), None).unwrap();

        let summary = daily_summary_impl(
            &db,
            &serde_json::json!({ "dateFrom": "2026-08-01", "dateTo": "2026-08-02" }),
        )
        .expect("summary");
        assert_eq!(summary["totalIn"], 160.0);
        assert_eq!(summary["totalOut"], 30.0);
        assert_eq!(summary["net"], 130.0);
        assert_eq!(summary["days"]["2026-08-01"]["in"], 150.0);
        assert_eq!(summary["days"]["2026-08-02"]["in"], 10.0);
    }

    #[test]
    fn list_filters_by_kind_and_range() {
        let db = test_db();
        create(&db, "in", 100.0, "2026-08-01");
        create(&db, "out", 20.0, "2026-08-02");
        create(&db, "in", 30.0, "2026-08-03");

        let only_in = list_receipts_impl(&db, &serde_json::json!({ "kind": "in" })).expect("list");
        assert_eq!(only_in["total"], 2);

        let ranged = list_receipts_impl(
            &db,
            &serde_json::json!({ "dateFrom": "2026-08-02", "dateTo": "2026-08-03" }),
        )
        .expect("list");
        assert_eq!(ranged["total"], 2);
    }
}
