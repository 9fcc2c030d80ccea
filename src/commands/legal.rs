//! Legal case and payment tracking commands.
//!
//! Balance = principal − sum of payments, floored at zero by rejecting
//! overpayments up front. Closing a case requires a zero balance or an
//! explicit write-off reason.

use serde_json::Value;
use tauri::Emitter;

use crate::query::{self, ListOptions};
use crate::{db, payload_arg0_as_string, sync, validate_date_not_future, value_f64, value_str};

const SEARCH_FIELDS: &[&str] = &["debtorName", "debtorPhone", "caseNo", "court", "notes"];

const CASE_COLUMNS: &str = "id, case_no, debtor_name, debtor_phone, principal_amount, court,
                            status, opened_at, closed_at, write_off_reason, notes, version,
                            sync_status, created_at, updated_at";

fn case_row_to_json(row: &rusqlite::Row<'_>) -> rusqlite::Result<Value> {
    Ok(serde_json::json!({
        "id": row.get::<_, String>(0)?,
        "caseNo": row.get::<_, i64>(1)?,
        "debtorName": row.get::<_, String>(2)?,
        "debtorPhone": row.get::<_, Option<String>>(3)?,
        "principalAmount": row.get::<_, f64>(4)?,
        "court": row.get::<_, Option<String>>(5)?,
        "status": row.get::<_, String>(6)?,
        "openedAt": row.get::<_, String>(7)?,
        "closedAt": row.get::<_, Option<String>>(8)?,
        "writeOffReason": row.get::<_, Option<String>>(9)?,
        "notes": row.get::<_, Option<String>>(10)?,
        "version": row.get::<_, i64>(11)?,
        "syncStatus": row.get::<_, String>(12)?,
        "createdAt": row.get::<_, Option<String>>(13)?,
        "updatedAt": row.get::<_, Option<String>>(14)?,
    }))
}

fn paid_total(conn: &rusqlite::Connection, case_id: &str) -> f64 {
    conn.query_row(
        "SELECT COALESCE(SUM(amount), 0) FROM legal_case_payments WHERE case_id = ?1",
        rusqlite::params![case_id],
        |row| row.get(0),
    )
    .unwrap_or(0.0)
}

fn get_case_json(conn: &rusqlite::Connection, case_id: &str) -> Result<Value, String> {
    let mut case = conn
        .query_row(
            &format!("SELECT {CASE_COLUMNS} FROM legal_cases WHERE id = ?1"),
            rusqlite::params![case_id],
            |row| case_row_to_json(row),
        )
        .map_err(|_| format!("Legal case not found: {case_id}"))?;

    let paid = paid_total(conn, case_id);
    let principal = case
        .get("principalAmount")
        .and_then(Value::as_f64)
        .unwrap_or(0.0);
    case["paidTotal"] = serde_json::json!(paid);
    case["balance"] = serde_json::json!((principal - paid).max(0.0));
    Ok(case)
}

// ---------------------------------------------------------------------------
// Implementations
// ---------------------------------------------------------------------------

pub(crate) fn list_cases_impl(db: &db::DbState, payload: &Value) -> Result<Value, String> {
    let status = value_str(payload, &["status"]);

    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let ids: Vec<String> = {
        let mut stmt = conn
            .prepare(
                "SELECT id FROM legal_cases WHERE (?1 IS NULL OR status = ?1)
                 ORDER BY opened_at DESC, case_no DESC",
            )
            .map_err(|e| e.to_string())?;
        let rows = stmt
            .query_map(rusqlite::params![status], |row| row.get::<_, String>(0))
            .map_err(|e| e.to_string())?;
        rows.filter_map(|r| r.ok()).collect()
    };
    let cases: Vec<Value> = ids
        .iter()
        .filter_map(|id| get_case_json(&conn, id).ok())
        .collect();
    drop(conn);

    let opts = ListOptions::from_payload(payload);
    Ok(query::apply(cases, &opts, SEARCH_FIELDS))
}

pub(crate) fn create_case_impl(db: &db::DbState, payload: &Value) -> Result<Value, String> {
    let debtor_name =
        value_str(payload, &["debtorName", "debtor_name"]).ok_or("Debtor name is required")?;
    let principal = value_f64(payload, &["principalAmount", "principal_amount", "amount"])
        .ok_or("Principal amount is required")?;
    if principal <= 0.0 {
        return Err("Principal amount must be positive".into());
    }
    let opened_at = value_str(payload, &["openedAt", "opened_at"])
        .unwrap_or_else(crate::data_helpers::today);
    validate_date_not_future(&opened_at, "Opened date")?;

    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let case_no = db::next_counter(&conn, "case_no")?;
    let id = format!("lc-{}", uuid::Uuid::new_v4());

    conn.execute(
        "INSERT INTO legal_cases (id, case_no, debtor_name, debtor_phone, principal_amount,
                                  court, opened_at, notes)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        rusqlite::params![
            id,
            case_no,
            debtor_name,
            value_str(payload, &["debtorPhone", "debtor_phone", "phone"]),
            principal,
            value_str(payload, &["court"]),
            opened_at,
            value_str(payload, &["notes"]),
        ],
    )
    .map_err(|e| format!("create legal case: {e}"))?;

    let case = get_case_json(&conn, &id)?;
    sync::enqueue(&conn, "legal_case", &id, "insert", &case)?;
    Ok(serde_json::json!({ "success": true, "data": case }))
}

pub(crate) fn update_case_impl(
    db: &db::DbState,
    case_id: &str,
    updates: &Value,
) -> Result<Value, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let current = get_case_json(&conn, case_id)?;
    if current["status"] == "closed" {
        return Err("Closed cases cannot be edited".into());
    }

    for (key, column) in [
        ("debtorName", "debtor_name"),
        ("debtorPhone", "debtor_phone"),
        ("court", "court"),
        ("notes", "notes"),
    ] {
        if let Some(text) = value_str(updates, &[key]) {
            conn.execute(
                &format!("UPDATE legal_cases SET {column} = ?2 WHERE id = ?1"),
                rusqlite::params![case_id, text],
            )
            .map_err(|e| e.to_string())?;
        }
    }
    if let Some(status) = value_str(updates, &["status"]) {
        if !matches!(status.as_str(), "open" | "in_court" | "settled") {
            return Err("Use the close operation to close a case".into());
        }
        conn.execute(
            "UPDATE legal_cases SET status = ?2 WHERE id = ?1",
            rusqlite::params![case_id, status],
        )
        .map_err(|e| e.to_string())?;
    }
    if let Some(principal) = value_f64(updates, &["principalAmount", "principal_amount"]) {
        if principal <= 0.0 {
            return Err("Principal amount must be positive".into());
        }
        let paid = paid_total(&conn, case_id);
        if principal < paid {
            return Err(format!(
                "Principal ({principal:.2}) cannot be below payments already recorded ({paid:.2})"
            ));
        }
        conn.execute(
            "UPDATE legal_cases SET principal_amount = ?2 WHERE id = ?1",
            rusqlite::params![case_id, principal],
        )
        .map_err(|e| e.to_string())?;
    }

    conn.execute(
        "UPDATE legal_cases
         SET version = version + 1, sync_status = 'pending', updated_at = datetime('now')
         WHERE id = ?1",
        rusqlite::params![case_id],
    )
    .map_err(|e| e.to_string())?;

    let case = get_case_json(&conn, case_id)?;
    sync::enqueue(&conn, "legal_case", case_id, "update", &case)?;
    Ok(serde_json::json!({ "success": true, "data": case }))
}

pub(crate) fn close_case_impl(
    db: &db::DbState,
    case_id: &str,
    write_off_reason: Option<&str>,
) -> Result<Value, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let case = get_case_json(&conn, case_id)?;
    if case["status"] == "closed" {
        return Err("Case is already closed".into());
    }

    let balance = case.get("balance").and_then(Value::as_f64).unwrap_or(0.0);
    let reason = write_off_reason.map(str::trim).filter(|s| !s.is_empty());
    if balance > 0.0 && reason.is_none() {
        return Err(format!(
            "Case has an outstanding balance of {balance:.2}; provide a write-off reason to close it"
        ));
    }

    conn.execute(
        "UPDATE legal_cases
         SET status = 'closed', closed_at = datetime('now'), write_off_reason = ?2,
             version = version + 1, sync_status = 'pending', updated_at = datetime('now')
         WHERE id = ?1",
        rusqlite::params![case_id, reason],
    )
    .map_err(|e| e.to_string())?;

    let case = get_case_json(&conn, case_id)?;
    sync::enqueue(&conn, "legal_case", case_id, "update", &case)?;
    Ok(serde_json::json!({ "success": true, "data": case }))
}

pub(crate) fn record_payment_impl(db: &db::DbState, payload: &Value) -> Result<Value, String> {
    let case_id =
        value_str(payload, &["caseId", "case_id"]).ok_or("Missing caseId")?;
    let amount = value_f64(payload, &["amount"]).ok_or("Payment amount is required")?;
    if amount <= 0.0 {
        return Err("Payment amount must be positive".into());
    }
    let method = value_str(payload, &["method"]).unwrap_or_else(|| "cash".into());
    if !matches!(method.as_str(), "cash" | "card" | "transfer") {
        return Err(format!("Unknown payment method: {method}"));
    }
    let paid_at =
        value_str(payload, &["paidAt", "paid_at"]).unwrap_or_else(crate::data_helpers::today);
    validate_date_not_future(&paid_at, "Payment date")?;

    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let case = get_case_json(&conn, &case_id)?;
    if case["status"] == "closed" {
        return Err("Cannot record payments on a closed case".into());
    }

    let balance = case.get("balance").and_then(Value::as_f64).unwrap_or(0.0);
    if amount > balance + 1e-9 {
        return Err(format!(
            "Payment ({amount:.2}) exceeds the outstanding balance ({balance:.2})"
        ));
    }

    let id = format!("lp-{}", uuid::Uuid::new_v4());
    conn.execute(
        "INSERT INTO legal_case_payments (id, case_id, amount, paid_at, method, note, recorded_by)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        rusqlite::params![
            id,
            case_id,
            amount,
            paid_at,
            method,
            value_str(payload, &["note", "notes"]),
            value_str(payload, &["recordedBy", "recorded_by"]),
        ],
    )
    .map_err(|e| format!("record case payment: {e}"))?;

    sync::enqueue(
        &conn,
        "legal_case_payment",
        &id,
        "insert",
        &serde_json::json!({
            "id": id, "caseId": case_id, "amount": amount,
            "paidAt": paid_at, "method": method,
        }),
    )?;

    let case = get_case_json(&conn, &case_id)?;
    Ok(serde_json::json!({ "success": true, "paymentId": id, "data": case }))
}

pub(crate) fn list_payments_impl(db: &db::DbState, case_id: &str) -> Result<Value, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let mut stmt = conn
        .prepare(
            "SELECT id, case_id, amount, paid_at, method, note, recorded_by, created_at
             FROM legal_case_payments WHERE case_id = ?1 ORDER BY paid_at DESC, created_at DESC",
        )
        .map_err(|e| e.to_string())?;
    let rows = stmt
        .query_map(rusqlite::params![case_id], |row| {
            Ok(serde_json::json!({
                "id": row.get::<_, String>(0)?,
                "caseId": row.get::<_, String>(1)?,
                "amount": row.get::<_, f64>(2)?,
                "paidAt": row.get::<_, String>(3)?,
                "method": row.get::<_, String>(4)?,
                "note": row.get::<_, Option<String>>(5)?,
                "recordedBy": row.get::<_, Option<String>>(6)?,
                "createdAt": row.get::<_, Option<String>>(7)?,
            }))
        })
        .map_err(|e| e.to_string())?;
    let payments: Vec<Value> = rows.filter_map(|r| r.ok()).collect();
    Ok(serde_json::json!(payments))
}

pub(crate) fn delete_payment_impl(db: &db::DbState, payment_id: &str) -> Result<Value, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;

    let case_id: String = conn
        .query_row(
            "SELECT case_id FROM legal_case_payments WHERE id = ?1",
            rusqlite::params![payment_id],
            |row| row.get(0),
        )
        .map_err(|_| format!("Payment not found: {payment_id}"))?;

    let case_status: String = conn
        .query_row(
            "SELECT status FROM legal_cases WHERE id = ?1",
            rusqlite::params![case_id],
            |row| row.get(0),
        )
        .unwrap_or_else(|_| "open".into());
    if case_status == "closed" {
        return Err("Cannot remove payments from a closed case".into());
    }

    conn.execute(
        "DELETE FROM legal_case_payments WHERE id = ?1",
        rusqlite::params![payment_id],
    )
    .map_err(|e| e.to_string())?;
    sync::enqueue(
        &conn,
        "legal_case_payment",
        payment_id,
        "delete",
        &serde_json::json!({ "id": payment_id, "caseId": case_id }),
    )?;

    let case = get_case_json(&conn, &case_id)?;
    Ok(serde_json::json!({ "success": true, "data": case }))
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

#[tauri::command]
pub async fn legal_case_list(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    list_cases_impl(&db, &arg0.unwrap_or_else(|| serde_json::json!({})))
}

#[tauri::command]
pub async fn legal_case_get(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    let case_id =
        payload_arg0_as_string(arg0, &["caseId", "case_id", "id"]).ok_or("Missing caseId")?;
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    get_case_json(&conn, &case_id)
}

#[tauri::command]
pub async fn legal_case_create(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
    app: tauri::AppHandle,
) -> Result<Value, String> {
    let result = create_case_impl(&db, &arg0.unwrap_or_else(|| serde_json::json!({})))?;
    if let Some(case) = result.get("data") {
        let _ = app.emit("legal_case_created", case.clone());
    }
    Ok(result)
}

#[tauri::command]
pub async fn legal_case_update(
    arg0: Option<Value>,
    arg1: Option<Value>,
    db: tauri::State<'_, db::DbState>,
    app: tauri::AppHandle,
) -> Result<Value, String> {
    let base = arg0.unwrap_or_else(|| serde_json::json!({}));
    let case_id = payload_arg0_as_string(Some(base.clone()), &["caseId", "case_id", "id"])
        .ok_or("Missing caseId")?;
    let updates = arg1
        .or_else(|| base.get("updates").cloned())
        .unwrap_or_else(|| serde_json::json!({}));
    let result = update_case_impl(&db, &case_id, &updates)?;
    if let Some(case) = result.get("data") {
        let _ = app.emit("legal_case_updated", case.clone());
    }
    Ok(result)
}

#[tauri::command]
pub async fn legal_case_close(
    arg0: Option<Value>,
    arg1: Option<Value>,
    db: tauri::State<'_, db::DbState>,
    app: tauri::AppHandle,
) -> Result<Value, String> {
    let base = arg0.unwrap_or_else(|| serde_json::json!({}));
    let case_id = payload_arg0_as_string(Some(base.clone()), &["caseId", "case_id", "id"])
        .ok_or("Missing caseId")?;
    let reason = arg1
        .as_ref()
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| value_str(&base, &["writeOffReason", "write_off_reason", "reason"]));
    let result = close_case_impl(&db, &case_id, reason.as_deref())?;
    if let Some(case) = result.get("data") {
        let _ = app.emit("legal_case_updated", case.clone());
    }
    Ok(result)
}

#[tauri::command]
pub async fn legal_payment_record(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
    app: tauri::AppHandle,
) -> Result<Value, String> {
    let result = record_payment_impl(&db, &arg0.unwrap_or_else(|| serde_json::json!({})))?;
    if let Some(case) = result.get("data") {
        let _ = app.emit("legal_case_updated", case.clone());
    }
    Ok(result)
}

#[tauri::command]
pub async fn legal_payment_list(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    let case_id =
        payload_arg0_as_string(arg0, &["caseId", "case_id", "id"]).ok_or("Missing caseId")?;
    list_payments_impl(&db, &case_id)
}

#[tauri::command]
pub async fn legal_payment_delete(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
    app: tauri::AppHandle,
) -> Result<Value, String> {
    let payment_id = payload_arg0_as_string(arg0, &["paymentId", "payment_id", "id"])
        .ok_or("Missing paymentId")?;
    let result = delete_payment_impl(&db, &payment_id)?;
    if let Some(case) = result.get("data") {
        let _ = app.emit("legal_case_updated", case.clone());
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

    fn create_case(db: &db::DbState, principal: f64) -> String {
        let result = create_case_impl(
            db,
            &serde_json::json!({ "debtorName": "Debtor", "principalAmount": principal }),
        )
        .expect("create case");
        result["data"]["id"].as_str().unwrap().to_string()
    }

    #[test]
    fn balance_tracks_payments() {
        let db = test_db();
        let case_id = create_case(&db, 500.0);

        record_payment_impl(
            &db,
            &serde_json::json!({ "caseId": case_id, "amount": 200.0 }),
        )
        .expect("payment 1");
        let after = record_payment_impl(
            &db,
            &serde_json::json!({ "caseId": case_id, "amount": 100.0, "method": "transfer" }),
        )
        .expect("payment 2");

        assert_eq!(after["data"]["paidTotal"], 300.0);
        assert_eq!(after["data"]["balance"], 200.0);
    }

    #[test]
    fn overpayment_is_rejected() {
        let db = test_db();
        let case_id = create_case(&db, 100.0);
        record_payment_impl(&db, &serde_json::json!({ "caseId": case_id, "amount": 80.0 }))
            .expect("payment");

        let err = record_payment_impl(
            &db,
            &serde_json::json!({ "caseId": case_id, "amount": 30.0 }),
        )
        .expect_err("overpayment");
        assert!(err.contains("exceeds"));
    }

    #[test]
    fn close_requires_settled_balance_or_write_off() {
        let db = test_db();
        let case_id = create_case(&db, 100.0);

        let err = close_case_impl(&db, &case_id, None).expect_err("unsettled");
        assert!(err.contains("outstanding balance"));

        let closed =
            close_case_impl(&db, &case_id, Some("debtor untraceable")).expect("write-off close");
        assert_eq!(closed["data"]["status"], "closed");
        assert_eq!(closed["data"]["writeOffReason"], "debtor untraceable");

        // Closed cases reject further activity
        assert!(record_payment_impl(
            &db,
            &serde_json::json!({ "caseId": case_id, "amount": 10.0 })
        )
        .is_err());
        assert!(close_case_impl(&db, &case_id, None).is_err());
    }

    #[test]
    fn settled_case_closes_without_reason() {
        let db = test_db();
        let case_id = create_case(&db, 100.0);
        record_payment_impl(&db, &serde_json::json!({ "caseId": case_id, "amount": 100.0 }))
            .expect("full payment");
        let closed = close_case_impl(&db, &case_id, None).expect("close settled");
        assert_eq!(closed["data"]["balance"], 0.0);
    }

    #[test]
    fn deleting_payment_restores_balance() {
        let db = test_db();
        let case_id = create_case(&db, 100.0);
        let paid = record_payment_impl(
            &db,
            &serde_json::json!({ "caseId": case_id, "amount": 60.0 }),
        )
        .expect("payment");
        let payment_id = paid["paymentId"].as_str().unwrap().to_string();

        let after = delete_payment_impl(&db, &payment_id).expect("delete payment");
        assert_eq!(after["data"]["balance"], 100.0);
    }

    #[test]
    fn principal_cannot_drop_below_recorded_payments() {
        let db = test_db();
        let case_id = create_case(&db, 100.0);
        record_payment_impl(&db, &serde_json::json!({ "caseId": case_id, "amount": 60.0 }))
            .expect("payment");

        let err = update_case_impl(
            &db,
            &case_id,
            &serde_json::json!({ "principalAmount": 50.0 }),
        )
        .expect_err("principal below payments");
        assert!(err.contains("below payments"));
    }
}
