//! Maintenance ticket commands (repair intake lifecycle).

use serde_json::Value;
use tauri::Emitter;

use crate::query::{self, ListOptions};
use crate::{
    db, payload_arg0_as_string, print, sync, validate_date_not_future, value_f64, value_str,
    whatsapp,
};

const SEARCH_FIELDS: &[&str] = &[
    "customerName",
    "customerPhone",
    "device",
    "fault",
    "ticketNo",
];

const TICKET_COLUMNS: &str = "id, ticket_no, customer_id, customer_name, customer_phone, device,
                              fault, accessories, estimated_cost, paid_amount, status,
                              received_at, delivered_at, technician_notes, version, sync_status,
                              created_at, updated_at";

fn ticket_row_to_json(row: &rusqlite::Row<'_>) -> rusqlite::Result<Value> {
    Ok(serde_json::json!({
        "id": row.get::<_, String>(0)?,
        "ticketNo": row.get::<_, i64>(1)?,
        "customerId": row.get::<_, Option<String>>(2)?,
        "customerName": row.get::<_, String>(3)?,
        "customerPhone": row.get::<_, Option<String>>(4)?,
        "device": row.get::<_, String>(5)?,
        "fault": row.get::<_, String>(6)?,
        "accessories": row.get::<_, Option<String>>(7)?,
        "estimatedCost": row.get::<_, f64>(8)?,
        "paidAmount": row.get::<_, f64>(9)?,
        "status": row.get::<_, String>(10)?,
        "receivedAt": row.get::<_, String>(11)?,
        "deliveredAt": row.get::<_, Option<String>>(12)?,
        "technicianNotes": row.get::<_, Option<String>>(13)?,
        "version": row.get::<_, i64>(14)?,
        "syncStatus": row.get::<_, String>(15)?,
        "createdAt": row.get::<_, Option<String>>(16)?,
        "updatedAt": row.get::<_, Option<String>>(17)?,
    }))
}

fn get_ticket_json(conn: &rusqlite::Connection, ticket_id: &str) -> Result<Value, String> {
    conn.query_row(
        &format!("SELECT {TICKET_COLUMNS} FROM maintenance_tickets WHERE id = ?1"),
        rusqlite::params![ticket_id],
        |row| ticket_row_to_json(row),
    )
    .map_err(|_| format!("Maintenance ticket not found: {ticket_id}"))
}

/// Legal status transitions. Delivered and rejected are terminal.
fn transition_allowed(from: &str, to: &str) -> bool {
    matches!(
        (from, to),
        ("received", "in_repair")
            | ("received", "rejected")
            | ("in_repair", "ready")
            | ("in_repair", "rejected")
            | ("ready", "delivered")
    )
}

// ---------------------------------------------------------------------------
// Implementations
// ---------------------------------------------------------------------------

pub(crate) fn list_tickets_impl(db: &db::DbState, payload: &Value) -> Result<Value, String> {
    let status = value_str(payload, &["status"]);

    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {TICKET_COLUMNS} FROM maintenance_tickets
             WHERE (?1 IS NULL OR status = ?1)
             ORDER BY received_at DESC"
        ))
        .map_err(|e| e.to_string())?;
    let rows = stmt
        .query_map(rusqlite::params![status], |row| ticket_row_to_json(row))
        .map_err(|e| e.to_string())?;
    let tickets: Vec<Value> = rows.filter_map(|r| r.ok()).collect();
    drop(stmt);
    drop(conn);

    let opts = ListOptions::from_payload(payload);
    Ok(query::apply(tickets, &opts, SEARCH_FIELDS))
}

pub(crate) fn create_ticket_impl(db: &db::DbState, payload: &Value) -> Result<Value, String> {
    let customer_name =
        value_str(payload, &["customerName", "customer_name"]).ok_or("Customer name is required")?;
    let device = value_str(payload, &["device"]).ok_or("Device is required")?;
    let fault = value_str(payload, &["fault", "problem"]).ok_or("Fault description is required")?;

    let received_at = value_str(payload, &["receivedAt", "received_at"])
        .unwrap_or_else(crate::data_helpers::today);
    validate_date_not_future(&received_at, "Received date")?;

    let estimated_cost = value_f64(payload, &["estimatedCost", "estimated_cost"]).unwrap_or(0.0);
    let paid_amount = value_f64(payload, &["paidAmount", "paid_amount"]).unwrap_or(0.0);
    if estimated_cost < 0.0 || paid_amount < 0.0 {
        return Err("Amounts cannot be negative".into());
    }

    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let ticket_no = db::next_counter(&conn, "ticket_no")?;
    let id = format!("mt-{}", uuid::Uuid::new_v4());

    conn.execute(
        "INSERT INTO maintenance_tickets
            (id, ticket_no, customer_id, customer_name, customer_phone, device, fault,
             accessories, estimated_cost, paid_amount, received_at, technician_notes)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        rusqlite::params![
            id,
            ticket_no,
            value_str(payload, &["customerId", "customer_id"]),
            customer_name,
            value_str(payload, &["customerPhone", "customer_phone", "phone"]),
            device,
            fault,
            value_str(payload, &["accessories"]),
            estimated_cost,
            paid_amount,
            received_at,
            value_str(payload, &["technicianNotes", "technician_notes", "notes"]),
        ],
    )
    .map_err(|e| format!("create maintenance ticket: {e}"))?;

    let ticket = get_ticket_json(&conn, &id)?;
    sync::enqueue(&conn, "maintenance_ticket", &id, "insert", &ticket)?;
    Ok(serde_json::json!({ "success": true, "data": ticket }))
}

pub(crate) fn update_ticket_impl(
    db: &db::DbState,
    ticket_id: &str,
    updates: &Value,
) -> Result<Value, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    // Status changes go through set_status_impl only
    if updates.get("status").is_some() {
        return Err("Use the status operation to change ticket status".into());
    }

    get_ticket_json(&conn, ticket_id)?;

    for (key, column) in [
        ("customerName", "customer_name"),
        ("customerPhone", "customer_phone"),
        ("device", "device"),
        ("fault", "fault"),
        ("accessories", "accessories"),
        ("technicianNotes", "technician_notes"),
    ] {
        if let Some(text) = value_str(updates, &[key]) {
            conn.execute(
                &format!("UPDATE maintenance_tickets SET {column} = ?2 WHERE id = ?1"),
                rusqlite::params![ticket_id, text],
            )
            .map_err(|e| e.to_string())?;
        }
    }
    for (key, column) in [
        ("estimatedCost", "estimated_cost"),
        ("paidAmount", "paid_amount"),
    ] {
        if let Some(amount) = value_f64(updates, &[key]) {
            if amount < 0.0 {
                return Err("Amounts cannot be negative".into());
            }
            conn.execute(
                &format!("UPDATE maintenance_tickets SET {column} = ?2 WHERE id = ?1"),
                rusqlite::params![ticket_id, amount],
            )
            .map_err(|e| e.to_string())?;
        }
    }

    conn.execute(
        "UPDATE maintenance_tickets
         SET version = version + 1, sync_status = 'pending', updated_at = datetime('now')
         WHERE id = ?1",
        rusqlite::params![ticket_id],
    )
    .map_err(|e| e.to_string())?;

    let ticket = get_ticket_json(&conn, ticket_id)?;
    sync::enqueue(&conn, "maintenance_ticket", ticket_id, "update", &ticket)?;
    Ok(serde_json::json!({ "success": true, "data": ticket }))
}

pub(crate) fn set_status_impl(
    db: &db::DbState,
    ticket_id: &str,
    new_status: &str,
    allow_unsettled: bool,
) -> Result<Value, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let (current, estimated, paid): (String, f64, f64) = conn
        .query_row(
            "SELECT status, estimated_cost, paid_amount FROM maintenance_tickets WHERE id = ?1",
            rusqlite::params![ticket_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .map_err(|_| format!("Maintenance ticket not found: {ticket_id}"))?;

    if !transition_allowed(&current, new_status) {
        return Err(format!(
            "Cannot move ticket from '{current}' to '{new_status}'"
        ));
    }

    // Handing the device back without settlement needs an explicit override.
    if new_status == "delivered" && paid < estimated && !allow_unsettled {
        return Err(format!(
            "Ticket is not settled (paid {paid:.2} of {estimated:.2}); pass allowUnsettled to override"
        ));
    }

    conn.execute(
        "UPDATE maintenance_tickets
         SET status = ?2,
             delivered_at = CASE WHEN ?2 = 'delivered' THEN datetime('now') ELSE delivered_at END,
             version = version + 1, sync_status = 'pending', updated_at = datetime('now')
         WHERE id = ?1",
        rusqlite::params![ticket_id, new_status],
    )
    .map_err(|e| e.to_string())?;

    let ticket = get_ticket_json(&conn, ticket_id)?;
    sync::enqueue(&conn, "maintenance_ticket", ticket_id, "update", &ticket)?;
    Ok(serde_json::json!({ "success": true, "data": ticket }))
}

pub(crate) fn delete_ticket_impl(db: &db::DbState, ticket_id: &str) -> Result<Value, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let removed = conn
        .execute(
            "DELETE FROM maintenance_tickets WHERE id = ?1",
            rusqlite::params![ticket_id],
        )
        .map_err(|e| e.to_string())?;
    if removed == 0 {
        return Err(format!("Maintenance ticket not found: {ticket_id}"));
    }
    sync::enqueue(
        &conn,
        "maintenance_ticket",
        ticket_id,
        "delete",
        &serde_json::json!({ "id": ticket_id }),
    )?;
    Ok(serde_json::json!({ "success": true }))
}

/// WhatsApp status-notification link for a ticket.
pub(crate) fn whatsapp_link_impl(db: &db::DbState, ticket_id: &str) -> Result<Value, String> {
    let ticket = {
        let conn = db.conn.lock().map_err(|e| e.to_string())?;
        get_ticket_json(&conn, ticket_id)?
    };
    let phone = ticket
        .get("customerPhone")
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .ok_or("Ticket has no customer phone")?;
    let message = whatsapp::maintenance_message(&ticket);
    let link = whatsapp::build_link(phone, &message)?;
    Ok(serde_json::json!({ "link": link, "message": message }))
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

#[tauri::command]
pub async fn maintenance_list(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    list_tickets_impl(&db, &arg0.unwrap_or_else(|| serde_json::json!({})))
}

#[tauri::command]
pub async fn maintenance_get(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    let ticket_id =
        payload_arg0_as_string(arg0, &["ticketId", "ticket_id", "id"]).ok_or("Missing ticketId")?;
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    get_ticket_json(&conn, &ticket_id)
}

#[tauri::command]
pub async fn maintenance_create(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
    app: tauri::AppHandle,
) -> Result<Value, String> {
    let result = create_ticket_impl(&db, &arg0.unwrap_or_else(|| serde_json::json!({})))?;
    if let Some(ticket) = result.get("data") {
        let _ = app.emit("maintenance_created", ticket.clone());
    }
    Ok(result)
}

#[tauri::command]
pub async fn maintenance_update(
    arg0: Option<Value>,
    arg1: Option<Value>,
    db: tauri::State<'_, db::DbState>,
    app: tauri::AppHandle,
) -> Result<Value, String> {
    let base = arg0.unwrap_or_else(|| serde_json::json!({}));
    let ticket_id = payload_arg0_as_string(Some(base.clone()), &["ticketId", "ticket_id", "id"])
        .ok_or("Missing ticketId")?;
    let updates = arg1
        .or_else(|| base.get("updates").cloned())
        .unwrap_or_else(|| serde_json::json!({}));
    let result = update_ticket_impl(&db, &ticket_id, &updates)?;
    if let Some(ticket) = result.get("data") {
        let _ = app.emit("maintenance_updated", ticket.clone());
    }
    Ok(result)
}

#[tauri::command]
pub async fn maintenance_set_status(
    arg0: Option<Value>,
    arg1: Option<Value>,
    db: tauri::State<'_, db::DbState>,
    app: tauri::AppHandle,
) -> Result<Value, String> {
    let base = arg0.unwrap_or_else(|| serde_json::json!({}));
    let ticket_id = payload_arg0_as_string(Some(base.clone()), &["ticketId", "ticket_id", "id"])
        .ok_or("Missing ticketId")?;
    let status = arg1
        .as_ref()
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| value_str(&base, &["status", "newStatus"]))
        .ok_or("Missing status")?;
    let allow_unsettled = base
        .get("allowUnsettled")
        .or_else(|| base.get("allow_unsettled"))
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let result = set_status_impl(&db, &ticket_id, &status, allow_unsettled)?;
    if let Some(ticket) = result.get("data") {
        let _ = app.emit("maintenance_updated", ticket.clone());
    }
    Ok(result)
}

#[tauri::command]
pub async fn maintenance_delete(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
    app: tauri::AppHandle,
) -> Result<Value, String> {
    let ticket_id =
        payload_arg0_as_string(arg0, &["ticketId", "ticket_id", "id"]).ok_or("Missing ticketId")?;
    let result = delete_ticket_impl(&db, &ticket_id)?;
    let _ = app.emit("maintenance_deleted", serde_json::json!({ "id": ticket_id }));
    Ok(result)
}

#[tauri::command]
pub async fn maintenance_print(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    let ticket_id =
        payload_arg0_as_string(arg0, &["ticketId", "ticket_id", "id"]).ok_or("Missing ticketId")?;
    print::enqueue_print_job(&db, "maintenance_ticket", &ticket_id, None)
}

#[tauri::command]
pub async fn maintenance_whatsapp_link(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    let ticket_id =
        payload_arg0_as_string(arg0, &["ticketId", "ticket_id", "id"]).ok_or("Missing ticketId")?;
    whatsapp_link_impl(&db, &ticket_id)
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

    fn create(db: &db::DbState, extra: Value) -> Value {
        let mut payload = serde_json::json!({
            "customerName": "Omar",
            "customerPhone": "0791234567",
            "device": "Blender",
            "fault": "Does not spin",
            "estimatedCost": 10.0
        });
        if let (Some(dst), Some(src)) = (payload.as_object_mut(), extra.as_object()) {
            for (k, v) in src {
                dst.insert(k.clone(), v.clone());
            }
        }
        create_ticket_impl(db, &payload).expect("create ticket")
    }

    #[test]
    fn tickets_get_sequential_numbers() {
        let db = test_db();
        let a = create(&db, serde_json::json!({}));
        let b = create(&db, serde_json::json!({}));
        assert_eq!(a["data"]["ticketNo"], 1);
        assert_eq!(b["data"]["ticketNo"], 2);
    }

    #[test]
    fn future_received_date_is_rejected() {
        let db = test_db();
        let err = create_ticket_impl(
            &db,
            &serde_json::json!({
                "customerName": "X", "device": "Y", "fault": "Z",
                "receivedAt": "2099-01-01"
            }),
        )
        .expect_err("must fail");
        assert!(err.contains("future"));
    }

    #[test]
    fn status_transitions_are_enforced() {
        let db = test_db();
        let ticket = create(&db, serde_json::json!({}));
        let id = ticket["data"]["id"].as_str().unwrap().to_string();

        // received → delivered skips the lifecycle
        assert!(set_status_impl(&db, &id, "delivered", true).is_err());

        set_status_impl(&db, &id, "in_repair", false).expect("to in_repair");
        set_status_impl(&db, &id, "ready", false).expect("to ready");

        // Unsettled delivery needs the override
        let err = set_status_impl(&db, &id, "delivered", false).expect_err("unsettled");
        assert!(err.contains("not settled"));

        let delivered = set_status_impl(&db, &id, "delivered", true).expect("override");
        assert_eq!(delivered["data"]["status"], "delivered");
        assert!(delivered["data"]["deliveredAt"].is_string());

        // Terminal state
        assert!(set_status_impl(&db, &id, "in_repair", false).is_err());
    }

    #[test]
    fn settled_ticket_delivers_without_override() {
        let db = test_db();
        let ticket = create(&db, serde_json::json!({ "paidAmount": 10.0 }));
        let id = ticket["data"]["id"].as_str().unwrap().to_string();
        set_status_impl(&db, &id, "in_repair", false).unwrap();
        set_status_impl(&db, &id, "ready", false).unwrap();
        set_status_impl(&db, &id, "delivered", false).expect("settled delivery");
    }

    #[test]
    fn list_filters_by_status_and_search() {
        let db = test_db();
        let a = create(&db, serde_json::json!({ "device": "Iron" }));
        create(&db, serde_json::json!({ "device": "Mixer" }));
        set_status_impl(&db, a["data"]["id"].as_str().unwrap(), "in_repair", false).unwrap();

        let in_repair =
            list_tickets_impl(&db, &serde_json::json!({ "status": "in_repair" })).expect("list");
        assert_eq!(in_repair["total"], 1);
        assert_eq!(in_repair["items"][0]["device"], "Iron");

        let searched =
            list_tickets_impl(&db, &serde_json::json!({ "search": "mixer" })).expect("list");
        assert_eq!(searched["total"], 1);
    }

    #[test]
    fn whatsapp_link_embeds_ticket_number() {
        let db = test_db();
        let ticket = create(&db, serde_json::json!({}));
        let id = ticket["data"]["id"].as_str().unwrap().to_string();
        let link = whatsapp_link_impl(&db, &id).expect("link");
        assert!(link["link"].as_str().unwrap().starts_with("https://wa.me/791234567?text="));
        assert!(link["message"].as_str().unwrap().contains('1'));
    }
}
