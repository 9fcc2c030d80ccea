//! Print and label commands: job queue access, label batches, and printer
//! profile management.

use serde_json::Value;

use crate::{db, payload_arg0_as_string, print, printers, value_str};

fn value_to_string(value: Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim().to_string();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed)
            }
        }
        _ => None,
    }
}

struct LabelPrintArgs {
    request: Value,
    printer_id: Option<String>,
}

fn parse_label_print_payload(arg0: Option<Value>, arg1: Option<Value>) -> LabelPrintArgs {
    let arg1_printer_id = arg1.and_then(value_to_string);
    match arg0 {
        Some(Value::Object(mut obj)) => {
            let payload = Value::Object(obj.clone());
            let mut printer_id = value_str(&payload, &["printerId", "printer_id"]);
            if let Some(from_arg1) = arg1_printer_id {
                printer_id = Some(from_arg1);
            }

            if let Some(request) = obj.remove("request") {
                return LabelPrintArgs {
                    request,
                    printer_id,
                };
            }

            obj.remove("printerId");
            obj.remove("printer_id");
            LabelPrintArgs {
                request: Value::Object(obj),
                printer_id,
            }
        }
        Some(request) => LabelPrintArgs {
            request,
            printer_id: arg1_printer_id,
        },
        None => LabelPrintArgs {
            request: serde_json::json!({}),
            printer_id: arg1_printer_id,
        },
    }
}

// ---------------------------------------------------------------------------
// Label commands
// ---------------------------------------------------------------------------

/// Print one product label. The request is either `{ productId }` (label
/// built from the catalog row) or a full label payload.
#[tauri::command]
pub async fn label_print(
    arg0: Option<Value>,
    arg1: Option<Value>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    let parsed = parse_label_print_payload(arg0, arg1);

    let product_id = value_str(&parsed.request, &["productId", "product_id", "id"]);
    match product_id {
        // Enqueue by id; the worker loads the product row itself.
        Some(id) if parsed.request.as_object().map(|o| o.len()) == Some(1) => {
            print::enqueue_print_job(&db, "product_label", &id, parsed.printer_id.as_deref())
        }
        _ => {
            let entity_id = product_id.unwrap_or_else(|| format!("label-{}", uuid::Uuid::new_v4()));
            print::enqueue_print_job_with_payload(
                &db,
                "product_label",
                &entity_id,
                parsed.printer_id.as_deref(),
                Some(&parsed.request),
            )
        }
    }
}

/// Print a batch of labels: `{ items: [...], labelType, printerId }`.
#[tauri::command]
pub async fn label_print_batch(
    arg0: Option<Value>,
    arg1: Option<Value>,
    arg2: Option<Value>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    let arg1_label_type = arg1.clone().and_then(value_to_string);
    let arg2_printer_id = arg2.and_then(value_to_string);

    let (items, label_type, printer_id) = match arg0 {
        Some(Value::Object(mut obj)) => {
            let payload = Value::Object(obj.clone());
            let items = obj.remove("items").unwrap_or_else(|| serde_json::json!([]));
            let label_type = value_str(&payload, &["labelType", "label_type", "type"])
                .or(arg1_label_type)
                .unwrap_or_else(|| "barcode".to_string());
            let printer_id = value_str(&payload, &["printerId", "printer_id"]).or(arg2_printer_id);
            (items, label_type, printer_id)
        }
        Some(items) => (
            items,
            arg1_label_type.unwrap_or_else(|| "barcode".to_string()),
            arg2_printer_id,
        ),
        None => (
            serde_json::json!([]),
            arg1_label_type.unwrap_or_else(|| "barcode".to_string()),
            arg2_printer_id,
        ),
    };

    if items.as_array().map(|a| a.is_empty()).unwrap_or(true) {
        return Err("Label batch is empty".into());
    }

    let batch_id = format!("batch-{}", uuid::Uuid::new_v4());
    let payload = serde_json::json!({ "items": items, "labelType": label_type });
    print::enqueue_print_job_with_payload(
        &db,
        "product_label",
        &batch_id,
        printer_id.as_deref(),
        Some(&payload),
    )
}

// ---------------------------------------------------------------------------
// Job queue commands
// ---------------------------------------------------------------------------

#[tauri::command]
pub async fn print_list_jobs(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    let status = payload_arg0_as_string(arg0, &["status"])
        .filter(|s| matches!(s.as_str(), "pending" | "printing" | "printed" | "failed"));
    print::list_print_jobs(&db, status.as_deref())
}

#[tauri::command]
pub async fn print_get_job_file(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    let job_id =
        payload_arg0_as_string(arg0, &["jobId", "job_id", "id"]).ok_or("Missing jobId")?;
    print::get_job_file(&db, &job_id)
}

#[tauri::command]
pub async fn print_reprint_job(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    let job_id =
        payload_arg0_as_string(arg0, &["jobId", "job_id", "id"]).ok_or("Missing jobId")?;
    print::reprint_job(&db, &job_id)
}

// ---------------------------------------------------------------------------
// Printer profile commands
// ---------------------------------------------------------------------------

#[tauri::command]
pub async fn printer_list_system_printers() -> Result<Value, String> {
    Ok(serde_json::json!(printers::list_system_printers()))
}

#[tauri::command]
pub async fn printer_create_profile(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    let profile = arg0.ok_or("Missing profile payload")?;
    printers::create_profile(&db, &profile)
}

#[tauri::command]
pub async fn printer_update_profile(
    arg0: Option<Value>,
    arg1: Option<Value>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    let base = arg0.unwrap_or_else(|| serde_json::json!({}));
    let profile_id = payload_arg0_as_string(Some(base.clone()), &["profileId", "profile_id", "id"])
        .ok_or("Missing profileId")?;
    let updates = arg1.unwrap_or(base);
    printers::update_profile(&db, &profile_id, &updates)
}

#[tauri::command]
pub async fn printer_delete_profile(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    let profile_id = payload_arg0_as_string(arg0, &["profileId", "profile_id", "id"])
        .ok_or("Missing profileId")?;
    printers::delete_profile(&db, &profile_id)
}

#[tauri::command]
pub async fn printer_list_profiles(db: tauri::State<'_, db::DbState>) -> Result<Value, String> {
    printers::list_profiles(&db)
}

#[tauri::command]
pub async fn printer_get_profile(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    let profile_id = payload_arg0_as_string(arg0, &["profileId", "profile_id", "id"])
        .ok_or("Missing profileId")?;
    printers::get_profile(&db, &profile_id)
}

#[tauri::command]
pub async fn printer_set_default_profile(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    let profile_id = payload_arg0_as_string(arg0, &["profileId", "profile_id", "id"])
        .ok_or("Missing profileId")?;
    printers::set_default_profile(&db, &profile_id)
}

#[tauri::command]
pub async fn printer_get_default_profile(
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    Ok(printers::get_default_profile(&db)?.unwrap_or(Value::Null))
}

/// Push a short test page through a profile, bypassing the job queue.
#[tauri::command]
pub async fn printer_test(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    let profile_id = payload_arg0_as_string(arg0, &["profileId", "profile_id", "id"]);
    let profile = printers::resolve_profile(&db, profile_id.as_deref())?
        .ok_or("No printer profile configured")?;

    let mut builder = crate::escpos::EscPosBuilder::new();
    builder
        .init()
        .center()
        .bold(true)
        .text("MATJAR TEST PRINT\n")
        .bold(false)
        .separator()
        .left()
        .text("ABCDEFGHIJKLMNOPQRSTUVWXYZ\n")
        .text("0123456789 !@#$%^&*()\n")
        .separator()
        .center()
        .text("-- End of Test --\n")
        .feed(4)
        .cut();

    let spool_dir = db.db_path.parent().unwrap_or(std::path::Path::new(".")).join("spool");
    printers::dispatch_raw(&profile, &builder.build(), &spool_dir)?;
    Ok(serde_json::json!({ "success": true }))
}
