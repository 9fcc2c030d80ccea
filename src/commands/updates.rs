//! Application update commands (tauri-plugin-updater).
//!
//! State machine persisted in local_settings ("updates"/"state"):
//! checking → available → downloading → ready → installing. Errors land in
//! the same blob so the UI renders one source of truth.

use serde_json::Value;
use tauri::Emitter;
use tauri_plugin_updater::UpdaterExt;
use tracing::{info, warn};

use crate::{db, UpdaterRuntimeState};

fn default_update_state() -> Value {
    serde_json::json!({
        "checking": false,
        "available": false,
        "downloading": false,
        "ready": false,
        "error": null,
        "progress": 0,
        "updateInfo": null,
        "channel": "stable",
    })
}

pub(crate) fn read_update_state(db: &db::DbState) -> Result<Value, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    Ok(db::get_setting(&conn, "updates", "state")
        .and_then(|raw| serde_json::from_str(&raw).ok())
        .unwrap_or_else(default_update_state))
}

pub(crate) fn write_update_state(db: &db::DbState, state: &Value) -> Result<(), String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    db::set_setting(&conn, "updates", "state", &state.to_string())
}

fn patch_state(state: &mut Value, patch: &[(&str, Value)]) {
    if let Some(obj) = state.as_object_mut() {
        for (key, value) in patch {
            obj.insert(key.to_string(), value.clone());
        }
    }
}

fn update_info_from_release(update: &tauri_plugin_updater::Update) -> Value {
    serde_json::json!({
        "version": update.version,
        "currentVersion": update.current_version,
        "notes": update.body,
        "date": update.date.map(|d| d.to_string()),
    })
}

fn parse_update_channel_payload(arg0: Option<Value>) -> String {
    let raw = match arg0 {
        Some(Value::Object(obj)) => {
            let payload = Value::Object(obj);
            crate::value_str(
                &payload,
                &["channel", "updateChannel", "update_channel", "arg0"],
            )
        }
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        _ => None,
    };

    raw.unwrap_or_else(|| "stable".to_string()).to_lowercase()
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

#[tauri::command]
pub async fn update_get_state(db: tauri::State<'_, db::DbState>) -> Result<Value, String> {
    read_update_state(&db)
}

#[tauri::command]
pub async fn update_check(
    db: tauri::State<'_, db::DbState>,
    app: tauri::AppHandle,
    updater_runtime: tauri::State<'_, UpdaterRuntimeState>,
) -> Result<Value, String> {
    let mut state = read_update_state(&db)?;
    patch_state(
        &mut state,
        &[
            ("checking", serde_json::json!(true)),
            ("available", serde_json::json!(false)),
            ("downloading", serde_json::json!(false)),
            ("ready", serde_json::json!(false)),
            ("error", Value::Null),
            ("progress", serde_json::json!(0)),
        ],
    );
    write_update_state(&db, &state)?;
    let _ = app.emit("update_checking", serde_json::json!({}));

    if let Ok(mut bytes) = updater_runtime.downloaded_bytes.lock() {
        *bytes = None;
    }

    let fail = |db: &db::DbState, mut state: Value, message: String| -> Result<Value, String> {
        warn!(error = %message, "Update check failed");
        patch_state(
            &mut state,
            &[
                ("checking", serde_json::json!(false)),
                ("error", serde_json::json!(message.clone())),
                ("updateInfo", Value::Null),
            ],
        );
        write_update_state(db, &state)?;
        let _ = app.emit("update_error", serde_json::json!({ "message": message }));
        Ok(state)
    };

    match crate::updater_manifest_is_reachable().await {
        Ok(true) => {}
        Ok(false) => {
            if let Ok(mut pending) = updater_runtime.pending_update.lock() {
                *pending = None;
            }
            return fail(&db, state, "Updater endpoint is unreachable".into());
        }
        Err(error) => {
            if let Ok(mut pending) = updater_runtime.pending_update.lock() {
                *pending = None;
            }
            return fail(&db, state, format!("Failed to reach updater manifest: {error}"));
        }
    }

    let updater = match app.updater() {
        Ok(updater) => updater,
        Err(error) => return fail(&db, state, format!("Failed to initialize updater: {error}")),
    };

    match updater.check().await {
        Ok(Some(update)) => {
            let update_info = update_info_from_release(&update);
            if let Ok(mut pending) = updater_runtime.pending_update.lock() {
                *pending = Some(update);
            }
            patch_state(
                &mut state,
                &[
                    ("checking", serde_json::json!(false)),
                    ("available", serde_json::json!(true)),
                    ("updateInfo", update_info.clone()),
                ],
            );
            write_update_state(&db, &state)?;
            info!(version = %update_info["version"], "Update available");
            let _ = app.emit("update_available", update_info);
            Ok(state)
        }
        Ok(None) => {
            if let Ok(mut pending) = updater_runtime.pending_update.lock() {
                *pending = None;
            }
            patch_state(
                &mut state,
                &[
                    ("checking", serde_json::json!(false)),
                    ("available", serde_json::json!(false)),
                    ("updateInfo", Value::Null),
                ],
            );
            write_update_state(&db, &state)?;
            let _ = app.emit("update_not_available", serde_json::json!({}));
            Ok(state)
        }
        Err(error) => fail(&db, state, format!("Update check failed: {error}")),
    }
}

#[tauri::command]
pub async fn update_download(
    db: tauri::State<'_, db::DbState>,
    app: tauri::AppHandle,
    updater_runtime: tauri::State<'_, UpdaterRuntimeState>,
) -> Result<Value, String> {
    let update = {
        let pending = updater_runtime
            .pending_update
            .lock()
            .map_err(|e| e.to_string())?;
        pending.clone().ok_or("No update available to download")?
    };

    let mut state = read_update_state(&db)?;
    patch_state(
        &mut state,
        &[
            ("downloading", serde_json::json!(true)),
            ("progress", serde_json::json!(0)),
            ("error", Value::Null),
        ],
    );
    write_update_state(&db, &state)?;

    let progress_app = app.clone();
    let mut downloaded: u64 = 0;
    let bytes = update
        .download(
            move |chunk, total| {
                downloaded += chunk as u64;
                let percent = total
                    .map(|t| ((downloaded as f64 / t as f64) * 100.0).min(100.0))
                    .unwrap_or(0.0);
                let _ = progress_app.emit(
                    "update_download_progress",
                    serde_json::json!({ "percent": percent, "downloaded": downloaded, "total": total }),
                );
            },
            || {
                info!("Update download finished");
            },
        )
        .await
        .map_err(|e| {
            let _ = app.emit(
                "update_error",
                serde_json::json!({ "message": format!("Download failed: {e}") }),
            );
            format!("Download failed: {e}")
        })?;

    {
        let mut stored = updater_runtime
            .downloaded_bytes
            .lock()
            .map_err(|e| e.to_string())?;
        *stored = Some(bytes);
    }

    patch_state(
        &mut state,
        &[
            ("downloading", serde_json::json!(false)),
            ("ready", serde_json::json!(true)),
            ("progress", serde_json::json!(100)),
        ],
    );
    write_update_state(&db, &state)?;
    let _ = app.emit("update_ready", serde_json::json!({}));
    Ok(state)
}

#[tauri::command]
pub async fn update_cancel_download(
    db: tauri::State<'_, db::DbState>,
    app: tauri::AppHandle,
    updater_runtime: tauri::State<'_, UpdaterRuntimeState>,
) -> Result<Value, String> {
    if let Ok(mut bytes) = updater_runtime.downloaded_bytes.lock() {
        *bytes = None;
    }
    let mut state = read_update_state(&db)?;
    patch_state(
        &mut state,
        &[
            ("downloading", serde_json::json!(false)),
            ("ready", serde_json::json!(false)),
            ("progress", serde_json::json!(0)),
        ],
    );
    write_update_state(&db, &state)?;
    let _ = app.emit("update_cancelled", serde_json::json!({}));
    Ok(state)
}

#[tauri::command]
pub async fn update_install(
    db: tauri::State<'_, db::DbState>,
    app: tauri::AppHandle,
    updater_runtime: tauri::State<'_, UpdaterRuntimeState>,
) -> Result<Value, String> {
    let update = {
        let pending = updater_runtime
            .pending_update
            .lock()
            .map_err(|e| e.to_string())?;
        pending.clone().ok_or("No update pending installation")?
    };
    let bytes = {
        let stored = updater_runtime
            .downloaded_bytes
            .lock()
            .map_err(|e| e.to_string())?;
        stored.clone().ok_or("Update has not been downloaded")?
    };

    info!("Installing update");
    let _ = app.emit("update_installing", serde_json::json!({}));

    update
        .install(bytes)
        .map_err(|e| format!("Install failed: {e}"))?;

    if let Ok(mut pending) = updater_runtime.pending_update.lock() {
        *pending = None;
    }
    if let Ok(mut stored) = updater_runtime.downloaded_bytes.lock() {
        *stored = None;
    }

    let mut state = default_update_state();
    if let Some(channel) = read_update_state(&db)?.get("channel").cloned() {
        patch_state(&mut state, &[("channel", channel)]);
    }
    write_update_state(&db, &state)?;

    let _ = app.emit(
        "app_restart_required",
        serde_json::json!({ "source": "updater" }),
    );
    Ok(serde_json::json!({ "success": true }))
}

#[tauri::command]
pub async fn update_set_channel(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    let channel = parse_update_channel_payload(arg0);
    if !matches!(channel.as_str(), "stable" | "beta") {
        return Err(format!("Unknown update channel: {channel}"));
    }
    let mut state = read_update_state(&db)?;
    patch_state(&mut state, &[("channel", serde_json::json!(channel))]);
    write_update_state(&db, &state)?;
    Ok(state)
}
