//! Authentication commands — thin wrappers over the auth module.

use serde_json::Value;

use crate::{auth, db};

#[tauri::command]
pub async fn auth_login(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
    auth_state: tauri::State<'_, auth::AuthState>,
) -> Result<Value, String> {
    auth::login(arg0, &db, &auth_state)
}

#[tauri::command]
pub async fn auth_logout(auth_state: tauri::State<'_, auth::AuthState>) -> Result<Value, String> {
    auth::logout(&auth_state);
    Ok(serde_json::json!({ "success": true }))
}

#[tauri::command]
pub async fn auth_get_current_session(
    auth_state: tauri::State<'_, auth::AuthState>,
) -> Result<Value, String> {
    Ok(auth::get_session_json(&auth_state))
}

#[tauri::command]
pub async fn auth_validate_session(
    auth_state: tauri::State<'_, auth::AuthState>,
) -> Result<Value, String> {
    Ok(auth::validate_session(&auth_state))
}

#[tauri::command]
pub async fn auth_has_permission(
    arg0: Option<Value>,
    auth_state: tauri::State<'_, auth::AuthState>,
) -> Result<Value, String> {
    let permission = crate::payload_arg0_as_string(arg0, &["permission", "perm", "value"]);
    Ok(serde_json::json!(auth::has_permission(
        &auth_state,
        permission.as_deref()
    )))
}

#[tauri::command]
pub async fn auth_has_any_permission(
    arg0: Option<Value>,
    auth_state: tauri::State<'_, auth::AuthState>,
) -> Result<Value, String> {
    let permissions: Option<Vec<String>> = match arg0 {
        Some(Value::Array(items)) => Some(
            items
                .into_iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
        ),
        Some(Value::Object(obj)) => obj
            .get("permissions")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            }),
        _ => None,
    };
    Ok(serde_json::json!(auth::has_any_permission(
        &auth_state,
        permissions.as_deref()
    )))
}

#[tauri::command]
pub async fn auth_get_session_stats(
    auth_state: tauri::State<'_, auth::AuthState>,
) -> Result<Value, String> {
    Ok(auth::get_session_stats(&auth_state))
}

#[tauri::command]
pub async fn auth_setup_pin(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    auth::setup_pin(arg0, &db)
}

#[tauri::command]
pub async fn auth_track_activity(
    auth_state: tauri::State<'_, auth::AuthState>,
) -> Result<Value, String> {
    auth::track_activity(&auth_state);
    Ok(serde_json::json!({ "success": true }))
}

#[tauri::command]
pub async fn auth_get_current_user(
    auth_state: tauri::State<'_, auth::AuthState>,
) -> Result<Value, String> {
    Ok(auth::get_current_user(&auth_state))
}
