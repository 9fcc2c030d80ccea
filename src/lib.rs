#![recursion_limit = "256"]

//! Matjar Retail Suite - Tauri v2 Backend
//!
//! This module registers all IPC command handlers that the frontend calls
//! via `@tauri-apps/api/core::invoke()`. The backend owns the local SQLite
//! store, the sync engine against the hosted backend, the print/label
//! pipeline, and the serial barcode scanner.

use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// App start time for uptime calculation (epoch seconds).
pub(crate) static APP_START_EPOCH: AtomicU64 = AtomicU64::new(0);

mod api;
mod auth;
mod commands;
mod data_helpers;
mod db;
mod diagnostics;
mod escpos;
mod itemdiff;
mod labels;
mod print;
mod printers;
mod query;
mod receipt_renderer;
mod scanner;
mod serial;
mod storage;
mod sync;
mod whatsapp;

const UPDATER_MANIFEST_URL: &str =
    "https://releases.matjar.app/desktop/latest.json";
const EXTERNAL_URL_MAX_LEN: usize = 2048;
const ALLOWED_EXTERNAL_HOSTS: &[&str] = &[
    "wa.me",
    "api.whatsapp.com",
    "maps.google.com",
    "www.google.com",
    "matjar.app",
    "dashboard.matjar.app",
    "shop.matjar.app",
];
const ALLOWED_EXTERNAL_HOST_SUFFIXES: &[&str] = &[".whatsapp.com", ".google.com", ".matjar.app"];

#[derive(Default)]
struct UpdaterRuntimeState {
    pending_update: std::sync::Mutex<Option<tauri_plugin_updater::Update>>,
    downloaded_bytes: std::sync::Mutex<Option<Vec<u8>>>,
}

pub(crate) fn value_str(v: &serde_json::Value, keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Some(s) = v.get(*key).and_then(|x| x.as_str()) {
            let trimmed = s.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}

pub(crate) fn value_f64(v: &serde_json::Value, keys: &[&str]) -> Option<f64> {
    for key in keys {
        if let Some(n) = v.get(*key).and_then(|x| x.as_f64()) {
            return Some(n);
        }
    }
    None
}

pub(crate) fn value_i64(v: &serde_json::Value, keys: &[&str]) -> Option<i64> {
    for key in keys {
        if let Some(n) = v.get(*key).and_then(|x| x.as_i64()) {
            return Some(n);
        }
    }
    None
}

pub(crate) use data_helpers::{
    normalize_phone, payload_arg0_as_string, read_local_json, validate_date_not_future,
    validate_external_url, write_local_json,
};

// ---------------------------------------------------------------------------
// Clipboard helpers (used by system_ui commands)
// ---------------------------------------------------------------------------

pub(crate) fn read_system_clipboard_text() -> Result<String, String> {
    #[cfg(target_os = "windows")]
    {
        let output = std::process::Command::new("powershell")
            .args([
                "-NoProfile",
                "-NonInteractive",
                "-Command",
                "Get-Clipboard -Raw",
            ])
            .output()
            .map_err(|e| format!("read clipboard: {e}"))?;
        if !output.status.success() {
            let err = String::from_utf8_lossy(&output.stderr).to_string();
            return Err(format!("read clipboard failed: {err}"));
        }
        Ok(String::from_utf8_lossy(&output.stdout)
            .trim_end_matches(['\r', '\n'])
            .to_string())
    }
    #[cfg(not(target_os = "windows"))]
    {
        Err("Clipboard read is not implemented on this platform".into())
    }
}

pub(crate) fn write_system_clipboard_text(text: &str) -> Result<(), String> {
    #[cfg(target_os = "windows")]
    {
        use std::io::Write;
        use std::process::Stdio;
        let mut child = std::process::Command::new("powershell")
            .args([
                "-NoProfile",
                "-NonInteractive",
                "-Command",
                "$text = [Console]::In.ReadToEnd(); Set-Clipboard -Value $text",
            ])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| format!("write clipboard spawn: {e}"))?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(text.as_bytes())
                .map_err(|e| format!("write clipboard stdin: {e}"))?;
        }
        let output = child
            .wait_with_output()
            .map_err(|e| format!("write clipboard wait: {e}"))?;
        if !output.status.success() {
            let err = String::from_utf8_lossy(&output.stderr).to_string();
            return Err(format!("write clipboard failed: {err}"));
        }
        Ok(())
    }
    #[cfg(not(target_os = "windows"))]
    {
        let _ = text;
        Err("Clipboard write is not implemented on this platform".into())
    }
}

// ---------------------------------------------------------------------------
// Updater manifest probe
// ---------------------------------------------------------------------------

async fn updater_manifest_is_reachable() -> Result<bool, String> {
    let client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::limited(10))
        .build()
        .map_err(|e| format!("updater manifest client: {e}"))?;

    let response = match client.head(UPDATER_MANIFEST_URL).send().await {
        Ok(resp) => resp,
        Err(_) => client
            .get(UPDATER_MANIFEST_URL)
            .send()
            .await
            .map_err(|e| format!("updater manifest request: {e}"))?,
    };

    Ok(response.status().is_success())
}

// ============================================================================
// App entry point
// ============================================================================

pub fn run() {
    // Record start time for uptime tracking
    let epoch = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    APP_START_EPOCH.store(epoch, Ordering::Relaxed);

    // Initialize structured logging (console + rolling file)
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,matjar_lib=debug"));

    // Prune old log files before setting up the appender
    diagnostics::prune_old_logs();

    // Rolling file appender: creates daily log files in the logs directory
    let log_dir = diagnostics::get_log_dir();
    std::fs::create_dir_all(&log_dir).ok();

    let file_appender = tracing_appender::rolling::daily(&log_dir, "matjar");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true);
    let console_layer = fmt::layer().with_target(true);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    // Keep the guard alive for the lifetime of the app — dropping it flushes logs.
    // We leak it intentionally since the app runs until process exit.
    std::mem::forget(_guard);

    info!("Starting Matjar v{}", env!("CARGO_PKG_VERSION"));

    tauri::Builder::default()
        .plugin(tauri_plugin_updater::Builder::new().build())
        .setup(|app| {
            use std::sync::Arc;
            use tauri::Manager;

            let app_data_dir = app
                .path()
                .app_data_dir()
                .expect("Failed to get app data dir");

            // Main DB connection for Tauri commands
            let db_state = db::init(&app_data_dir).expect("Failed to initialize database");
            app.manage(db_state);

            // Auth + updater state
            app.manage(auth::AuthState::new());
            app.manage(UpdaterRuntimeState::default());

            // Sync state (shared between commands and background loop)
            let sync_state = Arc::new(sync::SyncState::new());
            app.manage(sync_state.clone());

            // Second DB connection for the background sync loop
            let db_for_sync =
                Arc::new(db::init(&app_data_dir).expect("Failed to init sync database"));

            // Start background sync loop (15s interval)
            sync::start_sync_loop(app.handle().clone(), db_for_sync, sync_state, 15);

            // Third DB connection for the background print worker
            let db_for_print =
                Arc::new(db::init(&app_data_dir).expect("Failed to init print database"));

            // Start background print worker (5s interval)
            print::start_print_worker(db_for_print, app_data_dir.clone(), 5);

            // Fourth DB connection for the serial scanner's catalog matches,
            // managed so the scanner command can hand it to the reader task.
            let db_for_scanner =
                Arc::new(db::init(&app_data_dir).expect("Failed to init scanner database"));
            app.manage(db_for_scanner);

            info!("Database, auth, sync, and print worker registered");
            Ok(())
        })
        .invoke_handler(tauri::generate_handler![
            // App lifecycle
            commands::runtime::app_shutdown,
            commands::runtime::app_restart,
            commands::runtime::app_get_version,
            commands::runtime::system_get_info,
            commands::runtime::system_open_external_url,
            commands::runtime::whatsapp_open_link,
            // Auth
            commands::auth::auth_login,
            commands::auth::auth_logout,
            commands::auth::auth_get_current_session,
            commands::auth::auth_validate_session,
            commands::auth::auth_has_permission,
            commands::auth::auth_has_any_permission,
            commands::auth::auth_get_session_stats,
            commands::auth::auth_setup_pin,
            commands::auth::auth_track_activity,
            commands::auth::auth_get_current_user,
            // Settings
            commands::settings::get_settings,
            commands::settings::settings_is_configured,
            commands::settings::settings_get,
            commands::settings::settings_set,
            commands::settings::settings_update_local,
            commands::settings::settings_update_store_credentials,
            commands::settings::settings_get_backend_url,
            commands::settings::settings_test_connection,
            commands::settings::settings_clear_connection,
            commands::settings::settings_factory_reset,
            commands::settings::settings_get_language,
            commands::settings::settings_set_language,
            commands::settings::store_config_get_full,
            commands::settings::store_config_get,
            // Catalog
            commands::products::product_list,
            commands::products::product_get,
            commands::products::product_lookup_by_code,
            commands::products::product_search,
            commands::products::product_create,
            commands::products::product_update,
            commands::products::product_delete,
            commands::products::product_adjust_quantity,
            commands::products::catalog_snapshot,
            // Customers
            commands::customers::customer_list,
            commands::customers::customer_lookup_by_phone,
            commands::customers::customer_lookup_by_id,
            commands::customers::customer_search,
            commands::customers::customer_create,
            commands::customers::customer_update,
            // Maintenance
            commands::maintenance::maintenance_list,
            commands::maintenance::maintenance_get,
            commands::maintenance::maintenance_create,
            commands::maintenance::maintenance_update,
            commands::maintenance::maintenance_set_status,
            commands::maintenance::maintenance_delete,
            commands::maintenance::maintenance_print,
            commands::maintenance::maintenance_whatsapp_link,
            // Quotations
            commands::quotations::quotation_list,
            commands::quotations::quotation_get,
            commands::quotations::quotation_create,
            commands::quotations::quotation_update,
            commands::quotations::quotation_update_items,
            commands::quotations::quotation_set_status,
            commands::quotations::quotation_delete,
            commands::quotations::quotation_print,
            commands::quotations::quotation_whatsapp_link,
            // Legal cases
            commands::legal::legal_case_list,
            commands::legal::legal_case_get,
            commands::legal::legal_case_create,
            commands::legal::legal_case_update,
            commands::legal::legal_case_close,
            commands::legal::legal_payment_record,
            commands::legal::legal_payment_list,
            commands::legal::legal_payment_delete,
            // Shop receipts
            commands::receipts::receipt_list,
            commands::receipts::receipt_get,
            commands::receipts::receipt_create,
            commands::receipts::receipt_void,
            commands::receipts::receipt_daily_summary,
            commands::receipts::receipt_print,
            // Sales invoices
            commands::invoices::invoice_list,
            commands::invoices::invoice_get,
            commands::invoices::invoice_create,
            commands::invoices::invoice_update,
            commands::invoices::invoice_update_items,
            commands::invoices::invoice_set_posted,
            commands::invoices::invoice_delete,
            commands::invoices::invoice_print,
            commands::invoices::invoice_totals_summary,
            // Storefront
            commands::storefront::storefront_snapshot,
            commands::storefront::storefront_browse,
            commands::storefront::storefront_product,
            commands::storefront::storefront_whatsapp_link,
            // Sync
            commands::sync::sync_get_status,
            commands::sync::sync_get_network_status,
            commands::sync::sync_force,
            commands::sync::sync_retry_failed,
            commands::sync::sync_clear_failed,
            commands::sync::sync_prune_synced,
            commands::sync::api_fetch_from_backend,
            // Print / labels
            commands::print::label_print,
            commands::print::label_print_batch,
            commands::print::print_list_jobs,
            commands::print::print_get_job_file,
            commands::print::print_reprint_job,
            // Printer profiles
            commands::print::printer_list_system_printers,
            commands::print::printer_create_profile,
            commands::print::printer_update_profile,
            commands::print::printer_delete_profile,
            commands::print::printer_list_profiles,
            commands::print::printer_get_profile,
            commands::print::printer_set_default_profile,
            commands::print::printer_get_default_profile,
            commands::print::printer_test,
            // Serial ports / scanner
            commands::hardware::serial_list_ports,
            commands::hardware::serial_open,
            commands::hardware::serial_close,
            commands::hardware::serial_read,
            commands::hardware::serial_write,
            commands::hardware::scanner_serial_start,
            commands::hardware::scanner_serial_stop,
            commands::hardware::scanner_serial_status,
            commands::hardware::scanner_match_code,
            // Utility compatibility
            commands::system_ui::clipboard_read_text,
            commands::system_ui::clipboard_write_text,
            commands::system_ui::show_notification,
            // Window
            commands::system_ui::window_get_state,
            commands::system_ui::window_minimize,
            commands::system_ui::window_maximize,
            commands::system_ui::window_close,
            commands::system_ui::window_toggle_fullscreen,
            // Database / diagnostics
            commands::diagnostics::database_health_check,
            commands::diagnostics::database_get_stats,
            commands::diagnostics::database_clear_operational_data,
            commands::diagnostics::diagnostics_get_about,
            commands::diagnostics::diagnostics_get_system_health,
            commands::diagnostics::diagnostics_export,
            commands::diagnostics::diagnostics_open_export_dir,
            // Updates
            commands::updates::update_get_state,
            commands::updates::update_check,
            commands::updates::update_download,
            commands::updates::update_cancel_download,
            commands::updates::update_install,
            commands::updates::update_set_channel,
        ])
        .run(tauri::generate_context!())
        .expect("error while running Matjar");
}
