//! Local SQLite database layer for Matjar.
//!
//! Uses rusqlite with WAL mode. The local database is the read authority for
//! every screen; mutations are mirrored to the hosted backend through the
//! sync queue. Provides schema migrations, settings helpers, document number
//! counters, and managed state for use across Tauri commands.

use rusqlite::{params, Connection};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{error, info, warn};

/// Tauri managed state holding the database connection.
pub struct DbState {
    pub conn: Mutex<Connection>,
    pub db_path: PathBuf,
}

/// Current schema version. Bump when adding new migrations.
const CURRENT_SCHEMA_VERSION: i32 = 7;

/// Initialize the database at `{app_data_dir}/matjar.db`.
///
/// Creates the directory if needed, opens the connection, sets pragmas,
/// and runs any pending migrations. On corruption or open failure,
/// deletes the file and retries once.
pub fn init(app_data_dir: &Path) -> Result<DbState, String> {
    fs::create_dir_all(app_data_dir).map_err(|e| format!("Failed to create data dir: {e}"))?;

    let db_path = app_data_dir.join("matjar.db");
    info!("Opening database at {}", db_path.display());

    let conn = match open_and_configure(&db_path) {
        Ok(c) => c,
        Err(first_err) => {
            warn!(
                "Database open failed ({}), deleting and retrying once",
                first_err
            );
            if db_path.exists() {
                let _ = fs::remove_file(&db_path);
                // Also remove WAL/SHM files if present
                let wal = db_path.with_extension("db-wal");
                let shm = db_path.with_extension("db-shm");
                let _ = fs::remove_file(&wal);
                let _ = fs::remove_file(&shm);
            }
            open_and_configure(&db_path)
                .map_err(|e| format!("Database open failed after retry: {e}"))?
        }
    };

    run_migrations(&conn)?;

    info!("Database initialized (schema v{CURRENT_SCHEMA_VERSION})");

    Ok(DbState {
        conn: Mutex::new(conn),
        db_path,
    })
}

/// Open the database file and apply pragmas.
fn open_and_configure(path: &Path) -> Result<Connection, String> {
    let conn = Connection::open(path).map_err(|e| format!("sqlite open: {e}"))?;

    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )
    .map_err(|e| format!("pragma setup: {e}"))?;

    Ok(conn)
}

/// Run all pending migrations up to `CURRENT_SCHEMA_VERSION`.
fn run_migrations(conn: &Connection) -> Result<(), String> {
    // Ensure schema_version table exists first
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT DEFAULT (datetime('now'))
        );",
    )
    .map_err(|e| format!("create schema_version: {e}"))?;

    let current: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current >= CURRENT_SCHEMA_VERSION {
        info!("Database schema up to date (v{current})");
        return Ok(());
    }

    info!("Migrating database from v{current} to v{CURRENT_SCHEMA_VERSION}");

    if current < 1 {
        migrate_v1(conn)?;
    }
    if current < 2 {
        migrate_v2(conn)?;
    }
    if current < 3 {
        migrate_v3(conn)?;
    }
    if current < 4 {
        migrate_v4(conn)?;
    }
    if current < 5 {
        migrate_v5(conn)?;
    }
    if current < 6 {
        migrate_v6(conn)?;
    }
    if current < 7 {
        migrate_v7(conn)?;
    }

    Ok(())
}

/// Migration v1: Core tables — settings, catalog, customers, sync queue.
fn migrate_v1(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(
        "
        -- local_settings (category/key/value store)
        CREATE TABLE IF NOT EXISTS local_settings (
            id TEXT PRIMARY KEY DEFAULT (lower(hex(randomblob(16)))),
            setting_category TEXT NOT NULL,
            setting_key TEXT NOT NULL,
            setting_value TEXT NOT NULL,
            last_sync TEXT DEFAULT '',
            created_at TEXT DEFAULT (datetime('now')),
            updated_at TEXT DEFAULT (datetime('now')),
            UNIQUE(setting_category, setting_key)
        );

        -- products (catalog)
        CREATE TABLE IF NOT EXISTS products (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            barcode TEXT,
            shamel_no TEXT,
            category TEXT,
            unit TEXT DEFAULT 'pcs',
            purchase_price REAL NOT NULL DEFAULT 0,
            sale_price REAL NOT NULL DEFAULT 0,
            wholesale_price REAL NOT NULL DEFAULT 0,
            quantity REAL NOT NULL DEFAULT 0,
            origin TEXT,
            notes TEXT,
            image_url TEXT,
            is_active INTEGER NOT NULL DEFAULT 1,
            version INTEGER NOT NULL DEFAULT 1,
            sync_status TEXT NOT NULL DEFAULT 'pending',
            created_at TEXT DEFAULT (datetime('now')),
            updated_at TEXT DEFAULT (datetime('now'))
        );

        -- customers (shared party book)
        CREATE TABLE IF NOT EXISTS customers (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            phone TEXT,
            phone_norm TEXT,
            address TEXT,
            note TEXT,
            version INTEGER NOT NULL DEFAULT 1,
            sync_status TEXT NOT NULL DEFAULT 'pending',
            created_at TEXT DEFAULT (datetime('now')),
            updated_at TEXT DEFAULT (datetime('now'))
        );

        -- sync_queue (append-only)
        CREATE TABLE IF NOT EXISTS sync_queue (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            operation TEXT NOT NULL,
            payload TEXT NOT NULL,
            idempotency_key TEXT UNIQUE NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            retry_count INTEGER DEFAULT 0,
            max_retries INTEGER DEFAULT 5,
            last_error TEXT,
            created_at TEXT DEFAULT (datetime('now')),
            updated_at TEXT DEFAULT (datetime('now')),
            synced_at TEXT
        );

        -- staff_sessions (audit of local PIN logins)
        CREATE TABLE IF NOT EXISTS staff_sessions (
            id TEXT PRIMARY KEY,
            staff_id TEXT NOT NULL,
            pin_hash TEXT NOT NULL,
            role TEXT NOT NULL DEFAULT 'staff',
            login_time TEXT DEFAULT (datetime('now')),
            logout_time TEXT,
            is_active INTEGER DEFAULT 1
        );

        -- document number counters (ticket_no, invoice_no, ...)
        CREATE TABLE IF NOT EXISTS counters (
            name TEXT PRIMARY KEY,
            value INTEGER NOT NULL DEFAULT 0
        );

        -- Indexes
        CREATE INDEX IF NOT EXISTS idx_products_name ON products(name);
        CREATE INDEX IF NOT EXISTS idx_products_barcode ON products(barcode);
        CREATE INDEX IF NOT EXISTS idx_products_shamel_no ON products(shamel_no);
        CREATE INDEX IF NOT EXISTS idx_products_category ON products(category);
        CREATE INDEX IF NOT EXISTS idx_products_is_active ON products(is_active);
        CREATE INDEX IF NOT EXISTS idx_products_sync_status ON products(sync_status);
        CREATE UNIQUE INDEX IF NOT EXISTS idx_products_barcode_active
            ON products(barcode) WHERE barcode IS NOT NULL AND barcode != '' AND is_active = 1;
        CREATE UNIQUE INDEX IF NOT EXISTS idx_products_shamel_active
            ON products(shamel_no) WHERE shamel_no IS NOT NULL AND shamel_no != '' AND is_active = 1;
        CREATE INDEX IF NOT EXISTS idx_customers_phone_norm ON customers(phone_norm);
        CREATE INDEX IF NOT EXISTS idx_sync_queue_status ON sync_queue(status);
        CREATE INDEX IF NOT EXISTS idx_local_settings_cat_key ON local_settings(setting_category, setting_key);

        -- Record migration
        INSERT INTO schema_version (version) VALUES (1);
        ",
    )
    .map_err(|e| {
        error!("Migration v1 failed: {e}");
        format!("migration v1: {e}")
    })?;

    info!("Applied migration v1");
    Ok(())
}

/// Migration v2: Maintenance tickets.
fn migrate_v2(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(
        "
        -- maintenance_tickets (repair intake lifecycle)
        CREATE TABLE IF NOT EXISTS maintenance_tickets (
            id TEXT PRIMARY KEY,
            ticket_no INTEGER NOT NULL,
            customer_id TEXT,
            customer_name TEXT NOT NULL,
            customer_phone TEXT,
            device TEXT NOT NULL,
            fault TEXT NOT NULL,
            accessories TEXT,
            estimated_cost REAL NOT NULL DEFAULT 0,
            paid_amount REAL NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'received'
                CHECK (status IN ('received', 'in_repair', 'ready', 'delivered', 'rejected')),
            received_at TEXT NOT NULL,
            delivered_at TEXT,
            technician_notes TEXT,
            version INTEGER NOT NULL DEFAULT 1,
            sync_status TEXT NOT NULL DEFAULT 'pending',
            created_at TEXT DEFAULT (datetime('now')),
            updated_at TEXT DEFAULT (datetime('now')),
            FOREIGN KEY(customer_id) REFERENCES customers(id) ON DELETE SET NULL
        );

        CREATE INDEX IF NOT EXISTS idx_maintenance_status ON maintenance_tickets(status);
        CREATE INDEX IF NOT EXISTS idx_maintenance_received_at ON maintenance_tickets(received_at);
        CREATE INDEX IF NOT EXISTS idx_maintenance_customer_phone ON maintenance_tickets(customer_phone);
        CREATE UNIQUE INDEX IF NOT EXISTS idx_maintenance_ticket_no ON maintenance_tickets(ticket_no);

        -- Record migration
        INSERT INTO schema_version (version) VALUES (2);
        ",
    )
    .map_err(|e| {
        error!("Migration v2 failed: {e}");
        format!("migration v2: {e}")
    })?;

    info!("Applied migration v2 (maintenance_tickets)");
    Ok(())
}

/// Migration v3: Quotations.
fn migrate_v3(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS quotations (
            id TEXT PRIMARY KEY,
            quote_no INTEGER NOT NULL,
            customer_id TEXT,
            customer_name TEXT NOT NULL,
            customer_phone TEXT,
            quote_date TEXT NOT NULL,
            validity_days INTEGER NOT NULL DEFAULT 15,
            subtotal REAL NOT NULL DEFAULT 0,
            discount REAL NOT NULL DEFAULT 0,
            total REAL NOT NULL DEFAULT 0,
            notes TEXT,
            status TEXT NOT NULL DEFAULT 'draft'
                CHECK (status IN ('draft', 'sent', 'accepted', 'expired')),
            version INTEGER NOT NULL DEFAULT 1,
            sync_status TEXT NOT NULL DEFAULT 'pending',
            created_at TEXT DEFAULT (datetime('now')),
            updated_at TEXT DEFAULT (datetime('now')),
            FOREIGN KEY(customer_id) REFERENCES customers(id) ON DELETE SET NULL
        );

        CREATE TABLE IF NOT EXISTS quotation_items (
            id TEXT PRIMARY KEY,
            quotation_id TEXT NOT NULL,
            product_id TEXT,
            name TEXT NOT NULL,
            quantity REAL NOT NULL DEFAULT 1,
            unit_price REAL NOT NULL DEFAULT 0,
            line_total REAL NOT NULL DEFAULT 0,
            position INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(quotation_id) REFERENCES quotations(id) ON DELETE CASCADE
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_quotations_quote_no ON quotations(quote_no);
        CREATE INDEX IF NOT EXISTS idx_quotations_status ON quotations(status);
        CREATE INDEX IF NOT EXISTS idx_quotations_quote_date ON quotations(quote_date);
        CREATE INDEX IF NOT EXISTS idx_quotation_items_quotation ON quotation_items(quotation_id);

        -- Record migration
        INSERT INTO schema_version (version) VALUES (3);
        ",
    )
    .map_err(|e| {
        error!("Migration v3 failed: {e}");
        format!("migration v3: {e}")
    })?;

    info!("Applied migration v3 (quotations)");
    Ok(())
}

/// Migration v4: Legal cases and their payments.
fn migrate_v4(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS legal_cases (
            id TEXT PRIMARY KEY,
            case_no INTEGER NOT NULL,
            debtor_name TEXT NOT NULL,
            debtor_phone TEXT,
            principal_amount REAL NOT NULL,
            court TEXT,
            status TEXT NOT NULL DEFAULT 'open'
                CHECK (status IN ('open', 'in_court', 'settled', 'closed')),
            opened_at TEXT NOT NULL,
            closed_at TEXT,
            write_off_reason TEXT,
            notes TEXT,
            version INTEGER NOT NULL DEFAULT 1,
            sync_status TEXT NOT NULL DEFAULT 'pending',
            created_at TEXT DEFAULT (datetime('now')),
            updated_at TEXT DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS legal_case_payments (
            id TEXT PRIMARY KEY,
            case_id TEXT NOT NULL,
            amount REAL NOT NULL,
            paid_at TEXT NOT NULL,
            method TEXT NOT NULL DEFAULT 'cash'
                CHECK (method IN ('cash', 'card', 'transfer')),
            note TEXT,
            recorded_by TEXT,
            sync_status TEXT NOT NULL DEFAULT 'pending',
            created_at TEXT DEFAULT (datetime('now')),
            updated_at TEXT DEFAULT (datetime('now')),
            FOREIGN KEY(case_id) REFERENCES legal_cases(id) ON DELETE CASCADE
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_legal_cases_case_no ON legal_cases(case_no);
        CREATE INDEX IF NOT EXISTS idx_legal_cases_status ON legal_cases(status);
        CREATE INDEX IF NOT EXISTS idx_legal_case_payments_case ON legal_case_payments(case_id);
        CREATE INDEX IF NOT EXISTS idx_legal_case_payments_paid_at ON legal_case_payments(paid_at);

        -- Record migration
        INSERT INTO schema_version (version) VALUES (4);
        ",
    )
    .map_err(|e| {
        error!("Migration v4 failed: {e}");
        format!("migration v4: {e}")
    })?;

    info!("Applied migration v4 (legal cases)");
    Ok(())
}

/// Migration v5: Shop receipts.
fn migrate_v5(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS shop_receipts (
            id TEXT PRIMARY KEY,
            receipt_no INTEGER NOT NULL,
            kind TEXT NOT NULL CHECK (kind IN ('in', 'out')),
            party_name TEXT NOT NULL,
            amount REAL NOT NULL,
            method TEXT NOT NULL DEFAULT 'cash'
                CHECK (method IN ('cash', 'card', 'transfer')),
            reference TEXT,
            note TEXT,
            recorded_at TEXT NOT NULL,
            recorded_by TEXT,
            voided INTEGER NOT NULL DEFAULT 0,
            voided_at TEXT,
            void_reason TEXT,
            sync_status TEXT NOT NULL DEFAULT 'pending',
            created_at TEXT DEFAULT (datetime('now')),
            updated_at TEXT DEFAULT (datetime('now'))
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_shop_receipts_no ON shop_receipts(receipt_no);
        CREATE INDEX IF NOT EXISTS idx_shop_receipts_recorded_at ON shop_receipts(recorded_at);
        CREATE INDEX IF NOT EXISTS idx_shop_receipts_kind ON shop_receipts(kind);

        -- Record migration
        INSERT INTO schema_version (version) VALUES (5);
        ",
    )
    .map_err(|e| {
        error!("Migration v5 failed: {e}");
        format!("migration v5: {e}")
    })?;

    info!("Applied migration v5 (shop_receipts)");
    Ok(())
}

/// Migration v6: Sales invoices (shop + warehouse books).
fn migrate_v6(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS sales_invoices (
            id TEXT PRIMARY KEY,
            invoice_no INTEGER NOT NULL,
            source TEXT NOT NULL CHECK (source IN ('shop', 'warehouse')),
            customer_id TEXT,
            customer_name TEXT,
            customer_phone TEXT,
            invoice_date TEXT NOT NULL,
            subtotal REAL NOT NULL DEFAULT 0,
            discount REAL NOT NULL DEFAULT 0,
            total REAL NOT NULL DEFAULT 0,
            paid REAL NOT NULL DEFAULT 0,
            posted INTEGER NOT NULL DEFAULT 0,
            posted_at TEXT,
            posted_by TEXT,
            notes TEXT,
            created_by TEXT,
            version INTEGER NOT NULL DEFAULT 1,
            sync_status TEXT NOT NULL DEFAULT 'pending',
            created_at TEXT DEFAULT (datetime('now')),
            updated_at TEXT DEFAULT (datetime('now')),
            FOREIGN KEY(customer_id) REFERENCES customers(id) ON DELETE SET NULL
        );

        CREATE TABLE IF NOT EXISTS sales_invoice_items (
            id TEXT PRIMARY KEY,
            invoice_id TEXT NOT NULL,
            product_id TEXT,
            name TEXT NOT NULL,
            quantity REAL NOT NULL DEFAULT 1,
            unit_price REAL NOT NULL DEFAULT 0,
            line_total REAL NOT NULL DEFAULT 0,
            position INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(invoice_id) REFERENCES sales_invoices(id) ON DELETE CASCADE,
            FOREIGN KEY(product_id) REFERENCES products(id) ON DELETE SET NULL
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_sales_invoices_no ON sales_invoices(invoice_no, source);
        CREATE INDEX IF NOT EXISTS idx_sales_invoices_source ON sales_invoices(source);
        CREATE INDEX IF NOT EXISTS idx_sales_invoices_posted ON sales_invoices(posted);
        CREATE INDEX IF NOT EXISTS idx_sales_invoices_date ON sales_invoices(invoice_date);
        CREATE INDEX IF NOT EXISTS idx_sales_invoice_items_invoice ON sales_invoice_items(invoice_id);
        CREATE INDEX IF NOT EXISTS idx_sales_invoice_items_product ON sales_invoice_items(product_id);

        -- Record migration
        INSERT INTO schema_version (version) VALUES (6);
        ",
    )
    .map_err(|e| {
        error!("Migration v6 failed: {e}");
        format!("migration v6: {e}")
    })?;

    info!("Applied migration v6 (sales invoices)");
    Ok(())
}

/// Migration v7: Print queue and printer profiles.
fn migrate_v7(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS printer_profiles (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            driver_type TEXT NOT NULL DEFAULT 'system'
                CHECK (driver_type IN ('system', 'network', 'file')),
            printer_name TEXT,
            host TEXT,
            port INTEGER DEFAULT 9100,
            paper_width_mm INTEGER NOT NULL DEFAULT 80,
            is_default INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS print_jobs (
            id TEXT PRIMARY KEY,
            entity_type TEXT NOT NULL
                CHECK (entity_type IN ('sales_invoice', 'quotation', 'shop_receipt',
                                       'maintenance_ticket', 'product_label')),
            entity_id TEXT NOT NULL,
            entity_payload_json TEXT,
            printer_profile_id TEXT,
            status TEXT NOT NULL DEFAULT 'pending'
                CHECK (status IN ('pending', 'printing', 'printed', 'failed')),
            attempts INTEGER NOT NULL DEFAULT 0,
            last_error TEXT,
            output_path TEXT,
            last_attempt_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_print_jobs_status ON print_jobs(status);
        CREATE INDEX IF NOT EXISTS idx_print_jobs_entity ON print_jobs(entity_type, entity_id);

        -- Record migration
        INSERT INTO schema_version (version) VALUES (7);
        ",
    )
    .map_err(|e| {
        error!("Migration v7 failed: {e}");
        format!("migration v7: {e}")
    })?;

    info!("Applied migration v7 (print queue)");
    Ok(())
}

// ---------------------------------------------------------------------------
// Settings helpers
// ---------------------------------------------------------------------------

/// Get a single setting value.
pub fn get_setting(conn: &Connection, category: &str, key: &str) -> Option<String> {
    conn.query_row(
        "SELECT setting_value FROM local_settings WHERE setting_category = ?1 AND setting_key = ?2",
        params![category, key],
        |row| row.get(0),
    )
    .ok()
}

/// Insert or update a setting.
pub fn set_setting(
    conn: &Connection,
    category: &str,
    key: &str,
    value: &str,
) -> Result<(), String> {
    conn.execute(
        "INSERT INTO local_settings (setting_category, setting_key, setting_value, updated_at)
         VALUES (?1, ?2, ?3, datetime('now'))
         ON CONFLICT(setting_category, setting_key) DO UPDATE SET
            setting_value = excluded.setting_value,
            updated_at = excluded.updated_at",
        params![category, key, value],
    )
    .map_err(|e| format!("set_setting: {e}"))?;
    Ok(())
}

/// Get all settings grouped by category as JSON.
pub fn get_all_settings(conn: &Connection) -> serde_json::Value {
    let mut stmt = match conn.prepare(
        "SELECT setting_category, setting_key, setting_value FROM local_settings ORDER BY setting_category, setting_key",
    ) {
        Ok(s) => s,
        Err(e) => {
            error!("get_all_settings prepare: {e}");
            return serde_json::json!({});
        }
    };

    let mut result = serde_json::Map::new();

    let rows = match stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
        ))
    }) {
        Ok(r) => r,
        Err(e) => {
            error!("get_all_settings query: {e}");
            return serde_json::json!({});
        }
    };

    for (cat, key, val) in rows.flatten() {
        let category = result.entry(cat).or_insert_with(|| serde_json::json!({}));
        if let serde_json::Value::Object(ref mut map) = category {
            map.insert(key, serde_json::Value::String(val));
        }
    }

    serde_json::Value::Object(result)
}

/// Delete all settings in a category.
#[allow(dead_code)]
pub fn delete_all_settings(conn: &Connection, category: &str) -> Result<(), String> {
    conn.execute(
        "DELETE FROM local_settings WHERE setting_category = ?1",
        params![category],
    )
    .map_err(|e| format!("delete_all_settings: {e}"))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Document number counters
// ---------------------------------------------------------------------------

/// Atomically fetch the next value of a named counter (1-based).
///
/// Counters back the human-facing document numbers (ticket_no, quote_no,
/// invoice_no, receipt_no, case_no). The UPSERT keeps the increment and the
/// read in one statement so two connections can never hand out the same
/// number.
pub fn next_counter(conn: &Connection, name: &str) -> Result<i64, String> {
    conn.query_row(
        "INSERT INTO counters (name, value) VALUES (?1, 1)
         ON CONFLICT(name) DO UPDATE SET value = value + 1
         RETURNING value",
        params![name],
        |row| row.get(0),
    )
    .map_err(|e| format!("next_counter({name}): {e}"))
}

/// Peek at a counter without incrementing (0 when never used).
#[allow(dead_code)]
pub fn peek_counter(conn: &Connection, name: &str) -> i64 {
    conn.query_row(
        "SELECT value FROM counters WHERE name = ?1",
        params![name],
        |row| row.get(0),
    )
    .unwrap_or(0)
}

/// Run all migrations on the given connection (test helper, not public API).
#[cfg(test)]
pub fn run_migrations_for_test(conn: &Connection) {
    run_migrations(conn).expect("run_migrations should succeed in test");
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    /// Open an in-memory database and apply pragmas (mirrors open_and_configure).
    fn test_db() -> Connection {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;
             PRAGMA synchronous = NORMAL;",
        )
        .expect("pragma setup");
        conn
    }

    /// Helper: list table names in the database.
    fn table_names(conn: &Connection) -> Vec<String> {
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .expect("prepare table list");
        stmt.query_map([], |row| row.get(0))
            .expect("query tables")
            .filter_map(|r| r.ok())
            .collect()
    }

    // ------------------------------------------------------------------
    // Migration tests
    // ------------------------------------------------------------------

    #[test]
    fn test_migrations_v1_to_latest() {
        let conn = test_db();
        run_migrations(&conn).expect("run_migrations should succeed");

        let tables = table_names(&conn);
        for expected in [
            "local_settings",
            "products",
            "customers",
            "sync_queue",
            "staff_sessions",
            "counters",
            "maintenance_tickets",
            "quotations",
            "quotation_items",
            "legal_cases",
            "legal_case_payments",
            "shop_receipts",
            "sales_invoices",
            "sales_invoice_items",
            "printer_profiles",
            "print_jobs",
        ] {
            assert!(
                tables.contains(&expected.to_string()),
                "missing table {expected}"
            );
        }

        let version: i32 = conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM schema_version",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(version, CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = test_db();
        run_migrations(&conn).expect("first run");
        run_migrations(&conn).expect("second run should be a no-op");

        let count: i32 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn test_product_barcode_unique_among_active() {
        let conn = test_db();
        run_migrations(&conn).expect("migrations");

        conn.execute(
            "INSERT INTO products (id, name, barcode, sale_price) VALUES ('p1', 'Kettle', '6291001234567', 10.0)",
            [],
        )
        .expect("insert first product");

        // Same barcode on another active product is rejected
        let dup = conn.execute(
            "INSERT INTO products (id, name, barcode, sale_price) VALUES ('p2', 'Kettle B', '6291001234567', 12.0)",
            [],
        );
        assert!(dup.is_err(), "duplicate active barcode should be rejected");

        // Deactivate the first: the barcode becomes reusable
        conn.execute("UPDATE products SET is_active = 0 WHERE id = 'p1'", [])
            .expect("deactivate");
        conn.execute(
            "INSERT INTO products (id, name, barcode, sale_price) VALUES ('p3', 'Kettle C', '6291001234567', 12.0)",
            [],
        )
        .expect("barcode reusable after soft-delete");

        // Products without a barcode never collide
        conn.execute("INSERT INTO products (id, name) VALUES ('p4', 'Loose A')", [])
            .expect("insert no-barcode product");
        conn.execute("INSERT INTO products (id, name) VALUES ('p5', 'Loose B')", [])
            .expect("insert second no-barcode product");
    }

    #[test]
    fn test_maintenance_status_check_constraint() {
        let conn = test_db();
        run_migrations(&conn).expect("migrations");

        conn.execute(
            "INSERT INTO maintenance_tickets (id, ticket_no, customer_name, device, fault, received_at, status)
             VALUES ('mt-1', 1, 'Omar', 'Blender', 'Does not spin', datetime('now'), 'received')",
            [],
        )
        .expect("insert ticket");

        let bad = conn.execute(
            "INSERT INTO maintenance_tickets (id, ticket_no, customer_name, device, fault, received_at, status)
             VALUES ('mt-2', 2, 'Omar', 'Blender', 'x', datetime('now'), 'lost')",
            [],
        );
        assert!(bad.is_err(), "invalid status should be rejected");
    }

    #[test]
    fn test_quotation_items_cascade_delete() {
        let conn = test_db();
        run_migrations(&conn).expect("migrations");

        conn.execute(
            "INSERT INTO quotations (id, quote_no, customer_name, quote_date)
             VALUES ('q1', 1, 'Acme', date('now'))",
            [],
        )
        .expect("insert quotation");
        conn.execute(
            "INSERT INTO quotation_items (id, quotation_id, name, quantity, unit_price, line_total)
             VALUES ('qi1', 'q1', 'Cable', 2, 5.0, 10.0)",
            [],
        )
        .expect("insert item");

        conn.execute("DELETE FROM quotations WHERE id = 'q1'", [])
            .expect("delete quotation");
        let count: i32 = conn
            .query_row(
                "SELECT COUNT(*) FROM quotation_items WHERE quotation_id = 'q1'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 0, "items should cascade-delete with quotation");
    }

    #[test]
    fn test_invoice_no_unique_per_source() {
        let conn = test_db();
        run_migrations(&conn).expect("migrations");

        conn.execute(
            "INSERT INTO sales_invoices (id, invoice_no, source, invoice_date)
             VALUES ('inv1', 100, 'shop', date('now'))",
            [],
        )
        .expect("insert shop invoice");

        // Same number in the other source book is fine
        conn.execute(
            "INSERT INTO sales_invoices (id, invoice_no, source, invoice_date)
             VALUES ('inv2', 100, 'warehouse', date('now'))",
            [],
        )
        .expect("same number in warehouse book");

        // Duplicate within the same book is rejected
        let dup = conn.execute(
            "INSERT INTO sales_invoices (id, invoice_no, source, invoice_date)
             VALUES ('inv3', 100, 'shop', date('now'))",
            [],
        );
        assert!(dup.is_err(), "duplicate invoice_no per source rejected");
    }

    #[test]
    fn test_print_job_entity_type_check() {
        let conn = test_db();
        run_migrations(&conn).expect("migrations");

        conn.execute(
            "INSERT INTO print_jobs (id, entity_type, entity_id, status, created_at, updated_at)
             VALUES ('pj1', 'product_label', 'p1', 'pending', datetime('now'), datetime('now'))",
            [],
        )
        .expect("insert label job");

        let bad = conn.execute(
            "INSERT INTO print_jobs (id, entity_type, entity_id, status, created_at, updated_at)
             VALUES ('pj2', 'kitchen_ticket', 'o1', 'pending', datetime('now'), datetime('now'))",
            [],
        );
        assert!(bad.is_err(), "unknown entity_type should be rejected");
    }

    #[test]
    fn test_counters_monotonic() {
        let conn = test_db();
        run_migrations(&conn).expect("migrations");

        assert_eq!(peek_counter(&conn, "invoice_no_shop"), 0);
        assert_eq!(next_counter(&conn, "invoice_no_shop").unwrap(), 1);
        assert_eq!(next_counter(&conn, "invoice_no_shop").unwrap(), 2);
        assert_eq!(next_counter(&conn, "ticket_no").unwrap(), 1);
        assert_eq!(peek_counter(&conn, "invoice_no_shop"), 2);
    }

    #[test]
    fn test_settings_crud() {
        let conn = test_db();
        run_migrations(&conn).expect("migrations");

        // Set a value
        set_setting(&conn, "terminal", "language", "ar").expect("set");
        let val = get_setting(&conn, "terminal", "language");
        assert_eq!(val, Some("ar".to_string()));

        // Update
        set_setting(&conn, "terminal", "language", "en").expect("update");
        let val = get_setting(&conn, "terminal", "language");
        assert_eq!(val, Some("en".to_string()));

        // Delete category
        delete_all_settings(&conn, "terminal").expect("delete");
        let val = get_setting(&conn, "terminal", "language");
        assert!(val.is_none());
    }

    #[test]
    fn test_legal_case_payments_cascade() {
        let conn = test_db();
        run_migrations(&conn).expect("migrations");

        conn.execute(
            "INSERT INTO legal_cases (id, case_no, debtor_name, principal_amount, opened_at)
             VALUES ('lc1', 1, 'Debtor', 500.0, date('now'))",
            [],
        )
        .expect("insert case");
        conn.execute(
            "INSERT INTO legal_case_payments (id, case_id, amount, paid_at)
             VALUES ('lp1', 'lc1', 100.0, date('now'))",
            [],
        )
        .expect("insert payment");

        let bad_method = conn.execute(
            "INSERT INTO legal_case_payments (id, case_id, amount, paid_at, method)
             VALUES ('lp2', 'lc1', 50.0, date('now'), 'cheque')",
            [],
        );
        assert!(bad_method.is_err(), "invalid method should be rejected");

        conn.execute("DELETE FROM legal_cases WHERE id = 'lc1'", [])
            .expect("delete case");
        let count: i32 = conn
            .query_row(
                "SELECT COUNT(*) FROM legal_case_payments WHERE case_id = 'lc1'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 0, "payments should cascade-delete with case");
    }
}
