//! Schema creation for the SQLite store.
//!
//! Natural-key UNIQUE constraints are what make processor merges idempotent,
//! so every synced table declares one.

use diesel::connection::SimpleConnection;
use diesel::prelude::*;

use super::diesel_pool::{run_blocking, DieselError, SqlitePool};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS plants (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    code TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS equipment_groups (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS stations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS equipment (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    equipment_number TEXT NOT NULL UNIQUE,
    plant_id INTEGER REFERENCES plants(id) ON DELETE SET NULL,
    group_id INTEGER REFERENCES equipment_groups(id) ON DELETE SET NULL,
    station_id INTEGER REFERENCES stations(id) ON DELETE SET NULL,
    description TEXT,
    category TEXT,
    object_type TEXT,
    abc_indicator TEXT,
    functional_location TEXT,
    functional_location_desc TEXT,
    manufacturer TEXT,
    model_number TEXT,
    status TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS work_orders (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    order_number TEXT NOT NULL UNIQUE,
    plant_id INTEGER REFERENCES plants(id) ON DELETE SET NULL,
    equipment_number TEXT,
    equipment_id INTEGER REFERENCES equipment(id) ON DELETE SET NULL,
    order_type TEXT,
    status TEXT,
    priority TEXT,
    description TEXT,
    cause_text TEXT,
    created_on TEXT,
    planned_start TEXT,
    planned_finish TEXT,
    actual_finish TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS running_times (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    plant_id INTEGER NOT NULL REFERENCES plants(id) ON DELETE CASCADE,
    equipment_number TEXT NOT NULL,
    equipment_id INTEGER REFERENCES equipment(id) ON DELETE SET NULL,
    reading_date TEXT NOT NULL,
    running_hours REAL,
    counter_reading REAL,
    unit TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(equipment_number, reading_date)
);

CREATE TABLE IF NOT EXISTS equipment_work_orders (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    plant_id INTEGER NOT NULL REFERENCES plants(id) ON DELETE CASCADE,
    order_number TEXT NOT NULL,
    material_number TEXT NOT NULL,
    work_order_id INTEGER REFERENCES work_orders(id) ON DELETE SET NULL,
    equipment_number TEXT,
    equipment_id INTEGER REFERENCES equipment(id) ON DELETE SET NULL,
    reservation_number TEXT,
    reservation_item TEXT,
    description TEXT,
    requirement_quantity REAL,
    withdrawn_quantity REAL,
    unit TEXT,
    is_final_issue INTEGER NOT NULL DEFAULT 0,
    movement_allowed INTEGER NOT NULL DEFAULT 0,
    service_start TEXT,
    service_end TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(plant_id, order_number, material_number)
);

CREATE TABLE IF NOT EXISTS equipment_materials (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    plant_id INTEGER NOT NULL REFERENCES plants(id) ON DELETE CASCADE,
    material_number TEXT NOT NULL,
    production_order TEXT NOT NULL DEFAULT '',
    work_order_id INTEGER REFERENCES work_orders(id) ON DELETE SET NULL,
    reservation_number TEXT,
    reservation_item TEXT,
    description TEXT,
    requirement_quantity REAL,
    withdrawn_quantity REAL,
    unit TEXT,
    value REAL,
    currency TEXT,
    is_final_issue INTEGER NOT NULL DEFAULT 0,
    storage_location TEXT,
    storage_bin TEXT,
    batch_number TEXT,
    requirement_date TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(plant_id, material_number, production_order)
);

CREATE TABLE IF NOT EXISTS daily_plant_data (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    plant_id INTEGER NOT NULL REFERENCES plants(id) ON DELETE CASCADE,
    data_date TEXT NOT NULL,
    is_processed INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(plant_id, data_date)
);

CREATE TABLE IF NOT EXISTS sync_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id TEXT NOT NULL,
    domain_type TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    processed_count INTEGER NOT NULL DEFAULT 0,
    success_count INTEGER NOT NULL DEFAULT 0,
    failed_count INTEGER NOT NULL DEFAULT 0,
    error_message TEXT,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    UNIQUE(domain_type, started_at)
);

CREATE INDEX IF NOT EXISTS idx_work_orders_equipment ON work_orders(equipment_number);
CREATE INDEX IF NOT EXISTS idx_materials_order ON equipment_materials(plant_id, production_order);
CREATE INDEX IF NOT EXISTS idx_sync_logs_status ON sync_logs(status, started_at);
"#;

/// Create all tables and indexes if they do not exist yet.
pub fn create_schema(conn: &mut SqliteConnection) -> Result<(), DieselError> {
    conn.batch_execute(SCHEMA)
}

/// Run schema creation on a pooled connection.
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), DieselError> {
    run_blocking(pool.clone(), create_schema).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::diesel_pool::create_diesel_pool_from_url;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_migrations_are_repeatable() {
        let dir = tempdir().unwrap();
        let db_url = format!("{}", dir.path().join("test.db").display());
        let pool = create_diesel_pool_from_url(&db_url).unwrap();

        run_migrations(&pool).await.unwrap();
        run_migrations(&pool).await.unwrap();

        let tables: i64 = run_blocking(pool, |conn| {
            #[derive(QueryableByName)]
            struct Count {
                #[diesel(sql_type = diesel::sql_types::BigInt)]
                n: i64,
            }
            diesel::sql_query(
                "SELECT COUNT(*) AS n FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
            )
            .get_result::<Count>(conn)
            .map(|c| c.n)
        })
        .await
        .unwrap();
        assert_eq!(tables, 10);
    }
}
