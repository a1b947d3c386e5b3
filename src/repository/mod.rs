//! Persistence layer: Diesel models, pool, schema creation and repositories.

pub mod diesel_entities;
pub mod diesel_models;
pub mod diesel_plant;
pub mod diesel_pool;
pub mod diesel_sync_log;
pub mod migrations;

pub use diesel_entities::{DieselEntityRepository, EntityCounts};
pub use diesel_plant::DieselPlantRepository;
pub use diesel_pool::{create_diesel_pool, create_diesel_pool_from_url, run_blocking, SqlitePool};
pub use diesel_sync_log::DieselSyncLogRepository;

use chrono::{DateTime, Utc};

/// Parse an RFC 3339 timestamp stored as text, falling back to now.
pub(crate) fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// Parse an optional RFC 3339 timestamp stored as text.
pub(crate) fn parse_datetime_opt(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
    })
}
