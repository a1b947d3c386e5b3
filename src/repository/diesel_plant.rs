//! Diesel-based plant repository for SQLite.
//!
//! Plants are reference data: processors only read them (to resolve plant
//! codes), the trigger surface seeds them from configuration.

use std::collections::HashMap;

use chrono::Utc;
use diesel::prelude::*;
use diesel::upsert::excluded;

use super::diesel_models::{NewPlant, PlantRecord};
use super::diesel_pool::{run_blocking, DieselError, SqlitePool};
use super::parse_datetime;
use crate::models::Plant;
use crate::schema::plants;

/// Convert a database record to a domain model.
impl From<PlantRecord> for Plant {
    fn from(record: PlantRecord) -> Self {
        Plant {
            id: record.id,
            code: record.code,
            name: record.name,
            is_active: record.is_active != 0,
            created_at: parse_datetime(&record.created_at),
            updated_at: parse_datetime(&record.updated_at),
        }
    }
}

/// Load a plant-code -> plant-id map for the given codes with a single query.
///
/// Inactive plants are left out, so items for them resolve as unknown.
pub fn load_plant_ids(
    conn: &mut SqliteConnection,
    codes: &[String],
) -> Result<HashMap<String, i32>, DieselError> {
    if codes.is_empty() {
        return Ok(HashMap::new());
    }
    let rows: Vec<(String, i32)> = plants::table
        .filter(plants::code.eq_any(codes))
        .filter(plants::is_active.ne(0))
        .select((plants::code, plants::id))
        .load(conn)?;
    Ok(rows.into_iter().collect())
}

/// Diesel-based plant repository.
#[derive(Clone)]
pub struct DieselPlantRepository {
    pool: SqlitePool,
}

impl DieselPlantRepository {
    /// Create a new plant repository with an existing pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get a plant by code.
    pub async fn get_by_code(&self, code: &str) -> Result<Option<Plant>, DieselError> {
        let code = code.to_string();
        let pool = self.pool.clone();

        run_blocking(pool, move |conn| {
            plants::table
                .filter(plants::code.eq(&code))
                .first::<PlantRecord>(conn)
                .optional()
        })
        .await
        .map(|opt| opt.map(Plant::from))
    }

    /// Get all plants ordered by code.
    pub async fn get_all(&self) -> Result<Vec<Plant>, DieselError> {
        let pool = self.pool.clone();

        run_blocking(pool, move |conn| {
            plants::table
                .order(plants::code.asc())
                .load::<PlantRecord>(conn)
        })
        .await
        .map(|records| records.into_iter().map(Plant::from).collect())
    }

    /// Codes of all active plants, sorted.
    pub async fn get_active_codes(&self) -> Result<Vec<String>, DieselError> {
        let pool = self.pool.clone();

        run_blocking(pool, move |conn| {
            plants::table
                .filter(plants::is_active.ne(0))
                .order(plants::code.asc())
                .select(plants::code)
                .load::<String>(conn)
        })
        .await
    }

    /// Insert or update a plant by code. Returns the plant id.
    pub async fn upsert(&self, code: &str, name: &str, is_active: bool) -> Result<i32, DieselError> {
        let code = code.trim().to_string();
        let name = name.trim().to_string();
        let pool = self.pool.clone();

        run_blocking(pool, move |conn| {
            let now = Utc::now().to_rfc3339();
            let new_plant = NewPlant {
                code: &code,
                name: &name,
                is_active: i32::from(is_active),
                created_at: &now,
                updated_at: &now,
            };
            diesel::insert_into(plants::table)
                .values(&new_plant)
                .on_conflict(plants::code)
                .do_update()
                .set((
                    plants::name.eq(excluded(plants::name)),
                    plants::is_active.eq(excluded(plants::is_active)),
                    plants::updated_at.eq(excluded(plants::updated_at)),
                ))
                .execute(conn)?;
            plants::table
                .filter(plants::code.eq(&code))
                .select(plants::id)
                .first::<i32>(conn)
        })
        .await
    }
}
