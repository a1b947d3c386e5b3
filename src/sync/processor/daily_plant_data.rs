//! Daily per-plant processing status.

use chrono::Utc;
use diesel::prelude::*;
use diesel::upsert::excluded;

use super::{log_skip, BatchStats, DomainMerge, KeyedActions, PlantLookup};
use crate::fetch::fields::{value_to_f64, value_to_flag};
use crate::fetch::{FieldAlias, FieldReader, RawRecord};
use crate::models::DomainType;
use crate::repository::diesel_models::NewDailyPlantData;
use crate::schema::daily_plant_data;
use crate::sync::context::PlantScope;
use crate::sync::error::SyncResult;

const DATE: FieldAlias = FieldAlias::new("data_date", &["data_date", "date", "day", "DATUM"]);
const PROCESSED: FieldAlias = FieldAlias::new(
    "is_processed",
    &["is_processed", "processed", "processing_status", "status", "flag"],
);
const DELETED: FieldAlias = FieldAlias::new("deleted", &["deleted", "is_deleted"]);

/// Merges one status row per (plant, date).
#[derive(Debug, Default, Clone)]
pub struct DailyPlantDataProcessor;

impl DailyPlantDataProcessor {
    pub fn new() -> Self {
        Self
    }
}

/// Processing status as stored: integral statuses are kept as-is, flag
/// spellings map to 0/1, anything unreadable is 0.
fn processing_status(reader: &FieldReader<'_>) -> i32 {
    let Some(raw) = reader.raw(&PROCESSED) else {
        return 0;
    };
    match value_to_f64(raw) {
        Some(n) if n.fract() == 0.0 && (0.0..=i32::MAX as f64).contains(&n) => n as i32,
        _ => value_to_flag(raw).map(i32::from).unwrap_or(0),
    }
}

impl DomainMerge for DailyPlantDataProcessor {
    fn domain(&self) -> DomainType {
        DomainType::DailyPlantData
    }

    fn merge_chunk(
        &self,
        conn: &mut SqliteConnection,
        chunk: &[RawRecord],
        scope: &PlantScope,
    ) -> SyncResult<BatchStats> {
        let now = Utc::now().to_rfc3339();
        let plants = PlantLookup::load(conn, chunk, scope)?;

        let mut stats = BatchStats {
            processed: chunk.len() as u64,
            ..Default::default()
        };
        let mut actions: KeyedActions<(i32, String), NewDailyPlantData> = KeyedActions::new();

        for item in chunk {
            let reader = FieldReader::new(item);
            let Some(data_date) = reader.date_string(&DATE) else {
                log_skip(self.domain(), None, "missing or unreadable date");
                stats.skipped += 1;
                continue;
            };
            let plant_id = match plants.require(&reader, scope) {
                Ok((_, id)) => id,
                Err(miss) => {
                    log_skip(self.domain(), Some(&data_date), miss.as_str());
                    stats.skipped += 1;
                    continue;
                }
            };

            let key = (plant_id, data_date.clone());
            if reader.flag(&DELETED) {
                actions.delete(key);
                stats.deleted += 1;
                continue;
            }

            actions.upsert(
                key,
                NewDailyPlantData {
                    plant_id,
                    data_date,
                    is_processed: processing_status(&reader),
                    created_at: now.clone(),
                    updated_at: now.clone(),
                },
            );
            stats.merged += 1;
        }

        let (rows, deletes) = actions.into_parts();

        for row in &rows {
            diesel::insert_into(daily_plant_data::table)
                .values(row)
                .on_conflict((daily_plant_data::plant_id, daily_plant_data::data_date))
                .do_update()
                .set((
                    daily_plant_data::is_processed.eq(excluded(daily_plant_data::is_processed)),
                    daily_plant_data::updated_at.eq(excluded(daily_plant_data::updated_at)),
                ))
                .execute(conn)?;
        }

        for (plant_id, data_date) in deletes {
            diesel::delete(
                daily_plant_data::table
                    .filter(daily_plant_data::plant_id.eq(plant_id))
                    .filter(daily_plant_data::data_date.eq(data_date)),
            )
            .execute(conn)?;
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::DieselEntityRepository;
    use crate::sync::processor::test_support::{count_rows, records, setup_test_db};
    use crate::sync::processor::{ChunkedProcessor, Processor};
    use serde_json::json;

    #[test]
    fn test_processing_status() {
        let rec = |v: serde_json::Value| v.as_object().cloned().unwrap();
        let cases = [
            (json!({"is_processed": true}), 1),
            (json!({"processed": "X"}), 1),
            (json!({"status": 2}), 2),
            (json!({"status": "0"}), 0),
            (json!({"other": 1}), 0),
            (json!({"flag": "unknown"}), 0),
        ];
        for (value, expected) in cases {
            let r = rec(value);
            assert_eq!(processing_status(&FieldReader::new(&r)), expected);
        }
    }

    #[tokio::test]
    async fn test_one_row_per_plant_and_day() {
        let (pool, _dir) = setup_test_db().await;
        let p = ChunkedProcessor::new(pool.clone(), DailyPlantDataProcessor::new(), 1000);

        p.process_batch(
            records(json!([
                {"plant_code": "A01", "date": "2024-03-01", "is_processed": 0},
                {"plant_code": "A01", "date": "2024-03-02", "is_processed": 0},
                {"plant_code": "P1", "date": "2024-03-01", "is_processed": 1},
            ])),
            &PlantScope::All,
        )
        .await
        .unwrap();
        let stats = p
            .process_batch(
                records(json!([
                    {"plant_code": "A01", "date": "20240301", "is_processed": 1},
                    {"plant_code": "A01", "date": "2024-03-01", "is_processed": 1},
                ])),
                &PlantScope::All,
            )
            .await
            .unwrap();
        assert_eq!(stats.merged, 2);
        assert_eq!(count_rows(&pool, "daily_plant_data"), 3);

        let rows = DieselEntityRepository::new(pool.clone())
            .get_daily_plant_data("A01")
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].is_processed, 1);
        assert_eq!(rows[1].is_processed, 0);
    }
}
