//! Equipment running time readings.

use chrono::Utc;
use diesel::prelude::*;
use diesel::upsert::excluded;

use super::{collect_keys, load_equipment_ids, log_skip, BatchStats, DomainMerge, PlantLookup};
use crate::fetch::fields::normalize_key;
use crate::fetch::{FieldAlias, FieldReader, RawRecord};
use crate::models::DomainType;
use crate::repository::diesel_models::NewRunningTime;
use crate::schema::running_times;
use crate::sync::context::PlantScope;
use crate::sync::error::SyncResult;

const EQUIPMENT: FieldAlias = FieldAlias::new("equipment_number", &["equipment_number", "equipment", "EQUNR"]);
const DATE: FieldAlias = FieldAlias::new("reading_date", &["reading_date", "date", "measurement_date", "IDATE"]);
const HOURS: FieldAlias =
    FieldAlias::new("running_hours", &["running_hours", "runtime_hours", "operating_hours", "hours", "RUNTIME"]);
const COUNTER: FieldAlias =
    FieldAlias::new("counter_reading", &["counter_reading", "cumulative_hours", "counter", "CNTRR", "READG"]);
const UNIT: FieldAlias = FieldAlias::new("unit", &["unit", "counter_unit", "RECDU"]);
const DELETED: FieldAlias = FieldAlias::new("deleted", &["deleted", "is_deleted", "CANCL"]);

/// Merges one reading per (equipment number, date).
#[derive(Debug, Default, Clone)]
pub struct RunningTimeProcessor;

impl RunningTimeProcessor {
    pub fn new() -> Self {
        Self
    }
}

impl DomainMerge for RunningTimeProcessor {
    fn domain(&self) -> DomainType {
        DomainType::RunningTime
    }

    fn merge_chunk(
        &self,
        conn: &mut SqliteConnection,
        chunk: &[RawRecord],
        scope: &PlantScope,
    ) -> SyncResult<BatchStats> {
        let now = Utc::now().to_rfc3339();
        let plants = PlantLookup::load(conn, chunk, scope)?;
        let equipment_ids = load_equipment_ids(conn, &collect_keys(chunk, &EQUIPMENT))?;

        let mut stats = BatchStats {
            processed: chunk.len() as u64,
            ..Default::default()
        };

        for item in chunk {
            let reader = FieldReader::new(item);
            let equipment_number = reader.text(&EQUIPMENT).map(|n| normalize_key(&n));
            let (Some(equipment_number), Some(reading_date)) = (equipment_number, reader.date_string(&DATE)) else {
                log_skip(self.domain(), None, "missing equipment number or reading date");
                stats.skipped += 1;
                continue;
            };
            let plant_id = match plants.require(&reader, scope) {
                Ok((_, id)) => id,
                Err(miss) => {
                    log_skip(self.domain(), Some(&equipment_number), miss.as_str());
                    stats.skipped += 1;
                    continue;
                }
            };

            if reader.flag(&DELETED) {
                diesel::delete(
                    running_times::table
                        .filter(running_times::equipment_number.eq(&equipment_number))
                        .filter(running_times::reading_date.eq(&reading_date)),
                )
                .execute(conn)?;
                stats.deleted += 1;
                continue;
            }

            let row = NewRunningTime {
                plant_id,
                equipment_id: equipment_ids.get(&equipment_number).copied(),
                equipment_number,
                reading_date,
                running_hours: reader.number(&HOURS),
                counter_reading: reader.number(&COUNTER),
                unit: reader.text(&UNIT),
                created_at: now.clone(),
                updated_at: now.clone(),
            };

            diesel::insert_into(running_times::table)
                .values(&row)
                .on_conflict((running_times::equipment_number, running_times::reading_date))
                .do_update()
                .set((
                    running_times::plant_id.eq(excluded(running_times::plant_id)),
                    running_times::equipment_id.eq(excluded(running_times::equipment_id)),
                    running_times::running_hours.eq(excluded(running_times::running_hours)),
                    running_times::counter_reading.eq(excluded(running_times::counter_reading)),
                    running_times::unit.eq(excluded(running_times::unit)),
                    running_times::updated_at.eq(excluded(running_times::updated_at)),
                ))
                .execute(conn)?;
            stats.merged += 1;
        }

        Ok(stats)
    }
}
