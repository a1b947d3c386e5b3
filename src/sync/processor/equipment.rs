//! Equipment master data.

use std::collections::{BTreeSet, HashMap};

use chrono::Utc;
use diesel::prelude::*;
use diesel::upsert::excluded;

use super::{log_skip, BatchStats, DomainMerge, KeyedActions, PlantLookup};
use crate::fetch::fields::normalize_key;
use crate::fetch::{FieldAlias, FieldReader, RawRecord};
use crate::models::DomainType;
use crate::repository::diesel_models::NewEquipment;
use crate::schema::{equipment, equipment_groups, stations};
use crate::sync::context::PlantScope;
use crate::sync::error::SyncResult;

const NUMBER: FieldAlias =
    FieldAlias::new("equipment_number", &["equipment_number", "equipmentNumber", "EQUNR", "Equipment", "equnr"]);
const DESCRIPTION: FieldAlias =
    FieldAlias::new("description", &["description", "equipment_description", "EQKTX", "Description"]);
const CATEGORY: FieldAlias = FieldAlias::new("category", &["category", "equipment_category", "EQTYP"]);
const OBJECT_TYPE: FieldAlias = FieldAlias::new("object_type", &["object_type", "TechnicalObjectType", "EQART"]);
const ABC: FieldAlias = FieldAlias::new("abc_indicator", &["abc_indicator", "abc", "ABCKZ"]);
const FUNCTIONAL_LOCATION: FieldAlias =
    FieldAlias::new("functional_location", &["functional_location", "FunctionalLocation", "TPLNR"]);
const FUNCTIONAL_LOCATION_DESC: FieldAlias = FieldAlias::new(
    "functional_location_desc",
    &["functional_location_desc", "functional_location_description", "PLTXT"],
);
const MANUFACTURER: FieldAlias = FieldAlias::new("manufacturer", &["manufacturer", "HERST"]);
const MODEL: FieldAlias = FieldAlias::new("model_number", &["model_number", "model", "TYPBZ"]);
const STATUS: FieldAlias = FieldAlias::new("status", &["status", "system_status", "STTXT"]);
const GROUP: FieldAlias = FieldAlias::new("group", &["group_name", "group", "equipment_group", "INGRP"]);
const STATION: FieldAlias = FieldAlias::new("station", &["station_name", "station", "STORT"]);
const DELETED: FieldAlias = FieldAlias::new("deleted", &["deleted", "is_deleted", "deletion_flag", "LVORM", "XLOEK"]);

/// Merges equipment keyed by equipment number.
///
/// Groups and stations are reference data named by the feed; unseen names
/// are created on the fly.
#[derive(Debug, Default, Clone)]
pub struct EquipmentProcessor;

impl EquipmentProcessor {
    pub fn new() -> Self {
        Self
    }
}

impl DomainMerge for EquipmentProcessor {
    fn domain(&self) -> DomainType {
        DomainType::Equipment
    }

    fn merge_chunk(
        &self,
        conn: &mut SqliteConnection,
        chunk: &[RawRecord],
        scope: &PlantScope,
    ) -> SyncResult<BatchStats> {
        let now = Utc::now().to_rfc3339();
        let plants = PlantLookup::load(conn, chunk, scope)?;
        let groups = ensure_groups(conn, &collect_names(chunk, &GROUP), &now)?;
        let station_ids = ensure_stations(conn, &collect_names(chunk, &STATION), &now)?;

        let mut stats = BatchStats {
            processed: chunk.len() as u64,
            ..Default::default()
        };
        let mut actions: KeyedActions<String, NewEquipment> = KeyedActions::new();

        for item in chunk {
            let reader = FieldReader::new(item);
            let Some(number) = reader.text(&NUMBER).map(|n| normalize_key(&n)) else {
                log_skip(self.domain(), None, "missing equipment number");
                stats.skipped += 1;
                continue;
            };
            let plant_id = match plants.resolve(&reader, scope) {
                Ok((_, id)) => id,
                Err(miss) => {
                    log_skip(self.domain(), Some(&number), miss.as_str());
                    stats.skipped += 1;
                    continue;
                }
            };

            if reader.flag(&DELETED) {
                actions.delete(number);
                stats.deleted += 1;
                continue;
            }

            let row = NewEquipment {
                plant_id,
                group_id: reader.text(&GROUP).and_then(|g| groups.get(&g).copied()),
                station_id: reader.text(&STATION).and_then(|s| station_ids.get(&s).copied()),
                description: reader.text(&DESCRIPTION),
                category: reader.text(&CATEGORY),
                object_type: reader.text(&OBJECT_TYPE),
                abc_indicator: reader.text(&ABC),
                functional_location: reader.text(&FUNCTIONAL_LOCATION),
                functional_location_desc: reader.text(&FUNCTIONAL_LOCATION_DESC),
                manufacturer: reader.text(&MANUFACTURER),
                model_number: reader.text(&MODEL),
                status: reader.text(&STATUS),
                created_at: now.clone(),
                updated_at: now.clone(),
                equipment_number: number.clone(),
            };
            actions.upsert(number, row);
            stats.merged += 1;
        }

        let (rows, deletes) = actions.into_parts();

        for row in &rows {
            diesel::insert_into(equipment::table)
                .values(row)
                .on_conflict(equipment::equipment_number)
                .do_update()
                .set((
                    equipment::plant_id.eq(excluded(equipment::plant_id)),
                    equipment::group_id.eq(excluded(equipment::group_id)),
                    equipment::station_id.eq(excluded(equipment::station_id)),
                    equipment::description.eq(excluded(equipment::description)),
                    equipment::category.eq(excluded(equipment::category)),
                    equipment::object_type.eq(excluded(equipment::object_type)),
                    equipment::abc_indicator.eq(excluded(equipment::abc_indicator)),
                    equipment::functional_location.eq(excluded(equipment::functional_location)),
                    equipment::functional_location_desc.eq(excluded(equipment::functional_location_desc)),
                    equipment::manufacturer.eq(excluded(equipment::manufacturer)),
                    equipment::model_number.eq(excluded(equipment::model_number)),
                    equipment::status.eq(excluded(equipment::status)),
                    equipment::updated_at.eq(excluded(equipment::updated_at)),
                ))
                .execute(conn)?;
        }

        if !deletes.is_empty() {
            diesel::delete(equipment::table.filter(equipment::equipment_number.eq_any(&deletes)))
                .execute(conn)?;
        }

        Ok(stats)
    }
}

fn collect_names(chunk: &[RawRecord], field: &FieldAlias) -> Vec<String> {
    let names: BTreeSet<String> = chunk
        .iter()
        .filter_map(|item| FieldReader::new(item).text(field))
        .collect();
    names.into_iter().collect()
}

fn ensure_groups(conn: &mut SqliteConnection, names: &[String], now: &str) -> SyncResult<HashMap<String, i32>> {
    if names.is_empty() {
        return Ok(HashMap::new());
    }
    let rows: Vec<_> = names
        .iter()
        .map(|name| (equipment_groups::name.eq(name), equipment_groups::created_at.eq(now)))
        .collect();
    diesel::insert_or_ignore_into(equipment_groups::table)
        .values(&rows)
        .execute(conn)?;

    let ids: Vec<(String, i32)> = equipment_groups::table
        .filter(equipment_groups::name.eq_any(names))
        .select((equipment_groups::name, equipment_groups::id))
        .load(conn)?;
    Ok(ids.into_iter().collect())
}

fn ensure_stations(conn: &mut SqliteConnection, names: &[String], now: &str) -> SyncResult<HashMap<String, i32>> {
    if names.is_empty() {
        return Ok(HashMap::new());
    }
    let rows: Vec<_> = names
        .iter()
        .map(|name| (stations::name.eq(name), stations::created_at.eq(now)))
        .collect();
    diesel::insert_or_ignore_into(stations::table)
        .values(&rows)
        .execute(conn)?;

    let ids: Vec<(String, i32)> = stations::table
        .filter(stations::name.eq_any(names))
        .select((stations::name, stations::id))
        .load(conn)?;
    Ok(ids.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::DieselEntityRepository;
    use crate::sync::processor::test_support::{count_rows, records, setup_test_db};
    use crate::sync::processor::{ChunkedProcessor, Processor};
    use serde_json::json;

    fn processor(pool: &crate::repository::SqlitePool) -> ChunkedProcessor<EquipmentProcessor> {
        ChunkedProcessor::new(pool.clone(), EquipmentProcessor::new(), 1000)
    }

    #[tokio::test]
    async fn test_merge_is_idempotent() {
        let (pool, _dir) = setup_test_db().await;
        let items = records(json!([
            {"EQUNR": "000000000010004711", "EQKTX": "Feed pump", "WERKS": "A01", "INGRP": "Pumps", "STORT": "Hall 1"},
            {"equipment_number": "10004712", "description": "Mixer", "plant_code": "A01"},
            {"equipment_number": "10004713", "plant_code": "A01"},
        ]));

        let first = processor(&pool)
            .process_batch(items.clone(), &PlantScope::All)
            .await
            .unwrap();
        assert_eq!(first.processed, 3);
        assert_eq!(first.merged, 3);
        assert_eq!(first.skipped, 0);

        processor(&pool).process_batch(items, &PlantScope::All).await.unwrap();
        assert_eq!(count_rows(&pool, "equipment"), 3);
        assert_eq!(count_rows(&pool, "equipment_groups"), 1);
        assert_eq!(count_rows(&pool, "stations"), 1);

        let repo = DieselEntityRepository::new(pool.clone());
        let pump = repo.get_equipment("10004711").await.unwrap().unwrap();
        assert_eq!(pump.description.as_deref(), Some("Feed pump"));
        assert!(pump.group_id.is_some());
        assert!(pump.plant_id.is_some());
    }

    #[tokio::test]
    async fn test_update_overwrites_fields() {
        let (pool, _dir) = setup_test_db().await;
        let p = processor(&pool);
        p.process_batch(
            records(json!([{"EQUNR": "4711", "EQKTX": "Old", "WERKS": "A01"}])),
            &PlantScope::All,
        )
        .await
        .unwrap();
        p.process_batch(
            records(json!([{"EQUNR": "4711", "EQKTX": "New", "WERKS": "A01"}])),
            &PlantScope::All,
        )
        .await
        .unwrap();

        let repo = DieselEntityRepository::new(pool.clone());
        let row = repo.get_equipment("4711").await.unwrap().unwrap();
        assert_eq!(row.description.as_deref(), Some("New"));
        assert_eq!(count_rows(&pool, "equipment"), 1);
    }

    #[tokio::test]
    async fn test_deletion_flag_removes_row() {
        let (pool, _dir) = setup_test_db().await;
        let p = processor(&pool);
        p.process_batch(
            records(json!([
                {"EQUNR": "4711", "WERKS": "A01"},
                {"EQUNR": "4712", "WERKS": "A01"},
            ])),
            &PlantScope::All,
        )
        .await
        .unwrap();

        let stats = p
            .process_batch(
                records(json!([{"EQUNR": "4711", "WERKS": "A01", "LVORM": "X"}])),
                &PlantScope::All,
            )
            .await
            .unwrap();
        assert_eq!(stats.deleted, 1);
        assert_eq!(count_rows(&pool, "equipment"), 1);

        let repo = DieselEntityRepository::new(pool.clone());
        assert!(repo.get_equipment("4711").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_plant_scope_and_unknown_plants() {
        let (pool, _dir) = setup_test_db().await;
        let stats = processor(&pool)
            .process_batch(
                records(json!([
                    {"EQUNR": "1", "WERKS": "P1"},
                    {"EQUNR": "2", "WERKS": "P2"},
                    {"EQUNR": "3"},
                    {"EKTX": "no number", "WERKS": "P1"},
                ])),
                &PlantScope::only(["P1"]),
            )
            .await
            .unwrap();

        assert_eq!(stats.processed, 4);
        assert_eq!(stats.merged, 1);
        assert_eq!(stats.skipped, 3);
        assert_eq!(count_rows(&pool, "equipment"), 1);
    }

    #[tokio::test]
    async fn test_chunks_commit_independently() {
        let (pool, _dir) = setup_test_db().await;
        let items: Vec<RawRecord> = (0..25)
            .map(|i| json!({"EQUNR": format!("{}", 1000 + i), "WERKS": "A01"}).as_object().cloned().unwrap())
            .collect();

        let stats = ChunkedProcessor::new(pool.clone(), EquipmentProcessor::new(), 10)
            .process_batch(items, &PlantScope::All)
            .await
            .unwrap();
        assert_eq!(stats.processed, 25);
        assert_eq!(stats.merged, 25);
        assert_eq!(count_rows(&pool, "equipment"), 25);
    }
}
