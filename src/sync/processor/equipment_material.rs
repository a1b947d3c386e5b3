//! Materials consumed per (plant, production order).
//!
//! Each batch is authoritative for every (plant, production order) group it
//! mentions: after the merge, the persisted materials of such a group are
//! exactly the batch's non-excluded, non-deleted materials for it. Chunking
//! never splits a group, so this reconciliation runs inside one transaction.

use std::collections::{BTreeSet, HashMap};

use chrono::Utc;
use diesel::prelude::*;
use diesel::upsert::excluded;
use tracing::debug;

use super::{
    load_work_orders, log_skip, BatchStats, DomainMerge, KeyedActions, MaterialExclusions,
    PlantLookup, PLANT,
};
use crate::fetch::fields::normalize_key;
use crate::fetch::{FieldAlias, FieldReader, RawRecord};
use crate::models::DomainType;
use crate::repository::diesel_models::NewEquipmentMaterial;
use crate::schema::equipment_materials as em;
use crate::sync::context::PlantScope;
use crate::sync::error::SyncResult;

// The reservation feed (SAP field names) and the named feed share one alias
// list per field, so records mixing both spellings still resolve.
const MATERIAL: FieldAlias =
    FieldAlias::new("material_number", &["material_number", "materialNumber", "material", "MATNR"]);
const ORDER: FieldAlias = FieldAlias::new(
    "production_order",
    &["production_order", "productionOrder", "order_number", "work_order", "AUFNR"],
);
const RESERVATION: FieldAlias =
    FieldAlias::new("reservation_number", &["reservation_number", "reservation", "RSNUM"]);
const RESERVATION_ITEM: FieldAlias = FieldAlias::new("reservation_item", &["reservation_item", "item", "RSPOS"]);
const DESCRIPTION: FieldAlias =
    FieldAlias::new("description", &["description", "material_description", "MAKTX"]);
const REQUIRED: FieldAlias = FieldAlias::new(
    "requirement_quantity",
    &["requirement_quantity", "required_quantity", "quantity", "BDMNG"],
);
const WITHDRAWN: FieldAlias =
    FieldAlias::new("withdrawn_quantity", &["withdrawn_quantity", "issued_quantity", "ENMNG"]);
const UNIT: FieldAlias = FieldAlias::new("unit", &["unit", "unit_of_measure", "uom", "MEINS"]);
const VALUE: FieldAlias = FieldAlias::new("value", &["value", "total_value", "amount", "DMBTR", "WRBTR"]);
const PRICE: FieldAlias = FieldAlias::new("price", &["unit_price", "price", "GPREIS", "VERPR"]);
const PRICE_UNIT: FieldAlias = FieldAlias::new("price_unit", &["price_unit", "PEINH"]);
const CURRENCY: FieldAlias = FieldAlias::new("currency", &["currency", "WAERS"]);
const FINAL_ISSUE: FieldAlias = FieldAlias::new("is_final_issue", &["is_final_issue", "final_issue", "KZEAR"]);
const STORAGE_LOCATION: FieldAlias = FieldAlias::new("storage_location", &["storage_location", "LGORT"]);
const STORAGE_BIN: FieldAlias = FieldAlias::new("storage_bin", &["storage_bin", "bin", "LGPBE"]);
const BATCH: FieldAlias = FieldAlias::new("batch_number", &["batch_number", "batch", "CHARG"]);
const REQUIREMENT_DATE: FieldAlias =
    FieldAlias::new("requirement_date", &["requirement_date", "required_date", "BDTER"]);
const DELETED: FieldAlias = FieldAlias::new("deleted", &["deleted", "is_deleted", "deletion_flag", "XLOEK"]);

/// Grouping key before plant resolution: (plant code, production order).
fn group_key(item: &RawRecord) -> (String, String) {
    let reader = FieldReader::new(item);
    let plant = reader.text(&PLANT).unwrap_or_default();
    let order = reader
        .text(&ORDER)
        .map(|o| normalize_key(&o))
        .unwrap_or_default();
    (plant, order)
}

/// Material fields resolved from a raw record.
struct Material {
    material_number: String,
    production_order: String,
    reservation_number: Option<String>,
    reservation_item: Option<String>,
    description: Option<String>,
    requirement_quantity: Option<f64>,
    withdrawn_quantity: Option<f64>,
    unit: Option<String>,
    value: Option<f64>,
    currency: Option<String>,
    is_final_issue: bool,
    storage_location: Option<String>,
    storage_bin: Option<String>,
    batch_number: Option<String>,
    requirement_date: Option<String>,
    deleted: bool,
}

impl Material {
    fn read(item: &RawRecord) -> Option<Self> {
        let reader = FieldReader::new(item);
        let material_number = normalize_key(&reader.text(&MATERIAL)?);
        let production_order = reader
            .text(&ORDER)
            .map(|o| normalize_key(&o))
            .unwrap_or_default();

        let requirement_quantity = reader.number(&REQUIRED);
        // Without a total, value = price per price unit times the requirement.
        let value = reader.number(&VALUE).or_else(|| {
            let price = reader.number(&PRICE)?;
            let per = reader.number(&PRICE_UNIT).filter(|p| *p > 0.0).unwrap_or(1.0);
            requirement_quantity.map(|qty| price / per * qty)
        });

        Some(Self {
            material_number,
            production_order,
            reservation_number: reader.text(&RESERVATION).map(|n| normalize_key(&n)),
            reservation_item: reader.text(&RESERVATION_ITEM).map(|n| normalize_key(&n)),
            description: reader.text(&DESCRIPTION),
            requirement_quantity,
            withdrawn_quantity: reader.number(&WITHDRAWN),
            unit: reader.text(&UNIT),
            value,
            currency: reader.text(&CURRENCY),
            is_final_issue: reader.flag(&FINAL_ISSUE),
            storage_location: reader.text(&STORAGE_LOCATION),
            storage_bin: reader.text(&STORAGE_BIN),
            batch_number: reader.text(&BATCH),
            requirement_date: reader.date_string(&REQUIREMENT_DATE),
            deleted: reader.flag(&DELETED),
        })
    }
}

/// Merges materials keyed by (plant, material number, production order) and
/// reconciles deletions per (plant, production order).
#[derive(Debug, Default, Clone)]
pub struct EquipmentMaterialProcessor {
    exclusions: MaterialExclusions,
}

impl EquipmentMaterialProcessor {
    pub fn new(exclusions: MaterialExclusions) -> Self {
        Self { exclusions }
    }
}

impl DomainMerge for EquipmentMaterialProcessor {
    fn domain(&self) -> DomainType {
        DomainType::EquipmentMaterials
    }

    /// Chunks of whole groups. A group larger than `chunk_size` becomes one
    /// oversized chunk rather than being split.
    fn partition(&self, items: Vec<RawRecord>, chunk_size: usize) -> Vec<Vec<RawRecord>> {
        let chunk_size = chunk_size.max(1);
        let mut order: Vec<(String, String)> = Vec::new();
        let mut groups: HashMap<(String, String), Vec<RawRecord>> = HashMap::new();
        for item in items {
            let key = group_key(&item);
            match groups.get_mut(&key) {
                Some(group) => group.push(item),
                None => {
                    order.push(key.clone());
                    groups.insert(key, vec![item]);
                }
            }
        }

        let mut chunks = Vec::new();
        let mut current: Vec<RawRecord> = Vec::new();
        for key in order {
            let Some(group) = groups.remove(&key) else {
                continue;
            };
            if !current.is_empty() && current.len() + group.len() > chunk_size {
                chunks.push(std::mem::take(&mut current));
            }
            current.extend(group);
        }
        if !current.is_empty() {
            chunks.push(current);
        }
        chunks
    }

    fn merge_chunk(
        &self,
        conn: &mut SqliteConnection,
        chunk: &[RawRecord],
        scope: &PlantScope,
    ) -> SyncResult<BatchStats> {
        let now = Utc::now().to_rfc3339();
        let plants = PlantLookup::load(conn, chunk, scope)?;

        let materials: Vec<Option<Material>> = chunk.iter().map(Material::read).collect();
        let production_orders: Vec<String> = materials
            .iter()
            .flatten()
            .map(|m| m.production_order.clone())
            .filter(|o| !o.is_empty())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let work_orders = load_work_orders(conn, &production_orders)?;

        let mut stats = BatchStats {
            processed: chunk.len() as u64,
            ..Default::default()
        };
        let mut actions: KeyedActions<(i32, String, String), NewEquipmentMaterial> = KeyedActions::new();
        // Groups this chunk is authoritative for.
        let mut groups: BTreeSet<(i32, String)> = BTreeSet::new();

        for (item, material) in chunk.iter().zip(materials) {
            let reader = FieldReader::new(item);
            let plant_id = match plants.require(&reader, scope) {
                Ok((_, id)) => id,
                Err(miss) => {
                    log_skip(self.domain(), None, miss.as_str());
                    stats.skipped += 1;
                    continue;
                }
            };
            let Some(material) = material else {
                log_skip(self.domain(), None, "missing material number");
                stats.skipped += 1;
                continue;
            };
            if !material.production_order.is_empty() {
                groups.insert((plant_id, material.production_order.clone()));
            }
            if self.exclusions.is_excluded(&material.material_number) {
                log_skip(self.domain(), Some(&material.material_number), "excluded material");
                stats.skipped += 1;
                continue;
            }

            let key = (
                plant_id,
                material.material_number.clone(),
                material.production_order.clone(),
            );
            if material.deleted {
                actions.delete(key);
                stats.deleted += 1;
                continue;
            }

            let work_order_id = work_orders
                .get(&material.production_order)
                .map(|(id, _)| *id);

            actions.upsert(
                key,
                NewEquipmentMaterial {
                    plant_id,
                    material_number: material.material_number,
                    production_order: material.production_order,
                    work_order_id,
                    reservation_number: material.reservation_number,
                    reservation_item: material.reservation_item,
                    description: material.description,
                    requirement_quantity: material.requirement_quantity,
                    withdrawn_quantity: material.withdrawn_quantity,
                    unit: material.unit,
                    value: material.value,
                    currency: material.currency,
                    is_final_issue: i32::from(material.is_final_issue),
                    storage_location: material.storage_location,
                    storage_bin: material.storage_bin,
                    batch_number: material.batch_number,
                    requirement_date: material.requirement_date,
                    created_at: now.clone(),
                    updated_at: now.clone(),
                },
            );
            stats.merged += 1;
        }

        let (rows, deletes) = actions.into_parts();

        let mut retained: HashMap<(i32, String), Vec<String>> = HashMap::new();
        for row in &rows {
            retained
                .entry((row.plant_id, row.production_order.clone()))
                .or_default()
                .push(row.material_number.clone());
        }

        for row in &rows {
            diesel::insert_into(em::table)
                .values(row)
                .on_conflict((em::plant_id, em::material_number, em::production_order))
                .do_update()
                .set((
                    em::work_order_id.eq(excluded(em::work_order_id)),
                    em::reservation_number.eq(excluded(em::reservation_number)),
                    em::reservation_item.eq(excluded(em::reservation_item)),
                    em::description.eq(excluded(em::description)),
                    em::requirement_quantity.eq(excluded(em::requirement_quantity)),
                    em::withdrawn_quantity.eq(excluded(em::withdrawn_quantity)),
                    em::unit.eq(excluded(em::unit)),
                    em::value.eq(excluded(em::value)),
                    em::currency.eq(excluded(em::currency)),
                    em::is_final_issue.eq(excluded(em::is_final_issue)),
                    em::storage_location.eq(excluded(em::storage_location)),
                    em::storage_bin.eq(excluded(em::storage_bin)),
                    em::batch_number.eq(excluded(em::batch_number)),
                    em::requirement_date.eq(excluded(em::requirement_date)),
                    em::updated_at.eq(excluded(em::updated_at)),
                ))
                .execute(conn)?;
        }

        for (plant_id, material_number, production_order) in deletes {
            diesel::delete(
                em::table
                    .filter(em::plant_id.eq(plant_id))
                    .filter(em::material_number.eq(material_number))
                    .filter(em::production_order.eq(production_order)),
            )
            .execute(conn)?;
        }

        for (plant_id, production_order) in groups {
            let keep = retained
                .remove(&(plant_id, production_order.clone()))
                .unwrap_or_default();
            let pruned = diesel::delete(
                em::table
                    .filter(em::plant_id.eq(plant_id))
                    .filter(em::production_order.eq(&production_order))
                    .filter(em::material_number.ne_all(&keep)),
            )
            .execute(conn)?;
            if pruned > 0 {
                debug!(
                    plant_id = plant_id,
                    production_order = %production_order,
                    pruned = pruned,
                    "Removed materials absent from batch"
                );
            }
            stats.pruned += pruned as u64;
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::DieselEntityRepository;
    use crate::sync::processor::test_support::{count_rows, records, setup_test_db};
    use crate::sync::processor::{ChunkedProcessor, Processor, WorkOrderProcessor};
    use serde_json::json;

    fn processor(pool: &crate::repository::SqlitePool, chunk_size: usize) -> ChunkedProcessor<EquipmentMaterialProcessor> {
        ChunkedProcessor::new(
            pool.clone(),
            EquipmentMaterialProcessor::new(MaterialExclusions::new(["11", "12", "31"])),
            chunk_size,
        )
    }

    async fn material_numbers(pool: &crate::repository::SqlitePool, plant: &str, order: &str) -> Vec<String> {
        DieselEntityRepository::new(pool.clone())
            .get_materials(plant, order)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.material_number)
            .collect()
    }

    #[test]
    fn test_partition_keeps_groups_whole() {
        let items = records(json!([
            {"WERKS": "A01", "AUFNR": "1", "MATNR": "M1"},
            {"WERKS": "A01", "AUFNR": "2", "MATNR": "M1"},
            {"WERKS": "A01", "AUFNR": "1", "MATNR": "M2"},
            {"WERKS": "A01", "AUFNR": "1", "MATNR": "M3"},
            {"WERKS": "A01", "AUFNR": "2", "MATNR": "M2"},
        ]));
        let chunks = EquipmentMaterialProcessor::default().partition(items, 2);

        assert_eq!(chunks.iter().map(Vec::len).collect::<Vec<_>>(), vec![3, 2]);
        for chunk in &chunks {
            let orders: BTreeSet<_> = chunk.iter().map(|i| group_key(i).1).collect();
            assert_eq!(orders.len(), 1);
        }
    }

    #[test]
    fn test_value_from_price() {
        let item = json!({"MATNR": "M1", "AUFNR": "1", "BDMNG": "4", "GPREIS": "250", "PEINH": "100"});
        let material = Material::read(item.as_object().unwrap()).unwrap();
        assert_eq!(material.value, Some(10.0));

        let item = json!({"material_number": "M1", "quantity": 2, "value": 7.5});
        let material = Material::read(item.as_object().unwrap()).unwrap();
        assert_eq!(material.value, Some(7.5));
        assert_eq!(material.production_order, "");
    }

    #[test]
    fn test_mixed_field_spellings_resolve() {
        let item = json!({"MATNR": "M1", "production_order": "004000001", "BDMNG": 2});
        let material = Material::read(item.as_object().unwrap()).unwrap();
        assert_eq!(material.material_number, "M1");
        assert_eq!(material.production_order, "4000001");
        assert_eq!(material.requirement_quantity, Some(2.0));

        let item = json!({"AUFNR": "4000001", "material_number": "M1", "WAERS": "EUR"});
        assert_eq!(group_key(item.as_object().unwrap()).1, "4000001");
        let material = Material::read(item.as_object().unwrap()).unwrap();
        assert_eq!(material.production_order, "4000001");
        assert_eq!(material.currency.as_deref(), Some("EUR"));
    }

    #[tokio::test]
    async fn test_mixed_spellings_take_part_in_reconciliation() {
        let (pool, _dir) = setup_test_db().await;
        let p = processor(&pool, 1000);
        p.process_batch(
            records(json!([
                {"WERKS": "A01", "AUFNR": "4000001", "MATNR": "M1"},
                {"WERKS": "A01", "AUFNR": "4000001", "MATNR": "M2"},
            ])),
            &PlantScope::All,
        )
        .await
        .unwrap();

        let stats = p
            .process_batch(
                records(json!([{"WERKS": "A01", "production_order": "4000001", "MATNR": "M2"}])),
                &PlantScope::All,
            )
            .await
            .unwrap();
        assert_eq!(stats.pruned, 1);
        assert_eq!(material_numbers(&pool, "A01", "4000001").await, vec!["M2"]);
        assert_eq!(count_rows(&pool, "equipment_materials"), 1);
    }

    #[tokio::test]
    async fn test_large_chunk_stores_every_row() {
        let (pool, _dir) = setup_test_db().await;
        let items: Vec<RawRecord> = (0..1900)
            .map(|m| {
                json!({"WERKS": "A01", "AUFNR": format!("{}", 4000000 + m / 10), "MATNR": format!("M{}", m)})
                    .as_object()
                    .cloned()
                    .unwrap()
            })
            .collect();

        let stats = processor(&pool, 2000).process_batch(items, &PlantScope::All).await.unwrap();
        assert_eq!(stats.processed, 1900);
        assert_eq!(stats.merged, 1900);
        assert_eq!(count_rows(&pool, "equipment_materials"), 1900);
    }

    #[tokio::test]
    async fn test_reconciliation_removes_absent_materials() {
        let (pool, _dir) = setup_test_db().await;
        let p = processor(&pool, 1000);

        p.process_batch(
            records(json!([
                {"WERKS": "A01", "AUFNR": "4000001", "MATNR": "M1"},
                {"WERKS": "A01", "AUFNR": "4000001", "MATNR": "M2"},
                {"WERKS": "A01", "AUFNR": "4000002", "MATNR": "M9"},
            ])),
            &PlantScope::All,
        )
        .await
        .unwrap();
        assert_eq!(material_numbers(&pool, "A01", "4000001").await, vec!["M1", "M2"]);

        let stats = p
            .process_batch(
                records(json!([{"WERKS": "A01", "AUFNR": "4000001", "MATNR": "M1"}])),
                &PlantScope::All,
            )
            .await
            .unwrap();
        assert_eq!(stats.pruned, 1);
        assert_eq!(material_numbers(&pool, "A01", "4000001").await, vec!["M1"]);
        // Orders not mentioned in the batch are untouched.
        assert_eq!(material_numbers(&pool, "A01", "4000002").await, vec!["M9"]);
    }

    #[tokio::test]
    async fn test_excluded_materials_never_persist() {
        let (pool, _dir) = setup_test_db().await;
        let stats = processor(&pool, 1000)
            .process_batch(
                records(json!([
                    {"WERKS": "A01", "AUFNR": "4000001", "MATNR": "11000001"},
                    {"WERKS": "A01", "AUFNR": "4000001", "MATNR": "000000000012000002"},
                    {"WERKS": "A01", "AUFNR": "4000001", "MATNR": "31000003"},
                    {"WERKS": "A01", "AUFNR": "4000001", "MATNR": "21000004"},
                ])),
                &PlantScope::All,
            )
            .await
            .unwrap();
        assert_eq!(stats.skipped, 3);
        assert_eq!(material_numbers(&pool, "A01", "4000001").await, vec!["21000004"]);
    }

    #[tokio::test]
    async fn test_work_order_reference_validated() {
        let (pool, _dir) = setup_test_db().await;
        ChunkedProcessor::new(pool.clone(), WorkOrderProcessor::new(), 1000)
            .process_batch(records(json!([{"AUFNR": "4000001", "WERKS": "A01"}])), &PlantScope::All)
            .await
            .unwrap();

        processor(&pool, 1000)
            .process_batch(
                records(json!([
                    {"WERKS": "A01", "AUFNR": "004000001", "MATNR": "M1"},
                    {"WERKS": "A01", "AUFNR": "4000777", "MATNR": "M1"},
                ])),
                &PlantScope::All,
            )
            .await
            .unwrap();

        let repo = DieselEntityRepository::new(pool.clone());
        let known = repo.get_materials("A01", "4000001").await.unwrap();
        assert!(known[0].work_order_id.is_some());
        let unknown = repo.get_materials("A01", "4000777").await.unwrap();
        assert_eq!(unknown[0].production_order, "4000777");
        assert!(unknown[0].work_order_id.is_none());
    }

    #[tokio::test]
    async fn test_groups_reconcile_across_chunks() {
        let (pool, _dir) = setup_test_db().await;
        let items: Vec<RawRecord> = (0..6)
            .flat_map(|order| {
                (0..3).map(move |m| {
                    json!({"WERKS": "A01", "AUFNR": format!("{}", 4000000 + order), "MATNR": format!("M{}", m)})
                        .as_object()
                        .cloned()
                        .unwrap()
                })
            })
            .collect();

        let stats = processor(&pool, 4).process_batch(items, &PlantScope::All).await.unwrap();
        assert_eq!(stats.merged, 18);
        assert_eq!(stats.pruned, 0);
        assert_eq!(count_rows(&pool, "equipment_materials"), 18);
    }

    #[tokio::test]
    async fn test_out_of_scope_groups_untouched() {
        let (pool, _dir) = setup_test_db().await;
        processor(&pool, 1000)
            .process_batch(
                records(json!([{"WERKS": "P2", "AUFNR": "4000001", "MATNR": "M1"}])),
                &PlantScope::All,
            )
            .await
            .unwrap();

        let stats = processor(&pool, 1000)
            .process_batch(
                records(json!([{"WERKS": "P2", "AUFNR": "4000001", "MATNR": "M2"}])),
                &PlantScope::only(["P1"]),
            )
            .await
            .unwrap();
        assert_eq!(stats.skipped, 1);
        assert_eq!(material_numbers(&pool, "P2", "4000001").await, vec!["M1"]);
    }
}
