//! Work order components (materials reserved against a maintenance order).
//!
//! Two feeds deliver this data. The reservation feed uses the ERP table
//! field names (`RSNUM`, `MATNR`, `BDMNG`, ...); the component feed uses
//! descriptive names and may report the open quantity instead of the
//! withdrawn one. Both are normalized into [`NewEquipmentWorkOrder`].

use chrono::Utc;
use diesel::prelude::*;
use diesel::upsert::excluded;

use super::{
    collect_keys, load_equipment_ids, load_work_orders, log_skip, BatchStats, DomainMerge,
    KeyedActions, MaterialExclusions, PlantLookup,
};
use crate::fetch::fields::normalize_key;
use crate::fetch::{FieldAlias, FieldReader, RawRecord};
use crate::models::DomainType;
use crate::repository::diesel_models::NewEquipmentWorkOrder;
use crate::schema::equipment_work_orders as ewo;
use crate::sync::context::PlantScope;
use crate::sync::error::SyncResult;

// One ordered alias list per field covers both feeds, so a record mixing
// their spellings still resolves every field.
const ORDER: FieldAlias = FieldAlias::new(
    "order_number",
    &["order_number", "orderNumber", "work_order", "production_order", "AUFNR"],
);
const MATERIAL: FieldAlias =
    FieldAlias::new("material_number", &["material_number", "materialNumber", "material", "MATNR"]);
const EQUIPMENT: FieldAlias = FieldAlias::new("equipment_number", &["equipment_number", "equipment", "EQUNR"]);
const RESERVATION: FieldAlias =
    FieldAlias::new("reservation_number", &["reservation_number", "reservation", "RSNUM"]);
const RESERVATION_ITEM: FieldAlias = FieldAlias::new("reservation_item", &["reservation_item", "item", "RSPOS"]);
const DESCRIPTION: FieldAlias =
    FieldAlias::new("description", &["description", "material_description", "MAKTX", "POTX1"]);
const REQUIRED: FieldAlias = FieldAlias::new(
    "requirement_quantity",
    &["requirement_quantity", "required_quantity", "quantity", "BDMNG", "ERFMG"],
);
const WITHDRAWN: FieldAlias =
    FieldAlias::new("withdrawn_quantity", &["withdrawn_quantity", "issued_quantity", "ENMNG"]);
/// Only the component feed reports what is still open.
const OPEN: FieldAlias = FieldAlias::new("open_quantity", &["open_quantity", "remaining_quantity"]);
const UNIT: FieldAlias = FieldAlias::new("unit", &["unit", "unit_of_measure", "uom", "MEINS", "ERFME"]);
const FINAL_ISSUE: FieldAlias = FieldAlias::new("is_final_issue", &["is_final_issue", "final_issue", "KZEAR"]);
const MOVEMENT_ALLOWED: FieldAlias = FieldAlias::new(
    "movement_allowed",
    &["movement_allowed", "goods_movement_allowed", "XWAOK"],
);
const SERVICE_START: FieldAlias = FieldAlias::new(
    "service_start",
    &["service_start", "service_start_date", "start_date", "GSTRP", "BDTER"],
);
const SERVICE_END: FieldAlias =
    FieldAlias::new("service_end", &["service_end", "service_end_date", "end_date", "GLTRP"]);
const DELETED: FieldAlias =
    FieldAlias::new("deleted", &["deleted", "is_deleted", "deletion_flag", "XLOEK", "LOEKZ"]);

/// Merges order components keyed by (plant, order number, material number).
#[derive(Debug, Default, Clone)]
pub struct EquipmentWorkOrderProcessor {
    exclusions: MaterialExclusions,
}

impl EquipmentWorkOrderProcessor {
    pub fn new(exclusions: MaterialExclusions) -> Self {
        Self { exclusions }
    }
}

/// Component fields resolved from a raw record.
struct Component {
    order_number: String,
    material_number: String,
    equipment_number: Option<String>,
    reservation_number: Option<String>,
    reservation_item: Option<String>,
    description: Option<String>,
    requirement_quantity: Option<f64>,
    withdrawn_quantity: Option<f64>,
    unit: Option<String>,
    is_final_issue: bool,
    movement_allowed: bool,
    service_start: Option<String>,
    service_end: Option<String>,
    deleted: bool,
}

impl Component {
    fn read(item: &RawRecord) -> Option<Self> {
        let reader = FieldReader::new(item);
        let order_number = normalize_key(&reader.text(&ORDER)?);
        let material_number = normalize_key(&reader.text(&MATERIAL)?);

        let requirement_quantity = reader.number(&REQUIRED);
        let withdrawn_quantity = reader.number(&WITHDRAWN).or_else(|| {
            let open = reader.number(&OPEN)?;
            requirement_quantity.map(|required| (required - open).max(0.0))
        });

        Some(Self {
            order_number,
            material_number,
            equipment_number: reader.text(&EQUIPMENT).map(|n| normalize_key(&n)),
            reservation_number: reader.text(&RESERVATION).map(|n| normalize_key(&n)),
            reservation_item: reader.text(&RESERVATION_ITEM).map(|n| normalize_key(&n)),
            description: reader.text(&DESCRIPTION),
            requirement_quantity,
            withdrawn_quantity,
            unit: reader.text(&UNIT),
            is_final_issue: reader.flag(&FINAL_ISSUE),
            movement_allowed: reader.flag(&MOVEMENT_ALLOWED),
            service_start: reader.date_string(&SERVICE_START),
            service_end: reader.date_string(&SERVICE_END),
            deleted: reader.flag(&DELETED),
        })
    }
}

impl DomainMerge for EquipmentWorkOrderProcessor {
    fn domain(&self) -> DomainType {
        DomainType::EquipmentWorkOrders
    }

    fn merge_chunk(
        &self,
        conn: &mut SqliteConnection,
        chunk: &[RawRecord],
        scope: &PlantScope,
    ) -> SyncResult<BatchStats> {
        let now = Utc::now().to_rfc3339();
        let plants = PlantLookup::load(conn, chunk, scope)?;

        let components: Vec<Option<Component>> = chunk.iter().map(Component::read).collect();
        let order_numbers: Vec<String> = {
            let mut numbers: Vec<String> = components
                .iter()
                .flatten()
                .map(|c| c.order_number.clone())
                .collect();
            numbers.sort();
            numbers.dedup();
            numbers
        };
        let orders = load_work_orders(conn, &order_numbers)?;
        let mut equipment_numbers = collect_keys(chunk, &EQUIPMENT);
        equipment_numbers.extend(orders.values().filter_map(|(_, e)| e.clone()));
        equipment_numbers.sort();
        equipment_numbers.dedup();
        let equipment_ids = load_equipment_ids(conn, &equipment_numbers)?;

        let mut stats = BatchStats {
            processed: chunk.len() as u64,
            ..Default::default()
        };
        let mut actions: KeyedActions<(i32, String, String), NewEquipmentWorkOrder> = KeyedActions::new();

        for (item, component) in chunk.iter().zip(components) {
            let Some(component) = component else {
                log_skip(self.domain(), None, "missing order or material number");
                stats.skipped += 1;
                continue;
            };
            if self.exclusions.is_excluded(&component.material_number) {
                log_skip(self.domain(), Some(&component.material_number), "excluded material");
                stats.skipped += 1;
                continue;
            }
            let plant_id = match plants.require(&FieldReader::new(item), scope) {
                Ok((_, id)) => id,
                Err(miss) => {
                    log_skip(self.domain(), Some(&component.order_number), miss.as_str());
                    stats.skipped += 1;
                    continue;
                }
            };

            let key = (
                plant_id,
                component.order_number.clone(),
                component.material_number.clone(),
            );
            if component.deleted {
                actions.delete(key);
                stats.deleted += 1;
                continue;
            }

            let order = orders.get(&component.order_number);
            let equipment_number = component
                .equipment_number
                .or_else(|| order.and_then(|(_, e)| e.clone()));
            let equipment_id = equipment_number
                .as_ref()
                .and_then(|n| equipment_ids.get(n).copied());

            actions.upsert(
                key,
                NewEquipmentWorkOrder {
                    plant_id,
                    order_number: component.order_number,
                    material_number: component.material_number,
                    work_order_id: order.map(|(id, _)| *id),
                    equipment_number,
                    equipment_id,
                    reservation_number: component.reservation_number,
                    reservation_item: component.reservation_item,
                    description: component.description,
                    requirement_quantity: component.requirement_quantity,
                    withdrawn_quantity: component.withdrawn_quantity,
                    unit: component.unit,
                    is_final_issue: i32::from(component.is_final_issue),
                    movement_allowed: i32::from(component.movement_allowed),
                    service_start: component.service_start,
                    service_end: component.service_end,
                    created_at: now.clone(),
                    updated_at: now.clone(),
                },
            );
            stats.merged += 1;
        }

        let (rows, deletes) = actions.into_parts();

        for row in &rows {
            diesel::insert_into(ewo::table)
                .values(row)
                .on_conflict((ewo::plant_id, ewo::order_number, ewo::material_number))
                .do_update()
                .set((
                    ewo::work_order_id.eq(excluded(ewo::work_order_id)),
                    ewo::equipment_number.eq(excluded(ewo::equipment_number)),
                    ewo::equipment_id.eq(excluded(ewo::equipment_id)),
                    ewo::reservation_number.eq(excluded(ewo::reservation_number)),
                    ewo::reservation_item.eq(excluded(ewo::reservation_item)),
                    ewo::description.eq(excluded(ewo::description)),
                    ewo::requirement_quantity.eq(excluded(ewo::requirement_quantity)),
                    ewo::withdrawn_quantity.eq(excluded(ewo::withdrawn_quantity)),
                    ewo::unit.eq(excluded(ewo::unit)),
                    ewo::is_final_issue.eq(excluded(ewo::is_final_issue)),
                    ewo::movement_allowed.eq(excluded(ewo::movement_allowed)),
                    ewo::service_start.eq(excluded(ewo::service_start)),
                    ewo::service_end.eq(excluded(ewo::service_end)),
                    ewo::updated_at.eq(excluded(ewo::updated_at)),
                ))
                .execute(conn)?;
        }

        for (plant_id, order_number, material_number) in deletes {
            diesel::delete(
                ewo::table
                    .filter(ewo::plant_id.eq(plant_id))
                    .filter(ewo::order_number.eq(order_number))
                    .filter(ewo::material_number.eq(material_number)),
            )
            .execute(conn)?;
        }

        Ok(stats)
    }
}
