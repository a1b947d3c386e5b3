//! Maintenance work orders.

use chrono::Utc;
use diesel::prelude::*;
use diesel::upsert::excluded;

use super::{collect_keys, load_equipment_ids, log_skip, BatchStats, DomainMerge, PlantLookup};
use crate::fetch::fields::normalize_key;
use crate::fetch::{FieldAlias, FieldReader, RawRecord};
use crate::models::DomainType;
use crate::repository::diesel_models::NewWorkOrder;
use crate::schema::work_orders;
use crate::sync::context::PlantScope;
use crate::sync::error::SyncResult;

const ORDER_NUMBER: FieldAlias = FieldAlias::new(
    "order_number",
    &["order_number", "orderNumber", "work_order", "MaintenanceOrder", "AUFNR"],
);
const ORDER_TYPE: FieldAlias = FieldAlias::new("order_type", &["order_type", "MaintenanceOrderType", "AUART"]);
const STATUS: FieldAlias = FieldAlias::new("status", &["status", "system_status", "user_status", "STTXT"]);
const PRIORITY: FieldAlias = FieldAlias::new("priority", &["priority", "PRIOK"]);
const DESCRIPTION: FieldAlias = FieldAlias::new("description", &["description", "short_text", "KTEXT"]);
const CAUSE: FieldAlias = FieldAlias::new("cause_text", &["cause_text", "cause", "damage_cause", "URTXT"]);
const EQUIPMENT: FieldAlias = FieldAlias::new("equipment_number", &["equipment_number", "equipment", "EQUNR"]);
const CREATED_ON: FieldAlias = FieldAlias::new("created_on", &["created_on", "created_date", "ERDAT"]);
const PLANNED_START: FieldAlias = FieldAlias::new("planned_start", &["planned_start", "basic_start_date", "GSTRP"]);
const PLANNED_FINISH: FieldAlias =
    FieldAlias::new("planned_finish", &["planned_finish", "basic_finish_date", "GLTRP"]);
const ACTUAL_FINISH: FieldAlias = FieldAlias::new("actual_finish", &["actual_finish", "actual_finish_date", "GETRI"]);
const DELETED: FieldAlias = FieldAlias::new("deleted", &["deleted", "is_deleted", "deletion_flag", "LOEKZ"]);

/// Merges work orders keyed by order number, one statement per item.
///
/// The equipment reference is stored as the raw equipment number plus a
/// resolved equipment id; the id stays NULL when the equipment is unknown.
#[derive(Debug, Default, Clone)]
pub struct WorkOrderProcessor;

impl WorkOrderProcessor {
    pub fn new() -> Self {
        Self
    }
}

impl DomainMerge for WorkOrderProcessor {
    fn domain(&self) -> DomainType {
        DomainType::WorkOrders
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
            let Some(order_number) = reader.text(&ORDER_NUMBER).map(|n| normalize_key(&n)) else {
                log_skip(self.domain(), None, "missing order number");
                stats.skipped += 1;
                continue;
            };
            let plant_id = match plants.resolve(&reader, scope) {
                Ok((_, id)) => id,
                Err(miss) => {
                    log_skip(self.domain(), Some(&order_number), miss.as_str());
                    stats.skipped += 1;
                    continue;
                }
            };

            if reader.flag(&DELETED) {
                diesel::delete(work_orders::table.filter(work_orders::order_number.eq(&order_number)))
                    .execute(conn)?;
                stats.deleted += 1;
                continue;
            }

            let equipment_number = reader.text(&EQUIPMENT).map(|n| normalize_key(&n));
            let equipment_id = equipment_number
                .as_ref()
                .and_then(|n| equipment_ids.get(n).copied());

            let row = NewWorkOrder {
                order_number,
                plant_id,
                equipment_number,
                equipment_id,
                order_type: reader.text(&ORDER_TYPE),
                status: reader.text(&STATUS),
                priority: reader.text(&PRIORITY),
                description: reader.text(&DESCRIPTION),
                cause_text: reader.text(&CAUSE),
                created_on: reader.date_string(&CREATED_ON),
                planned_start: reader.date_string(&PLANNED_START),
                planned_finish: reader.date_string(&PLANNED_FINISH),
                actual_finish: reader.date_string(&ACTUAL_FINISH),
                created_at: now.clone(),
                updated_at: now.clone(),
            };

            diesel::insert_into(work_orders::table)
                .values(&row)
                .on_conflict(work_orders::order_number)
                .do_update()
                .set((
                    work_orders::plant_id.eq(excluded(work_orders::plant_id)),
                    work_orders::equipment_number.eq(excluded(work_orders::equipment_number)),
                    work_orders::equipment_id.eq(excluded(work_orders::equipment_id)),
                    work_orders::order_type.eq(excluded(work_orders::order_type)),
                    work_orders::status.eq(excluded(work_orders::status)),
                    work_orders::priority.eq(excluded(work_orders::priority)),
                    work_orders::description.eq(excluded(work_orders::description)),
                    work_orders::cause_text.eq(excluded(work_orders::cause_text)),
                    work_orders::created_on.eq(excluded(work_orders::created_on)),
                    work_orders::planned_start.eq(excluded(work_orders::planned_start)),
                    work_orders::planned_finish.eq(excluded(work_orders::planned_finish)),
                    work_orders::actual_finish.eq(excluded(work_orders::actual_finish)),
                    work_orders::updated_at.eq(excluded(work_orders::updated_at)),
                ))
                .execute(conn)?;
            stats.merged += 1;
        }

        Ok(stats)
    }
}
