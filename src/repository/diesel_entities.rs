//! Read access to synced entities.
//!
//! Writes go exclusively through the processors; this repository only serves
//! lookups for status output and verification.

use diesel::prelude::*;
use serde::Serialize;

use super::diesel_models::{
    DailyPlantDataRecord, EquipmentMaterialRecord, EquipmentRecord, EquipmentWorkOrderRecord,
    RunningTimeRecord, WorkOrderRecord,
};
use super::diesel_pool::{run_blocking, DieselError, SqlitePool};
use crate::schema::{
    daily_plant_data, equipment, equipment_materials, equipment_work_orders, plants,
    running_times, work_orders,
};

/// Row counts per synced table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EntityCounts {
    pub plants: u64,
    pub equipment: u64,
    pub work_orders: u64,
    pub running_times: u64,
    pub equipment_work_orders: u64,
    pub equipment_materials: u64,
    pub daily_plant_data: u64,
}

/// Read-only repository over the synced entity tables.
#[derive(Clone)]
pub struct DieselEntityRepository {
    pool: SqlitePool,
}

impl DieselEntityRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Count rows in every synced table.
    pub async fn counts(&self) -> Result<EntityCounts, DieselError> {
        let pool = self.pool.clone();

        run_blocking(pool, move |conn| {
            use diesel::dsl::count_star;
            let count = |n: i64| n.max(0) as u64;
            Ok(EntityCounts {
                plants: count(plants::table.select(count_star()).first(conn)?),
                equipment: count(equipment::table.select(count_star()).first(conn)?),
                work_orders: count(work_orders::table.select(count_star()).first(conn)?),
                running_times: count(running_times::table.select(count_star()).first(conn)?),
                equipment_work_orders: count(
                    equipment_work_orders::table.select(count_star()).first(conn)?,
                ),
                equipment_materials: count(
                    equipment_materials::table.select(count_star()).first(conn)?,
                ),
                daily_plant_data: count(daily_plant_data::table.select(count_star()).first(conn)?),
            })
        })
        .await
    }

    /// Get equipment by equipment number.
    pub async fn get_equipment(
        &self,
        equipment_number: &str,
    ) -> Result<Option<EquipmentRecord>, DieselError> {
        let number = equipment_number.to_string();
        let pool = self.pool.clone();

        run_blocking(pool, move |conn| {
            equipment::table
                .filter(equipment::equipment_number.eq(&number))
                .first::<EquipmentRecord>(conn)
                .optional()
        })
        .await
    }

    /// Get a work order by order number.
    pub async fn get_work_order(
        &self,
        order_number: &str,
    ) -> Result<Option<WorkOrderRecord>, DieselError> {
        let number = order_number.to_string();
        let pool = self.pool.clone();

        run_blocking(pool, move |conn| {
            work_orders::table
                .filter(work_orders::order_number.eq(&number))
                .first::<WorkOrderRecord>(conn)
                .optional()
        })
        .await
    }

    /// Running time readings for one piece of equipment, oldest first.
    pub async fn get_running_times(
        &self,
        equipment_number: &str,
    ) -> Result<Vec<RunningTimeRecord>, DieselError> {
        let number = equipment_number.to_string();
        let pool = self.pool.clone();

        run_blocking(pool, move |conn| {
            running_times::table
                .filter(running_times::equipment_number.eq(&number))
                .order(running_times::reading_date.asc())
                .load::<RunningTimeRecord>(conn)
        })
        .await
    }

    /// Order components of a work order within a plant.
    pub async fn get_equipment_work_orders(
        &self,
        plant_code: &str,
        order_number: &str,
    ) -> Result<Vec<EquipmentWorkOrderRecord>, DieselError> {
        let plant_code = plant_code.to_string();
        let number = order_number.to_string();
        let pool = self.pool.clone();

        run_blocking(pool, move |conn| {
            equipment_work_orders::table
                .inner_join(plants::table)
                .filter(plants::code.eq(&plant_code))
                .filter(equipment_work_orders::order_number.eq(&number))
                .order(equipment_work_orders::material_number.asc())
                .select(EquipmentWorkOrderRecord::as_select())
                .load(conn)
        })
        .await
    }

    /// Materials persisted for a (plant, production order) pair.
    pub async fn get_materials(
        &self,
        plant_code: &str,
        production_order: &str,
    ) -> Result<Vec<EquipmentMaterialRecord>, DieselError> {
        let plant_code = plant_code.to_string();
        let order = production_order.to_string();
        let pool = self.pool.clone();

        run_blocking(pool, move |conn| {
            equipment_materials::table
                .inner_join(plants::table)
                .filter(plants::code.eq(&plant_code))
                .filter(equipment_materials::production_order.eq(&order))
                .order(equipment_materials::material_number.asc())
                .select(EquipmentMaterialRecord::as_select())
                .load(conn)
        })
        .await
    }

    /// Daily status rows for a plant, oldest first.
    pub async fn get_daily_plant_data(
        &self,
        plant_code: &str,
    ) -> Result<Vec<DailyPlantDataRecord>, DieselError> {
        let plant_code = plant_code.to_string();
        let pool = self.pool.clone();

        run_blocking(pool, move |conn| {
            daily_plant_data::table
                .inner_join(plants::table)
                .filter(plants::code.eq(&plant_code))
                .order(daily_plant_data::data_date.asc())
                .select(DailyPlantDataRecord::as_select())
                .load(conn)
        })
        .await
    }
}
