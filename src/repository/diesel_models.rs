//! Diesel ORM models for database tables.
//!
//! Insertables for synced entities own their data because processors collect
//! a whole chunk of rows before upserting them. `None` is written as NULL
//! rather than DEFAULT so an upsert clears a value the source no longer sends.

use diesel::prelude::*;

use crate::schema;

/// Plant record from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::plants)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct PlantRecord {
    pub id: i32,
    pub code: String,
    pub name: String,
    pub is_active: i32,
    pub created_at: String,
    pub updated_at: String,
}

/// New plant for insertion.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::plants)]
pub struct NewPlant<'a> {
    pub code: &'a str,
    pub name: &'a str,
    pub is_active: i32,
    pub created_at: &'a str,
    pub updated_at: &'a str,
}

/// Run Log record from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::sync_logs)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct SyncLogRecord {
    pub id: i32,
    pub run_id: String,
    pub domain_type: String,
    pub status: String,
    pub processed_count: i32,
    pub success_count: i32,
    pub failed_count: i32,
    pub error_message: Option<String>,
    pub started_at: String,
    pub finished_at: Option<String>,
}

/// New Run Log entry for insertion.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::sync_logs)]
pub struct NewSyncLog<'a> {
    pub run_id: &'a str,
    pub domain_type: &'a str,
    pub status: &'a str,
    pub started_at: &'a str,
}

/// Equipment record from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::equipment)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct EquipmentRecord {
    pub id: i32,
    pub equipment_number: String,
    pub plant_id: Option<i32>,
    pub group_id: Option<i32>,
    pub station_id: Option<i32>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub object_type: Option<String>,
    pub abc_indicator: Option<String>,
    pub functional_location: Option<String>,
    pub functional_location_desc: Option<String>,
    pub manufacturer: Option<String>,
    pub model_number: Option<String>,
    pub status: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Equipment row for upsert.
#[derive(Insertable, Debug, Clone, PartialEq)]
#[diesel(table_name = schema::equipment)]
#[diesel(treat_none_as_default_value = false)]
pub struct NewEquipment {
    pub equipment_number: String,
    pub plant_id: Option<i32>,
    pub group_id: Option<i32>,
    pub station_id: Option<i32>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub object_type: Option<String>,
    pub abc_indicator: Option<String>,
    pub functional_location: Option<String>,
    pub functional_location_desc: Option<String>,
    pub manufacturer: Option<String>,
    pub model_number: Option<String>,
    pub status: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Work order record from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::work_orders)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct WorkOrderRecord {
    pub id: i32,
    pub order_number: String,
    pub plant_id: Option<i32>,
    pub equipment_number: Option<String>,
    pub equipment_id: Option<i32>,
    pub order_type: Option<String>,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub description: Option<String>,
    pub cause_text: Option<String>,
    pub created_on: Option<String>,
    pub planned_start: Option<String>,
    pub planned_finish: Option<String>,
    pub actual_finish: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Work order row for upsert.
#[derive(Insertable, Debug, Clone, PartialEq)]
#[diesel(table_name = schema::work_orders)]
#[diesel(treat_none_as_default_value = false)]
pub struct NewWorkOrder {
    pub order_number: String,
    pub plant_id: Option<i32>,
    pub equipment_number: Option<String>,
    pub equipment_id: Option<i32>,
    pub order_type: Option<String>,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub description: Option<String>,
    pub cause_text: Option<String>,
    pub created_on: Option<String>,
    pub planned_start: Option<String>,
    pub planned_finish: Option<String>,
    pub actual_finish: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Running time record from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::running_times)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct RunningTimeRecord {
    pub id: i32,
    pub plant_id: i32,
    pub equipment_number: String,
    pub equipment_id: Option<i32>,
    pub reading_date: String,
    pub running_hours: Option<f64>,
    pub counter_reading: Option<f64>,
    pub unit: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Running time row for upsert.
#[derive(Insertable, Debug, Clone, PartialEq)]
#[diesel(table_name = schema::running_times)]
#[diesel(treat_none_as_default_value = false)]
pub struct NewRunningTime {
    pub plant_id: i32,
    pub equipment_number: String,
    pub equipment_id: Option<i32>,
    pub reading_date: String,
    pub running_hours: Option<f64>,
    pub counter_reading: Option<f64>,
    pub unit: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Equipment work order (order component) record from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::equipment_work_orders)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct EquipmentWorkOrderRecord {
    pub id: i32,
    pub plant_id: i32,
    pub order_number: String,
    pub material_number: String,
    pub work_order_id: Option<i32>,
    pub equipment_number: Option<String>,
    pub equipment_id: Option<i32>,
    pub reservation_number: Option<String>,
    pub reservation_item: Option<String>,
    pub description: Option<String>,
    pub requirement_quantity: Option<f64>,
    pub withdrawn_quantity: Option<f64>,
    pub unit: Option<String>,
    pub is_final_issue: i32,
    pub movement_allowed: i32,
    pub service_start: Option<String>,
    pub service_end: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Equipment work order row for upsert.
#[derive(Insertable, Debug, Clone, PartialEq)]
#[diesel(table_name = schema::equipment_work_orders)]
#[diesel(treat_none_as_default_value = false)]
pub struct NewEquipmentWorkOrder {
    pub plant_id: i32,
    pub order_number: String,
    pub material_number: String,
    pub work_order_id: Option<i32>,
    pub equipment_number: Option<String>,
    pub equipment_id: Option<i32>,
    pub reservation_number: Option<String>,
    pub reservation_item: Option<String>,
    pub description: Option<String>,
    pub requirement_quantity: Option<f64>,
    pub withdrawn_quantity: Option<f64>,
    pub unit: Option<String>,
    pub is_final_issue: i32,
    pub movement_allowed: i32,
    pub service_start: Option<String>,
    pub service_end: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Equipment material record from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::equipment_materials)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct EquipmentMaterialRecord {
    pub id: i32,
    pub plant_id: i32,
    pub material_number: String,
    pub production_order: String,
    pub work_order_id: Option<i32>,
    pub reservation_number: Option<String>,
    pub reservation_item: Option<String>,
    pub description: Option<String>,
    pub requirement_quantity: Option<f64>,
    pub withdrawn_quantity: Option<f64>,
    pub unit: Option<String>,
    pub value: Option<f64>,
    pub currency: Option<String>,
    pub is_final_issue: i32,
    pub storage_location: Option<String>,
    pub storage_bin: Option<String>,
    pub batch_number: Option<String>,
    pub requirement_date: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Equipment material row for upsert.
#[derive(Insertable, Debug, Clone, PartialEq)]
#[diesel(table_name = schema::equipment_materials)]
#[diesel(treat_none_as_default_value = false)]
pub struct NewEquipmentMaterial {
    pub plant_id: i32,
    pub material_number: String,
    pub production_order: String,
    pub work_order_id: Option<i32>,
    pub reservation_number: Option<String>,
    pub reservation_item: Option<String>,
    pub description: Option<String>,
    pub requirement_quantity: Option<f64>,
    pub withdrawn_quantity: Option<f64>,
    pub unit: Option<String>,
    pub value: Option<f64>,
    pub currency: Option<String>,
    pub is_final_issue: i32,
    pub storage_location: Option<String>,
    pub storage_bin: Option<String>,
    pub batch_number: Option<String>,
    pub requirement_date: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Daily plant status record from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::daily_plant_data)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct DailyPlantDataRecord {
    pub id: i32,
    pub plant_id: i32,
    pub data_date: String,
    pub is_processed: i32,
    pub created_at: String,
    pub updated_at: String,
}

/// Daily plant status row for upsert.
#[derive(Insertable, Debug, Clone, PartialEq)]
#[diesel(table_name = schema::daily_plant_data)]
pub struct NewDailyPlantData {
    pub plant_id: i32,
    pub data_date: String,
    pub is_processed: i32,
    pub created_at: String,
    pub updated_at: String,
}
