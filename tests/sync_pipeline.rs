//! End-to-end runs of the orchestrator against an in-memory fetcher.
//!
//! Each test seeds plants A01, P1 and P2 into a fresh SQLite file and drives
//! `SyncOrchestrator::sync_all` with canned API payloads.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use plantsync::fetch::{FetchError, Fetcher, RawRecord};
use plantsync::models::{DomainType, SyncStatus};
use plantsync::repository::migrations::run_migrations;
use plantsync::repository::{
    create_diesel_pool, DieselEntityRepository, DieselPlantRepository, DieselSyncLogRepository,
    SqlitePool,
};
use plantsync::sync::{
    OrchestratorSettings, RunContext, RunOutcome, SyncOrchestrator, SyncReport, SyncRequest,
};

/// Serves fixed records per domain type; `failing` types return an error.
#[derive(Default)]
struct CannedFetcher {
    records: HashMap<DomainType, Vec<RawRecord>>,
    failing: Vec<DomainType>,
}

impl CannedFetcher {
    fn with(mut self, domain: DomainType, items: Value) -> Self {
        self.records.insert(domain, to_records(items));
        self
    }

    fn failing(mut self, domain: DomainType) -> Self {
        self.failing.push(domain);
        self
    }
}

#[async_trait]
impl Fetcher for CannedFetcher {
    async fn fetch(&self, domain: DomainType, _ctx: &RunContext) -> Result<Vec<RawRecord>, FetchError> {
        if self.failing.contains(&domain) {
            return Err(FetchError::Status {
                url: format!("https://pm.example.com/api/{}", domain.as_str()),
                status: 503,
            });
        }
        Ok(self.records.get(&domain).cloned().unwrap_or_default())
    }
}

fn to_records(items: Value) -> Vec<RawRecord> {
    items
        .as_array()
        .expect("payload must be an array")
        .iter()
        .map(|v| v.as_object().cloned().expect("item must be an object"))
        .collect()
}

/// Create a temporary database with the schema and three active plants.
async fn setup_test_db() -> (SqlitePool, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let pool = create_diesel_pool(&dir.path().join("test.db")).expect("Failed to open pool");
    run_migrations(&pool).await.expect("Failed to run migrations");

    let plants = DieselPlantRepository::new(pool.clone());
    for code in ["A01", "P1", "P2"] {
        plants
            .upsert(code, &format!("Plant {code}"), true)
            .await
            .expect("Failed to seed plant");
    }
    (pool, dir)
}

async fn run(pool: &SqlitePool, fetcher: CannedFetcher, request: SyncRequest) -> SyncReport {
    SyncOrchestrator::new(pool.clone(), Arc::new(fetcher), OrchestratorSettings::default())
        .sync_all(&request)
        .await
        .expect("sync_all failed")
}

fn only(types: &[DomainType]) -> SyncRequest {
    SyncRequest {
        selected_types: Some(types.iter().copied().collect()),
        ..Default::default()
    }
}

fn three_equipment() -> Value {
    json!([
        {"EQUNR": "000000000010000001", "EQKTX": "Feed pump", "WERKS": "A01", "INGRP": "Pumps"},
        {"EQUNR": "10000002", "EQKTX": "Cooling fan", "WERKS": "A01", "STORT": "Hall 2"},
        {"EQUNR": "10000003", "EQKTX": "Conveyor", "WERKS": "A01"}
    ])
}

// ============================================================================
// Equipment and dependency order
// ============================================================================

#[tokio::test]
async fn equipment_run_reports_counts_and_run_log() {
    let (pool, _dir) = setup_test_db().await;
    let fetcher = CannedFetcher::default().with(DomainType::Equipment, three_equipment());

    let report = run(&pool, fetcher, only(&[DomainType::Equipment])).await;

    assert_eq!(
        report.outcome(DomainType::Equipment),
        Some(&RunOutcome::Completed { processed: 3, success: 3, failed: 0 })
    );
    let counts = DieselEntityRepository::new(pool.clone()).counts().await.unwrap();
    assert_eq!(counts.equipment, 3);

    let logs = DieselSyncLogRepository::new(pool.clone())
        .get_by_run(&report.run_id)
        .await
        .unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].status, SyncStatus::Completed);
    assert_eq!(logs[0].processed_count, 3);
    assert_eq!(logs[0].success_count, 3);
    assert!(logs[0].finished_at.is_some());
}

#[tokio::test]
async fn work_orders_link_equipment_from_same_run() {
    let (pool, _dir) = setup_test_db().await;
    let fetcher = CannedFetcher::default()
        .with(DomainType::Equipment, three_equipment())
        .with(
            DomainType::WorkOrders,
            json!([{"AUFNR": "4000001", "EQUNR": "10000001", "WERKS": "A01", "KTEXT": "Replace seal"}]),
        );

    let report = run(&pool, fetcher, SyncRequest::default()).await;
    assert!(report.is_success());

    let entities = DieselEntityRepository::new(pool.clone());
    let equipment = entities.get_equipment("10000001").await.unwrap().expect("equipment stored");
    let order = entities.get_work_order("4000001").await.unwrap().expect("work order stored");
    assert_eq!(order.equipment_id, Some(equipment.id));
    assert_eq!(order.description.as_deref(), Some("Replace seal"));
}

// ============================================================================
// Idempotence and deletion
// ============================================================================

#[tokio::test]
async fn repeated_run_does_not_duplicate_rows() {
    let (pool, _dir) = setup_test_db().await;
    let payload = || {
        CannedFetcher::default()
            .with(DomainType::Equipment, three_equipment())
            .with(
                DomainType::RunningTime,
                json!([
                    {"EQUNR": "10000001", "IDATE": "2026-10-01", "RUNTIME": 22.5, "WERKS": "A01"},
                    {"EQUNR": "10000001", "IDATE": "2026-10-02", "RUNTIME": 23.0, "WERKS": "A01"}
                ]),
            )
            .with(
                DomainType::DailyPlantData,
                json!([{"WERKS": "A01", "DATUM": "2026-10-01", "processing_status": 1}]),
            )
    };

    run(&pool, payload(), SyncRequest::default()).await;
    let first = DieselEntityRepository::new(pool.clone()).counts().await.unwrap();
    run(&pool, payload(), SyncRequest::default()).await;
    let second = DieselEntityRepository::new(pool.clone()).counts().await.unwrap();

    assert_eq!(first, second);
    assert_eq!(second.equipment, 3);
    assert_eq!(second.running_times, 2);
    assert_eq!(second.daily_plant_data, 1);
}

#[tokio::test]
async fn deletion_flag_removes_existing_row() {
    let (pool, _dir) = setup_test_db().await;
    run(
        &pool,
        CannedFetcher::default().with(DomainType::Equipment, three_equipment()),
        only(&[DomainType::Equipment]),
    )
    .await;

    let deletion = json!([{"EQUNR": "10000002", "WERKS": "A01", "LVORM": "X"}]);
    let report = run(
        &pool,
        CannedFetcher::default().with(DomainType::Equipment, deletion),
        only(&[DomainType::Equipment]),
    )
    .await;

    assert_eq!(
        report.outcome(DomainType::Equipment),
        Some(&RunOutcome::Completed { processed: 1, success: 1, failed: 0 })
    );
    let entities = DieselEntityRepository::new(pool.clone());
    assert!(entities.get_equipment("10000002").await.unwrap().is_none());
    assert!(entities.get_equipment("10000001").await.unwrap().is_some());
}

// ============================================================================
// Materials
// ============================================================================

#[tokio::test]
async fn material_sets_reconcile_per_order() {
    let (pool, _dir) = setup_test_db().await;
    let first = json!([
        {"MATNR": "M1", "AUFNR": "4000001", "WERKS": "A01", "BDMNG": 2},
        {"MATNR": "M2", "AUFNR": "4000001", "WERKS": "A01", "BDMNG": 1}
    ]);
    run(
        &pool,
        CannedFetcher::default().with(DomainType::EquipmentMaterials, first),
        only(&[DomainType::EquipmentMaterials]),
    )
    .await;

    let second = json!([{"MATNR": "M1", "AUFNR": "4000001", "WERKS": "A01", "BDMNG": 3}]);
    run(
        &pool,
        CannedFetcher::default().with(DomainType::EquipmentMaterials, second),
        only(&[DomainType::EquipmentMaterials]),
    )
    .await;

    let materials = DieselEntityRepository::new(pool.clone())
        .get_materials("A01", "4000001")
        .await
        .unwrap();
    assert_eq!(materials.len(), 1);
    assert_eq!(materials[0].material_number, "M1");
    assert_eq!(materials[0].requirement_quantity, Some(3.0));
}

#[tokio::test]
async fn excluded_material_prefixes_are_never_stored() {
    let (pool, _dir) = setup_test_db().await;
    let items = json!([
        {"MATNR": "11000123", "AUFNR": "4000001", "WERKS": "A01"},
        {"MATNR": "31000999", "AUFNR": "4000001", "WERKS": "A01"},
        {"MATNR": "20000456", "AUFNR": "4000001", "WERKS": "A01"}
    ]);
    let fetcher = CannedFetcher::default()
        .with(DomainType::EquipmentMaterials, items.clone())
        .with(DomainType::EquipmentWorkOrders, items);

    let report = run(&pool, fetcher, SyncRequest::default()).await;
    assert!(report.is_success());

    let entities = DieselEntityRepository::new(pool.clone());
    let materials = entities.get_materials("A01", "4000001").await.unwrap();
    let numbers: Vec<&str> = materials.iter().map(|m| m.material_number.as_str()).collect();
    assert_eq!(numbers, vec!["20000456"]);

    let components = entities.get_equipment_work_orders("A01", "4000001").await.unwrap();
    assert_eq!(components.len(), 1);
    assert_eq!(components[0].material_number, "20000456");
}

// ============================================================================
// Isolation and scoping
// ============================================================================

#[tokio::test]
async fn failing_fetch_fails_only_its_type() {
    let (pool, _dir) = setup_test_db().await;
    let fetcher = CannedFetcher::default()
        .with(DomainType::Equipment, three_equipment())
        .with(
            DomainType::DailyPlantData,
            json!([{"WERKS": "A01", "DATUM": "2026-10-01", "processing_status": 0}]),
        )
        .failing(DomainType::RunningTime);

    let report = run(&pool, fetcher, SyncRequest::default()).await;

    assert!(!report.is_success());
    match report.outcome(DomainType::RunningTime) {
        Some(RunOutcome::Failed { error }) => assert!(error.contains("503")),
        other => panic!("expected running_time to fail, got {other:?}"),
    }
    for domain in DomainType::ALL {
        if domain != DomainType::RunningTime {
            assert!(
                matches!(report.outcome(domain), Some(RunOutcome::Completed { .. })),
                "{domain} should complete"
            );
        }
    }

    let counts = DieselEntityRepository::new(pool.clone()).counts().await.unwrap();
    assert_eq!(counts.equipment, 3);
    assert_eq!(counts.daily_plant_data, 1);

    let logs = DieselSyncLogRepository::new(pool.clone())
        .get_by_run(&report.run_id)
        .await
        .unwrap();
    assert_eq!(logs.len(), 6);
    let failed: Vec<_> = logs.iter().filter(|l| l.status == SyncStatus::Failed).collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].domain_type, DomainType::RunningTime.as_str());
}

#[tokio::test]
async fn plant_scope_limits_what_is_written() {
    let (pool, _dir) = setup_test_db().await;

    // Seed a P2 material group that a P1-only run must leave alone.
    run(
        &pool,
        CannedFetcher::default().with(
            DomainType::EquipmentMaterials,
            json!([{"MATNR": "M9", "AUFNR": "4000009", "WERKS": "P2"}]),
        ),
        only(&[DomainType::EquipmentMaterials]),
    )
    .await;

    let fetcher = CannedFetcher::default()
        .with(
            DomainType::Equipment,
            json!([
                {"EQUNR": "20000001", "WERKS": "P1"},
                {"EQUNR": "20000002", "WERKS": "P2"}
            ]),
        )
        .with(
            DomainType::EquipmentMaterials,
            json!([
                {"MATNR": "M1", "AUFNR": "4000001", "WERKS": "P1"},
                {"MATNR": "M2", "AUFNR": "4000009", "WERKS": "P2"}
            ]),
        );
    let request = SyncRequest {
        plant_codes: Some(vec!["P1".to_string()]),
        ..Default::default()
    };
    let report = run(&pool, fetcher, request).await;
    assert!(report.is_success());

    let entities = DieselEntityRepository::new(pool.clone());
    assert!(entities.get_equipment("20000001").await.unwrap().is_some());
    assert!(entities.get_equipment("20000002").await.unwrap().is_none());

    assert_eq!(entities.get_materials("P1", "4000001").await.unwrap().len(), 1);
    let untouched = entities.get_materials("P2", "4000009").await.unwrap();
    assert_eq!(untouched.len(), 1);
    assert_eq!(untouched[0].material_number, "M9");
}
