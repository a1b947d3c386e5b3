//! Sync orchestration across domain types.
//!
//! Fetches for every selected type are dispatched up front (bounded by
//! `fetch_concurrency`, each under `fetch_timeout`). Persistence then walks the
//! types strictly in dependency order, one at a time, so a later type always
//! sees the committed rows of earlier ones. A failing type is recorded on its
//! Run Log and the run moves on.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::context::{DateRanges, PlantScope, RunContext};
use super::error::{SyncError, SyncResult};
use super::processor::{
    BatchStats, ChunkedProcessor, DailyPlantDataProcessor, EquipmentMaterialProcessor,
    EquipmentProcessor, EquipmentWorkOrderProcessor, MaterialExclusions, Processor,
    RunningTimeProcessor, WorkOrderProcessor, DEFAULT_CHUNK_SIZE,
};
use crate::fetch::{FetchError, Fetcher, RawRecord};
use crate::models::DomainType;
use crate::repository::diesel_pool::DieselError;
use crate::repository::diesel_sync_log::RunCounts;
use crate::repository::{DieselPlantRepository, DieselSyncLogRepository, SqlitePool};

/// Material number prefixes excluded unless configured otherwise.
pub const DEFAULT_EXCLUDED_PREFIXES: [&str; 3] = ["11", "12", "31"];

/// Tuning for a [`SyncOrchestrator`].
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub chunk_size: usize,
    pub fetch_timeout: Duration,
    pub fetch_concurrency: usize,
    pub excluded_material_prefixes: Vec<String>,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            fetch_timeout: Duration::from_secs(300),
            fetch_concurrency: 4,
            excluded_material_prefixes: DEFAULT_EXCLUDED_PREFIXES.iter().map(|p| p.to_string()).collect(),
        }
    }
}

/// What to synchronize.
#[derive(Debug, Clone, Default)]
pub struct SyncRequest {
    /// Plants to touch; `None` means every active plant.
    pub plant_codes: Option<Vec<String>>,
    pub date_ranges: DateRanges,
    /// Types to run; `None` means all.
    pub selected_types: Option<BTreeSet<DomainType>>,
}

impl SyncRequest {
    fn is_selected(&self, domain: DomainType) -> bool {
        self.selected_types
            .as_ref()
            .map_or(true, |types| types.contains(&domain))
    }
}

/// Result of one domain type within a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    Completed { processed: u32, success: u32, failed: u32 },
    Skipped,
    Failed { error: String },
}

impl RunOutcome {
    fn completed(counts: RunCounts) -> Self {
        RunOutcome::Completed {
            processed: counts.processed,
            success: counts.success,
            failed: counts.failed,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, RunOutcome::Failed { .. })
    }
}

/// Per-type outcomes of one run, keyed in processing order.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub run_id: String,
    pub outcomes: BTreeMap<DomainType, RunOutcome>,
}

impl SyncReport {
    pub fn outcome(&self, domain: DomainType) -> Option<&RunOutcome> {
        self.outcomes.get(&domain)
    }

    /// True when no selected type failed.
    pub fn is_success(&self) -> bool {
        !self.outcomes.values().any(RunOutcome::is_failed)
    }
}

type FetchTask = JoinHandle<Result<Vec<RawRecord>, FetchError>>;

/// Runs the fetch/process pipeline for the selected domain types.
pub struct SyncOrchestrator {
    fetcher: Arc<dyn Fetcher>,
    processors: BTreeMap<DomainType, Arc<dyn Processor>>,
    plants: DieselPlantRepository,
    sync_logs: DieselSyncLogRepository,
    settings: OrchestratorSettings,
}

impl SyncOrchestrator {
    /// Create an orchestrator with the standard processor for every type.
    pub fn new(pool: SqlitePool, fetcher: Arc<dyn Fetcher>, settings: OrchestratorSettings) -> Self {
        let exclusions = MaterialExclusions::new(&settings.excluded_material_prefixes);
        let chunk = settings.chunk_size;
        let processors: Vec<Arc<dyn Processor>> = vec![
            Arc::new(ChunkedProcessor::new(pool.clone(), EquipmentProcessor::new(), chunk)),
            Arc::new(ChunkedProcessor::new(pool.clone(), WorkOrderProcessor::new(), chunk)),
            Arc::new(ChunkedProcessor::new(pool.clone(), RunningTimeProcessor::new(), chunk)),
            Arc::new(ChunkedProcessor::new(
                pool.clone(),
                EquipmentWorkOrderProcessor::new(exclusions.clone()),
                chunk,
            )),
            Arc::new(ChunkedProcessor::new(
                pool.clone(),
                EquipmentMaterialProcessor::new(exclusions),
                chunk,
            )),
            Arc::new(ChunkedProcessor::new(pool.clone(), DailyPlantDataProcessor::new(), chunk)),
        ];

        Self {
            fetcher,
            processors: processors.into_iter().map(|p| (p.domain(), p)).collect(),
            plants: DieselPlantRepository::new(pool.clone()),
            sync_logs: DieselSyncLogRepository::new(pool),
            settings,
        }
    }

    /// Replace the processor for the processor's domain type.
    pub fn with_processor(mut self, processor: Arc<dyn Processor>) -> Self {
        self.processors.insert(processor.domain(), processor);
        self
    }

    /// Resolve the request's plant list; omitted means all active plants.
    async fn resolve_scope(&self, request: &SyncRequest) -> SyncResult<PlantScope> {
        match &request.plant_codes {
            Some(codes) => Ok(PlantScope::only(codes)),
            None => Ok(PlantScope::only(self.plants.get_active_codes().await?)),
        }
    }

    fn spawn_fetch(&self, domain: DomainType, ctx: RunContext, permits: Arc<Semaphore>) -> FetchTask {
        let fetcher = Arc::clone(&self.fetcher);
        let limit = self.settings.fetch_timeout;
        tokio::spawn(async move {
            let _permit = permits
                .acquire_owned()
                .await
                .map_err(|e| FetchError::Unavailable(e.to_string()))?;
            match tokio::time::timeout(limit, fetcher.fetch(domain, &ctx)).await {
                Ok(result) => result,
                Err(_) => Err(FetchError::Timeout(limit)),
            }
        })
    }

    /// Run one sync across the selected domain types.
    ///
    /// Only resolving the plant list can fail the call as a whole; every
    /// per-type failure is reported in the returned [`SyncReport`].
    #[tracing::instrument(skip_all, fields(run_id = tracing::field::Empty))]
    pub async fn sync_all(&self, request: &SyncRequest) -> SyncResult<SyncReport> {
        let run_id = Uuid::new_v4().to_string();
        tracing::Span::current().record("run_id", run_id.as_str());

        let scope = self.resolve_scope(request).await?;
        let plant_count = scope.codes().map_or(0, |c| c.len());
        if scope.is_empty() {
            warn!(run_id = %run_id, "No plants in scope; every record will be skipped");
        }
        info!(run_id = %run_id, plants = plant_count, "Starting sync run");

        let mut outcomes: BTreeMap<DomainType, RunOutcome> = BTreeMap::new();
        let permits = Arc::new(Semaphore::new(self.settings.fetch_concurrency.max(1)));
        let mut pending = Vec::new();

        for domain in DomainType::ALL {
            if !request.is_selected(domain) {
                outcomes.insert(domain, RunOutcome::Skipped);
                continue;
            }

            let log = match self.sync_logs.create(&run_id, domain).await {
                Ok(log) => log,
                Err(e) => {
                    error!(domain = %domain, error = %e, "Failed to create Run Log");
                    outcomes.insert(domain, RunOutcome::Failed { error: e.to_string() });
                    continue;
                }
            };
            match self.sync_logs.mark_running(log.id).await {
                Ok(true) => {}
                Ok(false) => warn!(domain = %domain, log_id = log.id, "Run Log was not pending"),
                Err(e) => warn!(domain = %domain, error = %e, "Failed to mark Run Log running"),
            }

            let ctx = RunContext::new(run_id.clone(), scope.clone(), request.date_ranges.for_type(domain));
            let task = self.spawn_fetch(domain, ctx, Arc::clone(&permits));
            pending.push((domain, log.id, task));
        }

        for (domain, log_id, task) in pending {
            let outcome = self.process_type(domain, log_id, task, &scope).await;
            outcomes.insert(domain, outcome);
        }

        let failed = outcomes.values().filter(|o| o.is_failed()).count();
        info!(run_id = %run_id, failed_types = failed, "Sync run finished");

        Ok(SyncReport { run_id, outcomes })
    }

    /// Await a type's fetch, merge the records and finalize its Run Log.
    async fn process_type(
        &self,
        domain: DomainType,
        log_id: i32,
        task: FetchTask,
        scope: &PlantScope,
    ) -> RunOutcome {
        let result = self.fetch_and_process(domain, task, scope).await;

        match result {
            Ok(stats) => {
                let counts = stats.counts();
                info!(
                    domain = %domain,
                    processed = counts.processed,
                    success = counts.success,
                    failed = counts.failed,
                    pruned = stats.pruned,
                    "Domain type completed"
                );
                let finalized = self.sync_logs.complete(log_id, counts).await;
                self.check_finalized(domain, log_id, finalized).await;
                RunOutcome::completed(counts)
            }
            Err(e) => {
                let message = e.to_string();
                let committed = e.committed();
                error!(
                    domain = %domain,
                    error = %message,
                    committed = committed.processed,
                    "Domain type failed"
                );
                let finalized = self.sync_logs.fail(log_id, &message, committed.counts()).await;
                self.check_finalized(domain, log_id, finalized).await;
                RunOutcome::Failed { error: message }
            }
        }
    }

    /// Report a Run Log row that a finalize call left untouched.
    async fn check_finalized(&self, domain: DomainType, log_id: i32, result: Result<bool, DieselError>) {
        match result {
            Ok(true) => {}
            Ok(false) => {
                let status = match self.sync_logs.get(log_id).await {
                    Ok(Some(log)) => log.status.as_str(),
                    Ok(None) => "missing",
                    Err(_) => "unknown",
                };
                error!(domain = %domain, log_id, status, "Run Log was not finalized");
            }
            Err(e) => error!(domain = %domain, log_id, error = %e, "Failed to finalize Run Log"),
        }
    }

    async fn fetch_and_process(
        &self,
        domain: DomainType,
        task: FetchTask,
        scope: &PlantScope,
    ) -> SyncResult<BatchStats> {
        let records = task.await??;
        if records.is_empty() {
            return Ok(BatchStats::default());
        }

        let processor = self
            .processors
            .get(&domain)
            .ok_or_else(|| SyncError::InvalidRecord(format!("no processor for {}", domain)))?;
        processor.process_batch(records, scope).await
    }
}
