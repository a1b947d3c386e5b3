//! Processors: validate, normalize and merge raw records into local entities.
//!
//! Every domain type follows the same shape. Items are partitioned into
//! chunks; each chunk runs inside one Diesel transaction that preloads its
//! lookup maps in bulk, transforms items, upserts the resulting rows keyed by
//! the natural key and then applies queued deletions. An error returned from the
//! transaction closure rolls back that chunk only and ends the batch; chunks
//! committed before it stay committed and their totals travel with the error
//! as [`SyncError::PartialBatch`].

pub mod daily_plant_data;
pub mod equipment;
pub mod equipment_material;
pub mod equipment_work_order;
pub mod running_time;
pub mod work_order;

pub use daily_plant_data::DailyPlantDataProcessor;
pub use equipment::EquipmentProcessor;
pub use equipment_material::EquipmentMaterialProcessor;
pub use equipment_work_order::EquipmentWorkOrderProcessor;
pub use running_time::RunningTimeProcessor;
pub use work_order::WorkOrderProcessor;

use std::collections::{BTreeSet, HashMap};
use std::hash::Hash;
use std::sync::Arc;

use async_trait::async_trait;
use diesel::prelude::*;
use serde::Serialize;
use tracing::{debug, warn};

use crate::fetch::api::REQUEST_PLANT_KEY;
use crate::fetch::fields::normalize_key;
use crate::fetch::{FieldAlias, FieldReader, RawRecord};
use crate::models::DomainType;
use crate::repository::diesel_plant::load_plant_ids;
use crate::repository::diesel_pool::SqlitePool;
use crate::repository::diesel_sync_log::RunCounts;
use crate::schema::equipment as equipment_table;
use crate::schema::work_orders;
use crate::sync::context::PlantScope;
use crate::sync::error::{SyncError, SyncResult};

/// Default number of items per chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 1000;
/// Largest allowed chunk.
pub const MAX_CHUNK_SIZE: usize = 2000;

/// Plant code fields shared by every domain type. The fetcher's request
/// plant comes last so it never masks a code present in the payload.
pub(crate) const PLANT: FieldAlias = FieldAlias::new(
    "plant",
    &["plant_code", "plant", "Plant", "WERKS", "werks", "IWERK", "SWERK", REQUEST_PLANT_KEY],
);

/// Outcome of processing a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchStats {
    /// Items received.
    pub processed: u64,
    /// Items inserted or updated.
    pub merged: u64,
    /// Items whose deletion flag removed (or would have removed) a row.
    pub deleted: u64,
    /// Items skipped: unknown or disallowed plant, missing key, excluded value.
    pub skipped: u64,
    /// Rows removed by delete-reconciliation.
    pub pruned: u64,
}

impl BatchStats {
    pub fn add(&mut self, other: &BatchStats) {
        self.processed += other.processed;
        self.merged += other.merged;
        self.deleted += other.deleted;
        self.skipped += other.skipped;
        self.pruned += other.pruned;
    }

    pub fn counts(&self) -> RunCounts {
        let clamp = |n: u64| u32::try_from(n).unwrap_or(u32::MAX);
        RunCounts {
            processed: clamp(self.processed),
            success: clamp(self.merged + self.deleted),
            failed: clamp(self.skipped),
        }
    }
}

/// Merges a batch of raw records for one domain type.
#[async_trait]
pub trait Processor: Send + Sync {
    fn domain(&self) -> DomainType;

    /// Merge `items` into the store, touching only plants allowed by `scope`.
    async fn process_batch(&self, items: Vec<RawRecord>, scope: &PlantScope) -> SyncResult<BatchStats>;
}

/// The per-domain part of a processor: chunking and the chunk transform/merge.
pub trait DomainMerge: Send + Sync + 'static {
    fn domain(&self) -> DomainType;

    /// Split items into chunks. The default keeps input order.
    fn partition(&self, items: Vec<RawRecord>, chunk_size: usize) -> Vec<Vec<RawRecord>> {
        partition_in_order(items, chunk_size)
    }

    /// Transform and merge one chunk. Runs inside the chunk's transaction.
    fn merge_chunk(
        &self,
        conn: &mut SqliteConnection,
        chunk: &[RawRecord],
        scope: &PlantScope,
    ) -> SyncResult<BatchStats>;
}

/// Drives a [`DomainMerge`] chunk by chunk, one transaction per chunk.
pub struct ChunkedProcessor<M> {
    pool: SqlitePool,
    chunk_size: usize,
    merge: Arc<M>,
}

impl<M: DomainMerge> ChunkedProcessor<M> {
    pub fn new(pool: SqlitePool, merge: M, chunk_size: usize) -> Self {
        Self {
            pool,
            chunk_size: chunk_size.clamp(1, MAX_CHUNK_SIZE),
            merge: Arc::new(merge),
        }
    }

    async fn run_chunk(&self, chunk: Vec<RawRecord>, scope: PlantScope) -> SyncResult<BatchStats> {
        let pool = self.pool.clone();
        let merge = Arc::clone(&self.merge);

        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            conn.transaction::<_, SyncError, _>(|conn| merge.merge_chunk(conn, &chunk, &scope))
        })
        .await?
    }
}

#[async_trait]
impl<M: DomainMerge> Processor for ChunkedProcessor<M> {
    fn domain(&self) -> DomainType {
        self.merge.domain()
    }

    async fn process_batch(&self, items: Vec<RawRecord>, scope: &PlantScope) -> SyncResult<BatchStats> {
        let domain = self.merge.domain();
        let mut total = BatchStats::default();
        if items.is_empty() {
            return Ok(total);
        }

        let chunks = self.merge.partition(items, self.chunk_size);
        let chunk_count = chunks.len();

        for (index, chunk) in chunks.into_iter().enumerate() {
            let size = chunk.len();
            let stats = match self.run_chunk(chunk, scope.clone()).await {
                Ok(stats) => stats,
                Err(e) => {
                    warn!(
                        domain = %domain,
                        chunk = index + 1,
                        chunks = chunk_count,
                        error = %e,
                        "Chunk rolled back"
                    );
                    if index == 0 {
                        return Err(e);
                    }
                    return Err(SyncError::PartialBatch {
                        committed: total,
                        source: Box::new(e),
                    });
                }
            };
            debug!(
                domain = %domain,
                chunk = index + 1,
                chunks = chunk_count,
                items = size,
                merged = stats.merged,
                deleted = stats.deleted,
                skipped = stats.skipped,
                "Chunk committed"
            );
            total.add(&stats);
        }

        Ok(total)
    }
}

/// Fixed-size chunks in input order.
pub fn partition_in_order(items: Vec<RawRecord>, chunk_size: usize) -> Vec<Vec<RawRecord>> {
    let chunk_size = chunk_size.max(1);
    let mut chunks = Vec::with_capacity(items.len().div_ceil(chunk_size));
    let mut current = Vec::with_capacity(chunk_size.min(items.len()));
    for item in items {
        current.push(item);
        if current.len() == chunk_size {
            chunks.push(std::mem::replace(&mut current, Vec::with_capacity(chunk_size)));
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Last-write-wins action list keyed by natural key.
///
/// A later upsert or delete for the same key replaces the earlier one, so a
/// chunk writes each key at most once.
pub(crate) struct KeyedActions<K, R> {
    index: HashMap<K, usize>,
    actions: Vec<Option<Action<K, R>>>,
}

pub(crate) enum Action<K, R> {
    Upsert(R),
    Delete(K),
}

impl<K: Eq + Hash + Clone, R> KeyedActions<K, R> {
    pub fn new() -> Self {
        Self {
            index: HashMap::new(),
            actions: Vec::new(),
        }
    }

    fn push(&mut self, key: K, action: Action<K, R>) {
        if let Some(&pos) = self.index.get(&key) {
            self.actions[pos] = None;
        }
        self.index.insert(key, self.actions.len());
        self.actions.push(Some(action));
    }

    pub fn upsert(&mut self, key: K, row: R) {
        self.push(key, Action::Upsert(row));
    }

    pub fn delete(&mut self, key: K) {
        self.push(key.clone(), Action::Delete(key));
    }

    /// Rows to upsert and keys to delete, in first-seen order of their final action.
    pub fn into_parts(self) -> (Vec<R>, Vec<K>) {
        let mut rows = Vec::new();
        let mut deletes = Vec::new();
        for action in self.actions.into_iter().flatten() {
            match action {
                Action::Upsert(row) => rows.push(row),
                Action::Delete(key) => deletes.push(key),
            }
        }
        (rows, deletes)
    }
}

/// Why an item's plant could not be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PlantMiss {
    Missing,
    NotAllowed,
    Unknown,
}

impl PlantMiss {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlantMiss::Missing => "no plant code",
            PlantMiss::NotAllowed => "plant not in scope",
            PlantMiss::Unknown => "unknown or inactive plant",
        }
    }
}

/// Plant lookup preloaded for one chunk.
pub(crate) struct PlantLookup {
    ids: HashMap<String, i32>,
}

impl PlantLookup {
    /// Load ids for every allowed plant code appearing in the chunk.
    pub fn load(
        conn: &mut SqliteConnection,
        chunk: &[RawRecord],
        scope: &PlantScope,
    ) -> SyncResult<Self> {
        let codes: BTreeSet<String> = chunk
            .iter()
            .filter_map(|item| FieldReader::new(item).text(&PLANT))
            .filter(|code| scope.allows(code))
            .collect();
        let codes: Vec<String> = codes.into_iter().collect();
        Ok(Self {
            ids: load_plant_ids(conn, &codes)?,
        })
    }

    /// Resolve an item's plant code. The code must be present and allowed;
    /// `Ok((code, None))` means allowed but not in the local plant table.
    pub fn resolve(
        &self,
        reader: &FieldReader<'_>,
        scope: &PlantScope,
    ) -> Result<(String, Option<i32>), PlantMiss> {
        let code = reader.text(&PLANT).ok_or(PlantMiss::Missing)?;
        if !scope.allows(&code) {
            return Err(PlantMiss::NotAllowed);
        }
        let id = self.ids.get(&code).copied();
        Ok((code, id))
    }

    /// Resolve a plant that must exist locally.
    pub fn require(
        &self,
        reader: &FieldReader<'_>,
        scope: &PlantScope,
    ) -> Result<(String, i32), PlantMiss> {
        match self.resolve(reader, scope)? {
            (code, Some(id)) => Ok((code, id)),
            (_, None) => Err(PlantMiss::Unknown),
        }
    }
}

/// Log an item-level skip.
pub(crate) fn log_skip(domain: DomainType, key: Option<&str>, reason: &str) {
    warn!(domain = %domain, key = key.unwrap_or("-"), reason = reason, "Skipping item");
}

/// Normalized identifier values of `field` across a chunk.
pub(crate) fn collect_keys(chunk: &[RawRecord], field: &FieldAlias) -> Vec<String> {
    let keys: BTreeSet<String> = chunk
        .iter()
        .filter_map(|item| FieldReader::new(item).text(field))
        .map(|raw| normalize_key(&raw))
        .collect();
    keys.into_iter().collect()
}

/// Equipment number -> equipment id for the given numbers.
pub(crate) fn load_equipment_ids(
    conn: &mut SqliteConnection,
    numbers: &[String],
) -> SyncResult<HashMap<String, i32>> {
    if numbers.is_empty() {
        return Ok(HashMap::new());
    }
    let rows: Vec<(String, i32)> = equipment_table::table
        .filter(equipment_table::equipment_number.eq_any(numbers))
        .select((equipment_table::equipment_number, equipment_table::id))
        .load(conn)?;
    Ok(rows.into_iter().collect())
}

/// Order number -> (work order id, equipment number) for the given orders.
pub(crate) fn load_work_orders(
    conn: &mut SqliteConnection,
    order_numbers: &[String],
) -> SyncResult<HashMap<String, (i32, Option<String>)>> {
    if order_numbers.is_empty() {
        return Ok(HashMap::new());
    }
    let rows: Vec<(String, i32, Option<String>)> = work_orders::table
        .filter(work_orders::order_number.eq_any(order_numbers))
        .select((
            work_orders::order_number,
            work_orders::id,
            work_orders::equipment_number,
        ))
        .load(conn)?;
    Ok(rows
        .into_iter()
        .map(|(number, id, equipment)| (number, (id, equipment)))
        .collect())
}

/// Configured prefixes that exclude a material number from persistence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaterialExclusions {
    prefixes: Vec<String>,
}

impl MaterialExclusions {
    pub fn new<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            prefixes: prefixes
                .into_iter()
                .map(|p| p.as_ref().trim().to_uppercase())
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    /// Whether a normalized material number is excluded.
    pub fn is_excluded(&self, material_number: &str) -> bool {
        self.prefixes.iter().any(|p| material_number.starts_with(p.as_str()))
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Shared fixtures for processor tests.

    use super::*;
    use crate::repository::diesel_plant::DieselPlantRepository;
    use crate::repository::diesel_pool::create_diesel_pool_from_url;
    use crate::repository::migrations::run_migrations;
    use serde_json::Value;
    use tempfile::tempdir;

    pub async fn setup_test_db() -> (SqlitePool, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db_url = format!("{}", dir.path().join("test.db").display());
        let pool = create_diesel_pool_from_url(&db_url).unwrap();
        run_migrations(&pool).await.unwrap();

        let plants = DieselPlantRepository::new(pool.clone());
        for code in ["A01", "P1", "P2"] {
            plants.upsert(code, &format!("Plant {}", code), true).await.unwrap();
        }
        (pool, dir)
    }

    pub fn records(value: Value) -> Vec<RawRecord> {
        value
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_object().cloned().unwrap())
            .collect()
    }

    pub fn count_rows(pool: &SqlitePool, table: &str) -> i64 {
        #[derive(QueryableByName)]
        struct Count {
            #[diesel(sql_type = diesel::sql_types::BigInt)]
            n: i64,
        }
        let mut conn = pool.get().unwrap();
        diesel::sql_query(format!("SELECT COUNT(*) AS n FROM {}", table))
            .get_result::<Count>(&mut conn)
            .unwrap()
            .n
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn items(n: usize) -> Vec<RawRecord> {
        (0..n)
            .map(|i| json!({ "n": i }).as_object().cloned().unwrap())
            .collect()
    }

    #[test]
    fn test_partition_in_order() {
        let chunks = partition_in_order(items(5), 2);
        assert_eq!(chunks.iter().map(Vec::len).collect::<Vec<_>>(), vec![2, 2, 1]);
        assert_eq!(chunks[2][0]["n"], 4);
        assert!(partition_in_order(Vec::new(), 10).is_empty());
    }

    #[test]
    fn test_keyed_actions_last_write_wins() {
        let mut actions: KeyedActions<String, (String, i32)> = KeyedActions::new();
        actions.upsert("a".into(), ("a".into(), 1));
        actions.upsert("b".into(), ("b".into(), 1));
        actions.upsert("a".into(), ("a".into(), 2));
        actions.delete("b".into());
        actions.upsert("c".into(), ("c".into(), 1));

        let (rows, deletes) = actions.into_parts();
        assert_eq!(rows, vec![("a".to_string(), 2), ("c".to_string(), 1)]);
        assert_eq!(deletes, vec!["b".to_string()]);
    }

    #[test]
    fn test_batch_stats_counts() {
        let mut total = BatchStats::default();
        total.add(&BatchStats {
            processed: 5,
            merged: 3,
            deleted: 1,
            skipped: 1,
            pruned: 2,
        });
        let counts = total.counts();
        assert_eq!(counts.processed, 5);
        assert_eq!(counts.success, 4);
        assert_eq!(counts.failed, 1);
    }

    /// Inserts one group per item and fails on items carrying `"fail": true`.
    struct GroupWriter;

    impl DomainMerge for GroupWriter {
        fn domain(&self) -> DomainType {
            DomainType::Equipment
        }

        fn merge_chunk(
            &self,
            conn: &mut SqliteConnection,
            chunk: &[RawRecord],
            _scope: &PlantScope,
        ) -> SyncResult<BatchStats> {
            use crate::schema::equipment_groups;

            let mut stats = BatchStats::default();
            for item in chunk {
                let name = item["name"].as_str().unwrap_or_default();
                diesel::insert_into(equipment_groups::table)
                    .values((equipment_groups::name.eq(name), equipment_groups::created_at.eq("2026-01-01")))
                    .execute(conn)?;
                if item.get("fail").is_some() {
                    return Err(SyncError::InvalidRecord(name.to_string()));
                }
                stats.processed += 1;
                stats.merged += 1;
            }
            Ok(stats)
        }
    }

    #[tokio::test]
    async fn test_failed_chunk_rolls_back_only_itself() {
        let (pool, _dir) = test_support::setup_test_db().await;
        let processor = ChunkedProcessor::new(pool.clone(), GroupWriter, 2);
        let batch = test_support::records(json!([
            {"name": "g1"},
            {"name": "g2"},
            {"name": "g3"},
            {"name": "g4", "fail": true}
        ]));

        let err = processor.process_batch(batch, &PlantScope::All).await.unwrap_err();
        match &err {
            SyncError::PartialBatch { committed, source } => {
                assert_eq!(committed.processed, 2);
                assert_eq!(committed.merged, 2);
                assert!(matches!(source.as_ref(), SyncError::InvalidRecord(name) if name == "g4"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(err.committed().counts().success, 2);
        assert_eq!(test_support::count_rows(&pool, "equipment_groups"), 2);
    }

    #[tokio::test]
    async fn test_failed_first_chunk_commits_nothing() {
        let (pool, _dir) = test_support::setup_test_db().await;
        let processor = ChunkedProcessor::new(pool.clone(), GroupWriter, 2);
        let batch = test_support::records(json!([
            {"name": "g1", "fail": true},
            {"name": "g2"}
        ]));

        let err = processor.process_batch(batch, &PlantScope::All).await.unwrap_err();
        assert!(matches!(err, SyncError::InvalidRecord(ref name) if name == "g1"));
        assert_eq!(err.committed(), BatchStats::default());
        assert_eq!(test_support::count_rows(&pool, "equipment_groups"), 0);
    }

    #[test]
    fn test_material_exclusions() {
        let exclusions = MaterialExclusions::new(["11", "12", " 31 ", ""]);
        assert!(exclusions.is_excluded("11000123"));
        assert!(exclusions.is_excluded("31"));
        assert!(!exclusions.is_excluded("21000123"));
        assert!(!MaterialExclusions::default().is_excluded("11"));
    }
}
