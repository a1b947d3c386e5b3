//! Diesel-based Run Log repository for SQLite.
//!
//! A Run Log row is created `pending`, moved to `running`, and finalized once.
//! Every transition is a conditional update on the expected current statuses,
//! so a finalized row can never be mutated again. Finalizing also accepts a
//! row still `pending`, which keeps a row whose `running` write failed from
//! staying open forever.

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use diesel::prelude::*;

use super::diesel_models::{NewSyncLog, SyncLogRecord};
use super::diesel_pool::{run_blocking, DieselError, SqlitePool};
use super::{parse_datetime, parse_datetime_opt};
use crate::models::{DomainType, SyncLog, SyncStatus};
use crate::schema::sync_logs;

/// Statuses a row may be finalized from.
const OPEN_STATUSES: &[SyncStatus] = &[SyncStatus::Pending, SyncStatus::Running];

/// Error messages longer than this are truncated before being stored.
const MAX_ERROR_LEN: usize = 4000;

impl From<SyncLogRecord> for SyncLog {
    fn from(record: SyncLogRecord) -> Self {
        SyncLog {
            id: record.id,
            run_id: record.run_id,
            domain_type: record.domain_type,
            status: SyncStatus::from_str(&record.status).unwrap_or(SyncStatus::Pending),
            processed_count: record.processed_count.max(0) as u32,
            success_count: record.success_count.max(0) as u32,
            failed_count: record.failed_count.max(0) as u32,
            error_message: record.error_message,
            started_at: parse_datetime(&record.started_at),
            finished_at: parse_datetime_opt(record.finished_at),
        }
    }
}

/// Final counts recorded on a Run Log row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunCounts {
    pub processed: u32,
    pub success: u32,
    pub failed: u32,
}

fn timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn truncate_error(error: &str) -> String {
    if error.len() <= MAX_ERROR_LEN {
        return error.to_string();
    }
    let mut end = MAX_ERROR_LEN;
    while !error.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &error[..end])
}

/// Diesel-based Run Log repository.
#[derive(Clone)]
pub struct DieselSyncLogRepository {
    pool: SqlitePool,
}

impl DieselSyncLogRepository {
    /// Create a new Run Log repository with an existing pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a `pending` Run Log row for one domain-type execution.
    pub async fn create(&self, run_id: &str, domain: DomainType) -> Result<SyncLog, DieselError> {
        let run_id = run_id.to_string();
        let pool = self.pool.clone();

        run_blocking(pool, move |conn| {
            let started_at = timestamp(Utc::now());
            let new_log = NewSyncLog {
                run_id: &run_id,
                domain_type: domain.as_str(),
                status: SyncStatus::Pending.as_str(),
                started_at: &started_at,
            };
            diesel::insert_into(sync_logs::table)
                .values(&new_log)
                .execute(conn)?;

            sync_logs::table
                .filter(sync_logs::domain_type.eq(domain.as_str()))
                .filter(sync_logs::started_at.eq(&started_at))
                .first::<SyncLogRecord>(conn)
        })
        .await
        .map(SyncLog::from)
    }

    /// Move a `pending` row to `running`. Returns false if the row was not pending.
    pub async fn mark_running(&self, id: i32) -> Result<bool, DieselError> {
        self.transition(id, &[SyncStatus::Pending], SyncStatus::Running, None, None)
            .await
    }

    /// Finalize an open row as `completed` with its counts. Returns false if
    /// the row was already finalized.
    pub async fn complete(&self, id: i32, counts: RunCounts) -> Result<bool, DieselError> {
        self.transition(id, OPEN_STATUSES, SyncStatus::Completed, Some(counts), None)
            .await
    }

    /// Finalize an open row as `failed` with the error text and the counts of
    /// work that stayed committed.
    pub async fn fail(
        &self,
        id: i32,
        error: &str,
        counts: RunCounts,
    ) -> Result<bool, DieselError> {
        self.transition(
            id,
            OPEN_STATUSES,
            SyncStatus::Failed,
            Some(counts),
            Some(truncate_error(error)),
        )
        .await
    }

    async fn transition(
        &self,
        id: i32,
        from: &[SyncStatus],
        to: SyncStatus,
        counts: Option<RunCounts>,
        error: Option<String>,
    ) -> Result<bool, DieselError> {
        let from: Vec<&'static str> = from.iter().map(SyncStatus::as_str).collect();
        let pool = self.pool.clone();

        run_blocking(pool, move |conn| {
            let target = sync_logs::table
                .filter(sync_logs::id.eq(id))
                .filter(sync_logs::status.eq_any(from));

            let rows = match counts {
                None => diesel::update(target)
                    .set(sync_logs::status.eq(to.as_str()))
                    .execute(conn)?,
                Some(counts) => diesel::update(target)
                    .set((
                        sync_logs::status.eq(to.as_str()),
                        sync_logs::processed_count.eq(counts.processed as i32),
                        sync_logs::success_count.eq(counts.success as i32),
                        sync_logs::failed_count.eq(counts.failed as i32),
                        sync_logs::error_message.eq(error.as_deref()),
                        sync_logs::finished_at.eq(Some(timestamp(Utc::now()))),
                    ))
                    .execute(conn)?,
            };
            Ok(rows > 0)
        })
        .await
    }

    /// Get a Run Log row by id.
    pub async fn get(&self, id: i32) -> Result<Option<SyncLog>, DieselError> {
        let pool = self.pool.clone();

        run_blocking(pool, move |conn| {
            sync_logs::table
                .find(id)
                .first::<SyncLogRecord>(conn)
                .optional()
        })
        .await
        .map(|opt| opt.map(SyncLog::from))
    }

    /// Most recent Run Log rows, newest first.
    pub async fn get_recent(&self, limit: u32) -> Result<Vec<SyncLog>, DieselError> {
        let limit = limit as i64;
        let pool = self.pool.clone();

        run_blocking(pool, move |conn| {
            sync_logs::table
                .order((sync_logs::started_at.desc(), sync_logs::id.desc()))
                .limit(limit)
                .load::<SyncLogRecord>(conn)
        })
        .await
        .map(|records| records.into_iter().map(SyncLog::from).collect())
    }

    /// All Run Log rows written by one orchestrator invocation.
    pub async fn get_by_run(&self, run_id: &str) -> Result<Vec<SyncLog>, DieselError> {
        let run_id = run_id.to_string();
        let pool = self.pool.clone();

        run_blocking(pool, move |conn| {
            sync_logs::table
                .filter(sync_logs::run_id.eq(&run_id))
                .order(sync_logs::id.asc())
                .load::<SyncLogRecord>(conn)
        })
        .await
        .map(|records| records.into_iter().map(SyncLog::from).collect())
    }

    /// Advisory "already running" check.
    ///
    /// True if any row (optionally for one domain type) is `pending` or
    /// `running` and started within `window`. This is not a lock: two callers
    /// can both observe `false` and proceed.
    pub async fn has_recent_running(
        &self,
        domain: Option<DomainType>,
        window: Duration,
    ) -> Result<bool, DieselError> {
        let since = timestamp(Utc::now() - window);
        let pool = self.pool.clone();

        run_blocking(pool, move |conn| {
            use diesel::dsl::count_star;
            let mut query = sync_logs::table
                .filter(sync_logs::status.eq_any(vec![
                    SyncStatus::Pending.as_str(),
                    SyncStatus::Running.as_str(),
                ]))
                .filter(sync_logs::started_at.ge(&since))
                .select(count_star())
                .into_boxed();

            if let Some(domain) = domain {
                query = query.filter(sync_logs::domain_type.eq(domain.as_str()));
            }

            let count: i64 = query.first(conn)?;
            Ok(count > 0)
        })
        .await
    }
}
