//! Domain models shared by fetchers, processors and repositories.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// One of the synchronized entity categories.
///
/// The derived ordering is the dependency order the orchestrator processes
/// types in: later types reference natural keys established by earlier ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainType {
    Equipment,
    WorkOrders,
    RunningTime,
    EquipmentWorkOrders,
    EquipmentMaterials,
    DailyPlantData,
}

impl DomainType {
    /// All domain types in processing order.
    pub const ALL: [DomainType; 6] = [
        DomainType::Equipment,
        DomainType::WorkOrders,
        DomainType::RunningTime,
        DomainType::EquipmentWorkOrders,
        DomainType::EquipmentMaterials,
        DomainType::DailyPlantData,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DomainType::Equipment => "equipment",
            DomainType::WorkOrders => "work_orders",
            DomainType::RunningTime => "running_time",
            DomainType::EquipmentWorkOrders => "equipment_work_orders",
            DomainType::EquipmentMaterials => "equipment_materials",
            DomainType::DailyPlantData => "daily_plant_data",
        }
    }

    /// Parse a domain type name. Accepts the singular `work_order` spelling too.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "equipment" => Some(DomainType::Equipment),
            "work_orders" | "work_order" => Some(DomainType::WorkOrders),
            "running_time" | "running_times" => Some(DomainType::RunningTime),
            "equipment_work_orders" => Some(DomainType::EquipmentWorkOrders),
            "equipment_materials" => Some(DomainType::EquipmentMaterials),
            "daily_plant_data" => Some(DomainType::DailyPlantData),
            _ => None,
        }
    }

    /// Whether the external endpoint for this type takes a date range.
    pub fn is_date_scoped(&self) -> bool {
        matches!(
            self,
            DomainType::WorkOrders | DomainType::RunningTime | DomainType::DailyPlantData
        )
    }
}

impl fmt::Display for DomainType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Run Log status.
///
/// `Cancelled` is reserved for administrative use; the pipeline itself only
/// moves `Pending -> Running -> Completed | Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Running => "running",
            SyncStatus::Completed => "completed",
            SyncStatus::Failed => "failed",
            SyncStatus::Cancelled => "cancelled",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(SyncStatus::Pending),
            "running" => Some(SyncStatus::Running),
            "completed" => Some(SyncStatus::Completed),
            "failed" => Some(SyncStatus::Failed),
            "cancelled" => Some(SyncStatus::Cancelled),
            _ => None,
        }
    }

    /// Terminal states are never mutated again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SyncStatus::Completed | SyncStatus::Failed | SyncStatus::Cancelled
        )
    }
}

/// A plant known to the local store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plant {
    pub id: i32,
    pub code: String,
    pub name: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One Run Log row: the audit record of a single domain-type execution.
#[derive(Debug, Clone, Serialize)]
pub struct SyncLog {
    pub id: i32,
    pub run_id: String,
    pub domain_type: String,
    pub status: SyncStatus,
    pub processed_count: u32,
    pub success_count: u32,
    pub failed_count: u32,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl SyncLog {
    /// Wall-clock duration, if the row has been finalized.
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.finished_at.map(|end| end - self.started_at)
    }
}

/// Inclusive date window passed to date-scoped fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    /// Create a range, swapping the bounds if they were given in reverse.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        if start <= end {
            Self { start, end }
        } else {
            Self {
                start: end,
                end: start,
            }
        }
    }

    /// The `days` days ending at (and including) `end`.
    pub fn last_days(end: NaiveDate, days: u32) -> Self {
        let span = chrono::Duration::days(i64::from(days.max(1)) - 1);
        Self::new(end - span, end)
    }
}
