//! Per-call run context.
//!
//! The plant allow-list and date window travel as an explicit value through
//! every fetcher and processor call. Nothing run-scoped is stored on the
//! orchestrator, so one orchestrator can serve overlapping invocations.

use std::collections::{BTreeSet, HashMap};

use crate::models::{DateRange, DomainType};

/// Which plants a call may touch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlantScope {
    /// No restriction (all active plants).
    All,
    /// Only these plant codes.
    Only(BTreeSet<String>),
}

impl PlantScope {
    /// Build a scope from plant codes; codes are trimmed and blanks dropped.
    pub fn only<I, S>(codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        PlantScope::Only(
            codes
                .into_iter()
                .map(|c| c.as_ref().trim().to_string())
                .filter(|c| !c.is_empty())
                .collect(),
        )
    }

    pub fn allows(&self, plant_code: &str) -> bool {
        match self {
            PlantScope::All => true,
            PlantScope::Only(codes) => codes.contains(plant_code),
        }
    }

    /// Explicit codes, or None for an unrestricted scope.
    pub fn codes(&self) -> Option<&BTreeSet<String>> {
        match self {
            PlantScope::All => None,
            PlantScope::Only(codes) => Some(codes),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, PlantScope::Only(codes) if codes.is_empty())
    }
}

/// Date windows per domain type, with an optional default for the rest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DateRanges {
    pub default: Option<DateRange>,
    pub per_type: HashMap<DomainType, DateRange>,
}

impl DateRanges {
    /// Same window for every date-scoped type.
    pub fn uniform(range: DateRange) -> Self {
        Self {
            default: Some(range),
            per_type: HashMap::new(),
        }
    }

    pub fn with(mut self, domain: DomainType, range: DateRange) -> Self {
        self.per_type.insert(domain, range);
        self
    }

    /// Window for a domain type. Types whose endpoint takes no dates get none
    /// unless one was set for them explicitly.
    pub fn for_type(&self, domain: DomainType) -> Option<DateRange> {
        if let Some(range) = self.per_type.get(&domain) {
            return Some(*range);
        }
        if domain.is_date_scoped() {
            self.default
        } else {
            None
        }
    }
}

/// Context for one domain-type execution within a run.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: String,
    pub plants: PlantScope,
    pub date_range: Option<DateRange>,
}

impl RunContext {
    pub fn new(run_id: impl Into<String>, plants: PlantScope, date_range: Option<DateRange>) -> Self {
        Self {
            run_id: run_id.into(),
            plants,
            date_range,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_plant_scope() {
        let scope = PlantScope::only(["P1", " P2 ", ""]);
        assert!(scope.allows("P1"));
        assert!(scope.allows("P2"));
        assert!(!scope.allows("P3"));
        assert_eq!(scope.codes().map(|c| c.len()), Some(2));
        assert!(PlantScope::All.allows("anything"));
        assert!(PlantScope::only(Vec::<String>::new()).is_empty());
    }

    #[test]
    fn test_date_ranges_for_type() {
        let d = |day| NaiveDate::from_ymd_opt(2024, 5, day).unwrap();
        let week = DateRange::new(d(1), d(7));
        let day = DateRange::new(d(3), d(3));

        let ranges = DateRanges::uniform(week).with(DomainType::DailyPlantData, day);
        assert_eq!(ranges.for_type(DomainType::WorkOrders), Some(week));
        assert_eq!(ranges.for_type(DomainType::DailyPlantData), Some(day));
        assert_eq!(ranges.for_type(DomainType::Equipment), None);
        assert_eq!(DateRanges::default().for_type(DomainType::RunningTime), None);
    }
}
