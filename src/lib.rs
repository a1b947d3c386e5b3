//! plantsync: synchronizes plant maintenance data from an external
//! asset-management API into a local SQLite store.
//!
//! Six domain types are pulled through a [`fetch::Fetcher`], normalized and
//! merged by per-type [`sync::Processor`]s, and driven in dependency order by
//! the [`sync::SyncOrchestrator`], which records every execution as a Run Log
//! row.

pub mod config;
pub mod fetch;
pub mod models;
pub mod repository;
pub mod schema;
pub mod sync;

pub use config::{Config, Settings};
pub use models::{DateRange, DomainType, SyncStatus};
pub use sync::{RunOutcome, SyncOrchestrator, SyncReport, SyncRequest};
