//! Synchronization pipeline: run context, processors and orchestration.

pub mod context;
pub mod error;
pub mod orchestrator;
pub mod processor;

pub use context::{DateRanges, PlantScope, RunContext};
pub use error::{SyncError, SyncResult};
pub use orchestrator::{OrchestratorSettings, RunOutcome, SyncOrchestrator, SyncReport, SyncRequest};
pub use processor::{BatchStats, Processor};
