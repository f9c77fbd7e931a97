//! StallSync core library.
//!
//! This crate classifies the stalled issues a sync scanner reports, works
//! out which resolutions are legal for each, plans them as primitive
//! transfer operations and applies them to batches of issues with an
//! external-change guard.

pub mod applier;
pub mod config;
pub mod errors;
pub mod models;
pub mod registry;
pub mod stall;
pub mod transfer;

// Re-exports for convenience.
pub use applier::{ApplyResult, BatchApplier, Selection};
pub use config::EngineConfig;
pub use errors::{CoreError, ErrorKind, StallError};
pub use registry::{IssueEvent, IssueFilter, Registry};
pub use transfer::{DryRunEngine, TransferEngine};
