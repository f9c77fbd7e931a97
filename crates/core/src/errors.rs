//! Error types for the StallSync core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them for callers that want a single
//! error type.

use thiserror::Error;

use crate::models::IssueId;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Stall(#[from] StallError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

// ---------------------------------------------------------------------------
// Error kinds
// ---------------------------------------------------------------------------

/// Coarse classification of a [`StallError`], stable across message changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The requested action is not legal for the issue.
    IllegalAction,
    /// An issue changed between selection and apply.
    StaleSelection,
    /// The planner produced an internally inconsistent plan.
    PlanningConflict,
    /// The transfer engine reported a failed operation.
    EngineOpFailed,
    /// The referenced issue or resolution does not exist.
    NotFound,
    /// The caller supplied malformed input.
    InvalidInput,
    /// Lock poisoning and other internal faults.
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IllegalAction => write!(f, "illegal_action"),
            Self::StaleSelection => write!(f, "stale_selection"),
            Self::PlanningConflict => write!(f, "planning_conflict"),
            Self::EngineOpFailed => write!(f, "engine_op_failed"),
            Self::NotFound => write!(f, "not_found"),
            Self::InvalidInput => write!(f, "invalid_input"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

// ---------------------------------------------------------------------------
// Stall errors
// ---------------------------------------------------------------------------

/// Errors from classification, planning, applying and the registry.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StallError {
    /// The requested issue is not in the registry.
    #[error("stalled issue not found: {0}")]
    NotFound(IssueId),

    /// A scanner report violated the issue record invariants.
    #[error("invalid stall report for {id}: {detail}")]
    InvalidReport { id: IssueId, detail: String },

    /// The requested action is not in the issue's legal action set.
    #[error("action '{action}' is not legal for issue {id}")]
    IllegalAction { id: IssueId, action: String },

    /// One or more selected issues changed after the selection was made.
    #[error("selection is stale: {} issue(s) changed since selection", changed.len())]
    StaleSelection { changed: Vec<IssueId> },

    /// The planner would have emitted contradictory operations.
    #[error("planning conflict on issue {id}: {detail}")]
    PlanningConflict { id: IssueId, detail: String },

    /// The transfer engine failed an operation submitted for an issue.
    #[error("transfer engine failed op #{op_index} of issue {issue_id}: {cause}")]
    EngineOpFailed {
        issue_id: IssueId,
        op_index: usize,
        cause: String,
    },

    /// An op result arrived for an issue with no resolution in flight.
    #[error("no pending resolution for issue {0}")]
    NoPendingResolution(IssueId),

    /// An op result named an op index outside the issue's plan.
    #[error("issue {issue_id} has no op #{op_index}: its plan has {ops} op(s)")]
    UnknownOp {
        issue_id: IssueId,
        op_index: usize,
        ops: usize,
    },

    /// No free rename suffix exists below the configured limit.
    #[error("no free rename suffix for '{name}' below {limit}")]
    SuffixExhausted { name: String, limit: u32 },

    /// `apply` was called with an empty selection.
    #[error("selection is empty")]
    EmptySelection,

    /// The transfer engine dropped a batch without reporting an outcome.
    #[error("transfer engine dropped batch {0} without an outcome")]
    CompletionDropped(String),

    /// The registry lock was poisoned by a panicking writer.
    #[error("registry lock poisoned")]
    LockPoisoned,
}

impl StallError {
    /// The coarse [`ErrorKind`] of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::IllegalAction { .. } => ErrorKind::IllegalAction,
            Self::StaleSelection { .. } => ErrorKind::StaleSelection,
            Self::PlanningConflict { .. } => ErrorKind::PlanningConflict,
            Self::EngineOpFailed { .. } => ErrorKind::EngineOpFailed,
            Self::NotFound(_) | Self::NoPendingResolution(_) => ErrorKind::NotFound,
            Self::InvalidReport { .. }
            | Self::UnknownOp { .. }
            | Self::EmptySelection
            | Self::SuffixExhausted { .. } => ErrorKind::InvalidInput,
            Self::LockPoisoned | Self::CompletionDropped(_) => ErrorKind::Internal,
        }
    }
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}
