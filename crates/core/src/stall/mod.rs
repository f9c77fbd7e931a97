//! Stalled-issue model, classification and resolution planning.
//!
//! The stall subsystem is pure and synchronous:
//! 1. **Records** -- owned snapshots of what the scanner reported.
//! 2. **Grouping** -- duplicate detection among cloud-side conflicting names.
//! 3. **Classification** -- which resolution actions are legal for an issue.
//! 4. **Planning** -- the ordered primitive operations an action expands to.

pub mod classifier;
pub mod grouper;
pub mod issue;
pub mod planner;

pub use classifier::{ActionSet, Classifier, ResolutionAction, SimilarityKey};
pub use grouper::{CloudConflictGroups, DuplicateGroup, FingerprintGrouper, GroupKey};
pub use issue::{
    ConflictedNameInfo, DifferKind, FolderEntry, Footprint, IssueRecord, NameConflictIssue,
    NameResolution, SnapshotHash, StallReason, StallReport,
};
pub use planner::{
    ChildDisposition, ChildMerge, DuplicateSurvivor, Plan, PlanParams, Planner, PrimitiveOp,
};
