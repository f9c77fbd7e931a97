//! Batch application of resolutions.
//!
//! [`BatchApplier::apply`] resolves every issue of a [`Selection`] with the
//! same action set. The whole batch is checked, planned and marked under one
//! exclusive registry lock: either every issue is marked solved and one
//! submission goes to the transfer engine, or nothing changes.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::errors::StallError;
use crate::models::{IssueId, SolvedState};
use crate::registry::{IssueEvent, PendingResolution, Registry};
use crate::stall::{ActionSet, Plan, PlanParams, Planner, SnapshotHash};
use crate::transfer::{completion_channel, BatchCompletion, Submission, SubmittedOp, TransferEngine};

// ---------------------------------------------------------------------------
// Selection
// ---------------------------------------------------------------------------

/// A set of issues together with the content hash each had when selected.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Selection {
    entries: Vec<(IssueId, SnapshotHash)>,
}

impl Selection {
    pub(crate) fn from_entries(entries: Vec<(IssueId, SnapshotHash)>) -> Self {
        Self { entries }
    }

    pub fn ids(&self) -> impl Iterator<Item = &IssueId> {
        self.entries.iter().map(|(id, _)| id)
    }

    pub fn contains(&self, id: &IssueId) -> bool {
        self.entries.iter().any(|(i, _)| i == id)
    }

    pub fn hash_of(&self, id: &IssueId) -> Option<&SnapshotHash> {
        self.entries
            .iter()
            .find(|(i, _)| i == id)
            .map(|(_, h)| h)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Applier
// ---------------------------------------------------------------------------

/// Result of a successful `apply`.
#[derive(Debug)]
pub struct ApplyResult {
    pub batch_id: Uuid,
    /// One plan per selected issue, in selection order.
    pub plans: Vec<Plan>,
    /// Issues solved as a side effect of this batch.
    pub propagated: Vec<IssueId>,
    /// Resolves once the engine reports every op of the batch.
    pub completion: BatchCompletion,
}

/// Applies resolutions to selections against one registry and one engine.
pub struct BatchApplier {
    registry: Arc<Registry>,
    engine: Arc<dyn TransferEngine>,
}

impl BatchApplier {
    pub fn new(registry: Arc<Registry>, engine: Arc<dyn TransferEngine>) -> Self {
        Self { registry, engine }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Resolve every issue in `selection` with `actions`.
    ///
    /// Fails without side effects when any selected issue changed since it
    /// was selected ([`StallError::StaleSelection`]), when the actions are
    /// not legal for every issue, or when planning fails for any of them.
    pub fn apply(
        &self,
        selection: &Selection,
        actions: ActionSet,
        params: &PlanParams,
    ) -> Result<ApplyResult, StallError> {
        if selection.is_empty() {
            return Err(StallError::EmptySelection);
        }

        let mut state = self.registry.write_state()?;

        let changed: Vec<IssueId> = selection
            .entries
            .iter()
            .filter(|(id, hash)| {
                state
                    .entries
                    .get(id)
                    .map_or(true, |e| &e.record.content_hash() != hash)
            })
            .map(|(id, _)| id.clone())
            .collect();
        if !changed.is_empty() {
            warn!(changed = changed.len(), selected = selection.len(), "selection is stale");
            return Err(StallError::StaleSelection { changed });
        }

        let mut plans = Vec::with_capacity(selection.len());
        for id in selection.ids() {
            let entry = state
                .entries
                .get(id)
                .ok_or_else(|| StallError::NotFound(id.clone()))?;
            plans.push(Planner::plan(&entry.record, actions, params)?);
        }

        let batch_id = Uuid::new_v4();
        let mut ops = Vec::new();
        let mut marked = Vec::with_capacity(plans.len());
        for plan in &plans {
            let Some(entry) = state.entries.get_mut(&plan.issue_id) else {
                continue;
            };
            let before = entry.record.clone();
            entry.record.solved = SolvedState::SolvedByUser;
            if let Some(names) = entry.record.name_conflict.as_mut() {
                names.ensure_grouped();
                plan.record_on(names);
            }
            let settled = plan.settled_footprint(&before);
            marked.push((plan, before, settled));

            ops.extend(plan.ops.iter().enumerate().map(|(op_index, op)| SubmittedOp {
                issue_id: plan.issue_id.clone(),
                op_index,
                op: op.clone(),
            }));
        }

        // Propagation runs once every selected issue is marked, so no
        // selected issue is solved as another's dependent.
        let mut propagated = Vec::new();
        for (plan, before, settled) in marked {
            let dependents = state.propagate(&plan.issue_id, settled);
            propagated.extend(dependents.iter().map(|r| r.id.clone()));
            if !plan.is_empty() {
                state.pending.insert(
                    plan.issue_id.clone(),
                    PendingResolution {
                        batch_id,
                        before,
                        ops: plan.len(),
                        completed: BTreeSet::new(),
                        dependents,
                    },
                );
            }
        }
        drop(state);

        for plan in &plans {
            self.registry.emit(IssueEvent::Changed {
                id: plan.issue_id.clone(),
                solved: SolvedState::SolvedByUser,
            });
        }
        for id in &propagated {
            self.registry.emit(IssueEvent::Changed {
                id: id.clone(),
                solved: SolvedState::SolvedByOtherSide,
            });
        }

        let submission = Submission::new(batch_id, ops);
        let (sender, completion) = completion_channel(batch_id);
        info!(
            %batch_id,
            issues = plans.len(),
            ops = submission.ops.len(),
            actions = %actions,
            propagated = propagated.len(),
            "submitting resolution batch"
        );
        self.engine.submit(submission, sender);

        Ok(ApplyResult {
            batch_id,
            plans,
            propagated,
            completion,
        })
    }
}
