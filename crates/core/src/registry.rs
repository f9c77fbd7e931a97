//! The live collection of stalled issues.
//!
//! [`Registry`] is the single owner of issue state. The scanner reports and
//! clears stalls; the GUI reads snapshots, computes selections and applies
//! resolutions through the [`BatchApplier`](crate::applier::BatchApplier).
//! Every mutation publishes an [`IssueEvent`] on a broadcast channel.
//!
//! Thread-safe: the issue map sits behind a `std::sync::RwLock`. Readers
//! always receive owned clones.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::applier::Selection;
use crate::config::RegistryConfig;
use crate::errors::StallError;
use crate::models::{IssueId, SolvedState};
use crate::stall::{ActionSet, Classifier, Footprint, IssueRecord, StallReason, StallReport};
use crate::transfer::BatchOutcome;

// ---------------------------------------------------------------------------
// Events and results
// ---------------------------------------------------------------------------

/// Change notification for observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum IssueEvent {
    /// The issue was added, replaced, or changed solved state.
    Changed { id: IssueId, solved: SolvedState },
    /// The scanner cleared the issue.
    Removed { id: IssueId },
    /// An engine op failed and the issue was rolled back to unsolved.
    ResolutionFailed {
        id: IssueId,
        op_index: usize,
        error_code: Option<String>,
    },
}

/// What `report_stall` did with a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportOutcome {
    Inserted,
    /// An unsolved issue with the same id was replaced.
    Replaced,
    /// The issue is already solved; the report was dropped.
    IgnoredSolved,
}

/// Acknowledgement of one engine op result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpAck {
    /// More ops of the issue are outstanding.
    Recorded,
    /// The last op of the issue succeeded.
    Completed,
    /// The op failed; the issue is back to its pre-apply snapshot.
    RolledBack { error: StallError },
}

/// Per-issue effect of feeding a whole batch outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutcomeSummary {
    pub completed: Vec<IssueId>,
    pub rolled_back: Vec<IssueId>,
}

/// Listing filter.
#[derive(Debug, Clone, Default)]
pub struct IssueFilter {
    pub unsolved_only: bool,
    pub reason: Option<StallReason>,
}

impl IssueFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn unsolved() -> Self {
        Self {
            unsolved_only: true,
            reason: None,
        }
    }

    pub fn matches(&self, record: &IssueRecord) -> bool {
        if self.unsolved_only && !record.is_unsolved() {
            return false;
        }
        self.reason.map_or(true, |r| r == record.reason)
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

pub(crate) struct Entry {
    pub(crate) record: IssueRecord,
    /// Report sequence number; higher is more recent.
    seq: u64,
}

/// A submitted resolution awaiting its engine results.
pub(crate) struct PendingResolution {
    pub(crate) batch_id: Uuid,
    /// Snapshot restored on failure.
    pub(crate) before: IssueRecord,
    pub(crate) ops: usize,
    pub(crate) completed: BTreeSet<usize>,
    /// Issues solved by propagation from this one, as they were before.
    pub(crate) dependents: Vec<IssueRecord>,
}

#[derive(Default)]
pub(crate) struct RegistryState {
    pub(crate) entries: HashMap<IssueId, Entry>,
    pub(crate) pending: HashMap<IssueId, PendingResolution>,
    next_seq: u64,
}

impl RegistryState {
    /// Mark every unsolved issue covered by `settled` as solved by the other
    /// side, then every unsolved issue sharing a node with one of those, and
    /// so on. Returns the newly solved issues as they were before.
    pub(crate) fn propagate(&mut self, source: &IssueId, settled: Footprint) -> Vec<IssueRecord> {
        let mut solved = Vec::new();
        let mut queue = VecDeque::from([(source.clone(), settled)]);

        while let Some((id, footprint)) = queue.pop_front() {
            let mut covered: Vec<IssueId> = self
                .entries
                .iter()
                .filter(|(other, e)| {
                    *other != &id
                        && e.record.is_unsolved()
                        && footprint.covers(&e.record.footprint())
                })
                .map(|(other, _)| other.clone())
                .collect();
            covered.sort();

            for other in covered {
                if let Some(entry) = self.entries.get_mut(&other) {
                    solved.push(entry.record.clone());
                    let next = entry.record.footprint().nodes_only();
                    entry.record.solved = SolvedState::SolvedByOtherSide;
                    if let Some(names) = entry.record.name_conflict.as_mut() {
                        names.mark_all_solved_by_other_side();
                    }
                    debug!(issue_id = %other, by = %id, "solved by other side");
                    queue.push_back((other, next));
                }
            }
        }
        solved
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Process-wide collection of stalled issues keyed by [`IssueId`].
pub struct Registry {
    state: RwLock<RegistryState>,
    events: broadcast::Sender<IssueEvent>,
}

impl Registry {
    pub fn new(config: &RegistryConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity);
        Self {
            state: RwLock::new(RegistryState::default()),
            events,
        }
    }

    fn read_state(&self) -> Result<RwLockReadGuard<'_, RegistryState>, StallError> {
        self.state.read().map_err(|_| StallError::LockPoisoned)
    }

    /// Exclusive access for the batch applier.
    pub(crate) fn write_state(&self) -> Result<RwLockWriteGuard<'_, RegistryState>, StallError> {
        self.state.write().map_err(|_| StallError::LockPoisoned)
    }

    pub(crate) fn emit(&self, event: IssueEvent) {
        // No receivers is not an error.
        let _ = self.events.send(event);
    }

    /// Receive every later [`IssueEvent`].
    pub fn subscribe(&self) -> broadcast::Receiver<IssueEvent> {
        self.events.subscribe()
    }

    pub fn len(&self) -> Result<usize, StallError> {
        Ok(self.read_state()?.entries.len())
    }

    pub fn is_empty(&self) -> Result<bool, StallError> {
        Ok(self.read_state()?.entries.is_empty())
    }

    // -- Scanner side -------------------------------------------------------

    /// Add or replace an issue from a scanner report.
    pub fn report_stall(&self, report: StallReport) -> Result<ReportOutcome, StallError> {
        let record = IssueRecord::from_report(report)?;
        let id = record.id.clone();

        let mut state = self.write_state()?;
        let outcome = match state.entries.get(&id) {
            Some(existing) if !existing.record.is_unsolved() => {
                warn!(issue_id = %id, solved = %existing.record.solved, "ignoring re-report of solved issue");
                return Ok(ReportOutcome::IgnoredSolved);
            }
            Some(_) => ReportOutcome::Replaced,
            None => ReportOutcome::Inserted,
        };

        state.next_seq += 1;
        let seq = state.next_seq;
        state.entries.insert(id.clone(), Entry { record, seq });
        drop(state);

        info!(issue_id = %id, ?outcome, "stall reported");
        self.emit(IssueEvent::Changed {
            id,
            solved: SolvedState::Unsolved,
        });
        Ok(outcome)
    }

    /// Remove an issue the scanner no longer sees. Returns `false` if it was
    /// not present.
    pub fn clear_stall(&self, id: &IssueId) -> Result<bool, StallError> {
        let mut state = self.write_state()?;
        let removed = state.entries.remove(id).is_some();
        state.pending.remove(id);
        drop(state);

        if removed {
            info!(issue_id = %id, "stall cleared");
            self.emit(IssueEvent::Removed { id: id.clone() });
        }
        Ok(removed)
    }

    /// Record that the scanner resolved an issue on its own. Issues sharing
    /// one of its nodes are solved with it. Returns the ids solved by
    /// propagation.
    pub fn mark_solved_by_system(&self, id: &IssueId) -> Result<Vec<IssueId>, StallError> {
        let mut state = self.write_state()?;
        let entry = state
            .entries
            .get_mut(id)
            .ok_or_else(|| StallError::NotFound(id.clone()))?;
        if !entry.record.is_unsolved() {
            debug!(issue_id = %id, solved = %entry.record.solved, "already solved");
            return Ok(Vec::new());
        }
        entry.record.solved = SolvedState::SolvedBySystem;
        let settled = entry.record.footprint().nodes_only();
        let propagated: Vec<IssueId> = state
            .propagate(id, settled)
            .into_iter()
            .map(|r| r.id)
            .collect();
        drop(state);

        info!(issue_id = %id, propagated = propagated.len(), "solved by system");
        self.emit(IssueEvent::Changed {
            id: id.clone(),
            solved: SolvedState::SolvedBySystem,
        });
        for other in &propagated {
            self.emit(IssueEvent::Changed {
                id: other.clone(),
                solved: SolvedState::SolvedByOtherSide,
            });
        }
        Ok(propagated)
    }

    /// Feed one engine op result for an issue with a resolution in flight.
    pub fn report_op_result(
        &self,
        issue_id: &IssueId,
        op_index: usize,
        success: bool,
        error_code: Option<String>,
    ) -> Result<OpAck, StallError> {
        let mut state = self.write_state()?;
        let pending = state
            .pending
            .get_mut(issue_id)
            .ok_or_else(|| StallError::NoPendingResolution(issue_id.clone()))?;
        if op_index >= pending.ops {
            return Err(StallError::UnknownOp {
                issue_id: issue_id.clone(),
                op_index,
                ops: pending.ops,
            });
        }

        if success {
            pending.completed.insert(op_index);
            if pending.completed.len() < pending.ops {
                debug!(issue_id = %issue_id, op_index, "op completed");
                return Ok(OpAck::Recorded);
            }
            let batch_id = pending.batch_id;
            state.pending.remove(issue_id);
            info!(issue_id = %issue_id, %batch_id, "resolution completed");
            return Ok(OpAck::Completed);
        }

        let Some(PendingResolution {
            batch_id,
            before,
            dependents,
            ..
        }) = state.pending.remove(issue_id)
        else {
            return Err(StallError::NoPendingResolution(issue_id.clone()));
        };
        if let Some(entry) = state.entries.get_mut(issue_id) {
            entry.record = before;
        }
        // Dependents go back to unsolved unless they were cleared since.
        let mut restored = Vec::new();
        for dependent in dependents {
            if let Some(entry) = state.entries.get_mut(&dependent.id) {
                if entry.record.solved == SolvedState::SolvedByOtherSide {
                    restored.push(dependent.id.clone());
                    entry.record = dependent;
                }
            }
        }
        drop(state);

        let error = StallError::EngineOpFailed {
            issue_id: issue_id.clone(),
            op_index,
            cause: error_code.clone().unwrap_or_else(|| "unknown".to_string()),
        };
        warn!(
            issue_id = %issue_id,
            %batch_id,
            op_index,
            dependents = restored.len(),
            error = %error,
            "resolution rolled back"
        );
        self.emit(IssueEvent::ResolutionFailed {
            id: issue_id.clone(),
            op_index,
            error_code,
        });
        for id in std::iter::once(issue_id.clone()).chain(restored) {
            self.emit(IssueEvent::Changed {
                id,
                solved: SolvedState::Unsolved,
            });
        }
        Ok(OpAck::RolledBack { error })
    }

    /// Feed every result of a batch outcome. Results for issues that were
    /// already rolled back or cleared are skipped.
    pub fn apply_outcome(&self, outcome: &BatchOutcome) -> Result<OutcomeSummary, StallError> {
        let mut summary = OutcomeSummary::default();
        let mut rolled_back = HashSet::new();

        for result in &outcome.results {
            if rolled_back.contains(&result.issue_id) {
                continue;
            }
            match self.report_op_result(
                &result.issue_id,
                result.op_index,
                result.success,
                result.error_code.clone(),
            ) {
                Ok(OpAck::Recorded) => {}
                Ok(OpAck::Completed) => summary.completed.push(result.issue_id.clone()),
                Ok(OpAck::RolledBack { .. }) => {
                    rolled_back.insert(result.issue_id.clone());
                    summary.rolled_back.push(result.issue_id.clone());
                }
                Err(StallError::NoPendingResolution(id)) => {
                    debug!(issue_id = %id, batch_id = %outcome.batch_id, "result for settled issue skipped");
                }
                Err(e) => return Err(e),
            }
        }

        info!(
            batch_id = %outcome.batch_id,
            completed = summary.completed.len(),
            rolled_back = summary.rolled_back.len(),
            "batch outcome applied"
        );
        Ok(summary)
    }

    // -- GUI side -----------------------------------------------------------

    /// Issues matching `filter`, most recently reported first.
    pub fn list_issues(&self, filter: &IssueFilter) -> Result<Vec<IssueRecord>, StallError> {
        let state = self.read_state()?;
        let mut entries: Vec<&Entry> = state
            .entries
            .values()
            .filter(|e| filter.matches(&e.record))
            .collect();
        entries.sort_by(|a, b| b.seq.cmp(&a.seq));
        Ok(entries
            .into_iter()
            .map(|e| grouped_copy(&e.record))
            .collect())
    }

    /// An owned copy of one issue with its duplicate grouping up to date.
    pub fn snapshot(&self, id: &IssueId) -> Result<IssueRecord, StallError> {
        let state = self.read_state()?;
        state
            .entries
            .get(id)
            .map(|e| grouped_copy(&e.record))
            .ok_or_else(|| StallError::NotFound(id.clone()))
    }

    /// The legal actions for one issue. Regroups a stale cache in place.
    pub fn legal_actions(&self, id: &IssueId) -> Result<ActionSet, StallError> {
        let mut state = self.write_state()?;
        let entry = state
            .entries
            .get_mut(id)
            .ok_or_else(|| StallError::NotFound(id.clone()))?;
        if let Some(names) = entry.record.name_conflict.as_mut() {
            names.ensure_grouped();
        }
        Ok(Classifier::legal_actions(&entry.record))
    }

    /// Select every unsolved issue matching `predicate`, in listing order,
    /// capturing each one's content hash.
    pub fn compute_selection<F>(&self, predicate: F) -> Result<Selection, StallError>
    where
        F: Fn(&IssueRecord) -> bool,
    {
        let state = self.read_state()?;
        let mut entries: Vec<&Entry> = state
            .entries
            .values()
            .filter(|e| e.record.is_unsolved() && predicate(&e.record))
            .collect();
        entries.sort_by(|a, b| b.seq.cmp(&a.seq));
        Ok(Selection::from_entries(
            entries
                .into_iter()
                .map(|e| (e.record.id.clone(), e.record.content_hash()))
                .collect(),
        ))
    }

    /// Select exactly `ids`.
    pub fn select(&self, ids: &[IssueId]) -> Result<Selection, StallError> {
        {
            let state = self.read_state()?;
            if let Some(missing) = ids.iter().find(|id| !state.entries.contains_key(*id)) {
                return Err(StallError::NotFound(missing.clone()));
            }
        }
        let wanted: HashSet<&IssueId> = ids.iter().collect();
        self.compute_selection(|r| wanted.contains(&r.id))
    }

    /// Expand a selection to every unsolved issue similar to one of its
    /// members.
    pub fn similar_to(&self, selection: &Selection) -> Result<Selection, StallError> {
        let keys = {
            let state = self.read_state()?;
            selection
                .ids()
                .filter_map(|id| state.entries.get(id))
                .map(|e| Classifier::similarity_key(&e.record))
                .collect::<HashSet<_>>()
        };
        self.compute_selection(|r| keys.contains(&Classifier::similarity_key(r)))
    }
}

fn grouped_copy(record: &IssueRecord) -> IssueRecord {
    let mut copy = record.clone();
    if let Some(names) = copy.name_conflict.as_mut() {
        names.ensure_grouped();
    }
    copy
}
