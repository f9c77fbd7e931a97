//! Boundary to the transfer engine.
//!
//! A batch of planned operations is handed over as one [`Submission`]
//! together with a [`CompletionSender`]. The engine reports the per-op
//! results through the sender exactly once; the caller awaits them on the
//! matching [`BatchCompletion`].

use std::collections::BTreeSet;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::errors::StallError;
use crate::models::IssueId;
use crate::stall::PrimitiveOp;

// ---------------------------------------------------------------------------
// Submission
// ---------------------------------------------------------------------------

/// One op of a batch, tagged with the issue it resolves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmittedOp {
    pub issue_id: IssueId,
    /// Position of the op within its issue's plan.
    pub op_index: usize,
    pub op: PrimitiveOp,
}

/// Everything a single `apply` hands to the engine. Ops of one issue appear
/// in plan order.
#[derive(Debug, Clone, Serialize)]
pub struct Submission {
    pub batch_id: Uuid,
    pub ops: Vec<SubmittedOp>,
    pub submitted_at: DateTime<Utc>,
}

impl Submission {
    pub fn new(batch_id: Uuid, ops: Vec<SubmittedOp>) -> Self {
        Self {
            batch_id,
            ops,
            submitted_at: Utc::now(),
        }
    }
}

/// Result of one submitted op.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OpResult {
    pub issue_id: IssueId,
    pub op_index: usize,
    pub success: bool,
    pub error_code: Option<String>,
}

impl OpResult {
    pub fn ok(issue_id: IssueId, op_index: usize) -> Self {
        Self {
            issue_id,
            op_index,
            success: true,
            error_code: None,
        }
    }

    pub fn failed(issue_id: IssueId, op_index: usize, error_code: impl Into<String>) -> Self {
        Self {
            issue_id,
            op_index,
            success: false,
            error_code: Some(error_code.into()),
        }
    }
}

/// All per-op results of one batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchOutcome {
    pub batch_id: Uuid,
    pub results: Vec<OpResult>,
}

impl BatchOutcome {
    pub fn all_succeeded(&self) -> bool {
        self.results.iter().all(|r| r.success)
    }

    pub fn failures(&self) -> impl Iterator<Item = &OpResult> {
        self.results.iter().filter(|r| !r.success)
    }
}

// ---------------------------------------------------------------------------
// Completion
// ---------------------------------------------------------------------------

/// Engine-side half of a batch completion.
#[derive(Debug)]
pub struct CompletionSender {
    batch_id: Uuid,
    tx: oneshot::Sender<BatchOutcome>,
}

impl CompletionSender {
    pub fn batch_id(&self) -> Uuid {
        self.batch_id
    }

    /// Deliver the outcome. Returns `false` when nobody is waiting any more.
    pub fn complete(self, outcome: BatchOutcome) -> bool {
        let delivered = self.tx.send(outcome).is_ok();
        if !delivered {
            debug!(batch_id = %self.batch_id, "batch completion receiver dropped");
        }
        delivered
    }
}

/// Caller-side half of a batch completion.
#[derive(Debug)]
pub struct BatchCompletion {
    batch_id: Uuid,
    rx: oneshot::Receiver<BatchOutcome>,
}

impl BatchCompletion {
    pub fn batch_id(&self) -> Uuid {
        self.batch_id
    }

    /// Wait for the engine to finish the whole batch.
    pub async fn wait(self) -> Result<BatchOutcome, StallError> {
        self.rx
            .await
            .map_err(|_| StallError::CompletionDropped(self.batch_id.to_string()))
    }
}

/// Create the two halves of a completion for `batch_id`.
pub fn completion_channel(batch_id: Uuid) -> (CompletionSender, BatchCompletion) {
    let (tx, rx) = oneshot::channel();
    (
        CompletionSender { batch_id, tx },
        BatchCompletion { batch_id, rx },
    )
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// The external transfer engine.
///
/// `submit` must not block; the engine completes the batch asynchronously
/// (or inline) through `completion`. There is no mid-flight cancellation.
pub trait TransferEngine: Send + Sync {
    fn submit(&self, submission: Submission, completion: CompletionSender);
}

/// Engine that executes nothing: every op succeeds unless it was marked to
/// fail with [`DryRunEngine::fail_op`]. Submissions are kept for inspection.
#[derive(Debug, Default)]
pub struct DryRunEngine {
    submissions: Mutex<Vec<Submission>>,
    failing: Mutex<BTreeSet<(IssueId, usize)>>,
}

impl DryRunEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make op `op_index` of `issue_id` fail in every later batch.
    pub fn fail_op(&self, issue_id: IssueId, op_index: usize) {
        self.failing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert((issue_id, op_index));
    }

    /// Every submission received so far, oldest first.
    pub fn submissions(&self) -> Vec<Submission> {
        self.submissions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl TransferEngine for DryRunEngine {
    fn submit(&self, submission: Submission, completion: CompletionSender) {
        let failing = self
            .failing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();

        let results: Vec<OpResult> = submission
            .ops
            .iter()
            .map(|op| {
                debug!(issue_id = %op.issue_id, op_index = op.op_index, op = %op.op, "dry run");
                if failing.contains(&(op.issue_id.clone(), op.op_index)) {
                    OpResult::failed(op.issue_id.clone(), op.op_index, "dry_run_failure")
                } else {
                    OpResult::ok(op.issue_id.clone(), op.op_index)
                }
            })
            .collect();

        let outcome = BatchOutcome {
            batch_id: submission.batch_id,
            results,
        };
        if outcome.all_succeeded() {
            info!(batch_id = %submission.batch_id, ops = submission.ops.len(), "dry run batch completed");
        } else {
            warn!(
                batch_id = %submission.batch_id,
                failed = outcome.failures().count(),
                "dry run batch completed with failures"
            );
        }

        self.submissions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(submission);
        completion.complete(outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NodeLocator, Side};

    fn remove_op(issue: &str, index: usize) -> SubmittedOp {
        SubmittedOp {
            issue_id: IssueId::new(issue),
            op_index: index,
            op: PrimitiveOp::Remove {
                side: Side::Cloud,
                target: NodeLocator::Handle(index as u64),
                name: "a".into(),
            },
        }
    }

    #[tokio::test]
    async fn test_dry_run_completes_all_ops() {
        let engine = DryRunEngine::new();
        let submission = Submission::new(Uuid::new_v4(), vec![remove_op("a", 0), remove_op("a", 1)]);
        let (tx, completion) = completion_channel(submission.batch_id);
        engine.submit(submission, tx);

        let outcome = completion.wait().await.unwrap();
        assert!(outcome.all_succeeded());
        assert_eq!(outcome.results.len(), 2);
        assert_eq!(engine.submissions().len(), 1);
    }

    #[tokio::test]
    async fn test_dry_run_failure_injection() {
        let engine = DryRunEngine::new();
        engine.fail_op(IssueId::new("b"), 0);
        let submission = Submission::new(Uuid::new_v4(), vec![remove_op("a", 0), remove_op("b", 0)]);
        let (tx, completion) = completion_channel(submission.batch_id);
        engine.submit(submission, tx);

        let outcome = completion.wait().await.unwrap();
        let failed: Vec<&OpResult> = outcome.failures().collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].issue_id, IssueId::new("b"));
        assert_eq!(failed[0].error_code.as_deref(), Some("dry_run_failure"));
    }

    #[tokio::test]
    async fn test_dropped_sender_reports_error() {
        let (tx, completion) = completion_channel(Uuid::new_v4());
        drop(tx);
        let err = completion.wait().await.unwrap_err();
        assert!(matches!(err, StallError::CompletionDropped(_)));
    }
}
