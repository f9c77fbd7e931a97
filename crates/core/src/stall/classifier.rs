//! Classification of stalled issues into legal resolution actions.
//!
//! The [`Classifier`] is stateless and pure: it looks at an issue snapshot
//! and answers which actions may be applied to it. Name conflicts are
//! classified against a fresh duplicate grouping; a stale cached grouping is
//! recomputed on a private copy before answering.

use std::borrow::Cow;

use serde::{Serialize, Serializer};
use tracing::debug;

use super::issue::{IssueRecord, NameConflictIssue, StallReason};
use crate::errors::StallError;
use crate::models::Side;

// ---------------------------------------------------------------------------
// Actions
// ---------------------------------------------------------------------------

/// A user-selectable resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionAction {
    /// Keep the local item, replacing the cloud one.
    ChooseLocal,
    /// Keep the cloud item, replacing the local one.
    ChooseCloud,
    /// Remove all but one member of every duplicate group.
    RemoveDuplicated,
    /// Rename colliding names with a numeric suffix.
    Rename,
    /// Merge same-named folders into one.
    MergeFolders,
    /// Keep the most recently modified cloud name, remove the others.
    KeepMostRecentlyModified,
    /// Re-download and re-upload to recompute the cloud fingerprint.
    FixFingerprint,
    /// Apply the single deterministic remedy for the reason.
    Solve,
}

impl ResolutionAction {
    pub const ALL: [Self; 8] = [
        Self::ChooseLocal,
        Self::ChooseCloud,
        Self::RemoveDuplicated,
        Self::Rename,
        Self::MergeFolders,
        Self::KeepMostRecentlyModified,
        Self::FixFingerprint,
        Self::Solve,
    ];

    fn bit(self) -> u16 {
        1 << (self as u16)
    }

    /// Actions that may be combined with each other in one request.
    pub fn is_composable(self) -> bool {
        matches!(
            self,
            Self::RemoveDuplicated | Self::Rename | Self::MergeFolders
        )
    }
}

impl std::fmt::Display for ResolutionAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ChooseLocal => write!(f, "choose_local"),
            Self::ChooseCloud => write!(f, "choose_cloud"),
            Self::RemoveDuplicated => write!(f, "remove_duplicated"),
            Self::Rename => write!(f, "rename"),
            Self::MergeFolders => write!(f, "merge_folders"),
            Self::KeepMostRecentlyModified => write!(f, "keep_most_recently_modified"),
            Self::FixFingerprint => write!(f, "fix_fingerprint"),
            Self::Solve => write!(f, "solve"),
        }
    }
}

impl std::str::FromStr for ResolutionAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().replace('-', "_").to_lowercase();
        Self::ALL
            .into_iter()
            .find(|a| a.to_string() == normalized)
            .ok_or_else(|| format!("unknown resolution action '{}'", s))
    }
}

/// A bitset of [`ResolutionAction`]s.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ActionSet(u16);

impl ActionSet {
    pub fn empty() -> Self {
        Self(0)
    }

    pub fn single(action: ResolutionAction) -> Self {
        Self(action.bit())
    }

    pub fn insert(&mut self, action: ResolutionAction) {
        self.0 |= action.bit();
    }

    pub fn with(mut self, action: ResolutionAction) -> Self {
        self.insert(action);
        self
    }

    pub fn contains(&self, action: ResolutionAction) -> bool {
        self.0 & action.bit() != 0
    }

    pub fn is_subset_of(&self, other: &ActionSet) -> bool {
        self.0 & !other.0 == 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn iter(&self) -> impl Iterator<Item = ResolutionAction> + '_ {
        ResolutionAction::ALL
            .into_iter()
            .filter(move |a| self.contains(*a))
    }

    /// A non-empty set of composable actions, or exactly one action.
    pub fn is_well_formed(&self) -> bool {
        match self.len() {
            0 => false,
            1 => true,
            _ => self.iter().all(ResolutionAction::is_composable),
        }
    }
}

impl FromIterator<ResolutionAction> for ActionSet {
    fn from_iter<I: IntoIterator<Item = ResolutionAction>>(iter: I) -> Self {
        let mut set = Self::empty();
        for action in iter {
            set.insert(action);
        }
        set
    }
}

impl std::fmt::Display for ActionSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            return write!(f, "none");
        }
        let names: Vec<String> = self.iter().map(|a| a.to_string()).collect();
        write!(f, "{}", names.join("+"))
    }
}

impl Serialize for ActionSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter())
    }
}

// ---------------------------------------------------------------------------
// Similarity
// ---------------------------------------------------------------------------

/// Issues with equal keys can take the same batch resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SimilarityKey {
    pub reason: StallReason,
    /// Whether duplicate removal applies.
    pub duplicate_eligible: bool,
    pub legal: ActionSet,
}

// ---------------------------------------------------------------------------
// Classifier
// ---------------------------------------------------------------------------

/// Stateless classifier.
pub struct Classifier;

impl Classifier {
    /// The legal actions for `issue`. Solved issues have none.
    pub fn legal_actions(issue: &IssueRecord) -> ActionSet {
        if !issue.is_unsolved() {
            return ActionSet::empty();
        }

        let actions = match issue.reason {
            StallReason::LocalAndRemoteDiffer(_) => ActionSet::single(ResolutionAction::ChooseLocal)
                .with(ResolutionAction::ChooseCloud),
            StallReason::CloudFingerprintMissing if issue.cloud.is_some() => {
                ActionSet::single(ResolutionAction::FixFingerprint)
            }
            StallReason::FolderMatchedAgainstFile => {
                ActionSet::single(ResolutionAction::FixFingerprint).with(ResolutionAction::Solve)
            }
            StallReason::NameConflict => match &issue.name_conflict {
                Some(names) => name_conflict_actions(&fresh_grouping(names)),
                None => ActionSet::empty(),
            },
            _ => ActionSet::empty(),
        };

        debug!(issue_id = %issue.id, reason = %issue.reason, actions = %actions, "classified issue");
        actions
    }

    /// Reject a request that is malformed or outside the legal set.
    pub fn check_request(issue: &IssueRecord, requested: ActionSet) -> Result<(), StallError> {
        let legal = Self::legal_actions(issue);
        if !requested.is_well_formed() || !requested.is_subset_of(&legal) {
            return Err(StallError::IllegalAction {
                id: issue.id.clone(),
                action: requested.to_string(),
            });
        }
        Ok(())
    }

    /// Grouping key for "apply to all similar".
    pub fn similarity_key(issue: &IssueRecord) -> SimilarityKey {
        let duplicate_eligible = issue
            .name_conflict
            .as_ref()
            .is_some_and(|names| fresh_grouping(names).has_duplicated_nodes());
        SimilarityKey {
            reason: issue.reason,
            duplicate_eligible,
            legal: Self::legal_actions(issue),
        }
    }

    /// Debug description of an issue. Not meant for display to end users.
    pub fn describe(issue: &IssueRecord) -> String {
        let mut out = format!("{} [{}]", issue.reason, issue.solved);
        if let Some(names) = &issue.name_conflict {
            let names = fresh_grouping(names);
            out.push_str(&format!(
                ": {} local / {} cloud name(s), {} duplicate group(s), {} folder merge(s) possible, {} collision(s) left",
                names.names(Side::Local).len(),
                names.names(Side::Cloud).len(),
                names.cloud_groups().duplicate_groups().count(),
                if names.has_folders_to_merge() { "some" } else { "no" },
                names.remaining_collisions(),
            ));
        } else {
            for side in [Side::Local, Side::Cloud] {
                if let Some(info) = issue.side(side) {
                    out.push_str(&format!(" {}={} ({})", side, info.path, info.kind));
                }
            }
        }
        out
    }
}

/// The name conflict with an up-to-date grouping, cloning only when the
/// cached one is stale.
fn fresh_grouping(names: &NameConflictIssue) -> Cow<'_, NameConflictIssue> {
    if names.is_grouping_stale() {
        let mut copy = names.clone();
        copy.regroup();
        Cow::Owned(copy)
    } else {
        Cow::Borrowed(names)
    }
}

fn name_conflict_actions(names: &NameConflictIssue) -> ActionSet {
    let mut actions = ActionSet::empty();
    if !names.has_unsolved() {
        return actions;
    }
    actions.insert(ResolutionAction::Rename);
    if names.files_count() > 0 && names.has_duplicated_nodes() {
        actions.insert(ResolutionAction::RemoveDuplicated);
    }
    if names.has_folders_to_merge() {
        actions.insert(ResolutionAction::MergeFolders);
    }
    if names.unsolved_count(Side::Cloud) >= 2 {
        actions.insert(ResolutionAction::KeepMostRecentlyModified);
    }
    actions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{IssueId, NodeLocator, SideInfo, SolvedState};
    use crate::stall::issue::{ConflictedNameInfo, DifferKind, StallReport};

    fn name_conflict(local: Vec<ConflictedNameInfo>, cloud: Vec<ConflictedNameInfo>) -> IssueRecord {
        IssueRecord::from_report(StallReport::name_conflict(
            IssueId::new("cloud:/Docs/Report.pdf"),
            NameConflictIssue::new(local, cloud),
        ))
        .unwrap()
    }

    fn report(handle: u64) -> ConflictedNameInfo {
        ConflictedNameInfo::file("Report.pdf", NodeLocator::Handle(handle), "F1", 10, 100, 100)
    }

    #[test]
    fn test_differ_offers_choose_side() {
        let issue = IssueRecord::from_report(StallReport::new(
            StallReason::LocalAndRemoteDiffer(DifferKind::PreviouslyUnsynced),
            Some(SideInfo::file("/l/a", 1, 1)),
            Some(SideInfo::file("/a", 2, 2)),
        ))
        .unwrap();
        let actions = Classifier::legal_actions(&issue);
        assert_eq!(
            actions,
            ActionSet::single(ResolutionAction::ChooseLocal).with(ResolutionAction::ChooseCloud)
        );
    }

    #[test]
    fn test_duplicates_offer_remove_duplicated_on_stale_grouping() {
        let issue = name_conflict(
            vec![ConflictedNameInfo::file(
                "Report.pdf",
                NodeLocator::Path("/l/Report.pdf".into()),
                "F9",
                1,
                1,
                1,
            )],
            vec![report(1), report(2)],
        );
        assert!(issue.name_conflict.as_ref().unwrap().is_grouping_stale());

        let actions = Classifier::legal_actions(&issue);
        assert!(actions.contains(ResolutionAction::RemoveDuplicated));
        assert!(actions.contains(ResolutionAction::Rename));
        assert!(actions.contains(ResolutionAction::KeepMostRecentlyModified));
        assert!(!actions.contains(ResolutionAction::MergeFolders));
    }

    #[test]
    fn test_solved_issue_has_no_actions() {
        let mut issue = name_conflict(vec![], vec![report(1), report(2)]);
        issue.solved = SolvedState::SolvedByUser;
        assert!(Classifier::legal_actions(&issue).is_empty());
    }

    #[test]
    fn test_informational_reason_has_no_actions() {
        let issue = IssueRecord::from_report(StallReport::new(
            StallReason::ExceedsTreeDepth,
            Some(SideInfo::folder("/l/deep")),
            None,
        ))
        .unwrap();
        assert!(Classifier::legal_actions(&issue).is_empty());
    }

    #[test]
    fn test_check_request_rejects_mixed_non_composable() {
        let issue = name_conflict(vec![], vec![report(1), report(2)]);
        let request = ActionSet::single(ResolutionAction::KeepMostRecentlyModified)
            .with(ResolutionAction::Rename);
        let err = Classifier::check_request(&issue, request).unwrap_err();
        assert!(matches!(err, StallError::IllegalAction { .. }));

        let request =
            ActionSet::single(ResolutionAction::RemoveDuplicated).with(ResolutionAction::Rename);
        assert!(Classifier::check_request(&issue, request).is_ok());
    }

    #[test]
    fn test_check_request_rejects_merge_without_folders() {
        let issue = name_conflict(vec![], vec![report(1), report(2)]);
        let err =
            Classifier::check_request(&issue, ActionSet::single(ResolutionAction::MergeFolders))
                .unwrap_err();
        assert_eq!(err.kind(), crate::errors::ErrorKind::IllegalAction);
    }

    #[test]
    fn test_action_parse_and_display() {
        assert_eq!(
            "remove-duplicated".parse::<ResolutionAction>().unwrap(),
            ResolutionAction::RemoveDuplicated
        );
        assert!("teleport".parse::<ResolutionAction>().is_err());
        let set: ActionSet = [ResolutionAction::Rename, ResolutionAction::MergeFolders]
            .into_iter()
            .collect();
        assert_eq!(set.to_string(), "rename+merge_folders");
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_similarity_key_distinguishes_duplicate_eligibility() {
        let dupes = name_conflict(vec![], vec![report(1), report(2)]);
        let mut distinct_b = report(2);
        distinct_b.fingerprint = Some(crate::models::Fingerprint::new("F2"));
        let distinct = name_conflict(vec![], vec![report(1), distinct_b]);

        let a = Classifier::similarity_key(&dupes);
        let b = Classifier::similarity_key(&distinct);
        assert_eq!(a.reason, b.reason);
        assert_ne!(a, b);
    }

    #[test]
    fn test_describe_mentions_reason() {
        let issue = name_conflict(vec![], vec![report(1), report(2)]);
        let text = Classifier::describe(&issue);
        assert!(text.starts_with("name_conflict [unsolved]"));
        assert!(text.contains("1 duplicate group(s)"));
    }
}
