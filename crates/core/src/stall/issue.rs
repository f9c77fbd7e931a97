//! Issue records: owned snapshots of one reported stall.
//!
//! An [`IssueRecord`] is built from a scanner [`StallReport`] and never holds
//! references into scanner or engine state. Name conflicts carry an extra
//! [`NameConflictIssue`] payload with the colliding names on both sides and
//! the cached duplicate grouping of the cloud names.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::grouper::{CloudConflictGroups, FingerprintGrouper};
use crate::errors::StallError;
use crate::models::{
    is_same_or_under, Fingerprint, IssueId, NodeKind, NodeLocator, Side, SideInfo, SolvedState,
};

// ---------------------------------------------------------------------------
// Reasons
// ---------------------------------------------------------------------------

/// Which sub-case of a local/cloud content divergence was reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DifferKind {
    /// Both sides exist but were never synced against each other.
    PreviouslyUnsynced,
    /// Both sides changed since the last successful sync.
    ChangedSinceLastSync,
}

/// Why the scanner could not reconcile an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StallReason {
    LocalFolderNotScannable,
    SymLink,
    HardOrSpecialLink,
    CloudFingerprintMissing,
    CloudNodeBlocked,
    MoveOrRenameCannotOccur,
    DeleteOrMoveWaitingOnScan,
    DeleteWaitingOnMoves,
    UploadTargetUnreachable,
    DownloadTargetUnreachable,
    CannotCreateFolder,
    CannotPerformDeletion,
    ExceedsTreeDepth,
    FolderMatchedAgainstFile,
    LocalAndRemoteDiffer(DifferKind),
    NameConflict,
}

impl StallReason {
    /// Reasons that always describe both a local and a cloud item.
    pub fn is_two_sided(self) -> bool {
        matches!(
            self,
            Self::LocalAndRemoteDiffer(_) | Self::FolderMatchedAgainstFile
        )
    }
}

impl std::fmt::Display for StallReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LocalFolderNotScannable => write!(f, "local_folder_not_scannable"),
            Self::SymLink => write!(f, "sym_link"),
            Self::HardOrSpecialLink => write!(f, "hard_or_special_link"),
            Self::CloudFingerprintMissing => write!(f, "cloud_fingerprint_missing"),
            Self::CloudNodeBlocked => write!(f, "cloud_node_blocked"),
            Self::MoveOrRenameCannotOccur => write!(f, "move_or_rename_cannot_occur"),
            Self::DeleteOrMoveWaitingOnScan => write!(f, "delete_or_move_waiting_on_scan"),
            Self::DeleteWaitingOnMoves => write!(f, "delete_waiting_on_moves"),
            Self::UploadTargetUnreachable => write!(f, "upload_target_unreachable"),
            Self::DownloadTargetUnreachable => write!(f, "download_target_unreachable"),
            Self::CannotCreateFolder => write!(f, "cannot_create_folder"),
            Self::CannotPerformDeletion => write!(f, "cannot_perform_deletion"),
            Self::ExceedsTreeDepth => write!(f, "exceeds_tree_depth"),
            Self::FolderMatchedAgainstFile => write!(f, "folder_matched_against_file"),
            Self::LocalAndRemoteDiffer(DifferKind::PreviouslyUnsynced) => {
                write!(f, "local_and_remote_differ(previously_unsynced)")
            }
            Self::LocalAndRemoteDiffer(DifferKind::ChangedSinceLastSync) => {
                write!(f, "local_and_remote_differ(changed_since_last_sync)")
            }
            Self::NameConflict => write!(f, "name_conflict"),
        }
    }
}

// ---------------------------------------------------------------------------
// Name conflicts
// ---------------------------------------------------------------------------

/// Outcome recorded for one colliding name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NameResolution {
    #[default]
    Unsolved,
    Remove,
    Rename,
    SolvedByOtherSide,
}

impl NameResolution {
    /// Still occupies a name in its folder after resolution.
    pub fn survives(self) -> bool {
        matches!(self, Self::Unsolved | Self::Rename)
    }
}

/// A direct child of a conflicting folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderEntry {
    pub name: String,
    #[serde(default)]
    pub fingerprint: Option<Fingerprint>,
    #[serde(default = "default_true")]
    pub is_file: bool,
}

fn default_true() -> bool {
    true
}

/// One of the names colliding into a single target name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictedNameInfo {
    /// The name as it appears on its side.
    pub name: String,
    /// Handle (cloud) or path (local) of the item.
    pub locator: NodeLocator,
    #[serde(default)]
    pub fingerprint: Option<Fingerprint>,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub modified_time: i64,
    #[serde(default)]
    pub created_time: i64,
    #[serde(default = "default_true")]
    pub is_file: bool,
    /// Member of a duplicate group with at least one other member.
    #[serde(default)]
    pub duplicated: bool,
    #[serde(default)]
    pub duplicate_group_id: Option<usize>,
    #[serde(default)]
    pub solved: NameResolution,
    #[serde(default)]
    pub rename_to: Option<String>,
    /// Direct children, for folders.
    #[serde(default)]
    pub children: Vec<FolderEntry>,
}

impl ConflictedNameInfo {
    /// A file name entry with no grouping state.
    pub fn file(
        name: impl Into<String>,
        locator: NodeLocator,
        fingerprint: impl Into<String>,
        size: u64,
        modified_time: i64,
        created_time: i64,
    ) -> Self {
        Self {
            name: name.into(),
            locator,
            fingerprint: Some(Fingerprint::new(fingerprint)),
            size,
            modified_time,
            created_time,
            is_file: true,
            duplicated: false,
            duplicate_group_id: None,
            solved: NameResolution::Unsolved,
            rename_to: None,
            children: Vec::new(),
        }
    }

    /// A folder name entry with the given children.
    pub fn folder(name: impl Into<String>, locator: NodeLocator, children: Vec<FolderEntry>) -> Self {
        Self {
            name: name.into(),
            locator,
            fingerprint: None,
            size: 0,
            modified_time: 0,
            created_time: 0,
            is_file: false,
            duplicated: false,
            duplicate_group_id: None,
            solved: NameResolution::Unsolved,
            rename_to: None,
            children,
        }
    }

    pub fn is_unsolved(&self) -> bool {
        self.solved == NameResolution::Unsolved
    }

    /// The name this entry holds once its resolution is carried out.
    pub fn final_name(&self) -> Option<&str> {
        match self.solved {
            NameResolution::Unsolved => Some(&self.name),
            NameResolution::Rename => self.rename_to.as_deref(),
            NameResolution::Remove | NameResolution::SolvedByOtherSide => None,
        }
    }
}

/// Payload of a [`StallReason::NameConflict`] issue.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NameConflictIssue {
    #[serde(default)]
    pub local_names: Vec<ConflictedNameInfo>,
    #[serde(default)]
    pub cloud_names: Vec<ConflictedNameInfo>,
    /// Other names already present in the local parent folder.
    #[serde(default)]
    pub local_siblings: Vec<String>,
    /// Other names already present in the cloud parent folder.
    #[serde(default)]
    pub cloud_siblings: Vec<String>,
    #[serde(skip)]
    cloud_groups: CloudConflictGroups,
}

impl PartialEq for NameConflictIssue {
    fn eq(&self, other: &Self) -> bool {
        self.local_names == other.local_names
            && self.cloud_names == other.cloud_names
            && self.local_siblings == other.local_siblings
            && self.cloud_siblings == other.cloud_siblings
    }
}

impl Eq for NameConflictIssue {}

impl NameConflictIssue {
    pub fn new(local_names: Vec<ConflictedNameInfo>, cloud_names: Vec<ConflictedNameInfo>) -> Self {
        Self {
            local_names,
            cloud_names,
            ..Default::default()
        }
    }

    pub fn names(&self, side: Side) -> &[ConflictedNameInfo] {
        match side {
            Side::Local => &self.local_names,
            Side::Cloud => &self.cloud_names,
        }
    }

    pub fn names_mut(&mut self, side: Side) -> &mut Vec<ConflictedNameInfo> {
        match side {
            Side::Local => &mut self.local_names,
            Side::Cloud => &mut self.cloud_names,
        }
    }

    pub fn siblings(&self, side: Side) -> &[String] {
        match side {
            Side::Local => &self.local_siblings,
            Side::Cloud => &self.cloud_siblings,
        }
    }

    /// The cached grouping. Check [`is_grouping_stale`](Self::is_grouping_stale)
    /// or call [`regroup`](Self::regroup) first.
    pub fn cloud_groups(&self) -> &CloudConflictGroups {
        &self.cloud_groups
    }

    pub fn is_grouping_stale(&self) -> bool {
        self.cloud_groups.is_stale()
    }

    /// Drop the cached grouping; the next [`ensure_grouped`](Self::ensure_grouped)
    /// recomputes it.
    pub fn invalidate_grouping(&mut self) {
        self.cloud_groups = CloudConflictGroups::default();
    }

    /// Recompute the duplicate grouping of the cloud names.
    pub fn regroup(&mut self) {
        self.cloud_groups = FingerprintGrouper::group(&mut self.cloud_names);
    }

    /// Regroup only if the cached grouping is stale.
    pub fn ensure_grouped(&mut self) {
        if self.is_grouping_stale() {
            self.regroup();
        }
    }

    /// Unsolved cloud names that are files.
    pub fn files_count(&self) -> usize {
        self.cloud_names
            .iter()
            .filter(|n| n.is_unsolved() && n.is_file)
            .count()
    }

    pub fn unsolved_count(&self, side: Side) -> usize {
        self.names(side).iter().filter(|n| n.is_unsolved()).count()
    }

    pub fn has_unsolved(&self) -> bool {
        self.unsolved_count(Side::Local) + self.unsolved_count(Side::Cloud) > 0
    }

    pub fn has_duplicated_nodes(&self) -> bool {
        self.cloud_names
            .iter()
            .any(|n| n.is_unsolved() && n.duplicated)
    }

    pub fn are_all_duplicated_nodes(&self) -> bool {
        let mut unsolved = self.cloud_names.iter().filter(|n| n.is_unsolved()).peekable();
        unsolved.peek().is_some() && unsolved.all(|n| n.duplicated)
    }

    /// Two or more unsolved folders, on either side, share the target name.
    pub fn has_folders_to_merge(&self) -> bool {
        self.local_names
            .iter()
            .chain(self.cloud_names.iter())
            .filter(|n| n.is_unsolved() && !n.is_file)
            .count()
            >= 2
    }

    /// Number of names that would still collide if every recorded outcome
    /// were carried out.
    ///
    /// All unsolved names on one side collide with each other by
    /// construction; renamed entries collide only on an identical
    /// (case-folded) target.
    pub fn remaining_collisions(&self) -> usize {
        [Side::Local, Side::Cloud]
            .into_iter()
            .map(|side| {
                let names = self.names(side);
                let unsolved = names.iter().filter(|n| n.is_unsolved()).count();
                let mut seen = BTreeSet::new();
                let mut dupes = 0;
                for name in names.iter().filter_map(ConflictedNameInfo::final_name) {
                    if !seen.insert(name.to_lowercase()) {
                        dupes += 1;
                    }
                }
                unsolved.saturating_sub(1).max(dupes)
            })
            .sum()
    }

    /// Record the outcome for the name at `locator` on `side`.
    ///
    /// Returns `false` when no such name exists.
    pub fn mark_name(
        &mut self,
        side: Side,
        locator: &NodeLocator,
        solved: NameResolution,
        rename_to: Option<String>,
    ) -> bool {
        match self
            .names_mut(side)
            .iter_mut()
            .find(|n| &n.locator == locator)
        {
            Some(entry) => {
                entry.solved = solved;
                entry.rename_to = rename_to;
                true
            }
            None => false,
        }
    }

    /// Mark every still-unsolved name as resolved by another issue.
    pub fn mark_all_solved_by_other_side(&mut self) {
        for entry in self
            .local_names
            .iter_mut()
            .chain(self.cloud_names.iter_mut())
            .filter(|n| n.is_unsolved())
        {
            entry.solved = NameResolution::SolvedByOtherSide;
        }
    }

    /// Recompute per-name solved state after outcomes were recorded.
    ///
    /// Clears the duplicate flags of every group that no longer has two
    /// unsolved members. Returns `true` when nothing collides any more.
    pub fn recompute_solved_state(&mut self) -> bool {
        for group in self.cloud_groups.groups() {
            let live = group
                .members()
                .iter()
                .filter(|&&i| {
                    self.cloud_names
                        .get(i)
                        .is_some_and(|n| n.solved == NameResolution::Unsolved)
                })
                .count();
            if live <= 1 {
                for &i in group.members() {
                    if let Some(entry) = self.cloud_names.get_mut(i) {
                        entry.duplicated = false;
                        entry.duplicate_group_id = None;
                    }
                }
            }
        }
        self.remaining_collisions() == 0
    }
}

// ---------------------------------------------------------------------------
// Scanner reports
// ---------------------------------------------------------------------------

/// A raw stall report as delivered by the scanner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StallReport {
    /// Explicit identity; derived from the sides when absent.
    #[serde(default)]
    pub id: Option<IssueId>,
    pub reason: StallReason,
    #[serde(default)]
    pub local: Option<SideInfo>,
    #[serde(default)]
    pub cloud: Option<SideInfo>,
    #[serde(default)]
    pub name_conflict: Option<NameConflictIssue>,
}

impl StallReport {
    pub fn new(reason: StallReason, local: Option<SideInfo>, cloud: Option<SideInfo>) -> Self {
        Self {
            id: None,
            reason,
            local,
            cloud,
            name_conflict: None,
        }
    }

    /// A name-conflict report keyed by the conflicting folder path.
    pub fn name_conflict(id: IssueId, names: NameConflictIssue) -> Self {
        Self {
            id: Some(id),
            reason: StallReason::NameConflict,
            local: None,
            cloud: None,
            name_conflict: Some(names),
        }
    }

    pub fn with_id(mut self, id: IssueId) -> Self {
        self.id = Some(id);
        self
    }

    /// The explicit id, or one derived from the cloud handle, then the
    /// local path, then the cloud path.
    pub fn derive_id(&self) -> Option<IssueId> {
        if let Some(id) = &self.id {
            return Some(id.clone());
        }
        if let Some(handle) = self.cloud.as_ref().and_then(|c| c.handle) {
            return Some(IssueId::for_handle(handle));
        }
        if let Some(local) = &self.local {
            return Some(IssueId::for_path(Side::Local, &local.path));
        }
        self.cloud
            .as_ref()
            .map(|c| IssueId::for_path(Side::Cloud, &c.path))
    }
}

// ---------------------------------------------------------------------------
// Issue record
// ---------------------------------------------------------------------------

/// Hex-encoded SHA-256 of an issue's content, used by the external-change
/// guard.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotHash(String);

impl SnapshotHash {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SnapshotHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Immutable snapshot of one reported stall.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueRecord {
    pub id: IssueId,
    pub reason: StallReason,
    pub local: Option<SideInfo>,
    pub cloud: Option<SideInfo>,
    pub name_conflict: Option<NameConflictIssue>,
    pub solved: SolvedState,
    pub reported_at: DateTime<Utc>,
}

impl IssueRecord {
    /// Validate a scanner report and turn it into a record.
    pub fn from_report(report: StallReport) -> Result<Self, StallError> {
        let id = report.derive_id().ok_or_else(|| StallError::InvalidReport {
            id: IssueId::new("<unknown>"),
            detail: "report carries neither an id nor any side".into(),
        })?;
        let invalid = |detail: &str| StallError::InvalidReport {
            id: id.clone(),
            detail: detail.to_string(),
        };

        match (report.reason, &report.name_conflict) {
            (StallReason::NameConflict, None) => {
                return Err(invalid("name conflict without conflicting names"));
            }
            (StallReason::NameConflict, Some(names))
                if names.local_names.is_empty() && names.cloud_names.is_empty() =>
            {
                return Err(invalid("name conflict with empty name lists"));
            }
            (reason, Some(_)) if reason != StallReason::NameConflict => {
                return Err(invalid("name list attached to a non-name-conflict reason"));
            }
            _ => {}
        }

        if report.reason.is_two_sided() && (report.local.is_none() || report.cloud.is_none()) {
            return Err(invalid("two-sided reason requires both local and cloud sides"));
        }
        if report.reason != StallReason::NameConflict
            && report.local.is_none()
            && report.cloud.is_none()
        {
            return Err(invalid("at least one side must be present"));
        }

        let mut name_conflict = report.name_conflict;
        if let Some(names) = name_conflict.as_mut() {
            names.invalidate_grouping();
        }

        Ok(Self {
            id,
            reason: report.reason,
            local: report.local,
            cloud: report.cloud,
            name_conflict,
            solved: SolvedState::Unsolved,
            reported_at: Utc::now(),
        })
    }

    pub fn is_unsolved(&self) -> bool {
        self.solved == SolvedState::Unsolved
    }

    pub fn side(&self, side: Side) -> Option<&SideInfo> {
        match side {
            Side::Local => self.local.as_ref(),
            Side::Cloud => self.cloud.as_ref(),
        }
    }

    /// Hash of every scanner-provided field plus solved states.
    ///
    /// Derived grouping flags and the report timestamp are excluded, so a
    /// lazy regroup or an identical re-report does not change the hash.
    pub fn content_hash(&self) -> SnapshotHash {
        let mut feed = HashFeed::default();
        feed.str(self.id.as_str());
        feed.str(&self.reason.to_string());
        feed.str(&self.solved.to_string());
        feed.side(self.local.as_ref());
        feed.side(self.cloud.as_ref());
        match &self.name_conflict {
            None => feed.tag(0),
            Some(names) => {
                feed.tag(1);
                for side in [Side::Local, Side::Cloud] {
                    feed.len(names.names(side).len());
                    for entry in names.names(side) {
                        feed.name(entry);
                    }
                    feed.len(names.siblings(side).len());
                    for sibling in names.siblings(side) {
                        feed.str(sibling);
                    }
                }
            }
        }
        SnapshotHash(hex::encode(feed.0.finalize()))
    }

    /// Handles and paths this issue touches, for dependent propagation.
    pub fn footprint(&self) -> Footprint {
        let mut fp = Footprint::default();
        for side in [Side::Local, Side::Cloud] {
            if let Some(info) = self.side(side) {
                fp.add(side, &info.locator(), &info.path, info.kind == NodeKind::Folder);
                if let Some(h) = info.handle {
                    fp.handles.insert(h);
                }
            }
            if let Some(names) = &self.name_conflict {
                for entry in names.names(side) {
                    let path = entry.locator.path().unwrap_or_default().to_string();
                    fp.add(side, &entry.locator, &path, !entry.is_file);
                }
            }
        }
        fp
    }

    /// Footprint of the one node at `locator` on `side`. Empty when the
    /// issue names no such node.
    pub fn node_footprint(&self, side: Side, locator: &NodeLocator) -> Footprint {
        let mut fp = Footprint::default();
        if let Some(info) = self.side(side).filter(|info| &info.locator() == locator) {
            fp.add(side, locator, &info.path, info.kind == NodeKind::Folder);
        }
        if let Some(names) = &self.name_conflict {
            for entry in names.names(side).iter().filter(|e| &e.locator == locator) {
                let path = entry.locator.path().unwrap_or_default().to_string();
                fp.add(side, &entry.locator, &path, !entry.is_file);
            }
        }
        fp
    }
}

/// Sha-256 feed with length-prefixed fields.
#[derive(Default)]
struct HashFeed(Sha256);

impl HashFeed {
    fn tag(&mut self, t: u8) {
        self.0.update([t]);
    }

    fn len(&mut self, n: usize) {
        self.0.update((n as u64).to_le_bytes());
    }

    fn str(&mut self, s: &str) {
        self.len(s.len());
        self.0.update(s.as_bytes());
    }

    fn int(&mut self, v: i64) {
        self.0.update(v.to_le_bytes());
    }

    fn opt_str(&mut self, s: Option<&str>) {
        match s {
            None => self.tag(0),
            Some(s) => {
                self.tag(1);
                self.str(s);
            }
        }
    }

    fn locator(&mut self, locator: &NodeLocator) {
        match locator {
            NodeLocator::Handle(h) => {
                self.tag(0);
                self.0.update(h.to_le_bytes());
            }
            NodeLocator::Path(p) => {
                self.tag(1);
                self.str(p);
            }
        }
    }

    fn side(&mut self, side: Option<&SideInfo>) {
        let Some(info) = side else {
            self.tag(0);
            return;
        };
        self.tag(1);
        self.str(&info.path);
        self.str(&info.kind.to_string());
        self.0.update(info.size.to_le_bytes());
        self.int(info.modified_time);
        self.int(info.created_time);
        self.opt_str(info.fingerprint.as_ref().map(Fingerprint::as_str));
        match info.handle {
            None => self.tag(0),
            Some(h) => {
                self.tag(1);
                self.0.update(h.to_le_bytes());
            }
        }
    }

    fn name(&mut self, entry: &ConflictedNameInfo) {
        self.str(&entry.name);
        self.locator(&entry.locator);
        self.opt_str(entry.fingerprint.as_ref().map(Fingerprint::as_str));
        self.0.update(entry.size.to_le_bytes());
        self.int(entry.modified_time);
        self.int(entry.created_time);
        self.tag(u8::from(entry.is_file));
        self.tag(entry.solved as u8);
        self.opt_str(entry.rename_to.as_deref());
        self.len(entry.children.len());
        for child in &entry.children {
            self.str(&child.name);
            self.opt_str(child.fingerprint.as_ref().map(Fingerprint::as_str));
            self.tag(u8::from(child.is_file));
        }
    }
}

// ---------------------------------------------------------------------------
// Footprint
// ---------------------------------------------------------------------------

/// The handles and paths an issue touches.
#[derive(Debug, Clone, Default)]
pub struct Footprint {
    pub handles: BTreeSet<u64>,
    pub paths: BTreeSet<(Side, String)>,
    pub folder_paths: BTreeSet<(Side, String)>,
}

impl Footprint {
    fn add(&mut self, side: Side, locator: &NodeLocator, path: &str, is_folder: bool) {
        if let Some(h) = locator.handle() {
            self.handles.insert(h);
        }
        if path.is_empty() {
            return;
        }
        self.paths.insert((side, path.to_string()));
        if is_folder {
            self.folder_paths.insert((side, path.to_string()));
        }
    }

    /// The same footprint without folder containment: only handle and path
    /// identity remain.
    pub fn nodes_only(mut self) -> Self {
        self.folder_paths.clear();
        self
    }

    pub fn extend(&mut self, other: Footprint) {
        self.handles.extend(other.handles);
        self.paths.extend(other.paths);
        self.folder_paths.extend(other.folder_paths);
    }

    /// True when resolving the owner of `self` also settles `other`: they
    /// share a handle or a path, or `other` lies inside one of our folders.
    pub fn covers(&self, other: &Footprint) -> bool {
        if !self.handles.is_disjoint(&other.handles) {
            return true;
        }
        other.paths.iter().any(|(side, path)| {
            self.paths.contains(&(*side, path.clone()))
                || self
                    .folder_paths
                    .iter()
                    .any(|(s, folder)| s == side && is_same_or_under(path, folder))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn differ_report() -> StallReport {
        StallReport::new(
            StallReason::LocalAndRemoteDiffer(DifferKind::ChangedSinceLastSync),
            Some(SideInfo::file("/home/u/a.txt", 10, 100)),
            Some(SideInfo::file("/a.txt", 12, 120).with_handle(42)),
        )
    }

    #[test]
    fn test_from_report_derives_id_from_handle() {
        let record = IssueRecord::from_report(differ_report()).unwrap();
        assert_eq!(record.id, IssueId::for_handle(42));
        assert_eq!(record.solved, SolvedState::Unsolved);
    }

    #[test]
    fn test_two_sided_reason_requires_both_sides() {
        let mut report = differ_report();
        report.cloud = None;
        let err = IssueRecord::from_report(report).unwrap_err();
        assert!(matches!(err, StallError::InvalidReport { .. }));
    }

    #[test]
    fn test_name_conflict_requires_names() {
        let report = StallReport {
            id: Some(IssueId::new("cloud:/Docs")),
            reason: StallReason::NameConflict,
            local: None,
            cloud: None,
            name_conflict: Some(NameConflictIssue::default()),
        };
        assert!(IssueRecord::from_report(report).is_err());
    }

    #[test]
    fn test_single_side_reason_accepted() {
        let report = StallReport::new(
            StallReason::SymLink,
            Some(SideInfo::file("/home/u/link", 0, 0)),
            None,
        );
        let record = IssueRecord::from_report(report).unwrap();
        assert_eq!(record.id, IssueId::for_path(Side::Local, "/home/u/link"));
    }

    #[test]
    fn test_content_hash_ignores_timestamp_and_grouping() {
        let a = IssueRecord::from_report(differ_report()).unwrap();
        let mut b = a.clone();
        b.reported_at = Utc::now() + chrono::Duration::seconds(5);
        assert_eq!(a.content_hash(), b.content_hash());

        b.cloud.as_mut().unwrap().size = 13;
        assert_ne!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn test_content_hash_tracks_solved_state() {
        let a = IssueRecord::from_report(differ_report()).unwrap();
        let mut b = a.clone();
        b.solved = SolvedState::SolvedByUser;
        assert_ne!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn test_remaining_collisions_counts_unsolved_per_side() {
        let mut names = NameConflictIssue::new(
            vec![ConflictedNameInfo::file("a.txt", NodeLocator::Path("/l/a.txt".into()), "F", 1, 1, 1)],
            vec![
                ConflictedNameInfo::file("a.txt", NodeLocator::Handle(1), "F1", 1, 1, 1),
                ConflictedNameInfo::file("A.txt", NodeLocator::Handle(2), "F2", 1, 1, 1),
            ],
        );
        assert_eq!(names.remaining_collisions(), 1);

        names.mark_name(
            Side::Cloud,
            &NodeLocator::Handle(2),
            NameResolution::Rename,
            Some("a (1).txt".into()),
        );
        assert_eq!(names.remaining_collisions(), 0);
    }

    #[test]
    fn test_footprint_covers_children_of_folder() {
        let parent = IssueRecord::from_report(StallReport::new(
            StallReason::FolderMatchedAgainstFile,
            Some(SideInfo::folder("/home/u/Photos")),
            Some(SideInfo::file("/Photos", 1, 1).with_handle(9)),
        ))
        .unwrap();
        let child = IssueRecord::from_report(StallReport::new(
            StallReason::SymLink,
            Some(SideInfo::file("/home/u/Photos/link", 0, 0)),
            None,
        ))
        .unwrap();
        assert!(parent.footprint().covers(&child.footprint()));
        assert!(!child.footprint().covers(&parent.footprint()));
        assert!(!parent.footprint().nodes_only().covers(&child.footprint()));

        // Only the local folder itself carries containment.
        let cloud_file = parent.node_footprint(Side::Cloud, &NodeLocator::Handle(9));
        assert!(!cloud_file.covers(&child.footprint()));
        let local_folder =
            parent.node_footprint(Side::Local, &NodeLocator::Path("/home/u/Photos".into()));
        assert!(local_folder.covers(&child.footprint()));
        assert!(parent
            .node_footprint(Side::Local, &NodeLocator::Handle(9))
            .handles
            .is_empty());
    }
}
