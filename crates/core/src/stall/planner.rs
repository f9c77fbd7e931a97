//! Resolution planning.
//!
//! [`Planner::plan`] turns a legal action request for one issue into an
//! ordered [`Plan`] of primitive operations. Planning is pure: it works on a
//! private copy of the issue and never touches the registry. The transfer
//! engine executes the operations; this module only decides them.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::classifier::{ActionSet, Classifier, ResolutionAction};
use super::issue::{FolderEntry, Footprint, IssueRecord, NameConflictIssue, NameResolution};
use crate::errors::StallError;
use crate::models::{IssueId, NodeLocator, Side, SideInfo};

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

/// Which member of a duplicate group survives `RemoveDuplicated`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicateSurvivor {
    /// Keep the earliest-created member.
    #[default]
    Oldest,
    /// Keep the latest-created member.
    Newest,
}

impl std::fmt::Display for DuplicateSurvivor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Oldest => write!(f, "oldest"),
            Self::Newest => write!(f, "newest"),
        }
    }
}

/// Tunables that shape a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanParams {
    pub survivor: DuplicateSurvivor,
    /// Largest numeric suffix tried before giving up.
    pub max_rename_suffix: u32,
}

impl Default for PlanParams {
    fn default() -> Self {
        Self {
            survivor: DuplicateSurvivor::Oldest,
            max_rename_suffix: 9999,
        }
    }
}

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

/// What happens to one child of a folder merged into another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ChildDisposition {
    /// Identical content already exists in the target.
    Skip,
    /// Moved as-is.
    Move,
    /// Moved under a suffixed name to avoid a clash.
    MoveRenamed { to: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildMerge {
    pub name: String,
    pub disposition: ChildDisposition,
}

/// One primitive operation handed to the transfer engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PrimitiveOp {
    /// Upload the local file as a new version of the cloud file.
    UploadAsNewVersion { local_path: String, cloud: NodeLocator },
    /// Download the cloud file over the local file.
    DownloadAsNewVersion { cloud: NodeLocator, local_path: String },
    /// Move the losing item to the trash and keep the winner verbatim.
    TrashAndAccept {
        trash_side: Side,
        trash: NodeLocator,
        keep_side: Side,
        keep: NodeLocator,
    },
    /// Download then re-upload to recompute the cloud fingerprint.
    RecomputeFingerprint { cloud: NodeLocator },
    Remove {
        side: Side,
        target: NodeLocator,
        name: String,
    },
    Rename {
        side: Side,
        target: NodeLocator,
        from: String,
        to: String,
    },
    /// Move the children of `from` into `into`, then drop `from`.
    MergeFolders {
        into_side: Side,
        into: NodeLocator,
        from_side: Side,
        from: NodeLocator,
        children: Vec<ChildMerge>,
    },
}

impl PrimitiveOp {
    /// The item this op consumes: removes, renames, merges away or trashes.
    fn consumed(&self) -> Option<(Side, &NodeLocator)> {
        match self {
            Self::Remove { side, target, .. } | Self::Rename { side, target, .. } => {
                Some((*side, target))
            }
            Self::MergeFolders {
                from_side, from, ..
            } => Some((*from_side, from)),
            Self::TrashAndAccept {
                trash_side, trash, ..
            } => Some((*trash_side, trash)),
            _ => None,
        }
    }

    /// The item this op takes out of the tree for good. A renamed item
    /// stays in place under its new name.
    fn settled(&self) -> Option<(Side, &NodeLocator)> {
        match self {
            Self::Rename { .. } => None,
            _ => self.consumed(),
        }
    }
}

impl std::fmt::Display for PrimitiveOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UploadAsNewVersion { local_path, cloud } => {
                write!(f, "upload {} as new version of {}", local_path, cloud)
            }
            Self::DownloadAsNewVersion { cloud, local_path } => {
                write!(f, "download {} over {}", cloud, local_path)
            }
            Self::TrashAndAccept {
                trash_side,
                trash,
                keep_side,
                keep,
            } => write!(
                f,
                "trash {} {}, keep {} {}",
                trash_side, trash, keep_side, keep
            ),
            Self::RecomputeFingerprint { cloud } => write!(f, "recompute fingerprint of {}", cloud),
            Self::Remove { side, target, name } => {
                write!(f, "remove {} '{}' ({})", side, name, target)
            }
            Self::Rename {
                side,
                target,
                from,
                to,
            } => write!(f, "rename {} '{}' -> '{}' ({})", side, from, to, target),
            Self::MergeFolders {
                into_side,
                into,
                from_side,
                from,
                children,
            } => write!(
                f,
                "merge {} {} into {} {} ({} children)",
                from_side,
                from,
                into_side,
                into,
                children.len()
            ),
        }
    }
}

/// The ordered operations resolving one issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Plan {
    pub issue_id: IssueId,
    pub actions: ActionSet,
    pub ops: Vec<PrimitiveOp>,
}

impl Plan {
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Check that no item is consumed twice and that no merge target is
    /// consumed.
    pub fn validate(&self) -> Result<(), StallError> {
        let mut consumed = BTreeSet::new();
        for op in &self.ops {
            if let Some((side, target)) = op.consumed() {
                if !consumed.insert((side, target.clone())) {
                    return Err(StallError::PlanningConflict {
                        id: self.issue_id.clone(),
                        detail: format!("{} {} is targeted by more than one op", side, target),
                    });
                }
            }
        }
        for op in &self.ops {
            if let PrimitiveOp::MergeFolders {
                into_side, into, ..
            } = op
            {
                if consumed.contains(&(*into_side, into.clone())) {
                    return Err(StallError::PlanningConflict {
                        id: self.issue_id.clone(),
                        detail: format!("merge target {} {} is also consumed", into_side, into),
                    });
                }
            }
        }
        Ok(())
    }

    /// What carrying out this plan settles besides `issue` itself: any node
    /// the issue names, by handle or path, and everything inside the items
    /// the plan removes, merges away or trashes.
    pub fn settled_footprint(&self, issue: &IssueRecord) -> Footprint {
        let mut fp = issue.footprint().nodes_only();
        for (side, locator) in self.ops.iter().filter_map(|op| op.settled()) {
            fp.extend(issue.node_footprint(side, locator));
        }
        fp
    }

    /// Record this plan's per-name outcomes on a name conflict and
    /// recompute its solved state. Returns `true` when nothing collides.
    pub fn record_on(&self, names: &mut NameConflictIssue) -> bool {
        for op in &self.ops {
            match op {
                PrimitiveOp::Remove { side, target, .. } => {
                    names.mark_name(*side, target, NameResolution::Remove, None);
                }
                PrimitiveOp::Rename {
                    side, target, to, ..
                } => {
                    names.mark_name(*side, target, NameResolution::Rename, Some(to.clone()));
                }
                PrimitiveOp::MergeFolders {
                    from_side, from, ..
                } => {
                    names.mark_name(*from_side, from, NameResolution::Remove, None);
                }
                _ => {}
            }
        }
        names.recompute_solved_state()
    }
}

// ---------------------------------------------------------------------------
// Planner
// ---------------------------------------------------------------------------

/// Stateless resolution planner.
pub struct Planner;

impl Planner {
    /// Plan `actions` for `issue`.
    ///
    /// The request must be legal for the issue (see
    /// [`Classifier::check_request`]). Identical input always yields the
    /// identical plan.
    pub fn plan(
        issue: &IssueRecord,
        actions: ActionSet,
        params: &PlanParams,
    ) -> Result<Plan, StallError> {
        Classifier::check_request(issue, actions)?;

        let mut ops = Vec::new();
        let single = if actions.len() == 1 {
            actions.iter().next()
        } else {
            None
        };

        match single {
            Some(ResolutionAction::ChooseLocal) => ops.push(choose_side(issue, Side::Local)?),
            Some(ResolutionAction::ChooseCloud) => ops.push(choose_side(issue, Side::Cloud)?),
            Some(ResolutionAction::Solve) => {
                let (local, cloud) = both_sides(issue)?;
                ops.push(PrimitiveOp::TrashAndAccept {
                    trash_side: Side::Cloud,
                    trash: cloud.locator(),
                    keep_side: Side::Local,
                    keep: local.locator(),
                });
            }
            Some(ResolutionAction::FixFingerprint) => {
                let cloud = issue.cloud.as_ref().ok_or_else(|| StallError::InvalidReport {
                    id: issue.id.clone(),
                    detail: "fingerprint fix needs a cloud side".into(),
                })?;
                ops.push(PrimitiveOp::RecomputeFingerprint {
                    cloud: cloud.locator(),
                });
            }
            _ => {
                let mut names = name_conflict(issue)?.clone();
                names.ensure_grouped();
                plan_names(&mut names, actions, params, &mut ops)?;
            }
        }

        let plan = Plan {
            issue_id: issue.id.clone(),
            actions,
            ops,
        };
        plan.validate()?;

        info!(issue_id = %issue.id, actions = %actions, ops = plan.len(), "resolution planned");
        Ok(plan)
    }
}

fn name_conflict(issue: &IssueRecord) -> Result<&NameConflictIssue, StallError> {
    issue
        .name_conflict
        .as_ref()
        .ok_or_else(|| StallError::InvalidReport {
            id: issue.id.clone(),
            detail: "name conflict payload missing".into(),
        })
}

fn both_sides(issue: &IssueRecord) -> Result<(&SideInfo, &SideInfo), StallError> {
    match (&issue.local, &issue.cloud) {
        (Some(local), Some(cloud)) => Ok((local, cloud)),
        _ => Err(StallError::InvalidReport {
            id: issue.id.clone(),
            detail: "both sides required".into(),
        }),
    }
}

/// Keep `winner`; a file-over-file replacement becomes a new version, any
/// other combination trashes the loser.
fn choose_side(issue: &IssueRecord, winner: Side) -> Result<PrimitiveOp, StallError> {
    let (local, cloud) = both_sides(issue)?;
    if local.is_file() && cloud.is_file() {
        return Ok(match winner {
            Side::Local => PrimitiveOp::UploadAsNewVersion {
                local_path: local.path.clone(),
                cloud: cloud.locator(),
            },
            Side::Cloud => PrimitiveOp::DownloadAsNewVersion {
                cloud: cloud.locator(),
                local_path: local.path.clone(),
            },
        });
    }

    let (keep, trash) = match winner {
        Side::Local => (local, cloud),
        Side::Cloud => (cloud, local),
    };
    debug!(issue_id = %issue.id, %winner, "folder involved, trashing losing side");
    Ok(PrimitiveOp::TrashAndAccept {
        trash_side: winner.other(),
        trash: trash.locator(),
        keep_side: winner,
        keep: keep.locator(),
    })
}

// ---------------------------------------------------------------------------
// Name conflicts
// ---------------------------------------------------------------------------

fn plan_names(
    names: &mut NameConflictIssue,
    actions: ActionSet,
    params: &PlanParams,
    ops: &mut Vec<PrimitiveOp>,
) -> Result<(), StallError> {
    if actions.contains(ResolutionAction::KeepMostRecentlyModified) {
        keep_most_recent(names, ops);
    }
    if actions.contains(ResolutionAction::RemoveDuplicated) {
        remove_duplicates(names, params.survivor, ops);
    }
    if actions.contains(ResolutionAction::MergeFolders) {
        merge_folders(names, params, ops)?;
    }
    // Whatever still collides is renamed, so every plan is complete.
    for side in [Side::Cloud, Side::Local] {
        rename_pass(names, side, params, ops)?;
    }
    Ok(())
}

fn push_remove(names: &mut NameConflictIssue, side: Side, index: usize, ops: &mut Vec<PrimitiveOp>) {
    let entry = &mut names.names_mut(side)[index];
    entry.solved = NameResolution::Remove;
    ops.push(PrimitiveOp::Remove {
        side,
        target: entry.locator.clone(),
        name: entry.name.clone(),
    });
}

fn keep_most_recent(names: &mut NameConflictIssue, ops: &mut Vec<PrimitiveOp>) {
    let survivor = names
        .cloud_names
        .iter()
        .enumerate()
        .filter(|(_, n)| n.is_unsolved())
        .max_by(|(ia, a), (ib, b)| {
            a.modified_time
                .cmp(&b.modified_time)
                .then(a.created_time.cmp(&b.created_time))
                .then(ib.cmp(ia))
        })
        .map(|(i, _)| i);

    let Some(survivor) = survivor else {
        return;
    };
    let losers: Vec<usize> = (0..names.cloud_names.len())
        .filter(|&i| i != survivor && names.cloud_names[i].is_unsolved())
        .collect();
    for i in losers {
        push_remove(names, Side::Cloud, i, ops);
    }
}

fn remove_duplicates(
    names: &mut NameConflictIssue,
    survivor: DuplicateSurvivor,
    ops: &mut Vec<PrimitiveOp>,
) {
    let groups: Vec<Vec<usize>> = names
        .cloud_groups()
        .duplicate_groups()
        .map(|(_, g)| {
            g.members()
                .iter()
                .copied()
                .filter(|&i| names.cloud_names[i].is_unsolved())
                .collect()
        })
        .collect();

    for live in groups {
        if live.len() < 2 {
            continue;
        }
        let keep = match survivor {
            DuplicateSurvivor::Oldest => live[0],
            DuplicateSurvivor::Newest => live[live.len() - 1],
        };
        debug!(group_size = live.len(), keep, "removing duplicates");
        for i in live.into_iter().filter(|&i| i != keep) {
            push_remove(names, Side::Cloud, i, ops);
        }
    }
}

fn merge_folders(
    names: &mut NameConflictIssue,
    params: &PlanParams,
    ops: &mut Vec<PrimitiveOp>,
) -> Result<(), StallError> {
    let folders: Vec<(Side, usize)> = [Side::Cloud, Side::Local]
        .into_iter()
        .flat_map(|side| {
            names
                .names(side)
                .iter()
                .enumerate()
                .filter(|(_, n)| n.is_unsolved() && !n.is_file)
                .map(move |(i, _)| (side, i))
                .collect::<Vec<_>>()
        })
        .collect();

    let Some((&(into_side, into_index), rest)) = folders.split_first() else {
        return Ok(());
    };
    let target = &names.names(into_side)[into_index];
    let into = target.locator.clone();
    let mut merged: Vec<FolderEntry> = target.children.clone();

    for &(from_side, from_index) in rest {
        let source = &names.names(from_side)[from_index];
        let mut children = Vec::with_capacity(source.children.len());

        for child in &source.children {
            let identical = child.is_file
                && child.fingerprint.is_some()
                && merged
                    .iter()
                    .any(|m| m.is_file && m.fingerprint == child.fingerprint);
            if identical {
                children.push(ChildMerge {
                    name: child.name.clone(),
                    disposition: ChildDisposition::Skip,
                });
                continue;
            }

            let clash = merged
                .iter()
                .any(|m| m.name.to_lowercase() == child.name.to_lowercase());
            let disposition = if clash {
                let mut taken: BTreeSet<String> =
                    merged.iter().map(|m| m.name.to_lowercase()).collect();
                let to = next_free_name(&child.name, child.is_file, &mut taken, params)?;
                merged.push(FolderEntry {
                    name: to.clone(),
                    ..child.clone()
                });
                ChildDisposition::MoveRenamed { to }
            } else {
                merged.push(child.clone());
                ChildDisposition::Move
            };
            children.push(ChildMerge {
                name: child.name.clone(),
                disposition,
            });
        }

        ops.push(PrimitiveOp::MergeFolders {
            into_side,
            into: into.clone(),
            from_side,
            from: source.locator.clone(),
            children,
        });
        names.names_mut(from_side)[from_index].solved = NameResolution::Remove;
    }
    Ok(())
}

/// Keep the first unsolved name on `side`; rename every other one.
fn rename_pass(
    names: &mut NameConflictIssue,
    side: Side,
    params: &PlanParams,
    ops: &mut Vec<PrimitiveOp>,
) -> Result<(), StallError> {
    let unsolved: Vec<usize> = names
        .names(side)
        .iter()
        .enumerate()
        .filter(|(_, n)| n.is_unsolved())
        .map(|(i, _)| i)
        .collect();
    if unsolved.len() < 2 {
        return Ok(());
    }

    let mut taken: BTreeSet<String> = names
        .siblings(side)
        .iter()
        .map(|s| s.to_lowercase())
        .chain(names.names(side).iter().flat_map(|n| {
            std::iter::once(n.name.to_lowercase()).chain(n.rename_to.as_deref().map(str::to_lowercase))
        }))
        .collect();

    for &i in &unsolved[1..] {
        let entry = &mut names.names_mut(side)[i];
        let to = next_free_name(&entry.name, entry.is_file, &mut taken, params)?;
        ops.push(PrimitiveOp::Rename {
            side,
            target: entry.locator.clone(),
            from: entry.name.clone(),
            to: to.clone(),
        });
        entry.solved = NameResolution::Rename;
        entry.rename_to = Some(to);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Suffix rule
// ---------------------------------------------------------------------------

fn suffix_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^(.*) \((\d+)\)$").ok())
        .as_ref()
}

/// Split a name into its stem, without any existing ` (n)` suffix, and its
/// extension (files only, including the dot).
fn split_name(name: &str, is_file: bool) -> (&str, &str) {
    let (stem, ext) = match name.rfind('.') {
        Some(dot) if is_file && dot > 0 => name.split_at(dot),
        _ => (name, ""),
    };
    let stem = suffix_pattern()
        .and_then(|re| re.captures(stem))
        .and_then(|c| c.get(1))
        .map_or(stem, |m| m.as_str());
    (stem, ext)
}

/// `<stem> (<n>)<ext>` with the smallest `n >= 1` not in `taken`. The
/// chosen name is added to `taken`.
pub fn next_free_name(
    name: &str,
    is_file: bool,
    taken: &mut BTreeSet<String>,
    params: &PlanParams,
) -> Result<String, StallError> {
    let (stem, ext) = split_name(name, is_file);
    for n in 1..=params.max_rename_suffix {
        let candidate = format!("{} ({}){}", stem, n, ext);
        if taken.insert(candidate.to_lowercase()) {
            return Ok(candidate);
        }
    }
    Err(StallError::SuffixExhausted {
        name: name.to_string(),
        limit: params.max_rename_suffix,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SideInfo;
    use crate::stall::issue::{ConflictedNameInfo, DifferKind, StallReason, StallReport};

    fn differ(local: SideInfo, cloud: SideInfo) -> IssueRecord {
        IssueRecord::from_report(StallReport::new(
            StallReason::LocalAndRemoteDiffer(DifferKind::ChangedSinceLastSync),
            Some(local),
            Some(cloud),
        ))
        .unwrap()
    }

    fn names_issue(local: Vec<ConflictedNameInfo>, cloud: Vec<ConflictedNameInfo>) -> IssueRecord {
        IssueRecord::from_report(StallReport::name_conflict(
            IssueId::new("cloud:/Docs"),
            NameConflictIssue::new(local, cloud),
        ))
        .unwrap()
    }

    fn cloud_file(handle: u64, fp: &str, mtime: i64, ctime: i64) -> ConflictedNameInfo {
        ConflictedNameInfo::file("Report.pdf", NodeLocator::Handle(handle), fp, 10, mtime, ctime)
    }

    fn action(a: ResolutionAction) -> ActionSet {
        ActionSet::single(a)
    }

    #[test]
    fn test_choose_local_file_over_file_uploads() {
        let issue = differ(
            SideInfo::file("/l/a.txt", 1, 1),
            SideInfo::file("/a.txt", 2, 2).with_handle(5),
        );
        let plan = Planner::plan(&issue, action(ResolutionAction::ChooseLocal), &PlanParams::default())
            .unwrap();
        assert_eq!(
            plan.ops,
            vec![PrimitiveOp::UploadAsNewVersion {
                local_path: "/l/a.txt".into(),
                cloud: NodeLocator::Handle(5),
            }]
        );
    }

    #[test]
    fn test_choose_cloud_file_over_file_downloads() {
        let issue = differ(
            SideInfo::file("/l/a.txt", 1, 1),
            SideInfo::file("/a.txt", 2, 2).with_handle(5),
        );
        let plan = Planner::plan(&issue, action(ResolutionAction::ChooseCloud), &PlanParams::default())
            .unwrap();
        assert!(matches!(plan.ops[0], PrimitiveOp::DownloadAsNewVersion { .. }));
    }

    #[test]
    fn test_choose_local_file_replacing_folder_trashes_cloud() {
        let issue = differ(
            SideInfo::file("/l/Photos", 1, 1),
            SideInfo::folder("/Photos").with_handle(8),
        );
        let plan = Planner::plan(&issue, action(ResolutionAction::ChooseLocal), &PlanParams::default())
            .unwrap();
        assert_eq!(
            plan.ops,
            vec![PrimitiveOp::TrashAndAccept {
                trash_side: Side::Cloud,
                trash: NodeLocator::Handle(8),
                keep_side: Side::Local,
                keep: NodeLocator::Path("/l/Photos".into()),
            }]
        );
    }

    #[test]
    fn test_settled_footprint_follows_trashed_side() {
        let issue = differ(
            SideInfo::folder("/l/Photos"),
            SideInfo::file("/Photos", 1, 1).with_handle(8),
        );
        let inside = IssueRecord::from_report(StallReport::new(
            StallReason::SymLink,
            Some(SideInfo::file("/l/Photos/link", 0, 0)),
            None,
        ))
        .unwrap()
        .footprint();

        // Keeping the local folder settles nothing inside it.
        let keep = Planner::plan(&issue, action(ResolutionAction::ChooseLocal), &PlanParams::default())
            .unwrap();
        assert!(!keep.settled_footprint(&issue).covers(&inside));

        let trash = Planner::plan(&issue, action(ResolutionAction::ChooseCloud), &PlanParams::default())
            .unwrap();
        let settled = trash.settled_footprint(&issue);
        assert!(settled.covers(&inside));
        assert!(settled.handles.contains(&8));
    }

    #[test]
    fn test_choose_cloud_folder_vs_folder_trashes_local() {
        let issue = differ(SideInfo::folder("/l/Photos"), SideInfo::folder("/Photos").with_handle(8));
        let plan = Planner::plan(&issue, action(ResolutionAction::ChooseCloud), &PlanParams::default())
            .unwrap();
        assert!(matches!(
            plan.ops[0],
            PrimitiveOp::TrashAndAccept {
                trash_side: Side::Local,
                keep_side: Side::Cloud,
                ..
            }
        ));
    }

    #[test]
    fn test_illegal_action_rejected_before_planning() {
        let issue = differ(SideInfo::file("/l/a", 1, 1), SideInfo::file("/a", 1, 1));
        let err = Planner::plan(&issue, action(ResolutionAction::Rename), &PlanParams::default())
            .unwrap_err();
        assert!(matches!(err, StallError::IllegalAction { .. }));
    }

    #[test]
    fn test_remove_duplicated_oldest_survivor() {
        let issue = names_issue(
            vec![],
            vec![
                cloud_file(1, "F1", 100, 30),
                cloud_file(2, "F1", 100, 10),
                cloud_file(3, "F1", 100, 20),
            ],
        );
        let plan = Planner::plan(
            &issue,
            action(ResolutionAction::RemoveDuplicated),
            &PlanParams::default(),
        )
        .unwrap();
        let removed: Vec<&NodeLocator> = plan
            .ops
            .iter()
            .filter_map(|op| match op {
                PrimitiveOp::Remove { target, .. } => Some(target),
                _ => None,
            })
            .collect();
        // Creation order is 2, 3, 1; the oldest (2) survives.
        assert_eq!(removed, vec![&NodeLocator::Handle(3), &NodeLocator::Handle(1)]);
        assert_eq!(plan.len(), 2);
    }

    #[test]
    fn test_remove_duplicated_newest_survivor() {
        let issue = names_issue(
            vec![],
            vec![
                cloud_file(1, "F1", 100, 30),
                cloud_file(2, "F1", 100, 10),
                cloud_file(3, "F1", 100, 20),
            ],
        );
        let params = PlanParams {
            survivor: DuplicateSurvivor::Newest,
            ..PlanParams::default()
        };
        let plan =
            Planner::plan(&issue, action(ResolutionAction::RemoveDuplicated), &params).unwrap();
        let removed: Vec<&NodeLocator> = plan
            .ops
            .iter()
            .filter_map(|op| match op {
                PrimitiveOp::Remove { target, .. } => Some(target),
                _ => None,
            })
            .collect();
        assert_eq!(removed, vec![&NodeLocator::Handle(2), &NodeLocator::Handle(3)]);
    }

    #[test]
    fn test_remove_duplicated_renames_distinct_leftovers() {
        let issue = names_issue(
            vec![],
            vec![
                cloud_file(1, "F1", 100, 1),
                cloud_file(2, "F1", 100, 2),
                cloud_file(3, "F2", 200, 3),
            ],
        );
        let plan = Planner::plan(
            &issue,
            action(ResolutionAction::RemoveDuplicated),
            &PlanParams::default(),
        )
        .unwrap();
        assert_eq!(
            plan.ops,
            vec![
                PrimitiveOp::Remove {
                    side: Side::Cloud,
                    target: NodeLocator::Handle(2),
                    name: "Report.pdf".into(),
                },
                PrimitiveOp::Rename {
                    side: Side::Cloud,
                    target: NodeLocator::Handle(3),
                    from: "Report.pdf".into(),
                    to: "Report (1).pdf".into(),
                },
            ]
        );
    }

    #[test]
    fn test_rename_skips_taken_suffixes() {
        let mut names = NameConflictIssue::new(
            vec![],
            vec![cloud_file(1, "F1", 1, 1), cloud_file(2, "F2", 2, 2), cloud_file(3, "F3", 3, 3)],
        );
        names.cloud_siblings = vec!["Report (1).pdf".into(), "report (3).PDF".into()];
        let issue = IssueRecord::from_report(StallReport::name_conflict(IssueId::new("x"), names))
            .unwrap();

        let plan =
            Planner::plan(&issue, action(ResolutionAction::Rename), &PlanParams::default()).unwrap();
        let targets: Vec<&str> = plan
            .ops
            .iter()
            .filter_map(|op| match op {
                PrimitiveOp::Rename { to, .. } => Some(to.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(targets, vec!["Report (2).pdf", "Report (4).pdf"]);
    }

    #[test]
    fn test_rename_strips_existing_suffix_and_keeps_folder_dots() {
        assert_eq!(split_name("Report (7).pdf", true), ("Report", ".pdf"));
        assert_eq!(split_name("v1.2", false), ("v1.2", ""));
        assert_eq!(split_name(".bashrc", true), (".bashrc", ""));
    }

    #[test]
    fn test_suffix_exhausted() {
        let mut taken: BTreeSet<String> = ["a (1)".to_string(), "a (2)".to_string()].into();
        let params = PlanParams {
            max_rename_suffix: 2,
            ..PlanParams::default()
        };
        let err = next_free_name("a", false, &mut taken, &params).unwrap_err();
        assert!(matches!(err, StallError::SuffixExhausted { limit: 2, .. }));
    }

    #[test]
    fn test_keep_most_recently_modified() {
        let issue = names_issue(
            vec![
                ConflictedNameInfo::file("Report.pdf", NodeLocator::Path("/l/Report.pdf".into()), "L1", 1, 1, 1),
                ConflictedNameInfo::file("report.pdf", NodeLocator::Path("/l/report.pdf".into()), "L2", 1, 1, 1),
            ],
            vec![
                cloud_file(1, "F1", 100, 5),
                cloud_file(2, "F2", 300, 5),
                cloud_file(3, "F3", 300, 9),
            ],
        );
        let plan = Planner::plan(
            &issue,
            action(ResolutionAction::KeepMostRecentlyModified),
            &PlanParams::default(),
        )
        .unwrap();
        // Handle 3 wins the mtime tie on creation time.
        assert_eq!(
            plan.ops[..2],
            [
                PrimitiveOp::Remove {
                    side: Side::Cloud,
                    target: NodeLocator::Handle(1),
                    name: "Report.pdf".into(),
                },
                PrimitiveOp::Remove {
                    side: Side::Cloud,
                    target: NodeLocator::Handle(2),
                    name: "Report.pdf".into(),
                },
            ]
        );
        assert!(matches!(
            &plan.ops[2],
            PrimitiveOp::Rename { side: Side::Local, to, .. } if to == "report (1).pdf"
        ));
        assert_eq!(plan.len(), 3);
    }

    #[test]
    fn test_merge_folders_child_dispositions() {
        let target = ConflictedNameInfo::folder(
            "Photos",
            NodeLocator::Handle(1),
            vec![
                FolderEntry {
                    name: "a.jpg".into(),
                    fingerprint: Some(crate::models::Fingerprint::new("A")),
                    is_file: true,
                },
                FolderEntry {
                    name: "b.jpg".into(),
                    fingerprint: Some(crate::models::Fingerprint::new("B")),
                    is_file: true,
                },
            ],
        );
        let source = ConflictedNameInfo::folder(
            "Photos",
            NodeLocator::Path("/l/Photos".into()),
            vec![
                FolderEntry {
                    name: "copy-of-a.jpg".into(),
                    fingerprint: Some(crate::models::Fingerprint::new("A")),
                    is_file: true,
                },
                FolderEntry {
                    name: "b.jpg".into(),
                    fingerprint: Some(crate::models::Fingerprint::new("B2")),
                    is_file: true,
                },
                FolderEntry {
                    name: "c.jpg".into(),
                    fingerprint: Some(crate::models::Fingerprint::new("C")),
                    is_file: true,
                },
            ],
        );
        let issue = names_issue(vec![source], vec![target]);
        let plan = Planner::plan(
            &issue,
            action(ResolutionAction::MergeFolders),
            &PlanParams::default(),
        )
        .unwrap();

        assert_eq!(plan.len(), 1);
        let PrimitiveOp::MergeFolders {
            into_side,
            from_side,
            children,
            ..
        } = &plan.ops[0]
        else {
            panic!("expected a merge op, got {:?}", plan.ops[0]);
        };
        assert_eq!((*into_side, *from_side), (Side::Cloud, Side::Local));
        assert_eq!(children[0].disposition, ChildDisposition::Skip);
        assert_eq!(
            children[1].disposition,
            ChildDisposition::MoveRenamed {
                to: "b (1).jpg".into()
            }
        );
        assert_eq!(children[2].disposition, ChildDisposition::Move);
    }

    #[test]
    fn test_validate_catches_double_consumption() {
        let plan = Plan {
            issue_id: IssueId::new("x"),
            actions: action(ResolutionAction::Rename),
            ops: vec![
                PrimitiveOp::Remove {
                    side: Side::Cloud,
                    target: NodeLocator::Handle(1),
                    name: "a".into(),
                },
                PrimitiveOp::Rename {
                    side: Side::Cloud,
                    target: NodeLocator::Handle(1),
                    from: "a".into(),
                    to: "a (1)".into(),
                },
            ],
        };
        let err = plan.validate().unwrap_err();
        assert_eq!(err.kind(), crate::errors::ErrorKind::PlanningConflict);
    }

    #[test]
    fn test_plan_is_deterministic() {
        let issue = names_issue(
            vec![],
            vec![cloud_file(1, "F1", 1, 1), cloud_file(2, "F1", 1, 1), cloud_file(3, "F2", 1, 1)],
        );
        let request = action(ResolutionAction::RemoveDuplicated).with(ResolutionAction::Rename);
        let a = Planner::plan(&issue, request, &PlanParams::default()).unwrap();
        let b = Planner::plan(&issue, request, &PlanParams::default()).unwrap();
        assert_eq!(a, b);
    }
}
