//! Duplicate grouping of cloud-side conflicting names.
//!
//! Two cloud names are duplicates when they share fingerprint, size and
//! modification time. Groups are built by a linear scan in report order, so
//! the result is fully determined by the input sequence.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::issue::ConflictedNameInfo;
use crate::models::Fingerprint;

/// Content identity used to match duplicates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupKey {
    pub fingerprint: Fingerprint,
    pub size: u64,
    pub modified_time: i64,
}

impl GroupKey {
    /// The key of a name, or `None` for entries that never group (folders,
    /// names without a fingerprint).
    pub fn of(entry: &ConflictedNameInfo) -> Option<Self> {
        if !entry.is_file {
            return None;
        }
        entry.fingerprint.as_ref().map(|fp| Self {
            fingerprint: fp.clone(),
            size: entry.size,
            modified_time: entry.modified_time,
        })
    }
}

/// One group of cloud names; members are indices into the cloud name list,
/// ordered by creation time then report order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateGroup {
    key: Option<GroupKey>,
    members: Vec<usize>,
}

impl DuplicateGroup {
    pub fn key(&self) -> Option<&GroupKey> {
        self.key.as_ref()
    }

    pub fn members(&self) -> &[usize] {
        &self.members
    }

    pub fn is_duplicate(&self) -> bool {
        self.members.len() > 1
    }
}

/// Cached grouping of a name conflict's cloud names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudConflictGroups {
    groups: Vec<DuplicateGroup>,
    stale: bool,
}

impl Default for CloudConflictGroups {
    /// An empty, stale grouping.
    fn default() -> Self {
        Self {
            groups: Vec::new(),
            stale: true,
        }
    }
}

impl CloudConflictGroups {
    pub fn groups(&self) -> &[DuplicateGroup] {
        &self.groups
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    /// Groups with more than one member.
    pub fn duplicate_groups(&self) -> impl Iterator<Item = (usize, &DuplicateGroup)> {
        self.groups
            .iter()
            .enumerate()
            .filter(|(_, g)| g.is_duplicate())
    }

    /// Index of the group containing the cloud name at `index`.
    pub fn group_of(&self, index: usize) -> Option<usize> {
        self.groups
            .iter()
            .position(|g| g.members.contains(&index))
    }
}

/// Stateless grouper over cloud names.
pub struct FingerprintGrouper;

impl FingerprintGrouper {
    /// Partition the unsolved cloud names into duplicate groups and set the
    /// `duplicated` / `duplicate_group_id` flags accordingly.
    ///
    /// Names that are already resolved take no part and have their flags
    /// cleared.
    pub fn group(names: &mut [ConflictedNameInfo]) -> CloudConflictGroups {
        for entry in names.iter_mut() {
            entry.duplicated = false;
            entry.duplicate_group_id = None;
        }

        let mut groups: Vec<DuplicateGroup> = Vec::new();

        for index in 0..names.len() {
            if !names[index].is_unsolved() {
                continue;
            }
            let key = GroupKey::of(&names[index]);

            let found = key
                .as_ref()
                .and_then(|k| groups.iter().position(|g| g.key.as_ref() == Some(k)));

            let Some(group_index) = found else {
                groups.push(DuplicateGroup {
                    key,
                    members: vec![index],
                });
                continue;
            };

            let created = names[index].created_time;
            let group = &mut groups[group_index];
            let at = group
                .members
                .partition_point(|&m| names[m].created_time <= created);
            group.members.insert(at, index);

            if group.members.len() == 2 {
                for &m in &group.members {
                    names[m].duplicated = true;
                    names[m].duplicate_group_id = Some(group_index);
                }
            } else {
                names[index].duplicated = true;
                names[index].duplicate_group_id = Some(group_index);
            }
        }

        debug!(
            names = names.len(),
            groups = groups.len(),
            duplicate_groups = groups.iter().filter(|g| g.is_duplicate()).count(),
            "cloud names grouped"
        );

        CloudConflictGroups {
            groups,
            stale: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NodeLocator;
    use crate::stall::issue::NameResolution;

    fn file(handle: u64, fp: &str, size: u64, mtime: i64, ctime: i64) -> ConflictedNameInfo {
        ConflictedNameInfo::file(
            "Report.pdf",
            NodeLocator::Handle(handle),
            fp,
            size,
            mtime,
            ctime,
        )
    }

    #[test]
    fn test_identical_files_grouped() {
        let mut names = vec![file(1, "F1", 10, 100, 50), file(2, "F1", 10, 100, 40)];
        let groups = FingerprintGrouper::group(&mut names);

        assert_eq!(groups.groups().len(), 1);
        // Ordered by creation time.
        assert_eq!(groups.groups()[0].members(), &[1, 0]);
        assert!(names.iter().all(|n| n.duplicated));
        assert!(names.iter().all(|n| n.duplicate_group_id == Some(0)));
        assert!(!groups.is_stale());
    }

    #[test]
    fn test_different_mtime_not_grouped() {
        let mut names = vec![file(1, "F1", 10, 100, 1), file(2, "F1", 10, 101, 1)];
        let groups = FingerprintGrouper::group(&mut names);
        assert_eq!(groups.groups().len(), 2);
        assert!(names.iter().all(|n| !n.duplicated));
    }

    #[test]
    fn test_creation_ties_keep_report_order() {
        let mut names = vec![
            file(1, "F1", 10, 100, 5),
            file(2, "F1", 10, 100, 5),
            file(3, "F1", 10, 100, 1),
        ];
        let groups = FingerprintGrouper::group(&mut names);
        assert_eq!(groups.groups()[0].members(), &[2, 0, 1]);
    }

    #[test]
    fn test_folders_never_group() {
        let mut names = vec![
            ConflictedNameInfo::folder("Photos", NodeLocator::Handle(1), vec![]),
            ConflictedNameInfo::folder("Photos", NodeLocator::Handle(2), vec![]),
        ];
        let groups = FingerprintGrouper::group(&mut names);
        assert_eq!(groups.groups().len(), 2);
        assert_eq!(groups.duplicate_groups().count(), 0);
    }

    #[test]
    fn test_resolved_names_skipped() {
        let mut names = vec![file(1, "F1", 10, 100, 1), file(2, "F1", 10, 100, 2)];
        names[1].solved = NameResolution::Remove;
        names[1].duplicated = true;
        let groups = FingerprintGrouper::group(&mut names);
        assert_eq!(groups.groups().len(), 1);
        assert!(!names[1].duplicated);
        assert_eq!(groups.group_of(0), Some(0));
        assert_eq!(groups.group_of(1), None);
    }

    #[test]
    fn test_default_is_stale() {
        assert!(CloudConflictGroups::default().is_stale());
    }
}
