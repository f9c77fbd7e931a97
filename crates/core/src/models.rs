//! Domain value types shared by the stall subsystem, the registry and the
//! transfer boundary.
//!
//! Everything here is an owned, copyable snapshot. Nothing refers to live
//! scanner or transfer-engine objects.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Stable identity of a stalled issue, derived from its path or node handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IssueId(String);

impl IssueId {
    /// Wrap an already-derived identity string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Derive the identity of an issue keyed by a path on one side.
    pub fn for_path(side: Side, path: &str) -> Self {
        Self(format!("{}:{}", side, path))
    }

    /// Derive the identity of an issue keyed by a cloud node handle.
    pub fn for_handle(handle: u64) -> Self {
        Self(format!("node:{:016x}", handle))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for IssueId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Sides and nodes
// ---------------------------------------------------------------------------

/// Which replica an item lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Local,
    Cloud,
}

impl Side {
    /// The opposite replica.
    pub fn other(self) -> Self {
        match self {
            Self::Local => Self::Cloud,
            Self::Cloud => Self::Local,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Cloud => write!(f, "cloud"),
        }
    }
}

/// File or folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    File,
    Folder,
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File => write!(f, "file"),
            Self::Folder => write!(f, "folder"),
        }
    }
}

/// Content identity of a file, independent of its name and location.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// How an item is addressed: by cloud node handle or by path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeLocator {
    Handle(u64),
    Path(String),
}

impl NodeLocator {
    pub fn handle(&self) -> Option<u64> {
        match self {
            Self::Handle(h) => Some(*h),
            Self::Path(_) => None,
        }
    }

    pub fn path(&self) -> Option<&str> {
        match self {
            Self::Handle(_) => None,
            Self::Path(p) => Some(p),
        }
    }
}

impl std::fmt::Display for NodeLocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Handle(h) => write!(f, "#{:x}", h),
            Self::Path(p) => f.write_str(p),
        }
    }
}

/// Snapshot of one side of a stalled item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SideInfo {
    /// Full path on this side.
    pub path: String,
    /// File or folder.
    pub kind: NodeKind,
    /// Size in bytes (0 for folders).
    #[serde(default)]
    pub size: u64,
    /// Modification time, seconds since the epoch.
    #[serde(default)]
    pub modified_time: i64,
    /// Creation time, seconds since the epoch.
    #[serde(default)]
    pub created_time: i64,
    /// Content fingerprint, when known.
    #[serde(default)]
    pub fingerprint: Option<Fingerprint>,
    /// Cloud node handle, when this side is (or mirrors) a cloud node.
    #[serde(default)]
    pub handle: Option<u64>,
}

impl SideInfo {
    /// Convenience constructor for a file snapshot.
    pub fn file(path: impl Into<String>, size: u64, modified_time: i64) -> Self {
        Self {
            path: path.into(),
            kind: NodeKind::File,
            size,
            modified_time,
            created_time: modified_time,
            fingerprint: None,
            handle: None,
        }
    }

    /// Convenience constructor for a folder snapshot.
    pub fn folder(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: NodeKind::Folder,
            size: 0,
            modified_time: 0,
            created_time: 0,
            fingerprint: None,
            handle: None,
        }
    }

    pub fn with_handle(mut self, handle: u64) -> Self {
        self.handle = Some(handle);
        self
    }

    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = Some(Fingerprint::new(fingerprint));
        self
    }

    pub fn is_file(&self) -> bool {
        self.kind == NodeKind::File
    }

    /// Handle when known, otherwise the path.
    pub fn locator(&self) -> NodeLocator {
        match self.handle {
            Some(h) => NodeLocator::Handle(h),
            None => NodeLocator::Path(self.path.clone()),
        }
    }
}

// ---------------------------------------------------------------------------
// Solved state
// ---------------------------------------------------------------------------

/// Lifecycle state of an issue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolvedState {
    #[default]
    Unsolved,
    /// The scanner resolved the stall on its own.
    SolvedBySystem,
    /// A user-chosen resolution was submitted.
    SolvedByUser,
    /// Resolving a different issue resolved this one too.
    SolvedByOtherSide,
}

impl SolvedState {
    pub fn is_solved(self) -> bool {
        self != Self::Unsolved
    }
}

impl std::fmt::Display for SolvedState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unsolved => write!(f, "unsolved"),
            Self::SolvedBySystem => write!(f, "solved_by_system"),
            Self::SolvedByUser => write!(f, "solved_by_user"),
            Self::SolvedByOtherSide => write!(f, "solved_by_other_side"),
        }
    }
}

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

/// True when `path` equals `ancestor` or lies beneath it.
pub fn is_same_or_under(path: &str, ancestor: &str) -> bool {
    let ancestor = ancestor.trim_end_matches('/');
    if ancestor.is_empty() {
        return path.starts_with('/');
    }
    path == ancestor
        || path
            .strip_prefix(ancestor)
            .is_some_and(|rest| rest.starts_with('/'))
}
