//! Duplicate groups and representative selection.
//!
//! # Overview
//!
//! A [`DuplicateGroup`] holds two or more files of one content family whose
//! fingerprints were linked at or above the session threshold. The first
//! member is always the *representative*: the largest file, ties broken by
//! earliest modification time and then by path. Every member reports its
//! similarity to the representative.
//!
//! # Example
//!
//! ```
//! use neardupe::duplicates::{DuplicateGroup, GroupMember};
//! use neardupe::scanner::ContentFamily;
//! use neardupe::store::RecordId;
//! use std::path::PathBuf;
//!
//! let members = vec![
//!     GroupMember::new(RecordId(1), PathBuf::from("/a.png"), 2048, 10),
//!     GroupMember::new(RecordId(2), PathBuf::from("/b.png"), 1024, 20),
//! ];
//! let group = DuplicateGroup::new(ContentFamily::Image, members);
//!
//! assert_eq!(group.representative().path, PathBuf::from("/a.png"));
//! assert_eq!(group.wasted_space(), 1024);
//! ```

use std::cmp::Ordering;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::scanner::ContentFamily;
use crate::store::RecordId;

/// Store-assigned identity of a persisted group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(pub i64);

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One file inside a duplicate group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupMember {
    /// File record id
    pub record: RecordId,
    /// Absolute path
    pub path: PathBuf,
    /// Size in bytes
    pub size: u64,
    /// Modification time, nanoseconds since the Unix epoch
    pub mtime_ns: i64,
    /// Similarity to the representative
    pub score: f64,
    /// Strongest similarity to any group-mate it was linked with
    pub link_score: f64,
}

impl GroupMember {
    /// A member with perfect scores, to be rescored by the grouper.
    #[must_use]
    pub fn new(record: RecordId, path: PathBuf, size: u64, mtime_ns: i64) -> Self {
        Self {
            record,
            path,
            size,
            mtime_ns,
            score: 1.0,
            link_score: 1.0,
        }
    }
}

/// Representative ordering: largest size first, then earliest mtime, then
/// path.
#[must_use]
pub fn representative_order(a: &GroupMember, b: &GroupMember) -> Ordering {
    b.size
        .cmp(&a.size)
        .then(a.mtime_ns.cmp(&b.mtime_ns))
        .then_with(|| a.path.cmp(&b.path))
}

/// Display ordering for non-representative members: score descending, then
/// path.
fn member_order(a: &GroupMember, b: &GroupMember) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.path.cmp(&b.path))
}

/// A set of near-duplicate files of one family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateGroup {
    /// Store id, `None` until persisted
    pub id: Option<GroupId>,
    /// Content family shared by all members
    pub family: ContentFamily,
    /// Members, representative first
    pub members: Vec<GroupMember>,
}

impl DuplicateGroup {
    /// Build a group, moving the representative to the front and ordering
    /// the rest by score.
    #[must_use]
    pub fn new(family: ContentFamily, mut members: Vec<GroupMember>) -> Self {
        members.sort_by(representative_order);
        if members.len() > 2 {
            members[1..].sort_by(member_order);
        }
        Self {
            id: None,
            family,
            members,
        }
    }

    /// The canonical member.
    ///
    /// # Panics
    ///
    /// Never for groups produced by the grouper or loaded from the store,
    /// which always hold at least two members.
    #[must_use]
    pub fn representative(&self) -> &GroupMember {
        &self.members[0]
    }

    /// Members other than the representative.
    #[must_use]
    pub fn duplicates(&self) -> &[GroupMember] {
        self.members.get(1..).unwrap_or_default()
    }

    /// Number of files in this group.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Check if this group is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Total size of all files in this group.
    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.members.iter().map(|m| m.size).sum()
    }

    /// Space reclaimed by keeping only the representative.
    #[must_use]
    pub fn wasted_space(&self) -> u64 {
        self.duplicates().iter().map(|m| m.size).sum()
    }

    /// Number of duplicate copies (total - 1 representative).
    #[must_use]
    pub fn duplicate_count(&self) -> usize {
        self.members.len().saturating_sub(1)
    }

    /// Lowest member score, the group's effective similarity.
    #[must_use]
    pub fn min_score(&self) -> f64 {
        self.members
            .iter()
            .map(|m| m.score)
            .fold(1.0, f64::min)
    }

    /// Get just the paths of files in this group.
    #[must_use]
    pub fn paths(&self) -> Vec<PathBuf> {
        self.members.iter().map(|m| m.path.clone()).collect()
    }

    /// Look up a member by record id.
    #[must_use]
    pub fn member(&self, record: RecordId) -> Option<&GroupMember> {
        self.members.iter().find(|m| m.record == record)
    }

    /// Whether a path is one of the members.
    #[must_use]
    pub fn contains_path(&self, path: &Path) -> bool {
        self.members.iter().any(|m| m.path == path)
    }
}
