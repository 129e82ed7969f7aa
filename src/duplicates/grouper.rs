//! Union-find clustering of one family's fingerprints.
//!
//! # Algorithm
//!
//! 1. Keep records that carry a fingerprint of the requested family and
//!    order them by path, so output never depends on store order.
//! 2. Generate candidate pairs ([`bucket::candidate_pairs`]).
//! 3. Score candidates in parallel; union every pair scoring at or above
//!    the threshold.
//! 4. Every set of two or more becomes a [`DuplicateGroup`]; its
//!    representative is chosen by [`representative_order`] and all members
//!    are rescored against it.
//!
//! Components are never split after clustering. A member linked through a
//! chain may therefore score below the threshold against the
//! representative; its `link_score` (best qualifying edge) is always at or
//! above it. Keeping whole components is what makes raising the threshold
//! unable to give any file a new group-mate.
//!
//! [`representative_order`]: super::groups::representative_order

use rayon::prelude::*;

use super::bucket::{self, BucketConfig};
use super::groups::{representative_order, DuplicateGroup, GroupMember};
use super::similarity::{Comparator, DEFAULT_ALIGN_WINDOW};
use super::union_find::UnionFind;
use crate::fingerprint::Fingerprint;
use crate::scanner::ContentFamily;
use crate::store::FileRecord;

/// Default similarity threshold.
pub const DEFAULT_THRESHOLD: f64 = 0.95;

/// Grouping tunables.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GrouperConfig {
    /// Minimum similarity for two files to be linked, in (0, 1]
    pub threshold: f64,
    /// Frame offset window for video alignment
    pub align_window: usize,
    /// Candidate bucketing
    pub buckets: BucketConfig,
}

impl Default for GrouperConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            align_window: DEFAULT_ALIGN_WINDOW,
            buckets: BucketConfig::default(),
        }
    }
}

impl GrouperConfig {
    /// Same tunables at another threshold.
    #[must_use]
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }
}

/// Clusters fingerprints into duplicate groups.
#[derive(Debug, Clone, Copy)]
pub struct Grouper {
    config: GrouperConfig,
    comparator: Comparator,
}

impl Grouper {
    /// Create a grouper.
    #[must_use]
    pub fn new(config: GrouperConfig) -> Self {
        Self {
            comparator: Comparator::new(config.align_window),
            config,
        }
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &GrouperConfig {
        &self.config
    }

    /// Group the records of `family`.
    ///
    /// Absent records, records without a fingerprint, and records whose
    /// fingerprint belongs to a different family are ignored.
    pub fn group(
        &self,
        family: ContentFamily,
        records: impl IntoIterator<Item = FileRecord>,
    ) -> Vec<DuplicateGroup> {
        let mut entries: Vec<(GroupMember, Fingerprint)> = records
            .into_iter()
            .filter(|record| record.present)
            .filter_map(|record| {
                let fingerprint = record.fingerprint?;
                if fingerprint.family() != family || record.family != family {
                    log::warn!(
                        "Ignoring {} fingerprint of {} while grouping {}",
                        fingerprint.family(),
                        record.identity.path.display(),
                        family
                    );
                    return None;
                }
                let member = GroupMember::new(
                    record.id,
                    record.identity.path,
                    record.identity.size,
                    record.identity.mtime_ns,
                );
                Some((member, fingerprint))
            })
            .collect();
        entries.sort_by(|a, b| a.0.path.cmp(&b.0.path).then(a.0.record.cmp(&b.0.record)));

        let fingerprints: Vec<&Fingerprint> = entries.iter().map(|(_, fp)| fp).collect();
        let candidates = bucket::candidate_pairs(&fingerprints, &self.config.buckets);

        let threshold = self.config.threshold;
        let edges: Vec<(usize, usize, f64)> = candidates
            .par_iter()
            .filter_map(|&(i, j)| {
                let score = self.comparator.similarity(fingerprints[i], fingerprints[j]).ok()?;
                (score >= threshold).then_some((i, j, score))
            })
            .collect();

        let mut sets = UnionFind::new(entries.len());
        let mut link_scores = vec![0.0f64; entries.len()];
        for &(i, j, score) in &edges {
            sets.union(i, j);
            link_scores[i] = link_scores[i].max(score);
            link_scores[j] = link_scores[j].max(score);
        }

        let mut groups: Vec<DuplicateGroup> = sets
            .sets(2)
            .into_iter()
            .map(|component| self.materialize(family, &entries, &link_scores, &component))
            .collect();
        groups.sort_by(|a, b| a.representative().path.cmp(&b.representative().path));

        log::debug!(
            "Grouped {} {} fingerprints: {} candidates, {} links, {} groups",
            entries.len(),
            family,
            candidates.len(),
            edges.len(),
            groups.len()
        );
        groups
    }

    fn materialize(
        &self,
        family: ContentFamily,
        entries: &[(GroupMember, Fingerprint)],
        link_scores: &[f64],
        component: &[usize],
    ) -> DuplicateGroup {
        let rep = component
            .iter()
            .copied()
            .min_by(|&a, &b| representative_order(&entries[a].0, &entries[b].0))
            .unwrap_or(component[0]);
        let rep_fp = &entries[rep].1;

        let members = component
            .iter()
            .map(|&index| {
                let (member, fp) = &entries[index];
                let score = if index == rep {
                    1.0
                } else {
                    self.comparator.similarity(rep_fp, fp).unwrap_or(0.0)
                };
                GroupMember {
                    score,
                    link_score: link_scores[index],
                    ..member.clone()
                }
            })
            .collect();
        DuplicateGroup::new(family, members)
    }
}

impl Default for Grouper {
    fn default() -> Self {
        Self::new(GrouperConfig::default())
    }
}
