//! Data structures for scan sessions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::fingerprint::ErrorKind;
use crate::scanner::{ContentFamily, RootPath};

/// Store-assigned identity of a scan session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub i64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a scan session.
///
/// ```text
/// Created -> Enumerating -> Processing -> Completed
///               |    ^          |  ^
///               v    |          v  |
///               Paused <--------+--+
/// ```
///
/// Any non-terminal state may also move to `Cancelled` or `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Persisted but never started
    Created,
    /// Walking roots and inserting pending records
    Enumerating,
    /// Extracting fingerprints
    Processing,
    /// Stopped dispatching; resumable
    Paused,
    /// Every record is done or failed
    Completed,
    /// Stopped by the user
    Cancelled,
    /// Aborted by a session-level error
    Failed,
}

impl SessionStatus {
    /// Stable name used in the store.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Enumerating => "enumerating",
            Self::Processing => "processing",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }

    /// Inverse of [`SessionStatus::as_str`].
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "created" => Self::Created,
            "enumerating" => Self::Enumerating,
            "processing" => Self::Processing,
            "paused" => Self::Paused,
            "completed" => Self::Completed,
            "cancelled" => Self::Cancelled,
            "failed" => Self::Failed,
            _ => return None,
        })
    }

    /// No further transitions are possible.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }

    /// A worker is (or should be) driving the session.
    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Enumerating | Self::Processing)
    }

    /// Whether moving from `self` to `next` is a legal transition.
    #[must_use]
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        match (self, next) {
            (Created, Enumerating) => true,
            (Enumerating, Processing | Paused) => true,
            (Processing, Paused | Completed) => true,
            (Paused, Enumerating | Processing) => true,
            (from, Cancelled | Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters for a new session, validated by the engine before anything
/// is persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSession {
    /// Roots to walk, in order
    pub roots: Vec<RootPath>,
    /// Families to fingerprint
    pub families: Vec<ContentFamily>,
    /// Similarity threshold in (0, 1]
    pub threshold: f64,
}

impl NewSession {
    /// Bundle creation parameters.
    pub fn new(roots: Vec<RootPath>, families: Vec<ContentFamily>, threshold: f64) -> Self {
        Self {
            roots,
            families,
            threshold,
        }
    }
}

/// A persisted scan session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanSession {
    /// Session id
    pub id: SessionId,
    /// Roots to walk, in order
    pub roots: Vec<RootPath>,
    /// Families to fingerprint, sorted and de-duplicated
    pub families: Vec<ContentFamily>,
    /// Similarity threshold in (0, 1]
    pub threshold: f64,
    /// Current lifecycle state
    pub status: SessionStatus,
    /// Enumeration walked every root to the end
    pub enumerated: bool,
    /// Reason for the last failure, if any
    pub error: Option<String>,
    /// When the session was created
    pub created_at: DateTime<Utc>,
    /// Last status change
    pub updated_at: DateTime<Utc>,
}

impl ScanSession {
    /// Whether `family` was selected for this session.
    #[must_use]
    pub fn includes(&self, family: ContentFamily) -> bool {
        self.families.contains(&family)
    }
}

/// Record counts for one family.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FamilyProgress {
    /// Content family
    pub family: Option<ContentFamily>,
    /// Records awaiting extraction
    pub pending: u64,
    /// Records claimed by a worker
    pub in_progress: u64,
    /// Records with a fingerprint
    pub done: u64,
    /// Records with an extraction error
    pub failed: u64,
}

impl FamilyProgress {
    /// Records discovered for this family.
    #[must_use]
    pub fn discovered(&self) -> u64 {
        self.pending + self.in_progress + self.done + self.failed
    }

    /// Records that reached a final state.
    #[must_use]
    pub fn processed(&self) -> u64 {
        self.done + self.failed
    }

    /// Nothing left to extract.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.pending == 0 && self.in_progress == 0
    }
}

/// Progress counters of a session, derived from the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    /// Session id
    pub session: SessionId,
    /// Current lifecycle state
    pub status: SessionStatus,
    /// Whether enumeration has finished; `discovered` may still grow if not
    pub enumerated: bool,
    /// Records found so far
    pub discovered: u64,
    /// Records that are done or failed
    pub processed: u64,
    /// Records that failed
    pub errored: u64,
    /// Failures with [`ErrorKind::Unreadable`]
    pub unreadable: u64,
    /// Failures with [`ErrorKind::Unsupported`]
    pub unsupported: u64,
    /// Failures with [`ErrorKind::Timeout`]
    pub timed_out: u64,
    /// Per-family breakdown, in family order
    pub families: Vec<FamilyProgress>,
}

impl Progress {
    /// Aggregate per-family counts and per-kind error counts.
    #[must_use]
    pub fn from_counts(
        session: &ScanSession,
        families: Vec<FamilyProgress>,
        errors: &[(ErrorKind, u64)],
    ) -> Self {
        let discovered = families.iter().map(FamilyProgress::discovered).sum();
        let processed = families.iter().map(FamilyProgress::processed).sum();
        let errored = families.iter().map(|f| f.failed).sum();
        let count = |kind: ErrorKind| {
            errors
                .iter()
                .filter(|(k, _)| *k == kind)
                .map(|(_, n)| n)
                .sum()
        };
        Self {
            session: session.id,
            status: session.status,
            enumerated: session.enumerated,
            discovered,
            processed,
            errored,
            unreadable: count(ErrorKind::Unreadable),
            unsupported: count(ErrorKind::Unsupported),
            timed_out: count(ErrorKind::Timeout),
            families,
        }
    }

    /// Counts for one family, zero if nothing was discovered.
    #[must_use]
    pub fn family(&self, family: ContentFamily) -> FamilyProgress {
        self.families
            .iter()
            .find(|f| f.family == Some(family))
            .copied()
            .unwrap_or(FamilyProgress {
                family: Some(family),
                ..FamilyProgress::default()
            })
    }

    /// Fraction processed, `0.0` before anything was discovered.
    #[must_use]
    pub fn fraction(&self) -> f64 {
        if self.discovered == 0 {
            0.0
        } else {
            self.processed as f64 / self.discovered as f64
        }
    }
}
