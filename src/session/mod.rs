//! Scan sessions and the engine that drives them.
//!
//! A session is the unit of resumable work: a set of roots, the content
//! families to fingerprint, a similarity threshold, and everything the
//! store has learned about the files under those roots.
//!
//! # Architecture
//!
//! * [`data`]: Session identity, lifecycle states and progress counters.
//! * [`engine`]: [`ScanEngine`], the state machine exposed to the CLI.
//!
//! # Errors
//!
//! Per-file failures never surface here; they are recorded on the file's
//! record. [`SessionError`] covers what stops a whole session, and
//! [`SessionError::recovery`] tells the caller whether retrying is safe.

pub mod data;
pub mod engine;

pub use data::{FamilyProgress, NewSession, Progress, ScanSession, SessionId, SessionStatus};
pub use engine::{EngineSettings, ScanEngine};

use crate::actions::DeleteError;
use crate::duplicates::GroupId;
use crate::scanner::ContentFamily;
use crate::store::StoreError;

/// What a caller should do after a [`SessionError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Nothing was lost: correct the input or wait, then retry.
    FixInputAndRetry,
    /// Partial progress may be inconsistent: start a fresh scan.
    RescanFromScratch,
}

/// Session-level errors.
#[derive(thiserror::Error, Debug)]
pub enum SessionError {
    /// Invalid parameters, rejected before any work starts.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// Persisted state could not be trusted; the session is marked failed.
    #[error("session {session} store is corrupt: {detail}")]
    StoreCorruption {
        /// Affected session
        session: SessionId,
        /// What was wrong
        detail: String,
    },

    /// No such session.
    #[error("session {0} not found")]
    NotFound(SessionId),

    /// No such group.
    #[error("group {0} not found")]
    GroupNotFound(GroupId),

    /// The operation is not allowed in the session's current state.
    #[error("cannot {action} session {session} while it is {status}")]
    InvalidTransition {
        /// Affected session
        session: SessionId,
        /// Current state
        status: SessionStatus,
        /// Requested operation
        action: &'static str,
    },

    /// Extraction for the family has not settled yet.
    #[error("{family} fingerprints of session {session} are still being extracted")]
    NotReady {
        /// Affected session
        session: SessionId,
        /// Requested family
        family: ContentFamily,
    },

    /// The store failed for a reason unrelated to corruption.
    #[error(transparent)]
    Store(StoreError),

    /// A deletion request was rejected as a whole.
    #[error(transparent)]
    Delete(DeleteError),

    /// The background worker could not be started.
    #[error("failed to start scan worker: {0}")]
    Worker(String),
}

impl SessionError {
    /// Map a store error, classifying corruption against `session`.
    #[must_use]
    pub fn from_store(session: SessionId, error: StoreError) -> Self {
        if error.is_corruption() {
            Self::StoreCorruption {
                session,
                detail: error.to_string(),
            }
        } else {
            Self::Store(error)
        }
    }

    /// Whether retrying can succeed without discarding progress.
    #[must_use]
    pub fn recovery(&self) -> Recovery {
        match self {
            Self::StoreCorruption { .. } => Recovery::RescanFromScratch,
            Self::Store(e) if e.is_corruption() => Recovery::RescanFromScratch,
            _ => Recovery::FixInputAndRetry,
        }
    }
}

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;
