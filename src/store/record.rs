//! File record definitions.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use super::StoreError;
use crate::fingerprint::{ErrorKind, ExtractionError, Fingerprint};
use crate::scanner::{ContentFamily, FileIdentity};
use crate::session::SessionId;

/// Store-assigned identity of a file record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub i64);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Extraction status of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    /// Waiting for a worker
    Pending,
    /// Claimed by a worker
    InProgress,
    /// Fingerprint stored
    Done,
    /// Extraction failed; see the record's error
    Failed,
}

impl RecordStatus {
    /// Stable name used in the store.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    /// Inverse of [`RecordStatus::as_str`].
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "pending" => Self::Pending,
            "in_progress" => Self::InProgress,
            "done" => Self::Done,
            "failed" => Self::Failed,
            _ => return None,
        })
    }
}

/// Error retained on a failed record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordError {
    /// Error category
    pub kind: ErrorKind,
    /// Human-readable detail
    pub detail: String,
}

impl From<&ExtractionError> for RecordError {
    fn from(error: &ExtractionError) -> Self {
        Self {
            kind: error.kind(),
            detail: error.detail(),
        }
    }
}

/// A file discovered by a session, with its extraction result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Record id
    pub id: RecordId,
    /// Owning session
    pub session: SessionId,
    /// Path, size and modification time at enumeration
    pub identity: FileIdentity,
    /// Family inferred from the extension
    pub family: ContentFamily,
    /// Extraction status
    pub status: RecordStatus,
    /// Fingerprint when `status` is `Done`
    pub fingerprint: Option<Fingerprint>,
    /// Error when `status` is `Failed`
    pub error: Option<RecordError>,
    /// Seen by the latest enumeration and not deleted since
    pub present: bool,
}

/// What enumeration did with one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enumerated {
    /// New pending record
    Inserted,
    /// Known record with the same size and mtime; left untouched
    Unchanged,
    /// Known record whose size or mtime changed; reset to pending
    Invalidated,
    /// New or changed record satisfied by a finished fingerprint of the
    /// same identity from another session
    Reused,
}

/// Fingerprint encoded for storage: JSON plus its SHA-256.
pub(crate) struct EncodedFingerprint {
    pub json: String,
    pub checksum: String,
}

pub(crate) fn checksum(json: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub(crate) fn encode_fingerprint(fingerprint: &Fingerprint) -> Result<EncodedFingerprint, StoreError> {
    let json = serde_json::to_string(fingerprint)
        .map_err(|e| StoreError::Corrupt(format!("cannot serialize fingerprint: {e}")))?;
    let checksum = checksum(&json);
    Ok(EncodedFingerprint { json, checksum })
}

/// Row as read from `file_record`, before validation.
pub(crate) struct RawRecord {
    pub id: i64,
    pub session: i64,
    pub path: String,
    pub size: i64,
    pub mtime_ns: i64,
    pub family: String,
    pub status: String,
    pub fingerprint: Option<String>,
    pub checksum: Option<String>,
    pub error_kind: Option<String>,
    pub error_detail: Option<String>,
    pub present: bool,
}

/// Column list matching [`RawRecord::from_row`].
pub(crate) const RECORD_COLUMNS: &str = "id, session_id, path, size, mtime_ns, family, status, \
     fingerprint, checksum, error_kind, error_detail, present";

impl RawRecord {
    pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            session: row.get(1)?,
            path: row.get(2)?,
            size: row.get(3)?,
            mtime_ns: row.get(4)?,
            family: row.get(5)?,
            status: row.get(6)?,
            fingerprint: row.get(7)?,
            checksum: row.get(8)?,
            error_kind: row.get(9)?,
            error_detail: row.get(10)?,
            present: row.get(11)?,
        })
    }

    /// Validate the row, verifying the fingerprint checksum.
    pub fn decode(self) -> Result<FileRecord, StoreError> {
        let corrupt = |what: &str| StoreError::Corrupt(format!("record {}: {what}", self.id));

        let family = self
            .family
            .parse::<ContentFamily>()
            .map_err(|_| corrupt(&format!("unknown family '{}'", self.family)))?;
        let status = RecordStatus::parse(&self.status)
            .ok_or_else(|| corrupt(&format!("unknown status '{}'", self.status)))?;
        let size = u64::try_from(self.size).map_err(|_| corrupt("negative size"))?;

        let fingerprint = match (&self.fingerprint, &self.checksum) {
            (Some(json), Some(sum)) => {
                if checksum(json) != *sum {
                    return Err(corrupt("fingerprint checksum mismatch"));
                }
                let fingerprint: Fingerprint = serde_json::from_str(json)
                    .map_err(|e| corrupt(&format!("unreadable fingerprint: {e}")))?;
                Some(fingerprint)
            }
            (None, None) => None,
            _ => return Err(corrupt("fingerprint without checksum")),
        };
        if status == RecordStatus::Done && fingerprint.is_none() {
            return Err(corrupt("done without a fingerprint"));
        }

        let error = match self.error_kind.as_deref() {
            Some(kind) => Some(RecordError {
                kind: ErrorKind::parse(kind)
                    .ok_or_else(|| corrupt(&format!("unknown error kind '{kind}'")))?,
                detail: self.error_detail.clone().unwrap_or_default(),
            }),
            None => None,
        };

        Ok(FileRecord {
            id: RecordId(self.id),
            session: SessionId(self.session),
            identity: FileIdentity::new(self.path, size, self.mtime_ns),
            family,
            status,
            fingerprint,
            error,
            present: self.present,
        })
    }
}
