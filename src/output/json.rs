//! JSON output formatter for a session's duplicate groups.
//!
//! # Output Schema
//!
//! ```json
//! {
//!   "session": { "id": 3, "status": "completed", "threshold": 0.9, ... },
//!   "progress": { "discovered": 120, "processed": 120, "errored": 2, ... },
//!   "groups": [
//!     {
//!       "id": 7,
//!       "family": "image",
//!       "representative": "/photos/a.png",
//!       "wasted_space": 20480,
//!       "members": [
//!         { "record": 11, "path": "/photos/a.png", "size": 40960,
//!           "modified": "2024-05-01T10:00:00+00:00", "similarity": 1.0 }
//!       ]
//!     }
//!   ],
//!   "summary": {
//!     "duplicate_groups": 1,
//!     "duplicate_files": 1,
//!     "reclaimable_space": 20480,
//!     "failed_files": 2,
//!     "exit_code": 3,
//!     "exit_code_name": "ND003"
//!   }
//! }
//! ```

use std::io::Write;

use serde::Serialize;

use crate::duplicates::DuplicateGroup;
use crate::error::ExitCode;
use crate::output::csv::format_mtime;
use crate::session::{Progress, ScanSession};

/// A group member in JSON format.
#[derive(Debug, Clone, Serialize)]
pub struct JsonMember {
    /// File record id, as accepted by `neardupe delete`
    pub record: i64,
    /// Path recorded at scan
    pub path: String,
    /// File size in bytes
    pub size: u64,
    /// Modification time recorded at scan (RFC 3339)
    pub modified: String,
    /// Similarity to the representative
    pub similarity: f64,
}

/// A duplicate group in JSON format.
#[derive(Debug, Clone, Serialize)]
pub struct JsonGroup {
    /// Store id, absent for preview groups
    pub id: Option<i64>,
    /// Content family
    pub family: String,
    /// Representative path
    pub representative: String,
    /// Bytes held by non-representative members
    pub wasted_space: u64,
    /// Members, representative first
    pub members: Vec<JsonMember>,
}

impl JsonGroup {
    /// Convert a group.
    #[must_use]
    pub fn from_group(group: &DuplicateGroup) -> Self {
        Self {
            id: group.id.map(|id| id.0),
            family: group.family.to_string(),
            representative: group.representative().path.to_string_lossy().into_owned(),
            wasted_space: group.wasted_space(),
            members: group
                .members
                .iter()
                .map(|m| JsonMember {
                    record: m.record.0,
                    path: m.path.to_string_lossy().into_owned(),
                    size: m.size,
                    modified: format_mtime(m.mtime_ns),
                    similarity: m.score,
                })
                .collect(),
        }
    }
}

/// Summary statistics in JSON format.
#[derive(Debug, Clone, Serialize)]
pub struct JsonSummary {
    /// Number of groups
    pub duplicate_groups: usize,
    /// Members that are not representatives
    pub duplicate_files: usize,
    /// Bytes reclaimable by removing every non-representative member
    pub reclaimable_space: u64,
    /// Files whose fingerprint could not be extracted
    pub failed_files: u64,
    /// The exit code number
    pub exit_code: i32,
    /// The machine-readable exit code name (e.g., "ND000")
    pub exit_code_name: String,
}

/// Complete JSON report of a session.
#[derive(Debug, Clone, Serialize)]
pub struct JsonOutput {
    /// Session parameters and state
    pub session: ScanSession,
    /// Progress counters
    pub progress: Progress,
    /// Duplicate groups of every selected family
    pub groups: Vec<JsonGroup>,
    /// Summary
    pub summary: JsonSummary,
}

impl JsonOutput {
    /// Build the report.
    #[must_use]
    pub fn new(
        session: &ScanSession,
        progress: &Progress,
        groups: &[DuplicateGroup],
        exit_code: ExitCode,
    ) -> Self {
        Self {
            session: session.clone(),
            progress: progress.clone(),
            groups: groups.iter().map(JsonGroup::from_group).collect(),
            summary: JsonSummary {
                duplicate_groups: groups.len(),
                duplicate_files: groups.iter().map(DuplicateGroup::duplicate_count).sum(),
                reclaimable_space: groups.iter().map(DuplicateGroup::wasted_space).sum(),
                failed_files: progress.errored,
                exit_code: exit_code.as_i32(),
                exit_code_name: exit_code.code_prefix().to_string(),
            },
        }
    }

    /// Serialize to compact JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails (unlikely for valid data).
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Serialize to pretty-printed JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails (unlikely for valid data).
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Write JSON to a writer.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails.
    pub fn write_to<W: Write>(&self, writer: &mut W, pretty: bool) -> Result<(), JsonOutputError> {
        let json = if pretty {
            self.to_json_pretty()?
        } else {
            self.to_json()?
        };
        writer.write_all(json.as_bytes())?;
        writer.write_all(b"\n")?;
        Ok(())
    }
}

/// Errors that can occur during JSON output.
#[derive(thiserror::Error, Debug)]
pub enum JsonOutputError {
    /// JSON serialization error
    #[error("JSON serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error during writing
    #[error("I/O error during JSON generation: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::duplicates::{GroupId, GroupMember};
    use crate::scanner::{ContentFamily, RootPath};
    use crate::session::{FamilyProgress, SessionId, SessionStatus};
    use crate::store::RecordId;
    use chrono::Utc;
    use std::path::PathBuf;

    fn session() -> ScanSession {
        ScanSession {
            id: SessionId(3),
            roots: vec![RootPath::new("/photos", true)],
            families: vec![ContentFamily::Image],
            threshold: 0.9,
            status: SessionStatus::Completed,
            enumerated: true,
            error: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn progress(session: &ScanSession) -> Progress {
        Progress::from_counts(
            session,
            vec![FamilyProgress {
                family: Some(ContentFamily::Image),
                pending: 0,
                in_progress: 0,
                done: 3,
                failed: 1,
            }],
            &[],
        )
    }

    fn groups() -> Vec<DuplicateGroup> {
        let mut small = GroupMember::new(RecordId(12), PathBuf::from("/photos/b.png"), 1000, 0);
        small.score = 0.93;
        let mut group = DuplicateGroup::new(
            ContentFamily::Image,
            vec![
                small,
                GroupMember::new(RecordId(11), PathBuf::from("/photos/a.png"), 3000, 0),
            ],
        );
        group.id = Some(GroupId(7));
        vec![group]
    }

    #[test]
    fn test_json_output_empty() {
        let session = session();
        let output = JsonOutput::new(&session, &progress(&session), &[], ExitCode::NoDuplicates);
        assert!(output.groups.is_empty());
        assert_eq!(output.summary.duplicate_groups, 0);
        assert_eq!(output.summary.failed_files, 1);
        assert_eq!(output.summary.exit_code_name, "ND002");
    }

    #[test]
    fn test_json_output_with_groups() {
        let session = session();
        let output = JsonOutput::new(&session, &progress(&session), &groups(), ExitCode::Success);

        assert_eq!(output.groups.len(), 1);
        let group = &output.groups[0];
        assert_eq!(group.id, Some(7));
        assert_eq!(group.representative, "/photos/a.png");
        assert_eq!(group.members[1].record, 12);
        assert_eq!(group.members[1].similarity, 0.93);
        assert_eq!(output.summary.reclaimable_space, 1000);
        assert_eq!(output.summary.duplicate_files, 1);
    }

    #[test]
    fn test_to_json_compact_and_pretty() {
        let session = session();
        let output = JsonOutput::new(&session, &progress(&session), &groups(), ExitCode::Success);
        assert!(!output.to_json().unwrap().contains('\n'));
        assert!(output.to_json_pretty().unwrap().contains('\n'));
    }

    #[test]
    fn test_json_is_parseable() {
        let session = session();
        let output = JsonOutput::new(&session, &progress(&session), &groups(), ExitCode::Success);
        let mut buffer = Vec::new();
        output.write_to(&mut buffer, false).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&buffer).unwrap();
        assert_eq!(value["session"]["status"], "completed");
        assert_eq!(value["groups"][0]["family"], "image");
        assert_eq!(value["summary"]["exit_code"], 0);
    }
}
