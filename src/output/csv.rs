//! CSV output formatter for duplicate groups.
//!
//! One row is generated for each group member, representative included.
//!
//! # Columns
//!
//! - `group_id`: Store id of the group (1-based position for unsaved groups)
//! - `family`: Content family of the group
//! - `similarity`: Similarity of this member to the representative
//! - `representative`: Path of the group's representative
//! - `path`: Path of this member
//! - `size`: File size in bytes
//! - `modified`: Modification time recorded at scan (RFC 3339)
//!
//! # Example
//!
//! ```
//! use neardupe::duplicates::{DuplicateGroup, GroupMember};
//! use neardupe::output::csv::CsvOutput;
//! use neardupe::scanner::ContentFamily;
//! use neardupe::store::RecordId;
//! use std::path::PathBuf;
//!
//! let group = DuplicateGroup::new(
//!     ContentFamily::Image,
//!     vec![
//!         GroupMember::new(RecordId(1), PathBuf::from("/a.png"), 10, 0),
//!         GroupMember::new(RecordId(2), PathBuf::from("/b.png"), 10, 0),
//!     ],
//! );
//! let csv = CsvOutput::new(&[group]).to_string().unwrap();
//! assert_eq!(csv.lines().count(), 3);
//! ```

use std::io;

use chrono::{TimeZone, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::duplicates::DuplicateGroup;

/// Errors that can occur during CSV output generation.
#[derive(Debug, Error)]
pub enum CsvOutputError {
    /// I/O error during writing.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Error during CSV serialization.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

#[derive(Debug, Serialize)]
struct CsvRow {
    group_id: i64,
    family: &'static str,
    similarity: String,
    representative: String,
    path: String,
    size: u64,
    modified: String,
}

/// CSV output formatter.
pub struct CsvOutput<'a> {
    groups: &'a [DuplicateGroup],
}

impl<'a> CsvOutput<'a> {
    /// Create a new CSV output formatter.
    #[must_use]
    pub fn new(groups: &'a [DuplicateGroup]) -> Self {
        Self { groups }
    }

    /// Write the CSV output to the given writer.
    ///
    /// # Errors
    ///
    /// Returns `CsvOutputError` if writing or serialization fails.
    pub fn write_to<W: io::Write>(&self, writer: W) -> Result<(), CsvOutputError> {
        let mut csv_writer = csv::Writer::from_writer(writer);

        for (idx, group) in self.groups.iter().enumerate() {
            let group_id = group.id.map_or(idx as i64 + 1, |id| id.0);
            let representative = group.representative().path.to_string_lossy().into_owned();

            for member in &group.members {
                csv_writer.serialize(CsvRow {
                    group_id,
                    family: group.family.as_str(),
                    similarity: format!("{:.4}", member.score),
                    representative: representative.clone(),
                    path: member.path.to_string_lossy().into_owned(),
                    size: member.size,
                    modified: format_mtime(member.mtime_ns),
                })?;
            }
        }

        csv_writer.flush()?;
        Ok(())
    }

    /// Generate CSV output as a string.
    ///
    /// # Errors
    ///
    /// Returns `CsvOutputError` if serialization fails.
    pub fn to_string(&self) -> Result<String, CsvOutputError> {
        let mut buffer = Vec::new();
        self.write_to(&mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).to_string())
    }
}

pub(crate) fn format_mtime(mtime_ns: i64) -> String {
    Utc.timestamp_nanos(mtime_ns).to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::duplicates::{GroupId, GroupMember};
    use crate::scanner::ContentFamily;
    use crate::store::RecordId;
    use std::path::PathBuf;

    fn group() -> DuplicateGroup {
        let mut group = DuplicateGroup::new(
            ContentFamily::Document,
            vec![
                GroupMember::new(RecordId(1), PathBuf::from("/docs/report.pdf"), 4096, 0),
                GroupMember::new(RecordId(2), PathBuf::from("/docs/report, copy.pdf"), 2048, 0),
            ],
        );
        group.id = Some(GroupId(42));
        group
    }

    #[test]
    fn test_csv_output_basic() {
        let csv_str = CsvOutput::new(&[group()]).to_string().unwrap();

        let mut lines = csv_str.lines();
        assert_eq!(
            lines.next(),
            Some("group_id,family,similarity,representative,path,size,modified")
        );
        let first = lines.next().unwrap();
        assert!(first.starts_with("42,document,1.0000,/docs/report.pdf,/docs/report.pdf,4096,"));
        assert!(first.ends_with("1970-01-01T00:00:00+00:00"));
        assert_eq!(lines.count(), 1);
    }

    #[test]
    fn test_csv_output_quoting() {
        let csv_str = CsvOutput::new(&[group()]).to_string().unwrap();
        assert!(csv_str.contains("\"/docs/report, copy.pdf\""));
    }

    #[test]
    fn test_unsaved_groups_are_numbered() {
        let mut unsaved = group();
        unsaved.id = None;
        let csv_str = CsvOutput::new(&[unsaved.clone(), unsaved]).to_string().unwrap();
        let ids: Vec<&str> = csv_str
            .lines()
            .skip(1)
            .map(|l| l.split(',').next().unwrap())
            .collect();
        assert_eq!(ids, vec!["1", "1", "2", "2"]);
    }

    #[test]
    fn test_empty_groups_write_nothing() {
        assert!(CsvOutput::new(&[]).to_string().unwrap().is_empty());
    }
}
