//! Safe file deletion using trash crate.
//!
//! # Overview
//!
//! Removing group members is delegated to a [`FileOperations`]
//! implementation so the detection engine itself never touches user files:
//! - [`SystemFileOperations::trash`] moves files to the system trash (default, recoverable)
//! - [`SystemFileOperations::permanent`] removes them for good
//!
//! # Safety
//!
//! The engine verifies every file against the size and mtime recorded at
//! scan time before handing it over, and refuses to delete every member of a
//! group.
//!
//! # Example
//!
//! ```no_run
//! use neardupe::actions::{FileOperations, SystemFileOperations};
//! use std::path::Path;
//!
//! let ops = SystemFileOperations::trash();
//! match ops.delete(Path::new("/path/to/duplicate.jpg")) {
//!     Ok(()) => println!("Moved to trash"),
//!     Err(e) => eprintln!("Failed: {}", e),
//! }
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

use crate::duplicates::GroupMember;
use crate::scanner::FileIdentity;
use crate::store::RecordId;

/// Error type for deletion operations.
#[derive(Debug, Error)]
pub enum DeleteError {
    /// File was not found (may have been deleted or moved).
    #[error("file not found: {0}")]
    NotFound(PathBuf),

    /// Permission denied when attempting to delete.
    #[error("permission denied: {0} - try running with elevated privileges")]
    PermissionDenied(PathBuf),

    /// File was modified since scan (TOCTOU protection).
    #[error("file modified since scan: {0}")]
    Modified(PathBuf),

    /// Trash operation failed.
    #[error("trash operation failed for {path}: {message}")]
    TrashFailed { path: PathBuf, message: String },

    /// Permanent delete operation failed.
    #[error("permanent delete failed for {path}: {message}")]
    PermanentDeleteFailed { path: PathBuf, message: String },

    /// Attempted to delete all copies (at least one must be preserved).
    #[error("cannot delete all copies - at least one file must be preserved")]
    AllCopiesWouldBeDeleted,

    /// General I/O error.
    #[error("I/O error for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl DeleteError {
    /// Get the path associated with this error (if any).
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::NotFound(p)
            | Self::PermissionDenied(p)
            | Self::Modified(p)
            | Self::TrashFailed { path: p, .. }
            | Self::PermanentDeleteFailed { path: p, .. }
            | Self::Io { path: p, .. } => Some(p),
            Self::AllCopiesWouldBeDeleted => None,
        }
    }

    fn from_io(path: &Path, e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::NotFound => Self::NotFound(path.to_path_buf()),
            io::ErrorKind::PermissionDenied => Self::PermissionDenied(path.to_path_buf()),
            _ => Self::Io {
                path: path.to_path_buf(),
                source: e,
            },
        }
    }
}

/// Removes files on behalf of the engine.
pub trait FileOperations: Send + Sync {
    /// Remove one file.
    ///
    /// # Errors
    ///
    /// Any failure leaves the file's record and group membership untouched.
    fn delete(&self, path: &Path) -> Result<(), DeleteError>;

    /// Whether removal bypasses the trash.
    fn is_permanent(&self) -> bool {
        false
    }
}

/// [`FileOperations`] against the real filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemFileOperations {
    permanent: bool,
}

impl SystemFileOperations {
    /// Move files to the system trash.
    #[must_use]
    pub fn trash() -> Self {
        Self { permanent: false }
    }

    /// Delete files permanently.
    #[must_use]
    pub fn permanent() -> Self {
        Self { permanent: true }
    }
}

impl FileOperations for SystemFileOperations {
    fn delete(&self, path: &Path) -> Result<(), DeleteError> {
        if self.permanent {
            permanent_delete(path)
        } else {
            delete_to_trash(path)
        }
    }

    fn is_permanent(&self) -> bool {
        self.permanent
    }
}

/// Delete a single file to the system trash.
///
/// This is the safest deletion method - files can be recovered from trash.
///
/// # Errors
///
/// - `NotFound` if the file doesn't exist
/// - `PermissionDenied` if deletion is not allowed
/// - `TrashFailed` if the trash operation fails
pub fn delete_to_trash(path: &Path) -> Result<(), DeleteError> {
    let size = fs::metadata(path)
        .map_err(|e| DeleteError::from_io(path, e))?
        .len();

    trash::delete(path).map_err(|e| {
        log::error!("Trash operation failed for {}: {}", path.display(), e);
        DeleteError::TrashFailed {
            path: path.to_path_buf(),
            message: e.to_string(),
        }
    })?;

    log::info!("Moved to trash: {} ({} bytes)", path.display(), size);
    Ok(())
}

/// Permanently delete a single file.
///
/// **WARNING**: This operation cannot be undone.
///
/// # Errors
///
/// - `NotFound` if the file doesn't exist
/// - `PermissionDenied` if deletion is not allowed
/// - `PermanentDeleteFailed` if the delete operation fails
pub fn permanent_delete(path: &Path) -> Result<(), DeleteError> {
    let size = fs::metadata(path)
        .map_err(|e| DeleteError::from_io(path, e))?
        .len();

    fs::remove_file(path).map_err(|e| {
        log::error!("Permanent delete failed for {}: {}", path.display(), e);
        DeleteError::PermanentDeleteFailed {
            path: path.to_path_buf(),
            message: e.to_string(),
        }
    })?;

    log::info!("Permanently deleted: {} ({} bytes)", path.display(), size);
    Ok(())
}

/// Check that a member's file still has the size and mtime it was scanned
/// with.
///
/// # Errors
///
/// `Modified` if either changed, `NotFound`/`PermissionDenied`/`Io` if the
/// file cannot be inspected.
pub fn verify_unchanged(member: &GroupMember) -> Result<(), DeleteError> {
    let current =
        FileIdentity::probe(&member.path).map_err(|e| DeleteError::from_io(&member.path, e))?;

    if current.size != member.size {
        log::warn!(
            "File modified since scan: {} (size changed from {} to {})",
            member.path.display(),
            member.size,
            current.size
        );
        return Err(DeleteError::Modified(member.path.clone()));
    }
    if current.mtime_ns != member.mtime_ns {
        log::warn!(
            "File modified since scan: {} (mtime changed)",
            member.path.display()
        );
        return Err(DeleteError::Modified(member.path.clone()));
    }
    Ok(())
}

/// Validate that at least one member of a group survives the deletion.
///
/// # Errors
///
/// `AllCopiesWouldBeDeleted` when `selected` covers every member.
pub fn validate_preserves_copy(selected: &[RecordId], members: &[GroupMember]) -> Result<(), DeleteError> {
    let preserved = members
        .iter()
        .filter(|m| !selected.contains(&m.record))
        .count();

    if preserved == 0 {
        log::error!(
            "Attempted to delete all {} members of a duplicate group",
            members.len()
        );
        Err(DeleteError::AllCopiesWouldBeDeleted)
    } else {
        log::debug!(
            "Deletion validated: {} members selected, {} preserved",
            selected.len(),
            preserved
        );
        Ok(())
    }
}

/// Outcome for one member that was not deleted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemberFailure {
    /// Record id of the member
    pub record: RecordId,
    /// Path, when the member was found in the group
    pub path: Option<PathBuf>,
    /// Why it was left alone
    pub reason: String,
}

/// Results of deleting group members.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeleteReport {
    /// Members whose files were removed
    pub deleted: Vec<RecordId>,
    /// Members left untouched because they are not in the group or changed
    /// on disk since the scan
    pub skipped: Vec<MemberFailure>,
    /// Members the file operations failed on
    pub failed: Vec<MemberFailure>,
    /// Total bytes freed
    pub bytes_freed: u64,
}

impl DeleteReport {
    /// Check if every requested member was deleted.
    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        self.skipped.is_empty() && self.failed.is_empty()
    }

    /// Human-readable summary of the operation.
    #[must_use]
    pub fn summary(&self) -> String {
        let freed = bytesize::ByteSize(self.bytes_freed);
        if self.all_succeeded() {
            format!("Deleted {} file(s), freed {}", self.deleted.len(), freed)
        } else {
            format!(
                "Deleted {} file(s), {} skipped, {} failed, freed {}",
                self.deleted.len(),
                self.skipped.len(),
                self.failed.len(),
                freed
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn create_temp_file(dir: &TempDir, name: &str, content: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = fs::File::create(&path).expect("Failed to create temp file");
        file.write_all(content).expect("Failed to write content");
        path
    }

    fn member_for(path: &Path, record: i64) -> GroupMember {
        let identity = FileIdentity::probe(path).unwrap();
        GroupMember::new(RecordId(record), path.to_path_buf(), identity.size, identity.mtime_ns)
    }

    #[test]
    fn test_delete_error_path() {
        let path = PathBuf::from("/test/path");
        assert_eq!(
            DeleteError::NotFound(path.clone()).path(),
            Some(path.as_path())
        );
        assert_eq!(DeleteError::AllCopiesWouldBeDeleted.path(), None);
    }

    #[test]
    fn test_permanent_delete_removes_file() {
        let dir = TempDir::new().unwrap();
        let path = create_temp_file(&dir, "a.txt", b"content");
        let ops = SystemFileOperations::permanent();
        assert!(ops.is_permanent());
        ops.delete(&path).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_permanent_delete_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = permanent_delete(&dir.path().join("gone.txt")).unwrap_err();
        assert!(matches!(err, DeleteError::NotFound(_)));
    }

    #[test]
    fn test_verify_unchanged_detects_size_change() {
        let dir = TempDir::new().unwrap();
        let path = create_temp_file(&dir, "a.txt", b"content");
        let member = member_for(&path, 1);
        verify_unchanged(&member).unwrap();

        fs::write(&path, b"longer content now").unwrap();
        let err = verify_unchanged(&member).unwrap_err();
        assert!(matches!(err, DeleteError::Modified(_)));
    }

    #[test]
    fn test_verify_unchanged_detects_mtime_change() {
        let dir = TempDir::new().unwrap();
        let path = create_temp_file(&dir, "a.txt", b"content");
        let member = member_for(&path, 1);
        filetime::set_file_mtime(&path, filetime::FileTime::from_unix_time(1_000_000, 0)).unwrap();
        assert!(matches!(
            verify_unchanged(&member),
            Err(DeleteError::Modified(_))
        ));
    }

    #[test]
    fn test_validate_preserves_copy() {
        let members = vec![
            GroupMember::new(RecordId(1), PathBuf::from("/a"), 1, 0),
            GroupMember::new(RecordId(2), PathBuf::from("/b"), 1, 0),
        ];
        assert!(validate_preserves_copy(&[RecordId(2)], &members).is_ok());
        assert!(matches!(
            validate_preserves_copy(&[RecordId(1), RecordId(2)], &members),
            Err(DeleteError::AllCopiesWouldBeDeleted)
        ));
    }

    #[test]
    fn test_report_summary() {
        let mut report = DeleteReport {
            deleted: vec![RecordId(1)],
            bytes_freed: 2048,
            ..DeleteReport::default()
        };
        assert!(report.all_succeeded());
        assert!(report.summary().starts_with("Deleted 1 file(s), freed"));
        report.failed.push(MemberFailure {
            record: RecordId(2),
            path: None,
            reason: "busy".into(),
        });
        assert!(report.summary().contains("1 failed"));
    }
}
