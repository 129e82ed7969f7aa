//! File actions module.
//!
//! Deleting duplicates is the one place the crate writes to user files, and
//! it only happens through the [`FileOperations`] collaborator handed to
//! [`crate::session::ScanEngine::delete_members`]:
//! - Move to system trash (default, recoverable)
//! - Permanent deletion (explicit opt-in)
//! - TOCTOU verification to detect files modified since the scan
//!
//! ```no_run
//! use neardupe::actions::{delete_to_trash, SystemFileOperations};
//! use std::path::Path;
//!
//! delete_to_trash(Path::new("/path/to/duplicate.jpg")).ok();
//! let ops = SystemFileOperations::trash();
//! ```

pub mod delete;

pub use delete::{
    delete_to_trash, permanent_delete, validate_preserves_copy, verify_unchanged, DeleteError,
    DeleteReport, FileOperations, MemberFailure, SystemFileOperations,
};
