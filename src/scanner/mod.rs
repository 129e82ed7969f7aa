//! Scanner module for directory traversal and file classification.
//!
//! This module provides functionality for:
//! - Walking scan roots with per-root recursion control
//! - Skipping well-known build/cache directories and gitignore-style patterns
//! - Classifying files into content families by extension
//!
//! # Architecture
//!
//! The scanner is divided into submodules:
//! - [`walker`]: Directory traversal and file discovery
//! - [`family`]: Extension-based [`ContentFamily`] classification
//!
//! # Example
//!
//! ```no_run
//! use neardupe::scanner::{RootPath, Walker, WalkerConfig};
//!
//! let root = RootPath::new("/home/user/Pictures", true);
//! let walker = Walker::new(&root, WalkerConfig::default());
//! for entry in walker.walk() {
//!     match entry {
//!         Ok(file) => println!("{}: {} bytes", file.path.display(), file.size),
//!         Err(e) => eprintln!("Warning: {}", e),
//!     }
//! }
//! ```

pub mod family;
pub mod walker;

use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

pub use family::{ContentFamily, UnknownFamily};
pub use walker::Walker;

/// Directory names skipped during enumeration unless overridden.
pub const DEFAULT_EXCLUDE_DIRS: &[&str] = &[
    "node_modules",
    "__pycache__",
    ".git",
    ".svn",
    "venv",
    "env",
    ".venv",
    "dist",
    "build",
    ".cache",
    ".pytest_cache",
    ".mypy_cache",
];

/// Cheap change-detection key for a file: absolute path, size and
/// modification time. Not a content hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileIdentity {
    /// Absolute path to the file
    pub path: PathBuf,
    /// File size in bytes
    pub size: u64,
    /// Modification time in nanoseconds since the Unix epoch
    pub mtime_ns: i64,
}

impl FileIdentity {
    /// Create a new identity.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, size: u64, mtime_ns: i64) -> Self {
        Self {
            path: path.into(),
            size,
            mtime_ns,
        }
    }

    /// Build an identity from filesystem metadata.
    ///
    /// Platforms that cannot report a modification time get `0`.
    #[must_use]
    pub fn from_metadata(path: &Path, metadata: &Metadata) -> Self {
        let mtime_ns = metadata
            .modified()
            .map(system_time_to_ns)
            .unwrap_or_default();
        Self::new(path, metadata.len(), mtime_ns)
    }

    /// Read the current identity of a path from disk.
    pub fn probe(path: &Path) -> std::io::Result<Self> {
        let metadata = std::fs::metadata(path)?;
        Ok(Self::from_metadata(path, &metadata))
    }

    /// Modification time as a [`SystemTime`].
    #[must_use]
    pub fn modified(&self) -> SystemTime {
        if self.mtime_ns >= 0 {
            UNIX_EPOCH + Duration::from_nanos(self.mtime_ns as u64)
        } else {
            UNIX_EPOCH - Duration::from_nanos(self.mtime_ns.unsigned_abs())
        }
    }
}

/// Convert a [`SystemTime`] to signed nanoseconds since the Unix epoch.
#[must_use]
pub fn system_time_to_ns(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => i64::try_from(d.as_nanos()).unwrap_or(i64::MAX),
        Err(e) => -i64::try_from(e.duration().as_nanos()).unwrap_or(i64::MAX),
    }
}

/// A scan root with its recursion flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootPath {
    /// Directory to scan
    pub path: PathBuf,
    /// Descend into subdirectories
    pub include_subdirs: bool,
}

impl RootPath {
    /// Create a new root.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, include_subdirs: bool) -> Self {
        Self {
            path: path.into(),
            include_subdirs,
        }
    }
}

/// Configuration for directory walking.
#[derive(Debug, Clone)]
pub struct WalkerConfig {
    /// Follow symbolic links during traversal.
    pub follow_symlinks: bool,

    /// Directory names that are never entered.
    pub exclude_dirs: Vec<String>,

    /// Glob patterns to ignore (gitignore-style).
    /// These are applied in addition to a root-level .gitignore file.
    pub ignore_patterns: Vec<String>,
}

impl Default for WalkerConfig {
    fn default() -> Self {
        Self {
            follow_symlinks: false,
            exclude_dirs: DEFAULT_EXCLUDE_DIRS.iter().map(|s| (*s).to_string()).collect(),
            ignore_patterns: Vec::new(),
        }
    }
}

impl WalkerConfig {
    /// Create a new configuration.
    #[must_use]
    pub fn new(follow_symlinks: bool, exclude_dirs: Vec<String>, ignore_patterns: Vec<String>) -> Self {
        Self {
            follow_symlinks,
            exclude_dirs,
            ignore_patterns,
        }
    }
}

/// Errors that can occur during directory scanning.
#[derive(thiserror::Error, Debug)]
pub enum ScanError {
    /// Permission was denied when accessing a file or directory.
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),

    /// The specified path was not found.
    #[error("Path not found: {0}")]
    NotFound(PathBuf),

    /// The specified path is not a directory.
    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),

    /// An I/O error occurred while accessing a file.
    #[error("I/O error for {path}: {source}")]
    Io {
        /// Path where the error occurred
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },
}
