//! Directory walker for scan-root enumeration.
//!
//! # Overview
//!
//! [`Walker`] traverses one [`RootPath`] with [`walkdir`], yielding a
//! [`FileIdentity`] for every regular file it finds. Directory entries are
//! sorted by name so repeated walks over an unchanged tree yield the same
//! order.
//!
//! # Features
//!
//! - Per-root recursion control (`include_subdirs`)
//! - Excluded directory names (`node_modules`, `.git`, ...) are never entered
//! - Gitignore-style pattern matching via the `ignore` crate
//! - Optional symlink following (walkdir detects loops)
//! - Graceful shutdown via atomic flag
//!
//! # Example
//!
//! ```no_run
//! use neardupe::scanner::{RootPath, Walker, WalkerConfig};
//!
//! let walker = Walker::new(&RootPath::new(".", false), WalkerConfig::default());
//! let files: Vec<_> = walker.walk().filter_map(Result::ok).collect();
//! println!("Found {} files", files.len());
//! ```

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use walkdir::{DirEntry, WalkDir};

use super::{FileIdentity, RootPath, ScanError, WalkerConfig};

/// Directory walker for a single scan root.
#[derive(Debug)]
pub struct Walker {
    /// Root path to walk
    root: PathBuf,
    /// Descend into subdirectories
    recursive: bool,
    /// Walker configuration
    config: WalkerConfig,
    /// Optional shutdown flag for graceful termination
    shutdown_flag: Option<Arc<AtomicBool>>,
}

impl Walker {
    /// Create a new walker for the given root.
    #[must_use]
    pub fn new(root: &RootPath, config: WalkerConfig) -> Self {
        Self {
            root: root.path.clone(),
            recursive: root.include_subdirs,
            config,
            shutdown_flag: None,
        }
    }

    /// Set the shutdown flag for graceful termination.
    ///
    /// When the flag is set to `true`, the walker stops yielding entries.
    #[must_use]
    pub fn with_shutdown_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown_flag = Some(flag);
        self
    }

    /// Check if shutdown has been requested.
    fn is_shutdown_requested(&self) -> bool {
        self.shutdown_flag
            .as_ref()
            .is_some_and(|f| f.load(Ordering::SeqCst))
    }

    /// Build gitignore matcher from config patterns and a root .gitignore file.
    fn build_gitignore(&self) -> Option<Gitignore> {
        let mut builder = GitignoreBuilder::new(&self.root);

        let gitignore_path = self.root.join(".gitignore");
        if gitignore_path.exists() {
            if let Some(e) = builder.add(&gitignore_path) {
                log::warn!(
                    "Failed to load .gitignore from {}: {}",
                    gitignore_path.display(),
                    e
                );
            } else {
                log::debug!("Loaded .gitignore from {}", gitignore_path.display());
            }
        }

        for pattern in &self.config.ignore_patterns {
            if let Err(e) = builder.add_line(None, pattern) {
                log::warn!("Invalid ignore pattern '{}': {}", pattern, e);
            }
        }

        match builder.build() {
            Ok(gitignore) if gitignore.is_empty() => None,
            Ok(gitignore) => Some(gitignore),
            Err(e) => {
                log::warn!("Failed to build ignore patterns: {}", e);
                None
            }
        }
    }

    /// Check if a path should be ignored based on configured patterns.
    fn should_ignore(&self, path: &Path, is_dir: bool, gitignore: Option<&Gitignore>) -> bool {
        let Some(gi) = gitignore else {
            return false;
        };
        let relative_path = path.strip_prefix(&self.root).unwrap_or(path);
        let path_str = relative_path.to_string_lossy();
        let normalized_path = if cfg!(windows) {
            path_str.replace('\\', "/")
        } else {
            path_str.into_owned()
        };
        gi.matched_path_or_any_parents(normalized_path, is_dir)
            .is_ignore()
    }

    /// Whether the walker may descend into (or yield) this entry.
    fn keep_entry(&self, entry: &DirEntry, gitignore: Option<&Gitignore>) -> bool {
        if entry.depth() == 0 {
            return true;
        }
        let is_dir = entry.file_type().is_dir();
        if is_dir {
            let name = entry.file_name().to_string_lossy();
            if self.config.exclude_dirs.iter().any(|d| d.as_str() == name) {
                log::trace!("Skipping excluded directory: {}", entry.path().display());
                return false;
            }
        }
        if self.should_ignore(entry.path(), is_dir, gitignore) {
            log::trace!("Ignoring: {}", entry.path().display());
            return false;
        }
        true
    }

    /// Validate that the root exists and is a directory.
    pub fn check_root(&self) -> Result<(), ScanError> {
        match std::fs::metadata(&self.root) {
            Ok(m) if m.is_dir() => Ok(()),
            Ok(_) => Err(ScanError::NotADirectory(self.root.clone())),
            Err(e) => Err(self.io_error(&self.root, e)),
        }
    }

    /// Walk the root, yielding file identities.
    ///
    /// Errors are yielded as [`ScanError`] values rather than stopping
    /// iteration. A missing root yields a single error.
    pub fn walk(&self) -> impl Iterator<Item = Result<FileIdentity, ScanError>> + '_ {
        let gitignore = self.build_gitignore();
        let root_error = self.check_root().err();

        let mut walk_dir = WalkDir::new(&self.root)
            .follow_links(self.config.follow_symlinks)
            .sort_by_file_name();
        if !self.recursive {
            walk_dir = walk_dir.max_depth(1);
        }

        let entries = walk_dir
            .into_iter()
            .filter_entry(move |entry| self.keep_entry(entry, gitignore.as_ref()));

        root_error
            .map(Err)
            .into_iter()
            .chain(
                entries
                    .take_while(move |_| {
                        if self.is_shutdown_requested() {
                            log::debug!("Walker: Shutdown requested, stopping iteration");
                            return false;
                        }
                        true
                    })
                    .filter_map(move |entry_result| match entry_result {
                        Ok(entry) => self.process_entry(&entry),
                        Err(e) => {
                            let path = e
                                .path()
                                .map_or_else(|| self.root.clone(), Path::to_path_buf);
                            if e.depth() == 0 {
                                // already reported by check_root
                                return None;
                            }
                            log::warn!("Walker error for {}: {}", path.display(), e);
                            let source = e
                                .into_io_error()
                                .unwrap_or_else(|| std::io::Error::other("filesystem loop"));
                            Some(Err(self.io_error(&path, source)))
                        }
                    }),
            )
    }

    /// Turn a regular-file entry into an identity.
    fn process_entry(&self, entry: &DirEntry) -> Option<Result<FileIdentity, ScanError>> {
        let file_type = entry.file_type();
        if entry.depth() == 0 || file_type.is_dir() {
            return None;
        }
        if file_type.is_symlink() && !self.config.follow_symlinks {
            log::trace!("Skipping symlink: {}", entry.path().display());
            return None;
        }

        let metadata = match entry.metadata() {
            Ok(m) => m,
            Err(e) => {
                let source = e
                    .into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("metadata unavailable"));
                return Some(Err(self.io_error(entry.path(), source)));
            }
        };
        if !metadata.is_file() {
            return None;
        }

        let path = absolute(entry.path());
        Some(Ok(FileIdentity::from_metadata(&path, &metadata)))
    }

    /// Map I/O errors during file access.
    fn io_error(&self, path: &Path, error: std::io::Error) -> ScanError {
        use std::io::ErrorKind;

        match error.kind() {
            ErrorKind::PermissionDenied => {
                log::warn!("Permission denied: {}", path.display());
                ScanError::PermissionDenied(path.to_path_buf())
            }
            ErrorKind::NotFound => {
                log::debug!("Path not found (may have been deleted): {}", path.display());
                ScanError::NotFound(path.to_path_buf())
            }
            _ => {
                log::warn!("I/O error for {}: {}", path.display(), error);
                ScanError::Io {
                    path: path.to_path_buf(),
                    source: error,
                }
            }
        }
    }
}

/// Make a path absolute without resolving symlinks.
fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, File};
    use std::io::Write;
    use tempfile::TempDir;

    /// Create a test directory with some files.
    fn create_test_dir() -> TempDir {
        let dir = TempDir::new().unwrap();

        let mut f = File::create(dir.path().join("file1.txt")).unwrap();
        writeln!(f, "Hello, world!").unwrap();

        let mut f = File::create(dir.path().join("photo.png")).unwrap();
        writeln!(f, "not really a png").unwrap();

        let subdir = dir.path().join("subdir");
        fs::create_dir(&subdir).unwrap();
        let mut f = File::create(subdir.join("nested.txt")).unwrap();
        writeln!(f, "Nested file content").unwrap();

        dir
    }

    fn walk_names(root: &RootPath, config: WalkerConfig) -> Vec<String> {
        Walker::new(root, config)
            .walk()
            .filter_map(Result::ok)
            .map(|f| f.path.file_name().unwrap().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_walker_finds_files_recursively() {
        let dir = create_test_dir();
        let root = RootPath::new(dir.path(), true);
        let files: Vec<_> = Walker::new(&root, WalkerConfig::default())
            .walk()
            .filter_map(Result::ok)
            .collect();

        assert_eq!(files.len(), 3);
        for file in &files {
            assert!(file.path.is_absolute());
            assert!(file.size > 0);
            assert!(file.mtime_ns > 0);
        }
    }

    #[test]
    fn test_walker_respects_include_subdirs() {
        let dir = create_test_dir();
        let names = walk_names(&RootPath::new(dir.path(), false), WalkerConfig::default());
        assert_eq!(names, vec!["file1.txt", "photo.png"]);
    }

    #[test]
    fn test_walker_output_is_sorted() {
        let dir = create_test_dir();
        let root = RootPath::new(dir.path(), true);
        let first = walk_names(&root, WalkerConfig::default());
        let second = walk_names(&root, WalkerConfig::default());
        assert_eq!(first, second);
        assert_eq!(first, vec!["file1.txt", "photo.png", "nested.txt"]);
    }

    #[test]
    fn test_walker_skips_excluded_dirs() {
        let dir = create_test_dir();
        let modules = dir.path().join("node_modules").join("pkg");
        fs::create_dir_all(&modules).unwrap();
        fs::write(modules.join("index.js"), "module.exports = 1;").unwrap();

        let names = walk_names(&RootPath::new(dir.path(), true), WalkerConfig::default());
        assert!(!names.contains(&"index.js".to_string()));

        let config = WalkerConfig::new(false, Vec::new(), Vec::new());
        let names = walk_names(&RootPath::new(dir.path(), true), config);
        assert!(names.contains(&"index.js".to_string()));
    }

    #[test]
    fn test_walker_ignore_patterns() {
        let dir = create_test_dir();
        let config = WalkerConfig {
            ignore_patterns: vec!["*.png".to_string(), "subdir/".to_string()],
            ..WalkerConfig::default()
        };
        let names = walk_names(&RootPath::new(dir.path(), true), config);
        assert_eq!(names, vec!["file1.txt"]);
    }

    #[test]
    fn test_walker_reads_root_gitignore() {
        let dir = create_test_dir();
        fs::write(dir.path().join(".gitignore"), "nested.txt\n").unwrap();
        let names = walk_names(&RootPath::new(dir.path(), true), WalkerConfig::default());
        assert!(!names.contains(&"nested.txt".to_string()));
        assert!(names.contains(&".gitignore".to_string()));
    }

    #[test]
    fn test_walker_shutdown_flag() {
        let dir = create_test_dir();
        let flag = Arc::new(AtomicBool::new(true));
        let walker = Walker::new(&RootPath::new(dir.path(), true), WalkerConfig::default())
            .with_shutdown_flag(flag);
        assert_eq!(walker.walk().count(), 0);
    }

    #[test]
    fn test_walker_handles_nonexistent_path() {
        let root = RootPath::new("/non/existent/path/12345", true);
        let results: Vec<_> = Walker::new(&root, WalkerConfig::default()).walk().collect();
        assert_eq!(results.len(), 1);
        assert!(matches!(results[0], Err(ScanError::NotFound(_))));
    }

    #[test]
    fn test_walker_rejects_file_root() {
        let dir = create_test_dir();
        let root = RootPath::new(dir.path().join("file1.txt"), true);
        let walker = Walker::new(&root, WalkerConfig::default());
        assert!(matches!(
            walker.check_root(),
            Err(ScanError::NotADirectory(_))
        ));
    }
}
