//! Command-line interface definitions for neardupe.
//!
//! Global options (verbosity, color, config and database paths) apply to
//! every subcommand.
//!
//! # Example
//!
//! ```bash
//! # Scan two folders for near-duplicate images and documents
//! neardupe scan ~/Pictures ~/Documents --types image,document
//!
//! # Ctrl+C pauses; pick it up later
//! neardupe resume 3
//!
//! # Groups of a session as CSV
//! neardupe export 3 --format csv --output groups.csv
//! ```

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Resumable near-duplicate file finder.
///
/// neardupe fingerprints images, documents, videos, archives and source
/// code, groups files whose fingerprints are similar, and keeps every
/// result in a local database so interrupted scans can be resumed.
#[derive(Debug, Parser)]
#[command(name = "neardupe")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase verbosity level (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true, env = "NO_COLOR")]
    pub no_color: bool,

    /// Report errors as JSON on stderr
    #[arg(long, global = true)]
    pub json_errors: bool,

    /// Plain line-based progress output for screen readers
    #[arg(long, global = true)]
    pub accessible: bool,

    /// Configuration file (defaults to the platform config dir)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Fingerprint database (defaults to the platform data dir)
    #[arg(long, global = true, value_name = "PATH", env = "NEARDUPE_DATABASE")]
    pub database: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Start a new scan session
    Scan(ScanArgs),
    /// Resume a paused or interrupted session
    Resume(SessionArgs),
    /// Scan a finished session's roots again
    Rescan(RescanArgs),
    /// Cancel a session
    Cancel(SessionArgs),
    /// List sessions, or the groups of one session
    List(ListArgs),
    /// Export a session's groups
    Export(ExportArgs),
    /// Delete members of a duplicate group
    Delete(DeleteArgs),
    /// Remove finished sessions and their fingerprints
    ClearCache,
    /// Manage the configuration file
    #[command(subcommand)]
    Config(ConfigCommand),
}

/// Arguments for the scan subcommand.
#[derive(Debug, Args)]
pub struct ScanArgs {
    /// Directories to scan
    #[arg(value_name = "PATH", required = true)]
    pub paths: Vec<PathBuf>,

    /// Content families to fingerprint (image, document, video, archive, code)
    #[arg(short, long = "types", value_name = "FAMILY", value_delimiter = ',')]
    pub types: Vec<String>,

    /// Similarity threshold, as a fraction (0.95) or a percentage (95%)
    #[arg(short = 't', long, value_name = "T", value_parser = parse_threshold)]
    pub threshold: Option<f64>,

    /// Extraction workers (0 = all cores)
    #[arg(short, long, value_name = "N")]
    pub workers: Option<usize>,

    /// Per-file extraction budget in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Do not descend into subdirectories
    #[arg(long)]
    pub no_recursive: bool,

    /// Glob patterns to ignore (can be specified multiple times)
    #[arg(short, long = "ignore", value_name = "PATTERN")]
    pub ignore_patterns: Vec<String>,

    /// Follow symbolic links during scan
    #[arg(long)]
    pub follow_symlinks: bool,

    /// Create the session without starting it
    #[arg(long)]
    pub no_start: bool,
}

/// A session id.
#[derive(Debug, Args)]
pub struct SessionArgs {
    /// Session id
    #[arg(value_name = "ID")]
    pub id: i64,
}

/// Arguments for the rescan subcommand.
#[derive(Debug, Args)]
pub struct RescanArgs {
    /// Session id
    #[arg(value_name = "ID")]
    pub id: i64,

    /// Extract every file again, including unchanged and unsupported ones
    #[arg(long)]
    pub force: bool,
}

/// Arguments for the list subcommand.
#[derive(Debug, Args)]
pub struct ListArgs {
    /// Show the groups of this session instead of the session table
    #[arg(value_name = "ID")]
    pub id: Option<i64>,

    /// Also list files whose extraction failed
    #[arg(long)]
    pub failed: bool,
}

/// Arguments for the export subcommand.
#[derive(Debug, Args)]
pub struct ExportArgs {
    /// Session id
    #[arg(value_name = "ID")]
    pub id: i64,

    /// Output format
    #[arg(short, long, value_enum, default_value = "json")]
    pub format: OutputFormat,

    /// Write to a file instead of stdout
    #[arg(short, long, value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Export the groups available so far, even while the scan runs
    #[arg(long)]
    pub preview: bool,
}

/// Arguments for the delete subcommand.
#[derive(Debug, Args)]
pub struct DeleteArgs {
    /// Group id
    #[arg(value_name = "GROUP_ID")]
    pub group: i64,

    /// Member (file record) ids to delete
    #[arg(value_name = "MEMBER_ID", required = true)]
    pub members: Vec<i64>,

    /// Use permanent deletion instead of moving to trash
    ///
    /// Warning: Files cannot be recovered after permanent deletion.
    #[arg(long)]
    pub permanent: bool,
}

/// Configuration subcommands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Write the effective configuration to the config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print the effective configuration
    Show,
}

/// Export format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// JSON report
    Json,
    /// One CSV row per group member
    Csv,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Csv => write!(f, "csv"),
        }
    }
}

/// Parse a threshold given as a fraction or a percentage.
///
/// # Examples
///
/// ```
/// use neardupe::cli::parse_threshold;
///
/// assert_eq!(parse_threshold("0.9").unwrap(), 0.9);
/// assert_eq!(parse_threshold("95%").unwrap(), 0.95);
/// assert!(parse_threshold("0").is_err());
/// assert!(parse_threshold("120%").is_err());
/// ```
///
/// # Errors
///
/// Returns an error for non-numbers and values outside (0, 1].
pub fn parse_threshold(s: &str) -> Result<f64, String> {
    let s = s.trim();
    let value = match s.strip_suffix('%') {
        Some(pct) => pct
            .trim()
            .parse::<f64>()
            .map(|p| p / 100.0)
            .map_err(|_| format!("invalid percentage: {s}"))?,
        None => s
            .parse::<f64>()
            .map_err(|_| format!("invalid threshold: {s}"))?,
    };
    crate::config::validate_threshold(value).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_scan_command() {
        let cli = Cli::try_parse_from([
            "neardupe",
            "scan",
            "/a",
            "/b",
            "--types",
            "image,video",
            "-t",
            "90%",
            "--workers",
            "3",
        ])
        .unwrap();
        match cli.command {
            Commands::Scan(args) => {
                assert_eq!(args.paths.len(), 2);
                assert_eq!(args.types, vec!["image", "video"]);
                assert_eq!(args.threshold, Some(0.9));
                assert_eq!(args.workers, Some(3));
                assert!(!args.no_recursive);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_scan_requires_paths() {
        assert!(Cli::try_parse_from(["neardupe", "scan"]).is_err());
    }

    #[test]
    fn test_parse_delete_command() {
        let cli = Cli::try_parse_from(["neardupe", "delete", "7", "11", "12", "--permanent"]).unwrap();
        match cli.command {
            Commands::Delete(args) => {
                assert_eq!(args.group, 7);
                assert_eq!(args.members, vec![11, 12]);
                assert!(args.permanent);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_global_database_flag() {
        let cli = Cli::try_parse_from(["neardupe", "list", "--database", "/tmp/x.db"]).unwrap();
        assert_eq!(cli.database, Some(PathBuf::from("/tmp/x.db")));
    }

    #[test]
    fn test_verbose_and_quiet_conflict() {
        assert!(Cli::try_parse_from(["neardupe", "-v", "-q", "list"]).is_err());
    }

    #[test]
    fn test_parse_threshold_rejects_garbage() {
        assert!(parse_threshold("abc").is_err());
        assert!(parse_threshold("1.5").is_err());
        assert_eq!(parse_threshold(" 1 ").unwrap(), 1.0);
    }
}
