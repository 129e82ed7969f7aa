//! Structured error handling and exit codes.

use serde::Serialize;

use crate::session::{Recovery, SessionError};

/// Exit codes for the neardupe binary.
///
/// - 0: Success (finished, duplicate groups found)
/// - 1: General error (unexpected failure)
/// - 2: No duplicates (finished, nothing grouped)
/// - 3: Partial success (finished, some files could not be fingerprinted)
/// - 4: Store corruption (session marked failed; rescan from scratch)
/// - 130: Interrupted by user (Ctrl+C paused the session)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExitCode {
    /// Success: Session completed and duplicates were found.
    Success = 0,
    /// General error: An unexpected error occurred.
    GeneralError = 1,
    /// No duplicates: Session completed but no groups were formed.
    NoDuplicates = 2,
    /// Partial success: Session completed with failed files.
    PartialSuccess = 3,
    /// The fingerprint store could not be trusted.
    StoreCorruption = 4,
    /// Interrupted: the session was paused by Ctrl+C.
    Interrupted = 130,
}

impl ExitCode {
    /// Get the numeric exit code.
    #[must_use]
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Get the machine-readable code prefix.
    #[must_use]
    pub fn code_prefix(self) -> &'static str {
        match self {
            Self::Success => "ND000",
            Self::GeneralError => "ND001",
            Self::NoDuplicates => "ND002",
            Self::PartialSuccess => "ND003",
            Self::StoreCorruption => "ND004",
            Self::Interrupted => "ND130",
        }
    }

    /// Exit code for an error returned by the application.
    #[must_use]
    pub fn for_error(err: &anyhow::Error) -> Self {
        match err.downcast_ref::<SessionError>() {
            Some(e) if e.recovery() == Recovery::RescanFromScratch => Self::StoreCorruption,
            _ => Self::GeneralError,
        }
    }
}

/// Structured error information for JSON output.
#[derive(Debug, Serialize)]
pub struct StructuredError {
    /// The error code (e.g., "ND001")
    pub code: String,
    /// The exit code number
    pub exit_code: i32,
    /// Human-readable error message
    pub message: String,
    /// Whether a fresh scan is needed to recover
    pub rescan_required: bool,
}

impl StructuredError {
    /// Create a new structured error from an anyhow error and an exit code.
    #[must_use]
    pub fn new(err: &anyhow::Error, exit_code: ExitCode) -> Self {
        Self {
            code: exit_code.code_prefix().to_string(),
            exit_code: exit_code.as_i32(),
            message: format!("{err:#}"),
            rescan_required: exit_code == ExitCode::StoreCorruption,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionId;

    #[test]
    fn test_code_prefixes_are_unique() {
        let codes = [
            ExitCode::Success,
            ExitCode::GeneralError,
            ExitCode::NoDuplicates,
            ExitCode::PartialSuccess,
            ExitCode::StoreCorruption,
            ExitCode::Interrupted,
        ];
        let mut prefixes: Vec<_> = codes.iter().map(|c| c.code_prefix()).collect();
        prefixes.sort_unstable();
        prefixes.dedup();
        assert_eq!(prefixes.len(), codes.len());
        assert_eq!(ExitCode::Interrupted.as_i32(), 130);
    }

    #[test]
    fn test_corruption_maps_to_its_own_code() {
        let err = anyhow::Error::new(SessionError::StoreCorruption {
            session: SessionId(2),
            detail: "integrity check failed".into(),
        });
        assert_eq!(ExitCode::for_error(&err), ExitCode::StoreCorruption);

        let other = anyhow::Error::new(SessionError::NotFound(SessionId(2)));
        assert_eq!(ExitCode::for_error(&other), ExitCode::GeneralError);
    }

    #[test]
    fn test_structured_error_includes_context() {
        let err = anyhow::Error::new(SessionError::NotFound(SessionId(9))).context("resume failed");
        let structured = StructuredError::new(&err, ExitCode::GeneralError);
        assert_eq!(structured.code, "ND001");
        assert!(structured.message.contains("resume failed"));
        assert!(structured.message.contains("session 9 not found"));
        assert!(!structured.rescan_required);
    }
}
