//! Process exit codes.

use relinkdest_core::RunStatus;

/// Every path was handled without error
pub const SUCCESS: i32 = 0;
/// Traversal finished but some paths failed
pub const PARTIAL_FAILURE: i32 = 1;
/// Bad roots, policy or configuration file; nothing was touched
pub const FATAL_ERROR: i32 = 2;
/// Ctrl+C (128 + SIGINT)
pub const USER_INTERRUPT: i32 = 130;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Success,
    PartialFailure,
    FatalError,
    UserInterrupt,
}

impl ExitCode {
    pub fn code(self) -> i32 {
        match self {
            Self::Success => SUCCESS,
            Self::PartialFailure => PARTIAL_FAILURE,
            Self::FatalError => FATAL_ERROR,
            Self::UserInterrupt => USER_INTERRUPT,
        }
    }

    /// Exit code for a finished run. Lost side output (the CSV log) turns
    /// an otherwise clean run into a partial failure.
    pub fn for_run(status: RunStatus, side_output_failed: bool) -> Self {
        match ExitCode::from(status) {
            ExitCode::Success if side_output_failed => ExitCode::PartialFailure,
            code => code,
        }
    }
}

impl From<RunStatus> for ExitCode {
    fn from(status: RunStatus) -> Self {
        match status {
            RunStatus::Success => ExitCode::Success,
            RunStatus::PartialFailure => ExitCode::PartialFailure,
            RunStatus::Cancelled => ExitCode::UserInterrupt,
        }
    }
}
