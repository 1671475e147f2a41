/*!
 * Error Types
 * Synchronizer error taxonomy with thiserror, miette and serde support
 */

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for synchronizer operations
pub type SyncResult<T> = Result<T, SyncError>;

/// Synchronizer errors
///
/// A failed try-acquire is not an error (it returns `false`), and neither is a
/// timeout (timed entry points return `Ok(false)`). Everything here aborts the
/// offending call without mutating lock state.
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum SyncError {
    #[error("Thread interrupted while waiting")]
    #[diagnostic(
        code(sync::interrupted),
        help("Another thread interrupted this one. Retry or abandon the operation.")
    )]
    Interrupted,

    #[error("Illegal monitor state: {0}")]
    #[diagnostic(
        code(sync::illegal_monitor_state),
        help("The calling thread must hold the lock for this operation.")
    )]
    IllegalMonitorState(String),

    #[error("Maximum {0} count exceeded")]
    #[diagnostic(
        code(sync::count_overflow),
        help("The counter would leave the i32 range. Check for unbalanced acquire/release.")
    )]
    CountOverflow(String),

    #[error("Invalid argument: {0}")]
    #[diagnostic(code(sync::invalid_argument))]
    InvalidArgument(String),
}

impl SyncError {
    pub(crate) fn not_owner() -> Self {
        Self::IllegalMonitorState("current thread does not hold the lock".into())
    }

    /// Check if this error is an interruption (the only recoverable variant)
    #[inline]
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted)
    }
}
