//! Error types and recovery classification for batch-search.
//!
//! Every failure is fatal to the in-flight search call. The classification
//! below tells the caller what to do next:
//!
//! | Error                   | Recovery                                 |
//! |-------------------------|------------------------------------------|
//! | NoDeviceFound           | Fall back to the CPU backend             |
//! | BackendUnavailable      | Fall back to the CPU backend             |
//! | KernelSourceUnavailable | Fix configuration (kernel path)          |
//! | ProgramBuildFailed      | Fix configuration (kernel source)        |
//! | BatchTooLarge           | Fix configuration or split the batch     |
//! | DeviceAllocFailed       | Retry the whole call                     |
//! | KernelLaunchFailed      | Retry the whole call                     |
//! | ResultReadFailed        | Retry the whole call                     |
//! | Cancelled               | Discard, not a real error                |

use std::io;
use std::path::PathBuf;

use crate::gpu::backend::BackendKind;

/// Central error type for all batch-search operations.
#[derive(Debug, thiserror::Error)]
pub enum BatchSearchError {
    /// Neither a GPU nor a CPU compute device enumerated.
    #[error("no GPU or CPU compute device found")]
    NoDeviceFound,

    /// The requested backend was compiled out of this build.
    #[error("{backend} backend is not available in this build")]
    BackendUnavailable { backend: BackendKind },

    /// The configured kernel source file is missing or unreadable.
    #[error("kernel source unavailable at {}: {source}", path.display())]
    KernelSourceUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Kernel compilation failed; `log` is the full build diagnostic.
    #[error("kernel program build failed:\n{log}")]
    ProgramBuildFailed { log: String },

    /// A device buffer (or queue/kernel object) could not be created.
    #[error("device allocation failed: {0}")]
    DeviceAllocFailed(String),

    /// The match kernel could not be enqueued or did not complete.
    #[error("kernel launch failed: {0}")]
    KernelLaunchFailed(String),

    /// The result buffer could not be copied back to the host.
    #[error("result read-back failed: {0}")]
    ResultReadFailed(String),

    /// The packed batch does not fit the host or device addressable range.
    #[error("batch of {requested} bytes exceeds the {limit} byte limit")]
    BatchTooLarge { requested: usize, limit: usize },

    /// The caller cancelled the search before dispatch.
    #[error("search cancelled")]
    Cancelled,
}

/// Type alias for Results using BatchSearchError.
pub type Result<T> = std::result::Result<T, BatchSearchError>;

/// Describes how a caller should react to a given error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Configuration problem: retrying with the same inputs fails again.
    FixConfiguration,
    /// Transient device problem: the whole call may be retried.
    RetryCall,
    /// No usable device for this backend: use the CPU pool instead.
    FallbackToCpu,
    /// Silently discard (user cancelled).
    Discard,
}

impl BatchSearchError {
    /// Determine the appropriate recovery action for this error.
    pub fn recovery_action(&self) -> RecoveryAction {
        match self {
            BatchSearchError::NoDeviceFound => RecoveryAction::FallbackToCpu,
            BatchSearchError::BackendUnavailable { .. } => RecoveryAction::FallbackToCpu,
            BatchSearchError::KernelSourceUnavailable { .. } => RecoveryAction::FixConfiguration,
            BatchSearchError::ProgramBuildFailed { .. } => RecoveryAction::FixConfiguration,
            BatchSearchError::BatchTooLarge { .. } => RecoveryAction::FixConfiguration,
            BatchSearchError::DeviceAllocFailed(_) => RecoveryAction::RetryCall,
            BatchSearchError::KernelLaunchFailed(_) => RecoveryAction::RetryCall,
            BatchSearchError::ResultReadFailed(_) => RecoveryAction::RetryCall,
            BatchSearchError::Cancelled => RecoveryAction::Discard,
        }
    }

    /// Whether this error was detected host-side, before any device work.
    pub fn is_host_side(&self) -> bool {
        matches!(
            self,
            BatchSearchError::KernelSourceUnavailable { .. }
                | BatchSearchError::BatchTooLarge { .. }
                | BatchSearchError::BackendUnavailable { .. }
        )
    }

    /// Whether this error should be logged (vs silently handled).
    pub fn should_log(&self) -> bool {
        !matches!(self, BatchSearchError::Cancelled)
    }
}
