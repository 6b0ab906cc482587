//! # NativeKit Tasks
//!
//! Task composition for the rendering layer.
//!
//! All native graphics calls belong to one render thread. CPU-bound work
//! (image decode, mip generation) runs on a [`WorkerPool`] and hands its
//! result back through a [`RenderScheduler`], whose jobs are drained by the
//! render thread from a [`RenderQueue`]. Every stage takes the shared
//! [`CancellationToken`]; once the owning [`CancellationSource`] is cancelled,
//! stages short-circuit with [`TaskError::Cancelled`] without running their
//! bodies.
//!
//! ```text
//! worker pool ── run_blocking ──► render queue ── tick() ──► inline callback
//!      decode / flip / mips          texture create            on_success / on_error
//! ```

use thiserror::Error;

pub mod cancel;
pub mod pool;
pub mod render;

pub use cancel::{CancellationSource, CancellationToken};
pub use pool::{run_blocking, WorkerPool};
pub use render::{RenderJob, RenderQueue, RenderScheduler};

/// Typed failure of one pipeline stage.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    #[error("Task cancelled")]
    Cancelled,

    #[error("Task failed: {0}")]
    Failed(String),

    #[error("Task panicked: {0}")]
    Panicked(String),

    #[error("Render thread is gone")]
    RenderThreadGone,
}

impl TaskError {
    /// Wrap any displayable failure.
    pub fn failed(err: impl std::fmt::Display) -> Self {
        Self::Failed(err.to_string())
    }

    /// Whether this outcome came from teardown rather than from the work itself.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TaskError::Cancelled | TaskError::RenderThreadGone)
    }
}

/// Result type for pipeline stages.
pub type TaskResult<T> = Result<T, TaskError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_error_classification() {
        assert!(TaskError::Cancelled.is_cancelled());
        assert!(TaskError::RenderThreadGone.is_cancelled());
        assert!(!TaskError::failed("corrupt png").is_cancelled());
        assert_eq!(
            TaskError::failed("corrupt png").to_string(),
            "Task failed: corrupt png"
        );
    }
}
