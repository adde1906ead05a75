use std::fmt;

use thiserror::Error;

use crate::queue::PostError;

/// Failures surfaced by a dispatcher to the tasks it runs.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum DispatchError {
    /// The target queue refused the work; the task it belonged to is cancelled.
    #[error("dispatcher `{dispatcher}` rejected work")]
    Rejected {
        dispatcher: String,
        #[source]
        source: PostError,
    },

    /// The task was cancelled before it produced a value.
    #[error("task was cancelled before completing")]
    TaskCancelled,
}

/// A continuation was cancelled instead of resumed.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Error)]
#[error("continuation was cancelled")]
pub struct Cancelled;

/// Outcome of [`QueueDispatcher::with_timeout`](crate::QueueDispatcher::with_timeout)
/// when the wrapped future did not finish.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum TimeoutError {
    #[error("deadline of {0} ms elapsed")]
    Elapsed(u64),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// Failures of [`FrameSync::await_next_frame`](crate::FrameSync::await_next_frame).
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum FrameSyncError {
    /// The platform accessor could not provide a frame clock service.
    #[error("frame clock service unavailable: {0}")]
    ClockUnavailable(String),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// The frame clock stopped, typically because its looper quit, before
    /// the awaited tick.
    #[error("frame clock stopped before the next tick")]
    ClockStopped,

    #[error("frame wait was cancelled")]
    Cancelled,
}

/// No main dispatcher could be registered.
///
/// Carries the last factory failure and that factory's diagnostic hint.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct MissingMainDispatcher {
    pub cause: Option<String>,
    pub hint: Option<String>,
}

impl fmt::Display for MissingMainDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("main dispatcher is missing")?;
        if let Some(cause) = &self.cause {
            write!(f, ": {cause}")?;
        }
        if let Some(hint) = &self.hint {
            write!(f, " ({hint})")?;
        }
        Ok(())
    }
}

impl std::error::Error for MissingMainDispatcher {}
