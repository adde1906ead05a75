use thiserror::Error;

/// Errors reported by the looper layer.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum LooperError {
    /// The queue has been asked to quit; no further work is accepted.
    #[error("looper `{0}` is quitting; work was rejected")]
    Quitting(String),

    /// `Looper::prepare` was called twice on the same thread.
    #[error("a looper is already prepared on this thread")]
    AlreadyPrepared,

    /// `Looper::prepare_main` was called after a main looper was recorded.
    #[error("the main looper has already been prepared")]
    MainAlreadyPrepared,

    /// The calling thread has no looper.
    #[error("no looper is prepared on the current thread")]
    NotPrepared,

    /// The looper thread could not be started or terminated abnormally.
    #[error("looper thread `{name}` failed: {reason}")]
    Thread { name: String, reason: String },
}
