use std::time::Duration;

use thiserror::Error;

use marduk_engine::looper::{Handler, LooperError};

pub use marduk_engine::looper::{MessageId, Work};

/// Failure to enqueue work.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum PostError {
    /// The queue no longer accepts work.
    #[error("queue `{0}` is shut down")]
    Shutdown(String),

    #[error("queue refused work: {0}")]
    Refused(String),
}

impl From<LooperError> for PostError {
    fn from(e: LooperError) -> Self {
        match e {
            LooperError::Quitting(name) => PostError::Shutdown(name),
            other => PostError::Refused(other.to_string()),
        }
    }
}

/// A FIFO work queue bound to one thread.
///
/// Implementations run posted work one item at a time on their owning thread,
/// in post order; delayed work runs no earlier than its delay.
pub trait QueueHandle: Send + Sync + 'static {
    /// Human-readable queue name, used for diagnostics.
    fn name(&self) -> &str;

    /// Identity of the underlying queue. Handles to the same queue return the
    /// same value.
    fn queue_id(&self) -> usize;

    fn post(&self, work: Work) -> Result<MessageId, PostError>;

    fn post_delayed(&self, work: Work, delay: Duration) -> Result<MessageId, PostError>;

    /// Removes still-pending work. Returns `false` if it already ran.
    fn remove(&self, id: MessageId) -> bool;

    /// `true` when the caller runs on the queue's owning thread.
    fn is_current_thread(&self) -> bool;
}

impl QueueHandle for Handler {
    fn name(&self) -> &str {
        Handler::name(self)
    }

    fn queue_id(&self) -> usize {
        self.queue_addr()
    }

    fn post(&self, work: Work) -> Result<MessageId, PostError> {
        Handler::post(self, work).map_err(PostError::from)
    }

    fn post_delayed(&self, work: Work, delay: Duration) -> Result<MessageId, PostError> {
        Handler::post_delayed(self, work, delay).map_err(PostError::from)
    }

    fn remove(&self, id: MessageId) -> bool {
        Handler::remove(self, id)
    }

    fn is_current_thread(&self) -> bool {
        Handler::is_current_thread(self)
    }
}
