use std::fmt;
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use super::error::LooperError;
use super::queue::{MessageId, MessageQueue, Work};

/// Fallback horizon when `now + delay` is not representable.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Cloneable handle for posting work to one looper's queue.
///
/// Every clone targets the same queue and the same owning thread.
#[derive(Clone)]
pub struct Handler {
    queue: Arc<MessageQueue>,
    thread: ThreadId,
}

impl Handler {
    pub(crate) fn new(queue: Arc<MessageQueue>, thread: ThreadId) -> Self {
        Self { queue, thread }
    }

    /// Name of the looper this handler posts to.
    pub fn name(&self) -> &str {
        self.queue.name()
    }

    /// Posts `work` to run as soon as the looper gets to it.
    pub fn post(&self, work: Work) -> Result<MessageId, LooperError> {
        self.post_at(work, Instant::now())
    }

    /// Posts `work` to run no earlier than `delay` from now.
    pub fn post_delayed(&self, work: Work, delay: Duration) -> Result<MessageId, LooperError> {
        let now = Instant::now();
        let deadline = now
            .checked_add(delay)
            .or_else(|| now.checked_add(FAR_FUTURE))
            .unwrap_or(now);
        self.post_at(work, deadline)
    }

    /// Posts `work` to run no earlier than `deadline`.
    pub fn post_at(&self, work: Work, deadline: Instant) -> Result<MessageId, LooperError> {
        let id = self.queue.enqueue(work, deadline)?;
        log::trace!("looper `{}`: posted message {}", self.name(), id.as_raw());
        Ok(id)
    }

    /// Removes a pending message. Returns `false` if it already ran.
    pub fn remove(&self, id: MessageId) -> bool {
        let removed = self.queue.remove(id);
        log::trace!("looper `{}`: remove message {} -> {removed}", self.name(), id.as_raw());
        removed
    }

    /// `true` when called from the thread that runs this handler's looper.
    pub fn is_current_thread(&self) -> bool {
        thread::current().id() == self.thread
    }

    /// Asks the looper to stop; pending work is discarded.
    pub fn quit(&self) {
        self.queue.quit();
    }

    pub fn is_quitting(&self) -> bool {
        self.queue.is_quitting()
    }

    /// Number of messages still waiting in the queue.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// `true` if both handlers post to the same queue.
    pub fn same_queue(&self, other: &Handler) -> bool {
        Arc::ptr_eq(&self.queue, &other.queue)
    }

    /// Stable identity of the underlying queue.
    pub fn queue_addr(&self) -> usize {
        Arc::as_ptr(&self.queue) as usize
    }

    pub(crate) fn queue(&self) -> &Arc<MessageQueue> {
        &self.queue
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler")
            .field("looper", &self.name())
            .field("thread", &self.thread)
            .finish()
    }
}
