//! Deterministic queue for unit tests.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::queue::{MessageId, PostError, QueueHandle, Work};

/// Queue whose items only run when the test says so.
///
/// Delays are recorded but not honoured; `run_all` runs items in post order.
/// `set_current` controls what `is_current_thread` reports.
pub(crate) struct ManualQueue {
    name: String,
    items: Mutex<BTreeMap<u64, (Duration, Work)>>,
    next: Mutex<u64>,
    current: AtomicBool,
    shut_down: AtomicBool,
}

impl ManualQueue {
    pub(crate) fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            items: Mutex::new(BTreeMap::new()),
            next: Mutex::new(0),
            current: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
        })
    }

    pub(crate) fn set_current(&self, current: bool) {
        self.current.store(current, Ordering::SeqCst);
    }

    pub(crate) fn shut_down(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
    }

    pub(crate) fn pending(&self) -> usize {
        self.items.lock().len()
    }

    /// Delays of pending items, in post order.
    pub(crate) fn delays(&self) -> Vec<Duration> {
        self.items.lock().values().map(|(d, _)| *d).collect()
    }

    /// Dequeues the oldest item without running it.
    pub(crate) fn take_next(&self) -> Option<Work> {
        self.items.lock().pop_first().map(|(_, (_, work))| work)
    }

    /// Runs pending items, including ones posted while running, as if on the
    /// owning thread.
    pub(crate) fn run_all(&self) {
        let was = self.current.swap(true, Ordering::SeqCst);
        while let Some(work) = self.take_next() {
            work();
        }
        self.current.store(was, Ordering::SeqCst);
    }
}

impl QueueHandle for ManualQueue {
    fn name(&self) -> &str {
        &self.name
    }

    fn queue_id(&self) -> usize {
        self as *const Self as usize
    }

    fn post(&self, work: Work) -> Result<MessageId, PostError> {
        self.post_delayed(work, Duration::ZERO)
    }

    fn post_delayed(&self, work: Work, delay: Duration) -> Result<MessageId, PostError> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(PostError::Shutdown(self.name.clone()));
        }
        let id = {
            let mut next = self.next.lock();
            *next += 1;
            *next
        };
        self.items.lock().insert(id, (delay, work));
        Ok(MessageId::from_raw(id))
    }

    fn remove(&self, id: MessageId) -> bool {
        let removed = self.items.lock().remove(&id.as_raw());
        removed.is_some()
    }

    fn is_current_thread(&self) -> bool {
        self.current.load(Ordering::SeqCst)
    }
}
