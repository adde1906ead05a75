use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

use parking_lot::{Condvar, Mutex};

use super::error::LooperError;

/// A unit of work posted to a looper.
pub type Work = Box<dyn FnOnce() + Send + 'static>;

/// Identifies a posted, not-yet-run message so it can be removed again.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct MessageId(u64);

impl MessageId {
    /// Wraps a raw sequence number.
    ///
    /// Queue implementations outside this crate use this to mint their own ids.
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_raw(self) -> u64 {
        self.0
    }
}

/// Deadline-ordered message queue shared between a looper and its handlers.
///
/// Entries are keyed by `(deadline, sequence)`, so messages with equal
/// deadlines run in post order.
///
/// Work is never dropped while the state lock is held: dropping a work item
/// may cancel a task, which in turn removes other messages from this queue.
pub(crate) struct MessageQueue {
    name: String,
    state: Mutex<QueueState>,
    available: Condvar,
}

#[derive(Default)]
struct QueueState {
    entries: BTreeMap<(Instant, u64), Work>,
    deadlines: HashMap<u64, Instant>,
    next_seq: u64,
    quitting: bool,
}

impl MessageQueue {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(QueueState::default()),
            available: Condvar::new(),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn enqueue(&self, work: Work, deadline: Instant) -> Result<MessageId, LooperError> {
        let mut state = self.state.lock();
        if state.quitting {
            drop(state);
            drop(work);
            return Err(LooperError::Quitting(self.name.clone()));
        }

        let seq = state.next_seq;
        state.next_seq += 1;

        // Only an entry that becomes the new head can shorten the looper's wait.
        let new_head = state
            .entries
            .keys()
            .next()
            .is_none_or(|(head, _)| deadline < *head);

        state.entries.insert((deadline, seq), work);
        state.deadlines.insert(seq, deadline);
        drop(state);

        if new_head {
            self.available.notify_one();
        }
        Ok(MessageId(seq))
    }

    /// Removes a pending message. Returns `false` if it already ran or never existed.
    pub(crate) fn remove(&self, id: MessageId) -> bool {
        let mut state = self.state.lock();
        let Some(deadline) = state.deadlines.remove(&id.0) else {
            return false;
        };
        let work = state.entries.remove(&(deadline, id.0));
        drop(state);

        work.is_some()
    }

    /// Blocks until the head message is due and returns it.
    ///
    /// Returns `None` once the queue is quitting.
    pub(crate) fn next(&self) -> Option<Work> {
        let mut state = self.state.lock();
        loop {
            if state.quitting {
                return None;
            }

            match state.entries.keys().next().copied() {
                Some((deadline, seq)) if deadline <= Instant::now() => {
                    state.deadlines.remove(&seq);
                    return state.entries.remove(&(deadline, seq));
                }
                Some((deadline, _)) => {
                    self.available.wait_until(&mut state, deadline);
                }
                None => self.available.wait(&mut state),
            }
        }
    }

    /// Stops accepting work and discards everything still pending.
    pub(crate) fn quit(&self) {
        let mut state = self.state.lock();
        if state.quitting {
            return;
        }
        state.quitting = true;
        state.deadlines.clear();
        let pending = std::mem::take(&mut state.entries);
        drop(state);

        self.available.notify_all();
        log::debug!("looper `{}` quit; discarding {} pending message(s)", self.name, pending.len());
        drop(pending);
    }

    pub(crate) fn is_quitting(&self) -> bool {
        self.state.lock().quitting
    }

    pub(crate) fn len(&self) -> usize {
        self.state.lock().entries.len()
    }
}
