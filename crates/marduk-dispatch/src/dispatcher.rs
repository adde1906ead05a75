use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use once_cell::sync::OnceCell;

use marduk_engine::looper::Handler;

use crate::error::DispatchError;
use crate::queue::{QueueHandle, Work};

/// Dispatcher resuming tasks on a thread-bound queue.
///
/// In the default mode every resumption is posted to the queue, even when the
/// caller already runs on the queue's thread. The [`immediate`](Self::immediate)
/// variant runs resumptions inline in that case.
///
/// Cloning is cheap; clones share the cached immediate variant. Equality and
/// hashing follow the identity of the target queue only, so a dispatcher and
/// its immediate variant compare equal.
#[derive(Clone)]
pub struct QueueDispatcher {
    inner: Arc<Inner>,
}

struct Inner {
    queue: Arc<dyn QueueHandle>,
    name: Option<String>,
    invoke_immediately: bool,
    immediate: OnceCell<QueueDispatcher>,
}

impl QueueDispatcher {
    /// Creates a dispatcher posting to `queue`. `name` is used for diagnostics.
    pub fn new(queue: Arc<dyn QueueHandle>, name: Option<String>) -> Self {
        Self::with_mode(queue, name, false)
    }

    /// Creates a dispatcher over a looper handler.
    pub fn for_handler(handler: Handler, name: Option<String>) -> Self {
        Self::new(Arc::new(handler), name)
    }

    fn with_mode(queue: Arc<dyn QueueHandle>, name: Option<String>, invoke_immediately: bool) -> Self {
        Self {
            inner: Arc::new(Inner {
                queue,
                name,
                invoke_immediately,
                immediate: OnceCell::new(),
            }),
        }
    }

    /// `false` only for the immediate variant called on the queue's own thread.
    pub fn is_dispatch_needed(&self) -> bool {
        !self.inner.invoke_immediately || !self.inner.queue.is_current_thread()
    }

    /// Posts `work` to the target queue.
    pub fn dispatch(&self, work: Work) -> Result<(), DispatchError> {
        match self.inner.queue.post(work) {
            Ok(id) => {
                log::trace!("{self}: dispatched message {}", id.as_raw());
                Ok(())
            }
            Err(source) => {
                log::error!("{self}: {source}; work was rejected");
                Err(DispatchError::Rejected {
                    dispatcher: self.to_string(),
                    source,
                })
            }
        }
    }

    /// The immediate variant of this dispatcher.
    ///
    /// Built on first access and cached; concurrent first accesses all observe
    /// the same instance. Returns `self` for a dispatcher that already is
    /// immediate.
    pub fn immediate(&self) -> QueueDispatcher {
        if self.inner.invoke_immediately {
            return self.clone();
        }
        self.inner
            .immediate
            .get_or_init(|| {
                Self::with_mode(self.inner.queue.clone(), self.inner.name.clone(), true)
            })
            .clone()
    }

    pub fn is_immediate(&self) -> bool {
        self.inner.invoke_immediately
    }

    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    pub fn queue(&self) -> &Arc<dyn QueueHandle> {
        &self.inner.queue
    }

    /// `true` if both values are handles to the very same dispatcher instance,
    /// as opposed to [`PartialEq`], which compares target queues.
    pub fn ptr_eq(&self, other: &QueueDispatcher) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl PartialEq for QueueDispatcher {
    fn eq(&self, other: &Self) -> bool {
        self.inner.queue.queue_id() == other.inner.queue.queue_id()
    }
}

impl Eq for QueueDispatcher {}

impl Hash for QueueDispatcher {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.queue.queue_id().hash(state);
    }
}

impl fmt::Display for QueueDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner.name {
            Some(name) => f.write_str(name)?,
            None => f.write_str(self.inner.queue.name())?,
        }
        if self.inner.invoke_immediately {
            f.write_str(".immediate")?;
        }
        Ok(())
    }
}

impl fmt::Debug for QueueDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueDispatcher")
            .field("name", &self.to_string())
            .field("queue", &self.inner.queue.name())
            .field("immediate", &self.inner.invoke_immediately)
            .finish()
    }
}
