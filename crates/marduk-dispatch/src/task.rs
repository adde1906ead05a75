//! Tasks driven by a [`QueueDispatcher`].
//!
//! Every wake-up of a task goes through the dispatcher's schedule path, which
//! either runs the task inline or posts it to the target queue.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_task::{FallibleTask, Runnable};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;

use crate::dispatcher::QueueDispatcher;
use crate::error::DispatchError;

thread_local! {
    static UNDISPATCHED: Cell<bool> = const { Cell::new(false) };

    /// `Some` while an inline run loop is active on this thread; holds the
    /// runnables scheduled inline from within it.
    static INLINE: RefCell<Option<VecDeque<Runnable>>> = const { RefCell::new(None) };
}

/// Sets `UNDISPATCHED` for a scope and restores the previous value on exit,
/// including exit by unwinding.
struct UndispatchedScope {
    prev: bool,
}

impl UndispatchedScope {
    fn enter(on: bool) -> Self {
        Self {
            prev: UNDISPATCHED.replace(on),
        }
    }
}

impl Drop for UndispatchedScope {
    fn drop(&mut self) {
        UNDISPATCHED.set(self.prev);
    }
}

/// Ends the inline run loop of this thread.
struct InlineLoop;

impl Drop for InlineLoop {
    fn drop(&mut self) {
        // Only non-empty when unwinding; dropping cancels those tasks.
        let leftover = INLINE.with_borrow_mut(Option::take);
        drop(leftover);
    }
}

/// Runs `f` with undispatched resumption enabled on this thread.
pub(crate) fn undispatched<R>(f: impl FnOnce() -> R) -> R {
    let _scope = UndispatchedScope::enter(true);
    f()
}

/// Runs a task inline. Wake-ups issued by the task itself are dispatched
/// normally.
///
/// Nested inline runs on the same thread are queued and drained by the
/// outermost call, so a task that keeps waking itself loops instead of
/// recursing.
fn run_inline(runnable: Runnable) {
    let first = INLINE.with_borrow_mut(|inline| match inline {
        Some(queue) => {
            queue.push_back(runnable);
            None
        }
        None => {
            *inline = Some(VecDeque::new());
            Some(runnable)
        }
    });
    let Some(first) = first else {
        return;
    };

    let _loop = InlineLoop;
    let _scope = UndispatchedScope::enter(false);
    let mut next = Some(first);
    while let Some(runnable) = next {
        runnable.run();
        next = INLINE.with_borrow_mut(|inline| inline.as_mut().and_then(VecDeque::pop_front));
    }
}

impl QueueDispatcher {
    /// Spawns `future` as a task resumed through this dispatcher.
    ///
    /// The first poll follows the same rules as every later wake-up: inline if
    /// no dispatch is needed, posted otherwise. If the queue rejects the task,
    /// it is cancelled and the handle resolves to the rejection.
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let rejection = Arc::new(OnceCell::new());
        let dispatcher = self.clone();
        let slot = rejection.clone();

        let (runnable, task) = async_task::spawn(future, move |runnable| {
            dispatcher.schedule(runnable, &slot);
        });
        runnable.schedule();

        JoinHandle {
            task: task.fallible(),
            rejection,
        }
    }

    fn schedule(&self, runnable: Runnable, rejection: &OnceCell<DispatchError>) {
        let undispatched = UNDISPATCHED.get() && self.queue().is_current_thread();
        if undispatched || !self.is_dispatch_needed() {
            run_inline(runnable);
            return;
        }

        let held = Arc::new(Mutex::new(Some(runnable)));
        let posted = held.clone();
        let result = self.dispatch(Box::new(move || {
            let runnable = posted.lock().take();
            if let Some(runnable) = runnable {
                runnable.run();
            }
        }));

        // Record the rejection before the last runnable reference goes away:
        // dropping it cancels the task and wakes the join handle.
        if let Err(e) = result {
            let _ = rejection.set(e);
        }
        drop(held);
    }
}

/// Awaits the output of a task spawned with [`QueueDispatcher::spawn`].
///
/// Dropping the handle cancels the task; use [`detach`](Self::detach) to let
/// it run to completion unobserved.
#[must_use = "dropping a JoinHandle cancels the task"]
pub struct JoinHandle<T> {
    task: FallibleTask<T>,
    rejection: Arc<OnceCell<DispatchError>>,
}

impl<T> JoinHandle<T> {
    /// Lets the task keep running without a handle.
    pub fn detach(self) {
        self.task.detach();
    }

    /// Cancels the task, returning its output if it had already finished.
    pub async fn cancel(self) -> Option<T> {
        self.task.cancel().await
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl<T> Future for JoinHandle<T> {
    type Output = Result<T, DispatchError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        Pin::new(&mut this.task).poll(cx).map(|out| {
            out.ok_or_else(|| {
                this.rejection
                    .get()
                    .cloned()
                    .unwrap_or(DispatchError::TaskCancelled)
            })
        })
    }
}
