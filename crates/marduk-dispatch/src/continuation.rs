//! Exactly-once resumption handles for suspended tasks.
//!
//! A [`Continuation`] is the resuming side of a suspension point created by
//! [`suspend_cancellable`]. It is resolved at most once: either resumed with a
//! value or cancelled. Whichever happens first wins; the loser is a no-op.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use parking_lot::Mutex;

use crate::error::Cancelled;
use crate::task;

type CancelHook = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Phase {
    Pending,
    Resumed,
    Cancelled,
}

struct State<T> {
    phase: Phase,
    value: Option<T>,
    waker: Option<Waker>,
    on_cancel: Option<CancelHook>,
}

/// Handle to a suspended task, resumable exactly once.
pub struct Continuation<T> {
    state: Arc<Mutex<State<T>>>,
}

impl<T> Clone for Continuation<T> {
    fn clone(&self) -> Self {
        Self { state: self.state.clone() }
    }
}

impl<T> Continuation<T> {
    fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                phase: Phase::Pending,
                value: None,
                waker: None,
                on_cancel: None,
            })),
        }
    }

    /// Resumes the suspended task with `value`.
    ///
    /// Returns `false` if the continuation was already resumed or cancelled.
    pub fn resume(&self, value: T) -> bool {
        let (waker, hook) = {
            let mut state = self.state.lock();
            if state.phase != Phase::Pending {
                return false;
            }
            state.phase = Phase::Resumed;
            state.value = Some(value);
            (state.waker.take(), state.on_cancel.take())
        };
        drop(hook);

        if let Some(waker) = waker {
            waker.wake();
        }
        true
    }

    /// Resumes like [`resume`](Self::resume), but lets a task that is woken
    /// on its own queue thread run inline instead of being posted again.
    ///
    /// Intended for callers that already run as a queue callback.
    pub fn resume_undispatched(&self, value: T) -> bool {
        task::undispatched(|| self.resume(value))
    }

    /// Cancels the continuation and runs its cancellation hook.
    ///
    /// Returns `false` if it was already resumed or cancelled.
    pub fn cancel(&self) -> bool {
        let (waker, hook) = {
            let mut state = self.state.lock();
            if state.phase != Phase::Pending {
                return false;
            }
            state.phase = Phase::Cancelled;
            (state.waker.take(), state.on_cancel.take())
        };

        if let Some(hook) = hook {
            hook();
        }
        if let Some(waker) = waker {
            waker.wake();
        }
        true
    }

    /// Registers `hook` to run if the continuation is cancelled.
    ///
    /// Runs `hook` immediately when the continuation is already cancelled and
    /// drops it when the continuation was resumed. Multiple hooks run in
    /// registration order.
    pub fn invoke_on_cancellation(&self, hook: impl FnOnce() + Send + 'static) {
        let mut state = self.state.lock();
        match state.phase {
            Phase::Pending => {
                let chained: CancelHook = match state.on_cancel.take() {
                    Some(prev) => Box::new(move || {
                        prev();
                        hook();
                    }),
                    None => Box::new(hook),
                };
                state.on_cancel = Some(chained);
            }
            Phase::Cancelled => {
                drop(state);
                hook();
            }
            Phase::Resumed => {}
        }
    }

    /// Neither resumed nor cancelled yet.
    pub fn is_active(&self) -> bool {
        self.state.lock().phase == Phase::Pending
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.lock().phase == Phase::Cancelled
    }

    pub fn is_resumed(&self) -> bool {
        self.state.lock().phase == Phase::Resumed
    }

    fn poll_resolved(&self, cx: &mut Context<'_>) -> Poll<Result<T, Cancelled>> {
        let mut state = self.state.lock();
        match state.phase {
            Phase::Resumed => match state.value.take() {
                Some(value) => Poll::Ready(Ok(value)),
                None => Poll::Ready(Err(Cancelled)),
            },
            Phase::Cancelled => Poll::Ready(Err(Cancelled)),
            Phase::Pending => {
                let stale = state
                    .waker
                    .as_ref()
                    .is_none_or(|w| !w.will_wake(cx.waker()));
                if stale {
                    state.waker = Some(cx.waker().clone());
                }
                Poll::Pending
            }
        }
    }
}

/// Owns a continuation on behalf of queued work.
///
/// Work that is discarded without running, for example when its queue quits,
/// drops the guard, which then resolves the continuation with the fallback
/// value, or cancels it when there is none. A waiter on another thread never
/// hangs on work that will not run.
pub struct ResumeGuard<T> {
    continuation: Continuation<T>,
    fallback: Option<T>,
    armed: bool,
}

impl<T> ResumeGuard<T> {
    /// Cancels `continuation` if dropped while armed.
    pub fn new(continuation: Continuation<T>) -> Self {
        Self {
            continuation,
            fallback: None,
            armed: true,
        }
    }

    /// Resumes `continuation` with `fallback` if dropped while armed.
    pub fn with_fallback(continuation: Continuation<T>, fallback: T) -> Self {
        Self {
            continuation,
            fallback: Some(fallback),
            armed: true,
        }
    }

    /// Hands the continuation back to the work that is now running it.
    pub fn disarm(mut self) -> Continuation<T> {
        self.armed = false;
        self.continuation.clone()
    }
}

impl<T> Drop for ResumeGuard<T> {
    fn drop(&mut self) {
        if !self.armed || !self.continuation.is_active() {
            return;
        }
        match self.fallback.take() {
            Some(value) => {
                self.continuation.resume(value);
            }
            None => {
                self.continuation.cancel();
            }
        }
        log::debug!("queued resumption dropped without running");
    }
}

/// Suspends the calling task until the continuation handed to `start` is
/// resolved.
///
/// `start` runs on the first poll. Dropping the returned future before it
/// completes cancels the continuation.
pub fn suspend_cancellable<T, F>(start: F) -> Suspend<T, F>
where
    F: FnOnce(Continuation<T>),
{
    Suspend {
        continuation: Continuation::new(),
        start: Some(start),
    }
}

/// Future returned by [`suspend_cancellable`].
#[must_use = "futures do nothing unless polled"]
pub struct Suspend<T, F> {
    continuation: Continuation<T>,
    start: Option<F>,
}

// No field is ever pinned.
impl<T, F> Unpin for Suspend<T, F> {}

impl<T, F> Future for Suspend<T, F>
where
    F: FnOnce(Continuation<T>),
{
    type Output = Result<T, Cancelled>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if let Some(start) = this.start.take() {
            start(this.continuation.clone());
        }
        this.continuation.poll_resolved(cx)
    }
}

impl<T, F> Drop for Suspend<T, F> {
    fn drop(&mut self) {
        if self.start.is_none() {
            self.continuation.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn parked<T: Send + 'static>() -> (Continuation<T>, impl Future<Output = Result<T, Cancelled>>) {
        let slot = Arc::new(Mutex::new(None));
        let s = slot.clone();
        let mut fut = Box::pin(suspend_cancellable(move |c: Continuation<T>| {
            *s.lock() = Some(c);
        }));
        assert!(fut.as_mut().now_or_never().is_none());
        let cont = slot.lock().take().unwrap();
        (cont, fut)
    }

    // ── resume ────────────────────────────────────────────────────────────

    #[test]
    fn resume_once() {
        let (cont, fut) = parked::<u32>();
        assert!(cont.resume(7));
        assert!(!cont.resume(8));
        assert!(!cont.cancel());
        assert_eq!(block_on(fut), Ok(7));
    }

    #[test]
    fn resume_inside_start_completes_immediately() {
        let fut = suspend_cancellable(|c: Continuation<&str>| {
            c.resume("now");
        });
        assert_eq!(fut.now_or_never(), Some(Ok("now")));
    }

    // ── cancel ────────────────────────────────────────────────────────────

    #[test]
    fn cancel_wins_over_late_resume() {
        let (cont, fut) = parked::<u32>();
        assert!(cont.cancel());
        assert!(!cont.resume(1));
        assert!(cont.is_cancelled());
        assert_eq!(block_on(fut), Err(Cancelled));
    }

    #[test]
    fn hook_runs_on_cancel_only() {
        let hits = Arc::new(AtomicUsize::new(0));

        let (resumed, _fut) = parked::<()>();
        let h = hits.clone();
        resumed.invoke_on_cancellation(move || { h.fetch_add(1, Ordering::SeqCst); });
        resumed.resume(());
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        let (cancelled, _fut) = parked::<()>();
        let h = hits.clone();
        cancelled.invoke_on_cancellation(move || { h.fetch_add(1, Ordering::SeqCst); });
        cancelled.cancel();
        cancelled.cancel();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn hook_on_already_cancelled_fires_immediately() {
        let (cont, _fut) = parked::<()>();
        cont.cancel();

        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        cont.invoke_on_cancellation(move || { h.fetch_add(1, Ordering::SeqCst); });
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropping_future_cancels() {
        let (cont, fut) = parked::<()>();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        cont.invoke_on_cancellation(move || { h.fetch_add(1, Ordering::SeqCst); });

        drop(fut);
        assert!(cont.is_cancelled());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    // ── guard ─────────────────────────────────────────────────────────────

    #[test]
    fn dropped_guard_cancels() {
        let (cont, fut) = parked::<u32>();
        drop(ResumeGuard::new(cont.clone()));
        assert!(cont.is_cancelled());
        assert_eq!(block_on(fut), Err(Cancelled));
    }

    #[test]
    fn dropped_guard_resumes_with_fallback() {
        let (cont, fut) = parked::<Result<u32, &str>>();
        drop(ResumeGuard::with_fallback(cont, Err("stopped")));
        assert_eq!(block_on(fut), Ok(Err("stopped")));
    }

    #[test]
    fn disarmed_guard_leaves_continuation_alone() {
        let (cont, fut) = parked::<u32>();
        let guard = ResumeGuard::new(cont.clone());
        let waiter = guard.disarm();
        assert!(cont.is_active());

        waiter.resume(3);
        assert_eq!(block_on(fut), Ok(3));
    }

    #[test]
    fn hooks_chain_in_order() {
        let (cont, _fut) = parked::<()>();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let o = order.clone();
            cont.invoke_on_cancellation(move || o.lock().push(i));
        }
        cont.cancel();
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }
}
