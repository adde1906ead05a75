//! Delayed resumption and timeouts on a dispatcher's queue.
//!
//! Both entry points post a single message and retract it again when the
//! waiter goes away first. Running and retracting are mutually exclusive: a
//! retraction that loses the race is a no-op.

use std::future::{poll_fn, Future};
use std::pin::pin;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::task::Poll;
use std::time::Duration;

use futures::task::AtomicWaker;

use crate::continuation::{suspend_cancellable, Continuation, ResumeGuard};
use crate::dispatcher::QueueDispatcher;
use crate::error::{DispatchError, TimeoutError};
use crate::queue::{MessageId, QueueHandle, Work};

/// Largest delay handed to a queue, in milliseconds.
///
/// Leaves headroom for the queue to add "now" without overflowing.
pub const MAX_DELAY_MS: u64 = (i64::MAX / 2) as u64;

/// Clamps a millisecond delay into `[0, MAX_DELAY_MS]`.
pub fn clamp_delay(delay_ms: i64) -> Duration {
    let ms = delay_ms.clamp(0, MAX_DELAY_MS as i64);
    Duration::from_millis(ms.unsigned_abs())
}

const PENDING: u8 = 0;
const FIRED: u8 = 1;
const DISPOSED: u8 = 2;

/// Handle to a callback registered with [`QueueDispatcher::invoke_on_timeout`].
///
/// Dropping the handle does not dispose it.
#[derive(Clone)]
pub struct TimeoutHandle {
    queue: Arc<dyn QueueHandle>,
    id: MessageId,
    state: Arc<AtomicU8>,
}

impl TimeoutHandle {
    /// Retracts the callback if it has not started yet.
    ///
    /// Idempotent; a no-op once the callback ran.
    pub fn dispose(&self) {
        if self
            .state
            .compare_exchange(PENDING, DISPOSED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let removed = self.queue.remove(self.id);
            log::trace!("timeout {} disposed (removed: {removed})", self.id.as_raw());
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.state.load(Ordering::Acquire) == DISPOSED
    }

    pub fn has_fired(&self) -> bool {
        self.state.load(Ordering::Acquire) == FIRED
    }
}

impl QueueDispatcher {
    fn post_after(&self, work: Work, delay: Duration) -> Result<MessageId, DispatchError> {
        let queue = self.queue();
        let posted = if delay.is_zero() {
            queue.post(work)
        } else {
            queue.post_delayed(work, delay)
        };
        posted.map_err(|source| {
            log::error!("{self}: {source}; timed work was rejected");
            DispatchError::Rejected {
                dispatcher: self.to_string(),
                source,
            }
        })
    }

    /// Resumes `continuation` with `()` after `delay_ms` milliseconds.
    ///
    /// The resumption runs directly in the queue callback. Cancelling the
    /// continuation first removes the message; a continuation that is already
    /// cancelled has it removed right away. If the queue rejects the message,
    /// the continuation is cancelled and the rejection returned. A message
    /// discarded by a quitting queue cancels the continuation as well.
    pub fn schedule_resume_after_delay(
        &self,
        delay_ms: i64,
        continuation: Continuation<()>,
    ) -> Result<(), DispatchError> {
        let guard = ResumeGuard::new(continuation.clone());
        let posted = self.post_after(
            Box::new(move || {
                guard.disarm().resume_undispatched(());
            }),
            clamp_delay(delay_ms),
        );

        match posted {
            Ok(id) => {
                let queue = self.queue().clone();
                continuation.invoke_on_cancellation(move || {
                    queue.remove(id);
                });
                Ok(())
            }
            Err(e) => {
                continuation.cancel();
                Err(e)
            }
        }
    }

    /// Runs `callback` on the queue after `delay_ms` milliseconds unless the
    /// returned handle is disposed first.
    pub fn invoke_on_timeout(
        &self,
        delay_ms: i64,
        callback: impl FnOnce() + Send + 'static,
    ) -> Result<TimeoutHandle, DispatchError> {
        let state = Arc::new(AtomicU8::new(PENDING));
        let gate = state.clone();

        let id = self.post_after(
            Box::new(move || {
                if gate
                    .compare_exchange(PENDING, FIRED, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    callback();
                }
            }),
            clamp_delay(delay_ms),
        )?;

        Ok(TimeoutHandle {
            queue: self.queue().clone(),
            id,
            state,
        })
    }

    /// Suspends the calling task for `delay_ms` milliseconds.
    ///
    /// Fails with the rejection if the queue refuses the timer, and with
    /// [`DispatchError::TaskCancelled`] if the queue quits before it fires.
    pub async fn delay(&self, delay_ms: i64) -> Result<(), DispatchError> {
        let mut rejected = None;
        let resumed = suspend_cancellable(|cont| {
            if let Err(e) = self.schedule_resume_after_delay(delay_ms, cont) {
                rejected = Some(e);
            }
        })
        .await;

        resumed.map_err(|_| rejected.unwrap_or(DispatchError::TaskCancelled))
    }

    /// Runs `future` to completion unless `delay_ms` milliseconds pass first.
    ///
    /// The timer is disposed as soon as the future finishes or is dropped.
    pub async fn with_timeout<F>(&self, delay_ms: i64, future: F) -> Result<F::Output, TimeoutError>
    where
        F: Future,
    {
        let deadline = Arc::new(Deadline::default());
        let fired = deadline.clone();
        let handle = self.invoke_on_timeout(delay_ms, move || {
            fired.elapsed.store(true, Ordering::Release);
            fired.waker.wake();
        })?;
        let _guard = DisposeOnDrop(handle);

        let mut future = pin!(future);
        poll_fn(|cx| {
            if let Poll::Ready(out) = future.as_mut().poll(cx) {
                return Poll::Ready(Ok(out));
            }
            deadline.waker.register(cx.waker());
            if deadline.elapsed.load(Ordering::Acquire) {
                return Poll::Ready(Err(TimeoutError::Elapsed(clamp_delay(delay_ms).as_millis() as u64)));
            }
            Poll::Pending
        })
        .await
    }
}

#[derive(Default)]
struct Deadline {
    elapsed: AtomicBool,
    waker: AtomicWaker,
}

struct DisposeOnDrop(TimeoutHandle);

impl Drop for DisposeOnDrop {
    fn drop(&mut self) {
        self.0.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ManualQueue;
    use futures::executor::block_on;
    use futures::FutureExt;
    use marduk_engine::looper::Looper;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    fn counter() -> (Arc<AtomicUsize>, impl FnOnce() + Send + 'static) {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        (hits, move || {
            h.fetch_add(1, Ordering::SeqCst);
        })
    }

    /// Polls a fresh delay future once on `dispatcher`, returning the parked
    /// future and its continuation.
    fn parked_delay(
        dispatcher: &QueueDispatcher,
        delay_ms: i64,
    ) -> (Continuation<()>, impl Future<Output = Result<(), crate::Cancelled>> + Unpin) {
        let slot = Arc::new(Mutex::new(None));
        let s = slot.clone();
        let d = dispatcher.clone();
        let mut fut = Box::pin(suspend_cancellable(move |cont: Continuation<()>| {
            *s.lock() = Some(cont.clone());
            d.schedule_resume_after_delay(delay_ms, cont).unwrap();
        }));
        assert!((&mut fut).now_or_never().is_none());
        let cont = slot.lock().take().unwrap();
        (cont, fut)
    }

    // ── clamping ──────────────────────────────────────────────────────────

    #[test]
    fn non_positive_delays_post_immediately() {
        for d in [0, -1, -500, i64::MIN] {
            assert_eq!(clamp_delay(d), Duration::ZERO);
        }

        let queue = ManualQueue::new("zero");
        let dispatcher = QueueDispatcher::new(queue.clone(), None);
        let (hits, cb) = counter();
        dispatcher.invoke_on_timeout(-10, cb).unwrap();

        assert_eq!(queue.delays(), vec![Duration::ZERO]);
        queue.run_all();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn huge_delays_clamp_to_maximum() {
        let max = Duration::from_millis(MAX_DELAY_MS);
        assert_eq!(clamp_delay(i64::MAX), max);
        assert_eq!(clamp_delay(MAX_DELAY_MS as i64 + 1), max);
        assert_eq!(clamp_delay(MAX_DELAY_MS as i64), max);
        assert_eq!(clamp_delay(1_500), Duration::from_millis(1_500));
    }

    #[test]
    fn max_delay_is_accepted_by_a_real_looper() {
        let looper = Looper::spawn("timed-max").unwrap();
        let dispatcher = QueueDispatcher::for_handler(looper.handler().clone(), None);
        let (hits, cb) = counter();

        let handle = dispatcher.invoke_on_timeout(i64::MAX, cb).unwrap();
        assert_eq!(looper.handler().pending(), 1);
        handle.dispose();
        assert_eq!(looper.handler().pending(), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    // ── schedule_resume_after_delay ───────────────────────────────────────

    #[test]
    fn resume_after_delay_resumes_once() {
        let queue = ManualQueue::new("resume");
        let dispatcher = QueueDispatcher::new(queue.clone(), None);
        let (cont, fut) = parked_delay(&dispatcher, 25);

        assert_eq!(queue.delays(), vec![Duration::from_millis(25)]);
        queue.run_all();
        assert!(cont.is_resumed());
        assert_eq!(block_on(fut), Ok(()));
    }

    #[test]
    fn cancel_before_deadline_removes_message() {
        let queue = ManualQueue::new("cancel");
        let dispatcher = QueueDispatcher::new(queue.clone(), None);
        let (cont, fut) = parked_delay(&dispatcher, 1_000);

        let resumed = Arc::new(AtomicUsize::new(0));
        let r = resumed.clone();
        let observed = fut.map(move |out| {
            if out.is_ok() {
                r.fetch_add(1, Ordering::SeqCst);
            }
        });

        assert!(cont.cancel());
        assert_eq!(queue.pending(), 0);
        queue.run_all();
        block_on(observed);
        assert_eq!(resumed.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn cancel_after_dequeue_does_not_double_resume() {
        let queue = ManualQueue::new("race");
        let dispatcher = QueueDispatcher::new(queue.clone(), None);
        let (cont, fut) = parked_delay(&dispatcher, 10);

        // The queue already took the message when cancellation arrives.
        let work = queue.take_next().unwrap();
        assert!(cont.cancel());
        work();

        assert!(cont.is_cancelled());
        assert_eq!(block_on(fut), Err(crate::Cancelled));
    }

    #[test]
    fn already_cancelled_continuation_removes_immediately() {
        let queue = ManualQueue::new("pre-cancelled");
        let dispatcher = QueueDispatcher::new(queue.clone(), None);

        let fut = suspend_cancellable(|cont: Continuation<()>| {
            cont.cancel();
            dispatcher.schedule_resume_after_delay(50, cont).unwrap();
        });
        assert_eq!(fut.now_or_never(), Some(Err(crate::Cancelled)));
        assert_eq!(queue.pending(), 0);
    }

    #[test]
    fn rejected_delay_cancels_continuation() {
        let queue = ManualQueue::new("closed");
        queue.shut_down();
        let dispatcher = QueueDispatcher::new(queue, None);

        let out = block_on(dispatcher.delay(5));
        assert!(matches!(out, Err(DispatchError::Rejected { .. })));
    }

    #[test]
    fn delay_on_looper_waits_and_resumes_on_queue_thread() {
        let looper = Looper::spawn("timed-delay").unwrap();
        let dispatcher = QueueDispatcher::for_handler(looper.handler().clone(), None);
        let start = Instant::now();

        let d = dispatcher.clone();
        let handler = looper.handler().clone();
        let on_queue = block_on(dispatcher.spawn(async move {
            d.delay(20).await.unwrap();
            handler.is_current_thread()
        }))
        .unwrap();

        assert!(on_queue);
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn delay_awaited_elsewhere_fails_when_looper_quits() {
        let looper = Looper::spawn("timed-quit").unwrap();
        let dispatcher = QueueDispatcher::for_handler(looper.handler().clone(), None);
        let (tx, rx) = std::sync::mpsc::channel();

        let d = dispatcher.clone();
        std::thread::spawn(move || tx.send(block_on(d.delay(60_000))).unwrap());
        while looper.handler().pending() == 0 {
            std::thread::sleep(Duration::from_millis(1));
        }
        looper.quit_and_join().unwrap();

        let out = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(out, Err(DispatchError::TaskCancelled));
    }

    #[test]
    fn discarded_timer_message_cancels_continuation() {
        let queue = ManualQueue::new("discard");
        let dispatcher = QueueDispatcher::new(queue.clone(), None);
        let (cont, fut) = parked_delay(&dispatcher, 10);

        drop(queue.take_next().unwrap());
        assert!(cont.is_cancelled());
        assert_eq!(block_on(fut), Err(crate::Cancelled));
    }

    #[test]
    fn dropping_delayed_task_never_resumes() {
        let looper = Looper::spawn("timed-drop").unwrap();
        let dispatcher = QueueDispatcher::for_handler(looper.handler().clone(), None);
        let (hits, cb) = counter();

        let d = dispatcher.clone();
        let task = dispatcher.spawn(async move {
            d.delay(60_000).await.unwrap();
            cb();
        });
        // Let the task park on its delay.
        block_on(dispatcher.spawn(async {})).unwrap();
        assert_eq!(looper.handler().pending(), 1);

        block_on(task.cancel());
        block_on(dispatcher.spawn(async {})).unwrap();

        assert_eq!(looper.handler().pending(), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    // ── invoke_on_timeout ─────────────────────────────────────────────────

    #[test]
    fn dispose_before_run_prevents_callback() {
        let queue = ManualQueue::new("dispose");
        let dispatcher = QueueDispatcher::new(queue.clone(), None);
        let (hits, cb) = counter();

        let handle = dispatcher.invoke_on_timeout(100, cb).unwrap();
        handle.dispose();
        handle.dispose();

        assert!(handle.is_disposed());
        assert_eq!(queue.pending(), 0);
        queue.run_all();
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn dispose_after_dequeue_still_prevents_callback() {
        let queue = ManualQueue::new("dispose-race");
        let dispatcher = QueueDispatcher::new(queue.clone(), None);
        let (hits, cb) = counter();

        let handle = dispatcher.invoke_on_timeout(100, cb).unwrap();
        let work = queue.take_next().unwrap();
        handle.dispose();
        work();

        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn dispose_after_run_is_noop() {
        let queue = ManualQueue::new("late-dispose");
        let dispatcher = QueueDispatcher::new(queue.clone(), None);
        let (hits, cb) = counter();

        let handle = dispatcher.invoke_on_timeout(5, cb).unwrap();
        queue.run_all();
        handle.dispose();
        handle.dispose();

        assert!(handle.has_fired());
        assert!(!handle.is_disposed());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    // ── with_timeout ──────────────────────────────────────────────────────

    #[test]
    fn with_timeout_returns_output_and_disposes_timer() {
        let looper = Looper::spawn("timeout-ok").unwrap();
        let dispatcher = QueueDispatcher::for_handler(looper.handler().clone(), None);

        let out = block_on(dispatcher.with_timeout(60_000, async { 42 }));
        assert_eq!(out, Ok(42));
        assert_eq!(looper.handler().pending(), 0);
    }

    #[test]
    fn with_timeout_elapses() {
        let looper = Looper::spawn("timeout-elapsed").unwrap();
        let dispatcher = QueueDispatcher::for_handler(looper.handler().clone(), None);

        let out = block_on(dispatcher.with_timeout(10, futures::future::pending::<()>()));
        assert_eq!(out, Err(TimeoutError::Elapsed(10)));
    }
}
