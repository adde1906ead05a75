use std::sync::Arc;

use once_cell::sync::OnceCell;

use marduk_engine::time::Choreographer;

use crate::continuation::{suspend_cancellable, Continuation, ResumeGuard};
use crate::dispatcher::QueueDispatcher;
use crate::error::{Cancelled, FrameSyncError};
use crate::queue::PostError;

pub use marduk_engine::time::FrameCallback;

/// A service invoking one-shot callbacks on the next frame tick.
pub trait FrameClockService: Send + Sync + 'static {
    /// Registers `callback` to run once, with the tick timestamp in nanoseconds.
    ///
    /// There is no way to unregister; a callback whose waiter is gone must be
    /// harmless when it fires.
    fn post_frame_callback(&self, callback: FrameCallback) -> Result<(), PostError>;
}

impl FrameClockService for Choreographer {
    fn post_frame_callback(&self, callback: FrameCallback) -> Result<(), PostError> {
        Choreographer::post_frame_callback(self, callback).map_err(PostError::from)
    }
}

type ClockAccessor = dyn Fn() -> Result<Arc<dyn FrameClockService>, FrameSyncError> + Send + Sync;

/// Suspends tasks until the next frame tick.
///
/// The clock service is discovered lazily through a thread-affine accessor,
/// always on the dispatcher's target thread, and cached for every later call.
/// Once cached, waiting for a frame no longer hops onto the target thread.
///
/// The cache belongs to the `FrameSync` instance, not to the process: each
/// looper has its own clock service. Two instances over the same dispatcher
/// each run discovery once and, with [`with_choreographer`](Self::with_choreographer),
/// end up sharing that looper's [`Choreographer`].
///
/// If the clock stops before the awaited tick, for instance because the
/// looper quit, the wait fails with [`FrameSyncError::ClockStopped`].
pub struct FrameSync {
    dispatcher: QueueDispatcher,
    accessor: Arc<ClockAccessor>,
    clock: Arc<OnceCell<Arc<dyn FrameClockService>>>,
}

impl FrameSync {
    /// Creates a frame sync that discovers its clock with `accessor`.
    ///
    /// `accessor` is only ever called on `dispatcher`'s target thread.
    pub fn new<A>(dispatcher: QueueDispatcher, accessor: A) -> Self
    where
        A: Fn() -> Result<Arc<dyn FrameClockService>, FrameSyncError> + Send + Sync + 'static,
    {
        Self {
            dispatcher,
            accessor: Arc::new(accessor),
            clock: Arc::new(OnceCell::new()),
        }
    }

    /// Frame sync backed by the target looper's [`Choreographer`].
    pub fn with_choreographer(dispatcher: QueueDispatcher) -> Self {
        Self::new(dispatcher, || {
            Choreographer::for_current_thread()
                .map(|c| c as Arc<dyn FrameClockService>)
                .map_err(|e| FrameSyncError::ClockUnavailable(e.to_string()))
        })
    }

    pub fn dispatcher(&self) -> &QueueDispatcher {
        &self.dispatcher
    }

    /// The cached clock service, if discovery already happened.
    pub fn cached_clock(&self) -> Option<Arc<dyn FrameClockService>> {
        self.clock.get().cloned()
    }

    /// Waits for the next frame tick and returns its timestamp in nanoseconds.
    ///
    /// Dropping the returned future abandons the wait; the pending frame
    /// callback then fires into nothing.
    pub async fn await_next_frame(&self) -> Result<u64, FrameSyncError> {
        if let Some(clock) = self.cached_clock() {
            return await_tick(clock).await;
        }
        self.discover_and_await().await
    }

    async fn discover_and_await(&self) -> Result<u64, FrameSyncError> {
        let mut rejected = None;
        let resumed = suspend_cancellable(|cont: Continuation<Result<u64, FrameSyncError>>| {
            let cache = self.clock.clone();
            let accessor = self.accessor.clone();
            let guard = ResumeGuard::with_fallback(cont.clone(), Err(FrameSyncError::ClockStopped));

            let register = move || {
                let waiter = guard.disarm();
                let clock = match cache.get_or_try_init(|| {
                    log::debug!("discovering frame clock service");
                    accessor()
                }) {
                    Ok(clock) => clock.clone(),
                    Err(e) => {
                        waiter.resume(Err(e));
                        return;
                    }
                };
                post_tick(clock.as_ref(), waiter);
            };

            if !self.dispatcher.is_dispatch_needed() {
                register();
            } else if let Err(e) = self.dispatcher.dispatch(Box::new(register)) {
                // The refused hop already resolved `cont` through its guard.
                rejected = Some(e);
            }
        })
        .await;

        match (rejected, resumed) {
            (Some(e), _) => Err(e.into()),
            (None, Ok(out)) => out,
            (None, Err(Cancelled)) => Err(FrameSyncError::Cancelled),
        }
    }
}

async fn await_tick(clock: Arc<dyn FrameClockService>) -> Result<u64, FrameSyncError> {
    suspend_cancellable(|cont: Continuation<Result<u64, FrameSyncError>>| {
        post_tick(clock.as_ref(), cont);
    })
    .await
    .unwrap_or(Err(FrameSyncError::Cancelled))
}

/// Registers a frame callback resuming `cont` with the tick timestamp.
///
/// A callback the clock drops without calling, on refusal or shutdown,
/// resumes `cont` with [`FrameSyncError::ClockStopped`].
fn post_tick(clock: &dyn FrameClockService, cont: Continuation<Result<u64, FrameSyncError>>) {
    let guard = ResumeGuard::with_fallback(cont.clone(), Err(FrameSyncError::ClockStopped));
    let posted = clock.post_frame_callback(Box::new(move |nanos| {
        if !guard.disarm().resume_undispatched(Ok(nanos)) {
            log::trace!("frame at {nanos}ns had no live waiter");
        }
    }));
    if let Err(e) = posted {
        log::debug!("frame callback refused: {e}");
        cont.resume(Err(FrameSyncError::ClockStopped));
    }
}
