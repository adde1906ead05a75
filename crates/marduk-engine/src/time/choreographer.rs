use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use once_cell::unsync::OnceCell as LocalOnceCell;
use parking_lot::Mutex;

use crate::looper::{Handler, Looper, LooperError};

use super::frame_clock::FrameClock;

/// One-shot callback receiving the frame timestamp in nanoseconds.
pub type FrameCallback = Box<dyn FnOnce(u64) + Send + 'static>;

/// Choreographer configuration.
#[derive(Debug, Clone)]
pub struct ChoreographerConfig {
    /// Spacing between frame ticks.
    pub frame_interval: Duration,
}

impl Default for ChoreographerConfig {
    fn default() -> Self {
        Self {
            // 60 Hz
            frame_interval: Duration::from_nanos(16_666_667),
        }
    }
}

thread_local! {
    static INSTANCE: LocalOnceCell<Arc<Choreographer>> = const { LocalOnceCell::new() };
}

/// Per-looper frame clock service.
///
/// Callbacks posted before a tick are all invoked by that tick, on the
/// looper thread, with the same timestamp. Ticks are only scheduled while
/// callbacks are pending.
pub struct Choreographer {
    handler: Handler,
    config: ChoreographerConfig,
    state: Mutex<State>,
    this: Weak<Choreographer>,
}

struct State {
    callbacks: Vec<FrameCallback>,
    scheduled: bool,
    clock: FrameClock,
}

impl Choreographer {
    /// Creates a choreographer ticking on `handler`'s looper.
    pub fn new(handler: Handler, config: ChoreographerConfig) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            handler,
            config,
            state: Mutex::new(State {
                callbacks: Vec::new(),
                scheduled: false,
                clock: FrameClock::new(),
            }),
            this: this.clone(),
        })
    }

    /// The choreographer of the calling thread's looper.
    ///
    /// Must be called on a looper thread; the instance is created on first use
    /// and shared by later calls on the same thread.
    pub fn for_current_thread() -> Result<Arc<Self>, LooperError> {
        INSTANCE.with(|cell| {
            cell.get_or_try_init(|| -> Result<_, LooperError> {
                let handler = Looper::my_handler().ok_or(LooperError::NotPrepared)?;
                log::debug!("choreographer created for looper `{}`", handler.name());
                Ok(Self::new(handler, ChoreographerConfig::default()))
            })
            .cloned()
        })
    }

    pub fn handler(&self) -> &Handler {
        &self.handler
    }

    pub fn config(&self) -> &ChoreographerConfig {
        &self.config
    }

    /// Registers `callback` to run once on the next frame tick.
    ///
    /// Safe to call from any thread. Callbacks that can no longer run because
    /// the looper quit are dropped without being called; this includes
    /// callbacks other threads registered for the same tick. The caller whose
    /// registration finds the looper gone gets the error.
    pub fn post_frame_callback(&self, callback: FrameCallback) -> Result<(), LooperError> {
        let mut state = self.state.lock();
        state.callbacks.push(callback);
        if state.scheduled {
            return Ok(());
        }

        state.scheduled = true;
        let delay = state.clock.until_next_frame(self.config.frame_interval);
        drop(state);

        // A refused tick is dropped inside `post_delayed`, which abandons
        // every callback waiting on it.
        let tick = Tick(Some(self.this.clone()));
        self.handler.post_delayed(Box::new(move || tick.run()), delay)?;
        Ok(())
    }

    fn do_frame(&self) {
        let (frame, callbacks) = {
            let mut state = self.state.lock();
            state.scheduled = false;
            let frame = state.clock.tick();
            (frame, std::mem::take(&mut state.callbacks))
        };

        log::trace!(
            "frame {} at {}ns: {} callback(s)",
            frame.frame_index,
            frame.timestamp_nanos,
            callbacks.len()
        );
        for callback in callbacks {
            callback(frame.timestamp_nanos);
        }
    }

    fn abandon_frame(&self) {
        let dropped = {
            let mut state = self.state.lock();
            state.scheduled = false;
            std::mem::take(&mut state.callbacks)
        };
        log::debug!(
            "looper `{}` gone; dropping {} frame callback(s)",
            self.handler.name(),
            dropped.len()
        );
        drop(dropped);
    }
}

/// The queued frame tick. Dropped without running, it abandons the pending
/// callbacks.
struct Tick(Option<Weak<Choreographer>>);

impl Tick {
    fn run(mut self) {
        if let Some(this) = self.0.take().and_then(|w| w.upgrade()) {
            this.do_frame();
        }
    }
}

impl Drop for Tick {
    fn drop(&mut self) {
        if let Some(this) = self.0.take().and_then(|w| w.upgrade()) {
            this.abandon_frame();
        }
    }
}

impl fmt::Debug for Choreographer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Choreographer")
            .field("looper", &self.handler.name())
            .field("frame_interval", &self.config.frame_interval)
            .finish()
    }
}
