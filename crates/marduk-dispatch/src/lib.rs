//! Marduk dispatch — async tasks on top of marduk loopers.
//!
//! A [`QueueDispatcher`] turns a thread-bound queue into the place where tasks
//! resume. On top of it sit delayed resumption and timeouts, which retract
//! their queued work when the waiter goes away, and [`FrameSync`], which
//! suspends a task until the next frame tick.
//!
//! ```rust,ignore
//! use marduk_dispatch::prelude::*;
//! use marduk_engine::looper::Looper;
//!
//! let looper = Looper::spawn("ui")?;
//! let ui = QueueDispatcher::for_handler(looper.handler().clone(), Some("ui".into()));
//! let frames = std::sync::Arc::new(FrameSync::with_choreographer(ui.clone()));
//!
//! let d = ui.clone();
//! let task = ui.spawn(async move {
//!     d.delay(100).await?;
//!     frames.await_next_frame().await
//! });
//! ```

pub mod continuation;
pub mod dispatcher;
pub mod error;
pub mod frame;
pub mod queue;
pub mod registry;
pub mod task;
pub mod timed;

#[cfg(test)]
mod testing;

pub use continuation::{suspend_cancellable, Continuation, ResumeGuard, Suspend};
pub use dispatcher::QueueDispatcher;
pub use error::{Cancelled, DispatchError, FrameSyncError, MissingMainDispatcher, TimeoutError};
pub use frame::{FrameClockService, FrameSync};
pub use queue::{PostError, QueueHandle};
pub use registry::{LooperMainDispatcherFactory, MainDispatcherFactory, MainDispatcherRegistry};
pub use task::JoinHandle;
pub use timed::{clamp_delay, TimeoutHandle, MAX_DELAY_MS};

/// Everything needed to spawn, delay and frame-sync tasks.
pub mod prelude {
    pub use crate::continuation::{suspend_cancellable, Continuation};
    pub use crate::dispatcher::QueueDispatcher;
    pub use crate::error::{DispatchError, FrameSyncError, TimeoutError};
    pub use crate::frame::FrameSync;
    pub use crate::registry::MainDispatcherRegistry;
    pub use crate::task::JoinHandle;
}
