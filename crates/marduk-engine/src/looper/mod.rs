//! Thread-bound message loops.
//!
//! A `Looper` owns one deadline-ordered queue per thread. Work reaches it
//! through cloneable [`Handler`]s, which may be used from any thread; the
//! work itself always runs on the looper thread, one item at a time.
//!
//! Intended usage:
//! - `Looper::spawn` for a dedicated thread, or
//! - `Looper::prepare` + `Looper::run` to turn the current thread into a looper

mod error;
mod handler;
mod queue;

use std::cell::RefCell;
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};

use once_cell::sync::OnceCell;

pub use error::LooperError;
pub use handler::Handler;
pub use queue::{MessageId, Work};

use queue::MessageQueue;

thread_local! {
    static CURRENT: RefCell<Option<Handler>> = const { RefCell::new(None) };
}

static MAIN: OnceCell<Handler> = OnceCell::new();

/// Entry points for preparing and running loopers.
pub struct Looper;

impl Looper {
    /// Installs a message queue for the current thread.
    pub fn prepare(name: impl Into<String>) -> Result<Handler, LooperError> {
        CURRENT.with(|current| {
            let mut current = current.borrow_mut();
            if current.is_some() {
                return Err(LooperError::AlreadyPrepared);
            }

            let queue = Arc::new(MessageQueue::new(name));
            let handler = Handler::new(queue, thread::current().id());
            log::debug!("looper `{}` prepared", handler.name());

            *current = Some(handler.clone());
            Ok(handler)
        })
    }

    /// Prepares the current thread and records it as the process main looper.
    pub fn prepare_main(name: impl Into<String>) -> Result<Handler, LooperError> {
        if MAIN.get().is_some() {
            return Err(LooperError::MainAlreadyPrepared);
        }
        let handler = Self::prepare(name)?;
        MAIN.set(handler.clone())
            .map_err(|_| LooperError::MainAlreadyPrepared)?;
        Ok(handler)
    }

    /// Handler of the current thread's looper, if one is prepared.
    pub fn my_handler() -> Option<Handler> {
        CURRENT.with(|current| current.borrow().clone())
    }

    /// Handler of the main looper, if one was prepared.
    pub fn main_handler() -> Option<Handler> {
        MAIN.get().cloned()
    }

    /// Runs the current thread's looper until it is asked to quit.
    pub fn run() -> Result<(), LooperError> {
        let handler = Self::my_handler().ok_or(LooperError::NotPrepared)?;
        let queue = handler.queue().clone();

        log::debug!("looper `{}` running", handler.name());
        while let Some(work) = queue.next() {
            work();
        }
        log::debug!("looper `{}` stopped", handler.name());

        Ok(())
    }

    /// Starts a named thread running a freshly prepared looper.
    pub fn spawn(name: impl Into<String>) -> Result<LooperThread, LooperError> {
        Self::spawn_with(name.into(), false)
    }

    /// Like [`Looper::spawn`], but the new looper becomes the main looper.
    pub fn spawn_main(name: impl Into<String>) -> Result<LooperThread, LooperError> {
        Self::spawn_with(name.into(), true)
    }

    fn spawn_with(name: String, main: bool) -> Result<LooperThread, LooperError> {
        let (tx, rx) = mpsc::sync_channel(1);
        let thread_name = name.clone();

        let join = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                let prepared = if main {
                    Looper::prepare_main(thread_name)
                } else {
                    Looper::prepare(thread_name)
                };
                let ok = prepared.is_ok();
                if tx.send(prepared).is_err() || !ok {
                    return;
                }
                if let Err(e) = Looper::run() {
                    log::error!("looper thread exited abnormally: {e}");
                }
            })
            .map_err(|e| LooperError::Thread {
                name: name.clone(),
                reason: e.to_string(),
            })?;

        let handler = rx.recv().map_err(|_| LooperError::Thread {
            name: name.clone(),
            reason: "thread exited before the looper was prepared".to_string(),
        })??;

        Ok(LooperThread {
            handler,
            join: Some(join),
        })
    }
}

/// A dedicated thread running a looper.
///
/// Dropping it quits the looper and joins the thread.
pub struct LooperThread {
    handler: Handler,
    join: Option<JoinHandle<()>>,
}

impl LooperThread {
    pub fn handler(&self) -> &Handler {
        &self.handler
    }

    /// Quits the looper and waits for its thread to finish.
    pub fn quit_and_join(mut self) -> Result<(), LooperError> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<(), LooperError> {
        self.handler.quit();

        let Some(join) = self.join.take() else {
            return Ok(());
        };
        if self.handler.is_current_thread() {
            // Joining ourselves would never return; the loop exits on its own.
            return Ok(());
        }
        join.join().map_err(|_| LooperError::Thread {
            name: self.handler.name().to_string(),
            reason: "looper thread panicked".to_string(),
        })
    }
}

impl Drop for LooperThread {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::warn!("{e}");
        }
    }
}
