use std::cmp::Reverse;

use anyhow::anyhow;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;

use marduk_engine::looper::Looper;

use crate::dispatcher::QueueDispatcher;
use crate::error::MissingMainDispatcher;

/// Produces a candidate main dispatcher.
pub trait MainDispatcherFactory: Send + Sync {
    /// Factories with higher priority are tried first.
    fn load_priority(&self) -> i32 {
        0
    }

    fn create_dispatcher(&self) -> anyhow::Result<QueueDispatcher>;

    /// Diagnostic shown when this factory fails.
    fn hint_on_error(&self) -> Option<String> {
        None
    }
}

/// Builds the main dispatcher over [`Looper::main_handler`].
#[derive(Debug, Default, Clone, Copy)]
pub struct LooperMainDispatcherFactory;

impl MainDispatcherFactory for LooperMainDispatcherFactory {
    fn create_dispatcher(&self) -> anyhow::Result<QueueDispatcher> {
        let handler = Looper::main_handler().ok_or_else(|| anyhow!("no main looper has been prepared"))?;
        Ok(QueueDispatcher::for_handler(handler, Some("Main".to_string())))
    }

    fn hint_on_error(&self) -> Option<String> {
        Some("call Looper::prepare_main or Looper::spawn_main before loading the main dispatcher".to_string())
    }
}

/// Holds the process's main dispatcher.
///
/// Created once at startup and handed to whatever needs the main dispatcher.
/// The first successful registration wins; later ones are ignored. Factory
/// failures are not propagated individually, only kept as a diagnostic.
#[derive(Default)]
pub struct MainDispatcherRegistry {
    main: OnceCell<QueueDispatcher>,
    failure: Mutex<Option<MissingMainDispatcher>>,
}

impl MainDispatcherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `dispatcher` unless one is registered already.
    pub fn register(&self, dispatcher: QueueDispatcher) -> bool {
        let name = dispatcher.to_string();
        let installed = self.main.set(dispatcher).is_ok();
        if installed {
            log::debug!("main dispatcher registered: {name}");
        } else {
            log::debug!("main dispatcher already registered; ignoring {name}");
        }
        installed
    }

    /// Tries `factories` by descending priority until one succeeds.
    ///
    /// Returns the registered main dispatcher, which may come from an earlier
    /// registration.
    pub fn load(
        &self,
        factories: &[Box<dyn MainDispatcherFactory>],
    ) -> Result<QueueDispatcher, MissingMainDispatcher> {
        if let Some(main) = self.main.get() {
            return Ok(main.clone());
        }

        let mut ordered: Vec<&dyn MainDispatcherFactory> = factories.iter().map(|f| f.as_ref()).collect();
        ordered.sort_by_key(|f| Reverse(f.load_priority()));

        let mut last_failure = None;
        for factory in ordered {
            match factory.create_dispatcher() {
                Ok(dispatcher) => {
                    self.register(dispatcher);
                    return self.main();
                }
                Err(e) => {
                    log::warn!("main dispatcher factory failed: {e:#}");
                    last_failure = Some(MissingMainDispatcher {
                        cause: Some(format!("{e:#}")),
                        hint: factory.hint_on_error(),
                    });
                }
            }
        }

        let missing = last_failure.unwrap_or_else(|| MissingMainDispatcher {
            cause: None,
            hint: Some("no main dispatcher factories were provided".to_string()),
        });
        *self.failure.lock() = Some(missing.clone());
        Err(missing)
    }

    /// The registered main dispatcher.
    pub fn main(&self) -> Result<QueueDispatcher, MissingMainDispatcher> {
        if let Some(main) = self.main.get() {
            return Ok(main.clone());
        }
        Err(self.failure.lock().clone().unwrap_or(MissingMainDispatcher {
            cause: Some("no main dispatcher was registered".to_string()),
            hint: None,
        }))
    }

    /// `true` if `dispatcher` targets the main dispatcher's queue, in either
    /// mode.
    pub fn is_main(&self, dispatcher: &QueueDispatcher) -> bool {
        self.main.get().is_some_and(|main| main == dispatcher)
    }
}
