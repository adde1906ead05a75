use std::sync::Arc;

use anyhow::{Context, Result};
use futures::executor::block_on;

use marduk_dispatch::prelude::*;
use marduk_dispatch::{LooperMainDispatcherFactory, MainDispatcherFactory, TimeoutError};
use marduk_engine::logging::{init_logging, LoggingConfig};
use marduk_engine::looper::Looper;

fn main() -> Result<()> {
    init_logging(LoggingConfig::default());

    let main_looper = Looper::spawn_main("main").context("failed to start the main looper")?;

    let registry = MainDispatcherRegistry::new();
    let factories: Vec<Box<dyn MainDispatcherFactory>> = vec![Box::new(LooperMainDispatcherFactory)];
    let main = registry
        .load(&factories)
        .context("no main dispatcher available")?;
    log::info!("main dispatcher: {main} (immediate: {})", main.immediate());

    let frames = Arc::new(FrameSync::with_choreographer(main.immediate()));

    // ── frames ────────────────────────────────────────────────────────────
    let f = frames.clone();
    let stamps = block_on(main.spawn(async move {
        let mut stamps = Vec::with_capacity(5);
        for _ in 0..5 {
            stamps.push(f.await_next_frame().await?);
        }
        Ok::<_, FrameSyncError>(stamps)
    }))
    .context("frame task was not run")?
    .context("waiting for frames failed")?;

    for pair in stamps.windows(2) {
        log::info!("frame delta: {:.3} ms", (pair[1] - pair[0]) as f64 / 1e6);
    }

    // ── delay / timeout ───────────────────────────────────────────────────
    let d = main.clone();
    let outcome = block_on(main.spawn(async move {
        d.delay(50).await?;
        let quick = d.with_timeout(200, async { "quick" }).await;
        let slow = d.with_timeout(20, d.delay(10_000)).await;
        Ok::<_, DispatchError>((quick, slow))
    }))
    .context("timer task was not run")??;

    log::info!("quick: {:?}", outcome.0);
    match outcome.1 {
        Err(TimeoutError::Elapsed(ms)) => log::info!("slow: timed out after {ms} ms"),
        other => log::warn!("slow: unexpected outcome {other:?}"),
    }

    main_looper
        .quit_and_join()
        .context("main looper did not shut down cleanly")?;
    Ok(())
}
