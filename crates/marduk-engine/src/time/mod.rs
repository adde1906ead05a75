//! Time subsystem.
//!
//! Provides frame timing utilities and the per-looper frame clock service.
//! Intended usage:
//! - one `FrameClock` per loop; call `tick()` once per frame to obtain `FrameTime`
//! - one `Choreographer` per looper, shared by everything that waits for frames

mod choreographer;
mod frame_clock;

pub use choreographer::{Choreographer, ChoreographerConfig, FrameCallback};
pub use frame_clock::{monotonic_nanos, FrameClock, FrameTime};
