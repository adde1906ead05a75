//! Marduk engine crate.
//!
//! This crate owns the platform pieces used by higher layers: thread-bound
//! message loops, the frame clock service and logging setup.

pub mod looper;
pub mod time;

pub mod logging;
