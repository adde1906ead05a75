//! Process-wide logger setup.
//!
//! Everything in marduk logs through the `log` facade. Binaries call
//! [`init_logging`] once at startup; library code never installs a logger.

mod init;

pub use init::{init_logging, LoggingConfig};
