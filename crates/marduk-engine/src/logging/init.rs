use std::io::Write;
use std::sync::Once;

/// Logger configuration.
///
/// `env_filter` follows the `env_logger` filter syntax (e.g. "info", "warn",
/// "marduk_dispatch=trace,marduk_engine=debug").
///
/// `write_style` controls ANSI coloring behavior.
///
/// `thread_names` prefixes each record with the emitting thread's name, which
/// is the looper name for looper threads.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub env_filter: Option<String>,
    pub default_level: log::LevelFilter,
    pub write_style: env_logger::WriteStyle,
    pub thread_names: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            env_filter: None,
            default_level: log::LevelFilter::Info,
            write_style: env_logger::WriteStyle::Auto,
            thread_names: true,
        }
    }
}

static INIT: Once = Once::new();

/// Initializes the global logger once.
///
/// This function is idempotent; subsequent calls are ignored, as is a logger
/// installed by someone else first.
/// Intended usage is early in `main`.
pub fn init_logging(config: LoggingConfig) {
    INIT.call_once(|| {
        let mut builder = env_logger::Builder::new();

        if let Some(filter) = &config.env_filter {
            builder.parse_filters(filter);
        } else if let Ok(filter) = std::env::var("RUST_LOG") {
            builder.parse_filters(&filter);
        } else {
            builder.filter_level(config.default_level);
        }

        builder.write_style(config.write_style);

        if config.thread_names {
            builder.format(|buf, record| {
                let thread = std::thread::current();
                writeln!(
                    buf,
                    "[{} {:<5} {} {}] {}",
                    buf.timestamp_millis(),
                    record.level(),
                    thread.name().unwrap_or("<unnamed>"),
                    record.target(),
                    record.args()
                )
            });
        }

        if builder.try_init().is_ok() {
            log::debug!("logging initialized");
        }
    });
}
