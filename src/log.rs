//! Logging setup.
//!
//! Wraps the global `log` logger behind a swappable proxy so the binary can
//! install a no-op logger at process start (before CLI args are parsed) and
//! then switch to a real `env_logger` backend once verbosity is known.

use log::{LevelFilter, Log, Metadata, Record};
use once_cell::sync::Lazy;
use std::sync::{Arc, RwLock};

struct NopLogger;

impl Log for NopLogger {
    fn enabled(&self, _: &Metadata) -> bool {
        false
    }

    fn log(&self, _: &Record) {}

    fn flush(&self) {}
}

/// Proxies an underlying logger, allowing it to be swapped after `log::set_boxed_logger`
/// has already been called (which can happen only once per process).
#[derive(Clone)]
pub struct ProxyLogger {
    logger: Arc<RwLock<Box<dyn Log>>>,
}

pub static LOGGER_SWITCHER: Lazy<ProxyLogger> = Lazy::new(|| {
    let logger = ProxyLogger {
        logger: Arc::new(RwLock::new(Box::new(NopLogger))),
    };

    log::set_boxed_logger(Box::new(logger.clone())).expect("infallible");
    log::set_max_level(LevelFilter::Off);

    logger
});

impl ProxyLogger {
    /// Switch to a new logger implementation and reset the global max log level.
    pub fn switch<L: Log + 'static>(&self, logger: L, level_filter: LevelFilter) {
        *self.logger.write().unwrap() = Box::new(logger);
        log::set_max_level(level_filter);
    }
}

impl Log for ProxyLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        self.logger.read().unwrap().enabled(metadata)
    }

    fn log(&self, record: &Record) {
        self.logger.read().unwrap().log(record)
    }

    fn flush(&self) {
        self.logger.read().unwrap().flush()
    }
}

/// Initialize logging from a verbosity level parsed off the CLI.
pub fn init(level: LevelFilter) {
    let env_logger = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(level.to_string()),
    )
    .build();
    LOGGER_SWITCHER.switch(env_logger, level);
}
