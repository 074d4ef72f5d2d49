use std::sync::OnceLock;

use env_logger::Env;

static LOGGER_INIT: OnceLock<()> = OnceLock::new();

/// Initializes the process-wide logger. Safe to call more than once.
pub fn init() {
    LOGGER_INIT.get_or_init(|| {
        env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    });
}
