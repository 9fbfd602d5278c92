//! Application startup utilities module.

mod logging;
mod metrics;
mod shutdown;

pub use logging::{LOG_FILE_NAME, LogRotation, LoggingConfig, LoggingGuard, init_logging};
pub use self::metrics::init_metrics;
pub use shutdown::{ShutdownSignal, wait_for_shutdown_signal};
