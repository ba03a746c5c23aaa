/// fern-based stdout + file logger setup and log file pruning.
pub mod logger_setup;

pub use logger_setup::{cleanup_old_logs, parse_level, setup_logging, LoggerError};
