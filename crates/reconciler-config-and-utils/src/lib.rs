//! Configuration, paths, logging and shared error types for the session reconciler.

mod config;
mod error;
mod json_layer;
mod logging;
mod paths;

pub use config::{
    Config, RetryPolicy, DEFAULT_BACKEND_URL, DEFAULT_CREDENTIAL_KEY, DEFAULT_LANDING_PATH,
    DEFAULT_LOG_LEVEL,
};
pub use error::{CoreError, CoreResult};
pub use json_layer::LogEntry;
pub use logging::{init_logging, parse_level, LogConfig};
pub use paths::Paths;
