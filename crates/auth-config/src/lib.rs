//! Configuration, paths and logging for the auth client workspace.

mod config;
mod error;
mod logging;
mod paths;

pub use config::{
    AuthFlowType, CodeChallengeMethod, Config, DEFAULT_AUTH_URL, DEFAULT_LOG_LEVEL,
    DEFAULT_STORAGE_KEY,
};
pub use error::{ConfigError, ConfigResult};
pub use logging::{init_logging, init_logging_with_format, parse_level, LogFormat};
pub use paths::Paths;
