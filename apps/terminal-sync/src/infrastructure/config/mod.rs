//! Configuration Module
//!
//! Configuration loading for the terminal sync service.

mod settings;

pub use settings::{
    ApiSettings, ApiToken, ConfigError, DEFAULT_API_URL, DEFAULT_HTTP_TIMEOUT, SyncConfig,
};
