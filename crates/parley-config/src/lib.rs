pub mod config;
pub mod manager;

pub use config::{
    Config, ConfigError, ConfigResult, LlmConfig, LogLevel, LoggingConfig, RelayConfig, ServerConfig,
};
pub use manager::ConfigManager;

use std::path::PathBuf;

/// Parley configuration directory (~/.parley)
pub fn parley_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".parley"))
}

/// Default configuration file path
pub fn default_config_path() -> Option<PathBuf> {
    parley_dir().map(|dir| dir.join("config.json"))
}

/// Expand a leading `~/` to the user's home directory
pub fn expand_tilde(path: &str) -> Option<PathBuf> {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir().map(|home| home.join(rest)),
        None => Some(PathBuf::from(path)),
    }
}
