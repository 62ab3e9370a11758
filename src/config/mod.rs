//! Configuration module
//!
//! Handles application settings loaded from TOML

mod settings;

pub use settings::{AppConfig, LoggingConfig, SampleFormat, SessionSettings};

use directories::ProjectDirs;
use std::path::PathBuf;
use thiserror::Error;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    /// No platform config directory
    #[error("Could not determine config directory")]
    NoConfigDir,

    /// Reading or writing the file failed
    #[error("Config I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The file is not valid TOML for [`AppConfig`]
    #[error("Invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Serializing the config failed
    #[error("Cannot serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Get the application configuration directory
pub fn config_dir() -> Option<PathBuf> {
    ProjectDirs::from("com", "tiltlink", "Tiltlink").map(|dirs| dirs.config_dir().to_path_buf())
}

/// Default location of the config file
pub fn default_config_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join("config.toml"))
}
