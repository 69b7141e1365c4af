//! Configuration error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    ValidationError(String),

    #[error("Invalid cluster configuration")]
    ClusterError(#[from] viewstamp_vsr::ConfigError),

    #[error("Failed to render configuration as TOML")]
    SerializeError(#[from] toml::ser::Error),

    #[error("XDG directory error: {0}")]
    XdgError(String),
}
