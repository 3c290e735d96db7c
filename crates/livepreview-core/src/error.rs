//! Error types for livepreview-core

use thiserror::Error;

/// Result type alias for livepreview-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in livepreview-core
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration file error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Duration string could not be parsed
    #[error("Invalid duration '{value}': {reason}")]
    Duration { value: String, reason: String },

    /// The isolated execution context could not be created
    #[error("Sandbox spawn error: {0}")]
    SandboxSpawn(String),

    /// The other side of a channel went away
    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    /// External toolchain renderer error
    #[error("Toolchain error: {0}")]
    Toolchain(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// TOML serialization error
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}
