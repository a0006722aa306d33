//! Error types for voxlink.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum VoxlinkError {
    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Audio capture errors
    #[error("Audio device not found: {device}")]
    AudioDeviceNotFound { device: String },

    #[error("Audio capture failed: {message}")]
    AudioCapture { message: String },

    // Audio playback errors
    #[error("Audio playback failed: {message}")]
    AudioPlayback { message: String },

    // Transport errors
    #[error("Transport error: {message}")]
    Transport { message: String },

    // Authentication errors
    #[error("Authentication failed: {message}")]
    Auth { message: String },

    // Serialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, VoxlinkError>;
