//! voxlink - Realtime voice conversation client core
//!
//! Capture, speech detection, duplex WebSocket streaming, and playback
//! for a realtime voice assistant backend.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod audio;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod defaults;
pub mod error;
pub mod session;
pub mod transport;

// Core seams (source → detect → stream → play)
pub use audio::playback::AudioSink;
pub use audio::source::AudioSource;
pub use audio::vad::{SpeechDetector, SpeechDetectorConfig, SpeechEvent};

// Session
pub use session::{SessionEvent, SessionHandle, spawn_session};

// Transport
pub use transport::auth::TokenProvider;
pub use transport::protocol::{SessionConfig, VoiceState};
pub use transport::ws::{ConnectionState, RealtimeTransport, TransportEvent};

// Error handling
pub use error::{Result, VoxlinkError};

// Config
pub use config::Config;

/// Build version string with optional git commit hash.
///
/// Returns `"0.3.1+abc1234"` when git hash is available, `"0.3.1"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}
