//! JSON message protocol spoken over the realtime WebSocket.
//!
//! Text frames carry these messages; binary frames carry raw audio in
//! both directions and never go through serde.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Server-driven voice session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoiceState {
    #[default]
    Idle,
    Listening,
    Transcribing,
    Thinking,
    Speaking,
}

/// Session configuration carried by `config_update` messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub language: String,
    pub voice: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

/// Control messages sent to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Keepalive, sent every 30s while connected.
    Ping { timestamp: f64 },
    /// The user has stopped speaking; process the utterance.
    EndUtterance,
    /// The user has started speaking.
    SpeechStarted,
    /// Barge-in: stop the in-progress response.
    Interrupt,
    /// Clear the session's conversation state.
    Reset,
    /// Update session configuration (language, voice, role).
    ConfigUpdate { data: SessionConfig },
}

impl ClientMessage {
    /// A ping stamped with the current unix time.
    pub fn ping_now() -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        Self::Ping { timestamp }
    }

    /// Serialize to a JSON text frame.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatePayload {
    pub state: VoiceState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextPayload {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguagePayload {
    pub language: String,
}

/// Events received from the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Application-level handshake: the session is authenticated and
    /// usable. Socket open alone does not mean connected.
    Connected,
    /// Authoritative voice state change.
    State { data: StatePayload },
    /// Transcribed user speech.
    Transcription { data: TextPayload },
    /// Assistant response text.
    AiResponse { data: TextPayload },
    /// Server-side error. Informational only; the server recovers on
    /// its own and follows up with a `state` event.
    Error { data: ErrorPayload },
    /// Server acknowledged or pushed a language change.
    ConfigUpdate { data: LanguagePayload },
    /// Any message type this client does not know. Logged and dropped.
    #[serde(other)]
    Unknown,
}

impl ServerEvent {
    /// Parse a JSON text frame received from the server.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}
