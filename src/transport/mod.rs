//! Realtime connection to the voice backend: wire protocol, auth,
//! reconnect policy, and the WebSocket actor.

pub mod auth;
pub mod backoff;
pub mod protocol;
pub mod ws;

pub use auth::{
    fetch_main_language, fetch_voice_preview, HttpSettingsProvider, HttpTokenProvider,
    SettingsProvider, StaticTokenProvider, TokenProvider,
};
pub use backoff::ReconnectPolicy;
pub use protocol::{ClientMessage, ServerEvent, SessionConfig, VoiceState};
pub use ws::{
    ConnectionState, RealtimeTransport, TransportEvent, TungsteniteConnector, WsConnector,
    WsMessage, WsReceiver, WsSender,
};
