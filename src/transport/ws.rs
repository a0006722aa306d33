//! Realtime WebSocket transport.
//!
//! One actor task owns the connection, the reconnect schedule, and the
//! keepalive timer. Everything else talks to it through a command
//! channel, so connection state has a single writer.
//!
//! The socket itself sits behind the [`WsConnector`]/[`WsSender`]/
//! [`WsReceiver`] traits so the whole lifecycle is testable against a
//! scripted fake wire.

use crate::defaults;
use crate::error::{Result, VoxlinkError};
use crate::transport::auth::{SettingsProvider, TokenProvider};
use crate::transport::backoff::ReconnectPolicy;
use crate::transport::protocol::{ClientMessage, ServerEvent, SessionConfig, VoiceState};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// Connection lifecycle state. `Connected` is only entered on the
/// server's application-level `connected` event, never on socket open.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Failed(String),
}

/// A message read off the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsMessage {
    Text(String),
    Binary(Vec<u8>),
    Close,
}

/// Write half of a WebSocket.
#[async_trait]
pub trait WsSender: Send {
    async fn send_text(&mut self, text: String) -> Result<()>;
    async fn send_binary(&mut self, data: Vec<u8>) -> Result<()>;
    async fn close(&mut self) -> Result<()>;
}

/// Read half of a WebSocket. `None` means the connection is gone.
#[async_trait]
pub trait WsReceiver: Send {
    async fn next_message(&mut self) -> Option<Result<WsMessage>>;
}

/// Opens WebSocket connections.
#[async_trait]
pub trait WsConnector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<(Box<dyn WsSender>, Box<dyn WsReceiver>)>;
}

/// Production connector backed by tokio-tungstenite.
pub struct TungsteniteConnector;

#[async_trait]
impl WsConnector for TungsteniteConnector {
    async fn connect(&self, url: &str) -> Result<(Box<dyn WsSender>, Box<dyn WsReceiver>)> {
        use futures_util::StreamExt;

        let (stream, _response) =
            tokio_tungstenite::connect_async(url)
                .await
                .map_err(|e| VoxlinkError::Transport {
                    message: format!("WebSocket connect failed: {}", e),
                })?;
        let (sink, source) = stream.split();
        Ok((
            Box::new(TungsteniteSender { sink }),
            Box::new(TungsteniteReceiver { source }),
        ))
    }
}

type WsStreamInner =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

struct TungsteniteSender {
    sink: futures_util::stream::SplitSink<WsStreamInner, tokio_tungstenite::tungstenite::Message>,
}

struct TungsteniteReceiver {
    source: futures_util::stream::SplitStream<WsStreamInner>,
}

#[async_trait]
impl WsSender for TungsteniteSender {
    async fn send_text(&mut self, text: String) -> Result<()> {
        use futures_util::SinkExt;
        self.sink
            .send(tokio_tungstenite::tungstenite::Message::Text(text))
            .await
            .map_err(|e| VoxlinkError::Transport {
                message: format!("WebSocket text send failed: {}", e),
            })
    }

    async fn send_binary(&mut self, data: Vec<u8>) -> Result<()> {
        use futures_util::SinkExt;
        self.sink
            .send(tokio_tungstenite::tungstenite::Message::Binary(data))
            .await
            .map_err(|e| VoxlinkError::Transport {
                message: format!("WebSocket binary send failed: {}", e),
            })
    }

    async fn close(&mut self) -> Result<()> {
        use futures_util::SinkExt;
        self.sink
            .close()
            .await
            .map_err(|e| VoxlinkError::Transport {
                message: format!("WebSocket close failed: {}", e),
            })
    }
}

#[async_trait]
impl WsReceiver for TungsteniteReceiver {
    async fn next_message(&mut self) -> Option<Result<WsMessage>> {
        use futures_util::StreamExt;
        use tokio_tungstenite::tungstenite::Message;

        loop {
            return match self.source.next().await? {
                Ok(Message::Text(text)) => Some(Ok(WsMessage::Text(text))),
                Ok(Message::Binary(data)) => Some(Ok(WsMessage::Binary(data))),
                Ok(Message::Close(_)) => Some(Ok(WsMessage::Close)),
                // Control frames are answered by the library.
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => continue,
                Err(e) => Some(Err(VoxlinkError::Transport {
                    message: format!("WebSocket receive failed: {}", e),
                })),
            };
        }
    }
}

/// Events the transport surfaces to the session controller.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The server finished its application-level handshake.
    Connected,
    /// Binary audio payload to play back.
    Audio(Vec<u8>),
    /// Authoritative voice state from the server.
    State(VoiceState),
    /// Transcribed user speech.
    Transcription(String),
    /// Assistant response text.
    AiResponse(String),
    /// Server-driven language change.
    LanguageChanged(String),
}

enum TransportCmd {
    Connect,
    Disconnect,
    SendAudio(Vec<u8>),
    Control(ClientMessage),
    UpdateConfig(SessionConfig),
}

/// Handle to the transport actor.
#[derive(Clone)]
pub struct RealtimeTransport {
    cmd_tx: mpsc::UnboundedSender<TransportCmd>,
    state_rx: watch::Receiver<ConnectionState>,
    config: Arc<Mutex<SessionConfig>>,
}

impl RealtimeTransport {
    /// Spawn the transport actor. Returns the handle plus the event
    /// stream the session controller consumes.
    ///
    /// When a `settings` provider is given, every connect attempt also
    /// fetches the account's preferred language, so a language changed
    /// server-side is re-applied on reconnect.
    pub fn spawn(
        url: impl Into<String>,
        connector: Arc<dyn WsConnector>,
        tokens: Arc<dyn TokenProvider>,
        settings: Option<Arc<dyn SettingsProvider>>,
        config: SessionConfig,
    ) -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let config = Arc::new(Mutex::new(config));

        let actor = TransportActor {
            url: url.into(),
            connector,
            tokens,
            settings,
            state_tx,
            event_tx,
            config: Arc::clone(&config),
            policy: ReconnectPolicy::new(),
        };
        tokio::spawn(actor.run(cmd_rx));

        (
            Self {
                cmd_tx,
                state_rx,
                config,
            },
            event_rx,
        )
    }

    /// Start connecting. No-op if already connecting or connected.
    /// Cancels any pending reconnect timer.
    pub fn connect(&self) {
        let _ = self.cmd_tx.send(TransportCmd::Connect);
    }

    /// Close the connection, cancel pending reconnect/keepalive work,
    /// and reset the backoff counter.
    pub fn disconnect(&self) {
        let _ = self.cmd_tx.send(TransportCmd::Disconnect);
    }

    /// Send one capture frame as little-endian PCM bytes. Dropped with a
    /// warning when not connected; stale audio is never queued.
    pub fn send_audio(&self, samples: &[i16]) {
        let mut bytes = Vec::with_capacity(samples.len() * 2);
        for sample in samples {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }
        let _ = self.cmd_tx.send(TransportCmd::SendAudio(bytes));
    }

    pub fn send_speech_started(&self) {
        let _ = self.cmd_tx.send(TransportCmd::Control(ClientMessage::SpeechStarted));
    }

    pub fn send_end_utterance(&self) {
        let _ = self.cmd_tx.send(TransportCmd::Control(ClientMessage::EndUtterance));
    }

    pub fn send_interrupt(&self) {
        let _ = self.cmd_tx.send(TransportCmd::Control(ClientMessage::Interrupt));
    }

    pub fn send_reset(&self) {
        let _ = self.cmd_tx.send(TransportCmd::Control(ClientMessage::Reset));
    }

    /// Update session configuration. Local state is updated even while
    /// disconnected, so the next connection starts with it; the wire
    /// message goes out only when connected.
    pub fn update_config(&self, config: SessionConfig) {
        let _ = self.cmd_tx.send(TransportCmd::UpdateConfig(config));
    }

    pub fn state(&self) -> ConnectionState {
        self.state_rx.borrow().clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    pub fn session_config(&self) -> SessionConfig {
        self.config
            .lock()
            .map(|c| c.clone())
            .unwrap_or_else(|e| e.into_inner().clone())
    }
}

enum Exit {
    /// Command channel closed; the owning session is gone.
    Shutdown,
    /// User-initiated disconnect; no reconnect.
    Manual,
    /// Error or unexpected closure; schedule a reconnect.
    Lost(String),
}

struct TransportActor {
    url: String,
    connector: Arc<dyn WsConnector>,
    tokens: Arc<dyn TokenProvider>,
    settings: Option<Arc<dyn SettingsProvider>>,
    state_tx: watch::Sender<ConnectionState>,
    event_tx: mpsc::UnboundedSender<TransportEvent>,
    config: Arc<Mutex<SessionConfig>>,
    policy: ReconnectPolicy,
}

impl TransportActor {
    async fn run(mut self, mut cmd_rx: mpsc::UnboundedReceiver<TransportCmd>) {
        let mut reconnect_at: Option<tokio::time::Instant> = None;

        loop {
            // Idle phase: disconnected or failed, possibly with a
            // reconnect timer running.
            let attempt_connect = match reconnect_at {
                Some(at) => {
                    tokio::select! {
                        cmd = cmd_rx.recv() => match cmd {
                            None => return,
                            Some(cmd) => self.handle_idle_cmd(cmd, &mut reconnect_at),
                        },
                        _ = tokio::time::sleep_until(at) => {
                            reconnect_at = None;
                            true
                        }
                    }
                }
                None => match cmd_rx.recv().await {
                    None => return,
                    Some(cmd) => self.handle_idle_cmd(cmd, &mut reconnect_at),
                },
            };

            if !attempt_connect {
                continue;
            }

            self.set_state(ConnectionState::Connecting);

            // Best-effort refresh: a stale token is the server's call to
            // reject, not a reason to stay offline.
            let token = match self.tokens.refresh().await {
                Ok(token) => Some(token),
                Err(e) => {
                    eprintln!("voxlink: token refresh failed, using cached token: {e}");
                    self.tokens.current_token()
                }
            };

            // Best-effort settings sync: a language changed server-side
            // since the last connect gets re-applied here.
            if let Some(settings) = &self.settings
                && let Some(token) = token.as_deref()
            {
                match settings.main_language(token).await {
                    Ok(language) => self.apply_language(language),
                    Err(e) => eprintln!("voxlink: settings fetch failed: {e}"),
                }
            }

            let url = match token {
                Some(token) => format!("{}?token={}", self.url, token),
                None => self.url.clone(),
            };

            let (sender, receiver) = match self.connector.connect(&url).await {
                Ok(halves) => halves,
                Err(e) => {
                    self.set_state(ConnectionState::Failed(e.to_string()));
                    reconnect_at = self.schedule_reconnect();
                    continue;
                }
            };

            // Socket is open but the session is not usable until the
            // server's `connected` event arrives.
            match self.connected_loop(sender, receiver, &mut cmd_rx).await {
                Exit::Shutdown => return,
                Exit::Manual => reconnect_at = None,
                Exit::Lost(reason) => {
                    eprintln!("voxlink: connection lost: {reason}");
                    self.set_state(ConnectionState::Failed(reason));
                    reconnect_at = self.schedule_reconnect();
                }
            }
        }
    }

    /// Handle a command while no socket exists. Returns true when a
    /// connection attempt should start.
    fn handle_idle_cmd(
        &mut self,
        cmd: TransportCmd,
        reconnect_at: &mut Option<tokio::time::Instant>,
    ) -> bool {
        match cmd {
            TransportCmd::Connect => {
                // A fresh connect supersedes any scheduled reconnect.
                *reconnect_at = None;
                true
            }
            TransportCmd::Disconnect => {
                *reconnect_at = None;
                self.policy.reset();
                self.set_state(ConnectionState::Disconnected);
                false
            }
            TransportCmd::UpdateConfig(config) => {
                // Remembered for the next connection.
                self.store_config(config);
                false
            }
            TransportCmd::SendAudio(_) => {
                eprintln!("voxlink: dropping audio frame, not connected");
                false
            }
            TransportCmd::Control(msg) => {
                eprintln!("voxlink: dropping {:?}, not connected", msg);
                false
            }
        }
    }

    async fn connected_loop(
        &mut self,
        mut sender: Box<dyn WsSender>,
        mut receiver: Box<dyn WsReceiver>,
        cmd_rx: &mut mpsc::UnboundedReceiver<TransportCmd>,
    ) -> Exit {
        let period = Duration::from_secs(defaults::KEEPALIVE_SECS);
        let mut keepalive = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        keepalive.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    let Some(cmd) = cmd else {
                        let _ = sender.close().await;
                        return Exit::Shutdown;
                    };
                    match cmd {
                        TransportCmd::Connect => {
                            // Already connecting or connected.
                        }
                        TransportCmd::Disconnect => {
                            let _ = sender.close().await;
                            self.policy.reset();
                            self.set_state(ConnectionState::Disconnected);
                            return Exit::Manual;
                        }
                        TransportCmd::SendAudio(bytes) => {
                            if self.is_connected() {
                                if let Err(e) = sender.send_binary(bytes).await {
                                    return Exit::Lost(format!("audio send failed: {e}"));
                                }
                            } else {
                                eprintln!("voxlink: dropping audio frame, not connected");
                            }
                        }
                        TransportCmd::Control(msg) => {
                            if self.is_connected() {
                                if let Err(e) = self.send_message(&mut sender, &msg).await {
                                    return Exit::Lost(format!("control send failed: {e}"));
                                }
                            } else {
                                eprintln!("voxlink: dropping {:?}, not connected", msg);
                            }
                        }
                        TransportCmd::UpdateConfig(config) => {
                            self.store_config(config.clone());
                            if self.is_connected() {
                                let msg = ClientMessage::ConfigUpdate { data: config };
                                if let Err(e) = self.send_message(&mut sender, &msg).await {
                                    return Exit::Lost(format!("config send failed: {e}"));
                                }
                            }
                        }
                    }
                }
                msg = receiver.next_message() => {
                    match msg {
                        None => return Exit::Lost("connection closed".to_string()),
                        Some(Err(e)) => return Exit::Lost(e.to_string()),
                        Some(Ok(WsMessage::Close)) => {
                            return Exit::Lost("server closed the connection".to_string());
                        }
                        Some(Ok(WsMessage::Binary(data))) => {
                            let _ = self.event_tx.send(TransportEvent::Audio(data));
                        }
                        Some(Ok(WsMessage::Text(text))) => self.handle_server_text(&text),
                    }
                }
                _ = keepalive.tick(), if self.is_connected() => {
                    // Ping failures are logged only; the receive loop is
                    // the authority on liveness.
                    match ClientMessage::ping_now().to_json() {
                        Ok(json) => {
                            if let Err(e) = sender.send_text(json).await {
                                eprintln!("voxlink: keepalive ping failed: {e}");
                            }
                        }
                        Err(e) => eprintln!("voxlink: failed to encode ping: {e}"),
                    }
                }
            }
        }
    }

    fn handle_server_text(&mut self, text: &str) {
        match ServerEvent::from_json(text) {
            Err(e) => eprintln!("voxlink: dropping malformed server message: {e}"),
            Ok(ServerEvent::Connected) => {
                self.policy.reset();
                self.set_state(ConnectionState::Connected);
                let _ = self.event_tx.send(TransportEvent::Connected);
            }
            Ok(ServerEvent::State { data }) => {
                let _ = self.event_tx.send(TransportEvent::State(data.state));
            }
            Ok(ServerEvent::Transcription { data }) => {
                let _ = self.event_tx.send(TransportEvent::Transcription(data.text));
            }
            Ok(ServerEvent::AiResponse { data }) => {
                let _ = self.event_tx.send(TransportEvent::AiResponse(data.text));
            }
            Ok(ServerEvent::Error { data }) => {
                // The server recovers on its own and follows up with a
                // state event; this never tears the connection down.
                eprintln!("voxlink: server error: {}", data.message);
            }
            Ok(ServerEvent::ConfigUpdate { data }) => {
                if let Ok(mut config) = self.config.lock() {
                    config.language = data.language.clone();
                }
                let _ = self
                    .event_tx
                    .send(TransportEvent::LanguageChanged(data.language));
            }
            Ok(ServerEvent::Unknown) => {
                eprintln!("voxlink: ignoring unknown server message type");
            }
        }
    }

    async fn send_message(
        &self,
        sender: &mut Box<dyn WsSender>,
        msg: &ClientMessage,
    ) -> Result<()> {
        sender.send_text(msg.to_json()?).await
    }

    fn schedule_reconnect(&mut self) -> Option<tokio::time::Instant> {
        match self.policy.next_delay() {
            Some(delay) => {
                eprintln!(
                    "voxlink: reconnecting in {}s (attempt {})",
                    delay.as_secs(),
                    self.policy.attempt()
                );
                Some(tokio::time::Instant::now() + delay)
            }
            None => {
                eprintln!(
                    "voxlink: giving up after {} reconnect attempts; call connect() to retry",
                    self.policy.attempt()
                );
                None
            }
        }
    }

    fn store_config(&self, config: SessionConfig) {
        if let Ok(mut current) = self.config.lock() {
            *current = config;
        }
    }

    /// Store a server-preferred language, surfacing an event only when it
    /// actually differs from the current one.
    fn apply_language(&self, language: String) {
        let changed = match self.config.lock() {
            Ok(mut config) => {
                let changed = config.language != language;
                config.language = language.clone();
                changed
            }
            Err(_) => false,
        };
        if changed {
            let _ = self
                .event_tx
                .send(TransportEvent::LanguageChanged(language));
        }
    }

    fn is_connected(&self) -> bool {
        matches!(*self.state_tx.borrow(), ConnectionState::Connected)
    }

    fn set_state(&self, state: ConnectionState) {
        let _ = self.state_tx.send(state);
    }
}
