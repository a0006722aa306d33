//! Voice session controller: binds capture, VAD, transport, and playback
//! into one session state machine.
//!
//! All mutable session state lives inside a single actor task, so frame
//! routing and state transitions have exactly one writer. Capture and
//! playback completion events arrive on crossbeam channels from audio
//! threads and are bridged onto the actor's mailbox.

use crate::audio::frames::CaptureEvent;
use crate::audio::playback::AudioSink;
use crate::audio::vad::SpeechEvent;
use crate::error::Result;
use crate::session::transcript::{Transcript, TranscriptEntry};
use crate::transport::protocol::VoiceState;
use crate::transport::ws::{ConnectionState, RealtimeTransport, TransportEvent};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, watch};

fn lock_transcript(transcript: &Mutex<Transcript>) -> MutexGuard<'_, Transcript> {
    transcript.lock().unwrap_or_else(|e| e.into_inner())
}

/// Starts and stops the capture pipeline on behalf of the session.
///
/// The session never touches audio devices directly; this seam keeps the
/// state machine testable without hardware.
pub trait CaptureControl: Send {
    /// Begin capturing. Idempotent.
    fn start(&mut self) -> Result<()>;
    /// Stop capturing. Idempotent.
    fn stop(&mut self);
    fn is_active(&self) -> bool;
}

/// Production capture control: spawns the capture engine on demand from
/// an audio-source factory.
pub struct EngineCaptureControl {
    factory: Box<dyn Fn() -> Result<Box<dyn crate::audio::source::AudioSource>> + Send>,
    config: crate::audio::frames::CaptureConfig,
    tx: crossbeam_channel::Sender<CaptureEvent>,
    handle: Option<crate::audio::frames::CaptureHandle>,
}

impl EngineCaptureControl {
    pub fn new(
        factory: Box<dyn Fn() -> Result<Box<dyn crate::audio::source::AudioSource>> + Send>,
        config: crate::audio::frames::CaptureConfig,
        tx: crossbeam_channel::Sender<CaptureEvent>,
    ) -> Self {
        Self {
            factory,
            config,
            tx,
            handle: None,
        }
    }
}

impl CaptureControl for EngineCaptureControl {
    fn start(&mut self) -> Result<()> {
        if self.handle.is_some() {
            return Ok(());
        }
        let source = (self.factory)()?;
        let handle =
            crate::audio::frames::spawn_capture(source, self.config.clone(), self.tx.clone())?;
        self.handle = Some(handle);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.stop();
        }
    }

    fn is_active(&self) -> bool {
        self.handle.is_some()
    }
}

/// Notifications the session emits to the UI layer.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Connection(ConnectionState),
    State(VoiceState),
    Transcript(TranscriptEntry),
    TranscriptCleared,
    /// Capture level for meters, 0.0..=1.0.
    Level(f32),
    /// Active recognition language changed (locally or server-driven).
    Language(String),
    /// A connection failure, surfaced once per failure.
    Error(String),
}

enum SessionCommand {
    Connect,
    Disconnect,
    ToggleRecording,
    SetMuted(bool),
    Reset,
    SetLanguage(String),
}

enum SessionMsg {
    Command(SessionCommand),
    Capture(CaptureEvent),
    PlaybackFinished,
}

/// Handle to a running voice session.
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::UnboundedSender<SessionMsg>,
    voice_rx: watch::Receiver<VoiceState>,
    transcript: Arc<Mutex<Transcript>>,
}

impl SessionHandle {
    pub fn connect(&self) {
        let _ = self.tx.send(SessionMsg::Command(SessionCommand::Connect));
    }

    pub fn disconnect(&self) {
        let _ = self.tx.send(SessionMsg::Command(SessionCommand::Disconnect));
    }

    /// Start recording if idle, or finish the current utterance if
    /// already recording.
    pub fn toggle_recording(&self) {
        let _ = self
            .tx
            .send(SessionMsg::Command(SessionCommand::ToggleRecording));
    }

    pub fn set_muted(&self, muted: bool) {
        let _ = self.tx.send(SessionMsg::Command(SessionCommand::SetMuted(muted)));
    }

    /// Clear the conversation on both ends.
    pub fn reset(&self) {
        let _ = self.tx.send(SessionMsg::Command(SessionCommand::Reset));
    }

    pub fn set_language(&self, language: impl Into<String>) {
        let _ = self
            .tx
            .send(SessionMsg::Command(SessionCommand::SetLanguage(language.into())));
    }

    pub fn voice_state(&self) -> VoiceState {
        *self.voice_rx.borrow()
    }

    pub fn subscribe_voice_state(&self) -> watch::Receiver<VoiceState> {
        self.voice_rx.clone()
    }

    /// Snapshot of the conversation so far.
    pub fn transcript(&self) -> Vec<TranscriptEntry> {
        lock_transcript(&self.transcript).entries().to_vec()
    }

    /// Latest transcribed user utterance, if any.
    pub fn current_transcription(&self) -> Option<String> {
        lock_transcript(&self.transcript)
            .last_user()
            .map(|e| e.text.clone())
    }

    /// Latest assistant response, if any.
    pub fn current_ai_response(&self) -> Option<String> {
        lock_transcript(&self.transcript)
            .last_assistant()
            .map(|e| e.text.clone())
    }
}

/// Spawns the session actor.
///
/// `capture_events` carries frames and speech events from the capture
/// engine; `playback_done` fires when queued playback drains. Both are
/// crossbeam channels because their producers are plain audio threads.
pub fn spawn_session(
    transport: RealtimeTransport,
    transport_events: mpsc::UnboundedReceiver<TransportEvent>,
    capture: Box<dyn CaptureControl>,
    capture_events: crossbeam_channel::Receiver<CaptureEvent>,
    sink: Arc<dyn AudioSink>,
    playback_done: crossbeam_channel::Receiver<()>,
) -> (SessionHandle, mpsc::UnboundedReceiver<SessionEvent>) {
    let (msg_tx, msg_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (voice_tx, voice_rx) = watch::channel(VoiceState::Idle);

    // Bridge audio-thread channels onto the actor mailbox.
    let capture_bridge = msg_tx.clone();
    std::thread::spawn(move || {
        for event in capture_events.iter() {
            if capture_bridge.send(SessionMsg::Capture(event)).is_err() {
                break;
            }
        }
    });
    let playback_bridge = msg_tx.clone();
    std::thread::spawn(move || {
        for () in playback_done.iter() {
            if playback_bridge.send(SessionMsg::PlaybackFinished).is_err() {
                break;
            }
        }
    });

    let transcript = Arc::new(Mutex::new(Transcript::new()));
    let actor = SessionActor {
        transport,
        capture,
        sink,
        event_tx,
        voice_tx,
        transcript: Arc::clone(&transcript),
        muted: false,
        failure_surfaced: false,
    };
    tokio::spawn(actor.run(msg_rx, transport_events));

    (
        SessionHandle {
            tx: msg_tx,
            voice_rx,
            transcript,
        },
        event_rx,
    )
}

struct SessionActor {
    transport: RealtimeTransport,
    capture: Box<dyn CaptureControl>,
    sink: Arc<dyn AudioSink>,
    event_tx: mpsc::UnboundedSender<SessionEvent>,
    voice_tx: watch::Sender<VoiceState>,
    transcript: Arc<Mutex<Transcript>>,
    muted: bool,
    failure_surfaced: bool,
}

impl SessionActor {
    async fn run(
        mut self,
        mut msg_rx: mpsc::UnboundedReceiver<SessionMsg>,
        mut transport_events: mpsc::UnboundedReceiver<TransportEvent>,
    ) {
        let mut conn_rx = self.transport.subscribe_state();

        loop {
            tokio::select! {
                msg = msg_rx.recv() => match msg {
                    None => break,
                    Some(SessionMsg::Command(cmd)) => self.handle_command(cmd),
                    Some(SessionMsg::Capture(event)) => self.handle_capture(event),
                    Some(SessionMsg::PlaybackFinished) => self.handle_playback_finished(),
                },
                event = transport_events.recv() => match event {
                    None => break,
                    Some(event) => self.handle_transport(event),
                },
                changed = conn_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let state = conn_rx.borrow_and_update().clone();
                    self.handle_connection(state);
                }
            }
        }

        self.capture.stop();
        self.sink.stop();
    }

    fn handle_command(&mut self, cmd: SessionCommand) {
        match cmd {
            SessionCommand::Connect => self.transport.connect(),
            SessionCommand::Disconnect => {
                self.transport.disconnect();
                self.capture.stop();
                self.sink.stop();
                self.set_voice_state(VoiceState::Idle);
            }
            SessionCommand::ToggleRecording => {
                if self.capture.is_active() {
                    // Manual stop finishes the utterance.
                    self.capture.stop();
                    self.transport.send_end_utterance();
                    self.set_voice_state(VoiceState::Thinking);
                } else {
                    self.start_recording();
                }
            }
            SessionCommand::SetMuted(muted) => {
                self.muted = muted;
                if muted && self.capture.is_active() {
                    self.capture.stop();
                }
            }
            SessionCommand::Reset => {
                self.sink.stop();
                self.transport.send_reset();
                lock_transcript(&self.transcript).clear();
                self.emit(SessionEvent::TranscriptCleared);
                self.set_voice_state(VoiceState::Idle);
            }
            SessionCommand::SetLanguage(language) => {
                let mut config = self.transport.session_config();
                config.language = language.clone();
                self.transport.update_config(config);
                self.emit(SessionEvent::Language(language));
            }
        }
    }

    fn start_recording(&mut self) {
        if self.muted {
            eprintln!("voxlink: ignoring record request while muted");
            return;
        }
        if self.sink.is_playing() {
            eprintln!("voxlink: ignoring record request during playback");
            return;
        }
        if self.transport.state() != ConnectionState::Connected {
            eprintln!("voxlink: ignoring record request, not connected");
            return;
        }
        // Recording only makes sense when the server could accept speech.
        if !matches!(self.voice_state(), VoiceState::Idle | VoiceState::Listening) {
            eprintln!("voxlink: ignoring record request in {:?} state", self.voice_state());
            return;
        }
        match self.capture.start() {
            Ok(()) => self.set_voice_state(VoiceState::Listening),
            // The session stays non-listening; no retry storm.
            Err(e) => eprintln!("voxlink: failed to start capture: {e}"),
        }
    }

    fn handle_capture(&mut self, event: CaptureEvent) {
        match event {
            CaptureEvent::Frame(frame) => {
                self.emit(SessionEvent::Level(frame.level.min(1.0)));
                // Speaking is included so barge-in probes still flow.
                if matches!(
                    self.voice_state(),
                    VoiceState::Listening | VoiceState::Speaking
                ) {
                    self.transport.send_audio(&frame.samples);
                }
            }
            CaptureEvent::Speech(SpeechEvent::SpeechStarted) => match self.voice_state() {
                VoiceState::Speaking => {
                    // Barge-in: silence the assistant, tell the server,
                    // and optimistically flip to Listening ahead of the
                    // server's state event.
                    self.sink.stop();
                    self.transport.send_interrupt();
                    self.set_voice_state(VoiceState::Listening);
                    self.transport.send_speech_started();
                }
                VoiceState::Listening => self.transport.send_speech_started(),
                _ => {}
            },
            CaptureEvent::Speech(SpeechEvent::SpeechEnded) => {
                if self.voice_state() == VoiceState::Listening {
                    self.transport.send_end_utterance();
                    self.set_voice_state(VoiceState::Thinking);
                }
            }
        }
    }

    fn handle_transport(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => {}
            TransportEvent::State(state) => self.apply_server_state(state),
            TransportEvent::Transcription(text) => {
                let entry = lock_transcript(&self.transcript).push(text, true);
                self.emit(SessionEvent::Transcript(entry));
            }
            TransportEvent::AiResponse(text) => {
                let entry = lock_transcript(&self.transcript).push(text, false);
                self.emit(SessionEvent::Transcript(entry));
            }
            TransportEvent::Audio(payload) => {
                // The audio device is exclusive: capture stops before
                // playback starts, always.
                if self.capture.is_active() {
                    self.capture.stop();
                }
                if let Err(e) = self.sink.play(&payload) {
                    eprintln!("voxlink: playback failed: {e}");
                }
            }
            TransportEvent::LanguageChanged(language) => {
                self.emit(SessionEvent::Language(language));
            }
        }
    }

    fn apply_server_state(&mut self, state: VoiceState) {
        match state {
            VoiceState::Idle => {
                self.capture.stop();
                self.sink.stop();
            }
            VoiceState::Listening => {
                if !self.capture.is_active() && !self.sink.is_playing() && !self.muted {
                    if let Err(e) = self.capture.start() {
                        eprintln!("voxlink: failed to start capture: {e}");
                    }
                }
            }
            VoiceState::Transcribing | VoiceState::Thinking => {
                // The server is processing; keep the microphone closed.
                self.capture.stop();
            }
            VoiceState::Speaking => {
                // Playback is driven by arriving audio frames.
            }
        }
        self.set_voice_state(state);
    }

    fn handle_playback_finished(&mut self) {
        // Hand the microphone back only if the server still expects us
        // to be listening.
        if self.voice_state() == VoiceState::Listening
            && !self.capture.is_active()
            && !self.muted
            && let Err(e) = self.capture.start()
        {
            eprintln!("voxlink: failed to resume capture: {e}");
        }
    }

    fn handle_connection(&mut self, state: ConnectionState) {
        match &state {
            ConnectionState::Failed(reason) => {
                if !self.failure_surfaced {
                    self.failure_surfaced = true;
                    self.emit(SessionEvent::Error(reason.clone()));
                }
            }
            ConnectionState::Connected => self.failure_surfaced = false,
            ConnectionState::Disconnected | ConnectionState::Connecting => {}
        }
        self.emit(SessionEvent::Connection(state));
    }

    fn voice_state(&self) -> VoiceState {
        *self.voice_tx.borrow()
    }

    fn set_voice_state(&mut self, state: VoiceState) {
        if self.voice_state() != state {
            let _ = self.voice_tx.send(state);
            self.emit(SessionEvent::State(state));
        }
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.event_tx.send(event);
    }
}
