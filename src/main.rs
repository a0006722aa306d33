use anyhow::{Context, Result, bail};
use clap::Parser;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use voxlink::audio::capture::{CpalAudioSource, list_devices, suppress_audio_warnings};
use voxlink::audio::frames::{CaptureConfig, CaptureEvent};
use voxlink::audio::playback::{AudioSink, RodioAudioSink};
use voxlink::audio::vad::SpeechDetectorConfig;
use voxlink::cli::{Cli, Commands};
use voxlink::config::Config;
use voxlink::session::{EngineCaptureControl, SessionEvent, spawn_session};
use voxlink::transport::auth::{HttpSettingsProvider, HttpTokenProvider, fetch_voice_preview};
use voxlink::transport::protocol::SessionConfig;
use voxlink::transport::ws::{ConnectionState, RealtimeTransport, TungsteniteConnector};
use voxlink::transport::TokenProvider;

#[tokio::main]
async fn main() -> Result<()> {
    suppress_audio_warnings();
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Devices) => list_audio_devices(),
        Some(Commands::Preview { voice }) => {
            let config = load_config(&cli)?;
            preview_voice(&config, resolve_token(&cli)?, &voice).await
        }
        None => {
            let config = load_config(&cli)?;
            run_session(config, resolve_token(&cli)?).await
        }
    }
}

fn load_config(cli: &Cli) -> Result<Config> {
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => match Config::default_path() {
            Some(path) => Config::load_or_default(&path)?,
            None => Config::default(),
        },
    };
    let mut config = config.with_env_overrides();
    if let Some(device) = &cli.device {
        config.audio.device = Some(device.clone());
    }
    if let Some(language) = &cli.language {
        config.session.language = language.clone();
    }
    if let Some(voice) = &cli.voice {
        config.session.voice = voice.clone();
    }
    Ok(config)
}

fn resolve_token(cli: &Cli) -> Result<String> {
    if let Some(token) = &cli.token {
        return Ok(token.clone());
    }
    match std::env::var("VOXLINK_REFRESH_TOKEN") {
        Ok(token) if !token.is_empty() => Ok(token),
        _ => bail!("no refresh token; pass --token or set VOXLINK_REFRESH_TOKEN"),
    }
}

fn list_audio_devices() -> Result<()> {
    let devices = list_devices().context("Failed to enumerate audio devices")?;
    if devices.is_empty() {
        println!("No audio input devices found");
    } else {
        println!("Available audio input devices:");
        for device in devices {
            println!("  {}", device);
        }
    }
    Ok(())
}

async fn preview_voice(config: &Config, refresh_token: String, voice: &str) -> Result<()> {
    let client = reqwest::Client::new();
    let tokens = HttpTokenProvider::new(client.clone(), config.server.base_url.clone(), refresh_token);
    let token = tokens.refresh().await?;

    let session_config = SessionConfig {
        language: config.session.language.clone(),
        voice: voice.to_string(),
        role: config.session.role.clone(),
    };
    let payload = fetch_voice_preview(
        &client,
        &config.server.base_url,
        &token,
        &session_config,
        voxlink::session::preview_text(&config.session.language),
    )
    .await?;

    let (done_tx, done_rx) = crossbeam_channel::bounded(1);
    let sink = RodioAudioSink::new()?.with_completion_notify(done_tx);
    sink.play(&payload)?;

    // Block until the preview drains.
    let _ = done_rx.recv();
    Ok(())
}

async fn run_session(config: Config, refresh_token: String) -> Result<()> {
    let client = reqwest::Client::new();
    let tokens = Arc::new(HttpTokenProvider::new(
        client.clone(),
        config.server.base_url.clone(),
        refresh_token,
    ));
    // The transport re-fetches the account's preferred language on every
    // connect, so the session follows settings changed elsewhere.
    let settings = Arc::new(HttpSettingsProvider::new(
        client,
        config.server.base_url.clone(),
    ));

    let session_config = SessionConfig {
        language: config.session.language.clone(),
        voice: config.session.voice.clone(),
        role: config.session.role.clone(),
    };
    let (transport, transport_events) = RealtimeTransport::spawn(
        config.server.realtime_url.clone(),
        Arc::new(TungsteniteConnector),
        tokens,
        Some(settings),
        session_config,
    );

    let capture_config = CaptureConfig {
        frame_samples: voxlink::defaults::FRAME_SAMPLES,
        sample_rate: config.audio.sample_rate,
        detector: SpeechDetectorConfig {
            speech_threshold: config.audio.speech_threshold,
            min_speech_ms: config.audio.min_speech_ms,
            silence_duration_ms: config.audio.silence_duration_ms,
        },
    };
    let (capture_tx, capture_rx) = crossbeam_channel::bounded::<CaptureEvent>(32);
    let device = config.audio.device.clone();
    let capture = EngineCaptureControl::new(
        Box::new(move || {
            CpalAudioSource::new(device.as_deref())
                .map(|s| Box::new(s) as Box<dyn voxlink::audio::source::AudioSource>)
        }),
        capture_config,
        capture_tx,
    );

    let (done_tx, done_rx) = crossbeam_channel::bounded(4);
    let sink = Arc::new(RodioAudioSink::new()?.with_completion_notify(done_tx));

    let (handle, mut events) = spawn_session(
        transport,
        transport_events,
        Box::new(capture),
        capture_rx,
        sink,
        done_rx,
    );

    handle.connect();
    println!("voxlink {}", voxlink::version_string());
    println!("commands: <enter> toggle recording | mute | unmute | lang <tag> | reset | quit");

    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                SessionEvent::Connection(ConnectionState::Connected) => {
                    println!("connected");
                }
                SessionEvent::Connection(ConnectionState::Failed(reason)) => {
                    eprintln!("connection failed: {}", reason);
                }
                SessionEvent::Connection(_) => {}
                SessionEvent::State(state) => println!("[{:?}]", state),
                SessionEvent::Transcript(entry) => {
                    let who = if entry.is_user { "you" } else { "assistant" };
                    println!("{}: {}", who, entry.text);
                }
                SessionEvent::TranscriptCleared => println!("(conversation cleared)"),
                SessionEvent::Language(lang) => {
                    println!("(language: {})", voxlink::session::language_display_name(&lang));
                }
                SessionEvent::Error(message) => eprintln!("error: {}", message),
                SessionEvent::Level(_) => {}
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim();
        match line {
            "" => handle.toggle_recording(),
            "mute" => handle.set_muted(true),
            "unmute" => handle.set_muted(false),
            "reset" => handle.reset(),
            "quit" | "exit" => break,
            other => {
                if let Some(tag) = other.strip_prefix("lang ") {
                    handle.set_language(tag.trim());
                } else {
                    println!("unknown command: {}", other);
                }
            }
        }
    }

    handle.disconnect();
    printer.abort();
    Ok(())
}
