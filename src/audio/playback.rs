//! Audio playback for server-sent voice payloads.
//!
//! Payloads arrive as opaque bytes. Containers we recognize (WAV, FLAC,
//! Ogg, MP3) are passed straight to the decoder; anything else long
//! enough to plausibly be raw PCM gets a synthesized WAV header so the
//! decoder can handle it uniformly.

use crate::defaults;
use crate::error::{Result, VoxlinkError};
use std::io::Cursor;

/// Audio container identified by magic bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    Wav,
    Flac,
    Ogg,
    Mp3,
}

/// Identify a payload's container from its leading bytes.
pub fn sniff_format(payload: &[u8]) -> Option<AudioFormat> {
    match payload {
        [b'R', b'I', b'F', b'F', ..] => Some(AudioFormat::Wav),
        [b'f', b'L', b'a', b'C', ..] => Some(AudioFormat::Flac),
        [b'O', b'g', b'g', b'S', ..] => Some(AudioFormat::Ogg),
        [b'I', b'D', b'3', ..] => Some(AudioFormat::Mp3),
        // MPEG frame sync: 11 set bits.
        [first, second, ..] if *first == 0xFF && second & 0xE0 == 0xE0 => Some(AudioFormat::Mp3),
        _ => None,
    }
}

/// Make a payload decodable: recognized containers pass through untouched,
/// unrecognized payloads are treated as raw 16-bit mono PCM and wrapped in
/// a WAV header at the fallback rate.
///
/// # Errors
/// Returns `AudioPlayback` if the payload is unrecognized and too short to
/// be raw PCM.
pub fn prepare_payload(payload: &[u8]) -> Result<Vec<u8>> {
    if sniff_format(payload).is_some() {
        return Ok(payload.to_vec());
    }

    if payload.len() <= defaults::MIN_RAW_PCM_LEN {
        return Err(VoxlinkError::AudioPlayback {
            message: format!(
                "unrecognized audio payload ({} bytes, no known container magic)",
                payload.len()
            ),
        });
    }

    wrap_raw_pcm(payload)
}

/// Wrap little-endian 16-bit mono PCM bytes in a WAV container at the
/// fallback playback rate. A trailing odd byte is dropped.
fn wrap_raw_pcm(pcm: &[u8]) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: defaults::FALLBACK_PLAYBACK_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::with_capacity(pcm.len() + 44));
    let mut writer =
        hound::WavWriter::new(&mut cursor, spec).map_err(|e| VoxlinkError::AudioPlayback {
            message: format!("Failed to create WAV writer: {}", e),
        })?;

    {
        let mut i16_writer = writer.get_i16_writer((pcm.len() / 2) as u32);
        for pair in pcm.chunks_exact(2) {
            i16_writer.write_sample(i16::from_le_bytes([pair[0], pair[1]]));
        }
        i16_writer.flush().map_err(|e| VoxlinkError::AudioPlayback {
            message: format!("Failed to write WAV data: {}", e),
        })?;
    }

    writer.finalize().map_err(|e| VoxlinkError::AudioPlayback {
        message: format!("Failed to finalize WAV data: {}", e),
    })?;

    Ok(cursor.into_inner())
}

/// Trait for playback devices.
///
/// This trait allows swapping implementations (real speaker vs mock).
pub trait AudioSink: Send + Sync {
    /// Queue a payload for playback.
    fn play(&self, payload: &[u8]) -> Result<()>;

    /// Stop immediately and discard everything queued.
    fn stop(&self);

    /// True while audio is playing or queued.
    fn is_playing(&self) -> bool;
}

/// Mock playback sink for testing. Records everything played.
#[derive(Debug, Clone, Default)]
pub struct MockAudioSink {
    inner: std::sync::Arc<std::sync::Mutex<MockSinkState>>,
}

#[derive(Debug, Default)]
struct MockSinkState {
    played: Vec<Vec<u8>>,
    stop_calls: u32,
    playing: bool,
    should_fail: bool,
}

impl MockAudioSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, MockSinkState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Configure the mock to fail every `play` call.
    pub fn with_play_failure(self) -> Self {
        self.lock_state().should_fail = true;
        self
    }

    /// Payloads passed to `play`, in order (post-preparation bytes).
    pub fn played(&self) -> Vec<Vec<u8>> {
        self.lock_state().played.clone()
    }

    pub fn stop_calls(&self) -> u32 {
        self.lock_state().stop_calls
    }

    /// Simulate playback finishing on its own.
    pub fn finish_playback(&self) {
        self.lock_state().playing = false;
    }
}

impl AudioSink for MockAudioSink {
    fn play(&self, payload: &[u8]) -> Result<()> {
        let prepared = prepare_payload(payload)?;
        let mut state = self.lock_state();
        if state.should_fail {
            return Err(VoxlinkError::AudioPlayback {
                message: "mock playback error".to_string(),
            });
        }
        state.played.push(prepared);
        state.playing = true;
        Ok(())
    }

    fn stop(&self) {
        let mut state = self.lock_state();
        state.stop_calls += 1;
        state.playing = false;
    }

    fn is_playing(&self) -> bool {
        self.lock_state().playing
    }
}

#[cfg(feature = "rodio-playback")]
pub use rodio_sink::RodioAudioSink;

#[cfg(feature = "rodio-playback")]
mod rodio_sink {
    use super::{prepare_payload, AudioSink};
    use crate::error::{Result, VoxlinkError};
    use crossbeam_channel::Sender;
    use rodio::{OutputStream, OutputStreamHandle, Sink, Source};
    use std::io::Cursor;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread::JoinHandle;
    use std::time::Duration;

    /// Speaker playback via a `rodio::Sink`.
    ///
    /// `stop` doubles as the barge-in kill-switch: it clears the queue so
    /// the assistant falls silent immediately. An optional watcher thread
    /// reports when queued audio drains, so the session can hand the
    /// microphone back.
    pub struct RodioAudioSink {
        _stream: OutputStream,
        _stream_handle: OutputStreamHandle,
        sink: Arc<Sink>,
        watcher_running: Arc<AtomicBool>,
        watcher: Option<JoinHandle<()>>,
    }

    impl RodioAudioSink {
        /// Open the default output device.
        ///
        /// # Errors
        /// Returns `AudioPlayback` if no output device is available.
        pub fn new() -> Result<Self> {
            let (stream, stream_handle) =
                OutputStream::try_default().map_err(|e| VoxlinkError::AudioPlayback {
                    message: format!("Failed to open output device: {}", e),
                })?;
            let sink = Sink::try_new(&stream_handle).map_err(|e| VoxlinkError::AudioPlayback {
                message: format!("Failed to create playback sink: {}", e),
            })?;

            Ok(Self {
                _stream: stream,
                _stream_handle: stream_handle,
                sink: Arc::new(sink),
                watcher_running: Arc::new(AtomicBool::new(false)),
                watcher: None,
            })
        }

        /// Spawn a watcher that sends one notification each time the queue
        /// drains to empty after having played something.
        pub fn with_completion_notify(mut self, tx: Sender<()>) -> Self {
            let sink = Arc::clone(&self.sink);
            let running = Arc::clone(&self.watcher_running);
            running.store(true, Ordering::SeqCst);

            let thread_running = Arc::clone(&running);
            self.watcher = Some(std::thread::spawn(move || {
                let mut was_active = false;
                while thread_running.load(Ordering::SeqCst) {
                    let active = !sink.empty();
                    if was_active && !active && tx.send(()).is_err() {
                        break;
                    }
                    was_active = active;
                    std::thread::sleep(Duration::from_millis(50));
                }
            }));
            self
        }
    }

    impl AudioSink for RodioAudioSink {
        fn play(&self, payload: &[u8]) -> Result<()> {
            let prepared = prepare_payload(payload)?;
            let source = rodio::Decoder::new(Cursor::new(prepared)).map_err(|e| {
                VoxlinkError::AudioPlayback {
                    message: format!("Failed to decode audio payload: {}", e),
                }
            })?;
            self.sink.append(source.convert_samples::<f32>());
            Ok(())
        }

        fn stop(&self) {
            self.sink.stop();
        }

        fn is_playing(&self) -> bool {
            !self.sink.empty()
        }
    }

    impl Drop for RodioAudioSink {
        fn drop(&mut self) {
            self.watcher_running.store(false, Ordering::SeqCst);
            if let Some(handle) = self.watcher.take() {
                let _ = handle.join();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sniff_known_containers() {
        assert_eq!(sniff_format(b"RIFF....WAVE"), Some(AudioFormat::Wav));
        assert_eq!(sniff_format(b"fLaC...."), Some(AudioFormat::Flac));
        assert_eq!(sniff_format(b"OggS...."), Some(AudioFormat::Ogg));
        assert_eq!(sniff_format(b"ID3....."), Some(AudioFormat::Mp3));
        assert_eq!(sniff_format(&[0xFF, 0xFB, 0x90, 0x00]), Some(AudioFormat::Mp3));
        assert_eq!(sniff_format(&[0xFF, 0xE2, 0x00, 0x00]), Some(AudioFormat::Mp3));
    }

    #[test]
    fn test_sniff_rejects_unknown() {
        assert_eq!(sniff_format(b"not audio data"), None);
        assert_eq!(sniff_format(&[]), None);
        // 0xFF without the full sync pattern is not an MP3 frame.
        assert_eq!(sniff_format(&[0xFF, 0x1F, 0x00]), None);
    }

    #[test]
    fn test_prepare_passes_containers_through_unchanged() {
        let wav = b"RIFF\x24\x00\x00\x00WAVEfmt ".to_vec();
        assert_eq!(prepare_payload(&wav).unwrap(), wav);

        let ogg = b"OggS\x00\x02\x00\x00".to_vec();
        assert_eq!(prepare_payload(&ogg).unwrap(), ogg);
    }

    #[test]
    fn test_prepare_wraps_raw_pcm_in_wav_header() {
        // 100 samples of raw PCM, no container magic.
        let pcm: Vec<u8> = (0..200).map(|i| (i % 251) as u8).collect();
        assert_eq!(sniff_format(&pcm), None);

        let wrapped = prepare_payload(&pcm).unwrap();
        assert_eq!(&wrapped[..4], b"RIFF");
        assert_eq!(&wrapped[8..12], b"WAVE");
        assert_eq!(wrapped.len(), 44 + 200);

        // fmt chunk: mono, 16-bit, fallback rate (48000 = 0xBB80 LE).
        assert_eq!(&wrapped[22..24], &[1, 0]);
        assert_eq!(&wrapped[24..28], &[0x80, 0xBB, 0x00, 0x00]);
        assert_eq!(&wrapped[34..36], &[16, 0]);

        // Sample data carried through verbatim.
        assert_eq!(&wrapped[44..], &pcm[..]);
    }

    #[test]
    fn test_prepare_drops_trailing_odd_byte() {
        let pcm = vec![0u8; 101];
        let wrapped = prepare_payload(&pcm).unwrap();
        assert_eq!(wrapped.len(), 44 + 100);
    }

    #[test]
    fn test_prepare_rejects_short_unknown_payload() {
        let short = vec![0x01u8; 44];
        match prepare_payload(&short) {
            Err(VoxlinkError::AudioPlayback { message }) => {
                assert!(message.contains("44 bytes"));
            }
            other => panic!("Expected AudioPlayback error, got {:?}", other),
        }
    }

    #[test]
    fn test_wrapped_payload_resniffs_as_wav() {
        let pcm = vec![0x55u8; 1000];
        let wrapped = prepare_payload(&pcm).unwrap();
        assert_eq!(sniff_format(&wrapped), Some(AudioFormat::Wav));
    }

    #[test]
    fn test_mock_sink_records_plays_and_stops() {
        let sink = MockAudioSink::new();
        assert!(!sink.is_playing());

        let wav = b"RIFF\x24\x00\x00\x00WAVEfmt ".to_vec();
        sink.play(&wav).unwrap();
        assert!(sink.is_playing());
        assert_eq!(sink.played(), vec![wav]);

        sink.stop();
        assert!(!sink.is_playing());
        assert_eq!(sink.stop_calls(), 1);
    }

    #[test]
    fn test_mock_sink_rejects_bad_payload() {
        let sink = MockAudioSink::new();
        assert!(sink.play(&[0u8; 10]).is_err());
        assert!(sink.played().is_empty());
    }

    #[test]
    fn test_mock_sink_configured_failure() {
        let sink = MockAudioSink::new().with_play_failure();
        let wav = b"RIFF\x24\x00\x00\x00WAVEfmt ".to_vec();
        assert!(sink.play(&wav).is_err());
    }

    #[cfg(feature = "rodio-playback")]
    #[test]
    #[ignore] // Requires audio hardware
    fn test_rodio_sink_plays_raw_pcm() {
        let sink = RodioAudioSink::new().expect("Failed to open output device");
        let pcm = vec![0u8; 9600]; // 50ms of silence at 48kHz
        sink.play(&pcm).expect("Failed to play");
        sink.stop();
    }
}
