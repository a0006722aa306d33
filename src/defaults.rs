//! Default configuration constants for voxlink.
//!
//! Shared constants used across the capture, detection, transport, and
//! session layers, kept in one place so the tuning stays consistent.

/// Audio sample rate in Hz for capture and outbound frames.
///
/// 16kHz mono is what the realtime voice backend expects; it is also the
/// standard rate for speech processing, balancing quality against bandwidth.
pub const SAMPLE_RATE: u32 = 16000;

/// Nominal number of samples per outbound audio frame.
///
/// Capture buffers are re-sliced into frames of this size before filtering
/// and transmission (~256ms at 16kHz). A trailing short frame at the end of
/// a capture read is sent as-is rather than padded.
pub const FRAME_SAMPLES: usize = 4096;

/// RMS level above which a frame counts toward the speech trigger (0.0 to 1.0).
///
/// 0.03 is tuned against typical phone/headset microphone noise floors;
/// lower values fire on keyboard and breath noise.
pub const SPEECH_THRESHOLD: f32 = 0.03;

/// Sustained above-threshold time before speech is considered started.
///
/// Filters out single-frame transients (door slams, clicks) without adding
/// perceptible latency to genuine speech onsets.
pub const MIN_SPEECH_MS: u32 = 100;

/// Sustained silence before an utterance is considered ended.
///
/// 1200ms allows natural mid-sentence pauses without cutting the speaker off.
pub const SILENCE_DURATION_MS: u32 = 1200;

/// DC-blocking high-pass filter feedback coefficient.
///
/// `y[n] = x[n] - x[n-1] + R * y[n-1]` with R = 0.95 puts the cutoff around
/// 120Hz at a 16kHz sample rate, removing DC offset and rumble while leaving
/// the voice band untouched.
pub const DC_BLOCKER_R: f32 = 0.95;

/// Interval between keepalive pings while connected, in seconds.
pub const KEEPALIVE_SECS: u64 = 30;

/// Maximum automatic reconnect attempts before giving up.
///
/// After this many failures the transport stays in `Failed` until the caller
/// connects manually again.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Cap on the exponential reconnect backoff, in seconds.
pub const RECONNECT_CAP_SECS: u64 = 30;

/// Sample rate declared in the synthetic WAV header wrapped around
/// unrecognized raw PCM playback payloads.
///
/// The TTS backend emits 48kHz PCM when it does not send a container header.
pub const FALLBACK_PLAYBACK_RATE: u32 = 48000;

/// Minimum payload length for synthetic-header wrapping.
///
/// Anything unrecognized at or below a WAV header's own size (44 bytes)
/// cannot be a meaningful raw PCM payload and is rejected with a
/// playback error instead of being wrapped.
pub const MIN_RAW_PCM_LEN: usize = 44;

/// Default voice session language tag.
pub const DEFAULT_LANGUAGE: &str = "uz-UZ";

/// Default synthesis voice name.
pub const DEFAULT_VOICE: &str = "default";
