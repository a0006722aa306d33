//! Audio capture, filtering, voice activity detection, and playback.

#[cfg(feature = "cpal-audio")]
pub mod capture;
pub mod filter;
pub mod frames;
pub mod playback;
pub mod source;
pub mod vad;

#[cfg(feature = "cpal-audio")]
pub use capture::{list_devices, suppress_audio_warnings, CpalAudioSource};
pub use filter::{rms, DcBlocker};
pub use frames::{spawn_capture, AudioFrame, CaptureConfig, CaptureEvent, CaptureHandle};
pub use playback::{prepare_payload, sniff_format, AudioFormat, AudioSink, MockAudioSink};
pub use source::{AudioSource, MockAudioSource};
pub use vad::{Clock, SpeechDetector, SpeechDetectorConfig, SpeechEvent, SystemClock};

#[cfg(feature = "rodio-playback")]
pub use playback::RodioAudioSink;
