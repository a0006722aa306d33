//! Microphone capture using CPAL (Cross-Platform Audio Library).

use crate::audio::source::AudioSource;
use crate::defaults;
use crate::error::{Result, VoxlinkError};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Run a closure with stderr temporarily redirected to /dev/null.
///
/// This suppresses noisy ALSA/JACK/PipeWire messages that CPAL triggers
/// when probing audio backends. The messages are harmless but confusing to users.
///
/// # Safety
/// Uses `libc::dup`/`libc::dup2` to save and restore file descriptor 2 (stderr).
/// Safe as long as no other thread is concurrently manipulating fd 2.
fn with_suppressed_stderr<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    unsafe {
        let saved_fd = libc::dup(2);
        let devnull = libc::open(c"/dev/null".as_ptr(), libc::O_WRONLY);
        if saved_fd >= 0 && devnull >= 0 {
            libc::dup2(devnull, 2);
            libc::close(devnull);
        }

        let result = f();

        if saved_fd >= 0 {
            libc::dup2(saved_fd, 2);
            libc::close(saved_fd);
        }

        result
    }
}

/// Suppress noisy JACK/ALSA messages emitted during audio backend probing.
///
/// # Safety
/// Modifies environment variables, which is safe when called before
/// spawning threads.
pub fn suppress_audio_warnings() {
    // SAFETY: Called at startup before any threads are spawned
    unsafe {
        std::env::set_var("JACK_NO_START_SERVER", "1");
        std::env::set_var("JACK_NO_AUDIO_RESERVATION", "1");
        std::env::set_var("PIPEWIRE_DEBUG", "0");
        std::env::set_var("ALSA_DEBUG", "0");
        std::env::set_var("PW_LOG", "0");
    }
}

/// Preferred device names for GNOME/PipeWire environments.
const PREFERRED_DEVICES: &[&str] = &["pipewire", "pulse", "PulseAudio"];

/// Device name patterns that are never useful for voice input.
const FILTERED_PATTERNS: &[&str] = &[
    "surround",
    "front:",
    "rear:",
    "center:",
    "side:",
    "Digital Output",
    "HDMI",
    "S/PDIF",
];

fn should_filter_device(name: &str) -> bool {
    let lower = name.to_lowercase();
    FILTERED_PATTERNS
        .iter()
        .any(|pattern| lower.contains(&pattern.to_lowercase()))
}

fn is_preferred_device(name: &str) -> bool {
    let lower = name.to_lowercase();
    PREFERRED_DEVICES
        .iter()
        .any(|pref| lower.contains(&pref.to_lowercase()))
}

/// List available audio input devices, filtered and annotated.
///
/// Preferred devices (PipeWire/PulseAudio) are marked with "\[recommended\]";
/// obviously unusable devices (surround channels, HDMI outputs) are dropped.
///
/// # Errors
/// Returns `VoxlinkError::AudioCapture` if device enumeration fails.
pub fn list_devices() -> Result<Vec<String>> {
    let (host, devices) = with_suppressed_stderr(|| {
        let host = cpal::default_host();
        let devices = host.input_devices();
        (host, devices)
    });
    let _ = host; // keep host alive while iterating devices
    let devices = devices.map_err(|e| VoxlinkError::AudioCapture {
        message: format!("Failed to enumerate input devices: {}", e),
    })?;

    let mut names = Vec::new();
    for device in devices {
        if let Ok(name) = device.name() {
            if should_filter_device(&name) {
                continue;
            }
            if is_preferred_device(&name) {
                names.push(format!("{} [recommended]", name));
            } else {
                names.push(name);
            }
        }
    }

    Ok(names)
}

/// Pick the best default input device: PipeWire, then Pulse, then the
/// system default. This respects the desktop's device selection.
fn get_best_default_device() -> Result<cpal::Device> {
    with_suppressed_stderr(|| {
        let host = cpal::default_host();

        if let Ok(devices) = host.input_devices() {
            for device in devices {
                if let Ok(name) = device.name()
                    && is_preferred_device(&name)
                {
                    return Ok(device);
                }
            }
        }

        host.default_input_device()
            .ok_or_else(|| VoxlinkError::AudioDeviceNotFound {
                device: "default".to_string(),
            })
    })
}

/// Wrapper for cpal::Stream to make it Send.
///
/// SAFETY: access is serialized through the Mutex in CpalAudioSource;
/// stream methods never cross thread boundaries concurrently.
struct SendableStream(cpal::Stream);

unsafe impl Send for SendableStream {}

/// Microphone capture via CPAL, producing 16-bit PCM at 16kHz mono.
///
/// Tries the preferred format first (i16/16kHz/mono), then f32 at the same
/// config, then the device's native config with software conversion
/// (channel mixing + resampling). Some PipeWire-ALSA setups accept a
/// non-native config but never fire the data callback, so `start` verifies
/// that data actually arrives before committing to a stream.
pub struct CpalAudioSource {
    device: cpal::Device,
    stream: Arc<Mutex<Option<SendableStream>>>,
    buffer: Arc<Mutex<Vec<i16>>>,
    callback_count: Arc<AtomicU64>,
    sample_rate: u32,
}

impl CpalAudioSource {
    /// Open the named input device, or the best default if `None`.
    ///
    /// # Errors
    /// Returns `AudioDeviceNotFound` if no matching device exists, or
    /// `AudioCapture` if enumeration fails.
    pub fn new(device_name: Option<&str>) -> Result<Self> {
        let device = with_suppressed_stderr(|| {
            let host = cpal::default_host();

            if let Some(name) = device_name {
                let devices = host
                    .input_devices()
                    .map_err(|e| VoxlinkError::AudioCapture {
                        message: format!("Failed to enumerate devices: {}", e),
                    })?;

                devices
                    .into_iter()
                    .find(|dev| dev.name().map(|n| n == name).unwrap_or(false))
                    .ok_or_else(|| VoxlinkError::AudioDeviceNotFound {
                        device: name.to_string(),
                    })
            } else {
                get_best_default_device()
            }
        })?;

        Ok(Self {
            device,
            stream: Arc::new(Mutex::new(None)),
            buffer: Arc::new(Mutex::new(Vec::new())),
            callback_count: Arc::new(AtomicU64::new(0)),
            sample_rate: defaults::SAMPLE_RATE,
        })
    }

    /// Build a stream at the preferred config (16kHz mono), trying i16
    /// then f32 sample formats.
    fn build_preferred_stream(&self) -> Option<cpal::Stream> {
        let preferred_config = cpal::StreamConfig {
            channels: 1,
            sample_rate: cpal::SampleRate(self.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let err_callback = |err| {
            eprintln!("voxlink: audio stream error: {}", err);
        };

        let buffer = Arc::clone(&self.buffer);
        let counter = Arc::clone(&self.callback_count);
        if let Ok(stream) = self.device.build_input_stream(
            &preferred_config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                counter.fetch_add(1, Ordering::Relaxed);
                if let Ok(mut buf) = buffer.lock() {
                    buf.extend_from_slice(data);
                }
            },
            err_callback,
            None,
        ) {
            return Some(stream);
        }

        let buffer = Arc::clone(&self.buffer);
        let counter = Arc::clone(&self.callback_count);
        self.device
            .build_input_stream(
                &preferred_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    counter.fetch_add(1, Ordering::Relaxed);
                    if let Ok(mut buf) = buffer.lock() {
                        buf.extend(
                            data.iter()
                                .map(|&s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16),
                        );
                    }
                },
                err_callback,
                None,
            )
            .ok()
    }

    /// Build a stream at the device's native config, mixing to mono and
    /// resampling to 16kHz in the callback.
    fn build_native_stream(&self) -> Result<cpal::Stream> {
        use cpal::SampleFormat;

        let default_config =
            self.device
                .default_input_config()
                .map_err(|e| VoxlinkError::AudioCapture {
                    message: format!("Failed to query default input config: {}", e),
                })?;

        let native_rate = default_config.sample_rate().0;
        let native_channels = default_config.channels() as usize;
        let target_rate = self.sample_rate;

        let stream_config: cpal::StreamConfig = default_config.clone().into();

        eprintln!(
            "voxlink: using native audio format ({}ch/{}Hz/{:?}), converting in software",
            native_channels,
            native_rate,
            default_config.sample_format(),
        );

        let err_callback = |err| {
            eprintln!("voxlink: audio stream error: {}", err);
        };

        let buffer = Arc::clone(&self.buffer);
        let counter = Arc::clone(&self.callback_count);

        match default_config.sample_format() {
            SampleFormat::I16 => self
                .device
                .build_input_stream(
                    &stream_config,
                    move |data: &[i16], _: &cpal::InputCallbackInfo| {
                        counter.fetch_add(1, Ordering::Relaxed);
                        let converted =
                            mix_and_resample(data, native_channels, native_rate, target_rate);
                        if let Ok(mut buf) = buffer.lock() {
                            buf.extend_from_slice(&converted);
                        }
                    },
                    err_callback,
                    None,
                )
                .map_err(|e| VoxlinkError::AudioCapture {
                    message: format!("Failed to build native i16 stream: {}", e),
                }),
            SampleFormat::F32 => self
                .device
                .build_input_stream(
                    &stream_config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        counter.fetch_add(1, Ordering::Relaxed);
                        let i16_data: Vec<i16> = data
                            .iter()
                            .map(|&s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
                            .collect();
                        let converted =
                            mix_and_resample(&i16_data, native_channels, native_rate, target_rate);
                        if let Ok(mut buf) = buffer.lock() {
                            buf.extend_from_slice(&converted);
                        }
                    },
                    err_callback,
                    None,
                )
                .map_err(|e| VoxlinkError::AudioCapture {
                    message: format!("Failed to build native f32 stream: {}", e),
                }),
            fmt => Err(VoxlinkError::AudioCapture {
                message: format!("Unsupported native sample format: {:?}", fmt),
            }),
        }
    }

    /// Start the native-config fallback stream. Retries once after a short
    /// delay: after a device route change the backend can briefly report a
    /// format it is not yet ready to deliver.
    fn start_native_stream(&self) -> Result<cpal::Stream> {
        let stream = match self.build_native_stream() {
            Ok(stream) => stream,
            Err(first_err) => {
                eprintln!(
                    "voxlink: native stream unavailable ({}), retrying shortly",
                    first_err
                );
                std::thread::sleep(std::time::Duration::from_millis(300));
                self.build_native_stream()?
            }
        };
        stream.play().map_err(|e| VoxlinkError::AudioCapture {
            message: format!("Failed to start native audio stream: {}", e),
        })?;
        Ok(stream)
    }
}

/// Mix multi-channel audio to mono and resample to the target rate.
fn mix_and_resample(samples: &[i16], channels: usize, source_rate: u32, target_rate: u32) -> Vec<i16> {
    let mono: Vec<i16> = if channels == 1 {
        samples.to_vec()
    } else {
        samples
            .chunks_exact(channels)
            .map(|frame| {
                let sum: i32 = frame.iter().map(|&s| i32::from(s)).sum();
                (sum / channels as i32) as i16
            })
            .collect()
    };

    if source_rate == target_rate {
        mono
    } else {
        resample(&mono, source_rate, target_rate)
    }
}

/// Linear-interpolation resampler for mono i16 audio.
///
/// Good enough for speech; not intended for music.
fn resample(samples: &[i16], source_rate: u32, target_rate: u32) -> Vec<i16> {
    if source_rate == target_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = f64::from(source_rate) / f64::from(target_rate);
    let out_len = (samples.len() as f64 / ratio).floor() as usize;
    let mut out = Vec::with_capacity(out_len);

    for i in 0..out_len {
        let pos = i as f64 * ratio;
        let idx = pos.floor() as usize;
        let frac = pos - idx as f64;

        let a = f64::from(samples[idx]);
        let b = f64::from(samples[(idx + 1).min(samples.len() - 1)]);
        out.push((a + (b - a) * frac).round() as i16);
    }

    out
}

impl AudioSource for CpalAudioSource {
    fn start(&mut self) -> Result<()> {
        {
            let stream_guard = self.stream.lock().map_err(|e| VoxlinkError::AudioCapture {
                message: format!("Failed to lock stream: {}", e),
            })?;
            if stream_guard.is_some() {
                return Ok(()); // Already started
            }
        }

        self.callback_count.store(0, Ordering::Relaxed);

        let final_stream = match self.build_preferred_stream() {
            Some(stream) => {
                stream.play().map_err(|e| VoxlinkError::AudioCapture {
                    message: format!("Failed to start audio stream: {}", e),
                })?;

                // Verify the callback actually fires before committing.
                std::thread::sleep(std::time::Duration::from_millis(200));

                if self.callback_count.load(Ordering::Relaxed) == 0 {
                    drop(stream);
                    if let Ok(mut buf) = self.buffer.lock() {
                        buf.clear();
                    }
                    self.start_native_stream()?
                } else {
                    stream
                }
            }
            None => self.start_native_stream()?,
        };

        let mut stream_guard = self.stream.lock().map_err(|e| VoxlinkError::AudioCapture {
            message: format!("Failed to lock stream: {}", e),
        })?;
        *stream_guard = Some(SendableStream(final_stream));
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        let mut stream_guard = self.stream.lock().map_err(|e| VoxlinkError::AudioCapture {
            message: format!("Failed to lock stream: {}", e),
        })?;

        if let Some(sendable) = stream_guard.take() {
            sendable.0.pause().map_err(|e| VoxlinkError::AudioCapture {
                message: format!("Failed to stop audio stream: {}", e),
            })?;
        }
        Ok(())
    }

    fn read_samples(&mut self) -> Result<Vec<i16>> {
        let mut buffer = self.buffer.lock().map_err(|e| VoxlinkError::AudioCapture {
            message: format!("Failed to lock audio buffer: {}", e),
        })?;

        Ok(std::mem::take(&mut *buffer))
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_filter_device() {
        assert!(should_filter_device("surround51"));
        assert!(should_filter_device("front:CARD=PCH"));
        assert!(should_filter_device("HDMI Output"));
        assert!(should_filter_device("Digital Output S/PDIF"));
        assert!(!should_filter_device("pipewire"));
        assert!(!should_filter_device("Built-in Audio"));
    }

    #[test]
    fn test_is_preferred_device() {
        assert!(is_preferred_device("pipewire"));
        assert!(is_preferred_device("PipeWire"));
        assert!(is_preferred_device("PulseAudio"));
        assert!(!is_preferred_device("hw:0,0"));
        assert!(!is_preferred_device("default"));
    }

    #[test]
    fn test_mix_stereo_to_mono_averages_channels() {
        let stereo = vec![100i16, 200, -100, -200, 0, 1000];
        let mono = mix_and_resample(&stereo, 2, 16000, 16000);
        assert_eq!(mono, vec![150, -150, 500]);
    }

    #[test]
    fn test_mono_passthrough_at_target_rate() {
        let samples = vec![1i16, 2, 3, 4];
        assert_eq!(mix_and_resample(&samples, 1, 16000, 16000), samples);
    }

    #[test]
    fn test_resample_halves_length_for_double_rate() {
        let samples: Vec<i16> = (0..1000).map(|i| (i % 100) as i16).collect();
        let out = resample(&samples, 32000, 16000);
        assert_eq!(out.len(), 500);
    }

    #[test]
    fn test_resample_preserves_constant_signal() {
        let samples = vec![500i16; 480];
        let out = resample(&samples, 48000, 16000);
        assert_eq!(out.len(), 160);
        assert!(out.iter().all(|&s| s == 500));
    }

    #[test]
    fn test_resample_empty_input() {
        assert!(resample(&[], 48000, 16000).is_empty());
    }

    #[test]
    fn test_create_with_invalid_device_name() {
        let source = CpalAudioSource::new(Some("NonExistentDevice12345"));
        match source {
            Err(VoxlinkError::AudioDeviceNotFound { device }) => {
                assert_eq!(device, "NonExistentDevice12345");
            }
            Ok(_) => panic!("Expected AudioDeviceNotFound error"),
            Err(other) => panic!("Expected AudioDeviceNotFound, got {:?}", other),
        }
    }

    #[test]
    #[ignore] // Requires audio hardware
    fn test_list_devices_returns_at_least_one_device() {
        let devices = list_devices().expect("Failed to list devices");
        assert!(!devices.is_empty(), "Expected at least one audio device");
    }

    #[test]
    #[ignore] // Requires audio hardware
    fn test_capture_start_read_stop() {
        let mut source = CpalAudioSource::new(None).expect("Failed to create audio source");

        source.start().expect("Failed to start audio capture");
        std::thread::sleep(std::time::Duration::from_millis(100));
        source.read_samples().expect("Failed to read samples");
        source.stop().expect("Failed to stop audio capture");
    }
}
