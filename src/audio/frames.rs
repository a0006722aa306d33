//! Capture engine: polls an [`AudioSource`], filters and frames the
//! samples, and publishes frames plus speech events on a bounded channel.
//!
//! Frames are dropped when the channel is full (the consumer is expected
//! to keep up; stale audio is worse than missing audio for a live
//! session). Speech events are delivered with a blocking send because the
//! session state machine cannot afford to miss one.

use crate::audio::filter::{rms, DcBlocker};
use crate::audio::source::AudioSource;
use crate::audio::vad::{SpeechDetector, SpeechDetectorConfig, SpeechEvent, SystemClock};
use crate::defaults;
use crossbeam_channel::Sender;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// One fixed-size frame of filtered 16-bit PCM, with its RMS level.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub samples: Vec<i16>,
    /// RMS of `samples`, normalized to 0.0..=1.0.
    pub level: f32,
}

/// Events published by the capture engine.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureEvent {
    Frame(AudioFrame),
    Speech(SpeechEvent),
}

/// Accumulates raw capture samples into fixed-size frames, applying the
/// DC-blocking filter in arrival order so filter state is continuous
/// across frame boundaries.
pub struct FrameAssembler {
    filter: DcBlocker,
    pending: Vec<i16>,
    frame_samples: usize,
}

impl FrameAssembler {
    pub fn new(frame_samples: usize) -> Self {
        Self {
            filter: DcBlocker::new(),
            pending: Vec::with_capacity(frame_samples * 2),
            frame_samples,
        }
    }

    /// Filter the incoming samples and return every complete frame they
    /// produce. Leftover samples stay pending for the next call.
    pub fn push(&mut self, samples: &[i16]) -> Vec<AudioFrame> {
        let start = self.pending.len();
        self.pending.extend_from_slice(samples);
        self.filter.process(&mut self.pending[start..]);

        let mut frames = Vec::new();
        while self.pending.len() >= self.frame_samples {
            let rest = self.pending.split_off(self.frame_samples);
            let samples = std::mem::replace(&mut self.pending, rest);
            let level = rms(&samples);
            frames.push(AudioFrame { samples, level });
        }
        frames
    }

    /// Emit any trailing partial frame. Called when capture stops so the
    /// tail of the last utterance is not lost.
    pub fn flush(&mut self) -> Option<AudioFrame> {
        if self.pending.is_empty() {
            return None;
        }
        let samples = std::mem::take(&mut self.pending);
        let level = rms(&samples);
        Some(AudioFrame { samples, level })
    }

    pub fn reset(&mut self) {
        self.filter.reset();
        self.pending.clear();
    }
}

/// Configuration for the capture engine.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub frame_samples: usize,
    pub sample_rate: u32,
    pub detector: SpeechDetectorConfig,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            frame_samples: defaults::FRAME_SAMPLES,
            sample_rate: defaults::SAMPLE_RATE,
            detector: SpeechDetectorConfig::default(),
        }
    }
}

/// Handle to a running capture engine thread.
pub struct CaptureHandle {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl CaptureHandle {
    /// Signals the capture thread to stop and waits for it to finish.
    pub fn stop(mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread.take()
            && handle.join().is_err()
        {
            eprintln!("voxlink: capture thread panicked");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

/// Starts the capture engine on a dedicated thread.
///
/// The engine polls the source at ~60Hz, frames and filters what it reads,
/// and publishes [`CaptureEvent`]s on `tx` until stopped or until the
/// source fails repeatedly.
///
/// # Errors
/// Returns the source's error if it fails to start.
pub fn spawn_capture(
    mut source: Box<dyn AudioSource>,
    config: CaptureConfig,
    tx: Sender<CaptureEvent>,
) -> crate::error::Result<CaptureHandle> {
    source.start()?;

    let running = Arc::new(AtomicBool::new(true));
    let thread_running = running.clone();

    let thread = thread::spawn(move || {
        let poll_interval = Duration::from_millis(16);
        let mut assembler = FrameAssembler::new(config.frame_samples);
        let mut detector = SpeechDetector::with_clock(config.detector, SystemClock);
        let sample_rate = config.sample_rate;

        let mut consecutive_errors: u32 = 0;
        const MAX_CONSECUTIVE_ERRORS: u32 = 10;
        let mut dropped_frames: u64 = 0;

        while thread_running.load(Ordering::SeqCst) {
            let samples = match source.read_samples() {
                Ok(s) => {
                    consecutive_errors = 0;
                    s
                }
                Err(e) => {
                    consecutive_errors += 1;
                    if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                        eprintln!(
                            "voxlink: audio capture failed {consecutive_errors} times in a row: {e}"
                        );
                        eprintln!("voxlink: check your microphone connection and try again");
                        break;
                    }
                    thread::sleep(poll_interval);
                    continue;
                }
            };

            if samples.is_empty() {
                // Empty read is normal while the device warms up.
                thread::sleep(poll_interval);
                continue;
            }

            for frame in assembler.push(&samples) {
                let duration =
                    Duration::from_secs_f64(frame.samples.len() as f64 / f64::from(sample_rate));
                let speech = detector.process(frame.level, duration);

                if tx.try_send(CaptureEvent::Frame(frame)).is_err() {
                    dropped_frames += 1;
                }
                if let Some(event) = speech
                    && tx.send(CaptureEvent::Speech(event)).is_err()
                {
                    // Receiver gone; nothing left to capture for.
                    thread_running.store(false, Ordering::SeqCst);
                    break;
                }
            }

            thread::sleep(poll_interval);
        }

        // Deliver the tail of the final utterance.
        if let Some(frame) = assembler.flush() {
            let _ = tx.try_send(CaptureEvent::Frame(frame));
        }
        if detector.is_speaking() {
            let _ = tx.try_send(CaptureEvent::Speech(SpeechEvent::SpeechEnded));
        }

        if dropped_frames > 0 {
            eprintln!("voxlink: dropped {dropped_frames} audio frame(s) (consumer too slow)");
        }

        if let Err(e) = source.stop() {
            eprintln!("voxlink: failed to stop audio capture: {e}");
        }
    });

    Ok(CaptureHandle {
        running,
        thread: Some(thread),
    })
}
