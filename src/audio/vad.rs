//! Voice Activity Detection (VAD).
//!
//! Turns a stream of per-frame RMS levels into discrete speech-start /
//! speech-end events with asymmetric hysteresis: entering "speaking"
//! requires sustained level above threshold, leaving it requires a much
//! longer stretch of silence.

use crate::audio::filter::rms;
use crate::defaults;
use std::time::{Duration, Instant};

/// Trait for time operations, allowing mock time in tests.
pub trait Clock: Send + Sync {
    /// Returns the current instant.
    fn now(&self) -> Instant;
}

/// Real system clock using `std::time::Instant::now()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Configuration for the speech detector.
#[derive(Debug, Clone, Copy)]
pub struct SpeechDetectorConfig {
    /// RMS threshold for detecting speech (0.0 to 1.0).
    pub speech_threshold: f32,
    /// Sustained above-threshold time before speech starts (milliseconds).
    pub min_speech_ms: u32,
    /// Sustained silence before speech ends (milliseconds).
    pub silence_duration_ms: u32,
}

impl Default for SpeechDetectorConfig {
    fn default() -> Self {
        Self {
            speech_threshold: defaults::SPEECH_THRESHOLD,
            min_speech_ms: defaults::MIN_SPEECH_MS,
            silence_duration_ms: defaults::SILENCE_DURATION_MS,
        }
    }
}

/// Events emitted by the speech detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeechEvent {
    /// Sustained speech detected; the utterance has started.
    SpeechStarted,
    /// Sustained silence after speech; the utterance has ended.
    SpeechEnded,
}

/// Two-state speech detector with asymmetric hysteresis.
///
/// The trigger accumulator (`potential_speech`) is zeroed by a sub-threshold
/// frame only *before* speech has triggered; once speaking, sub-threshold
/// dips drive the silence timer instead. This asymmetry is deliberate
/// tuning, not an oversight: brief level wobble around the threshold during
/// the accumulation window should still trigger, while mid-utterance dips
/// should only count toward the end-of-utterance timeout.
pub struct SpeechDetector<C: Clock = SystemClock> {
    config: SpeechDetectorConfig,
    potential_speech: Duration,
    silence_start: Option<Instant>,
    is_speaking: bool,
    clock: C,
}

impl<C: Clock> SpeechDetector<C> {
    /// Creates a detector with the given configuration and clock.
    pub fn with_clock(config: SpeechDetectorConfig, clock: C) -> Self {
        Self {
            config,
            potential_speech: Duration::ZERO,
            silence_start: None,
            is_speaking: false,
            clock,
        }
    }

    /// Processes one frame's level and duration.
    ///
    /// Returns `Some(SpeechEvent)` on a state transition, `None` otherwise.
    pub fn process(&mut self, level: f32, frame_duration: Duration) -> Option<SpeechEvent> {
        let min_speech = Duration::from_millis(u64::from(self.config.min_speech_ms));
        let silence_window = Duration::from_millis(u64::from(self.config.silence_duration_ms));

        if level > self.config.speech_threshold {
            self.potential_speech += frame_duration;

            if self.potential_speech >= min_speech {
                self.silence_start = None;
                if !self.is_speaking {
                    self.is_speaking = true;
                    return Some(SpeechEvent::SpeechStarted);
                }
            }
            None
        } else if !self.is_speaking {
            // Sub-threshold noise must not creep toward the trigger.
            self.potential_speech = Duration::ZERO;
            None
        } else {
            let now = self.clock.now();
            match self.silence_start {
                None => {
                    self.silence_start = Some(now);
                    None
                }
                Some(start) if now.duration_since(start) >= silence_window => {
                    self.is_speaking = false;
                    self.silence_start = None;
                    self.potential_speech = Duration::ZERO;
                    Some(SpeechEvent::SpeechEnded)
                }
                Some(_) => None,
            }
        }
    }

    /// Convenience: computes the frame's RMS and duration from raw samples.
    pub fn process_frame(&mut self, samples: &[i16], sample_rate: u32) -> Option<SpeechEvent> {
        let duration = Duration::from_secs_f64(samples.len() as f64 / f64::from(sample_rate));
        self.process(rms(samples), duration)
    }

    /// Returns true while an utterance is in progress.
    pub fn is_speaking(&self) -> bool {
        self.is_speaking
    }

    /// Resets to the not-speaking state. Called on session reset.
    pub fn reset(&mut self) {
        self.potential_speech = Duration::ZERO;
        self.silence_start = None;
        self.is_speaking = false;
    }
}

impl SpeechDetector<SystemClock> {
    /// Creates a detector with the given configuration using the system clock.
    pub fn new(config: SpeechDetectorConfig) -> Self {
        Self::with_clock(config, SystemClock)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Mock clock for testing that allows manual time advancement.
    #[derive(Debug, Clone)]
    pub struct MockClock {
        current: Arc<Mutex<Instant>>,
    }

    impl MockClock {
        pub fn new() -> Self {
            Self {
                current: Arc::new(Mutex::new(Instant::now())),
            }
        }

        pub fn advance(&self, duration: Duration) {
            let mut current = self.current.lock().unwrap();
            *current += duration;
        }
    }

    impl Clock for MockClock {
        fn now(&self) -> Instant {
            *self.current.lock().unwrap()
        }
    }

    const FRAME: Duration = Duration::from_millis(20);

    fn detector() -> (SpeechDetector<MockClock>, MockClock) {
        let clock = MockClock::new();
        let det = SpeechDetector::with_clock(SpeechDetectorConfig::default(), clock.clone());
        (det, clock)
    }

    /// Feed one frame and advance mock time by the frame duration,
    /// mirroring real-time capture.
    fn feed(
        det: &mut SpeechDetector<MockClock>,
        clock: &MockClock,
        level: f32,
    ) -> Option<SpeechEvent> {
        let event = det.process(level, FRAME);
        clock.advance(FRAME);
        event
    }

    #[test]
    fn test_starts_not_speaking() {
        let (det, _clock) = detector();
        assert!(!det.is_speaking());
    }

    #[test]
    fn test_sustained_speech_triggers_start_once() {
        let (mut det, clock) = detector();

        let mut events = Vec::new();
        for _ in 0..10 {
            if let Some(e) = feed(&mut det, &clock, 0.1) {
                events.push(e);
            }
        }

        assert_eq!(events, vec![SpeechEvent::SpeechStarted]);
        assert!(det.is_speaking());
    }

    #[test]
    fn test_start_fires_at_min_speech_duration() {
        let (mut det, clock) = detector();

        // 100ms minimum at 20ms frames: the 5th frame crosses the line.
        for i in 0..5 {
            let event = feed(&mut det, &clock, 0.1);
            if i < 4 {
                assert_eq!(event, None, "frame {} fired early", i);
            } else {
                assert_eq!(event, Some(SpeechEvent::SpeechStarted));
            }
        }
    }

    #[test]
    fn test_brief_blips_never_trigger() {
        // Oscillating around the threshold with less than min_speech_ms of
        // total above-threshold time must never emit SpeechStarted: each
        // full drop below threshold pre-trigger resets the accumulator.
        let (mut det, clock) = detector();

        for _ in 0..50 {
            assert_eq!(feed(&mut det, &clock, 0.1), None); // 20ms up
            assert_eq!(feed(&mut det, &clock, 0.01), None); // reset
        }
        assert!(!det.is_speaking());
    }

    #[test]
    fn test_wobble_within_accumulation_window_does_not_lose_progress_once_speaking() {
        let (mut det, clock) = detector();

        // Trigger speech.
        for _ in 0..5 {
            feed(&mut det, &clock, 0.1);
        }
        assert!(det.is_speaking());

        // Once speaking, a dip below threshold starts the silence timer but
        // speech resuming clears it without ending the utterance.
        assert_eq!(feed(&mut det, &clock, 0.01), None);
        assert_eq!(feed(&mut det, &clock, 0.1), None);
        assert_eq!(feed(&mut det, &clock, 0.1), None);
        assert!(det.is_speaking());
    }

    #[test]
    fn test_speech_then_silence_cycle() {
        let (mut det, clock) = detector();
        let mut events = Vec::new();

        // ≥100ms of speech, then ≥1.2s of silence.
        for _ in 0..10 {
            if let Some(e) = feed(&mut det, &clock, 0.1) {
                events.push(e);
            }
        }
        for _ in 0..70 {
            if let Some(e) = feed(&mut det, &clock, 0.0) {
                events.push(e);
            }
        }

        assert_eq!(
            events,
            vec![SpeechEvent::SpeechStarted, SpeechEvent::SpeechEnded]
        );
        assert!(!det.is_speaking());
    }

    #[test]
    fn test_level_sequence_scenario() {
        // [0.01]*5 → [0.1]*10 @20ms → [0.01]*70 @20ms: exactly one start
        // (5 frames into the high segment) then exactly one end (60 frames
        // into the low segment).
        let (mut det, clock) = detector();
        let mut timeline = Vec::new();

        let mut frame_no = 0u32;
        let mut run = |det: &mut SpeechDetector<MockClock>, level: f32, count: u32| {
            for _ in 0..count {
                if let Some(e) = feed(det, &clock, level) {
                    timeline.push((frame_no, e));
                }
                frame_no += 1;
            }
        };

        run(&mut det, 0.01, 5);
        run(&mut det, 0.1, 10);
        run(&mut det, 0.01, 70);

        assert_eq!(timeline.len(), 2);
        assert_eq!(timeline[0].1, SpeechEvent::SpeechStarted);
        assert_eq!(timeline[0].0, 9, "start on the 5th high frame");
        assert_eq!(timeline[1].1, SpeechEvent::SpeechEnded);
        assert_eq!(timeline[1].0, 75, "end after 1.2s of low frames");
    }

    #[test]
    fn test_silence_timer_resets_when_speech_resumes() {
        let (mut det, clock) = detector();

        for _ in 0..5 {
            feed(&mut det, &clock, 0.1);
        }

        // 1.0s of silence (under the 1.2s window), then speech resumes.
        for _ in 0..50 {
            assert_eq!(feed(&mut det, &clock, 0.0), None);
        }
        feed(&mut det, &clock, 0.1);

        // A fresh silence run must take the full window again: the first
        // silent frame only arms the timer.
        for _ in 0..60 {
            assert_eq!(feed(&mut det, &clock, 0.0), None);
        }
        assert_eq!(feed(&mut det, &clock, 0.0), Some(SpeechEvent::SpeechEnded));
    }

    #[test]
    fn test_detector_retriggers_after_utterance() {
        let (mut det, clock) = detector();
        let mut events = Vec::new();

        for _ in 0..2 {
            for _ in 0..10 {
                if let Some(e) = feed(&mut det, &clock, 0.1) {
                    events.push(e);
                }
            }
            for _ in 0..70 {
                if let Some(e) = feed(&mut det, &clock, 0.0) {
                    events.push(e);
                }
            }
        }

        assert_eq!(
            events,
            vec![
                SpeechEvent::SpeechStarted,
                SpeechEvent::SpeechEnded,
                SpeechEvent::SpeechStarted,
                SpeechEvent::SpeechEnded,
            ]
        );
    }

    #[test]
    fn test_reset_returns_to_idle() {
        let (mut det, clock) = detector();

        for _ in 0..10 {
            feed(&mut det, &clock, 0.1);
        }
        assert!(det.is_speaking());

        det.reset();
        assert!(!det.is_speaking());

        // Trigger fires again from scratch after reset.
        let mut events = Vec::new();
        for _ in 0..5 {
            if let Some(e) = feed(&mut det, &clock, 0.1) {
                events.push(e);
            }
        }
        assert_eq!(events, vec![SpeechEvent::SpeechStarted]);
    }

    #[test]
    fn test_process_frame_uses_rms() {
        let (mut det, clock) = detector();

        // 3000 amplitude → RMS ≈ 0.09, above the 0.03 threshold. A 16000
        // sample frame at 16kHz is 1s, well past min_speech_ms.
        let loud = vec![3000i16; 16000];
        let event = det.process_frame(&loud, 16000);
        clock.advance(Duration::from_secs(1));
        assert_eq!(event, Some(SpeechEvent::SpeechStarted));
    }
}
