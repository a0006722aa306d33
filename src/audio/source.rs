use crate::defaults;
use crate::error::{Result, VoxlinkError};
use std::collections::VecDeque;

/// Trait for audio capture devices.
///
/// This trait allows swapping implementations (real microphone vs mock).
pub trait AudioSource: Send + Sync {
    /// Start capturing audio from the source.
    fn start(&mut self) -> Result<()>;

    /// Stop capturing audio from the source.
    fn stop(&mut self) -> Result<()>;

    /// Drain the samples captured since the last read.
    ///
    /// # Returns
    /// Vector of 16-bit PCM audio samples, possibly empty, or an error.
    fn read_samples(&mut self) -> Result<Vec<i16>>;

    /// Sample rate of the samples returned by `read_samples`.
    fn sample_rate(&self) -> u32 {
        defaults::SAMPLE_RATE
    }
}

/// Mock audio source for testing.
///
/// Delivers pre-queued chunks one per `read_samples` call, then empty
/// vectors, mimicking a live device draining its buffer.
#[derive(Debug, Clone)]
pub struct MockAudioSource {
    is_started: bool,
    chunks: VecDeque<Vec<i16>>,
    should_fail_start: bool,
    should_fail_stop: bool,
    should_fail_read: bool,
    error_message: String,
}

impl MockAudioSource {
    pub fn new() -> Self {
        Self {
            is_started: false,
            chunks: VecDeque::new(),
            should_fail_start: false,
            should_fail_stop: false,
            should_fail_read: false,
            error_message: "mock audio error".to_string(),
        }
    }

    /// Queue a chunk of samples to be returned by a future read.
    pub fn with_chunk(mut self, samples: Vec<i16>) -> Self {
        self.chunks.push_back(samples);
        self
    }

    /// Queue several chunks at once.
    pub fn with_chunks(mut self, chunks: Vec<Vec<i16>>) -> Self {
        self.chunks.extend(chunks);
        self
    }

    /// Configure the mock to fail on start.
    pub fn with_start_failure(mut self) -> Self {
        self.should_fail_start = true;
        self
    }

    /// Configure the mock to fail on stop.
    pub fn with_stop_failure(mut self) -> Self {
        self.should_fail_stop = true;
        self
    }

    /// Configure the mock to fail on read.
    pub fn with_read_failure(mut self) -> Self {
        self.should_fail_read = true;
        self
    }

    /// Configure the error message for failures.
    pub fn with_error_message(mut self, message: &str) -> Self {
        self.error_message = message.to_string();
        self
    }

    pub fn is_started(&self) -> bool {
        self.is_started
    }

    /// True once every queued chunk has been read.
    pub fn is_exhausted(&self) -> bool {
        self.chunks.is_empty()
    }
}

impl Default for MockAudioSource {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSource for MockAudioSource {
    fn start(&mut self) -> Result<()> {
        if self.should_fail_start {
            Err(VoxlinkError::AudioCapture {
                message: self.error_message.clone(),
            })
        } else {
            self.is_started = true;
            Ok(())
        }
    }

    fn stop(&mut self) -> Result<()> {
        if self.should_fail_stop {
            Err(VoxlinkError::AudioCapture {
                message: self.error_message.clone(),
            })
        } else {
            self.is_started = false;
            Ok(())
        }
    }

    fn read_samples(&mut self) -> Result<Vec<i16>> {
        if self.should_fail_read {
            Err(VoxlinkError::AudioCapture {
                message: self.error_message.clone(),
            })
        } else {
            Ok(self.chunks.pop_front().unwrap_or_default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_delivers_chunks_in_order() {
        let mut source = MockAudioSource::new()
            .with_chunk(vec![1i16, 2, 3])
            .with_chunk(vec![4i16, 5]);

        assert_eq!(source.read_samples().unwrap(), vec![1, 2, 3]);
        assert_eq!(source.read_samples().unwrap(), vec![4, 5]);
        assert!(source.is_exhausted());
    }

    #[test]
    fn test_mock_returns_empty_when_exhausted() {
        let mut source = MockAudioSource::new().with_chunk(vec![1i16]);

        source.read_samples().unwrap();
        assert_eq!(source.read_samples().unwrap(), Vec::<i16>::new());
        assert_eq!(source.read_samples().unwrap(), Vec::<i16>::new());
    }

    #[test]
    fn test_mock_start_stop_state_management() {
        let mut source = MockAudioSource::new();

        assert!(!source.is_started());
        assert!(source.start().is_ok());
        assert!(source.is_started());
        assert!(source.stop().is_ok());
        assert!(!source.is_started());
    }

    #[test]
    fn test_mock_start_failure() {
        let mut source = MockAudioSource::new().with_start_failure();

        let result = source.start();
        assert!(!source.is_started());
        match result {
            Err(VoxlinkError::AudioCapture { message }) => {
                assert_eq!(message, "mock audio error");
            }
            _ => panic!("Expected AudioCapture error"),
        }
    }

    #[test]
    fn test_mock_stop_failure_keeps_started_state() {
        let mut source = MockAudioSource::new().with_stop_failure();

        source.start().unwrap();
        assert!(source.stop().is_err());
        assert!(source.is_started());
    }

    #[test]
    fn test_mock_read_failure_with_custom_message() {
        let mut source = MockAudioSource::new()
            .with_read_failure()
            .with_error_message("buffer overflow");

        match source.read_samples() {
            Err(VoxlinkError::AudioCapture { message }) => {
                assert_eq!(message, "buffer overflow");
            }
            _ => panic!("Expected AudioCapture error"),
        }
    }

    #[test]
    fn test_default_sample_rate() {
        let source = MockAudioSource::new();
        assert_eq!(source.sample_rate(), 16000);
    }

    #[test]
    fn test_trait_is_object_safe() {
        let mut source: Box<dyn AudioSource> =
            Box::new(MockAudioSource::new().with_chunk(vec![1i16, 2, 3]));

        assert!(source.start().is_ok());
        assert_eq!(source.read_samples().unwrap(), vec![1, 2, 3]);
        assert!(source.stop().is_ok());
    }

    #[test]
    fn test_with_chunks_queues_all() {
        let mut source =
            MockAudioSource::new().with_chunks(vec![vec![1i16], vec![2i16], vec![3i16]]);

        assert_eq!(source.read_samples().unwrap(), vec![1]);
        assert_eq!(source.read_samples().unwrap(), vec![2]);
        assert_eq!(source.read_samples().unwrap(), vec![3]);
    }
}
