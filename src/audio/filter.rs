//! DC-blocking high-pass filter and RMS level computation.
//!
//! Every captured frame is filtered in place before transmission; the filter
//! state persists across frames within one recording session and resets when
//! recording restarts.

use crate::defaults;

/// Single-pole DC blocker: `y[n] = x[n] - x[n-1] + R * y[n-1]`.
///
/// With R = 0.95 at 16kHz the cutoff sits near 120Hz. The written sample is
/// clamped to the i16 range, but the feedback term keeps the unclamped float
/// value so the filter response is not distorted by clipping.
#[derive(Debug, Clone, Copy)]
pub struct DcBlocker {
    r: f32,
    prev_x: i16,
    prev_y: f32,
}

impl DcBlocker {
    /// Creates a filter with the default coefficient.
    pub fn new() -> Self {
        Self::with_coefficient(defaults::DC_BLOCKER_R)
    }

    /// Creates a filter with a custom feedback coefficient (0.0 to 1.0).
    pub fn with_coefficient(r: f32) -> Self {
        Self {
            r,
            prev_x: 0,
            prev_y: 0.0,
        }
    }

    /// Filters a frame of samples in place.
    pub fn process(&mut self, samples: &mut [i16]) {
        for sample in samples.iter_mut() {
            let x = *sample;
            let y = f32::from(x) - f32::from(self.prev_x) + self.r * self.prev_y;
            *sample = y.clamp(f32::from(i16::MIN), f32::from(i16::MAX)) as i16;
            self.prev_x = x;
            self.prev_y = y;
        }
    }

    /// Resets filter state. Called when a recording session restarts.
    pub fn reset(&mut self) {
        self.prev_x = 0;
        self.prev_y = 0.0;
    }
}

impl Default for DcBlocker {
    fn default() -> Self {
        Self::new()
    }
}

/// Calculates the Root Mean Square (RMS) of audio samples.
///
/// # Returns
/// Normalized RMS value in [0.0, 1.0], where 0.0 is silence and 1.0 is a
/// full-scale square wave. Samples at `i16::MIN` can push the result
/// fractionally above 1.0; callers clamp for display.
pub fn rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f64 = samples
        .iter()
        .map(|&sample| {
            let normalized = f64::from(sample) / f64::from(i16::MAX);
            normalized * normalized
        })
        .sum();

    let mean_square = sum_squares / samples.len() as f64;
    mean_square.sqrt() as f32
}
