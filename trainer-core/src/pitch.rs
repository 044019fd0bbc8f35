//! # Pitch Detection Module
//!
//! Time-domain autocorrelation pitch estimation tuned for a single young
//! singing voice (roughly 70–1000 Hz).
//!
//! ## Algorithm
//! 1. Remove the DC offset
//! 2. RMS silence gate
//! 3. Scan lags for the frequency band, ascending (high to low frequency)
//! 4. Accept the first rising peak above the correlation threshold and stop
//!    at the first decline after it
//!
//! The first-peak policy can lock onto a harmonic for some timbres. It is
//! kept as is because it defines how the feedback feels to learners.

use crate::PitchEstimate;

/// Signals quieter than this RMS level are treated as silence.
pub const SILENCE_RMS: f32 = 0.01;

/// Lowest frequency the estimator searches for.
pub const MIN_FREQUENCY_HZ: f32 = 70.0;

/// Highest frequency the estimator searches for.
pub const MAX_FREQUENCY_HZ: f32 = 1000.0;

/// A lag must correlate above this to be accepted as a period.
pub const CORRELATION_THRESHOLD: f32 = 0.9;

/// Correlation mapped to confidence 0.0; 1.0 correlation maps to 1.0.
const CONFIDENCE_FLOOR: f32 = 0.8;
const CONFIDENCE_SPAN: f32 = 0.2;

/// Returns the `(min_lag, max_lag)` range searched at `sample_rate`.
pub fn lag_range(sample_rate: u32) -> (usize, usize) {
    let rate = sample_rate as f32;
    let min_lag = ((rate / MAX_FREQUENCY_HZ).floor() as usize).max(1);
    let max_lag = (rate / MIN_FREQUENCY_HZ).floor() as usize;
    (min_lag, max_lag)
}

/// Smallest buffer the estimator can analyze at `sample_rate`.
pub fn min_frame_len(sample_rate: u32) -> usize {
    lag_range(sample_rate).1
}

/// Estimates the fundamental frequency of a block of samples.
///
/// # Arguments
/// * `signal` - Mono samples normalized to [-1, 1]
/// * `sample_rate` - Sample rate in Hz
///
/// # Returns
/// * A `PitchEstimate` whose `frequency_hz` is `None` for silence, noise,
///   out-of-range pitches and buffers shorter than [`min_frame_len`]
pub fn estimate_pitch(signal: &[f32], sample_rate: u32) -> PitchEstimate {
    let size = signal.len();
    let (min_lag, max_lag) = lag_range(sample_rate);
    if size == 0 || size < max_lag || min_lag > max_lag {
        return PitchEstimate::NO_SIGNAL;
    }

    // --- DC removal ---
    let mean = signal.iter().sum::<f32>() / size as f32;
    let centered: Vec<f32> = signal.iter().map(|&s| s - mean).collect();

    // --- Noise gate ---
    let rms = (centered.iter().map(|&s| s * s).sum::<f32>() / size as f32).sqrt();
    if rms < SILENCE_RMS {
        return PitchEstimate::NO_SIGNAL;
    }

    // --- First rising peak above the threshold ---
    let mut best_offset = 0;
    let mut best_correlation = 0.0;
    let mut last_correlation = 1.0;
    let mut found = false;

    for lag in min_lag..=max_lag {
        let correlation = correlation_at(&centered, lag);
        if correlation > CORRELATION_THRESHOLD && correlation > last_correlation {
            found = true;
            if correlation > best_correlation {
                best_correlation = correlation;
                best_offset = lag;
            }
        } else if found {
            break;
        }
        last_correlation = correlation;
    }

    if !found || best_offset == 0 {
        return PitchEstimate::NO_SIGNAL;
    }

    let frequency = sample_rate as f32 / best_offset as f32;
    let confidence = ((best_correlation - CONFIDENCE_FLOOR) / CONFIDENCE_SPAN).clamp(0.0, 1.0);

    PitchEstimate {
        frequency_hz: Some(frequency),
        confidence,
    }
}

/// Normalized correlation of the signal with itself shifted by `lag`:
/// one minus the summed absolute difference over the overlapping region,
/// divided by the buffer length. A perfectly periodic signal scores 1.0 at
/// its period.
fn correlation_at(signal: &[f32], lag: usize) -> f32 {
    let size = signal.len();
    if lag >= size {
        return 0.0;
    }
    let distance: f32 = signal[..size - lag]
        .iter()
        .zip(&signal[lag..])
        .map(|(a, b)| (a - b).abs())
        .sum();
    1.0 - distance / size as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::TAU;

    const RATE: u32 = 44_100;

    fn sine(freq: f32, amplitude: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| amplitude * (TAU * freq * i as f32 / RATE as f32).sin())
            .collect()
    }

    /// Deterministic white noise in [-amplitude, amplitude].
    fn noise(amplitude: f32, len: usize) -> Vec<f32> {
        let mut state: u32 = 0x9E37_79B9;
        (0..len)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                (state as f32 / u32::MAX as f32 * 2.0 - 1.0) * amplitude
            })
            .collect()
    }

    #[test]
    fn lag_range_at_cd_rate() {
        assert_eq!(lag_range(RATE), (44, 630));
        assert_eq!(min_frame_len(48_000), 685);
    }

    #[test]
    fn silence_is_gated() {
        for len in [0, 1, 100, 630, 2048, 8192] {
            let estimate = estimate_pitch(&vec![0.0; len], RATE);
            assert_eq!(estimate, PitchEstimate::NO_SIGNAL);
        }
    }

    #[test]
    fn quiet_signal_is_gated() {
        let estimate = estimate_pitch(&sine(220.0, 0.005, 2048), RATE);
        assert_eq!(estimate.frequency_hz, None);
        assert_eq!(estimate.confidence, 0.0);
    }

    #[test]
    fn recovers_220_hz_sine() {
        let estimate = estimate_pitch(&sine(220.0, 0.5, 2048), RATE);
        let freq = estimate.frequency_hz.expect("pitch expected");
        assert!((freq - 220.0).abs() < 3.0, "got {freq}");
        assert!(estimate.confidence > 0.0);
    }

    #[test]
    fn recovers_pitch_from_minimum_length_buffer() {
        let estimate = estimate_pitch(&sine(220.0, 0.5, min_frame_len(RATE)), RATE);
        let freq = estimate.frequency_hz.expect("pitch expected");
        assert!((freq - 220.0).abs() < 3.0, "got {freq}");
    }

    #[test]
    fn recovers_across_singing_range() {
        for target in [110.0, 196.0, 261.63, 392.0, 523.25] {
            let estimate = estimate_pitch(&sine(target, 0.4, 4096), RATE);
            let freq = estimate.frequency_hz.expect("pitch expected");
            let cents = 1200.0 * (freq / target).log2();
            assert!(cents.abs() < 50.0, "{target} Hz estimated as {freq} Hz");
        }
    }

    #[test]
    fn dc_offset_does_not_bias_estimate() {
        let shifted: Vec<f32> = sine(330.0, 0.3, 2048).iter().map(|s| s + 0.4).collect();
        let freq = estimate_pitch(&shifted, RATE).frequency_hz.expect("pitch expected");
        assert!((freq - 330.0).abs() < 5.0, "got {freq}");
    }

    #[test]
    fn short_buffer_returns_no_signal() {
        let estimate = estimate_pitch(&sine(220.0, 0.5, 600), RATE);
        assert_eq!(estimate, PitchEstimate::NO_SIGNAL);
    }

    #[test]
    fn loud_noise_returns_no_signal() {
        let estimate = estimate_pitch(&noise(0.8, 4096), RATE);
        assert_eq!(estimate.frequency_hz, None);
    }

    #[test]
    fn confidence_is_bounded() {
        let inputs = [
            sine(220.0, 0.5, 2048),
            sine(90.0, 1.0, 2048),
            sine(880.0, 0.02, 2048),
            noise(0.3, 2048),
            noise(0.02, 2048),
            vec![0.0; 2048],
        ];
        for input in &inputs {
            let estimate = estimate_pitch(input, RATE);
            assert!((0.0..=1.0).contains(&estimate.confidence));
            if estimate.frequency_hz.is_some() {
                assert!(estimate.confidence >= 0.5);
            }
        }
    }
}
