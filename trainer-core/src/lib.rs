// trainer-core/src/lib.rs

//! The core logic for the children's vocal trainer.
//! This crate is responsible for reference-tone synthesis, microphone
//! capture, pitch estimation and note math. It is completely headless
//! and contains no GUI code.

pub mod audio;
pub mod capture;
pub mod config;
pub mod error;
pub mod music;
pub mod output;
pub mod pitch;
pub mod synth;

pub use config::TrainerConfig;
pub use error::AudioError;

/// The pitch detected in one analysis frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PitchEstimate {
    /// The detected fundamental in Hz, `None` for silence or noise.
    pub frequency_hz: Option<f32>,
    /// How periodic the frame was (0.0 to 1.0).
    pub confidence: f32,
}

impl PitchEstimate {
    /// No reliable pitch in the frame.
    pub const NO_SIGNAL: PitchEstimate = PitchEstimate {
        frequency_hz: None,
        confidence: 0.0,
    };

    pub fn is_voiced(&self) -> bool {
        self.frequency_hz.is_some()
    }
}

/// A block of mono samples and the rate it was captured at.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self { samples, sample_rate }
    }

    /// Runs the pitch estimator over this frame.
    pub fn estimate(&self) -> PitchEstimate {
        pitch::estimate_pitch(&self.samples, self.sample_rate)
    }
}

/// An estimate enriched with what the pitch meter needs to draw it.
#[derive(Debug, Clone, PartialEq)]
pub struct PitchReading {
    pub estimate: PitchEstimate,
    /// The name of the nearest note to the sung pitch.
    pub note_name: Option<String>,
    /// Deviation from the target (or the nearest note) in cents.
    pub cents_off: Option<f64>,
    /// The pitch the learner is trying to match, if any.
    pub target_hz: Option<f64>,
}

impl PitchReading {
    /// Builds a reading against `target_hz`. Without a target the offset is
    /// measured from the nearest equal-tempered note.
    pub fn from_estimate(estimate: PitchEstimate, target_hz: Option<f64>) -> Self {
        let target_hz = target_hz.filter(|t| t.is_finite() && *t > 0.0);
        let (note_name, cents_off) = match estimate.frequency_hz {
            Some(freq) => {
                let freq = f64::from(freq);
                let nearest = music::nearest_note(freq);
                let reference = target_hz.unwrap_or(nearest.frequency);
                (Some(nearest.name), Some(music::cents_off(freq, reference)))
            }
            None => (None, None),
        };
        Self {
            estimate,
            note_name,
            cents_off,
            target_hz,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reading_against_target() {
        let estimate = PitchEstimate {
            frequency_hz: Some(466.16),
            confidence: 0.9,
        };
        let reading = PitchReading::from_estimate(estimate, Some(440.0));
        assert_eq!(reading.note_name.as_deref(), Some("A#4"));
        let cents = reading.cents_off.unwrap();
        assert!((cents - 100.0).abs() < 0.5, "{cents}");
    }

    #[test]
    fn reading_without_target_uses_nearest_note() {
        let estimate = PitchEstimate {
            frequency_hz: Some(445.0),
            confidence: 0.7,
        };
        let reading = PitchReading::from_estimate(estimate, None);
        assert_eq!(reading.note_name.as_deref(), Some("A4"));
        assert!(reading.cents_off.unwrap() > 0.0);
    }

    #[test]
    fn reading_of_silence_is_empty() {
        let reading = PitchReading::from_estimate(PitchEstimate::NO_SIGNAL, Some(440.0));
        assert_eq!(reading.note_name, None);
        assert_eq!(reading.cents_off, None);
        assert_eq!(reading.target_hz, Some(440.0));
    }

    #[test]
    fn frame_estimate_delegates_to_estimator() {
        let frame = AudioFrame::new(vec![0.0; 2048], 44_100);
        assert_eq!(frame.estimate(), PitchEstimate::NO_SIGNAL);
    }
}
