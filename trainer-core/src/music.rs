//! # Music Math Module
//!
//! Pure conversions between frequency, MIDI note numbers, note names and
//! cent offsets, based on 12-tone equal temperament with A4 = 440 Hz
//! (MIDI note 69).
//!
//! ## Features
//! - Frequency <-> MIDI note number conversions
//! - Cent deviation from a target pitch
//! - Note naming with the middle-C = C4 convention
//! - Feedback zones and cent smoothing for the pitch meter
//! - `MM:SS` formatting for the recording timer
//!
//! Frequencies passed to these functions must be positive and finite; that
//! is a precondition on the caller, not something the functions repair.

use std::collections::VecDeque;

/// MIDI note number of the reference pitch A4.
pub const A4_MIDI: f64 = 69.0;

/// Frequency of the reference pitch A4 in Hz.
pub const A4_HZ: f64 = 440.0;

const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Converts a frequency in Hz to a (fractional) MIDI note number.
///
/// # Arguments
/// * `hz` - Frequency in Hz, must be > 0
///
/// # Returns
/// * MIDI note number, e.g. 69.0 for 440 Hz and 69.5 for a quarter tone above
pub fn frequency_to_midi(hz: f64) -> f64 {
    A4_MIDI + 12.0 * (hz / A4_HZ).log2()
}

/// Converts a (fractional) MIDI note number to a frequency in Hz.
///
/// This is the exact inverse of [`frequency_to_midi`].
pub fn midi_to_frequency(midi: f64) -> f64 {
    A4_HZ * 2.0_f64.powf((midi - A4_MIDI) / 12.0)
}

/// Calculates the deviation of `hz` from `target_hz` in cents.
///
/// - 100 cents = 1 semitone
/// - 1200 cents = 1 octave
/// - Positive values are sharp (too high), negative values are flat
///
/// `cents_off(f, f)` is exactly zero.
pub fn cents_off(hz: f64, target_hz: f64) -> f64 {
    1200.0 * (hz / target_hz).log2()
}

/// Names the note nearest to a MIDI number, e.g. `"A4"` for 69 and `"C4"`
/// for 60. Negative MIDI numbers wrap around the pitch classes.
pub fn midi_to_name(midi: f64) -> String {
    let rounded = midi.round() as i64;
    let pitch_class = ((rounded % 12) + 12) % 12;
    let octave = rounded.div_euclid(12) - 1;
    format!("{}{}", NOTE_NAMES[pitch_class as usize], octave)
}

/// A note of the equal-tempered scale.
#[derive(Debug, Clone, PartialEq)]
pub struct Note {
    /// Note name (e.g., "A4", "C#3")
    pub name: String,
    /// MIDI note number
    pub midi: i32,
    /// Frequency in Hz
    pub frequency: f64,
}

impl Note {
    /// Builds the note for a whole MIDI number.
    pub fn from_midi(midi: i32) -> Self {
        let midi_f = f64::from(midi);
        Self {
            name: midi_to_name(midi_f),
            midi,
            frequency: midi_to_frequency(midi_f),
        }
    }
}

/// Finds the equal-tempered note closest to a frequency.
///
/// Used to label what the learner is singing when no target is set.
pub fn nearest_note(hz: f64) -> Note {
    Note::from_midi(frequency_to_midi(hz).round() as i32)
}

/// How close a sung pitch is to its target, for colouring the meter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackZone {
    /// Within the in-tune band.
    InTune,
    /// Outside the in-tune band but within the close band.
    Close,
    /// Further away than the close band.
    Off,
}

impl FeedbackZone {
    /// Classifies a cent offset. Bands are inclusive: with the default
    /// 25/50 bands, exactly 25 cents is still in tune.
    pub fn classify(cents: f64, in_tune_cents: f64, close_cents: f64) -> Self {
        let distance = cents.abs();
        if distance <= in_tune_cents {
            FeedbackZone::InTune
        } else if distance <= close_cents {
            FeedbackZone::Close
        } else {
            FeedbackZone::Off
        }
    }
}

/// Moving average over the most recent cent offsets.
///
/// A frame without a pitch clears the history so the meter does not drift
/// on stale values after the learner stops singing.
#[derive(Debug, Clone)]
pub struct CentsSmoother {
    window: usize,
    values: VecDeque<f64>,
}

impl CentsSmoother {
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            window,
            values: VecDeque::with_capacity(window),
        }
    }

    /// Adds a new value and returns the current average, or `None` when the
    /// frame carried no pitch.
    pub fn push(&mut self, cents: Option<f64>) -> Option<f64> {
        match cents {
            Some(c) => {
                self.values.push_back(c);
                if self.values.len() > self.window {
                    self.values.pop_front();
                }
                self.average()
            }
            None => {
                self.values.clear();
                None
            }
        }
    }

    pub fn average(&self) -> Option<f64> {
        if self.values.is_empty() {
            return None;
        }
        Some(self.values.iter().sum::<f64>() / self.values.len() as f64)
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }
}

/// Formats whole seconds as `MM:SS` for the recording timer.
pub fn format_duration(total_secs: u64) -> String {
    format!("{:02}:{:02}", total_secs / 60, total_secs % 60)
}
