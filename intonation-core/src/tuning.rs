//! # Musical Tuning Module
//!
//! Maps frequencies onto the equal-tempered scale and back.
//!
//! ## Features
//! - Frequency to note, octave, signed cents and MIDI number
//! - Exact inverse mapping from note and octave to frequency
//! - Configurable reference pitch (A4 = 440 Hz by default)
//! - Note name parsing with sharps and flats
//! - Sensitivity ranges for in-tune / warning classification

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Frequencies below this are treated as "no note".
pub const MIN_FREQUENCY: f32 = 20.0;

/// MIDI number of A4.
const A4_MIDI: i32 = 69;

/// The twelve pitch classes, indexed from C.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NoteName {
    C,
    CSharp,
    D,
    DSharp,
    E,
    F,
    FSharp,
    G,
    GSharp,
    A,
    ASharp,
    B,
}

const PITCH_CLASSES: [NoteName; 12] = [
    NoteName::C,
    NoteName::CSharp,
    NoteName::D,
    NoteName::DSharp,
    NoteName::E,
    NoteName::F,
    NoteName::FSharp,
    NoteName::G,
    NoteName::GSharp,
    NoteName::A,
    NoteName::ASharp,
    NoteName::B,
];

/// Static map for spelling lookups, sharps and flats alike.
///
/// Built once on first use; "Cb", "E#", "Fb" and "B#" are enharmonic
/// spellings that wrap to the neighbouring pitch class.
static SPELLINGS: Lazy<BTreeMap<&'static str, NoteName>> = Lazy::new(|| {
    let mut map = BTreeMap::new();
    for note in PITCH_CLASSES {
        map.insert(note.as_str(), note);
    }
    for (flat, note) in [
        ("Db", NoteName::CSharp),
        ("Eb", NoteName::DSharp),
        ("Gb", NoteName::FSharp),
        ("Ab", NoteName::GSharp),
        ("Bb", NoteName::ASharp),
        ("Cb", NoteName::B),
        ("Fb", NoteName::E),
        ("E#", NoteName::F),
        ("B#", NoteName::C),
    ] {
        map.insert(flat, note);
    }
    map
});

impl NoteName {
    /// Semitone index within the octave, C = 0.
    pub fn index(self) -> i32 {
        self as i32
    }

    pub fn from_index(index: i32) -> NoteName {
        PITCH_CLASSES[index.rem_euclid(12) as usize]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NoteName::C => "C",
            NoteName::CSharp => "C#",
            NoteName::D => "D",
            NoteName::DSharp => "D#",
            NoteName::E => "E",
            NoteName::F => "F",
            NoteName::FSharp => "F#",
            NoteName::G => "G",
            NoteName::GSharp => "G#",
            NoteName::A => "A",
            NoteName::ASharp => "A#",
            NoteName::B => "B",
        }
    }
}

impl fmt::Display for NoteName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of mapping a frequency onto the equal-tempered scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteClassification {
    pub note: NoteName,
    pub octave: i32,
    /// Signed deviation from the nearest note, nominally -50..=50.
    pub cents: i32,
    pub midi: i32,
}

impl NoteClassification {
    /// Note and octave, the identity used for stability tracking.
    pub fn key(&self) -> (NoteName, i32) {
        (self.note, self.octave)
    }
}

impl fmt::Display for NoteClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{} ({:+} cents)", self.note, self.octave, self.cents)
    }
}

/// Error returned when a note spelling cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid note name '{0}'")]
pub struct ParseNoteError(String);

/// A pitch class together with its octave, e.g. "A4" or "Bb3".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pitch {
    pub note: NoteName,
    pub octave: i32,
}

impl FromStr for Pitch {
    type Err = ParseNoteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let split = s
            .char_indices()
            .find(|&(i, c)| i > 0 && (c.is_ascii_digit() || c == '-'))
            .map(|(i, _)| i)
            .ok_or_else(|| ParseNoteError(s.to_string()))?;
        let (name, octave) = s.split_at(split);
        let note = SPELLINGS
            .get(name)
            .copied()
            .ok_or_else(|| ParseNoteError(s.to_string()))?;
        let octave = octave.parse().map_err(|_| ParseNoteError(s.to_string()))?;
        // Spellings that cross the C boundary move the octave with them.
        let octave = match name {
            "Cb" => octave - 1,
            "B#" => octave + 1,
            _ => octave,
        };
        Ok(Pitch { note, octave })
    }
}

/// Classifies a frequency against the equal-tempered scale.
///
/// # Arguments
/// * `freq` - Frequency in Hz
/// * `a4` - Reference pitch of A4 in Hz
///
/// # Returns
/// * `Some(classification)` - Nearest note, octave, cents and MIDI number
/// * `None` - Frequency is below 20 Hz or not finite
pub fn classify(freq: f32, a4: f32) -> Option<NoteClassification> {
    if !freq.is_finite() || freq < MIN_FREQUENCY || a4 <= 0.0 {
        return None;
    }
    let note_number = 12.0 * (freq as f64 / a4 as f64).log2();
    let rounded = note_number.round();
    let midi = rounded as i32 + A4_MIDI;
    let cents = ((note_number - rounded) * 100.0).round() as i32;

    Some(NoteClassification {
        note: NoteName::from_index(midi),
        octave: midi.div_euclid(12) - 1,
        cents,
        midi,
    })
}

/// MIDI number for a note and octave (C-1 = 0, A4 = 69).
pub fn midi_number(note: NoteName, octave: i32) -> i32 {
    (octave + 1) * 12 + note.index()
}

/// Equal-tempered frequency of a note, the exact inverse of [`classify`].
pub fn note_to_frequency(note: NoteName, octave: i32, a4: f32) -> f32 {
    midi_to_frequency(midi_number(note, octave), a4)
}

pub fn midi_to_frequency(midi: i32, a4: f32) -> f32 {
    (a4 as f64 * 2f64.powf((midi - A4_MIDI) as f64 / 12.0)) as f32
}

/// Calculates the deviation from a target frequency in cents.
///
/// Positive values are sharp, negative values flat.
pub fn calculate_cents_deviation(freq: f32, target_freq: f32) -> f32 {
    1200.0 * (freq / target_freq).log2()
}

/// How tightly a reading must match before it counts as in tune.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensitivityRange {
    Wide,
    #[default]
    Medium,
    Fine,
    Ultrafine,
}

/// Tuning verdict for a single reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TuningStatus {
    InTune,
    Warning,
    OutOfTune,
}

impl SensitivityRange {
    /// `(in_tune, warning)` thresholds in cents.
    pub fn thresholds(self) -> (i32, i32) {
        match self {
            SensitivityRange::Wide => (10, 25),
            SensitivityRange::Medium => (5, 15),
            SensitivityRange::Fine => (3, 10),
            SensitivityRange::Ultrafine => (1, 5),
        }
    }

    pub fn status(self, cents: i32) -> TuningStatus {
        let (in_tune, warning) = self.thresholds();
        match cents.abs() {
            c if c <= in_tune => TuningStatus::InTune,
            c if c <= warning => TuningStatus::Warning,
            _ => TuningStatus::OutOfTune,
        }
    }
}
