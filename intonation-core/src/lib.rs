// intonation-core/src/lib.rs

//! The real-time analysis engine behind the intonation trainer.
//! This crate turns a live audio stream into pitch, note, harmonic and loop
//! data: pitch estimation, note classification, harmonic analysis, note
//! segmentation, bounded history and WAV loop export. It is completely
//! headless and contains no GUI code.

pub mod audio;
pub mod capture;
pub mod config;
pub mod engine;
pub mod export;
pub mod fft;
pub mod harmonics;
pub mod history;
pub mod pitch;
pub mod publisher;
pub mod segmentation;
pub mod tuning;

pub use config::{ConfigError, EngineConfig, NoiseGate};
pub use engine::{Engine, EngineError};
pub use publisher::{EngineEvent, SubscriptionHandle};

use harmonics::HarmonicPartial;
use history::HistorySample;
use pitch::PitchEstimate;
use segmentation::{NoteEvent, SegmenterState};
use tuning::{NoteClassification, TuningStatus};

/// One time-domain frame handed to the engine for a single cycle.
#[derive(Debug, Clone, Copy)]
pub struct SampleFrame<'a> {
    pub samples: &'a [f32],
    pub sample_rate: u32,
}

impl<'a> SampleFrame<'a> {
    pub fn new(samples: &'a [f32], sample_rate: u32) -> Self {
        Self { samples, sample_rate }
    }
}

/// Magnitude spectrum on a 0-255 scale, `fft_size / 2` bins.
#[derive(Debug, Clone, PartialEq)]
pub struct SpectrumFrame {
    pub magnitudes: Vec<f32>,
    pub fft_size: usize,
    pub sample_rate: u32,
}

impl SpectrumFrame {
    /// Wraps byte-quantized magnitudes as produced by a spectrum analyser.
    pub fn from_bytes(bytes: &[u8], fft_size: usize, sample_rate: u32) -> Self {
        Self {
            magnitudes: bytes.iter().map(|&b| b as f32).collect(),
            fft_size,
            sample_rate,
        }
    }

    /// An all-zero spectrum, for hosts without frequency data.
    pub fn silent(fft_size: usize, sample_rate: u32) -> Self {
        Self {
            magnitudes: vec![0.0; fft_size / 2],
            fft_size,
            sample_rate,
        }
    }

    /// Width of one bin in Hz.
    pub fn bin_width(&self) -> f32 {
        if self.fft_size == 0 {
            return 0.0;
        }
        self.sample_rate as f32 / self.fft_size as f32
    }
}

/// Represents the result of a single processing cycle.
///
/// Built once per cycle and shared read-only with every subscriber.
#[derive(Debug, Clone)]
pub struct AnalysisFrame {
    pub timestamp_ms: f64,
    /// Raw estimate for this frame.
    pub pitch: Option<PitchEstimate>,
    /// Exponentially smoothed frequency for display.
    pub smoothed_frequency: Option<f32>,
    pub classification: Option<NoteClassification>,
    pub tuning_status: Option<TuningStatus>,
    pub rms: f32,
    pub is_silent: bool,
    /// Noise gate threshold applied to this frame.
    pub gate_threshold: f32,
    pub waveform: Vec<f32>,
    pub spectrum: Vec<f32>,
    pub harmonics: Vec<HarmonicPartial>,
    pub inharmonicity: Option<f32>,
    pub history: Vec<HistorySample>,
    pub notes: Vec<NoteEvent>,
    pub segmenter_state: SegmenterState,
    pub sample_rate: u32,
    pub fft_size: usize,
    pub fps: f32,
}

impl AnalysisFrame {
    /// Frequency for display; 0.0 when there is no reliable pitch.
    pub fn display_frequency(&self) -> f32 {
        self.smoothed_frequency.unwrap_or(0.0)
    }

    /// "A4"-style label, or "--" without a note.
    pub fn display_note(&self) -> String {
        self.classification
            .map(|c| format!("{}{}", c.note, c.octave))
            .unwrap_or_else(|| "--".to_string())
    }
}
