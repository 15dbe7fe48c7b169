//! # Engine Configuration
//!
//! Recognised options for the analysis engine, loadable from TOML. Every field
//! has a default so a partial file (or none at all) yields a usable config.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::tuning::SensitivityRange;

/// Errors raised while loading or validating an [`EngineConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("fft_size must be a power of two between 256 and 32768, got {0}")]
    FftSize(usize),
    #[error("{name} must lie in [0, 1), got {value}")]
    Smoothing { name: &'static str, value: f32 },
    #[error("noise gate level must be a finite, non-negative RMS value, got {0}")]
    GateLevel(f32),
    #[error("reference pitch must lie between 400 and 480 Hz, got {0}")]
    ReferencePitch(f32),
    #[error("{0} must be at least 1")]
    Zero(&'static str),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Failed to read config: {0}")]
    Read(#[from] std::io::Error),
}

/// Noise gate applied to the frame RMS before a frame counts as signal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "GateSetting", into = "GateSetting")]
pub enum NoiseGate {
    /// Track the ambient level and gate relative to it.
    Auto,
    /// Fixed RMS threshold. `Level(0.0)` disables the gate.
    Level(f32),
}

/// On-disk form of [`NoiseGate`]: either the keyword `"auto"` or a number.
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum GateSetting {
    Keyword(String),
    Level(f32),
}

impl TryFrom<GateSetting> for NoiseGate {
    type Error = String;

    fn try_from(setting: GateSetting) -> Result<Self, Self::Error> {
        match setting {
            GateSetting::Keyword(word) if word.eq_ignore_ascii_case("auto") => Ok(NoiseGate::Auto),
            GateSetting::Keyword(word) => Err(format!("unknown noise gate '{word}', expected \"auto\" or a number")),
            GateSetting::Level(level) => Ok(NoiseGate::Level(level)),
        }
    }
}

impl From<NoiseGate> for GateSetting {
    fn from(gate: NoiseGate) -> Self {
        match gate {
            NoiseGate::Auto => GateSetting::Keyword("auto".into()),
            NoiseGate::Level(level) => GateSetting::Level(level),
        }
    }
}

/// Thresholds used by the two pitch estimators.
///
/// The YIN cutoff and the autocorrelation trim level are unrelated quantities
/// that happen to share a default; they are tuned independently.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorParams {
    /// CMND value a lag must fall below to count as a period candidate.
    pub yin_threshold: f32,
    /// YIN results at or below this confidence trigger the fallback.
    pub fallback_below: f32,
    /// RMS under which the autocorrelation estimator reports no pitch.
    pub silence_floor: f32,
    /// Amplitude used to trim quiet edges before autocorrelation.
    pub trim_threshold: f32,
    /// Shortest trimmed region worth correlating.
    pub min_trimmed_len: usize,
}

impl Default for EstimatorParams {
    fn default() -> Self {
        Self {
            yin_threshold: 0.15,
            fallback_below: 0.7,
            silence_floor: 0.008,
            trim_threshold: 0.15,
            min_trimmed_len: 10,
        }
    }
}

/// Coefficients of the adaptive (`"auto"`) noise gate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoGateParams {
    pub decay: f32,
    pub blend: f32,
    pub headroom: f32,
    /// Lowest threshold the gate may decay to.
    pub floor: f32,
}

impl Default for AutoGateParams {
    fn default() -> Self {
        Self {
            decay: 0.95,
            blend: 0.05,
            headroom: 0.3,
            floor: 0.008,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_fft_size")]
    pub fft_size: usize,
    /// Spectral smoothing applied by the spectrum analyser.
    #[serde(default = "default_smoothing_time_constant")]
    pub smoothing_time_constant: f32,
    /// Exponential smoothing factor for the displayed pitch.
    #[serde(default = "default_pitch_smoothing")]
    pub pitch_smoothing: f32,
    #[serde(default = "default_noise_gate")]
    pub noise_gate: NoiseGate,
    #[serde(default)]
    pub sensitivity: SensitivityRange,
    /// Frequency of A4 in Hz.
    #[serde(default = "default_reference_pitch")]
    pub reference_pitch: f32,
    /// Consecutive stable frames required before a note is opened.
    #[serde(default = "default_stability_frames")]
    pub stability_frames: usize,
    #[serde(default = "default_harmonic_count")]
    pub harmonic_count: usize,
    #[serde(default = "default_retention_ms")]
    pub history_retention_ms: f64,
    #[serde(default = "default_note_log_capacity")]
    pub note_log_capacity: usize,
    #[serde(default = "default_retention_ms")]
    pub capture_retention_ms: f64,
    #[serde(default)]
    pub estimator: EstimatorParams,
    #[serde(default)]
    pub auto_gate: AutoGateParams,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fft_size: default_fft_size(),
            smoothing_time_constant: default_smoothing_time_constant(),
            pitch_smoothing: default_pitch_smoothing(),
            noise_gate: default_noise_gate(),
            sensitivity: SensitivityRange::default(),
            reference_pitch: default_reference_pitch(),
            stability_frames: default_stability_frames(),
            harmonic_count: default_harmonic_count(),
            history_retention_ms: default_retention_ms(),
            note_log_capacity: default_note_log_capacity(),
            capture_retention_ms: default_retention_ms(),
            estimator: EstimatorParams::default(),
            auto_gate: AutoGateParams::default(),
        }
    }
}

fn default_fft_size() -> usize { 4096 }
fn default_smoothing_time_constant() -> f32 { 0.3 }
fn default_pitch_smoothing() -> f32 { 0.15 }
fn default_noise_gate() -> NoiseGate { NoiseGate::Auto }
fn default_reference_pitch() -> f32 { 440.0 }
fn default_stability_frames() -> usize { 8 }
fn default_harmonic_count() -> usize { 16 }
fn default_retention_ms() -> f64 { 60_000.0 }
fn default_note_log_capacity() -> usize { 100 }

impl EngineConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.fft_size.is_power_of_two() || !(256..=32768).contains(&self.fft_size) {
            return Err(ConfigError::FftSize(self.fft_size));
        }
        check_unit_interval("pitch_smoothing", self.pitch_smoothing)?;
        check_unit_interval("smoothing_time_constant", self.smoothing_time_constant)?;
        if let NoiseGate::Level(level) = self.noise_gate {
            if !level.is_finite() || level < 0.0 {
                return Err(ConfigError::GateLevel(level));
            }
        }
        if !(400.0..=480.0).contains(&self.reference_pitch) {
            return Err(ConfigError::ReferencePitch(self.reference_pitch));
        }
        if self.stability_frames == 0 {
            return Err(ConfigError::Zero("stability_frames"));
        }
        if self.harmonic_count == 0 {
            return Err(ConfigError::Zero("harmonic_count"));
        }
        if self.note_log_capacity == 0 {
            return Err(ConfigError::Zero("note_log_capacity"));
        }
        Ok(())
    }
}

fn check_unit_interval(name: &'static str, value: f32) -> Result<(), ConfigError> {
    if (0.0..1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::Smoothing { name, value })
    }
}
