//! # Pitch Detection Module
//!
//! Monophonic fundamental-frequency estimation for live instrument and voice
//! input. Two time-domain estimators are combined:
//!
//! - **YIN**, the primary estimator: cumulative-mean-normalized difference
//!   function with an absolute threshold, local-minimum descent and parabolic
//!   interpolation for sub-sample accuracy.
//! - **Autocorrelation**, the fallback: used only when YIN finds nothing or is
//!   not confident. It trims quiet edges and picks the strongest
//!   non-trivial correlation peak.
//!
//! Both return `None` rather than a sentinel frequency when no pitch is found.

use serde::{Deserialize, Serialize};

use crate::config::EstimatorParams;
use crate::fft::rms;

/// A detected fundamental. `frequency` is always finite and positive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PitchEstimate {
    pub frequency: f32,
    /// How periodic the frame looked, from 0.0 to 1.0.
    pub confidence: f32,
}

impl PitchEstimate {
    fn new(frequency: f32, confidence: f32) -> Option<Self> {
        if frequency.is_finite() && frequency > 0.0 {
            Some(Self {
                frequency,
                confidence: confidence.clamp(0.0, 1.0),
            })
        } else {
            None
        }
    }
}

/// Estimates the pitch of a frame, falling back to autocorrelation when YIN
/// is missing or not confident enough.
///
/// # Arguments
/// * `signal` - Unwindowed time-domain frame
/// * `sample_rate` - Sample rate in Hz
/// * `params` - Estimator thresholds
///
/// # Returns
/// * `Some(estimate)` - The more confident of the candidates
/// * `None` - Neither estimator found a pitch
pub fn estimate_pitch(signal: &[f32], sample_rate: u32, params: &EstimatorParams) -> Option<PitchEstimate> {
    let primary = detect_pitch_yin(signal, sample_rate, params.yin_threshold);
    if let Some(estimate) = primary {
        if estimate.confidence > params.fallback_below {
            return Some(estimate);
        }
    }

    let fallback = detect_pitch_autocorrelation(signal, sample_rate, params);
    match (primary, fallback) {
        (Some(yin), Some(acf)) if acf.confidence > yin.confidence => Some(acf),
        (Some(yin), _) => Some(yin),
        (None, acf) => acf,
    }
}

/// YIN pitch detection.
///
/// 1. Difference function `d(τ)` over a window of `N/2` samples, for lags
///    `0..=N/2`
/// 2. Cumulative mean normalization `d'(τ)`
/// 3. First lag from 2 upward with `d'(τ) < threshold`, then descend to the
///    bottom of that dip
/// 4. Parabolic interpolation around the chosen lag
///
/// # Arguments
/// * `signal` - Input audio signal
/// * `sample_rate` - Sample rate in Hz
/// * `threshold` - CMND cutoff, typically 0.1 to 0.2
///
/// # Returns
/// * `Some(estimate)` - Frequency with confidence `1 - d'(τ)`
/// * `None` - No lag crossed the threshold
pub fn detect_pitch_yin(signal: &[f32], sample_rate: u32, threshold: f32) -> Option<PitchEstimate> {
    let half = signal.len() / 2;
    if half < 3 {
        return None;
    }

    let cmnd = cumulative_mean_normalized_difference(signal, half);
    let last = cmnd.len() - 1;

    // --- Absolute threshold, then slide down to the local minimum ---
    let mut tau = (2..=last).find(|&t| cmnd[t] < threshold)?;
    while tau < last && cmnd[tau + 1] < cmnd[tau] {
        tau += 1;
    }

    let refined = refine_lag(&cmnd, tau);
    PitchEstimate::new(sample_rate as f32 / refined, 1.0 - cmnd[tau])
}

/// Computes `d'(τ)` for `τ` in `0..=window`.
fn cumulative_mean_normalized_difference(signal: &[f32], window: usize) -> Vec<f32> {
    let mut buffer = vec![0.0f32; window + 1];

    for tau in 1..=window {
        let mut diff = 0.0f64;
        for i in 0..window {
            let delta = (signal[i] - signal[i + tau]) as f64;
            diff += delta * delta;
        }
        buffer[tau] = diff as f32;
    }

    buffer[0] = 1.0;
    let mut running_sum = 0.0f64;
    for tau in 1..=window {
        running_sum += buffer[tau] as f64;
        buffer[tau] = if running_sum > 0.0 {
            (buffer[tau] as f64 * tau as f64 / running_sum) as f32
        } else {
            1.0
        };
    }
    buffer
}

/// Fractional lag of a minimum in `curve` at `tau`.
///
/// At either end of the curve there is only one neighbour, so the better of
/// `tau` and that neighbour is taken as-is.
fn refine_lag(curve: &[f32], tau: usize) -> f32 {
    let last = curve.len() - 1;
    if tau == 0 || tau == last {
        let neighbour = if tau == 0 { 1 } else { last - 1 };
        return if curve[tau] <= curve[neighbour] { tau as f32 } else { neighbour as f32 };
    }

    let (s0, s1, s2) = (curve[tau - 1], curve[tau], curve[tau + 1]);
    let denominator = 2.0 * (2.0 * s1 - s2 - s0);
    if denominator.abs() < f32::EPSILON {
        return tau as f32;
    }
    tau as f32 + (s2 - s0) / denominator
}

/// Normalized autocorrelation pitch detection.
///
/// Returns `None` for silent frames, frames whose loud region is too short,
/// and peaks at the very first or last lag where no interpolation is possible.
pub fn detect_pitch_autocorrelation(
    signal: &[f32],
    sample_rate: u32,
    params: &EstimatorParams,
) -> Option<PitchEstimate> {
    if rms(signal) < params.silence_floor {
        return None;
    }

    // --- Trim near-silent edges ---
    let start = signal.iter().position(|s| s.abs() >= params.trim_threshold)?;
    let end = signal.iter().rposition(|s| s.abs() >= params.trim_threshold)?;
    let trimmed = &signal[start..=end];
    let size = trimmed.len();
    if size < params.min_trimmed_len {
        return None;
    }

    let correlation: Vec<f32> = (0..size)
        .map(|lag| {
            trimmed[..size - lag]
                .iter()
                .zip(&trimmed[lag..])
                .map(|(a, b)| (a * b) as f64)
                .sum::<f64>() as f32
        })
        .collect();

    // --- Skip the slope down from the trivial peak at lag 0 ---
    let mut first_dip = 0;
    while first_dip + 1 < size && correlation[first_dip] > correlation[first_dip + 1] {
        first_dip += 1;
    }

    let (peak, peak_value) = correlation
        .iter()
        .enumerate()
        .skip(first_dip)
        .fold((first_dip, f32::NEG_INFINITY), |best, (lag, &value)| {
            if value > best.1 { (lag, value) } else { best }
        });

    if peak == 0 || peak + 1 >= size {
        return None;
    }

    let (x1, x2, x3) = (correlation[peak - 1], correlation[peak], correlation[peak + 1]);
    let a = (x1 + x3 - 2.0 * x2) / 2.0;
    let b = (x3 - x1) / 2.0;
    let refined = if a != 0.0 { peak as f32 - b / (2.0 * a) } else { peak as f32 };

    let zero_lag = correlation[0];
    if zero_lag <= 0.0 {
        return None;
    }
    PitchEstimate::new(sample_rate as f32 / refined, peak_value / zero_lag)
}
