use linreg::linear_regression;
use serde::{Deserialize, Serialize};

use crate::SpectrumFrame;

/// Fixed display labels for the first eight partials.
const PARTIAL_LABELS: [&str; 8] = [
    "Root",
    "Octave",
    "Octave + 5th",
    "2 Octaves",
    "2 Octaves + Maj 3rd",
    "2 Octaves + 5th",
    "2 Octaves + min 7th",
    "3 Octaves",
];

/// Energy and tuning of one partial of the current tone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarmonicPartial {
    pub number: u32,                 // The partial number (n=1, 2, 3...)
    pub target_frequency: f32,       // n times the fundamental, in Hz
    pub measured_frequency: f32,     // Centre of the strongest bin near the target
    pub energy: f32,                 // Peak magnitude scaled to 0.0..=1.0
    pub cents_offset: i32,           // Measured relative to target
    pub label: String,
}

/// Display label for a 1-based partial number.
pub fn partial_label(number: u32) -> String {
    match number {
        1..=8 => PARTIAL_LABELS[number as usize - 1].to_string(),
        n => format!("P{n}"),
    }
}

/// Extracts the first `count` partials of `fundamental` from a magnitude spectrum.
///
/// Each partial takes the loudest bin within `max(2, round(n / 2))` bins of
/// its target. Partials whose target bin lies beyond the spectrum are skipped.
pub fn analyze_harmonics(fundamental: f32, spectrum: &SpectrumFrame, count: usize) -> Vec<HarmonicPartial> {
    let bins = spectrum.magnitudes.len();
    let bin_width = spectrum.bin_width();
    if !fundamental.is_finite() || fundamental <= 0.0 || bins == 0 || bin_width <= 0.0 {
        return Vec::new();
    }

    (1..=count as u32)
        .filter_map(|number| {
            let target = fundamental * number as f32;
            let target_bin = (target / bin_width).round() as usize;
            if target_bin >= bins {
                return None;
            }

            let radius = ((number as f32 * 0.5).round() as usize).max(2);
            let lo = target_bin.saturating_sub(radius);
            let hi = (target_bin + radius).min(bins - 1);

            // First maximum wins on ties, so a flat spectrum reports the lowest bin.
            let (peak_bin, peak) = (lo..=hi).fold((target_bin, f32::NEG_INFINITY), |best, bin| {
                let value = spectrum.magnitudes[bin];
                if value > best.1 { (bin, value) } else { best }
            });

            let measured = peak_bin as f32 * bin_width;
            let cents = 1200.0 * (measured / target).log2();
            Some(HarmonicPartial {
                number,
                target_frequency: target,
                measured_frequency: measured,
                energy: (peak / 255.0).clamp(0.0, 1.0),
                cents_offset: if cents.is_finite() { cents.round() as i32 } else { 0 },
                label: partial_label(number),
            })
        })
        .collect()
}

/// Estimates the inharmonicity coefficient `B` from measured partials.
///
/// Stiff strings follow `f_n = n·f0·sqrt(1 + B·n²)`, so `(f_n / n)²` is linear
/// in `n²` with slope `f0²·B` and intercept `f0²`. Silent partials are ignored.
///
/// # Returns
/// * `Some(b)` - Fitted coefficient from at least three partials
/// * `None` - Too few partials or a degenerate fit
pub fn estimate_inharmonicity(partials: &[HarmonicPartial]) -> Option<f32> {
    let (xs, ys): (Vec<f64>, Vec<f64>) = partials
        .iter()
        .filter(|p| p.number > 0 && p.measured_frequency > 0.0 && p.energy > 0.0)
        .map(|p| {
            let n = p.number as f64;
            let f_n = p.measured_frequency as f64;
            (n * n, (f_n / n) * (f_n / n))
        })
        .unzip();

    if xs.len() < 3 {
        return None;
    }

    let (slope, intercept) = linear_regression::<_, _, f64>(&xs, &ys).ok()?;
    if intercept.abs() > 1e-6 {
        let b = (slope / intercept) as f32;
        b.is_finite().then_some(b)
    } else {
        None
    }
}
