//! # Windowing, Level and Spectrum Module
//!
//! Pure per-frame helpers (Hann window, RMS, DC removal) plus a
//! [`SpectrumAnalyser`] for hosts that have no upstream magnitude spectrum.
//!
//! ## Features
//! - Hann windowing for reduced spectral leakage
//! - RMS loudness over the unwindowed frame
//! - High-performance FFT using RustFFT
//! - Temporal smoothing and 0-255 byte quantization of magnitudes

use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::sync::Arc;

/// Lower and upper bound of the byte-quantized magnitude range, in dB.
const MIN_DECIBELS: f32 = -100.0;
const MAX_DECIBELS: f32 = -30.0;

/// Hann window coefficient for sample `i` of an `n`-sample frame.
pub fn hann_coefficient(i: usize, n: usize) -> f32 {
    if n < 2 {
        return 1.0;
    }
    0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / (n - 1) as f32).cos())
}

/// Precomputes a Hann window of length `n`.
pub fn hann_window(n: usize) -> Vec<f32> {
    (0..n).map(|i| hann_coefficient(i, n)).collect()
}

/// Returns a windowed copy of `frame`, leaving the frame itself untouched.
///
/// `window` must have the same length as `frame`; extra samples on either
/// side are ignored.
pub fn windowed(frame: &[f32], window: &[f32]) -> Vec<f32> {
    frame.iter().zip(window).map(|(s, w)| s * w).collect()
}

/// Root-mean-square level of a frame. Empty frames have zero level.
pub fn rms(signal: &[f32]) -> f32 {
    if signal.is_empty() {
        return 0.0;
    }
    (signal.iter().map(|&s| s * s).sum::<f32>() / signal.len() as f32).sqrt()
}

/// Removes the DC offset from a signal by making its average value zero.
fn remove_dc_offset(signal: &mut [f32]) {
    let len = signal.len();
    if len == 0 {
        return;
    }
    let avg = signal.iter().sum::<f32>() / len as f32;
    if avg.abs() > 1e-6 {
        for sample in signal.iter_mut() {
            *sample -= avg;
        }
    }
}

/// Produces byte-quantized magnitude spectra from time-domain frames.
///
/// Each call to [`SpectrumAnalyser::process`]:
/// 1. Removes DC offset and applies a Hann window
/// 2. Runs a forward FFT of `fft_size` points
/// 3. Blends normalized magnitudes with the previous frame using the
///    smoothing time constant
/// 4. Maps [-100 dB, -30 dB] onto 0..=255
pub struct SpectrumAnalyser {
    fft_size: usize,
    smoothing: f32,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    smoothed: Vec<f32>,
    buffer: Vec<Complex<f32>>,
}

impl SpectrumAnalyser {
    pub fn new(fft_size: usize, smoothing_time_constant: f32) -> Self {
        let mut planner = FftPlanner::new();
        Self {
            fft_size,
            smoothing: smoothing_time_constant.clamp(0.0, 0.999),
            fft: planner.plan_fft_forward(fft_size),
            window: hann_window(fft_size),
            smoothed: vec![0.0; fft_size / 2],
            buffer: vec![Complex { re: 0.0, im: 0.0 }; fft_size],
        }
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    /// Computes the next `fft_size / 2` byte magnitudes.
    ///
    /// Short frames are zero-padded and long frames truncated to `fft_size`.
    pub fn process(&mut self, frame: &[f32]) -> Vec<u8> {
        let take = frame.len().min(self.fft_size);
        let mut signal = frame[..take].to_vec();
        remove_dc_offset(&mut signal);
        signal.resize(self.fft_size, 0.0);

        for (slot, sample) in self.buffer.iter_mut().zip(windowed(&signal, &self.window)) {
            *slot = Complex { re: sample, im: 0.0 };
        }
        self.fft.process(&mut self.buffer);

        let scale = 1.0 / self.fft_size as f32;
        let tau = self.smoothing;
        self.smoothed
            .iter_mut()
            .zip(&self.buffer)
            .map(|(prev, c)| {
                *prev = tau * *prev + (1.0 - tau) * c.norm() * scale;
                to_byte(*prev)
            })
            .collect()
    }

    /// Clears the temporal smoothing state.
    pub fn reset(&mut self) {
        self.smoothed.iter_mut().for_each(|m| *m = 0.0);
    }
}

fn to_byte(magnitude: f32) -> u8 {
    if magnitude <= 0.0 {
        return 0;
    }
    let db = 20.0 * magnitude.log10();
    let scaled = 255.0 * (db - MIN_DECIBELS) / (MAX_DECIBELS - MIN_DECIBELS);
    scaled.clamp(0.0, 255.0) as u8
}
