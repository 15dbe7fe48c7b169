//! # Capture Module
//!
//! Keeps the last minute of raw input audio so a loop can be cut out and
//! exported after the fact. Capture runs independently of the analysis cycle:
//! every incoming block is stamped and appended as it arrives.
//!
//! In a multi-threaded host the acquisition callback and the engine share a
//! [`SharedCapture`]; the lock guards only this buffer, never analysis state.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::export::{self, ExportError};
use crate::history::{RetentionBuffer, Timestamped};

/// Nominal number of samples per captured block.
pub const CAPTURE_BLOCK_SIZE: usize = 4096;

/// One block of mono input audio.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    pub timestamp_ms: f64,
    pub samples: Vec<f32>,
}

impl Timestamped for AudioChunk {
    fn timestamp_ms(&self) -> f64 {
        self.timestamp_ms
    }
}

/// Contiguous audio cut from the capture buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl CapturedAudio {
    pub fn duration_ms(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 * 1000.0 / self.sample_rate as f64
    }

    /// Encodes the audio as a 16-bit mono WAV file.
    pub fn to_wav(&self) -> Result<Vec<u8>, ExportError> {
        export::encode_wav(&self.samples, self.sample_rate)
    }
}

/// Time-windowed ring of captured blocks.
#[derive(Debug, Clone)]
pub struct CaptureBuffer {
    chunks: RetentionBuffer<AudioChunk>,
    sample_rate: u32,
}

impl CaptureBuffer {
    pub fn new(retention_ms: f64) -> Self {
        Self {
            chunks: RetentionBuffer::new(retention_ms),
            sample_rate: 0,
        }
    }

    /// Stamps and stores one block, evicting blocks older than the window.
    ///
    /// A change of sample rate discards earlier blocks so an export never
    /// mixes rates.
    pub fn push(&mut self, samples: Vec<f32>, sample_rate: u32, now_ms: f64) {
        if sample_rate != self.sample_rate {
            if !self.chunks.is_empty() {
                log::info!(
                    "Capture sample rate changed {} -> {} Hz, dropping {} blocks",
                    self.sample_rate, sample_rate, self.chunks.len()
                );
            }
            self.chunks.clear();
            self.sample_rate = sample_rate;
        }
        self.chunks.push(AudioChunk { timestamp_ms: now_ms, samples }, now_ms);
    }

    /// Concatenates, in order, every block stamped within `[start_ms, end_ms]`.
    ///
    /// # Returns
    /// * `Some(audio)` - Samples of all matching blocks plus the sample rate
    /// * `None` - No block falls in the range
    pub fn extract_range(&self, start_ms: f64, end_ms: f64) -> Option<CapturedAudio> {
        let matching: Vec<&AudioChunk> = self
            .chunks
            .iter()
            .filter(|c| c.timestamp_ms >= start_ms && c.timestamp_ms <= end_ms)
            .collect();
        if matching.is_empty() {
            return None;
        }

        let total = matching.iter().map(|c| c.samples.len()).sum();
        let mut samples = Vec::with_capacity(total);
        for chunk in matching {
            samples.extend_from_slice(&chunk.samples);
        }
        Some(CapturedAudio {
            samples,
            sample_rate: self.sample_rate,
        })
    }

    pub fn set_retention_ms(&mut self, retention_ms: f64) {
        self.chunks.set_retention_ms(retention_ms);
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn clear(&mut self) {
        self.chunks.clear();
    }
}

/// A [`CaptureBuffer`] shared between the acquisition producer and the engine.
#[derive(Debug, Clone)]
pub struct SharedCapture(Arc<Mutex<CaptureBuffer>>);

impl SharedCapture {
    pub fn new(retention_ms: f64) -> Self {
        Self(Arc::new(Mutex::new(CaptureBuffer::new(retention_ms))))
    }

    // A panic while holding the lock leaves the deque structurally intact,
    // so a poisoned guard is still usable.
    fn lock(&self) -> MutexGuard<'_, CaptureBuffer> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, samples: Vec<f32>, sample_rate: u32, now_ms: f64) {
        self.lock().push(samples, sample_rate, now_ms);
    }

    pub fn extract_range(&self, start_ms: f64, end_ms: f64) -> Option<CapturedAudio> {
        self.lock().extract_range(start_ms, end_ms)
    }

    pub fn set_retention_ms(&self, retention_ms: f64) {
        self.lock().set_retention_ms(retention_ms);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}
