//! # Analysis Engine
//!
//! Owns every piece of per-session analysis state and runs one processing
//! cycle per call to [`Engine::process_cycle`]:
//!
//! 1. Level and noise gate
//! 2. Pitch estimation (YIN, autocorrelation fallback)
//! 3. Note classification
//! 4. Harmonic analysis, only with a valid pitch
//! 5. Note segmentation
//! 6. History and note log update
//! 7. Publishing to subscribers
//!
//! The engine is single-threaded. Cycles are driven by the host's periodic
//! trigger (nominally the ~60 Hz display refresh); when a cycle overruns, the
//! host should drop the late trigger instead of queueing it. Only the raw
//! capture buffer is shared with other threads, see [`SharedCapture`].

use std::sync::Arc;
use thiserror::Error;

use crate::capture::{CapturedAudio, SharedCapture};
use crate::config::{ConfigError, EngineConfig, NoiseGate};
use crate::export::ExportError;
use crate::fft::{self, SpectrumAnalyser};
use crate::harmonics::{analyze_harmonics, estimate_inharmonicity};
use crate::history::{HistorySample, NoteLog, RetentionBuffer};
use crate::pitch::{estimate_pitch, PitchEstimate};
use crate::publisher::{EngineEvent, Publisher, SubscriptionHandle};
use crate::segmentation::{FrameObservation, NoteEvent, NoteSegmenter, SegmenterState};
use crate::tuning::{calculate_cents_deviation, classify, NoteClassification};
use crate::{AnalysisFrame, SampleFrame, SpectrumFrame};

/// Jumps wider than this bypass pitch smoothing so note changes snap.
const SMOOTHING_RESET_CENTS: f32 = 100.0;

/// Weight of the newest interval in the frames-per-second estimate.
const FPS_BLEND: f32 = 0.1;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Mutable per-session state. Replaced wholesale on (re)start.
#[derive(Debug, Clone)]
struct EngineState {
    smoothed_frequency: Option<f32>,
    rms: f32,
    is_silent: bool,
    gate_level: f32,
    last_classification: Option<NoteClassification>,
    segmenter: NoteSegmenter,
    last_cycle_ms: Option<f64>,
    fps: f32,
}

impl EngineState {
    fn new(config: &EngineConfig) -> Self {
        Self {
            smoothed_frequency: None,
            rms: 0.0,
            is_silent: true,
            gate_level: 0.0,
            last_classification: None,
            segmenter: NoteSegmenter::new(config.stability_frames),
            last_cycle_ms: None,
            fps: 0.0,
        }
    }
}

pub struct Engine {
    config: EngineConfig,
    running: bool,
    state: EngineState,
    analyser: SpectrumAnalyser,
    history: RetentionBuffer<HistorySample>,
    notes: NoteLog,
    capture: SharedCapture,
    publisher: Publisher,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("running", &self.running)
            .field("fft_size", &self.config.fft_size)
            .field("history", &self.history.len())
            .field("notes", &self.notes.len())
            .field("publisher", &self.publisher)
            .finish()
    }
}

impl Engine {
    /// Creates a stopped engine. Call [`Engine::start`] before feeding frames.
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self {
            state: EngineState::new(&config),
            analyser: SpectrumAnalyser::new(config.fft_size, config.smoothing_time_constant),
            history: RetentionBuffer::new(config.history_retention_ms),
            notes: NoteLog::new(config.note_log_capacity),
            capture: SharedCapture::new(config.capture_retention_ms),
            publisher: Publisher::new(),
            running: false,
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Starts (or restarts) analysis with fresh state.
    pub fn start(&mut self) {
        self.state = EngineState::new(&self.config);
        self.analyser.reset();
        self.running = true;
        log::info!(
            "Engine started: fft_size={}, gate={:?}, a4={} Hz",
            self.config.fft_size, self.config.noise_gate, self.config.reference_pitch
        );
    }

    /// Stops analysis. An open note is discarded, not emitted, and all three
    /// buffers are cleared, including audio pushed through a capture handle
    /// while the engine was never started.
    pub fn stop(&mut self) {
        self.state.segmenter.reset();
        self.history.clear();
        self.notes.clear();
        self.capture.clear();
        if !self.running {
            return;
        }
        self.running = false;
        self.publisher.publish(&EngineEvent::HistoryCleared);
        log::info!("Engine stopped");
    }

    /// Applies a new configuration before the next cycle.
    ///
    /// Size-dependent buffers are reallocated and the pitch and segmentation
    /// state reset, so no cycle ever runs against a stale FFT size.
    pub fn reconfigure(&mut self, config: EngineConfig) -> Result<(), EngineError> {
        config.validate()?;

        if config.fft_size != self.config.fft_size
            || config.smoothing_time_constant != self.config.smoothing_time_constant
        {
            self.analyser = SpectrumAnalyser::new(config.fft_size, config.smoothing_time_constant);
        }
        self.history.set_retention_ms(config.history_retention_ms);
        self.notes.set_capacity(config.note_log_capacity);
        self.capture.set_retention_ms(config.capture_retention_ms);

        log::info!(
            "Engine reconfigured: fft_size {} -> {}, sensitivity {:?}",
            self.config.fft_size, config.fft_size, config.sensitivity
        );
        self.config = config;
        self.state = EngineState::new(&self.config);
        Ok(())
    }

    /// Runs one full processing cycle.
    ///
    /// # Arguments
    /// * `frame` - Time-domain samples, exactly `fft_size` long
    /// * `spectrum` - Upstream magnitude spectrum; computed from `frame` when `None`
    /// * `now_ms` - Monotonic timestamp of this cycle
    ///
    /// # Returns
    /// * `Some(frame)` - The published analysis frame
    /// * `None` - The engine is stopped or the frame had the wrong size
    pub fn process_cycle(
        &mut self,
        frame: SampleFrame<'_>,
        spectrum: Option<&SpectrumFrame>,
        now_ms: f64,
    ) -> Option<Arc<AnalysisFrame>> {
        if !self.running {
            return None;
        }
        let fft_size = self.config.fft_size;
        if frame.samples.len() != fft_size {
            log::warn!(
                "Skipping cycle: frame has {} samples, expected {}",
                frame.samples.len(),
                fft_size
            );
            return None;
        }

        // --- Level and gate ---
        let rms = fft::rms(frame.samples);
        let gate_threshold = self.update_gate(rms);
        let is_silent = rms < gate_threshold;

        // --- Pitch and classification ---
        let pitch = if is_silent {
            None
        } else {
            estimate_pitch(frame.samples, frame.sample_rate, &self.config.estimator)
        };
        let classification = pitch.and_then(|p| classify(p.frequency, self.config.reference_pitch));
        let voiced = pitch.filter(|_| classification.is_some());
        let smoothed_frequency = self.smooth(voiced);

        // --- Harmonics ---
        let spectrum = self.resolve_spectrum(frame, spectrum);
        let harmonics = match voiced {
            Some(p) => analyze_harmonics(p.frequency, &spectrum, self.config.harmonic_count),
            None => Vec::new(),
        };
        let inharmonicity = estimate_inharmonicity(&harmonics);

        // --- Segmentation ---
        let observation = FrameObservation {
            time_ms: now_ms,
            classification,
            frequency: voiced.map(|p| p.frequency),
            confidence: voiced.map_or(0.0, |p| p.confidence),
            is_silent,
        };
        if let Some(event) = self.state.segmenter.observe(&observation, self.notes.last()) {
            self.notes.push(event.clone());
            self.publisher.publish(&EngineEvent::NoteClosed(event));
        }

        // --- History ---
        self.history.push(
            HistorySample {
                time_ms: now_ms,
                frequency: voiced.map(|p| p.frequency),
                note: classification.map(|c| c.note),
                octave: classification.map(|c| c.octave),
                cents: classification.map_or(0, |c| c.cents),
                confidence: voiced.map_or(0.0, |p| p.confidence),
                rms,
                is_silent,
            },
            now_ms,
        );

        self.state.rms = rms;
        self.state.is_silent = is_silent;
        self.state.last_classification = classification;
        self.update_fps(now_ms);

        let analysis = Arc::new(AnalysisFrame {
            timestamp_ms: now_ms,
            pitch,
            smoothed_frequency,
            classification,
            tuning_status: classification.map(|c| self.config.sensitivity.status(c.cents)),
            rms,
            is_silent,
            gate_threshold,
            waveform: frame.samples.to_vec(),
            spectrum: spectrum.magnitudes,
            harmonics,
            inharmonicity,
            history: self.history.snapshot(),
            notes: self.notes.snapshot(),
            segmenter_state: self.state.segmenter.state(),
            sample_rate: frame.sample_rate,
            fft_size,
            fps: self.state.fps,
        });
        self.publisher.publish(&EngineEvent::Frame(Arc::clone(&analysis)));
        Some(analysis)
    }

    /// Empties the pitch history and note log and notifies subscribers.
    /// Captured audio is kept.
    pub fn clear_history(&mut self) {
        self.history.clear();
        self.notes.clear();
        self.publisher.publish(&EngineEvent::HistoryCleared);
    }

    pub fn history(&self) -> impl Iterator<Item = &HistorySample> {
        self.history.iter()
    }

    pub fn notes(&self) -> impl Iterator<Item = &NoteEvent> {
        self.notes.iter()
    }

    pub fn segmenter_state(&self) -> SegmenterState {
        self.state.segmenter.state()
    }

    pub fn last_classification(&self) -> Option<NoteClassification> {
        self.state.last_classification
    }

    pub fn smoothed_frequency(&self) -> Option<f32> {
        self.state.smoothed_frequency
    }

    /// Level and gate verdict of the latest cycle.
    pub fn level(&self) -> (f32, bool) {
        (self.state.rms, self.state.is_silent)
    }

    // --- Raw capture ---

    /// Handle for an acquisition thread to push blocks without touching the engine.
    pub fn capture_handle(&self) -> SharedCapture {
        self.capture.clone()
    }

    pub fn push_audio_chunk(&self, samples: Vec<f32>, sample_rate: u32, now_ms: f64) {
        self.capture.push(samples, sample_rate, now_ms);
    }

    pub fn extract_range(&self, start_ms: f64, end_ms: f64) -> Option<CapturedAudio> {
        self.capture.extract_range(start_ms, end_ms)
    }

    /// Encodes the captured audio between two timestamps as WAV bytes.
    pub fn export_wav(&self, start_ms: f64, end_ms: f64) -> Result<Vec<u8>, ExportError> {
        self.extract_range(start_ms, end_ms)
            .ok_or(ExportError::EmptyRange { start_ms, end_ms })?
            .to_wav()
    }

    // --- Subscriptions ---

    /// Registers an observer. It runs synchronously inside every cycle and
    /// must not block.
    pub fn subscribe<F>(&mut self, callback: F) -> SubscriptionHandle
    where
        F: FnMut(&EngineEvent) + Send + 'static,
    {
        self.publisher.subscribe(callback)
    }

    pub fn subscribe_channel(&mut self, capacity: usize) -> (SubscriptionHandle, crossbeam_channel::Receiver<EngineEvent>) {
        self.publisher.subscribe_channel(capacity)
    }

    pub fn unsubscribe(&mut self, handle: SubscriptionHandle) -> bool {
        self.publisher.unsubscribe(handle)
    }

    fn update_gate(&mut self, rms: f32) -> f32 {
        match self.config.noise_gate {
            NoiseGate::Level(level) => level,
            NoiseGate::Auto => {
                let p = self.config.auto_gate;
                self.state.gate_level = p.decay * self.state.gate_level + p.blend * p.headroom * rms;
                self.state.gate_level.max(p.floor)
            }
        }
    }

    fn smooth(&mut self, pitch: Option<PitchEstimate>) -> Option<f32> {
        let alpha = self.config.pitch_smoothing;
        self.state.smoothed_frequency = match (pitch, self.state.smoothed_frequency) {
            (None, _) => None,
            (Some(p), Some(prev)) if calculate_cents_deviation(p.frequency, prev).abs() <= SMOOTHING_RESET_CENTS => {
                Some(alpha * prev + (1.0 - alpha) * p.frequency)
            }
            (Some(p), _) => Some(p.frequency),
        };
        self.state.smoothed_frequency
    }

    fn resolve_spectrum(&mut self, frame: SampleFrame<'_>, upstream: Option<&SpectrumFrame>) -> SpectrumFrame {
        let fft_size = self.config.fft_size;
        match upstream {
            Some(s) if s.fft_size == fft_size && s.magnitudes.len() == fft_size / 2 => s.clone(),
            other => {
                if let Some(s) = other {
                    log::warn!(
                        "Upstream spectrum has {} bins for fft_size {}, recomputing locally",
                        s.magnitudes.len(),
                        s.fft_size
                    );
                }
                let bytes = self.analyser.process(frame.samples);
                SpectrumFrame::from_bytes(&bytes, fft_size, frame.sample_rate)
            }
        }
    }

    fn update_fps(&mut self, now_ms: f64) {
        if let Some(last) = self.state.last_cycle_ms {
            let elapsed = now_ms - last;
            if elapsed > 0.0 {
                let instant = (1000.0 / elapsed) as f32;
                self.state.fps = if self.state.fps == 0.0 {
                    instant
                } else {
                    (1.0 - FPS_BLEND) * self.state.fps + FPS_BLEND * instant
                };
            }
        }
        self.state.last_cycle_ms = Some(now_ms);
    }
}
