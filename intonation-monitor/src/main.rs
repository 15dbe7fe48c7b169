//! # Intonation Monitor
//!
//! Headless host for the analysis engine. Captures the default input device,
//! runs one analysis cycle per ~60 Hz tick and logs every completed note.
//!
//! ## Architecture
//! - **Audio callback**: cpal delivers mono blocks over a bounded channel
//! - **Main loop**: one `select!` over audio blocks, the cycle ticker and the
//!   run deadline
//! - **Backpressure**: the ticker holds at most one pending tick, so an
//!   overrunning cycle drops triggers instead of queueing them

mod cli;
mod window;

use anyhow::{Context, Result};
use clap::Parser;
use cpal::traits::StreamTrait;
use std::fs;
use std::time::{Duration, Instant};

use cli::Cli;
use window::{ChunkAssembler, FrameWindow};
use intonation_core::capture::CAPTURE_BLOCK_SIZE;
use intonation_core::{audio, Engine, EngineConfig, EngineEvent, SampleFrame};

/// Period of the analysis trigger (~60 Hz).
const CYCLE_PERIOD: Duration = Duration::from_micros(16_667);

/// Samples per block delivered by the audio callback, well under one cycle
/// period at common rates so the frame advances between ticks.
const HOP_SIZE: usize = 512;

/// Queued audio blocks before the callback starts dropping them.
const AUDIO_QUEUE_BLOCKS: usize = 128;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    let fft_size = config.fft_size;

    let mut engine = Engine::new(config)?;
    let _notes = engine.subscribe(|event| {
        if let EngineEvent::NoteClosed(note) = event {
            let interval = note
                .interval_semitones
                .map_or_else(|| "-".to_string(), |i| format!("{i:+}"));
            log::info!(
                "[NOTE] #{} {}{} {:+} cents, {:.1} Hz, {:.0} ms, interval {}",
                note.id, note.note, note.octave, note.cents, note.frequency, note.duration_ms, interval
            );
        }
    });

    let (raw_audio_tx, raw_audio_rx) = crossbeam_channel::bounded::<Vec<f32>>(AUDIO_QUEUE_BLOCKS);
    let (stream, sample_rate) = audio::start_audio_capture(raw_audio_tx, HOP_SIZE)
        .context("Failed to start audio capture")?;
    log::info!("[AUDIO] Capture running at {} Hz", sample_rate);

    let clock = Instant::now();
    let now_ms = || clock.elapsed().as_secs_f64() * 1000.0;

    let capture = engine.capture_handle();
    let mut window = FrameWindow::new(fft_size);
    let mut chunks = ChunkAssembler::new(CAPTURE_BLOCK_SIZE);
    let ticker = crossbeam_channel::tick(CYCLE_PERIOD);
    let deadline = crossbeam_channel::after(Duration::from_secs(cli.seconds));
    let mut cycles: u64 = 0;

    engine.start();
    loop {
        crossbeam_channel::select! {
            recv(raw_audio_rx) -> msg => match msg {
                Ok(block) => {
                    window.extend(&block);
                    for chunk in chunks.push(&block) {
                        capture.push(chunk, sample_rate, now_ms());
                    }
                }
                Err(_) => {
                    log::warn!("[AUDIO] Audio channel closed");
                    break;
                }
            },
            recv(ticker) -> _ => {
                let Some(frame) = window.take_frame() else { continue };
                let Some(analysis) = engine.process_cycle(SampleFrame::new(&frame, sample_rate), None, now_ms()) else {
                    continue;
                };
                cycles += 1;
                if cli.status_every > 0 && cycles % u64::from(cli.status_every) == 0 {
                    log::info!(
                        "[STATUS] {} {:.1} Hz, rms {:.3}, {:.0} fps, {} notes",
                        analysis.display_note(),
                        analysis.display_frequency(),
                        analysis.rms,
                        analysis.fps,
                        analysis.notes.len()
                    );
                }
            },
            recv(deadline) -> _ => {
                log::info!("[MAIN] Run time of {} s reached", cli.seconds);
                break;
            },
        }
    }

    if let Err(e) = stream.pause() {
        log::warn!("[AUDIO] Error pausing stream: {}", e);
    }
    drop(stream);

    // Export before stopping: stop clears every buffer.
    let end_ms = now_ms();
    if let Some(seconds) = cli.export_loop {
        let wav = engine
            .export_wav(end_ms - seconds * 1000.0, end_ms)
            .context("Failed to export loop")?;
        fs::write(&cli.wav, &wav).with_context(|| format!("Failed to write {}", cli.wav.display()))?;
        log::info!("[EXPORT] Wrote {} bytes to {}", wav.len(), cli.wav.display());
    }
    if let Some(path) = &cli.notes_json {
        let notes: Vec<_> = engine.notes().collect();
        let json = serde_json::to_string_pretty(&notes)?;
        fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
        log::info!("[EXPORT] Wrote {} notes to {}", notes.len(), path.display());
    }

    engine.stop();
    log::info!("[MAIN] Finished after {} cycles", cycles);
    Ok(())
}
