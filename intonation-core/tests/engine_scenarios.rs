//! End-to-end scenarios driving the engine the way a host would: one frame
//! per ~60 Hz trigger, with a capture thread feeding raw blocks.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use intonation_core::config::{EngineConfig, NoiseGate};
use intonation_core::export::WAV_HEADER_LEN;
use intonation_core::segmentation::SegmenterState;
use intonation_core::tuning::NoteName;
use intonation_core::{Engine, EngineEvent, SampleFrame};

const SAMPLE_RATE: u32 = 48_000;
const FFT_SIZE: usize = 4096;
const CYCLE_MS: f64 = 1000.0 / 60.0;
/// Samples that elapse between two 60 Hz cycles.
const HOP: usize = (SAMPLE_RATE as usize) / 60;

fn sine(freq: f64, len: usize) -> Vec<f32> {
    (0..len)
        .map(|i| (0.6 * (2.0 * std::f64::consts::PI * freq * i as f64 / SAMPLE_RATE as f64).sin()) as f32)
        .collect()
}

fn gate_disabled() -> EngineConfig {
    EngineConfig {
        noise_gate: NoiseGate::Level(0.0),
        ..EngineConfig::default()
    }
}

#[test]
fn sustained_a440_yields_one_note_event() {
    let mut engine = Engine::new(gate_disabled()).unwrap();
    let (_handle, events) = engine.subscribe_channel(1024);
    engine.start();

    // 200 ms of tone at 60 cycles per second.
    let cycles = 12;
    let signal = sine(440.0, FFT_SIZE + HOP * cycles);
    for i in 0..cycles {
        let frame = &signal[i * HOP..i * HOP + FFT_SIZE];
        let analysis = engine
            .process_cycle(SampleFrame::new(frame, SAMPLE_RATE), None, i as f64 * CYCLE_MS)
            .unwrap();
        let c = analysis.classification.unwrap();
        assert_eq!((c.note, c.octave), (NoteName::A, 4));

        match i {
            0..=6 => assert_eq!(engine.segmenter_state(), SegmenterState::Stabilizing { frames: i + 1 }),
            _ => assert_eq!(
                engine.segmenter_state(),
                SegmenterState::Sustained { note: NoteName::A, octave: 4 }
            ),
        }
    }
    assert_eq!(engine.notes().count(), 0, "notes are logged only once they end");

    let silence = vec![0.0; FFT_SIZE];
    engine.process_cycle(SampleFrame::new(&silence, SAMPLE_RATE), None, cycles as f64 * CYCLE_MS);

    let notes: Vec<_> = engine.notes().cloned().collect();
    assert_eq!(notes.len(), 1);
    let note = &notes[0];
    assert_eq!((note.note, note.octave, note.midi), (NoteName::A, 4, 69));
    assert!(note.cents.abs() <= 5, "cents {}", note.cents);
    assert!((note.frequency - 440.0).abs() < 1.5);
    assert!((note.duration_ms - cycles as f64 * CYCLE_MS).abs() < 1e-6);
    assert_eq!(note.interval_semitones, None);

    let closed: Vec<_> = events
        .try_iter()
        .filter_map(|e| match e {
            EngineEvent::NoteClosed(event) => Some(event),
            _ => None,
        })
        .collect();
    assert_eq!(closed, notes);
}

#[test]
fn silence_produces_no_events() {
    let mut engine = Engine::new(EngineConfig::default()).unwrap();
    let (_handle, events) = engine.subscribe_channel(1024);
    engine.start();

    let silence = vec![0.0; FFT_SIZE];
    let mut t = 0.0;
    while t <= 500.0 {
        let analysis = engine
            .process_cycle(SampleFrame::new(&silence, SAMPLE_RATE), None, t)
            .unwrap();
        assert!(analysis.is_silent);
        assert_eq!(analysis.display_note(), "--");
        assert_eq!(engine.segmenter_state(), SegmenterState::Silent);
        t += CYCLE_MS;
    }

    assert_eq!(engine.notes().count(), 0);
    assert!(events.try_iter().all(|e| matches!(e, EngineEvent::Frame(_))));
}

#[test]
fn short_tone_never_becomes_a_note() {
    let mut engine = Engine::new(EngineConfig {
        fft_size: 2048,
        ..gate_disabled()
    })
    .unwrap();
    engine.start();

    let tone = sine(440.0, 2048);
    let silence = vec![0.0; 2048];
    let mut t = 0.0;
    for _ in 0..3 {
        for _ in 0..7 {
            engine.process_cycle(SampleFrame::new(&tone, SAMPLE_RATE), None, t);
            t += CYCLE_MS;
        }
        assert_eq!(engine.segmenter_state(), SegmenterState::Stabilizing { frames: 7 });
        engine.process_cycle(SampleFrame::new(&silence, SAMPLE_RATE), None, t);
        t += CYCLE_MS;
    }
    assert_eq!(engine.notes().count(), 0);
}

#[test]
fn melody_records_intervals() {
    let mut engine = Engine::new(EngineConfig {
        fft_size: 2048,
        ..gate_disabled()
    })
    .unwrap();
    engine.start();

    let silence = vec![0.0; 2048];
    let mut t = 0.0;
    for freq in [261.63, 329.63, 329.63, 293.66] {
        let tone = sine(freq, 2048);
        for _ in 0..10 {
            engine.process_cycle(SampleFrame::new(&tone, SAMPLE_RATE), None, t);
            t += CYCLE_MS;
        }
        engine.process_cycle(SampleFrame::new(&silence, SAMPLE_RATE), None, t);
        t += CYCLE_MS;
    }

    let notes: Vec<_> = engine.notes().collect();
    let names: Vec<_> = notes.iter().map(|n| (n.note, n.octave)).collect();
    assert_eq!(
        names,
        vec![(NoteName::C, 4), (NoteName::E, 4), (NoteName::E, 4), (NoteName::D, 4)]
    );
    let intervals: Vec<_> = notes.iter().map(|n| n.interval_semitones).collect();
    assert_eq!(intervals, vec![None, Some(4), Some(0), Some(-2)]);
}

#[test]
fn history_stays_inside_retention_window() {
    let mut engine = Engine::new(EngineConfig {
        fft_size: 256,
        ..EngineConfig::default()
    })
    .unwrap();
    engine.start();

    let silence = vec![0.0; 256];
    let mut t = 0.0;
    for i in 0..3_500u32 {
        // Jittery cadence around 20 ms.
        t += if i % 5 == 0 { 37.0 } else { 16.0 };
        engine.process_cycle(SampleFrame::new(&silence, SAMPLE_RATE), None, t);
        if i % 250 == 0 {
            assert!(engine.history().all(|s| s.time_ms >= t - 60_000.0));
        }
    }
    assert!(engine.history().all(|s| s.time_ms >= t - 60_000.0));
    assert!(engine.history().count() < 3_500);
}

#[test]
fn stop_discards_open_note_and_clears_buffers() {
    let mut engine = Engine::new(EngineConfig {
        fft_size: 2048,
        ..gate_disabled()
    })
    .unwrap();
    let (_handle, events) = engine.subscribe_channel(1024);
    engine.start();

    let capture = engine.capture_handle();
    capture.push(vec![0.1; 4096], SAMPLE_RATE, 0.0);

    let tone = sine(440.0, 2048);
    for i in 0..10 {
        engine.process_cycle(SampleFrame::new(&tone, SAMPLE_RATE), None, i as f64 * CYCLE_MS);
    }
    assert!(matches!(engine.segmenter_state(), SegmenterState::Sustained { .. }));

    engine.stop();
    assert!(!engine.is_running());
    assert_eq!(engine.history().count(), 0);
    assert!(capture.is_empty());
    assert!(engine.process_cycle(SampleFrame::new(&tone, SAMPLE_RATE), None, 1_000.0).is_none());

    let received: Vec<_> = events.try_iter().collect();
    assert!(!received.iter().any(|e| matches!(e, EngineEvent::NoteClosed(_))));
    assert!(matches!(received.last(), Some(EngineEvent::HistoryCleared)));

    engine.start();
    assert_eq!(engine.segmenter_state(), SegmenterState::Silent);
    assert_eq!(engine.smoothed_frequency(), None);
}

#[test]
fn clear_history_keeps_capture() {
    let mut engine = Engine::new(EngineConfig {
        fft_size: 2048,
        ..gate_disabled()
    })
    .unwrap();
    let (_handle, events) = engine.subscribe_channel(16);
    engine.start();
    engine.push_audio_chunk(vec![0.0; 4096], SAMPLE_RATE, 0.0);
    let silence = vec![0.0; 2048];
    engine.process_cycle(SampleFrame::new(&silence, SAMPLE_RATE), None, 0.0);

    engine.clear_history();
    assert_eq!(engine.history().count(), 0);
    assert!(engine.extract_range(0.0, 10.0).is_some());
    assert!(matches!(events.try_iter().last(), Some(EngineEvent::HistoryCleared)));
}

#[test]
fn loop_export_from_capture_thread() {
    let engine = Engine::new(EngineConfig::default()).unwrap();
    let capture = engine.capture_handle();

    let producer = std::thread::spawn(move || {
        for i in 0..12 {
            capture.push(vec![0.25; 4096], SAMPLE_RATE, i as f64 * 85.0);
        }
    });
    producer.join().unwrap();

    let audio = engine.extract_range(170.0, 510.0).unwrap();
    assert_eq!(audio.samples.len(), 5 * 4096);
    assert_eq!(audio.sample_rate, SAMPLE_RATE);

    let wav = engine.export_wav(170.0, 510.0).unwrap();
    assert_eq!(wav.len(), WAV_HEADER_LEN + 5 * 4096 * 2);
    assert_eq!(&wav[0..4], b"RIFF");
    assert_eq!(&wav[8..12], b"WAVE");

    assert!(engine.extract_range(2_000.0, 3_000.0).is_none());
    assert!(engine.export_wav(2_000.0, 3_000.0).is_err());
}

#[test]
fn failing_observer_does_not_interrupt_cycles() {
    let mut engine = Engine::new(EngineConfig {
        fft_size: 1024,
        ..EngineConfig::default()
    })
    .unwrap();
    let frames = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&frames);

    let _failing = engine.subscribe(|event| {
        if let EngineEvent::Frame(_) = event {
            panic!("observer failure");
        }
    });
    let _counting = engine.subscribe(move |event| {
        if let EngineEvent::Frame(_) = event {
            seen.fetch_add(1, Ordering::SeqCst);
        }
    });
    engine.start();

    let silence = vec![0.0; 1024];
    for i in 0..5 {
        assert!(engine
            .process_cycle(SampleFrame::new(&silence, SAMPLE_RATE), None, i as f64 * CYCLE_MS)
            .is_some());
    }
    assert_eq!(frames.load(Ordering::SeqCst), 5);
}
