//! # Note Segmentation
//!
//! Turns the per-frame pitch track into discrete played notes.
//!
//! A note is opened once the same note and octave has been classified with
//! high confidence for a number of consecutive frames, and closed as soon as
//! the classification changes, confidence drops or the input falls silent.
//! Only closed notes become [`NoteEvent`]s.

use serde::{Deserialize, Serialize};

use crate::tuning::{NoteClassification, NoteName};

/// Frames at or below this confidence never count as stable.
pub const STABILITY_CONFIDENCE_THRESHOLD: f32 = 0.7;

/// Melodic direction from the previous note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
    Same,
}

impl Direction {
    pub fn from_interval(semitones: i32) -> Self {
        match semitones.signum() {
            1 => Direction::Up,
            -1 => Direction::Down,
            _ => Direction::Same,
        }
    }
}

/// A completed note. Never modified after it is emitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteEvent {
    pub id: u64,
    /// Time of the first frame of the stable run that opened the note. The
    /// note is only confirmed `stability_frames` later, but it was already
    /// sounding from here.
    pub start_ms: f64,
    pub end_ms: f64,
    pub duration_ms: f64,
    pub note: NoteName,
    pub octave: i32,
    pub midi: i32,
    pub frequency: f32,
    pub cents: i32,
    /// Semitones from the previously logged note, if any.
    pub interval_semitones: Option<i32>,
    pub direction: Option<Direction>,
}

/// What the segmenter saw in one processing cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameObservation {
    pub time_ms: f64,
    pub classification: Option<NoteClassification>,
    pub frequency: Option<f32>,
    pub confidence: f32,
    pub is_silent: bool,
}

/// Externally visible state of the segmenter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmenterState {
    /// No stable pitch and no open note.
    Silent,
    /// Counting consecutive matching frames.
    Stabilizing { frames: usize },
    /// A note is open and will become an event when it ends.
    Sustained { note: NoteName, octave: i32 },
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    start_ms: f64,
    classification: NoteClassification,
    frequency: f32,
}

#[derive(Debug, Clone)]
pub struct NoteSegmenter {
    stability_frames: usize,
    previous_key: Option<(NoteName, i32)>,
    stable_frames: usize,
    run_start_ms: f64,
    candidate: Option<Candidate>,
    next_id: u64,
}

impl NoteSegmenter {
    pub fn new(stability_frames: usize) -> Self {
        Self {
            stability_frames: stability_frames.max(1),
            previous_key: None,
            stable_frames: 0,
            run_start_ms: 0.0,
            candidate: None,
            next_id: 1,
        }
    }

    pub fn state(&self) -> SegmenterState {
        match (&self.candidate, self.stable_frames) {
            (Some(c), _) => SegmenterState::Sustained {
                note: c.classification.note,
                octave: c.classification.octave,
            },
            (None, 0) => SegmenterState::Silent,
            (None, frames) => SegmenterState::Stabilizing { frames },
        }
    }

    /// Advances the state machine by one frame.
    ///
    /// `previous_event` is the most recent logged note; it supplies the
    /// interval and direction of a note closed by this frame.
    ///
    /// # Returns
    /// * `Some(event)` - The open note ended on this frame
    /// * `None` - Nothing was completed
    pub fn observe(&mut self, frame: &FrameObservation, previous_event: Option<&NoteEvent>) -> Option<NoteEvent> {
        let key = frame
            .classification
            .filter(|_| !frame.is_silent)
            .map(|c| c.key());
        let confident = frame.confidence > STABILITY_CONFIDENCE_THRESHOLD;

        let mut closed = None;
        if key.is_some() && confident && key == self.previous_key {
            self.stable_frames += 1;
        } else {
            closed = self.close(frame.time_ms, previous_event);
            self.stable_frames = usize::from(key.is_some() && confident);
            self.run_start_ms = frame.time_ms;
        }
        self.previous_key = key;

        if self.stable_frames >= self.stability_frames && self.candidate.is_none() {
            if let Some(classification) = frame.classification {
                let frequency = frame.frequency.unwrap_or(0.0);
                log::debug!("Note opened: {} at {:.1} ms", classification, self.run_start_ms);
                self.candidate = Some(Candidate {
                    start_ms: self.run_start_ms,
                    classification,
                    frequency,
                });
            }
        }

        closed
    }

    /// Drops any open note without emitting it and forgets the stability run.
    pub fn reset(&mut self) {
        self.previous_key = None;
        self.stable_frames = 0;
        self.candidate = None;
    }

    fn close(&mut self, end_ms: f64, previous_event: Option<&NoteEvent>) -> Option<NoteEvent> {
        let candidate = self.candidate.take()?;
        let c = candidate.classification;
        let interval = previous_event.map(|prev| c.midi - prev.midi);

        let event = NoteEvent {
            id: self.next_id,
            start_ms: candidate.start_ms,
            end_ms,
            duration_ms: end_ms - candidate.start_ms,
            note: c.note,
            octave: c.octave,
            midi: c.midi,
            frequency: candidate.frequency,
            cents: c.cents,
            interval_semitones: interval,
            direction: interval.map(Direction::from_interval),
        };
        self.next_id += 1;
        log::debug!(
            "Note closed: {}{} after {:.0} ms (interval {:?})",
            event.note, event.octave, event.duration_ms, event.interval_semitones
        );
        Some(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tuning::classify;

    fn voiced(time_ms: f64, freq: f32, confidence: f32) -> FrameObservation {
        FrameObservation {
            time_ms,
            classification: classify(freq, 440.0),
            frequency: Some(freq),
            confidence,
            is_silent: false,
        }
    }

    fn silent(time_ms: f64) -> FrameObservation {
        FrameObservation {
            time_ms,
            classification: None,
            frequency: None,
            confidence: 0.0,
            is_silent: true,
        }
    }

    #[test]
    fn seven_stable_frames_never_produce_a_note() {
        let mut segmenter = NoteSegmenter::new(8);
        for i in 0..7 {
            assert!(segmenter.observe(&voiced(i as f64 * 16.0, 440.0, 0.95), None).is_none());
        }
        assert_eq!(segmenter.state(), SegmenterState::Stabilizing { frames: 7 });
        assert!(segmenter.observe(&silent(200.0), None).is_none());
        assert_eq!(segmenter.state(), SegmenterState::Silent);
    }

    #[test]
    fn eight_stable_frames_open_and_silence_closes() {
        let mut segmenter = NoteSegmenter::new(8);
        for i in 0..8 {
            assert!(segmenter.observe(&voiced(i as f64 * 16.0, 440.0, 0.95), None).is_none());
        }
        assert_eq!(segmenter.state(), SegmenterState::Sustained { note: NoteName::A, octave: 4 });

        let event = segmenter.observe(&silent(400.0), None).unwrap();
        assert_eq!((event.note, event.octave, event.midi), (NoteName::A, 4, 69));
        assert_eq!(event.start_ms, 0.0);
        assert_eq!(event.end_ms, 400.0);
        assert_eq!(event.duration_ms, 400.0);
        assert_eq!(event.interval_semitones, None);
        assert_eq!(event.direction, None);
        assert_eq!(segmenter.state(), SegmenterState::Silent);
    }

    #[test]
    fn start_time_is_the_first_frame_of_the_run() {
        let mut segmenter = NoteSegmenter::new(8);
        segmenter.observe(&silent(0.0), None);
        for i in 0..8 {
            segmenter.observe(&voiced(100.0 + i as f64 * 20.0, 440.0, 0.95), None);
        }
        // Opened on the frame at 240 ms, stable since 100 ms.
        let event = segmenter.observe(&silent(300.0), None).unwrap();
        assert_eq!(event.start_ms, 100.0);
        assert_eq!(event.duration_ms, 200.0);
    }

    #[test]
    fn low_confidence_breaks_the_run() {
        let mut segmenter = NoteSegmenter::new(8);
        for i in 0..12 {
            let confidence = if i == 6 { 0.7 } else { 0.95 };
            segmenter.observe(&voiced(i as f64, 440.0, confidence), None);
        }
        // Run restarted after frame 6: frames 7..=11 only.
        assert_eq!(segmenter.state(), SegmenterState::Stabilizing { frames: 5 });
    }

    #[test]
    fn note_change_closes_with_interval() {
        let mut segmenter = NoteSegmenter::new(3);
        let previous = NoteEvent {
            id: 99,
            start_ms: 0.0,
            end_ms: 10.0,
            duration_ms: 10.0,
            note: NoteName::G,
            octave: 4,
            midi: 67,
            frequency: 392.0,
            cents: 0,
            interval_semitones: None,
            direction: None,
        };
        for i in 0..4 {
            segmenter.observe(&voiced(100.0 + i as f64, 440.0, 0.9), Some(&previous));
        }
        let event = segmenter.observe(&voiced(200.0, 523.25, 0.9), Some(&previous)).unwrap();
        assert_eq!(event.interval_semitones, Some(2));
        assert_eq!(event.direction, Some(Direction::Up));
        // The new pitch already counts as the first frame of its own run.
        assert_eq!(segmenter.state(), SegmenterState::Stabilizing { frames: 1 });
    }

    #[test]
    fn silence_without_open_note_is_a_no_op() {
        let mut segmenter = NoteSegmenter::new(8);
        for i in 0..30 {
            assert!(segmenter.observe(&silent(i as f64 * 16.0), None).is_none());
            assert_eq!(segmenter.state(), SegmenterState::Silent);
        }
    }

    #[test]
    fn reset_discards_open_note() {
        let mut segmenter = NoteSegmenter::new(2);
        for i in 0..5 {
            segmenter.observe(&voiced(i as f64, 440.0, 0.95), None);
        }
        segmenter.reset();
        assert_eq!(segmenter.state(), SegmenterState::Silent);
        assert!(segmenter.observe(&silent(10.0), None).is_none());
    }

    #[test]
    fn event_ids_increase() {
        let mut segmenter = NoteSegmenter::new(1);
        segmenter.observe(&voiced(0.0, 440.0, 0.9), None);
        let first = segmenter.observe(&voiced(1.0, 330.0, 0.9), None).unwrap();
        let second = segmenter.observe(&voiced(2.0, 440.0, 0.9), Some(&first)).unwrap();
        assert!(second.id > first.id);
        assert_eq!(second.direction, Some(Direction::Down));
        assert_eq!(second.interval_semitones, Some(-5));
    }

    #[test]
    fn direction_from_interval() {
        assert_eq!(Direction::from_interval(0), Direction::Same);
        assert_eq!(Direction::from_interval(-3), Direction::Down);
        assert_eq!(Direction::from_interval(12), Direction::Up);
    }
}
