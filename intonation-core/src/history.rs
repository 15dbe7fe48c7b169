//! # Rolling Buffers
//!
//! Bounded stores behind the engine's visual history:
//! - [`RetentionBuffer`]: entries kept for a time window (pitch history, audio capture)
//! - [`NoteLog`]: the most recent note events, capped by count
//!
//! Both append at the back and evict from the front of a `VecDeque`, so each
//! insert costs amortized O(1) plus the size of the evicted prefix.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::segmentation::NoteEvent;
use crate::tuning::NoteName;

/// Anything stamped with a capture time in milliseconds.
pub trait Timestamped {
    fn timestamp_ms(&self) -> f64;
}

/// A deque that forgets entries older than its retention window.
#[derive(Debug, Clone)]
pub struct RetentionBuffer<T> {
    entries: VecDeque<T>,
    retention_ms: f64,
}

impl<T: Timestamped> RetentionBuffer<T> {
    pub fn new(retention_ms: f64) -> Self {
        Self {
            entries: VecDeque::new(),
            retention_ms,
        }
    }

    /// Appends `entry`, then drops everything older than `now_ms - retention`.
    pub fn push(&mut self, entry: T, now_ms: f64) {
        self.entries.push_back(entry);
        self.evict(now_ms);
    }

    pub fn evict(&mut self, now_ms: f64) {
        let cutoff = now_ms - self.retention_ms;
        while self
            .entries
            .front()
            .is_some_and(|oldest| oldest.timestamp_ms() < cutoff)
        {
            self.entries.pop_front();
        }
    }

    pub fn retention_ms(&self) -> f64 {
        self.retention_ms
    }

    /// Changes the window; entries outside it go on the next insert or evict.
    pub fn set_retention_ms(&mut self, retention_ms: f64) {
        self.retention_ms = retention_ms;
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl<T: Timestamped + Clone> RetentionBuffer<T> {
    pub fn snapshot(&self) -> Vec<T> {
        self.entries.iter().cloned().collect()
    }
}

/// The most recent note events, oldest first.
#[derive(Debug, Clone)]
pub struct NoteLog {
    events: VecDeque<NoteEvent>,
    capacity: usize,
}

impl NoteLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends an event, dropping the oldest once the log is full.
    pub fn push(&mut self, event: NoteEvent) {
        if self.events.len() == self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    pub fn last(&self) -> Option<&NoteEvent> {
        self.events.back()
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &NoteEvent> + ExactSizeIterator {
        self.events.iter()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Changes the cap, dropping the oldest events that no longer fit.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        while self.events.len() > self.capacity {
            self.events.pop_front();
        }
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    pub fn snapshot(&self) -> Vec<NoteEvent> {
        self.events.iter().cloned().collect()
    }
}

/// Pitch and loudness of one processing cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistorySample {
    pub time_ms: f64,
    pub frequency: Option<f32>,
    pub note: Option<NoteName>,
    pub octave: Option<i32>,
    pub cents: i32,
    pub confidence: f32,
    pub rms: f32,
    pub is_silent: bool,
}

impl HistorySample {
    /// Frequency for display; 0.0 when no pitch was detected.
    pub fn display_frequency(&self) -> f32 {
        self.frequency.unwrap_or(0.0)
    }

    /// "A4"-style label, or "--" without a note.
    pub fn note_label(&self) -> String {
        match (self.note, self.octave) {
            (Some(note), Some(octave)) => format!("{note}{octave}"),
            _ => "--".to_string(),
        }
    }
}

impl Timestamped for HistorySample {
    fn timestamp_ms(&self) -> f64 {
        self.time_ms
    }
}
