//! Buffering between the audio callback's small hop blocks and the engine:
//! a sliding analysis frame and the larger chunks kept for loop export.

use std::collections::VecDeque;

/// The most recent `len` samples of the input stream.
pub struct FrameWindow {
    samples: VecDeque<f32>,
    len: usize,
    /// Samples appended since the last frame was taken.
    fresh: usize,
}

impl FrameWindow {
    pub fn new(len: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(len),
            len,
            fresh: 0,
        }
    }

    pub fn extend(&mut self, block: &[f32]) {
        self.samples.extend(block.iter().copied());
        self.fresh += block.len();
        let excess = self.samples.len().saturating_sub(self.len);
        self.samples.drain(..excess);
    }

    /// The current frame, if it is full and holds audio not yet analysed.
    ///
    /// A tick that arrives before any new samples gets `None`, so one window
    /// never feeds two cycles.
    pub fn take_frame(&mut self) -> Option<Vec<f32>> {
        if self.samples.len() < self.len || self.fresh == 0 {
            return None;
        }
        self.fresh = 0;
        Some(self.samples.iter().copied().collect())
    }
}

/// Regroups hop blocks into fixed-size capture chunks.
pub struct ChunkAssembler {
    pending: Vec<f32>,
    chunk_len: usize,
}

impl ChunkAssembler {
    pub fn new(chunk_len: usize) -> Self {
        Self {
            pending: Vec::with_capacity(chunk_len),
            chunk_len: chunk_len.max(1),
        }
    }

    /// Appends a block and returns every chunk it completed, oldest first.
    pub fn push(&mut self, block: &[f32]) -> Vec<Vec<f32>> {
        self.pending.extend_from_slice(block);
        let mut chunks = Vec::new();
        while self.pending.len() >= self.chunk_len {
            chunks.push(self.pending.drain(..self.chunk_len).collect());
        }
        chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_waits_for_a_full_frame() {
        let mut window = FrameWindow::new(8);
        window.extend(&[1.0; 5]);
        assert!(window.take_frame().is_none());
        window.extend(&[2.0; 3]);
        assert_eq!(window.take_frame().unwrap().len(), 8);
    }

    #[test]
    fn window_keeps_newest_samples() {
        let mut window = FrameWindow::new(4);
        window.extend(&[1.0, 2.0, 3.0]);
        window.extend(&[4.0, 5.0, 6.0]);
        assert_eq!(window.take_frame().unwrap(), vec![3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn window_is_analysed_once_per_new_audio() {
        let mut window = FrameWindow::new(4096);
        window.extend(&vec![0.1; 4096]);

        // Five ticks between two hop blocks yield a single frame.
        let frames = (0..5).filter_map(|_| window.take_frame()).count();
        assert_eq!(frames, 1);

        window.extend(&[0.2; 512]);
        let next = window.take_frame().unwrap();
        assert_eq!(next[4095], 0.2);
        assert!(window.take_frame().is_none());
    }

    #[test]
    fn assembler_emits_whole_chunks() {
        let mut assembler = ChunkAssembler::new(4096);
        let mut chunks = Vec::new();
        for i in 0..17 {
            chunks.extend(assembler.push(&[i as f32; 512]));
        }
        // 17 * 512 = 8704 samples: two full chunks, 512 left over.
        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|c| c.len() == 4096));
        assert_eq!(chunks[1][0], 8.0);
        assert!(assembler.push(&[]).is_empty());
    }
}
