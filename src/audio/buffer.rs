//! # Fixed-Capacity Audio Rings
//!
//! Two small ring buffers used by the segmenter:
//! - **EnergyHistory**: recent frame energies, source of the adaptive noise floor
//! - **FrameRing**: the last few whole frames, replayed as pre-roll when speech starts
//!
//! Both evict their oldest entry once full. Neither is shared between threads;
//! each lives inside one connection's segmenter.

use std::collections::VecDeque;

/// Rolling window of frame energies.
#[derive(Debug, Clone)]
pub struct EnergyHistory {
    values: VecDeque<f32>,
    capacity: usize,
}

impl EnergyHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            values: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, energy: f32) {
        if self.capacity == 0 {
            return;
        }
        if self.values.len() == self.capacity {
            self.values.pop_front();
        }
        self.values.push_back(energy);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Median of the window; mean of the middle pair for even lengths.
    pub fn median(&self) -> Option<f32> {
        if self.values.is_empty() {
            return None;
        }

        let mut sorted: Vec<f32> = self.values.iter().copied().collect();
        sorted.sort_by(|a, b| a.total_cmp(b));

        let mid = sorted.len() / 2;
        if sorted.len() % 2 == 0 {
            Some((sorted[mid - 1] + sorted[mid]) / 2.0)
        } else {
            Some(sorted[mid])
        }
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }
}

/// Ring of whole PCM frames, oldest first.
#[derive(Debug, Clone)]
pub struct FrameRing {
    frames: VecDeque<Vec<u8>>,
    capacity: usize,
}

impl FrameRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, frame: Vec<u8>) {
        if self.capacity == 0 {
            return;
        }
        if self.frames.len() == self.capacity {
            self.frames.pop_front();
        }
        self.frames.push_back(frame);
    }

    /// Append every held frame to `out` in arrival order and empty the ring.
    ///
    /// Returns the number of frames moved.
    pub fn drain_into(&mut self, out: &mut Vec<u8>) -> usize {
        let count = self.frames.len();
        for frame in self.frames.drain(..) {
            out.extend_from_slice(&frame);
        }
        count
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_energy_history_evicts_oldest() {
        let mut history = EnergyHistory::new(3);
        for e in [0.1, 0.2, 0.3, 0.9] {
            history.push(e);
        }
        assert_eq!(history.len(), 3);
        // 0.1 evicted, window is [0.2, 0.3, 0.9]
        assert_eq!(history.median(), Some(0.3));
    }

    #[test]
    fn test_energy_history_median_even() {
        let mut history = EnergyHistory::new(10);
        assert_eq!(history.median(), None);
        for e in [0.4, 0.1, 0.3, 0.2] {
            history.push(e);
        }
        let median = history.median().unwrap();
        assert!((median - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_frame_ring_drain_preserves_order() {
        let mut ring = FrameRing::new(2);
        ring.push(vec![1, 1]);
        ring.push(vec![2, 2]);
        ring.push(vec![3, 3]);

        let mut out = vec![0];
        assert_eq!(ring.drain_into(&mut out), 2);
        assert_eq!(out, vec![0, 2, 2, 3, 3]);
        assert_eq!(ring.len(), 0);
    }

    #[test]
    fn test_zero_capacity_rings_hold_nothing() {
        let mut history = EnergyHistory::new(0);
        history.push(1.0);
        assert_eq!(history.len(), 0);

        let mut ring = FrameRing::new(0);
        ring.push(vec![1]);
        assert_eq!(ring.len(), 0);
    }
}
