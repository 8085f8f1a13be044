//! Sliding window of per-tick acquire pressure.
//!
//! Each sample is the peak number of instances held at once, across all
//! pools, during one maintenance interval.

use std::collections::VecDeque;

/// Number of maintenance ticks kept in the window.
pub const REQUEST_WINDOW_CAPACITY: usize = 10;

/// Fixed-capacity window of per-tick peak concurrency samples, oldest first.
#[derive(Clone, Debug)]
pub struct RequestWindow {
    samples: VecDeque<u32>,
}

impl Default for RequestWindow {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestWindow {
    /// Creates an empty window.
    #[must_use]
    pub fn new() -> Self {
        Self {
            samples: VecDeque::with_capacity(REQUEST_WINDOW_CAPACITY),
        }
    }

    /// Records one tick's sample, dropping the oldest on overflow.
    pub fn record(&mut self, peak_active: u32) {
        if self.samples.len() == REQUEST_WINDOW_CAPACITY {
            self.samples.pop_front();
        }
        self.samples.push_back(peak_active);
    }

    /// Number of samples held.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether no tick has been recorded yet.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Mean of the per-tick peaks over the window (0.0 when empty).
    #[must_use]
    pub fn average(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let total: u64 = self.samples.iter().map(|&s| u64::from(s)).sum();
        total as f32 / self.samples.len() as f32
    }

    /// Busiest tick in the window.
    #[must_use]
    pub fn peak(&self) -> u32 {
        self.samples.iter().copied().max().unwrap_or(0)
    }

    /// Samples, oldest first.
    pub fn samples(&self) -> impl Iterator<Item = u32> + '_ {
        self.samples.iter().copied()
    }
}
