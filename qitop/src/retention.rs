//! Bounded sample retention for time-series plots.
//!
//! Every plotted signal (latency, CPU time, message sizes) is backed by one
//! [`RetentionBuffer`]. Appends are amortized O(1): the buffer may grow to
//! twice its capacity before the oldest samples are dropped in a single
//! pass, so no push ever pays for shifting the whole window.
//!
//! ```text
//! capacity = 4
//!
//! push ×8   [1 2 3 4 5 6 7 8]          len 8 = 2 × capacity, no compaction yet
//! push 9    [6 7 8 9]                  compacted back to the last 4 samples
//! snapshot(3) → [7 8 9]                oldest first
//! ```

/// Default number of samples kept per series.
pub const DEFAULT_CAPACITY: usize = 4096;

/// Bounded FIFO series of `f64` samples.
#[derive(Debug, Clone)]
pub struct RetentionBuffer {
    samples: Vec<f64>,
    capacity: usize,
    total_pushed: u64,
}

impl RetentionBuffer {
    /// Create an empty buffer keeping at least the last `capacity` samples.
    ///
    /// A zero capacity is raised to one.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: Vec::new(),
            capacity: capacity.max(1),
            total_pushed: 0,
        }
    }

    /// Append a sample, compacting once the buffer exceeds twice its capacity.
    pub fn push(&mut self, sample: f64) {
        self.samples.push(sample);
        self.total_pushed += 1;
        if self.samples.len() > self.capacity.saturating_mul(2) {
            let excess = self.samples.len() - self.capacity;
            self.samples.drain(..excess);
        }
    }

    /// Up to the last `limit` samples, oldest first.
    ///
    /// `limit == 0` yields an empty view: the consumer has no room to draw yet.
    #[must_use]
    pub fn snapshot(&self, limit: usize) -> &[f64] {
        let len = self.samples.len();
        &self.samples[len - limit.min(len)..]
    }

    /// Samples currently held (between 0 and twice the capacity).
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Samples pushed since creation, including evicted ones.
    #[must_use]
    pub fn total_pushed(&self) -> u64 {
        self.total_pushed
    }
}

impl Default for RetentionBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
