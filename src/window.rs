use std::collections::VecDeque;

/// Sliding window of the most recent frame-start timestamps
///
/// Storage is allocated once at construction and never grows.
#[derive(Debug, Clone)]
pub struct TimestampWindow {
    timestamps: VecDeque<u64>,
    capacity: usize,
}

impl TimestampWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            timestamps: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Pushes a timestamp, returning the evicted oldest one if the window was full.
    pub fn push(&mut self, nanos: u64) -> Option<u64> {
        let evicted = if self.timestamps.len() >= self.capacity {
            self.timestamps.pop_front()
        } else {
            None
        };
        self.timestamps.push_back(nanos);
        evicted
    }

    pub fn newest(&self) -> Option<u64> {
        self.timestamps.back().copied()
    }

    pub fn oldest(&self) -> Option<u64> {
        self.timestamps.front().copied()
    }

    pub fn clear(&mut self) {
        self.timestamps.clear();
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.timestamps.len() >= self.capacity
    }
}
