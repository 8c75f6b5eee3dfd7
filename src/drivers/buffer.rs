use std::collections::VecDeque;

/// Fixed-capacity FIFO of voltages. Appending at capacity evicts the oldest value.
#[derive(Clone, Debug)]
pub struct SampleBuffer {
    values: VecDeque<f64>,
    capacity: usize,
}

impl SampleBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            values: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn append(&mut self, value: f64) {
        if self.capacity == 0 {
            return;
        }
        if self.values.len() == self.capacity {
            self.values.pop_front();
        }
        self.values.push_back(value);
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    /// Independent copy of the buffer contents, oldest first.
    pub fn snapshot(&self) -> Vec<f64> {
        self.values.iter().copied().collect()
    }

    /// The most recent `len` values, or `None` until that many have arrived.
    pub fn latest_window(&self, len: usize) -> Option<Vec<f64>> {
        if len == 0 || self.values.len() < len {
            return None;
        }
        Some(self.values.iter().skip(self.values.len() - len).copied().collect())
    }
}
