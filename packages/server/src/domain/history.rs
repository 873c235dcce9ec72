//! Bounded, insertion-ordered broadcast history.

use std::collections::VecDeque;

/// Rendered broadcast lines in delivery order
///
/// Once `capacity` is reached the oldest line is dropped for each new one.
#[derive(Debug, Clone)]
pub struct History {
    capacity: usize,
    lines: VecDeque<String>,
}

impl History {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            lines: VecDeque::with_capacity(capacity.min(1024)),
        }
    }

    pub fn push(&mut self, line: String) {
        if self.capacity == 0 {
            return;
        }
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.lines.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}
