use std::collections::VecDeque;

use crate::types::TelemetrySnapshot;

/// Bounded, append-only telemetry buffer.
///
/// Oldest snapshot is dropped first once `capacity` is exceeded. Readers
/// get owned copies so nothing outside the engine can mutate a snapshot.
#[derive(Clone, Debug)]
pub struct History {
    buffer: VecDeque<TelemetrySnapshot>,
    capacity: usize,
}

impl History {
    pub const DEFAULT_CAPACITY: usize = 1000;

    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        History {
            buffer: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a snapshot, evicting from the front when over capacity.
    /// Returns the evicted snapshot, if any.
    pub fn push(&mut self, snapshot: TelemetrySnapshot) -> Option<TelemetrySnapshot> {
        self.buffer.push_back(snapshot);
        if self.buffer.len() > self.capacity {
            self.buffer.pop_front()
        } else {
            None
        }
    }

    /// Most recent `n` snapshots, oldest first
    pub fn recent(&self, n: usize) -> Vec<TelemetrySnapshot> {
        let skip = self.buffer.len().saturating_sub(n);
        self.buffer.iter().skip(skip).cloned().collect()
    }

    pub fn latest(&self) -> Option<&TelemetrySnapshot> {
        self.buffer.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TelemetrySnapshot> {
        self.buffer.iter()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

impl Default for History {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}
