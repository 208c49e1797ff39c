use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

pub const DEFAULT_MAX_SAMPLES: usize = 50;

/// One paired byte-count observation reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TelemetrySample {
    pub send_bytes: u64,
    pub recv_bytes: u64,
}

/// Sliding window of the most recent samples, kept as two parallel series
/// (send and receive) that always advance together.
#[derive(Debug, Clone)]
pub struct TelemetryWindow {
    capacity: usize,
    send: VecDeque<u64>,
    recv: VecDeque<u64>,
}

impl Default for TelemetryWindow {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SAMPLES)
    }
}

impl TelemetryWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        TelemetryWindow {
            capacity,
            send: VecDeque::with_capacity(capacity + 1),
            recv: VecDeque::with_capacity(capacity + 1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.send.len()
    }

    pub fn is_empty(&self) -> bool {
        self.send.is_empty()
    }

    pub fn push(&mut self, sample: TelemetrySample) {
        self.send.push_back(sample.send_bytes);
        self.recv.push_back(sample.recv_bytes);
        self.evict();
    }

    /// Changes the window size, dropping the oldest samples when shrinking.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        self.evict();
    }

    pub fn clear(&mut self) {
        self.send.clear();
        self.recv.clear();
    }

    pub fn send(&self) -> impl Iterator<Item = u64> + '_ {
        self.send.iter().copied()
    }

    pub fn recv(&self) -> impl Iterator<Item = u64> + '_ {
        self.recv.iter().copied()
    }

    pub fn latest(&self) -> Option<TelemetrySample> {
        Some(TelemetrySample {
            send_bytes: *self.send.back()?,
            recv_bytes: *self.recv.back()?,
        })
    }

    /// Largest value across both series, for y-axis scaling.
    pub fn peak(&self) -> u64 {
        self.send
            .iter()
            .chain(self.recv.iter())
            .copied()
            .max()
            .unwrap_or(0)
    }

    /// Chart points `(slot, bytes)` for the send and receive series.
    pub fn points(&self) -> (Vec<(f64, f64)>, Vec<(f64, f64)>) {
        let to_points = |series: &VecDeque<u64>| {
            series
                .iter()
                .enumerate()
                .map(|(i, v)| (i as f64, *v as f64))
                .collect()
        };
        (to_points(&self.send), to_points(&self.recv))
    }

    fn evict(&mut self) {
        while self.send.len() > self.capacity {
            self.send.pop_front();
            self.recv.pop_front();
        }
    }
}
