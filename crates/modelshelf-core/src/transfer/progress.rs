//! Moving-average throughput and time estimates for a running transfer.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Bounded window of recent throughput samples, in bytes per second.
#[derive(Debug, Clone)]
pub struct Throughput {
    samples: VecDeque<f64>,
    capacity: usize,
    last: Option<Instant>,
}

impl Throughput {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            last: None,
        }
    }

    /// Record a chunk of `bytes` that arrived at `now`.
    ///
    /// The first chunk only starts the clock.
    pub fn record(&mut self, bytes: usize, now: Instant) {
        if let Some(last) = self.last {
            let elapsed = now.saturating_duration_since(last);
            self.push(instantaneous_rate(bytes, elapsed));
        }
        self.last = Some(now);
    }

    /// Add a precomputed sample, evicting the oldest when full.
    pub fn push(&mut self, bytes_per_sec: f64) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(bytes_per_sec);
    }

    /// Mean of the window, 0 when empty.
    pub fn mean(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().sum::<f64>() / self.samples.len() as f64
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
        self.last = None;
    }
}

fn instantaneous_rate(bytes: usize, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        bytes as f64 / secs
    } else {
        0.0
    }
}

/// Seconds left at `mean_speed`. A non-positive speed counts as 1 B/s;
/// an unknown size gives 0.
pub fn estimate_remaining(expected: u64, transferred: u64, mean_speed: f64) -> f64 {
    if expected == 0 {
        return 0.0;
    }
    let speed = if mean_speed > 0.0 { mean_speed } else { 1.0 };
    expected.saturating_sub(transferred) as f64 / speed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_is_bounded() {
        let mut window = Throughput::new(10);
        for i in 0..25 {
            window.push(i as f64);
        }
        assert_eq!(window.len(), 10);
        // 15..=24
        assert_eq!(window.mean(), 19.5);
    }

    #[test]
    fn test_record_uses_elapsed_time() {
        let mut window = Throughput::new(10);
        let start = Instant::now();
        window.record(1000, start);
        assert!(window.is_empty());

        window.record(1000, start + Duration::from_millis(500));
        assert_eq!(window.len(), 1);
        assert_eq!(window.mean(), 2000.0);

        window.clear();
        assert!(window.is_empty());
        assert_eq!(window.mean(), 0.0);
    }

    #[test]
    fn test_estimate_remaining() {
        assert_eq!(estimate_remaining(1000, 400, 200.0), 3.0);
        assert_eq!(estimate_remaining(1000, 400, 0.0), 600.0);
        assert_eq!(estimate_remaining(1000, 400, -5.0), 600.0);
        assert_eq!(estimate_remaining(0, 400, 200.0), 0.0);
        assert_eq!(estimate_remaining(100, 400, 200.0), 0.0);
    }
}
