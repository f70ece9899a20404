//! Bounded Sample History

use obd_protocol::TelemetrySample;
use std::collections::VecDeque;

/// Default history depth per PID
pub const DEFAULT_CAPACITY: usize = 100;

/// Newest-N ring of samples for one PID
#[derive(Debug, Clone)]
pub struct SampleHistory {
    samples: VecDeque<TelemetrySample>,
    capacity: usize,
}

impl SampleHistory {
    /// Create a history holding at most `capacity` samples
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a sample, dropping the oldest when full
    pub fn push(&mut self, sample: TelemetrySample) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Read the last N samples (most recent first)
    pub fn read_last(&self, count: usize) -> Vec<TelemetrySample> {
        self.samples.iter().rev().take(count).cloned().collect()
    }

    /// Everything held, oldest first
    pub fn to_vec(&self) -> Vec<TelemetrySample> {
        self.samples.iter().cloned().collect()
    }
}

impl Default for SampleHistory {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use obd_protocol::Pid;
    use proptest::prelude::*;

    fn rpm(value: f64, timestamp_ms: u64) -> TelemetrySample {
        TelemetrySample::new(Pid::Rpm, value, timestamp_ms)
    }

    #[test]
    fn test_push_and_read() {
        let mut history = SampleHistory::new(10);
        for i in 0..5 {
            history.push(rpm(i as f64 * 100.0, i * 1000));
        }

        assert_eq!(history.len(), 5);
        let samples = history.read_last(3);
        assert_eq!(samples.len(), 3);
        assert_eq!(samples[0].value, 400.0); // Most recent
        assert_eq!(samples[2].value, 200.0);
    }

    #[test]
    fn test_overwrite_oldest() {
        let mut history = SampleHistory::new(5);
        for i in 0..10 {
            history.push(rpm(i as f64 * 100.0, i));
        }

        assert_eq!(history.len(), 5);
        assert_eq!(history.capacity(), 5);
        let oldest_first = history.to_vec();
        assert_eq!(oldest_first[0].value, 500.0);
        assert_eq!(oldest_first[4].value, 900.0);
    }

    #[test]
    fn test_zero_capacity_holds_one() {
        let mut history = SampleHistory::new(0);
        assert!(history.is_empty());
        history.push(rpm(700.0, 1));
        history.push(rpm(750.0, 2));
        assert_eq!(history.len(), 1);
        assert_eq!(history.read_last(5)[0].value, 750.0);
    }

    proptest! {
        #[test]
        fn prop_never_exceeds_capacity(capacity in 1usize..64, pushes in 0usize..256) {
            let mut history = SampleHistory::new(capacity);
            for i in 0..pushes {
                history.push(rpm(i as f64, i as u64));
            }
            prop_assert_eq!(history.len(), pushes.min(capacity));
            if pushes > 0 {
                prop_assert_eq!(history.read_last(1)[0].timestamp_ms, pushes as u64 - 1);
            }
        }
    }
}
