use std::collections::VecDeque;

use crate::models::Reading;

/// Fixed-capacity window of the most recent readings, oldest first
#[derive(Debug, Clone)]
pub struct HistoryBuffer {
    readings: VecDeque<Reading>,
    capacity: usize,
}

impl HistoryBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        HistoryBuffer {
            readings: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a reading, returning the evicted oldest one when full
    pub fn push(&mut self, reading: Reading) -> Option<Reading> {
        let evicted = if self.readings.len() == self.capacity {
            self.readings.pop_front()
        } else {
            None
        };
        self.readings.push_back(reading);
        evicted
    }

    /// The newest `limit` readings in insertion order
    pub fn recent(&self, limit: usize) -> Vec<Reading> {
        let skip = self.readings.len().saturating_sub(limit);
        self.readings.iter().skip(skip).copied().collect()
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::OffsetDateTime;

    fn reading(humidity: f32) -> Reading {
        Reading {
            temperature: 20.0,
            humidity,
            particulate: 0.0,
            voc: 0.0,
            timestamp: OffsetDateTime::UNIX_EPOCH,
        }
    }

    #[test]
    fn evicts_oldest_once_full() {
        let mut history = HistoryBuffer::new(3);
        for h in 0..3 {
            assert!(history.push(reading(h as f32)).is_none());
        }

        let evicted = history.push(reading(3.0));
        assert_eq!(evicted.map(|r| r.humidity), Some(0.0));
        assert_eq!(history.len(), 3);

        let order: Vec<f32> = history.recent(10).iter().map(|r| r.humidity).collect();
        assert_eq!(order, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn recent_returns_newest_window() {
        let mut history = HistoryBuffer::new(300);
        for h in 0..10 {
            history.push(reading(h as f32));
        }
        let tail: Vec<f32> = history.recent(3).iter().map(|r| r.humidity).collect();
        assert_eq!(tail, vec![7.0, 8.0, 9.0]);
        assert!(history.recent(0).is_empty());
    }

    #[test]
    fn zero_capacity_is_raised_to_one() {
        let mut history = HistoryBuffer::new(0);
        history.push(reading(1.0));
        history.push(reading(2.0));
        assert_eq!(history.capacity(), 1);
        assert_eq!(history.recent(5)[0].humidity, 2.0);
    }
}
