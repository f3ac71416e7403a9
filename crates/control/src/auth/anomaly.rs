// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use parking_lot::Mutex;

use crate::clock::ms;

/// Per-subject sliding-window counter of refresh rotations.
pub struct RotationMonitor {
    window_ms: u64,
    threshold: usize,
    seen: Mutex<HashMap<String, VecDeque<u64>>>,
}

/// Outcome of recording one rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateCheck {
    /// Rotations inside the window, including this one.
    pub count: usize,
    pub exceeded: bool,
}

impl RotationMonitor {
    pub fn new(window: Duration, threshold: usize) -> Self {
        Self { window_ms: ms(window), threshold, seen: Mutex::new(HashMap::new()) }
    }

    /// One-hour window.
    pub fn hourly(threshold: usize) -> Self {
        Self::new(Duration::from_secs(3600), threshold)
    }

    pub fn record(&self, subject: &str, now_ms: u64) -> RateCheck {
        let mut seen = self.seen.lock();
        let stamps = seen.entry(subject.to_owned()).or_default();
        // Nothing can have left the window before a full window has elapsed.
        if let Some(cutoff) = now_ms.checked_sub(self.window_ms) {
            while stamps.front().is_some_and(|&t| t <= cutoff) {
                stamps.pop_front();
            }
        }
        stamps.push_back(now_ms);
        let count = stamps.len();
        RateCheck { count, exceeded: count > self.threshold }
    }

    /// Drop subjects with no rotations inside the window.
    pub fn purge(&self, now_ms: u64) -> usize {
        let Some(cutoff) = now_ms.checked_sub(self.window_ms) else {
            return 0;
        };
        let mut seen = self.seen.lock();
        let before = seen.len();
        seen.retain(|_, stamps| stamps.back().is_some_and(|&t| t > cutoff));
        before - seen.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exceeds_only_above_threshold() {
        let monitor = RotationMonitor::hourly(3);
        for i in 0..3 {
            assert!(!monitor.record("ops", i).exceeded);
        }
        let check = monitor.record("ops", 3);
        assert_eq!(check, RateCheck { count: 4, exceeded: true });
        assert!(!monitor.record("other", 3).exceeded);
    }

    #[test]
    fn window_slides() {
        let monitor = RotationMonitor::hourly(2);
        monitor.record("ops", 0);
        monitor.record("ops", 1_000);
        assert!(monitor.record("ops", 2_000).exceeded);
        // The first two fall out once an hour has passed.
        let check = monitor.record("ops", 3_601_000);
        assert_eq!(check.count, 2);
        assert!(!check.exceeded);
    }

    #[test]
    fn rotations_at_time_zero_stay_counted() {
        let monitor = RotationMonitor::hourly(1);
        monitor.record("ops", 0);
        assert_eq!(monitor.record("ops", 0), RateCheck { count: 2, exceeded: true });
        assert_eq!(monitor.purge(0), 0);
        assert_eq!(monitor.purge(3_599_999), 0);
    }

    #[test]
    fn purge_drops_idle_subjects() {
        let monitor = RotationMonitor::hourly(10);
        monitor.record("a", 0);
        monitor.record("b", 3_000_000);
        assert_eq!(monitor.purge(3_600_000), 1);
        assert_eq!(monitor.purge(3_600_000), 0);
    }
}
