//! Rolling average over a short sliding window
//!
//! Keeps the raw samples of the last `window_minutes` and averages them on
//! read. This is the only place raw samples are retained.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ExtremesError, Result};

pub const MIN_WINDOW_MINUTES: u32 = 1;
pub const MAX_WINDOW_MINUTES: u32 = 60;
pub const DEFAULT_WINDOW_MINUTES: u32 = 5;

/// A single timestamped reading held by the window
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimedSample {
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

/// Time-windowed mean over the most recent samples
///
/// Samples are kept in ascending timestamp order. Out-of-order samples are
/// slotted into place; averages read just before such a sample arrives are
/// best-effort.
#[derive(Debug, Clone, PartialEq)]
pub struct RollingWindow {
    samples: VecDeque<TimedSample>,
    window_minutes: u32,
}

impl RollingWindow {
    /// Create a window spanning `window_minutes` (1 to 60)
    pub fn new(window_minutes: u32) -> Result<Self> {
        validate_window(window_minutes)?;
        Ok(Self {
            samples: VecDeque::new(),
            window_minutes,
        })
    }

    /// Rebuild a window from persisted samples, dropping any that are stale
    /// relative to the newest one
    pub fn from_samples(window_minutes: u32, samples: Vec<TimedSample>) -> Result<Self> {
        let mut window = Self::new(window_minutes)?;
        for sample in samples {
            window.absorb(sample.value, sample.timestamp);
        }
        Ok(window)
    }

    /// Same window length, different samples
    pub(crate) fn with_samples(&self, samples: impl IntoIterator<Item = TimedSample>) -> Self {
        let mut window = Self {
            samples: VecDeque::new(),
            window_minutes: self.window_minutes,
        };
        for sample in samples {
            window.absorb(sample.value, sample.timestamp);
        }
        window
    }

    /// Add a sample and evict everything older than the window
    pub fn absorb(&mut self, value: f64, timestamp: DateTime<Utc>) {
        let position = self.samples.partition_point(|s| s.timestamp <= timestamp);
        self.samples
            .insert(position, TimedSample { value, timestamp });

        if let Some(newest) = self.samples.back().map(|s| s.timestamp) {
            self.evict(newest);
        }
    }

    /// Mean of the samples still inside the window at `now`
    pub fn current_average(&self, now: DateTime<Utc>) -> Option<f64> {
        let cutoff = self.cutoff(now);
        let live = || self.samples.iter().filter(move |s| s.timestamp >= cutoff);
        let (sum, count) = live().fold((0.0, 0usize), |(sum, count), s| {
            (sum + s.value, count + 1)
        });

        if count == 0 {
            None
        } else if sum.is_finite() {
            Some(sum / count as f64)
        } else {
            // the plain sum overflowed
            let n = count as f64;
            Some(live().map(|s| s.value / n).sum())
        }
    }

    /// Change the window length; samples outside the new window are dropped
    /// immediately
    pub fn resize(&mut self, window_minutes: u32, now: DateTime<Utc>) -> Result<()> {
        validate_window(window_minutes)?;
        self.window_minutes = window_minutes;
        self.evict(now);
        Ok(())
    }

    /// Drop samples that have aged out at `now`
    pub fn evict(&mut self, now: DateTime<Utc>) {
        let cutoff = self.cutoff(now);
        while let Some(sample) = self.samples.front() {
            if sample.timestamp < cutoff {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn window_minutes(&self) -> u32 {
        self.window_minutes
    }

    pub fn samples(&self) -> impl Iterator<Item = &TimedSample> {
        self.samples.iter()
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - Duration::minutes(i64::from(self.window_minutes))
    }
}

impl Default for RollingWindow {
    fn default() -> Self {
        Self {
            samples: VecDeque::new(),
            window_minutes: DEFAULT_WINDOW_MINUTES,
        }
    }
}

/// Check that a window length is within 1..=60 minutes
pub fn validate_window(window_minutes: u32) -> Result<()> {
    if (MIN_WINDOW_MINUTES..=MAX_WINDOW_MINUTES).contains(&window_minutes) {
        Ok(())
    } else {
        Err(ExtremesError::InvalidRange(format!(
            "averaging window must be between {} and {} minutes, got {}",
            MIN_WINDOW_MINUTES, MAX_WINDOW_MINUTES, window_minutes
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(minute: u32, second: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 10, minute, second).unwrap()
    }

    #[test]
    fn test_new_window() {
        let window = RollingWindow::new(15).unwrap();
        assert_eq!(window.window_minutes(), 15);
        assert_eq!(window.sample_count(), 0);
        assert_eq!(window.current_average(at(0, 0)), None);
    }

    #[test]
    fn test_new_window_rejects_out_of_range() {
        assert!(matches!(
            RollingWindow::new(0),
            Err(ExtremesError::InvalidRange(_))
        ));
        assert!(matches!(
            RollingWindow::new(61),
            Err(ExtremesError::InvalidRange(_))
        ));
    }

    #[test]
    fn test_absorb_averages() {
        let mut window = RollingWindow::new(5).unwrap();

        window.absorb(10.0, at(0, 0));
        assert_eq!(window.current_average(at(0, 0)), Some(10.0));

        window.absorb(20.0, at(1, 0));
        assert_eq!(window.current_average(at(1, 0)), Some(15.0));

        window.absorb(30.0, at(2, 0));
        assert_eq!(window.current_average(at(2, 0)), Some(20.0));
    }

    #[test]
    fn test_absorb_evicts_old_samples() {
        let mut window = RollingWindow::new(5).unwrap();
        window.absorb(10.0, at(0, 0));
        window.absorb(20.0, at(3, 0));
        window.absorb(30.0, at(6, 0));

        assert_eq!(window.sample_count(), 2);
        assert_eq!(window.current_average(at(6, 0)), Some(25.0));
    }

    #[test]
    fn test_sample_on_cutoff_is_kept() {
        let mut window = RollingWindow::new(5).unwrap();
        window.absorb(10.0, at(0, 0));
        window.absorb(20.0, at(5, 0));
        assert_eq!(window.sample_count(), 2);
    }

    #[test]
    fn test_read_ignores_stale_samples_without_mutation() {
        let mut window = RollingWindow::new(5).unwrap();
        window.absorb(10.0, at(0, 0));
        window.absorb(20.0, at(4, 0));

        assert_eq!(window.current_average(at(7, 0)), Some(20.0));
        assert_eq!(window.current_average(at(20, 0)), None);
    }

    #[test]
    fn test_resize_evicts_immediately() {
        let mut window = RollingWindow::new(15).unwrap();
        for minute in 0..15 {
            window.absorb(f64::from(minute), at(minute, 0));
        }
        assert_eq!(window.sample_count(), 15);

        window.resize(1, at(14, 30)).unwrap();
        assert_eq!(window.sample_count(), 1);
        assert_eq!(window.current_average(at(14, 30)), Some(14.0));
    }

    #[test]
    fn test_resize_rejects_invalid_and_keeps_state() {
        let mut window = RollingWindow::new(5).unwrap();
        window.absorb(1.0, at(0, 0));
        assert!(window.resize(0, at(0, 0)).is_err());
        assert_eq!(window.window_minutes(), 5);
        assert_eq!(window.sample_count(), 1);
    }

    #[test]
    fn test_out_of_order_sample_is_slotted_in_order() {
        let mut window = RollingWindow::new(10).unwrap();
        window.absorb(1.0, at(0, 0));
        window.absorb(3.0, at(4, 0));
        window.absorb(2.0, at(2, 0));

        let order: Vec<f64> = window.samples().map(|s| s.value).collect();
        assert_eq!(order, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_from_samples_drops_stale() {
        let samples = vec![
            TimedSample {
                value: 1.0,
                timestamp: at(0, 0),
            },
            TimedSample {
                value: 2.0,
                timestamp: at(9, 0),
            },
        ];
        let window = RollingWindow::from_samples(5, samples).unwrap();
        assert_eq!(window.sample_count(), 1);
    }

    #[test]
    fn test_default() {
        let window = RollingWindow::default();
        assert_eq!(window.window_minutes(), DEFAULT_WINDOW_MINUTES);
    }

    #[test]
    fn test_average_of_huge_values_stays_finite() {
        let mut window = RollingWindow::new(5).unwrap();
        window.absorb(1.0e308, at(0, 0));
        window.absorb(1.0e308, at(0, 10));
        window.absorb(-1.0e308, at(0, 20));

        let average = window.current_average(at(0, 20)).unwrap();
        assert!(average.is_finite());
        assert!((average - 1.0e308 / 3.0).abs() < 1.0e296);
    }
}
