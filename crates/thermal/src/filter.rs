//! Thermocouple Signal Filtering
//!
//! Provides filters to reduce noise from raw thermocouple readings before they
//! are used in other parts of the system, like the PID controller.

use num_traits::Float;
use std::collections::VecDeque;

/// A generic trait for signal filters.
pub trait Filter<T> {
    /// Adds a new sample to the filter.
    fn add_sample(&mut self, sample: T);
    /// Returns the current filtered output value.
    fn output(&self) -> T;
}

/// A sliding-median filter over the last `N` samples.
///
/// The median is used instead of a mean because a thermocouple occasionally
/// produces a single wildly-wrong reading (an SPI glitch, a momentary short).
/// A mean drags the smoothed value toward the outlier; the median discards it
/// entirely as long as fewer than half the window is bad.
#[derive(Debug, Clone)]
pub struct MedianFilter<T> {
    samples: VecDeque<T>,
    size: usize,
}

impl<T: Float> MedianFilter<T> {
    /// Creates a new `MedianFilter` holding up to `size` samples.
    pub fn new(size: usize) -> Self {
        assert!(size > 0, "window size must be greater than zero");
        Self {
            samples: VecDeque::with_capacity(size),
            size,
        }
    }

    /// Number of samples currently in the window.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// True while the window has received no samples yet.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

impl<T: Float> Filter<T> for MedianFilter<T> {
    fn add_sample(&mut self, sample: T) {
        self.samples.push_back(sample);
        while self.samples.len() > self.size {
            self.samples.pop_front();
        }
    }

    fn output(&self) -> T {
        if self.samples.is_empty() {
            return T::zero();
        }
        let mut sorted: Vec<T> = self.samples.iter().copied().collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let mid = sorted.len() / 2;
        if sorted.len() % 2 == 1 {
            sorted[mid]
        } else {
            // even window: average the two middle samples
            (sorted[mid - 1] + sorted[mid]) / (T::one() + T::one())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn median_rejects_single_outlier() {
        let mut filter = MedianFilter::new(5);
        for t in [101.0, 102.0, 103.0, 104.0] {
            filter.add_sample(t);
        }
        // a single absurd spike does not move the median far
        filter.add_sample(900.0);
        assert_eq!(filter.output(), 103.0);
    }

    #[test]
    fn median_of_even_window_averages_middle_pair() {
        let mut filter = MedianFilter::new(4);
        for t in [10.0, 20.0, 30.0, 40.0] {
            filter.add_sample(t);
        }
        assert_eq!(filter.output(), 25.0);
    }

    #[test]
    fn empty_window_reads_zero() {
        let filter: MedianFilter<f64> = MedianFilter::new(8);
        assert_eq!(filter.output(), 0.0);
    }

    #[test]
    fn window_slides() {
        let mut filter = MedianFilter::new(3);
        for t in [1.0, 2.0, 3.0, 100.0, 100.0] {
            filter.add_sample(t);
        }
        // only the last three samples remain
        assert_eq!(filter.len(), 3);
        assert_eq!(filter.output(), 100.0);
    }
}
