//! # Median Filter
//!
//! Sliding-window median used to smooth decoded channel values.
//!
//! ## Warm-up
//!
//! Until the window has seen `window_size` samples, [`MedianFilter::update`]
//! returns its input unchanged so a fresh filter does not lag behind the stick.
//!
//! ## Usage
//!
//! ```
//! use fc_link::filter::MedianFilter;
//!
//! let mut filter = MedianFilter::new(3);
//! assert_eq!(filter.update(10), 10);
//! assert_eq!(filter.update(1000), 1000);
//! assert_eq!(filter.update(20), 20); // median of {10, 1000, 20}
//! ```

use std::collections::VecDeque;

/// Default window size
pub const DEFAULT_WINDOW_SIZE: usize = 3;

/// Fixed-capacity median filter over `u16` samples
#[derive(Debug, Clone)]
pub struct MedianFilter {
    window_size: usize,
    values: VecDeque<u16>,
}

impl Default for MedianFilter {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_SIZE)
    }
}

impl MedianFilter {
    /// Creates a filter with the given window size (at least 1).
    #[must_use]
    pub fn new(window_size: usize) -> Self {
        let window_size = window_size.max(1);
        Self {
            window_size,
            values: VecDeque::with_capacity(window_size),
        }
    }

    /// Returns the configured window size.
    #[must_use]
    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Whether the window holds `window_size` samples.
    #[must_use]
    pub fn is_warm(&self) -> bool {
        self.values.len() == self.window_size
    }

    /// Push a sample and return the filtered value.
    ///
    /// During warm-up the sample itself is returned. Once the window is full
    /// the median is returned; for an even window size, the two middle values
    /// are averaged (rounded down).
    pub fn update(&mut self, value: u16) -> u16 {
        if self.values.len() == self.window_size {
            self.values.pop_front();
        }
        self.values.push_back(value);

        if !self.is_warm() {
            return value;
        }

        let mut sorted: Vec<u16> = self.values.iter().copied().collect();
        sorted.sort_unstable();

        let mid = sorted.len() / 2;
        if sorted.len() % 2 == 0 {
            ((sorted[mid - 1] as u32 + sorted[mid] as u32) / 2) as u16
        } else {
            sorted[mid]
        }
    }

    /// Forget all samples.
    pub fn reset(&mut self) {
        self.values.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_warm_up_passthrough_then_median() {
        let mut filter = MedianFilter::new(3);
        assert_eq!(filter.update(10), 10);
        assert_eq!(filter.update(1000), 1000);
        assert_eq!(filter.update(20), 20);
    }

    #[test]
    fn test_spike_is_rejected() {
        let mut filter = MedianFilter::new(3);
        for _ in 0..3 {
            filter.update(1500);
        }
        assert_eq!(filter.update(2012), 1500);
        assert_eq!(filter.update(1500), 1500);
    }

    #[test]
    fn test_oldest_sample_is_evicted() {
        let mut filter = MedianFilter::new(3);
        filter.update(1000);
        filter.update(1000);
        filter.update(2000);
        // window is now {1000, 2000, 2000}
        assert_eq!(filter.update(2000), 2000);
    }

    #[test]
    fn test_even_window_averages_middle() {
        let mut filter = MedianFilter::new(4);
        filter.update(1000);
        filter.update(1001);
        filter.update(1500);
        // sorted {1000, 1001, 1500, 2000}: (1001 + 1500) / 2
        assert_eq!(filter.update(2000), 1250);
    }

    #[test]
    fn test_even_window_no_overflow() {
        let mut filter = MedianFilter::new(2);
        filter.update(u16::MAX);
        assert_eq!(filter.update(u16::MAX - 1), u16::MAX - 1);
    }

    #[test]
    fn test_window_one_is_passthrough() {
        let mut filter = MedianFilter::new(1);
        assert_eq!(filter.update(42), 42);
        assert_eq!(filter.update(7), 7);
    }

    #[test]
    fn test_zero_window_clamped() {
        let filter = MedianFilter::new(0);
        assert_eq!(filter.window_size(), 1);
    }

    #[test]
    fn test_reset_restarts_warm_up() {
        let mut filter = MedianFilter::default();
        for v in [1, 2, 3] {
            filter.update(v);
        }
        assert!(filter.is_warm());

        filter.reset();
        assert!(!filter.is_warm());
        assert_eq!(filter.update(900), 900);
    }
}
