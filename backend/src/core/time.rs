//! Time management for the simulation
//!
//! The simulation operates in discrete periods (hours by default). Days,
//! months (30 days) and years (365 days) are derived windows used by the
//! price regimes, the warm-up rules and the trailing revenue sums.

use serde::{Deserialize, Serialize};

/// Periods in one day for the reference hourly schedule.
pub const HOURS_PER_DAY: usize = 24;

/// Manages simulation time in discrete periods
///
/// # Example
/// ```
/// use cdp_simulator_core_rs::PeriodClock;
///
/// let mut clock = PeriodClock::new(24);
/// assert_eq!(clock.current_period(), 0);
/// assert_eq!(clock.month(), 720);
///
/// clock.advance();
/// assert_eq!(clock.current_period(), 1);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeriodClock {
    /// Periods elapsed since simulation start
    current_period: usize,
    /// Number of periods in one day
    periods_per_day: usize,
}

impl PeriodClock {
    pub fn new(periods_per_day: usize) -> Self {
        assert!(periods_per_day > 0, "periods_per_day must be positive");
        Self {
            current_period: 0,
            periods_per_day,
        }
    }

    /// Advance time by one period
    pub fn advance(&mut self) {
        self.current_period += 1;
    }

    pub fn current_period(&self) -> usize {
        self.current_period
    }

    pub fn periods_per_day(&self) -> usize {
        self.periods_per_day
    }

    /// Length of a day in periods
    pub fn day(&self) -> usize {
        self.periods_per_day
    }

    /// Length of a 30-day month in periods
    pub fn month(&self) -> usize {
        30 * self.periods_per_day
    }

    /// Length of a 365-day year in periods
    pub fn year(&self) -> usize {
        365 * self.periods_per_day
    }

    /// Current day (0-indexed)
    pub fn current_day(&self) -> usize {
        self.current_period / self.periods_per_day
    }
}

impl Default for PeriodClock {
    fn default() -> Self {
        Self::new(HOURS_PER_DAY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[should_panic(expected = "periods_per_day must be positive")]
    fn test_zero_periods_per_day_panics() {
        PeriodClock::new(0);
    }

    #[test]
    fn test_hourly_windows() {
        let clock = PeriodClock::default();
        assert_eq!(clock.day(), 24);
        assert_eq!(clock.month(), 720);
        assert_eq!(clock.year(), 8760);
    }

    #[test]
    fn test_current_day_rolls_over() {
        let mut clock = PeriodClock::new(4);
        for _ in 0..9 {
            clock.advance();
        }
        assert_eq!(clock.current_day(), 2);
    }
}
