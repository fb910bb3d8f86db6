//! Dead-reckoning motion model.
//!
//! The real cover reports nothing back, so every position and tilt value is
//! derived from how long the motor has been driven in one direction. Each
//! cover owns two independent [`Axis`] instances, one for travel and one for
//! the slats; they never share a time basis.

use std::time::Duration;

use serde::Serialize;

/// Lower bound of every axis.
pub const MIN_VALUE: f64 = 0.0;

/// Upper bound of every axis.
pub const MAX_VALUE: f64 = 100.0;

/// Which way the motor is driving an axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Travel {
    /// Toward 100 (open).
    Opening,
    /// Toward 0 (closed).
    Closing,
}

impl Travel {
    /// Direction needed to get from `from` to `to`.
    pub fn toward(from: f64, to: f64) -> Self {
        if to >= from {
            Travel::Opening
        } else {
            Travel::Closing
        }
    }

    pub fn sign(self) -> f64 {
        match self {
            Travel::Opening => 1.0,
            Travel::Closing => -1.0,
        }
    }

    /// The end of the axis this direction runs into.
    pub fn extreme(self) -> f64 {
        match self {
            Travel::Opening => MAX_VALUE,
            Travel::Closing => MIN_VALUE,
        }
    }
}

/// Clamp a value into the valid axis range.
pub fn clamp(value: f64) -> f64 {
    value.clamp(MIN_VALUE, MAX_VALUE)
}

/// Linear interpolation of an axis value after `elapsed` time of travel.
///
/// `full_travel` is the time the motor needs to sweep the whole 0..=100
/// range. The result is always clamped, so elapsed times past the end of the
/// axis never extrapolate outside it.
pub fn estimate(elapsed: Duration, full_travel: Duration, start: f64, travel: Travel) -> f64 {
    let fraction = elapsed.as_secs_f64() / full_travel.as_secs_f64();
    clamp(start + travel.sign() * MAX_VALUE * fraction)
}

/// One independently parameterized axis (position or tilt).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Axis {
    full_travel: Duration,
}

impl Axis {
    /// Create an axis. `full_travel` must be non-zero; configuration loading
    /// rejects anything else before an axis is ever built.
    pub fn new(full_travel: Duration) -> Self {
        debug_assert!(!full_travel.is_zero(), "axis full travel must be positive");
        Self { full_travel }
    }

    pub fn full_travel(&self) -> Duration {
        self.full_travel
    }

    pub fn estimate(&self, elapsed: Duration, start: f64, travel: Travel) -> f64 {
        estimate(elapsed, self.full_travel, start, travel)
    }

    /// Time the motor needs to move this axis by `delta` units.
    pub fn travel_time(&self, delta: f64) -> Duration {
        let fraction = (delta.abs() / MAX_VALUE).min(1.0);
        self.full_travel.mul_f64(fraction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWENTY_SECONDS: Duration = Duration::from_secs(20);

    #[test]
    fn test_estimate_at_zero_elapsed_is_start() {
        for start in [0.0, 12.5, 50.0, 100.0] {
            assert_eq!(estimate(Duration::ZERO, TWENTY_SECONDS, start, Travel::Opening), start);
            assert_eq!(estimate(Duration::ZERO, TWENTY_SECONDS, start, Travel::Closing), start);
        }
    }

    #[test]
    fn test_estimate_full_travel_reaches_end() {
        assert_eq!(estimate(TWENTY_SECONDS, TWENTY_SECONDS, 0.0, Travel::Opening), 100.0);
        assert_eq!(estimate(TWENTY_SECONDS, TWENTY_SECONDS, 100.0, Travel::Closing), 0.0);
    }

    #[test]
    fn test_estimate_literal_points() {
        let tilt = Duration::from_millis(750);
        let two_seconds = estimate(Duration::from_secs(2), TWENTY_SECONDS, 0.0, Travel::Opening);
        assert!((two_seconds - 10.0).abs() < 1e-9);
        let five_seconds = estimate(Duration::from_secs(5), TWENTY_SECONDS, 80.0, Travel::Closing);
        assert!((five_seconds - 55.0).abs() < 1e-9);
        let half = estimate(Duration::from_millis(375), tilt, 0.0, Travel::Opening);
        assert!((half - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_estimate_never_leaves_range() {
        let far = Duration::from_secs(3600);
        assert_eq!(estimate(far, TWENTY_SECONDS, 40.0, Travel::Opening), 100.0);
        assert_eq!(estimate(far, TWENTY_SECONDS, 40.0, Travel::Closing), 0.0);
    }

    #[test]
    fn test_estimate_monotonic_in_elapsed() {
        let mut previous_up = estimate(Duration::ZERO, TWENTY_SECONDS, 30.0, Travel::Opening);
        let mut previous_down = estimate(Duration::ZERO, TWENTY_SECONDS, 30.0, Travel::Closing);
        for ms in (0..=20_000).step_by(125) {
            let elapsed = Duration::from_millis(ms);
            let up = estimate(elapsed, TWENTY_SECONDS, 30.0, Travel::Opening);
            let down = estimate(elapsed, TWENTY_SECONDS, 30.0, Travel::Closing);
            assert!(up >= previous_up);
            assert!(down <= previous_down);
            assert!((MIN_VALUE..=MAX_VALUE).contains(&up));
            assert!((MIN_VALUE..=MAX_VALUE).contains(&down));
            previous_up = up;
            previous_down = down;
        }
    }

    #[test]
    fn test_travel_time_is_proportional() {
        let axis = Axis::new(TWENTY_SECONDS);
        assert_eq!(axis.travel_time(50.0), Duration::from_secs(10));
        assert_eq!(axis.travel_time(-25.0), Duration::from_secs(5));
        assert_eq!(axis.travel_time(0.0), Duration::ZERO);
        assert_eq!(axis.travel_time(250.0), TWENTY_SECONDS);
    }

    #[test]
    fn test_travel_direction_and_extreme() {
        assert_eq!(Travel::toward(10.0, 90.0), Travel::Opening);
        assert_eq!(Travel::toward(90.0, 10.0), Travel::Closing);
        assert_eq!(Travel::Opening.extreme(), 100.0);
        assert_eq!(Travel::Closing.extreme(), 0.0);
    }
}
