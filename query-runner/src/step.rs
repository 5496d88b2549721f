use crate::types::Step;
use std::time::Duration;

/// Computes the API step for a panel.
///
/// Starts from the panel interval (floored to whole seconds). If that would
/// yield more than `max_data_points` samples over `range`, the step is widened
/// to `range / max_data_points`. The result is never below 1 second. A budget
/// of 0 means no limit.
pub fn step_size(range: Duration, interval: Duration, max_data_points: u64) -> Step {
    let mut step = interval.as_secs();
    let range_secs = range.as_secs_f64();

    if max_data_points > 0 {
        let points = if step == 0 {
            f64::INFINITY
        } else {
            (range_secs / step as f64).ceil()
        };

        if points > max_data_points as f64 {
            step = (range_secs / max_data_points as f64).floor() as u64;
        }
    }

    Step::try_from(step.max(1)).unwrap_or(Step::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn test_interval_within_budget() {
        assert_eq!(step_size(secs(1000), secs(10), 100), 10);
        assert_eq!(step_size(secs(3600), secs(60), 1000), 60);
    }

    #[test]
    fn test_widens_step_when_over_budget() {
        // ceil(1000 / 5) = 200 points > 100
        assert_eq!(step_size(secs(1000), secs(5), 100), 10);
    }

    #[test]
    fn test_fractional_interval_is_floored() {
        assert_eq!(step_size(secs(100), Duration::from_millis(2500), 1000), 2);
    }

    #[test]
    fn test_clamped_to_one() {
        assert_eq!(step_size(secs(10), Duration::from_millis(200), 1000), 1);
        assert_eq!(step_size(secs(10), secs(0), 100), 1);
        assert_eq!(step_size(secs(0), secs(0), 0), 1);
    }

    #[test]
    fn test_zero_interval_uses_budget() {
        assert_eq!(step_size(secs(3600), secs(0), 60), 60);
    }

    #[test]
    fn test_same_step_from_different_intervals() {
        // Both hints resolve to the same step and therefore the same bucket
        assert_eq!(
            step_size(secs(1000), secs(1), 100),
            step_size(secs(1000), secs(5), 100)
        );
    }
}
