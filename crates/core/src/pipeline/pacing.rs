use anyhow::Context;
use rand::Rng;
use std::time::Duration;

pub const DEFAULT_SLEEP_MIN: Duration = Duration::from_millis(2000);
pub const DEFAULT_SLEEP_MAX: Duration = Duration::from_millis(3000);

/// Jittered delay taken before each unit of work is dispatched.
///
/// This paces requests to free quote APIs; it is not a global rate limiter and knows
/// nothing about how many units run at once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchPacing {
    min: Duration,
    max: Duration,
}

impl Default for DispatchPacing {
    fn default() -> Self {
        Self {
            min: DEFAULT_SLEEP_MIN,
            max: DEFAULT_SLEEP_MAX,
        }
    }
}

impl DispatchPacing {
    pub fn new(min: Duration, max: Duration) -> anyhow::Result<Self> {
        anyhow::ensure!(
            min <= max,
            "dispatch sleep bounds are inverted: min {min:?} > max {max:?}"
        );
        Ok(Self { min, max })
    }

    pub fn from_secs_f64(min_secs: f64, max_secs: f64) -> anyhow::Result<Self> {
        anyhow::ensure!(
            min_secs.is_finite() && max_secs.is_finite() && min_secs >= 0.0 && max_secs >= 0.0,
            "dispatch sleep bounds must be non-negative seconds (got {min_secs}..{max_secs})"
        );
        let min = Duration::try_from_secs_f64(min_secs)
            .with_context(|| format!("dispatch sleep min out of range: {min_secs}s"))?;
        let max = Duration::try_from_secs_f64(max_secs)
            .with_context(|| format!("dispatch sleep max out of range: {max_secs}s"))?;
        Self::new(min, max)
    }

    /// No delay at all.
    pub fn none() -> Self {
        Self {
            min: Duration::ZERO,
            max: Duration::ZERO,
        }
    }

    pub fn min(&self) -> Duration {
        self.min
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    pub fn sample(&self) -> Duration {
        if self.min == self.max {
            return self.min;
        }
        let secs = rand::thread_rng().gen_range(self.min.as_secs_f64()..=self.max.as_secs_f64());
        Duration::try_from_secs_f64(secs).unwrap_or(self.max)
    }

    pub async fn pause(&self) {
        let delay = self.sample();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn samples_stay_within_bounds() {
        let pacing = DispatchPacing::default();
        for _ in 0..200 {
            let d = pacing.sample();
            assert!(d >= DEFAULT_SLEEP_MIN && d <= DEFAULT_SLEEP_MAX, "{d:?}");
        }
    }

    #[test]
    fn equal_bounds_give_a_fixed_delay() {
        let pacing = DispatchPacing::from_secs_f64(0.5, 0.5).unwrap();
        assert_eq!(pacing.sample(), Duration::from_millis(500));
        assert_eq!(DispatchPacing::none().sample(), Duration::ZERO);
    }

    #[test]
    fn rejects_inverted_or_negative_bounds() {
        assert!(DispatchPacing::from_secs_f64(3.0, 2.0).is_err());
        assert!(DispatchPacing::from_secs_f64(-1.0, 2.0).is_err());
        assert!(DispatchPacing::from_secs_f64(f64::NAN, 2.0).is_err());
    }

    #[test]
    fn oversized_bounds_are_errors_not_panics() {
        let err = DispatchPacing::from_secs_f64(2.0, 1e30).unwrap_err();
        assert!(format!("{err:#}").contains("max out of range"));
        assert!(DispatchPacing::from_secs_f64(1e30, 1e30).is_err());
    }
}
