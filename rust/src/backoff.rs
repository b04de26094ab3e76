use std::time::Duration;

use rand::Rng;

/// Exponential backoff with optional symmetric jitter: `base * 2^(attempt-1)`,
/// jittered by `±jitter`, never above `max`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    jitter: f64,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration, jitter: f64) -> Self {
        Self {
            base,
            max: max.max(base),
            jitter: jitter.clamp(0.0, 1.0),
        }
    }

    /// Delay before retry number `attempt` (1-based; 0 is treated as 1).
    pub fn delay(&self, attempt: u32) -> Duration {
        self.delay_with(attempt, &mut rand::thread_rng())
    }

    pub fn delay_with<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32);
        let base_ms = u64::try_from(self.base.as_millis()).unwrap_or(u64::MAX);
        let max_ms = u64::try_from(self.max.as_millis()).unwrap_or(u64::MAX);
        let raw_ms = base_ms.saturating_mul(1u64 << exponent).min(max_ms);

        if self.jitter == 0.0 || raw_ms == 0 {
            return Duration::from_millis(raw_ms);
        }
        let factor = 1.0 + rng.gen_range(-self.jitter..=self.jitter);
        let jittered = (raw_ms as f64 * factor).round() as u64;
        Duration::from_millis(jittered.min(max_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doubles_until_ceiling() {
        let backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(1_000), 0.0);
        let delays: Vec<u128> = (1..=6).map(|n| backoff.delay(n).as_millis()).collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1_000, 1_000]);
        assert_eq!(backoff.delay(0), Duration::from_millis(100));
        assert_eq!(backoff.delay(u32::MAX), Duration::from_millis(1_000));
    }

    #[test]
    fn test_jitter_stays_in_band() {
        let backoff = Backoff::new(Duration::from_millis(1_000), Duration::from_secs(60), 0.2);
        for _ in 0..200 {
            let ms = backoff.delay(1).as_millis();
            assert!((800..=1_200).contains(&ms), "{ms} out of band");
        }
    }

    #[test]
    fn test_jitter_never_exceeds_ceiling() {
        let backoff = Backoff::new(Duration::from_millis(1_000), Duration::from_millis(1_000), 0.2);
        for _ in 0..200 {
            assert!(backoff.delay(5) <= Duration::from_millis(1_000));
        }
    }
}
