use std::time::Duration;

/// Delay schedule for retrying failed requests.
///
/// `max_retries: None` means retry forever; the loop that uses the policy
/// decides what happens once retries are exhausted.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    initial: Duration,
    max: Duration,
    multiplier: f64,
    max_retries: Option<u32>,
    jitter: bool,
}

impl BackoffPolicy {
    /// Doubling delay from `initial`, held at `max` once reached. Unbounded.
    pub fn exponential(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
            multiplier: 2.0,
            max_retries: None,
            jitter: true,
        }
    }

    /// Same delay every time, at most `max_retries` retries.
    pub fn fixed(delay: Duration, max_retries: u32) -> Self {
        Self {
            initial: delay,
            max: delay,
            multiplier: 1.0,
            max_retries: Some(max_retries),
            jitter: false,
        }
    }

    #[cfg(test)]
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Whether another attempt is allowed after `failures` consecutive failures
    pub fn allows_retry(&self, failures: u32) -> bool {
        self.max_retries.is_none_or(|max| failures <= max)
    }

    /// Delay before retry number `failures` (1-based)
    pub fn delay_for(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(32) as i32;
        let base = (self.initial.as_millis() as f64 * self.multiplier.powi(exponent))
            .min(self.max.as_millis() as f64) as u64;
        // Up to 25% jitter so retries against the same host spread out
        let jitter = if self.jitter {
            (base as f64 * 0.25 * fastrand::f64()) as u64
        } else {
            0
        };
        Duration::from_millis(base + jitter)
    }
}
