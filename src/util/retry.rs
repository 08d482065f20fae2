use std::time::{Duration, Instant};

use crate::error::Result;

/// Time source for polling and retries; faked in tests.
pub trait Clock: Sync {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration);
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed,
    Exponential,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
    pub backoff: Backoff,
    pub timeout: Option<Duration>,
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            interval,
            backoff: Backoff::Fixed,
            timeout: None,
        }
    }

    pub fn exponential(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            interval,
            backoff: Backoff::Exponential,
            timeout: None,
        }
    }

    /// Poll at a fixed interval until `timeout` elapses.
    pub fn polling(interval: Duration, timeout: Duration) -> Self {
        Self {
            max_attempts: u32::MAX,
            interval,
            backoff: Backoff::Fixed,
            timeout: Some(timeout),
        }
    }

    /// Delay after the given (1-based) failed attempt.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.interval,
            Backoff::Exponential => {
                let shift = attempt.saturating_sub(1).min(16);
                self.interval.saturating_mul(1u32 << shift)
            }
        }
    }

    /// Runs `op` until it succeeds, attempts run out, or the timeout would be exceeded.
    /// The last error is returned on exhaustion.
    pub fn run<T, F>(&self, clock: &dyn Clock, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut(u32) -> Result<T>,
    {
        let started = clock.now();
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if attempt >= self.max_attempts {
                        return Err(err);
                    }
                    let delay = self.delay_after(attempt);
                    if let Some(timeout) = self.timeout {
                        if clock.now().duration_since(started) + delay > timeout {
                            return Err(err);
                        }
                    }
                    tracing::warn!(
                        "{} failed (attempt {}/{}): {}; retrying in {}s",
                        what,
                        attempt,
                        if self.max_attempts == u32::MAX {
                            "-".to_string()
                        } else {
                            self.max_attempts.to_string()
                        },
                        err,
                        delay.as_secs()
                    );
                    clock.sleep(delay);
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VaultError;
    use crate::testing::FakeClock;

    #[test]
    fn exponential_delays_double() {
        let policy = RetryPolicy::exponential(5, Duration::from_secs(2));
        assert_eq!(policy.delay_after(1), Duration::from_secs(2));
        assert_eq!(policy.delay_after(2), Duration::from_secs(4));
        assert_eq!(policy.delay_after(3), Duration::from_secs(8));
    }

    #[test]
    fn retries_until_success() {
        let clock = FakeClock::new();
        let policy = RetryPolicy::fixed(3, Duration::from_secs(5));
        let result = policy.run(&clock, "upload", |attempt| {
            if attempt < 3 {
                Err(VaultError::message("flaky"))
            } else {
                Ok(attempt)
            }
        });
        assert_eq!(result.expect("ok"), 3);
        assert_eq!(clock.elapsed(), Duration::from_secs(10));
    }

    #[test]
    fn gives_up_after_max_attempts() {
        let clock = FakeClock::new();
        let policy = RetryPolicy::exponential(3, Duration::from_secs(1));
        let mut calls = 0;
        let result: Result<()> = policy.run(&clock, "download", |_| {
            calls += 1;
            Err(VaultError::message("down"))
        });
        assert!(result.is_err());
        assert_eq!(calls, 3);
        assert_eq!(clock.elapsed(), Duration::from_secs(3));
    }

    #[test]
    fn timeout_bounds_polling() {
        let clock = FakeClock::new();
        let policy = RetryPolicy::polling(Duration::from_secs(5), Duration::from_secs(12));
        let mut calls = 0;
        let result: Result<()> = policy.run(&clock, "poll", |_| {
            calls += 1;
            Err(VaultError::message("not ready"))
        });
        assert!(result.is_err());
        assert_eq!(calls, 3);
        assert!(clock.elapsed() <= Duration::from_secs(12));
    }
}
