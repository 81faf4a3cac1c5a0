use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::{DalleError, Result};

/// Rolling-window limiter: at most `allowance` permits in any `period`.
///
/// Only the most recent `allowance` grant timestamps are kept. A new permit
/// is granted when the ledger is not yet full, or when its oldest entry has
/// aged out of the window, in which case that entry is evicted. The check
/// and the record happen under one lock, so a permit is never handed out
/// twice. No fairness is promised between waiters.
///
/// # Example
/// ```no_run
/// use dalle_queue::RateLimiter;
/// use std::time::Duration;
///
/// # async fn example() -> dalle_queue::Result<()> {
/// let limiter = RateLimiter::new(3, Duration::from_secs(60))?;
/// limiter.wait_for_permit(Duration::from_secs(1)).await;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct RateLimiter {
    allowance: usize,
    period: Duration,
    stamps: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// Create a limiter. An `allowance` of zero would never grant and is rejected.
    pub fn new(allowance: u32, period: Duration) -> Result<Self> {
        if allowance == 0 {
            return Err(DalleError::InvalidConfig(
                "rate limit allowance must be at least 1".into(),
            ));
        }
        let allowance = allowance as usize;
        Ok(Self {
            allowance,
            period,
            stamps: Mutex::new(VecDeque::with_capacity(allowance)),
        })
    }

    pub fn allowance(&self) -> u32 {
        self.allowance as u32
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Grant a permit if one is available right now. Never blocks.
    pub fn try_acquire(&self) -> bool {
        self.acquire_or_wait_time().is_ok()
    }

    /// Suspend until a permit is granted.
    ///
    /// After each refusal, sleeps until the oldest recorded permit leaves the
    /// window plus `extra_delay`, then tries again.
    pub async fn wait_for_permit(&self, extra_delay: Duration) {
        loop {
            match self.acquire_or_wait_time() {
                Ok(()) => return,
                Err(until_expiry) => {
                    tracing::debug!(
                        wait_ms = (until_expiry + extra_delay).as_millis() as u64,
                        "Rate limit reached, waiting for a permit"
                    );
                    tokio::time::sleep(until_expiry + extra_delay).await;
                }
            }
        }
    }

    /// Single indivisible grant decision. On refusal returns the time left
    /// until the oldest permit expires.
    fn acquire_or_wait_time(&self) -> std::result::Result<(), Duration> {
        // The ledger is always left consistent, so a poisoned lock is still usable.
        let mut stamps = match self.stamps.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let now = Instant::now();

        if stamps.len() < self.allowance {
            stamps.push_back(now);
            return Ok(());
        }

        // Inclusive boundary: a waiter woken exactly at expiry must be granted,
        // otherwise a zero extra delay would spin on zero-length sleeps.
        match stamps.front().copied() {
            Some(oldest) if now.duration_since(oldest) >= self.period => {
                stamps.pop_front();
                stamps.push_back(now);
                Ok(())
            }
            Some(oldest) => Err((oldest + self.period).saturating_duration_since(now)),
            None => {
                stamps.push_back(now);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_zero_allowance_rejected() {
        let result = RateLimiter::new(0, Duration::from_secs(60));
        assert!(matches!(result, Err(DalleError::InvalidConfig(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_allowance_then_refusal() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60)).unwrap();
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());

        // Grants made at the same instant expire together.
        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }

    #[tokio::test(start_paused = true)]
    async fn test_oldest_grant_evicted_first() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60)).unwrap();
        assert!(limiter.try_acquire()); // t=0
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(limiter.try_acquire()); // t=10
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(limiter.try_acquire()); // t=20
        assert!(!limiter.try_acquire());

        tokio::time::advance(Duration::from_secs(39)).await;
        assert!(!limiter.try_acquire());

        // t=60: only the t=0 grant has left the window.
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());

        // t=70: the t=10 grant leaves next.
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_extra_delay_grants_at_window_boundary() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60)).unwrap();
        let start = Instant::now();
        limiter.wait_for_permit(Duration::ZERO).await;
        limiter.wait_for_permit(Duration::ZERO).await;
        assert_eq!(start.elapsed(), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refusal_has_no_side_effects() {
        let limiter = RateLimiter::new(1, Duration::from_secs(10)).unwrap();
        assert!(limiter.try_acquire());
        tokio::time::advance(Duration::from_secs(5)).await;
        for _ in 0..10 {
            assert!(!limiter.try_acquire());
        }
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(limiter.try_acquire());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_permit_sleeps_until_oldest_expires() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60)).unwrap();
        let start = Instant::now();
        limiter.wait_for_permit(Duration::from_secs(1)).await;
        assert_eq!(start.elapsed(), Duration::ZERO);

        limiter.wait_for_permit(Duration::from_secs(1)).await;
        assert!(start.elapsed() >= Duration::from_secs(61));
        assert!(start.elapsed() < Duration::from_secs(62));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_waiters_respect_window() {
        let allowance = 2;
        let period = Duration::from_secs(30);
        let limiter = Arc::new(RateLimiter::new(allowance, period).unwrap());
        let start = Instant::now();

        let mut handles = Vec::new();
        for _ in 0..7 {
            let limiter = Arc::clone(&limiter);
            handles.push(tokio::spawn(async move {
                limiter.wait_for_permit(Duration::ZERO).await;
                Instant::now()
            }));
        }

        let mut grants = Vec::new();
        for handle in handles {
            grants.push(handle.await.unwrap());
        }
        grants.sort();

        // Any window of length `period` holds at most `allowance` grants.
        for (i, first) in grants.iter().enumerate() {
            let in_window = grants[i..]
                .iter()
                .filter(|t| t.duration_since(*first) < period)
                .count();
            assert!(in_window <= allowance as usize);
        }
        assert!(grants.last().unwrap().duration_since(start) >= Duration::from_secs(90));
    }
}
