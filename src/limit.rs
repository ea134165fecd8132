use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Token bucket shared by the reconnect loop and the diagnostic reporter.
/// Starts full, so a burst up to `capacity` is allowed before the refill
/// rate takes over.
#[derive(Debug)]
pub(crate) struct TokenBucket {
    rate_per_sec: f64,
    capacity: f64,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub(crate) fn new(capacity: f64, rate_per_sec: f64) -> Self {
        Self {
            rate_per_sec,
            capacity,
            tokens: capacity,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        if elapsed <= 0.0 {
            return;
        }
        self.tokens = (self.tokens + elapsed * self.rate_per_sec).min(self.capacity);
        self.last_refill = now;
    }

    pub(crate) fn try_take(&mut self) -> bool {
        self.refill();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn delay_for(&mut self) -> Duration {
        self.refill();
        if self.tokens >= 1.0 {
            return Duration::from_millis(0);
        }
        let deficit = (1.0 - self.tokens).max(0.0);
        // Cap the sleep so acquire() re-checks cancellation at least once a second.
        Duration::from_secs_f64((deficit / self.rate_per_sec).min(1.0))
    }

    /// Block until a token is available or the caller is cancelled.
    /// Returns `false` on cancellation.
    pub(crate) async fn acquire(&mut self, cancel: &CancellationToken) -> bool {
        loop {
            if cancel.is_cancelled() {
                return false;
            }
            if self.try_take() {
                return true;
            }
            let delay = self.delay_for().max(Duration::from_millis(10));
            tokio::select! {
                _ = cancel.cancelled() => return false,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn allows_initial_burst_up_to_capacity() {
        let mut bucket = TokenBucket::new(3.0, 1.0 / 10.0);
        assert!(bucket.try_take());
        assert!(bucket.try_take());
        assert!(bucket.try_take());
        assert!(!bucket.try_take());
    }

    #[test]
    fn refill_is_capped_at_capacity() {
        let mut bucket = TokenBucket::new(3.0, 1.0 / 10.0);
        for _ in 0..3 {
            assert!(bucket.try_take());
        }
        // Pretend five minutes passed; the bucket must still hold at most 3 tokens.
        bucket.last_refill = Instant::now() - Duration::from_secs(300);
        assert!(bucket.try_take());
        assert!(bucket.try_take());
        assert!(bucket.try_take());
        assert!(!bucket.try_take());
    }

    #[test]
    fn sustained_rate_is_one_token_per_interval() {
        let mut bucket = TokenBucket::new(3.0, 1.0 / 10.0);
        for _ in 0..3 {
            assert!(bucket.try_take());
        }
        bucket.last_refill = Instant::now() - Duration::from_secs(10);
        assert!(bucket.try_take());
        assert!(!bucket.try_take());
    }

    #[test]
    fn at_most_three_takes_within_a_thirty_second_window() {
        // Reconnect limiter parameters: burst 3, one token per 30 seconds.
        let mut bucket = TokenBucket::new(3.0, 1.0 / 30.0);
        let mut taken = 0;
        for _ in 0..10 {
            if bucket.try_take() {
                taken += 1;
            }
        }
        // 29 seconds later the window has not elapsed; still nothing to take.
        bucket.last_refill = Instant::now() - Duration::from_secs(29);
        for _ in 0..10 {
            if bucket.try_take() {
                taken += 1;
            }
        }
        assert_eq!(taken, 3, "at most 3 attempts per 30 s window, got {taken}");
    }

    #[tokio::test]
    async fn acquire_returns_false_when_cancelled() {
        let mut bucket = TokenBucket::new(1.0, 1.0 / 30.0);
        let cancel = CancellationToken::new();
        assert!(bucket.acquire(&cancel).await);
        cancel.cancel();
        assert!(!bucket.acquire(&cancel).await);
    }
}
