//! Token-bucket admission gate for upstream downloads.
//!
//! Refill is computed lazily on each acquisition attempt from the elapsed
//! time, so there is no background task. A configured rate of zero disables
//! the gate entirely.

use std::sync::Mutex;

use tokio::time::{Duration, Instant};

struct State {
    tokens: f64,
    last_refill: Instant,
}

pub struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    state: Mutex<State>,
}

impl TokenBucket {
    /// `rate_per_minute` tokens flow in per minute; the bucket holds at most
    /// `burst` tokens and starts full. Rate zero means unlimited.
    pub fn new(rate_per_minute: u32, burst: usize) -> Self {
        let capacity = burst.max(1) as f64;
        Self {
            capacity,
            refill_per_sec: f64::from(rate_per_minute) / 60.0,
            state: Mutex::new(State {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn is_unlimited(&self) -> bool {
        self.refill_per_sec == 0.0
    }

    /// Take one token if available.
    pub fn try_acquire(&self) -> bool {
        if self.is_unlimited() {
            return true;
        }
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        self.refill(&mut state);
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Wait for a token until `deadline`. Returns false if the deadline
    /// elapses first.
    pub async fn acquire(&self, deadline: Instant) -> bool {
        loop {
            if self.try_acquire() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let wait = self.time_to_next_token().min(deadline - now);
            tokio::time::sleep(wait).await;
        }
    }

    fn refill(&self, state: &mut State) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
            state.last_refill = now;
        }
    }

    fn time_to_next_token(&self) -> Duration {
        if self.is_unlimited() {
            return Duration::from_millis(0);
        }
        let state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let needed = (1.0 - state.tokens).max(0.0);
        let secs = needed / self.refill_per_sec;
        Duration::from_secs_f64(secs).max(Duration::from_millis(10))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn burst_is_available_immediately() {
        let bucket = TokenBucket::new(60, 3);
        assert!(bucket.try_acquire());
        assert!(bucket.try_acquire());
        assert!(bucket.try_acquire());
        assert!(!bucket.try_acquire());
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_bucket_fails_within_deadline() {
        let bucket = TokenBucket::new(60, 1);
        assert!(bucket.try_acquire());

        let deadline = Instant::now() + Duration::from_millis(100);
        assert!(!bucket.acquire(deadline).await);
    }

    #[tokio::test(start_paused = true)]
    async fn tokens_refill_over_time() {
        let bucket = TokenBucket::new(60, 1);
        assert!(bucket.try_acquire());
        assert!(!bucket.try_acquire());

        // 60/min means one token per second.
        tokio::time::advance(Duration::from_millis(1100)).await;
        assert!(bucket.try_acquire());
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_waits_for_refill() {
        let bucket = TokenBucket::new(60, 1);
        assert!(bucket.try_acquire());

        let deadline = Instant::now() + Duration::from_secs(5);
        assert!(bucket.acquire(deadline).await);
    }

    #[tokio::test]
    async fn zero_rate_is_unlimited() {
        let bucket = TokenBucket::new(0, 1);
        for _ in 0..100 {
            assert!(bucket.try_acquire());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn refill_never_exceeds_capacity() {
        let bucket = TokenBucket::new(600, 2);
        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(bucket.try_acquire());
        assert!(bucket.try_acquire());
        assert!(!bucket.try_acquire());
    }
}
