//! Rolling-window rate limiter for outbound embedding requests.
//!
//! One instance is shared per process (via `Arc`) and injected into the
//! embedding client explicitly. Callers block in [`RateLimiter::acquire`]
//! until the current window has capacity.

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

struct WindowState {
    count: u32,
    window_start: Instant,
}

/// Token-bucket-like gate over a rolling time window. Not a queue:
/// callers sleep until the window resets, then proceed.
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    state: Mutex<WindowState>,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests: max_requests.max(1),
            window,
            state: Mutex::new(WindowState {
                count: 0,
                window_start: Instant::now(),
            }),
        }
    }

    /// Claim one request slot, sleeping until the window resets if the
    /// quota is exhausted. Safe under concurrent callers: the counter is
    /// mutex-guarded and the lock is released while sleeping.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let elapsed = state.window_start.elapsed();

                if elapsed >= self.window {
                    state.count = 0;
                    state.window_start = Instant::now();
                }

                if state.count < self.max_requests {
                    state.count += 1;
                    return;
                }

                self.window.saturating_sub(state.window_start.elapsed())
            };

            tokio::time::sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_allows_up_to_max_without_blocking() {
        let limiter = RateLimiter::new(5, Duration::from_secs(60));
        let start = Instant::now();
        for _ in 0..5 {
            limiter.acquire().await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocks_past_max_until_window_resets() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        let start = Instant::now();
        for _ in 0..3 {
            limiter.acquire().await;
        }
        // Fourth call must wait out the remainder of the window.
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_counter_resets_after_window() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));
        limiter.acquire().await;
        limiter.acquire().await;

        tokio::time::advance(Duration::from_secs(61)).await;

        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers() {
        let limiter = Arc::new(RateLimiter::new(4, Duration::from_secs(60)));
        let start = Instant::now();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let l = limiter.clone();
                tokio::spawn(async move { l.acquire().await })
            })
            .collect();
        for h in handles {
            h.await.unwrap();
        }

        // 8 acquisitions at 4/window need one full window rollover.
        assert!(start.elapsed() >= Duration::from_secs(60));
    }
}
