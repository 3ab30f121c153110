//! Rolling per-window request quota guard for the Google APIs.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub max_calls_per_window: u32,
    pub window: Duration,
    /// Wait applied on breach, measured from the start of the current window.
    pub buffer: Duration,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            max_calls_per_window: 60,
            window: Duration::from_secs(60),
            buffer: Duration::from_secs(75),
        }
    }
}

impl RateLimitPolicy {
    /// `buffer - (elapsed mod window)`, never negative.
    pub fn wait_for(&self, elapsed_in_window: Duration) -> Duration {
        let window_nanos = self.window.as_nanos().max(1);
        let into_window = Duration::from_nanos((elapsed_in_window.as_nanos() % window_nanos) as u64);
        self.buffer.saturating_sub(into_window)
    }
}

#[derive(Debug)]
pub struct RateLimiter {
    policy: RateLimitPolicy,
    state: Mutex<RateLimitState>,
}

#[derive(Debug, Clone, Copy)]
struct RateLimitState {
    window_start: Option<Instant>,
    calls_in_window: u32,
}

impl RateLimiter {
    pub fn new(policy: RateLimitPolicy) -> Self {
        Self {
            policy,
            state: Mutex::new(RateLimitState {
                window_start: None,
                calls_in_window: 0,
            }),
        }
    }

    pub fn policy(&self) -> RateLimitPolicy {
        self.policy
    }

    /// Records one call, sleeping first when the window quota is used up.
    ///
    /// Returns how long the caller was held back. The lock stays held while
    /// sleeping so concurrent callers queue behind the wait.
    pub async fn acquire(&self) -> Duration {
        let mut state = self.state.lock().await;
        let now = Instant::now();

        let window_start = match state.window_start {
            Some(start) if now.duration_since(start) < self.policy.window => start,
            _ => {
                state.window_start = Some(now);
                state.calls_in_window = 0;
                now
            }
        };

        state.calls_in_window += 1;
        if state.calls_in_window < self.policy.max_calls_per_window {
            return Duration::ZERO;
        }

        let elapsed = now.duration_since(window_start);
        let wait = self.policy.wait_for(elapsed);
        info!(
            calls = state.calls_in_window,
            wait_secs = wait.as_secs_f64(),
            "quota limit reached; waiting before next request"
        );
        tokio::time::sleep(wait).await;

        state.window_start = Some(Instant::now());
        state.calls_in_window = 0;
        info!("resuming after quota wait");
        wait
    }

    pub async fn calls_in_window(&self) -> u32 {
        self.state.lock().await.calls_in_window
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RateLimitPolicy {
        RateLimitPolicy {
            max_calls_per_window: 60,
            window: Duration::from_secs(60),
            buffer: Duration::from_secs(75),
        }
    }

    #[test]
    fn wait_formula_takes_elapsed_modulo_window() {
        let p = policy();
        assert_eq!(p.wait_for(Duration::ZERO), Duration::from_secs(75));
        assert_eq!(p.wait_for(Duration::from_secs(20)), Duration::from_secs(55));
        assert_eq!(p.wait_for(Duration::from_secs(80)), Duration::from_secs(55));
    }

    #[test]
    fn wait_saturates_when_buffer_is_below_window() {
        let p = RateLimitPolicy {
            buffer: Duration::from_secs(10),
            ..policy()
        };
        assert_eq!(p.wait_for(Duration::from_secs(30)), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn sixtieth_call_waits_then_counter_resets() {
        let limiter = RateLimiter::new(policy());
        let started = Instant::now();

        for _ in 0..59 {
            assert_eq!(limiter.acquire().await, Duration::ZERO);
        }
        assert_eq!(Instant::now(), started);
        assert_eq!(limiter.calls_in_window().await, 59);

        tokio::time::advance(Duration::from_millis(500)).await;
        let waited = limiter.acquire().await;
        assert!(waited >= Duration::from_secs(75) - Duration::from_millis(500));
        assert!(Instant::now().duration_since(started) >= Duration::from_secs(75));
        assert_eq!(limiter.calls_in_window().await, 0);

        assert_eq!(limiter.acquire().await, Duration::ZERO);
        assert_eq!(limiter.calls_in_window().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn window_expiry_resets_count_without_waiting() {
        let limiter = RateLimiter::new(policy());
        for _ in 0..30 {
            limiter.acquire().await;
        }
        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(limiter.acquire().await, Duration::ZERO);
        assert_eq!(limiter.calls_in_window().await, 1);
    }
}
