//! Jittered sleeps, exponential backoff, and a process-wide token-bucket
//! rate limiter. See `SPEC_FULL.md` §4.4 — the only concurrency primitives
//! the download pipeline uses beyond its own bounded channels.

use std::time::Duration;

use rand::Rng;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// The `uniform(base, min(base * spread, max))` distribution `jitter_sleep`
/// draws from, factored out so both the async and blocking variants (and
/// tests) compute the same bound.
fn jitter_duration(base: Duration, spread: f64, max: Duration) -> Duration {
    let scaled = Duration::from_secs_f64(base.as_secs_f64() * spread).min(max);
    let high = scaled.max(base);
    if high <= base {
        return base;
    }
    let secs = rand::thread_rng().gen_range(base.as_secs_f64()..=high.as_secs_f64());
    Duration::from_secs_f64(secs)
}

/// Sleep for `uniform(base, min(base * spread, max))`.
pub async fn jitter_sleep(base: Duration, spread: f64, max: Duration) {
    let dur = jitter_duration(base, spread, max);
    if !dur.is_zero() {
        tokio::time::sleep(dur).await;
    }
}

/// Blocking counterpart of [`jitter_sleep`], for callers outside an async
/// context. Draws from the same distribution.
pub fn jitter_sleep_blocking(base: Duration, spread: f64, max: Duration) {
    let dur = jitter_duration(base, spread, max);
    if !dur.is_zero() {
        std::thread::sleep(dur);
    }
}

/// Per-chapter inter-request pacing: `jitter_sleep(interval, spread=1.0, max=interval)`,
/// i.e. exactly `interval` with no spread — workers still route through the
/// jitter machinery so pacing and backoff share one code path.
pub async fn request_pacing_sleep(interval: Duration) {
    jitter_sleep(interval, 1.0, interval).await;
}

/// The backoff sleep used between retry attempts: base grows exponentially
/// with `attempt`, but the upper bound stays pinned at `backoff_factor + 3`
/// seconds regardless of attempt, so sleeps never run away even after many
/// failures. See `SPEC_FULL.md` §8 testable property 10.
pub async fn backoff_sleep(backoff_factor: f64, attempt: u32) {
    let base = Duration::from_secs_f64(backoff_factor * 2f64.powi(attempt as i32));
    let max = Duration::from_secs_f64(backoff_factor + 3.0);
    jitter_sleep(base, 1.2, max).await;
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Cooperative, process-wide token-bucket limiter shared by all workers.
/// `max_rps <= 0` disables the limiter entirely — [`TokenBucketRateLimiter::acquire`]
/// then returns immediately.
pub struct TokenBucketRateLimiter {
    state: Mutex<BucketState>,
    max_rps: f64,
}

impl TokenBucketRateLimiter {
    pub fn new(max_rps: f64) -> Self {
        let capacity = max_rps.max(0.0);
        Self {
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
            max_rps,
        }
    }

    pub fn is_disabled(&self) -> bool {
        self.max_rps <= 0.0
    }

    /// Returns only once a token is available. A no-op when disabled.
    pub async fn acquire(&self) {
        if self.is_disabled() {
            return;
        }

        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                let elapsed = now.duration_since(state.last_refill).as_secs_f64();
                state.tokens = (state.tokens + elapsed * self.max_rps).min(self.max_rps.max(1.0));
                state.last_refill = now;

                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    None
                } else {
                    let deficit = 1.0 - state.tokens;
                    Some(Duration::from_secs_f64(deficit / self.max_rps))
                }
            };

            match wait {
                None => return,
                Some(d) => tokio::time::sleep(d).await,
            }
        }
    }
}
