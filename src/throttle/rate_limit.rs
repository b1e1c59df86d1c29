//! Sliding-window rate limiter.
//!
//! In-memory per-caller admission control over a trailing 60 second window.
//! Unlike an HTTP-style limiter that rejects, this one suspends: `admit`
//! sleeps until the window frees a slot, so a caller can never exceed its
//! per-minute cap but is always eventually admitted.

use std::collections::{HashMap, VecDeque};
use tokio::sync::Mutex;
use tokio::time::{sleep_until, Duration, Instant};
use tracing::debug;

const WINDOW: Duration = Duration::from_secs(60);
/// Margin added when sleeping until the oldest call leaves the window, so a
/// re-check lands strictly after expiry.
const WAKE_MARGIN: Duration = Duration::from_millis(250);

pub struct RateLimiter {
    default_cap: usize,
    caps: HashMap<String, usize>,
    windows: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(max_calls_per_minute: usize) -> Self {
        Self {
            default_cap: max_calls_per_minute.max(1),
            caps: HashMap::new(),
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Overrides the per-minute cap for one named caller.
    pub fn with_cap(mut self, caller: &str, max_calls_per_minute: usize) -> Self {
        self.caps
            .insert(caller.to_string(), max_calls_per_minute.max(1));
        self
    }

    fn cap_for(&self, caller: &str) -> usize {
        self.caps.get(caller).copied().unwrap_or(self.default_cap)
    }

    /// Waits until a slot is free for `caller`, then reserves it by
    /// recording the admission timestamp. This is the only designed
    /// suspension point in the pipeline; it blocks the calling sequential
    /// path, not the process.
    pub async fn admit(&self, caller: &str) {
        let cap = self.cap_for(caller);
        loop {
            let wake_at = {
                let mut windows = self.windows.lock().await;
                let window = windows.entry(caller.to_string()).or_default();
                let now = Instant::now();

                while let Some(front) = window.front() {
                    if now.duration_since(*front) >= WINDOW {
                        window.pop_front();
                    } else {
                        break;
                    }
                }

                if window.len() < cap {
                    window.push_back(now);
                    return;
                }

                // Window full: the oldest recent call bounds the next slot.
                *window.front().unwrap() + WINDOW + WAKE_MARGIN
            };

            debug!(
                caller,
                wait_ms = wake_at.saturating_duration_since(Instant::now()).as_millis() as u64,
                "rate limit window full, waiting"
            );
            sleep_until(wake_at).await;
        }
    }

    /// Recent-call count for `caller`.
    pub async fn in_flight(&self, caller: &str) -> usize {
        let mut windows = self.windows.lock().await;
        let Some(window) = windows.get_mut(caller) else {
            return 0;
        };
        let now = Instant::now();
        while let Some(front) = window.front() {
            if now.duration_since(*front) >= WINDOW {
                window.pop_front();
            } else {
                break;
            }
        }
        window.len()
    }
}
