//! Fixed-window rate limiting per caller.
//!
//! Windows run on the monotonic clock so moving the wall clock cannot reset
//! them. Check-and-increment happens inside one critical section.

use keygate_core::effects::ClockEffects;
use keygate_core::{CallerId, RateLimitConfig};
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::{debug, warn};

const PRUNE_THRESHOLD: usize = 4096;

#[derive(Debug, Clone, Copy)]
struct Window {
    start_ms: u64,
    count: u32,
}

/// Per-caller fixed-window counter
#[derive(Debug)]
pub struct RateLimiter<C> {
    clock: C,
    window_ms: u64,
    max_requests: u32,
    windows: Mutex<HashMap<CallerId, Window>>,
}

impl<C: ClockEffects> RateLimiter<C> {
    pub fn new(clock: C, config: &RateLimitConfig) -> Self {
        Self {
            clock,
            window_ms: config.window_ms,
            max_requests: config.max_requests,
            windows: Mutex::new(HashMap::new()),
        }
    }

    fn is_open(&self, window: &Window, now: u64) -> bool {
        // A clock behind the window start means a restart; treat as elapsed.
        now >= window.start_ms && now - window.start_ms < self.window_ms
    }

    /// Count one request and report whether it is admitted.
    pub fn admit(&self, caller: &CallerId) -> bool {
        let now = self.clock.monotonic_time_ms();
        let mut windows = self.windows.lock();
        if windows.len() >= PRUNE_THRESHOLD {
            windows.retain(|_, window| self.is_open(window, now));
        }

        match windows.get_mut(caller) {
            Some(window) if self.is_open(window, now) => {
                window.count = window.count.saturating_add(1);
                let admitted = window.count <= self.max_requests;
                if !admitted {
                    warn!(caller = %caller, count = window.count, "rate limit exceeded");
                }
                admitted
            }
            _ => {
                windows.insert(
                    caller.clone(),
                    Window {
                        start_ms: now,
                        count: 1,
                    },
                );
                debug!(caller = %caller, "rate limit window opened");
                true
            }
        }
    }

    /// Requests left for the caller in the current window.
    pub fn remaining(&self, caller: &CallerId) -> u32 {
        let now = self.clock.monotonic_time_ms();
        match self.windows.lock().get(caller) {
            Some(window) if self.is_open(window, now) => {
                self.max_requests.saturating_sub(window.count)
            }
            _ => self.max_requests,
        }
    }

    /// Forget one caller's window.
    pub fn reset(&self, caller: &CallerId) {
        self.windows.lock().remove(caller);
    }

    /// Forget every window, e.g. after a network change.
    pub fn reset_all(&self) {
        let mut windows = self.windows.lock();
        debug!(cleared = windows.len(), "rate limit windows reset");
        windows.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keygate_testkit::ControllableClock;
    use proptest::prelude::*;

    fn limiter(max_requests: u32) -> (RateLimiter<ControllableClock>, ControllableClock) {
        let clock = ControllableClock::default();
        let config = RateLimitConfig {
            window_ms: 60_000,
            max_requests,
        };
        (RateLimiter::new(clock.clone(), &config), clock)
    }

    fn caller(name: &str) -> CallerId {
        CallerId::new(name).unwrap()
    }

    #[test]
    fn n_plus_one_is_rejected() {
        let (limiter, _) = limiter(3);
        let app = caller("app");
        assert!(limiter.admit(&app));
        assert!(limiter.admit(&app));
        assert!(limiter.admit(&app));
        assert!(!limiter.admit(&app));
        assert_eq!(limiter.remaining(&app), 0);
    }

    #[test]
    fn elapsed_window_grants_fresh_budget() {
        let (limiter, clock) = limiter(2);
        let app = caller("app");
        assert!(limiter.admit(&app));
        assert!(limiter.admit(&app));
        assert!(!limiter.admit(&app));

        clock.advance(60_000);
        assert!(limiter.admit(&app));
        assert!(limiter.admit(&app));
        assert!(!limiter.admit(&app));
    }

    #[test]
    fn wall_clock_changes_do_not_reset() {
        let (limiter, clock) = limiter(1);
        let app = caller("app");
        assert!(limiter.admit(&app));
        clock.advance_wall(10 * 60_000);
        assert!(!limiter.admit(&app));
    }

    #[test]
    fn callers_are_independent() {
        let (limiter, _) = limiter(1);
        assert!(limiter.admit(&caller("a")));
        assert!(limiter.admit(&caller("b")));
        assert!(!limiter.admit(&caller("a")));
        assert_eq!(limiter.remaining(&caller("c")), 1);
    }

    #[test]
    fn reset_clears_windows() {
        let (limiter, _) = limiter(1);
        let app = caller("app");
        assert!(limiter.admit(&app));
        limiter.reset_all();
        assert!(limiter.admit(&app));
        limiter.reset(&app);
        assert!(limiter.admit(&app));
        assert!(!limiter.admit(&app));
    }

    #[test]
    fn concurrent_admits_never_exceed_limit() {
        let (limiter, _) = limiter(50);
        let limiter = std::sync::Arc::new(limiter);
        let app = caller("app");
        let admitted: usize = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let limiter = &limiter;
                    let app = &app;
                    scope.spawn(move || (0..20).filter(|_| limiter.admit(app)).count())
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });
        assert_eq!(admitted, 50);
    }

    proptest! {
        #[test]
        fn exactly_n_admits_per_window(limit in 1u32..40, attempts in 0u32..80) {
            let (limiter, _) = limiter(limit);
            let app = caller("app");
            let admitted = (0..attempts).filter(|_| limiter.admit(&app)).count() as u32;
            prop_assert_eq!(admitted, attempts.min(limit));
        }
    }
}
