// mdsaad Engine — Rate Limiter
// Sliding-window admission control, one window per (provider, endpoint).
// The limiter counts attempts admitted; the circuit breaker counts failures
// by outcome. The two never share a counter.
//
// Admission algorithm, per key:
//   1. drop timestamps older than `now - window_ms`
//   2. len >= window limit        -> deny WINDOW_FULL, retry when the oldest expires
//   3. count newer than `now - 1s`; at burst limit -> deny BURST_FULL
//   4. append `now`, return Ok (record-on-admit)

use crate::atoms::types::RateLimitConfig;
use crate::engine::clock::Clock;
use log::debug;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

const BURST_WINDOW_MS: u64 = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    WindowFull,
    BurstFull,
}

impl DenyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DenyReason::WindowFull => "window_full",
            DenyReason::BurstFull => "burst_full",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Ok,
    Denied { retry_after_ms: u64, reason: DenyReason },
}

impl Admission {
    pub fn is_ok(&self) -> bool {
        matches!(self, Admission::Ok)
    }
}

/// Admission history for one (provider, endpoint) pair.
#[derive(Debug, Default)]
struct RateWindow {
    /// Millisecond timestamps of recent admissions, oldest first.
    stamps: VecDeque<u64>,
    /// Upstream-imposed hold (429 Retry-After). No admissions until then.
    blocked_until: u64,
}

impl RateWindow {
    /// Stored timestamps older than the window must be discarded on every
    /// admission check, so window-count always equals the stored length.
    fn evict_expired(&mut self, now: u64, window_ms: u64) {
        let cutoff = now.saturating_sub(window_ms);
        while let Some(&oldest) = self.stamps.front() {
            if oldest <= cutoff {
                self.stamps.pop_front();
            } else {
                break;
            }
        }
    }

    fn burst_count(&self, now: u64) -> (usize, Option<u64>) {
        let cutoff = now.saturating_sub(BURST_WINDOW_MS);
        let mut count = 0usize;
        let mut oldest_in_burst = None;
        for &stamp in self.stamps.iter().rev() {
            if stamp > cutoff {
                count += 1;
                oldest_in_burst = Some(stamp);
            } else {
                break;
            }
        }
        (count, oldest_in_burst)
    }
}

/// Occupancy snapshot for the `quota` meta-op.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowSnapshot {
    pub provider_id: String,
    pub endpoint: String,
    pub window_count: usize,
    pub last_second_count: usize,
    pub blocked_for_ms: u64,
}

type Key = (String, String);

/// Owns every rate window in the process. No other component touches the
/// state; callers go through `admit` and `block_until`.
pub struct RateLimiter {
    clock: Clock,
    windows: RwLock<HashMap<Key, Arc<Mutex<RateWindow>>>>,
}

impl RateLimiter {
    pub fn new(clock: Clock) -> Self {
        RateLimiter { clock, windows: RwLock::new(HashMap::new()) }
    }

    fn window(&self, provider_id: &str, endpoint: &str) -> Arc<Mutex<RateWindow>> {
        if let Some(win) = self
            .windows
            .read()
            .get(&(provider_id.to_string(), endpoint.to_string()))
        {
            return Arc::clone(win);
        }
        let mut map = self.windows.write();
        Arc::clone(
            map.entry((provider_id.to_string(), endpoint.to_string()))
                .or_default(),
        )
    }

    /// Try to take one admission slot. On `Ok` the admission is recorded
    /// immediately; there is no separate record step to forget.
    pub fn admit(&self, provider_id: &str, endpoint: &str, cfg: &RateLimitConfig) -> Admission {
        // Both sub-limits disabled: nothing to track.
        if cfg.requests_per_window == 0 && cfg.burst_per_second == 0 {
            return Admission::Ok;
        }

        let now = self.clock.now_ms();
        let win = self.window(provider_id, endpoint);
        let mut win = win.lock();

        if now < win.blocked_until {
            let retry = win.blocked_until - now;
            debug!("[rate-limit] {}:{} upstream hold for {}ms", provider_id, endpoint, retry);
            return Admission::Denied { retry_after_ms: retry, reason: DenyReason::WindowFull };
        }

        win.evict_expired(now, cfg.window_ms);

        if cfg.requests_per_window > 0 && win.stamps.len() >= cfg.requests_per_window as usize {
            let oldest = *win.stamps.front().expect("non-empty at limit");
            let retry = (oldest + cfg.window_ms).saturating_sub(now).max(1);
            debug!(
                "[rate-limit] {}:{} window full ({}/{}), retry in {}ms",
                provider_id,
                endpoint,
                win.stamps.len(),
                cfg.requests_per_window,
                retry
            );
            return Admission::Denied { retry_after_ms: retry, reason: DenyReason::WindowFull };
        }

        if cfg.burst_per_second > 0 {
            let (count, oldest_in_burst) = win.burst_count(now);
            if count >= cfg.burst_per_second as usize {
                let oldest = oldest_in_burst.expect("burst count nonzero");
                let retry = BURST_WINDOW_MS.saturating_sub(now - oldest).max(1);
                debug!(
                    "[rate-limit] {}:{} burst full ({}/s), retry in {}ms",
                    provider_id, endpoint, cfg.burst_per_second, retry
                );
                return Admission::Denied { retry_after_ms: retry, reason: DenyReason::BurstFull };
            }
        }

        win.stamps.push_back(now);
        Admission::Ok
    }

    /// Honor an upstream 429: hold this key closed until `now + hold_ms`.
    pub fn block_for(&self, provider_id: &str, endpoint: &str, hold_ms: u64) {
        let now = self.clock.now_ms();
        let win = self.window(provider_id, endpoint);
        let mut win = win.lock();
        win.blocked_until = win.blocked_until.max(now + hold_ms);
    }

    /// Current occupancy of every tracked window.
    pub fn snapshot(&self) -> Vec<WindowSnapshot> {
        let now = self.clock.now_ms();
        let map = self.windows.read();
        let mut out: Vec<WindowSnapshot> = map
            .iter()
            .map(|((provider, endpoint), win)| {
                let win = win.lock();
                let (burst, _) = win.burst_count(now);
                WindowSnapshot {
                    provider_id: provider.clone(),
                    endpoint: endpoint.clone(),
                    window_count: win.stamps.len(),
                    last_second_count: burst,
                    blocked_for_ms: win.blocked_until.saturating_sub(now),
                }
            })
            .collect();
        out.sort_by(|a, b| {
            (a.provider_id.as_str(), a.endpoint.as_str())
                .cmp(&(b.provider_id.as_str(), b.endpoint.as_str()))
        });
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(window: u32, window_ms: u64, burst: u32) -> RateLimitConfig {
        RateLimitConfig { requests_per_window: window, window_ms, burst_per_second: burst }
    }

    #[test]
    fn admits_up_to_window_limit() {
        let rl = RateLimiter::new(Clock::new());
        let c = cfg(3, 60_000, 0);
        for _ in 0..3 {
            assert!(rl.admit("p", "/chat", &c).is_ok());
        }
        match rl.admit("p", "/chat", &c) {
            Admission::Denied { reason, retry_after_ms } => {
                assert_eq!(reason, DenyReason::WindowFull);
                assert!(retry_after_ms > 0 && retry_after_ms <= 60_000);
            }
            Admission::Ok => panic!("fourth admission should be denied"),
        }
    }

    #[test]
    fn burst_limit_denies_fourth_in_same_second() {
        let rl = RateLimiter::new(Clock::new());
        let c = cfg(100, 3_600_000, 3);
        for _ in 0..3 {
            assert!(rl.admit("p", "/chat", &c).is_ok());
        }
        match rl.admit("p", "/chat", &c) {
            Admission::Denied { reason, retry_after_ms } => {
                assert_eq!(reason, DenyReason::BurstFull);
                assert!(retry_after_ms > 0 && retry_after_ms <= 1_000);
            }
            Admission::Ok => panic!("burst limit should deny"),
        }
    }

    #[test]
    fn zero_limits_mean_disabled() {
        let rl = RateLimiter::new(Clock::new());
        let c = cfg(0, 1_000, 0);
        for _ in 0..1_000 {
            assert!(rl.admit("p", "/x", &c).is_ok());
        }
    }

    #[test]
    fn window_count_matches_stored_stamps() {
        let rl = RateLimiter::new(Clock::new());
        let c = cfg(10, 50, 0);
        for _ in 0..5 {
            assert!(rl.admit("p", "/x", &c).is_ok());
        }
        let snap = &rl.snapshot()[0];
        assert_eq!(snap.window_count, 5);

        std::thread::sleep(std::time::Duration::from_millis(60));
        // Old stamps are discarded on the next admission check.
        assert!(rl.admit("p", "/x", &c).is_ok());
        let snap = &rl.snapshot()[0];
        assert_eq!(snap.window_count, 1);
    }

    #[test]
    fn keys_are_independent() {
        let rl = RateLimiter::new(Clock::new());
        let c = cfg(1, 60_000, 0);
        assert!(rl.admit("a", "/x", &c).is_ok());
        assert!(rl.admit("b", "/x", &c).is_ok());
        assert!(rl.admit("a", "/y", &c).is_ok());
        assert!(!rl.admit("a", "/x", &c).is_ok());
    }

    #[test]
    fn upstream_hold_blocks_until_deadline() {
        let rl = RateLimiter::new(Clock::new());
        let c = cfg(100, 3_600_000, 0);
        rl.block_for("p", "/x", 50);
        match rl.admit("p", "/x", &c) {
            Admission::Denied { retry_after_ms, .. } => assert!(retry_after_ms <= 50),
            Admission::Ok => panic!("hold should deny"),
        }
        std::thread::sleep(std::time::Duration::from_millis(60));
        assert!(rl.admit("p", "/x", &c).is_ok());
    }

    #[test]
    fn window_refills_after_expiry() {
        let rl = RateLimiter::new(Clock::new());
        let c = cfg(2, 40, 0);
        assert!(rl.admit("p", "/x", &c).is_ok());
        assert!(rl.admit("p", "/x", &c).is_ok());
        assert!(!rl.admit("p", "/x", &c).is_ok());
        std::thread::sleep(std::time::Duration::from_millis(50));
        assert!(rl.admit("p", "/x", &c).is_ok());
    }
}
