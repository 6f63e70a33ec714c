// mdsaad Engine — Clock & Request IDs
// Monotonic time source plus a unique per-process request-ID generator.
// Every time comparison in the rate limiter and circuit breaker goes
// through `now_ms()` so wall-clock skew cannot reopen a blocked window.

use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

const BASE36: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Process-wide sequence mixed into request IDs so two IDs minted in the
/// same millisecond still differ even if the random suffixes collide.
static REQUEST_SEQ: AtomicU64 = AtomicU64::new(0);

/// Monotonic clock anchored at construction. Cheap to clone and share.
#[derive(Debug, Clone)]
pub struct Clock {
    epoch: Instant,
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock {
    pub fn new() -> Self {
        Clock { epoch: Instant::now() }
    }

    /// Milliseconds since this clock was created. Never goes backwards.
    pub fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    /// Wall-clock UTC, for persisted records only.
    pub fn wall_now(&self) -> chrono::DateTime<chrono::Utc> {
        chrono::Utc::now()
    }

    /// `req_<unix_ms>_<6 base36 chars>`, unique within the process.
    pub fn new_request_id(&self) -> String {
        let unix_ms = self.wall_now().timestamp_millis();
        let seq = REQUEST_SEQ.fetch_add(1, Ordering::Relaxed);
        let mut rng = rand::rng();
        // Fold the sequence counter into the first character and draw the
        // rest at random.
        let mut suffix = [0u8; 6];
        suffix[0] = BASE36[(seq % 36) as usize];
        for slot in suffix.iter_mut().skip(1) {
            *slot = BASE36[rng.random_range(0..36)];
        }
        format!(
            "req_{}_{}",
            unix_ms,
            std::str::from_utf8(&suffix).expect("base36 is ascii")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn now_is_monotonic() {
        let clock = Clock::new();
        let a = clock.now_ms();
        let b = clock.now_ms();
        assert!(b >= a);
    }

    #[test]
    fn request_ids_have_expected_shape() {
        let clock = Clock::new();
        let id = clock.new_request_id();
        let parts: Vec<&str> = id.splitn(3, '_').collect();
        assert_eq!(parts[0], "req");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), 6);
        assert!(parts[2].chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn request_ids_unique_in_tight_loop() {
        let clock = Clock::new();
        let mut seen = HashSet::new();
        for _ in 0..10_000 {
            assert!(seen.insert(clock.new_request_id()));
        }
    }
}
