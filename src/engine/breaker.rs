// mdsaad Engine — Circuit Breaker
// Per-provider failure accounting with a three-state machine:
//   Closed   — normal operation, calls pass through
//   Open     — rejecting calls until the cooldown elapses
//   HalfOpen — exactly one probe call allowed; its outcome decides the rest
//
// Only failures that implicate the upstream count toward tripping: network
// unreachable, TLS, timeout, 5xx. Client-side 4xx never trips (it would
// lock users out of a healthy provider), and 429 is the rate limiter's
// business, not the breaker's.

use crate::atoms::types::CircuitConfig;
use crate::engine::clock::Clock;
use log::{info, warn};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

// ── Failure classification ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Connection refused, DNS failure, connection reset.
    Network,
    Tls,
    Timeout,
    /// Any HTTP status outcome.
    Http(u16),
}

impl FailureKind {
    /// Whether this failure implicates the upstream service.
    pub fn trips_breaker(&self) -> bool {
        match self {
            FailureKind::Network | FailureKind::Tls | FailureKind::Timeout => true,
            FailureKind::Http(status) => *status >= 500,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Network => "network",
            FailureKind::Tls => "tls",
            FailureKind::Timeout => "timeout",
            FailureKind::Http(s) if *s == 429 => "rate_limited",
            FailureKind::Http(s) if *s >= 500 => "server_error",
            FailureKind::Http(_) => "client_error",
        }
    }
}

// ── State machine ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug)]
struct Circuit {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure_ms: u64,
    opened_at_ms: u64,
    probe_in_flight: bool,
}

impl Default for Circuit {
    fn default() -> Self {
        Circuit {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            last_failure_ms: 0,
            opened_at_ms: 0,
            probe_in_flight: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllowDecision {
    Ok,
    Denied { state: CircuitState, reopen_in_ms: u64 },
}

impl AllowDecision {
    pub fn is_ok(&self) -> bool {
        matches!(self, AllowDecision::Ok)
    }
}

/// Point-in-time view for the `providers` meta-op and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
}

// ── Registry ───────────────────────────────────────────────────────────────

/// One circuit per provider, each behind its own mutex.
pub struct BreakerRegistry {
    clock: Clock,
    circuits: RwLock<HashMap<String, Arc<Mutex<Circuit>>>>,
}

impl BreakerRegistry {
    pub fn new(clock: Clock) -> Self {
        BreakerRegistry { clock, circuits: RwLock::new(HashMap::new()) }
    }

    fn circuit(&self, provider_id: &str) -> Arc<Mutex<Circuit>> {
        if let Some(c) = self.circuits.read().get(provider_id) {
            return Arc::clone(c);
        }
        let mut map = self.circuits.write();
        Arc::clone(map.entry(provider_id.to_string()).or_default())
    }

    /// Gate one call attempt. In HalfOpen only one probe may be outstanding;
    /// callers that neither succeed nor fail (cancellation) must release it
    /// via `release_probe`.
    pub fn allow(&self, provider_id: &str, cfg: &CircuitConfig) -> AllowDecision {
        let now = self.clock.now_ms();
        let circuit = self.circuit(provider_id);
        let mut c = circuit.lock();
        match c.state {
            CircuitState::Closed => AllowDecision::Ok,
            CircuitState::Open => {
                let reopen_at = c.opened_at_ms + cfg.open_ms;
                if now >= reopen_at {
                    c.state = CircuitState::HalfOpen;
                    c.probe_in_flight = true;
                    info!("[breaker] {} open -> half_open, probe allowed", provider_id);
                    AllowDecision::Ok
                } else {
                    AllowDecision::Denied {
                        state: CircuitState::Open,
                        reopen_in_ms: reopen_at - now,
                    }
                }
            }
            CircuitState::HalfOpen => {
                if c.probe_in_flight {
                    AllowDecision::Denied { state: CircuitState::HalfOpen, reopen_in_ms: 0 }
                } else {
                    c.probe_in_flight = true;
                    AllowDecision::Ok
                }
            }
        }
    }

    pub fn record_success(&self, provider_id: &str) {
        let circuit = self.circuit(provider_id);
        let mut c = circuit.lock();
        if c.state != CircuitState::Closed {
            info!("[breaker] {} {} -> closed", provider_id, c.state.as_str());
        }
        c.state = CircuitState::Closed;
        c.consecutive_failures = 0;
        c.opened_at_ms = 0;
        c.probe_in_flight = false;
    }

    pub fn record_failure(&self, provider_id: &str, kind: FailureKind, cfg: &CircuitConfig) {
        let now = self.clock.now_ms();
        let circuit = self.circuit(provider_id);
        let mut c = circuit.lock();

        if !kind.trips_breaker() {
            // The upstream answered; a client-side fault resolves the probe
            // without counting against the provider.
            c.probe_in_flight = false;
            return;
        }

        c.last_failure_ms = now;
        match c.state {
            CircuitState::Closed => {
                c.consecutive_failures += 1;
                if c.consecutive_failures >= cfg.fail_threshold {
                    c.state = CircuitState::Open;
                    c.opened_at_ms = now;
                    warn!(
                        "[breaker] {} tripped after {} consecutive failures ({}), open for {}ms",
                        provider_id,
                        c.consecutive_failures,
                        kind.as_str(),
                        cfg.open_ms
                    );
                }
            }
            CircuitState::HalfOpen => {
                c.state = CircuitState::Open;
                c.opened_at_ms = now;
                c.consecutive_failures += 1;
                c.probe_in_flight = false;
                warn!("[breaker] {} probe failed ({}), reopening", provider_id, kind.as_str());
            }
            CircuitState::Open => {
                // Late failure from a call admitted before the trip.
                c.consecutive_failures += 1;
            }
        }
    }

    /// Forget an outstanding half-open probe without recording an outcome.
    /// Used when a probe call is cancelled by the caller.
    pub fn release_probe(&self, provider_id: &str) {
        let circuit = self.circuit(provider_id);
        circuit.lock().probe_in_flight = false;
    }

    /// Manual reset back to Closed with clear counters.
    pub fn reset(&self, provider_id: &str) {
        let circuit = self.circuit(provider_id);
        let mut c = circuit.lock();
        *c = Circuit::default();
        info!("[breaker] {} reset", provider_id);
    }

    pub fn snapshot(&self, provider_id: &str) -> CircuitSnapshot {
        let circuit = self.circuit(provider_id);
        let c = circuit.lock();
        CircuitSnapshot { state: c.state, consecutive_failures: c.consecutive_failures }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(threshold: u32, open_ms: u64) -> CircuitConfig {
        CircuitConfig { fail_threshold: threshold, open_ms, half_open_probes: 1 }
    }

    #[test]
    fn trips_after_threshold_consecutive_failures() {
        let reg = BreakerRegistry::new(Clock::new());
        let c = cfg(5, 30_000);
        for i in 0..4 {
            reg.record_failure("p", FailureKind::Http(500), &c);
            assert!(reg.allow("p", &c).is_ok(), "still closed after {} failures", i + 1);
        }
        reg.record_failure("p", FailureKind::Http(500), &c);
        assert_eq!(reg.snapshot("p").state, CircuitState::Open);
        match reg.allow("p", &c) {
            AllowDecision::Denied { state, reopen_in_ms } => {
                assert_eq!(state, CircuitState::Open);
                assert!(reopen_in_ms > 0 && reopen_in_ms <= 30_000);
            }
            AllowDecision::Ok => panic!("open circuit must deny"),
        }
    }

    #[test]
    fn success_resets_the_failure_run() {
        let reg = BreakerRegistry::new(Clock::new());
        let c = cfg(3, 30_000);
        reg.record_failure("p", FailureKind::Network, &c);
        reg.record_failure("p", FailureKind::Network, &c);
        reg.record_success("p");
        reg.record_failure("p", FailureKind::Network, &c);
        reg.record_failure("p", FailureKind::Network, &c);
        assert!(reg.allow("p", &c).is_ok());
        assert_eq!(reg.snapshot("p").consecutive_failures, 2);
    }

    #[test]
    fn client_errors_never_trip() {
        let reg = BreakerRegistry::new(Clock::new());
        let c = cfg(2, 30_000);
        for status in [400, 401, 402, 404, 422, 429] {
            reg.record_failure("p", FailureKind::Http(status), &c);
            reg.record_failure("p", FailureKind::Http(status), &c);
        }
        assert_eq!(reg.snapshot("p").state, CircuitState::Closed);
        assert_eq!(reg.snapshot("p").consecutive_failures, 0);
    }

    #[test]
    fn half_open_allows_exactly_one_probe() {
        let reg = BreakerRegistry::new(Clock::new());
        let c = cfg(1, 30);
        reg.record_failure("p", FailureKind::Http(503), &c);
        assert_eq!(reg.snapshot("p").state, CircuitState::Open);

        std::thread::sleep(std::time::Duration::from_millis(40));
        assert!(reg.allow("p", &c).is_ok());
        assert_eq!(reg.snapshot("p").state, CircuitState::HalfOpen);
        // Probe outstanding: further calls are rejected.
        assert!(!reg.allow("p", &c).is_ok());
        assert!(!reg.allow("p", &c).is_ok());

        reg.record_success("p");
        assert_eq!(reg.snapshot("p").state, CircuitState::Closed);
        assert!(reg.allow("p", &c).is_ok());
    }

    #[test]
    fn failed_probe_reopens() {
        let reg = BreakerRegistry::new(Clock::new());
        let c = cfg(1, 20);
        reg.record_failure("p", FailureKind::Timeout, &c);
        std::thread::sleep(std::time::Duration::from_millis(30));
        assert!(reg.allow("p", &c).is_ok());
        reg.record_failure("p", FailureKind::Timeout, &c);
        assert_eq!(reg.snapshot("p").state, CircuitState::Open);
        assert!(!reg.allow("p", &c).is_ok());
    }

    #[test]
    fn released_probe_lets_the_next_caller_try() {
        let reg = BreakerRegistry::new(Clock::new());
        let c = cfg(1, 20);
        reg.record_failure("p", FailureKind::Network, &c);
        std::thread::sleep(std::time::Duration::from_millis(30));
        assert!(reg.allow("p", &c).is_ok());
        assert!(!reg.allow("p", &c).is_ok());
        reg.release_probe("p");
        assert!(reg.allow("p", &c).is_ok());
    }

    #[test]
    fn reset_clears_everything() {
        let reg = BreakerRegistry::new(Clock::new());
        let c = cfg(1, 60_000);
        reg.record_failure("p", FailureKind::Http(500), &c);
        assert_eq!(reg.snapshot("p").state, CircuitState::Open);
        reg.reset("p");
        let snap = reg.snapshot("p");
        assert_eq!(snap.state, CircuitState::Closed);
        assert_eq!(snap.consecutive_failures, 0);
        assert!(reg.allow("p", &c).is_ok());
    }

    #[test]
    fn providers_are_isolated() {
        let reg = BreakerRegistry::new(Clock::new());
        let c = cfg(1, 60_000);
        reg.record_failure("a", FailureKind::Http(500), &c);
        assert!(!reg.allow("a", &c).is_ok());
        assert!(reg.allow("b", &c).is_ok());
        assert_eq!(reg.snapshot("b").consecutive_failures, 0);
    }
}
