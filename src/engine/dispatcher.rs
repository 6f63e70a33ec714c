// mdsaad Engine — Dispatcher
// Orchestrates one user call across the provider catalog: select candidates
// by capability, gate each through the circuit breaker and rate limiter,
// execute over the transport seam, record the outcome, fail over to the
// next candidate. This is the only place provider-specific failures are
// unified into the CallError taxonomy.
//
// Ordering is deterministic: priority ascending, provider id as tie-break,
// with the caller's preferred provider moved to the front when it qualifies.

use crate::atoms::constants::DEFAULT_ADMIT_BUDGET_MS;
use crate::atoms::error::{AttemptFailure, CallError};
use crate::atoms::types::{CallPayload, Capability, Provider, Reply, RequestTicket, Route};
use crate::engine::adapters;
use crate::engine::breaker::{BreakerRegistry, FailureKind};
use crate::engine::clock::Clock;
use crate::engine::rate_limit::{Admission, RateLimiter};
use crate::engine::registry::ProviderRegistry;
use crate::engine::sanitize::{self, RequestSigner};
use crate::engine::transport::{CancelToken, HttpResponse, HttpTransport, TransportError};
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;

/// Fallback hold when a 429 carries no usable Retry-After.
const DEFAULT_429_HOLD_MS: u64 = 60_000;

#[derive(Clone)]
pub struct CallOptions {
    pub preferred_provider: Option<String>,
    /// How long `call` may wait out a rate-limit denial before skipping the
    /// candidate.
    pub budget_ms: u64,
    /// Overall operation deadline. Expiring mid-failover cancels the
    /// current attempt; later candidates are not tried.
    pub deadline_ms: Option<u64>,
    pub cancel: CancelToken,
}

impl Default for CallOptions {
    fn default() -> Self {
        CallOptions {
            preferred_provider: None,
            budget_ms: DEFAULT_ADMIT_BUDGET_MS,
            deadline_ms: None,
            cancel: CancelToken::new(),
        }
    }
}

pub struct Dispatcher {
    clock: Clock,
    registry: Arc<ProviderRegistry>,
    rate_limiter: Arc<RateLimiter>,
    breakers: Arc<BreakerRegistry>,
    signer: Arc<RequestSigner>,
    transport: Arc<dyn HttpTransport>,
}

impl Dispatcher {
    pub fn new(
        clock: Clock,
        registry: Arc<ProviderRegistry>,
        rate_limiter: Arc<RateLimiter>,
        breakers: Arc<BreakerRegistry>,
        signer: Arc<RequestSigner>,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        Dispatcher { clock, registry, rate_limiter, breakers, signer, transport }
    }

    /// Candidates for `capability` in attempt order.
    fn candidates(&self, capability: Capability, options: &CallOptions) -> Vec<Provider> {
        let mut list: Vec<Provider> = self
            .registry
            .list_by_capability(capability)
            .into_iter()
            .filter(|p| p.enabled && p.is_configured())
            .collect();
        if let Some(preferred) = options.preferred_provider.as_deref() {
            if let Some(pos) = list.iter().position(|p| p.id == preferred) {
                let chosen = list.remove(pos);
                list.insert(0, chosen);
            }
        }
        list
    }

    pub async fn call(
        &self,
        capability: Capability,
        payload: CallPayload,
        options: &CallOptions,
    ) -> Result<Reply, CallError> {
        let candidates = self.candidates(capability, options);
        if candidates.is_empty() {
            return Err(CallError::NoProviders { capability: capability.as_str().to_string() });
        }

        let started = self.clock.now_ms();
        let deadline_at = options.deadline_ms.map(|d| started + d);
        let request_id = self.clock.new_request_id();

        let mut reasons: Vec<AttemptFailure> = Vec::new();
        let mut attempt_number = 0u32;

        for provider in &candidates {
            if options.cancel.is_cancelled() {
                return Err(CallError::Cancelled);
            }
            if let Some(deadline) = deadline_at {
                if self.clock.now_ms() >= deadline {
                    return Err(CallError::DeadlineExceeded);
                }
            }

            attempt_number += 1;
            let ticket = RequestTicket {
                request_id: request_id.clone(),
                provider_id: provider.id.clone(),
                started_at_ms: self.clock.now_ms(),
                attempt_number,
                capability,
            };

            if !self.breakers.allow(&provider.id, &provider.circuit).is_ok() {
                debug!(
                    "[dispatch] {} attempt {} skipped: circuit open ({})",
                    ticket.request_id, attempt_number, provider.id
                );
                reasons.push(AttemptFailure {
                    provider_id: provider.id.clone(),
                    reason: "circuit_open".into(),
                });
                continue;
            }

            let endpoint = adapters::endpoint_path(provider, &payload);
            match self.admit_within_budget(provider, endpoint, options, deadline_at).await? {
                Admitted::Yes => {}
                Admitted::No { retry_after_ms } => {
                    reasons.push(AttemptFailure {
                        provider_id: provider.id.clone(),
                        reason: format!("rate_limited (retry in {}ms)", retry_after_ms),
                    });
                    continue;
                }
            }

            let mut request = match adapters::format_request(provider, &payload) {
                Ok(req) => req,
                Err(crate::atoms::error::FabricError::Call(e @ CallError::InvalidInput(_))) => {
                    // Caller fault, identical against every provider.
                    return Err(e);
                }
                Err(e) => {
                    reasons.push(AttemptFailure {
                        provider_id: provider.id.clone(),
                        reason: format!("request_build: {}", e),
                    });
                    continue;
                }
            };
            if let Err(e) = sanitize::validate_url(&request.url) {
                reasons.push(AttemptFailure {
                    provider_id: provider.id.clone(),
                    reason: format!("url_policy: {}", e),
                });
                continue;
            }
            request.headers = sanitize::build_headers(provider, &request.headers);
            if let Some(body) = &request.body {
                if let Some(sig) = self.signer.sign(body, self.clock.wall_now().timestamp_millis())
                {
                    request.headers.push(("X-Request-Signature".into(), sig));
                }
            }
            if let Some(deadline) = deadline_at {
                let remaining = deadline.saturating_sub(self.clock.now_ms());
                request.timeout_ms = request.timeout_ms.min(remaining.max(1));
            }

            debug!(
                "[dispatch] {} attempt {} -> {} {}",
                ticket.request_id, attempt_number, provider.id, endpoint
            );
            let attempt_started = self.clock.now_ms();
            let response = self.transport.execute(request, &options.cancel).await;
            let response_time_ms = self.clock.now_ms() - attempt_started;

            match response {
                Err(TransportError::Cancelled) => {
                    // Caller-initiated: no breaker bookkeeping, no failover.
                    self.breakers.release_probe(&provider.id);
                    return Err(CallError::Cancelled);
                }
                Err(TransportError::Timeout) => {
                    if deadline_at.is_some_and(|d| self.clock.now_ms() >= d) {
                        self.breakers.release_probe(&provider.id);
                        return Err(CallError::DeadlineExceeded);
                    }
                    self.breakers.record_failure(&provider.id, FailureKind::Timeout, &provider.circuit);
                    reasons.push(AttemptFailure {
                        provider_id: provider.id.clone(),
                        reason: "timeout".into(),
                    });
                    warn!("[dispatch] {} timed out after {}ms", provider.id, response_time_ms);
                }
                Err(TransportError::Tls(detail)) => {
                    self.breakers.record_failure(&provider.id, FailureKind::Tls, &provider.circuit);
                    reasons.push(AttemptFailure {
                        provider_id: provider.id.clone(),
                        reason: format!("tls: {}", detail),
                    });
                }
                Err(TransportError::Network(detail)) => {
                    self.breakers.record_failure(&provider.id, FailureKind::Network, &provider.circuit);
                    reasons.push(AttemptFailure {
                        provider_id: provider.id.clone(),
                        reason: format!("network: {}", detail),
                    });
                }
                Ok(response) => {
                    match self.handle_response(provider, &payload, endpoint, response, &ticket)? {
                        Handled::Reply(body) => {
                            info!(
                                "[dispatch] {} served by {} on attempt {} in {}ms",
                                ticket.request_id, provider.id, attempt_number, response_time_ms
                            );
                            return Ok(Reply {
                                body,
                                provider_id: provider.id.clone(),
                                attempt_number,
                                response_time_ms,
                                route: Route::Direct,
                                from_cache: false,
                            });
                        }
                        Handled::Failover(reason) => {
                            reasons.push(AttemptFailure {
                                provider_id: provider.id.clone(),
                                reason,
                            });
                        }
                    }
                }
            }
        }

        Err(CallError::UpstreamUnavailable { reasons })
    }

    /// Outcome of a status-coded response: a parsed reply, a terminal error,
    /// or a reason to try the next candidate.
    fn handle_response(
        &self,
        provider: &Provider,
        payload: &CallPayload,
        endpoint: &str,
        response: HttpResponse,
        ticket: &RequestTicket,
    ) -> Result<Handled, CallError> {
        let status = response.status;

        if (200..300).contains(&status) {
            return match adapters::parse_response(provider, payload, &response.body) {
                Ok(body) => {
                    self.breakers.record_success(&provider.id);
                    Ok(Handled::Reply(body))
                }
                Err(e) => {
                    // A 2xx that does not parse is a broken reply, not an
                    // outage; skip the provider without touching its breaker.
                    self.breakers.release_probe(&provider.id);
                    warn!("[dispatch] {} sent a malformed reply: {}", provider.id, e);
                    Ok(Handled::Failover(format!("malformed_reply: {}", e)))
                }
            };
        }

        if status == 429 {
            let hold = response.retry_after_ms().unwrap_or(DEFAULT_429_HOLD_MS);
            self.rate_limiter.block_for(&provider.id, endpoint, hold);
            self.breakers.record_failure(&provider.id, FailureKind::Http(429), &provider.circuit);
            debug!(
                "[dispatch] {} throttled {} for {}ms",
                ticket.request_id, provider.id, hold
            );
            return Ok(Handled::Failover(format!("rate_limited (hold {}ms)", hold)));
        }

        if (400..500).contains(&status) {
            // Configuration fault, identical across providers: stop here.
            self.breakers.record_failure(
                &provider.id,
                FailureKind::Http(status),
                &provider.circuit,
            );
            return Err(CallError::Client {
                status,
                message: extract_upstream_message(&response.body),
            });
        }

        self.breakers.record_failure(&provider.id, FailureKind::Http(status), &provider.circuit);
        Ok(Handled::Failover(format!("http_{}", status)))
    }

    /// Wait out a rate-limit denial as long as the wait fits the caller's
    /// budget, re-admitting after each sleep.
    async fn admit_within_budget(
        &self,
        provider: &Provider,
        endpoint: &str,
        options: &CallOptions,
        deadline_at: Option<u64>,
    ) -> Result<Admitted, CallError> {
        let mut waited = 0u64;
        loop {
            match self.rate_limiter.admit(&provider.id, endpoint, &provider.rate_limit) {
                Admission::Ok => return Ok(Admitted::Yes),
                Admission::Denied { retry_after_ms, .. } => {
                    if waited + retry_after_ms >= options.budget_ms {
                        return Ok(Admitted::No { retry_after_ms });
                    }
                    if let Some(deadline) = deadline_at {
                        let remaining = deadline.saturating_sub(self.clock.now_ms());
                        if retry_after_ms >= remaining {
                            return Err(CallError::DeadlineExceeded);
                        }
                    }
                    debug!(
                        "[dispatch] waiting {}ms for a {} slot",
                        retry_after_ms, provider.id
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_millis(retry_after_ms)) => {}
                        _ = options.cancel.cancelled() => return Err(CallError::Cancelled),
                    }
                    waited += retry_after_ms;
                }
            }
        }
    }
}

enum Admitted {
    Yes,
    No { retry_after_ms: u64 },
}

enum Handled {
    Reply(crate::atoms::types::NormalizedReply),
    Failover(String),
}

/// Pull a human-readable message out of an upstream error body.
fn extract_upstream_message(body: &str) -> String {
    if let Ok(v) = serde_json::from_str::<serde_json::Value>(body) {
        for path in [&v["error"]["message"], &v["message"], &v["error"]] {
            if let Some(s) = path.as_str() {
                if !s.is_empty() {
                    return s.to_string();
                }
            }
        }
    }
    crate::atoms::types::truncate_utf8(body.trim(), 200).to_string()
}
