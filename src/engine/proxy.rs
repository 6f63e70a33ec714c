// mdsaad Engine — Proxy Fallback Layer
// Before direct providers are tried, operations go through an ordered list
// of proxy endpoints. One transition policy for every operation:
//   next URL on ECONNREFUSED / DNS failure / 5xx / timeout
//   stop on 4xx (a client error will not improve on another proxy)
//   429 surfaces as RateLimited and never falls through to direct
//   a reply that does not parse as a normalized reply marks the proxy
//   broken, which is also a transition
// When every URL transitions, the caller gets Exhausted and goes direct.
//
// The layer also enforces its own per-capability client-side quota so a
// chatty session backs off before the proxy has to say 429 itself.

use crate::atoms::constants::{
    PROXY_CHAT_QUOTA, PROXY_EXCHANGE_QUOTA, PROXY_WEATHER_QUOTA, USER_AGENT,
};
use crate::atoms::error::{AttemptFailure, CallError};
use crate::atoms::types::{CallPayload, Capability, NormalizedReply, RateLimitConfig, Reply, Route};
use crate::engine::clock::Clock;
use crate::engine::rate_limit::{Admission, RateLimiter};
use crate::engine::transport::{CancelToken, HttpRequest, HttpTransport, Method, TransportError};
use log::{debug, info, warn};
use std::sync::Arc;

const PROXY_CHAT_TIMEOUT_MS: u64 = 60_000;
const PROXY_LOOKUP_TIMEOUT_MS: u64 = 30_000;

/// What a proxy round produced.
#[derive(Debug)]
pub enum ProxyOutcome {
    Reply(Reply),
    /// Every URL failed with a transition-eligible error; the caller should
    /// fall through to direct providers. The trace lists each attempt.
    Exhausted(Vec<AttemptFailure>),
}

pub struct ProxyLayer {
    clock: Clock,
    urls: Vec<String>,
    enabled: bool,
    quota: RateLimiter,
    transport: Arc<dyn HttpTransport>,
}

impl ProxyLayer {
    pub fn new(
        clock: Clock,
        urls: Vec<String>,
        enabled: bool,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        let quota = RateLimiter::new(clock.clone());
        ProxyLayer { clock, urls, enabled, quota, transport }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled && !self.urls.is_empty()
    }

    fn op_path(capability: Capability) -> &'static str {
        match capability {
            Capability::Chat | Capability::Streaming => "chat",
            Capability::ExchangeRate => "exchange",
            _ => "weather",
        }
    }

    fn quota_for(capability: Capability) -> RateLimitConfig {
        let (requests, window_ms) = match capability {
            Capability::Chat | Capability::Streaming => PROXY_CHAT_QUOTA,
            Capability::ExchangeRate => PROXY_EXCHANGE_QUOTA,
            _ => PROXY_WEATHER_QUOTA,
        };
        RateLimitConfig { requests_per_window: requests, window_ms, burst_per_second: 0 }
    }

    fn timeout_for(capability: Capability) -> u64 {
        match capability {
            Capability::Chat | Capability::Streaming => PROXY_CHAT_TIMEOUT_MS,
            _ => PROXY_LOOKUP_TIMEOUT_MS,
        }
    }

    pub async fn call(
        &self,
        capability: Capability,
        payload: &CallPayload,
        cancel: &CancelToken,
    ) -> Result<ProxyOutcome, CallError> {
        if !self.is_enabled() {
            return Ok(ProxyOutcome::Exhausted(Vec::new()));
        }

        let op = Self::op_path(capability);
        match self.quota.admit("proxy", op, &Self::quota_for(capability)) {
            Admission::Ok => {}
            Admission::Denied { retry_after_ms, .. } => {
                debug!("[proxy] client-side {} quota exhausted", op);
                return Err(CallError::RateLimited { retry_after_ms });
            }
        }

        let mut trace: Vec<AttemptFailure> = Vec::new();
        for (index, base) in self.urls.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(CallError::Cancelled);
            }

            let url = format!("{}/{}", base.trim_end_matches('/'), op);
            let request = HttpRequest {
                method: Method::Post,
                url: url.clone(),
                headers: vec![
                    ("User-Agent".into(), USER_AGENT.into()),
                    ("Accept".into(), "application/json".into()),
                ],
                body: Some(serde_json::json!({
                    "capability": capability.as_str(),
                    "payload": payload,
                })),
                timeout_ms: Self::timeout_for(capability),
            };

            debug!("[proxy] attempt {} -> {}", index + 1, url);
            let started = self.clock.now_ms();
            let response = match self.transport.execute(request, cancel).await {
                Ok(response) => response,
                Err(TransportError::Cancelled) => return Err(CallError::Cancelled),
                Err(e) => {
                    // Unreachable endpoint: transition to the next URL.
                    warn!("[proxy] {} unreachable: {}", url, e);
                    trace.push(AttemptFailure {
                        provider_id: format!("proxy[{}]", index),
                        reason: e.to_string(),
                    });
                    continue;
                }
            };
            let response_time_ms = self.clock.now_ms() - started;

            match response.status {
                status if (200..300).contains(&status) => {
                    match serde_json::from_str::<NormalizedReply>(&response.body) {
                        Ok(body) => {
                            info!("[proxy] served {} via {} in {}ms", op, url, response_time_ms);
                            return Ok(ProxyOutcome::Reply(Reply {
                                body,
                                provider_id: format!("proxy[{}]", index),
                                attempt_number: index as u32 + 1,
                                response_time_ms,
                                route: Route::Proxy,
                                from_cache: false,
                            }));
                        }
                        Err(e) => {
                            // Wrong shape means a broken proxy, not a broken
                            // request: transition.
                            warn!("[proxy] {} returned an alien reply shape: {}", url, e);
                            trace.push(AttemptFailure {
                                provider_id: format!("proxy[{}]", index),
                                reason: format!("malformed_reply: {}", e),
                            });
                        }
                    }
                }
                429 => {
                    // The user is being throttled, not the infrastructure:
                    // surface it, never fall through to direct.
                    let retry_after_ms = response.retry_after_ms().unwrap_or(60_000);
                    return Err(CallError::RateLimited { retry_after_ms });
                }
                status if (400..500).contains(&status) => {
                    // Terminal client error: break the loop, no fall-through.
                    return Err(CallError::Client {
                        status,
                        message: crate::atoms::types::truncate_utf8(response.body.trim(), 200)
                            .to_string(),
                    });
                }
                status => {
                    trace.push(AttemptFailure {
                        provider_id: format!("proxy[{}]", index),
                        reason: format!("http_{}", status),
                    });
                }
            }
        }

        info!("[proxy] exhausted {} endpoints, falling back to direct", self.urls.len());
        Ok(ProxyOutcome::Exhausted(trace))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::types::{ChatMessage, ChatPayload, TokenUsage};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;

    struct ScriptedTransport {
        script: Vec<(&'static str, Result<(u16, String), TransportError>)>,
        hits: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl HttpTransport for ScriptedTransport {
        async fn execute(
            &self,
            request: HttpRequest,
            cancel: &CancelToken,
        ) -> Result<crate::engine::transport::HttpResponse, TransportError> {
            if cancel.is_cancelled() {
                return Err(TransportError::Cancelled);
            }
            self.hits.lock().push(request.url.clone());
            for (needle, result) in &self.script {
                if request.url.contains(needle) {
                    return result.clone().map(|(status, body)| {
                        crate::engine::transport::HttpResponse {
                            status,
                            headers: Vec::new(),
                            body,
                        }
                    });
                }
            }
            Err(TransportError::Network("unscripted".into()))
        }
    }

    fn normalized_chat(content: &str) -> String {
        serde_json::to_string(&NormalizedReply::Chat {
            content: content.into(),
            model: "proxy-model".into(),
            usage: TokenUsage::default(),
            finish_reason: Some("stop".into()),
            chunks: vec![content.into()],
        })
        .unwrap()
    }

    fn payload() -> CallPayload {
        CallPayload::Chat(ChatPayload {
            messages: vec![ChatMessage::user("hi")],
            model: None,
            temperature: None,
            max_tokens: None,
            top_p: None,
            stream: false,
        })
    }

    fn layer(
        script: Vec<(&'static str, Result<(u16, String), TransportError>)>,
        urls: &[&str],
    ) -> (ProxyLayer, Arc<ScriptedTransport>) {
        let transport =
            Arc::new(ScriptedTransport { script, hits: Mutex::new(Vec::new()) });
        let layer = ProxyLayer::new(
            Clock::new(),
            urls.iter().map(|s| s.to_string()).collect(),
            true,
            Arc::clone(&transport) as Arc<dyn HttpTransport>,
        );
        (layer, transport)
    }

    #[tokio::test]
    async fn primary_proxy_serves() {
        let (layer, transport) =
            layer(vec![("proxy-a", Ok((200, normalized_chat("hi"))))], &["https://proxy-a/v1", "https://proxy-b/v1"]);
        let outcome = layer.call(Capability::Chat, &payload(), &CancelToken::new()).await.unwrap();
        match outcome {
            ProxyOutcome::Reply(reply) => {
                assert_eq!(reply.route, Route::Proxy);
                assert_eq!(reply.attempt_number, 1);
            }
            ProxyOutcome::Exhausted(_) => panic!("primary should serve"),
        }
        assert_eq!(transport.hits.lock().len(), 1);
    }

    #[tokio::test]
    async fn transitions_then_exhausts() {
        let (layer, transport) = layer(
            vec![
                ("proxy-a", Err(TransportError::Network("connection refused".into()))),
                ("proxy-b", Ok((503, String::new()))),
            ],
            &["https://proxy-a/v1", "https://proxy-b/v1"],
        );
        let outcome = layer.call(Capability::Chat, &payload(), &CancelToken::new()).await.unwrap();
        match outcome {
            ProxyOutcome::Exhausted(trace) => {
                assert_eq!(trace.len(), 2);
                assert!(trace[0].reason.contains("network"));
                assert!(trace[1].reason.contains("http_503"));
            }
            ProxyOutcome::Reply(_) => panic!("both proxies are down"),
        }
        assert_eq!(transport.hits.lock().len(), 2);
    }

    #[tokio::test]
    async fn four_xx_is_terminal_not_a_transition() {
        let (layer, transport) = layer(
            vec![("proxy-a", Ok((400, "bad payload".into())))],
            &["https://proxy-a/v1", "https://proxy-b/v1"],
        );
        let err =
            layer.call(Capability::Chat, &payload(), &CancelToken::new()).await.unwrap_err();
        assert!(matches!(err, CallError::Client { status: 400, .. }));
        // Second proxy never contacted.
        assert_eq!(transport.hits.lock().len(), 1);
    }

    #[tokio::test]
    async fn proxy_429_surfaces_and_does_not_fall_through() {
        let (layer, transport) = layer(
            vec![("proxy-a", Ok((429, String::new())))],
            &["https://proxy-a/v1", "https://proxy-b/v1"],
        );
        let err =
            layer.call(Capability::Chat, &payload(), &CancelToken::new()).await.unwrap_err();
        assert!(matches!(err, CallError::RateLimited { .. }));
        assert_eq!(transport.hits.lock().len(), 1);
    }

    #[tokio::test]
    async fn alien_reply_shape_transitions() {
        let (layer, _) = layer(
            vec![
                ("proxy-a", Ok((200, json!({"weird": true}).to_string()))),
                ("proxy-b", Ok((200, normalized_chat("saved")))),
            ],
            &["https://proxy-a/v1", "https://proxy-b/v1"],
        );
        let outcome = layer.call(Capability::Chat, &payload(), &CancelToken::new()).await.unwrap();
        match outcome {
            ProxyOutcome::Reply(reply) => assert_eq!(reply.attempt_number, 2),
            ProxyOutcome::Exhausted(_) => panic!("second proxy was healthy"),
        }
    }

    #[tokio::test]
    async fn disabled_layer_exhausts_immediately() {
        let transport = Arc::new(ScriptedTransport { script: vec![], hits: Mutex::new(Vec::new()) });
        let layer = ProxyLayer::new(
            Clock::new(),
            vec!["https://proxy-a/v1".into()],
            false,
            Arc::clone(&transport) as Arc<dyn HttpTransport>,
        );
        let outcome = layer.call(Capability::Chat, &payload(), &CancelToken::new()).await.unwrap();
        assert!(matches!(outcome, ProxyOutcome::Exhausted(trace) if trace.is_empty()));
        assert!(transport.hits.lock().is_empty());
    }

    #[tokio::test]
    async fn client_side_quota_denies_early() {
        let (layer, transport) = layer(
            vec![("proxy-a", Ok((200, normalized_chat("ok"))))],
            &["https://proxy-a/v1"],
        );
        // The chat quota is 50 per hour; burn it.
        for _ in 0..50 {
            let _ = layer.call(Capability::Chat, &payload(), &CancelToken::new()).await;
        }
        let err =
            layer.call(Capability::Chat, &payload(), &CancelToken::new()).await.unwrap_err();
        assert!(matches!(err, CallError::RateLimited { .. }));
        assert_eq!(transport.hits.lock().len(), 50);
    }
}
