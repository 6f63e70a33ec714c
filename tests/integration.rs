// mdsaad — end-to-end scenarios against a scripted transport.
// Every test constructs a fresh Core; nothing here opens a socket.

use async_trait::async_trait;
use mdsaad::atoms::error::CallError;
use mdsaad::atoms::types::{
    NormalizedReply, Provider, Route, TokenUsage, Units, UserConfig,
};
use mdsaad::engine::breaker::CircuitState;
use mdsaad::engine::cache::cache_key;
use mdsaad::engine::clock::Clock;
use mdsaad::engine::core::CoreSettings;
use mdsaad::engine::proxy::ProxyOutcome;
use mdsaad::engine::rate_limit::{Admission, RateLimiter};
use mdsaad::engine::registry::builtin_providers;
use mdsaad::engine::transport::{
    CancelToken, HttpRequest, HttpResponse, HttpTransport, TransportError,
};
use mdsaad::engine::Core;
use mdsaad::ops;
use mdsaad::ops::chat::ChatRequest;
use mdsaad::ops::weather::WeatherRequest;
use parking_lot::Mutex;
use proptest::prelude::*;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

// ── Scripted transport ─────────────────────────────────────────────────────

type Scripted = Result<(u16, String), TransportError>;

/// Responses keyed by URL substring; unmatched URLs fail as network errors.
/// Optionally delays every response to give cancellation a window.
struct MockTransport {
    script: Vec<(String, Scripted)>,
    delay: Option<Duration>,
    hits: Mutex<Vec<String>>,
}

impl MockTransport {
    fn new(script: Vec<(&str, Scripted)>) -> Arc<Self> {
        Arc::new(MockTransport {
            script: script.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
            delay: None,
            hits: Mutex::new(Vec::new()),
        })
    }

    fn with_delay(script: Vec<(&str, Scripted)>, delay: Duration) -> Arc<Self> {
        Arc::new(MockTransport {
            script: script.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
            delay: Some(delay),
            hits: Mutex::new(Vec::new()),
        })
    }

    fn hits(&self) -> Vec<String> {
        self.hits.lock().clone()
    }

    fn hits_containing(&self, needle: &str) -> usize {
        self.hits.lock().iter().filter(|u| u.contains(needle)).count()
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn execute(
        &self,
        request: HttpRequest,
        cancel: &CancelToken,
    ) -> Result<HttpResponse, TransportError> {
        if cancel.is_cancelled() {
            return Err(TransportError::Cancelled);
        }
        self.hits.lock().push(request.url.clone());
        if let Some(delay) = self.delay {
            // Honor the per-request timeout the way the real client does.
            let timeout = Duration::from_millis(request.timeout_ms);
            if delay > timeout {
                tokio::select! {
                    _ = tokio::time::sleep(timeout) => return Err(TransportError::Timeout),
                    _ = cancel.cancelled() => return Err(TransportError::Cancelled),
                }
            }
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => return Err(TransportError::Cancelled),
            }
        }
        for (needle, result) in &self.script {
            if request.url.contains(needle.as_str()) {
                return result.clone().map(|(status, body)| HttpResponse {
                    status,
                    headers: Vec::new(),
                    body,
                });
            }
        }
        Err(TransportError::Network(format!("unscripted url {}", request.url)))
    }
}

// ── Core construction helpers ──────────────────────────────────────────────

fn providers_with_keys(ids: &[&str]) -> Vec<Provider> {
    builtin_providers()
        .into_iter()
        .map(|mut p| {
            if ids.contains(&p.id.as_str()) {
                p.credential = Some(format!("key-{}", p.id));
            }
            p
        })
        .collect()
}

fn direct_core(transport: Arc<MockTransport>, configured: &[&str]) -> Core {
    Core::new(
        CoreSettings {
            providers: providers_with_keys(configured),
            proxy_urls: Vec::new(),
            proxy_enabled: false,
            cache_dir: None,
            user_config: UserConfig::default(),
        },
        transport,
    )
}

fn proxied_core(transport: Arc<MockTransport>, configured: &[&str], proxies: &[&str]) -> Core {
    Core::new(
        CoreSettings {
            providers: providers_with_keys(configured),
            proxy_urls: proxies.iter().map(|s| s.to_string()).collect(),
            proxy_enabled: true,
            cache_dir: None,
            user_config: UserConfig::default(),
        },
        transport,
    )
}

fn chat_200(content: &str) -> Scripted {
    Ok((
        200,
        json!({
            "model": "x",
            "choices": [{"message": {"content": content}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 3, "completion_tokens": 1, "total_tokens": 4},
        })
        .to_string(),
    ))
}

fn chat_request(prompt: &str) -> ChatRequest {
    ChatRequest { prompt: prompt.into(), ..Default::default() }
}

// ── Scenario 1: happy path, primary healthy ────────────────────────────────

#[tokio::test]
async fn happy_path_chat_primary_serves_secondary_untouched() {
    let transport = MockTransport::new(vec![("openrouter.ai", chat_200("hi"))]);
    let core = direct_core(Arc::clone(&transport), &["openrouter", "groq"]);

    let reply = ops::chat::run(&core, chat_request("hello"), &CancelToken::new())
        .await
        .expect("primary healthy");

    assert_eq!(reply.provider_id, "openrouter");
    assert_eq!(reply.attempt_number, 1);
    match &reply.body {
        NormalizedReply::Chat { content, model, usage, .. } => {
            assert_eq!(content, "hi");
            assert_eq!(model, "x");
            assert_eq!(
                *usage,
                TokenUsage { prompt_tokens: 3, completion_tokens: 1, total_tokens: 4 }
            );
        }
        other => panic!("unexpected reply {:?}", other),
    }
    assert_eq!(core.history.len(), 1);
    assert_eq!(transport.hits().len(), 1);
    assert_eq!(transport.hits_containing("groq"), 0);
}

// ── Scenario 2: failover on 500 ────────────────────────────────────────────

#[tokio::test]
async fn failover_on_500_reaches_secondary() {
    let transport = MockTransport::new(vec![
        ("openrouter.ai", Ok((500, "upstream exploded".into()))),
        ("groq.com", chat_200("world")),
    ]);
    let core = direct_core(Arc::clone(&transport), &["openrouter", "groq"]);

    let reply = ops::chat::run(&core, chat_request("hello"), &CancelToken::new())
        .await
        .expect("secondary healthy");

    assert_eq!(reply.provider_id, "groq");
    assert_eq!(reply.attempt_number, 2);
    assert_eq!(core.breakers.snapshot("openrouter").consecutive_failures, 1);
    assert_eq!(core.breakers.snapshot("groq").consecutive_failures, 0);
}

// ── Scenario 3: breaker opens, provider no longer contacted ────────────────

#[tokio::test]
async fn breaker_opens_after_five_failures_then_rejects_without_contact() {
    let transport = MockTransport::new(vec![("openrouter.ai", Ok((500, String::new())))]);
    let core = direct_core(Arc::clone(&transport), &["openrouter"]);

    for _ in 0..5 {
        let err = ops::chat::run(&core, chat_request("hello"), &CancelToken::new())
            .await
            .unwrap_err();
        let mdsaad::atoms::error::FabricError::Call(CallError::UpstreamUnavailable { .. }) = err
        else {
            panic!("expected upstream failure, got {:?}", err);
        };
    }
    assert_eq!(core.breakers.snapshot("openrouter").state, CircuitState::Open);
    let contacted = transport.hits_containing("openrouter");
    assert_eq!(contacted, 5);

    let err = ops::chat::run(&core, chat_request("hello"), &CancelToken::new())
        .await
        .unwrap_err();
    match err {
        mdsaad::atoms::error::FabricError::Call(CallError::UpstreamUnavailable { reasons }) => {
            assert_eq!(reasons.len(), 1);
            assert_eq!(reasons[0].reason, "circuit_open");
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(transport.hits_containing("openrouter"), contacted, "no sixth contact");
}

// ── Scenario 4: burst denial numbers ───────────────────────────────────────

#[test]
fn burst_of_four_within_a_second_denies_the_fourth() {
    let limiter = RateLimiter::new(Clock::new());
    let cfg = mdsaad::atoms::types::RateLimitConfig {
        requests_per_window: 100,
        window_ms: 3_600_000,
        burst_per_second: 3,
    };
    for n in 0..3 {
        assert!(
            limiter.admit("openrouter", "/chat/completions", &cfg).is_ok(),
            "admission {} of 3",
            n + 1
        );
    }
    match limiter.admit("openrouter", "/chat/completions", &cfg) {
        Admission::Denied { retry_after_ms, .. } => {
            assert!(retry_after_ms > 0 && retry_after_ms <= 1_000);
        }
        Admission::Ok => panic!("fourth burst admission must be denied"),
    }
}

// ── Scenario 5: proxy exhausts, direct succeeds ────────────────────────────

#[tokio::test]
async fn proxy_exhaustion_falls_through_to_direct() {
    let transport = MockTransport::new(vec![
        ("proxy-a", Err(TransportError::Network("connection refused".into()))),
        ("proxy-b", Ok((503, String::new()))),
        ("openrouter.ai", chat_200("hi")),
    ]);
    let core = proxied_core(
        Arc::clone(&transport),
        &["openrouter"],
        &["https://proxy-a.test/v1", "https://proxy-b.test/v1"],
    );

    let reply = ops::chat::run(&core, chat_request("hello"), &CancelToken::new())
        .await
        .expect("direct provider healthy");

    assert_eq!(reply.route, Route::Direct);
    match &reply.body {
        NormalizedReply::Chat { content, .. } => assert_eq!(content, "hi"),
        other => panic!("unexpected {:?}", other),
    }
    // Both proxy endpoints were attempted before the direct dispatch.
    assert_eq!(transport.hits_containing("proxy-a"), 1);
    assert_eq!(transport.hits_containing("proxy-b"), 1);
    assert_eq!(transport.hits_containing("openrouter"), 1);
}

#[tokio::test]
async fn proxy_exhaustion_trace_lists_both_attempts() {
    let transport = MockTransport::new(vec![
        ("proxy-a", Err(TransportError::Network("connection refused".into()))),
        ("proxy-b", Ok((503, String::new()))),
    ]);
    let core = proxied_core(
        Arc::clone(&transport),
        &["openrouter"],
        &["https://proxy-a.test/v1", "https://proxy-b.test/v1"],
    );
    let payload = mdsaad::atoms::types::CallPayload::Chat(mdsaad::atoms::types::ChatPayload {
        messages: vec![mdsaad::atoms::types::ChatMessage::user("hello")],
        model: None,
        temperature: None,
        max_tokens: None,
        top_p: None,
        stream: false,
    });
    let outcome = core
        .proxy
        .call(mdsaad::atoms::types::Capability::Chat, &payload, &CancelToken::new())
        .await
        .unwrap();
    match outcome {
        ProxyOutcome::Exhausted(trace) => {
            assert_eq!(trace.len(), 2);
            assert!(trace[0].reason.contains("network"));
            assert!(trace[1].reason.contains("http_503"));
        }
        ProxyOutcome::Reply(_) => panic!("both proxies are down"),
    }
}

#[tokio::test]
async fn proxy_429_surfaces_without_direct_fallback() {
    let transport = MockTransport::new(vec![
        ("proxy-a", Ok((429, String::new()))),
        ("openrouter.ai", chat_200("never")),
    ]);
    let core = proxied_core(
        Arc::clone(&transport),
        &["openrouter"],
        &["https://proxy-a.test/v1"],
    );

    let err = ops::chat::run(&core, chat_request("hello"), &CancelToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.exit_code(), 4);
    assert_eq!(transport.hits_containing("openrouter"), 0, "throttled users stay throttled");
}

// ── Scenario 6: weather cache hit ──────────────────────────────────────────

fn weatherapi_200() -> Scripted {
    Ok((
        200,
        json!({
            "location": {"name": "London", "region": "Greater London",
                         "country": "United Kingdom", "lat": 51.52, "lon": -0.11},
            "current": {
                "temp_c": 15.0, "temp_f": 59.0,
                "feelslike_c": 14.0, "feelslike_f": 57.2,
                "humidity": 70, "pressure_mb": 1012.0, "pressure_in": 29.88,
                "wind_kph": 14.0, "wind_mph": 8.7, "wind_degree": 210,
                "condition": {"text": "Cloudy", "code": 1006, "icon": "//cdn/119.png"},
                "vis_km": 10.0, "vis_miles": 6.0, "uv": 3.0, "cloud": 75,
                "precip_mm": 0.0
            },
            "forecast": {"forecastday": [{
                "date": "2026-08-01",
                "day": {"mintemp_c": 11.0, "maxtemp_c": 19.0,
                        "mintemp_f": 51.8, "maxtemp_f": 66.2,
                        "maxwind_kph": 22.0, "maxwind_mph": 13.7,
                        "daily_chance_of_rain": 20,
                        "condition": {"text": "Cloudy", "code": 1006, "icon": "//cdn/119.png"}},
                "astro": {"sunrise": "05:24 AM", "sunset": "08:47 PM"}
            }]}
        })
        .to_string(),
    ))
}

#[tokio::test]
async fn second_weather_lookup_within_ttl_is_served_from_cache() {
    let transport = MockTransport::new(vec![("weatherapi.com", weatherapi_200())]);
    let core = direct_core(Arc::clone(&transport), &["weatherapi"]);

    let request = WeatherRequest { location: "London".into(), ..Default::default() };
    let first = ops::weather::run(&core, request.clone(), &CancelToken::new()).await.unwrap();
    assert!(!first.from_cache);
    assert_eq!(first.provider_id.as_deref(), Some("weatherapi"));
    assert_eq!(transport.hits_containing("weatherapi"), 1);

    let second = ops::weather::run(&core, request, &CancelToken::new()).await.unwrap();
    assert!(second.from_cache);
    assert_eq!(second.report, first.report);
    assert_eq!(transport.hits_containing("weatherapi"), 1, "no second upstream request");
}

// ── Classification law across the 4xx family ───────────────────────────────

#[tokio::test]
async fn every_hard_4xx_is_terminal_and_never_trips_the_breaker() {
    for status in [400u16, 401, 402, 404, 422] {
        let transport = MockTransport::new(vec![
            ("openrouter.ai", Ok((status, json!({"error": {"message": "no"}}).to_string()))),
            ("groq.com", chat_200("unused")),
        ]);
        let core = direct_core(Arc::clone(&transport), &["openrouter", "groq"]);

        let err = ops::chat::run(&core, chat_request("hello"), &CancelToken::new())
            .await
            .unwrap_err();
        match err {
            mdsaad::atoms::error::FabricError::Call(CallError::Client { status: got, .. }) => {
                assert_eq!(got, status);
            }
            other => panic!("status {}: unexpected {:?}", status, other),
        }
        assert_eq!(
            core.breakers.snapshot("openrouter").consecutive_failures,
            0,
            "status {} must not trip",
            status
        );
        assert_eq!(transport.hits_containing("groq"), 0, "status {} must not fail over", status);
    }
}

// ── Cancellation purity ────────────────────────────────────────────────────

#[tokio::test]
async fn cancelling_mid_flight_leaves_every_breaker_untouched() {
    let transport = MockTransport::with_delay(
        vec![("openrouter.ai", chat_200("slow"))],
        Duration::from_secs(5),
    );
    let core = direct_core(Arc::clone(&transport), &["openrouter", "groq"]);

    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        trigger.cancel();
    });

    let err = ops::chat::run(&core, chat_request("hello"), &cancel).await.unwrap_err();
    assert_eq!(err.exit_code(), 130);
    assert_eq!(core.breakers.snapshot("openrouter").consecutive_failures, 0);
    assert_eq!(core.breakers.snapshot("groq").consecutive_failures, 0);
    // No retry against the next candidate after cancellation.
    assert_eq!(transport.hits_containing("groq"), 0);
}

// ── Deadline ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn deadline_expiry_stops_the_failover_loop() {
    let transport = MockTransport::with_delay(
        vec![
            ("openrouter.ai", chat_200("slow")),
            ("groq.com", chat_200("unused")),
        ],
        Duration::from_millis(200),
    );
    let core = direct_core(Arc::clone(&transport), &["openrouter", "groq"]);

    let options = mdsaad::engine::dispatcher::CallOptions {
        deadline_ms: Some(50),
        ..Default::default()
    };
    let payload = mdsaad::atoms::types::CallPayload::Chat(mdsaad::atoms::types::ChatPayload {
        messages: vec![mdsaad::atoms::types::ChatMessage::user("hello")],
        model: None,
        temperature: None,
        max_tokens: None,
        top_p: None,
        stream: false,
    });
    let err = core
        .dispatcher
        .call(mdsaad::atoms::types::Capability::Chat, payload, &options)
        .await
        .unwrap_err();
    assert!(matches!(err, CallError::DeadlineExceeded));
    assert_eq!(transport.hits_containing("groq"), 0, "later candidates are not tried");
}

// ── Property tests ─────────────────────────────────────────────────────────

proptest! {
    #[test]
    fn cache_keys_are_deterministic_and_namespace_scoped(
        ns in "[a-z]{1,12}",
        parts in proptest::collection::vec("[ -~]{0,24}", 0..6),
    ) {
        let views: Vec<&str> = parts.iter().map(String::as_str).collect();
        prop_assert_eq!(cache_key(&ns, &views), cache_key(&ns, &views));
        let other_ns = format!("{}x", ns);
        prop_assert_ne!(cache_key(&ns, &views), cache_key(&other_ns, &views));
    }

    #[test]
    fn rate_limiter_never_admits_past_the_window_limit(
        limit in 1u32..20,
        attempts in 1usize..200,
    ) {
        let limiter = RateLimiter::new(Clock::new());
        let cfg = mdsaad::atoms::types::RateLimitConfig {
            requests_per_window: limit,
            window_ms: 600_000, // far longer than the test runs
            burst_per_second: 0,
        };
        let admitted = (0..attempts)
            .filter(|_| limiter.admit("p", "/x", &cfg).is_ok())
            .count();
        prop_assert!(admitted <= limit as usize);
        prop_assert_eq!(admitted, attempts.min(limit as usize));
    }

    #[test]
    fn breaker_trips_exactly_at_threshold(threshold in 1u32..10) {
        let breakers = mdsaad::engine::breaker::BreakerRegistry::new(Clock::new());
        let cfg = mdsaad::atoms::types::CircuitConfig {
            fail_threshold: threshold,
            open_ms: 60_000,
            half_open_probes: 1,
        };
        for n in 0..threshold - 1 {
            breakers.record_failure("p", mdsaad::engine::breaker::FailureKind::Http(500), &cfg);
            prop_assert_eq!(breakers.snapshot("p").state, CircuitState::Closed, "after {} failures", n + 1);
        }
        breakers.record_failure("p", mdsaad::engine::breaker::FailureKind::Http(500), &cfg);
        prop_assert_eq!(breakers.snapshot("p").state, CircuitState::Open);
    }

    #[test]
    fn cache_total_bytes_never_exceed_the_cap(
        payload_sizes in proptest::collection::vec(1usize..512, 1..40),
    ) {
        let cache = mdsaad::engine::cache::CacheStore::new(Clock::new(), 4096);
        for (n, size) in payload_sizes.iter().enumerate() {
            let key = format!("k{}", n);
            let value = serde_json::json!({"pad": "x".repeat(*size)});
            cache.set("general", &[&key], value, 600_000).unwrap();
        }
        prop_assert!(cache.stats().total_bytes <= 4096);
    }

    #[test]
    fn non_temperature_conversions_round_trip_within_a_ppm(
        amount in 0.001f64..1e9,
    ) {
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let transport = MockTransport::new(vec![]);
        let core = direct_core(transport, &[]);
        for (from, to) in [("km", "mi"), ("kg", "lb"), ("l", "gal"), ("h", "s")] {
            let outcome = rt.block_on(ops::convert::run(
                &core,
                ops::convert::ConversionRequest {
                    amount,
                    from: from.into(),
                    to: to.into(),
                    historical: None,
                },
                &CancelToken::new(),
            )).unwrap();
            let back = rt.block_on(ops::convert::run(
                &core,
                ops::convert::ConversionRequest {
                    amount: outcome.result,
                    from: to.into(),
                    to: from.into(),
                    historical: None,
                },
                &CancelToken::new(),
            )).unwrap();
            let drift = ((back.result - amount) / amount).abs();
            prop_assert!(drift < 1e-6, "{} {}->{} drifted {}", amount, from, to, drift);
        }
    }
}

// ── Units parse round trip ─────────────────────────────────────────────────

#[test]
fn units_parse_round_trips() {
    assert_eq!("metric".parse::<Units>().unwrap(), Units::Metric);
    assert_eq!("IMPERIAL".parse::<Units>().unwrap(), Units::Imperial);
    assert!("kelvin".parse::<Units>().is_err());
}
