// mdsaad Engine — HTTP Transport
// The seam between the dispatcher and the network. Everything above this
// trait is deterministic and unit-testable; the reqwest implementation is
// the only code that actually opens sockets.

use async_trait::async_trait;
use futures::StreamExt;
use log::debug;
use reqwest::Client;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

// ── Cancellation ───────────────────────────────────────────────────────────

#[derive(Default)]
struct CancelInner {
    flag: AtomicBool,
    notify: Notify,
}

/// Caller-initiated cancellation signal. Cloned into every suspension point
/// of a call; cancelling aborts in-flight I/O without recording a provider
/// failure.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<CancelInner>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.flag.store(true, Ordering::SeqCst);
        self.0.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.flag.load(Ordering::SeqCst)
    }

    /// Resolves once `cancel` has been called.
    pub async fn cancelled(&self) {
        loop {
            if self.is_cancelled() {
                return;
            }
            let notified = self.0.notify.notified();
            tokio::pin!(notified);
            if self.is_cancelled() {
                return;
            }
            notified.as_mut().await;
        }
    }
}

// ── Request / response shapes ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl HttpResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Retry-After in milliseconds. Integer-seconds form only; the
    /// HTTP-date form falls back to None and the caller's own backoff.
    pub fn retry_after_ms(&self) -> Option<u64> {
        self.header("retry-after")?
            .trim()
            .parse::<u64>()
            .ok()
            .map(|secs| secs * 1000)
    }

    pub fn json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::from_str(&self.body)
    }
}

// ── Transport errors ───────────────────────────────────────────────────────

/// Failures below the HTTP status line. Status-coded responses are returned
/// as `HttpResponse`, never as errors; classification happens upstream.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("network unavailable: {0}")]
    Network(String),
    #[error("TLS failure: {0}")]
    Tls(String),
    #[error("request timed out")]
    Timeout,
    #[error("request cancelled")]
    Cancelled,
}

// ── Trait ──────────────────────────────────────────────────────────────────

#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn execute(
        &self,
        request: HttpRequest,
        cancel: &CancelToken,
    ) -> Result<HttpResponse, TransportError>;
}

// ── reqwest implementation ─────────────────────────────────────────────────

/// One shared client for the whole process: one connection pool, one TLS
/// config (rustls via the crate feature set).
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        ReqwestTransport { client }
    }

    fn classify(e: &reqwest::Error) -> TransportError {
        if e.is_timeout() {
            return TransportError::Timeout;
        }
        let text = e.to_string();
        if text.contains("certificate") || text.contains("tls") || text.contains("TLS") {
            return TransportError::Tls(text);
        }
        TransportError::Network(text)
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(
        &self,
        request: HttpRequest,
        cancel: &CancelToken,
    ) -> Result<HttpResponse, TransportError> {
        if cancel.is_cancelled() {
            return Err(TransportError::Cancelled);
        }

        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        builder = builder.timeout(Duration::from_millis(request.timeout_ms));

        debug!("[transport] {:?} {}", request.method, request.url);

        let response = tokio::select! {
            result = builder.send() => result.map_err(|e| Self::classify(&e))?,
            _ = cancel.cancelled() => return Err(TransportError::Cancelled),
        };

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), String::from_utf8_lossy(v.as_bytes()).to_string()))
            .collect();

        // Read the body chunk-wise so cancellation can abort a long SSE
        // stream mid-flight instead of waiting for the final byte.
        let mut byte_stream = response.bytes_stream();
        let mut body = String::new();
        loop {
            let chunk = tokio::select! {
                chunk = byte_stream.next() => chunk,
                _ = cancel.cancelled() => return Err(TransportError::Cancelled),
            };
            match chunk {
                Some(Ok(bytes)) => body.push_str(&String::from_utf8_lossy(&bytes)),
                Some(Err(e)) => return Err(Self::classify(&e)),
                None => break,
            }
        }

        Ok(HttpResponse { status, headers, body })
    }
}
