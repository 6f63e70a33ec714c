// mdsaad Engine — Request Signing, Header Policy & Response Sanitization
//
// Three mechanical defenses applied around every outbound call:
//   • URL policy: https only for direct calls (wss reserved for streaming
//     sockets); anything else is rejected before a socket opens.
//   • Header policy: spoofable origin headers are stripped, a fixed set of
//     client headers is injected, credentials ride the Authorization header
//     unless the provider wants the key in the URL.
//   • Response scrub: prototype-ish keys and script-ish substrings are
//     removed from parsed JSON before adapters see it. Defense in depth,
//     not a security guarantee.
//
// Optional HMAC-SHA256 request signing is a no-op until a per-install
// secret is provisioned; a hard-coded constant would prove nothing.

use crate::atoms::constants::USER_AGENT;
use crate::atoms::error::{FabricError, FabricResult};
use crate::atoms::types::Provider;
use hmac::{Hmac, Mac};
use log::debug;
use regex::Regex;
use sha2::Sha256;
use std::sync::LazyLock;

type HmacSha256 = Hmac<Sha256>;

// ── URL policy ─────────────────────────────────────────────────────────────

/// Admit only TLS-protected schemes. `wss` is reserved for streaming
/// WebSocket upgrades; no current operation uses it.
pub fn validate_url(raw: &str) -> FabricResult<url::Url> {
    let parsed = url::Url::parse(raw).map_err(|e| FabricError::Url(format!("{}: {}", raw, e)))?;
    match parsed.scheme() {
        "https" | "wss" => Ok(parsed),
        scheme => Err(FabricError::Url(format!(
            "scheme '{}' not allowed, only https/wss",
            scheme
        ))),
    }
}

// ── Header policy ──────────────────────────────────────────────────────────

const STRIPPED_HEADERS: [&str; 4] =
    ["x-forwarded-for", "x-real-ip", "x-originating-ip", "cf-connecting-ip"];

/// Drop spoofable caller-supplied headers, then inject the fixed client set
/// and the provider credential.
pub fn build_headers(provider: &Provider, caller: &[(String, String)]) -> Vec<(String, String)> {
    let mut headers: Vec<(String, String)> = caller
        .iter()
        .filter(|(name, _)| !STRIPPED_HEADERS.contains(&name.to_ascii_lowercase().as_str()))
        .cloned()
        .collect();

    headers.push(("User-Agent".into(), USER_AGENT.into()));
    headers.push(("Accept".into(), "application/json".into()));
    headers.push(("Accept-Encoding".into(), "gzip, deflate".into()));
    headers.push(("Connection".into(), "keep-alive".into()));
    headers.push(("DNT".into(), "1".into()));

    if !provider.key_in_url {
        if let Some(key) = provider.credential.as_deref() {
            if !key.is_empty() {
                headers.push(("Authorization".into(), format!("Bearer {}", key)));
            }
        }
    }

    headers
}

// ── Response sanitization ──────────────────────────────────────────────────

static SCRIPT_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<script\b[^>]*>.*?</script>").expect("static regex"));
static JS_SCHEME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)javascript:").expect("static regex"));
static EVENT_HANDLER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bon\w+\s*=").expect("static regex"));

fn scrub_string(s: &str) -> String {
    let s = SCRIPT_TAG.replace_all(s, "");
    let s = JS_SCHEME.replace_all(&s, "");
    EVENT_HANDLER.replace_all(&s, "").into_owned()
}

fn suspicious_key(key: &str) -> bool {
    key.starts_with("__") || key.contains("prototype")
}

/// Recursively remove prototype-pollution-shaped keys and strip scripty
/// substrings from every string field.
pub fn sanitize_json(value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut clean = serde_json::Map::new();
            for (key, inner) in map {
                if suspicious_key(&key) {
                    debug!("[sanitize] dropped key '{}'", key);
                    continue;
                }
                clean.insert(key, sanitize_json(inner));
            }
            serde_json::Value::Object(clean)
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.into_iter().map(sanitize_json).collect())
        }
        serde_json::Value::String(s) => serde_json::Value::String(scrub_string(&s)),
        other => other,
    }
}

// ── Request signing ────────────────────────────────────────────────────────

/// HMAC-SHA256 request signatures. Inactive (all methods return None/true)
/// until a per-install secret is provisioned.
pub struct RequestSigner {
    secret: Option<Vec<u8>>,
}

impl RequestSigner {
    pub fn disabled() -> Self {
        RequestSigner { secret: None }
    }

    pub fn with_secret(secret: impl Into<Vec<u8>>) -> Self {
        RequestSigner { secret: Some(secret.into()) }
    }

    pub fn is_enabled(&self) -> bool {
        self.secret.is_some()
    }

    /// `X-Request-Signature` value: `<timestamp_ms>.<hex hmac>` over
    /// `canonical_json(body) || "." || timestamp_ms`. serde_json orders
    /// object keys, so serialization is canonical as-is.
    pub fn sign(&self, body: &serde_json::Value, timestamp_ms: i64) -> Option<String> {
        let secret = self.secret.as_deref()?;
        let canonical = serde_json::to_string(body).ok()?;
        let mut mac = HmacSha256::new_from_slice(secret).ok()?;
        mac.update(canonical.as_bytes());
        mac.update(b".");
        mac.update(timestamp_ms.to_string().as_bytes());
        let digest = mac.finalize().into_bytes();
        let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
        Some(format!("{}.{}", timestamp_ms, hex))
    }

    /// Symmetric verification of a response signature. Vacuously true when
    /// signing is disabled.
    pub fn verify(&self, body: &serde_json::Value, signature: &str) -> bool {
        if self.secret.is_none() {
            return true;
        }
        let Some((ts, _)) = signature.split_once('.') else { return false };
        let Ok(timestamp_ms) = ts.parse::<i64>() else { return false };
        match self.sign(body, timestamp_ms) {
            Some(expected) => expected == signature,
            None => false,
        }
    }
}
