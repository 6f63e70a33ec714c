// ── mdsaad Atoms: Constants ────────────────────────────────────────────────
// All named constants for the crate live here.
// Rationale: collecting constants in one place eliminates magic numbers,
// makes auditing easier, and keeps every layer's code self-documenting.

use std::time::Duration;

// ── Identity ───────────────────────────────────────────────────────────────

/// Sent on every outbound request.
pub const USER_AGENT: &str = concat!("mdsaad-cli/", env!("CARGO_PKG_VERSION"));

/// Directory under $HOME holding config and the cache mirror.
pub const STATE_DIR_NAME: &str = ".mdsaad";
pub const CONFIG_FILE_NAME: &str = "config.json";

// ── Dispatch timeouts ──────────────────────────────────────────────────────

/// Default per-attempt timeout for chat providers.
pub const CHAT_TIMEOUT_MS: u64 = 60_000;
/// Default per-attempt timeout for weather and exchange providers.
pub const LOOKUP_TIMEOUT_MS: u64 = 30_000;
/// How long the dispatcher will wait out a rate-limit denial before
/// skipping the candidate.
pub const DEFAULT_ADMIT_BUDGET_MS: u64 = 2_000;

// ── Circuit breaker defaults ───────────────────────────────────────────────

pub const BREAKER_FAIL_THRESHOLD: u32 = 5;
pub const BREAKER_OPEN_MS: u64 = 30_000;

// ── Cache ──────────────────────────────────────────────────────────────────

/// Total payload bytes across all namespaces before eviction kicks in.
pub const CACHE_MAX_BYTES: u64 = 32 * 1024 * 1024;
/// Background sweep cadence for TTL-expired entries.
pub const CACHE_SWEEP_INTERVAL: Duration = Duration::from_secs(300);
/// Hex chars of the SHA-256 digest kept as the entry key.
pub const CACHE_KEY_HEX_LEN: usize = 16;

// ── Cache namespaces and TTLs ──────────────────────────────────────────────

pub const NS_WEATHER: &str = "weather";
pub const NS_CURRENCY: &str = "currency";
pub const NS_AI: &str = "ai";
pub const NS_GENERAL: &str = "general";
pub const NS_CONVERSATION: &str = "conversation_history";

pub const WEATHER_CURRENT_TTL_MS: u64 = 30 * 60 * 1000;
pub const WEATHER_FORECAST_TTL_MS: u64 = 60 * 60 * 1000;
pub const CURRENCY_TTL_MS: u64 = 30 * 60 * 1000;
pub const CONVERSATION_TTL_MS: u64 = 24 * 60 * 60 * 1000;

// ── History ────────────────────────────────────────────────────────────────

/// Entries kept per session; older ones drop in FIFO order.
pub const HISTORY_CAP: usize = 50;
/// Recent entries fed back into the chat context builder.
pub const HISTORY_CONTEXT_PAIRS: usize = 5;
/// Byte cap for the truncated summary column.
pub const HISTORY_SUMMARY_BYTES: usize = 120;

// ── Proxy layer ────────────────────────────────────────────────────────────

/// Ordered proxy endpoints, primary first. Overridable via config
/// `proxyUrl` or the MDSAAD_PROXY_URL environment variable.
pub const PROXY_URLS: [&str; 2] = [
    "https://api.mdsaad.me/v1",
    "https://mdsaad-proxy.onrender.com/v1",
];

/// Client-side per-capability quotas for proxy traffic (requests, window).
pub const PROXY_CHAT_QUOTA: (u32, u64) = (50, 3_600_000);
pub const PROXY_WEATHER_QUOTA: (u32, u64) = (100, 3_600_000);
pub const PROXY_EXCHANGE_QUOTA: (u32, u64) = (60, 3_600_000);

// ── Environment variables ──────────────────────────────────────────────────

pub const ENV_USE_PROXY: &str = "MDSAAD_USE_PROXY";
pub const ENV_PROXY_URL: &str = "MDSAAD_PROXY_URL";
pub const ENV_SKIP_NETWORK_CHECK: &str = "SKIP_NETWORK_CHECK";
pub const ENV_NO_COLOR: &str = "NO_COLOR";
pub const ENV_DEBUG: &str = "DEBUG";
