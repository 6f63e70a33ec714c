// ── mdsaad Atoms: Pure Data Types ──────────────────────────────────────────
// Plain struct/enum definitions that flow through the whole fabric.
// These are independent of any specific upstream provider.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// ── Capabilities ───────────────────────────────────────────────────────────

/// What a provider can do. Providers declare their supported set and the
/// dispatcher selects candidates by capability tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Chat,
    Streaming,
    WeatherCurrent,
    WeatherForecast,
    Geocoding,
    AirQuality,
    ExchangeRate,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Chat => "chat",
            Capability::Streaming => "streaming",
            Capability::WeatherCurrent => "weather_current",
            Capability::WeatherForecast => "weather_forecast",
            Capability::Geocoding => "geocoding",
            Capability::AirQuality => "air_quality",
            Capability::ExchangeRate => "exchange_rate",
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Adapter selection ──────────────────────────────────────────────────────

/// Chooses the request/response shape for a provider. Adapters are pure
/// functions selected by this tag, never methods bound into the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterId {
    OpenAiChat,
    GoogleChat,
    WeatherApi,
    OpenWeatherMap,
    ExchangeRate,
}

// ── Provider ───────────────────────────────────────────────────────────────

/// Per-provider sliding-window rate limit. A limit of 0 means "disabled"
/// for that sub-limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub requests_per_window: u32,
    pub window_ms: u64,
    pub burst_per_second: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        RateLimitConfig {
            requests_per_window: 100,
            window_ms: 3_600_000,
            burst_per_second: 3,
        }
    }
}

/// Per-provider circuit breaker tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitConfig {
    pub fail_threshold: u32,
    pub open_ms: u64,
    pub half_open_probes: u32,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        CircuitConfig {
            fail_threshold: crate::atoms::constants::BREAKER_FAIL_THRESHOLD,
            open_ms: crate::atoms::constants::BREAKER_OPEN_MS,
            half_open_probes: 1,
        }
    }
}

/// One upstream service in the registry. Created at startup from merged
/// configuration; mutable only via explicit enable/disable and circuit reset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provider {
    /// Stable identity, e.g. "openrouter".
    pub id: String,
    pub base_url: String,
    /// Opaque bearer credential. None when the provider needs none or the
    /// user has not configured one.
    pub credential: Option<String>,
    /// Lower is tried first.
    pub priority: u32,
    pub enabled: bool,
    pub rate_limit: RateLimitConfig,
    pub circuit: CircuitConfig,
    pub supports: BTreeSet<Capability>,
    pub adapter_id: AdapterId,
    /// Short model alias to wire model id.
    #[serde(default)]
    pub model_aliases: BTreeMap<String, String>,
    /// The alias used when the caller names no model.
    #[serde(default)]
    pub default_alias: Option<String>,
    /// Whether this provider authenticates with the key in the URL instead
    /// of an Authorization header (Google convention).
    #[serde(default)]
    pub key_in_url: bool,
    /// False for keyless public APIs. A provider that requires a credential
    /// and has none is unconfigured and implicitly disabled.
    #[serde(default = "default_true")]
    pub requires_credential: bool,
    pub timeout_ms: u64,
}

pub(crate) fn default_true() -> bool {
    true
}

impl Provider {
    /// Unconfigured means the provider needs a credential and the one on
    /// file is missing or still a placeholder.
    pub fn is_configured(&self) -> bool {
        if !self.requires_credential {
            return true;
        }
        match &self.credential {
            Some(key) => !key.trim().is_empty() && !key.contains("YOUR_"),
            None => false,
        }
    }

    /// Resolve a short alias to a wire model id. Unknown names pass through
    /// unchanged so callers can use full wire ids directly.
    pub fn resolve_model<'a>(&'a self, alias: &'a str) -> &'a str {
        self.model_aliases
            .get(alias)
            .map(String::as_str)
            .unwrap_or(alias)
    }

    /// The wire model id used when the caller names no model.
    pub fn default_model(&self) -> Option<&str> {
        let alias = self.default_alias.as_deref()?;
        Some(self.resolve_model(alias))
    }
}

// ── Chat ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        ChatMessage { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        ChatMessage { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        ChatMessage { role: Role::Assistant, content: content.into() }
    }
}

/// Chat request payload handed to the dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatPayload {
    pub messages: Vec<ChatMessage>,
    /// Short alias or full wire id; None uses the provider default.
    pub model: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    pub top_p: Option<f64>,
    pub stream: bool,
}

// ── Weather ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Units {
    Metric,
    Imperial,
}

impl Units {
    pub fn as_str(&self) -> &'static str {
        match self {
            Units::Metric => "metric",
            Units::Imperial => "imperial",
        }
    }
}

impl std::str::FromStr for Units {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "metric" => Ok(Units::Metric),
            "imperial" => Ok(Units::Imperial),
            other => Err(format!("unknown unit system '{}'", other)),
        }
    }
}

/// Location input, parsed before dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LocationQuery {
    /// Decimal coordinates.
    Coords { lat: f64, lon: f64 },
    /// City name, optionally with a region ("Springfield, IL").
    Name(String),
}

impl LocationQuery {
    /// Canonical form used in cache keys and upstream query strings.
    pub fn normalized(&self) -> String {
        match self {
            LocationQuery::Coords { lat, lon } => format!("{:.4},{:.4}", lat, lon),
            LocationQuery::Name(name) => name.trim().to_lowercase(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherQuery {
    pub location: LocationQuery,
    pub units: Units,
    pub language: String,
    pub forecast_days: u8,
    pub include_air_quality: bool,
    pub include_alerts: bool,
}

/// Provider-agnostic weather shape. All numeric fields are already in the
/// unit system the user requested; conversion happens at the adapter edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherReport {
    pub location: WeatherLocation,
    pub current: CurrentConditions,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forecast: Option<Vec<ForecastDay>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alerts: Vec<WeatherAlert>,
    pub units: Units,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherLocation {
    pub name: String,
    pub region: String,
    pub country: String,
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wind {
    pub speed: f64,
    pub direction_deg: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gust: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentConditions {
    pub temperature: f64,
    pub feels_like: f64,
    pub humidity_pct: u8,
    pub pressure: f64,
    pub wind: Wind,
    pub condition: String,
    pub condition_code: i64,
    pub icon: String,
    pub visibility: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uv_index: Option<f64>,
    pub clouds_pct: u8,
    pub rain_mm: f64,
    pub snow_mm: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub air_quality: Option<AirQuality>,
    pub sunrise: String,
    pub sunset: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AirQuality {
    /// US EPA index, 1 (good) to 6 (hazardous).
    pub epa_index: u8,
    pub pm2_5: f64,
    pub pm10: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemperatureRange {
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastDay {
    pub date: String,
    pub temperature: TemperatureRange,
    pub condition: String,
    pub condition_code: i64,
    pub icon: String,
    pub pop_pct: u8,
    pub wind: Wind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherAlert {
    pub event: String,
    pub severity: String,
    pub expires: String,
}

// ── Currency exchange ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeQuery {
    /// ISO 4217 code, uppercased.
    pub base: String,
    pub target: String,
    /// "YYYY-MM-DD" for historical rates, None for latest.
    pub date: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeRates {
    pub base: String,
    pub date: String,
    pub rates: BTreeMap<String, f64>,
}

// ── Dispatch payloads & replies ────────────────────────────────────────────

/// The operation-specific payload the dispatcher routes to an adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CallPayload {
    Chat(ChatPayload),
    Weather(WeatherQuery),
    Exchange(ExchangeQuery),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// The provider-agnostic reply shape every adapter produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NormalizedReply {
    Chat {
        content: String,
        model: String,
        usage: TokenUsage,
        finish_reason: Option<String>,
        /// The reply as the sequence of chunks it arrived in. Callers may
        /// consume incrementally or buffer; adapters without true streaming
        /// produce a single element equal to `content`.
        chunks: Vec<String>,
    },
    Weather(WeatherReport),
    Exchange(ExchangeRates),
}

impl NormalizedReply {
    /// Chat text, or a compact rendering for the other payloads. Used by
    /// the history buffer's summary column.
    pub fn summary_text(&self) -> String {
        match self {
            NormalizedReply::Chat { content, .. } => content.clone(),
            NormalizedReply::Weather(report) => format!(
                "{} {:.1}{} {}",
                report.location.name,
                report.current.temperature,
                match report.units {
                    Units::Metric => "C",
                    Units::Imperial => "F",
                },
                report.current.condition
            ),
            NormalizedReply::Exchange(rates) => {
                format!("{} rates on {}", rates.base, rates.date)
            }
        }
    }

    pub fn model_id(&self) -> Option<&str> {
        match self {
            NormalizedReply::Chat { model, .. } => Some(model.as_str()),
            _ => None,
        }
    }
}

/// Whether a reply came through the proxy layer or a direct provider call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Route {
    Proxy,
    Direct,
}

/// What the dispatcher hands back to operation adapters.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub body: NormalizedReply,
    pub provider_id: String,
    pub attempt_number: u32,
    pub response_time_ms: u64,
    pub route: Route,
    pub from_cache: bool,
}

// ── History ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Chat,
    Weather,
    Convert,
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationKind::Chat => f.write_str("chat"),
            OperationKind::Weather => f.write_str("weather"),
            OperationKind::Convert => f.write_str("convert"),
        }
    }
}

/// Immutable record of one successful operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub operation_kind: OperationKind,
    pub prompt_or_query: String,
    pub reply_or_result: String,
    pub provider_id: String,
    pub model_id: Option<String>,
    pub truncated_summary: String,
}

// ── Request correlation ────────────────────────────────────────────────────

/// Ephemeral per-call record used for log correlation. Not persisted.
#[derive(Debug, Clone)]
pub struct RequestTicket {
    pub request_id: String,
    pub provider_id: String,
    pub started_at_ms: u64,
    pub attempt_number: u32,
    pub capability: Capability,
}

// ── User configuration file (~/.mdsaad/config.json) ────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserConfig {
    pub proxy_url: Option<String>,
    pub api_keys: BTreeMap<String, String>,
    pub language: Option<String>,
    pub calculate: CalculatePrefs,
    pub convert: ConvertPrefs,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CalculatePrefs {
    pub history: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConvertPrefs {
    pub favorites: Vec<String>,
}

// ── Utility ────────────────────────────────────────────────────────────────

/// UTF-8 safe truncation. Backs up to the previous char boundary when
/// `max_bytes` falls inside a multi-byte character.
pub fn truncate_utf8(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
