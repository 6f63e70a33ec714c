// mdsaad Engine — Provider Registry
// Typed catalog of upstream providers. Built once at startup from merged
// configuration (built-ins, then config file, then environment, later wins)
// and read-mostly afterwards: enable/disable are the only writes.

use crate::atoms::constants::{CHAT_TIMEOUT_MS, LOOKUP_TIMEOUT_MS};
use crate::atoms::error::{FabricError, FabricResult};
use crate::atoms::types::{
    AdapterId, Capability, CircuitConfig, Provider, RateLimitConfig,
};
use log::info;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};

// ── Built-in catalog ───────────────────────────────────────────────────────

fn aliases(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs.iter().map(|(a, m)| (a.to_string(), m.to_string())).collect()
}

fn caps(list: &[Capability]) -> BTreeSet<Capability> {
    list.iter().copied().collect()
}

/// The providers the CLI knows out of the box. Credentials are filled in
/// later from the config file and environment.
pub fn builtin_providers() -> Vec<Provider> {
    let chat_rate = RateLimitConfig { requests_per_window: 60, window_ms: 3_600_000, burst_per_second: 3 };
    let lookup_rate = RateLimitConfig { requests_per_window: 100, window_ms: 3_600_000, burst_per_second: 5 };

    vec![
        Provider {
            id: "openrouter".into(),
            base_url: "https://openrouter.ai/api/v1".into(),
            credential: None,
            priority: 1,
            enabled: true,
            rate_limit: chat_rate,
            circuit: CircuitConfig::default(),
            supports: caps(&[Capability::Chat, Capability::Streaming]),
            adapter_id: AdapterId::OpenAiChat,
            model_aliases: aliases(&[
                ("llama", "meta-llama/llama-3.3-70b-instruct"),
                ("mistral", "mistralai/mistral-small-3.1-24b-instruct"),
                ("qwen", "qwen/qwen-2.5-72b-instruct"),
            ]),
            default_alias: Some("llama".into()),
            key_in_url: false,
            requires_credential: true,
            timeout_ms: CHAT_TIMEOUT_MS,
        },
        Provider {
            id: "groq".into(),
            base_url: "https://api.groq.com/openai/v1".into(),
            credential: None,
            priority: 2,
            enabled: true,
            rate_limit: chat_rate,
            circuit: CircuitConfig::default(),
            supports: caps(&[Capability::Chat, Capability::Streaming]),
            adapter_id: AdapterId::OpenAiChat,
            model_aliases: aliases(&[
                ("llama", "llama-3.3-70b-versatile"),
                ("gemma", "gemma2-9b-it"),
            ]),
            default_alias: Some("llama".into()),
            key_in_url: false,
            requires_credential: true,
            timeout_ms: CHAT_TIMEOUT_MS,
        },
        Provider {
            id: "deepseek".into(),
            base_url: "https://api.deepseek.com/v1".into(),
            credential: None,
            priority: 3,
            enabled: true,
            rate_limit: chat_rate,
            circuit: CircuitConfig::default(),
            supports: caps(&[Capability::Chat, Capability::Streaming]),
            adapter_id: AdapterId::OpenAiChat,
            model_aliases: aliases(&[
                ("deepseek", "deepseek-chat"),
                ("coder", "deepseek-coder"),
            ]),
            default_alias: Some("deepseek".into()),
            key_in_url: false,
            requires_credential: true,
            timeout_ms: CHAT_TIMEOUT_MS,
        },
        Provider {
            id: "gemini".into(),
            base_url: "https://generativelanguage.googleapis.com/v1beta".into(),
            credential: None,
            priority: 4,
            enabled: true,
            rate_limit: chat_rate,
            circuit: CircuitConfig::default(),
            supports: caps(&[Capability::Chat]),
            adapter_id: AdapterId::GoogleChat,
            model_aliases: aliases(&[
                ("gemini", "gemini-2.0-flash"),
                ("gemini-pro", "gemini-2.5-pro"),
            ]),
            default_alias: Some("gemini".into()),
            key_in_url: true,
            requires_credential: true,
            timeout_ms: CHAT_TIMEOUT_MS,
        },
        Provider {
            id: "weatherapi".into(),
            base_url: "https://api.weatherapi.com/v1".into(),
            credential: None,
            priority: 1,
            enabled: true,
            rate_limit: lookup_rate,
            circuit: CircuitConfig::default(),
            supports: caps(&[
                Capability::WeatherCurrent,
                Capability::WeatherForecast,
                Capability::Geocoding,
                Capability::AirQuality,
            ]),
            adapter_id: AdapterId::WeatherApi,
            model_aliases: BTreeMap::new(),
            default_alias: None,
            key_in_url: true,
            requires_credential: true,
            timeout_ms: LOOKUP_TIMEOUT_MS,
        },
        Provider {
            id: "openweathermap".into(),
            base_url: "https://api.openweathermap.org/data/2.5".into(),
            credential: None,
            priority: 2,
            enabled: true,
            rate_limit: lookup_rate,
            circuit: CircuitConfig::default(),
            supports: caps(&[Capability::WeatherCurrent, Capability::WeatherForecast]),
            adapter_id: AdapterId::OpenWeatherMap,
            model_aliases: BTreeMap::new(),
            default_alias: None,
            key_in_url: true,
            requires_credential: true,
            timeout_ms: LOOKUP_TIMEOUT_MS,
        },
        Provider {
            id: "exchangerate".into(),
            base_url: "https://open.er-api.com/v6".into(),
            credential: None,
            priority: 1,
            enabled: true,
            rate_limit: lookup_rate,
            circuit: CircuitConfig::default(),
            supports: caps(&[Capability::ExchangeRate]),
            adapter_id: AdapterId::ExchangeRate,
            model_aliases: BTreeMap::new(),
            default_alias: None,
            key_in_url: false,
            requires_credential: false,
            timeout_ms: LOOKUP_TIMEOUT_MS,
        },
    ]
}

// ── Registry ───────────────────────────────────────────────────────────────

pub struct ProviderRegistry {
    providers: RwLock<BTreeMap<String, Provider>>,
}

impl ProviderRegistry {
    pub fn new(providers: Vec<Provider>) -> Self {
        let map = providers.into_iter().map(|p| (p.id.clone(), p)).collect();
        ProviderRegistry { providers: RwLock::new(map) }
    }

    pub fn get(&self, id: &str) -> Option<Provider> {
        self.providers.read().get(id).cloned()
    }

    /// All providers supporting `capability`, priority ascending with the
    /// id as tie-break so ordering is stable across invocations. Disabled
    /// and unconfigured providers are included; the dispatcher filters.
    pub fn list_by_capability(&self, capability: Capability) -> Vec<Provider> {
        let mut out: Vec<Provider> = self
            .providers
            .read()
            .values()
            .filter(|p| p.supports.contains(&capability))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)));
        out
    }

    /// Every provider, sorted by id. For the `providers` meta-op.
    pub fn list_all(&self) -> Vec<Provider> {
        self.providers.read().values().cloned().collect()
    }

    pub fn set_enabled(&self, id: &str, enabled: bool) -> FabricResult<()> {
        let mut map = self.providers.write();
        let provider = map
            .get_mut(id)
            .ok_or_else(|| FabricError::Config(format!("unknown provider '{}'", id)))?;
        provider.enabled = enabled;
        info!("[registry] {} {}", id, if enabled { "enabled" } else { "disabled" });
        Ok(())
    }

    /// Find the chat provider serving `model`, either as a short alias or a
    /// full wire id. Lowest priority wins when several match.
    pub fn provider_for_model(&self, model: &str) -> Option<(String, String)> {
        let mut chat = self.list_by_capability(Capability::Chat);
        chat.retain(|p| p.enabled && p.is_configured());
        for provider in &chat {
            if let Some(wire) = provider.model_aliases.get(model) {
                return Some((provider.id.clone(), wire.clone()));
            }
        }
        for provider in &chat {
            if provider.model_aliases.values().any(|wire| wire == model) {
                return Some((provider.id.clone(), model.to_string()));
            }
        }
        None
    }
}
