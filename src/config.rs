// mdsaad — Configuration
// ~/.mdsaad/config.json plus environment variables, merged over built-in
// defaults key by key. Later sources win: defaults, then the config file,
// then the environment.

use crate::atoms::constants::{
    CONFIG_FILE_NAME, ENV_PROXY_URL, ENV_USE_PROXY, PROXY_URLS, STATE_DIR_NAME,
};
use crate::atoms::error::{FabricError, FabricResult};
use crate::atoms::types::{Provider, UserConfig};
use crate::engine::core::CoreSettings;
use crate::engine::registry::builtin_providers;
use log::{debug, warn};
use std::path::PathBuf;

/// `$HOME/.mdsaad`, created on demand.
pub fn state_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(STATE_DIR_NAME))
}

pub fn config_path() -> Option<PathBuf> {
    state_dir().map(|dir| dir.join(CONFIG_FILE_NAME))
}

/// Missing file is a default config; a corrupt file is reported once and
/// then treated as default rather than blocking every command.
pub fn load_user_config() -> UserConfig {
    let Some(path) = config_path() else { return UserConfig::default() };
    match std::fs::read_to_string(&path) {
        Ok(body) => match serde_json::from_str(&body) {
            Ok(config) => config,
            Err(e) => {
                warn!("[config] {} is not valid JSON ({}), using defaults", path.display(), e);
                UserConfig::default()
            }
        },
        Err(_) => UserConfig::default(),
    }
}

pub fn save_user_config(config: &UserConfig) -> FabricResult<()> {
    let path = config_path()
        .ok_or_else(|| FabricError::Config("cannot resolve a home directory".into()))?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let body = serde_json::to_string_pretty(config)?;
    std::fs::write(&path, body)?;
    debug!("[config] saved {}", path.display());
    Ok(())
}

/// The environment variable that can carry each provider's credential.
pub fn credential_env_var(provider_id: &str) -> Option<&'static str> {
    match provider_id {
        "openrouter" => Some("OPENROUTER_API_KEY"),
        "groq" => Some("GROQ_API_KEY"),
        "deepseek" => Some("DEEPSEEK_API_KEY"),
        "gemini" => Some("GEMINI_API_KEY"),
        "weatherapi" => Some("WEATHERAPI_KEY"),
        "openweathermap" => Some("OPENWEATHERMAP_KEY"),
        _ => None,
    }
}

/// Fill provider credentials from the config file, then let the
/// environment override.
pub fn merge_credentials(
    mut providers: Vec<Provider>,
    user_config: &UserConfig,
    env: impl Fn(&str) -> Option<String>,
) -> Vec<Provider> {
    for provider in &mut providers {
        if let Some(key) = user_config.api_keys.get(&provider.id) {
            if !key.trim().is_empty() {
                provider.credential = Some(key.clone());
            }
        }
        if let Some(var) = credential_env_var(&provider.id) {
            if let Some(key) = env(var) {
                if !key.trim().is_empty() {
                    provider.credential = Some(key);
                }
            }
        }
    }
    providers
}

/// Ordered proxy endpoint list. An override replaces the primary; the
/// built-in backups stay behind it.
pub fn proxy_urls(user_config: &UserConfig, env: impl Fn(&str) -> Option<String>) -> Vec<String> {
    let mut urls: Vec<String> = PROXY_URLS.iter().map(|s| s.to_string()).collect();
    if let Some(primary) = user_config.proxy_url.clone().filter(|u| !u.trim().is_empty()) {
        urls[0] = primary;
    }
    if let Some(primary) = env(ENV_PROXY_URL).filter(|u| !u.trim().is_empty()) {
        urls[0] = primary;
    }
    urls
}

pub fn proxy_enabled(env: impl Fn(&str) -> Option<String>) -> bool {
    env(ENV_USE_PROXY).map(|v| v.trim() != "false").unwrap_or(true)
}

/// Assemble everything `Core::new` needs from the real process environment.
pub fn settings_from_environment() -> CoreSettings {
    let user_config = load_user_config();
    let env = |name: &str| std::env::var(name).ok();

    CoreSettings {
        providers: merge_credentials(builtin_providers(), &user_config, env),
        proxy_urls: proxy_urls(&user_config, env),
        proxy_enabled: proxy_enabled(env),
        cache_dir: state_dir().map(|dir| dir.join("cache")),
        user_config,
    }
}

/// Remember a successful currency pair, most recent first, deduped, ten at
/// most. Returns true when the list changed.
pub fn record_favorite(config: &mut UserConfig, base: &str, target: &str) -> bool {
    let pair = format!("{}/{}", base.to_uppercase(), target.to_uppercase());
    if config.convert.favorites.first() == Some(&pair) {
        return false;
    }
    config.convert.favorites.retain(|f| f != &pair);
    config.convert.favorites.insert(0, pair);
    config.convert.favorites.truncate(10);
    true
}
