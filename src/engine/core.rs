// mdsaad Engine — Core
// One Core owns one of each fabric component and hands references down.
// There are no global singletons: tests construct a fresh Core per case
// with whatever transport and settings they need.

use crate::atoms::constants::CACHE_MAX_BYTES;
use crate::atoms::types::{Provider, UserConfig};
use crate::engine::breaker::{BreakerRegistry, CircuitSnapshot};
use crate::engine::cache::CacheStore;
use crate::engine::clock::Clock;
use crate::engine::dispatcher::Dispatcher;
use crate::engine::history::HistoryBuffer;
use crate::engine::proxy::ProxyLayer;
use crate::engine::rate_limit::RateLimiter;
use crate::engine::registry::ProviderRegistry;
use crate::engine::sanitize::RequestSigner;
use crate::engine::transport::HttpTransport;
use std::path::PathBuf;
use std::sync::Arc;

/// Everything `Core::new` needs, pre-merged by the config layer.
pub struct CoreSettings {
    pub providers: Vec<Provider>,
    pub proxy_urls: Vec<String>,
    pub proxy_enabled: bool,
    /// None keeps the cache memory-only (tests).
    pub cache_dir: Option<PathBuf>,
    pub user_config: UserConfig,
}

pub struct Core {
    pub clock: Clock,
    pub cache: Arc<CacheStore>,
    pub registry: Arc<ProviderRegistry>,
    pub rate_limiter: Arc<RateLimiter>,
    pub breakers: Arc<BreakerRegistry>,
    pub dispatcher: Dispatcher,
    pub proxy: ProxyLayer,
    pub history: HistoryBuffer,
    pub user_config: UserConfig,
}

impl Core {
    pub fn new(settings: CoreSettings, transport: Arc<dyn HttpTransport>) -> Self {
        let clock = Clock::new();

        let cache = {
            let store = CacheStore::new(clock.clone(), CACHE_MAX_BYTES);
            let store = match settings.cache_dir {
                Some(dir) => store.with_disk(dir),
                None => store,
            };
            Arc::new(store)
        };

        let registry = Arc::new(ProviderRegistry::new(settings.providers));
        let rate_limiter = Arc::new(RateLimiter::new(clock.clone()));
        let breakers = Arc::new(BreakerRegistry::new(clock.clone()));
        let signer = Arc::new(RequestSigner::disabled());

        let dispatcher = Dispatcher::new(
            clock.clone(),
            Arc::clone(&registry),
            Arc::clone(&rate_limiter),
            Arc::clone(&breakers),
            signer,
            Arc::clone(&transport),
        );

        let proxy = ProxyLayer::new(
            clock.clone(),
            settings.proxy_urls,
            settings.proxy_enabled,
            transport,
        );

        let history = HistoryBuffer::default().with_mirror(Arc::clone(&cache));

        Core {
            clock,
            cache,
            registry,
            rate_limiter,
            breakers,
            dispatcher,
            proxy,
            history,
            user_config: settings.user_config,
        }
    }

    /// Start the background cache sweeper. Callers hold the handle for the
    /// life of the process; the task never finishes on its own.
    pub fn start_background_tasks(&self) -> tokio::task::JoinHandle<()> {
        self.cache.spawn_sweeper()
    }

    pub fn reset_circuit(&self, provider_id: &str) {
        self.breakers.reset(provider_id);
    }

    /// Registry rows joined with breaker state, for the `providers` meta-op.
    pub fn provider_overview(&self) -> Vec<(Provider, CircuitSnapshot)> {
        self.registry
            .list_all()
            .into_iter()
            .map(|p| {
                let snapshot = self.breakers.snapshot(&p.id);
                (p, snapshot)
            })
            .collect()
    }
}
