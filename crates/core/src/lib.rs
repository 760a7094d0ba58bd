//! Control and orchestration core of a stealth browser automation
//! platform: command dispatch, pooling, proxy rotation, cookie jars,
//! form filling, capture/recording, and evidence chain of custody.

pub mod config;
pub mod cookies;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod evidence;
pub mod forms;
pub mod handlers;
pub mod identity;
pub mod page_host;
pub mod pages;
pub mod pool;
pub mod protocol;
pub mod proxy;
pub mod screenshot;
pub mod server;
pub mod tls;
pub mod interaction;

pub use error::{Error, Result};

use std::sync::Arc;

use crate::config::Config;
use crate::cookies::CookieJarManager;
use crate::dispatch::CommandRegistry;
use crate::events::EventBus;
use crate::evidence::EvidenceManager;
use crate::identity::SockPuppetClient;
use crate::interaction::InteractionRecorder;
use crate::pages::{profile_for, MultiPageManager, ProcSampler, ProfileName, ResourceMonitor};
use crate::pool::WindowPool;
use crate::proxy::ProxyPool;

fn parse_profile(name: &str) -> ProfileName {
    match name {
        "stealth" => ProfileName::Stealth,
        "aggressive" => ProfileName::Aggressive,
        "single" => ProfileName::Single,
        _ => ProfileName::Balanced,
    }
}

/// Wires every component together behind a shared event bus, matching
/// the dependency order in the system overview: Page Host Adapter at
/// the leaves, Command Dispatcher at the root.
pub struct Orchestrator {
    pub config: Config,
    pub events: EventBus,
    pub pool: Arc<WindowPool>,
    pub pages: Arc<MultiPageManager>,
    pub proxies: Arc<ProxyPool>,
    pub cookies: Arc<CookieJarManager>,
    pub evidence: Arc<EvidenceManager>,
    pub identity: Arc<SockPuppetClient>,
    pub interaction: Arc<InteractionRecorder>,
    pub registry: CommandRegistry,
}

impl Orchestrator {
    pub fn new(config: Config, factory: crate::pool::HostFactory) -> Self {
        let events = EventBus::default();
        let pool = WindowPool::new(config.pool.clone(), events.clone(), factory);
        let profile = profile_for(parse_profile(&config.pages.default_profile));
        let monitor = Arc::new(ResourceMonitor::new(profile, Box::new(ProcSampler), events.clone()));
        let pages = Arc::new(MultiPageManager::new(profile, monitor, events.clone()));
        let proxies = Arc::new(ProxyPool::new(&config.proxy, events.clone()));
        let cookies = Arc::new(CookieJarManager::new(&config.cookies, events.clone()));
        let evidence = Arc::new(EvidenceManager::new(&config.vault, events.clone()));
        let identity = Arc::new(SockPuppetClient::new(&config.identity));
        let interaction = Arc::new(InteractionRecorder::new(events.clone()));
        let registry = CommandRegistry::new();

        Self { config, events, pool, pages, proxies, cookies, evidence, identity, interaction, registry }
    }

    /// Registers the real command handlers for every canonical verb.
    /// Split from `new` so tests can construct an `Orchestrator` with an
    /// empty registry and install only the handlers they need.
    pub async fn install_handlers(&self) {
        crate::handlers::install(self).await;
    }
}
