use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusHandle;

use airchat_server::config::GatewayConfig;
use airchat_server::irc::profile::ProfileStore;
use airchat_server::irc::registry::SessionRegistry;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    /// Live sessions and their network connections.
    pub registry: SessionRegistry,
    /// Backs both the profile endpoints and roster enrichment.
    pub profiles: Arc<ProfileStore>,
    pub prometheus: Option<PrometheusHandle>,
}

impl AppState {
    /// State with profiles persisted under `config.data_dir`.
    pub fn new(config: GatewayConfig) -> Self {
        let profiles = Arc::new(ProfileStore::load_or_create(&config.data_dir));
        Self::with_profiles(config, profiles)
    }

    pub fn with_profiles(config: GatewayConfig, profiles: Arc<ProfileStore>) -> Self {
        let registry = SessionRegistry::new(&config, profiles.clone());
        Self {
            config: Arc::new(config),
            registry,
            profiles,
            prometheus: None,
        }
    }

    pub fn with_prometheus(mut self, handle: PrometheusHandle) -> Self {
        self.prometheus = Some(handle);
        self
    }
}
