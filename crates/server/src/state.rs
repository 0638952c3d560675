//! Shared application state

use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use voice_bridge_config::Settings;

use crate::providers::Providers;
use crate::session::SessionManager;

/// State cloned into every handler
///
/// Settings and providers are read-only after startup.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub providers: Providers,
    pub sessions: Arc<SessionManager>,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(settings: Settings, providers: Providers) -> Self {
        let sessions = Arc::new(SessionManager::new(settings.server.max_sessions));
        Self {
            settings: Arc::new(settings),
            providers,
            sessions,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}
