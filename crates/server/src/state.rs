use chrono::{DateTime, Utc};
use std::sync::Arc;
use genqueue_core::{Authenticator, Config, GenerationService, SanitizedConfig};

/// Shared application state
pub struct AppState {
    config: Config,
    authenticator: Arc<dyn Authenticator>,
    service: Arc<GenerationService>,
    started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        config: Config,
        authenticator: Arc<dyn Authenticator>,
        service: Arc<GenerationService>,
    ) -> Self {
        Self {
            config,
            authenticator,
            service,
            started_at: Utc::now(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    pub fn authenticator(&self) -> &dyn Authenticator {
        self.authenticator.as_ref()
    }

    pub fn service(&self) -> &GenerationService {
        &self.service
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }
}
