use super::{types::Config, AuthMethod, ConfigError};

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(ConfigError::ValidationError(
            "server.port cannot be 0".to_string(),
        ));
    }

    if config.auth.method == AuthMethod::ApiKey
        && config.auth.api_key.as_deref().unwrap_or("").is_empty()
    {
        return Err(ConfigError::ValidationError(
            "auth.api_key is required when auth.method = \"api_key\"".to_string(),
        ));
    }

    if let Some(url) = &config.server.public_url {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::ValidationError(format!(
                "server.public_url must be an http(s) origin, got '{}'",
                url
            )));
        }
    }

    if !config.provider.webhook_path.starts_with('/') {
        return Err(ConfigError::ValidationError(
            "provider.webhook_path must start with '/'".to_string(),
        ));
    }

    if config.provider.timeout_secs == 0 {
        return Err(ConfigError::ValidationError(
            "provider.timeout_secs cannot be 0".to_string(),
        ));
    }

    if config.orchestrator.reconcile_attempts == 0 {
        return Err(ConfigError::ValidationError(
            "orchestrator.reconcile_attempts must be at least 1".to_string(),
        ));
    }

    if config.orchestrator.max_source_references == 0 {
        return Err(ConfigError::ValidationError(
            "orchestrator.max_source_references must be at least 1".to_string(),
        ));
    }

    if config.orchestrator.dedup_sweep_interval_secs == 0
        || config.persistence.sweep_interval_secs == 0
    {
        return Err(ConfigError::ValidationError(
            "sweep intervals cannot be 0".to_string(),
        ));
    }

    Ok(())
}
