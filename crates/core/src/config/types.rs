use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;

/// Root configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub auth: AuthConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub credits: CreditsConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Public origin (e.g. "https://gen.example.com") used to build provider
    /// callback addresses. When unset, the origin of the inbound request is used.
    #[serde(default)]
    pub public_url: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            public_url: None,
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_port() -> u16 {
    8080
}

/// Authentication configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    pub method: AuthMethod,
    /// API key (required when method = "api_key")
    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    None,
    ApiKey,
}

/// External image provider configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderConfig {
    /// Provider API base URL.
    #[serde(default = "default_provider_url")]
    pub base_url: String,
    /// Provider API key. Without one, only the simulator can be used.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Request timeout in seconds for the submit call.
    #[serde(default = "default_provider_timeout")]
    pub timeout_secs: u64,
    /// Use the in-process simulator when no API key is configured.
    #[serde(default)]
    pub allow_simulator: bool,
    /// Delay before the simulator delivers its webhook (milliseconds).
    #[serde(default = "default_simulator_delay")]
    pub simulator_delay_ms: u64,
    /// Path of the webhook endpoint, appended to the public origin.
    #[serde(default = "default_webhook_path")]
    pub webhook_path: String,
}

impl ProviderConfig {
    /// An API key counts as configured only if it is non-blank.
    pub fn has_api_key(&self) -> bool {
        self.api_key
            .as_deref()
            .map(|key| !key.trim().is_empty())
            .unwrap_or(false)
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_provider_url(),
            api_key: None,
            timeout_secs: default_provider_timeout(),
            allow_simulator: false,
            simulator_delay_ms: default_simulator_delay(),
            webhook_path: default_webhook_path(),
        }
    }
}

fn default_provider_url() -> String {
    "https://api.kie.ai".to_string()
}

fn default_provider_timeout() -> u64 {
    30
}

fn default_simulator_delay() -> u64 {
    2000
}

fn default_webhook_path() -> String {
    "/api/v1/webhooks/provider".to_string()
}

/// Submission and reconciliation tuning.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OrchestratorConfig {
    /// How long an identical submission maps back to the same task.
    #[serde(default = "default_dedup_ttl")]
    pub dedup_ttl_secs: u64,
    /// How often expired dedup entries are swept.
    #[serde(default = "default_dedup_sweep_interval")]
    pub dedup_sweep_interval_secs: u64,
    /// Lookups attempted before a webhook is treated as unmatched.
    #[serde(default = "default_reconcile_attempts")]
    pub reconcile_attempts: u32,
    /// Wait between lookups (milliseconds).
    #[serde(default = "default_reconcile_interval")]
    pub reconcile_interval_ms: u64,
    /// Expected provider turnaround, used for the progress estimate.
    #[serde(default = "default_estimated_duration")]
    pub estimated_duration_secs: u64,
    /// Maximum number of source references per submission.
    #[serde(default = "default_max_source_references")]
    pub max_source_references: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            dedup_ttl_secs: default_dedup_ttl(),
            dedup_sweep_interval_secs: default_dedup_sweep_interval(),
            reconcile_attempts: default_reconcile_attempts(),
            reconcile_interval_ms: default_reconcile_interval(),
            estimated_duration_secs: default_estimated_duration(),
            max_source_references: default_max_source_references(),
        }
    }
}

fn default_dedup_ttl() -> u64 {
    3600 // 1 hour
}

fn default_dedup_sweep_interval() -> u64 {
    3600
}

fn default_reconcile_attempts() -> u32 {
    10
}

fn default_reconcile_interval() -> u64 {
    500
}

fn default_estimated_duration() -> u64 {
    60
}

fn default_max_source_references() -> usize {
    1
}

/// Durable state: task snapshot and orphaned webhook results.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PersistenceConfig {
    #[serde(default = "default_backup_path")]
    pub backup_path: PathBuf,
    #[serde(default = "default_orphan_path")]
    pub orphan_path: PathBuf,
    /// Tasks older than this are dropped from the snapshot and the registry.
    #[serde(default = "default_retention")]
    pub retention_secs: u64,
    /// Orphaned results older than this are purged.
    #[serde(default = "default_retention")]
    pub orphan_ttl_secs: u64,
    /// How often retention and orphan sweeps run.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            backup_path: default_backup_path(),
            orphan_path: default_orphan_path(),
            retention_secs: default_retention(),
            orphan_ttl_secs: default_retention(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

fn default_backup_path() -> PathBuf {
    PathBuf::from(".tasks-backup.json")
}

fn default_orphan_path() -> PathBuf {
    PathBuf::from(".orphan-results.json")
}

fn default_retention() -> u64 {
    86400 // 24 hours
}

fn default_sweep_interval() -> u64 {
    600
}

/// Credit accounting for submissions.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CreditsConfig {
    /// Credits charged per accepted submission.
    #[serde(default = "default_cost_per_image")]
    pub cost_per_image: u64,
    /// Starting balance per requester. Absent means unmetered.
    #[serde(default)]
    pub initial_balance: Option<u64>,
}

impl Default for CreditsConfig {
    fn default() -> Self {
        Self {
            cost_per_image: default_cost_per_image(),
            initial_balance: None,
        }
    }
}

fn default_cost_per_image() -> u64 {
    1
}

/// Sanitized config for API responses (secrets redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub auth: SanitizedAuthConfig,
    pub server: ServerConfig,
    pub provider: SanitizedProviderConfig,
    pub orchestrator: OrchestratorConfig,
    pub persistence: PersistenceConfig,
    pub credits: CreditsConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct SanitizedAuthConfig {
    pub method: String,
    pub api_key_configured: bool,
}

/// Provider config with the API key hidden
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedProviderConfig {
    pub base_url: String,
    pub api_key_configured: bool,
    pub timeout_secs: u64,
    pub allow_simulator: bool,
    pub simulator_delay_ms: u64,
    pub webhook_path: String,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            auth: SanitizedAuthConfig {
                method: match config.auth.method {
                    AuthMethod::None => "none".to_string(),
                    AuthMethod::ApiKey => "api_key".to_string(),
                },
                api_key_configured: config.auth.api_key.is_some(),
            },
            server: config.server.clone(),
            provider: SanitizedProviderConfig {
                base_url: config.provider.base_url.clone(),
                api_key_configured: config.provider.has_api_key(),
                timeout_secs: config.provider.timeout_secs,
                allow_simulator: config.provider.allow_simulator,
                simulator_delay_ms: config.provider.simulator_delay_ms,
                webhook_path: config.provider.webhook_path.clone(),
            },
            orchestrator: config.orchestrator.clone(),
            persistence: config.persistence.clone(),
            credits: config.credits.clone(),
        }
    }
}
