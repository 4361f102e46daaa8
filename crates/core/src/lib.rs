pub mod auth;
pub mod backup;
pub mod config;
pub mod credits;
pub mod dedup;
pub mod maintenance;
pub mod metrics;
pub mod orphan;
pub mod projector;
pub mod provider;
pub mod reconciler;
pub mod service;
pub mod styles;
pub mod submission;
pub mod task;
pub mod testing;

pub use auth::{
    create_authenticator, ApiKeyAuthenticator, AuthError, Authenticator, Credentials, Identity,
    NoneAuthenticator,
};
pub use config::{
    load_config, load_config_from_str, validate_config, AuthMethod, Config, ConfigError,
    SanitizedConfig,
};
pub use credits::{ledger_from_config, CreditError, CreditLedger};
pub use orphan::{OrphanResult, OrphanStore};
pub use projector::{Projection, ResponseShape, StatusView};
pub use provider::{ImageProvider, ProviderError};
pub use reconciler::{ReconcileOutcome, WebhookParseError};
pub use service::{GenerationService, ProviderChoice, ServiceError, ServiceStats};
pub use styles::{Style, StyleDefinition};
pub use submission::{SubmitError, SubmitOutcome, SubmitRequest};
pub use task::{Task, TaskStatus};
