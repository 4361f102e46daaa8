//! Caller authentication for the generation API.
//!
//! The HTTP layer turns request headers into [`Credentials`] and asks the
//! configured [`Authenticator`] for an [`Identity`]. The identity's
//! `requester` scopes deduplication and credit accounting.

mod api_key;
mod identity;
mod none;

pub use api_key::ApiKeyAuthenticator;
pub use identity::{Credentials, Identity};
pub use none::NoneAuthenticator;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::{AuthConfig, AuthMethod};

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Authentication required")]
    MissingCredentials,

    #[error("API key rejected")]
    Rejected,

    #[error("Authenticator misconfigured: {0}")]
    Misconfigured(String),
}

#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, credentials: &Credentials) -> Result<Identity, AuthError>;

    /// Short label for logs, matching the config value.
    fn label(&self) -> &'static str;
}

/// Build the authenticator selected by `[auth]`.
pub fn create_authenticator(config: &AuthConfig) -> Result<Box<dyn Authenticator>, AuthError> {
    match config.method {
        AuthMethod::None => Ok(Box::new(NoneAuthenticator)),
        AuthMethod::ApiKey => match config.api_key.as_deref().map(str::trim) {
            Some(key) if !key.is_empty() => Ok(Box::new(ApiKeyAuthenticator::new(key))),
            _ => Err(AuthError::Misconfigured(
                "auth.api_key must be set when method = \"api_key\"".to_string(),
            )),
        },
    }
}
