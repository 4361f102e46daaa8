use async_trait::async_trait;
use sha2::{Digest, Sha256};

use super::{AuthError, Authenticator, Credentials, Identity};

/// Accepts callers presenting the single configured key, either as a bearer
/// token or in `X-API-Key`.
pub struct ApiKeyAuthenticator {
    key_digest: [u8; 32],
}

impl ApiKeyAuthenticator {
    pub fn new(api_key: impl AsRef<str>) -> Self {
        Self {
            key_digest: Sha256::digest(api_key.as_ref().as_bytes()).into(),
        }
    }

    /// Compares fixed-length digests so timing does not depend on where the
    /// presented key first differs.
    fn matches(&self, presented: &str) -> bool {
        let presented: [u8; 32] = Sha256::digest(presented.as_bytes()).into();
        presented
            .iter()
            .zip(self.key_digest.iter())
            .fold(0u8, |diff, (a, b)| diff | (a ^ b))
            == 0
    }
}

#[async_trait]
impl Authenticator for ApiKeyAuthenticator {
    async fn authenticate(&self, credentials: &Credentials) -> Result<Identity, AuthError> {
        let presented = credentials
            .presented_key()
            .ok_or(AuthError::MissingCredentials)?;

        if self.matches(presented) {
            Ok(Identity::for_api_key(presented))
        } else {
            tracing::debug!(source_ip = ?credentials.source_ip, "Rejected API key");
            Err(AuthError::Rejected)
        }
    }

    fn label(&self) -> &'static str {
        "api_key"
    }
}
