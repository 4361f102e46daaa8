use async_trait::async_trait;

use super::{AuthError, Authenticator, Credentials, Identity};

/// Every caller is the shared anonymous requester.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoneAuthenticator;

#[async_trait]
impl Authenticator for NoneAuthenticator {
    async fn authenticate(&self, _credentials: &Credentials) -> Result<Identity, AuthError> {
        Ok(Identity::anonymous())
    }

    fn label(&self) -> &'static str {
        "none"
    }
}
