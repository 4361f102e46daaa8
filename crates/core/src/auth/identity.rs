use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::net::IpAddr;

/// Credential material pulled from an inbound request.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    /// Token from `Authorization: Bearer <token>`.
    pub bearer: Option<String>,
    /// Value of `X-API-Key`.
    pub api_key: Option<String>,
    pub source_ip: Option<IpAddr>,
}

impl Credentials {
    /// Collect credentials from header name/value pairs. Names are matched
    /// case-insensitively and blank values are ignored.
    pub fn from_headers<'a, I>(headers: I, source_ip: Option<IpAddr>) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut credentials = Self {
            source_ip,
            ..Self::default()
        };

        for (name, value) in headers {
            let value = value.trim();
            if name.eq_ignore_ascii_case("authorization") {
                let token = value
                    .split_once(' ')
                    .filter(|(scheme, _)| scheme.eq_ignore_ascii_case("bearer"))
                    .map(|(_, token)| token.trim());
                if let Some(token) = token.filter(|t| !t.is_empty()) {
                    credentials.bearer = Some(token.to_string());
                }
            } else if name.eq_ignore_ascii_case("x-api-key") && !value.is_empty() {
                credentials.api_key = Some(value.to_string());
            }
        }

        credentials
    }

    /// The presented key, preferring the bearer token.
    pub fn presented_key(&self) -> Option<&str> {
        self.bearer.as_deref().or(self.api_key.as_deref())
    }
}

/// Authenticated caller. `requester` owns credits and scopes submission
/// deduplication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub requester: String,
    pub method: String,
}

impl Identity {
    pub fn anonymous() -> Self {
        Self {
            requester: "anonymous".to_string(),
            method: "none".to_string(),
        }
    }

    /// The key never appears in the requester id, only a truncated digest.
    pub fn for_api_key(key: &str) -> Self {
        let digest = Sha256::digest(key.as_bytes());
        let hex: String = digest.iter().take(8).map(|b| format!("{:02x}", b)).collect();
        Self {
            requester: format!("key_{}", hex),
            method: "api_key".to_string(),
        }
    }
}
