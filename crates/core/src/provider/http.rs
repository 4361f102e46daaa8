//! HTTP client for the hosted image generation API.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use super::{ImageProvider, ProviderError, ProviderRequest, ProviderSubmission};
use crate::config::ProviderConfig;
use crate::metrics;

/// Provider reached over HTTP with a bearer API key.
pub struct HttpImageProvider {
    client: reqwest::Client,
    api_key: String,
    api_base: String,
    timeout: Duration,
}

impl HttpImageProvider {
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            api_base: "https://api.kie.ai".to_string(),
            timeout,
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    /// Build from config. Fails if no API key is configured.
    pub fn from_config(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let api_key = config
            .api_key
            .as_deref()
            .filter(|_| config.has_api_key())
            .ok_or(ProviderError::NotConfigured)?;
        Ok(Self::new(api_key, Duration::from_secs(config.timeout_secs))
            .with_api_base(&config.base_url))
    }

    fn endpoint(&self) -> String {
        format!("{}/api/v1/gpt4o-image/generate", self.api_base)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    prompt: &'a str,
    #[serde(skip_serializing_if = "no_references")]
    files_url: &'a [String],
    size: &'static str,
    n_variants: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    mask_url: Option<&'a str>,
    call_back_url: &'a str,
    is_enhance: bool,
    upload_cn: bool,
    enable_fallback: bool,
}

fn no_references(refs: &&[String]) -> bool {
    refs.is_empty()
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    code: i64,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    data: Option<GenerateData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateData {
    #[serde(default)]
    task_id: Option<String>,
}

#[async_trait]
impl ImageProvider for HttpImageProvider {
    fn name(&self) -> &str {
        "http"
    }

    async fn submit(&self, request: &ProviderRequest) -> Result<ProviderSubmission, ProviderError> {
        let body = GenerateRequest {
            prompt: &request.prompt,
            files_url: &request.source_references,
            size: request.output_size.as_str(),
            n_variants: request.variant_count,
            mask_url: request.mask_reference.as_deref(),
            call_back_url: &request.callback_address,
            is_enhance: false,
            upload_cn: false,
            enable_fallback: false,
        };

        let started = Instant::now();
        let result = self.send(&body).await;
        metrics::PROVIDER_CALL_DURATION
            .with_label_values(&[self.name()])
            .observe(started.elapsed().as_secs_f64());

        result
    }
}

impl HttpImageProvider {
    async fn send(&self, body: &GenerateRequest<'_>) -> Result<ProviderSubmission, ProviderError> {
        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(self.timeout)
                } else {
                    ProviderError::Http(e.to_string())
                }
            })?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api { status, message });
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Json(e.to_string()))?;

        if parsed.code != 200 {
            return Err(ProviderError::Api {
                status: u16::try_from(parsed.code).unwrap_or(500),
                message: parsed.msg.unwrap_or_else(|| "unknown provider error".to_string()),
            });
        }

        let external_id = parsed
            .data
            .and_then(|d| d.task_id)
            .filter(|id| !id.is_empty())
            .ok_or(ProviderError::MissingTaskId)?;

        Ok(ProviderSubmission { external_id })
    }
}
