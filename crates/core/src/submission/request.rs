use serde::Deserialize;
use thiserror::Error;

use crate::styles::Style;
use crate::task::{InputSpec, OutputSize};

/// Variant counts the provider is asked for.
const ALLOWED_VARIANT_COUNTS: [u32; 1] = [1];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ValidationError(pub String);

/// Body of `POST /api/v1/generations`.
///
/// The provider's own field names (`filesUrl`, `size`, `nVariants`,
/// `maskUrl`, `callBackUrl`) are accepted as aliases.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default, alias = "filesUrl")]
    pub source_references: Option<Vec<String>>,
    #[serde(default, alias = "size")]
    pub output_size: Option<String>,
    #[serde(default, alias = "nVariants")]
    pub variant_count: Option<u32>,
    #[serde(default)]
    pub style: Option<String>,
    #[serde(default, alias = "maskUrl")]
    pub mask_reference: Option<String>,
    #[serde(default, alias = "callBackUrl")]
    pub callback_override: Option<String>,
}

impl SubmitRequest {
    /// Check the request and normalize it into an [`InputSpec`].
    pub fn validate(&self, max_source_references: usize) -> Result<InputSpec, ValidationError> {
        let prompt = self
            .prompt
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string);

        let source_references: Vec<String> = self
            .source_references
            .iter()
            .flatten()
            .map(|r| r.trim().to_string())
            .collect();
        if source_references.iter().any(String::is_empty) {
            return invalid("sourceReferences must not contain empty entries");
        }
        if source_references.len() > max_source_references {
            return invalid(format!(
                "At most {} source reference(s) allowed, got {}",
                max_source_references,
                source_references.len()
            ));
        }

        if prompt.is_none() && source_references.is_empty() {
            return invalid("Either prompt or sourceReferences is required");
        }

        let output_size = match self.output_size.as_deref().map(str::trim) {
            Some(size) => OutputSize::parse(size).ok_or_else(|| {
                ValidationError(format!("outputSize must be one of: {}", OutputSize::Square.as_str()))
            })?,
            None => return invalid("outputSize is required"),
        };

        let variant_count = self.variant_count.unwrap_or(1);
        if !ALLOWED_VARIANT_COUNTS.contains(&variant_count) {
            return invalid(format!(
                "variantCount must be one of: {:?}",
                ALLOWED_VARIANT_COUNTS
            ));
        }

        let style = match self.style.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            Some(name) => Some(
                name.parse::<Style>()
                    .map_err(|e| ValidationError(e.to_string()))?,
            ),
            None => None,
        };

        let mask_reference = match self.mask_reference.as_deref().map(str::trim) {
            Some("") => return invalid("maskReference must not be empty"),
            other => other.map(str::to_string),
        };

        if let Some(url) = &self.callback_override {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return invalid("callbackOverride must be an http(s) URL");
            }
        }

        let provider_prompt = match style {
            Some(style) => style.prompt_template().to_string(),
            None => prompt.clone().unwrap_or_default(),
        };

        Ok(InputSpec {
            prompt,
            provider_prompt,
            source_references,
            mask_reference,
            output_size,
            variant_count,
            style,
        })
    }
}

fn invalid<T>(message: impl Into<String>) -> Result<T, ValidationError> {
    Err(ValidationError(message.into()))
}
