use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::api::error::ApiError;
use crate::api::provider::{ByteStream, GenerationProvider, GenerationRequest};
use crate::config::ApiConfig;

pub const PROVIDER_NAME: &str = "openai-compatible";

const CHAT_COMPLETIONS_PATH: &str = "chat/completions";

/// Client for any backend that speaks the streamed chat-completions protocol.
#[derive(Clone)]
pub struct OpenAiCompatibleClient {
    http_client: reqwest::Client,
    endpoint: String,
}

impl std::fmt::Debug for OpenAiCompatibleClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatibleClient")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl OpenAiCompatibleClient {
    pub fn new(
        base_url: &str,
        api_key: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, ApiError> {
        let mut headers = header::HeaderMap::new();
        if let Some(key) = api_key.filter(|k| !k.trim().is_empty()) {
            let mut value = header::HeaderValue::from_str(&format!("Bearer {key}"))
                .map_err(|e| ApiError::Configuration(format!("Invalid API key format: {e}")))?;
            value.set_sensitive(true);
            headers.insert(header::AUTHORIZATION, value);
        }

        let http_client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Configuration(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            http_client,
            endpoint: chat_completions_url(base_url)?,
        })
    }

    /// Builds a client from configuration, reading the key from the configured
    /// environment variable. A missing variable means unauthenticated requests.
    pub fn from_config(config: &ApiConfig) -> Result<Self, ApiError> {
        Self::from_config_with(config, |name| std::env::var(name).ok())
    }

    /// Like [`OpenAiCompatibleClient::from_config`] with an explicit lookup
    /// for the key variable.
    pub fn from_config_with(
        config: &ApiConfig,
        lookup: impl FnOnce(&str) -> Option<String>,
    ) -> Result<Self, ApiError> {
        let api_key = lookup(&config.api_key_env);
        if api_key.is_none() {
            debug!(
                target: "openai::client",
                "{} is not set; sending requests without authorization", config.api_key_env
            );
        }
        Self::new(
            &config.base_url,
            api_key.as_deref(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// Resolves the chat-completions endpoint under `base_url`.
pub fn chat_completions_url(base_url: &str) -> Result<String, ApiError> {
    let mut parsed = url::Url::parse(base_url.trim())
        .map_err(|e| ApiError::Configuration(format!("Invalid base URL '{base_url}': {e}")))?;

    let path = parsed.path().trim_end_matches('/').to_string();
    if path.ends_with(CHAT_COMPLETIONS_PATH) {
        return Ok(parsed.to_string());
    }
    parsed.set_path(&format!("{path}/{CHAT_COMPLETIONS_PATH}"));
    Ok(parsed.to_string())
}

#[async_trait]
impl GenerationProvider for OpenAiCompatibleClient {
    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    async fn stream_chat(
        &self,
        request: GenerationRequest,
        token: CancellationToken,
    ) -> Result<ByteStream, ApiError> {
        debug!(
            target: "openai::stream",
            "Requesting {} with {} context messages", request.model, request.messages.len()
        );

        let send = self.http_client.post(&self.endpoint).json(&request).send();
        let response = tokio::select! {
            biased;
            _ = token.cancelled() => {
                return Err(ApiError::Cancelled { provider: PROVIDER_NAME.to_string() });
            }
            response = send => response.map_err(ApiError::Network)?
        };

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            debug!(
                target: "openai::stream",
                "API error status={} body={}", status, body
            );
            return Err(ApiError::ServerError {
                provider: PROVIDER_NAME.to_string(),
                status_code: status.as_u16(),
                details: body,
            });
        }

        Ok(Box::pin(response.bytes_stream().map(|chunk| chunk.map_err(ApiError::Network))))
    }
}
