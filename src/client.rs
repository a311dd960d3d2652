use async_openai::{
    config::{AzureConfig, Config, OpenAIConfig},
    error::OpenAIError,
    types::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
    },
    Client,
};
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use std::time::Duration;
use tokio::runtime::Runtime;

use crate::error::{BatchError, InferenceError, Result};
use crate::types::{Backend, BatchConfig, Completion, Usage};

/// One blocking system + user exchange with a language model
pub trait InferenceClient {
    fn complete(&self, system: &str, user: &str) -> std::result::Result<Completion, InferenceError>;
}

impl<T: InferenceClient + ?Sized> InferenceClient for &T {
    fn complete(&self, system: &str, user: &str) -> std::result::Result<Completion, InferenceError> {
        (**self).complete(system, user)
    }
}

impl<T: InferenceClient + ?Sized> InferenceClient for Box<T> {
    fn complete(&self, system: &str, user: &str) -> std::result::Result<Completion, InferenceError> {
        (**self).complete(system, user)
    }
}

/// One attempt per row. Rate limits and server errors surface as the
/// service's own message instead of being retried until the timeout.
fn no_retry() -> ExponentialBackoff {
    ExponentialBackoffBuilder::new()
        .with_max_elapsed_time(Some(Duration::ZERO))
        .build()
}

/// Chat-completions client for OpenAI-compatible and Azure OpenAI endpoints.
///
/// Owns its own runtime so callers stay synchronous; at most one request is
/// in flight per call.
pub struct OpenAiClient<C: Config> {
    config: BatchConfig,
    client: Client<C>,
    runtime: Runtime,
}

impl OpenAiClient<OpenAIConfig> {
    /// OpenAI or any OpenAI-compatible endpoint (Ollama, vLLM, ...)
    pub fn openai(config: BatchConfig) -> Result<Self> {
        let mut openai_config = OpenAIConfig::new();
        if let Some(url) = &config.base_url {
            openai_config = openai_config.with_api_base(url);
        }
        if let Some(key) = &config.api_key {
            openai_config = openai_config.with_api_key(key);
        }
        Self::with_client(config, Client::with_config(openai_config))
    }
}

impl OpenAiClient<AzureConfig> {
    /// Azure OpenAI deployment; the model name doubles as deployment id
    pub fn azure(config: BatchConfig) -> Result<Self> {
        let endpoint = config
            .base_url
            .clone()
            .ok_or_else(|| BatchError::Config("Azure backend needs an endpoint URL".to_string()))?;
        let key = config.api_key.clone().ok_or(BatchError::MissingApiKey)?;

        let azure_config = AzureConfig::new()
            .with_api_base(endpoint)
            .with_api_key(key)
            .with_deployment_id(config.model.clone())
            .with_api_version(config.api_version.clone());
        Self::with_client(config, Client::with_config(azure_config))
    }
}

impl<C: Config> OpenAiClient<C> {
    fn with_client(config: BatchConfig, client: Client<C>) -> Result<Self> {
        let runtime = Runtime::new().map_err(|e| BatchError::Runtime(e.to_string()))?;
        Ok(Self {
            config,
            client: client.with_backoff(no_retry()),
            runtime,
        })
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    async fn send(&self, system: &str, user: &str) -> std::result::Result<Completion, OpenAIError> {
        let messages = vec![
            ChatCompletionRequestMessage::System(
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(system)
                    .build()?,
            ),
            ChatCompletionRequestMessage::User(
                ChatCompletionRequestUserMessageArgs::default()
                    .content(user)
                    .build()?,
            ),
        ];

        let mut request_builder = CreateChatCompletionRequestArgs::default();
        request_builder.model(&self.config.model).messages(messages);
        if let Some(temperature) = self.config.temperature {
            request_builder.temperature(temperature);
        }
        if let Some(max_tokens) = self.config.max_tokens {
            request_builder.max_tokens(max_tokens);
        }
        let request = request_builder.build()?;

        let response = self.client.chat().create(request).await?;

        let content = response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default();

        let usage = response
            .usage
            .map(|u| Usage::new(u.prompt_tokens as u64, u.completion_tokens as u64))
            .unwrap_or_default();

        Ok(Completion { content, usage })
    }
}

impl<C: Config> InferenceClient for OpenAiClient<C> {
    fn complete(&self, system: &str, user: &str) -> std::result::Result<Completion, InferenceError> {
        tracing::debug!(model = %self.config.model, "sending request: {}", user);
        let timeout = self.config.request_timeout;
        let result = self
            .runtime
            .block_on(async { tokio::time::timeout(timeout, self.send(system, user)).await });

        match result {
            Ok(Ok(completion)) => Ok(completion),
            Ok(Err(e)) => Err(classify(e)),
            Err(_) => Err(InferenceError::Transport(format!(
                "request timed out after {:?}",
                timeout
            ))),
        }
    }
}

/// An error object returned by the service means the request was declined;
/// everything else is a transport-level fault.
fn classify(error: OpenAIError) -> InferenceError {
    match error {
        OpenAIError::ApiError(api) => InferenceError::Rejected(api.message),
        other => InferenceError::Transport(other.to_string()),
    }
}

/// Build the client for the configured backend
pub fn from_config(config: BatchConfig) -> Result<Box<dyn InferenceClient>> {
    if config.api_key.is_none() {
        return Err(BatchError::MissingApiKey);
    }
    Ok(match config.backend {
        Backend::OpenAI => Box::new(OpenAiClient::openai(config)?),
        Backend::Azure => Box::new(OpenAiClient::azure(config)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_api_error_is_rejection() {
        let api = async_openai::error::ApiError {
            message: "content filtered".to_string(),
            r#type: Some("invalid_request_error".to_string()),
            param: None,
            code: None,
        };
        assert_eq!(
            classify(OpenAIError::ApiError(api)),
            InferenceError::Rejected("content filtered".to_string())
        );
    }

    #[test]
    fn test_classify_other_is_transport() {
        let err = classify(OpenAIError::InvalidArgument("bad".to_string()));
        assert!(matches!(err, InferenceError::Transport(_)));
    }

    #[test]
    fn test_azure_requires_endpoint() {
        let config = BatchConfig::new("gpt-4o-mini").with_api_key("k");
        assert!(matches!(
            OpenAiClient::azure(config),
            Err(BatchError::Config(_))
        ));
    }

    #[test]
    fn test_from_config_requires_key() {
        let config = BatchConfig::new("gpt-4o-mini")
            .with_backend(Backend::OpenAI)
            .with_base_url("http://localhost:1/v1");
        assert!(matches!(from_config(config), Err(BatchError::MissingApiKey)));
    }
}
