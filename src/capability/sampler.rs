//! Sampler capability: one text completion per call.
//!
//! A sampler is deliberately unreliable; reliability is the voting engine's
//! job. Implementations wrap whatever language-model provider is configured.

use async_trait::async_trait;

use crate::error::Result;

/// Input for one sampling round.
///
/// Carries the prompt context and the model hint the red-flag policy keys
/// off. The same input is reused verbatim for every round of a voting call.
#[derive(Debug, Clone)]
pub struct TaskInput {
    /// User prompt.
    pub prompt: String,
    /// Optional system prompt.
    pub system_prompt: Option<String>,
    /// Model hint (provider-specific name).
    pub model: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Provider-side completion token limit.
    pub max_tokens: u32,
}

impl TaskInput {
    /// Creates an input with defaults (temperature 0.1, 1024 tokens).
    #[must_use]
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system_prompt: None,
            model: String::new(),
            temperature: 0.1,
            max_tokens: 1024,
        }
    }

    /// Sets the system prompt.
    #[must_use]
    pub fn with_system(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    /// Sets the model hint.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Sets the sampling temperature.
    #[must_use]
    pub const fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Sets the completion token limit.
    #[must_use]
    pub const fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// Produces one text completion for a prompt.
#[async_trait]
pub trait Sampler: Send + Sync {
    /// Samples one completion.
    ///
    /// # Errors
    ///
    /// Transient provider failures should map to [`crate::Error::TransientIo`]
    /// (the voting loop discards the round); anything else aborts the call.
    async fn sample(&self, input: &TaskInput) -> Result<String>;
}

#[cfg(feature = "openai")]
pub use openai::OpenAiSampler;

#[cfg(feature = "openai")]
mod openai {
    use super::{Sampler, TaskInput, async_trait};
    use crate::error::{Error, Result};
    use async_openai::Client;
    use async_openai::config::OpenAIConfig;
    use async_openai::types::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
    };

    /// Sampler backed by an OpenAI-compatible chat completion endpoint.
    pub struct OpenAiSampler {
        client: Client<OpenAIConfig>,
        default_model: String,
    }

    impl OpenAiSampler {
        /// Creates a sampler from environment credentials.
        #[must_use]
        pub fn new(default_model: impl Into<String>) -> Self {
            Self {
                client: Client::new(),
                default_model: default_model.into(),
            }
        }
    }

    #[async_trait]
    impl Sampler for OpenAiSampler {
        async fn sample(&self, input: &TaskInput) -> Result<String> {
            let model = if input.model.is_empty() {
                self.default_model.clone()
            } else {
                input.model.clone()
            };

            let mut messages: Vec<ChatCompletionRequestMessage> = Vec::new();
            if let Some(system) = &input.system_prompt {
                messages.push(
                    ChatCompletionRequestSystemMessageArgs::default()
                        .content(system.clone())
                        .build()
                        .map_err(|e| Error::invariant(format!("request build: {e}")))?
                        .into(),
                );
            }
            messages.push(
                ChatCompletionRequestUserMessageArgs::default()
                    .content(input.prompt.clone())
                    .build()
                    .map_err(|e| Error::invariant(format!("request build: {e}")))?
                    .into(),
            );

            let request = CreateChatCompletionRequestArgs::default()
                .model(model)
                .messages(messages)
                .temperature(input.temperature)
                .max_tokens(input.max_tokens)
                .build()
                .map_err(|e| Error::invariant(format!("request build: {e}")))?;

            let response = self
                .client
                .chat()
                .create(request)
                .await
                .map_err(|e| Error::transient(format!("completion: {e}")))?;

            Ok(response
                .choices
                .first()
                .and_then(|choice| choice.message.content.clone())
                .unwrap_or_default())
        }
    }
}
