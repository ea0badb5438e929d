//! Hosted VLM backend: one window image + prompt as a single chat turn.
//!
//! Any provider `edgequake-llm` knows (OpenAI, Anthropic, Gemini, Ollama,
//! vLLM, ...) can read a window. The request is one user message with the
//! prompt as text and the window attached as a base64 image; no system
//! message, because the window prompts are self-contained instructions.
//!
//! ## Sampling parameters
//!
//! Chat APIs expose `temperature` and `max_tokens`; `top_p` and beam search
//! are container-only knobs and are not forwarded.

use crate::error::DocExtractError;
use crate::pipeline::inference::{GenerationParams, InferenceBackend, InferenceFailure, InferenceRequest};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use std::sync::Arc;
use tracing::debug;

/// Default model when a provider is named without one.
pub const DEFAULT_MODEL: &str = "gpt-4.1-nano";

/// [`InferenceBackend`] over an `edgequake-llm` provider.
pub struct LlmBackend {
    provider: Arc<dyn LLMProvider>,
    label: String,
}

impl LlmBackend {
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self {
            provider,
            label: "llm".to_string(),
        }
    }

    /// Name shown in logs, e.g. `"llm:openai"`.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Build a backend for a named provider, reading its API key from the
    /// environment.
    pub fn from_name(provider_name: &str, model: Option<&str>) -> Result<Self, DocExtractError> {
        let provider = create_vision_provider(provider_name, model.unwrap_or(DEFAULT_MODEL))?;
        Ok(Self::new(provider).with_label(format!("llm:{provider_name}")))
    }

    /// Auto-detect a provider from the environment.
    ///
    /// `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL` win when both are set;
    /// otherwise an `OPENAI_API_KEY` selects OpenAI; otherwise the factory
    /// scans every known key variable.
    pub fn from_env(model: Option<&str>) -> Result<Self, DocExtractError> {
        if let (Ok(prov), Ok(env_model)) = (
            std::env::var("EDGEQUAKE_LLM_PROVIDER"),
            std::env::var("EDGEQUAKE_MODEL"),
        ) {
            if !prov.is_empty() && !env_model.is_empty() {
                let provider = create_vision_provider(&prov, &env_model)?;
                return Ok(Self::new(provider).with_label(format!("llm:{prov}")));
            }
        }

        if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
            if !openai_key.is_empty() {
                return Self::from_name("openai", model);
            }
        }

        let (llm_provider, _embedding) =
            ProviderFactory::from_env().map_err(|e| DocExtractError::BackendNotConfigured {
                backend: "llm".to_string(),
                hint: format!(
                    "No LLM provider could be auto-detected from environment.\n\
                    Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or point DOCEXTRACT_CONTAINER_URL \
                    at a model container.\n\
                    Error: {e}"
                ),
            })?;
        Ok(Self::new(llm_provider))
    }
}

#[async_trait]
impl InferenceBackend for LlmBackend {
    fn name(&self) -> &str {
        &self.label
    }

    async fn generate(&self, request: &InferenceRequest<'_>) -> Result<String, InferenceFailure> {
        let image = ImageData::new(request.image.to_base64(), request.image.mime_type()).with_detail("high");
        let messages = vec![ChatMessage::user_with_images(request.prompt, vec![image])];
        let options = build_options(request.generation);

        match self.provider.chat(&messages, Some(&options)).await {
            Ok(response) => {
                debug!(
                    "{}: {} input tokens, {} output tokens",
                    self.label, response.prompt_tokens, response.completion_tokens
                );
                Ok(response.content)
            }
            Err(e) => Err(InferenceFailure::from_message(e.to_string())),
        }
    }
}

/// Build `CompletionOptions` from the generation parameters.
fn build_options(generation: &GenerationParams) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(generation.temperature),
        max_tokens: Some(generation.max_new_tokens),
        ..Default::default()
    }
}

/// Instantiate a named provider with the given model.
fn create_vision_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, DocExtractError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        DocExtractError::BackendNotConfigured {
            backend: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_options_defaults() {
        let opts = build_options(&GenerationParams::default());
        assert_eq!(opts.temperature, Some(0.1));
        assert_eq!(opts.max_tokens, Some(768));
    }
}
