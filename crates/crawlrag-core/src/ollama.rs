//! Ollama client for embeddings and completion. Wraps ollama-rs behind the
//! [`Embedder`] and [`LanguageModel`] traits.

use async_trait::async_trait;
use ollama_rs::generation::completion::request::GenerationRequest;
use ollama_rs::generation::embeddings::request::{EmbeddingsInput, GenerateEmbeddingsRequest};
use ollama_rs::models::ModelOptions;
use ollama_rs::Ollama;
use thiserror::Error;

use crate::config::Config;
use crate::embedder::{check_input, Embedder, EmbeddingError};
use crate::llm::{CompletionError, CompletionParams, LanguageModel, Prompt};

pub const DEFAULT_EMBED_MODEL: &str = "nomic-embed-text";
pub const DEFAULT_CHAT_MODEL: &str = "llama3.1";
pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";
/// Output size of `nomic-embed-text`.
pub const DEFAULT_EMBED_DIMENSION: usize = 768;
/// Conservative char budget for the 2048-token context of `nomic-embed-text`.
pub const DEFAULT_MAX_INPUT_CHARS: usize = 6000;

/// Thin wrapper around Ollama for embedding and completion.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    inner: Ollama,
    embed_model: String,
    chat_model: String,
    dimension: usize,
    max_input_chars: usize,
}

impl OllamaClient {
    /// Create from URL string, e.g. http://localhost:11434.
    pub fn from_url(url: &str) -> Result<Self, OllamaError> {
        let inner = Ollama::try_new(url).map_err(OllamaError::ParseUrl)?;
        Ok(Self {
            inner,
            embed_model: DEFAULT_EMBED_MODEL.to_string(),
            chat_model: DEFAULT_CHAT_MODEL.to_string(),
            dimension: DEFAULT_EMBED_DIMENSION,
            max_input_chars: DEFAULT_MAX_INPUT_CHARS,
        })
    }

    /// Create from the URL, models and limits in `config`.
    pub fn from_config(config: &Config) -> Result<Self, OllamaError> {
        Ok(Self::from_url(&config.ollama_url)?
            .with_embed_model(&config.embed_model)
            .with_chat_model(&config.chat_model)
            .with_dimension(config.embed_dimension)
            .with_max_input_chars(config.max_input_chars))
    }

    /// Set the embedding model (e.g. `nomic-embed-text`, `all-minilm`).
    /// The dimension must be set to match.
    pub fn with_embed_model(mut self, model: impl Into<String>) -> Self {
        self.embed_model = model.into();
        self
    }

    pub fn with_chat_model(mut self, model: impl Into<String>) -> Self {
        self.chat_model = model.into();
        self
    }

    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = dimension;
        self
    }

    pub fn with_max_input_chars(mut self, max_chars: usize) -> Self {
        self.max_input_chars = max_chars;
        self
    }

    async fn request_embeddings(&self, input: EmbeddingsInput) -> Result<Vec<Vec<f32>>, OllamaError> {
        let req = GenerateEmbeddingsRequest::new(self.embed_model.clone(), input);
        let res = self
            .inner
            .generate_embeddings(req)
            .await
            .map_err(OllamaError::Request)?;
        Ok(res.embeddings)
    }
}

#[async_trait]
impl Embedder for OllamaClient {
    fn dimension(&self) -> usize {
        self.dimension
    }

    /// Embed a single string. Returns the embedding vector.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        check_input(text, self.max_input_chars)?;
        let mut embeddings = self
            .request_embeddings(EmbeddingsInput::Single(text.to_string()))
            .await?;
        if embeddings.len() != 1 {
            return Err(EmbeddingError::UnexpectedCount {
                expected: 1,
                actual: embeddings.len(),
            });
        }
        Ok(embeddings.remove(0))
    }

    /// Embed multiple strings in one call. Returns one embedding per input.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        for text in texts {
            check_input(text, self.max_input_chars)?;
        }
        let embeddings = self
            .request_embeddings(EmbeddingsInput::Multiple(texts.to_vec()))
            .await?;
        if embeddings.len() != texts.len() {
            return Err(EmbeddingError::UnexpectedCount {
                expected: texts.len(),
                actual: embeddings.len(),
            });
        }
        Ok(embeddings)
    }
}

#[async_trait]
impl LanguageModel for OllamaClient {
    async fn complete(&self, prompt: &Prompt, params: &CompletionParams) -> Result<String, CompletionError> {
        let options = ModelOptions::default()
            .temperature(params.temperature)
            .num_predict(i32::try_from(params.max_tokens).unwrap_or(i32::MAX));
        let req = GenerationRequest::new(self.chat_model.clone(), prompt.user.clone())
            .system(prompt.system.clone())
            .options(options);
        let res = self
            .inner
            .generate(req)
            .await
            .map_err(|e| CompletionError::Backend(e.to_string()))?;
        let text = res.response.trim();
        if text.is_empty() {
            return Err(CompletionError::EmptyResponse);
        }
        Ok(text.to_string())
    }
}

#[derive(Debug, Error)]
pub enum OllamaError {
    #[error("invalid Ollama URL: {0}")]
    ParseUrl(#[from] url::ParseError),
    #[error("Ollama request failed: {0}")]
    Request(#[from] ollama_rs::error::OllamaError),
}

impl From<OllamaError> for EmbeddingError {
    fn from(e: OllamaError) -> Self {
        EmbeddingError::Backend(e.to_string())
    }
}
