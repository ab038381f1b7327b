use crate::config::LlmConfig;
use crate::error::BackendError;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, error};

/// Narrow completion contract over a language-model backend. The model is an
/// opaque service; prompt assembly stays with the callers.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(
        &self,
        prompt: &str,
        system: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String, BackendError>;
}

#[async_trait]
impl<L: LanguageModel + ?Sized> LanguageModel for std::sync::Arc<L> {
    async fn complete(
        &self,
        prompt: &str,
        system: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String, BackendError> {
        (**self).complete(prompt, system, max_tokens, temperature).await
    }
}

/// Language-model backend over the Ollama generate API.
pub struct OllamaClient {
    base_url: String,
    model: String,
    client: Client,
}

impl OllamaClient {
    pub fn new(config: &LlmConfig) -> Result<Self, BackendError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|error| BackendError::from_reqwest("ollama", error))?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            client,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Checks that the backend answers and that the configured model is
    /// actually pulled, via the tags listing.
    pub async fn test_connection(&self) -> Result<(), BackendError> {
        let response = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await
            .map_err(|error| BackendError::from_reqwest("ollama", error))?;

        if !response.status().is_success() {
            return Err(BackendError::response(
                "ollama",
                response.status().to_string(),
            ));
        }

        let parsed: Value = response
            .json()
            .await
            .map_err(|error| BackendError::from_reqwest("ollama", error))?;

        let available = parsed
            .pointer("/models")
            .and_then(Value::as_array)
            .map(|models| {
                models.iter().any(|entry| {
                    entry
                        .pointer("/name")
                        .and_then(Value::as_str)
                        .is_some_and(|name| name == self.model)
                })
            })
            .unwrap_or(false);

        if !available {
            return Err(BackendError::response(
                "ollama",
                format!("model {} is not available", self.model),
            ));
        }

        Ok(())
    }
}

#[async_trait]
impl LanguageModel for OllamaClient {
    async fn complete(
        &self,
        prompt: &str,
        system: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String, BackendError> {
        debug!(model = %self.model, prompt_chars = prompt.len(), "completion request");

        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&json!({
                "model": self.model,
                "prompt": prompt,
                "system": system,
                "stream": false,
                "options": {
                    "temperature": temperature,
                    "num_predict": max_tokens,
                },
            }))
            .send()
            .await
            .map_err(|error| BackendError::from_reqwest("ollama", error))?;

        if !response.status().is_success() {
            return Err(BackendError::response(
                "ollama",
                response.status().to_string(),
            ));
        }

        let parsed: Value = response
            .json()
            .await
            .map_err(|error| BackendError::from_reqwest("ollama", error))?;

        match parsed.pointer("/response").and_then(Value::as_str) {
            Some(text) => Ok(text.trim().to_string()),
            None => Err(BackendError::response(
                "ollama",
                "generate response carried no text",
            )),
        }
    }
}

const CLEANING_SYSTEM_PROMPT: &str = "You tidy up text extracted from technical documentation.\n\
Remove duplicated lines, garbage and truncation artifacts.\n\
Preserve technical identifiers, codes and standards references verbatim.\n\
Do not summarize and do not paraphrase; only make the text clean for indexing.";

/// Optional LLM cleaning pass over extracted page text. Fails open: any
/// backend error returns the original text so a flaky model never costs a
/// page its content.
pub struct TextCleaner {
    llm: std::sync::Arc<dyn LanguageModel>,
    max_tokens: u32,
}

impl TextCleaner {
    pub fn new(llm: std::sync::Arc<dyn LanguageModel>) -> Self {
        Self {
            llm,
            max_tokens: 512,
        }
    }

    pub async fn clean(&self, text: &str, file_name: &str, page: u32) -> String {
        if text.trim().is_empty() {
            return text.to_string();
        }

        let prompt = format!("File: {file_name}, page: {page}\n\nText:\n{text}");

        match self
            .llm
            .complete(&prompt, CLEANING_SYSTEM_PROMPT, self.max_tokens, 0.1)
            .await
        {
            Ok(cleaned) if !cleaned.trim().is_empty() => cleaned.trim().to_string(),
            Ok(_) => text.to_string(),
            Err(err) => {
                error!(file = file_name, page, error = %err, "text cleaning failed, keeping raw text");
                text.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoModel;

    #[async_trait]
    impl LanguageModel for EchoModel {
        async fn complete(
            &self,
            prompt: &str,
            _system: &str,
            _max_tokens: u32,
            _temperature: f32,
        ) -> Result<String, BackendError> {
            Ok(format!("cleaned: {}", prompt.lines().last().unwrap_or("")))
        }
    }

    struct FailingModel;

    #[async_trait]
    impl LanguageModel for FailingModel {
        async fn complete(
            &self,
            _prompt: &str,
            _system: &str,
            _max_tokens: u32,
            _temperature: f32,
        ) -> Result<String, BackendError> {
            Err(BackendError::Timeout {
                backend: "ollama".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn cleaner_uses_model_output() {
        let cleaner = TextCleaner::new(std::sync::Arc::new(EchoModel));
        let cleaned = cleaner.clean("raw page text", "m.pdf", 3).await;
        assert_eq!(cleaned, "cleaned: raw page text");
    }

    #[tokio::test]
    async fn cleaner_fails_open_on_backend_errors() {
        let cleaner = TextCleaner::new(std::sync::Arc::new(FailingModel));
        let cleaned = cleaner.clean("raw page text", "m.pdf", 3).await;
        assert_eq!(cleaned, "raw page text");
    }

    #[tokio::test]
    async fn cleaner_leaves_blank_text_alone() {
        let cleaner = TextCleaner::new(std::sync::Arc::new(EchoModel));
        assert_eq!(cleaner.clean("   ", "m.pdf", 1).await, "   ");
    }
}
