
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::RecipeError;
use crate::config::OllamaConfig;
use crate::enrichment::EnrichmentPipeline;

const EXPONENTIAL_BACKOFF_BASE: u64 = 2;
const BACKOFF_UNIT_MS: u64 = 1000;

/// Blocking client for the Ollama HTTP API.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    base_url: Url,
    embedding_model: String,
    summary_model: String,
    embedding_dimension: usize,
    agent: ureq::Agent,
    retry_attempts: u32,
    backoff_unit_ms: u64,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Debug, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub size: Option<u64>,
    pub digest: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    models: Vec<ModelInfo>,
}

impl OllamaClient {
    #[inline]
    pub fn new(config: &OllamaConfig) -> Result<Self> {
        let base_url = config
            .ollama_url()
            .context("Failed to generate Ollama URL from config")?;

        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(config.request_timeout_seconds)))
            .build()
            .into();

        Ok(Self {
            base_url,
            embedding_model: config.embedding_model.clone(),
            summary_model: config.summary_model.clone(),
            embedding_dimension: usize::try_from(config.embedding_dimension)
                .context("Embedding dimension does not fit in usize")?,
            agent,
            retry_attempts: config.retry_attempts.max(1),
            backoff_unit_ms: BACKOFF_UNIT_MS,
        })
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();
        self
    }

    #[inline]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts.max(1);
        self
    }

    /// Scale the pause between retries; tests use a tiny unit.
    #[inline]
    pub fn with_backoff_unit(mut self, unit: Duration) -> Self {
        self.backoff_unit_ms = u64::try_from(unit.as_millis()).unwrap_or(u64::MAX);
        self
    }

    #[inline]
    pub fn embedding_dimension(&self) -> usize {
        self.embedding_dimension
    }

    /// Test connection to Ollama server and verify both models are available
    #[inline]
    pub fn health_check(&self) -> Result<()> {
        debug!("Performing health check for Ollama at {}", self.base_url);

        self.ping().context("Server ping failed")?;
        self.validate_model(&self.embedding_model)
            .context("Embedding model validation failed")?;
        self.validate_model(&self.summary_model)
            .context("Summary model validation failed")?;

        info!(
            "Health check passed for Ollama server at {} with models {} and {}",
            self.base_url, self.embedding_model, self.summary_model
        );
        Ok(())
    }

    /// Ping the Ollama server to check if it's responsive
    #[inline]
    pub fn ping(&self) -> Result<()> {
        let url = self
            .base_url
            .join("/api/tags")
            .context("Failed to build ping URL")?;

        debug!("Pinging Ollama server at {}", url);

        self.make_request_with_retry(|| {
            self.agent
                .get(url.as_str())
                .call()
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })
        .context("Failed to ping Ollama server")?;

        Ok(())
    }

    #[inline]
    pub fn validate_model(&self, model: &str) -> Result<()> {
        let models = self.list_models().context("Failed to list models")?;

        if models.iter().any(|m| m.name == model) {
            debug!("Model {} is available", model);
            Ok(())
        } else {
            let available_models: Vec<&str> = models.iter().map(|m| m.name.as_str()).collect();
            warn!(
                "Model {} not found. Available models: {:?}",
                model, available_models
            );
            Err(anyhow::anyhow!(
                "Model '{}' is not available. Available models: {:?}",
                model,
                available_models
            ))
        }
    }

    #[inline]
    pub fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let url = self
            .base_url
            .join("/api/tags")
            .context("Failed to build models URL")?;

        let response_text = self
            .make_request_with_retry(|| {
                self.agent
                    .get(url.as_str())
                    .call()
                    .and_then(|mut resp| resp.body_mut().read_to_string())
            })
            .context("Failed to fetch models")?;

        let models_response: ModelsResponse =
            serde_json::from_str(&response_text).context("Failed to parse models response")?;

        debug!("Found {} models", models_response.models.len());
        Ok(models_response.models)
    }

    /// Embed one text with the embedding model. The vector must have the configured dimension.
    #[inline]
    pub fn embed(&self, text: &str) -> Result<Vec<f32>> {
        debug!("Generating embedding for text (length: {})", text.len());

        let request = EmbedRequest {
            model: &self.embedding_model,
            input: text,
        };
        let response_text = self
            .post_json("/api/embed", &request)
            .context("Failed to generate embedding")?;

        let embed_response: EmbedResponse =
            serde_json::from_str(&response_text).context("Failed to parse embedding response")?;
        let embedding = embed_response
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("Embedding response contained no vectors"))?;

        if embedding.len() != self.embedding_dimension {
            return Err(anyhow::anyhow!(
                "Embedding has {} dimensions, expected {}",
                embedding.len(),
                self.embedding_dimension
            ));
        }

        Ok(embedding)
    }

    /// Run a non-streaming completion with the summary model.
    #[inline]
    pub fn generate(&self, prompt: &str) -> Result<String> {
        let request = GenerateRequest {
            model: &self.summary_model,
            prompt,
            stream: false,
        };
        let response_text = self
            .post_json("/api/generate", &request)
            .context("Failed to generate completion")?;

        let generated: GenerateResponse = serde_json::from_str(&response_text)
            .context("Failed to parse completion response")?;
        Ok(generated.response.trim().to_string())
    }

    fn post_json<T: Serialize>(&self, endpoint: &str, body: &T) -> Result<String> {
        let url = self
            .base_url
            .join(endpoint)
            .with_context(|| format!("Failed to build URL for {endpoint}"))?;
        let request_json = serde_json::to_string(body).context("Failed to serialize request")?;

        self.make_request_with_retry(|| {
            self.agent
                .post(url.as_str())
                .header("Content-Type", "application/json")
                .send(&request_json)
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })
    }

    fn make_request_with_retry<F>(&self, mut request_fn: F) -> Result<String>
    where
        F: FnMut() -> Result<String, ureq::Error>,
    {
        let mut last_error = None;

        for attempt in 1..=self.retry_attempts {
            debug!("HTTP request attempt {}/{}", attempt, self.retry_attempts);

            match request_fn() {
                Ok(response_text) => return Ok(response_text),
                Err(error) => {
                    let should_retry = match &error {
                        ureq::Error::StatusCode(status) => {
                            if *status >= 500 {
                                warn!(
                                    "Server error (status {}), attempt {}/{}",
                                    status, attempt, self.retry_attempts
                                );
                                true
                            } else {
                                warn!("Client error (status {}), not retrying", status);
                                return Err(anyhow::anyhow!("Client error: HTTP {}", status));
                            }
                        }
                        ureq::Error::ConnectionFailed
                        | ureq::Error::HostNotFound
                        | ureq::Error::Timeout(_)
                        | ureq::Error::Io(_) => {
                            warn!(
                                "Transport error: {}, attempt {}/{}",
                                error, attempt, self.retry_attempts
                            );
                            true
                        }
                        _ => false,
                    };

                    if !should_retry {
                        return Err(anyhow::anyhow!("Non-retryable error: {}", error));
                    }

                    last_error = Some(anyhow::anyhow!("Request error: {}", error));

                    if attempt < self.retry_attempts {
                        let delay = Duration::from_millis(
                            EXPONENTIAL_BACKOFF_BASE.pow(attempt - 1) * self.backoff_unit_ms,
                        );
                        debug!("Waiting {:?} before retry", delay);
                        std::thread::sleep(delay);
                    }
                }
            }
        }

        error!("All retry attempts failed for request to {}", self.base_url);

        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("Request failed after retries")))
    }
}

/// Prompt asking the summary model for a short markdown digest of a recipe.
#[inline]
pub fn summary_prompt(title: &str, content: &str) -> String {
    format!(
        "Summarize the following recipe in markdown, using no more than five short paragraphs. \
         Mention the main ingredients, the technique and anything unusual. \
         Reply with the summary only.\n\n# {title}\n\n{content}"
    )
}

/// [`EnrichmentPipeline`] backed by a local Ollama server.
#[derive(Debug, Clone)]
pub struct OllamaPipeline {
    client: OllamaClient,
    configured: bool,
}

impl OllamaPipeline {
    #[inline]
    pub fn new(config: &OllamaConfig) -> Result<Self> {
        Ok(Self {
            client: OllamaClient::new(config)?,
            configured: config.is_configured(),
        })
    }

    #[inline]
    pub fn from_client(client: OllamaClient) -> Self {
        let configured =
            !client.embedding_model.is_empty() && !client.summary_model.is_empty();
        Self { client, configured }
    }

    #[inline]
    pub fn client(&self) -> &OllamaClient {
        &self.client
    }

    async fn run_blocking<T, F>(&self, call: F) -> crate::Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&OllamaClient) -> Result<T> + Send + 'static,
    {
        let client = self.client.clone();
        tokio::task::spawn_blocking(move || call(&client))
            .await
            .map_err(|e| RecipeError::Processing(format!("Ollama task failed: {e}")))?
            .map_err(|e| RecipeError::Network(format!("{e:#}")))
    }
}

#[async_trait]
impl EnrichmentPipeline for OllamaPipeline {
    async fn summarize(&self, title: &str, content: &str) -> crate::Result<String> {
        let prompt = summary_prompt(title, content);
        let summary = self.run_blocking(move |client| client.generate(&prompt)).await?;
        if summary.is_empty() {
            return Err(RecipeError::Processing(
                "summary model returned an empty response".to_string(),
            ));
        }
        Ok(summary)
    }

    async fn embed(&self, text: &str) -> crate::Result<Vec<f32>> {
        let text = text.to_string();
        self.run_blocking(move |client| client.embed(&text))
            .await
            .map_err(|e| match e {
                RecipeError::Network(msg) => RecipeError::Embedding(msg),
                other => other,
            })
    }

    fn check_ready(&self) -> crate::Result<()> {
        if self.configured {
            Ok(())
        } else {
            Err(RecipeError::Config(
                "no Ollama embedding and summary models configured".to_string(),
            ))
        }
    }
}
