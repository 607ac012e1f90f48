use crate::inference::{InferenceClient, PullStream};
use crate::ndjson::{decode_ndjson, NdjsonError};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info};
use webassess_core::{
    is_context_length_message, AssessError, ModelDescriptor, PullStatus, Result,
};

/// Configuration for the Ollama HTTP client
#[derive(Debug, Clone)]
pub struct OllamaClientConfig {
    /// Timeout of a liveness probe
    pub probe_timeout: Duration,
    /// Timeout of a model listing call
    pub query_timeout: Duration,
}

impl Default for OllamaClientConfig {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_secs(2),
            query_timeout: Duration::from_secs(30),
        }
    }
}

/// Ollama API request structure for generation
#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<GenerateOptions>,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    num_ctx: usize,
}

/// One record of a streamed generation
#[derive(Debug, Deserialize)]
struct GenerateChunk {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    prompt_eval_count: Option<usize>,
    #[serde(default)]
    eval_count: Option<usize>,
}

#[derive(Debug, Default)]
struct Generation {
    text: String,
    prompt_tokens: Option<usize>,
    completion_tokens: Option<usize>,
}

/// Concatenate streamed chunks up to the `done` record. A stream that ends
/// before `done` is a failed generation, not a shorter answer.
async fn collect_generation<S>(mut chunks: S) -> Result<Generation>
where
    S: Stream<Item = std::result::Result<GenerateChunk, NdjsonError>> + Unpin,
{
    let mut generation = Generation::default();

    while let Some(chunk) = chunks.next().await {
        let chunk = chunk.map_err(|e| {
            AssessError::InvocationFailed(format!("failed to read generation stream: {}", e))
        })?;
        if let Some(error) = chunk.error {
            return Err(classify_generation_error(error));
        }
        generation.text.push_str(&chunk.response);
        if chunk.done {
            generation.prompt_tokens = chunk.prompt_eval_count;
            generation.completion_tokens = chunk.eval_count;
            return Ok(generation);
        }
    }

    Err(AssessError::InvocationFailed(
        "generation stream ended before done".to_string(),
    ))
}

#[derive(Debug, Serialize)]
struct PullRequest<'a> {
    name: &'a str,
    stream: bool,
}

/// Listing responses are either Ollama's `{"models": [...]}` or a bare array.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ModelListing {
    Wrapped { models: Vec<ModelDescriptor> },
    Bare(Vec<ModelDescriptor>),
}

impl ModelListing {
    fn into_models(self) -> Vec<ModelDescriptor> {
        match self {
            ModelListing::Wrapped { models } => models,
            ModelListing::Bare(models) => models,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

/// Ollama client for listing, generation and pulls
pub struct OllamaClient {
    client: Client,
    config: OllamaClientConfig,
}

impl OllamaClient {
    pub fn new(config: OllamaClientConfig) -> Result<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| AssessError::RuntimeQueryFailed(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    pub fn with_client(client: Client, config: OllamaClientConfig) -> Self {
        Self { client, config }
    }

    fn tags_url(base_url: &str) -> String {
        format!("{}/api/tags", base_url.trim_end_matches('/'))
    }
}

/// Parse a model listing body.
pub fn parse_model_listing(body: &[u8]) -> Result<Vec<ModelDescriptor>> {
    serde_json::from_slice::<ModelListing>(body)
        .map(ModelListing::into_models)
        .map_err(|e| AssessError::RuntimeQueryFailed(format!("failed to parse model listing: {}", e)))
}

/// Map a runtime error message to the in-band overflow error or a fatal one.
fn classify_generation_error(message: String) -> AssessError {
    if is_context_length_message(&message) {
        AssessError::ContextLengthExceeded
    } else {
        AssessError::InvocationFailed(message)
    }
}

/// Extract the `error` field of a JSON error body, falling back to the raw text.
fn error_message(body: &str) -> String {
    serde_json::from_str::<ErrorBody>(body)
        .map(|b| b.error)
        .unwrap_or_else(|_| body.trim().to_string())
}

#[async_trait]
impl InferenceClient for OllamaClient {
    async fn probe(&self, base_url: &str) -> bool {
        let result = self
            .client
            .get(Self::tags_url(base_url))
            .timeout(self.config.probe_timeout)
            .send()
            .await;

        match result {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!("Probe of {} failed: {}", base_url, e);
                false
            }
        }
    }

    async fn list_models(&self, base_url: &str) -> Result<Vec<ModelDescriptor>> {
        let response = self
            .client
            .get(Self::tags_url(base_url))
            .timeout(self.config.query_timeout)
            .send()
            .await
            .map_err(|e| AssessError::RuntimeQueryFailed(format!("failed to make request: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AssessError::RuntimeQueryFailed(format!(
                "unexpected status code: {}",
                status.as_u16()
            )));
        }

        let body = response.bytes().await.map_err(|e| {
            AssessError::RuntimeQueryFailed(format!("failed to read response body: {}", e))
        })?;

        parse_model_listing(&body)
    }

    async fn generate(
        &self,
        base_url: &str,
        model: &ModelDescriptor,
        prompt: &str,
    ) -> Result<String> {
        let start_time = Instant::now();
        let request = GenerateRequest {
            model: &model.name,
            prompt,
            stream: true,
            options: model
                .context_window_size
                .map(|num_ctx| GenerateOptions { num_ctx }),
        };

        debug!(
            "Sending generation request to {}: {} prompt bytes",
            model.name,
            prompt.len()
        );

        // No request timeout: large segments may legitimately take long and the
        // caller bounds the call with its cancellation token.
        let response = self
            .client
            .post(format!("{}/api/generate", base_url.trim_end_matches('/')))
            .json(&request)
            .send()
            .await
            .map_err(|e| AssessError::InvocationFailed(format!("generation request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(classify_generation_error(format!(
                "{} ({})",
                error_message(&error_text),
                status.as_u16()
            )));
        }

        let chunks = Box::pin(decode_ndjson::<_, _, GenerateChunk>(Box::pin(
            response.bytes_stream(),
        )));
        let generation = collect_generation(chunks).await?;

        info!(
            "Generation completed: {}ms, prompt: {:?} tokens, completion: {:?} tokens",
            start_time.elapsed().as_millis(),
            generation.prompt_tokens,
            generation.completion_tokens
        );

        Ok(generation.text)
    }

    async fn pull(&self, base_url: &str, name: &str) -> Result<PullStream> {
        let response = self
            .client
            .post(format!("{}/api/pull", base_url.trim_end_matches('/')))
            .json(&PullRequest { name, stream: true })
            .send()
            .await
            .map_err(|e| AssessError::DownloadRejected(format!("failed to make request: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AssessError::DownloadRejected(format!(
                "unexpected status code: {}: {}",
                status.as_u16(),
                error_message(&error_text)
            )));
        }

        let records = decode_ndjson::<_, _, PullStatus>(Box::pin(response.bytes_stream()))
            .map(|record| {
                record.map_err(|e| match e {
                    NdjsonError::Transport(message) => AssessError::DownloadDecodeFailed(message),
                    decode @ NdjsonError::Decode { .. } => {
                        AssessError::DownloadDecodeFailed(decode.to_string())
                    }
                })
            });

        Ok(records.boxed())
    }

    fn provider_name(&self) -> &str {
        "ollama"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_wrapped_listing() {
        let body = br#"{"models":[{"name":"qwen2.5:0.5b","modified_at":"2024-09-20T10:15:30Z","size":397821319}]}"#;
        let models = parse_model_listing(body).unwrap();
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].name, "qwen2.5:0.5b");
        assert_eq!(models[0].size, 397821319);
    }

    #[test]
    fn parses_bare_listing_with_context_window() {
        let body = br#"[{"name":"phi3:3.8b","size":2176178913,"context_window_size":4096}]"#;
        let models = parse_model_listing(body).unwrap();
        assert_eq!(models[0].context_window_size, Some(4096));
    }

    #[test]
    fn rejects_garbage_listing() {
        let err = parse_model_listing(b"<html>").unwrap_err();
        assert!(matches!(err, AssessError::RuntimeQueryFailed(_)));
    }

    #[test]
    fn generation_errors_are_classified() {
        assert_eq!(
            classify_generation_error("input has too many tokens".into()),
            AssessError::ContextLengthExceeded
        );
        assert_eq!(
            classify_generation_error("model 'x' not found".into()),
            AssessError::InvocationFailed("model 'x' not found".into())
        );
    }

    #[test]
    fn error_bodies_are_unwrapped() {
        assert_eq!(error_message(r#"{"error":"context window exceeded"}"#), "context window exceeded");
        assert_eq!(error_message("  plain failure \n"), "plain failure");
    }

    fn chunk(response: &str, done: bool) -> std::result::Result<GenerateChunk, NdjsonError> {
        Ok(GenerateChunk {
            response: response.to_string(),
            done,
            error: None,
            prompt_eval_count: done.then_some(12),
            eval_count: done.then_some(3),
        })
    }

    #[tokio::test]
    async fn generation_is_collected_up_to_done() {
        let chunks = futures::stream::iter(vec![chunk("{\"a\"", false), chunk(":1}", true)]);
        let generation = collect_generation(chunks).await.unwrap();
        assert_eq!(generation.text, "{\"a\":1}");
        assert_eq!(generation.prompt_tokens, Some(12));
        assert_eq!(generation.completion_tokens, Some(3));
    }

    #[tokio::test]
    async fn generation_cut_short_is_an_error() {
        let chunks = futures::stream::iter(vec![chunk("{\"a\"", false), chunk(":1", false)]);
        assert_eq!(
            collect_generation(chunks).await.unwrap_err(),
            AssessError::InvocationFailed("generation stream ended before done".into())
        );
    }

    #[tokio::test]
    async fn error_record_in_generation_is_classified() {
        let chunks = futures::stream::iter(vec![Ok(GenerateChunk {
            response: String::new(),
            done: false,
            error: Some("context length exceeded".into()),
            prompt_eval_count: None,
            eval_count: None,
        })]);
        assert_eq!(
            collect_generation(chunks).await.unwrap_err(),
            AssessError::ContextLengthExceeded
        );
    }

    #[test]
    fn generate_request_carries_context_window() {
        let request = GenerateRequest {
            model: "phi3:3.8b",
            prompt: "hi",
            stream: true,
            options: Some(GenerateOptions { num_ctx: 4096 }),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["options"]["num_ctx"], 4096);

        let request = GenerateRequest {
            model: "phi3:3.8b",
            prompt: "hi",
            stream: true,
            options: None,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("options").is_none());
    }
}
