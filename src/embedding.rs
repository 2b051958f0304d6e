//! Embedding provider client and vector utilities.
//!
//! The [`Embedder`] trait is the seam between the ingestion pipeline and the
//! remote embedding service; tests substitute a deterministic stub. The real
//! implementation, [`OllamaClient`], calls an Ollama-compatible HTTP endpoint
//! (`POST {endpoint}/api/embeddings`) one text at a time. The client does no
//! batching, caching, or retrying — retry policy belongs to the pipeline,
//! which inspects [`EmbedError::is_transient`] to decide.
//!
//! Vector utilities for BLOB storage:
//! - [`vec_to_blob`] — encode a `Vec<f32>` as little-endian bytes
//! - [`blob_to_vec`] — decode a BLOB back into a `Vec<f32>`
//! - [`cosine_similarity`] — similarity between two vectors

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

use crate::config::EmbeddingConfig;

/// Failure taxonomy for embedding generation.
///
/// Only [`EmbedError::Transient`] is eligible for retry. Everything else is
/// either a caller error (`InvalidInput`), a per-record fatal
/// (`DimensionMismatch`, `Provider`), or a whole-run fatal
/// (`ServiceUnavailable`).
#[derive(Debug, Error)]
pub enum EmbedError {
    /// Empty text after trimming, or an otherwise unusable input. Never sent
    /// to the provider.
    #[error("invalid embedding input: {0}")]
    InvalidInput(String),

    /// Network error, timeout, or a retryable HTTP status (429 / 5xx).
    #[error("transient embedding failure: {0}")]
    Transient(String),

    /// The returned vector length disagrees with the declared dimension.
    /// Never stored; indicates a model/schema configuration problem.
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// The service never became ready within the startup timeout.
    #[error("embedding service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Unknown model, malformed response, or a non-retryable HTTP status.
    #[error("embedding provider error: {0}")]
    Provider(String),
}

impl EmbedError {
    pub fn is_transient(&self) -> bool {
        matches!(self, EmbedError::Transient(_))
    }
}

/// Text-to-vector provider. One text in, one vector out.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier recorded alongside every stored embedding.
    fn model(&self) -> &str;

    /// Declared vector dimensionality. Every returned vector has this length.
    fn dims(&self) -> usize;

    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError>;

    /// Block until the service answers a probe request, or fail with
    /// [`EmbedError::ServiceUnavailable`] after the startup timeout.
    async fn wait_until_ready(&self) -> Result<(), EmbedError>;
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

/// Client for an Ollama-compatible embedding endpoint.
pub struct OllamaClient {
    endpoint: String,
    model: String,
    dims: usize,
    startup_timeout: Duration,
    client: reqwest::Client,
}

impl OllamaClient {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, EmbedError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EmbedError::Provider(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            dims: config.dims,
            startup_timeout: Duration::from_secs(config.startup_timeout_secs),
            client,
        })
    }

    fn embed_url(&self) -> String {
        format!("{}/api/embeddings", self.endpoint)
    }
}

#[async_trait]
impl Embedder for OllamaClient {
    fn model(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        if text.trim().is_empty() {
            return Err(EmbedError::InvalidInput("empty text".to_string()));
        }

        let body = serde_json::json!({
            "model": self.model,
            "prompt": text,
        });

        let resp = self
            .client
            .post(self.embed_url())
            .json(&body)
            .send()
            .await
            .map_err(|e| EmbedError::Transient(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            // Rate limiting and server errors are worth retrying; anything
            // else (unknown model, bad request) is not.
            if status.as_u16() == 429 || status.is_server_error() {
                return Err(EmbedError::Transient(format!("HTTP {status}: {detail}")));
            }
            return Err(EmbedError::Provider(format!("HTTP {status}: {detail}")));
        }

        let parsed: EmbeddingResponse = resp
            .json()
            .await
            .map_err(|e| EmbedError::Provider(format!("malformed response: {e}")))?;

        if parsed.embedding.len() != self.dims {
            return Err(EmbedError::DimensionMismatch {
                expected: self.dims,
                actual: parsed.embedding.len(),
            });
        }

        Ok(parsed.embedding)
    }

    async fn wait_until_ready(&self) -> Result<(), EmbedError> {
        let deadline = tokio::time::Instant::now() + self.startup_timeout;
        let mut last_err = String::new();

        loop {
            match self.embed("readiness probe").await {
                Ok(_) => return Ok(()),
                // A non-transient answer means the service is up but
                // misconfigured (unknown model, wrong dims) — waiting longer
                // will not fix it.
                Err(e) if !e.is_transient() => {
                    return Err(EmbedError::ServiceUnavailable(e.to_string()))
                }
                Err(e) => last_err = e.to_string(),
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(EmbedError::ServiceUnavailable(format!(
                    "no response within {}s: {last_err}",
                    self.startup_timeout.as_secs()
                )));
            }
            tokio::time::sleep(Duration::from_secs(2)).await;
        }
    }
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// Each `f32` is stored as 4 bytes in little-endian order, producing a BLOB
/// of `vec.len() × 4` bytes.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector. Reverses [`vec_to_blob`].
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`: `1.0` = identical direction, `0.0` =
/// orthogonal, `-1.0` = opposite. Returns `0.0` for empty vectors or vectors
/// of different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EmbeddingConfig;

    fn test_config() -> EmbeddingConfig {
        EmbeddingConfig {
            endpoint: "http://localhost:1".to_string(),
            model: "test-model".to_string(),
            dims: 4,
            timeout_secs: 1,
            startup_timeout_secs: 1,
        }
    }

    #[tokio::test]
    async fn empty_text_is_invalid_input_before_any_request() {
        // Endpoint is unreachable; the check must fire first.
        let client = OllamaClient::new(&test_config()).unwrap();
        let err = client.embed("   ").await.unwrap_err();
        assert!(matches!(err, EmbedError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_transient() {
        let client = OllamaClient::new(&test_config()).unwrap();
        let err = client.embed("some text").await.unwrap_err();
        assert!(err.is_transient(), "got: {err}");
    }

    #[test]
    fn only_transient_is_retryable() {
        assert!(EmbedError::Transient("x".into()).is_transient());
        assert!(!EmbedError::InvalidInput("x".into()).is_transient());
        assert!(!EmbedError::Provider("x".into()).is_transient());
        assert!(!EmbedError::ServiceUnavailable("x".into()).is_transient());
        assert!(!EmbedError::DimensionMismatch {
            expected: 4,
            actual: 3
        }
        .is_transient());
    }

    #[test]
    fn vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        let blob = vec_to_blob(&vec);
        assert_eq!(blob.len(), vec.len() * 4);
        assert_eq!(blob_to_vec(&blob), vec);
    }

    #[test]
    fn cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn cosine_opposite() {
        let a = vec![1.0, 0.0];
        let b = vec![-1.0, 0.0];
        assert!((cosine_similarity(&a, &b) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }
}
