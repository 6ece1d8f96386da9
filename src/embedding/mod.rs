//! Text-to-vector embedding pipeline.
//!
//! Provides the [`EmbeddingProvider`] trait plus two implementations: a remote
//! OpenAI-compatible `/embeddings` client and a local deterministic hashing
//! embedder that needs no network. The provider is created via
//! [`create_provider`] from configuration.

pub mod hashing;
pub mod openai;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::error::EmbeddingError;

/// Trait for embedding text into vectors.
///
/// Every vector a provider returns has exactly [`dimensions`](Self::dimensions)
/// entries. [`model_id`](Self::model_id) is the tag stored next to each fact so
/// vectors from different models are never compared.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text string into a vector.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Embed a batch of text strings. Implementations may override for batched requests.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    /// Identifier of the model that produced the vectors.
    fn model_id(&self) -> &str;

    /// Return the number of dimensions this provider produces.
    fn dimensions(&self) -> usize;
}

/// Create an embedding provider from config.
///
/// Supported providers: `"openai"` (any OpenAI-compatible endpoint) and
/// `"hashing"` (local, offline).
pub fn create_provider(
    config: &crate::config::EmbeddingConfig,
) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "openai" => {
            let provider = openai::OpenAiEmbeddingProvider::new(config)?;
            Ok(Arc::new(provider))
        }
        "hashing" => Ok(Arc::new(hashing::HashingEmbedder::new(config.dimensions)?)),
        other => anyhow::bail!("unknown embedding provider: {other}. Supported: openai, hashing"),
    }
}

/// Reject vectors whose length differs from what the provider promised.
pub(crate) fn check_dimensions(expected: usize, vector: &[f32]) -> Result<(), EmbeddingError> {
    if vector.is_empty() {
        return Err(EmbeddingError::Empty);
    }
    if vector.len() != expected {
        return Err(EmbeddingError::DimensionMismatch {
            expected,
            actual: vector.len(),
        });
    }
    Ok(())
}
