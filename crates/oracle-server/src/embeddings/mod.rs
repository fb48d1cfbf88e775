// crates/oracle-server/src/embeddings/mod.rs
// Embedding provider module
//
// The engine holds an `Option<Arc<dyn Embedder>>`; `None` is the
// graceful-degradation state in which retrieval falls back to keyword
// paths only.

mod ollama;
mod openai;

pub use self::ollama::OllamaEmbeddings;
pub use self::openai::OpenAiEmbeddings;

use crate::config::{ApiKeys, EmbeddingsConfig};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

/// Asynchronous access to an external embedding model.
///
/// `embed_batch` preserves input order and maps per-item failures to
/// `None` at that index instead of failing the whole batch.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Vector dimensions produced by this model
    fn dimensions(&self) -> usize;

    /// Model name for display/logging
    fn model_name(&self) -> String;

    /// Embed a single text. Rate limits surface as
    /// `OracleError::RateLimited` after one internal retry.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed many texts: parallel within a batch, serialized across
    /// batches with the configured inter-batch delay.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Option<Vec<f32>>>>;
}

/// Select an embedding backend from configuration.
///
/// Priority: OpenAI-compatible endpoint (requires key) > Ollama (local,
/// no key needed) > None.
pub fn from_config(
    api_keys: &ApiKeys,
    config: &EmbeddingsConfig,
    http_client: reqwest::Client,
) -> Option<Arc<dyn Embedder>> {
    if let Some(api_key) = api_keys.embedding.as_ref() {
        let client = OpenAiEmbeddings::new(api_key.clone(), config.clone(), http_client);
        info!(
            model = %client.model_name(),
            dimensions = client.dimensions(),
            "using OpenAI-compatible embeddings"
        );
        return Some(Arc::new(client));
    }

    if let Some(host) = api_keys.ollama.as_ref() {
        let client = OllamaEmbeddings::new(host.clone(), config.clone());
        info!(
            model = %client.model_name(),
            dimensions = client.dimensions(),
            "using Ollama embeddings"
        );
        return Some(Arc::new(client));
    }

    None
}

/// Shared batching driver: fan out `embed` calls within each sub-batch,
/// pause between sub-batches, keep input order, and degrade per-item
/// failures to None.
pub(crate) async fn batched_embed<E: Embedder + ?Sized>(
    embedder: &E,
    texts: &[String],
    batch_size: usize,
    inter_batch_delay_ms: u64,
) -> Result<Vec<Option<Vec<f32>>>> {
    let mut results = Vec::with_capacity(texts.len());
    let mut first = true;
    for batch in texts.chunks(batch_size.max(1)) {
        if !first && inter_batch_delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(inter_batch_delay_ms)).await;
        }
        first = false;

        let futures: Vec<_> = batch.iter().map(|text| embedder.embed(text)).collect();
        for outcome in futures::future::join_all(futures).await {
            match outcome {
                Ok(vector) => results.push(Some(vector)),
                Err(e) => {
                    tracing::warn!("embedding failed for one item: {}", e);
                    results.push(None);
                }
            }
        }
    }
    Ok(results)
}
