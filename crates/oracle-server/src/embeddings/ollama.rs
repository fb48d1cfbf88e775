// crates/oracle-server/src/embeddings/ollama.rs
// Ollama local embeddings client

use crate::config::EmbeddingsConfig;
use crate::error::{OracleError, Result};
use crate::utils::truncate_chars;
use async_trait::async_trait;
use std::time::Duration;

/// Default local embedding model
const DEFAULT_MODEL: &str = "nomic-embed-text";

/// Local models can be slow on first load
const TIMEOUT_SECS: u64 = 120;

/// Embeddings via a local Ollama instance. No API key, no rate limits;
/// failures are upstream errors.
pub struct OllamaEmbeddings {
    host: String,
    model: String,
    config: EmbeddingsConfig,
    http_client: reqwest::Client,
}

impl OllamaEmbeddings {
    pub fn new(host: String, config: EmbeddingsConfig) -> Self {
        let model = config
            .model
            .clone()
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(TIMEOUT_SECS))
            .build()
            .unwrap_or_default();
        Self {
            host: host.trim_end_matches('/').to_string(),
            model,
            config,
            http_client,
        }
    }
}

#[async_trait]
impl super::Embedder for OllamaEmbeddings {
    fn dimensions(&self) -> usize {
        self.config.dimensions
    }

    fn model_name(&self) -> String {
        self.model.clone()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let text = truncate_chars(text, self.config.max_text_chars);
        let body = serde_json::json!({
            "model": self.model,
            "prompt": text,
        });

        let response = self
            .http_client
            .post(format!("{}/api/embeddings", self.host))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(OracleError::Upstream(format!(
                "ollama error {status}: {text}"
            )));
        }

        let json: serde_json::Value = response.json().await?;
        let values = json["embedding"]
            .as_array()
            .ok_or_else(|| OracleError::Upstream("invalid ollama response".to_string()))?;
        Ok(values
            .iter()
            .filter_map(|v| v.as_f64().map(|f| f as f32))
            .collect())
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Option<Vec<f32>>>> {
        super::batched_embed(
            self,
            texts,
            self.config.batch_size,
            self.config.inter_batch_delay_ms,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_trailing_slash_normalized() {
        let client = OllamaEmbeddings::new(
            "http://localhost:11434/".into(),
            EmbeddingsConfig::default(),
        );
        assert_eq!(client.host, "http://localhost:11434");
    }
}
