// crates/oracle-server/src/embeddings/openai.rs
// OpenAI-compatible embeddings API client

use crate::config::EmbeddingsConfig;
use crate::error::{OracleError, Result};
use crate::utils::truncate_chars;
use async_trait::async_trait;
use std::time::Duration;

/// Default model when the config does not name one
const DEFAULT_MODEL: &str = "text-embedding-3-large";

/// HTTP timeout for a single embed request
const TIMEOUT_SECS: u64 = 30;

/// Fallback wait when a 429 carries no Retry-After header
const DEFAULT_RETRY_AFTER_MS: u64 = 1000;

const API_URL: &str = "https://api.openai.com/v1/embeddings";

/// Embeddings client for OpenAI-compatible endpoints
pub struct OpenAiEmbeddings {
    api_key: String,
    model: String,
    config: EmbeddingsConfig,
    http_client: reqwest::Client,
}

impl OpenAiEmbeddings {
    pub fn new(api_key: String, config: EmbeddingsConfig, http_client: reqwest::Client) -> Self {
        let model = config
            .model
            .clone()
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());
        Self {
            api_key,
            model,
            config,
            http_client,
        }
    }

    /// One embed request. Returns RateLimited on 429 so the caller can
    /// decide whether to retry.
    async fn embed_once(&self, text: &str) -> Result<Vec<f32>> {
        let text = truncate_chars(text, self.config.max_text_chars);
        let body = serde_json::json!({
            "model": self.model,
            "input": text,
            "dimensions": self.config.dimensions,
        });

        let response = self
            .http_client
            .post(API_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .timeout(Duration::from_secs(TIMEOUT_SECS))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after_ms = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|secs| secs * 1000)
                .unwrap_or(DEFAULT_RETRY_AFTER_MS);
            return Err(OracleError::RateLimited { retry_after_ms });
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(OracleError::Upstream(format!(
                "embedding API error {status}: {text}"
            )));
        }

        let json: serde_json::Value = response.json().await?;
        let values = json["data"]
            .as_array()
            .and_then(|data| data.first())
            .and_then(|first| first["embedding"].as_array())
            .ok_or_else(|| OracleError::Upstream("invalid embedding response".to_string()))?;

        let embedding: Vec<f32> = values
            .iter()
            .filter_map(|v| v.as_f64().map(|f| f as f32))
            .collect();
        if embedding.len() != self.config.dimensions {
            return Err(OracleError::Upstream(format!(
                "expected {} dimensions, got {}",
                self.config.dimensions,
                embedding.len()
            )));
        }
        Ok(embedding)
    }
}

#[async_trait]
impl super::Embedder for OpenAiEmbeddings {
    fn dimensions(&self) -> usize {
        self.config.dimensions
    }

    fn model_name(&self) -> String {
        self.model.clone()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        match self.embed_once(text).await {
            Err(OracleError::RateLimited { retry_after_ms }) => {
                // One internal retry honoring the provider's hint; a
                // second limit surfaces to the caller.
                tracing::debug!("rate limited, retrying in {}ms", retry_after_ms);
                tokio::time::sleep(Duration::from_millis(retry_after_ms)).await;
                self.embed_once(text).await
            }
            other => other,
        }
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
    fn test_model_defaults_and_override() {
        let client = OpenAiEmbeddings::new(
            "sk-test".into(),
            EmbeddingsConfig::default(),
            reqwest::Client::new(),
        );
        assert_eq!(client.model, DEFAULT_MODEL);

        let config = EmbeddingsConfig {
            model: Some("custom-embed".into()),
            ..Default::default()
        };
        let client = OpenAiEmbeddings::new("sk-test".into(), config, reqwest::Client::new());
        assert_eq!(client.model, "custom-embed");
    }
}
