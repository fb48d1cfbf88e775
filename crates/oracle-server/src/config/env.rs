// crates/oracle-server/src/config/env.rs
// Environment-based configuration - single source of truth for all env vars

use tracing::{debug, warn};

/// API keys loaded from environment variables
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    /// OpenAI-compatible chat endpoint key (ORACLE_LLM_API_KEY or OPENAI_API_KEY)
    pub llm: Option<String>,
    /// Embedding provider key (ORACLE_EMBEDDING_API_KEY or OPENAI_API_KEY)
    pub embedding: Option<String>,
    /// Ollama host for local models (OLLAMA_HOST)
    pub ollama: Option<String>,
}

impl ApiKeys {
    /// Load API keys from environment variables.
    ///
    /// Set `ORACLE_DISABLE_LLM=1` to suppress all keys (forces keyword-only
    /// retrieval and heuristic fallbacks).
    pub fn from_env() -> Self {
        if parse_bool_env("ORACLE_DISABLE_LLM").unwrap_or(false) {
            debug!("ORACLE_DISABLE_LLM is set - providers disabled, using fallbacks");
            return Self::default();
        }

        let llm = Self::read_key("ORACLE_LLM_API_KEY").or_else(|| Self::read_key("OPENAI_API_KEY"));
        let embedding = Self::read_key("ORACLE_EMBEDDING_API_KEY")
            .or_else(|| Self::read_key("OPENAI_API_KEY"));
        let ollama = Self::read_key("OLLAMA_HOST");

        let keys = Self {
            llm,
            embedding,
            ollama,
        };
        keys.log_status();
        keys
    }

    /// Read a single key from environment, filtering empty values
    fn read_key(name: &str) -> Option<String> {
        std::env::var(name).ok().filter(|k| !k.trim().is_empty())
    }

    /// Check if any chat provider is available
    pub fn has_llm_provider(&self) -> bool {
        self.llm.is_some() || self.ollama.is_some()
    }

    /// Check if embeddings are available
    pub fn has_embeddings(&self) -> bool {
        self.embedding.is_some() || self.ollama.is_some()
    }

    /// Log which keys are available (without exposing values)
    fn log_status(&self) {
        let mut available = Vec::new();
        if self.llm.is_some() {
            available.push("llm");
        }
        if self.embedding.is_some() {
            available.push("embedding");
        }
        if self.ollama.is_some() {
            available.push("ollama");
        }

        if available.is_empty() {
            warn!("no API keys configured - answers degrade to keyword retrieval only");
        } else {
            debug!(keys = ?available, "API keys loaded");
        }
    }
}

/// Parse a boolean environment variable ("1", "true", "yes" are truthy)
pub fn parse_bool_env(name: &str) -> Option<bool> {
    std::env::var(name)
        .ok()
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}
