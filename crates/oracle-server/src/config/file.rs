// crates/oracle-server/src/config/file.rs
// TOML configuration file loading. Loaded once at startup and injected;
// nothing reads configuration ambiently after construction.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Top-level configuration for the Oracle engine
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct OracleConfig {
    /// Directory holding the embedded database (default: ~/.oracle)
    pub data_dir: Option<PathBuf>,
    pub indexer: IndexerConfig,
    pub delta: DeltaConfig,
    pub retrieval: RetrievalConfig,
    pub embeddings: EmbeddingsConfig,
    pub llm: LlmConfig,
    pub context: ContextConfig,
}

/// Chunker limits
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    /// Files larger than this are truncated before parsing
    pub max_file_bytes: usize,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            max_file_bytes: 1024 * 1024,
        }
    }
}

/// Delta queue commit thresholds. Any one of them triggers a batch commit.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeltaConfig {
    pub max_pending_files: usize,
    pub max_pending_lines: u64,
    pub max_pending_age_secs: u64,
}

impl Default for DeltaConfig {
    fn default() -> Self {
        Self {
            max_pending_files: 5,
            max_pending_lines: 1000,
            max_pending_age_secs: 300,
        }
    }
}

/// Hybrid retrieval weights and budgets
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Rank-fusion weight for the keyword (BM25) path
    pub keyword_weight: f32,
    /// Rank-fusion weight for the vector path
    pub vector_weight: f32,
    /// Rank-fusion weight for the graph-neighbor path
    pub graph_weight: f32,
    /// Breadth-first hop bound for graph neighbors
    pub graph_hops: usize,
    /// Per-path candidate limit before fusion
    pub candidate_limit: usize,
    /// Token budget for the assembled context block
    pub token_budget: usize,
    /// Maximum notes returned by the note retriever
    pub note_limit: usize,
    /// Maximum threads returned by the thread retriever
    pub thread_limit: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            keyword_weight: 0.4,
            vector_weight: 0.4,
            graph_weight: 0.2,
            graph_hops: 2,
            candidate_limit: 20,
            token_budget: 6000,
            note_limit: 5,
            thread_limit: 3,
        }
    }
}

/// Embedding provider settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmbeddingsConfig {
    /// Vector dimensions produced by the model
    pub dimensions: usize,
    /// Texts per provider request
    pub batch_size: usize,
    /// Pause between consecutive batches
    pub inter_batch_delay_ms: u64,
    /// Texts longer than this are truncated before embedding
    pub max_text_chars: usize,
    /// Override the embedding model name
    pub model: Option<String>,
}

impl Default for EmbeddingsConfig {
    fn default() -> Self {
        Self {
            dimensions: 4096,
            batch_size: 64,
            inter_batch_delay_ms: 100,
            max_text_chars: 8000,
            model: None,
        }
    }
}

/// Chat model settings and tool-loop bounds
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Default chat model when the caller does not specify one
    pub model: String,
    /// OpenAI-compatible endpoint base URL
    pub base_url: String,
    /// Maximum tool-call rounds per query
    pub max_tool_rounds: usize,
    /// Wall-time limit per tool call
    pub tool_timeout_secs: u64,
    /// Wall-time limit per query (0 = unlimited)
    pub query_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "deepseek-chat".to_string(),
            base_url: "https://api.deepseek.com/v1".to_string(),
            max_tool_rounds: 8,
            tool_timeout_secs: 30,
            query_timeout_secs: 300,
        }
    }
}

/// Context-tree limits
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Hard cap on nodes per tree; appends beyond this require pruning
    pub max_nodes: i64,
    /// Pruning keeps this many most-recent nodes regardless of position
    pub prune_keep_recent: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_nodes: 256,
            prune_keep_recent: 10,
        }
    }
}

impl OracleConfig {
    /// Load configuration from a TOML file, falling back to defaults when
    /// the file is absent. A malformed file is an error, not a fallback.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config at {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("invalid config at {}", path.display()))
    }

    /// Resolve the data directory, defaulting to ~/.oracle
    pub fn resolve_data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".oracle")
        })
    }

    /// Path of the embedded database file
    pub fn db_path(&self) -> PathBuf {
        self.resolve_data_dir().join("oracle.db")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_thresholds() {
        let config = OracleConfig::default();
        assert_eq!(config.delta.max_pending_files, 5);
        assert_eq!(config.delta.max_pending_lines, 1000);
        assert_eq!(config.delta.max_pending_age_secs, 300);
        assert_eq!(config.retrieval.keyword_weight, 0.4);
        assert_eq!(config.retrieval.vector_weight, 0.4);
        assert_eq!(config.retrieval.graph_weight, 0.2);
        assert_eq!(config.embeddings.dimensions, 4096);
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let config = OracleConfig::load(Path::new("/nonexistent/oracle.toml")).unwrap();
        assert_eq!(config.llm.max_tool_rounds, 8);
    }

    #[test]
    fn test_partial_toml_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("oracle.toml");
        std::fs::write(&path, "[delta]\nmax_pending_files = 9\n").unwrap();
        let config = OracleConfig::load(&path).unwrap();
        assert_eq!(config.delta.max_pending_files, 9);
        assert_eq!(config.delta.max_pending_lines, 1000);
    }

    #[test]
    fn test_malformed_toml_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("oracle.toml");
        std::fs::write(&path, "delta = [not toml").unwrap();
        assert!(OracleConfig::load(&path).is_err());
    }
}
