// crates/oracle-server/src/config/mod.rs
// Configuration and shared constants

pub mod env;
pub mod file;
pub mod ignore;

pub use env::ApiKeys;
pub use file::{
    ContextConfig, DeltaConfig, EmbeddingsConfig, IndexerConfig, LlmConfig, OracleConfig,
    RetrievalConfig,
};
