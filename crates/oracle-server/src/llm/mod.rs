// crates/oracle-server/src/llm/mod.rs
// Chat model clients and shared message/tool types

mod openai_compat;
mod provider;
mod sse;
mod types;

pub use openai_compat::{OpenAiCompatClient, ToolCallAccumulator};
pub use provider::LlmClient;
pub use sse::{SseDecoder, SseFrame};
pub use types::{
    ChatResult, FunctionCall, FunctionDef, LlmEvent, Message, Tool, ToolCall, Usage,
};

use crate::config::{ApiKeys, LlmConfig};
use std::sync::Arc;

/// Build the default chat client from configuration, or None when no
/// provider is reachable (queries then fail with a clear upstream error).
///
/// Priority: configured endpoint key > local Ollama (which speaks the
/// same wire protocol under /v1).
pub fn from_config(api_keys: &ApiKeys, config: &LlmConfig) -> Option<Arc<dyn LlmClient>> {
    if let Some(api_key) = api_keys.llm.clone() {
        return Some(Arc::new(OpenAiCompatClient::new(
            config.base_url.clone(),
            api_key,
            config.model.clone(),
        )));
    }
    if let Some(host) = api_keys.ollama.as_ref() {
        return Some(Arc::new(OpenAiCompatClient::new(
            format!("{}/v1", host.trim_end_matches('/')),
            "ollama".to_string(),
            config.model.clone(),
        )));
    }
    None
}
