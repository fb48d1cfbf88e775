// crates/oracle-server/src/llm/provider.rs
// LLM provider abstraction layer

use crate::error::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{ChatResult, LlmEvent, Message, Tool};

/// Trait for chat-model clients - all providers must implement this.
///
/// `chat` is the request/response form used for internal work like thread
/// summarization; `chat_stream` powers the query event stream and carries
/// the tool-call protocol.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send a chat completion request and wait for the full result
    async fn chat(&self, messages: Vec<Message>, tools: Option<Vec<Tool>>) -> Result<ChatResult>;

    /// Start a streaming chat completion. Events arrive on the returned
    /// channel; the stream ends with exactly one `Done` or `Error`.
    /// Dropping the receiver cancels the underlying request.
    async fn chat_stream(
        &self,
        messages: Vec<Message>,
        tools: Option<Vec<Tool>>,
    ) -> Result<mpsc::Receiver<LlmEvent>>;

    /// Model identifier for events and logging
    fn model_name(&self) -> String;
}
