// crates/oracle-server/src/llm/openai_compat.rs
// Chat client for OpenAI-compatible Chat Completions endpoints
// (DeepSeek, OpenAI, local gateways). Streaming uses SSE.

use crate::error::{OracleError, Result};
use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::mpsc;

use super::provider::LlmClient;
use super::sse::SseDecoder;
use super::types::{ChatResult, FunctionCall, LlmEvent, Message, Tool, ToolCall, Usage};

/// HTTP timeout for non-streaming completions
const TIMEOUT_SECS: u64 = 120;

/// Event channel depth; backpressure beyond this suspends the decoder
const CHANNEL_CAPACITY: usize = 256;

pub struct OpenAiCompatClient {
    http_client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiCompatClient {
    pub fn new(base_url: String, api_key: String, model: String) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
        }
    }

    /// Override the model (per-query model selection)
    pub fn with_model(&self, model: String) -> Self {
        Self {
            http_client: self.http_client.clone(),
            base_url: self.base_url.clone(),
            api_key: self.api_key.clone(),
            model,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn request_body(&self, messages: &[Message], tools: &Option<Vec<Tool>>, stream: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "stream": stream,
        });
        if let Some(tools) = tools
            && !tools.is_empty()
        {
            body["tools"] = serde_json::to_value(tools).unwrap_or_default();
        }
        if stream {
            body["stream_options"] = serde_json::json!({"include_usage": true});
        }
        body
    }
}

// =======================================
// Wire format
// =======================================

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<CompletionChoice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    content: Option<String>,
    reasoning_content: Option<String>,
    tool_calls: Option<Vec<ToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ChatStreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    usage: Option<Usage>,
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    content: Option<String>,
    reasoning_content: Option<String>,
    tool_calls: Option<Vec<StreamToolCall>>,
}

#[derive(Debug, Deserialize)]
struct StreamToolCall {
    id: Option<String>,
    function: Option<StreamFunction>,
}

#[derive(Debug, Deserialize)]
struct StreamFunction {
    name: Option<String>,
    arguments: Option<String>,
}

/// Translate the SSE byte stream into LlmEvents.
///
/// Tool calls stream as an opening fragment carrying the id/name followed
/// by argument deltas; a new id or a finish_reason closes the open call.
async fn process_sse_stream(
    response: reqwest::Response,
    model: String,
    tx: mpsc::Sender<LlmEvent>,
) {
    let mut stream = response.bytes_stream();
    let mut decoder = SseDecoder::new();
    let mut open_tool_call: Option<String> = None;
    let mut usage: Option<Usage> = None;
    let mut model_used = model;

    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(c) => c,
            Err(e) => {
                let _ = tx.send(LlmEvent::Error(e.to_string())).await;
                return;
            }
        };

        for frame in decoder.push(&chunk) {
            if frame.is_done() {
                continue;
            }
            let parsed: Option<ChatStreamChunk> = frame.try_parse();
            let Some(parsed) = parsed else {
                continue;
            };

            if let Some(model) = parsed.model {
                model_used = model;
            }
            if let Some(u) = parsed.usage {
                usage = Some(u);
            }

            for choice in parsed.choices {
                let delta = choice.delta;

                if let Some(reasoning) = delta.reasoning_content
                    && !reasoning.is_empty()
                {
                    if tx.send(LlmEvent::ThinkingDelta(reasoning)).await.is_err() {
                        return; // receiver dropped: cancelled
                    }
                }

                if let Some(content) = delta.content
                    && !content.is_empty()
                {
                    if tx.send(LlmEvent::ContentDelta(content)).await.is_err() {
                        return;
                    }
                }

                if let Some(tool_calls) = delta.tool_calls {
                    for tc in tool_calls {
                        if let Some(id) = tc.id {
                            if let Some(open) = open_tool_call.take() {
                                let _ = tx.send(LlmEvent::ToolCallEnd { id: open }).await;
                            }
                            let name = tc
                                .function
                                .as_ref()
                                .and_then(|f| f.name.clone())
                                .unwrap_or_default();
                            if tx
                                .send(LlmEvent::ToolCallStart {
                                    id: id.clone(),
                                    name,
                                })
                                .await
                                .is_err()
                            {
                                return;
                            }
                            open_tool_call = Some(id);
                        }

                        if let Some(args) = tc.function.and_then(|f| f.arguments)
                            && !args.is_empty()
                            && let Some(id) = &open_tool_call
                        {
                            if tx
                                .send(LlmEvent::ToolCallArgumentsDelta {
                                    id: id.clone(),
                                    delta: args,
                                })
                                .await
                                .is_err()
                            {
                                return;
                            }
                        }
                    }
                }

                if choice.finish_reason.is_some()
                    && let Some(open) = open_tool_call.take()
                {
                    let _ = tx.send(LlmEvent::ToolCallEnd { id: open }).await;
                }
            }
        }
    }

    let _ = tx
        .send(LlmEvent::Done {
            model: model_used,
            usage,
        })
        .await;
}

#[async_trait]
impl LlmClient for OpenAiCompatClient {
    async fn chat(&self, messages: Vec<Message>, tools: Option<Vec<Tool>>) -> Result<ChatResult> {
        let body = self.request_body(&messages, &tools, false);
        let response = self
            .http_client
            .post(self.endpoint())
            .header("Authorization", format!("Bearer {}", self.api_key))
            .timeout(Duration::from_secs(TIMEOUT_SECS))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(OracleError::RateLimited {
                retry_after_ms: 1000,
            });
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(OracleError::Upstream(format!(
                "chat API error {status}: {text}"
            )));
        }

        let parsed: ChatCompletionResponse = response.json().await?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| OracleError::Upstream("empty chat response".to_string()))?;
        Ok(ChatResult {
            content: choice.message.content,
            reasoning_content: choice.message.reasoning_content,
            tool_calls: choice.message.tool_calls,
            usage: parsed.usage,
        })
    }

    async fn chat_stream(
        &self,
        messages: Vec<Message>,
        tools: Option<Vec<Tool>>,
    ) -> Result<mpsc::Receiver<LlmEvent>> {
        let body = self.request_body(&messages, &tools, true);
        let response = self
            .http_client
            .post(self.endpoint())
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(OracleError::RateLimited {
                retry_after_ms: 1000,
            });
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(OracleError::Upstream(format!(
                "chat API error {status}: {text}"
            )));
        }

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let model = self.model.clone();
        tokio::spawn(process_sse_stream(response, model, tx));
        Ok(rx)
    }

    fn model_name(&self) -> String {
        self.model.clone()
    }
}

/// Accumulate a completed tool call from its streamed fragments
#[derive(Debug, Default, Clone)]
pub struct ToolCallAccumulator {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

impl ToolCallAccumulator {
    pub fn into_tool_call(self) -> ToolCall {
        ToolCall {
            id: self.id,
            call_type: "function".into(),
            function: FunctionCall {
                name: self.name,
                arguments: self.arguments,
            },
        }
    }
}
