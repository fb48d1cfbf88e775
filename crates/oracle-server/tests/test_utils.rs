//! Test utilities for Oracle integration tests

use async_trait::async_trait;
use oracle::Oracle;
use oracle::config::{ApiKeys, OracleConfig};
use oracle::db::pool::DatabasePool;
use oracle::embeddings::Embedder;
use oracle::error::Result;
use oracle::llm::{ChatResult, LlmClient, LlmEvent, Message, Tool};
use oracle::vault::{MemoryVault, Vault};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;
use tokio::sync::mpsc;

/// One scripted model turn for the mock
#[derive(Debug, Clone)]
pub enum MockTurn {
    /// Stream this answer as word-sized content deltas
    Answer(String),
    /// Emit one tool call, then finish the round
    ToolCall {
        id: String,
        name: String,
        arguments: String,
    },
    /// Fail the stream mid-flight
    Error(String),
}

/// Scripted LLM double. `chat` serves summaries; `chat_stream` serves
/// queries. Both record their inputs for assertions.
pub struct MockLlm {
    pub chat_calls: AtomicUsize,
    pub stream_calls: AtomicUsize,
    pub chat_prompts: Mutex<Vec<String>>,
    pub stream_messages: Mutex<Vec<Vec<Message>>>,
    script: Mutex<VecDeque<MockTurn>>,
}

impl MockLlm {
    pub fn new() -> Self {
        Self {
            chat_calls: AtomicUsize::new(0),
            stream_calls: AtomicUsize::new(0),
            chat_prompts: Mutex::new(Vec::new()),
            stream_messages: Mutex::new(Vec::new()),
            script: Mutex::new(VecDeque::new()),
        }
    }

    /// Queue the next streaming turn; unscripted turns answer with a
    /// fixed sentence.
    pub fn push_turn(&self, turn: MockTurn) {
        self.script.lock().unwrap().push_back(turn);
    }

    /// Messages sent on the given streaming call, flattened to text
    pub fn stream_prompt(&self, call: usize) -> String {
        self.stream_messages.lock().unwrap()[call]
            .iter()
            .filter_map(|m| m.content.clone())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl Default for MockLlm {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmClient for MockLlm {
    async fn chat(&self, messages: Vec<Message>, _tools: Option<Vec<Tool>>) -> Result<ChatResult> {
        self.chat_calls.fetch_add(1, Ordering::SeqCst);
        let prompt = messages
            .iter()
            .filter_map(|m| m.content.clone())
            .collect::<Vec<_>>()
            .join("\n");
        self.chat_prompts.lock().unwrap().push(prompt.clone());
        let head: String = prompt.chars().take(48).collect();
        Ok(ChatResult {
            content: Some(format!("summary of: {head}")),
            reasoning_content: None,
            tool_calls: None,
            usage: None,
        })
    }

    async fn chat_stream(
        &self,
        messages: Vec<Message>,
        _tools: Option<Vec<Tool>>,
    ) -> Result<mpsc::Receiver<LlmEvent>> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        self.stream_messages.lock().unwrap().push(messages);

        let turn = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| MockTurn::Answer("The auth module checks passwords.".into()));

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            match turn {
                MockTurn::Answer(answer) => {
                    let words: Vec<String> = answer
                        .split_inclusive(' ')
                        .map(|w| w.to_string())
                        .collect();
                    for word in words {
                        if tx.send(LlmEvent::ContentDelta(word)).await.is_err() {
                            return;
                        }
                    }
                    let _ = tx
                        .send(LlmEvent::Done {
                            model: "mock-model".into(),
                            usage: None,
                        })
                        .await;
                }
                MockTurn::ToolCall {
                    id,
                    name,
                    arguments,
                } => {
                    let _ = tx
                        .send(LlmEvent::ToolCallStart {
                            id: id.clone(),
                            name,
                        })
                        .await;
                    let _ = tx
                        .send(LlmEvent::ToolCallArgumentsDelta {
                            id: id.clone(),
                            delta: arguments,
                        })
                        .await;
                    let _ = tx.send(LlmEvent::ToolCallEnd { id }).await;
                    let _ = tx
                        .send(LlmEvent::Done {
                            model: "mock-model".into(),
                            usage: None,
                        })
                        .await;
                }
                MockTurn::Error(message) => {
                    let _ = tx.send(LlmEvent::Error(message)).await;
                }
            }
        });
        Ok(rx)
    }

    fn model_name(&self) -> String {
        "mock-model".into()
    }
}

/// Deterministic embedder: direction derived from character histogram,
/// so similar texts get similar vectors
pub struct MockEmbedder {
    pub calls: AtomicUsize,
}

impl MockEmbedder {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }

    fn vector(text: &str) -> Vec<f32> {
        let mut v = [0f32; 8];
        for (i, b) in text.bytes().enumerate() {
            v[(b as usize + i) % 8] += 1.0;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt().max(1e-6);
        v.iter().map(|x| x / norm).collect()
    }
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    fn dimensions(&self) -> usize {
        8
    }

    fn model_name(&self) -> String {
        "mock-embed".into()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Self::vector(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Option<Vec<f32>>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(Some(self.embed(text).await?));
        }
        Ok(out)
    }
}

/// A complete engine over an in-memory database and a temp project dir
pub struct TestHarness {
    pub oracle: Oracle,
    pub llm: Arc<MockLlm>,
    pub embedder: Option<Arc<MockEmbedder>>,
    pub vault: Arc<dyn Vault>,
    pub project_dir: TempDir,
}

pub const PROJECT: &str = "p1";

impl TestHarness {
    pub async fn new(with_embeddings: bool) -> Self {
        let pool = Arc::new(DatabasePool::open_in_memory().await.unwrap());
        let llm = Arc::new(MockLlm::new());
        let embedder = with_embeddings.then(|| Arc::new(MockEmbedder::new()));
        let vault: Arc<dyn Vault> = Arc::new(MemoryVault::new());
        let mut config = OracleConfig::default();
        config.llm.query_timeout_secs = 30;

        let oracle = Oracle::new(
            pool,
            llm.clone(),
            embedder
                .clone()
                .map(|e| e as Arc<dyn Embedder>),
            vault.clone(),
            ApiKeys::default(),
            config,
        );

        let project_dir = TempDir::new().unwrap();
        oracle
            .create_project(PROJECT, &project_dir.path().to_string_lossy())
            .await
            .unwrap();

        Self {
            oracle,
            llm,
            embedder,
            vault,
            project_dir,
        }
    }

    /// Write the three stock files and index them
    pub async fn with_stock_files(self) -> Self {
        self.write_file(
            "auth.py",
            "def login(user, password):\n    \"\"\"Handle user authentication and session login.\"\"\"\n    return verify_password(user, password)\n\ndef verify_password(user, password):\n    return hash_check(user, password)\n",
        );
        self.write_file(
            "db.py",
            "def connect(dsn):\n    \"\"\"Open a database connection pool.\"\"\"\n    return Pool(dsn)\n",
        );
        self.write_file(
            "main.py",
            "import auth\n\ndef main():\n    auth.login(\"admin\", \"secret\")\n",
        );
        self.oracle.sync(PROJECT, true, true).await.unwrap();
        self
    }

    pub fn write_file(&self, rel: &str, content: &str) {
        let path = self.project_dir.path().join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, content).unwrap();
    }

    pub fn remove_file(&self, rel: &str) {
        std::fs::remove_file(self.project_dir.path().join(rel)).unwrap();
    }
}

/// Assertion helper: the terminal event of a successful stream
pub fn expect_done(events: &[oracle::OracleEvent]) -> (String, String) {
    match events.last() {
        Some(oracle::OracleEvent::Done {
            model_used,
            context_id,
        }) => (model_used.clone(), context_id.clone()),
        other => panic!("expected Done as last event, got {other:?}"),
    }
}
