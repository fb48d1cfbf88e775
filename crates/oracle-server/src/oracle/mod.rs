// crates/oracle-server/src/oracle/mod.rs
// Query orchestration: retrieval fan-out, prompt assembly, streaming
// tool-call loop, and context-head advancement
//
// The orchestrator is the sole serializer of the outgoing event stream:
// every `source` event precedes any `content_delta`, and exactly one
// `done` or `error` terminates it. The context head advances only on
// success.

pub mod prompt;
pub mod tools;

use crate::config::{ApiKeys, OracleConfig};
use crate::context::ContextStore;
use crate::db::pool::DatabasePool;
use crate::db::{self, IndexStatus, ThreadNodeRow, ThreadRow, TreeRow};
use crate::delta::{CommitStats, DeltaQueue, DeltaStatus};
use crate::embeddings::Embedder;
use crate::error::{OracleError, Result};
use crate::llm::{LlmClient, LlmEvent, Message, OpenAiCompatClient, ToolCallAccumulator};
use crate::search::{self, RetrievedSnippet, Reranker};
use crate::threads::{self, SummaryManager, ThreadReadResult};
use crate::vault::Vault;
use oracle_types::{OracleEvent, SourceKind};
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Outgoing event channel depth
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// A query submitted by the caller
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub project_id: String,
    pub question: String,
    pub sources: Vec<SourceKind>,
    pub model: Option<String>,
    pub thinking: bool,
    pub context_id: Option<String>,
}

impl QueryRequest {
    pub fn new(project_id: impl Into<String>, question: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            question: question.into(),
            sources: vec![SourceKind::Code],
            model: None,
            thinking: false,
            context_id: None,
        }
    }

    pub fn with_sources(mut self, sources: Vec<SourceKind>) -> Self {
        self.sources = sources;
        self
    }

    pub fn with_context(mut self, context_id: impl Into<String>) -> Self {
        self.context_id = Some(context_id.into());
        self
    }
}

/// The live event stream of one query. Dropping the stream or calling
/// `cancel` aborts all in-flight work; cancellation is idempotent.
pub struct QueryStream {
    rx: mpsc::Receiver<OracleEvent>,
    cancel: CancellationToken,
}

impl QueryStream {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn next(&mut self) -> Option<OracleEvent> {
        self.rx.recv().await
    }

    /// Drain the stream to completion
    pub async fn collect(mut self) -> Vec<OracleEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.next().await {
            events.push(event);
        }
        events
    }
}

impl tokio_stream::Stream for QueryStream {
    type Item = OracleEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for QueryStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct OracleInner {
    pool: Arc<DatabasePool>,
    llm: Arc<dyn LlmClient>,
    embedder: Option<Arc<dyn Embedder>>,
    vault: Arc<dyn Vault>,
    delta: Arc<DeltaQueue>,
    context: ContextStore,
    summaries: Arc<SummaryManager>,
    reranker: Option<Arc<dyn Reranker>>,
    api_keys: ApiKeys,
    config: OracleConfig,
}

/// The engine facade: owns the component graph and exposes the streaming
/// query entry point plus the synchronous management operations.
#[derive(Clone)]
pub struct Oracle {
    inner: Arc<OracleInner>,
}

impl Oracle {
    pub fn new(
        pool: Arc<DatabasePool>,
        llm: Arc<dyn LlmClient>,
        embedder: Option<Arc<dyn Embedder>>,
        vault: Arc<dyn Vault>,
        api_keys: ApiKeys,
        config: OracleConfig,
    ) -> Self {
        let delta = Arc::new(DeltaQueue::new(
            pool.clone(),
            embedder.clone(),
            config.delta.clone(),
            config.indexer.clone(),
        ));
        let context = ContextStore::new(pool.clone(), config.context.clone());
        let summaries = Arc::new(SummaryManager::new(pool.clone(), llm.clone()));
        Self {
            inner: Arc::new(OracleInner {
                pool,
                llm,
                embedder,
                vault,
                delta,
                context,
                summaries,
                reranker: None,
                api_keys,
                config,
            }),
        }
    }

    /// Install a second-stage reranker (optional; fused scores are used
    /// directly without one)
    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        let inner = Arc::get_mut(&mut self.inner)
            .expect("with_reranker must be called before the engine is shared");
        inner.reranker = Some(reranker);
        self
    }

    pub fn pool(&self) -> &Arc<DatabasePool> {
        &self.inner.pool
    }

    pub fn embedder(&self) -> Option<&Arc<dyn Embedder>> {
        self.inner.embedder.as_ref()
    }

    pub fn vault(&self) -> &Arc<dyn Vault> {
        &self.inner.vault
    }

    pub fn config(&self) -> &OracleConfig {
        &self.inner.config
    }

    pub fn delta(&self) -> &Arc<DeltaQueue> {
        &self.inner.delta
    }

    pub fn context(&self) -> &ContextStore {
        &self.inner.context
    }

    pub fn summaries(&self) -> &Arc<SummaryManager> {
        &self.inner.summaries
    }

    // =======================================
    // Projects & index management
    // =======================================

    pub async fn create_project(&self, project_id: &str, root_path: &str) -> Result<()> {
        let project = project_id.to_string();
        let root = root_path.to_string();
        self.inner
            .pool
            .run(move |conn| db::create_project_sync(conn, &project, &root))
            .await
    }

    pub async fn project_root(&self, project_id: &str) -> Result<PathBuf> {
        let project = project_id.to_string();
        let row = self
            .inner
            .pool
            .run(move |conn| db::require_project_sync(conn, &project))
            .await?;
        Ok(PathBuf::from(row.root_path))
    }

    /// Chunk/file/embedding-coverage counts plus queue depth
    pub async fn index_status(&self, project_id: &str) -> Result<(IndexStatus, DeltaStatus)> {
        let project = project_id.to_string();
        let index = self
            .inner
            .pool
            .run(move |conn| db::index_status_sync(conn, &project))
            .await?;
        let queue = self.inner.delta.queue_status(project_id).await?;
        Ok((index, queue))
    }

    /// Management sync: optionally scan the tree for changes, then commit
    /// (forced, or only when thresholds are crossed)
    pub async fn sync(&self, project_id: &str, force: bool, scan: bool) -> Result<CommitStats> {
        if scan {
            self.inner.delta.scan(project_id).await?;
        }
        if force {
            self.inner.delta.commit(project_id).await
        } else {
            Ok(self
                .inner
                .delta
                .maybe_commit(project_id)
                .await?
                .unwrap_or_default())
        }
    }

    // =======================================
    // Threads
    // =======================================

    pub async fn thread_create(&self, project_id: &str, title: &str) -> Result<ThreadRow> {
        let project = project_id.to_string();
        let title = title.to_string();
        self.inner
            .pool
            .run(move |conn| db::create_thread_sync(conn, &project, &title))
            .await
    }

    /// Append-only write; no LLM or embedding work happens here
    pub async fn thread_push(
        &self,
        thread_id: &str,
        content: &str,
        author: &str,
    ) -> Result<ThreadNodeRow> {
        threads::push(&self.inner.pool, thread_id, content, author).await
    }

    /// Read a thread through the lazy-summary path
    pub async fn thread_read(&self, thread_id: &str) -> Result<ThreadReadResult> {
        threads::read(&self.inner.pool, &self.inner.summaries, thread_id).await
    }

    /// Find threads relevant to a query (vector search over nodes)
    pub async fn thread_seek(
        &self,
        project_id: &str,
        query: &str,
    ) -> Result<Vec<RetrievedSnippet>> {
        search::retrieve_threads(
            &self.inner.pool,
            self.inner.embedder.as_ref(),
            &self.inner.summaries,
            project_id,
            query,
            self.inner.config.retrieval.thread_limit,
        )
        .await
    }

    pub async fn thread_list(
        &self,
        project_id: &str,
        include_archived: bool,
    ) -> Result<Vec<ThreadRow>> {
        let project = project_id.to_string();
        self.inner
            .pool
            .run(move |conn| db::list_threads_sync(conn, &project, include_archived))
            .await
    }

    pub async fn thread_archive(&self, thread_id: &str) -> Result<()> {
        let thread = thread_id.to_string();
        self.inner
            .pool
            .run(move |conn| db::archive_thread_sync(conn, &thread))
            .await
    }

    // =======================================
    // Context trees (delegated to the store)
    // =======================================

    pub async fn list_trees(&self, project_id: &str) -> Result<Vec<TreeRow>> {
        self.inner.context.list_trees(project_id).await
    }

    pub async fn create_tree(&self, project_id: &str, label: Option<&str>) -> Result<TreeRow> {
        self.inner.context.create_tree(project_id, label).await
    }

    pub async fn delete_tree(&self, tree_id: &str) -> Result<()> {
        self.inner.context.delete_tree(tree_id).await
    }

    pub async fn set_active_tree(&self, tree_id: &str) -> Result<()> {
        self.inner.context.set_active(tree_id).await
    }

    pub async fn checkout(&self, node_id: &str) -> Result<String> {
        self.inner.context.checkout(node_id).await
    }

    pub async fn label_node(&self, node_id: &str, text: Option<&str>) -> Result<()> {
        self.inner.context.label(node_id, text).await
    }

    pub async fn set_checkpoint(&self, node_id: &str, flag: bool) -> Result<()> {
        self.inner.context.set_checkpoint(node_id, flag).await
    }

    pub async fn prune_tree(&self, tree_id: &str) -> Result<usize> {
        self.inner.context.prune(tree_id).await
    }

    // =======================================
    // The streaming query entry point
    // =======================================

    /// Answer a question over the enabled sources, streaming typed
    /// events. The returned stream owns a cancellation token; cancelling
    /// (or dropping the stream) aborts retrieval, the model stream, and
    /// any in-flight tool calls.
    pub fn query(&self, request: QueryRequest) -> QueryStream {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        let oracle = self.clone();
        let token = cancel.clone();

        tokio::spawn(async move {
            let timeout_secs = oracle.inner.config.llm.query_timeout_secs;
            let work = run_query(&oracle, &request, &tx);

            let outcome = tokio::select! {
                _ = token.cancelled() => Err(OracleError::Cancelled),
                result = async {
                    if timeout_secs > 0 {
                        match tokio::time::timeout(Duration::from_secs(timeout_secs), work).await {
                            Ok(result) => result,
                            Err(_) => Err(OracleError::Upstream(
                                "query wall-time limit exceeded".to_string(),
                            )),
                        }
                    } else {
                        work.await
                    }
                } => result,
            };

            match outcome {
                Ok((model_used, context_id)) => {
                    let _ = tx
                        .send(OracleEvent::Done {
                            model_used,
                            context_id,
                        })
                        .await;
                }
                Err(e) => {
                    let _ = tx
                        .send(OracleEvent::Error {
                            kind: e.kind().to_string(),
                            message: e.to_user_string(),
                        })
                        .await;
                }
            }
        });

        QueryStream { rx, cancel }
    }

    /// Client honoring a per-query model override when possible
    fn client_for(&self, model: Option<&str>) -> Arc<dyn LlmClient> {
        match model {
            Some(model) if model != self.inner.llm.model_name() => {
                if let Some(api_key) = self.inner.api_keys.llm.clone() {
                    Arc::new(OpenAiCompatClient::new(
                        self.inner.config.llm.base_url.clone(),
                        api_key,
                        model.to_string(),
                    ))
                } else {
                    tracing::warn!("model override {} unavailable, using default", model);
                    self.inner.llm.clone()
                }
            }
            _ => self.inner.llm.clone(),
        }
    }
}

async fn emit(tx: &mpsc::Sender<OracleEvent>, event: OracleEvent) {
    let _ = tx.send(event).await;
}

async fn status(tx: &mpsc::Sender<OracleEvent>, message: &str) {
    emit(
        tx,
        OracleEvent::Status {
            message: message.to_string(),
        },
    )
    .await;
}

/// The query body. Returns (model_used, new head node id) on success;
/// the caller translates the outcome into the terminal event.
async fn run_query(
    oracle: &Oracle,
    request: &QueryRequest,
    tx: &mpsc::Sender<OracleEvent>,
) -> Result<(String, String)> {
    let inner = &oracle.inner;
    let project_id = request.project_id.as_str();

    // 1. Resolve the context position
    let tree = match &request.context_id {
        Some(node_id) => {
            let tree_id = inner.context.checkout(node_id).await?;
            let tree = inner.context.get_tree(&tree_id).await?;
            if !tree.is_active {
                inner.context.set_active(&tree.id).await?;
            }
            inner.context.get_tree(&tree_id).await?
        }
        None => inner.context.resolve_active(project_id).await?,
    };
    let parent_id = tree
        .current_node_id
        .clone()
        .ok_or_else(|| OracleError::Internal(format!("tree {} has no head", tree.id)))?;

    // 2. Let the index catch up with writes relevant to this question
    if request.sources.contains(&SourceKind::Code)
        && let Err(e) = inner
            .delta
            .index_pending_for_query(project_id, &request.question)
            .await
    {
        tracing::warn!("just-in-time indexing failed: {}", e);
    }

    // 3. Retrieval fan-out over the enabled sources
    let mut snippets = retrieve_all(oracle, request, tx).await;
    if let Some(reranker) = &inner.reranker
        && let Err(e) = reranker.rerank(&request.question, &mut snippets).await
    {
        tracing::warn!("reranker failed, keeping fused order: {}", e);
    }
    let snippets = search::truncate_to_budget(snippets, inner.config.retrieval.token_budget);

    for snippet in &snippets {
        emit(
            tx,
            OracleEvent::Source {
                source_kind: snippet.source,
                path: snippet.path.clone(),
                score: snippet.score,
            },
        )
        .await;
    }

    // 4. Prompt assembly
    let conversation = inner.context.conversation_path(&tree.id).await?;
    let mut messages = prompt::build_messages(&conversation, &snippets, &request.question);

    // 5. Streamed completion with a bounded tool-call loop
    status(tx, "querying model").await;
    let client = oracle.client_for(request.model.as_deref());
    let tool_inventory = tools::inventory();
    let mut answer = String::new();
    let mut model_used = client.model_name();

    for round in 0..inner.config.llm.max_tool_rounds {
        let answer_before = answer.len();
        let round_result = match stream_one_round(
            &client,
            request,
            &messages,
            &tool_inventory,
            tx,
            &mut answer,
            &mut model_used,
        )
        .await
        {
            // A transport failure before any output is retried once
            Err(OracleError::Upstream(first)) if answer.len() == answer_before => {
                tracing::warn!("model stream failed before output, retrying once: {}", first);
                stream_one_round(
                    &client,
                    request,
                    &messages,
                    &tool_inventory,
                    tx,
                    &mut answer,
                    &mut model_used,
                )
                .await?
            }
            other => other?,
        };

        let Some(tool_calls) = round_result else {
            break; // no tool calls: the answer is complete
        };
        if round + 1 == inner.config.llm.max_tool_rounds {
            tracing::warn!("tool round limit reached, forcing final answer");
            break;
        }

        // Execute the batch and feed results back into the conversation
        let calls: Vec<_> = tool_calls
            .iter()
            .cloned()
            .map(ToolCallAccumulator::into_tool_call)
            .collect();
        messages.push(Message::assistant(None, Some(calls)));

        for call in tool_calls {
            emit(
                tx,
                OracleEvent::ToolCall {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    arguments: call.arguments.clone(),
                },
            )
            .await;

            let timeout = Duration::from_secs(inner.config.llm.tool_timeout_secs);
            let executed = tokio::time::timeout(
                timeout,
                tools::execute(oracle, &request.project_id, &call.name, &call.arguments),
            )
            .await;
            let payload = match executed {
                Ok(Ok(result)) => result,
                Ok(Err(e)) => {
                    serde_json::json!({ "error": e.to_user_string() }).to_string()
                }
                Err(_) => serde_json::json!({ "error": "tool call timed out" }).to_string(),
            };

            emit(
                tx,
                OracleEvent::ToolResult {
                    tool_call_id: call.id.clone(),
                    result: payload.clone(),
                },
            )
            .await;
            messages.push(Message::tool_result(call.id, payload));
        }
    }

    // 6. Success: advance the head
    let node = inner
        .context
        .append(&tree.id, &parent_id, &request.question, &answer)
        .await?;
    Ok((model_used, node.id))
}

/// One model round: stream events out, accumulate the answer, and return
/// the completed tool calls (None = final round).
#[allow(clippy::too_many_arguments)]
async fn stream_one_round(
    client: &Arc<dyn LlmClient>,
    request: &QueryRequest,
    messages: &[Message],
    tool_inventory: &[crate::llm::Tool],
    tx: &mpsc::Sender<OracleEvent>,
    answer: &mut String,
    model_used: &mut String,
) -> Result<Option<Vec<ToolCallAccumulator>>> {
    let mut rx = match client
        .chat_stream(messages.to_vec(), Some(tool_inventory.to_vec()))
        .await
    {
        Err(OracleError::RateLimited { retry_after_ms }) => {
            // One internal retry with the provider's hint
            tokio::time::sleep(Duration::from_millis(retry_after_ms)).await;
            client
                .chat_stream(messages.to_vec(), Some(tool_inventory.to_vec()))
                .await?
        }
        other => other?,
    };

    let mut open: Option<ToolCallAccumulator> = None;
    let mut completed: Vec<ToolCallAccumulator> = Vec::new();

    while let Some(event) = rx.recv().await {
        match event {
            LlmEvent::ThinkingDelta(content) => {
                if request.thinking {
                    emit(tx, OracleEvent::ThinkingDelta { content }).await;
                }
            }
            LlmEvent::ContentDelta(content) => {
                answer.push_str(&content);
                emit(tx, OracleEvent::ContentDelta { content }).await;
            }
            LlmEvent::ToolCallStart { id, name } => {
                if let Some(done) = open.take() {
                    completed.push(done);
                }
                open = Some(ToolCallAccumulator {
                    id,
                    name,
                    arguments: String::new(),
                });
            }
            LlmEvent::ToolCallArgumentsDelta { id, delta } => {
                if let Some(open) = open.as_mut()
                    && open.id == id
                {
                    open.arguments.push_str(&delta);
                }
            }
            LlmEvent::ToolCallEnd { id } => {
                if let Some(done) = open.take_if(|o| o.id == id) {
                    completed.push(done);
                }
            }
            LlmEvent::Done { model, .. } => {
                *model_used = model;
                if let Some(done) = open.take() {
                    completed.push(done);
                }
            }
            LlmEvent::Error(message) => {
                return Err(OracleError::Upstream(message));
            }
        }
    }

    if completed.is_empty() {
        Ok(None)
    } else {
        Ok(Some(completed))
    }
}

/// Run the enabled retrievers concurrently. A failing source degrades to
/// empty with a status notice; the remaining sources proceed.
async fn retrieve_all(
    oracle: &Oracle,
    request: &QueryRequest,
    tx: &mpsc::Sender<OracleEvent>,
) -> Vec<RetrievedSnippet> {
    let inner = &oracle.inner;
    let project_id = request.project_id.as_str();
    let question = request.question.as_str();

    let want = |kind: SourceKind| request.sources.contains(&kind);
    if want(SourceKind::Code) {
        status(tx, "searching code").await;
    }
    if want(SourceKind::Note) {
        status(tx, "searching notes").await;
    }
    if want(SourceKind::Thread) {
        status(tx, "searching threads").await;
    }

    let code_fut = async {
        if !want(SourceKind::Code) {
            return Ok(Vec::new());
        }
        search::retrieve_code(
            &inner.pool,
            inner.embedder.as_ref(),
            &inner.config.retrieval,
            project_id,
            question,
            inner.config.retrieval.candidate_limit,
        )
        .await
    };
    let notes_fut = async {
        if !want(SourceKind::Note) {
            return Ok(Vec::new());
        }
        search::retrieve_notes(
            &inner.vault,
            project_id,
            question,
            inner.config.retrieval.note_limit,
        )
        .await
    };
    let threads_fut = async {
        if !want(SourceKind::Thread) {
            return Ok(Vec::new());
        }
        search::retrieve_threads(
            &inner.pool,
            inner.embedder.as_ref(),
            &inner.summaries,
            project_id,
            question,
            inner.config.retrieval.thread_limit,
        )
        .await
    };

    let (code, notes, threads) = tokio::join!(code_fut, notes_fut, threads_fut);

    let mut snippets = Vec::new();
    for (label, outcome) in [("code", code), ("notes", notes), ("threads", threads)] {
        match outcome {
            Ok(mut items) => snippets.append(&mut items),
            Err(e) => {
                tracing::warn!("{} retrieval failed: {}", label, e);
                status(tx, &format!("{label} source unavailable")).await;
            }
        }
    }

    snippets.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.path.cmp(&b.path)));
    snippets
}
