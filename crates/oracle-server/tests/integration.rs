//! End-to-end tests for the Oracle engine
//!
//! Every scenario runs against an in-memory database, a temp project
//! directory, and scripted LLM/embedding doubles.

mod test_utils;

use oracle::db::ChangeType;
use oracle::{OracleEvent, QueryRequest, SourceKind};
use test_utils::{MockTurn, PROJECT, TestHarness, expect_done};

fn base_request(question: &str) -> QueryRequest {
    QueryRequest::new(PROJECT, question)
}

/// Index of the first event matching the predicate
fn position(events: &[OracleEvent], pred: impl Fn(&OracleEvent) -> bool) -> Option<usize> {
    events.iter().position(pred)
}

// ============================================================================
// E2E-1: first-time query on a fresh project
// ============================================================================

#[tokio::test]
async fn test_first_query_event_order_and_head() {
    let h = TestHarness::new(false).await.with_stock_files().await;

    let events = h
        .oracle
        .query(base_request("How does authentication work?"))
        .collect()
        .await;

    // status "searching code" comes first
    assert!(matches!(
        &events[0],
        OracleEvent::Status { message } if message == "searching code"
    ));

    // at least one code source event pointing at auth.py
    let auth_source = position(&events, |e| {
        matches!(e, OracleEvent::Source { source_kind, path, .. }
            if *source_kind == SourceKind::Code && path == "auth.py")
    });
    assert!(auth_source.is_some(), "no auth.py source event in {events:?}");

    // every source precedes any content delta
    let first_delta = position(&events, |e| matches!(e, OracleEvent::ContentDelta { .. }))
        .expect("no content deltas");
    let last_source = events
        .iter()
        .rposition(|e| matches!(e, OracleEvent::Source { .. }))
        .unwrap();
    assert!(last_source < first_delta);

    // done is last; head advanced to the emitted node
    let (model, context_id) = expect_done(&events);
    assert_eq!(model, "mock-model");

    let trees = h.oracle.list_trees(PROJECT).await.unwrap();
    assert_eq!(trees.len(), 1);
    assert!(trees[0].is_active);
    assert_eq!(trees[0].current_node_id.as_deref(), Some(context_id.as_str()));

    // the stored node carries the question and the concatenated deltas
    let node = h.oracle.context().get_node(&context_id).await.unwrap();
    assert_eq!(node.question, "How does authentication work?");
    let concatenated: String = events
        .iter()
        .filter_map(|e| match e {
            OracleEvent::ContentDelta { content } => Some(content.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(node.answer, concatenated);
    assert!(!node.answer.is_empty());
}

// ============================================================================
// E2E-2: conversation continuity
// ============================================================================

#[tokio::test]
async fn test_conversation_continuity() {
    let h = TestHarness::new(false).await.with_stock_files().await;

    let events = h
        .oracle
        .query(base_request("How does authentication work?"))
        .collect()
        .await;
    let (_, n1) = expect_done(&events);

    let events = h
        .oracle
        .query(base_request("What about token expiration?").with_context(n1.clone()))
        .collect()
        .await;
    let (_, n2) = expect_done(&events);

    // N2 is a child of N1 and the new head
    let node2 = h.oracle.context().get_node(&n2).await.unwrap();
    assert_eq!(node2.parent_id.as_deref(), Some(n1.as_str()));
    let tree = h.oracle.context().get_tree(&node2.tree_id).await.unwrap();
    assert_eq!(tree.current_node_id.as_deref(), Some(n2.as_str()));

    // the second prompt carried (Q1, A1) and Q2
    let prompt = h.llm.stream_prompt(1);
    assert!(prompt.contains("How does authentication work?"));
    assert!(prompt.contains("auth module checks passwords"));
    assert!(prompt.contains("What about token expiration?"));
}

// ============================================================================
// E2E-3: branching via checkout
// ============================================================================

#[tokio::test]
async fn test_branching_via_checkout() {
    let h = TestHarness::new(false).await.with_stock_files().await;

    let (_, n1) = expect_done(
        &h.oracle
            .query(base_request("How does authentication work?"))
            .collect()
            .await,
    );
    let (_, n2) = expect_done(
        &h.oracle
            .query(base_request("What about token expiration?"))
            .collect()
            .await,
    );

    h.oracle.checkout(&n1).await.unwrap();
    let (_, n3) = expect_done(
        &h.oracle
            .query(base_request("Alternative approach?"))
            .collect()
            .await,
    );

    let node2 = h.oracle.context().get_node(&n2).await.unwrap();
    let node3 = h.oracle.context().get_node(&n3).await.unwrap();
    assert_eq!(node3.parent_id.as_deref(), Some(n1.as_str()));
    assert_eq!(node2.parent_id.as_deref(), Some(n1.as_str()));
    assert_ne!(n2, n3);

    let tree = h.oracle.context().get_tree(&node3.tree_id).await.unwrap();
    assert_eq!(tree.current_node_id.as_deref(), Some(n3.as_str()));
}

// ============================================================================
// E2E-4: delta queue batch commit at the file threshold
// ============================================================================

#[tokio::test]
async fn test_delta_threshold_commit() {
    let h = TestHarness::new(false).await;

    for i in 0..4 {
        let name = format!("mod{i}.py");
        h.write_file(&name, &format!("def handler_{i}():\n    return {i}\n"));
        h.oracle
            .delta()
            .record_change(PROJECT, &h.project_dir.path().join(&name))
            .await
            .unwrap();
    }
    let status = h.oracle.delta().queue_status(PROJECT).await.unwrap();
    assert_eq!(status.queue.queued_files, 4);
    assert!(status.thresholds_hit.is_empty());

    // The fifth file crosses the threshold and triggers the commit
    h.write_file("mod4.py", "def handler_4():\n    return 4\n");
    h.oracle
        .delta()
        .record_change(PROJECT, &h.project_dir.path().join("mod4.py"))
        .await
        .unwrap();

    let status = h.oracle.delta().queue_status(PROJECT).await.unwrap();
    assert_eq!(status.queue.queued_files, 0);

    let (index, _) = h.oracle.index_status(PROJECT).await.unwrap();
    assert_eq!(index.file_count, 5);
    assert!(index.chunk_count >= 5);
}

#[tokio::test]
async fn test_delta_detects_modify_and_delete() {
    let h = TestHarness::new(false).await.with_stock_files().await;

    h.write_file("auth.py", "def login(user):\n    return True\n");
    let change = h
        .oracle
        .delta()
        .record_change(PROJECT, &h.project_dir.path().join("auth.py"))
        .await
        .unwrap();
    assert_eq!(change, Some(ChangeType::Modified));

    h.remove_file("db.py");
    let change = h
        .oracle
        .delta()
        .record_change(PROJECT, &h.project_dir.path().join("db.py"))
        .await
        .unwrap();
    assert_eq!(change, Some(ChangeType::Deleted));

    h.oracle.sync(PROJECT, true, false).await.unwrap();
    let (index, delta) = h.oracle.index_status(PROJECT).await.unwrap();
    assert_eq!(index.file_count, 2); // auth.py + main.py
    assert_eq!(delta.queue.queued_files, 0);
}

// ============================================================================
// E2E-5: lazy thread summaries
// ============================================================================

#[tokio::test]
async fn test_lazy_thread_summary_llm_accounting() {
    use std::sync::atomic::Ordering;

    let h = TestHarness::new(false).await;
    let thread = h.oracle.thread_create(PROJECT, "rate limiter").await.unwrap();

    for content in ["sliding window?", "token bucket is simpler", "agreed, bucket"] {
        h.oracle.thread_push(&thread.id, content, "user").await.unwrap();
    }
    // Pushing did zero LLM work
    assert_eq!(h.llm.chat_calls.load(Ordering::SeqCst), 0);

    // First read: exactly one summarization over all three nodes
    let read = h.oracle.thread_read(&thread.id).await.unwrap();
    assert!(read.summary.generated);
    assert_eq!(read.summary.node_count, 3);
    assert_eq!(h.llm.chat_calls.load(Ordering::SeqCst), 1);

    // Two more nodes, then one incremental call carrying only the tail
    h.oracle.thread_push(&thread.id, "what about bursts?", "user").await.unwrap();
    h.oracle.thread_push(&thread.id, "burst = bucket size", "user").await.unwrap();
    let read = h.oracle.thread_read(&thread.id).await.unwrap();
    assert_eq!(read.summary.node_count, 5);
    assert_eq!(h.llm.chat_calls.load(Ordering::SeqCst), 2);

    let prompts = h.llm.chat_prompts.lock().unwrap();
    assert!(prompts[1].contains("bursts"));
    assert!(!prompts[1].contains("sliding window"));
    drop(prompts);

    // Fresh cache: zero further calls
    h.oracle.thread_read(&thread.id).await.unwrap();
    assert_eq!(h.llm.chat_calls.load(Ordering::SeqCst), 2);
}

// ============================================================================
// E2E-6: graceful degradation without embeddings
// ============================================================================

#[tokio::test]
async fn test_keyword_only_degradation() {
    let h = TestHarness::new(false).await.with_stock_files().await;
    assert!(h.embedder.is_none());

    let events = h
        .oracle
        .query(base_request("database connection pool"))
        .collect()
        .await;

    assert!(
        events
            .iter()
            .any(|e| matches!(e, OracleEvent::Source { path, .. } if path == "db.py"))
    );
    expect_done(&events);
}

// ============================================================================
// Failure semantics
// ============================================================================

#[tokio::test]
async fn test_no_head_advance_on_llm_error() {
    let h = TestHarness::new(false).await.with_stock_files().await;

    let (_, n1) = expect_done(
        &h.oracle
            .query(base_request("How does authentication work?"))
            .collect()
            .await,
    );

    // The orchestrator retries one failed stream start, so fail twice
    h.llm.push_turn(MockTurn::Error("upstream exploded".into()));
    h.llm.push_turn(MockTurn::Error("upstream exploded".into()));
    let events = h.oracle.query(base_request("second question")).collect().await;
    match events.last() {
        Some(OracleEvent::Error { kind, .. }) => assert_eq!(kind, "upstream"),
        other => panic!("expected error event, got {other:?}"),
    }

    // Head unchanged, no node appended
    let trees = h.oracle.list_trees(PROJECT).await.unwrap();
    assert_eq!(trees[0].current_node_id.as_deref(), Some(n1.as_str()));
    assert_eq!(trees[0].node_count, 2); // root + n1
}

#[tokio::test]
async fn test_cancellation_emits_cancelled_and_preserves_head() {
    let h = TestHarness::new(false).await.with_stock_files().await;

    let mut stream = h.oracle.query(base_request("How does authentication work?"));
    stream.cancel();
    stream.cancel(); // idempotent

    let mut saw_terminal = None;
    while let Some(event) = stream.next().await {
        if event.is_terminal() {
            saw_terminal = Some(event);
        }
    }
    match saw_terminal {
        Some(OracleEvent::Error { kind, .. }) => assert_eq!(kind, "cancelled"),
        other => panic!("expected cancelled error, got {other:?}"),
    }

    // No node was appended: any tree that exists holds only its root
    for tree in h.oracle.list_trees(PROJECT).await.unwrap() {
        assert_eq!(tree.node_count, 1);
    }
}

// ============================================================================
// Tool-call loop
// ============================================================================

#[tokio::test]
async fn test_tool_call_roundtrip() {
    let h = TestHarness::new(false).await.with_stock_files().await;

    h.llm.push_turn(MockTurn::ToolCall {
        id: "call_1".into(),
        name: "read_file".into(),
        arguments: "{\"path\": \"auth.py\"}".into(),
    });
    h.llm
        .push_turn(MockTurn::Answer("login calls verify_password. [1]".into()));

    let events = h
        .oracle
        .query(base_request("What does login call?"))
        .collect()
        .await;

    let call_pos = position(&events, |e| {
        matches!(e, OracleEvent::ToolCall { name, .. } if name == "read_file")
    })
    .expect("no tool_call event");
    let result_pos = position(&events, |e| {
        matches!(e, OracleEvent::ToolResult { tool_call_id, result }
            if tool_call_id == "call_1" && result.contains("verify_password"))
    })
    .expect("no tool_result event");
    assert!(call_pos < result_pos);

    let (_, context_id) = expect_done(&events);
    let node = h.oracle.context().get_node(&context_id).await.unwrap();
    assert!(node.answer.contains("verify_password"));

    // Two model rounds: the tool round and the final answer
    assert_eq!(h.llm.stream_calls.load(std::sync::atomic::Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_unknown_tool_returns_error_payload() {
    let h = TestHarness::new(false).await.with_stock_files().await;

    h.llm.push_turn(MockTurn::ToolCall {
        id: "call_x".into(),
        name: "launch_missiles".into(),
        arguments: "{}".into(),
    });
    h.llm.push_turn(MockTurn::Answer("recovered".into()));

    let events = h.oracle.query(base_request("do something")).collect().await;

    let error_result = events.iter().any(|e| {
        matches!(e, OracleEvent::ToolResult { result, .. }
            if result.contains("error") && result.contains("unknown tool"))
    });
    assert!(error_result, "tool failure should surface as a tool_result payload");
    expect_done(&events);
}

// ============================================================================
// Multi-source retrieval
// ============================================================================

#[tokio::test]
async fn test_notes_and_threads_sources() {
    let h = TestHarness::new(true).await.with_stock_files().await;

    h.vault
        .write_note(
            PROJECT,
            "design/auth.md",
            "# Auth Design\nSessions use short-lived tokens with refresh rotation.",
            None,
            None,
        )
        .await
        .unwrap();

    let thread = h.oracle.thread_create(PROJECT, "token debate").await.unwrap();
    h.oracle
        .thread_push(&thread.id, "should tokens rotate on refresh?", "user")
        .await
        .unwrap();

    let events = h
        .oracle
        .query(
            base_request("How do session tokens work?").with_sources(vec![
                SourceKind::Code,
                SourceKind::Note,
                SourceKind::Thread,
            ]),
        )
        .collect()
        .await;

    assert!(events.iter().any(|e| {
        matches!(e, OracleEvent::Source { source_kind, path, .. }
            if *source_kind == SourceKind::Note && path == "design/auth.md")
    }));
    assert!(events.iter().any(|e| {
        matches!(e, OracleEvent::Source { source_kind, .. }
            if *source_kind == SourceKind::Thread)
    }));
    expect_done(&events);
}

#[tokio::test]
async fn test_jit_indexing_surfaces_pending_writes() {
    let h = TestHarness::new(false).await.with_stock_files().await;

    // A new file lands in the queue but below every commit threshold
    h.write_file(
        "ratelimit.py",
        "def throttle(key):\n    \"\"\"Token bucket rate limiting.\"\"\"\n    return bucket(key)\n",
    );
    h.oracle
        .delta()
        .record_change(PROJECT, &h.project_dir.path().join("ratelimit.py"))
        .await
        .unwrap();
    let status = h.oracle.delta().queue_status(PROJECT).await.unwrap();
    assert_eq!(status.queue.queued_files, 1);

    // The query mentions the pending file's content, so just-in-time
    // indexing picks it up before retrieval
    let events = h
        .oracle
        .query(base_request("how does ratelimit throttle work?"))
        .collect()
        .await;
    assert!(
        events
            .iter()
            .any(|e| matches!(e, OracleEvent::Source { path, .. } if path == "ratelimit.py")),
        "pending file should be visible to its own query"
    );
    expect_done(&events);
}
