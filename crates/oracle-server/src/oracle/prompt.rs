// crates/oracle-server/src/oracle/prompt.rs
// Prompt assembly: system preamble, conversation path, cited context

use crate::db::ContextNodeRow;
use crate::llm::Message;
use crate::search::RetrievedSnippet;

/// Fixed system preamble: tone, citation contract, tool inventory
pub const SYSTEM_PREAMBLE: &str = "You are Oracle, a project knowledge assistant. Answer \
questions about this software project using the context snippets provided below and the \
conversation so far.

Rules:
- Cite context snippets inline with their bracketed number, e.g. [2], whenever a claim \
comes from one.
- If the context does not contain the answer, say so; do not invent project details.
- Prefer concrete file paths, symbol names, and quotes over vague descriptions.

You may call tools to dig deeper before answering: read_file reads a slice of a source \
file, read_note and search_notes access the project's markdown notes, write_note saves a \
note, search_code re-queries the code index with narrower terms, thread_push appends to a \
discussion thread, and thread_read returns a thread summary with recent messages.";

/// Render ranked snippets as a numbered context block
pub fn render_context(snippets: &[RetrievedSnippet]) -> String {
    if snippets.is_empty() {
        return String::new();
    }
    let mut block = String::from("Context snippets:\n");
    for (idx, snippet) in snippets.iter().enumerate() {
        block.push_str(&format!(
            "\n[{}] ({} {}, score {:.2})\n{}\n",
            idx + 1,
            snippet.source,
            snippet.path,
            snippet.score,
            snippet.snippet
        ));
    }
    block
}

/// Assemble the full message list for the chat model:
/// system preamble + context, the root-to-head conversation, then the
/// user question.
pub fn build_messages(
    conversation: &[ContextNodeRow],
    snippets: &[RetrievedSnippet],
    question: &str,
) -> Vec<Message> {
    let mut messages = Vec::with_capacity(conversation.len() * 2 + 2);

    let context_block = render_context(snippets);
    let system = if context_block.is_empty() {
        SYSTEM_PREAMBLE.to_string()
    } else {
        format!("{SYSTEM_PREAMBLE}\n\n{context_block}")
    };
    messages.push(Message::system(system));

    for node in conversation {
        messages.push(Message::user(node.question.clone()));
        messages.push(Message::assistant(Some(node.answer.clone()), None));
    }

    messages.push(Message::user(question.to_string()));
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use oracle_types::SourceKind;

    fn node(question: &str, answer: &str) -> ContextNodeRow {
        ContextNodeRow {
            id: "n".into(),
            tree_id: "t".into(),
            parent_id: None,
            is_root: false,
            question: question.into(),
            answer: answer.into(),
            label: None,
            is_checkpoint: false,
            created_at: String::new(),
        }
    }

    fn snippet(path: &str) -> RetrievedSnippet {
        RetrievedSnippet {
            source: SourceKind::Code,
            path: path.into(),
            score: 0.8,
            snippet: format!("content of {path}"),
            full_text: String::new(),
        }
    }

    #[test]
    fn test_messages_order() {
        let conversation = vec![node("q1", "a1"), node("q2", "a2")];
        let snippets = vec![snippet("auth.py")];
        let messages = build_messages(&conversation, &snippets, "q3");

        assert_eq!(messages.len(), 6);
        assert_eq!(messages[0].role, "system");
        assert_eq!(messages[1].content.as_deref(), Some("q1"));
        assert_eq!(messages[2].role, "assistant");
        assert_eq!(messages[5].content.as_deref(), Some("q3"));
    }

    #[test]
    fn test_context_citation_numbers() {
        let block = render_context(&[snippet("a.py"), snippet("b.py")]);
        assert!(block.contains("[1] (code a.py"));
        assert!(block.contains("[2] (code b.py"));
    }

    #[test]
    fn test_empty_context_omitted() {
        let messages = build_messages(&[], &[], "q");
        assert!(!messages[0].content.as_deref().unwrap().contains("Context snippets"));
    }
}
