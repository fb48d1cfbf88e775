// crates/oracle-server/src/db/context.rs
// Context-tree storage: git-like branching history of Q/A pairs
//
// The head (`current_node_id`) of the single active tree per project is
// the conversational context for new queries. All mutations run inside a
// transaction on one pooled connection, which serializes concurrent
// appends to the same tree.

use crate::error::{OracleError, Result};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::{HashMap, HashSet};

/// One context tree
#[derive(Debug, Clone)]
pub struct TreeRow {
    pub id: String,
    pub project_id: String,
    pub label: Option<String>,
    pub root_node_id: Option<String>,
    pub current_node_id: Option<String>,
    pub node_count: i64,
    pub max_nodes: i64,
    pub is_active: bool,
    pub created_at: String,
}

/// One Q/A node in a tree
#[derive(Debug, Clone)]
pub struct ContextNodeRow {
    pub id: String,
    pub tree_id: String,
    pub parent_id: Option<String>,
    pub is_root: bool,
    pub question: String,
    pub answer: String,
    pub label: Option<String>,
    pub is_checkpoint: bool,
    pub created_at: String,
}

fn tree_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TreeRow> {
    Ok(TreeRow {
        id: row.get(0)?,
        project_id: row.get(1)?,
        label: row.get(2)?,
        root_node_id: row.get(3)?,
        current_node_id: row.get(4)?,
        node_count: row.get(5)?,
        max_nodes: row.get(6)?,
        is_active: row.get::<_, i64>(7)? != 0,
        created_at: row.get(8)?,
    })
}

fn node_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ContextNodeRow> {
    Ok(ContextNodeRow {
        id: row.get(0)?,
        tree_id: row.get(1)?,
        parent_id: row.get(2)?,
        is_root: row.get::<_, i64>(3)? != 0,
        question: row.get(4)?,
        answer: row.get(5)?,
        label: row.get(6)?,
        is_checkpoint: row.get::<_, i64>(7)? != 0,
        created_at: row.get(8)?,
    })
}

const TREE_COLUMNS: &str = "id, project_id, label, root_node_id, current_node_id, node_count, \
     max_nodes, is_active, created_at";
const NODE_COLUMNS: &str =
    "id, tree_id, parent_id, is_root, question, answer, label, is_checkpoint, created_at";

/// Create a tree with a placeholder root node (empty Q/A) as its head.
/// The new tree becomes active when the project has no active tree yet.
pub fn create_tree_sync(
    conn: &Connection,
    project_id: &str,
    label: Option<&str>,
    max_nodes: i64,
) -> Result<TreeRow> {
    let tx = conn.unchecked_transaction()?;
    let tree_id = uuid::Uuid::new_v4().to_string();
    let root_id = uuid::Uuid::new_v4().to_string();

    let has_active: bool = tx
        .query_row(
            "SELECT 1 FROM context_trees WHERE project_id = ?1 AND is_active = 1 LIMIT 1",
            params![project_id],
            |_| Ok(true),
        )
        .optional()?
        .unwrap_or(false);

    tx.execute(
        "INSERT INTO context_trees
             (id, project_id, label, root_node_id, current_node_id, node_count, max_nodes,
              is_active)
         VALUES (?1, ?2, ?3, ?4, ?4, 1, ?5, ?6)",
        params![tree_id, project_id, label, root_id, max_nodes, !has_active],
    )?;
    tx.execute(
        "INSERT INTO context_nodes (id, tree_id, parent_id, is_root, created_at)
         VALUES (?1, ?2, NULL, 1, ?3)",
        params![root_id, tree_id, Utc::now().to_rfc3339()],
    )?;
    tx.commit()?;
    require_tree_sync(conn, &tree_id)
}

pub fn get_tree_sync(conn: &Connection, tree_id: &str) -> Result<Option<TreeRow>> {
    let row = conn
        .query_row(
            &format!("SELECT {TREE_COLUMNS} FROM context_trees WHERE id = ?1"),
            params![tree_id],
            tree_from_row,
        )
        .optional()?;
    Ok(row)
}

pub fn require_tree_sync(conn: &Connection, tree_id: &str) -> Result<TreeRow> {
    get_tree_sync(conn, tree_id)?.ok_or_else(|| OracleError::NotFound(format!("tree {tree_id}")))
}

pub fn list_trees_sync(conn: &Connection, project_id: &str) -> Result<Vec<TreeRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {TREE_COLUMNS} FROM context_trees WHERE project_id = ?1 ORDER BY created_at"
    ))?;
    let rows = stmt
        .query_map(params![project_id], tree_from_row)?
        .filter_map(|r| r.ok())
        .collect();
    Ok(rows)
}

/// The single active tree for a project, if one exists
pub fn active_tree_sync(conn: &Connection, project_id: &str) -> Result<Option<TreeRow>> {
    let row = conn
        .query_row(
            &format!(
                "SELECT {TREE_COLUMNS} FROM context_trees
                 WHERE project_id = ?1 AND is_active = 1"
            ),
            params![project_id],
            tree_from_row,
        )
        .optional()?;
    Ok(row)
}

/// Make one tree active, deactivating its siblings atomically
pub fn set_active_sync(conn: &Connection, tree_id: &str) -> Result<()> {
    let tree = require_tree_sync(conn, tree_id)?;
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "UPDATE context_trees SET is_active = 0 WHERE project_id = ?1",
        params![tree.project_id],
    )?;
    tx.execute(
        "UPDATE context_trees SET is_active = 1 WHERE id = ?1",
        params![tree_id],
    )?;
    tx.commit()?;
    Ok(())
}

/// Delete a tree and all its nodes
pub fn delete_tree_sync(conn: &Connection, tree_id: &str) -> Result<()> {
    require_tree_sync(conn, tree_id)?;
    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM context_nodes WHERE tree_id = ?1", params![tree_id])?;
    tx.execute("DELETE FROM context_trees WHERE id = ?1", params![tree_id])?;
    tx.commit()?;
    Ok(())
}

pub fn get_node_sync(conn: &Connection, node_id: &str) -> Result<Option<ContextNodeRow>> {
    let row = conn
        .query_row(
            &format!("SELECT {NODE_COLUMNS} FROM context_nodes WHERE id = ?1"),
            params![node_id],
            node_from_row,
        )
        .optional()?;
    Ok(row)
}

pub fn require_node_sync(conn: &Connection, node_id: &str) -> Result<ContextNodeRow> {
    get_node_sync(conn, node_id)?.ok_or_else(|| OracleError::NotFound(format!("node {node_id}")))
}

/// Move the tree's head to an existing node. History is untouched;
/// subsequent answers branch from here. Returns the tree id.
pub fn checkout_sync(conn: &Connection, node_id: &str) -> Result<String> {
    let node = require_node_sync(conn, node_id)?;
    conn.execute(
        "UPDATE context_trees SET current_node_id = ?2 WHERE id = ?1",
        params![node.tree_id, node_id],
    )?;
    Ok(node.tree_id)
}

/// Annotate a node with a label. Purely descriptive; pruning ignores it.
pub fn label_node_sync(conn: &Connection, node_id: &str, label: Option<&str>) -> Result<()> {
    require_node_sync(conn, node_id)?;
    conn.execute(
        "UPDATE context_nodes SET label = ?2 WHERE id = ?1",
        params![node_id, label],
    )?;
    Ok(())
}

/// Mark or unmark a node as a checkpoint. Checkpoints survive pruning.
pub fn set_checkpoint_sync(conn: &Connection, node_id: &str, flag: bool) -> Result<()> {
    require_node_sync(conn, node_id)?;
    conn.execute(
        "UPDATE context_nodes SET is_checkpoint = ?2 WHERE id = ?1",
        params![node_id, flag],
    )?;
    Ok(())
}

/// Append a Q/A node under `parent_id` and advance the head to it.
///
/// Fails with Conflict when the tree is at its node budget; the caller
/// must prune first.
pub fn append_node_sync(
    conn: &Connection,
    tree_id: &str,
    parent_id: &str,
    question: &str,
    answer: &str,
) -> Result<ContextNodeRow> {
    let tx = conn.unchecked_transaction()?;
    let tree = require_tree_sync(&tx, tree_id)?;
    let parent = require_node_sync(&tx, parent_id)?;
    if parent.tree_id != tree_id {
        return Err(OracleError::InvalidArgument(format!(
            "node {parent_id} does not belong to tree {tree_id}"
        )));
    }
    if tree.node_count >= tree.max_nodes {
        return Err(OracleError::Conflict(format!(
            "tree {tree_id} is at its node limit ({}); prune before appending",
            tree.max_nodes
        )));
    }

    let node_id = uuid::Uuid::new_v4().to_string();
    let created_at = Utc::now().to_rfc3339();
    tx.execute(
        "INSERT INTO context_nodes (id, tree_id, parent_id, is_root, question, answer, created_at)
         VALUES (?1, ?2, ?3, 0, ?4, ?5, ?6)",
        params![node_id, tree_id, parent_id, question, answer, created_at],
    )?;
    tx.execute(
        "UPDATE context_trees SET node_count = node_count + 1, current_node_id = ?2
         WHERE id = ?1",
        params![tree_id, node_id],
    )?;
    tx.commit()?;

    Ok(ContextNodeRow {
        id: node_id,
        tree_id: tree_id.to_string(),
        parent_id: Some(parent_id.to_string()),
        is_root: false,
        question: question.to_string(),
        answer: answer.to_string(),
        label: None,
        is_checkpoint: false,
        created_at,
    })
}

/// Walk head -> root and reverse into chronological order, skipping the
/// root placeholder. Each element is one (question, answer) exchange.
pub fn conversation_path_sync(conn: &Connection, tree_id: &str) -> Result<Vec<ContextNodeRow>> {
    let tree = require_tree_sync(conn, tree_id)?;
    let mut path = Vec::new();
    let mut cursor = tree.current_node_id.clone();
    while let Some(node_id) = cursor {
        let node = require_node_sync(conn, &node_id)?;
        cursor = node.parent_id.clone();
        if !node.is_root {
            path.push(node);
        }
    }
    path.reverse();
    Ok(path)
}

/// Prune nodes that are neither on the head path, nor checkpoints, nor
/// among the `keep_recent` most recent, nor the root. Surviving orphans
/// are re-parented to their nearest surviving ancestor so the tree stays
/// connected. Returns the number of removed nodes.
pub fn prune_tree_sync(conn: &Connection, tree_id: &str, keep_recent: usize) -> Result<usize> {
    let tx = conn.unchecked_transaction()?;
    let tree = require_tree_sync(&tx, tree_id)?;

    let nodes: Vec<ContextNodeRow> = {
        let mut stmt = tx.prepare(&format!(
            "SELECT {NODE_COLUMNS} FROM context_nodes WHERE tree_id = ?1 ORDER BY rowid"
        ))?;
        let rows = stmt
            .query_map(params![tree_id], node_from_row)?
            .filter_map(|r| r.ok())
            .collect();
        rows
    };
    let parents: HashMap<String, Option<String>> = nodes
        .iter()
        .map(|n| (n.id.clone(), n.parent_id.clone()))
        .collect();

    let mut survivors: HashSet<String> = HashSet::new();
    // Head path
    let mut cursor = tree.current_node_id.clone();
    while let Some(id) = cursor {
        cursor = parents.get(&id).cloned().flatten();
        survivors.insert(id);
    }
    // Root, checkpoints, recency window
    if let Some(root) = &tree.root_node_id {
        survivors.insert(root.clone());
    }
    for node in &nodes {
        if node.is_checkpoint || node.is_root {
            survivors.insert(node.id.clone());
        }
    }
    for node in nodes.iter().rev().take(keep_recent) {
        survivors.insert(node.id.clone());
    }

    let doomed: Vec<&ContextNodeRow> =
        nodes.iter().filter(|n| !survivors.contains(&n.id)).collect();
    if doomed.is_empty() {
        tx.commit()?;
        return Ok(0);
    }

    // Re-parent each survivor whose parent is pruned to its nearest
    // surviving ancestor before deleting anything.
    for node in nodes.iter().filter(|n| survivors.contains(&n.id)) {
        let Some(parent_id) = &node.parent_id else {
            continue;
        };
        if survivors.contains(parent_id) {
            continue;
        }
        let mut ancestor = parents.get(parent_id).cloned().flatten();
        while let Some(candidate) = &ancestor {
            if survivors.contains(candidate) {
                break;
            }
            ancestor = parents.get(candidate).cloned().flatten();
        }
        tx.execute(
            "UPDATE context_nodes SET parent_id = ?2 WHERE id = ?1",
            params![node.id, ancestor],
        )?;
    }

    for node in &doomed {
        tx.execute("DELETE FROM context_nodes WHERE id = ?1", params![node.id])?;
    }
    tx.execute(
        "UPDATE context_trees SET node_count = node_count - ?2 WHERE id = ?1",
        params![tree_id, doomed.len() as i64],
    )?;
    tx.commit()?;
    Ok(doomed.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::run_migrations;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn
    }

    fn make_tree(conn: &Connection) -> TreeRow {
        create_tree_sync(conn, "p1", None, 256).unwrap()
    }

    #[test]
    fn test_create_tree_has_placeholder_root() {
        let conn = test_conn();
        let tree = make_tree(&conn);
        assert!(tree.is_active);
        assert_eq!(tree.node_count, 1);
        assert_eq!(tree.root_node_id, tree.current_node_id);

        let root = require_node_sync(&conn, tree.root_node_id.as_ref().unwrap()).unwrap();
        assert!(root.is_root);
        assert!(root.question.is_empty());
        assert!(root.answer.is_empty());
    }

    #[test]
    fn test_single_active_tree_per_project() {
        let conn = test_conn();
        let first = make_tree(&conn);
        let second = make_tree(&conn);
        assert!(!second.is_active);

        set_active_sync(&conn, &second.id).unwrap();
        assert!(!require_tree_sync(&conn, &first.id).unwrap().is_active);
        assert!(require_tree_sync(&conn, &second.id).unwrap().is_active);
        assert_eq!(active_tree_sync(&conn, "p1").unwrap().unwrap().id, second.id);
    }

    #[test]
    fn test_append_advances_head() {
        let conn = test_conn();
        let tree = make_tree(&conn);
        let root = tree.root_node_id.clone().unwrap();
        let n1 = append_node_sync(&conn, &tree.id, &root, "q1", "a1").unwrap();
        let n2 = append_node_sync(&conn, &tree.id, &n1.id, "q2", "a2").unwrap();

        let tree = require_tree_sync(&conn, &tree.id).unwrap();
        assert_eq!(tree.current_node_id.as_deref(), Some(n2.id.as_str()));
        assert_eq!(tree.node_count, 3);
    }

    #[test]
    fn test_append_enforces_node_budget() {
        let conn = test_conn();
        let tree = create_tree_sync(&conn, "p1", None, 2).unwrap();
        let root = tree.root_node_id.clone().unwrap();
        let n1 = append_node_sync(&conn, &tree.id, &root, "q1", "a1").unwrap();
        let err = append_node_sync(&conn, &tree.id, &n1.id, "q2", "a2").unwrap_err();
        assert_eq!(err.kind(), "conflict");
    }

    #[test]
    fn test_checkout_branches() {
        let conn = test_conn();
        let tree = make_tree(&conn);
        let root = tree.root_node_id.clone().unwrap();
        let n1 = append_node_sync(&conn, &tree.id, &root, "q1", "a1").unwrap();
        let n2 = append_node_sync(&conn, &tree.id, &n1.id, "q2", "a2").unwrap();

        checkout_sync(&conn, &n1.id).unwrap();
        let n3 = append_node_sync(&conn, &tree.id, &n1.id, "q3", "a3").unwrap();

        // n2 intact, n3 is a sibling of n2 under n1, head is n3
        assert!(get_node_sync(&conn, &n2.id).unwrap().is_some());
        assert_eq!(n3.parent_id.as_deref(), Some(n1.id.as_str()));
        let tree = require_tree_sync(&conn, &tree.id).unwrap();
        assert_eq!(tree.current_node_id.as_deref(), Some(n3.id.as_str()));
    }

    #[test]
    fn test_checkout_missing_node_fails() {
        let conn = test_conn();
        make_tree(&conn);
        let err = checkout_sync(&conn, "ghost").unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[test]
    fn test_conversation_path_skips_root() {
        let conn = test_conn();
        let tree = make_tree(&conn);
        let root = tree.root_node_id.clone().unwrap();
        let n1 = append_node_sync(&conn, &tree.id, &root, "q1", "a1").unwrap();
        append_node_sync(&conn, &tree.id, &n1.id, "q2", "a2").unwrap();

        let path = conversation_path_sync(&conn, &tree.id).unwrap();
        assert_eq!(path.len(), 2);
        assert_eq!(path[0].question, "q1");
        assert_eq!(path[1].question, "q2");
    }

    #[test]
    fn test_conversation_path_follows_checkout() {
        let conn = test_conn();
        let tree = make_tree(&conn);
        let root = tree.root_node_id.clone().unwrap();
        let n1 = append_node_sync(&conn, &tree.id, &root, "q1", "a1").unwrap();
        append_node_sync(&conn, &tree.id, &n1.id, "q2", "a2").unwrap();
        checkout_sync(&conn, &n1.id).unwrap();

        let path = conversation_path_sync(&conn, &tree.id).unwrap();
        assert_eq!(path.len(), 1);
        assert_eq!(path[0].question, "q1");
    }

    #[test]
    fn test_prune_preserves_checkpoints_and_reparents() {
        let conn = test_conn();
        let tree = make_tree(&conn);
        let root = tree.root_node_id.clone().unwrap();
        // Chain: root -> n1 -> n2 -> n3; side branch root -> s1 -> s2
        let n1 = append_node_sync(&conn, &tree.id, &root, "q1", "a1").unwrap();
        let n2 = append_node_sync(&conn, &tree.id, &n1.id, "q2", "a2").unwrap();
        let n3 = append_node_sync(&conn, &tree.id, &n2.id, "q3", "a3").unwrap();
        let s1 = append_node_sync(&conn, &tree.id, &root, "s1", "a").unwrap();
        let s2 = append_node_sync(&conn, &tree.id, &s1.id, "s2", "a").unwrap();
        set_checkpoint_sync(&conn, &s2.id, true).unwrap();
        // Put the head back on the main chain
        checkout_sync(&conn, &n3.id).unwrap();

        let pruned = prune_tree_sync(&conn, &tree.id, 0).unwrap();
        assert_eq!(pruned, 1); // only s1 goes

        // Checkpoint s2 survives, re-parented to the root
        let s2 = require_node_sync(&conn, &s2.id).unwrap();
        assert_eq!(s2.parent_id.as_deref(), Some(root.as_str()));
        // Head path survives untouched
        for id in [&n1.id, &n2.id, &n3.id] {
            assert!(get_node_sync(&conn, id).unwrap().is_some());
        }
        let tree = require_tree_sync(&conn, &tree.id).unwrap();
        assert_eq!(tree.node_count, 5);
    }

    #[test]
    fn test_prune_recency_window() {
        let conn = test_conn();
        let tree = make_tree(&conn);
        let root = tree.root_node_id.clone().unwrap();
        let n1 = append_node_sync(&conn, &tree.id, &root, "old", "a").unwrap();
        let recent = append_node_sync(&conn, &tree.id, &root, "recent", "a").unwrap();
        // Head on n1 so `recent` is off-path, kept only by the window
        checkout_sync(&conn, &n1.id).unwrap();

        let pruned = prune_tree_sync(&conn, &tree.id, 1).unwrap();
        assert_eq!(pruned, 0);
        assert!(get_node_sync(&conn, &recent.id).unwrap().is_some());

        let pruned = prune_tree_sync(&conn, &tree.id, 0).unwrap();
        assert_eq!(pruned, 1);
        assert!(get_node_sync(&conn, &recent.id).unwrap().is_none());
    }

    #[test]
    fn test_delete_tree_cascades_nodes() {
        let conn = test_conn();
        let tree = make_tree(&conn);
        let root = tree.root_node_id.clone().unwrap();
        append_node_sync(&conn, &tree.id, &root, "q", "a").unwrap();
        delete_tree_sync(&conn, &tree.id).unwrap();
        assert!(get_tree_sync(&conn, &tree.id).unwrap().is_none());
        assert!(get_node_sync(&conn, &root).unwrap().is_none());
    }

    #[test]
    fn test_label_is_annotative_only() {
        let conn = test_conn();
        let tree = make_tree(&conn);
        let root = tree.root_node_id.clone().unwrap();
        let n1 = append_node_sync(&conn, &tree.id, &root, "q", "a").unwrap();
        label_node_sync(&conn, &n1.id, Some("good branch")).unwrap();
        let node = require_node_sync(&conn, &n1.id).unwrap();
        assert_eq!(node.label.as_deref(), Some("good branch"));
        assert!(!node.is_checkpoint);
    }
}
