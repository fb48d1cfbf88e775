// crates/oracle-server/src/context/mod.rs
// Context-tree session state: async surface over the tree storage
//
// All mutations run as single transactions on the pool, which serializes
// concurrent appends within a tree; retry-on-contention covers the head
// advance at the end of a query.

use crate::config::ContextConfig;
use crate::db::pool::DatabasePool;
use crate::db::{self, ContextNodeRow, TreeRow};
use crate::error::Result;
use std::sync::Arc;

pub struct ContextStore {
    pool: Arc<DatabasePool>,
    config: ContextConfig,
}

impl ContextStore {
    pub fn new(pool: Arc<DatabasePool>, config: ContextConfig) -> Self {
        Self { pool, config }
    }

    pub async fn list_trees(&self, project_id: &str) -> Result<Vec<TreeRow>> {
        let project = project_id.to_string();
        self.pool
            .run(move |conn| db::list_trees_sync(conn, &project))
            .await
    }

    pub async fn get_tree(&self, tree_id: &str) -> Result<TreeRow> {
        let tree = tree_id.to_string();
        self.pool
            .run(move |conn| db::require_tree_sync(conn, &tree))
            .await
    }

    pub async fn create_tree(&self, project_id: &str, label: Option<&str>) -> Result<TreeRow> {
        let project = project_id.to_string();
        let label = label.map(str::to_string);
        let max_nodes = self.config.max_nodes;
        self.pool
            .run(move |conn| db::create_tree_sync(conn, &project, label.as_deref(), max_nodes))
            .await
    }

    pub async fn delete_tree(&self, tree_id: &str) -> Result<()> {
        let tree = tree_id.to_string();
        self.pool
            .run(move |conn| db::delete_tree_sync(conn, &tree))
            .await
    }

    pub async fn set_active(&self, tree_id: &str) -> Result<()> {
        let tree = tree_id.to_string();
        self.pool
            .run(move |conn| db::set_active_sync(conn, &tree))
            .await
    }

    /// Move the active head to an existing node; returns its tree id
    pub async fn checkout(&self, node_id: &str) -> Result<String> {
        let node = node_id.to_string();
        self.pool
            .run(move |conn| db::checkout_sync(conn, &node))
            .await
    }

    pub async fn label(&self, node_id: &str, text: Option<&str>) -> Result<()> {
        let node = node_id.to_string();
        let text = text.map(str::to_string);
        self.pool
            .run(move |conn| db::label_node_sync(conn, &node, text.as_deref()))
            .await
    }

    pub async fn set_checkpoint(&self, node_id: &str, flag: bool) -> Result<()> {
        let node = node_id.to_string();
        self.pool
            .run(move |conn| db::set_checkpoint_sync(conn, &node, flag))
            .await
    }

    pub async fn prune(&self, tree_id: &str) -> Result<usize> {
        let tree = tree_id.to_string();
        let keep_recent = self.config.prune_keep_recent;
        self.pool
            .run(move |conn| db::prune_tree_sync(conn, &tree, keep_recent))
            .await
    }

    pub async fn get_node(&self, node_id: &str) -> Result<ContextNodeRow> {
        let node = node_id.to_string();
        self.pool
            .run(move |conn| db::require_node_sync(conn, &node))
            .await
    }

    /// Append a Q/A pair under the given parent and advance the head
    pub async fn append(
        &self,
        tree_id: &str,
        parent_id: &str,
        question: &str,
        answer: &str,
    ) -> Result<ContextNodeRow> {
        let tree = tree_id.to_string();
        let parent = parent_id.to_string();
        let question = question.to_string();
        let answer = answer.to_string();
        self.pool
            .run_with_retry(move |conn| {
                db::append_node_sync(conn, &tree, &parent, &question, &answer)
            })
            .await
    }

    /// Root-to-head exchanges of a tree in chronological order
    pub async fn conversation_path(&self, tree_id: &str) -> Result<Vec<ContextNodeRow>> {
        let tree = tree_id.to_string();
        self.pool
            .run(move |conn| db::conversation_path_sync(conn, &tree))
            .await
    }

    /// The active tree for a project, creating one when none exists
    pub async fn resolve_active(&self, project_id: &str) -> Result<TreeRow> {
        let project = project_id.to_string();
        if let Some(tree) = self
            .pool
            .run(move |conn| db::active_tree_sync(conn, &project))
            .await?
        {
            return Ok(tree);
        }
        let tree = self.create_tree(project_id, None).await?;
        if !tree.is_active {
            self.set_active(&tree.id).await?;
            return self.get_tree(&tree.id).await;
        }
        Ok(tree)
    }
}
