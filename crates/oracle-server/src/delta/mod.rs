// crates/oracle-server/src/delta/mod.rs
// Delta commit queue: change detection, coalescing, threshold commits
//
// Producers enqueue under the storage layer's coalescing rules; the
// consumer (a commit) drains atomically by claiming pending rows.
// Commits serialize per project behind an async mutex; different
// projects commit concurrently.

pub mod commit;
pub mod watcher;

use crate::config::{DeltaConfig, IndexerConfig, ignore};
use crate::db::pool::DatabasePool;
use crate::db::{self, ChangeType, QueueStatus};
use crate::embeddings::Embedder;
use crate::error::{OracleError, Result};
use crate::utils::content_hash;
use nucleo_matcher::pattern::{CaseMatching, Normalization, Pattern};
use nucleo_matcher::{Config, Matcher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use walkdir::WalkDir;

/// Bytes of file head inspected by the just-in-time relevance check
const JIT_CONTENT_HEAD: usize = 4096;

pub use commit::CommitStats;

/// Queue status plus which thresholds are currently crossed
#[derive(Debug, Clone)]
pub struct DeltaStatus {
    pub queue: QueueStatus,
    pub thresholds_hit: Vec<&'static str>,
}

pub struct DeltaQueue {
    pool: Arc<DatabasePool>,
    embedder: Option<Arc<dyn Embedder>>,
    config: DeltaConfig,
    indexer_config: IndexerConfig,
    /// Per-project commit serialization
    commit_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl DeltaQueue {
    pub fn new(
        pool: Arc<DatabasePool>,
        embedder: Option<Arc<dyn Embedder>>,
        config: DeltaConfig,
        indexer_config: IndexerConfig,
    ) -> Self {
        Self {
            pool,
            embedder,
            config,
            indexer_config,
            commit_locks: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn pool(&self) -> &Arc<DatabasePool> {
        &self.pool
    }

    pub(crate) fn embedder(&self) -> Option<&Arc<dyn Embedder>> {
        self.embedder.as_ref()
    }

    pub(crate) fn indexer_config(&self) -> &IndexerConfig {
        &self.indexer_config
    }

    async fn commit_lock(&self, project_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.commit_locks.lock().await;
        locks
            .entry(project_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Root path of a registered project
    async fn project_root(&self, project_id: &str) -> Result<PathBuf> {
        let project = project_id.to_string();
        let row = self
            .pool
            .run(move |conn| db::require_project_sync(conn, &project))
            .await?;
        Ok(PathBuf::from(row.root_path))
    }

    /// Compare the file on disk against the recorded state.
    /// Returns None when nothing changed.
    pub async fn detect(&self, project_id: &str, file_path: &Path) -> Result<Option<ChangeType>> {
        let root = self.project_root(project_id).await?;
        let rel = relativize(&root, file_path)?;
        let current = read_file_hash(&root.join(&rel));
        let project = project_id.to_string();
        let rel_clone = rel.clone();
        let recorded = self
            .pool
            .run(move |conn| db::file_hash_sync(conn, &project, &rel_clone))
            .await?;

        Ok(match (recorded, current) {
            (Some(_), None) => Some(ChangeType::Deleted),
            (None, Some(_)) => Some(ChangeType::Added),
            (Some(old), Some(new)) if old != new => Some(ChangeType::Modified),
            _ => None,
        })
    }

    /// Register a file-system change: detect, enqueue with coalescing,
    /// then commit if any threshold is crossed. Returns the detected
    /// change, if any.
    pub async fn record_change(
        &self,
        project_id: &str,
        file_path: &Path,
    ) -> Result<Option<ChangeType>> {
        let Some(change) = self.detect(project_id, file_path).await? else {
            return Ok(None);
        };

        let root = self.project_root(project_id).await?;
        let rel = relativize(&root, file_path)?;
        let abs = root.join(&rel);
        let (new_hash, lines) = match std::fs::read_to_string(&abs) {
            Ok(content) => (Some(content_hash(&content)), content.lines().count() as i64),
            Err(_) => (None, 0),
        };
        let project = project_id.to_string();
        let rel_clone = rel.clone();
        let old_project = project_id.to_string();
        let old_rel = rel.clone();
        let old_hash = self
            .pool
            .run(move |conn| db::file_hash_sync(conn, &old_project, &old_rel))
            .await?;

        self.pool
            .run(move |conn| {
                db::enqueue_change_sync(
                    conn,
                    &project,
                    &rel_clone,
                    change,
                    old_hash.as_deref(),
                    new_hash.as_deref(),
                    lines,
                )
            })
            .await?;

        self.maybe_commit(project_id).await?;
        Ok(Some(change))
    }

    /// Walk the project tree and enqueue every detected change,
    /// including deletions of previously indexed files. Returns the
    /// number of enqueued changes.
    pub async fn scan(&self, project_id: &str) -> Result<usize> {
        let root = self.project_root(project_id).await?;
        let project = project_id.to_string();
        let known = self
            .pool
            .run(move |conn| db::file_states_sync(conn, &project))
            .await?;
        let known: HashMap<String, String> = known.into_iter().collect();

        let mut enqueued = 0usize;
        let mut seen: Vec<String> = Vec::new();
        for entry in WalkDir::new(&root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| {
                let name = e.file_name().to_string_lossy();
                e.depth() == 0 || !ignore::should_skip(&name)
            })
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let Ok(rel) = relativize(&root, entry.path()) else {
                continue;
            };
            seen.push(rel.clone());
            if self.record_change(project_id, entry.path()).await?.is_some() {
                enqueued += 1;
            }
        }

        // Files with recorded state that no longer exist on disk
        for rel in known.keys() {
            if !seen.contains(rel)
                && self
                    .record_change(project_id, &root.join(rel))
                    .await?
                    .is_some()
            {
                enqueued += 1;
            }
        }

        Ok(enqueued)
    }

    /// Names of thresholds currently crossed
    fn thresholds_hit(&self, status: &QueueStatus) -> Vec<&'static str> {
        let mut hit = Vec::new();
        if status.queued_files >= self.config.max_pending_files {
            hit.push("pending_files");
        }
        if status.total_lines as u64 >= self.config.max_pending_lines {
            hit.push("cumulative_lines");
        }
        if status
            .oldest_age_secs
            .is_some_and(|age| age as u64 >= self.config.max_pending_age_secs)
        {
            hit.push("oldest_age");
        }
        hit
    }

    /// Commit when any threshold is crossed
    pub async fn maybe_commit(&self, project_id: &str) -> Result<Option<CommitStats>> {
        let status = self.queue_status(project_id).await?;
        if self.thresholds_hit(&status.queue).is_empty() {
            return Ok(None);
        }
        Ok(Some(self.commit(project_id).await?))
    }

    /// Drain and index all pending entries for a project
    pub async fn commit(&self, project_id: &str) -> Result<CommitStats> {
        let lock = self.commit_lock(project_id).await;
        let _guard = lock.lock().await;
        let root = self.project_root(project_id).await?;
        let project = project_id.to_string();
        let entries = self
            .pool
            .run(move |conn| db::claim_pending_sync(conn, &project, None))
            .await?;
        commit::process_entries(self, project_id, &root, entries).await
    }

    /// Just-in-time indexing: commit only the pending entries that look
    /// textually relevant to the query, so a read can see its own recent
    /// writes without full-commit latency.
    pub async fn index_pending_for_query(
        &self,
        project_id: &str,
        query: &str,
    ) -> Result<Option<CommitStats>> {
        let project = project_id.to_string();
        let pending = self
            .pool
            .run(move |conn| db::pending_entries_sync(conn, &project))
            .await?;
        if pending.is_empty() {
            return Ok(None);
        }

        let root = self.project_root(project_id).await?;
        let relevant: Vec<String> = pending
            .iter()
            .filter(|entry| {
                let head = read_head(&root.join(&entry.file_path), JIT_CONTENT_HEAD);
                query_matches_file(query, &entry.file_path, head.as_deref())
            })
            .map(|entry| entry.id.clone())
            .collect();
        if relevant.is_empty() {
            return Ok(None);
        }

        let lock = self.commit_lock(project_id).await;
        let _guard = lock.lock().await;
        let project = project_id.to_string();
        let entries = self
            .pool
            .run(move |conn| db::claim_pending_sync(conn, &project, Some(&relevant)))
            .await?;
        if entries.is_empty() {
            return Ok(None);
        }
        tracing::debug!(
            "just-in-time indexing {} pending files for query",
            entries.len()
        );
        Ok(Some(
            commit::process_entries(self, project_id, &root, entries).await?,
        ))
    }

    /// Queue status with threshold report, for operational tooling
    pub async fn queue_status(&self, project_id: &str) -> Result<DeltaStatus> {
        let project = project_id.to_string();
        let queue = self
            .pool
            .run(move |conn| db::queue_status_sync(conn, &project))
            .await?;
        let thresholds_hit = self.thresholds_hit(&queue);
        Ok(DeltaStatus {
            queue,
            thresholds_hit,
        })
    }
}

/// Path relative to the project root; absolute paths outside the root
/// are invalid input
fn relativize(root: &Path, file_path: &Path) -> Result<String> {
    let rel = if file_path.is_absolute() {
        file_path
            .strip_prefix(root)
            .map_err(|_| {
                OracleError::InvalidArgument(format!(
                    "{} is outside the project root",
                    file_path.display()
                ))
            })?
            .to_path_buf()
    } else {
        file_path.to_path_buf()
    };
    Ok(rel.to_string_lossy().replace('\\', "/"))
}

fn read_file_hash(path: &Path) -> Option<String> {
    std::fs::read_to_string(path).ok().map(|c| content_hash(&c))
}

fn read_head(path: &Path, limit: usize) -> Option<String> {
    let content = std::fs::read_to_string(path).ok()?;
    Some(crate::utils::truncate_chars(&content, limit).to_string())
}

/// Relevance heuristic for just-in-time indexing: fuzzy path match or
/// keyword overlap with the file head. A deliberate approximation - the
/// batch commit catches anything it misses.
fn query_matches_file(query: &str, file_path: &str, content_head: Option<&str>) -> bool {
    let tokens = crate::utils::query_tokens(query);
    if tokens.is_empty() {
        return false;
    }

    let mut matcher = Matcher::new(Config::DEFAULT.match_paths());
    for token in &tokens {
        let pattern = Pattern::parse(token, CaseMatching::Ignore, Normalization::Smart);
        if !pattern
            .match_list(vec![file_path.to_string()], &mut matcher)
            .is_empty()
        {
            return true;
        }
    }

    if let Some(head) = content_head {
        let head_lower = head.to_lowercase();
        return tokens.iter().any(|t| head_lower.contains(t.as_str()));
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_matches_path_fragment() {
        assert!(query_matches_file("how does auth work", "src/auth.py", None));
        assert!(!query_matches_file("database pooling", "src/render.py", None));
    }

    #[test]
    fn test_query_matches_content_head() {
        assert!(query_matches_file(
            "token expiration",
            "src/misc.py",
            Some("def check_token_expiration():\n    pass")
        ));
        assert!(!query_matches_file(
            "token expiration",
            "src/misc.py",
            Some("unrelated content")
        ));
    }

    #[test]
    fn test_empty_query_matches_nothing() {
        assert!(!query_matches_file("???", "src/auth.py", Some("anything")));
    }

    #[test]
    fn test_relativize() {
        let root = Path::new("/work/project");
        assert_eq!(
            relativize(root, Path::new("/work/project/src/a.py")).unwrap(),
            "src/a.py"
        );
        assert_eq!(relativize(root, Path::new("src/a.py")).unwrap(), "src/a.py");
        assert!(relativize(root, Path::new("/elsewhere/b.py")).is_err());
    }
}
