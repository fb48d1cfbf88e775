// crates/oracle-server/src/delta/watcher.rs
// File system watcher bridging fs events into the delta queue
//
// Event-driven alternative to polling scans: changes are debounced, then
// fed through DeltaQueue::record_change, which applies the usual
// coalescing and threshold rules.

use super::DeltaQueue;
use crate::config::ignore;
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{RwLock, mpsc, watch};

/// Debounce duration for rapid file changes
const DEBOUNCE_MS: u64 = 500;

/// File watcher manages watching multiple project directories
pub struct FileWatcher {
    queue: Arc<DeltaQueue>,
    /// Map of project_id -> project root for active watches
    watched_projects: Arc<RwLock<HashMap<String, PathBuf>>>,
    /// Pending file changes (debounced)
    pending_changes: Arc<RwLock<HashMap<PathBuf, Instant>>>,
    shutdown: watch::Receiver<bool>,
}

impl FileWatcher {
    pub fn new(queue: Arc<DeltaQueue>, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            queue,
            watched_projects: Arc::new(RwLock::new(HashMap::new())),
            pending_changes: Arc::new(RwLock::new(HashMap::new())),
            shutdown,
        }
    }

    /// Start watching a project directory
    pub async fn watch_project(&self, project_id: &str, root: PathBuf) {
        let mut projects = self.watched_projects.write().await;
        projects.entry(project_id.to_string()).or_insert_with(|| {
            tracing::info!("watching project {} at {:?}", project_id, root);
            root
        });
    }

    /// Stop watching a project
    pub async fn unwatch_project(&self, project_id: &str) {
        let mut projects = self.watched_projects.write().await;
        if projects.remove(project_id).is_some() {
            tracing::info!("stopped watching project {}", project_id);
        }
    }

    /// Run the watcher loop until shutdown
    pub async fn run(mut self) {
        let (tx, mut rx) = mpsc::channel::<PathBuf>(1000);
        let tx_clone = tx.clone();

        let mut watcher: RecommendedWatcher = match Watcher::new(
            move |res: Result<Event, notify::Error>| match res {
                Ok(event) => {
                    if matches!(
                        event.kind,
                        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                    ) {
                        for path in event.paths {
                            if Self::should_process_path(&path) {
                                // try_send: never block the notify thread
                                if let Err(e) = tx_clone.try_send(path) {
                                    tracing::debug!("file change dropped: {}", e);
                                }
                            }
                        }
                    }
                }
                Err(e) => tracing::warn!("watcher error: {}", e),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        ) {
            Ok(w) => w,
            Err(e) => {
                tracing::error!("failed to create file watcher: {}", e);
                return;
            }
        };

        let mut watched_paths: HashSet<PathBuf> = HashSet::new();

        loop {
            if *self.shutdown.borrow() {
                tracing::info!("file watcher shutting down");
                break;
            }

            // Reconcile watched directories with registered projects
            {
                let projects = self.watched_projects.read().await;
                for root in projects.values() {
                    if !watched_paths.contains(root) {
                        match watcher.watch(root, RecursiveMode::Recursive) {
                            Ok(()) => {
                                watched_paths.insert(root.clone());
                            }
                            Err(e) => tracing::warn!("failed to watch {:?}: {}", root, e),
                        }
                    }
                }
                let current: HashSet<_> = projects.values().cloned().collect();
                watched_paths.retain(|path| {
                    if current.contains(path) {
                        true
                    } else {
                        let _ = watcher.unwatch(path);
                        false
                    }
                });
            }

            tokio::select! {
                Some(path) = rx.recv() => {
                    let mut pending = self.pending_changes.write().await;
                    pending.insert(path, Instant::now());
                }
                _ = tokio::time::sleep(Duration::from_millis(100)) => {
                    self.process_pending_changes().await;
                }
                _ = self.shutdown.changed() => {
                    if *self.shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }

    fn should_process_path(path: &Path) -> bool {
        for component in path.components() {
            if let std::path::Component::Normal(name) = component {
                if ignore::should_skip(&name.to_string_lossy()) {
                    return false;
                }
            }
        }
        true
    }

    /// Feed debounced changes into the queue
    async fn process_pending_changes(&self) {
        let debounce = Duration::from_millis(DEBOUNCE_MS);
        let ready: Vec<PathBuf> = {
            let pending = self.pending_changes.read().await;
            pending
                .iter()
                .filter(|(_, stamp)| stamp.elapsed() >= debounce)
                .map(|(path, _)| path.clone())
                .collect()
        };
        if ready.is_empty() {
            return;
        }

        let projects = self.watched_projects.read().await;
        for path in ready {
            let owner = projects
                .iter()
                .find(|(_, root)| path.starts_with(root))
                .map(|(id, _)| id.clone());
            let processed = match owner {
                Some(project_id) => match self.queue.record_change(&project_id, &path).await {
                    Ok(_) => true,
                    Err(e) => {
                        tracing::warn!("failed to record change for {:?}: {}", path, e);
                        false
                    }
                },
                None => true, // stale event for an unwatched root
            };
            let mut pending = self.pending_changes.write().await;
            if processed {
                pending.remove(&path);
            } else {
                // Re-stamp so it retries after another debounce window
                pending.insert(path, Instant::now());
            }
        }
    }
}
