//! C5: filesystem watcher + debounced FIFO task queue feeding the indexer.

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as NotifyWatcherTrait};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, Notify};
use tracing::{error, info, warn};

use crate::indexer::Indexer;
use crate::scanner::{self, ScanOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    IndexOrReindex,
    Remove,
}

#[derive(Debug, Clone)]
struct Task {
    path: PathBuf,
    op: Op,
}

impl Task {
    fn id(&self) -> String {
        let op = match self.op {
            Op::IndexOrReindex => "index",
            Op::Remove => "remove",
        };
        format!("{op}:{}", self.path.display())
    }
}

struct DebounceState {
    generation: u64,
    op: Op,
}

#[derive(Debug, Clone, Default)]
pub struct WatcherStats {
    pub tasks_processed: u64,
    pub tasks_failed: u64,
    pub restarts: u64,
}

struct Shared {
    debounce: Mutex<HashMap<PathBuf, DebounceState>>,
    queue: Mutex<VecDeque<Task>>,
    queue_signal: Notify,
    shutdown: Notify,
    shutting_down: std::sync::atomic::AtomicBool,
    processed: AtomicU64,
    failed: AtomicU64,
    restarts: AtomicU64,
}

pub struct FileWatcher {
    shared: Arc<Shared>,
    exclude_patterns: Vec<String>,
    supported_extensions: Vec<String>,
    repo_root: PathBuf,
}

impl FileWatcher {
    pub fn new(repo_root: PathBuf, exclude_patterns: Vec<String>, supported_extensions: Vec<String>) -> Self {
        Self {
            shared: Arc::new(Shared {
                debounce: Mutex::new(HashMap::new()),
                queue: Mutex::new(VecDeque::new()),
                queue_signal: Notify::new(),
                shutdown: Notify::new(),
                shutting_down: std::sync::atomic::AtomicBool::new(false),
                processed: AtomicU64::new(0),
                failed: AtomicU64::new(0),
                restarts: AtomicU64::new(0),
            }),
            repo_root,
            exclude_patterns,
            supported_extensions,
        }
    }

    fn is_watched(&self, path: &Path) -> bool {
        let opts = ScanOptions {
            repo_root: self.repo_root.clone(),
            target: path.to_path_buf(),
            max_file_bytes: u64::MAX,
            exclude_patterns: self.exclude_patterns.clone(),
            supported_extensions: self.supported_extensions.clone(),
        };
        scanner::scan_workspace(&opts).map(|entries| !entries.is_empty()).unwrap_or(false)
    }

    /// Runs the watcher loop until `shutdown()` is called (or, if the
    /// underlying notify channel closes and `auto_restart` is set, after
    /// recreating the watcher). Spawns `queue_concurrency` FIFO workers
    /// draining `self.shared.queue`.
    pub async fn run(self: Arc<Self>, debounce: Duration, queue_concurrency: usize, auto_restart: bool, indexer: Arc<Indexer>) {
        for _ in 0..queue_concurrency.max(1) {
            let shared = self.shared.clone();
            let indexer = indexer.clone();
            let repo_root = self.repo_root.clone();
            tokio::spawn(async move { run_worker(shared, indexer, repo_root).await });
        }

        loop {
            let (tx, mut rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
            let mut watcher = match RecommendedWatcher::new(
                move |res| {
                    let _ = tx.send(res);
                },
                notify::Config::default(),
            ) {
                Ok(w) => w,
                Err(e) => {
                    error!(error = %e, "failed to create filesystem watcher");
                    return;
                }
            };
            if let Err(e) = watcher.watch(&self.repo_root, RecursiveMode::Recursive) {
                error!(error = %e, "failed to watch repo root");
                return;
            }

            let channel_closed = loop {
                tokio::select! {
                    _ = self.shared.shutdown.notified() => {
                        info!("watcher shutdown requested");
                        return;
                    }
                    event = rx.recv() => {
                        match event {
                            Some(Ok(ev)) => self.handle_event(ev, debounce).await,
                            Some(Err(e)) => warn!(error = %e, "watcher event error"),
                            None => break true,
                        }
                    }
                }
            };

            if channel_closed {
                self.shared.restarts.fetch_add(1, Ordering::Relaxed);
                if auto_restart {
                    warn!("watcher event channel closed, restarting");
                    continue;
                } else {
                    error!("watcher event channel closed, not configured to restart");
                    return;
                }
            }
        }
    }

    async fn handle_event(&self, event: Event, debounce: Duration) {
        let op = match event.kind {
            EventKind::Remove(_) => Op::Remove,
            EventKind::Create(_) | EventKind::Modify(_) => Op::IndexOrReindex,
            _ => return,
        };
        for path in event.paths {
            if !matches!(op, Op::Remove) && !self.is_watched(&path) {
                continue;
            }
            self.schedule(path, op, debounce).await;
        }
    }

    /// Per-path debounce: a new event for the same path bumps the
    /// generation counter and overwrites the pending op (delete wins over a
    /// prior modify), restarting the timer. Only the timer that observes
    /// its own generation unchanged after `debounce` elapses enqueues.
    async fn schedule(&self, path: PathBuf, op: Op, debounce: Duration) {
        let generation = {
            let mut table = self.shared.debounce.lock().await;
            let entry = table.entry(path.clone()).or_insert(DebounceState { generation: 0, op });
            entry.generation += 1;
            entry.op = op;
            entry.generation
        };

        let shared = self.shared.clone();
        tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            let fire = {
                let mut table = shared.debounce.lock().await;
                match table.get(&path) {
                    Some(state) if state.generation == generation => {
                        let op = state.op;
                        table.remove(&path);
                        Some(op)
                    }
                    _ => None,
                }
            };
            if let Some(op) = fire {
                let mut queue = shared.queue.lock().await;
                queue.push_back(Task { path, op });
                shared.queue_signal.notify_one();
            }
        });
    }

    /// Drains in-flight work best-effort and rejects queued tasks with a
    /// "queue cleared" outcome.
    pub async fn shutdown(&self) {
        self.shared.shutting_down.store(true, Ordering::SeqCst);
        let dropped = {
            let mut queue = self.shared.queue.lock().await;
            let n = queue.len();
            queue.clear();
            n
        };
        if dropped > 0 {
            info!(dropped, "queue cleared on shutdown");
        }
        self.shared.shutdown.notify_waiters();
    }

    pub fn stats(&self) -> WatcherStats {
        WatcherStats {
            tasks_processed: self.shared.processed.load(Ordering::Relaxed),
            tasks_failed: self.shared.failed.load(Ordering::Relaxed),
            restarts: self.shared.restarts.load(Ordering::Relaxed),
        }
    }
}

async fn run_worker(shared: Arc<Shared>, indexer: Arc<Indexer>, repo_root: PathBuf) {
    loop {
        let task = {
            let mut queue = shared.queue.lock().await;
            queue.pop_front()
        };
        let Some(task) = task else {
            if shared.shutting_down.load(Ordering::SeqCst) {
                return;
            }
            shared.queue_signal.notified().await;
            continue;
        };

        let abs_path = if task.path.is_absolute() { task.path.clone() } else { repo_root.join(&task.path) };
        let result = match task.op {
            Op::IndexOrReindex => indexer.index_file(&abs_path, false).await.map(|_| ()),
            Op::Remove => indexer.remove_file(&abs_path).await,
        };

        match result {
            Ok(()) => {
                shared.processed.fetch_add(1, Ordering::Relaxed);
                info!(task = %task.id(), "watcher task complete");
            }
            Err(e) => {
                shared.failed.fetch_add(1, Ordering::Relaxed);
                warn!(task = %task.id(), error = %e, "watcher task failed, retaining remaining queue");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_id_is_op_prefixed_path() {
        let t = Task { path: PathBuf::from("a/b.rs"), op: Op::Remove };
        assert_eq!(t.id(), format!("remove:{}", PathBuf::from("a/b.rs").display()));
    }

    #[tokio::test]
    async fn schedule_coalesces_rapid_events_to_latest_op() {
        let watcher = FileWatcher::new(PathBuf::from("/repo"), vec![], vec!["rs".to_string()]);
        watcher.schedule(PathBuf::from("x.rs"), Op::IndexOrReindex, Duration::from_millis(50)).await;
        watcher.schedule(PathBuf::from("x.rs"), Op::IndexOrReindex, Duration::from_millis(50)).await;
        watcher.schedule(PathBuf::from("x.rs"), Op::Remove, Duration::from_millis(50)).await;

        tokio::time::sleep(Duration::from_millis(120)).await;
        let queue = watcher.shared.queue.lock().await;
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].op, Op::Remove);
    }

    #[tokio::test]
    async fn shutdown_clears_pending_queue() {
        let watcher = FileWatcher::new(PathBuf::from("/repo"), vec![], vec!["rs".to_string()]);
        {
            let mut queue = watcher.shared.queue.lock().await;
            queue.push_back(Task { path: PathBuf::from("a.rs"), op: Op::IndexOrReindex });
        }
        watcher.shutdown().await;
        let queue = watcher.shared.queue.lock().await;
        assert!(queue.is_empty());
    }
}
