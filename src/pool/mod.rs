//! Background Sync Task Pool
//!
//! Fire-and-forget execution of index reconciliation work with a bounded
//! number of concurrently running bodies and a timed, cancelling shutdown.

pub mod callbacks;

use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub use callbacks::{make_pooled_sync_callback, queue_batch_sync};

pub const DEFAULT_MAX_CONCURRENT: usize = 5;

/// Pool sizing and shutdown timings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PoolConfig {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// How long `shutdown` waits for tracked tasks before cancelling them
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,

    /// How long to wait for cancelled tasks to unwind
    #[serde(default = "default_cancel_grace_secs")]
    pub cancel_grace_secs: u64,
}

fn default_max_concurrent() -> usize {
    DEFAULT_MAX_CONCURRENT
}

fn default_shutdown_timeout_secs() -> u64 {
    30
}

fn default_cancel_grace_secs() -> u64 {
    5
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            cancel_grace_secs: default_cancel_grace_secs(),
        }
    }
}

impl PoolConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_secs(self.cancel_grace_secs)
    }
}

/// Result of [`SyncTaskPool::submit`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Scheduled(u64),
    /// The pool is draining; the work was dropped without being polled
    ShuttingDown,
    /// No tokio runtime is reachable from the caller; the work was dropped
    NoRuntime,
}

impl SubmitOutcome {
    pub fn is_scheduled(&self) -> bool {
        matches!(self, SubmitOutcome::Scheduled(_))
    }
}

/// Membership set of scheduled tasks.
///
/// A task removes itself when its future completes or is dropped. If that
/// happens before `submit` records the handle, the id lands in
/// `finished_early` so the handle is never inserted.
#[derive(Default)]
struct TaskSet {
    handles: HashMap<u64, JoinHandle<()>>,
    finished_early: HashSet<u64>,
}

struct Tracker {
    tasks: Mutex<TaskSet>,
    count: watch::Sender<usize>,
}

impl Tracker {
    fn new() -> Self {
        let (count, _) = watch::channel(0);
        Self {
            tasks: Mutex::new(TaskSet::default()),
            count,
        }
    }

    fn lock(&self) -> MutexGuard<'_, TaskSet> {
        self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn insert(&self, id: u64, handle: JoinHandle<()>) {
        let mut tasks = self.lock();
        if tasks.finished_early.remove(&id) {
            return;
        }
        tasks.handles.insert(id, handle);
        self.count.send_replace(tasks.handles.len());
    }

    fn remove(&self, id: u64) {
        let mut tasks = self.lock();
        if tasks.handles.remove(&id).is_none() {
            tasks.finished_early.insert(id);
        }
        self.count.send_replace(tasks.handles.len());
    }

    fn abort_all(&self) -> usize {
        let tasks = self.lock();
        for handle in tasks.handles.values() {
            handle.abort();
        }
        tasks.handles.len()
    }

    fn clear(&self) {
        let mut tasks = self.lock();
        tasks.handles.clear();
        tasks.finished_early.clear();
        self.count.send_replace(0);
    }

    async fn wait_idle(&self, limit: Duration) -> bool {
        let mut rx = self.count.subscribe();
        let idle = matches!(
            tokio::time::timeout(limit, rx.wait_for(|count| *count == 0)).await,
            Ok(Ok(_))
        );
        idle
    }
}

/// Drops the task's membership when the wrapping future finishes or is cancelled
struct Membership {
    tracker: Arc<Tracker>,
    id: u64,
}

impl Drop for Membership {
    fn drop(&mut self) {
        self.tracker.remove(self.id);
    }
}

/// Bounded-concurrency pool for detached background work
pub struct SyncTaskPool {
    max_concurrent: usize,
    cancel_grace: Duration,
    semaphore: Arc<Semaphore>,
    shutting_down: AtomicBool,
    tracker: Arc<Tracker>,
    next_id: AtomicU64,
}

impl Default for SyncTaskPool {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENT)
    }
}

impl SyncTaskPool {
    pub fn new(max_concurrent: usize) -> Self {
        Self::with_config(&PoolConfig {
            max_concurrent,
            ..PoolConfig::default()
        })
    }

    pub fn with_config(config: &PoolConfig) -> Self {
        let max_concurrent = config.max_concurrent.max(1);
        Self {
            max_concurrent,
            cancel_grace: config.cancel_grace(),
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            shutting_down: AtomicBool::new(false),
            tracker: Arc::new(Tracker::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Tracked tasks that have not finished yet
    pub fn active_count(&self) -> usize {
        self.tracker
            .lock()
            .handles
            .values()
            .filter(|handle| !handle.is_finished())
            .count()
    }

    /// All tracked tasks, running or waiting for a permit
    pub fn pending_count(&self) -> usize {
        self.tracker.lock().handles.len()
    }

    /// Schedule `work` in the background and return immediately.
    ///
    /// Errors and panics from `work` are logged and swallowed.
    pub fn submit<F>(&self, work: F) -> SubmitOutcome
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        if self.is_shutting_down() {
            warn!("Task pool is shutting down, rejecting new task");
            return SubmitOutcome::ShuttingDown;
        }

        let Ok(runtime) = Handle::try_current() else {
            warn!("No async runtime available, cannot submit task to pool");
            return SubmitOutcome::NoRuntime;
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let membership = Membership {
            tracker: self.tracker.clone(),
            id,
        };
        let semaphore = self.semaphore.clone();

        let handle = runtime.spawn(async move {
            let _membership = membership;
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return;
            };

            match AssertUnwindSafe(work).catch_unwind().await {
                Ok(Ok(())) => debug!(task = id, "Background task finished"),
                Ok(Err(err)) => warn!(task = id, error = %err, "Background task failed"),
                Err(_) => error!(task = id, "Background task panicked"),
            }
        });
        self.tracker.insert(id, handle);

        debug!(
            task = id,
            active = self.active_count(),
            pending = self.pending_count(),
            "Submitted task to pool"
        );

        SubmitOutcome::Scheduled(id)
    }

    /// Stop accepting work, wait up to `timeout` for tracked tasks, then cancel the rest
    pub async fn shutdown(&self, timeout: Duration) {
        self.shutting_down.store(true, Ordering::SeqCst);

        let pending = self.pending_count();
        if pending == 0 {
            debug!("Task pool shutdown: no pending tasks");
            return;
        }

        info!(
            pending,
            timeout_ms = timeout.as_millis() as u64,
            "Task pool shutdown: waiting for tasks"
        );

        if !self.tracker.wait_idle(timeout).await {
            let cancelled = self.tracker.abort_all();
            warn!(cancelled, "Task pool shutdown: cancelling tasks that didn't complete");

            if !self.tracker.wait_idle(self.cancel_grace).await {
                warn!(
                    remaining = self.pending_count(),
                    "Task pool shutdown: tasks still unwinding after cancellation"
                );
            }
        }

        info!("Task pool shutdown complete");
    }

    /// Accept work again after a completed shutdown. Not for use mid-drain.
    pub fn reset(&self) {
        self.shutting_down.store(false, Ordering::SeqCst);
        self.tracker.clear();
    }
}

// =============================================================================
// Tests
// =============================================================================
