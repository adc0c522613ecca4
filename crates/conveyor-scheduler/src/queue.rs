//! Worker registry and stage matching.

use async_trait::async_trait;
use conveyor_config::SchedulerConfig;
use conveyor_config::system::{DEFAULT_DISPATCH_INTERVAL, DEFAULT_LOCK_KEY};
use conveyor_core::lock::MutexManager;
use conveyor_core::stage::{Stage, StageStatus};
use conveyor_core::store::StageStore;
use conveyor_core::{Error, Result};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{Notify, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::limits::{should_throttle, within_limits};
use crate::worker::{Filter, Worker};

/// Hands runnable stages to agents.
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Note that a stage became runnable. The stage itself is picked up from
    /// the stage store on the next dispatch pass.
    async fn schedule(&self, stage: &Stage) -> Result<()>;

    /// Stop handing out stages until [`Scheduler::resume`] is called.
    async fn pause(&self) -> Result<()>;

    async fn resume(&self) -> Result<()>;

    /// Wait for a stage matching `filter`.
    ///
    /// Returns [`Error::Cancelled`] once `cancel` fires, unless a dispatch
    /// pass already handed this request a stage, in which case the stage is
    /// returned.
    async fn request(&self, filter: Filter, cancel: &CancellationToken) -> Result<Stage>;
}

/// Workers waiting for a stage, keyed by registration order.
#[derive(Default)]
pub(crate) struct Registry {
    paused: bool,
    workers: BTreeMap<u64, Worker>,
    next_id: u64,
}

impl Registry {
    fn register(&mut self, filter: Filter, slot: oneshot::Sender<Stage>) -> u64 {
        self.next_id += 1;
        self.workers.insert(self.next_id, Worker { filter, slot });
        self.next_id
    }

    /// Hand stages to matching workers. Each stage goes to the
    /// earliest-registered worker that accepts it; every worker receives at
    /// most one stage. Returns the number of handoffs.
    pub(crate) fn assign(&mut self, items: &[Stage]) -> usize {
        let mut handoffs = 0;

        for item in items {
            if self.workers.is_empty() {
                break;
            }
            if item.status == StageStatus::Running || item.is_assigned() {
                continue;
            }
            if !within_limits(item, items) {
                trace!(stage_id = %item.id, name = %item.name, "Stage held back by limit");
                continue;
            }
            if should_throttle(item, items) {
                trace!(stage_id = %item.id, repo_id = %item.repo_id, "Stage throttled");
                continue;
            }

            let candidates: Vec<u64> = self
                .workers
                .iter()
                .filter(|(_, w)| w.filter.accepts(item))
                .map(|(id, _)| *id)
                .collect();

            for id in candidates {
                let Some(worker) = self.workers.remove(&id) else {
                    continue;
                };
                match worker.slot.send(item.clone()) {
                    Ok(()) => {
                        debug!(stage_id = %item.id, worker = id, "Handed stage to worker");
                        handoffs += 1;
                        break;
                    }
                    Err(_) => {
                        debug!(worker = id, "Worker went away before handoff");
                    }
                }
            }
        }

        handoffs
    }
}

fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Removes a worker from the registry when its request ends, however it ends.
struct Registration {
    registry: Arc<Mutex<Registry>>,
    id: u64,
}

impl Registration {
    /// Remove the worker. Returns false if a dispatch pass already took it.
    fn deregister(&self) -> bool {
        lock(&self.registry).workers.remove(&self.id).is_some()
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.deregister();
    }
}

/// The stage queue.
///
/// Run [`Queue::run`] on a task to drive dispatch passes; agents call
/// [`Scheduler::request`] and block until a stage is handed to them.
pub struct Queue {
    registry: Arc<Mutex<Registry>>,
    pub(crate) ready: Notify,
    store: Arc<dyn StageStore>,
    locks: Arc<dyn MutexManager>,
    lock_key: String,
    pub(crate) interval: Duration,
}

impl Queue {
    pub fn new(store: Arc<dyn StageStore>, locks: Arc<dyn MutexManager>) -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry::default())),
            ready: Notify::new(),
            store,
            locks,
            lock_key: DEFAULT_LOCK_KEY.to_string(),
            interval: DEFAULT_DISPATCH_INTERVAL,
        }
    }

    pub fn from_config(
        store: Arc<dyn StageStore>,
        locks: Arc<dyn MutexManager>,
        config: &SchedulerConfig,
    ) -> Self {
        Self::new(store, locks)
            .with_interval(config.interval)
            .with_lock_key(config.lock_key.clone())
    }

    /// Time between dispatch passes when nothing signals the queue.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Name of the distributed lock serializing dispatch passes.
    pub fn with_lock_key(mut self, key: impl Into<String>) -> Self {
        self.lock_key = key.into();
        self
    }

    pub fn lock_key(&self) -> &str {
        &self.lock_key
    }

    /// Number of requests currently waiting for a stage.
    pub fn worker_count(&self) -> usize {
        lock(&self.registry).workers.len()
    }

    pub fn is_paused(&self) -> bool {
        lock(&self.registry).paused
    }

    /// Request a dispatch pass. Requests made while one is already pending
    /// coalesce into a single pass.
    fn wake(&self) {
        self.ready.notify_one();
    }

    /// Run one dispatch pass under the distributed lock.
    pub async fn signal(&self, cancel: &CancellationToken) -> Result<usize> {
        self.locks.acquire(&self.lock_key, cancel).await?;
        let result = self.dispatch().await;
        if let Err(e) = self.locks.release(&self.lock_key).await {
            warn!(lock = %self.lock_key, error = %e, "Failed to release dispatch lock");
        }
        result
    }

    /// Match waiting workers against incomplete stages. The caller must hold
    /// the dispatch lock.
    async fn dispatch(&self) -> Result<usize> {
        let (paused, waiting) = {
            let registry = lock(&self.registry);
            (registry.paused, registry.workers.len())
        };
        if paused {
            debug!("Queue paused, skipping dispatch");
            return Ok(0);
        }
        if waiting == 0 {
            return Ok(0);
        }

        let items = self
            .store
            .list_incomplete()
            .await
            .map_err(|e| e.context("list incomplete stages"))?;

        let handoffs = lock(&self.registry).assign(&items);
        Ok(handoffs)
    }
}

#[async_trait]
impl Scheduler for Queue {
    async fn schedule(&self, stage: &Stage) -> Result<()> {
        trace!(stage_id = %stage.id, "Stage scheduled");
        self.wake();
        Ok(())
    }

    async fn pause(&self) -> Result<()> {
        lock(&self.registry).paused = true;
        info!("Queue paused");
        Ok(())
    }

    async fn resume(&self) -> Result<()> {
        lock(&self.registry).paused = false;
        info!("Queue resumed");
        self.wake();
        Ok(())
    }

    async fn request(&self, filter: Filter, cancel: &CancellationToken) -> Result<Stage> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let (slot, mut handoff) = oneshot::channel();
        let registration = {
            let id = lock(&self.registry).register(filter, slot);
            Registration {
                registry: self.registry.clone(),
                id,
            }
        };
        debug!(worker = registration.id, "Worker registered");
        self.wake();

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                if registration.deregister() {
                    debug!(worker = registration.id, "Worker cancelled");
                    return Err(Error::Cancelled);
                }
                // Handed off under the registry lock before we got there.
                handoff.try_recv().map_err(|_| Error::Cancelled)
            }
            stage = &mut handoff => stage.map_err(|_| {
                Error::Internal("worker slot closed without a stage".to_string())
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conveyor_core::stage::Platform;
    use conveyor_core::{RepoId, StageId};
    use conveyor_db::{LocalMutexManager, MemoryStore};

    fn queue(store: Arc<MemoryStore>) -> Arc<Queue> {
        Arc::new(Queue::new(store, Arc::new(LocalMutexManager::new())))
    }

    fn pending(name: &str) -> Stage {
        Stage {
            name: name.to_string(),
            repo_id: RepoId::new(1),
            status: StageStatus::Pending,
            ..Default::default()
        }
    }

    fn linux() -> Platform {
        Platform {
            os: "linux".to_string(),
            arch: "amd64".to_string(),
            ..Default::default()
        }
    }

    /// Spawn a request and wait until it is registered.
    async fn spawn_request(
        queue: &Arc<Queue>,
        filter: Filter,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<Result<Stage>> {
        let before = queue.worker_count();
        let handle = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.request(filter, &cancel).await })
        };
        while queue.worker_count() == before {
            tokio::task::yield_now().await;
        }
        handle
    }

    #[tokio::test]
    async fn test_request_with_cancelled_token_does_not_register() {
        let queue = queue(Arc::new(MemoryStore::new()));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = queue.request(Filter::default(), &cancel).await.unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(queue.worker_count(), 0);
    }

    #[tokio::test]
    async fn test_pending_stage_is_handed_to_worker() {
        let store = Arc::new(MemoryStore::new());
        let stage = store.insert_stage(pending("build")).await;
        let queue = queue(store);

        let request = spawn_request(&queue, Filter::default(), CancellationToken::new()).await;
        let handoffs = queue.signal(&CancellationToken::new()).await.unwrap();
        assert_eq!(handoffs, 1);

        let received = request.await.unwrap().unwrap();
        assert_eq!(received.id, stage.id);
        assert_eq!(queue.worker_count(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_request_deregisters() {
        let store = Arc::new(MemoryStore::new());
        let queue = queue(store.clone());
        let cancel = CancellationToken::new();

        let request = spawn_request(&queue, Filter::default(), cancel.clone()).await;
        cancel.cancel();
        let err = request.await.unwrap().unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(queue.worker_count(), 0);

        // A stage arriving later is not handed to the departed worker.
        store.insert_stage(pending("build")).await;
        assert_eq!(queue.signal(&CancellationToken::new()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_cancel_after_handoff_returns_stage() {
        let store = Arc::new(MemoryStore::new());
        let stage = store.insert_stage(pending("build")).await;
        let queue = queue(store);
        let cancel = CancellationToken::new();

        // Hand off and cancel before the request task is polled again.
        let request = spawn_request(&queue, Filter::default(), cancel.clone()).await;
        assert_eq!(queue.signal(&CancellationToken::new()).await.unwrap(), 1);
        cancel.cancel();

        assert_eq!(request.await.unwrap().unwrap().id, stage.id);
    }

    #[tokio::test]
    async fn test_aborted_request_deregisters() {
        let queue = queue(Arc::new(MemoryStore::new()));
        let request = spawn_request(&queue, Filter::default(), CancellationToken::new()).await;

        request.abort();
        let _ = request.await;
        assert_eq!(queue.worker_count(), 0);
    }

    #[tokio::test]
    async fn test_paused_queue_hands_out_nothing() {
        let store = Arc::new(MemoryStore::new());
        store.insert_stage(pending("build")).await;
        let queue = queue(store);
        queue.pause().await.unwrap();

        let request = spawn_request(&queue, Filter::default(), CancellationToken::new()).await;
        assert_eq!(queue.signal(&CancellationToken::new()).await.unwrap(), 0);
        assert!(!request.is_finished());

        queue.resume().await.unwrap();
        assert_eq!(queue.signal(&CancellationToken::new()).await.unwrap(), 1);
        request.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_limit_holds_stage_until_sibling_finishes() {
        let store = Arc::new(MemoryStore::new());
        let mut first = pending("build");
        first.status = StageStatus::Running;
        first.limit = 1;
        let first = store.insert_stage(first).await;
        let mut second = pending("build");
        second.limit = 1;
        let second = store.insert_stage(second).await;
        let queue = queue(store.clone());

        let request = spawn_request(&queue, Filter::default(), CancellationToken::new()).await;
        assert_eq!(queue.signal(&CancellationToken::new()).await.unwrap(), 0);

        let mut done = first.clone();
        done.status = StageStatus::Success;
        StageStore::update(store.as_ref(), &done).await.unwrap();

        assert_eq!(queue.signal(&CancellationToken::new()).await.unwrap(), 1);
        assert_eq!(request.await.unwrap().unwrap().id, second.id);
    }

    #[tokio::test]
    async fn test_platform_mismatch_is_skipped() {
        let store = Arc::new(MemoryStore::new());
        let mut windows = pending("windows");
        windows.platform.os = "windows".to_string();
        windows.platform.arch = "amd64".to_string();
        store.insert_stage(windows).await;
        let mut wanted = pending("linux");
        wanted.platform = linux();
        let wanted = store.insert_stage(wanted).await;
        let queue = queue(store);

        let filter = Filter {
            platform: linux(),
            ..Default::default()
        };
        let request = spawn_request(&queue, filter, CancellationToken::new()).await;
        assert_eq!(queue.signal(&CancellationToken::new()).await.unwrap(), 1);
        assert_eq!(request.await.unwrap().unwrap().id, wanted.id);
    }

    #[tokio::test]
    async fn test_assigned_and_running_stages_are_skipped() {
        let store = Arc::new(MemoryStore::new());
        let mut assigned = pending("a");
        assigned.machine = "agent-1".to_string();
        store.insert_stage(assigned).await;
        let mut running = pending("b");
        running.status = StageStatus::Running;
        store.insert_stage(running).await;
        let queue = queue(store);

        let request = spawn_request(&queue, Filter::default(), CancellationToken::new()).await;
        assert_eq!(queue.signal(&CancellationToken::new()).await.unwrap(), 0);
        request.abort();
    }

    #[test]
    fn test_assign_is_deterministic() {
        let items: Vec<Stage> = (1..=2)
            .map(|id| Stage {
                id: StageId::new(id),
                ..Default::default()
            })
            .collect();

        for _ in 0..3 {
            let mut registry = Registry::default();
            let (first_tx, mut first_rx) = oneshot::channel();
            let (second_tx, mut second_rx) = oneshot::channel();
            registry.register(Filter::default(), first_tx);
            registry.register(Filter::default(), second_tx);

            assert_eq!(registry.assign(&items), 2);
            assert_eq!(first_rx.try_recv().unwrap().id, StageId::new(1));
            assert_eq!(second_rx.try_recv().unwrap().id, StageId::new(2));
        }
    }

    #[test]
    fn test_assign_skips_departed_worker() {
        let items = vec![Stage {
            id: StageId::new(1),
            ..Default::default()
        }];
        let mut registry = Registry::default();
        let (gone_tx, gone_rx) = oneshot::channel();
        let (live_tx, mut live_rx) = oneshot::channel();
        registry.register(Filter::default(), gone_tx);
        registry.register(Filter::default(), live_tx);
        drop(gone_rx);

        assert_eq!(registry.assign(&items), 1);
        assert_eq!(live_rx.try_recv().unwrap().id, StageId::new(1));
        assert!(registry.workers.is_empty());
    }

    #[test]
    fn test_from_config() {
        let config = conveyor_config::parse_system_config(
            r#"
            scheduler {
                interval-secs 5
                lock-key "dispatch"
            }
            "#,
        )
        .unwrap();
        let queue = Queue::from_config(
            Arc::new(MemoryStore::new()),
            Arc::new(LocalMutexManager::new()),
            &config.scheduler,
        );
        assert_eq!(queue.interval, Duration::from_secs(5));
        assert_eq!(queue.lock_key(), "dispatch");

        let defaults = Queue::from_config(
            Arc::new(MemoryStore::new()),
            Arc::new(LocalMutexManager::new()),
            &SchedulerConfig::default(),
        );
        assert_eq!(defaults.interval, DEFAULT_DISPATCH_INTERVAL);
        assert_eq!(defaults.lock_key(), DEFAULT_LOCK_KEY);
    }

    #[tokio::test]
    async fn test_schedule_wakes_coalesce() {
        let queue = queue(Arc::new(MemoryStore::new()));
        let stage = pending("build");
        for _ in 0..3 {
            queue.schedule(&stage).await.unwrap();
        }

        queue.ready.notified().await;
        let second = tokio::time::timeout(Duration::from_millis(50), queue.ready.notified()).await;
        assert!(second.is_err());
    }
}
