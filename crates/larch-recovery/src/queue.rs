//! The dedup priority queue feeding recovery workers.
//!
//! Two layers:
//!
//! 1. [`PrioritizedExecutor`] — a bounded pool of worker tasks draining a
//!    priority heap. Active jobs run before background jobs; ties resolve
//!    FIFO by submission sequence.
//! 2. [`MissingShardQueue`] — a keyed in-flight registry in front of the
//!    executor. Submitting a key that is already in flight returns the same
//!    pending future instead of starting a second job; completion evicts
//!    the key so a later submit starts fresh.

use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use tokio::sync::{Notify, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Result, ShardRecoveryError};
use crate::shard::MissingShard;

/// Completion handle for a queued recovery job.
///
/// Cloneable: every submitter of the same in-flight key holds the same
/// future. The error side is `Arc`-wrapped so one failure can be observed
/// by all holders.
pub type JobFuture = Shared<BoxFuture<'static, Result<(), Arc<ShardRecoveryError>>>>;

/// Performs the actual restore for one missing shard.
#[async_trait]
pub trait RecoverShard: Send + Sync + 'static {
    /// Recover one shard; called at most once per in-flight key.
    async fn recover(&self, shard: &MissingShard) -> Result<()>;
}

struct QueuedJob {
    active: bool,
    seq: u64,
    job: BoxFuture<'static, ()>,
}

impl PartialEq for QueuedJob {
    fn eq(&self, other: &Self) -> bool {
        self.active == other.active && self.seq == other.seq
    }
}

impl Eq for QueuedJob {}

impl PartialOrd for QueuedJob {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedJob {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Max-heap: active first, then earliest submission.
        self.active
            .cmp(&other.active)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct ExecutorState {
    queue: Mutex<BinaryHeap<QueuedJob>>,
    available: Notify,
    next_seq: AtomicU64,
}

/// A bounded pool of workers draining a priority-then-FIFO heap.
pub struct PrioritizedExecutor {
    state: Arc<ExecutorState>,
    cancel: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl PrioritizedExecutor {
    /// Start `threads` worker tasks (at least one).
    pub fn new(threads: usize, cancel: CancellationToken) -> Self {
        let state = Arc::new(ExecutorState {
            queue: Mutex::new(BinaryHeap::new()),
            available: Notify::new(),
            next_seq: AtomicU64::new(0),
        });
        let workers = (0..threads.max(1))
            .map(|worker| {
                tokio::spawn(run_worker(Arc::clone(&state), cancel.clone(), worker))
            })
            .collect();
        Self {
            state,
            cancel,
            workers: Mutex::new(workers),
        }
    }

    /// Queue one job at the given priority.
    pub fn enqueue(&self, active: bool, job: BoxFuture<'static, ()>) {
        let seq = self.state.next_seq.fetch_add(1, Ordering::Relaxed);
        self.state.queue.lock().push(QueuedJob { active, seq, job });
        self.state.available.notify_one();
    }

    /// Jobs waiting for a worker.
    pub fn pending_len(&self) -> usize {
        self.state.queue.lock().len()
    }

    /// Forcibly stop all workers; queued and in-flight jobs are abandoned.
    /// Dropping queued jobs resolves their completion handles with a
    /// shutdown error.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        for worker in self.workers.lock().drain(..) {
            worker.abort();
        }
        self.state.queue.lock().clear();
    }
}

async fn run_worker(state: Arc<ExecutorState>, cancel: CancellationToken, worker: usize) {
    debug!(worker, "recovery executor worker started");
    loop {
        let queued = state.queue.lock().pop();
        match queued {
            Some(queued) => queued.job.await,
            None => {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = state.available.notified() => {}
                }
            }
        }
    }
    debug!(worker, "recovery executor worker stopped");
}

/// Keyed in-flight registry in front of the prioritized executor.
pub struct MissingShardQueue {
    inflight: Arc<Mutex<HashMap<MissingShard, JobFuture>>>,
    executor: PrioritizedExecutor,
    recovery: Arc<dyn RecoverShard>,
}

impl MissingShardQueue {
    /// Queue backed by `threads` workers running `recovery`.
    pub fn new(recovery: Arc<dyn RecoverShard>, threads: usize, cancel: CancellationToken) -> Self {
        Self {
            inflight: Arc::new(Mutex::new(HashMap::new())),
            executor: PrioritizedExecutor::new(threads, cancel),
            recovery,
        }
    }

    /// Submit one recovery request.
    ///
    /// At most one job runs per distinct key; repeated submissions while a
    /// job is outstanding return the same pending future. A submit racing
    /// with completion may still receive the completing job's future; that
    /// is safe because publication is atomic and verification idempotent.
    pub async fn submit(&self, shard: MissingShard) -> JobFuture {
        let (sender, receiver) = oneshot::channel::<Result<(), Arc<ShardRecoveryError>>>();
        let future: JobFuture = receiver
            .map(|received| {
                received.unwrap_or_else(|_| Err(Arc::new(ShardRecoveryError::Shutdown)))
            })
            .boxed()
            .shared();

        {
            let mut inflight = self.inflight.lock();
            if let Some(existing) = inflight.get(&shard) {
                return existing.clone();
            }
            inflight.insert(shard, future.clone());
        }
        debug!(shard = %shard, "queueing shard recovery");

        let recovery = Arc::clone(&self.recovery);
        let inflight = Arc::clone(&self.inflight);
        let job = async move {
            let result = recovery.recover(&shard).await.map_err(Arc::new);
            // Evict before publishing so a post-completion submit starts a
            // fresh job rather than observing a finished future.
            inflight.lock().remove(&shard);
            let _ = sender.send(result);
        }
        .boxed();
        self.executor.enqueue(shard.active, job);
        future
    }

    /// Number of keys currently in flight.
    pub fn inflight_len(&self) -> usize {
        self.inflight.lock().len()
    }

    /// Number of jobs still waiting for a worker.
    pub fn pending_len(&self) -> usize {
        self.executor.pending_len()
    }

    /// Forcibly stop the underlying executor.
    pub fn shutdown(&self) {
        self.executor.shutdown();
    }
}
