//! Exchange-side plumbing: splits, clients, and the bounded page buffer.
//!
//! Each remote split gets one exchange client. A pump task per client pulls
//! serialized pages off the client and pushes them into a bounded
//! [`PageBuffer`]; the bound is the backpressure mechanism, and a
//! cancellation token tears the pump down promptly on `close()`.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::memory::{MemoryContext, MemoryReservation};
use crate::page::SerializedPage;

/// A remote producer location: one upstream task's output buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteSplit {
    /// Identifier of the producing task.
    pub task_id: String,
    /// Location of the task's output buffer.
    pub location: String,
}

/// A work assignment delivered by the driver.
///
/// The merge operator is an exchange consumer; it only accepts remote
/// splits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Split {
    /// A remote producer location.
    Remote(RemoteSplit),
    /// A connector-local split, meaningless to exchange operators.
    Connector {
        /// Connector the split belongs to.
        connector_id: String,
    },
}

/// Failure reported by an exchange client.
///
/// Cloneable so it can be handed to both the failure callback and the
/// consumer side of the page buffer.
#[derive(Debug, Clone)]
pub struct ExchangeFailure {
    /// Task whose exchange failed.
    pub task_id: String,
    /// Human-readable failure description.
    pub message: String,
}

/// Pulls serialized pages from one remote producer.
///
/// Transport concerns (framing, wire retries, timeouts) live behind this
/// trait; the operator only sees a lazy sequence of serialized pages.
#[async_trait]
pub trait ExchangeClient: Send + 'static {
    /// Fetch the next serialized page; `None` once the producer is drained.
    async fn next_page(&mut self) -> Result<Option<SerializedPage>, ExchangeFailure>;
}

/// Creates one exchange client per remote split.
pub trait ExchangeClientFactory: Send + Sync {
    /// Open a client for the given split.
    fn create(&self, split: &RemoteSplit) -> Box<dyn ExchangeClient>;
}

/// Callback invoked when an exchange client fails, so the surrounding task
/// learns about the failure even before the merge consumes up to it.
pub type FailureCallback = Arc<dyn Fn(ExchangeFailure) + Send + Sync>;

enum BufferState {
    Open,
    Closed,
    Failed(ExchangeFailure),
}

struct BufferedPage {
    page: SerializedPage,
    /// Charged against the operator's memory context while buffered.
    _reservation: MemoryReservation,
}

struct BufferInner {
    pages: VecDeque<BufferedPage>,
    state: BufferState,
}

/// Result of a non-blocking pop from a [`PageBuffer`].
pub(crate) enum BufferPoll {
    /// A serialized page was dequeued.
    Page(SerializedPage),
    /// Nothing buffered yet; the producer is still running.
    Empty,
    /// Producer drained and all pages consumed.
    Finished,
    /// Producer failed; pages before the failure have all been consumed.
    Failed(ExchangeFailure),
}

/// Bounded single-producer single-consumer buffer of serialized pages.
///
/// The bound is the backpressure mechanism; buffered bytes are charged
/// against the operator's memory context until consumed.
pub(crate) struct PageBuffer {
    inner: Mutex<BufferInner>,
    capacity: usize,
    memory: MemoryContext,
    /// Signalled on push, close, or failure.
    consumer: Notify,
    /// Signalled on pop, so a full producer can make progress.
    producer: Notify,
}

impl PageBuffer {
    pub(crate) fn new(capacity: usize, memory: MemoryContext) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(BufferInner {
                pages: VecDeque::with_capacity(capacity),
                state: BufferState::Open,
            }),
            capacity,
            memory,
            consumer: Notify::new(),
            producer: Notify::new(),
        })
    }

    /// Producer side; waits while the buffer is at capacity. Returns without
    /// queueing once the buffer is closed.
    pub(crate) async fn push(&self, page: SerializedPage) {
        let mut page = Some(page);
        loop {
            let drained = self.producer.notified();
            {
                let mut inner = self.inner.lock();
                if !matches!(inner.state, BufferState::Open) {
                    return;
                }
                if inner.pages.len() < self.capacity {
                    if let Some(page) = page.take() {
                        let reservation = self.memory.reserve(page.wire_bytes());
                        inner.pages.push_back(BufferedPage {
                            page,
                            _reservation: reservation,
                        });
                    }
                    self.consumer.notify_one();
                    return;
                }
            }
            drained.await;
        }
    }

    /// Mark the producer as drained.
    pub(crate) fn close(&self) {
        let mut inner = self.inner.lock();
        if matches!(inner.state, BufferState::Open) {
            inner.state = BufferState::Closed;
        }
        self.consumer.notify_one();
        self.producer.notify_one();
    }

    /// Record a producer failure. Pages buffered before the failure are
    /// still delivered first.
    pub(crate) fn fail(&self, failure: ExchangeFailure) {
        let mut inner = self.inner.lock();
        if matches!(inner.state, BufferState::Open) {
            inner.state = BufferState::Failed(failure);
        }
        self.consumer.notify_one();
        self.producer.notify_one();
    }

    /// Consumer side, non-blocking.
    pub(crate) fn poll_pop(&self) -> BufferPoll {
        let mut inner = self.inner.lock();
        if let Some(buffered) = inner.pages.pop_front() {
            self.producer.notify_one();
            return BufferPoll::Page(buffered.page);
        }
        match &inner.state {
            BufferState::Open => BufferPoll::Empty,
            BufferState::Closed => BufferPoll::Finished,
            BufferState::Failed(failure) => BufferPoll::Failed(failure.clone()),
        }
    }

    /// Future resolving once a page, close, or failure is observable.
    pub(crate) fn wait_for_page(self: Arc<Self>) -> BoxFuture<'static, ()> {
        let buffer = self;
        async move {
            loop {
                let pushed = buffer.consumer.notified();
                {
                    let inner = buffer.inner.lock();
                    if !inner.pages.is_empty() || !matches!(inner.state, BufferState::Open) {
                        return;
                    }
                }
                pushed.await;
            }
        }
        .boxed()
    }
}

/// Spawn the pump task moving pages from one client into its buffer.
pub(crate) fn spawn_exchange_pump(
    task_id: String,
    mut client: Box<dyn ExchangeClient>,
    buffer: Arc<PageBuffer>,
    cancel: CancellationToken,
    on_failure: Option<FailureCallback>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        debug!(task_id = %task_id, "exchange pump started");
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(task_id = %task_id, "exchange pump cancelled");
                    return;
                }
                next = client.next_page() => next,
            };
            match next {
                Ok(Some(page)) => buffer.push(page).await,
                Ok(None) => {
                    debug!(task_id = %task_id, "exchange drained");
                    buffer.close();
                    return;
                }
                Err(failure) => {
                    warn!(
                        task_id = %failure.task_id,
                        message = %failure.message,
                        "exchange client failed"
                    );
                    if let Some(callback) = &on_failure {
                        callback(failure.clone());
                    }
                    buffer.fail(failure);
                    return;
                }
            }
        }
    })
}
