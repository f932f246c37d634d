//! Merge operator shell: lifecycle seen by the pipeline driver.
//!
//! The driver is a single cooperative thread calling `add_split` /
//! `no_more_splits` / `is_blocked` / `get_output` / `finish` / `close` in
//! order. All waits are expressed as futures; the operator never blocks.

use std::sync::Arc;

use arrow::datatypes::SchemaRef;
use futures::FutureExt;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::builder::{FullnessPredicate, default_fullness};
use crate::constants::EXCHANGE_BUFFER_PAGES;
use crate::engine::{EnginePoll, MergeEngine};
use crate::error::{
    AddInputUnsupportedSnafu, InvalidStateSnafu, Result, UnsupportedSplitSnafu,
};
use crate::exchange::{
    ExchangeClientFactory, FailureCallback, PageBuffer, RemoteSplit, Split, spawn_exchange_pump,
};
use crate::memory::MemoryContext;
use crate::page::{Page, PageSerde};
use crate::sort::SortKey;
use crate::source::{BlockedFuture, ExchangePageSource, PageSource, not_blocked};
use crate::stats::{OperatorStats, OperatorStatsSnapshot};
use crate::yield_signal::YieldSignal;

/// Lifecycle state of a merge operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorState {
    /// Splits may still be added; the engine does not exist yet.
    AcceptingSplits,
    /// The engine is materialized and producing output.
    Merging,
    /// The engine is exhausted.
    Finished,
    /// All resources have been released.
    Closed,
}

impl std::fmt::Display for OperatorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            OperatorState::AcceptingSplits => "accepting splits",
            OperatorState::Merging => "merging",
            OperatorState::Finished => "finished",
            OperatorState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Creates merge operators for one plan node.
pub struct MergeOperatorFactory {
    client_factory: Arc<dyn ExchangeClientFactory>,
    schema: SchemaRef,
    sort_key: SortKey,
    output_channels: Vec<usize>,
    closed: bool,
}

impl MergeOperatorFactory {
    /// Build a factory. Sort and output channels are validated eagerly so a
    /// misconfigured plan fails at construction, not mid-query.
    pub fn new(
        client_factory: Arc<dyn ExchangeClientFactory>,
        schema: SchemaRef,
        sort_key: SortKey,
        output_channels: Vec<usize>,
    ) -> Result<Self> {
        // Validation only; the per-operator engine rebuilds these.
        let memory = MemoryContext::new();
        crate::sort::RowKeyEncoder::new(&schema, &sort_key)?;
        crate::builder::OutputPageBuilder::new(&schema, &output_channels, &memory)?;
        Ok(Self {
            client_factory,
            schema,
            sort_key,
            output_channels,
            closed: false,
        })
    }

    /// Create one operator instance.
    pub fn create_operator(&self) -> Result<MergeOperator> {
        snafu::ensure!(
            !self.closed,
            InvalidStateSnafu {
                state: "closed".to_string(),
                operation: "create operator".to_string(),
            }
        );
        Ok(MergeOperator::new(
            Arc::clone(&self.client_factory),
            self.schema.clone(),
            self.sort_key.clone(),
            self.output_channels.clone(),
        ))
    }

    /// No further operators will be created.
    pub fn no_more_operators(&mut self) {
        self.closed = true;
    }
}

struct RegisteredClient {
    task_id: String,
    cancel: CancellationToken,
    buffer: Arc<PageBuffer>,
    pump: JoinHandle<()>,
}

/// The merge pipeline stage.
pub struct MergeOperator {
    client_factory: Arc<dyn ExchangeClientFactory>,
    schema: SchemaRef,
    sort_key: SortKey,
    output_channels: Vec<usize>,
    serde: Arc<PageSerde>,

    state: OperatorState,
    splits_done: Option<oneshot::Sender<()>>,
    blocked_on_splits: BlockedFuture,
    sources: Vec<Box<dyn PageSource>>,
    clients: Vec<RegisteredClient>,
    engine: Option<MergeEngine>,

    memory: MemoryContext,
    stats: Arc<OperatorStats>,
    yield_signal: YieldSignal,
    fullness: FullnessPredicate,
    failure_callback: Option<FailureCallback>,
}

impl MergeOperator {
    fn new(
        client_factory: Arc<dyn ExchangeClientFactory>,
        schema: SchemaRef,
        sort_key: SortKey,
        output_channels: Vec<usize>,
    ) -> Self {
        let (splits_done, splits_rx) = oneshot::channel::<()>();
        let blocked_on_splits = splits_rx.map(|_| ()).boxed().shared();
        let serde = Arc::new(PageSerde::new(schema.clone()));
        Self {
            client_factory,
            schema,
            sort_key,
            output_channels,
            serde,
            state: OperatorState::AcceptingSplits,
            splits_done: Some(splits_done),
            blocked_on_splits,
            sources: Vec::new(),
            clients: Vec::new(),
            engine: None,
            memory: MemoryContext::new(),
            stats: Arc::new(OperatorStats::new()),
            yield_signal: YieldSignal::new(),
            fullness: default_fullness(),
            failure_callback: None,
        }
    }

    /// Replace the default fullness predicate.
    pub fn set_fullness(&mut self, fullness: FullnessPredicate) {
        self.fullness = fullness;
    }

    /// Wire the callback invoked when an exchange client fails, so the
    /// surrounding task fails fast instead of waiting for the merge to
    /// consume up to the failure.
    pub fn set_failure_callback(&mut self, callback: FailureCallback) {
        self.failure_callback = Some(callback);
    }

    /// Yield signal shared with the driver.
    pub fn yield_signal(&self) -> &YieldSignal {
        &self.yield_signal
    }

    /// Memory context for retained pages and the output builder.
    pub fn memory(&self) -> &MemoryContext {
        &self.memory
    }

    /// Operator statistics snapshot.
    pub fn stats(&self) -> OperatorStatsSnapshot {
        self.stats.snapshot()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> OperatorState {
        self.state
    }

    /// Register one remote producer.
    pub fn add_split(&mut self, split: Split) -> Result<()> {
        snafu::ensure!(
            self.state == OperatorState::AcceptingSplits,
            InvalidStateSnafu {
                state: self.state.to_string(),
                operation: "add split".to_string(),
            }
        );
        let Split::Remote(remote) = split else {
            return UnsupportedSplitSnafu.fail();
        };
        self.register_remote(remote);
        Ok(())
    }

    fn register_remote(&mut self, remote: RemoteSplit) {
        debug!(task_id = %remote.task_id, location = %remote.location, "registering remote split");
        let client = self.client_factory.create(&remote);
        let buffer = PageBuffer::new(EXCHANGE_BUFFER_PAGES, self.memory.clone());
        let cancel = CancellationToken::new();
        let pump = spawn_exchange_pump(
            remote.task_id.clone(),
            client,
            Arc::clone(&buffer),
            cancel.clone(),
            self.failure_callback.clone(),
        );
        self.sources.push(Box::new(ExchangePageSource::new(
            remote.task_id.clone(),
            Arc::clone(&buffer),
            Arc::clone(&self.serde),
            Arc::clone(&self.stats),
        )));
        self.clients.push(RegisteredClient {
            task_id: remote.task_id,
            cancel,
            buffer,
            pump,
        });
    }

    /// Close the split set and materialize the engine.
    pub fn no_more_splits(&mut self) -> Result<()> {
        snafu::ensure!(
            self.state == OperatorState::AcceptingSplits,
            InvalidStateSnafu {
                state: self.state.to_string(),
                operation: "close split set".to_string(),
            }
        );
        let sources = std::mem::take(&mut self.sources);
        let engine = MergeEngine::new(
            sources,
            self.schema.clone(),
            &self.sort_key,
            &self.output_channels,
            Arc::clone(&self.fullness),
            self.yield_signal.clone(),
            self.memory.clone(),
        )?;
        self.engine = Some(engine);
        self.state = OperatorState::Merging;
        if let Some(done) = self.splits_done.take() {
            let _ = done.send(());
        }
        Ok(())
    }

    /// Completion signal the driver parks on.
    pub fn is_blocked(&mut self) -> Result<BlockedFuture> {
        match self.state {
            OperatorState::AcceptingSplits => Ok(self.blocked_on_splits.clone()),
            OperatorState::Merging => match self.engine.as_mut() {
                Some(engine) => match engine.poll_blocked()? {
                    Some(blocked) => Ok(blocked),
                    None => Ok(not_blocked()),
                },
                None => Ok(not_blocked()),
            },
            OperatorState::Finished | OperatorState::Closed => Ok(not_blocked()),
        }
    }

    /// This is a source stage; it never takes input.
    pub fn needs_input(&self) -> bool {
        false
    }

    /// Always an invariant violation on a source stage.
    pub fn add_input(&mut self, _page: Page) -> Result<()> {
        AddInputUnsupportedSnafu.fail()
    }

    /// Pull one merged page if one is ready.
    pub fn get_output(&mut self) -> Result<Option<Page>> {
        if self.state != OperatorState::Merging {
            return Ok(None);
        }
        let Some(engine) = self.engine.as_mut() else {
            return Ok(None);
        };
        match engine.poll_merged()? {
            EnginePoll::Ready(page) => {
                self.stats
                    .record_output(page.byte_size() as u64, page.row_count() as u64);
                Ok(Some(page))
            }
            EnginePoll::Blocked(_) | EnginePoll::Yielded => Ok(None),
            EnginePoll::Finished => {
                self.state = OperatorState::Finished;
                Ok(None)
            }
        }
    }

    /// Whether the operator will produce no further output.
    pub fn is_finished(&self) -> bool {
        matches!(self.state, OperatorState::Finished | OperatorState::Closed)
    }

    /// Finish is close for a source stage.
    pub fn finish(&mut self) {
        self.close();
    }

    /// Release every registered exchange client, newest first. In-flight
    /// deserializations are abandoned; pump tasks observe cancellation and
    /// drop their clients.
    pub fn close(&mut self) {
        if self.state == OperatorState::Closed {
            return;
        }
        self.state = OperatorState::Closed;
        // Dropping the sender resolves the splits future so a parked driver
        // wakes up and observes the closed state.
        self.splits_done.take();
        self.engine = None;
        self.sources.clear();
        for client in self.clients.drain(..).rev() {
            debug!(task_id = %client.task_id, "releasing exchange client");
            client.cancel.cancel();
            client.buffer.close();
            client.pump.abort();
        }
    }
}

impl Drop for MergeOperator {
    fn drop(&mut self) {
        self.close();
    }
}
