//! Page sources: the lazy per-producer streams the engine merges.

use std::sync::Arc;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};

use crate::error::{Result, TransportSnafu};
use crate::exchange::{BufferPoll, PageBuffer};
use crate::page::{Page, PageSerde};
use crate::stats::OperatorStats;

/// Completion signal handed to the driver while the pipeline is parked.
///
/// Cloneable so the same wait can be returned from repeated `is_blocked()`
/// calls.
pub type BlockedFuture = Shared<BoxFuture<'static, ()>>;

/// A blocked future that is already complete.
pub fn not_blocked() -> BlockedFuture {
    futures::future::ready(()).boxed().shared()
}

/// Result of asking a source for its next page without waiting.
pub enum PagePoll {
    /// A page is available.
    Ready(Page),
    /// Nothing yet; the future resolves when the source may have advanced.
    Pending(BlockedFuture),
    /// The source has terminated; it contributes no further pages.
    Finished,
}

/// A lazy, finite, non-restartable sequence of locally-sorted pages from
/// one remote producer.
///
/// Rows within the stream must be non-decreasing under the operator's sort
/// key; the engine validates shape (column count and types) but trusts the
/// producer's local ordering.
pub trait PageSource: Send {
    /// Try to advance to the next page.
    fn poll_page(&mut self) -> Result<PagePoll>;
}

/// Adapts one exchange client's buffered serialized pages into a
/// [`PageSource`], deserializing lazily and recording network input stats
/// per page.
pub(crate) struct ExchangePageSource {
    task_id: String,
    buffer: Arc<PageBuffer>,
    serde: Arc<PageSerde>,
    stats: Arc<OperatorStats>,
}

impl ExchangePageSource {
    pub(crate) fn new(
        task_id: String,
        buffer: Arc<PageBuffer>,
        serde: Arc<PageSerde>,
        stats: Arc<OperatorStats>,
    ) -> Self {
        Self {
            task_id,
            buffer,
            serde,
            stats,
        }
    }
}

impl PageSource for ExchangePageSource {
    fn poll_page(&mut self) -> Result<PagePoll> {
        match self.buffer.poll_pop() {
            BufferPoll::Page(serialized) => {
                let page = self.serde.deserialize(&serialized)?;
                self.stats
                    .record_network_input(serialized.wire_bytes() as u64, page.row_count() as u64);
                Ok(PagePoll::Ready(page))
            }
            BufferPoll::Empty => Ok(PagePoll::Pending(
                Arc::clone(&self.buffer).wait_for_page().shared(),
            )),
            BufferPoll::Finished => Ok(PagePoll::Finished),
            BufferPoll::Failed(failure) => TransportSnafu {
                task_id: failure.task_id,
                message: failure.message,
            }
            .fail(),
        }
    }
}

impl std::fmt::Debug for ExchangePageSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangePageSource")
            .field("task_id", &self.task_id)
            .finish_non_exhaustive()
    }
}
