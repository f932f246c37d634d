//! K-way ordered merge over per-source page streams.
//!
//! A tournament min-heap holds one entry per source with a current page.
//! Entries carry the encoded sort key of the source's current row plus the
//! source index, so equal keys resolve to the earlier-indexed source and the
//! merge is stable. The engine retains at most one page per source plus the
//! output builder.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;

use arrow::datatypes::SchemaRef;
use arrow::row::{OwnedRow, Rows};
use futures::FutureExt;

use crate::builder::{FullnessPredicate, OutputPageBuilder};
use crate::error::{ConfigurationSnafu, Result, SchemaMismatchSnafu};
use crate::memory::{MemoryContext, MemoryReservation};
use crate::page::Page;
use crate::sort::{RowKeyEncoder, SortKey};
use crate::source::{BlockedFuture, PagePoll, PageSource};
use crate::yield_signal::YieldSignal;

/// Result of driving the engine one step.
pub enum EnginePoll {
    /// A complete output page.
    Ready(Page),
    /// A source the merge needs has no page yet; the future resolves when
    /// any parked source advances.
    Blocked(BlockedFuture),
    /// The yield signal was raised; call again to resume from the same
    /// heap state.
    Yielded,
    /// All sources terminated and every row has been emitted.
    Finished,
}

struct HeapEntry {
    key: OwnedRow,
    source: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.source == other.source
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.key
            .cmp(&other.key)
            .then_with(|| self.source.cmp(&other.source))
    }
}

struct CursorPage {
    page: Arc<Page>,
    rows: Rows,
    /// Held while this page is the cursor's current page.
    _reservation: MemoryReservation,
}

struct SourceCursor {
    source: Box<dyn PageSource>,
    page: Option<CursorPage>,
    position: usize,
    finished: bool,
}

impl SourceCursor {
    fn new(source: Box<dyn PageSource>) -> Self {
        Self {
            source,
            page: None,
            position: 0,
            finished: false,
        }
    }
}

enum RefillState {
    /// Every unfinished source holds a current page.
    Ready,
    /// At least one needed source has no page yet.
    Parked(Vec<BlockedFuture>),
}

/// Merges k locally-sorted page sources into one globally-sorted stream.
pub struct MergeEngine {
    schema: SchemaRef,
    encoder: RowKeyEncoder,
    cursors: Vec<SourceCursor>,
    heap: BinaryHeap<Reverse<HeapEntry>>,
    builder: OutputPageBuilder,
    fullness: FullnessPredicate,
    yield_signal: YieldSignal,
    memory: MemoryContext,
    finished: bool,
}

impl MergeEngine {
    /// Build an engine over the given sources.
    ///
    /// Sort and output channels are validated against `schema` here; a page
    /// that later arrives with a different shape fails the merge.
    pub fn new(
        sources: Vec<Box<dyn PageSource>>,
        schema: SchemaRef,
        sort_key: &SortKey,
        output_channels: &[usize],
        fullness: FullnessPredicate,
        yield_signal: YieldSignal,
        memory: MemoryContext,
    ) -> Result<Self> {
        let encoder = RowKeyEncoder::new(&schema, sort_key)?;
        let builder = OutputPageBuilder::new(&schema, output_channels, &memory)?;
        let cursors = sources.into_iter().map(SourceCursor::new).collect();
        Ok(Self {
            schema,
            encoder,
            cursors,
            heap: BinaryHeap::new(),
            builder,
            fullness,
            yield_signal,
            memory,
            finished: false,
        })
    }

    /// Whether every row has been emitted.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Memory context charged for retained pages and the builder.
    pub fn memory(&self) -> &MemoryContext {
        &self.memory
    }

    /// Refill-only peek for the operator's `is_blocked`: pulls pages into
    /// idle cursors without consuming any row.
    pub fn poll_blocked(&mut self) -> Result<Option<BlockedFuture>> {
        if self.finished {
            return Ok(None);
        }
        match self.refill()? {
            RefillState::Ready => Ok(None),
            RefillState::Parked(parked) => Ok(Some(combine_blocked(parked))),
        }
    }

    /// Drive the merge one step.
    pub fn poll_merged(&mut self) -> Result<EnginePoll> {
        if self.finished {
            return Ok(EnginePoll::Finished);
        }
        loop {
            if let RefillState::Parked(parked) = self.refill()? {
                // Hand over a complete page before parking if one is ready.
                if !self.builder.is_empty() && (self.fullness)(&self.builder) {
                    return Ok(EnginePoll::Ready(self.builder.build()?));
                }
                return Ok(EnginePoll::Blocked(combine_blocked(parked)));
            }

            if self.heap.is_empty() {
                self.finished = true;
                if !self.builder.is_empty() {
                    return Ok(EnginePoll::Ready(self.builder.build()?));
                }
                return Ok(EnginePoll::Finished);
            }

            // Append rows until an emission, a yield, or a source runs out
            // of its current page.
            loop {
                if self.yield_signal.is_raised() {
                    if !self.builder.is_empty() && (self.fullness)(&self.builder) {
                        return Ok(EnginePoll::Ready(self.builder.build()?));
                    }
                    return Ok(EnginePoll::Yielded);
                }

                let Some(Reverse(entry)) = self.heap.pop() else {
                    break;
                };
                let source_index = entry.source;

                let (exhausted, next_key) = {
                    let cursor = &mut self.cursors[source_index];
                    let Some(current) = cursor.page.as_ref() else {
                        return ConfigurationSnafu {
                            message: "merge heap referenced a source without a page".to_string(),
                        }
                        .fail();
                    };
                    self.builder.append(&current.page, cursor.position);
                    cursor.position += 1;
                    if cursor.position < current.page.row_count() {
                        (false, Some(current.rows.row(cursor.position).owned()))
                    } else {
                        (true, None)
                    }
                };

                if let Some(key) = next_key {
                    self.heap.push(Reverse(HeapEntry {
                        key,
                        source: source_index,
                    }));
                }

                if exhausted {
                    // Release the consumed page and its reservation; the
                    // refill pass pulls the source's next page.
                    self.cursors[source_index].page = None;
                    self.cursors[source_index].position = 0;
                    if (self.fullness)(&self.builder) {
                        return Ok(EnginePoll::Ready(self.builder.build()?));
                    }
                    break;
                }

                if (self.fullness)(&self.builder) {
                    return Ok(EnginePoll::Ready(self.builder.build()?));
                }
            }
        }
    }

    fn refill(&mut self) -> Result<RefillState> {
        let mut parked = Vec::new();
        for index in 0..self.cursors.len() {
            loop {
                let cursor = &mut self.cursors[index];
                if cursor.finished || cursor.page.is_some() {
                    break;
                }
                match cursor.source.poll_page()? {
                    PagePoll::Ready(page) => {
                        if page.row_count() == 0 {
                            // Empty pages carry no rows; keep pulling.
                            continue;
                        }
                        validate_page_schema(&self.schema, index, &page)?;
                        let rows = self.encoder.encode(&page)?;
                        let reservation = self.memory.reserve(page.byte_size());
                        self.heap.push(Reverse(HeapEntry {
                            key: rows.row(0).owned(),
                            source: index,
                        }));
                        self.cursors[index].page = Some(CursorPage {
                            page: Arc::new(page),
                            rows,
                            _reservation: reservation,
                        });
                        self.cursors[index].position = 0;
                        break;
                    }
                    PagePoll::Pending(blocked) => {
                        parked.push(blocked);
                        break;
                    }
                    PagePoll::Finished => {
                        cursor.finished = true;
                        break;
                    }
                }
            }
        }
        if parked.is_empty() {
            Ok(RefillState::Ready)
        } else {
            Ok(RefillState::Parked(parked))
        }
    }
}

fn combine_blocked(mut parked: Vec<BlockedFuture>) -> BlockedFuture {
    if parked.len() == 1 {
        return parked.remove(0);
    }
    futures::future::select_all(parked)
        .map(|_| ())
        .boxed()
        .shared()
}

fn validate_page_schema(expected: &SchemaRef, source_index: usize, page: &Page) -> Result<()> {
    let actual = page.schema();
    let matches = actual.fields().len() == expected.fields().len()
        && expected
            .fields()
            .iter()
            .zip(actual.fields().iter())
            .all(|(e, a)| e.data_type() == a.data_type());
    if matches {
        Ok(())
    } else {
        SchemaMismatchSnafu {
            source_index,
            expected: type_list(expected),
            actual: type_list(&actual),
        }
        .fail()
    }
}

fn type_list(schema: &SchemaRef) -> String {
    schema
        .fields()
        .iter()
        .map(|field| field.data_type().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
