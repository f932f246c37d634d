//! Integration tests for the k-way merge engine.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use arrow::array::Int64Array;
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use futures::FutureExt;
use futures::future::BoxFuture;
use larch_merge::{
    EnginePoll, FullnessPredicate, MemoryContext, MergeEngine, Page, PagePoll, PageSource,
    Result, SortChannel, SortKey, SortOrder, YieldSignal,
};
use tokio::sync::Notify;

fn value_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![Field::new("v", DataType::Int64, true)]))
}

fn tagged_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("v", DataType::Int64, true),
        Field::new("tag", DataType::Int64, true),
    ]))
}

fn value_page(values: &[i64]) -> Page {
    let batch = RecordBatch::try_new(
        value_schema(),
        vec![Arc::new(Int64Array::from(values.to_vec()))],
    )
    .unwrap();
    Page::new(batch)
}

fn tagged_page(values: &[i64], tags: &[i64]) -> Page {
    let batch = RecordBatch::try_new(
        tagged_schema(),
        vec![
            Arc::new(Int64Array::from(values.to_vec())),
            Arc::new(Int64Array::from(tags.to_vec())),
        ],
    )
    .unwrap();
    Page::new(batch)
}

fn column_values(page: &Page, channel: usize) -> Vec<i64> {
    let array = page
        .column(channel)
        .as_any()
        .downcast_ref::<Int64Array>()
        .unwrap();
    (0..array.len()).map(|i| array.value(i)).collect()
}

/// A gate a scripted source can block behind until a test opens it.
struct Gate {
    open: AtomicBool,
    notify: Notify,
}

impl Gate {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            open: AtomicBool::new(false),
            notify: Notify::new(),
        })
    }

    fn open(&self) {
        self.open.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    fn wait(self: Arc<Self>) -> BoxFuture<'static, ()> {
        let gate = self;
        async move {
            loop {
                if gate.open.load(Ordering::SeqCst) {
                    return;
                }
                let notified = gate.notify.notified();
                if gate.open.load(Ordering::SeqCst) {
                    return;
                }
                notified.await;
            }
        }
        .boxed()
    }
}

enum Step {
    Page(Page),
    Gate(Arc<Gate>),
}

/// Replays a script of pages and gates; finishes when the script runs out.
struct ScriptedSource {
    steps: VecDeque<Step>,
}

impl ScriptedSource {
    fn new(steps: Vec<Step>) -> Box<Self> {
        Box::new(Self {
            steps: steps.into(),
        })
    }

    fn of_pages(pages: Vec<Page>) -> Box<Self> {
        Self::new(pages.into_iter().map(Step::Page).collect())
    }
}

impl PageSource for ScriptedSource {
    fn poll_page(&mut self) -> Result<PagePoll> {
        loop {
            match self.steps.front() {
                None => return Ok(PagePoll::Finished),
                Some(Step::Gate(gate)) => {
                    if !gate.open.load(Ordering::SeqCst) {
                        return Ok(PagePoll::Pending(Arc::clone(gate).wait().shared()));
                    }
                    self.steps.pop_front();
                }
                Some(Step::Page(_)) => {
                    let Some(Step::Page(page)) = self.steps.pop_front() else {
                        unreachable!()
                    };
                    return Ok(PagePoll::Ready(page));
                }
            }
        }
    }
}

fn ascending_key() -> SortKey {
    SortKey::new(vec![SortChannel::new(0, SortOrder::AscNullsLast)])
}

fn rows_fullness(rows: usize) -> FullnessPredicate {
    Arc::new(move |builder| builder.row_count() >= rows)
}

fn engine_over(
    sources: Vec<Box<dyn PageSource>>,
    schema: SchemaRef,
    output_channels: &[usize],
    fullness: FullnessPredicate,
) -> (MergeEngine, MemoryContext, YieldSignal) {
    let memory = MemoryContext::new();
    let yield_signal = YieldSignal::new();
    let engine = MergeEngine::new(
        sources,
        schema,
        &ascending_key(),
        output_channels,
        fullness,
        yield_signal.clone(),
        memory.clone(),
    )
    .unwrap();
    (engine, memory, yield_signal)
}

async fn drain(engine: &mut MergeEngine) -> Vec<Page> {
    let mut pages = Vec::new();
    loop {
        match engine.poll_merged().unwrap() {
            EnginePoll::Ready(page) => pages.push(page),
            EnginePoll::Blocked(blocked) => blocked.await,
            EnginePoll::Yielded => continue,
            EnginePoll::Finished => break,
        }
    }
    pages
}

#[tokio::test]
async fn interleaved_sources_merge_into_sorted_pages() {
    let sources: Vec<Box<dyn PageSource>> = vec![
        ScriptedSource::of_pages(vec![value_page(&[1, 3, 5])]),
        ScriptedSource::of_pages(vec![value_page(&[2, 4, 6])]),
    ];
    let (mut engine, memory, _) =
        engine_over(sources, value_schema(), &[0], rows_fullness(3));

    let pages = drain(&mut engine).await;
    assert_eq!(pages.len(), 2);
    assert_eq!(column_values(&pages[0], 0), vec![1, 2, 3]);
    assert_eq!(column_values(&pages[1], 0), vec![4, 5, 6]);
    assert!(engine.is_finished());
    assert_eq!(memory.reserved_bytes(), 0);
}

#[tokio::test]
async fn equal_keys_are_emitted_in_source_index_order() {
    let sources: Vec<Box<dyn PageSource>> = vec![
        ScriptedSource::of_pages(vec![tagged_page(&[1, 1], &[10, 11])]),
        ScriptedSource::of_pages(vec![tagged_page(&[1], &[20])]),
    ];
    let (mut engine, _, _) =
        engine_over(sources, tagged_schema(), &[0, 1], rows_fullness(100));

    let pages = drain(&mut engine).await;
    assert_eq!(pages.len(), 1);
    assert_eq!(column_values(&pages[0], 1), vec![10, 11, 20]);
}

#[tokio::test]
async fn blocked_source_parks_the_engine_until_it_advances() {
    let gate = Gate::new();
    let sources: Vec<Box<dyn PageSource>> = vec![
        ScriptedSource::new(vec![Step::Gate(Arc::clone(&gate)), Step::Page(value_page(&[1]))]),
        ScriptedSource::of_pages(vec![value_page(&[2])]),
    ];
    let (mut engine, _, _) = engine_over(sources, value_schema(), &[0], rows_fullness(100));

    let blocked = match engine.poll_merged().unwrap() {
        EnginePoll::Blocked(blocked) => blocked,
        _ => panic!("engine should be blocked on the gated source"),
    };
    assert!(blocked.clone().now_or_never().is_none());

    gate.open();
    blocked.await;

    let pages = drain(&mut engine).await;
    assert_eq!(pages.len(), 1);
    assert_eq!(column_values(&pages[0], 0), vec![1, 2]);
}

#[tokio::test]
async fn output_row_count_matches_input_and_memory_drains() {
    let sources: Vec<Box<dyn PageSource>> = vec![
        ScriptedSource::of_pages(vec![value_page(&[1, 4]), value_page(&[7, 9, 11])]),
        ScriptedSource::of_pages(vec![value_page(&[2, 3, 8])]),
        ScriptedSource::of_pages(vec![value_page(&[5]), value_page(&[6, 10])]),
    ];
    let (mut engine, memory, _) = engine_over(sources, value_schema(), &[0], rows_fullness(4));

    let pages = drain(&mut engine).await;
    let all: Vec<i64> = pages.iter().flat_map(|p| column_values(p, 0)).collect();
    assert_eq!(all, (1..=11).collect::<Vec<i64>>());
    assert_eq!(memory.reserved_bytes(), 0);
}

#[tokio::test]
async fn raised_yield_signal_returns_control() {
    let sources: Vec<Box<dyn PageSource>> =
        vec![ScriptedSource::of_pages(vec![value_page(&[1, 2, 3])])];
    let (mut engine, _, yield_signal) =
        engine_over(sources, value_schema(), &[0], rows_fullness(100));

    yield_signal.raise();
    assert!(matches!(engine.poll_merged().unwrap(), EnginePoll::Yielded));

    yield_signal.reset();
    let pages = drain(&mut engine).await;
    assert_eq!(pages.len(), 1);
    assert_eq!(column_values(&pages[0], 0), vec![1, 2, 3]);
}

#[tokio::test]
async fn mismatched_page_schema_fails_the_merge() {
    let sources: Vec<Box<dyn PageSource>> =
        vec![ScriptedSource::of_pages(vec![tagged_page(&[1], &[10])])];
    let (mut engine, _, _) = engine_over(sources, value_schema(), &[0], rows_fullness(100));

    assert!(engine.poll_merged().is_err());
}

#[tokio::test]
async fn no_sources_finishes_immediately() {
    let (mut engine, _, _) = engine_over(Vec::new(), value_schema(), &[0], rows_fullness(4));
    assert!(matches!(engine.poll_merged().unwrap(), EnginePoll::Finished));
    assert!(engine.is_finished());
}
