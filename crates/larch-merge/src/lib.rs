//! Streaming ordered merge operator for the Larch distributed SQL engine.
//!
//! This crate implements the receive side of a sorted distributed exchange:
//! each remote task produces a locally-sorted stream of columnar pages, and
//! the merge operator combines those streams into a single globally-sorted
//! output stream without ever buffering more than one page per source.
//!
//! # Architecture
//!
//! ```text
//! Driver (single cooperative thread)
//!     |
//!     v
//! MergeOperator (lifecycle shell: splits, blocked futures, output)
//!     |
//!     +-- ExchangeClient pump task --> PageBuffer --+
//!     +-- ExchangeClient pump task --> PageBuffer --+--> PageSource adapters
//!     +-- ExchangeClient pump task --> PageBuffer --+        |
//!                                                            v
//!                                                     MergeEngine
//!                                                 (k-way heap + builder)
//! ```
//!
//! The engine never blocks a thread: when a source has no page ready, the
//! whole pipeline parks behind a [`source::BlockedFuture`] that resolves as
//! soon as any parked source advances. Cooperative scheduling is handled by
//! a [`yield_signal::YieldSignal`] checked between row appends.

#![warn(missing_docs)]

pub mod builder;
pub mod constants;
pub mod engine;
pub mod error;
pub mod exchange;
pub mod memory;
pub mod operator;
pub mod page;
pub mod sort;
pub mod source;
pub mod stats;
pub mod yield_signal;

pub use builder::{FullnessPredicate, OutputPageBuilder, default_fullness};
pub use engine::{EnginePoll, MergeEngine};
pub use error::{MergeError, Result};
pub use exchange::{ExchangeClient, ExchangeClientFactory, ExchangeFailure, RemoteSplit, Split};
pub use memory::{MemoryContext, MemoryReservation};
pub use operator::{MergeOperator, MergeOperatorFactory, OperatorState};
pub use page::{Page, PageSerde, SerializedPage};
pub use sort::{SortChannel, SortKey, SortOrder};
pub use source::{BlockedFuture, PagePoll, PageSource, not_blocked};
pub use stats::{OperatorStats, OperatorStatsSnapshot};
pub use yield_signal::YieldSignal;
