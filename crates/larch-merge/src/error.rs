//! Error types for the merge pipeline.

use snafu::Snafu;

/// Result type for merge operations.
pub type Result<T, E = MergeError> = std::result::Result<T, E>;

/// Errors that can occur in the merge operator and engine.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum MergeError {
    /// The operator or engine was wired together incorrectly.
    #[snafu(display("invalid merge configuration: {message}"))]
    Configuration {
        /// What was wrong.
        message: String,
    },

    /// The driver handed this source stage a non-remote split.
    #[snafu(display("split is not a remote split"))]
    UnsupportedSplit,

    /// A source produced a page whose shape differs from the configured schema.
    #[snafu(display(
        "source {source_index} produced a page with mismatched schema: expected [{expected}], got [{actual}]"
    ))]
    SchemaMismatch {
        /// Index of the offending source.
        source_index: usize,
        /// Expected column types.
        expected: String,
        /// Observed column types.
        actual: String,
    },

    /// An exchange client failed; fatal to the whole operator.
    #[snafu(display("exchange client for task {task_id} failed: {message}"))]
    Transport {
        /// Remote task whose exchange failed.
        task_id: String,
        /// Failure reported by the client.
        message: String,
    },

    /// A serialized page could not be decoded.
    #[snafu(display("failed to deserialize page: {source}"))]
    Deserialization {
        /// Underlying decode error.
        source: arrow::error::ArrowError,
    },

    /// An arrow kernel failed while encoding sort keys or assembling output.
    #[snafu(display("arrow computation failed: {source}"))]
    Arrow {
        /// Underlying arrow error.
        source: arrow::error::ArrowError,
    },

    /// `add_input` was called on a source stage.
    #[snafu(display("merge operator cannot take input"))]
    AddInputUnsupported,

    /// An operation was attempted in a state that does not permit it.
    #[snafu(display("merge operator is {state}, cannot {operation}"))]
    InvalidState {
        /// Current operator state.
        state: String,
        /// Operation that was attempted.
        operation: String,
    },
}
