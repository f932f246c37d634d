//! Output page assembly for the merge engine.

use std::sync::Arc;

use arrow::array::{Array, ArrayRef};
use arrow::compute::interleave;
use arrow::datatypes::{Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use snafu::ResultExt;

use crate::constants::{DEFAULT_MAX_PAGE_BYTES, DEFAULT_MAX_PAGE_ROWS};
use crate::error::{ArrowSnafu, ConfigurationSnafu, Result};
use crate::memory::{MemoryContext, MemoryReservation};
use crate::page::Page;

/// Decides when an output page under construction is complete.
pub type FullnessPredicate = Arc<dyn Fn(&OutputPageBuilder) -> bool + Send + Sync>;

/// The default fullness predicate: the builder's internal size threshold.
pub fn default_fullness() -> FullnessPredicate {
    Arc::new(|builder| {
        builder.row_count() >= DEFAULT_MAX_PAGE_ROWS
            || builder.accumulated_bytes() >= DEFAULT_MAX_PAGE_BYTES
    })
}

/// Accumulates `(page, position)` references and assembles projected output
/// pages with the arrow interleave kernel.
///
/// The builder accounts for its own footprint against the pipeline's memory
/// context, resizing its reservation as rows accumulate and releasing it on
/// every build.
pub struct OutputPageBuilder {
    output_schema: SchemaRef,
    output_channels: Vec<usize>,
    /// Distinct source pages referenced by queued rows.
    pages: Vec<Arc<Page>>,
    /// `(page slot, position)` pairs in output order.
    indices: Vec<(usize, usize)>,
    accumulated_bytes: usize,
    reservation: MemoryReservation,
}

impl OutputPageBuilder {
    /// Create a builder projecting `output_channels` out of `input_schema`.
    pub(crate) fn new(
        input_schema: &SchemaRef,
        output_channels: &[usize],
        memory: &MemoryContext,
    ) -> Result<Self> {
        snafu::ensure!(
            !output_channels.is_empty(),
            ConfigurationSnafu {
                message: "output projection must select at least one channel".to_string(),
            }
        );
        let mut fields = Vec::with_capacity(output_channels.len());
        for &channel in output_channels {
            let field = input_schema.fields().get(channel).ok_or_else(|| {
                crate::error::MergeError::Configuration {
                    message: format!(
                        "output channel {} out of range for schema with {} columns",
                        channel,
                        input_schema.fields().len()
                    ),
                }
            })?;
            fields.push(field.as_ref().clone());
        }
        Ok(Self {
            output_schema: Arc::new(Schema::new(fields)),
            output_channels: output_channels.to_vec(),
            pages: Vec::new(),
            indices: Vec::new(),
            accumulated_bytes: 0,
            reservation: memory.reserve(0),
        })
    }

    /// Schema of the pages this builder produces.
    pub fn output_schema(&self) -> &SchemaRef {
        &self.output_schema
    }

    /// Rows queued for the next output page.
    pub fn row_count(&self) -> usize {
        self.indices.len()
    }

    /// Estimated bytes queued for the next output page.
    pub fn accumulated_bytes(&self) -> usize {
        self.accumulated_bytes
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Queue one row of `page` for output.
    pub(crate) fn append(&mut self, page: &Arc<Page>, position: usize) {
        let slot = match self.pages.iter().rposition(|p| Arc::ptr_eq(p, page)) {
            Some(slot) => slot,
            None => {
                self.pages.push(Arc::clone(page));
                self.pages.len() - 1
            }
        };
        self.indices.push((slot, position));
        let rows = page.row_count().max(1);
        self.accumulated_bytes += page.byte_size() / rows;
        self.reservation.resize(self.accumulated_bytes);
    }

    /// Assemble the queued rows into one output page and reset the builder.
    pub(crate) fn build(&mut self) -> Result<Page> {
        let mut columns: Vec<ArrayRef> = Vec::with_capacity(self.output_channels.len());
        for &channel in &self.output_channels {
            let arrays: Vec<ArrayRef> = self
                .pages
                .iter()
                .map(|page| Arc::clone(page.column(channel)))
                .collect();
            let array_refs: Vec<&dyn Array> = arrays.iter().map(|a| a.as_ref()).collect();
            columns.push(interleave(&array_refs, &self.indices).context(ArrowSnafu)?);
        }
        let batch =
            RecordBatch::try_new(self.output_schema.clone(), columns).context(ArrowSnafu)?;

        self.pages.clear();
        self.indices.clear();
        self.accumulated_bytes = 0;
        self.reservation.resize(0);
        Ok(Page::new(batch))
    }
}
