//! Sort keys and order-preserving row encoding.
//!
//! The merge heap never compares arrow values directly. Instead the sort
//! columns of every pulled page are encoded once with
//! [`arrow::row::RowConverter`], which yields byte strings whose
//! lexicographic order equals the configured sort order. Heap entries then
//! compare by those bytes, with the source index as an explicit tie-break.

use arrow::array::ArrayRef;
use arrow::compute::SortOptions;
use arrow::datatypes::SchemaRef;
use arrow::row::{RowConverter, Rows, SortField};
use snafu::ResultExt;

use crate::error::{ArrowSnafu, ConfigurationSnafu, Result};
use crate::page::Page;

/// Direction and null placement for one sort channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    /// Ascending, nulls before all values.
    AscNullsFirst,
    /// Ascending, nulls after all values.
    AscNullsLast,
    /// Descending, nulls before all values.
    DescNullsFirst,
    /// Descending, nulls after all values.
    DescNullsLast,
}

impl SortOrder {
    /// Whether values sort ascending.
    pub fn is_ascending(self) -> bool {
        matches!(self, SortOrder::AscNullsFirst | SortOrder::AscNullsLast)
    }

    /// Whether nulls sort before all values.
    pub fn nulls_first(self) -> bool {
        matches!(self, SortOrder::AscNullsFirst | SortOrder::DescNullsFirst)
    }

    fn options(self) -> SortOptions {
        SortOptions {
            descending: !self.is_ascending(),
            nulls_first: self.nulls_first(),
        }
    }
}

/// One `(channel, order)` component of a sort key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortChannel {
    /// Input column the component sorts on.
    pub channel: usize,
    /// Direction and null placement.
    pub order: SortOrder,
}

impl SortChannel {
    /// Convenience constructor.
    pub fn new(channel: usize, order: SortOrder) -> Self {
        Self { channel, order }
    }
}

/// An ordered list of sort channels defining a total order on rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    channels: Vec<SortChannel>,
}

impl SortKey {
    /// Build a sort key; at least one channel is required.
    pub fn new(channels: Vec<SortChannel>) -> Self {
        Self { channels }
    }

    /// Components of the key, most significant first.
    pub fn channels(&self) -> &[SortChannel] {
        &self.channels
    }
}

/// Encodes the sort columns of pages into byte-comparable row keys.
pub struct RowKeyEncoder {
    converter: RowConverter,
    channels: Vec<usize>,
}

impl RowKeyEncoder {
    /// Build an encoder for the given schema and key.
    ///
    /// Fails with a configuration error when the key is empty or references
    /// a channel outside the schema, or when a sort column type is not
    /// orderable.
    pub fn new(schema: &SchemaRef, key: &SortKey) -> Result<Self> {
        snafu::ensure!(
            !key.channels().is_empty(),
            ConfigurationSnafu {
                message: "sort key must have at least one channel".to_string(),
            }
        );

        let mut fields = Vec::with_capacity(key.channels().len());
        let mut channels = Vec::with_capacity(key.channels().len());
        for component in key.channels() {
            let field = schema.fields().get(component.channel).ok_or_else(|| {
                crate::error::MergeError::Configuration {
                    message: format!(
                        "sort channel {} out of range for schema with {} columns",
                        component.channel,
                        schema.fields().len()
                    ),
                }
            })?;
            fields.push(SortField::new_with_options(
                field.data_type().clone(),
                component.order.options(),
            ));
            channels.push(component.channel);
        }

        let converter = RowConverter::new(fields).context(ArrowSnafu)?;
        Ok(Self { converter, channels })
    }

    /// Encode the sort columns of one page.
    pub fn encode(&self, page: &Page) -> Result<Rows> {
        let columns: Vec<ArrayRef> = self
            .channels
            .iter()
            .map(|&channel| page.column(channel).clone())
            .collect();
        self.converter.convert_columns(&columns).context(ArrowSnafu)
    }
}
