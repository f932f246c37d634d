//! Columnar pages and their wire representation.

use std::io::Cursor;

use arrow::array::ArrayRef;
use arrow::datatypes::SchemaRef;
use arrow::error::ArrowError;
use arrow::ipc::reader::StreamReader;
use arrow::ipc::writer::StreamWriter;
use arrow::record_batch::RecordBatch;
use snafu::ResultExt;

use crate::error::{ArrowSnafu, DeserializationSnafu, MergeError, Result};

/// An immutable columnar batch of rows flowing through the merge pipeline.
///
/// A *position* is a row index within one page; a *channel* is a column
/// index. The byte footprint is captured at construction and reported to
/// memory accounting while the page is retained.
#[derive(Debug, Clone)]
pub struct Page {
    batch: RecordBatch,
    byte_size: usize,
}

impl Page {
    /// Wrap a record batch as a page.
    pub fn new(batch: RecordBatch) -> Self {
        let byte_size = batch.get_array_memory_size();
        Self { batch, byte_size }
    }

    /// Number of rows in this page.
    pub fn row_count(&self) -> usize {
        self.batch.num_rows()
    }

    /// Number of columns in this page.
    pub fn channel_count(&self) -> usize {
        self.batch.num_columns()
    }

    /// In-memory byte footprint of the page's arrays.
    pub fn byte_size(&self) -> usize {
        self.byte_size
    }

    /// Column accessor.
    pub fn column(&self, channel: usize) -> &ArrayRef {
        self.batch.column(channel)
    }

    /// Schema of the page.
    pub fn schema(&self) -> SchemaRef {
        self.batch.schema()
    }

    /// The underlying record batch.
    pub fn batch(&self) -> &RecordBatch {
        &self.batch
    }
}

/// Wire-format bytes of one page plus the counts the exchange layer reports.
#[derive(Debug, Clone)]
pub struct SerializedPage {
    /// Arrow IPC stream bytes.
    pub bytes: Vec<u8>,
    /// Number of rows encoded in the page.
    pub row_count: usize,
    /// Uncompressed in-memory size of the page.
    pub uncompressed_bytes: usize,
}

impl SerializedPage {
    /// Serialized length on the wire.
    pub fn wire_bytes(&self) -> usize {
        self.bytes.len()
    }
}

/// Encodes and decodes pages using the arrow IPC stream format.
///
/// One serde instance is shared by all sources of an operator; the schema is
/// fixed when the operator factory is built.
pub struct PageSerde {
    schema: SchemaRef,
}

impl PageSerde {
    /// Create a serde for pages of the given schema.
    pub fn new(schema: SchemaRef) -> Self {
        Self { schema }
    }

    /// Schema this serde encodes.
    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    /// Encode one page into IPC stream bytes.
    pub fn serialize(&self, page: &Page) -> Result<SerializedPage> {
        let mut bytes = Vec::new();
        {
            let mut writer =
                StreamWriter::try_new(&mut bytes, self.schema.as_ref()).context(ArrowSnafu)?;
            writer.write(page.batch()).context(ArrowSnafu)?;
            writer.finish().context(ArrowSnafu)?;
        }
        Ok(SerializedPage {
            bytes,
            row_count: page.row_count(),
            uncompressed_bytes: page.byte_size(),
        })
    }

    /// Decode one serialized page.
    pub fn deserialize(&self, serialized: &SerializedPage) -> Result<Page> {
        let mut reader = StreamReader::try_new(Cursor::new(&serialized.bytes), None)
            .context(DeserializationSnafu)?;
        let batch = reader
            .next()
            .transpose()
            .context(DeserializationSnafu)?
            .ok_or_else(|| MergeError::Deserialization {
                source: ArrowError::ParseError("serialized page stream contained no batch".to_string()),
            })?;
        Ok(Page::new(batch))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow::array::Int64Array;
    use arrow::datatypes::{DataType, Field, Schema};

    use super::*;

    fn test_page() -> (SchemaRef, Page) {
        let schema = Arc::new(Schema::new(vec![Field::new("v", DataType::Int64, true)]));
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![Arc::new(Int64Array::from(vec![Some(1), None, Some(3)]))],
        )
        .unwrap();
        (schema, Page::new(batch))
    }

    #[test]
    fn page_reports_counts() {
        let (_, page) = test_page();
        assert_eq!(page.row_count(), 3);
        assert_eq!(page.channel_count(), 1);
        assert!(page.byte_size() > 0);
    }

    #[test]
    fn serde_round_trips_counts() {
        let (schema, page) = test_page();
        let serde = PageSerde::new(schema);
        let serialized = serde.serialize(&page).unwrap();
        assert_eq!(serialized.row_count, 3);
        assert!(serialized.wire_bytes() > 0);

        let decoded = serde.deserialize(&serialized).unwrap();
        assert_eq!(decoded.row_count(), 3);
        assert_eq!(decoded.batch(), page.batch());
    }

    #[test]
    fn deserialize_rejects_garbage() {
        let (schema, _) = test_page();
        let serde = PageSerde::new(schema);
        let garbage = SerializedPage {
            bytes: vec![0xde, 0xad, 0xbe, 0xef],
            row_count: 1,
            uncompressed_bytes: 4,
        };
        assert!(serde.deserialize(&garbage).is_err());
    }
}
