// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Feature readers: the three execution paths a query can take.
//!
//! Every reader is a lazy, forward-only, pull-based sequence. Calling
//! `next_feature` after the end keeps returning `Ok(None)`; re-scanning
//! requires a new reader. External dataset handles are acquired on first
//! need and released on exhaustion, on `close`, or on drop.

mod external;
mod joining;

pub use external::{ExternalOnlyReader, TimestampOnlyReader};
pub use joining::{JoinKey, JoiningReader};

use crate::error::Result;
use crate::pool::{DatasetPool, PooledDataset};
use crate::store::RowReader;
use crate::value::{Value, build_array};
use arrow_array::{RecordBatch, RecordBatchOptions};
use arrow_schema::SchemaRef;

/// One output record
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub id: String,
    pub geometry: Option<Vec<u8>>,
    /// Ordered as the reader's `schema()`
    pub values: Vec<Value>,
}

pub trait FeatureReader: Send {
    fn schema(&self) -> SchemaRef;

    fn next_feature(&mut self) -> Result<Option<Feature>>;

    /// Release underlying resources; safe to call more than once
    fn close(&mut self);
}

/// The external dataset a reader draws from
#[derive(Debug, Clone)]
pub struct ExternalSource {
    pool: DatasetPool,
    locator: String,
}

impl ExternalSource {
    pub fn new(pool: DatasetPool, locator: impl Into<String>) -> Self {
        Self {
            pool,
            locator: locator.into(),
        }
    }

    #[must_use]
    pub fn locator(&self) -> &str {
        &self.locator
    }

    pub fn acquire(&self) -> Result<PooledDataset> {
        self.pool.acquire(&self.locator)
    }
}

/// Passes vector store rows through untouched
pub struct VectorOnlyReader {
    rows: Box<dyn RowReader>,
    schema: SchemaRef,
}

impl VectorOnlyReader {
    #[must_use]
    pub fn new(rows: Box<dyn RowReader>, schema: SchemaRef) -> Self {
        Self { rows, schema }
    }
}

impl FeatureReader for VectorOnlyReader {
    fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    fn next_feature(&mut self) -> Result<Option<Feature>> {
        Ok(self.rows.next_row()?.map(|row| Feature {
            id: row.feature_id,
            geometry: row.geometry,
            values: row.values,
        }))
    }

    fn close(&mut self) {
        self.rows.close();
    }
}

static NULL: Value = Value::Null;

/// Drain a reader into one Arrow batch, then close it
pub fn collect_batch(reader: &mut dyn FeatureReader) -> Result<RecordBatch> {
    let schema = reader.schema();
    let mut features = Vec::new();
    let drained = std::iter::from_fn(|| reader.next_feature().transpose())
        .try_for_each(|feature| feature.map(|f| features.push(f)));
    reader.close();
    drained?;

    let columns = schema
        .fields()
        .iter()
        .enumerate()
        .map(|(i, field)| {
            build_array(
                field.data_type(),
                features.iter().map(|f| f.values.get(i).unwrap_or(&NULL)),
            )
        })
        .collect::<Result<Vec<_>>>()?;

    let options = RecordBatchOptions::new().with_row_count(Some(features.len()));
    Ok(RecordBatch::try_new_with_options(schema, columns, &options)?)
}
