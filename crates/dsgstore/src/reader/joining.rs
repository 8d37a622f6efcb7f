// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use super::{ExternalSource, Feature, FeatureReader};
use crate::error::{DsgError, Result};
use crate::extractor::Extractor;
use crate::pool::PooledDataset;
use crate::store::{RowReader, SampleTime};
use crate::value::Value;
use arrow_schema::SchemaRef;
use diagnostics::*;

/// Which column of the wrapped reader's rows holds the station key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinKey {
    pub attribute: String,
    pub index: usize,
}

/// Left join of vector rows against the external dataset.
///
/// For each vector row the station key is read at `key.index` and the
/// matching sample fetched; the external values are appended to the row
/// in `extractors` order, and `output` then picks the emitted columns from
/// that joined row. A row whose station has no sample gets nulls for every
/// external column. Memory use is one row and one sample.
pub struct JoiningReader {
    rows: Box<dyn RowReader>,
    source: ExternalSource,
    dataset: Option<PooledDataset>,
    key: JoinKey,
    time: SampleTime,
    extractors: Vec<Extractor>,
    output: Vec<usize>,
    schema: SchemaRef,
    finished: bool,
    joined: usize,
    misses: usize,
}

impl JoiningReader {
    /// `output` indexes into the joined row: the wrapped reader's values
    /// followed by one value per extractor.
    pub fn new(
        rows: Box<dyn RowReader>,
        source: ExternalSource,
        key: JoinKey,
        time: SampleTime,
        extractors: Vec<Extractor>,
        output: Vec<usize>,
        schema: SchemaRef,
    ) -> Result<Self> {
        let key_present = rows
            .attribute_names()
            .get(key.index)
            .is_some_and(|name| name.eq_ignore_ascii_case(&key.attribute));
        if !key_present {
            return Err(DsgError::join_key_missing(key.attribute));
        }

        let width = rows.attribute_names().len() + extractors.len();
        if let Some(bad) = output.iter().find(|&&i| i >= width) {
            return Err(DsgError::schema(format!(
                "Output column {bad} is outside the joined row of width {width}"
            )));
        }

        Ok(Self {
            rows,
            source,
            dataset: None,
            key,
            time,
            extractors,
            output,
            schema,
            finished: false,
            joined: 0,
            misses: 0,
        })
    }

    fn external_values(&mut self, key: &Value) -> Result<Vec<Value>> {
        if self.extractors.is_empty() {
            return Ok(Vec::new());
        }
        let width = self.extractors.len();
        let nulls = || vec![Value::Null; width];

        let Some(station) = key.key_string() else {
            self.misses += 1;
            return Ok(nulls());
        };

        if self.dataset.is_none() {
            self.dataset = Some(self.source.acquire()?);
        }
        let sample = match &self.dataset {
            Some(dataset) => dataset.fetch_sample(&station, &self.time)?,
            None => None,
        };

        match sample {
            Some(sample) => Ok(self.extractors.iter().map(|e| e.extract(&sample)).collect()),
            None => {
                debug!("No external sample for station {station}", station: station);
                self.misses += 1;
                Ok(nulls())
            }
        }
    }

    fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        if let Some(dataset) = self.dataset.take() {
            dataset.release();
        }
        self.rows.close();

        let joined = self.joined;
        let misses = self.misses;
        debug!(
            "Join finished: {joined} rows, {misses} without external sample",
            joined: joined,
            misses: misses
        );
    }
}

impl FeatureReader for JoiningReader {
    fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    fn next_feature(&mut self) -> Result<Option<Feature>> {
        if self.finished {
            return Ok(None);
        }
        let Some(row) = self.rows.next_row()? else {
            self.finish();
            return Ok(None);
        };

        let key = row
            .values
            .get(self.key.index)
            .ok_or_else(|| DsgError::join_key_missing(&self.key.attribute))?;
        let external = self.external_values(key)?;

        let mut joined = row.values;
        joined.extend(external);
        self.joined += 1;

        Ok(Some(Feature {
            id: row.feature_id,
            geometry: row.geometry,
            values: self.output.iter().map(|&i| joined[i].clone()).collect(),
        }))
    }

    fn close(&mut self) {
        self.finish();
    }
}

impl Drop for JoiningReader {
    fn drop(&mut self) {
        self.finish();
    }
}
