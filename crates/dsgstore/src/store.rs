// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Contracts for the two physical stores the datastore federates.
//!
//! The vector store is a sequential record file with a fixed row schema;
//! the external store is a time-indexed dataset with one series per station.
//! Neither is implemented here beyond the in-memory versions in
//! [`crate::memory`].

use crate::error::Result;
use crate::query::{Filter, TimeBounds};
use crate::value::Value;
use arrow_schema::{DataType, Field};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// One row read from the vector store
#[derive(Debug, Clone, PartialEq)]
pub struct VectorRow {
    pub feature_id: String,
    /// Opaque geometry payload, passed through untouched
    pub geometry: Option<Vec<u8>>,
    /// Attribute values, ordered as the reader's `attribute_names()`
    pub values: Vec<Value>,
}

/// Forward-only reader over vector store rows
pub trait RowReader: Send {
    /// Names of the attributes in each emitted row, in order
    fn attribute_names(&self) -> &[String];

    /// Next row, or `None` at end of data
    fn next_row(&mut self) -> Result<Option<VectorRow>>;

    fn close(&mut self) {}
}

pub trait VectorStore: Send + Sync {
    /// Native attribute schema, in file order
    fn read_schema(&self) -> Result<Vec<Field>>;

    /// Open a reader emitting `projection` for rows matching `filter`
    fn open_row_reader(&self, projection: &[String], filter: &Filter)
    -> Result<Box<dyn RowReader>>;
}

/// How a variable's raw samples are shaped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableShape {
    /// One numeric value per timestep
    Scalar,
    /// Fixed set of labels (string or coded) per timestep
    Categorical,
    /// The time axis itself
    Time,
}

/// Describes one variable of the external dataset
#[derive(Debug, Clone, PartialEq)]
pub struct VariableDescriptor {
    /// Full name including any group path, e.g. `obs/temperature`
    pub full_name: String,
    pub data_type: DataType,
    pub shape: VariableShape,
}

impl VariableDescriptor {
    pub fn new(full_name: impl Into<String>, data_type: DataType, shape: VariableShape) -> Self {
        Self {
            full_name: full_name.into(),
            data_type,
            shape,
        }
    }

    /// Name without the group path
    #[must_use]
    pub fn short_name(&self) -> &str {
        self.full_name
            .rsplit('/')
            .next()
            .unwrap_or(&self.full_name)
    }
}

/// Values of every variable for one station at one instant, keyed by the
/// variable's full name
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub time: DateTime<Utc>,
    pub values: HashMap<String, Value>,
}

impl Sample {
    #[must_use]
    pub fn value(&self, variable: &str) -> Option<&Value> {
        self.values.get(variable)
    }
}

/// Which sample of a station's series to fetch
#[derive(Debug, Clone, PartialEq)]
pub enum SampleTime {
    /// The sample at exactly this instant
    At(DateTime<Utc>),
    /// The most recent sample within the bounds
    Latest(TimeBounds),
}

/// An open external dataset.
///
/// Implementations are free to be lazy; `close` is called exactly once by
/// the owning pool when the handle is retired.
pub trait ExternalDataset: Send {
    /// Every scalar observation variable, including the time axis
    fn list_scalar_variables(&self) -> Result<Vec<VariableDescriptor>>;

    /// The designated time axis, or `DsgError::Schema` if there is none
    fn time_variable(&self) -> Result<VariableDescriptor>;

    /// Station keys in the dataset's native order
    fn stations(&self) -> Result<Vec<String>>;

    /// Time axis of one station restricted to `bounds`, ascending
    fn station_times(&self, station: &str, bounds: &TimeBounds) -> Result<Vec<DateTime<Utc>>>;

    /// `Ok(None)` when the station or the instant has no sample
    fn fetch_sample(&self, station: &str, time: &SampleTime) -> Result<Option<Sample>>;

    fn close(&mut self) {}
}

/// Opens external datasets by locator
pub trait ExternalProvider: Send + Sync {
    /// Fails with `DsgError::ExternalSourceUnavailable`
    fn open(&self, locator: &str) -> Result<Box<dyn ExternalDataset>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_name_strips_group() {
        let v = VariableDescriptor::new("obs/temperature", DataType::Float64, VariableShape::Scalar);
        assert_eq!(v.short_name(), "temperature");

        let v = VariableDescriptor::new("time", DataType::Float64, VariableShape::Time);
        assert_eq!(v.short_name(), "time");
    }
}
