// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! In-memory implementations of both store contracts.
//!
//! Used as test doubles throughout the crate and as the backend of the `dsg`
//! command, which fills them from CSV files via Arrow record batches.

use crate::error::{DsgError, Result};
use crate::query::{Filter, TimeBounds};
use crate::store::{
    ExternalDataset, ExternalProvider, RowReader, Sample, SampleTime, VariableDescriptor,
    VariableShape, VectorRow, VectorStore,
};
use crate::value::{Value, column_values, normalize_type, timestamp_type};
use arrow_array::RecordBatch;
use arrow_schema::{DataType, Field};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Counts dataset handles opened and closed by a [`MemoryProvider`].
/// Every `close` call is counted, including repeats on the same handle.
#[derive(Debug, Clone, Default)]
pub struct HandleCounts {
    opened: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
    double_closed: Arc<AtomicUsize>,
}

impl HandleCounts {
    #[must_use]
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    /// `close` calls on a handle that was already closed
    #[must_use]
    pub fn double_closed(&self) -> usize {
        self.double_closed.load(Ordering::SeqCst)
    }

    /// Handles opened but not yet closed
    #[must_use]
    pub fn live(&self) -> usize {
        let distinct = self.closed().saturating_sub(self.double_closed());
        self.opened().saturating_sub(distinct)
    }
}

/// Column roles when loading observations from a record batch
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationLayout {
    pub station_column: String,
    pub time_column: String,
    /// Columns surfaced as categorical labels rather than scalars
    pub categorical: Vec<String>,
}

impl Default for ObservationLayout {
    fn default() -> Self {
        Self {
            station_column: "station".to_string(),
            time_column: "time".to_string(),
            categorical: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MemoryDataset {
    time_variable: Option<VariableDescriptor>,
    variables: Vec<VariableDescriptor>,
    /// Station series in insertion order, each sorted by time
    stations: Vec<(String, Vec<Sample>)>,
    broken_variables: bool,
    broken_samples: bool,
}

impl MemoryDataset {
    #[must_use]
    pub fn new(time_variable: &str) -> Self {
        Self {
            time_variable: Some(VariableDescriptor::new(
                time_variable,
                timestamp_type(),
                VariableShape::Time,
            )),
            variables: Vec::new(),
            stations: Vec::new(),
            broken_variables: false,
            broken_samples: false,
        }
    }

    #[must_use]
    pub fn without_time_variable(mut self) -> Self {
        self.time_variable = None;
        self
    }

    /// Make variable enumeration fail, as a corrupt file would
    #[must_use]
    pub fn with_broken_variables(mut self) -> Self {
        self.broken_variables = true;
        self
    }

    /// Make every sample fetch fail, as an unreadable variable would
    #[must_use]
    pub fn with_broken_samples(mut self) -> Self {
        self.broken_samples = true;
        self
    }

    #[must_use]
    pub fn with_variable(mut self, variable: VariableDescriptor) -> Self {
        self.variables.push(variable);
        self
    }

    #[must_use]
    pub fn with_sample<I, K>(mut self, station: &str, time: DateTime<Utc>, values: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let values = values.into_iter().map(|(k, v)| (k.into(), v)).collect();
        self.add_sample(station, time, values);
        self
    }

    /// Insert a sample, replacing any existing one at the same instant
    pub fn add_sample(&mut self, station: &str, time: DateTime<Utc>, values: HashMap<String, Value>) {
        let series = match self.stations.iter().position(|(s, _)| s == station) {
            Some(pos) => &mut self.stations[pos].1,
            None => {
                self.stations.push((station.to_string(), Vec::new()));
                let last = self.stations.len() - 1;
                &mut self.stations[last].1
            }
        };
        let sample = Sample { time, values };
        match series.binary_search_by(|s| s.time.cmp(&time)) {
            Ok(pos) => series[pos] = sample,
            Err(pos) => series.insert(pos, sample),
        }
    }

    /// Load observations from record batches. Every column other than the
    /// station and time columns becomes a variable; string columns and
    /// those listed in `layout.categorical` are categorical.
    pub fn from_record_batches(batches: &[RecordBatch], layout: &ObservationLayout) -> Result<Self> {
        let mut dataset = Self::new(&layout.time_column);
        let Some(first) = batches.first() else {
            return Ok(dataset);
        };

        let schema = first.schema();
        let station_index = schema.index_of(&layout.station_column)?;
        let time_index = schema.index_of(&layout.time_column)?;

        let mut variable_columns = Vec::new();
        for (index, field) in schema.fields().iter().enumerate() {
            if index == station_index || index == time_index {
                continue;
            }
            let data_type = normalize_type(field.data_type());
            let shape = if data_type == DataType::Utf8
                || layout.categorical.iter().any(|c| c == field.name())
            {
                VariableShape::Categorical
            } else {
                VariableShape::Scalar
            };
            dataset
                .variables
                .push(VariableDescriptor::new(field.name(), data_type, shape));
            variable_columns.push((index, field.name().clone()));
        }

        for batch in batches {
            let stations = column_values(batch.column(station_index))?;
            let times = column_values(batch.column(time_index))?;
            let columns = variable_columns
                .iter()
                .map(|(index, name)| -> Result<(&String, Vec<Value>)> {
                    Ok((name, column_values(batch.column(*index))?))
                })
                .collect::<Result<Vec<_>>>()?;

            for row in 0..batch.num_rows() {
                let Some(station) = stations[row].key_string() else {
                    continue;
                };
                let time = times[row].to_timestamp().ok_or_else(|| {
                    DsgError::schema(format!(
                        "Row {row}: '{}' is not a valid {} value",
                        times[row], layout.time_column
                    ))
                })?;
                let values = columns
                    .iter()
                    .map(|(name, values)| (name.to_string(), values[row].clone()))
                    .collect();
                dataset.add_sample(&station, time, values);
            }
        }
        Ok(dataset)
    }

    fn series(&self, station: &str) -> Option<&[Sample]> {
        self.stations
            .iter()
            .find(|(s, _)| s == station)
            .map(|(_, series)| series.as_slice())
    }
}

/// Serves [`MemoryDataset`]s by locator
#[derive(Debug, Clone, Default)]
pub struct MemoryProvider {
    datasets: HashMap<String, Arc<MemoryDataset>>,
    counts: HandleCounts,
}

impl MemoryProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_dataset(mut self, locator: &str, dataset: MemoryDataset) -> Self {
        self.datasets.insert(locator.to_string(), Arc::new(dataset));
        self
    }

    #[must_use]
    pub fn counts(&self) -> HandleCounts {
        self.counts.clone()
    }
}

impl ExternalProvider for MemoryProvider {
    fn open(&self, locator: &str) -> Result<Box<dyn ExternalDataset>> {
        let data = self
            .datasets
            .get(locator)
            .ok_or_else(|| DsgError::unavailable(locator, "no such dataset"))?;
        _ = self.counts.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryHandle {
            data: Arc::clone(data),
            counts: self.counts.clone(),
            closed: false,
        }))
    }
}

struct MemoryHandle {
    data: Arc<MemoryDataset>,
    counts: HandleCounts,
    closed: bool,
}

impl ExternalDataset for MemoryHandle {
    fn list_scalar_variables(&self) -> Result<Vec<VariableDescriptor>> {
        if self.data.broken_variables {
            return Err(DsgError::unavailable("memory", "variable enumeration failed"));
        }
        Ok(self
            .data
            .time_variable
            .iter()
            .chain(self.data.variables.iter())
            .cloned()
            .collect())
    }

    fn time_variable(&self) -> Result<VariableDescriptor> {
        self.data
            .time_variable
            .clone()
            .ok_or_else(|| DsgError::schema("dataset has no observation time variable"))
    }

    fn stations(&self) -> Result<Vec<String>> {
        Ok(self.data.stations.iter().map(|(s, _)| s.clone()).collect())
    }

    fn station_times(&self, station: &str, bounds: &TimeBounds) -> Result<Vec<DateTime<Utc>>> {
        Ok(self
            .data
            .series(station)
            .unwrap_or_default()
            .iter()
            .map(|s| s.time)
            .filter(|t| bounds.contains(t))
            .collect())
    }

    fn fetch_sample(&self, station: &str, time: &SampleTime) -> Result<Option<Sample>> {
        if self.data.broken_samples {
            return Err(DsgError::unavailable("memory", "sample read failed"));
        }
        let Some(series) = self.data.series(station) else {
            return Ok(None);
        };
        let sample = match time {
            SampleTime::At(t) => series
                .binary_search_by(|s| s.time.cmp(t))
                .ok()
                .map(|pos| &series[pos]),
            SampleTime::Latest(bounds) => series.iter().rev().find(|s| bounds.contains(&s.time)),
        };
        Ok(sample.cloned())
    }

    fn close(&mut self) {
        _ = self.counts.closed.fetch_add(1, Ordering::SeqCst);
        if self.closed {
            _ = self.counts.double_closed.fetch_add(1, Ordering::SeqCst);
        }
        self.closed = true;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MemoryRecord {
    pub feature_id: String,
    pub geometry: Option<Vec<u8>>,
    pub values: Vec<Value>,
}

/// Vector store holding every record in memory
#[derive(Debug, Clone)]
pub struct MemoryVectorStore {
    fields: Vec<Field>,
    records: Arc<Vec<MemoryRecord>>,
    readers_opened: Arc<AtomicUsize>,
    readers_closed: Arc<AtomicUsize>,
}

impl MemoryVectorStore {
    #[must_use]
    pub fn new(fields: Vec<Field>) -> Self {
        Self {
            fields,
            records: Arc::new(Vec::new()),
            readers_opened: Arc::new(AtomicUsize::new(0)),
            readers_closed: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn push_record(
        &mut self,
        feature_id: impl Into<String>,
        geometry: Option<Vec<u8>>,
        values: Vec<Value>,
    ) -> Result<()> {
        if values.len() != self.fields.len() {
            return Err(DsgError::vector_store(format!(
                "record has {} values but the schema has {} fields",
                values.len(),
                self.fields.len()
            )));
        }
        Arc::make_mut(&mut self.records).push(MemoryRecord {
            feature_id: feature_id.into(),
            geometry,
            values,
        });
        Ok(())
    }

    /// Load records from batches sharing one schema. Feature ids are taken
    /// from `id_column` when given, otherwise numbered from 1.
    pub fn from_record_batches(batches: &[RecordBatch], id_column: Option<&str>) -> Result<Self> {
        let Some(first) = batches.first() else {
            return Ok(Self::new(Vec::new()));
        };
        let schema = first.schema();
        let fields = schema
            .fields()
            .iter()
            .map(|f| Field::new(f.name(), normalize_type(f.data_type()), true))
            .collect();
        let id_index = id_column.map(|c| schema.index_of(c)).transpose()?;

        let mut store = Self::new(fields);
        for batch in batches {
            let columns = batch
                .columns()
                .iter()
                .map(column_values)
                .collect::<Result<Vec<_>>>()?;
            for row in 0..batch.num_rows() {
                let number = store.records.len() + 1;
                let feature_id = id_index
                    .and_then(|i| columns[i][row].key_string())
                    .unwrap_or_else(|| number.to_string());
                let values = columns.iter().map(|c| c[row].clone()).collect();
                store.push_record(feature_id, None, values)?;
            }
        }
        Ok(store)
    }

    /// Number of row readers opened so far
    #[must_use]
    pub fn readers_opened(&self) -> usize {
        self.readers_opened.load(Ordering::SeqCst)
    }

    /// Number of `close` calls made on this store's row readers
    #[must_use]
    pub fn readers_closed(&self) -> usize {
        self.readers_closed.load(Ordering::SeqCst)
    }
}

impl VectorStore for MemoryVectorStore {
    fn read_schema(&self) -> Result<Vec<Field>> {
        Ok(self.fields.clone())
    }

    fn open_row_reader(
        &self,
        projection: &[String],
        filter: &Filter,
    ) -> Result<Box<dyn RowReader>> {
        let field_names: Vec<String> = self.fields.iter().map(|f| f.name().clone()).collect();
        let indices = projection
            .iter()
            .map(|name| {
                field_names
                    .iter()
                    .position(|f| f.eq_ignore_ascii_case(name))
                    .ok_or_else(|| DsgError::UnknownAttribute(name.clone()))
            })
            .collect::<Result<Vec<_>>>()?;
        _ = self.readers_opened.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(MemoryRowReader {
            records: Arc::clone(&self.records),
            names: indices.iter().map(|&i| field_names[i].clone()).collect(),
            field_names,
            indices,
            filter: filter.clone(),
            position: 0,
            closed: Arc::clone(&self.readers_closed),
        }))
    }
}

struct MemoryRowReader {
    records: Arc<Vec<MemoryRecord>>,
    field_names: Vec<String>,
    indices: Vec<usize>,
    names: Vec<String>,
    filter: Filter,
    position: usize,
    closed: Arc<AtomicUsize>,
}

impl RowReader for MemoryRowReader {
    fn attribute_names(&self) -> &[String] {
        &self.names
    }

    fn next_row(&mut self) -> Result<Option<VectorRow>> {
        while let Some(record) = self.records.get(self.position) {
            self.position += 1;
            let lookup = |name: &str| {
                self.field_names
                    .iter()
                    .position(|f| f.eq_ignore_ascii_case(name))
                    .map(|i| &record.values[i])
            };
            if self.filter.evaluate(&lookup) {
                return Ok(Some(VectorRow {
                    feature_id: record.feature_id.clone(),
                    geometry: record.geometry.clone(),
                    values: self.indices.iter().map(|&i| record.values[i].clone()).collect(),
                }));
            }
        }
        Ok(None)
    }

    fn close(&mut self) {
        self.position = self.records.len();
        _ = self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow_array::{ArrayRef, Float64Array, StringArray};
    use chrono::TimeZone;

    fn t(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_fetch_sample_at_and_latest() {
        let provider = MemoryProvider::new().with_dataset(
            "obs",
            MemoryDataset::new("time")
                .with_sample("A", t(2), [("temp", Value::Float64(2.0))])
                .with_sample("A", t(1), [("temp", Value::Float64(1.0))])
                .with_sample("A", t(3), [("temp", Value::Float64(3.0))]),
        );
        let dataset = provider.open("obs").unwrap();

        let at = dataset.fetch_sample("A", &SampleTime::At(t(2))).unwrap().unwrap();
        assert_eq!(at.value("temp"), Some(&Value::Float64(2.0)));

        let latest = dataset
            .fetch_sample("A", &SampleTime::Latest(TimeBounds::unbounded()))
            .unwrap()
            .unwrap();
        assert_eq!(latest.time, t(3));

        let bounded = TimeBounds {
            start: std::ops::Bound::Unbounded,
            end: std::ops::Bound::Excluded(t(3)),
        };
        let latest = dataset
            .fetch_sample("A", &SampleTime::Latest(bounded))
            .unwrap()
            .unwrap();
        assert_eq!(latest.time, t(2));

        assert!(dataset.fetch_sample("A", &SampleTime::At(t(9))).unwrap().is_none());
        assert!(dataset.fetch_sample("Z", &SampleTime::At(t(1))).unwrap().is_none());
        assert_eq!(
            dataset.station_times("A", &TimeBounds::unbounded()).unwrap(),
            vec![t(1), t(2), t(3)]
        );
    }

    #[test]
    fn test_handle_double_close_is_counted() {
        let provider = MemoryProvider::new().with_dataset("obs", MemoryDataset::new("time"));
        let counts = provider.counts();
        let mut dataset = provider.open("obs").unwrap();
        dataset.close();
        assert_eq!(counts.closed(), 1);
        assert_eq!(counts.double_closed(), 0);
        assert_eq!(counts.live(), 0);

        dataset.close();
        assert_eq!(counts.opened(), 1);
        assert_eq!(counts.closed(), 2);
        assert_eq!(counts.double_closed(), 1);
        assert_eq!(counts.live(), 0);
    }

    #[test]
    fn test_broken_samples_fail_fetch() {
        let provider = MemoryProvider::new().with_dataset(
            "obs",
            MemoryDataset::new("time")
                .with_sample("A", t(1), [("temp", Value::Float64(1.0))])
                .with_broken_samples(),
        );
        let dataset = provider.open("obs").unwrap();
        assert!(matches!(
            dataset.fetch_sample("A", &SampleTime::At(t(1))),
            Err(DsgError::ExternalSourceUnavailable { .. })
        ));
        assert_eq!(dataset.stations().unwrap(), vec!["A"]);
    }

    #[test]
    fn test_dataset_from_record_batches() {
        let batch = RecordBatch::try_from_iter(vec![
            (
                "station",
                Arc::new(StringArray::from(vec!["A", "B", "A"])) as ArrayRef,
            ),
            (
                "time",
                Arc::new(StringArray::from(vec![
                    "2024-01-01T01:00:00Z",
                    "2024-01-01T01:00:00Z",
                    "2024-01-01T02:00:00Z",
                ])) as ArrayRef,
            ),
            (
                "temperature",
                Arc::new(Float64Array::from(vec![Some(1.0), None, Some(3.0)])) as ArrayRef,
            ),
            (
                "flag",
                Arc::new(StringArray::from(vec!["ok", "bad", "ok"])) as ArrayRef,
            ),
        ])
        .unwrap();

        let dataset =
            MemoryDataset::from_record_batches(&[batch], &ObservationLayout::default()).unwrap();
        let provider = MemoryProvider::new().with_dataset("obs", dataset);
        let handle = provider.open("obs").unwrap();

        let variables = handle.list_scalar_variables().unwrap();
        let shapes: Vec<(&str, VariableShape)> = variables
            .iter()
            .map(|v| (v.full_name.as_str(), v.shape))
            .collect();
        assert_eq!(
            shapes,
            vec![
                ("time", VariableShape::Time),
                ("temperature", VariableShape::Scalar),
                ("flag", VariableShape::Categorical),
            ]
        );
        assert_eq!(handle.stations().unwrap(), vec!["A", "B"]);

        let sample = handle.fetch_sample("A", &SampleTime::At(t(2))).unwrap().unwrap();
        assert_eq!(sample.value("temperature"), Some(&Value::Float64(3.0)));
        let sample = handle.fetch_sample("B", &SampleTime::At(t(1))).unwrap().unwrap();
        assert_eq!(sample.value("temperature"), Some(&Value::Null));
    }

    #[test]
    fn test_vector_reader_projection_and_filter() {
        let mut store = MemoryVectorStore::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new("name", DataType::Utf8, true),
        ]);
        store
            .push_record("1", None, vec![Value::from("A"), Value::from("alpha")])
            .unwrap();
        store
            .push_record("2", Some(vec![1, 2]), vec![Value::from("B"), Value::from("beta")])
            .unwrap();
        assert!(store.push_record("3", None, vec![]).is_err());

        let mut reader = store
            .open_row_reader(&["NAME".to_string(), "id".to_string()], &Filter::equals("id", "B"))
            .unwrap();
        assert_eq!(reader.attribute_names(), &["name".to_string(), "id".to_string()]);

        let row = reader.next_row().unwrap().unwrap();
        assert_eq!(row.feature_id, "2");
        assert_eq!(row.geometry, Some(vec![1, 2]));
        assert_eq!(row.values, vec![Value::from("beta"), Value::from("B")]);
        assert!(reader.next_row().unwrap().is_none());
        assert_eq!(store.readers_opened(), 1);
        reader.close();
        assert_eq!(store.readers_closed(), 1);

        assert!(matches!(
            store.open_row_reader(&["nope".to_string()], &Filter::Include),
            Err(DsgError::UnknownAttribute(_))
        ));
    }
}
