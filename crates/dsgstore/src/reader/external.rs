// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use super::{ExternalSource, Feature, FeatureReader};
use crate::error::Result;
use crate::extractor::Extractor;
use crate::pool::PooledDataset;
use crate::query::TimeBounds;
use crate::store::{ExternalDataset, SampleTime};
use crate::value::Value;
use arrow_schema::SchemaRef;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;

/// Walks (station, instant) pairs in the dataset's native order: stations
/// as listed, each station's instants ascending.
struct StationCursor {
    stations: Option<VecDeque<String>>,
    current: Option<(String, VecDeque<DateTime<Utc>>)>,
    bounds: TimeBounds,
    latest_only: bool,
}

impl StationCursor {
    fn next(&mut self, dataset: &dyn ExternalDataset) -> Result<Option<(String, DateTime<Utc>)>> {
        if self.stations.is_none() {
            self.stations = Some(dataset.stations()?.into());
        }
        loop {
            if let Some((station, times)) = &mut self.current {
                if let Some(t) = times.pop_front() {
                    return Ok(Some((station.clone(), t)));
                }
            }
            let Some(station) = self.stations.as_mut().and_then(VecDeque::pop_front) else {
                self.current = None;
                return Ok(None);
            };
            let mut times: VecDeque<_> = dataset.station_times(&station, &self.bounds)?.into();
            if self.latest_only {
                times = times.pop_back().into_iter().collect();
            }
            self.current = Some((station, times));
        }
    }
}

/// Dataset handle plus cursor shared by both external-only readers
struct ExternalScan {
    source: ExternalSource,
    dataset: Option<PooledDataset>,
    cursor: StationCursor,
    finished: bool,
}

impl ExternalScan {
    /// With `latest_only`, each station contributes only its most recent
    /// instant within `bounds`.
    fn new(source: ExternalSource, bounds: TimeBounds, latest_only: bool) -> Self {
        Self {
            source,
            dataset: None,
            cursor: StationCursor {
                stations: None,
                current: None,
                bounds,
                latest_only,
            },
            finished: false,
        }
    }

    fn next(&mut self) -> Result<Option<(String, DateTime<Utc>)>> {
        if self.finished {
            return Ok(None);
        }
        if self.dataset.is_none() {
            self.dataset = Some(self.source.acquire()?);
        }
        let next = match &self.dataset {
            Some(dataset) => self.cursor.next(&**dataset)?,
            None => None,
        };
        if next.is_none() {
            self.finish();
        }
        Ok(next)
    }

    fn dataset(&self) -> Option<&PooledDataset> {
        self.dataset.as_ref()
    }

    fn finish(&mut self) {
        self.finished = true;
        if let Some(dataset) = self.dataset.take() {
            dataset.release();
        }
    }
}

impl Drop for ExternalScan {
    fn drop(&mut self) {
        self.finish();
    }
}

fn feature_id(station: &str, time: &DateTime<Utc>) -> String {
    format!("{station}.{}", time.timestamp_millis())
}

/// Reads external attributes without touching the vector store
pub struct ExternalOnlyReader {
    scan: ExternalScan,
    extractors: Vec<Extractor>,
    schema: SchemaRef,
}

impl ExternalOnlyReader {
    /// `extractors` are ordered as the output `schema`
    #[must_use]
    pub fn new(
        source: ExternalSource,
        bounds: TimeBounds,
        latest_only: bool,
        extractors: Vec<Extractor>,
        schema: SchemaRef,
    ) -> Self {
        Self {
            scan: ExternalScan::new(source, bounds, latest_only),
            extractors,
            schema,
        }
    }
}

impl FeatureReader for ExternalOnlyReader {
    fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    fn next_feature(&mut self) -> Result<Option<Feature>> {
        let Some((station, time)) = self.scan.next()? else {
            return Ok(None);
        };
        let sample = match self.scan.dataset() {
            Some(dataset) => dataset.fetch_sample(&station, &SampleTime::At(time))?,
            None => None,
        };
        let values = self
            .extractors
            .iter()
            .map(|e| match (&sample, e) {
                (_, Extractor::TimeStamp) => Value::Timestamp(time),
                (Some(sample), e) => e.extract(sample),
                (None, _) => Value::Null,
            })
            .collect();
        Ok(Some(Feature {
            id: feature_id(&station, &time),
            geometry: None,
            values,
        }))
    }

    fn close(&mut self) {
        self.scan.finish();
    }
}

/// Reads only the time axis; no variable payload is fetched
pub struct TimestampOnlyReader {
    scan: ExternalScan,
    schema: SchemaRef,
}

impl TimestampOnlyReader {
    #[must_use]
    pub fn new(source: ExternalSource, bounds: TimeBounds, latest_only: bool, schema: SchemaRef) -> Self {
        Self {
            scan: ExternalScan::new(source, bounds, latest_only),
            schema,
        }
    }
}

impl FeatureReader for TimestampOnlyReader {
    fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    fn next_feature(&mut self) -> Result<Option<Feature>> {
        Ok(self.scan.next()?.map(|(station, time)| Feature {
            id: feature_id(&station, &time),
            geometry: None,
            values: vec![Value::Timestamp(time)],
        }))
    }

    fn close(&mut self) {
        self.scan.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{HandleCounts, MemoryDataset, MemoryProvider};
    use crate::pool::{DatasetPool, PoolConfig};
    use crate::value::timestamp_type;
    use arrow_schema::{DataType, Field, Schema};
    use chrono::TimeZone;
    use std::sync::Arc;

    fn t(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, hour, 0, 0).unwrap()
    }

    fn source() -> (ExternalSource, HandleCounts) {
        let provider = MemoryProvider::new().with_dataset(
            "obs.nc",
            MemoryDataset::new("time")
                .with_sample("A", t(0), [("temperature", Value::Float64(1.0))])
                .with_sample("A", t(1), [("temperature", Value::Float64(2.0))])
                .with_sample("B", t(0), [("temperature", Value::Float64(3.0))])
                .with_sample("B", t(2), [("temperature", Value::Float64(4.0))]),
        );
        let counts = provider.counts();
        let pool = DatasetPool::new(
            Arc::new(provider),
            PoolConfig {
                max_idle: 0,
                ..PoolConfig::default()
            },
        );
        (ExternalSource::new(pool, "obs.nc"), counts)
    }

    fn time_schema() -> SchemaRef {
        Arc::new(Schema::new(vec![Field::new("time", timestamp_type(), true)]))
    }

    fn drain(reader: &mut dyn FeatureReader) -> Vec<Vec<Value>> {
        let mut out = Vec::new();
        while let Some(feature) = reader.next_feature().unwrap() {
            out.push(feature.values);
        }
        out
    }

    #[test]
    fn test_external_only_native_order() {
        let (source, counts) = source();
        let schema = Arc::new(Schema::new(vec![
            Field::new("temperature", DataType::Float64, true),
            Field::new("time", timestamp_type(), true),
        ]));
        let mut reader = ExternalOnlyReader::new(
            source,
            TimeBounds::unbounded(),
            false,
            vec![
                Extractor::Scalar {
                    variable: "temperature".into(),
                },
                Extractor::TimeStamp,
            ],
            schema,
        );
        assert_eq!(
            drain(&mut reader),
            vec![
                vec![Value::Float64(1.0), Value::Timestamp(t(0))],
                vec![Value::Float64(2.0), Value::Timestamp(t(1))],
                vec![Value::Float64(3.0), Value::Timestamp(t(0))],
                vec![Value::Float64(4.0), Value::Timestamp(t(2))],
            ]
        );
        assert_eq!(counts.live(), 0);
    }

    #[test]
    fn test_timestamp_only_point_and_latest() {
        let (source, _counts) = source();
        let mut reader = TimestampOnlyReader::new(source.clone(), TimeBounds::at(t(0)), false, time_schema());
        assert_eq!(
            drain(&mut reader),
            vec![vec![Value::Timestamp(t(0))], vec![Value::Timestamp(t(0))]]
        );

        let mut reader =
            TimestampOnlyReader::new(source, TimeBounds::unbounded(), true, time_schema());
        assert_eq!(
            drain(&mut reader),
            vec![vec![Value::Timestamp(t(1))], vec![Value::Timestamp(t(2))]]
        );
    }

    #[test]
    fn test_timestamp_only_matches_external_only() {
        let (source, _counts) = source();
        let bounds = TimeBounds {
            start: std::ops::Bound::Included(t(1)),
            end: std::ops::Bound::Unbounded,
        };
        let mut timestamps = TimestampOnlyReader::new(source.clone(), bounds, false, time_schema());
        let mut general = ExternalOnlyReader::new(
            source,
            bounds,
            false,
            vec![Extractor::TimeStamp],
            time_schema(),
        );
        assert_eq!(drain(&mut timestamps), drain(&mut general));
    }

    #[test]
    fn test_close_after_partial_iteration() {
        let (source, counts) = source();
        let mut reader = TimestampOnlyReader::new(source, TimeBounds::unbounded(), false, time_schema());
        assert!(reader.next_feature().unwrap().is_some());
        assert_eq!(counts.live(), 1);
        reader.close();
        reader.close();
        drop(reader);
        assert_eq!(counts.opened(), 1);
        assert_eq!(counts.closed(), 1);
        assert_eq!(counts.double_closed(), 0);
    }

    #[test]
    fn test_range_scan_keeps_every_sample() {
        let (source, _counts) = source();
        let bounds = TimeBounds {
            start: std::ops::Bound::Included(t(0)),
            end: std::ops::Bound::Included(t(1)),
        };
        let mut reader = TimestampOnlyReader::new(source, bounds, false, time_schema());
        assert_eq!(
            drain(&mut reader),
            vec![
                vec![Value::Timestamp(t(0))],
                vec![Value::Timestamp(t(1))],
                vec![Value::Timestamp(t(0))],
            ]
        );
    }

    #[test]
    fn test_drop_mid_scan_closes_handle() {
        let (source, counts) = source();
        let mut reader = ExternalOnlyReader::new(
            source,
            TimeBounds::unbounded(),
            false,
            vec![Extractor::TimeStamp],
            time_schema(),
        );
        assert!(reader.next_feature().unwrap().is_some());
        drop(reader);
        assert_eq!(counts.closed(), 1);
        assert_eq!(counts.double_closed(), 0);
        assert_eq!(counts.live(), 0);
    }
}
