// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! The federated store: one vector store plus one external dataset,
//! presented as a single attribute schema.

use crate::config::{MissingTimestampPolicy, StoreConfig};
use crate::error::{DsgError, Result};
use crate::extractor::Extractor;
use crate::plan::{ReadPlan, select_plan};
use crate::pool::DatasetPool;
use crate::query::{Query, TimeBounds, extract_time_bounds};
use crate::reader::{
    ExternalOnlyReader, ExternalSource, FeatureReader, JoinKey, JoiningReader,
    TimestampOnlyReader, VectorOnlyReader,
};
use crate::schema::{AttributeDescriptor, MergedSchema, build_schema};
use crate::store::{SampleTime, VectorStore};
use arrow_schema::{Schema, SchemaRef};
use diagnostics::*;
use std::sync::{Arc, Mutex};

pub struct StationDataStore {
    config: StoreConfig,
    vector: Arc<dyn VectorStore>,
    source: ExternalSource,
    pool: DatasetPool,
    schema: Mutex<Option<Arc<MergedSchema>>>,
}

impl StationDataStore {
    /// Nothing is opened until the schema is first needed.
    pub fn new(
        config: StoreConfig,
        vector: Arc<dyn VectorStore>,
        pool: DatasetPool,
        external_locator: impl Into<String>,
    ) -> Result<Self> {
        config.validate()?;
        let source = ExternalSource::new(pool.clone(), external_locator);
        Ok(Self {
            config,
            vector,
            source,
            pool,
            schema: Mutex::new(None),
        })
    }

    /// The merged schema, built on first call and cached until `dispose`.
    /// A failed build is not cached; the next call tries again.
    pub fn schema(&self) -> Result<Arc<MergedSchema>> {
        let mut cached = self
            .schema
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(schema) = cached.as_ref() {
            return Ok(schema.clone());
        }

        let fields = self.vector.read_schema()?;
        let schema = Arc::new(build_schema(&fields, &self.pool, self.source.locator())?);
        let count = schema.attributes().len();
        let locator = self.source.locator();
        info!(
            "Built merged schema for {locator} with {count} attributes",
            locator: locator,
            count: count
        );

        *cached = Some(schema.clone());
        Ok(schema)
    }

    pub fn plan(&self, query: &Query) -> Result<ReadPlan> {
        let schema = self.schema()?;
        select_plan(query, &schema, &self.config.station_attribute)
    }

    /// Arrow schema of the records `reader(query)` would produce
    pub fn output_schema(&self, query: &Query) -> Result<SchemaRef> {
        let schema = self.schema()?;
        let output = schema.resolve(&query.projection)?;
        Ok(projected_schema(&output))
    }

    pub fn reader(&self, query: &Query) -> Result<Box<dyn FeatureReader>> {
        let schema = self.schema()?;
        let plan = select_plan(query, &schema, &self.config.station_attribute)?;
        let kind = plan.kind();
        let detail = plan.to_string();
        info!("Reading with {kind} plan: {detail}", kind: kind, detail: detail);

        let output = schema.resolve(&query.projection)?;
        let output_schema = projected_schema(&output);

        match plan {
            ReadPlan::VectorOnly { projection } => {
                let vector_filter = query.filter.restrict_to(schema.vector_names());
                let rows = self.vector.open_row_reader(&projection, &vector_filter)?;
                Ok(Box::new(VectorOnlyReader::new(rows, output_schema)))
            }

            ReadPlan::Join {
                vector_projection,
                key_index,
                external,
                timestamp,
                ..
            } => {
                let time = match timestamp {
                    Some(t) => SampleTime::At(t),
                    None => SampleTime::Latest(self.time_bounds(query, &schema)?),
                };

                let extractors = extractors_for(&schema, &external)?;
                let width = vector_projection.len();
                let positions = output
                    .iter()
                    .map(|a| {
                        let (names, offset) = if a.is_external() {
                            (&external, width)
                        } else {
                            (&vector_projection, 0)
                        };
                        names
                            .iter()
                            .position(|n| n == a.name())
                            .map(|i| i + offset)
                            .ok_or_else(|| DsgError::UnknownAttribute(a.name().to_string()))
                    })
                    .collect::<Result<Vec<_>>>()?;

                let vector_filter = query.filter.restrict_to(schema.vector_names());
                let rows = self
                    .vector
                    .open_row_reader(&vector_projection, &vector_filter)?;
                let key = JoinKey {
                    attribute: vector_projection[key_index].clone(),
                    index: key_index,
                };
                Ok(Box::new(JoiningReader::new(
                    rows,
                    self.source.clone(),
                    key,
                    time,
                    extractors,
                    positions,
                    output_schema,
                )?))
            }

            ReadPlan::TimestampOnly => {
                let (bounds, latest_only) = self.external_scope(query, &schema)?;
                Ok(Box::new(TimestampOnlyReader::new(
                    self.source.clone(),
                    bounds,
                    latest_only,
                    output_schema,
                )))
            }

            ReadPlan::ExternalOnly { attributes } => {
                let (bounds, latest_only) = self.external_scope(query, &schema)?;
                let extractors = extractors_for(&schema, &attributes)?;
                Ok(Box::new(ExternalOnlyReader::new(
                    self.source.clone(),
                    bounds,
                    latest_only,
                    extractors,
                    output_schema,
                )))
            }
        }
    }

    /// Drop the cached schema and close idle external handles
    pub fn dispose(&self) {
        let mut cached = self
            .schema
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *cached = None;
        self.pool.clear();
        debug!("Station datastore disposed");
    }

    /// Range to take the latest sample from when no instant is given.
    /// The missing-timestamp policy only applies to a query with no time
    /// constraint at all.
    fn time_bounds(&self, query: &Query, schema: &MergedSchema) -> Result<TimeBounds> {
        let bounds = extract_time_bounds(&query.filter, schema.time_attribute());
        match self.config.missing_timestamp {
            MissingTimestampPolicy::Reject if bounds.is_unbounded() => {
                Err(DsgError::missing_timestamp(schema.time_attribute()))
            }
            _ => Ok(bounds),
        }
    }

    /// Bounds for an external scan, and whether to keep only each
    /// station's latest instant. A constrained query scans every sample in
    /// range; an unconstrained one falls back to the policy.
    fn external_scope(&self, query: &Query, schema: &MergedSchema) -> Result<(TimeBounds, bool)> {
        let bounds = extract_time_bounds(&query.filter, schema.time_attribute());
        if !bounds.is_unbounded() {
            return Ok((bounds, false));
        }
        Ok((self.time_bounds(query, schema)?, true))
    }
}

impl Drop for StationDataStore {
    fn drop(&mut self) {
        self.pool.clear();
    }
}

fn projected_schema(output: &[&AttributeDescriptor]) -> SchemaRef {
    Arc::new(Schema::new(
        output.iter().map(|a| a.to_field()).collect::<Vec<_>>(),
    ))
}

fn extractors_for(schema: &MergedSchema, names: &[String]) -> Result<Vec<Extractor>> {
    names
        .iter()
        .map(|name| {
            schema
                .find(name)
                .and_then(AttributeDescriptor::extractor)
                .cloned()
                .ok_or_else(|| DsgError::UnknownAttribute(name.clone()))
        })
        .collect()
}
