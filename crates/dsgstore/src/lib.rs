// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Station datastore federation.
//!
//! A [`StationDataStore`] presents a vector record store (one record per
//! station, with geometry) and an external time-indexed dataset (one series
//! of observations per station) as a single attribute schema. Queries are
//! routed to the cheapest reader that can answer them: the vector store
//! alone, the external dataset alone, or a left join of the two keyed by
//! the station attribute.

pub mod config;
pub mod datastore;
pub mod error;
pub mod extractor;
pub mod memory;
pub mod plan;
pub mod pool;
pub mod query;
pub mod reader;
pub mod schema;
pub mod store;
pub mod value;

pub use config::{MissingTimestampPolicy, StoreConfig};
pub use datastore::StationDataStore;
pub use error::{DsgError, Result};
pub use extractor::Extractor;
pub use plan::{ReadPlan, select_plan};
pub use pool::{DatasetPool, PoolConfig, PoolStats, PooledDataset};
pub use query::{
    CompareOp, Filter, Projection, Query, TimeBounds, extract_time_bounds, extract_timestamp,
    requires_attributes,
};
pub use reader::{Feature, FeatureReader, collect_batch};
pub use schema::{AttributeDescriptor, AttributeNameSet, MergedSchema, Origin, build_schema};
pub use store::{
    ExternalDataset, ExternalProvider, RowReader, Sample, SampleTime, VariableDescriptor,
    VariableShape, VectorRow, VectorStore,
};
pub use value::Value;
